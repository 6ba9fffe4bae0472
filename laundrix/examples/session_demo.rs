//! Session lifecycle against a running laundrix API.
//!
//! Restores the saved session (or signs in), fetches the assigned orders and
//! keeps the session fresh in the background until Ctrl-C.
//!
//! Run with:
//! ```bash
//! LAUNDRIX_API_URL=https://api.example.com \
//! LAUNDRIX_EMAIL=dana@example.com LAUNDRIX_PASSWORD=... \
//! RUST_LOG=laundrix_client=debug cargo run --example session_demo
//! ```

use laundrix::prelude::*;
use serde_json::json;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let config = ClientConfig::from_env()?;
    let client = laundrix::connect(config, "laundrix-credentials.json").await?;

    if !client.session().is_authenticated() {
        let email = std::env::var("LAUNDRIX_EMAIL")?;
        let password = std::env::var("LAUNDRIX_PASSWORD")?;
        let grant = client
            .login(&json!({"email": email, "password": password}))
            .await?;
        println!("Signed in as {}", grant.user_id.as_deref().unwrap_or("unknown"));
    }

    let cancel = CancellationToken::new();
    let monitor = client.spawn_session_monitor(Duration::from_secs(60), cancel.clone());

    match client.get_json::<serde_json::Value>("/orders/assigned").await {
        Ok(orders) => println!("Assigned orders: {orders:#}"),
        Err(e) if e.is_auth_error() => {
            println!("Session expired, please sign in again");
        }
        Err(e) => return Err(e.into()),
    }

    tokio::signal::ctrl_c().await?;
    cancel.cancel();
    monitor.await?;
    Ok(())
}
