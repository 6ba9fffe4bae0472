//! Storage key names.
//!
//! These match the keys the mobile client has always written, so an existing
//! credential file keeps working across upgrades.

/// Bearer access token.
pub const TOKEN: &str = "token";

/// Refresh token used to mint new access tokens.
pub const REFRESH_TOKEN: &str = "refreshToken";

/// Absolute expiry of the refresh token (RFC 3339).
pub const REFRESH_TOKEN_EXPIRY: &str = "refreshTokenExpiry";

/// Identifier of the signed-in user.
pub const USER_ID: &str = "userId";

/// JSON-serialized profile detail of the signed-in user.
pub const USER_DETAIL: &str = "userDetail";

/// JSON-serialized user object returned at login.
pub const USER: &str = "user";

/// Every key owned by the session layer. Removed together on logout.
pub const AUTH_KEYS: [&str; 6] = [
    TOKEN,
    REFRESH_TOKEN,
    REFRESH_TOKEN_EXPIRY,
    USER_ID,
    USER_DETAIL,
    USER,
];
