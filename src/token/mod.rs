//! Signed session credentials: short-lived access tokens and
//! long-lived rotating refresh tokens.

pub mod issuer;

pub use issuer::{fresh_token_id, RefreshClaims, TokenIssuer, TokenPair};
