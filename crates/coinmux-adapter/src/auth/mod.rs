/*
[INPUT]:  Session tokens issued by the login flow (outside this crate)
[OUTPUT]: Token accessors for authenticated streams and snapshot requests
[POS]:    Auth layer - session token access
[UPDATE]: When adding token sources or changing expiry handling
*/

pub mod session;

pub use session::{SessionTokenStore, StaticToken, TokenData, expiry_after};

use std::fmt;

/// Supplies the session token for authenticated channel families and requests.
///
/// Returning `None` means no usable token right now (never issued, cleared or expired).
pub trait TokenSource: Send + Sync + fmt::Debug {
    fn session_token(&self) -> Option<String>;
}
