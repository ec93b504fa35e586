/*
[INPUT]:  Public API exports for coinmux-feeds crate
[OUTPUT]: Module declarations and public re-exports
[POS]:    Crate root - library entry point
[UPDATE]: When adding new modules or public exports
*/

pub mod backoff;
pub mod config;
pub mod feed;
pub mod hub;
pub mod runner;

// Re-export main types for convenience
pub use backoff::Backoff;
pub use config::StreamConfig;
pub use feed::{FeedConfig, FeedEntry, FeedState};
pub use hub::{FeedHub, FeedStatus};
pub use runner::FeedRunner;
