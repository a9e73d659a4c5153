//! HTTP clients for stagerun.
//!
//! - Build-history API (supersede checks, status-change detection)
//! - Webhook notifier

pub mod error;
pub mod history;
pub mod webhook;

#[cfg(test)]
pub(crate) mod test_server;

pub use error::ClientError;
pub use history::HistoryClient;
pub use webhook::WebhookNotifier;

pub(crate) const USER_AGENT: &str = concat!("stagerun/", env!("CARGO_PKG_VERSION"));
