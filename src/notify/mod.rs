//! Outbound notification contract.

use anyhow::Result;
use tracing::info;

/// Fire-and-forget notification sink for admission and eviction events.
///
/// Delivery failures are logged by callers and never block the engine.
pub trait Notifier: Send + Sync {
    fn notify(&self, title: &str, body: &str) -> Result<()>;
}

/// Default notifier that writes events to the log.
#[derive(Debug, Default)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(&self, title: &str, body: &str) -> Result<()> {
        info!("{}: {}", title, body);
        Ok(())
    }
}
