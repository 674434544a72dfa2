use std::sync::Mutex;

use indicatif::{ProgressBar, ProgressStyle};
use tracing::{debug, info};

const PROGRESS_TEMPLATE: &str = "{msg} [{elapsed_precise}] [{bar:40.cyan/blue}] {bytes}/{total_bytes} ({eta})";

/// Receives transfer lifecycle callbacks from a session.
///
/// Every method defaults to a no-op so presenters only implement what they show.
pub trait TransferObserver: Send + Sync {
    /// A transfer named `name` of `total` bytes has started.
    fn on_transfer_begin(&self, _name: &str, _total: u64) {}

    /// `bytes` more bytes of the current transfer have been stored.
    fn on_progress(&self, _bytes: u64) {}

    fn on_transfer_end(&self) {}

    /// A short user-facing message ("Device connected", "Transfer finished", ...).
    fn on_notify(&self, _message: &str) {}
}

/// Logs notifications and transfer boundaries through `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingObserver;

impl TransferObserver for TracingObserver {
    fn on_transfer_begin(&self, name: &str, total: u64) {
        info!("Receiving {} ({} bytes)", name, total);
    }

    fn on_progress(&self, bytes: u64) {
        debug!(bytes, "progress");
    }

    fn on_transfer_end(&self) {
        debug!("transfer ended");
    }

    fn on_notify(&self, message: &str) {
        info!("{}", message);
    }
}

/// Draws an `indicatif` progress bar for the running transfer.
#[derive(Default)]
pub struct ProgressObserver {
    bar: Mutex<Option<ProgressBar>>,
}

impl ProgressObserver {
    pub fn new() -> Self {
        Self::default()
    }

    fn style() -> ProgressStyle {
        ProgressStyle::default_bar()
            .template(PROGRESS_TEMPLATE)
            .unwrap_or_else(|_| ProgressStyle::default_bar())
    }
}

impl TransferObserver for ProgressObserver {
    fn on_transfer_begin(&self, name: &str, total: u64) {
        let bar = ProgressBar::new(total);
        bar.set_style(Self::style());
        bar.set_message(name.to_string());
        if let Ok(mut slot) = self.bar.lock() {
            if let Some(previous) = slot.replace(bar) {
                previous.abandon();
            }
        }
    }

    fn on_progress(&self, bytes: u64) {
        if let Ok(slot) = self.bar.lock() {
            if let Some(bar) = slot.as_ref() {
                bar.inc(bytes);
            }
        }
    }

    fn on_transfer_end(&self) {
        if let Ok(mut slot) = self.bar.lock() {
            if let Some(bar) = slot.take() {
                bar.finish_and_clear();
            }
        }
    }

    fn on_notify(&self, message: &str) {
        if let Ok(slot) = self.bar.lock() {
            if let Some(bar) = slot.as_ref() {
                bar.println(message);
                return;
            }
        }
        info!("{}", message);
    }
}
