pub mod file;
pub mod http;

use std::sync::{Mutex, PoisonError};

pub use file::FileConfigProvider;
pub use http::HttpConfigProvider;
use tokio::sync::mpsc;

/// Hand out the change receiver once. Later callers get a closed channel.
fn take_receiver(slot: &Mutex<Option<mpsc::Receiver<()>>>) -> mpsc::Receiver<()> {
    slot.lock()
        .unwrap_or_else(PoisonError::into_inner)
        .take()
        .unwrap_or_else(|| {
            tracing::warn!("Config watch requested more than once; returning a closed channel");
            mpsc::channel(1).1
        })
}
