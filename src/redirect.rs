//! Redirect tracking for a pending navigation
//!
//! The tracker owns the navigation's current URL and moves it forward each
//! time a finished request turns out to be a redirect from it. Updates reach
//! the caller through a `watch` channel, so the caller reads the latest URL
//! without sharing the tracker's state.

use std::sync::Arc;

use tokio::sync::watch;

use crate::network::{FinishedRequests, RequestRecord};

/// Follows redirect chains starting at a navigation URL
#[derive(Debug, Clone)]
pub struct RedirectTracker {
    current: String,
}

impl RedirectTracker {
    pub fn new(url: impl Into<String>) -> Self {
        Self { current: url.into() }
    }

    /// Current URL of the navigation
    pub fn current(&self) -> &str {
        &self.current
    }

    /// Observe a finished request, returns the new URL if it moved
    ///
    /// Only records whose redirect ancestry contains the current URL move it,
    /// so earlier hops delivered late never rewind the navigation.
    pub fn observe(&mut self, record: &RequestRecord) -> Option<&str> {
        if record.url == self.current {
            return None;
        }
        if !record.redirect_chain().any(|hop| hop.url == self.current) {
            return None;
        }

        tracing::debug!("Navigation redirected: {} -> {}", self.current, record.url);
        self.current = record.url.clone();
        Some(&self.current)
    }
}

/// Handle to a navigation whose URL follows redirects
#[derive(Debug, Clone)]
pub struct PendingNavigation {
    rx: watch::Receiver<String>,
}

impl PendingNavigation {
    /// Latest known URL
    pub fn url(&self) -> String {
        self.rx.borrow().clone()
    }

    /// Wait for the next URL change, `None` once tracking has stopped
    pub async fn changed(&mut self) -> Option<String> {
        self.rx.changed().await.ok()?;
        Some(self.rx.borrow_and_update().clone())
    }
}

/// Arm a tracker for `url` on a stream of finished requests
///
/// The tracker runs until the stream closes or every handle is dropped.
/// Must be called within a tokio runtime.
pub fn track_redirects(url: &str, mut finished: FinishedRequests) -> PendingNavigation {
    let mut tracker = RedirectTracker::new(url);
    let (tx, rx) = watch::channel(url.to_string());

    tokio::spawn(async move {
        loop {
            let record: Arc<RequestRecord> = tokio::select! {
                _ = tx.closed() => break,
                record = finished.recv() => match record {
                    Some(record) => record,
                    None => break,
                },
            };

            if let Some(url) = tracker.observe(&record) {
                if tx.send(url.to_string()).is_err() {
                    break;
                }
            }
        }
        tracing::trace!("Redirect tracking stopped at {}", tracker.current());
    });

    PendingNavigation { rx }
}
