//! # audit-driver
//!
//! Event-correlating session driver for auditing pages over the Chrome
//! DevTools Protocol.
//!
//! The driver sits between an audit harness and an inspectable target. It
//! sends commands over a [`CommandChannel`], correlates the events the target
//! emits, and turns them into derived state:
//!
//! - **Queries** - DOM and remote object lookups where "not found" is `None`
//! - **Redirects** - a pending navigation follows its redirect chain
//! - **Tracing** - default and caller trace categories, de-duplicated
//! - **Service workers** - a guard that fails when another tab is controlled
//!   by a same-origin worker
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use audit_driver::{Driver, MemoryChannel, TraceOptions};
//!
//! #[tokio::main]
//! async fn main() -> audit_driver::Result<()> {
//!     // Any CommandChannel works; the in-memory one is scripted by hand
//!     let channel = Arc::new(MemoryChannel::new());
//!     let driver = Driver::new(channel);
//!
//!     if let Some(viewport) = driver.query_selector("meta[name=viewport]").await? {
//!         println!("viewport node {}", viewport.node_id());
//!     }
//!
//!     driver
//!         .begin_trace(Some(&TraceOptions::with_categories("v8,blink")))
//!         .await?;
//!     driver
//!         .assert_no_same_origin_service_worker_clients("https://example.com/")
//!         .await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Configuration
//!
//! ```rust
//! use audit_driver::DriverConfig;
//!
//! let config = DriverConfig {
//!     trace_sampling_frequency: 1000,
//!     ..Default::default()
//! };
//! assert_eq!(config.trace_transfer_mode, "ReturnAsStream");
//! ```

pub mod cdp;
pub mod driver;
pub mod error;
pub mod network;
pub mod query;
pub mod redirect;
pub mod service_worker;
pub mod trace;

// Re-exports
pub use cdp::{CommandChannel, EventHub, EventOnce, EventStream, MemoryChannel, Session};
pub use driver::Driver;
pub use error::{Error, Result};
pub use network::{NetworkRecorder, RequestRecord};
pub use query::{Element, QueryResolver};
pub use redirect::{PendingNavigation, RedirectTracker};
pub use service_worker::{ServiceWorkerGuard, Verdict};
pub use trace::{compose, TraceOptions, DEFAULT_TRACE_CATEGORIES};

/// Configuration for the driver
#[derive(Debug, Clone)]
pub struct DriverConfig {
    /// Categories every trace records
    pub trace_categories: Vec<String>,
    /// Sampling frequency passed to `Tracing.start`
    pub trace_sampling_frequency: u32,
    /// How the target hands back trace data
    pub trace_transfer_mode: String,
    /// Domains that must be disabled when a trace starts
    pub interfering_domains: Vec<String>,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            trace_categories: DEFAULT_TRACE_CATEGORIES
                .iter()
                .map(|c| c.to_string())
                .collect(),
            // 1000 is the target's default and too coarse for audits
            trace_sampling_frequency: 10_000,
            trace_transfer_mode: "ReturnAsStream".to_string(),
            interfering_domains: vec!["Debugger".into(), "CSS".into(), "DOM".into()],
        }
    }
}

impl DriverConfig {
    /// Create a minimal config (only caller categories are traced)
    pub fn minimal() -> Self {
        Self {
            trace_categories: vec!["-*".into()],
            ..Default::default()
        }
    }
}
