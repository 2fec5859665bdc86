//! Driver
//!
//! Harness-facing API. Every operation delegates to the query layer, the
//! redirect tracker, the trace composer or the service worker guard.

use std::sync::Arc;

use serde_json::Value;

use crate::cdp::types::TracingStart;
use crate::cdp::{CommandChannel, Session};
use crate::error::{Error, Result};
use crate::network::NetworkRecorder;
use crate::query::{Element, QueryResolver};
use crate::redirect::{track_redirects, PendingNavigation};
use crate::service_worker::assert_no_same_origin_clients;
use crate::trace::{compose, TraceOptions};
use crate::DriverConfig;

/// Session driver for a single inspected target
pub struct Driver {
    session: Session,
    queries: QueryResolver,
    config: Arc<DriverConfig>,
}

impl Driver {
    /// Create a driver with default config
    pub fn new(channel: Arc<dyn CommandChannel>) -> Self {
        Self::with_config(channel, DriverConfig::default())
    }

    /// Create a driver with custom config
    pub fn with_config(channel: Arc<dyn CommandChannel>, config: DriverConfig) -> Self {
        let session = Session::new(channel);
        Self {
            queries: QueryResolver::new(session.clone()),
            session,
            config: Arc::new(config),
        }
    }

    /// Get the underlying CDP session
    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn config(&self) -> &DriverConfig {
        &self.config
    }

    /// Send a raw protocol command
    pub async fn send_command(&self, method: &str, params: Value) -> Result<Value> {
        self.session.send_raw(method, params).await
    }

    /// Whether a protocol domain is currently enabled
    pub fn is_domain_enabled(&self, domain: &str) -> bool {
        self.session.is_domain_enabled(domain)
    }

    // =========================================================================
    // Queries
    // =========================================================================

    /// First element matching `selector`, `None` if nothing matches
    pub async fn query_selector(&self, selector: &str) -> Result<Option<Element>> {
        self.queries.query_selector(selector).await
    }

    /// All elements matching `selector`, empty if nothing matches
    pub async fn query_selector_all(&self, selector: &str) -> Result<Vec<Element>> {
        self.queries.query_selector_all(selector).await
    }

    /// Property `name` of remote object `object_id`, `None` if unset
    pub async fn get_object_property(&self, object_id: &str, name: &str) -> Result<Option<Value>> {
        self.queries.get_object_property(object_id, name).await
    }

    // =========================================================================
    // Navigation
    // =========================================================================

    /// Follow redirects of the navigation to `url` for this page load
    ///
    /// Returns immediately; the handle's URL moves as the recorder reports
    /// finished redirect hops. Must be called within a tokio runtime.
    pub fn enable_url_update_if_redirected(
        &self,
        url: &str,
        recorder: &NetworkRecorder,
    ) -> PendingNavigation {
        track_redirects(url, recorder.subscribe_finished())
    }

    // =========================================================================
    // Tracing
    // =========================================================================

    /// Start a trace with the configured categories plus any caller categories
    pub async fn begin_trace(&self, options: Option<&TraceOptions>) -> Result<()> {
        if let Some(domain) = self
            .config
            .interfering_domains
            .iter()
            .find(|d| self.session.is_domain_enabled(d))
        {
            return Err(Error::DomainEnabled(domain.clone()));
        }

        let additional = options.and_then(|o| o.additional_trace_categories.as_deref());
        let categories = compose(&self.config.trace_categories, additional);
        tracing::debug!("Starting trace with {} categories", categories.len());

        self.session.page_enable().await?;
        self.session
            .tracing_start(&TracingStart {
                categories: categories.join(","),
                transfer_mode: Some(self.config.trace_transfer_mode.clone()),
                options: Some(format!(
                    "sampling-frequency={}",
                    self.config.trace_sampling_frequency
                )),
            })
            .await
    }

    // =========================================================================
    // Service workers
    // =========================================================================

    /// Fail if another tab is controlled by a same-origin service worker
    ///
    /// Resolves only once same-origin workers have finished activating.
    /// No timeout is applied; wrap in `tokio::time::timeout` if needed.
    pub async fn assert_no_same_origin_service_worker_clients(&self, page_url: &str) -> Result<()> {
        assert_no_same_origin_clients(&self.session, page_url).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cdp::MemoryChannel;
    use serde_json::json;

    #[tokio::test]
    async fn test_begin_trace_refuses_with_debugger_enabled() {
        let channel = Arc::new(MemoryChannel::new());
        channel.reply("Debugger.enable", json!({}));
        let driver = Driver::new(channel.clone());

        driver.send_command("Debugger.enable", json!({})).await.unwrap();
        let err = driver.begin_trace(None).await.unwrap_err();

        assert!(matches!(err, Error::DomainEnabled(ref d) if d == "Debugger"));
        assert!(channel.sent_params("Tracing.start").is_empty());
    }

    #[tokio::test]
    async fn test_begin_trace_params() {
        let channel = Arc::new(MemoryChannel::new());
        channel
            .reply("Page.enable", json!({}))
            .reply("Tracing.start", json!({}));
        let config = DriverConfig {
            trace_categories: vec!["-*".into(), "toplevel".into()],
            trace_sampling_frequency: 500,
            ..Default::default()
        };
        let driver = Driver::with_config(channel.clone(), config);

        driver
            .begin_trace(Some(&TraceOptions::with_categories("toplevel,v8")))
            .await
            .unwrap();

        assert_eq!(channel.sent_commands(), vec!["Page.enable", "Tracing.start"]);
        assert_eq!(
            channel.sent_params("Tracing.start"),
            vec![json!({
                "categories": "-*,toplevel,v8",
                "transferMode": "ReturnAsStream",
                "options": "sampling-frequency=500"
            })]
        );
        assert!(driver.is_domain_enabled("Page"));
    }
}
