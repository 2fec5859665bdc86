//! Typed CDP session
//!
//! Wraps a `CommandChannel` with typed request/reply helpers and keeps track
//! of which protocol domains are currently enabled.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;

use super::channel::CommandChannel;
use super::types::*;
use crate::error::Result;

/// A typed session over a command channel
#[derive(Clone)]
pub struct Session {
    channel: Arc<dyn CommandChannel>,
    /// Domain name -> number of outstanding `enable` calls
    domains: Arc<Mutex<HashMap<String, u32>>>,
}

impl Session {
    /// Create a session on top of a channel
    pub fn new(channel: Arc<dyn CommandChannel>) -> Self {
        Self {
            channel,
            domains: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Get the underlying channel
    pub fn channel(&self) -> &Arc<dyn CommandChannel> {
        &self.channel
    }

    /// Send a raw command
    pub async fn send_raw(&self, method: &str, params: Value) -> Result<Value> {
        let reply = self.channel.send(method, params).await?;
        self.track_domain(method);
        Ok(reply)
    }

    /// Send a command and deserialize its reply
    pub async fn send<C, R>(&self, method: &str, params: &C) -> Result<R>
    where
        C: Serialize,
        R: DeserializeOwned,
    {
        let params = serde_json::to_value(params)?;
        let reply = self.send_raw(method, params).await?;
        Ok(serde_json::from_value(reply)?)
    }

    /// Whether `domain` has been enabled and not disabled since
    pub fn is_domain_enabled(&self, domain: &str) -> bool {
        self.domains.lock().get(domain).is_some_and(|count| *count > 0)
    }

    fn track_domain(&self, method: &str) {
        let Some((domain, action)) = method.split_once('.') else {
            return;
        };
        let mut domains = self.domains.lock();
        match action {
            "enable" => {
                *domains.entry(domain.to_string()).or_default() += 1;
                tracing::debug!("Domain enabled: {}", domain);
            }
            "disable" => {
                if let Some(count) = domains.get_mut(domain) {
                    *count = count.saturating_sub(1);
                    if *count == 0 {
                        domains.remove(domain);
                        tracing::debug!("Domain disabled: {}", domain);
                    }
                }
            }
            _ => {}
        }
    }

    /// Get the document root node
    pub async fn get_document(&self) -> Result<DOMNode> {
        let result: DOMGetDocumentResult = self
            .send("DOM.getDocument", &DOMGetDocument::default())
            .await?;
        Ok(result.root)
    }

    /// Query for a single element, `0` when nothing matches
    pub async fn query_selector(&self, node_id: NodeId, selector: &str) -> Result<NodeId> {
        let result: DOMQuerySelectorResult = self
            .send(
                "DOM.querySelector",
                &DOMQuerySelector {
                    node_id,
                    selector: selector.to_string(),
                },
            )
            .await?;
        Ok(result.node_id)
    }

    /// Query for all matching elements
    pub async fn query_selector_all(&self, node_id: NodeId, selector: &str) -> Result<Vec<NodeId>> {
        let result: DOMQuerySelectorAllResult = self
            .send(
                "DOM.querySelectorAll",
                &DOMQuerySelectorAll {
                    node_id,
                    selector: selector.to_string(),
                },
            )
            .await?;
        Ok(result.node_ids)
    }

    /// Get the accessor properties of a remote object
    pub async fn get_properties(&self, object_id: &str) -> Result<Vec<PropertyDescriptor>> {
        let result: RuntimeGetPropertiesResult = self
            .send(
                "Runtime.getProperties",
                &RuntimeGetProperties {
                    object_id: object_id.to_string(),
                    own_properties: Some(false),
                    accessor_properties_only: Some(true),
                    generate_preview: Some(false),
                },
            )
            .await?;
        Ok(result.result)
    }

    /// Enable page events
    pub async fn page_enable(&self) -> Result<()> {
        self.send::<_, Value>("Page.enable", &PageEnable {}).await?;
        Ok(())
    }

    /// Start tracing
    pub async fn tracing_start(&self, params: &TracingStart) -> Result<()> {
        self.send::<_, Value>("Tracing.start", params).await?;
        Ok(())
    }

    /// Enable service worker events
    pub async fn service_worker_enable(&self) -> Result<()> {
        self.send::<_, Value>("ServiceWorker.enable", &ServiceWorkerEnable {})
            .await?;
        Ok(())
    }

    /// Disable service worker events
    pub async fn service_worker_disable(&self) -> Result<()> {
        self.send::<_, Value>("ServiceWorker.disable", &ServiceWorkerDisable {})
            .await?;
        Ok(())
    }
}
