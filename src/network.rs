//! Network Request Recording
//!
//! Builds request records from CDP network events and publishes each record
//! when it finishes. Redirect hops share a request id on the wire; here every
//! hop is its own record, linked to the previous hop through `redirect_source`.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::cdp::types::{
    NetworkLoadingFailedEvent, NetworkLoadingFinishedEvent, NetworkRequestWillBeSentEvent,
    NetworkResponseReceivedEvent,
};
use crate::cdp::CommandChannel;

/// Name of the event published for every finished record
pub const REQUEST_FINISHED: &str = "requestfinished";

/// Stream of finished records
pub type FinishedRequests = mpsc::UnboundedReceiver<Arc<RequestRecord>>;

/// One hop of a network request
#[derive(Debug, Clone, Default)]
pub struct RequestRecord {
    /// CDP request id (shared by all hops of a redirect chain)
    pub request_id: String,
    /// Request URL
    pub url: String,
    /// HTTP method
    pub method: String,
    /// Resource type (Document, Script, ...)
    pub resource_type: Option<String>,
    /// Response status, if a response was seen
    pub status: Option<i32>,
    /// Whether loading failed
    pub failed: bool,
    /// The hop that redirected to this one
    pub redirect_source: Option<Arc<RequestRecord>>,
}

impl RequestRecord {
    /// A record with no redirect source
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            method: "GET".to_string(),
            ..Default::default()
        }
    }

    /// A record reached by redirecting from `source`
    pub fn redirected_from(url: impl Into<String>, source: Arc<RequestRecord>) -> Self {
        Self {
            request_id: source.request_id.clone(),
            method: source.method.clone(),
            resource_type: source.resource_type.clone(),
            redirect_source: Some(source),
            ..Self::new(url)
        }
    }

    /// Earlier hops, nearest first
    pub fn redirect_chain(&self) -> impl Iterator<Item = &RequestRecord> {
        std::iter::successors(self.redirect_source.as_deref(), |r| {
            r.redirect_source.as_deref()
        })
    }

    /// The hop that started this chain
    pub fn chain_origin(&self) -> &RequestRecord {
        self.redirect_chain().last().unwrap_or(self)
    }
}

/// Records network requests and publishes finished ones
#[derive(Default)]
pub struct NetworkRecorder {
    /// In-flight requests (request_id -> current hop)
    in_flight: Mutex<HashMap<String, RequestRecord>>,
    /// Finished records, in completion order
    finished: Mutex<Vec<Arc<RequestRecord>>>,
    /// Subscribers to finished records
    subscribers: Mutex<Vec<mpsc::UnboundedSender<Arc<RequestRecord>>>>,
}

impl NetworkRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe to records as they finish
    pub fn subscribe_finished(&self) -> FinishedRequests {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers.lock().push(tx);
        rx
    }

    /// Process a CDP event
    /// Returns true if the event was a network event that was processed
    pub fn process_event(&self, method: &str, params: &Value) -> bool {
        match method {
            "Network.requestWillBeSent" => {
                if let Ok(e) =
                    serde_json::from_value::<NetworkRequestWillBeSentEvent>(params.clone())
                {
                    self.on_request_will_be_sent(e);
                    return true;
                }
            }
            "Network.responseReceived" => {
                if let Ok(e) = serde_json::from_value::<NetworkResponseReceivedEvent>(params.clone())
                {
                    self.on_response_received(e);
                    return true;
                }
            }
            "Network.loadingFinished" => {
                if let Ok(e) = serde_json::from_value::<NetworkLoadingFinishedEvent>(params.clone())
                {
                    self.on_loading_finished(e);
                    return true;
                }
            }
            "Network.loadingFailed" => {
                if let Ok(e) = serde_json::from_value::<NetworkLoadingFailedEvent>(params.clone()) {
                    self.on_loading_failed(e);
                    return true;
                }
            }
            _ => {}
        }
        false
    }

    fn on_request_will_be_sent(&self, event: NetworkRequestWillBeSentEvent) {
        let previous = self.in_flight.lock().remove(&event.request_id);

        let record = match (previous, event.redirect_response) {
            (Some(mut previous), Some(response)) => {
                previous.status = Some(response.status);
                let source = self.record_finished(previous);
                RequestRecord::redirected_from(event.request.url, source)
            }
            _ => RequestRecord {
                request_id: event.request_id.clone(),
                url: event.request.url,
                method: event.request.method,
                resource_type: event.r#type,
                ..Default::default()
            },
        };

        self.in_flight.lock().insert(event.request_id, record);
    }

    fn on_response_received(&self, event: NetworkResponseReceivedEvent) {
        if let Some(record) = self.in_flight.lock().get_mut(&event.request_id) {
            record.status = Some(event.response.status);
        }
    }

    fn on_loading_finished(&self, event: NetworkLoadingFinishedEvent) {
        let record = self.in_flight.lock().remove(&event.request_id);
        if let Some(record) = record {
            self.record_finished(record);
        }
    }

    fn on_loading_failed(&self, event: NetworkLoadingFailedEvent) {
        let record = self.in_flight.lock().remove(&event.request_id);
        if let Some(mut record) = record {
            tracing::trace!("Request {} failed: {}", record.url, event.error_text);
            record.failed = true;
            self.record_finished(record);
        }
    }

    /// Publish a finished record to all subscribers
    pub fn record_finished(&self, record: RequestRecord) -> Arc<RequestRecord> {
        let record = Arc::new(record);
        self.finished.lock().push(Arc::clone(&record));
        self.subscribers
            .lock()
            .retain(|tx| tx.send(Arc::clone(&record)).is_ok());
        tracing::trace!("{}: {}", REQUEST_FINISHED, record.url);
        record
    }

    /// All finished records so far
    pub fn records(&self) -> Vec<Arc<RequestRecord>> {
        self.finished.lock().clone()
    }

    /// Number of requests still in flight
    pub fn in_flight_count(&self) -> usize {
        self.in_flight.lock().len()
    }

    /// Feed this recorder from a channel's network events
    ///
    /// The task ends when the channel's event streams close.
    pub fn attach(self: &Arc<Self>, channel: &dyn CommandChannel) -> JoinHandle<()> {
        let mut will_be_sent = channel.on("Network.requestWillBeSent");
        let mut response = channel.on("Network.responseReceived");
        let mut finished = channel.on("Network.loadingFinished");
        let mut failed = channel.on("Network.loadingFailed");
        let recorder = Arc::clone(self);

        tokio::spawn(async move {
            loop {
                // Biased so a request's earlier events are drained before its later ones
                let (method, params) = tokio::select! {
                    biased;
                    Some(p) = will_be_sent.recv() => ("Network.requestWillBeSent", p),
                    Some(p) = response.recv() => ("Network.responseReceived", p),
                    Some(p) = finished.recv() => ("Network.loadingFinished", p),
                    Some(p) = failed.recv() => ("Network.loadingFailed", p),
                    else => break,
                };
                recorder.process_event(method, &params);
            }
            tracing::debug!("Network recorder detached");
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn will_be_sent(id: &str, url: &str, redirect_status: Option<i32>) -> Value {
        let mut params = json!({
            "requestId": id,
            "request": {"url": url, "method": "GET"},
            "timestamp": 1.0,
            "type": "Document"
        });
        if let Some(status) = redirect_status {
            params["redirectResponse"] = json!({"url": "", "status": status, "statusText": ""});
        }
        params
    }

    #[test]
    fn test_redirect_hops_are_linked() {
        let recorder = NetworkRecorder::new();
        let mut finished = recorder.subscribe_finished();

        recorder.process_event("Network.requestWillBeSent", &will_be_sent("1", "http://a.test/", None));
        recorder.process_event("Network.requestWillBeSent", &will_be_sent("1", "https://a.test/", Some(301)));
        recorder.process_event("Network.requestWillBeSent", &will_be_sent("1", "https://www.a.test/", Some(302)));
        recorder.process_event(
            "Network.responseReceived",
            &json!({"requestId": "1", "response": {"url": "https://www.a.test/", "status": 200, "statusText": "OK"}}),
        );
        recorder.process_event(
            "Network.loadingFinished",
            &json!({"requestId": "1", "timestamp": 2.0, "encodedDataLength": 100}),
        );

        let urls: Vec<_> = std::iter::from_fn(|| finished.try_recv().ok())
            .map(|r| r.url.clone())
            .collect();
        assert_eq!(urls, vec!["http://a.test/", "https://a.test/", "https://www.a.test/"]);

        let last = recorder.records().pop().unwrap();
        assert_eq!(last.status, Some(200));
        assert_eq!(last.chain_origin().url, "http://a.test/");
        let chain: Vec<_> = last.redirect_chain().map(|r| r.status).collect();
        assert_eq!(chain, vec![Some(302), Some(301)]);
        assert_eq!(recorder.in_flight_count(), 0);
    }

    #[test]
    fn test_failed_request_is_published() {
        let recorder = NetworkRecorder::new();
        let mut finished = recorder.subscribe_finished();

        recorder.process_event("Network.requestWillBeSent", &will_be_sent("9", "https://x.test/app.js", None));
        recorder.process_event(
            "Network.loadingFailed",
            &json!({"requestId": "9", "errorText": "net::ERR_FAILED"}),
        );

        let record = finished.try_recv().unwrap();
        assert!(record.failed);
        assert!(record.redirect_source.is_none());
    }

    #[test]
    fn test_ignores_unrelated_events() {
        let recorder = NetworkRecorder::new();
        assert!(!recorder.process_event("Page.loadEventFired", &json!({})));
        assert!(!recorder.process_event("Network.loadingFinished", &json!({"bogus": true})));
    }

    #[tokio::test]
    async fn test_attach_pumps_channel_events() {
        let channel = crate::cdp::MemoryChannel::new();
        let recorder = Arc::new(NetworkRecorder::new());
        let mut finished = recorder.subscribe_finished();
        let handle = recorder.attach(&channel);

        channel.emit("Network.requestWillBeSent", will_be_sent("2", "https://b.test/", None));
        channel.emit(
            "Network.loadingFinished",
            json!({"requestId": "2", "timestamp": 3.0, "encodedDataLength": 10}),
        );

        let record = finished.recv().await.unwrap();
        assert_eq!(record.url, "https://b.test/");

        channel.close();
        handle.await.unwrap();
    }
}
