//! In-memory command channel
//!
//! Stands in for a live target: replies are scripted per method, events can
//! be queued to fire when a command is sent or emitted directly, and every
//! command is logged. Commands nobody scripted fail with `UnknownCommand`.

use std::collections::{HashMap, VecDeque};

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::oneshot;

use super::channel::{CommandChannel, EventHub, EventOnce, EventStream};
use crate::error::{Error, Result};

#[derive(Debug, Clone)]
enum Canned {
    Value(Value),
    Error { code: i64, message: String },
}

enum Queued {
    Canned(Canned),
    Deferred(oneshot::Receiver<Result<Value>>),
}

#[derive(Default)]
struct Script {
    queued: VecDeque<Queued>,
    standing: Option<Canned>,
    events: Vec<(String, Value)>,
}

/// Handle for completing a deferred reply
#[derive(Debug)]
pub struct DeferredReply {
    tx: oneshot::Sender<Result<Value>>,
}

impl DeferredReply {
    /// Complete the command with a reply payload
    pub fn resolve(self, value: Value) {
        let _ = self.tx.send(Ok(value));
    }

    /// Complete the command with a protocol error
    pub fn fail(self, method: &str, code: i64, message: &str) {
        let _ = self.tx.send(Err(Error::cdp(method, code, message)));
    }
}

/// Scripted in-process channel
#[derive(Default)]
pub struct MemoryChannel {
    scripts: Mutex<HashMap<String, Script>>,
    sent: Mutex<Vec<(String, Value)>>,
    hub: EventHub,
}

impl MemoryChannel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reply to every call of `method` with `value`
    pub fn reply(&self, method: &str, value: Value) -> &Self {
        self.script(method).standing = Some(Canned::Value(value));
        self
    }

    /// Reply to the next call of `method` with `value`
    ///
    /// Queued replies are used before the standing one.
    pub fn reply_once(&self, method: &str, value: Value) -> &Self {
        self.script(method)
            .queued
            .push_back(Queued::Canned(Canned::Value(value)));
        self
    }

    /// Reject every call of `method` with a protocol error
    pub fn reply_error(&self, method: &str, code: i64, message: &str) -> &Self {
        self.script(method).standing = Some(Canned::Error {
            code,
            message: message.to_string(),
        });
        self
    }

    /// Hold the reply to the next call of `method` until the handle completes it
    pub fn defer(&self, method: &str) -> DeferredReply {
        let (tx, rx) = oneshot::channel();
        self.script(method).queued.push_back(Queued::Deferred(rx));
        DeferredReply { tx }
    }

    /// Emit `event` right after the next call of `method` is sent
    pub fn emit_after(&self, method: &str, event: &str, params: Value) -> &Self {
        self.script(method)
            .events
            .push((event.to_string(), params));
        self
    }

    /// Emit an event now
    pub fn emit(&self, event: &str, params: Value) -> usize {
        self.hub.dispatch(event, &params)
    }

    /// Shut down the channel, failing pending subscriptions
    pub fn close(&self) {
        self.hub.close();
    }

    /// The event fan-out
    pub fn hub(&self) -> &EventHub {
        &self.hub
    }

    /// Names of all commands sent so far, in order
    pub fn sent_commands(&self) -> Vec<String> {
        self.sent.lock().iter().map(|(m, _)| m.clone()).collect()
    }

    /// Parameters of every call of `method`, in order
    pub fn sent_params(&self, method: &str) -> Vec<Value> {
        self.sent
            .lock()
            .iter()
            .filter(|(m, _)| m == method)
            .map(|(_, p)| p.clone())
            .collect()
    }

    fn script(&self, method: &str) -> parking_lot::MappedMutexGuard<'_, Script> {
        parking_lot::MutexGuard::map(self.scripts.lock(), |scripts| {
            scripts.entry(method.to_string()).or_default()
        })
    }

    fn take_reply(&self, method: &str) -> Result<(Queued, Vec<(String, Value)>)> {
        let mut scripts = self.scripts.lock();
        let script = scripts
            .get_mut(method)
            .ok_or_else(|| Error::UnknownCommand(method.to_string()))?;

        let reply = match script.queued.pop_front() {
            Some(queued) => queued,
            None => script
                .standing
                .clone()
                .map(Queued::Canned)
                .ok_or_else(|| Error::UnknownCommand(method.to_string()))?,
        };
        Ok((reply, std::mem::take(&mut script.events)))
    }
}

#[async_trait]
impl CommandChannel for MemoryChannel {
    async fn send(&self, method: &str, params: Value) -> Result<Value> {
        self.sent.lock().push((method.to_string(), params));
        tracing::trace!("Sent CDP command: {}", method);

        let (reply, events) = self.take_reply(method)?;
        for (event, params) in events {
            self.hub.dispatch(&event, &params);
        }

        match reply {
            Queued::Canned(Canned::Value(value)) => Ok(value),
            Queued::Canned(Canned::Error { code, message }) => {
                Err(Error::cdp(method, code, message))
            }
            Queued::Deferred(rx) => rx
                .await
                .map_err(|_| Error::transport("Response channel closed"))?,
        }
    }

    fn once(&self, event: &str) -> EventOnce {
        self.hub.once(event)
    }

    fn on(&self, event: &str) -> EventStream {
        self.hub.on(event)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_unscripted_command_fails_loudly() {
        let channel = MemoryChannel::new();
        let err = channel.send("Foo.bar", json!({})).await.unwrap_err();
        assert!(matches!(err, Error::UnknownCommand(ref m) if m == "Foo.bar"));
        assert_eq!(channel.sent_commands(), vec!["Foo.bar"]);
    }

    #[tokio::test]
    async fn test_queued_replies_before_standing() {
        let channel = MemoryChannel::new();
        channel
            .reply("DOM.getDocument", json!({"root": {"nodeId": 1}}))
            .reply_once("DOM.getDocument", json!({"root": {"nodeId": 7}}));

        let first = channel.send("DOM.getDocument", json!({})).await.unwrap();
        let second = channel.send("DOM.getDocument", json!({})).await.unwrap();
        assert_eq!(first["root"]["nodeId"], 7);
        assert_eq!(second["root"]["nodeId"], 1);
    }

    #[tokio::test]
    async fn test_error_reply() {
        let channel = MemoryChannel::new();
        channel.reply_error("Runtime.getProperties", -32000, "Could not find object with given id");
        let err = channel
            .send("Runtime.getProperties", json!({"objectId": "1"}))
            .await
            .unwrap_err();
        assert!(err.is_missing_object());
    }

    #[tokio::test]
    async fn test_emit_after_fires_once() {
        let channel = MemoryChannel::new();
        channel
            .reply("ServiceWorker.enable", json!({}))
            .emit_after("ServiceWorker.enable", "ServiceWorker.workerVersionUpdated", json!({"versions": []}));

        let mut stream = channel.on("ServiceWorker.workerVersionUpdated");
        channel.send("ServiceWorker.enable", json!({})).await.unwrap();
        channel.send("ServiceWorker.enable", json!({})).await.unwrap();

        assert_eq!(stream.try_recv(), Some(json!({"versions": []})));
        assert!(stream.try_recv().is_none());
    }

    #[tokio::test]
    async fn test_deferred_replies_complete_out_of_order() {
        let channel = std::sync::Arc::new(MemoryChannel::new());
        let first = channel.defer("Runtime.evaluate");
        let second = channel.defer("Runtime.evaluate");

        let a = tokio::spawn({
            let channel = channel.clone();
            async move { channel.send("Runtime.evaluate", json!({"n": 1})).await }
        });
        let b = tokio::spawn({
            let channel = channel.clone();
            async move { channel.send("Runtime.evaluate", json!({"n": 2})).await }
        });

        // Let both commands reach the channel
        while channel.sent_commands().len() < 2 {
            tokio::task::yield_now().await;
        }

        second.resolve(json!("two"));
        first.resolve(json!("one"));

        let mut replies = vec![a.await.unwrap().unwrap(), b.await.unwrap().unwrap()];
        replies.sort_by_key(|v| v.as_str().map(String::from));
        assert_eq!(replies, vec![json!("one"), json!("two")]);
    }
}
