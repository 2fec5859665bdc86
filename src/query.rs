//! DOM and remote object queries
//!
//! Protocol replies encode "not found" in several shapes: a `0` node id, a
//! missing property entry, an entry without a value, or an object id the
//! target no longer knows. All of them come back as `None` here.

use serde_json::{Number, Value};

use crate::cdp::types::NodeId;
use crate::cdp::Session;
use crate::error::Result;

/// Node id the target returns when a selector matches nothing
pub const NO_MATCH: NodeId = 0;

/// A matched DOM element
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Element {
    node_id: NodeId,
}

impl Element {
    /// Wrap a node id, `None` for the no-match sentinel
    pub fn from_node_id(node_id: NodeId) -> Option<Self> {
        (node_id != NO_MATCH).then_some(Self { node_id })
    }

    /// The protocol node id
    pub fn node_id(&self) -> NodeId {
        self.node_id
    }
}

/// Null-safe lookups over a session
#[derive(Clone)]
pub struct QueryResolver {
    session: Session,
}

impl QueryResolver {
    pub fn new(session: Session) -> Self {
        Self { session }
    }

    /// First element matching `selector`, if any
    pub async fn query_selector(&self, selector: &str) -> Result<Option<Element>> {
        let root = self.session.get_document().await?;
        let node_id = self.session.query_selector(root.node_id, selector).await?;
        Ok(Element::from_node_id(node_id))
    }

    /// All elements matching `selector`, in document order
    pub async fn query_selector_all(&self, selector: &str) -> Result<Vec<Element>> {
        let root = self.session.get_document().await?;
        let node_ids = self
            .session
            .query_selector_all(root.node_id, selector)
            .await?;
        Ok(node_ids
            .into_iter()
            .filter_map(Element::from_node_id)
            .collect())
    }

    /// Value of property `name` on remote object `object_id`
    pub async fn get_object_property(&self, object_id: &str, name: &str) -> Result<Option<Value>> {
        let properties = match self.session.get_properties(object_id).await {
            Ok(properties) => properties,
            Err(e) if e.is_missing_object() => {
                tracing::trace!("Remote object {} is gone", object_id);
                return Ok(None);
            }
            Err(e) => return Err(e),
        };

        Ok(properties
            .into_iter()
            .find(|p| p.name == name)
            .and_then(|p| p.value)
            .and_then(|object| object.value)
            .map(coerce_property_value))
    }
}

/// Numeric strings become numbers, everything else passes through
pub fn coerce_property_value(value: Value) -> Value {
    let Value::String(raw) = value else {
        return value;
    };

    if let Ok(n) = raw.parse::<i64>() {
        return Value::Number(n.into());
    }
    // from_f64 rejects "NaN" and "inf"
    match raw.parse::<f64>().ok().and_then(Number::from_f64) {
        Some(n) => Value::Number(n),
        None => Value::String(raw),
    }
}
