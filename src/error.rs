//! Error types for audit-driver

use thiserror::Error;

/// Result type for audit-driver operations
pub type Result<T> = std::result::Result<T, Error>;

/// CDP error code for a method the target does not implement
const METHOD_NOT_FOUND: i64 = -32601;

/// Error type for audit-driver
#[derive(Debug, Error)]
pub enum Error {
    /// Transport error
    #[error("Transport error: {context}")]
    Transport { context: String },

    /// CDP protocol error returned by the target
    #[error("CDP error in {method}: {message} (code {code})")]
    Cdp {
        method: String,
        code: i64,
        message: String,
    },

    /// Command the channel does not recognize
    #[error("Unknown command: {0}")]
    UnknownCommand(String),

    /// An event subscription ended before the event arrived
    #[error("Event stream closed before '{0}' arrived")]
    EventStreamClosed(String),

    /// Another client is controlled by a same-origin service worker
    #[error(
        "You probably have multiple tabs open to the same origin: {scope_url} controls {clients} other client(s)"
    )]
    MultipleTabs { scope_url: String, clients: usize },

    /// Service worker event delivered out of order
    #[error("Service worker guard: {0}")]
    Guard(#[from] crate::service_worker::GuardError),

    /// A domain that would skew the trace is enabled
    #[error("{0} domain enabled when starting trace")]
    DomainEnabled(String),

    /// URL could not be parsed
    #[error("Invalid URL '{url}': {source}")]
    InvalidUrl {
        url: String,
        #[source]
        source: url::ParseError,
    },

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl Error {
    /// Create a transport error with context
    pub fn transport(context: impl Into<String>) -> Self {
        Self::Transport {
            context: context.into(),
        }
    }

    /// Create a CDP error with full context
    pub fn cdp(method: impl Into<String>, code: i64, message: impl Into<String>) -> Self {
        Self::Cdp {
            method: method.into(),
            code,
            message: message.into(),
        }
    }

    /// Create an invalid URL error
    pub fn invalid_url(url: impl Into<String>, source: url::ParseError) -> Self {
        Self::InvalidUrl {
            url: url.into(),
            source,
        }
    }

    /// Check if the target reported a remote object id it no longer knows
    pub fn is_missing_object(&self) -> bool {
        match self {
            Error::Cdp { message, .. } => message.contains("Could not find object"),
            _ => false,
        }
    }

    /// Check if the command was rejected as unknown, locally or by the target
    pub fn is_unknown_method(&self) -> bool {
        match self {
            Error::UnknownCommand(_) => true,
            Error::Cdp { code, .. } => *code == METHOD_NOT_FOUND,
            _ => false,
        }
    }

    /// Check if this is the cross-tab service worker violation
    pub fn is_multiple_tabs(&self) -> bool {
        matches!(self, Error::MultipleTabs { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_multiple_tabs_message() {
        let err = Error::MultipleTabs {
            scope_url: "https://example.com/".into(),
            clients: 1,
        };
        assert!(err.to_string().contains("multiple tabs"));
        assert!(err.is_multiple_tabs());
    }

    #[test]
    fn test_classifiers() {
        let missing = Error::cdp(
            "Runtime.getProperties",
            -32000,
            "Could not find object with given id",
        );
        assert!(missing.is_missing_object());
        assert!(!missing.is_unknown_method());

        let unknown = Error::cdp("Foo.bar", METHOD_NOT_FOUND, "'Foo.bar' wasn't found");
        assert!(unknown.is_unknown_method());
        assert!(Error::UnknownCommand("Foo.bar".into()).is_unknown_method());
        assert!(!Error::transport("closed").is_missing_object());
    }
}
