//! Cross-tab service worker guard
//!
//! An audit must be the only client of its origin's service worker. The guard
//! listens to registration and version updates and settles once it can tell
//! whether another client is controlled by a same-origin worker.
//!
//! States:
//! - `AwaitRegistrations`: waiting for the first registration list
//! - `AwaitVersions`: joining each version list against live registrations
//! - `Settled`: terminal, every later event is rejected

use std::collections::HashMap;

use thiserror::Error;
use url::{Origin, Url};

use crate::cdp::types::{
    ServiceWorkerRegistration, ServiceWorkerVersionStatus, WorkerRegistrationUpdatedEvent,
    WorkerVersionUpdatedEvent,
};
use crate::cdp::Session;
use crate::error::{Error, Result};

pub const REGISTRATION_UPDATED: &str = "ServiceWorker.workerRegistrationUpdated";
pub const VERSION_UPDATED: &str = "ServiceWorker.workerVersionUpdated";

/// Outcome of a guard run
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    /// No other client is controlled by a same-origin worker
    Satisfied,
    /// An activated same-origin worker controls other clients
    Violated { scope_url: String, clients: usize },
}

impl Verdict {
    pub fn into_result(self) -> Result<()> {
        match self {
            Verdict::Satisfied => Ok(()),
            Verdict::Violated { scope_url, clients } => {
                Err(Error::MultipleTabs { scope_url, clients })
            }
        }
    }
}

/// Event delivered in a state that cannot accept it
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GuardError {
    #[error("guard already settled as {0:?}")]
    Settled(Verdict),
    #[error("version update arrived before registrations")]
    AwaitingRegistrations,
    #[error("registrations already received")]
    RegistrationsReceived,
}

#[derive(Debug)]
enum GuardState {
    AwaitRegistrations,
    AwaitVersions {
        /// Live registrations by id
        registrations: HashMap<String, ServiceWorkerRegistration>,
    },
    Settled(Verdict),
}

/// State machine behind `assert_no_same_origin_clients`
#[derive(Debug)]
pub struct ServiceWorkerGuard {
    origin: Origin,
    state: GuardState,
}

impl ServiceWorkerGuard {
    /// Guard the origin of `page_url`
    pub fn new(page_url: &str) -> Result<Self> {
        let url = Url::parse(page_url).map_err(|e| Error::invalid_url(page_url, e))?;
        Ok(Self {
            origin: url.origin(),
            state: GuardState::AwaitRegistrations,
        })
    }

    /// The verdict, once settled
    pub fn verdict(&self) -> Option<&Verdict> {
        match &self.state {
            GuardState::Settled(verdict) => Some(verdict),
            _ => None,
        }
    }

    /// Accept the registration list, dropping deleted registrations
    pub fn on_registrations(
        &mut self,
        event: WorkerRegistrationUpdatedEvent,
    ) -> std::result::Result<(), GuardError> {
        match &self.state {
            GuardState::AwaitRegistrations => {}
            GuardState::AwaitVersions { .. } => return Err(GuardError::RegistrationsReceived),
            GuardState::Settled(verdict) => return Err(GuardError::Settled(verdict.clone())),
        }

        let registrations: HashMap<_, _> = event
            .registrations
            .into_iter()
            .filter(|r| !r.is_deleted)
            .map(|r| (r.registration_id.clone(), r))
            .collect();

        tracing::debug!(
            "Service worker guard: {} live registration(s), awaiting versions",
            registrations.len()
        );
        self.state = GuardState::AwaitVersions { registrations };
        Ok(())
    }

    /// Evaluate a version list, returns the verdict once settled
    pub fn on_versions(
        &mut self,
        event: WorkerVersionUpdatedEvent,
    ) -> std::result::Result<Option<Verdict>, GuardError> {
        let registrations = match &self.state {
            GuardState::AwaitRegistrations => return Err(GuardError::AwaitingRegistrations),
            GuardState::AwaitVersions { registrations } => registrations,
            GuardState::Settled(verdict) => return Err(GuardError::Settled(verdict.clone())),
        };

        let mut activating = false;
        for version in &event.versions {
            let Some(registration) = registrations.get(&version.registration_id) else {
                continue;
            };
            if version.status == ServiceWorkerVersionStatus::Redundant
                || !self.is_same_origin(&registration.scope_url)
            {
                continue;
            }

            if version.status != ServiceWorkerVersionStatus::Activated {
                activating = true;
            } else if !version.controlled_clients.is_empty() {
                let verdict = Verdict::Violated {
                    scope_url: registration.scope_url.clone(),
                    clients: version.controlled_clients.len(),
                };
                return Ok(Some(self.settle(verdict)));
            }
        }

        if activating {
            tracing::debug!("Service worker guard: same-origin worker still activating");
            return Ok(None);
        }
        Ok(Some(self.settle(Verdict::Satisfied)))
    }

    fn settle(&mut self, verdict: Verdict) -> Verdict {
        tracing::debug!("Service worker guard settled: {:?}", verdict);
        self.state = GuardState::Settled(verdict.clone());
        verdict
    }

    fn is_same_origin(&self, scope_url: &str) -> bool {
        Url::parse(scope_url).is_ok_and(|scope| scope.origin() == self.origin)
    }
}

/// Fail with `MultipleTabs` if another client of `page_url`'s origin is
/// controlled by an activated service worker
///
/// Waits for as many version updates as it takes for same-origin workers to
/// finish activating. There is no internal timeout.
pub async fn assert_no_same_origin_clients(session: &Session, page_url: &str) -> Result<()> {
    let mut guard = ServiceWorkerGuard::new(page_url)?;

    // Subscribe before enabling so no update is missed
    let registrations = session.channel().once(REGISTRATION_UPDATED);
    let mut versions = session.channel().on(VERSION_UPDATED);
    session.service_worker_enable().await?;

    let event: WorkerRegistrationUpdatedEvent = serde_json::from_value(registrations.await?)?;
    guard.on_registrations(event)?;

    let verdict = loop {
        let Some(payload) = versions.recv().await else {
            return Err(Error::EventStreamClosed(VERSION_UPDATED.to_string()));
        };
        let event: WorkerVersionUpdatedEvent = serde_json::from_value(payload)?;
        if let Some(verdict) = guard.on_versions(event)? {
            break verdict;
        }
    };

    session.service_worker_disable().await?;
    verdict.into_result()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn registrations(value: serde_json::Value) -> WorkerRegistrationUpdatedEvent {
        serde_json::from_value(json!({ "registrations": value })).unwrap()
    }

    fn versions(value: serde_json::Value) -> WorkerVersionUpdatedEvent {
        serde_json::from_value(json!({ "versions": value })).unwrap()
    }

    fn version(registration_id: &str, status: &str, clients: &[&str]) -> serde_json::Value {
        json!({
            "versionId": "v",
            "registrationId": registration_id,
            "scriptURL": "https://example.com/sw.js",
            "status": status,
            "controlledClients": clients,
        })
    }

    fn armed(scope: &str, deleted: bool) -> ServiceWorkerGuard {
        let mut guard = ServiceWorkerGuard::new("https://example.com/page").unwrap();
        guard
            .on_registrations(registrations(json!([
                {"registrationId": "1", "scopeURL": scope, "isDeleted": deleted}
            ])))
            .unwrap();
        guard
    }

    #[test]
    fn test_rejects_unparsable_page_url() {
        assert!(matches!(
            ServiceWorkerGuard::new("not a url"),
            Err(Error::InvalidUrl { .. })
        ));
    }

    #[test]
    fn test_versions_before_registrations() {
        let mut guard = ServiceWorkerGuard::new("https://example.com/").unwrap();
        assert_eq!(
            guard.on_versions(versions(json!([]))),
            Err(GuardError::AwaitingRegistrations)
        );
    }

    #[test]
    fn test_violation_on_controlled_client() {
        let mut guard = armed("https://example.com/", false);
        let verdict = guard
            .on_versions(versions(json!([version("1", "activated", &["TAB-2"])])))
            .unwrap();
        assert_eq!(
            verdict,
            Some(Verdict::Violated {
                scope_url: "https://example.com/".into(),
                clients: 1
            })
        );
    }

    #[test]
    fn test_settled_rejects_further_events() {
        let mut guard = armed("https://example.com/", false);
        guard.on_versions(versions(json!([]))).unwrap();
        assert_eq!(guard.verdict(), Some(&Verdict::Satisfied));

        let late = guard.on_versions(versions(json!([version("1", "activated", &["TAB-2"])])));
        assert_eq!(late, Err(GuardError::Settled(Verdict::Satisfied)));
        assert_eq!(
            guard.on_registrations(registrations(json!([]))),
            Err(GuardError::Settled(Verdict::Satisfied))
        );
        assert_eq!(guard.verdict(), Some(&Verdict::Satisfied));
    }

    #[test]
    fn test_deleted_registration_is_never_a_candidate() {
        let mut guard = armed("https://example.com/", true);
        let verdict = guard
            .on_versions(versions(json!([version("1", "activated", &["TAB-2"])])))
            .unwrap();
        assert_eq!(verdict, Some(Verdict::Satisfied));
    }

    #[test]
    fn test_origin_not_prefix() {
        let mut guard = armed("https://example.com.evil.com/", false);
        let verdict = guard
            .on_versions(versions(json!([version("1", "activated", &["TAB-2"])])))
            .unwrap();
        assert_eq!(verdict, Some(Verdict::Satisfied));
    }

    #[test]
    fn test_port_is_part_of_origin() {
        let mut guard = armed("https://example.com:8443/", false);
        let verdict = guard
            .on_versions(versions(json!([version("1", "activated", &["TAB-2"])])))
            .unwrap();
        assert_eq!(verdict, Some(Verdict::Satisfied));
    }

    #[test]
    fn test_waits_while_activating() {
        let mut guard = armed("https://example.com/", false);
        assert_eq!(
            guard.on_versions(versions(json!([version("1", "installing", &[])]))),
            Ok(None)
        );
        assert_eq!(
            guard.on_versions(versions(json!([version("1", "activating", &[])]))),
            Ok(None)
        );
        assert_eq!(
            guard.on_versions(versions(json!([version("1", "activated", &[])]))),
            Ok(Some(Verdict::Satisfied))
        );
    }

    #[test]
    fn test_violation_wins_over_activating() {
        let mut guard = ServiceWorkerGuard::new("https://example.com/").unwrap();
        guard
            .on_registrations(registrations(json!([
                {"registrationId": "1", "scopeURL": "https://example.com/a/"},
                {"registrationId": "2", "scopeURL": "https://example.com/b/"}
            ])))
            .unwrap();

        let verdict = guard
            .on_versions(versions(json!([
                version("1", "installing", &[]),
                version("2", "activated", &["TAB-9", "TAB-10"])
            ])))
            .unwrap();
        assert_eq!(
            verdict,
            Some(Verdict::Violated {
                scope_url: "https://example.com/b/".into(),
                clients: 2
            })
        );
    }

    #[test]
    fn test_redundant_and_orphan_versions_ignored() {
        let mut guard = armed("https://example.com/", false);
        let verdict = guard
            .on_versions(versions(json!([
                version("1", "redundant", &["TAB-2"]),
                version("42", "activated", &["TAB-3"])
            ])))
            .unwrap();
        assert_eq!(verdict, Some(Verdict::Satisfied));
    }
}
