//! Policy engine for evaluating authorization decisions.
//!
//! The policy engine answers the question:
//! "Can principal P perform capability C on project X?"
//!
//! Decisions are recomputed from the store on every call. Nothing is cached,
//! so a revoked role stops granting access on the very next request.

use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use super::models::{Capability, Principal, ProjectId};
use crate::db::{Store, StoreError};

// ═══════════════════════════════════════════════════════════════════════════════
// Decision
// ═══════════════════════════════════════════════════════════════════════════════

/// Result of a policy evaluation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PolicyDecision {
    /// The action is allowed.
    Allow,
    /// The action is denied, with a reason.
    Deny(String),
}

impl PolicyDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allow)
    }

    pub fn is_denied(&self) -> bool {
        matches!(self, Self::Deny(_))
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Policy Engine
// ═══════════════════════════════════════════════════════════════════════════════

/// Default bound on a single role lookup.
pub const DEFAULT_LOOKUP_TIMEOUT: Duration = Duration::from_secs(2);

/// Evaluates capability checks against role assignments held by the store.
#[derive(Clone)]
pub struct PolicyEngine {
    store: Arc<dyn Store>,
    lookup_timeout: Duration,
}

impl std::fmt::Debug for PolicyEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PolicyEngine")
            .field("lookup_timeout", &self.lookup_timeout)
            .finish_non_exhaustive()
    }
}

impl PolicyEngine {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self {
            store,
            lookup_timeout: DEFAULT_LOOKUP_TIMEOUT,
        }
    }

    pub fn with_lookup_timeout(mut self, timeout: Duration) -> Self {
        self.lookup_timeout = timeout;
        self
    }

    /// Whether `principal` holds `capability` in `project`.
    ///
    /// A principal without any role in the project simply does not hold the
    /// capability; only a failing or slow store produces an error.
    pub async fn has_capability(
        &self,
        principal: &Principal,
        project: &ProjectId,
        capability: Capability,
    ) -> Result<bool, StoreError> {
        let lookup = self
            .store
            .lookup_role_assignment(&principal.id, principal.kind, project);

        let assignment = tokio::time::timeout(self.lookup_timeout, lookup)
            .await
            .map_err(|_| StoreError::Timeout)??;

        Ok(assignment.is_some_and(|a| a.grants(capability)))
    }

    /// Evaluate a capability check and explain a denial.
    pub async fn check(
        &self,
        principal: &Principal,
        project: &ProjectId,
        capability: Capability,
    ) -> Result<PolicyDecision, StoreError> {
        let result = self.has_capability(principal, project, capability).await;

        let decision = match result {
            Ok(true) => PolicyDecision::Allow,
            Ok(false) => PolicyDecision::Deny(format!(
                "{} lacks {} on project {}",
                principal.id, capability, project
            )),
            Err(e) => {
                warn!(
                    principal = %principal.id,
                    project_id = %project,
                    capability = %capability,
                    error = %e,
                    "Role lookup failed"
                );
                metrics::counter!("authz_decisions_total", "outcome" => "error").increment(1);
                return Err(e);
            }
        };

        let outcome = if decision.is_allowed() { "allow" } else { "deny" };
        debug!(
            principal = %principal.id,
            project_id = %project,
            capability = %capability,
            outcome,
            "Policy evaluated"
        );
        metrics::counter!("authz_decisions_total", "outcome" => outcome).increment(1);

        Ok(decision)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════════
