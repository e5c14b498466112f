// Tenant Registry - resolves a schedule firing to the tenants bound to it

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::domain::error::{DomainError, Result};
use crate::domain::{ScheduleName, Tenant, TenantId, TenantSpec};

/// What the firing runtime hands the dispatcher for one scheduled trigger.
///
/// `tenant_tags` is the typed replacement for the original loosely-typed
/// "extra inputs" mechanism: an explicit list of tenants bound to this
/// firing. Absent, the binding is resolved from the schedule name alone.
#[derive(Debug, Clone)]
pub struct FiringContext {
    pub schedule: ScheduleName,
    pub fired_at: DateTime<Utc>,
    pub tenant_tags: Option<Vec<TenantId>>,
}

/// Result of resolving a firing: the tenants to dispatch, plus any bound
/// identities missing from the registry (a configuration error fatal for
/// that tenant's tick only).
#[derive(Debug, Clone)]
pub struct Resolution {
    pub tenants: Vec<Tenant>,
    pub unknown: Vec<TenantId>,
}

/// Config-loaded tenant registry. Immutable during the process's life;
/// changing it requires a restart.
#[derive(Debug)]
pub struct TenantRegistry {
    tenants: Vec<Tenant>,
}

impl TenantRegistry {
    /// Build and validate the registry from config entries
    pub fn from_specs(specs: &[TenantSpec]) -> Result<Self> {
        let mut seen = HashSet::new();
        let mut tenants = Vec::with_capacity(specs.len());

        for spec in specs {
            if !seen.insert(spec.id.clone()) {
                return Err(DomainError::DuplicateTenant(spec.id.clone()));
            }
            tenants.push(Tenant::from_spec(spec)?);
        }

        Ok(Self { tenants })
    }

    pub fn get(&self, id: &str) -> Option<&Tenant> {
        self.tenants.iter().find(|t| t.id == id)
    }

    pub fn tenants(&self) -> &[Tenant] {
        &self.tenants
    }

    pub fn is_empty(&self) -> bool {
        self.tenants.is_empty()
    }

    /// Resolve the tenants bound to a firing.
    ///
    /// With explicit tags, each tag is looked up by identity; a tag missing
    /// from the registry lands in `unknown`. Without tags, every tenant whose
    /// binding names this schedule is returned - a dedicated schedule yields
    /// the single implicit tenant, a shared one fans out.
    pub fn resolve(&self, ctx: &FiringContext) -> Resolution {
        let mut tenants = Vec::new();
        let mut unknown = Vec::new();

        match &ctx.tenant_tags {
            Some(tags) => {
                for tag in tags {
                    match self.get(tag) {
                        Some(tenant) => tenants.push(tenant.clone()),
                        None => unknown.push(tag.clone()),
                    }
                }
            }
            None => {
                tenants.extend(
                    self.tenants
                        .iter()
                        .filter(|t| t.schedule_name() == ctx.schedule)
                        .cloned(),
                );
            }
        }

        debug!(
            schedule = %ctx.schedule,
            resolved = tenants.len(),
            unknown = unknown.len(),
            "Resolved firing"
        );

        Resolution { tenants, unknown }
    }
}
