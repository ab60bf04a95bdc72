//! Tenant (school) registry boundary.
//!
//! Provisioning is owned by the platform. The ledger only needs two facts per
//! school: whether it is active, and the UPI VPA fee payments should be
//! addressed to.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use serde::{Deserialize, Serialize};

use campusledger_core::TenantId;

/// Default payee address used until a school configures its own.
pub const DEFAULT_PAYEE_VPA: &str = "school@upi";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TenantSettings {
    pub active: bool,
    pub payee_vpa: String,
}

impl Default for TenantSettings {
    fn default() -> Self {
        Self {
            active: true,
            payee_vpa: DEFAULT_PAYEE_VPA.to_string(),
        }
    }
}

/// Registry lookup the API gate and payment-intent rendering depend on.
///
/// Tenants without a record fall back to the default settings (active, default
/// VPA); deactivation is always explicit.
pub trait TenantRegistry: Send + Sync {
    fn settings(&self, tenant_id: TenantId) -> TenantSettings;

    fn upsert(&self, tenant_id: TenantId, settings: TenantSettings);
}

impl<R> TenantRegistry for Arc<R>
where
    R: TenantRegistry + ?Sized,
{
    fn settings(&self, tenant_id: TenantId) -> TenantSettings {
        (**self).settings(tenant_id)
    }

    fn upsert(&self, tenant_id: TenantId, settings: TenantSettings) {
        (**self).upsert(tenant_id, settings)
    }
}

#[derive(Debug, Default)]
pub struct InMemoryTenantRegistry {
    records: RwLock<HashMap<TenantId, TenantSettings>>,
}

impl InMemoryTenantRegistry {
    pub fn new() -> Self {
        Self::default()
    }
}

impl TenantRegistry for InMemoryTenantRegistry {
    fn settings(&self, tenant_id: TenantId) -> TenantSettings {
        self.records
            .read()
            .ok()
            .and_then(|r| r.get(&tenant_id).cloned())
            .unwrap_or_default()
    }

    fn upsert(&self, tenant_id: TenantId, settings: TenantSettings) {
        if let Ok(mut records) = self.records.write() {
            records.insert(tenant_id, settings);
        }
    }
}
