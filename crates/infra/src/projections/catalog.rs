use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use thiserror::Error;

use campusledger_catalog::{AcademicYear, CatalogEvent, FeeHeadId, FeeStructureId};
use campusledger_core::{AggregateId, Money, TenantId};
use campusledger_directory::ClassId;
use campusledger_events::EventEnvelope;

use crate::projections::cursor_store::{InMemoryCursorStore, ProjectionCursorStore};
use crate::read_model::TenantStore;

/// Queryable fee head read model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeeHeadReadModel {
    pub fee_head_id: FeeHeadId,
    pub name: String,
    pub description: String,
    pub active: bool,
    pub created_at: DateTime<Utc>,
}

/// Queryable fee structure read model. `locked` mirrors the catalog's
/// invoice-run freeze for the row's class/year.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeeStructureReadModel {
    pub structure_id: FeeStructureId,
    pub class_id: ClassId,
    pub fee_head_id: FeeHeadId,
    pub academic_year: AcademicYear,
    pub amount: Money,
    pub locked: bool,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
struct CursorKey {
    tenant_id: TenantId,
    aggregate_id: AggregateId,
}

#[derive(Debug, Error)]
pub enum CatalogProjectionError {
    #[error("failed to deserialize catalog event: {0}")]
    Deserialize(String),
    #[error("tenant isolation violation: {0}")]
    TenantIsolation(String),
    #[error("non-monotonic sequence number (last={last}, found={found})")]
    NonMonotonicSequence { last: u64, found: u64 },
}

/// Projection of the per-school catalog stream into fee head and fee
/// structure read models.
#[derive(Debug)]
pub struct CatalogProjection<H, S, C = InMemoryCursorStore>
where
    H: TenantStore<FeeHeadId, FeeHeadReadModel>,
    S: TenantStore<FeeStructureId, FeeStructureReadModel>,
{
    heads: H,
    structures: S,
    cursors: RwLock<HashMap<CursorKey, u64>>,
    cursor_store: Option<Arc<C>>,
    projection_name: String,
}

impl<H, S> CatalogProjection<H, S>
where
    H: TenantStore<FeeHeadId, FeeHeadReadModel>,
    S: TenantStore<FeeStructureId, FeeStructureReadModel>,
{
    pub fn new(heads: H, structures: S) -> Self {
        Self {
            heads,
            structures,
            cursors: RwLock::new(HashMap::new()),
            cursor_store: None,
            projection_name: "fees.catalog".to_string(),
        }
    }

    pub fn with_persistent_cursors<C: ProjectionCursorStore + 'static>(
        self,
        cursor_store: Arc<C>,
        projection_name: impl Into<String>,
    ) -> CatalogProjection<H, S, C> {
        CatalogProjection {
            heads: self.heads,
            structures: self.structures,
            cursors: RwLock::new(HashMap::new()),
            cursor_store: Some(cursor_store),
            projection_name: projection_name.into(),
        }
    }
}

impl<H, S, C> CatalogProjection<H, S, C>
where
    H: TenantStore<FeeHeadId, FeeHeadReadModel>,
    S: TenantStore<FeeStructureId, FeeStructureReadModel>,
    C: ProjectionCursorStore + 'static,
{
    fn get_cursor(&self, tenant_id: TenantId, aggregate_id: AggregateId) -> u64 {
        if let Some(ref cursor_store) = self.cursor_store {
            cursor_store
                .get_cursor(tenant_id, aggregate_id, &self.projection_name)
                .unwrap_or(0)
        } else {
            match self.cursors.read() {
                Ok(cursors) => *cursors
                    .get(&CursorKey {
                        tenant_id,
                        aggregate_id,
                    })
                    .unwrap_or(&0),
                Err(_) => 0,
            }
        }
    }

    fn update_cursor(&self, tenant_id: TenantId, aggregate_id: AggregateId, seq: u64) {
        if let Ok(mut cursors) = self.cursors.write() {
            cursors.insert(
                CursorKey {
                    tenant_id,
                    aggregate_id,
                },
                seq,
            );
        }
        if let Some(ref cursor_store) = self.cursor_store {
            cursor_store.update_cursor(tenant_id, aggregate_id, &self.projection_name, seq);
        }
    }

    fn clear_cursors(&self, tenant_id: TenantId) {
        if let Ok(mut cursors) = self.cursors.write() {
            cursors.retain(|k, _| k.tenant_id != tenant_id);
        }
        if let Some(ref cursor_store) = self.cursor_store {
            cursor_store.clear_cursors(tenant_id, &self.projection_name);
        }
    }

    pub fn get_head(&self, tenant_id: TenantId, fee_head_id: &FeeHeadId) -> Option<FeeHeadReadModel> {
        self.heads.get(tenant_id, fee_head_id)
    }

    pub fn list_heads(&self, tenant_id: TenantId) -> Vec<FeeHeadReadModel> {
        self.heads.list(tenant_id)
    }

    pub fn list_structures(&self, tenant_id: TenantId) -> Vec<FeeStructureReadModel> {
        self.structures.list(tenant_id)
    }

    pub fn apply_envelope(
        &self,
        envelope: &EventEnvelope<JsonValue>,
    ) -> Result<(), CatalogProjectionError> {
        if envelope.aggregate_type() != "fees.catalog" {
            return Ok(());
        }

        let tenant_id = envelope.tenant_id();
        let aggregate_id = envelope.aggregate_id();
        let seq = envelope.sequence_number();

        let last = self.get_cursor(tenant_id, aggregate_id);
        if seq == 0 {
            return Err(CatalogProjectionError::NonMonotonicSequence { last, found: seq });
        }
        if seq <= last {
            return Ok(());
        }
        if seq != last + 1 && last != 0 {
            return Err(CatalogProjectionError::NonMonotonicSequence { last, found: seq });
        }

        let ev: CatalogEvent = serde_json::from_value(envelope.payload().clone())
            .map_err(|e| CatalogProjectionError::Deserialize(e.to_string()))?;

        let event_tenant = match &ev {
            CatalogEvent::FeeHeadCreated(e) => e.tenant_id,
            CatalogEvent::FeeHeadDeactivated(e) => e.tenant_id,
            CatalogEvent::FeeStructureSet(e) => e.tenant_id,
            CatalogEvent::InvoiceRunRecorded(e) => e.tenant_id,
        };
        if event_tenant != tenant_id {
            return Err(CatalogProjectionError::TenantIsolation(
                "event tenant_id does not match envelope tenant_id".to_string(),
            ));
        }

        match ev {
            CatalogEvent::FeeHeadCreated(e) => {
                self.heads.upsert(
                    tenant_id,
                    e.fee_head_id,
                    FeeHeadReadModel {
                        fee_head_id: e.fee_head_id,
                        name: e.name,
                        description: e.description,
                        active: true,
                        created_at: e.occurred_at,
                    },
                );
            }
            CatalogEvent::FeeHeadDeactivated(e) => {
                if let Some(mut rm) = self.heads.get(tenant_id, &e.fee_head_id) {
                    rm.active = false;
                    self.heads.upsert(tenant_id, e.fee_head_id, rm);
                }
            }
            CatalogEvent::FeeStructureSet(e) => {
                self.structures.upsert(
                    tenant_id,
                    e.structure_id,
                    FeeStructureReadModel {
                        structure_id: e.structure_id,
                        class_id: e.class_id,
                        fee_head_id: e.fee_head_id,
                        academic_year: e.academic_year,
                        amount: e.amount,
                        locked: false,
                    },
                );
            }
            CatalogEvent::InvoiceRunRecorded(e) => {
                for mut rm in self.structures.list(tenant_id) {
                    if rm.class_id == e.class_id && rm.academic_year == e.academic_year {
                        rm.locked = true;
                        self.structures.upsert(tenant_id, rm.structure_id, rm);
                    }
                }
            }
        }

        self.update_cursor(tenant_id, aggregate_id, seq);
        Ok(())
    }

    pub fn rebuild_from_scratch(
        &self,
        envelopes: impl IntoIterator<Item = EventEnvelope<JsonValue>>,
    ) -> Result<(), CatalogProjectionError> {
        let mut envs: Vec<_> = envelopes.into_iter().collect();

        {
            let mut tenants = envs.iter().map(|e| e.tenant_id()).collect::<Vec<_>>();
            tenants.sort_by_key(|t| *t.as_uuid().as_bytes());
            tenants.dedup();
            for t in tenants {
                self.heads.clear_tenant(t);
                self.structures.clear_tenant(t);
                self.clear_cursors(t);
            }
        }

        envs.sort_by_key(|e| {
            (
                *e.tenant_id().as_uuid().as_bytes(),
                *e.aggregate_id().as_uuid().as_bytes(),
                e.sequence_number(),
            )
        });

        for env in &envs {
            self.apply_envelope(env)?;
        }
        Ok(())
    }
}
