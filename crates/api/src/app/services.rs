use std::{convert::Infallible, sync::Arc, time::Duration};

use axum::response::sse::{Event as SseEvent, KeepAlive, Sse};
use chrono::{DateTime, NaiveDate, Utc};
use tokio::sync::broadcast;
use tokio_stream::{StreamExt, wrappers::BroadcastStream};

use campusledger_catalog::{FeeHeadId, FeeStructureId};
use campusledger_core::{AggregateId, DomainError, TenantId};
use campusledger_directory::{InMemoryStudentDirectory, InMemoryTenantRegistry};
use campusledger_events::{EventBus, EventEnvelope, InMemoryEventBus, Subscription};
use campusledger_infra::{
    command_dispatcher::{CommandDispatcher, DispatchError},
    event_store::{InMemoryEventStore, PostgresEventStore, StoredEvent},
    generation::{GenerationError, GenerationOutcome, GenerationRequest, InvoiceGenerator},
    invoice_numbers::{InvoiceNumberAllocator, PostgresNumberJournal},
    projections::{
        CatalogProjection, FeeHeadReadModel, FeeStructureReadModel, InvoiceReadModel,
        InvoicesProjection, PostgresCursorStore, ProjectionCursorStore,
    },
    read_model::InMemoryTenantStore,
    reporting::{FeeSummary, ReportingService},
    sweep::{OverdueSweep, SweepOutcome},
};
use campusledger_invoicing::{InvoiceId, TransactionId};
use sqlx::PgPool;

/// Realtime message broadcast via SSE when a projection advances.
#[derive(Debug, Clone, serde::Serialize)]
pub struct RealtimeMessage {
    pub tenant_id: TenantId,
    pub topic: String,
    pub payload: serde_json::Value,
}

type Bus = Arc<InMemoryEventBus<EventEnvelope<serde_json::Value>>>;
type Directory = Arc<InMemoryStudentDirectory>;
type InvoiceStore = Arc<InMemoryTenantStore<InvoiceId, InvoiceReadModel>>;
type TransactionIndex = Arc<InMemoryTenantStore<TransactionId, InvoiceId>>;
type HeadStore = Arc<InMemoryTenantStore<FeeHeadId, FeeHeadReadModel>>;
type StructureStore = Arc<InMemoryTenantStore<FeeStructureId, FeeStructureReadModel>>;

type InMemoryDispatcher = CommandDispatcher<Arc<InMemoryEventStore>, Bus>;
type PersistentDispatcher = CommandDispatcher<Arc<PostgresEventStore>, Bus>;

/// The wired application services behind the HTTP handlers.
///
/// `InMemory` (dev/test) keeps everything in process; `Persistent` writes the
/// event streams and projection cursors to Postgres. The read models and the
/// event bus stay in memory in both modes: projections are rebuildable from
/// the streams, so losing them on restart only costs a replay.
pub enum AppServices {
    InMemory {
        dispatcher: Arc<InMemoryDispatcher>,
        generator: Arc<InvoiceGenerator<Arc<InMemoryEventStore>, Bus, Directory>>,
        sweep: Arc<OverdueSweep<Arc<InMemoryEventStore>, Bus, InvoiceStore>>,
        catalog_projection: Arc<CatalogProjection<HeadStore, StructureStore>>,
        invoices_projection: Arc<InvoicesProjection<InvoiceStore, TransactionIndex>>,
        reporting: Arc<ReportingService<InvoiceStore>>,
        directory: Directory,
        tenants: Arc<InMemoryTenantRegistry>,
        realtime_tx: broadcast::Sender<RealtimeMessage>,
    },
    Persistent {
        dispatcher: Arc<PersistentDispatcher>,
        generator: Arc<InvoiceGenerator<Arc<PostgresEventStore>, Bus, Directory>>,
        sweep: Arc<OverdueSweep<Arc<PostgresEventStore>, Bus, InvoiceStore>>,
        catalog_projection: Arc<CatalogProjection<HeadStore, StructureStore, PostgresCursorStore>>,
        invoices_projection:
            Arc<InvoicesProjection<InvoiceStore, TransactionIndex, PostgresCursorStore>>,
        reporting: Arc<ReportingService<InvoiceStore>>,
        directory: Directory,
        tenants: Arc<InMemoryTenantRegistry>,
        realtime_tx: broadcast::Sender<RealtimeMessage>,
    },
}

pub async fn build_services() -> AppServices {
    let use_persistent = std::env::var("USE_PERSISTENT_STORES")
        .unwrap_or_else(|_| "false".to_string())
        .parse::<bool>()
        .unwrap_or(false);

    if use_persistent {
        build_persistent_services().await
    } else {
        build_in_memory_services()
    }
}

fn build_in_memory_services() -> AppServices {
    let store = Arc::new(InMemoryEventStore::new());
    let bus: Bus = Arc::new(InMemoryEventBus::new());

    let invoice_store: InvoiceStore = Arc::new(InMemoryTenantStore::new());
    let transaction_index: TransactionIndex = Arc::new(InMemoryTenantStore::new());
    let invoices_projection = Arc::new(InvoicesProjection::new(
        invoice_store.clone(),
        transaction_index,
    ));

    let head_store: HeadStore = Arc::new(InMemoryTenantStore::new());
    let structure_store: StructureStore = Arc::new(InMemoryTenantStore::new());
    let catalog_projection = Arc::new(CatalogProjection::new(head_store, structure_store));

    let directory: Directory = Arc::new(InMemoryStudentDirectory::new());
    let tenants = Arc::new(InMemoryTenantRegistry::new());
    let numbers = Arc::new(InvoiceNumberAllocator::new());

    let (realtime_tx, _realtime_rx) = broadcast::channel::<RealtimeMessage>(256);

    spawn_projection_feed(
        bus.subscribe(),
        catalog_projection.clone(),
        invoices_projection.clone(),
        realtime_tx.clone(),
    );

    let generator = Arc::new(InvoiceGenerator::new(
        store.clone(),
        bus.clone(),
        directory.clone(),
        numbers,
    ));
    let sweep = Arc::new(OverdueSweep::new(
        store.clone(),
        bus.clone(),
        invoice_store.clone(),
    ));
    let reporting = Arc::new(ReportingService::new(invoice_store));
    let dispatcher = Arc::new(CommandDispatcher::new(store, bus));

    AppServices::InMemory {
        dispatcher,
        generator,
        sweep,
        catalog_projection,
        invoices_projection,
        reporting,
        directory,
        tenants,
        realtime_tx,
    }
}

async fn build_persistent_services() -> AppServices {
    let database_url = std::env::var("DATABASE_URL")
        .expect("DATABASE_URL must be set when USE_PERSISTENT_STORES=true");

    let pool = PgPool::connect(&database_url)
        .await
        .expect("failed to connect to Postgres");

    let store = Arc::new(PostgresEventStore::new(pool.clone()));
    let bus: Bus = Arc::new(InMemoryEventBus::new());
    let number_journal = Arc::new(PostgresNumberJournal::new(pool.clone()));
    let cursors = Arc::new(PostgresCursorStore::new(pool));

    let invoice_store: InvoiceStore = Arc::new(InMemoryTenantStore::new());
    let transaction_index: TransactionIndex = Arc::new(InMemoryTenantStore::new());
    let invoices_projection = Arc::new(
        InvoicesProjection::new(invoice_store.clone(), transaction_index)
            .with_persistent_cursors(cursors.clone(), "fees.invoices"),
    );

    let head_store: HeadStore = Arc::new(InMemoryTenantStore::new());
    let structure_store: StructureStore = Arc::new(InMemoryTenantStore::new());
    let catalog_projection = Arc::new(
        CatalogProjection::new(head_store, structure_store)
            .with_persistent_cursors(cursors, "fees.catalog"),
    );

    let directory: Directory = Arc::new(InMemoryStudentDirectory::new());
    let tenants = Arc::new(InMemoryTenantRegistry::new());
    // Sequences and issued numbers survive restarts through the journal.
    let numbers = Arc::new(InvoiceNumberAllocator::with_journal(number_journal));

    let (realtime_tx, _realtime_rx) = broadcast::channel::<RealtimeMessage>(256);

    spawn_projection_feed(
        bus.subscribe(),
        catalog_projection.clone(),
        invoices_projection.clone(),
        realtime_tx.clone(),
    );

    let generator = Arc::new(InvoiceGenerator::new(
        store.clone(),
        bus.clone(),
        directory.clone(),
        numbers,
    ));
    let sweep = Arc::new(OverdueSweep::new(
        store.clone(),
        bus.clone(),
        invoice_store.clone(),
    ));
    let reporting = Arc::new(ReportingService::new(invoice_store));
    let dispatcher = Arc::new(CommandDispatcher::new(store, bus));

    AppServices::Persistent {
        dispatcher,
        generator,
        sweep,
        catalog_projection,
        invoices_projection,
        reporting,
        directory,
        tenants,
        realtime_tx,
    }
}

/// Background subscriber: bus -> projections, then a lossy realtime broadcast.
fn spawn_projection_feed<C1, C2>(
    sub: Subscription<EventEnvelope<serde_json::Value>>,
    catalog_projection: Arc<CatalogProjection<HeadStore, StructureStore, C1>>,
    invoices_projection: Arc<InvoicesProjection<InvoiceStore, TransactionIndex, C2>>,
    realtime_tx: broadcast::Sender<RealtimeMessage>,
) where
    C1: ProjectionCursorStore + Send + Sync + 'static,
    C2: ProjectionCursorStore + Send + Sync + 'static,
{
    tokio::task::spawn_blocking(move || {
        loop {
            match sub.recv() {
                Ok(env) => {
                    let at = env.aggregate_type().to_string();

                    let apply_ok = match at.as_str() {
                        "fees.catalog" => catalog_projection
                            .apply_envelope(&env)
                            .map_err(|e| e.to_string()),
                        "fees.invoice" => invoices_projection
                            .apply_envelope(&env)
                            .map_err(|e| e.to_string()),
                        _ => Ok(()),
                    };

                    if let Err(e) = apply_ok {
                        tracing::warn!("projection apply failed: {e}");
                        continue;
                    }

                    // Lossy; no backpressure on the command path.
                    let _ = realtime_tx.send(RealtimeMessage {
                        tenant_id: env.tenant_id(),
                        topic: format!("{at}.projection_updated"),
                        payload: serde_json::json!({
                            "kind": "projection_update",
                            "aggregate_type": at,
                            "aggregate_id": env.aggregate_id().to_string(),
                            "sequence_number": env.sequence_number(),
                        }),
                    });
                }
                Err(_) => break,
            }
        }
    });
}

impl AppServices {
    pub fn dispatch<A>(
        &self,
        tenant_id: TenantId,
        aggregate_id: AggregateId,
        aggregate_type: &str,
        command: A::Command,
        make_aggregate: impl FnOnce(TenantId, AggregateId) -> A,
    ) -> Result<Vec<StoredEvent>, DispatchError>
    where
        A: campusledger_core::Aggregate<Error = DomainError>,
        A::Event: campusledger_events::Event + serde::Serialize + serde::de::DeserializeOwned,
    {
        match self {
            AppServices::InMemory { dispatcher, .. } => dispatcher.dispatch::<A>(
                tenant_id,
                aggregate_id,
                aggregate_type,
                command,
                make_aggregate,
            ),
            AppServices::Persistent { dispatcher, .. } => dispatcher.dispatch::<A>(
                tenant_id,
                aggregate_id,
                aggregate_type,
                command,
                make_aggregate,
            ),
        }
    }

    pub fn generate(&self, req: GenerationRequest) -> Result<GenerationOutcome, GenerationError> {
        match self {
            AppServices::InMemory { generator, .. } => generator.generate(req),
            AppServices::Persistent { generator, .. } => generator.generate(req),
        }
    }

    pub fn sweep_overdue(
        &self,
        tenant_id: TenantId,
        as_of: NaiveDate,
        now: DateTime<Utc>,
    ) -> SweepOutcome {
        match self {
            AppServices::InMemory { sweep, .. } => sweep.run(tenant_id, as_of, now),
            AppServices::Persistent { sweep, .. } => sweep.run(tenant_id, as_of, now),
        }
    }

    pub fn head_get(
        &self,
        tenant_id: TenantId,
        fee_head_id: &FeeHeadId,
    ) -> Option<FeeHeadReadModel> {
        match self {
            AppServices::InMemory {
                catalog_projection, ..
            } => catalog_projection.get_head(tenant_id, fee_head_id),
            AppServices::Persistent {
                catalog_projection, ..
            } => catalog_projection.get_head(tenant_id, fee_head_id),
        }
    }

    pub fn heads_list(&self, tenant_id: TenantId) -> Vec<FeeHeadReadModel> {
        match self {
            AppServices::InMemory {
                catalog_projection, ..
            } => catalog_projection.list_heads(tenant_id),
            AppServices::Persistent {
                catalog_projection, ..
            } => catalog_projection.list_heads(tenant_id),
        }
    }

    pub fn structures_list(&self, tenant_id: TenantId) -> Vec<FeeStructureReadModel> {
        match self {
            AppServices::InMemory {
                catalog_projection, ..
            } => catalog_projection.list_structures(tenant_id),
            AppServices::Persistent {
                catalog_projection, ..
            } => catalog_projection.list_structures(tenant_id),
        }
    }

    pub fn invoices_get(
        &self,
        tenant_id: TenantId,
        invoice_id: &InvoiceId,
    ) -> Option<InvoiceReadModel> {
        match self {
            AppServices::InMemory {
                invoices_projection,
                ..
            } => invoices_projection.get(tenant_id, invoice_id),
            AppServices::Persistent {
                invoices_projection,
                ..
            } => invoices_projection.get(tenant_id, invoice_id),
        }
    }

    pub fn invoices_list(&self, tenant_id: TenantId) -> Vec<InvoiceReadModel> {
        match self {
            AppServices::InMemory {
                invoices_projection,
                ..
            } => invoices_projection.list(tenant_id),
            AppServices::Persistent {
                invoices_projection,
                ..
            } => invoices_projection.list(tenant_id),
        }
    }

    pub fn find_by_transaction(
        &self,
        tenant_id: TenantId,
        transaction_id: &TransactionId,
    ) -> Option<InvoiceReadModel> {
        match self {
            AppServices::InMemory {
                invoices_projection,
                ..
            } => invoices_projection.find_by_transaction(tenant_id, transaction_id),
            AppServices::Persistent {
                invoices_projection,
                ..
            } => invoices_projection.find_by_transaction(tenant_id, transaction_id),
        }
    }

    pub fn summary(&self, tenant_id: TenantId) -> FeeSummary {
        match self {
            AppServices::InMemory { reporting, .. } => reporting.summarize(tenant_id),
            AppServices::Persistent { reporting, .. } => reporting.summarize(tenant_id),
        }
    }

    pub fn recent_invoices(&self, tenant_id: TenantId, limit: usize) -> Vec<InvoiceReadModel> {
        match self {
            AppServices::InMemory { reporting, .. } => reporting.recent(tenant_id, limit),
            AppServices::Persistent { reporting, .. } => reporting.recent(tenant_id, limit),
        }
    }

    pub fn directory(&self) -> &Directory {
        match self {
            AppServices::InMemory { directory, .. } => directory,
            AppServices::Persistent { directory, .. } => directory,
        }
    }

    pub fn tenant_registry(&self) -> Arc<InMemoryTenantRegistry> {
        match self {
            AppServices::InMemory { tenants, .. } => tenants.clone(),
            AppServices::Persistent { tenants, .. } => tenants.clone(),
        }
    }

    pub fn realtime_tx(&self) -> &broadcast::Sender<RealtimeMessage> {
        match self {
            AppServices::InMemory { realtime_tx, .. } => realtime_tx,
            AppServices::Persistent { realtime_tx, .. } => realtime_tx,
        }
    }
}

/// Build an SSE stream for a tenant (used by `/stream`).
pub fn tenant_sse_stream(
    services: Arc<AppServices>,
    tenant_id: TenantId,
) -> Sse<impl tokio_stream::Stream<Item = Result<SseEvent, Infallible>>> {
    let rx = services.realtime_tx().subscribe();
    let stream = BroadcastStream::new(rx).filter_map(move |msg| match msg {
        Ok(m) if m.tenant_id == tenant_id => {
            let data = serde_json::to_string(&m.payload).unwrap_or_else(|_| "{}".to_string());
            Some(Ok(SseEvent::default().event(m.topic).data(data)))
        }
        _ => None,
    });

    Sse::new(stream).keep_alive(KeepAlive::new().interval(Duration::from_secs(15)))
}
