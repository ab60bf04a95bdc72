//! Invoice number allocation.
//!
//! Numbers look like `INV-00042-7KX2QD`: a per-tenant sequence plus a random
//! disambiguator, unique across all tenants. The allocator reserves a number
//! before the invoice batch is committed; a failed batch releases its
//! reservations so the numbers are not burned.
//!
//! Sequences and issued numbers live in process memory by default. With a
//! [`NumberJournal`] attached they are also persisted, so a restarted
//! process continues each tenant's sequence and never re-issues a number
//! that a previous process already handed out.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use rand::Rng;
use rand::distributions::Alphanumeric;
use sqlx::{PgPool, Row};
use thiserror::Error;

use campusledger_core::TenantId;
use campusledger_invoicing::InvoiceNumber;

const SUFFIX_LEN: usize = 6;
const MAX_ATTEMPTS: usize = 8;

#[derive(Debug, Error)]
pub enum NumberAllocationError {
    #[error("could not allocate a unique invoice number after {0} attempts")]
    Exhausted(usize),
    #[error("allocator lock poisoned")]
    Poisoned,
    #[error("number journal failure: {0}")]
    Journal(String),
}

/// Durable record of per-tenant sequences and issued numbers.
///
/// `next_sequence` must hand out each value at most once per tenant, and
/// `try_record` must reject a number that any process already recorded.
pub trait NumberJournal: Send + Sync {
    fn next_sequence(&self, tenant_id: TenantId) -> Result<u64, NumberAllocationError>;

    /// Record an issued number; returns `false` if it was already taken.
    fn try_record(&self, tenant_id: TenantId, number: &str)
    -> Result<bool, NumberAllocationError>;

    /// Forget a number whose batch failed to commit.
    fn remove(&self, tenant_id: TenantId, number: &str);
}

#[derive(Debug, Default)]
struct AllocatorState {
    next_sequence: HashMap<TenantId, u64>,
    issued: HashSet<String>,
}

/// Process-wide invoice number allocator.
///
/// The issued set covers every reservation ever made by this allocator, so
/// a suffix collision within a sequence slot is retried with fresh
/// randomness rather than surfaced to the caller. When a journal is
/// attached it is the authority for both the sequence and uniqueness; the
/// in-memory state then only mirrors this process's reservations.
#[derive(Default)]
pub struct InvoiceNumberAllocator {
    state: Mutex<AllocatorState>,
    journal: Option<Arc<dyn NumberJournal>>,
}

impl InvoiceNumberAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocator backed by a durable journal, for deployments that must
    /// survive restarts without resetting sequences.
    pub fn with_journal(journal: Arc<dyn NumberJournal>) -> Self {
        Self {
            state: Mutex::new(AllocatorState::default()),
            journal: Some(journal),
        }
    }

    /// Reserve the next invoice number for a tenant.
    pub fn allocate(&self, tenant_id: TenantId) -> Result<InvoiceNumber, NumberAllocationError> {
        let seq = match &self.journal {
            Some(journal) => journal.next_sequence(tenant_id)?,
            None => {
                let mut state = self
                    .state
                    .lock()
                    .map_err(|_| NumberAllocationError::Poisoned)?;
                let counter = state.next_sequence.entry(tenant_id).or_insert(0);
                *counter += 1;
                *counter
            }
        };

        for _ in 0..MAX_ATTEMPTS {
            let suffix: String = rand::thread_rng()
                .sample_iter(&Alphanumeric)
                .take(SUFFIX_LEN)
                .map(char::from)
                .map(|c| c.to_ascii_uppercase())
                .collect();
            let candidate = format!("INV-{seq:05}-{suffix}");

            if let Some(journal) = &self.journal {
                if !journal.try_record(tenant_id, &candidate)? {
                    continue;
                }
            }

            let mut state = self
                .state
                .lock()
                .map_err(|_| NumberAllocationError::Poisoned)?;
            if state.issued.insert(candidate.clone()) {
                return Ok(InvoiceNumber::new(candidate));
            }
        }

        Err(NumberAllocationError::Exhausted(MAX_ATTEMPTS))
    }

    /// Return a reserved number to the pool after a failed batch commit.
    pub fn release(&self, tenant_id: TenantId, number: &InvoiceNumber) {
        if let Some(journal) = &self.journal {
            journal.remove(tenant_id, number.as_str());
        }
        if let Ok(mut state) = self.state.lock() {
            state.issued.remove(number.as_str());
        }
    }
}

/// Postgres-backed number journal.
///
/// Sequences advance through an upsert on `invoice_number_sequences` and
/// issued numbers are claimed with an insert-or-nothing on
/// `issued_invoice_numbers`, so concurrent processes sharing the database
/// cannot hand out the same value twice.
pub struct PostgresNumberJournal {
    pool: Arc<PgPool>,
}

impl PostgresNumberJournal {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }

    fn runtime_handle() -> Result<tokio::runtime::Handle, NumberAllocationError> {
        tokio::runtime::Handle::try_current()
            .map_err(|_| NumberAllocationError::Journal("no tokio runtime available".into()))
    }
}

impl NumberJournal for PostgresNumberJournal {
    fn next_sequence(&self, tenant_id: TenantId) -> Result<u64, NumberAllocationError> {
        let handle = Self::runtime_handle()?;
        let pool = self.pool.clone();
        let tenant_id_uuid = tenant_id.as_uuid();

        crate::blocking::run(&handle, async {
            let row = sqlx::query(
                r#"
                INSERT INTO invoice_number_sequences (tenant_id, next_value)
                VALUES ($1, 1)
                ON CONFLICT (tenant_id)
                DO UPDATE SET next_value = invoice_number_sequences.next_value + 1
                RETURNING next_value
                "#,
            )
            .bind(tenant_id_uuid)
            .fetch_one(&*pool)
            .await
            .map_err(|e| NumberAllocationError::Journal(e.to_string()))?;

            let next: i64 = row
                .try_get("next_value")
                .map_err(|e| NumberAllocationError::Journal(e.to_string()))?;
            Ok(next as u64)
        })
    }

    fn try_record(
        &self,
        tenant_id: TenantId,
        number: &str,
    ) -> Result<bool, NumberAllocationError> {
        let handle = Self::runtime_handle()?;
        let pool = self.pool.clone();
        let tenant_id_uuid = tenant_id.as_uuid();
        let number = number.to_string();

        crate::blocking::run(&handle, async {
            let result = sqlx::query(
                r#"
                INSERT INTO issued_invoice_numbers (invoice_number, tenant_id)
                VALUES ($1, $2)
                ON CONFLICT (invoice_number) DO NOTHING
                "#,
            )
            .bind(&number)
            .bind(tenant_id_uuid)
            .execute(&*pool)
            .await
            .map_err(|e| NumberAllocationError::Journal(e.to_string()))?;

            Ok(result.rows_affected() == 1)
        })
    }

    fn remove(&self, _tenant_id: TenantId, number: &str) {
        let handle = match tokio::runtime::Handle::try_current() {
            Ok(h) => h,
            Err(_) => return,
        };
        let pool = self.pool.clone();
        let number = number.to_string();

        crate::blocking::run(&handle, async {
            let _ = sqlx::query(
                r#"
                DELETE FROM issued_invoice_numbers
                WHERE invoice_number = $1
                "#,
            )
            .bind(&number)
            .execute(&*pool)
            .await;
        });
    }
}
