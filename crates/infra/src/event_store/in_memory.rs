use std::collections::{HashMap, HashSet};
use std::sync::RwLock;

use campusledger_core::{AggregateId, ExpectedVersion, TenantId};

use super::r#trait::{EventStore, EventStoreError, StoredEvent, StreamAppend, UncommittedEvent};

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
struct StreamKey {
    tenant_id: TenantId,
    aggregate_id: AggregateId,
}

/// In-memory append-only event store.
///
/// Intended for tests/dev. Not optimized for performance.
#[derive(Debug, Default)]
pub struct InMemoryEventStore {
    streams: RwLock<HashMap<StreamKey, Vec<StoredEvent>>>,
}

impl InMemoryEventStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn current_version(stream: &[StoredEvent]) -> u64 {
        stream.last().map(|e| e.sequence_number).unwrap_or(0)
    }

    /// Validate one stream's batch and return its key. All events must share
    /// a tenant, aggregate, and aggregate type.
    fn validate_batch(events: &[UncommittedEvent]) -> Result<StreamKey, EventStoreError> {
        let tenant_id = events[0].tenant_id;
        let aggregate_id = events[0].aggregate_id;
        let aggregate_type = &events[0].aggregate_type;

        for (idx, e) in events.iter().enumerate() {
            if e.tenant_id != tenant_id {
                return Err(EventStoreError::TenantIsolation(format!(
                    "batch contains multiple tenant_ids (index {idx})"
                )));
            }
            if e.aggregate_id != aggregate_id {
                return Err(EventStoreError::InvalidAppend(format!(
                    "batch contains multiple aggregate_ids (index {idx})"
                )));
            }
            if &e.aggregate_type != aggregate_type {
                return Err(EventStoreError::AggregateTypeMismatch(format!(
                    "batch contains multiple aggregate_types (index {idx})"
                )));
            }
        }

        Ok(StreamKey {
            tenant_id,
            aggregate_id,
        })
    }

    /// Check version and type stability against the existing stream, then
    /// append. Callers must hold the write lock.
    fn append_to_stream(
        stream: &mut Vec<StoredEvent>,
        events: Vec<UncommittedEvent>,
        expected_version: ExpectedVersion,
    ) -> Result<Vec<StoredEvent>, EventStoreError> {
        let current = Self::current_version(stream);
        if !expected_version.matches(current) {
            return Err(EventStoreError::Concurrency(format!(
                "expected {expected_version:?}, found {current}"
            )));
        }

        if let Some(existing) = stream.first() {
            if existing.aggregate_type != events[0].aggregate_type {
                return Err(EventStoreError::AggregateTypeMismatch(format!(
                    "stream aggregate_type is '{}', attempted append with '{}'",
                    existing.aggregate_type, events[0].aggregate_type
                )));
            }
        }

        let mut next = current + 1;
        let mut committed = Vec::with_capacity(events.len());
        for e in events {
            let stored = StoredEvent {
                event_id: e.event_id,
                tenant_id: e.tenant_id,
                aggregate_id: e.aggregate_id,
                aggregate_type: e.aggregate_type,
                sequence_number: next,
                event_type: e.event_type,
                event_version: e.event_version,
                occurred_at: e.occurred_at,
                payload: e.payload,
            };
            next += 1;
            stream.push(stored.clone());
            committed.push(stored);
        }

        Ok(committed)
    }
}

impl EventStore for InMemoryEventStore {
    fn append(
        &self,
        events: Vec<UncommittedEvent>,
        expected_version: ExpectedVersion,
    ) -> Result<Vec<StoredEvent>, EventStoreError> {
        if events.is_empty() {
            return Ok(vec![]);
        }

        let key = Self::validate_batch(&events)?;

        let mut streams = self
            .streams
            .write()
            .map_err(|_| EventStoreError::InvalidAppend("lock poisoned".to_string()))?;

        let stream = streams.entry(key).or_default();
        Self::append_to_stream(stream, events, expected_version)
    }

    fn append_batch(&self, appends: Vec<StreamAppend>) -> Result<Vec<StoredEvent>, EventStoreError> {
        let appends: Vec<StreamAppend> = appends
            .into_iter()
            .filter(|a| !a.events.is_empty())
            .collect();
        if appends.is_empty() {
            return Ok(vec![]);
        }

        // Validate every stream before touching any of them; the single
        // write lock then makes the whole batch atomic.
        let mut keys = Vec::with_capacity(appends.len());
        let mut seen = HashSet::new();
        for append in &appends {
            let key = Self::validate_batch(&append.events)?;
            if !seen.insert(key) {
                return Err(EventStoreError::InvalidAppend(
                    "batch targets the same stream more than once".to_string(),
                ));
            }
            keys.push(key);
        }

        let mut streams = self
            .streams
            .write()
            .map_err(|_| EventStoreError::InvalidAppend("lock poisoned".to_string()))?;

        for (append, key) in appends.iter().zip(&keys) {
            let current = streams
                .get(key)
                .map(|s| Self::current_version(s))
                .unwrap_or(0);
            if !append.expected_version.matches(current) {
                return Err(EventStoreError::Concurrency(format!(
                    "expected {:?}, found {current}",
                    append.expected_version
                )));
            }
            if let Some(existing) = streams.get(key).and_then(|s| s.first()) {
                if existing.aggregate_type != append.events[0].aggregate_type {
                    return Err(EventStoreError::AggregateTypeMismatch(format!(
                        "stream aggregate_type is '{}', attempted append with '{}'",
                        existing.aggregate_type, append.events[0].aggregate_type
                    )));
                }
            }
        }

        let mut committed = Vec::new();
        for (append, key) in appends.into_iter().zip(keys) {
            let stream = streams.entry(key).or_default();
            committed.extend(Self::append_to_stream(
                stream,
                append.events,
                append.expected_version,
            )?);
        }

        Ok(committed)
    }

    fn load_stream(
        &self,
        tenant_id: TenantId,
        aggregate_id: AggregateId,
    ) -> Result<Vec<StoredEvent>, EventStoreError> {
        let key = StreamKey {
            tenant_id,
            aggregate_id,
        };

        let streams = self
            .streams
            .read()
            .map_err(|_| EventStoreError::InvalidAppend("lock poisoned".to_string()))?;

        Ok(streams.get(&key).cloned().unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use uuid::Uuid;

    fn event_for(tenant_id: TenantId, aggregate_id: AggregateId) -> UncommittedEvent {
        UncommittedEvent {
            event_id: Uuid::now_v7(),
            tenant_id,
            aggregate_id,
            aggregate_type: "fees.invoice".to_string(),
            event_type: "fees.invoice.raised".to_string(),
            event_version: 1,
            occurred_at: Utc::now(),
            payload: serde_json::json!({}),
        }
    }

    #[test]
    fn batch_append_is_all_or_nothing() {
        let store = InMemoryEventStore::new();
        let tenant_id = TenantId::new();
        let first = AggregateId::new();
        let second = AggregateId::new();

        // Second stream carries a stale expected version, so the whole batch
        // must be refused and the first stream must remain empty.
        let result = store.append_batch(vec![
            StreamAppend {
                events: vec![event_for(tenant_id, first)],
                expected_version: campusledger_core::ExpectedVersion::Exact(0),
            },
            StreamAppend {
                events: vec![event_for(tenant_id, second)],
                expected_version: campusledger_core::ExpectedVersion::Exact(7),
            },
        ]);
        assert!(matches!(result, Err(EventStoreError::Concurrency(_))));
        assert!(store.load_stream(tenant_id, first).unwrap().is_empty());
        assert!(store.load_stream(tenant_id, second).unwrap().is_empty());
    }

    #[test]
    fn batch_append_assigns_per_stream_sequences() {
        let store = InMemoryEventStore::new();
        let tenant_id = TenantId::new();
        let first = AggregateId::new();
        let second = AggregateId::new();

        let committed = store
            .append_batch(vec![
                StreamAppend {
                    events: vec![event_for(tenant_id, first), event_for(tenant_id, first)],
                    expected_version: campusledger_core::ExpectedVersion::Exact(0),
                },
                StreamAppend {
                    events: vec![event_for(tenant_id, second)],
                    expected_version: campusledger_core::ExpectedVersion::Exact(0),
                },
            ])
            .unwrap();

        assert_eq!(committed.len(), 3);
        let first_stream = store.load_stream(tenant_id, first).unwrap();
        assert_eq!(
            first_stream.iter().map(|e| e.sequence_number).collect::<Vec<_>>(),
            vec![1, 2]
        );
        assert_eq!(store.load_stream(tenant_id, second).unwrap().len(), 1);
    }

    #[test]
    fn duplicate_streams_in_one_batch_are_rejected() {
        let store = InMemoryEventStore::new();
        let tenant_id = TenantId::new();
        let aggregate_id = AggregateId::new();

        let result = store.append_batch(vec![
            StreamAppend {
                events: vec![event_for(tenant_id, aggregate_id)],
                expected_version: campusledger_core::ExpectedVersion::Exact(0),
            },
            StreamAppend {
                events: vec![event_for(tenant_id, aggregate_id)],
                expected_version: campusledger_core::ExpectedVersion::Exact(0),
            },
        ]);
        assert!(matches!(result, Err(EventStoreError::InvalidAppend(_))));
    }
}
