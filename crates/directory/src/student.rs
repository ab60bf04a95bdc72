//! Read-only student directory.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use serde::{Deserialize, Serialize};

use campusledger_core::{TenantId, impl_uuid_newtype};

/// Identifier of an enrolled student.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StudentId(uuid::Uuid);

/// Identifier of a class section (e.g. "Grade 5 B").
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClassId(uuid::Uuid);

impl_uuid_newtype!(StudentId, "StudentId");
impl_uuid_newtype!(ClassId, "ClassId");

/// What the ledger knows about a student: identity, school, class section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StudentRecord {
    pub student_id: StudentId,
    pub tenant_id: TenantId,
    pub class_id: ClassId,
    pub full_name: String,
}

/// Lookup interface the invoice engine depends on.
///
/// Implementations must never return a record from another tenant.
pub trait StudentDirectory: Send + Sync {
    fn get(&self, tenant_id: TenantId, student_id: StudentId) -> Option<StudentRecord>;

    fn list(&self, tenant_id: TenantId) -> Vec<StudentRecord>;
}

impl<D> StudentDirectory for Arc<D>
where
    D: StudentDirectory + ?Sized,
{
    fn get(&self, tenant_id: TenantId, student_id: StudentId) -> Option<StudentRecord> {
        (**self).get(tenant_id, student_id)
    }

    fn list(&self, tenant_id: TenantId) -> Vec<StudentRecord> {
        (**self).list(tenant_id)
    }
}

/// In-memory directory keyed by (tenant, student).
#[derive(Debug, Default)]
pub struct InMemoryStudentDirectory {
    records: RwLock<HashMap<(TenantId, StudentId), StudentRecord>>,
}

impl InMemoryStudentDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register or replace a student record (seeding/admin path).
    pub fn upsert(&self, record: StudentRecord) {
        if let Ok(mut records) = self.records.write() {
            records.insert((record.tenant_id, record.student_id), record);
        }
    }
}

impl StudentDirectory for InMemoryStudentDirectory {
    fn get(&self, tenant_id: TenantId, student_id: StudentId) -> Option<StudentRecord> {
        self.records
            .read()
            .ok()
            .and_then(|r| r.get(&(tenant_id, student_id)).cloned())
    }

    fn list(&self, tenant_id: TenantId) -> Vec<StudentRecord> {
        let mut out: Vec<StudentRecord> = match self.records.read() {
            Ok(records) => records
                .values()
                .filter(|r| r.tenant_id == tenant_id)
                .cloned()
                .collect(),
            Err(_) => Vec::new(),
        };
        out.sort_by(|a, b| a.student_id.as_uuid().cmp(b.student_id.as_uuid()));
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(tenant: TenantId) -> StudentRecord {
        StudentRecord {
            student_id: StudentId::new(),
            tenant_id: tenant,
            class_id: ClassId::new(),
            full_name: "Asha Rao".to_string(),
        }
    }

    #[test]
    fn lookup_is_tenant_scoped() {
        let dir = InMemoryStudentDirectory::new();
        let tenant_a = TenantId::new();
        let tenant_b = TenantId::new();
        let rec = record(tenant_a);
        dir.upsert(rec.clone());

        assert_eq!(dir.get(tenant_a, rec.student_id), Some(rec.clone()));
        assert_eq!(dir.get(tenant_b, rec.student_id), None);
        assert!(dir.list(tenant_b).is_empty());
    }
}
