use serde::{Deserialize, Serialize};

use campusledger_core::{DomainError, DomainResult, ValueObject};

/// Academic-year label, e.g. "2025" or "2025-26".
///
/// Opaque to the ledger beyond equality; validated for shape only.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AcademicYear(String);

impl AcademicYear {
    pub fn new(label: impl Into<String>) -> DomainResult<Self> {
        let label = label.into();
        let trimmed = label.trim();
        if trimmed.is_empty() {
            return Err(DomainError::validation("academic year must not be empty"));
        }
        if trimmed.len() > 16 {
            return Err(DomainError::validation(
                "academic year label too long (max 16 chars)",
            ));
        }
        Ok(Self(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl ValueObject for AcademicYear {}

impl core::fmt::Display for AcademicYear {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trims_and_accepts_common_labels() {
        assert_eq!(AcademicYear::new(" 2025-26 ").unwrap().as_str(), "2025-26");
        assert_eq!(AcademicYear::new("2025").unwrap().as_str(), "2025");
    }

    #[test]
    fn rejects_empty_and_oversized_labels() {
        assert!(AcademicYear::new("   ").is_err());
        assert!(AcademicYear::new("a".repeat(17)).is_err());
    }
}
