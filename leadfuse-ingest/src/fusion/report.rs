//! Change report produced by every fusion

use crate::error::IngestError;
use crate::types::{FieldValue, IdentityKey, PropertyField, SourceKind};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One field whose value changed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldChange {
    pub field: PropertyField,
    pub old_value: Option<FieldValue>,
    pub new_value: FieldValue,
    pub winning_source: SourceKind,
}

/// Why a candidate value was not adopted
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RejectionReason {
    /// A higher-priority (or equal and newer) value holds the field
    Outranked { by: SourceKind },
    /// Failed the plausibility filter
    ImplausibleValue { detail: String },
}

/// Candidate value that lost
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RejectedCandidate {
    pub field: PropertyField,
    pub candidate: FieldValue,
    pub source: SourceKind,
    pub captured_at: DateTime<Utc>,
    pub reason: RejectionReason,
}

/// Audit trail of a single fusion
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeReport {
    pub identity_key: IdentityKey,
    pub fused_at: DateTime<Utc>,
    pub policy_version: String,
    /// Observations fused (enrichment excluded)
    pub observation_count: usize,
    pub changes: Vec<FieldChange>,
    pub rejected: Vec<RejectedCandidate>,
    pub signals_added: Vec<String>,
    pub contacts_added: Vec<String>,
    pub enrichment_used: bool,
}

impl ChangeReport {
    /// True when fusion altered no field, signal or contact
    pub fn is_noop(&self) -> bool {
        self.changes.is_empty() && self.signals_added.is_empty() && self.contacts_added.is_empty()
    }

    pub fn implausible_count(&self) -> usize {
        self.rejected
            .iter()
            .filter(|r| matches!(r.reason, RejectionReason::ImplausibleValue { .. }))
            .count()
    }

    /// Each plausibility rejection as an `ImplausibleValue` error
    pub fn implausible_errors(&self) -> impl Iterator<Item = IngestError> + '_ {
        self.rejected.iter().filter_map(|r| match &r.reason {
            RejectionReason::ImplausibleValue { detail } => Some(IngestError::ImplausibleValue {
                field: r.field.to_string(),
                detail: format!("{} from {}: {}", r.candidate, r.source, detail),
            }),
            RejectionReason::Outranked { .. } => None,
        })
    }

    pub fn change_for(&self, field: PropertyField) -> Option<&FieldChange> {
        self.changes.iter().find(|c| c.field == field)
    }

    pub fn rejections_for(&self, field: PropertyField) -> impl Iterator<Item = &RejectedCandidate> {
        self.rejected.iter().filter(move |r| r.field == field)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_implausible_errors_skip_outranked() {
        let at = Utc.with_ymd_and_hms(2024, 4, 2, 0, 0, 0).unwrap();
        let rejected = |field: PropertyField, candidate: f64, reason: RejectionReason| RejectedCandidate {
            field,
            candidate: FieldValue::Number(candidate),
            source: SourceKind::ListingSite,
            captured_at: at,
            reason,
        };
        let report = ChangeReport {
            identity_key: IdentityKey::from_hex("ab".to_string()),
            fused_at: at,
            policy_version: "builtin-1".to_string(),
            observation_count: 2,
            changes: Vec::new(),
            rejected: vec![
                rejected(
                    PropertyField::Bedrooms,
                    4.0,
                    RejectionReason::Outranked {
                        by: SourceKind::RecordFeed,
                    },
                ),
                rejected(
                    PropertyField::SquareFeet,
                    18000.0,
                    RejectionReason::ImplausibleValue {
                        detail: "factor 10.0".to_string(),
                    },
                ),
            ],
            signals_added: Vec::new(),
            contacts_added: Vec::new(),
            enrichment_used: false,
        };

        let errors: Vec<_> = report.implausible_errors().collect();
        assert_eq!(errors.len(), report.implausible_count());
        assert_eq!(errors[0].kind(), "implausible_value");
        assert!(errors[0].to_string().contains("square_feet"));
    }
}
