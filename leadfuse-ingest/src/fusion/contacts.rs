//! Contact deduplication
//!
//! Contacts are keyed by `(type, normalized value)`. Emails are lower-cased;
//! phones are reduced to digits with a leading US country code dropped. Per
//! key the higher confidence wins, then the most recent capture.

use crate::types::{CanonicalContact, ContactType, ObservedContact, SourceKind};
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;

/// Dedup key for a contact value, `None` when nothing usable remains
pub fn normalize_contact_key(contact_type: ContactType, value: &str) -> Option<String> {
    let key = match contact_type {
        ContactType::Email => value.trim().to_lowercase(),
        ContactType::Phone => {
            let digits: String = value.chars().filter(char::is_ascii_digit).collect();
            if digits.len() == 11 && digits.starts_with('1') {
                digits[1..].to_string()
            } else {
                digits
            }
        }
    };
    if key.is_empty() {
        None
    } else {
        Some(key)
    }
}

/// Lift an observed contact into a canonical entry
pub fn to_canonical(
    contact: &ObservedContact,
    default_source: SourceKind,
    captured_at: DateTime<Utc>,
) -> Option<CanonicalContact> {
    let normalized = normalize_contact_key(contact.contact_type, &contact.value)?;
    Some(CanonicalContact {
        contact_type: contact.contact_type,
        value: contact.value.trim().to_string(),
        normalized,
        confidence: contact.confidence.clamp(0.0, 1.0),
        source: contact.source.unwrap_or(default_source),
        captured_at,
    })
}

/// True when `candidate` should replace `held` for the same key
fn supersedes(candidate: &CanonicalContact, held: &CanonicalContact) -> bool {
    if candidate.confidence != held.confidence {
        return candidate.confidence > held.confidence;
    }
    candidate.captured_at > held.captured_at
}

/// Merge incoming contacts into the held list
///
/// Returns the merged list (sorted by type, then key) and the keys that were
/// not present before.
pub fn merge_contacts(
    held: &[CanonicalContact],
    incoming: impl IntoIterator<Item = CanonicalContact>,
) -> (Vec<CanonicalContact>, Vec<String>) {
    let mut by_key: BTreeMap<(ContactType, String), CanonicalContact> = held
        .iter()
        .map(|c| ((c.contact_type, c.normalized.clone()), c.clone()))
        .collect();
    let mut added = Vec::new();

    for contact in incoming {
        let key = (contact.contact_type, contact.normalized.clone());
        match by_key.get(&key) {
            Some(existing) if !supersedes(&contact, existing) => {}
            Some(_) => {
                by_key.insert(key, contact);
            }
            None => {
                added.push(contact.normalized.clone());
                by_key.insert(key, contact);
            }
        }
    }

    (by_key.into_values().collect(), added)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(day: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, day, 12, 0, 0).unwrap()
    }

    fn phone(value: &str, confidence: f64, day: u32) -> CanonicalContact {
        to_canonical(
            &ObservedContact {
                contact_type: ContactType::Phone,
                value: value.to_string(),
                confidence,
                source: None,
            },
            SourceKind::ListingSite,
            at(day),
        )
        .unwrap()
    }

    #[test]
    fn test_phone_normalization() {
        assert_eq!(
            normalize_contact_key(ContactType::Phone, "+1 (555) 010-2000").as_deref(),
            Some("5550102000")
        );
        assert_eq!(
            normalize_contact_key(ContactType::Phone, "555.010.2000").as_deref(),
            Some("5550102000")
        );
        assert_eq!(normalize_contact_key(ContactType::Phone, "n/a"), None);
    }

    #[test]
    fn test_email_case_folded() {
        assert_eq!(
            normalize_contact_key(ContactType::Email, " Owner@Example.COM ").as_deref(),
            Some("owner@example.com")
        );
    }

    #[test]
    fn test_higher_confidence_wins() {
        let held = vec![phone("555-010-2000", 0.4, 1)];
        let (merged, added) = merge_contacts(&held, vec![phone("(555) 010-2000", 0.9, 1)]);
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].confidence, 0.9);
        assert!(added.is_empty());

        let (merged, _) = merge_contacts(&merged, vec![phone("5550102000", 0.5, 9)]);
        assert_eq!(merged[0].confidence, 0.9);
    }

    #[test]
    fn test_tie_keeps_most_recent() {
        let held = vec![phone("555-010-2000", 0.7, 1)];
        let (merged, _) = merge_contacts(&held, vec![phone("555 010 2000", 0.7, 5)]);
        assert_eq!(merged[0].captured_at, at(5));
        assert_eq!(merged[0].value, "555 010 2000");
    }

    #[test]
    fn test_new_keys_reported() {
        let (merged, added) = merge_contacts(&[], vec![phone("555-010-2000", 0.7, 1)]);
        assert_eq!(merged.len(), 1);
        assert_eq!(added, vec!["5550102000".to_string()]);
    }
}
