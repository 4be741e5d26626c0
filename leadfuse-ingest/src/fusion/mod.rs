// Fusion - merge raw observations into one canonical record
//
// Pure: the result depends only on the existing record, the observations, the
// optional enrichment snapshot, the policy and the supplied clock value.

pub mod contacts;
pub mod owner_name;
pub mod plausibility;
pub mod policy;
pub mod report;

pub use policy::ConflictResolutionPolicy;
pub use report::{ChangeReport, FieldChange, RejectedCandidate, RejectionReason};

use crate::types::{
    CanonicalPropertyRecord, EnrichmentSnapshot, FieldValue, NormalizedAddress, PropertyField,
    Provenance, RawPropertyObservation, SourceKind,
};
use chrono::{DateTime, Utc};
use std::cmp::Ordering;
use std::collections::BTreeSet;
use tracing::{debug, warn};

/// Upper bound on unrecognized attributes kept on a canonical record
pub const MAX_EXTRAS_FOR_REVIEW: usize = 64;

/// Inputs to fusion that are not observations
#[derive(Debug, Clone, Copy)]
pub struct FusionContext<'a> {
    pub policy: &'a ConflictResolutionPolicy,
    pub now: DateTime<Utc>,
}

/// Fused record plus the audit trail that produced it
#[derive(Debug, Clone, PartialEq)]
pub struct FusionOutcome {
    pub record: CanonicalPropertyRecord,
    pub report: ChangeReport,
}

/// One candidate value for one field
#[derive(Debug, Clone)]
struct Candidate {
    value: FieldValue,
    source: SourceKind,
    captured_at: DateTime<Utc>,
}

/// Fuse `observations` (and optional `enrichment`) into `existing`
///
/// When `existing` is `None` a fresh record is created at `identity`. The
/// enrichment snapshot takes part as an `enrichment-provider` observation but
/// is not counted in `observation_count`.
pub fn fuse(
    existing: Option<&CanonicalPropertyRecord>,
    identity: &NormalizedAddress,
    observations: &[RawPropertyObservation],
    enrichment: Option<&EnrichmentSnapshot>,
    ctx: &FusionContext<'_>,
) -> FusionOutcome {
    let mut record = match existing {
        Some(record) => record.clone(),
        None => CanonicalPropertyRecord::new_empty(
            identity.identity_key.clone(),
            identity.address.clone(),
            ctx.now,
        ),
    };
    if record.address.unit.is_none() && identity.address.unit.is_some() {
        record.address.unit = identity.address.unit.clone();
    }

    let enrichment_observation = enrichment.map(|snapshot| snapshot.to_observation(&record.address));
    let inputs = order_inputs(observations, enrichment_observation.as_ref(), ctx.policy);

    let mut report = ChangeReport {
        identity_key: record.identity_key.clone(),
        fused_at: ctx.now,
        policy_version: ctx.policy.version().to_string(),
        observation_count: observations.len(),
        changes: Vec::new(),
        rejected: Vec::new(),
        signals_added: Vec::new(),
        contacts_added: Vec::new(),
        enrichment_used: enrichment.is_some(),
    };

    for field in PropertyField::ALL {
        resolve_field(field, &inputs, &mut record, &mut report, ctx);
    }

    report.signals_added = merge_signals(&mut record.distress_signals, &inputs);

    let incoming = inputs.iter().flat_map(|obs| {
        obs.contacts
            .iter()
            .filter_map(|c| contacts::to_canonical(c, obs.source, obs.captured_at))
    });
    let (merged, added) = contacts::merge_contacts(&record.contacts, incoming);
    record.contacts = merged;
    report.contacts_added = added;

    for obs in &inputs {
        for (key, value) in &obs.attributes.extras {
            if record.extras_for_review.len() >= MAX_EXTRAS_FOR_REVIEW {
                break;
            }
            record
                .extras_for_review
                .entry(key.clone())
                .or_insert_with(|| value.clone());
        }
    }

    record.observation_count += observations.len() as u64;
    record.last_fused_at = Some(ctx.now);

    debug!(
        identity_key = %record.identity_key,
        observations = observations.len(),
        enrichment = report.enrichment_used,
        changes = report.changes.len(),
        rejected = report.rejected.len(),
        "Fusion complete"
    );

    FusionOutcome { record, report }
}

/// Order observations by source priority, newest first within a source
fn order_inputs<'a>(
    observations: &'a [RawPropertyObservation],
    enrichment: Option<&'a RawPropertyObservation>,
    policy: &ConflictResolutionPolicy,
) -> Vec<&'a RawPropertyObservation> {
    let mut inputs: Vec<&RawPropertyObservation> = observations.iter().chain(enrichment).collect();
    inputs.sort_by(|a, b| {
        policy
            .source_rank(a.source)
            .cmp(&policy.source_rank(b.source))
            .then_with(|| b.captured_at.cmp(&a.captured_at))
            .then_with(|| a.address_text.cmp(&b.address_text))
            .then_with(|| a.source_url.cmp(&b.source_url))
    });
    inputs
}

fn compare_candidates(
    field: PropertyField,
    policy: &ConflictResolutionPolicy,
    a: &Candidate,
    b: &Candidate,
) -> Ordering {
    let by_rank = policy.rank(field, a.source).cmp(&policy.rank(field, b.source));
    if field == PropertyField::OwnerName {
        if let (Some(x), Some(y)) = (a.value.as_text(), b.value.as_text()) {
            return by_rank
                .then_with(|| owner_name::compare_owner_names(x, y))
                .then_with(|| b.captured_at.cmp(&a.captured_at));
        }
    }
    by_rank
        .then_with(|| b.captured_at.cmp(&a.captured_at))
        .then_with(|| a.value.to_string().cmp(&b.value.to_string()))
}

/// True when the held value must survive against `candidate`
///
/// At equal rank only a strictly newer capture replaces the held value, for
/// every field. Owner-name preference orders candidates within one fusion.
fn held_outranks(
    field: PropertyField,
    policy: &ConflictResolutionPolicy,
    held: Provenance,
    candidate: &Candidate,
) -> bool {
    let held_rank = policy.rank(field, held.source);
    let candidate_rank = policy.rank(field, candidate.source);
    match held_rank.cmp(&candidate_rank) {
        Ordering::Less => true,
        Ordering::Greater => false,
        Ordering::Equal => candidate.captured_at <= held.captured_at,
    }
}

/// Magnitude reference for `field`
///
/// The stored anchor when present, otherwise the held value. Year built is
/// covered by its hard bounds and has none.
fn magnitude_anchor(field: PropertyField, record: &CanonicalPropertyRecord) -> Option<f64> {
    if !field.is_numeric() || field == PropertyField::YearBuilt {
        return None;
    }
    record
        .magnitude_anchors
        .get(&field)
        .copied()
        .or_else(|| record.number(field))
}

fn resolve_field(
    field: PropertyField,
    inputs: &[&RawPropertyObservation],
    record: &mut CanonicalPropertyRecord,
    report: &mut ChangeReport,
    ctx: &FusionContext<'_>,
) {
    let mut candidates: Vec<Candidate> = inputs
        .iter()
        .filter_map(|obs| {
            obs.candidate(field).map(|value| Candidate {
                value,
                source: obs.source,
                captured_at: obs.captured_at,
            })
        })
        .collect();
    if candidates.is_empty() {
        return;
    }
    candidates.sort_by(|a, b| compare_candidates(field, ctx.policy, a, b));

    let held = match (record.fields.get(&field), record.provenance.get(&field)) {
        (Some(value), Some(provenance)) => Some((value.clone(), *provenance)),
        _ => None,
    };
    let anchor = magnitude_anchor(field, record);

    // Value and source that end up holding the field
    let mut decided: Option<(FieldValue, SourceKind)> = None;

    for candidate in candidates {
        if let Some((final_value, final_source)) = &decided {
            if candidate.value != *final_value {
                report.rejected.push(RejectedCandidate {
                    field,
                    candidate: candidate.value,
                    source: candidate.source,
                    captured_at: candidate.captured_at,
                    reason: RejectionReason::Outranked { by: *final_source },
                });
            }
            continue;
        }

        if field.is_numeric() {
            let verdict = match candidate.value.as_number() {
                Some(n) => plausibility::check_plausible(
                    field,
                    n,
                    anchor,
                    ctx.policy.max_magnitude_ratio(),
                    ctx.now,
                ),
                None => Err(format!("'{}' is not a number", candidate.value)),
            };
            if let Err(detail) = verdict {
                warn!(
                    identity_key = %record.identity_key,
                    field = %field,
                    source = %candidate.source,
                    "Implausible value rejected: {}",
                    detail
                );
                report.rejected.push(RejectedCandidate {
                    field,
                    candidate: candidate.value,
                    source: candidate.source,
                    captured_at: candidate.captured_at,
                    reason: RejectionReason::ImplausibleValue { detail },
                });
                continue;
            }
        }

        let held_wins = held
            .as_ref()
            .filter(|(_, provenance)| held_outranks(field, ctx.policy, *provenance, &candidate));
        if let Some((value, provenance)) = held_wins {
            if candidate.value != *value {
                report.rejected.push(RejectedCandidate {
                    field,
                    candidate: candidate.value,
                    source: candidate.source,
                    captured_at: candidate.captured_at,
                    reason: RejectionReason::Outranked {
                        by: provenance.source,
                    },
                });
            }
            decided = Some((value.clone(), provenance.source));
            continue;
        }

        let old_value = held.as_ref().map(|(value, _)| value.clone());
        if old_value.as_ref() != Some(&candidate.value) {
            report.changes.push(FieldChange {
                field,
                old_value,
                new_value: candidate.value.clone(),
                winning_source: candidate.source,
            });
        }
        record.fields.insert(field, candidate.value.clone());
        record.provenance.insert(
            field,
            Provenance {
                source: candidate.source,
                captured_at: candidate.captured_at,
            },
        );
        decided = Some((candidate.value, candidate.source));
    }

    // First positive value seen becomes the fixed reference
    if !record.magnitude_anchors.contains_key(&field) {
        let reference = anchor
            .filter(|n| *n > 0.0)
            .or_else(|| magnitude_anchor(field, record).filter(|n| *n > 0.0));
        if let Some(n) = reference {
            record.magnitude_anchors.insert(field, n);
        }
    }
}

/// Union trimmed, lower-cased signals into `held`; returns the newly added ones
fn merge_signals(held: &mut BTreeSet<String>, inputs: &[&RawPropertyObservation]) -> Vec<String> {
    let incoming: BTreeSet<String> = inputs
        .iter()
        .flat_map(|obs| obs.distress_signals.iter())
        .map(|s| s.trim().to_lowercase())
        .filter(|s| !s.is_empty())
        .collect();

    let mut added = Vec::new();
    for signal in incoming {
        if held.insert(signal.clone()) {
            added.push(signal);
        }
    }
    added
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::normalizer::normalize;
    use crate::types::ContactType;
    use crate::types::ObservedContact;
    use chrono::TimeZone;

    fn at(day: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, day, 9, 0, 0).unwrap()
    }

    fn identity() -> NormalizedAddress {
        normalize("12 Oak Ave, Springfield, IL 62701").unwrap()
    }

    fn obs(source: SourceKind, day: u32) -> RawPropertyObservation {
        RawPropertyObservation::new(source, "12 Oak Ave, Springfield, IL 62701", at(day))
    }

    fn with_number(mut o: RawPropertyObservation, field: PropertyField, n: f64) -> RawPropertyObservation {
        o.attributes = o.attributes.with(field, FieldValue::Number(n));
        o
    }

    fn run(
        existing: Option<&CanonicalPropertyRecord>,
        observations: &[RawPropertyObservation],
    ) -> FusionOutcome {
        let policy = ConflictResolutionPolicy::default();
        let ctx = FusionContext {
            policy: &policy,
            now: at(20),
        };
        fuse(existing, &identity(), observations, None, &ctx)
    }

    #[test]
    fn test_fresh_record_created() {
        let outcome = run(None, &[with_number(obs(SourceKind::ListingSite, 1), PropertyField::Bedrooms, 3.0)]);
        assert_eq!(outcome.record.observation_count, 1);
        assert_eq!(outcome.record.created_at, at(20));
        assert_eq!(outcome.record.number(PropertyField::Bedrooms), Some(3.0));
        assert_eq!(outcome.report.changes.len(), 1);
        assert_eq!(outcome.report.policy_version, policy::DEFAULT_POLICY_VERSION);
    }

    fn with_price(mut o: RawPropertyObservation, price: f64) -> RawPropertyObservation {
        o.price_hint = Some(price);
        o
    }

    fn with_owner(mut o: RawPropertyObservation, name: &str) -> RawPropertyObservation {
        o.owner_name = Some(name.to_string());
        o
    }

    #[test]
    fn test_equal_rank_newer_replaces() {
        let first = run(None, &[with_price(obs(SourceKind::ListingSite, 1), 250_000.0)]);
        assert_eq!(first.record.number(PropertyField::PriceHint), Some(250_000.0));

        let second = run(
            Some(&first.record),
            &[with_price(obs(SourceKind::ListingSite, 2), 240_000.0)],
        );
        assert_eq!(second.record.number(PropertyField::PriceHint), Some(240_000.0));

        // An older capture from the same source does not roll back
        let third = run(
            Some(&second.record),
            &[with_price(obs(SourceKind::ListingSite, 1), 250_000.0)],
        );
        assert_eq!(third.record.number(PropertyField::PriceHint), Some(240_000.0));
        assert_eq!(third.report.rejected.len(), 1);
    }

    #[test]
    fn test_equal_rank_newer_owner_name_replaces() {
        let first = run(None, &[with_owner(obs(SourceKind::RecordFeed, 1), "Jonathan Smith")]);
        let second = run(
            Some(&first.record),
            &[with_owner(obs(SourceKind::RecordFeed, 4), "Jane Doe")],
        );
        assert_eq!(second.record.text(PropertyField::OwnerName), Some("Jane Doe"));

        let stale = run(
            Some(&second.record),
            &[with_owner(obs(SourceKind::RecordFeed, 2), "Jonathan Smith")],
        );
        assert_eq!(stale.record.text(PropertyField::OwnerName), Some("Jane Doe"));
    }

    #[test]
    fn test_magnitude_anchor_is_fixed() {
        let seeded = run(None, &[with_number(obs(SourceKind::ListingSite, 1), PropertyField::SquareFeet, 1000.0)]);
        assert_eq!(seeded.record.magnitude_anchors.get(&PropertyField::SquareFeet), Some(&1000.0));

        let moved = run(
            Some(&seeded.record),
            &[with_number(obs(SourceKind::AuctionSite, 2), PropertyField::SquareFeet, 1100.0)],
        );
        assert_eq!(moved.record.number(PropertyField::SquareFeet), Some(1100.0));
        assert_eq!(moved.record.magnitude_anchors.get(&PropertyField::SquareFeet), Some(&1000.0));
        assert!(!moved.record.magnitude_anchors.contains_key(&PropertyField::YearBuilt));
    }

    #[test]
    fn test_implausible_falls_through_to_next_candidate() {
        let observations = vec![
            with_number(obs(SourceKind::RecordFeed, 1), PropertyField::YearBuilt, 1492.0),
            with_number(obs(SourceKind::ListingSite, 1), PropertyField::YearBuilt, 1978.0),
        ];
        let outcome = run(None, &observations);
        assert_eq!(outcome.record.number(PropertyField::YearBuilt), Some(1978.0));
        assert_eq!(outcome.report.implausible_count(), 1);
        assert_eq!(
            outcome.record.provenance[&PropertyField::YearBuilt].source,
            SourceKind::ListingSite
        );
    }

    #[test]
    fn test_owner_name_preference_within_rank() {
        let mut a = obs(SourceKind::RecordFeed, 3);
        a.owner_name = Some("SMITH, JOHN A.".to_string());
        let mut b = obs(SourceKind::RecordFeed, 1);
        b.owner_name = Some("John Smith".to_string());

        let outcome = run(None, &[a, b]);
        assert_eq!(outcome.record.text(PropertyField::OwnerName), Some("John Smith"));
    }

    #[test]
    fn test_signals_normalized_and_reported() {
        let mut a = obs(SourceKind::AuctionSite, 1);
        a.distress_signals.insert(" Foreclosure ".to_string());
        a.distress_signals.insert("".to_string());
        let outcome = run(None, &[a]);
        assert_eq!(outcome.report.signals_added, vec!["foreclosure".to_string()]);

        let again = run(Some(&outcome.record), &[obs(SourceKind::Manual, 2)]);
        assert!(again.record.distress_signals.contains("foreclosure"));
        assert!(again.report.signals_added.is_empty());
    }

    #[test]
    fn test_contacts_from_observations() {
        let mut a = obs(SourceKind::ListingSite, 1);
        a.contacts.push(ObservedContact {
            contact_type: ContactType::Email,
            value: "Agent@Example.com".to_string(),
            confidence: 0.6,
            source: None,
        });
        let mut b = obs(SourceKind::AuctionSite, 2);
        b.contacts.push(ObservedContact {
            contact_type: ContactType::Email,
            value: "agent@example.com".to_string(),
            confidence: 0.8,
            source: None,
        });

        let outcome = run(None, &[a, b]);
        assert_eq!(outcome.record.contacts.len(), 1);
        assert_eq!(outcome.record.contacts[0].source, SourceKind::AuctionSite);
        assert_eq!(outcome.report.contacts_added, vec!["agent@example.com".to_string()]);
    }

    #[test]
    fn test_extras_kept_for_review_only() {
        let mut a = obs(SourceKind::ListingSite, 1);
        a.attributes.extras.insert("hoa_fee".to_string(), "120".to_string());
        let outcome = run(None, &[a]);
        assert_eq!(outcome.record.extras_for_review.get("hoa_fee").map(String::as_str), Some("120"));
        assert!(outcome.report.changes.is_empty());
    }

    #[test]
    fn test_enrichment_not_counted() {
        let policy = ConflictResolutionPolicy::default();
        let ctx = FusionContext {
            policy: &policy,
            now: at(20),
        };
        let id = identity();
        let snapshot = EnrichmentSnapshot {
            identity_key: id.identity_key.clone(),
            attributes: Default::default(),
            owner_name: Some("Jane Roe".to_string()),
            price_hint: None,
            distress_signals: BTreeSet::new(),
            contacts: Vec::new(),
            retrieved_at: at(19),
        };
        let mut listing = obs(SourceKind::ListingSite, 2);
        listing.owner_name = Some("J. Roe".to_string());

        let outcome = fuse(None, &id, &[listing], Some(&snapshot), &ctx);
        assert_eq!(outcome.record.observation_count, 1);
        assert_eq!(outcome.record.text(PropertyField::OwnerName), Some("Jane Roe"));
        assert!(outcome.report.enrichment_used);
        assert_eq!(
            outcome.report.change_for(PropertyField::OwnerName).map(|c| c.winning_source),
            Some(SourceKind::EnrichmentProvider)
        );
    }
}
