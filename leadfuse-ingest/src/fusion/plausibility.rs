//! Plausibility filter for numeric fields
//!
//! A candidate is rejected when it falls outside a hard sanity bound or differs
//! from the field's magnitude reference by the policy's ratio or more. The
//! reference is the record's fixed anchor for the field, so re-fusing the same
//! observations reaches the same verdicts. Rejection never changes the record;
//! the fuser logs it and records it in the change report.

use crate::types::PropertyField;
use chrono::{DateTime, Utc};

/// Inclusive hard bounds for a numeric field at time `now`
pub fn hard_bounds(field: PropertyField, now: DateTime<Utc>) -> Option<(f64, f64)> {
    match field {
        PropertyField::YearBuilt => {
            let latest = leadfuse_common::time::year_of(now) + 1;
            Some((1600.0, latest as f64))
        }
        PropertyField::SquareFeet => Some((100.0, 200_000.0)),
        PropertyField::LotSize => Some((f64::MIN_POSITIVE, 1.0e9)),
        PropertyField::Bedrooms => Some((0.0, 100.0)),
        PropertyField::Bathrooms => Some((0.0, 100.0)),
        PropertyField::PriceHint => Some((0.0, 1.0e10)),
        PropertyField::PropertyType | PropertyField::OwnerName => None,
    }
}

/// Check `candidate` against bounds and the magnitude reference `current`
///
/// Returns a human-readable reason on rejection. A jump of `max_magnitude_ratio`
/// or more is rejected; the magnitude check only runs when both values are positive.
pub fn check_plausible(
    field: PropertyField,
    candidate: f64,
    current: Option<f64>,
    max_magnitude_ratio: f64,
    now: DateTime<Utc>,
) -> Result<(), String> {
    if !candidate.is_finite() {
        return Err(format!("{} is not a finite number", candidate));
    }

    if let Some((low, high)) = hard_bounds(field, now) {
        if candidate < low || candidate > high {
            return Err(format!(
                "{} outside sanity bound [{}, {}]",
                candidate, low, high
            ));
        }
    }

    if let Some(current) = current {
        if current > 0.0 && candidate > 0.0 {
            let ratio = if candidate > current {
                candidate / current
            } else {
                current / candidate
            };
            if ratio >= max_magnitude_ratio {
                return Err(format!(
                    "{} differs from held value {} by factor {:.1} (limit {})",
                    candidate, current, ratio, max_magnitude_ratio
                ));
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap()
    }

    #[test]
    fn test_year_built_bounds() {
        let f = PropertyField::YearBuilt;
        assert!(check_plausible(f, 1599.0, None, 10.0, now()).is_err());
        assert!(check_plausible(f, 1600.0, None, 10.0, now()).is_ok());
        assert!(check_plausible(f, 2025.0, None, 10.0, now()).is_ok());
        assert!(check_plausible(f, 2026.0, None, 10.0, now()).is_err());
    }

    #[test]
    fn test_order_of_magnitude_jump_rejected() {
        let f = PropertyField::SquareFeet;
        assert!(check_plausible(f, 18_000.0, Some(1_800.0), 10.0, now()).is_err());
        assert!(check_plausible(f, 170.0, Some(1_800.0), 10.0, now()).is_err());
        assert!(check_plausible(f, 17_000.0, Some(1_800.0), 10.0, now()).is_ok());
        assert!(check_plausible(f, 1_950.0, Some(1_800.0), 10.0, now()).is_ok());
    }

    #[test]
    fn test_zero_held_value_skips_ratio() {
        assert!(check_plausible(PropertyField::Bedrooms, 3.0, Some(0.0), 10.0, now()).is_ok());
    }

    #[test]
    fn test_nan_rejected() {
        assert!(check_plausible(PropertyField::PriceHint, f64::NAN, None, 10.0, now()).is_err());
    }

    #[test]
    fn test_lot_size_must_be_positive() {
        assert!(check_plausible(PropertyField::LotSize, 0.0, None, 10.0, now()).is_err());
        assert!(check_plausible(PropertyField::LotSize, 0.25, None, 10.0, now()).is_ok());
    }
}
