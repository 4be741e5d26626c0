//! Address normalization and identity key derivation
//!
//! `normalize` is total and deterministic: the same text always yields the same
//! key, with no clock, randomness or mutable shared state involved.
//!
//! Order of operations:
//! 1. trim, case-fold, drop periods, collapse whitespace
//! 2. split a trailing `City, ST ZIP` segment (ZIP optional)
//! 3. move unit/apartment designators into `unit`
//! 4. strip punctuation and rewrite street-type/directional tokens
//!
//! Without a state/ZIP segment the whole text becomes the street line and the
//! key is derived from that alone (weaker identity, still usable).

pub mod tables;

use crate::error::{IngestError, IngestResult};
use crate::types::{IdentityKey, NormalizedAddress, StructuredAddress};
use once_cell::sync::Lazy;
use regex::Regex;
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashMap};

static WHITESPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").expect("valid regex"));

/// `street, city, ST [zip]`; the city may omit its trailing comma
static LOCALITY_WITH_CITY: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"^(?P<street>.+?),\s*(?P<city>[^,]+?),?\s+(?P<state>[a-z]{2})(?:\s+(?P<zip>\d{5})(?:-?\d{4})?)?$",
    )
    .expect("valid regex")
});

/// `street[,] ST zip` with no separable city
static LOCALITY_STATE_ZIP: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(?P<street>.+?),?\s+(?P<state>[a-z]{2})\s+(?P<zip>\d{5})(?:-?\d{4})?$")
        .expect("valid regex")
});

/// Trailing unit designator: `apt 4b`, `suite 200`, `#12`
static TRAILING_UNIT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"^(?P<street>.*?)[\s,]+(?:(?P<des>apartment|apt|unit|suite|ste|floor|fl|building|bldg|room|rm)\s*#?\s*|#\s*)(?P<id>[a-z]?\d[a-z0-9-]*|[a-z])$",
    )
    .expect("valid regex")
});

static DEFAULT_NORMALIZER: Lazy<AddressNormalizer> = Lazy::new(AddressNormalizer::default);

/// Normalize with the built-in tables
pub fn normalize(address_text: &str) -> IngestResult<NormalizedAddress> {
    DEFAULT_NORMALIZER.normalize(address_text)
}

/// Hash of `street|city|state|zip`, hex-encoded SHA-256
pub fn identity_key_for(address: &StructuredAddress) -> IdentityKey {
    let material = format!(
        "{}|{}|{}|{}",
        address.street_line, address.city, address.state, address.postal_code
    );
    let digest = Sha256::digest(material.as_bytes());
    IdentityKey::from_hex(format!("{:x}", digest))
}

/// Address normalizer with a configurable street-type table
#[derive(Debug, Clone)]
pub struct AddressNormalizer {
    street_tokens: HashMap<String, String>,
}

impl Default for AddressNormalizer {
    fn default() -> Self {
        Self::with_additions(&BTreeMap::new())
    }
}

impl AddressNormalizer {
    /// Built-in tables plus configured street-type spellings
    ///
    /// Additions override built-in entries with the same spelling.
    pub fn with_additions(street_suffixes: &BTreeMap<String, String>) -> Self {
        let mut street_tokens: HashMap<String, String> = tables::STREET_SUFFIXES
            .iter()
            .chain(tables::DIRECTIONALS.iter())
            .map(|(spelling, canonical)| (spelling.to_string(), canonical.to_string()))
            .collect();

        for (spelling, canonical) in street_suffixes {
            let spelling = spelling.trim().to_lowercase();
            let canonical = canonical.trim().to_lowercase();
            if !spelling.is_empty() && !canonical.is_empty() {
                street_tokens.insert(spelling, canonical);
            }
        }

        Self { street_tokens }
    }

    pub fn normalize(&self, address_text: &str) -> IngestResult<NormalizedAddress> {
        let folded = fold_text(address_text);
        let locality = split_locality(&folded);
        let (street_part, unit) = extract_unit(&locality.street);

        let (street_part, city) = if locality.city.is_empty() && !locality.state.is_empty() {
            self.split_city_without_comma(&street_part)
        } else {
            (street_part, locality.city)
        };

        let street_line = self.canonical_street(&street_part);
        if street_line.is_empty() {
            return Err(IngestError::MalformedAddress(address_text.to_string()));
        }

        let address = StructuredAddress {
            street_line,
            unit,
            city: strip_punctuation(&city),
            state: locality.state,
            postal_code: locality.zip,
        };
        let identity_key = identity_key_for(&address);

        Ok(NormalizedAddress {
            address,
            identity_key,
        })
    }

    /// Punctuation-strip and rewrite tokens through the lookup table
    fn canonical_street(&self, street: &str) -> String {
        strip_punctuation(street)
            .split(' ')
            .filter(|t| !t.is_empty())
            .map(|token| {
                self.street_tokens
                    .get(token)
                    .map(String::as_str)
                    .unwrap_or(token)
            })
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// `123 main st anytown` → (`123 main st`, `anytown`)
    ///
    /// Only applies when a street-type token sits strictly inside the text and
    /// what follows it does not look like a unit. Otherwise everything stays in
    /// the street line.
    fn split_city_without_comma(&self, street_part: &str) -> (String, String) {
        let cleaned = strip_punctuation(street_part);
        let tokens: Vec<&str> = cleaned.split(' ').filter(|t| !t.is_empty()).collect();

        let suffix_at = tokens.iter().enumerate().rev().find_map(|(i, token)| {
            let is_suffix = tables::STREET_SUFFIXES.iter().any(|(s, _)| s == token)
                || self
                    .street_tokens
                    .get(*token)
                    .is_some_and(|c| tables::STREET_SUFFIXES.iter().any(|(_, s)| *s == c.as_str()));
            (is_suffix && i > 0 && i + 1 < tokens.len()).then_some(i)
        });

        match suffix_at {
            Some(i) if tables::unit_designator(tokens[i + 1]).is_none() => {
                let after = &tokens[i + 1..];
                // A directional right after the suffix belongs to the street
                if tables::DIRECTIONALS
                    .iter()
                    .any(|(s, c)| *s == after[0] || *c == after[0])
                {
                    return (street_part.to_string(), String::new());
                }
                (tokens[..=i].join(" "), after.join(" "))
            }
            _ => (street_part.to_string(), String::new()),
        }
    }
}

struct Locality {
    street: String,
    city: String,
    state: String,
    zip: String,
}

/// Lower-case, drop periods, collapse whitespace, remove a trailing country
fn fold_text(text: &str) -> String {
    let lowered = text.trim().to_lowercase().replace('.', "");
    let collapsed = WHITESPACE.replace_all(&lowered, " ").replace(" ,", ",");
    let mut folded = collapsed.trim().trim_end_matches(',').trim().to_string();

    for country in [", usa", ", us", ", united states", " usa"] {
        if let Some(stripped) = folded.strip_suffix(country) {
            folded = stripped.trim_end_matches(',').trim().to_string();
            break;
        }
    }
    folded
}

/// Split the trailing `City, ST ZIP` segment
///
/// Falls back to treating the whole text as the street when no valid state
/// code is found.
fn split_locality(folded: &str) -> Locality {
    for pattern in [&*LOCALITY_WITH_CITY, &*LOCALITY_STATE_ZIP] {
        if let Some(caps) = pattern.captures(folded) {
            let state = caps.name("state").map(|m| m.as_str()).unwrap_or_default();
            if !tables::is_state_code(state) {
                continue;
            }
            return Locality {
                street: caps["street"].trim().to_string(),
                city: caps
                    .name("city")
                    .map(|m| m.as_str().trim().to_string())
                    .unwrap_or_default(),
                state: state.to_string(),
                zip: caps
                    .name("zip")
                    .map(|m| m.as_str().to_string())
                    .unwrap_or_default(),
            };
        }
    }

    Locality {
        street: folded.to_string(),
        city: String::new(),
        state: String::new(),
        zip: String::new(),
    }
}

/// Peel trailing unit designators off the street part
///
/// `123 main st, apt 4` → (`123 main st`, `Some("apt 4")`). Repeated designators
/// (`bldg 2 apt 4`) are kept in their original order.
fn extract_unit(street: &str) -> (String, Option<String>) {
    let mut remaining = street.trim().to_string();
    let mut units: Vec<String> = Vec::new();

    for _ in 0..3 {
        let Some(caps) = TRAILING_UNIT.captures(&remaining) else {
            break;
        };
        let id = caps["id"].to_string();
        let unit = match caps.name("des") {
            Some(des) => format!(
                "{} {}",
                tables::unit_designator(des.as_str()).unwrap_or(des.as_str()),
                id
            ),
            None => format!("#{}", id),
        };
        units.push(unit);
        remaining = caps["street"].trim().trim_end_matches(',').trim().to_string();
    }

    units.reverse();
    let unit = (!units.is_empty()).then(|| units.join(" "));
    (remaining, unit)
}

/// Replace anything but alphanumerics with spaces and collapse runs
fn strip_punctuation(text: &str) -> String {
    let replaced: String = text
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { ' ' })
        .collect();
    WHITESPACE.replace_all(replaced.trim(), " ").into_owned()
}
