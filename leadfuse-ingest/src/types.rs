//! Shared types for identity resolution and fusion
//!
//! These are the data contracts between the normalizer, the fuser, the store
//! and the batch orchestrator. Raw observations are immutable inputs; the
//! canonical record is only ever produced by fusion.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

/// Unrecognized attribute keys kept per observation for manual review
pub const MAX_EXTRAS_PER_OBSERVATION: usize = 32;

// ============================================================================
// Sources
// ============================================================================

/// Origin of an observation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SourceKind {
    ListingSite,
    AuctionSite,
    RecordFeed,
    EnrichmentProvider,
    Manual,
}

impl SourceKind {
    pub const ALL: [SourceKind; 5] = [
        SourceKind::EnrichmentProvider,
        SourceKind::RecordFeed,
        SourceKind::AuctionSite,
        SourceKind::ListingSite,
        SourceKind::Manual,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::ListingSite => "listing-site",
            Self::AuctionSite => "auction-site",
            Self::RecordFeed => "record-feed",
            Self::EnrichmentProvider => "enrichment-provider",
            Self::Manual => "manual",
        }
    }
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SourceKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase().replace('_', "-");
        SourceKind::ALL
            .into_iter()
            .find(|k| k.as_str() == wanted)
            .ok_or_else(|| format!("unknown source '{}'", s))
    }
}

// ============================================================================
// Fields and values
// ============================================================================

/// Semantic fields that take part in fusion
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PropertyField {
    Bedrooms,
    Bathrooms,
    SquareFeet,
    LotSize,
    YearBuilt,
    PropertyType,
    OwnerName,
    PriceHint,
}

impl PropertyField {
    pub const ALL: [PropertyField; 8] = [
        PropertyField::Bedrooms,
        PropertyField::Bathrooms,
        PropertyField::SquareFeet,
        PropertyField::LotSize,
        PropertyField::YearBuilt,
        PropertyField::PropertyType,
        PropertyField::OwnerName,
        PropertyField::PriceHint,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Bedrooms => "bedrooms",
            Self::Bathrooms => "bathrooms",
            Self::SquareFeet => "square_feet",
            Self::LotSize => "lot_size",
            Self::YearBuilt => "year_built",
            Self::PropertyType => "property_type",
            Self::OwnerName => "owner_name",
            Self::PriceHint => "price_hint",
        }
    }

    /// Numeric fields go through the plausibility filter
    pub fn is_numeric(self) -> bool {
        !matches!(self, Self::PropertyType | Self::OwnerName)
    }

    /// Map a scraper attribute key onto a known field
    ///
    /// Case, separators and common aliases are tolerated. Owner name and price
    /// travel as dedicated observation fields, so they are not accepted here.
    pub fn from_attribute_key(key: &str) -> Option<Self> {
        let folded: String = key
            .trim()
            .to_ascii_lowercase()
            .chars()
            .filter(|c| c.is_ascii_alphanumeric())
            .collect();

        match folded.as_str() {
            "bedrooms" | "beds" | "bed" | "br" | "bedroomcount" => Some(Self::Bedrooms),
            "bathrooms" | "baths" | "bath" | "ba" | "bathroomcount" => Some(Self::Bathrooms),
            "squarefeet" | "squarefootage" | "sqft" | "sqfeet" | "livingarea" | "buildingsize" => {
                Some(Self::SquareFeet)
            }
            "lotsize" | "lotsqft" | "lotarea" | "lot" => Some(Self::LotSize),
            "yearbuilt" | "built" | "yrbuilt" | "constructionyear" => Some(Self::YearBuilt),
            "propertytype" | "type" | "hometype" | "proptype" => Some(Self::PropertyType),
            _ => None,
        }
    }
}

impl fmt::Display for PropertyField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Value held by a fused field
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Number(f64),
    Text(String),
}

impl FieldValue {
    /// Empty text and non-finite numbers never win a field
    pub fn is_empty(&self) -> bool {
        match self {
            Self::Number(n) => !n.is_finite(),
            Self::Text(s) => s.trim().is_empty(),
        }
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            Self::Number(n) => Some(*n),
            Self::Text(_) => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s.as_str()),
            Self::Number(_) => None,
        }
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Number(n) => write!(f, "{}", n),
            Self::Text(s) => f.write_str(s),
        }
    }
}

/// Parse a numeric attribute tolerating thousands separators and stray whitespace
fn parse_number(raw: &str) -> Option<f64> {
    let cleaned: String = raw.chars().filter(|c| *c != ',' && !c.is_whitespace()).collect();
    cleaned.parse::<f64>().ok().filter(|n| n.is_finite())
}

// ============================================================================
// Observation attributes
// ============================================================================

/// Attribute bag of one observation
///
/// Known keys are mapped onto [`PropertyField`]s. Everything else lands in
/// `extras` (bounded) and is never fused automatically.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(
    from = "BTreeMap<String, serde_json::Value>",
    into = "BTreeMap<String, serde_json::Value>"
)]
pub struct ObservedAttributes {
    pub known: BTreeMap<PropertyField, FieldValue>,
    pub extras: BTreeMap<String, String>,
}

impl ObservedAttributes {
    pub fn get(&self, field: PropertyField) -> Option<&FieldValue> {
        self.known.get(&field)
    }

    /// Builder-style setter, used by importers and tests
    ///
    /// Owner name and price set here are offered as candidates only when the
    /// observation's dedicated field is empty.
    pub fn with(mut self, field: PropertyField, value: FieldValue) -> Self {
        self.known.insert(field, value);
        self
    }

    fn push_extra(&mut self, key: &str, value: String) {
        if self.extras.len() < MAX_EXTRAS_PER_OBSERVATION || self.extras.contains_key(key) {
            self.extras.insert(key.to_string(), value);
        }
    }
}

fn json_to_text(value: &serde_json::Value) -> Option<String> {
    match value {
        serde_json::Value::Null => None,
        serde_json::Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

impl From<BTreeMap<String, serde_json::Value>> for ObservedAttributes {
    fn from(raw: BTreeMap<String, serde_json::Value>) -> Self {
        let mut attrs = ObservedAttributes::default();

        for (key, value) in raw {
            let Some(text) = json_to_text(&value) else {
                continue;
            };

            let known = PropertyField::from_attribute_key(&key).and_then(|field| {
                if field.is_numeric() {
                    let number = match &value {
                        serde_json::Value::Number(n) => n.as_f64(),
                        _ => parse_number(&text),
                    };
                    number.map(|n| (field, FieldValue::Number(n)))
                } else {
                    Some((field, FieldValue::Text(text.trim().to_string())))
                }
            });

            match known {
                // First spelling wins when two aliases hit the same field
                Some((field, value)) => {
                    attrs.known.entry(field).or_insert(value);
                }
                None => attrs.push_extra(&key, text),
            }
        }

        attrs
    }
}

impl From<ObservedAttributes> for BTreeMap<String, serde_json::Value> {
    fn from(attrs: ObservedAttributes) -> Self {
        let mut out = BTreeMap::new();
        for (key, value) in attrs.extras {
            out.insert(key, serde_json::Value::String(value));
        }
        for (field, value) in attrs.known {
            let json = match value {
                FieldValue::Number(n) => serde_json::Number::from_f64(n)
                    .map(serde_json::Value::Number)
                    .unwrap_or(serde_json::Value::Null),
                FieldValue::Text(s) => serde_json::Value::String(s),
            };
            out.insert(field.as_str().to_string(), json);
        }
        out
    }
}

// ============================================================================
// Contacts
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContactType {
    Phone,
    Email,
}

/// Contact as captured by one source
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObservedContact {
    #[serde(rename = "type")]
    pub contact_type: ContactType,
    pub value: String,
    /// 0.0 (guess) to 1.0 (verified)
    pub confidence: f64,
    /// Defaults to the observation's source when absent
    #[serde(default)]
    pub source: Option<SourceKind>,
}

/// Contact held on a canonical record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalContact {
    #[serde(rename = "type")]
    pub contact_type: ContactType,
    /// Display value as first captured for the winning entry
    pub value: String,
    /// Dedup key: digits-only phone or lower-cased email
    pub normalized: String,
    pub confidence: f64,
    pub source: SourceKind,
    pub captured_at: DateTime<Utc>,
}

// ============================================================================
// Raw observations
// ============================================================================

/// One source's view of a property at capture time
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawPropertyObservation {
    pub source: SourceKind,
    pub address_text: String,
    #[serde(default)]
    pub attributes: ObservedAttributes,
    #[serde(default)]
    pub owner_name: Option<String>,
    /// Listing price, starting bid or assessed value depending on the source
    #[serde(default)]
    pub price_hint: Option<f64>,
    #[serde(default)]
    pub distress_signals: BTreeSet<String>,
    #[serde(default)]
    pub contacts: Vec<ObservedContact>,
    #[serde(default)]
    pub source_url: Option<String>,
    pub captured_at: DateTime<Utc>,
}

impl RawPropertyObservation {
    pub fn new(
        source: SourceKind,
        address_text: impl Into<String>,
        captured_at: DateTime<Utc>,
    ) -> Self {
        Self {
            source,
            address_text: address_text.into(),
            attributes: ObservedAttributes::default(),
            owner_name: None,
            price_hint: None,
            distress_signals: BTreeSet::new(),
            contacts: Vec::new(),
            source_url: None,
            captured_at,
        }
    }

    /// Candidate value this observation offers for `field`, if non-empty
    pub fn candidate(&self, field: PropertyField) -> Option<FieldValue> {
        let value = match field {
            PropertyField::OwnerName => self
                .owner_name
                .as_ref()
                .map(|s| FieldValue::Text(s.trim().to_string()))
                .or_else(|| self.attributes.get(field).cloned()),
            PropertyField::PriceHint => self
                .price_hint
                .map(FieldValue::Number)
                .or_else(|| self.attributes.get(field).cloned()),
            other => self.attributes.get(other).cloned(),
        };
        value.filter(|v| !v.is_empty())
    }
}

// ============================================================================
// Enrichment
// ============================================================================

/// Third-party property bundle keyed by identity hash
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnrichmentSnapshot {
    pub identity_key: IdentityKey,
    #[serde(default)]
    pub attributes: ObservedAttributes,
    #[serde(default)]
    pub owner_name: Option<String>,
    #[serde(default)]
    pub price_hint: Option<f64>,
    #[serde(default)]
    pub distress_signals: BTreeSet<String>,
    #[serde(default)]
    pub contacts: Vec<ObservedContact>,
    pub retrieved_at: DateTime<Utc>,
}

impl EnrichmentSnapshot {
    /// View the snapshot as one more observation from the enrichment provider
    pub fn to_observation(&self, address: &StructuredAddress) -> RawPropertyObservation {
        RawPropertyObservation {
            source: SourceKind::EnrichmentProvider,
            address_text: address.display_line(),
            attributes: self.attributes.clone(),
            owner_name: self.owner_name.clone(),
            price_hint: self.price_hint,
            distress_signals: self.distress_signals.clone(),
            contacts: self.contacts.clone(),
            source_url: None,
            captured_at: self.retrieved_at,
        }
    }
}

// ============================================================================
// Identity
// ============================================================================

/// Stable hash grouping observations of the same physical property
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IdentityKey(String);

impl IdentityKey {
    pub fn from_hex(hex: impl Into<String>) -> Self {
        Self(hex.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for IdentityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Normalized address components; empty strings mean "not isolated"
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StructuredAddress {
    pub street_line: String,
    #[serde(default)]
    pub unit: Option<String>,
    pub city: String,
    pub state: String,
    pub postal_code: String,
}

impl StructuredAddress {
    /// True when city/state/zip were all recovered
    pub fn is_complete(&self) -> bool {
        !self.city.is_empty() && !self.state.is_empty() && !self.postal_code.is_empty()
    }

    pub fn display_line(&self) -> String {
        let mut line = self.street_line.clone();
        if let Some(unit) = &self.unit {
            line.push(' ');
            line.push_str(unit);
        }
        let locality: Vec<&str> = [self.city.as_str(), self.state.as_str()]
            .into_iter()
            .filter(|s| !s.is_empty())
            .collect();
        if !locality.is_empty() {
            line.push_str(", ");
            line.push_str(&locality.join(", "));
        }
        if !self.postal_code.is_empty() {
            line.push(' ');
            line.push_str(&self.postal_code);
        }
        line
    }
}

/// Normalizer output: structured components plus the derived key
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NormalizedAddress {
    pub address: StructuredAddress,
    pub identity_key: IdentityKey,
}

// ============================================================================
// Canonical record
// ============================================================================

/// Which observation last won a field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Provenance {
    pub source: SourceKind,
    pub captured_at: DateTime<Utc>,
}

/// Fused, authoritative view of one property
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalPropertyRecord {
    pub identity_key: IdentityKey,
    pub address: StructuredAddress,
    pub fields: BTreeMap<PropertyField, FieldValue>,
    pub provenance: BTreeMap<PropertyField, Provenance>,
    /// Grows monotonically
    pub distress_signals: BTreeSet<String>,
    pub contacts: Vec<CanonicalContact>,
    /// Unrecognized attributes, surfaced for manual review only
    #[serde(default)]
    pub extras_for_review: BTreeMap<String, String>,
    /// Reference value per numeric field for the order-of-magnitude check.
    /// Set once from the first positive value held and never moved.
    #[serde(default)]
    pub magnitude_anchors: BTreeMap<PropertyField, f64>,
    pub created_at: DateTime<Utc>,
    pub last_fused_at: Option<DateTime<Utc>>,
    pub observation_count: u64,
}

impl CanonicalPropertyRecord {
    /// Fresh record with no fused data and `observation_count = 0`
    pub fn new_empty(
        identity_key: IdentityKey,
        address: StructuredAddress,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            identity_key,
            address,
            fields: BTreeMap::new(),
            provenance: BTreeMap::new(),
            distress_signals: BTreeSet::new(),
            contacts: Vec::new(),
            extras_for_review: BTreeMap::new(),
            magnitude_anchors: BTreeMap::new(),
            created_at: now,
            last_fused_at: None,
            observation_count: 0,
        }
    }

    pub fn field(&self, field: PropertyField) -> Option<&FieldValue> {
        self.fields.get(&field)
    }

    pub fn number(&self, field: PropertyField) -> Option<f64> {
        self.fields.get(&field).and_then(FieldValue::as_number)
    }

    pub fn text(&self, field: PropertyField) -> Option<&str> {
        self.fields.get(&field).and_then(FieldValue::as_text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_source_kind_wire_names() {
        assert_eq!(
            serde_json::to_string(&SourceKind::RecordFeed).unwrap(),
            "\"record-feed\""
        );
        assert_eq!("Listing_Site".parse::<SourceKind>(), Ok(SourceKind::ListingSite));
        assert!("county".parse::<SourceKind>().is_err());
    }

    #[test]
    fn test_attribute_aliases_and_extras() {
        let raw: BTreeMap<String, serde_json::Value> = serde_json::from_value(json!({
            "SqFt": "1,750",
            "Beds": 3,
            "Year Built": "1984",
            "Property-Type": " Single Family ",
            "hoa_fee": 120,
            "garage": null
        }))
        .unwrap();

        let attrs = ObservedAttributes::from(raw);

        assert_eq!(attrs.get(PropertyField::SquareFeet), Some(&FieldValue::Number(1750.0)));
        assert_eq!(attrs.get(PropertyField::Bedrooms), Some(&FieldValue::Number(3.0)));
        assert_eq!(attrs.get(PropertyField::YearBuilt), Some(&FieldValue::Number(1984.0)));
        assert_eq!(
            attrs.get(PropertyField::PropertyType),
            Some(&FieldValue::Text("Single Family".to_string()))
        );
        assert_eq!(attrs.extras.get("hoa_fee").map(String::as_str), Some("120"));
        assert!(!attrs.extras.contains_key("garage"));
    }

    #[test]
    fn test_unparseable_numeric_goes_to_extras() {
        let raw: BTreeMap<String, serde_json::Value> =
            serde_json::from_value(json!({ "sqft": "about two thousand" })).unwrap();
        let attrs = ObservedAttributes::from(raw);
        assert!(attrs.get(PropertyField::SquareFeet).is_none());
        assert_eq!(attrs.extras.len(), 1);
    }

    #[test]
    fn test_extras_are_bounded() {
        let mut raw = BTreeMap::new();
        for i in 0..(MAX_EXTRAS_PER_OBSERVATION + 10) {
            raw.insert(format!("custom_{:03}", i), json!("x"));
        }
        let attrs = ObservedAttributes::from(raw);
        assert_eq!(attrs.extras.len(), MAX_EXTRAS_PER_OBSERVATION);
    }

    #[test]
    fn test_observation_deserializes_from_scraper_json() {
        let obs: RawPropertyObservation = serde_json::from_value(json!({
            "source": "auction-site",
            "address_text": "9 Elm Ave, Springfield, IL 62701",
            "attributes": { "beds": 2 },
            "price_hint": 85000.0,
            "distress_signals": ["auction-scheduled"],
            "contacts": [{ "type": "phone", "value": "(217) 555-0100", "confidence": 0.6 }],
            "captured_at": "2024-03-01T12:00:00Z"
        }))
        .unwrap();

        assert_eq!(obs.source, SourceKind::AuctionSite);
        assert_eq!(obs.candidate(PropertyField::Bedrooms), Some(FieldValue::Number(2.0)));
        assert_eq!(obs.candidate(PropertyField::PriceHint), Some(FieldValue::Number(85000.0)));
        assert_eq!(obs.contacts[0].contact_type, ContactType::Phone);
        assert!(obs.contacts[0].source.is_none());
    }

    #[test]
    fn test_blank_owner_is_not_a_candidate() {
        let mut obs = RawPropertyObservation::new(SourceKind::Manual, "1 A St", Utc::now());
        obs.owner_name = Some("   ".to_string());
        assert!(obs.candidate(PropertyField::OwnerName).is_none());
    }

    #[test]
    fn test_price_and_owner_from_attributes_are_candidates() {
        let mut obs = RawPropertyObservation::new(SourceKind::ListingSite, "1 A St", Utc::now());
        obs.attributes = obs
            .attributes
            .with(PropertyField::PriceHint, FieldValue::Number(199_000.0))
            .with(PropertyField::OwnerName, FieldValue::Text("Ada Park".to_string()));
        assert_eq!(obs.candidate(PropertyField::PriceHint), Some(FieldValue::Number(199_000.0)));
        assert_eq!(
            obs.candidate(PropertyField::OwnerName),
            Some(FieldValue::Text("Ada Park".to_string()))
        );

        // The dedicated field wins when both are present
        obs.price_hint = Some(205_000.0);
        assert_eq!(obs.candidate(PropertyField::PriceHint), Some(FieldValue::Number(205_000.0)));
    }

    #[test]
    fn test_display_line() {
        let address = StructuredAddress {
            street_line: "123 main st".to_string(),
            unit: Some("apt 4".to_string()),
            city: "anytown".to_string(),
            state: "ca".to_string(),
            postal_code: "90210".to_string(),
        };
        assert_eq!(address.display_line(), "123 main st apt 4, anytown, ca 90210");
        assert!(address.is_complete());
    }
}
