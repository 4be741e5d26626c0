//! Built-in lookup tables for address normalization
//!
//! Spellings map to one canonical token. The street-type table can be extended
//! from configuration (`[normalizer.street_suffixes]`).

/// Street-type spellings → canonical token
pub const STREET_SUFFIXES: &[(&str, &str)] = &[
    ("alley", "aly"),
    ("aly", "aly"),
    ("avenue", "ave"),
    ("avenu", "ave"),
    ("aven", "ave"),
    ("avn", "ave"),
    ("av", "ave"),
    ("ave", "ave"),
    ("boulevard", "blvd"),
    ("boul", "blvd"),
    ("blvd", "blvd"),
    ("circle", "cir"),
    ("circ", "cir"),
    ("cir", "cir"),
    ("court", "ct"),
    ("ct", "ct"),
    ("crossing", "xing"),
    ("xing", "xing"),
    ("drive", "dr"),
    ("drv", "dr"),
    ("dr", "dr"),
    ("expressway", "expy"),
    ("expy", "expy"),
    ("freeway", "fwy"),
    ("fwy", "fwy"),
    ("heights", "hts"),
    ("hts", "hts"),
    ("highway", "hwy"),
    ("hwy", "hwy"),
    ("lane", "ln"),
    ("ln", "ln"),
    ("parkway", "pkwy"),
    ("pkwy", "pkwy"),
    ("pky", "pkwy"),
    ("place", "pl"),
    ("pl", "pl"),
    ("plaza", "plz"),
    ("plz", "plz"),
    ("ridge", "rdg"),
    ("rdg", "rdg"),
    ("road", "rd"),
    ("rd", "rd"),
    ("square", "sq"),
    ("sq", "sq"),
    ("street", "st"),
    ("str", "st"),
    ("st", "st"),
    ("terrace", "ter"),
    ("terr", "ter"),
    ("ter", "ter"),
    ("trail", "trl"),
    ("trl", "trl"),
    ("way", "way"),
    ("wy", "way"),
];

/// Directional spellings → canonical token
pub const DIRECTIONALS: &[(&str, &str)] = &[
    ("north", "n"),
    ("south", "s"),
    ("east", "e"),
    ("west", "w"),
    ("northeast", "ne"),
    ("northwest", "nw"),
    ("southeast", "se"),
    ("southwest", "sw"),
];

/// Unit designators → canonical prefix stored in the `unit` field
pub const UNIT_DESIGNATORS: &[(&str, &str)] = &[
    ("apartment", "apt"),
    ("apt", "apt"),
    ("unit", "unit"),
    ("suite", "ste"),
    ("ste", "ste"),
    ("floor", "fl"),
    ("fl", "fl"),
    ("building", "bldg"),
    ("bldg", "bldg"),
    ("room", "rm"),
    ("rm", "rm"),
];

/// Two-letter postal codes accepted as a state segment
pub const STATE_CODES: &[&str] = &[
    "al", "ak", "az", "ar", "ca", "co", "ct", "de", "fl", "ga", "hi", "id", "il", "in", "ia",
    "ks", "ky", "la", "me", "md", "ma", "mi", "mn", "ms", "mo", "mt", "ne", "nv", "nh", "nj",
    "nm", "ny", "nc", "nd", "oh", "ok", "or", "pa", "ri", "sc", "sd", "tn", "tx", "ut", "vt",
    "va", "wa", "wv", "wi", "wy", "dc", "pr", "gu", "vi", "as", "mp",
];

pub fn is_state_code(candidate: &str) -> bool {
    STATE_CODES.contains(&candidate)
}

pub fn unit_designator(token: &str) -> Option<&'static str> {
    UNIT_DESIGNATORS
        .iter()
        .find(|(spelling, _)| *spelling == token)
        .map(|(_, canonical)| *canonical)
}
