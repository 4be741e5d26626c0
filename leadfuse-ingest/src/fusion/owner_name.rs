// Owner Name Preference
//
// Sources disagree on owner formatting ("SMITH, JOHN A." from record feeds,
// "John Smith" from listings). When equally ranked sources compete, the form
// with fewer commas/periods wins, then the longer one. Names are never rewritten.

use std::cmp::Ordering;

/// Commas and periods in a name; fewer means less abbreviated
fn punctuation_count(name: &str) -> usize {
    name.chars().filter(|c| *c == ',' || *c == '.').count()
}

/// Ordering where `Less` means `a` is the preferred form
///
/// Total and deterministic: falls back to a case-insensitive then exact
/// lexical comparison so repeated fusion never flips between two names.
pub fn compare_owner_names(a: &str, b: &str) -> Ordering {
    let a = a.trim();
    let b = b.trim();
    punctuation_count(a)
        .cmp(&punctuation_count(b))
        .then_with(|| b.chars().count().cmp(&a.chars().count()))
        .then_with(|| a.to_lowercase().cmp(&b.to_lowercase()))
        .then_with(|| a.cmp(b))
}

/// Pick the preferred of two owner names
pub fn prefer_owner_name<'a>(a: &'a str, b: &'a str) -> &'a str {
    match compare_owner_names(a, b) {
        Ordering::Greater => b,
        _ => a,
    }
}
