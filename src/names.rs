//! Person-name canonicalization shared by ingestion and queries.
//!
//! Stored names are family-first ("Ivanov Ivan Ivanovich"). Both the sync
//! path and the query path go through [`canonical_name`] and [`fold`] so the
//! stored key and the search pattern always agree.

use unicode_normalization::UnicodeNormalization;

use crate::types::NameOrder;

/// NFC-normalize, trim and collapse runs of whitespace to one space.
pub fn clean(raw: &str) -> String {
    raw.nfc()
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Canonical family-first form of a full name as written by a source.
///
/// For `GivenFamily` sources the last token is taken as the family name and
/// moved to the front: "Ivan Ivanovich Ivanov" → "Ivanov Ivan Ivanovich".
pub fn canonical_name(raw: &str, order: NameOrder) -> String {
    let cleaned = clean(raw);
    match order {
        NameOrder::FamilyGiven => cleaned,
        NameOrder::GivenFamily => match cleaned.rsplit_once(' ') {
            Some((given, family)) => format!("{} {}", family, given),
            None => cleaned,
        },
    }
}

/// Canonical name built from separate parts.
pub fn from_parts(family: &str, given: &str) -> String {
    clean(&format!("{} {}", family, given))
}

/// Case-folded search key. Used both for the stored `name_key` column and
/// for query patterns.
pub fn fold(name: &str) -> String {
    clean(name).to_lowercase()
}
