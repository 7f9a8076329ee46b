//! Person name → passed / not-passed subject lists.

use std::collections::{HashMap, HashSet};

use crate::db::{DbOutcome, NameFilter};
use crate::error::QueryError;
use crate::names;
use crate::store::OutcomeStore;
use crate::types::SubjectOutcomes;

/// Resolve the subjects recorded for a person.
///
/// Matches every stored name containing "family given" (case-insensitive).
/// When that finds nothing, "given family" is tried once. No match yields
/// empty lists, not an error.
pub async fn resolve(
    store: &dyn OutcomeStore,
    given: &str,
    family: &str,
) -> Result<SubjectOutcomes, QueryError> {
    let given = names::clean(given);
    let family = names::clean(family);
    if given.is_empty() {
        return Err(QueryError::InvalidArgument("firstName is required".to_string()));
    }
    if family.is_empty() {
        return Err(QueryError::InvalidArgument("lastName is required".to_string()));
    }

    let pattern = names::fold(&names::from_parts(&family, &given));
    let mut matched = store.search(NameFilter::containing(pattern)).await?;

    if matched.is_empty() {
        let swapped = names::fold(&names::from_parts(&given, &family));
        log::debug!("Subject query: no match for family-first order, trying {:?}", swapped);
        matched = store.search(NameFilter::containing(swapped)).await?;
    }

    Ok(summarize(matched))
}

fn summarize(mut matched: Vec<DbOutcome>) -> SubjectOutcomes {
    if matched.is_empty() {
        return SubjectOutcomes::default();
    }

    matched.sort_by(|a, b| a.position.cmp(&b.position).then_with(|| a.subject.cmp(&b.subject)));

    let mut out = SubjectOutcomes::default();
    let mut seen_passed = HashSet::new();
    let mut seen_not_passed = HashSet::new();
    let mut group_counts: HashMap<&str, usize> = HashMap::new();

    for outcome in &matched {
        *group_counts.entry(outcome.group.as_str()).or_default() += 1;
        let (list, seen) = if outcome.status {
            (&mut out.passed, &mut seen_passed)
        } else {
            (&mut out.not_passed, &mut seen_not_passed)
        };
        if seen.insert(outcome.subject.as_str()) {
            list.push(outcome.subject.clone());
        }
    }

    // Most frequent group; ties go to the smallest label.
    out.group = group_counts
        .into_iter()
        .max_by(|(ga, ca), (gb, cb)| ca.cmp(cb).then_with(|| gb.cmp(ga)))
        .map(|(group, _)| group.to_string());
    out.last_synced_at = matched.iter().map(|o| o.updated_at).max();
    out
}
