//! Nearest-identity decision procedure.

use crate::store::IdentityStore;
use crate::types::{FeatureVector, MatchResult};

/// Find the enrolled identity nearest to `query`.
///
/// Scans every record in lexicographic name order, taking the minimum
/// distance across each record's vectors. Strict `<` keeps the first name
/// seen on a tie, so identical store contents always produce identical
/// results. `accepted` is true only when the best distance is strictly
/// below `threshold`, expressed in the strategy's distance units.
///
/// An empty store, or a query whose strategy does not match the store's,
/// yields the no-match result without comparing anything.
pub fn find_best(store: &IdentityStore, query: &FeatureVector, threshold: f32) -> MatchResult {
    if store.is_empty() {
        return MatchResult::no_match();
    }
    if query.strategy() != store.strategy() {
        tracing::error!(
            query = %query.strategy(),
            store = %store.strategy(),
            "query strategy does not match store, refusing to compare"
        );
        return MatchResult::no_match();
    }

    let mut best_name: Option<&str> = None;
    let mut best_distance = f32::INFINITY;

    for (name, record) in store.iter() {
        for vector in &record.vectors {
            let distance = query.distance(vector);
            tracing::trace!(identity = %name, distance, "candidate distance");
            if distance < best_distance {
                best_distance = distance;
                best_name = Some(name);
            }
        }
    }

    match best_name {
        Some(name) if best_distance < threshold => {
            tracing::debug!(
                identity = name,
                distance = best_distance,
                threshold,
                "query accepted"
            );
            MatchResult {
                identity: Some(name.to_owned()),
                distance: best_distance,
                accepted: true,
            }
        }
        Some(name) => {
            tracing::debug!(
                nearest = name,
                distance = best_distance,
                threshold,
                "query rejected, nearest candidate at or over threshold"
            );
            MatchResult { identity: None, distance: best_distance, accepted: false }
        }
        // Reachable only when every candidate distance was non-finite.
        None => MatchResult::no_match(),
    }
}
