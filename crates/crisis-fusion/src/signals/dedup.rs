use crate::domain::{Signal, SourceKind};
use std::cmp::Ordering;
use std::collections::BTreeMap;

const CREDIBILITY_EPSILON: f64 = 1e-9;

/// Collapses signals sharing `(source_kind, dedup_key)`.
///
/// Returns `(kept, dropped)`, both ordered by signal id.
pub(crate) fn deduplicate(signals: Vec<Signal>) -> (Vec<Signal>, Vec<Signal>) {
    let mut winners: BTreeMap<(SourceKind, String), Signal> = BTreeMap::new();
    let mut dropped = Vec::new();

    for signal in signals {
        let key = (signal.source_kind(), signal.dedup_key().to_string());
        match winners.remove(&key) {
            None => {
                winners.insert(key, signal);
            }
            Some(current) => {
                let (winner, loser) = if prefer(&signal, &current) == Ordering::Less {
                    (signal, current)
                } else {
                    (current, signal)
                };
                dropped.push(loser);
                winners.insert(key, winner);
            }
        }
    }

    let mut kept: Vec<Signal> = winners.into_values().collect();
    kept.sort_by(|a, b| a.id().cmp(b.id()));
    dropped.sort_by(|a, b| a.id().cmp(b.id()));
    (kept, dropped)
}

/// `Less` means `a` should be kept over `b`.
pub(super) fn prefer(a: &Signal, b: &Signal) -> Ordering {
    let credibility_gap = a.credibility() - b.credibility();
    if credibility_gap.abs() > CREDIBILITY_EPSILON {
        return if credibility_gap > 0.0 {
            Ordering::Less
        } else {
            Ordering::Greater
        };
    }

    a.observed_at()
        .cmp(&b.observed_at())
        .then_with(|| a.id().cmp(b.id()))
}
