//! Accepted signals carried from one cycle to the next.

use super::config::PerSource;
use super::dedup::prefer;
use crate::domain::{Signal, SourceKind};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeMap;

/// How long each provider family's signals stay eligible for scoring.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WindowConfig {
    pub retention_hours: PerSource<f64>,
}

impl Default for WindowConfig {
    fn default() -> Self {
        // Four credibility half-lives; by then a signal carries ~6% of its weight.
        Self {
            retention_hours: PerSource {
                weather: 96.0,
                social: 8.0,
                seismic: 48.0,
            },
        }
    }
}

/// Signals keyed by `(source_kind, dedup_key)`, one winner per key.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SignalWindow {
    signals: BTreeMap<(SourceKind, String), Signal>,
}

/// Result of folding a batch into a window at some `as_of`.
#[derive(Debug, Clone, Default)]
pub struct WindowMerge {
    /// The window to keep if the cycle commits.
    pub window: SignalWindow,
    /// Signals eligible at `as_of`, ordered by id.
    pub current: Vec<Signal>,
    /// Losers of cross-batch duplicate resolution, ordered by id.
    pub superseded: Vec<Signal>,
    /// Eligible signals that arrived in an earlier batch.
    pub carried_over: usize,
    pub expired: usize,
}

impl SignalWindow {
    pub fn len(&self) -> usize {
        self.signals.len()
    }

    pub fn is_empty(&self) -> bool {
        self.signals.is_empty()
    }

    pub fn signals(&self) -> impl Iterator<Item = &Signal> {
        self.signals.values()
    }

    /// Folds `batch` (already deduplicated within itself) into a copy of the
    /// window and drops signals older than their retention at `as_of`.
    ///
    /// A repeat of a stored signal (same id and payload digest) is absorbed. A
    /// revision of a stored signal (same id, new digest) replaces it. Any other
    /// key collision keeps the preferred signal and reports the other as
    /// superseded. Signals observed after `as_of` stay in the window but are
    /// not eligible yet.
    pub fn merged(
        &self,
        batch: Vec<Signal>,
        as_of: DateTime<Utc>,
        config: &WindowConfig,
    ) -> WindowMerge {
        let mut signals = self.signals.clone();
        let mut superseded = Vec::new();
        let mut fresh: Vec<(SourceKind, String)> = Vec::new();

        for signal in batch {
            let key = (signal.source_kind(), signal.dedup_key().to_string());
            // A revision may move a signal to a new key.
            signals.retain(|stored_key, stored| stored_key == &key || stored.id() != signal.id());

            match signals.remove(&key) {
                None => {
                    fresh.push(key.clone());
                    signals.insert(key, signal);
                }
                Some(stored) if stored.id() == signal.id() => {
                    if stored.raw_payload_digest() == signal.raw_payload_digest() {
                        signals.insert(key, stored);
                    } else {
                        fresh.push(key.clone());
                        signals.insert(key, signal);
                    }
                }
                Some(stored) => {
                    if prefer(&signal, &stored) == Ordering::Less {
                        superseded.push(stored);
                        fresh.push(key.clone());
                        signals.insert(key, signal);
                    } else {
                        superseded.push(signal);
                        signals.insert(key, stored);
                    }
                }
            }
        }

        let before = signals.len();
        signals.retain(|(kind, _), signal| {
            let retention_secs = config.retention_hours.get(*kind).max(0.0) * 3600.0;
            ((as_of - signal.observed_at()).num_seconds() as f64) <= retention_secs
        });
        let expired = before - signals.len();

        let mut current: Vec<Signal> = signals
            .values()
            .filter(|signal| signal.observed_at() <= as_of)
            .cloned()
            .collect();
        current.sort_by(|a, b| a.id().cmp(b.id()));
        let carried_over = signals
            .iter()
            .filter(|(key, signal)| signal.observed_at() <= as_of && !fresh.contains(*key))
            .count();
        superseded.sort_by(|a, b| a.id().cmp(b.id()));

        WindowMerge {
            window: SignalWindow { signals },
            current,
            superseded,
            carried_over,
            expired,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Footprint, GeoPoint, SignalId, SignalParts};
    use chrono::{Duration, TimeZone};

    fn as_of() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0)
            .single()
            .expect("valid timestamp")
    }

    fn signal(id: &str, kind: SourceKind, key: &str, credibility: f64, hours_ago: i64) -> Signal {
        Signal::new(SignalParts {
            id: SignalId::from(id),
            source_kind: kind,
            reporter: format!("reporter-{id}"),
            observed_at: as_of() - Duration::hours(hours_ago),
            location: GeoPoint::new(40.70, -74.00),
            footprint: Footprint::Point,
            raw_payload_digest: format!("digest-{id}"),
            dedup_key: key.to_string(),
            credibility,
            severity: 0.6,
            headline: String::new(),
        })
    }

    fn ids(signals: &[Signal]) -> Vec<&str> {
        signals.iter().map(|s| s.id().as_str()).collect()
    }

    #[test]
    fn earlier_batches_stay_eligible() {
        let config = WindowConfig::default();
        let first = SignalWindow::default().merged(
            vec![signal("w1", SourceKind::Weather, "k1", 0.9, 1)],
            as_of(),
            &config,
        );
        let quiet = first.window.merged(Vec::new(), as_of() + Duration::minutes(5), &config);

        assert_eq!(ids(&quiet.current), vec!["w1"]);
        assert_eq!(quiet.carried_over, 1);
        assert_eq!(first.carried_over, 0);
    }

    #[test]
    fn retention_differs_by_source() {
        let window = SignalWindow::default()
            .merged(
                vec![
                    signal("s1", SourceKind::Social, "k1", 0.4, 0),
                    signal("w1", SourceKind::Weather, "k2", 0.9, 0),
                ],
                as_of(),
                &WindowConfig::default(),
            )
            .window;

        let later = window.merged(Vec::new(), as_of() + Duration::hours(9), &WindowConfig::default());
        assert_eq!(ids(&later.current), vec!["w1"]);
        assert_eq!(later.expired, 1);
    }

    #[test]
    fn cross_batch_duplicates_keep_the_preferred_signal() {
        let config = WindowConfig::default();
        let window = SignalWindow::default()
            .merged(vec![signal("a", SourceKind::Social, "k", 0.3, 1)], as_of(), &config)
            .window;

        let merge = window.merged(vec![signal("b", SourceKind::Social, "k", 0.6, 0)], as_of(), &config);
        assert_eq!(ids(&merge.current), vec!["b"]);
        assert_eq!(ids(&merge.superseded), vec!["a"]);

        let weaker = merge
            .window
            .merged(vec![signal("c", SourceKind::Social, "k", 0.1, 0)], as_of(), &config);
        assert_eq!(ids(&weaker.current), vec!["b"]);
        assert_eq!(ids(&weaker.superseded), vec!["c"]);
    }

    #[test]
    fn repeats_are_absorbed_and_revisions_replace() {
        let config = WindowConfig::default();
        let original = signal("a", SourceKind::Weather, "k", 0.9, 1);
        let window = SignalWindow::default()
            .merged(vec![original.clone()], as_of(), &config)
            .window;

        let repeat = window.merged(vec![original], as_of(), &config);
        assert_eq!(repeat.window, window);
        assert!(repeat.superseded.is_empty());

        let revision = Signal::new(SignalParts {
            raw_payload_digest: "digest-a-revised".to_string(),
            severity: 0.9,
            ..parts_of(&signal("a", SourceKind::Weather, "k", 0.9, 0))
        });
        let revised = window.merged(vec![revision], as_of(), &config);
        assert_eq!(revised.window.len(), 1);
        assert_eq!(revised.current[0].raw_payload_digest(), "digest-a-revised");
        assert!(revised.superseded.is_empty());

        let moved = window.merged(
            vec![signal("a", SourceKind::Weather, "k-moved", 0.9, 0)],
            as_of(),
            &config,
        );
        assert_eq!(moved.window.len(), 1);
        assert_eq!(moved.current[0].dedup_key(), "k-moved");
    }

    #[test]
    fn future_signals_wait_for_their_time() {
        let window = SignalWindow::default()
            .merged(
                vec![signal("late", SourceKind::Weather, "k", 0.9, -2)],
                as_of(),
                &WindowConfig::default(),
            )
            .window;
        let early = window.merged(Vec::new(), as_of(), &WindowConfig::default());
        assert!(early.current.is_empty());
        assert_eq!(early.window.len(), 1);

        let due = window.merged(Vec::new(), as_of() + Duration::hours(3), &WindowConfig::default());
        assert_eq!(ids(&due.current), vec!["late"]);
    }

    fn parts_of(signal: &Signal) -> SignalParts {
        SignalParts {
            id: signal.id().clone(),
            source_kind: signal.source_kind(),
            reporter: signal.reporter().to_string(),
            observed_at: signal.observed_at(),
            location: signal.location(),
            footprint: signal.footprint(),
            raw_payload_digest: signal.raw_payload_digest().to_string(),
            dedup_key: signal.dedup_key().to_string(),
            credibility: signal.credibility(),
            severity: signal.severity(),
            headline: signal.headline().to_string(),
        }
    }
}
