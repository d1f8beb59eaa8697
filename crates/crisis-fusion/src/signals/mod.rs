//! Ingestion of raw provider payloads into canonical [`Signal`] records.
//!
//! Each source kind owns its parsing and severity mapping; everything after
//! parsing (ids, digests, dedup keys, prior trust) is shared.

mod config;
mod credibility;
mod dedup;
mod normalizer;
mod parser;
mod window;

pub use config::{CredibilityConfig, NormalizerConfig, PerSource};
pub use credibility::{CredibilityFilter, FilteredBatch};
pub use window::{SignalWindow, WindowConfig, WindowMerge};
pub(crate) use normalizer::digest_hex;

use crate::domain::{Signal, SignalId, SignalParts, SourceKind};
use parser::ParsedObservation;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::io::BufRead;
use tracing::warn;

const MAX_ERROR_SAMPLES: usize = 5;

/// A provider payload tagged with the family it came from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawPayload {
    pub source_kind: SourceKind,
    pub payload: serde_json::Value,
}

impl RawPayload {
    pub fn new(source_kind: SourceKind, payload: serde_json::Value) -> Self {
        Self {
            source_kind,
            payload,
        }
    }

    /// Reads one `{"source_kind": ..., "payload": {...}}` object per line; blank
    /// lines are skipped.
    pub fn read_json_lines<R: BufRead>(reader: R) -> Result<Vec<Self>, PayloadReadError> {
        let mut payloads = Vec::new();
        for (index, line) in reader.lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            let payload = serde_json::from_str(&line).map_err(|source| PayloadReadError::Line {
                line: index + 1,
                source,
            })?;
            payloads.push(payload);
        }
        Ok(payloads)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum PayloadReadError {
    #[error("failed to read payload stream: {0}")]
    Io(#[from] std::io::Error),
    #[error("line {line} is not a tagged payload: {source}")]
    Line {
        line: usize,
        source: serde_json::Error,
    },
}

/// Why a payload could not become a signal.
#[derive(Debug, Clone, PartialEq)]
pub enum MalformedReason {
    NotAnObject,
    Decode(String),
    MissingLocation,
    InvalidLocation { lat: f64, lon: f64 },
    MissingTimestamp,
    InvalidTimestamp(String),
    UnknownSeverity(String),
}

impl fmt::Display for MalformedReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MalformedReason::NotAnObject => write!(f, "payload is not a JSON object"),
            MalformedReason::Decode(detail) => write!(f, "undecodable fields ({detail})"),
            MalformedReason::MissingLocation => write!(f, "location is missing"),
            MalformedReason::InvalidLocation { lat, lon } => {
                write!(f, "location ({lat}, {lon}) is out of range")
            }
            MalformedReason::MissingTimestamp => write!(f, "timestamp is missing"),
            MalformedReason::InvalidTimestamp(raw) => write!(f, "timestamp '{raw}' is unparseable"),
            MalformedReason::UnknownSeverity(raw) => write!(f, "severity '{raw}' is not recognised"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum NormalizeError {
    #[error("malformed {} payload: {reason}", .kind.label())]
    MalformedPayload {
        kind: SourceKind,
        reason: MalformedReason,
    },
}

/// Aggregate outcome of normalizing a batch; per-payload failures never abort it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IngestReport {
    pub received: usize,
    pub accepted: usize,
    pub malformed: usize,
    pub duplicates: usize,
    pub error_samples: Vec<String>,
}

#[derive(Debug, Clone, Default)]
pub struct NormalizedBatch {
    pub signals: Vec<Signal>,
    pub duplicates: Vec<Signal>,
    pub report: IngestReport,
}

/// Converts provider payloads into canonical signals and suppresses near-duplicates.
pub struct SignalNormalizer {
    config: NormalizerConfig,
}

impl SignalNormalizer {
    pub fn new(config: NormalizerConfig) -> Self {
        Self { config }
    }

    pub fn normalize(&self, raw: &RawPayload) -> Result<Signal, NormalizeError> {
        let kind = raw.source_kind;
        let parsed = match kind {
            SourceKind::Weather => {
                parser::parse_weather(&raw.payload, self.config.default_weather_radius_km)
            }
            SourceKind::Social => parser::parse_social(&raw.payload),
            SourceKind::Seismic => parser::parse_seismic(&raw.payload),
        }
        .map_err(|reason| NormalizeError::MalformedPayload { kind, reason })?;

        Ok(self.finish(kind, &raw.payload, parsed))
    }

    pub fn normalize_batch(&self, payloads: &[RawPayload]) -> NormalizedBatch {
        let mut report = IngestReport {
            received: payloads.len(),
            ..IngestReport::default()
        };
        let mut signals = Vec::with_capacity(payloads.len());

        for raw in payloads {
            match self.normalize(raw) {
                Ok(signal) => signals.push(signal),
                Err(err) => {
                    warn!(error = %err, "skipping payload");
                    report.malformed += 1;
                    if report.error_samples.len() < MAX_ERROR_SAMPLES {
                        report.error_samples.push(err.to_string());
                    }
                }
            }
        }

        let (signals, duplicates) = dedup::deduplicate(signals);
        report.accepted = signals.len();
        report.duplicates = duplicates.len();

        NormalizedBatch {
            signals,
            duplicates,
            report,
        }
    }

    fn finish(
        &self,
        kind: SourceKind,
        body: &serde_json::Value,
        parsed: ParsedObservation,
    ) -> Signal {
        // serde_json maps are key-sorted, so the rendering is canonical.
        let digest = normalizer::digest_hex(body.to_string().as_bytes());
        let id = parsed
            .provider_id
            .map(|id| format!("{}:{}", kind.label(), id.trim()))
            .unwrap_or_else(|| format!("{}:{}", kind.label(), &digest[..16]));
        let dedup_key = normalizer::dedup_key(
            kind,
            &parsed.content,
            parsed.location,
            parsed.observed_at,
            self.config.location_cell_degrees,
            self.config.dedup_window_minutes,
        );
        let credibility = self.config.prior_trust.get(kind) * parsed.reporter_confidence;

        Signal::new(SignalParts {
            id: SignalId(id),
            source_kind: kind,
            reporter: parsed.reporter,
            observed_at: parsed.observed_at,
            location: parsed.location,
            footprint: parsed.footprint,
            raw_payload_digest: digest,
            dedup_key,
            credibility,
            severity: parsed.severity,
            headline: parsed.headline,
        })
    }
}
