use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

const EARTH_RADIUS_KM: f64 = 6371.0;

macro_rules! string_id {
    ($name:ident) => {
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_string())
            }
        }
    };
}

string_id!(SignalId);
string_id!(ZoneId);
string_id!(ResourceId);
string_id!(PlanId);
string_id!(CycleId);

/// Provider family a signal originated from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    Weather,
    Social,
    Seismic,
}

impl SourceKind {
    pub const fn ordered() -> [Self; 3] {
        [Self::Weather, Self::Social, Self::Seismic]
    }

    pub const fn label(self) -> &'static str {
        match self {
            Self::Weather => "weather",
            Self::Social => "social",
            Self::Seismic => "seismic",
        }
    }
}

/// WGS84 position in decimal degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub lat: f64,
    pub lon: f64,
}

impl GeoPoint {
    pub const fn new(lat: f64, lon: f64) -> Self {
        Self { lat, lon }
    }

    /// Great-circle distance in kilometres.
    pub fn distance_km(&self, other: &GeoPoint) -> f64 {
        let (lat1, lat2) = (self.lat.to_radians(), other.lat.to_radians());
        let d_lat = lat2 - lat1;
        let d_lon = (other.lon - self.lon).to_radians();
        let a = (d_lat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (d_lon / 2.0).sin().powi(2);
        2.0 * EARTH_RADIUS_KM * a.sqrt().min(1.0).asin()
    }

    pub fn is_valid(&self) -> bool {
        self.lat.is_finite()
            && self.lon.is_finite()
            && (-90.0..=90.0).contains(&self.lat)
            && (-180.0..=180.0).contains(&self.lon)
    }
}

/// Spatial extent a signal speaks for.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "shape", rename_all = "snake_case")]
pub enum Footprint {
    Point,
    Circle { radius_km: f64 },
}

/// Canonical, source-independent observation.
///
/// Fields are private so a signal cannot drift after normalization; the only
/// sanctioned change is a credibility revision, which yields a new value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Signal {
    id: SignalId,
    source_kind: SourceKind,
    reporter: String,
    observed_at: DateTime<Utc>,
    location: GeoPoint,
    footprint: Footprint,
    raw_payload_digest: String,
    dedup_key: String,
    credibility: f64,
    severity: f64,
    headline: String,
}

/// Builder input for [`Signal::new`].
#[derive(Debug, Clone)]
pub struct SignalParts {
    pub id: SignalId,
    pub source_kind: SourceKind,
    pub reporter: String,
    pub observed_at: DateTime<Utc>,
    pub location: GeoPoint,
    pub footprint: Footprint,
    pub raw_payload_digest: String,
    pub dedup_key: String,
    pub credibility: f64,
    pub severity: f64,
    pub headline: String,
}

impl Signal {
    pub fn new(parts: SignalParts) -> Self {
        Self {
            id: parts.id,
            source_kind: parts.source_kind,
            reporter: parts.reporter,
            observed_at: parts.observed_at,
            location: parts.location,
            footprint: parts.footprint,
            raw_payload_digest: parts.raw_payload_digest,
            dedup_key: parts.dedup_key,
            credibility: clamp_unit(parts.credibility),
            severity: clamp_unit(parts.severity),
            headline: parts.headline,
        }
    }

    pub fn id(&self) -> &SignalId {
        &self.id
    }

    pub fn source_kind(&self) -> SourceKind {
        self.source_kind
    }

    pub fn reporter(&self) -> &str {
        &self.reporter
    }

    pub fn observed_at(&self) -> DateTime<Utc> {
        self.observed_at
    }

    pub fn location(&self) -> GeoPoint {
        self.location
    }

    pub fn footprint(&self) -> Footprint {
        self.footprint
    }

    pub fn raw_payload_digest(&self) -> &str {
        &self.raw_payload_digest
    }

    pub fn dedup_key(&self) -> &str {
        &self.dedup_key
    }

    pub fn credibility(&self) -> f64 {
        self.credibility
    }

    pub fn severity(&self) -> f64 {
        self.severity
    }

    pub fn headline(&self) -> &str {
        &self.headline
    }

    /// Identity used for duplicate suppression.
    pub fn identity(&self) -> (SourceKind, &str) {
        (self.source_kind, &self.dedup_key)
    }

    pub fn with_credibility(mut self, credibility: f64) -> Self {
        self.credibility = clamp_unit(credibility);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    Personnel,
    Vehicle,
    Shelter,
    Medical,
}

impl ResourceKind {
    pub const fn ordered() -> [Self; 4] {
        [Self::Personnel, Self::Vehicle, Self::Shelter, Self::Medical]
    }

    pub const fn label(self) -> &'static str {
        match self {
            Self::Personnel => "personnel",
            Self::Vehicle => "vehicle",
            Self::Shelter => "shelter",
            Self::Medical => "medical",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "personnel" | "crew" | "team" => Some(Self::Personnel),
            "vehicle" | "transport" => Some(Self::Vehicle),
            "shelter" => Some(Self::Shelter),
            "medical" | "ambulance" => Some(Self::Medical),
            _ => None,
        }
    }
}

/// A dispatchable unit and the window during which it can be used.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resource {
    pub id: ResourceId,
    pub kind: ResourceKind,
    pub location: GeoPoint,
    pub capacity: u32,
    pub available_from: DateTime<Utc>,
    pub available_until: DateTime<Utc>,
}

pub(crate) fn clamp_unit(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn parts(credibility: f64, severity: f64) -> SignalParts {
        SignalParts {
            id: SignalId::from("sig-1"),
            source_kind: SourceKind::Weather,
            reporter: "station-a".to_string(),
            observed_at: Utc
                .with_ymd_and_hms(2025, 3, 1, 12, 0, 0)
                .single()
                .expect("valid timestamp"),
            location: GeoPoint::new(40.0, -74.0),
            footprint: Footprint::Point,
            raw_payload_digest: "digest".to_string(),
            dedup_key: "key".to_string(),
            credibility,
            severity,
            headline: "flood warning".to_string(),
        }
    }

    #[test]
    fn signal_clamps_credibility_and_severity() {
        let signal = Signal::new(parts(1.7, -0.2));
        assert_eq!(signal.credibility(), 1.0);
        assert_eq!(signal.severity(), 0.0);

        let revised = signal.with_credibility(f64::NAN);
        assert_eq!(revised.credibility(), 0.0);
    }

    #[test]
    fn distance_between_known_points() {
        let nyc = GeoPoint::new(40.7128, -74.0060);
        let newark = GeoPoint::new(40.7357, -74.1724);
        let km = nyc.distance_km(&newark);
        assert!((km - 14.2).abs() < 0.5, "unexpected distance {km}");
        assert_eq!(nyc.distance_km(&nyc), 0.0);
    }

    #[test]
    fn resource_kind_parses_aliases() {
        assert_eq!(ResourceKind::parse(" Ambulance "), Some(ResourceKind::Medical));
        assert_eq!(ResourceKind::parse("vehicle"), Some(ResourceKind::Vehicle));
        assert_eq!(ResourceKind::parse("boat"), None);
    }
}
