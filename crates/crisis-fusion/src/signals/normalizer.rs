use crate::domain::{GeoPoint, SourceKind};
use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};

pub(crate) fn normalize_text(value: &str) -> String {
    let cleaned = value.replace(['\u{feff}', '\u{200b}'], "");
    let collapsed = cleaned.split_whitespace().collect::<Vec<_>>().join(" ");
    collapsed.to_ascii_lowercase()
}

pub(crate) fn weather_severity(label: &str) -> Option<f64> {
    let score = match normalize_text(label).as_str() {
        "minor" => 0.25,
        "moderate" => 0.5,
        "severe" => 0.75,
        "extreme" => 1.0,
        "low" => 0.3,
        "medium" => 0.6,
        "high" => 0.85,
        other => return other.parse::<f64>().ok().map(scale_ten),
    };
    Some(score)
}

pub(crate) fn social_urgency(label: &str) -> Option<f64> {
    let score = match normalize_text(label).as_str() {
        "low" => 0.2,
        "medium" => 0.45,
        "high" => 0.7,
        "critical" | "urgent" => 0.9,
        other => return other.parse::<f64>().ok().map(scale_ten),
    };
    Some(score)
}

/// Magnitudes at or below 2.5 are rarely felt; 8.0 saturates.
pub(crate) fn seismic_severity(magnitude: f64) -> f64 {
    ((magnitude - 2.5) / 5.5).clamp(0.0, 1.0)
}

pub(crate) fn seismic_radius_km(magnitude: f64) -> f64 {
    if magnitude >= 6.0 {
        20.0
    } else if magnitude >= 4.0 {
        10.0
    } else {
        5.0
    }
}

/// Maps a 0-10 provider scale onto [0, 1].
pub(crate) fn scale_ten(value: f64) -> f64 {
    if value.is_finite() {
        (value / 10.0).clamp(0.0, 1.0)
    } else {
        0.0
    }
}

pub(crate) fn wrap_longitude(lon: f64) -> f64 {
    if lon > 180.0 && lon <= 360.0 {
        lon - 360.0
    } else {
        lon
    }
}

pub(crate) fn digest_hex(bytes: &[u8]) -> String {
    let hash = Sha256::digest(bytes);
    format!("{:x}", hash)
}

pub(crate) fn dedup_key(
    kind: SourceKind,
    content: &str,
    location: GeoPoint,
    observed_at: DateTime<Utc>,
    cell_degrees: f64,
    window_minutes: i64,
) -> String {
    let cell = if cell_degrees > 0.0 { cell_degrees } else { 0.01 };
    let lat_cell = (location.lat / cell).floor() as i64;
    let lon_cell = (location.lon / cell).floor() as i64;
    let window_secs = window_minutes.max(1) * 60;
    let bucket = observed_at.timestamp().div_euclid(window_secs);
    let material = format!(
        "{}|{}|{}:{}|{}",
        kind.label(),
        normalize_text(content),
        lat_cell,
        lon_cell,
        bucket
    );
    digest_hex(material.as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn severity_tables_cover_categorical_and_numeric_inputs() {
        assert_eq!(weather_severity("Extreme"), Some(1.0));
        assert_eq!(weather_severity("  high "), Some(0.85));
        assert_eq!(weather_severity("7"), Some(0.7));
        assert_eq!(weather_severity("sunny"), None);
        assert_eq!(social_urgency("CRITICAL"), Some(0.9));
        assert_eq!(social_urgency("12"), Some(1.0));
    }

    #[test]
    fn seismic_mapping_saturates() {
        assert_eq!(seismic_severity(2.0), 0.0);
        assert!((seismic_severity(5.25) - 0.5).abs() < 1e-9);
        assert_eq!(seismic_severity(9.1), 1.0);
        assert_eq!(seismic_radius_km(6.4), 20.0);
        assert_eq!(seismic_radius_km(4.0), 10.0);
        assert_eq!(seismic_radius_km(3.1), 5.0);
    }

    #[test]
    fn dedup_key_ignores_whitespace_and_case_within_bucket() {
        let at = Utc
            .with_ymd_and_hms(2025, 3, 1, 12, 5, 0)
            .single()
            .expect("valid timestamp");
        let later = at + chrono::Duration::minutes(10);
        let location = GeoPoint::new(40.71234, -74.00321);
        let a = dedup_key(SourceKind::Social, "Water  rising", location, at, 0.01, 30);
        let b = dedup_key(SourceKind::Social, "water rising", location, later, 0.01, 30);
        assert_eq!(a, b);

        let next_bucket = at + chrono::Duration::minutes(40);
        let c = dedup_key(SourceKind::Social, "water rising", location, next_bucket, 0.01, 30);
        assert_ne!(a, c);
    }

    #[test]
    fn longitudes_past_antimeridian_wrap() {
        assert_eq!(wrap_longitude(190.0), -170.0);
        assert_eq!(wrap_longitude(-74.0), -74.0);
    }
}
