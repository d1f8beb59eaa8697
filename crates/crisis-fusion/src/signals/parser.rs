use super::normalizer::{
    scale_ten, seismic_radius_km, seismic_severity, social_urgency, weather_severity,
    wrap_longitude,
};
use super::MalformedReason;
use crate::domain::{Footprint, GeoPoint};
use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use serde::Deserialize;

/// Provider-independent view of a payload before ids, digests and trust are attached.
#[derive(Debug)]
pub(crate) struct ParsedObservation {
    pub(crate) provider_id: Option<String>,
    pub(crate) reporter: String,
    pub(crate) observed_at: DateTime<Utc>,
    pub(crate) location: GeoPoint,
    pub(crate) footprint: Footprint,
    pub(crate) severity: f64,
    pub(crate) reporter_confidence: f64,
    pub(crate) content: String,
    pub(crate) headline: String,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Scalar {
    Number(f64),
    Text(String),
}

#[derive(Debug, Deserialize)]
struct WeatherAlert {
    #[serde(default, alias = "alert_id")]
    id: Option<String>,
    #[serde(default, alias = "sender_name", alias = "station_id", alias = "sender")]
    station: Option<String>,
    #[serde(default)]
    event: Option<String>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    severity: Option<Scalar>,
    #[serde(default)]
    radius_km: Option<f64>,
    #[serde(default, alias = "latitude")]
    lat: Option<f64>,
    #[serde(default, alias = "longitude", alias = "lng")]
    lon: Option<f64>,
    #[serde(default)]
    coordinates: Option<Vec<f64>>,
    #[serde(default, alias = "issued_at", alias = "start", alias = "time")]
    observed_at: Option<Scalar>,
}

#[derive(Debug, Deserialize)]
struct SocialReport {
    #[serde(default)]
    id: Option<String>,
    #[serde(default, alias = "user", alias = "account")]
    author: Option<String>,
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    urgency_level: Option<Scalar>,
    #[serde(default)]
    severity: Option<f64>,
    #[serde(default)]
    credibility_score: Option<f64>,
    #[serde(default, alias = "latitude")]
    lat: Option<f64>,
    #[serde(default, alias = "longitude", alias = "lng")]
    lon: Option<f64>,
    #[serde(default)]
    coordinates: Option<Vec<f64>>,
    #[serde(default, alias = "timestamp", alias = "posted_at")]
    created_at: Option<Scalar>,
}

#[derive(Debug, Deserialize)]
struct SeismicEvent {
    #[serde(default)]
    id: Option<String>,
    #[serde(default, alias = "net")]
    network: Option<String>,
    #[serde(default, alias = "mag")]
    magnitude: Option<f64>,
    #[serde(default, alias = "place")]
    location: Option<String>,
    #[serde(default, alias = "lat")]
    latitude: Option<f64>,
    #[serde(default, alias = "lon", alias = "lng")]
    longitude: Option<f64>,
    #[serde(default)]
    coordinates: Option<Vec<f64>>,
    #[serde(default)]
    time: Option<Scalar>,
}

pub(crate) fn parse_weather(
    body: &serde_json::Value,
    default_radius_km: f64,
) -> Result<ParsedObservation, MalformedReason> {
    let alert: WeatherAlert = decode(body)?;
    let location = resolve_location(alert.lat, alert.lon, alert.coordinates.as_deref())?;
    let observed_at = resolve_timestamp(alert.observed_at.as_ref())?;
    let severity = match alert.severity {
        Some(Scalar::Number(value)) => scale_ten(value),
        Some(Scalar::Text(label)) => {
            weather_severity(&label).ok_or(MalformedReason::UnknownSeverity(label))?
        }
        None => 0.5,
    };
    let radius_km = alert
        .radius_km
        .filter(|radius| radius.is_finite() && *radius > 0.0)
        .unwrap_or(default_radius_km);
    let event = alert.event.unwrap_or_else(|| "weather alert".to_string());
    let content = match &alert.description {
        Some(description) => format!("{event} {description}"),
        None => event.clone(),
    };

    Ok(ParsedObservation {
        provider_id: alert.id,
        reporter: alert.station.unwrap_or_else(|| "unknown-station".to_string()),
        observed_at,
        location,
        footprint: Footprint::Circle { radius_km },
        severity,
        reporter_confidence: 1.0,
        content,
        headline: event,
    })
}

pub(crate) fn parse_social(body: &serde_json::Value) -> Result<ParsedObservation, MalformedReason> {
    let report: SocialReport = decode(body)?;
    let location = resolve_location(report.lat, report.lon, report.coordinates.as_deref())?;
    let observed_at = resolve_timestamp(report.created_at.as_ref())?;
    let severity = match (report.urgency_level, report.severity) {
        (Some(Scalar::Text(label)), _) => {
            social_urgency(&label).ok_or(MalformedReason::UnknownSeverity(label))?
        }
        (Some(Scalar::Number(value)), _) => scale_ten(value),
        (None, Some(value)) => scale_ten(value),
        (None, None) => 0.3,
    };
    let reporter_confidence = report.credibility_score.map(scale_ten).unwrap_or(1.0);
    let text = report.text.unwrap_or_default();
    let headline: String = text.chars().take(140).collect();

    Ok(ParsedObservation {
        provider_id: report.id,
        reporter: report.author.unwrap_or_else(|| "anonymous".to_string()),
        observed_at,
        location,
        footprint: Footprint::Point,
        severity,
        reporter_confidence,
        content: text,
        headline,
    })
}

pub(crate) fn parse_seismic(body: &serde_json::Value) -> Result<ParsedObservation, MalformedReason> {
    let event: SeismicEvent = decode(body)?;
    let location = resolve_location(event.latitude, event.longitude, event.coordinates.as_deref())?;
    let observed_at = resolve_timestamp(event.time.as_ref())?;
    let magnitude = event.magnitude.filter(|m| m.is_finite()).unwrap_or(0.0);
    let place = event.location.unwrap_or_else(|| "unknown location".to_string());

    Ok(ParsedObservation {
        provider_id: event.id,
        reporter: event.network.unwrap_or_else(|| "unknown-network".to_string()),
        observed_at,
        location,
        footprint: Footprint::Circle {
            radius_km: seismic_radius_km(magnitude),
        },
        severity: seismic_severity(magnitude),
        reporter_confidence: 1.0,
        content: format!("m{magnitude:.1}"),
        headline: format!("M{magnitude:.1} {place}"),
    })
}

fn decode<T: for<'de> Deserialize<'de>>(body: &serde_json::Value) -> Result<T, MalformedReason> {
    if !body.is_object() {
        return Err(MalformedReason::NotAnObject);
    }
    T::deserialize(body).map_err(|err| MalformedReason::Decode(err.to_string()))
}

fn resolve_location(
    lat: Option<f64>,
    lon: Option<f64>,
    coordinates: Option<&[f64]>,
) -> Result<GeoPoint, MalformedReason> {
    let (lat, lon) = match (lat, lon, coordinates) {
        (Some(lat), Some(lon), _) => (lat, lon),
        (_, _, Some([lon, lat, ..])) => (*lat, *lon),
        _ => return Err(MalformedReason::MissingLocation),
    };

    let point = GeoPoint::new(lat, wrap_longitude(lon));
    if point.is_valid() {
        Ok(point)
    } else {
        Err(MalformedReason::InvalidLocation { lat, lon })
    }
}

fn resolve_timestamp(raw: Option<&Scalar>) -> Result<DateTime<Utc>, MalformedReason> {
    match raw {
        None => Err(MalformedReason::MissingTimestamp),
        Some(Scalar::Number(value)) => from_epoch(*value),
        Some(Scalar::Text(text)) => parse_timestamp_text(text),
    }
}

fn parse_timestamp_text(text: &str) -> Result<DateTime<Utc>, MalformedReason> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Err(MalformedReason::MissingTimestamp);
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(trimmed) {
        return Ok(dt.with_timezone(&Utc));
    }

    if let Ok(naive) = NaiveDateTime::parse_from_str(trimmed, "%Y-%m-%d %H:%M:%S") {
        return Ok(naive.and_utc());
    }

    if let Ok(value) = trimmed.parse::<f64>() {
        return from_epoch(value);
    }

    Err(MalformedReason::InvalidTimestamp(trimmed.to_string()))
}

/// Values beyond 1e11 can only be milliseconds for any plausible date.
fn from_epoch(value: f64) -> Result<DateTime<Utc>, MalformedReason> {
    if !value.is_finite() || value < 0.0 {
        return Err(MalformedReason::InvalidTimestamp(value.to_string()));
    }

    let millis = if value > 1e11 { value } else { value * 1000.0 };
    Utc.timestamp_millis_opt(millis.round() as i64)
        .single()
        .ok_or_else(|| MalformedReason::InvalidTimestamp(value.to_string()))
}
