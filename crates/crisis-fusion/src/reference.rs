//! Loaders for zone, resource and payload snapshots on disk.

use crate::domain::{GeoPoint, Resource, ResourceId, ResourceKind, ZoneId};
use crate::signals::{PayloadReadError, RawPayload};
use crate::zones::{Zone, ZoneBoundary, ZoneCatalog, ZoneError};
use chrono::{DateTime, NaiveDate, Utc};
use serde::Deserialize;
use std::io::{BufReader, Read};
use std::path::Path;

#[derive(Debug)]
pub enum ReferenceError {
    Io(std::io::Error),
    Csv(csv::Error),
    Row { line: u64, reason: String },
    Zone(ZoneError),
    Payload(PayloadReadError),
}

impl std::fmt::Display for ReferenceError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ReferenceError::Io(err) => write!(f, "failed to read reference snapshot: {}", err),
            ReferenceError::Csv(err) => write!(f, "invalid reference CSV data: {}", err),
            ReferenceError::Row { line, reason } => {
                write!(f, "reference row {} rejected: {}", line, reason)
            }
            ReferenceError::Zone(err) => write!(f, "zone catalog rejected: {}", err),
            ReferenceError::Payload(err) => write!(f, "payload file rejected: {}", err),
        }
    }
}

impl std::error::Error for ReferenceError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ReferenceError::Io(err) => Some(err),
            ReferenceError::Csv(err) => Some(err),
            ReferenceError::Row { .. } => None,
            ReferenceError::Zone(err) => Some(err),
            ReferenceError::Payload(err) => Some(err),
        }
    }
}

impl From<std::io::Error> for ReferenceError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err)
    }
}

impl From<csv::Error> for ReferenceError {
    fn from(err: csv::Error) -> Self {
        Self::Csv(err)
    }
}

impl From<ZoneError> for ReferenceError {
    fn from(err: ZoneError) -> Self {
        Self::Zone(err)
    }
}

impl From<PayloadReadError> for ReferenceError {
    fn from(err: PayloadReadError) -> Self {
        Self::Payload(err)
    }
}

/// Last modification time of a snapshot file, used as its `as_of`.
pub fn snapshot_time<P: AsRef<Path>>(path: P) -> Result<DateTime<Utc>, ReferenceError> {
    let modified = std::fs::metadata(path)?.modified()?;
    Ok(DateTime::<Utc>::from(modified))
}

pub fn load_zones_from_path<P: AsRef<Path>>(path: P) -> Result<ZoneCatalog, ReferenceError> {
    let as_of = snapshot_time(&path)?;
    let file = std::fs::File::open(path)?;
    load_zones(file, as_of)
}

/// Columns: `id,name,population,vulnerability_index,baseline_hazard,boundary`.
pub fn load_zones<R: Read>(reader: R, as_of: DateTime<Utc>) -> Result<ZoneCatalog, ReferenceError> {
    let mut csv_reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_reader(reader);
    let mut zones = Vec::new();

    for record in csv_reader.deserialize::<ZoneRow>() {
        let row = record?;
        let line = zones.len() as u64 + 2;
        let boundary =
            parse_boundary(&row.boundary).map_err(|reason| ReferenceError::Row { line, reason })?;
        zones.push(Zone {
            id: ZoneId(row.id),
            name: row.name,
            boundary,
            population: row.population,
            vulnerability_index: row.vulnerability_index,
            baseline_hazard: row.baseline_hazard.unwrap_or(0.0),
        });
    }

    Ok(ZoneCatalog::new(zones, as_of)?)
}

pub fn load_resources_from_path<P: AsRef<Path>>(path: P) -> Result<Vec<Resource>, ReferenceError> {
    let file = std::fs::File::open(path)?;
    load_resources(file)
}

/// Columns: `id,kind,lat,lon,capacity,available_from,available_until`.
pub fn load_resources<R: Read>(reader: R) -> Result<Vec<Resource>, ReferenceError> {
    let mut csv_reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_reader(reader);
    let mut resources = Vec::new();

    for record in csv_reader.deserialize::<ResourceRow>() {
        let row = record?;
        let line = resources.len() as u64 + 2;
        let reject = |reason: String| ReferenceError::Row { line, reason };

        let kind = ResourceKind::parse(&row.kind)
            .ok_or_else(|| reject(format!("unknown resource kind '{}'", row.kind)))?;
        let location = GeoPoint::new(row.lat, row.lon);
        if !location.is_valid() {
            return Err(reject(format!("location ({}, {}) out of range", row.lat, row.lon)));
        }
        let available_from = parse_instant(&row.available_from)
            .ok_or_else(|| reject(format!("bad available_from '{}'", row.available_from)))?;
        let available_until = parse_instant(&row.available_until)
            .ok_or_else(|| reject(format!("bad available_until '{}'", row.available_until)))?;
        if available_until < available_from {
            return Err(reject("availability window ends before it starts".to_string()));
        }

        resources.push(Resource {
            id: ResourceId(row.id),
            kind,
            location,
            capacity: row.capacity,
            available_from,
            available_until,
        });
    }

    Ok(resources)
}

pub fn load_payloads_from_path<P: AsRef<Path>>(path: P) -> Result<Vec<RawPayload>, ReferenceError> {
    let file = std::fs::File::open(path)?;
    Ok(RawPayload::read_json_lines(BufReader::new(file))?)
}

#[derive(Debug, Deserialize)]
struct ZoneRow {
    id: String,
    name: String,
    population: u64,
    vulnerability_index: f64,
    #[serde(default)]
    baseline_hazard: Option<f64>,
    boundary: String,
}

#[derive(Debug, Deserialize)]
struct ResourceRow {
    id: String,
    kind: String,
    lat: f64,
    lon: f64,
    capacity: u32,
    available_from: String,
    available_until: String,
}

/// `lon lat;lon lat;...` rings or `cell:min_lon min_lat max_lon max_lat`.
///
/// Cell bounds may also be comma separated when the field is quoted.
fn parse_boundary(raw: &str) -> Result<ZoneBoundary, String> {
    let raw = raw.trim();
    if let Some(cell) = raw.strip_prefix("cell:") {
        let values = cell
            .split(|c: char| c == ',' || c.is_whitespace())
            .filter(|part| !part.is_empty())
            .map(str::parse::<f64>)
            .collect::<Result<Vec<_>, _>>()
            .map_err(|_| format!("cell bounds '{cell}' are not numeric"))?;
        let [min_lon, min_lat, max_lon, max_lat] = values[..] else {
            return Err(format!("cell '{cell}' needs four bounds"));
        };
        return Ok(ZoneBoundary::Cell {
            min_lat,
            min_lon,
            max_lat,
            max_lon,
        });
    }

    let vertices = raw
        .split(';')
        .filter(|pair| !pair.trim().is_empty())
        .map(|pair| {
            let mut parts = pair.split_whitespace().map(str::parse::<f64>);
            match (parts.next(), parts.next(), parts.next()) {
                (Some(Ok(lon)), Some(Ok(lat)), None) => Ok(GeoPoint::new(lat, lon)),
                _ => Err(format!("vertex '{}' is not 'lon lat'", pair.trim())),
            }
        })
        .collect::<Result<Vec<_>, _>>()?;
    Ok(ZoneBoundary::Polygon { vertices })
}

fn parse_instant(value: &str) -> Option<DateTime<Utc>> {
    let trimmed = value.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(trimmed) {
        return Some(dt.with_timezone(&Utc));
    }
    NaiveDate::parse_from_str(trimmed, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::io::Cursor;

    fn as_of() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 1, 0, 0, 0)
            .single()
            .expect("valid timestamp")
    }

    #[test]
    fn loads_polygon_and_cell_zones() {
        let csv = "\
id,name,population,vulnerability_index,baseline_hazard,boundary
harbor,Harbor,5000,0.6,0.1,-74.02 40.70;-74.00 40.70;-74.00 40.72;-74.02 40.72
uptown,Uptown,12000,0.3,,cell:-74.00 40.72 -73.98 40.74
midtown,Midtown,8000,0.4,0.05,\"cell:-74.00,40.74,-73.98,40.76\"
";
        let catalog = load_zones(Cursor::new(csv), as_of()).expect("zones load");
        assert_eq!(catalog.len(), 3);
        let harbor = catalog.get(&ZoneId::from("harbor")).expect("harbor present");
        assert!(matches!(harbor.boundary, ZoneBoundary::Polygon { ref vertices } if vertices.len() == 4));
        let uptown = catalog.get(&ZoneId::from("uptown")).expect("uptown present");
        assert_eq!(uptown.baseline_hazard, 0.0);
        assert!(uptown.boundary.contains(GeoPoint::new(40.73, -73.99)));
        let midtown = catalog.get(&ZoneId::from("midtown")).expect("midtown present");
        assert!(midtown.boundary.contains(GeoPoint::new(40.75, -73.99)));
    }

    #[test]
    fn corrupt_zone_snapshot_is_rejected() {
        let degenerate = "\
id,name,population,vulnerability_index,baseline_hazard,boundary
line,Line,10,0.5,0,-74.0 40.7;-73.9 40.7
";
        assert!(matches!(
            load_zones(Cursor::new(degenerate), as_of()),
            Err(ReferenceError::Zone(ZoneError::DegenerateBoundary(_)))
        ));

        let garbled = "\
id,name,population,vulnerability_index,baseline_hazard,boundary
x,X,10,0.5,0,cell:1 2 3
";
        assert!(matches!(
            load_zones(Cursor::new(garbled), as_of()),
            Err(ReferenceError::Row { line: 2, .. })
        ));

        let negative = "\
id,name,population,vulnerability_index,baseline_hazard,boundary
x,X,-5,0.5,0,cell:0 0 1 1
";
        assert!(matches!(
            load_zones(Cursor::new(negative), as_of()),
            Err(ReferenceError::Csv(_))
        ));
    }

    #[test]
    fn loads_resources_with_kind_aliases() {
        let csv = "\
id,kind,lat,lon,capacity,available_from,available_until
amb-1,ambulance,40.71,-74.00,2,2025-03-01T00:00:00Z,2025-03-02T00:00:00Z
bus-1,Vehicle,40.70,-74.01,50,2025-03-01,2025-03-03
";
        let resources = load_resources(Cursor::new(csv)).expect("resources load");
        assert_eq!(resources.len(), 2);
        assert_eq!(resources[0].kind, ResourceKind::Medical);
        assert_eq!(resources[1].capacity, 50);
        assert_eq!(resources[1].available_from, as_of());
    }

    #[test]
    fn rejects_unknown_kinds_and_inverted_windows() {
        let unknown = "\
id,kind,lat,lon,capacity,available_from,available_until
b-1,boat,40.71,-74.00,2,2025-03-01,2025-03-02
";
        let err = load_resources(Cursor::new(unknown)).expect_err("unknown kind");
        assert!(err.to_string().contains("boat"));

        let inverted = "\
id,kind,lat,lon,capacity,available_from,available_until
v-1,vehicle,40.71,-74.00,2,2025-03-02,2025-03-01
";
        assert!(matches!(
            load_resources(Cursor::new(inverted)),
            Err(ReferenceError::Row { line: 2, .. })
        ));
    }
}
