use crate::domain::GeoPoint;
use serde::{Deserialize, Serialize};

const KM_PER_DEGREE_LAT: f64 = 110.574;
const KM_PER_DEGREE_LON_EQUATOR: f64 = 111.320;

/// Spatial extent of a zone.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ZoneBoundary {
    /// Ordered ring; closing vertex optional.
    Polygon { vertices: Vec<GeoPoint> },
    /// Axis-aligned grid cell.
    Cell {
        min_lat: f64,
        min_lon: f64,
        max_lat: f64,
        max_lon: f64,
    },
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingBox {
    pub min_lat: f64,
    pub min_lon: f64,
    pub max_lat: f64,
    pub max_lon: f64,
}

impl ZoneBoundary {
    pub fn bounding_box(&self) -> BoundingBox {
        match self {
            ZoneBoundary::Cell {
                min_lat,
                min_lon,
                max_lat,
                max_lon,
            } => BoundingBox {
                min_lat: *min_lat,
                min_lon: *min_lon,
                max_lat: *max_lat,
                max_lon: *max_lon,
            },
            ZoneBoundary::Polygon { vertices } => {
                let mut bbox = BoundingBox {
                    min_lat: f64::INFINITY,
                    min_lon: f64::INFINITY,
                    max_lat: f64::NEG_INFINITY,
                    max_lon: f64::NEG_INFINITY,
                };
                for vertex in vertices {
                    bbox.min_lat = bbox.min_lat.min(vertex.lat);
                    bbox.min_lon = bbox.min_lon.min(vertex.lon);
                    bbox.max_lat = bbox.max_lat.max(vertex.lat);
                    bbox.max_lon = bbox.max_lon.max(vertex.lon);
                }
                bbox
            }
        }
    }

    pub fn contains(&self, point: GeoPoint) -> bool {
        match self {
            ZoneBoundary::Cell {
                min_lat,
                min_lon,
                max_lat,
                max_lon,
            } => {
                point.lat >= *min_lat
                    && point.lat <= *max_lat
                    && point.lon >= *min_lon
                    && point.lon <= *max_lon
            }
            ZoneBoundary::Polygon { vertices } => {
                if vertices.len() < 3 {
                    return false;
                }
                // Ray casting
                let mut inside = false;
                let n = vertices.len();
                let mut j = n - 1;
                for i in 0..n {
                    let (xi, yi) = (vertices[i].lon, vertices[i].lat);
                    let (xj, yj) = (vertices[j].lon, vertices[j].lat);
                    if ((yi > point.lat) != (yj > point.lat))
                        && (point.lon < (xj - xi) * (point.lat - yi) / (yj - yi) + xi)
                    {
                        inside = !inside;
                    }
                    j = i;
                }
                inside
            }
        }
    }

    /// Area in square kilometres using a local equirectangular projection.
    pub fn area_km2(&self) -> f64 {
        let centroid = self.centroid();
        match self {
            ZoneBoundary::Cell {
                min_lat,
                min_lon,
                max_lat,
                max_lon,
            } => {
                let (x0, y0) = project(centroid, GeoPoint::new(*min_lat, *min_lon));
                let (x1, y1) = project(centroid, GeoPoint::new(*max_lat, *max_lon));
                ((x1 - x0) * (y1 - y0)).max(0.0)
            }
            ZoneBoundary::Polygon { vertices } => {
                if vertices.len() < 3 {
                    return 0.0;
                }
                // Shoelace
                let projected: Vec<(f64, f64)> =
                    vertices.iter().map(|v| project(centroid, *v)).collect();
                let n = projected.len();
                let mut twice_area = 0.0;
                for i in 0..n {
                    let j = (i + 1) % n;
                    twice_area += projected[i].0 * projected[j].1;
                    twice_area -= projected[j].0 * projected[i].1;
                }
                (twice_area / 2.0).abs()
            }
        }
    }

    pub fn centroid(&self) -> GeoPoint {
        match self {
            ZoneBoundary::Cell {
                min_lat,
                min_lon,
                max_lat,
                max_lon,
            } => GeoPoint::new((min_lat + max_lat) / 2.0, (min_lon + max_lon) / 2.0),
            ZoneBoundary::Polygon { vertices } => {
                if vertices.is_empty() {
                    return GeoPoint::new(0.0, 0.0);
                }
                let count = vertices.len() as f64;
                let (lat, lon) = vertices
                    .iter()
                    .fold((0.0, 0.0), |(lat, lon), v| (lat + v.lat, lon + v.lon));
                GeoPoint::new(lat / count, lon / count)
            }
        }
    }

    pub(crate) fn is_finite(&self) -> bool {
        match self {
            ZoneBoundary::Cell {
                min_lat,
                min_lon,
                max_lat,
                max_lon,
            } => [min_lat, min_lon, max_lat, max_lon]
                .iter()
                .all(|value| value.is_finite()),
            ZoneBoundary::Polygon { vertices } => vertices.iter().all(GeoPoint::is_valid),
        }
    }
}

/// Offset of `point` from `origin` in kilometres (east, north).
pub(crate) fn project(origin: GeoPoint, point: GeoPoint) -> (f64, f64) {
    let km_per_lon = KM_PER_DEGREE_LON_EQUATOR * origin.lat.to_radians().cos();
    (
        (point.lon - origin.lon) * km_per_lon,
        (point.lat - origin.lat) * KM_PER_DEGREE_LAT,
    )
}

pub(crate) fn unproject(origin: GeoPoint, east_km: f64, north_km: f64) -> GeoPoint {
    let km_per_lon = KM_PER_DEGREE_LON_EQUATOR * origin.lat.to_radians().cos();
    let lon = if km_per_lon.abs() < f64::EPSILON {
        origin.lon
    } else {
        origin.lon + east_km / km_per_lon
    };
    GeoPoint::new(origin.lat + north_km / KM_PER_DEGREE_LAT, lon)
}

/// Deterministic lattice of points covering a disc, row-major from south-west.
pub(crate) fn disc_samples(center: GeoPoint, radius_km: f64, resolution: usize) -> Vec<GeoPoint> {
    if radius_km <= 0.0 || !radius_km.is_finite() || resolution == 0 {
        return vec![center];
    }

    let steps = resolution.max(1);
    let step = 2.0 * radius_km / steps as f64;
    let mut samples = Vec::with_capacity(steps * steps);
    for row in 0..steps {
        let north = -radius_km + step * (row as f64 + 0.5);
        for col in 0..steps {
            let east = -radius_km + step * (col as f64 + 0.5);
            if east * east + north * north <= radius_km * radius_km {
                samples.push(unproject(center, east, north));
            }
        }
    }
    samples
}
