//! Geo predicates: points, shapes, bounding boxes, polygons, and distances.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{QueryError, QueryResult};

/// Mean earth radius in meters.
const EARTH_RADIUS_M: f64 = 6_371_008.8;

/// A WGS84 coordinate. Serialized as a GeoJSON position `[lon, lat]`.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(from = "[f64; 2]", into = "[f64; 2]")]
pub struct GeoPoint {
    pub longitude: f64,
    pub latitude: f64,
}

impl GeoPoint {
    pub fn new(longitude: f64, latitude: f64) -> Self {
        Self {
            longitude,
            latitude,
        }
    }

    fn validate(&self) -> QueryResult<()> {
        if !(-90.0..=90.0).contains(&self.latitude) || !(-180.0..=180.0).contains(&self.longitude)
        {
            return Err(QueryError::InvalidGeometry(format!(
                "coordinate out of range: [{}, {}]",
                self.longitude, self.latitude
            )));
        }
        Ok(())
    }

    /// Great-circle distance in meters.
    pub fn haversine_distance(&self, other: &GeoPoint) -> f64 {
        let (lat1, lat2) = (self.latitude.to_radians(), other.latitude.to_radians());
        let dlat = lat2 - lat1;
        let dlon = (other.longitude - self.longitude).to_radians();
        let a = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlon / 2.0).sin().powi(2);
        2.0 * EARTH_RADIUS_M * a.sqrt().asin()
    }

    fn from_position(value: &Value) -> Option<Self> {
        let pos = value.as_array()?;
        if pos.len() < 2 {
            return None;
        }
        Some(Self::new(pos[0].as_f64()?, pos[1].as_f64()?))
    }
}

impl From<[f64; 2]> for GeoPoint {
    fn from([longitude, latitude]: [f64; 2]) -> Self {
        Self::new(longitude, latitude)
    }
}

impl From<GeoPoint> for [f64; 2] {
    fn from(p: GeoPoint) -> Self {
        [p.longitude, p.latitude]
    }
}

/// A property value decoded as geometry.
#[derive(Clone, Debug, PartialEq)]
pub enum Geometry {
    Point(GeoPoint),
    LineString(Vec<GeoPoint>),
    /// Outer ring only; holes are ignored.
    Polygon(Vec<GeoPoint>),
}

impl Geometry {
    /// Decode a property value.
    ///
    /// Accepts GeoJSON `Point`/`LineString`/`Polygon`, a bare `[lon, lat]`
    /// position, or a `"lat,lon"` string.
    pub fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::String(s) => {
                let (lat, lon) = s.split_once(',')?;
                let lat = lat.trim().parse().ok()?;
                let lon = lon.trim().parse().ok()?;
                Some(Self::Point(GeoPoint::new(lon, lat)))
            }
            Value::Array(_) => GeoPoint::from_position(value).map(Self::Point),
            Value::Object(obj) => {
                let coords = obj.get("coordinates")?;
                match obj.get("type")?.as_str()? {
                    "Point" => GeoPoint::from_position(coords).map(Self::Point),
                    "LineString" => positions(coords).map(Self::LineString),
                    "Polygon" => positions(coords.as_array()?.first()?).map(Self::Polygon),
                    _ => None,
                }
            }
            _ => None,
        }
    }

    fn vertices(&self) -> &[GeoPoint] {
        match self {
            Self::Point(p) => std::slice::from_ref(p),
            Self::LineString(v) | Self::Polygon(v) => v,
        }
    }

    fn edges(&self) -> Vec<(GeoPoint, GeoPoint)> {
        match self {
            Self::Point(_) => Vec::new(),
            Self::LineString(v) => v.windows(2).map(|w| (w[0], w[1])).collect(),
            Self::Polygon(v) => ring_edges(v),
        }
    }
}

fn positions(value: &Value) -> Option<Vec<GeoPoint>> {
    value.as_array()?.iter().map(GeoPoint::from_position).collect()
}

fn ring_edges(ring: &[GeoPoint]) -> Vec<(GeoPoint, GeoPoint)> {
    if ring.len() < 2 {
        return Vec::new();
    }
    let mut edges: Vec<_> = ring.windows(2).map(|w| (w[0], w[1])).collect();
    let (first, last) = (ring[0], ring[ring.len() - 1]);
    if first != last {
        edges.push((last, first));
    }
    edges
}

/// Units accepted by distance filters.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum DistanceUnit {
    Millimeters,
    Centimeters,
    Meters,
    Kilometers,
    Inches,
    Feet,
    Yards,
    Miles,
    NauticalMiles,
}

impl DistanceUnit {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Millimeters => "MILLIMETERS",
            Self::Centimeters => "CENTIMETERS",
            Self::Meters => "METERS",
            Self::Kilometers => "KILOMETERS",
            Self::Inches => "INCHES",
            Self::Feet => "FEET",
            Self::Yards => "YARDS",
            Self::Miles => "MILES",
            Self::NauticalMiles => "NAUTICAL_MILES",
        }
    }

    pub fn meters_per_unit(&self) -> f64 {
        match self {
            Self::Millimeters => 0.001,
            Self::Centimeters => 0.01,
            Self::Meters => 1.0,
            Self::Kilometers => 1000.0,
            Self::Inches => 0.0254,
            Self::Feet => 0.3048,
            Self::Yards => 0.9144,
            Self::Miles => 1609.344,
            Self::NauticalMiles => 1852.0,
        }
    }

    /// Resolve a unit name through the alias table.
    ///
    /// Matching ignores case, and `_`/`-` are read as spaces, so
    /// `"NAUTICAL_MILES"`, `"nautical miles"` and `"nmi"` all resolve.
    pub fn from_alias(alias: &str) -> QueryResult<Self> {
        let normalized = alias.trim().to_lowercase().replace(['_', '-'], " ");
        let unit = match normalized.as_str() {
            "mm" | "millimeter" | "millimeters" | "millimetre" | "millimetres" => {
                Self::Millimeters
            }
            "cm" | "centimeter" | "centimeters" | "centimetre" | "centimetres" => {
                Self::Centimeters
            }
            "m" | "meter" | "meters" | "metre" | "metres" => Self::Meters,
            "km" | "kilometer" | "kilometers" | "kilometre" | "kilometres" => Self::Kilometers,
            "in" | "inch" | "inches" => Self::Inches,
            "ft" | "foot" | "feet" => Self::Feet,
            "yd" | "yard" | "yards" => Self::Yards,
            "mi" | "mile" | "miles" => Self::Miles,
            "nm" | "nmi" | "nautical mile" | "nautical miles" => Self::NauticalMiles,
            _ => return Err(QueryError::UnknownDistanceUnit(alias.to_string())),
        };
        Ok(unit)
    }
}

impl FromStr for DistanceUnit {
    type Err = QueryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_alias(s)
    }
}

impl TryFrom<String> for DistanceUnit {
    type Error = QueryError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::from_alias(&s)
    }
}

impl From<DistanceUnit> for String {
    fn from(unit: DistanceUnit) -> Self {
        unit.as_str().to_string()
    }
}

impl fmt::Display for DistanceUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Region operand of a `within` or `intersects` predicate.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum GeoFilter {
    #[serde(rename_all = "camelCase")]
    BoundingBox {
        top_left: GeoPoint,
        bottom_right: GeoPoint,
    },
    Polygon { ring: Vec<GeoPoint> },
    Distance {
        center: GeoPoint,
        distance: f64,
        unit: DistanceUnit,
    },
}

impl GeoFilter {
    pub fn bounding_box(top_left: GeoPoint, bottom_right: GeoPoint) -> QueryResult<Self> {
        let filter = Self::BoundingBox {
            top_left,
            bottom_right,
        };
        filter.validate()?;
        Ok(filter)
    }

    pub fn polygon(ring: Vec<GeoPoint>) -> QueryResult<Self> {
        let filter = Self::Polygon { ring };
        filter.validate()?;
        Ok(filter)
    }

    /// Point-and-radius region; `unit` goes through the alias table.
    pub fn distance(center: GeoPoint, distance: f64, unit: &str) -> QueryResult<Self> {
        let filter = Self::Distance {
            center,
            distance,
            unit: DistanceUnit::from_alias(unit)?,
        };
        filter.validate()?;
        Ok(filter)
    }

    pub fn validate(&self) -> QueryResult<()> {
        match self {
            Self::BoundingBox {
                top_left,
                bottom_right,
            } => {
                top_left.validate()?;
                bottom_right.validate()?;
                if top_left.latitude < bottom_right.latitude
                    || top_left.longitude > bottom_right.longitude
                {
                    return Err(QueryError::InvalidGeometry(
                        "bounding box corners are inverted".into(),
                    ));
                }
            }
            Self::Polygon { ring } => {
                let distinct = if ring.len() > 1 && ring.first() == ring.last() {
                    ring.len() - 1
                } else {
                    ring.len()
                };
                if distinct < 3 {
                    return Err(QueryError::InvalidGeometry(
                        "polygon needs at least three vertices".into(),
                    ));
                }
                ring.iter().try_for_each(GeoPoint::validate)?;
            }
            Self::Distance {
                center, distance, ..
            } => {
                center.validate()?;
                if !distance.is_finite() || *distance < 0.0 {
                    return Err(QueryError::InvalidGeometry(format!(
                        "distance must be non-negative, got {distance}"
                    )));
                }
            }
        }
        Ok(())
    }

    fn contains_point(&self, p: &GeoPoint) -> bool {
        match self {
            Self::BoundingBox {
                top_left,
                bottom_right,
            } => {
                (top_left.longitude..=bottom_right.longitude).contains(&p.longitude)
                    && (bottom_right.latitude..=top_left.latitude).contains(&p.latitude)
            }
            Self::Polygon { ring } => point_in_ring(p, ring),
            Self::Distance {
                center,
                distance,
                unit,
            } => center.haversine_distance(p) <= distance * unit.meters_per_unit(),
        }
    }

    fn boundary(&self) -> Vec<GeoPoint> {
        match self {
            Self::BoundingBox {
                top_left,
                bottom_right,
            } => vec![
                *top_left,
                GeoPoint::new(bottom_right.longitude, top_left.latitude),
                *bottom_right,
                GeoPoint::new(top_left.longitude, bottom_right.latitude),
            ],
            Self::Polygon { ring } => ring.clone(),
            Self::Distance { .. } => Vec::new(),
        }
    }

    /// Every vertex of the geometry lies inside the region.
    pub fn within(&self, geometry: &Geometry) -> bool {
        let vertices = geometry.vertices();
        !vertices.is_empty() && vertices.iter().all(|p| self.contains_point(p))
    }

    /// The geometry and the region share at least one point.
    ///
    /// Distance regions test vertices and, for polygons, whether the center
    /// falls inside the shape.
    pub fn intersects(&self, geometry: &Geometry) -> bool {
        if geometry.vertices().iter().any(|p| self.contains_point(p)) {
            return true;
        }
        if let (Self::Distance { center, .. }, Geometry::Polygon(ring)) = (self, geometry) {
            return point_in_ring(center, ring);
        }
        let boundary = self.boundary();
        if let Geometry::Polygon(ring) = geometry {
            if boundary.iter().any(|p| point_in_ring(p, ring)) {
                return true;
            }
        }
        let region_edges = ring_edges(&boundary);
        geometry.edges().iter().any(|(a, b)| {
            region_edges
                .iter()
                .any(|(c, d)| segments_intersect(a, b, c, d))
        })
    }
}

/// Ray-casting point-in-polygon over planar lon/lat.
fn point_in_ring(p: &GeoPoint, ring: &[GeoPoint]) -> bool {
    let mut inside = false;
    for (a, b) in ring_edges(ring) {
        if (a.latitude > p.latitude) != (b.latitude > p.latitude) {
            let x = a.longitude
                + (p.latitude - a.latitude) / (b.latitude - a.latitude)
                    * (b.longitude - a.longitude);
            if p.longitude < x {
                inside = !inside;
            }
        }
    }
    inside
}

fn orientation(a: &GeoPoint, b: &GeoPoint, c: &GeoPoint) -> f64 {
    (b.longitude - a.longitude) * (c.latitude - a.latitude)
        - (b.latitude - a.latitude) * (c.longitude - a.longitude)
}

fn on_segment(a: &GeoPoint, b: &GeoPoint, p: &GeoPoint) -> bool {
    p.longitude >= a.longitude.min(b.longitude)
        && p.longitude <= a.longitude.max(b.longitude)
        && p.latitude >= a.latitude.min(b.latitude)
        && p.latitude <= a.latitude.max(b.latitude)
}

fn segments_intersect(a: &GeoPoint, b: &GeoPoint, c: &GeoPoint, d: &GeoPoint) -> bool {
    let (o1, o2) = (orientation(a, b, c), orientation(a, b, d));
    let (o3, o4) = (orientation(c, d, a), orientation(c, d, b));
    if o1 * o2 < 0.0 && o3 * o4 < 0.0 {
        return true;
    }
    (o1 == 0.0 && on_segment(a, b, c))
        || (o2 == 0.0 && on_segment(a, b, d))
        || (o3 == 0.0 && on_segment(c, d, a))
        || (o4 == 0.0 && on_segment(c, d, b))
}
