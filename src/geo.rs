use std::fmt::Write as _;

/// One GPS position taken from a frame's metadata, lon/lat in WGS84 degrees.
#[derive(Debug, Clone, Copy, PartialEq)]
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

    fn is_null_island(&self) -> bool {
        self.longitude == 0.0 && self.latitude == 0.0
    }
}

/// Convex-hull footprint of a session's frame positions.
#[derive(Debug, Clone, PartialEq)]
pub struct Footprint(Vec<GeoPoint>);

impl Footprint {
    pub fn to_wkt(&self) -> String {
        let mut wkt = String::from("POLYGON((");
        for point in &self.0 {
            let _ = write!(wkt, "{} {}, ", point.longitude, point.latitude);
        }
        // Close the ring on the first vertex.
        if let Some(first) = self.0.first() {
            let _ = write!(wkt, "{} {}", first.longitude, first.latitude);
        }
        wkt.push_str("))");
        wkt
    }

    pub fn vertices(&self) -> &[GeoPoint] {
        &self.0
    }
}

/// Decimated acquisition track of a session.
#[derive(Debug, Clone, PartialEq)]
pub struct Track(Vec<GeoPoint>);

impl Track {
    pub fn to_wkt(&self) -> String {
        let mut wkt = String::from("LINESTRING(");
        let mut first = true;
        for point in &self.0 {
            if !first {
                wkt.push_str(", ");
            }
            let _ = write!(wkt, "{} {}", point.longitude, point.latitude);
            first = false;
        }
        wkt.push(')');
        wkt
    }

    pub fn points(&self) -> &[GeoPoint] {
        &self.0
    }
}

/// Footprint polygon of a point cloud, or None when the cloud is degenerate:
/// no usable points, zero spread on either axis, or fewer than three distinct
/// positions. 0/0 coordinates are GPS dropouts and are ignored.
pub fn compute_footprint(points: &[GeoPoint]) -> Option<Footprint> {
    let usable: Vec<GeoPoint> = points
        .iter()
        .copied()
        .filter(|point| !point.is_null_island())
        .collect();
    if usable.is_empty() || spread(&usable, |p| p.longitude) == 0.0
        || spread(&usable, |p| p.latitude) == 0.0
    {
        return None;
    }

    let hull = convex_hull(usable);
    if hull.len() < 3 {
        return None;
    }
    Some(Footprint(hull))
}

/// Track linestring over the usable points, dropping every tenth position to
/// keep the stored geometry light.
pub fn compute_track(points: &[GeoPoint]) -> Option<Track> {
    let decimated: Vec<GeoPoint> = points
        .iter()
        .enumerate()
        .filter(|(index, point)| index % 10 != 0 && !point.is_null_island())
        .map(|(_, point)| *point)
        .collect();
    if decimated.len() < 2 {
        return None;
    }
    Some(Track(decimated))
}

fn spread(points: &[GeoPoint], axis: impl Fn(&GeoPoint) -> f64) -> f64 {
    let mut min = f64::INFINITY;
    let mut max = f64::NEG_INFINITY;
    for point in points {
        let value = axis(point);
        min = min.min(value);
        max = max.max(value);
    }
    max - min
}

/// Andrew's monotone chain, counter-clockwise hull without the closing point.
fn convex_hull(mut points: Vec<GeoPoint>) -> Vec<GeoPoint> {
    points.sort_by(|a, b| {
        (a.longitude, a.latitude)
            .partial_cmp(&(b.longitude, b.latitude))
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    points.dedup_by(|a, b| a == b);
    if points.len() < 3 {
        return points;
    }

    fn cross(o: GeoPoint, a: GeoPoint, b: GeoPoint) -> f64 {
        (a.longitude - o.longitude) * (b.latitude - o.latitude)
            - (a.latitude - o.latitude) * (b.longitude - o.longitude)
    }

    let mut lower: Vec<GeoPoint> = Vec::new();
    for &point in &points {
        while lower.len() >= 2 && cross(lower[lower.len() - 2], lower[lower.len() - 1], point) <= 0.0
        {
            lower.pop();
        }
        lower.push(point);
    }

    let mut upper: Vec<GeoPoint> = Vec::new();
    for &point in points.iter().rev() {
        while upper.len() >= 2 && cross(upper[upper.len() - 2], upper[upper.len() - 1], point) <= 0.0
        {
            upper.pop();
        }
        upper.push(point);
    }

    lower.pop();
    upper.pop();
    lower.extend(upper);
    lower
}
