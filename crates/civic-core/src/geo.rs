//! Geospatial primitives and the in-memory geohash index.
//!
//! Issues are bucketed by their 9-character geohash. A radius query computes
//! the set of *covering cells*: geohash cells at a coarser precision that
//! intersect the bounding box of the query circle. Every stored hash that
//! starts with a covering cell is a candidate, and an exact haversine check
//! removes the corners of the box.
//!
//! The covering cells double as the key set of the duplicate resolver's
//! exclusive section: two points within `radius` of each other always share at
//! least one covering cell, because each circle's bounding box contains the
//! other point.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Mean Earth radius used for all distance math.
pub const EARTH_RADIUS_METERS: f64 = 6_371_000.0;

/// Precision of the geohash stored alongside every issue.
pub const STORED_PRECISION: usize = 9;

/// Upper bound on covering cells before the precision is coarsened.
const MAX_COVERING_CELLS: f64 = 1_024.0;

/// Safety margin applied to the bounding box of a query circle.
const BBOX_PAD: f64 = 1.01;

/// Keeps encoded coordinates strictly inside the geohash world box.
const EDGE: f64 = 1e-9;

const METERS_PER_DEGREE: f64 = EARTH_RADIUS_METERS * std::f64::consts::PI / 180.0;

/// A WGS84 latitude/longitude pair in degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub lat: f64,
    pub lon: f64,
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum GeoError {
    #[error("coordinates out of range: ({lat}, {lon})")]
    OutOfRange { lat: f64, lon: f64 },

    #[error("geohash encoding failed: {0}")]
    Geohash(String),
}

impl Point {
    #[must_use]
    pub const fn new(lat: f64, lon: f64) -> Self {
        Self { lat, lon }
    }

    /// Both coordinates finite and within WGS84 bounds.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.lat.is_finite()
            && self.lon.is_finite()
            && (-90.0..=90.0).contains(&self.lat)
            && (-180.0..=180.0).contains(&self.lon)
    }

    /// Encode this point as a geohash of `precision` characters.
    pub fn geohash(&self, precision: usize) -> Result<String, GeoError> {
        if !self.is_valid() {
            return Err(GeoError::OutOfRange {
                lat: self.lat,
                lon: self.lon,
            });
        }
        geohash::encode(
            geohash::Coord {
                x: self.lon.clamp(-180.0 + EDGE, 180.0 - EDGE),
                y: self.lat.clamp(-90.0 + EDGE, 90.0 - EDGE),
            },
            precision,
        )
        .map_err(|e| GeoError::Geohash(e.to_string()))
    }
}

/// Great-circle distance between two points in meters.
#[must_use]
pub fn haversine_meters(a: Point, b: Point) -> f64 {
    let dlat = (b.lat - a.lat).to_radians();
    let dlon = (b.lon - a.lon).to_radians();

    let h = (dlat / 2.0).sin().powi(2)
        + a.lat.to_radians().cos() * b.lat.to_radians().cos() * (dlon / 2.0).sin().powi(2);

    2.0 * EARTH_RADIUS_METERS * h.sqrt().min(1.0).asin()
}

/// Height and width of a geohash cell at `precision`, in degrees.
#[must_use]
pub fn cell_size_degrees(precision: usize) -> (f64, f64) {
    let bits = 5 * precision;
    let lon_bits = bits.div_ceil(2);
    let lat_bits = bits / 2;
    (
        180.0 / f64::from(1_u32 << lat_bits.min(31)),
        360.0 / f64::from(1_u32 << lon_bits.min(31)),
    )
}

/// The finest precision whose cells are at least `radius_m` tall.
///
/// 150 m maps to precision 7 (cells of roughly 153 m x 153 m at the equator).
#[must_use]
pub fn cell_precision_for_radius(radius_m: f64) -> usize {
    (1..=STORED_PRECISION)
        .rev()
        .find(|&p| cell_size_degrees(p).0 * METERS_PER_DEGREE >= radius_m)
        .unwrap_or(1)
}

/// Geohash cells at `precision` that intersect the bounding box of the
/// circle of `radius_m` around `center`, sorted and de-duplicated.
///
/// Crossing the antimeridian splits the box in two; touching a pole widens
/// it to every longitude. Boxes needing more than a fixed number of cells are
/// retried one precision coarser.
pub fn covering_cells(
    center: Point,
    radius_m: f64,
    precision: usize,
) -> Result<Vec<String>, GeoError> {
    if !center.is_valid() {
        return Err(GeoError::OutOfRange {
            lat: center.lat,
            lon: center.lon,
        });
    }

    let bbox = BoundingBox::around(center, radius_m);
    if precision > 1 && bbox.cell_estimate(precision) > MAX_COVERING_CELLS {
        return covering_cells(center, radius_m, precision - 1);
    }

    let (lat_step, lon_step) = cell_size_degrees(precision);
    let lat_samples = steps(bbox.lat_min, bbox.lat_max, lat_step);

    let mut cells = BTreeSet::new();
    for (lo, hi) in bbox.lon_ranges {
        for lon in steps(lo, hi, lon_step) {
            for &lat in &lat_samples {
                cells.insert(Point::new(lat, lon).geohash(precision)?);
            }
        }
    }

    Ok(cells.into_iter().collect())
}

/// Section key shared by every request whose box is too wide to cover with
/// cells at the radius precision. Sorts after every geohash.
pub const POLAR_SECTION_KEY: &str = "~polar";

/// Exclusive-section keys for a request at `center` with `radius_m`.
///
/// Unlike [`covering_cells`] the precision never depends on the location:
/// keys are cells at [`cell_precision_for_radius`]. Where that would take too
/// many cells (near the poles) the request is keyed on [`POLAR_SECTION_KEY`]
/// instead, and any request whose doubled box reaches that zone holds the
/// polar key as well. Two requests within `radius_m` of each other therefore
/// always share a key.
pub fn section_keys(center: Point, radius_m: f64) -> Result<Vec<String>, GeoError> {
    if !center.is_valid() {
        return Err(GeoError::OutOfRange {
            lat: center.lat,
            lon: center.lon,
        });
    }

    let precision = cell_precision_for_radius(radius_m);
    let too_wide = |r: f64| BoundingBox::around(center, r).cell_estimate(precision) > MAX_COVERING_CELLS;
    if too_wide(radius_m) {
        return Ok(vec![POLAR_SECTION_KEY.to_string()]);
    }

    let mut keys = covering_cells(center, radius_m, precision)?;
    if too_wide(2.0 * radius_m) {
        keys.push(POLAR_SECTION_KEY.to_string());
    }
    Ok(keys)
}

/// Padded bounding box of a query circle, split at the antimeridian.
struct BoundingBox {
    lat_min: f64,
    lat_max: f64,
    lon_ranges: Vec<(f64, f64)>,
}

impl BoundingBox {
    fn around(center: Point, radius_m: f64) -> Self {
        let dlat = radius_m.max(0.0) * BBOX_PAD / METERS_PER_DEGREE;
        let lat_min = (center.lat - dlat).max(-90.0);
        let lat_max = (center.lat + dlat).min(90.0);
        Self {
            lat_min,
            lat_max,
            lon_ranges: longitude_ranges(center.lon, dlat, lat_min, lat_max),
        }
    }

    /// Upper bound on the cells needed to cover this box at `precision`.
    fn cell_estimate(&self, precision: usize) -> f64 {
        let (lat_step, lon_step) = cell_size_degrees(precision);
        let lon_samples: f64 = self
            .lon_ranges
            .iter()
            .map(|(lo, hi)| sample_count(*lo, *hi, lon_step))
            .sum();
        sample_count(self.lat_min, self.lat_max, lat_step) * lon_samples
    }
}

fn longitude_ranges(lon: f64, dlat: f64, lat_min: f64, lat_max: f64) -> Vec<(f64, f64)> {
    let widest = lat_min.abs().max(lat_max.abs());
    let cos = widest.to_radians().cos();
    if lat_min <= -90.0 || lat_max >= 90.0 || cos <= f64::EPSILON {
        return vec![(-180.0, 180.0)];
    }

    let dlon = dlat / cos;
    if dlon >= 180.0 {
        return vec![(-180.0, 180.0)];
    }

    let (lo, hi) = (lon - dlon, lon + dlon);
    if lo < -180.0 {
        vec![(lo + 360.0, 180.0), (-180.0, hi)]
    } else if hi > 180.0 {
        vec![(lo, 180.0), (-180.0, hi - 360.0)]
    } else {
        vec![(lo, hi)]
    }
}

fn sample_count(lo: f64, hi: f64, step: f64) -> f64 {
    ((hi - lo) / step).floor() + 2.0
}

/// `lo, lo + step, ...` strictly below `hi`, followed by `hi` itself.
fn steps(lo: f64, hi: f64, step: f64) -> Vec<f64> {
    let mut out = Vec::new();
    let mut i = 0_u32;
    loop {
        let value = f64::from(i).mul_add(step, lo);
        if value >= hi {
            break;
        }
        out.push(value);
        i += 1;
    }
    out.push(hi);
    out
}

/// Exclusive upper bound for a geohash prefix range scan.
///
/// Geohash characters are all below `{` in ASCII, so every hash starting
/// with `prefix` sorts in `[prefix, prefix + "{")`.
#[must_use]
pub fn prefix_upper_bound(prefix: &str) -> String {
    format!("{prefix}{{")
}

/// In-memory geohash index over issue positions.
///
/// Entries are ordered by their stored geohash, so a radius query is a
/// handful of prefix range scans rather than a full pass.
#[derive(Debug, Clone)]
pub struct GeoIndex<Id> {
    by_hash: BTreeMap<String, BTreeMap<Id, Point>>,
    hash_of: BTreeMap<Id, String>,
}

impl<Id> Default for GeoIndex<Id> {
    fn default() -> Self {
        Self {
            by_hash: BTreeMap::new(),
            hash_of: BTreeMap::new(),
        }
    }
}

impl<Id: Copy + Ord> GeoIndex<Id> {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.hash_of.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.hash_of.is_empty()
    }

    /// Insert or move `id` to `point`.
    pub fn insert(&mut self, id: Id, point: Point) -> Result<(), GeoError> {
        let hash = point.geohash(STORED_PRECISION)?;
        self.remove(id);
        self.by_hash.entry(hash.clone()).or_default().insert(id, point);
        self.hash_of.insert(id, hash);
        Ok(())
    }

    /// Remove `id`; returns whether it was present.
    pub fn remove(&mut self, id: Id) -> bool {
        let Some(hash) = self.hash_of.remove(&id) else {
            return false;
        };
        if let Some(bucket) = self.by_hash.get_mut(&hash) {
            bucket.remove(&id);
            if bucket.is_empty() {
                self.by_hash.remove(&hash);
            }
        }
        true
    }

    /// Ids whose position lies within `radius_m` of `center`.
    ///
    /// The sequence is lazy and finite; its order is unspecified.
    pub fn query(
        &self,
        center: Point,
        radius_m: f64,
    ) -> Result<impl Iterator<Item = Id> + '_, GeoError> {
        let precision = cell_precision_for_radius(radius_m);
        let cells = covering_cells(center, radius_m, precision)?;

        Ok(cells
            .into_iter()
            .flat_map(move |cell| {
                let upper = prefix_upper_bound(&cell);
                self.by_hash
                    .range(cell..upper)
                    .flat_map(|(_, bucket)| bucket.iter())
            })
            .filter(move |(_, point)| haversine_meters(center, **point) <= radius_m)
            .map(|(id, _)| *id))
    }
}
