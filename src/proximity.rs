//! Nearby-meter check for a selected disconnected meter.
//!
//! A disconnected meter with reconnected or still-communicating neighbours a
//! few metres away is a tampering lead, so the scan always runs over the full
//! record set rather than the filtered one.
use crate::types::{CommState, MeterRecord, NeighborRow, StatusKind};
use rand::Rng;
use serde::Serialize;
use tracing::debug;

pub const EARTH_RADIUS_M: f64 = 6_371_000.0;

/// Two points closer than this in both axes (about a metre) are treated as
/// the same spot on the map.
pub const COINCIDENT_DEGREES: f64 = 1e-5;

/// Largest display offset applied to a coincident neighbour, per axis.
pub const JITTER_DEGREES: f64 = 1e-4;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum NeighborClass {
    Reconnected,
    Communicating,
}

impl NeighborClass {
    pub fn label(self) -> &'static str {
        match self {
            NeighborClass::Reconnected => "Reconnected",
            NeighborClass::Communicating => "Communicating",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Neighbor {
    pub meter_id: String,
    pub distance_m: u64,
    pub classification: NeighborClass,
    /// Where to draw the marker. Equal to the stored coordinates unless the
    /// neighbour sits on top of the focal meter.
    pub display_lat: f64,
    pub display_lon: f64,
}

impl Neighbor {
    pub fn to_row(&self) -> NeighborRow {
        NeighborRow {
            meter_id: self.meter_id.clone(),
            classification: self.classification.label().to_string(),
            distance_m: self.distance_m,
        }
    }
}

/// Great-circle distance in metres (haversine).
pub fn haversine_m(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let p1 = lat1.to_radians();
    let p2 = lat2.to_radians();
    let dp = (lat2 - lat1).to_radians();
    let dl = (lon2 - lon1).to_radians();
    let a = (dp / 2.0).sin().powi(2) + p1.cos() * p2.cos() * (dl / 2.0).sin().powi(2);
    EARTH_RADIUS_M * 2.0 * a.sqrt().atan2((1.0 - a).sqrt())
}

fn classify_neighbor(r: &MeterRecord) -> Option<NeighborClass> {
    if r.status == StatusKind::Reconnected {
        Some(NeighborClass::Reconnected)
    } else if r.comm == CommState::Communicating {
        Some(NeighborClass::Communicating)
    } else {
        None
    }
}

/// Reconnected or communicating meters within `radius_m` of `focal`.
///
/// `focal` is skipped by identity, so pass a reference into `records`.
/// Neighbours at the focal meter's exact position get a random display offset
/// drawn from `rng`; their reported distance is unaffected. Results are
/// ordered by distance, then meter id. A focal meter without coordinates has
/// no neighbours, and neither does a non-finite radius.
pub fn find_neighbors<R>(
    focal: &MeterRecord,
    records: &[MeterRecord],
    radius_m: f64,
    rng: &mut R,
) -> Vec<Neighbor>
where
    R: Rng + ?Sized,
{
    let Some((lat, lon)) = focal.coordinates() else {
        debug!(meter_id = %focal.meter_id, "focal meter has no coordinates");
        return Vec::new();
    };
    if !radius_m.is_finite() {
        debug!(radius_m, "non-finite proximity radius");
        return Vec::new();
    }

    let mut out: Vec<Neighbor> = Vec::new();
    for candidate in records {
        if std::ptr::eq(candidate, focal) {
            continue;
        }
        let Some((n_lat, n_lon)) = candidate.coordinates() else {
            continue;
        };
        let dist = haversine_m(lat, lon, n_lat, n_lon);
        if dist > radius_m {
            continue;
        }
        let Some(classification) = classify_neighbor(candidate) else {
            continue;
        };

        let coincident =
            (n_lat - lat).abs() < COINCIDENT_DEGREES && (n_lon - lon).abs() < COINCIDENT_DEGREES;
        let (display_lat, display_lon) = if coincident {
            (
                n_lat + rng.gen_range(-JITTER_DEGREES..=JITTER_DEGREES),
                n_lon + rng.gen_range(-JITTER_DEGREES..=JITTER_DEGREES),
            )
        } else {
            (n_lat, n_lon)
        };

        out.push(Neighbor {
            meter_id: candidate.meter_id.clone(),
            distance_m: dist.round() as u64,
            classification,
            display_lat,
            display_lon,
        });
    }

    out.sort_by(|a, b| {
        a.distance_m
            .cmp(&b.distance_m)
            .then_with(|| a.meter_id.cmp(&b.meter_id))
    });
    debug!(
        meter_id = %focal.meter_id,
        radius_m,
        neighbors = out.len(),
        "proximity scan finished"
    );
    out
}
