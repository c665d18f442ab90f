use crate::util::{normalize_header, parse_date, parse_f64_safe};
use chrono::NaiveDateTime;
use once_cell::sync::Lazy;
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use tabled::Tabled;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum Field {
    MeterId,
    ConsumerNo,
    Region,
    Circle,
    Division,
    Zone,
    Status,
    DisconnectionDate,
    ReconnectionDate,
    CommStatus,
    CommMedium,
    Latitude,
    Longitude,
}

/// Accepted header spellings, in normalized form (see [`normalize_header`]).
static FIELD_ALIASES: Lazy<HashMap<&'static str, Field>> = Lazy::new(|| {
    use Field::*;
    HashMap::from([
        ("meter_id", MeterId),
        ("meter id", MeterId),
        ("meter no", MeterId),
        ("consumer_no", ConsumerNo),
        ("consumer no", ConsumerNo),
        ("region name", Region),
        ("region", Region),
        ("circle name", Circle),
        ("circle", Circle),
        ("division name", Division),
        ("division", Division),
        ("zone/dc name", Zone),
        ("zone/dc", Zone),
        ("zone", Zone),
        ("status", Status),
        ("disc. date", DisconnectionDate),
        ("disconnection date", DisconnectionDate),
        ("reconnection date", ReconnectionDate),
        ("recon. date", ReconnectionDate),
        ("comm status", CommStatus),
        ("comm medium", CommMedium),
        ("latitute", Latitude),
        ("latitude", Latitude),
        ("longitude", Longitude),
    ])
});

/// Stored status text classified once at ingestion.
///
/// Matching is case-insensitive substring containment, checked in the order
/// reconnected, disconnected, pending.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum StatusKind {
    Reconnected,
    Disconnected,
    Pending,
    Unknown,
}

impl StatusKind {
    pub fn classify(text: &str) -> Self {
        let t = text.to_lowercase();
        if t.contains("reconnected") {
            StatusKind::Reconnected
        } else if t.contains("disconnected") {
            StatusKind::Disconnected
        } else if t.contains("pending") {
            StatusKind::Pending
        } else {
            StatusKind::Unknown
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum CommState {
    Communicating,
    NonCommunicating,
    /// Blank comm-status cell.
    Unknown,
}

impl CommState {
    pub fn classify(text: &str) -> Self {
        let t = text.trim().to_lowercase();
        if t.is_empty() {
            CommState::Unknown
        } else if t.contains("non") {
            CommState::NonCommunicating
        } else {
            CommState::Communicating
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum CommMedium {
    Rf,
    Cellular,
    Other,
}

impl CommMedium {
    pub fn classify(text: &str) -> Self {
        let t = text.to_lowercase();
        if t.contains("rf") {
            CommMedium::Rf
        } else if t.contains("cell") {
            CommMedium::Cellular
        } else {
            CommMedium::Other
        }
    }
}

/// A meter row resolved into typed fields. Built once per row; the engine
/// only ever reads it.
#[derive(Debug, Clone, Serialize)]
pub struct MeterRecord {
    pub meter_id: String,
    pub consumer_no: String,
    pub region: String,
    pub circle: String,
    pub division: String,
    pub zone: String,
    pub status_text: String,
    pub status: StatusKind,
    pub disconnection_date: Option<NaiveDateTime>,
    pub reconnection_date: Option<NaiveDateTime>,
    pub comm_status: String,
    pub comm: CommState,
    pub comm_medium: String,
    pub medium: CommMedium,
    pub lat: Option<f64>,
    pub lon: Option<f64>,
}

impl MeterRecord {
    /// Resolve `(header, value)` cells through the alias table. Headers
    /// outside the table are ignored. When two aliased columns are both
    /// present the first non-blank value in iteration order wins.
    pub fn from_pairs<'a, I>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let mut cells: HashMap<Field, &'a str> = HashMap::new();
        for (header, value) in pairs {
            let Some(field) = FIELD_ALIASES.get(normalize_header(header).as_str()) else {
                continue;
            };
            let value = value.trim();
            if value.is_empty() {
                continue;
            }
            cells.entry(*field).or_insert(value);
        }
        let text = |f: Field| cells.get(&f).copied().unwrap_or("").to_string();

        let status_text = text(Field::Status);
        let comm_status = text(Field::CommStatus);
        let comm_medium = text(Field::CommMedium);

        let (lat, lon) = match (
            parse_f64_safe(cells.get(&Field::Latitude).copied()),
            parse_f64_safe(cells.get(&Field::Longitude).copied()),
        ) {
            (Some(lat), Some(lon))
                if (-90.0..=90.0).contains(&lat) && (-180.0..=180.0).contains(&lon) =>
            {
                (Some(lat), Some(lon))
            }
            _ => (None, None),
        };

        MeterRecord {
            meter_id: text(Field::MeterId),
            consumer_no: text(Field::ConsumerNo),
            region: text(Field::Region),
            circle: text(Field::Circle),
            division: text(Field::Division),
            zone: text(Field::Zone),
            status: StatusKind::classify(&status_text),
            status_text,
            disconnection_date: parse_date(cells.get(&Field::DisconnectionDate).copied()),
            reconnection_date: parse_date(cells.get(&Field::ReconnectionDate).copied()),
            comm: CommState::classify(&comm_status),
            comm_status,
            medium: CommMedium::classify(&comm_medium),
            comm_medium,
            lat,
            lon,
        }
    }

    pub fn coordinates(&self) -> Option<(f64, f64)> {
        self.lat.zip(self.lon)
    }

    pub fn level_value(&self, level: Level) -> &str {
        match level {
            Level::Region => &self.region,
            Level::Circle => &self.circle,
            Level::Division => &self.division,
            Level::Zone => &self.zone,
        }
    }
}

/// One level of the administrative tree, top to bottom.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Level {
    Region,
    Circle,
    Division,
    Zone,
}

impl Level {
    pub fn child(self) -> Option<Level> {
        match self {
            Level::Region => Some(Level::Circle),
            Level::Circle => Some(Level::Division),
            Level::Division => Some(Level::Zone),
            Level::Zone => None,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Level::Region => "Region",
            Level::Circle => "Circle",
            Level::Division => "Division",
            Level::Zone => "Zone",
        }
    }
}

/// Elapsed time since disconnection, most overdue first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum AgingBucket {
    #[serde(rename = "Above 3 Months")]
    AboveThreeMonths,
    #[serde(rename = "Above 2 Months")]
    AboveTwoMonths,
    #[serde(rename = "Above 1 Month")]
    AboveOneMonth,
    #[serde(rename = "Above 15 Days")]
    AboveFifteenDays,
    #[serde(rename = "Below 15 Days")]
    BelowFifteenDays,
    Unknown,
}

impl AgingBucket {
    /// The five dated buckets in display order.
    pub const ORDERED: [AgingBucket; 5] = [
        AgingBucket::AboveThreeMonths,
        AgingBucket::AboveTwoMonths,
        AgingBucket::AboveOneMonth,
        AgingBucket::AboveFifteenDays,
        AgingBucket::BelowFifteenDays,
    ];

    pub fn from_elapsed_days(days: i64) -> Self {
        match days {
            d if d > 90 => AgingBucket::AboveThreeMonths,
            d if d > 60 => AgingBucket::AboveTwoMonths,
            d if d > 30 => AgingBucket::AboveOneMonth,
            d if d > 15 => AgingBucket::AboveFifteenDays,
            _ => AgingBucket::BelowFifteenDays,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            AgingBucket::AboveThreeMonths => "Above 3 Months",
            AgingBucket::AboveTwoMonths => "Above 2 Months",
            AgingBucket::AboveOneMonth => "Above 1 Month",
            AgingBucket::AboveFifteenDays => "Above 15 Days",
            AgingBucket::BelowFifteenDays => "Below 15 Days",
            AgingBucket::Unknown => "Unknown",
        }
    }
}

impl fmt::Display for AgingBucket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for AgingBucket {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        AgingBucket::ORDERED
            .into_iter()
            .chain([AgingBucket::Unknown])
            .find(|b| b.label().eq_ignore_ascii_case(s))
            .ok_or_else(|| format!("unknown aging bucket '{}'", s))
    }
}

/// Reconnected / disconnected / pending tallies for one group.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatusCounts {
    pub reconnected: usize,
    pub disconnected: usize,
    pub pending: usize,
    pub total: usize,
}

impl StatusCounts {
    pub fn add(&mut self, other: &StatusCounts) {
        self.reconnected += other.reconnected;
        self.disconnected += other.disconnected;
        self.pending += other.pending;
        self.total += other.total;
    }
}

#[derive(Debug, Serialize, Tabled, Clone)]
pub struct ProgressRow {
    #[tabled(rename = "Group")]
    pub group: String,
    #[tabled(rename = "Reconnected")]
    pub reconnected: usize,
    #[tabled(rename = "Disconnected")]
    pub disconnected: usize,
    #[tabled(rename = "Pending")]
    pub pending: usize,
    #[tabled(rename = "Total")]
    pub total: usize,
}

#[derive(Debug, Serialize, Tabled, Clone)]
pub struct KpiRow {
    #[tabled(rename = "KPI")]
    pub kpi: String,
    #[tabled(rename = "Count")]
    pub count: String,
    #[tabled(rename = "Cell")]
    pub cellular: String,
    #[tabled(rename = "RF")]
    pub rf: String,
}

#[derive(Debug, Serialize, Tabled, Clone)]
pub struct TrendRow {
    #[tabled(rename = "Month")]
    pub month: String,
    #[tabled(rename = "Disconnections")]
    pub disconnections: usize,
    #[tabled(rename = "Reconnections")]
    pub reconnections: usize,
}

#[derive(Debug, Serialize, Tabled, Clone)]
pub struct ShareRow {
    #[tabled(rename = "Value")]
    pub value: String,
    #[tabled(rename = "Count")]
    pub count: usize,
    #[tabled(rename = "Share %")]
    pub share: String,
}

#[derive(Debug, Serialize, Tabled, Clone)]
pub struct MapPointRow {
    #[tabled(rename = "Meter")]
    pub meter_id: String,
    #[tabled(rename = "Consumer")]
    pub consumer_no: String,
    #[tabled(rename = "Zone")]
    pub zone: String,
    #[tabled(rename = "Aging")]
    pub aging: String,
    #[tabled(rename = "Comm Status")]
    pub comm_status: String,
    #[tabled(rename = "Lat")]
    pub lat: f64,
    #[tabled(rename = "Lon")]
    pub lon: f64,
}

#[derive(Debug, Serialize, Tabled, Clone)]
pub struct NeighborRow {
    #[tabled(rename = "Meter")]
    pub meter_id: String,
    #[tabled(rename = "Status")]
    pub classification: String,
    #[tabled(rename = "Distance (m)")]
    pub distance_m: u64,
}
