//! Query context, temporal classification and point-in-time status.
//!
//! Every report starts here: [`apply_filters`] narrows the raw record set by
//! hierarchy selection, attaches the window-dependent flags and resolves each
//! record's status as of the window's reference date.
use crate::types::{AgingBucket, CommState, Level, MeterRecord, StatusKind};
use crate::util::{elapsed_days, end_of_day, start_of_day};
use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use tracing::debug;

pub const DEFAULT_PROXIMITY_RADIUS_M: f64 = 100.0;

/// `"ALL"` or one exact value of a dimension.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Selection {
    #[default]
    All,
    Only(String),
}

impl Selection {
    pub fn matches(&self, value: &str) -> bool {
        match self {
            Selection::All => true,
            Selection::Only(v) => value.trim() == v,
        }
    }

    pub fn is_narrowed(&self) -> bool {
        matches!(self, Selection::Only(_))
    }
}

impl From<&str> for Selection {
    fn from(s: &str) -> Self {
        let s = s.trim();
        if s.is_empty() || s.eq_ignore_ascii_case("ALL") {
            Selection::All
        } else {
            Selection::Only(s.to_string())
        }
    }
}

impl From<String> for Selection {
    fn from(s: String) -> Self {
        Selection::from(s.as_str())
    }
}

impl From<Selection> for String {
    fn from(s: Selection) -> Self {
        match s {
            Selection::All => "ALL".to_string(),
            Selection::Only(v) => v,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct HierarchyFilter {
    pub region: Selection,
    pub circle: Selection,
    pub division: Selection,
    pub zone: Selection,
}

impl HierarchyFilter {
    pub fn matches(&self, r: &MeterRecord) -> bool {
        self.region.matches(&r.region)
            && self.circle.matches(&r.circle)
            && self.division.matches(&r.division)
            && self.zone.matches(&r.zone)
    }
}

/// Rollup level implied by the narrowest active hierarchy selection.
pub fn grouping_level(filter: &HierarchyFilter) -> Level {
    if filter.zone.is_narrowed() || filter.division.is_narrowed() {
        Level::Zone
    } else if filter.circle.is_narrowed() {
        Level::Division
    } else if filter.region.is_narrowed() {
        Level::Circle
    } else {
        Level::Region
    }
}

/// Inclusive reporting window. Either bound may be open.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct ReportWindow {
    pub start: Option<NaiveDateTime>,
    pub end: Option<NaiveDateTime>,
}

impl ReportWindow {
    pub fn new(start: Option<NaiveDateTime>, end: Option<NaiveDateTime>) -> Self {
        ReportWindow { start, end }
    }

    /// Calendar-date bounds: `start` from its first instant, `end` through
    /// its last millisecond.
    pub fn from_dates(start: Option<NaiveDate>, end: Option<NaiveDate>) -> Self {
        ReportWindow {
            start: start.map(start_of_day),
            end: end.map(end_of_day),
        }
    }

    pub fn is_unbounded(&self) -> bool {
        self.start.is_none() && self.end.is_none()
    }

    /// Reference instant for point-in-time questions: the end bound, else the
    /// start bound, else the end of `now`'s day.
    pub fn as_of(&self, now: NaiveDateTime) -> NaiveDateTime {
        self.end
            .or(self.start)
            .unwrap_or_else(|| end_of_day(now.date()))
    }

    pub fn contains(&self, date: Option<NaiveDateTime>) -> bool {
        let Some(d) = date else {
            return false;
        };
        self.start.map_or(true, |s| d >= s) && self.end.map_or(true, |e| d <= e)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum CommFilter {
    #[serde(rename = "ALL")]
    All,
    Comm,
    #[default]
    NonComm,
}

impl CommFilter {
    pub fn matches(self, comm: CommState) -> bool {
        match self {
            CommFilter::All => true,
            CommFilter::Comm => comm != CommState::NonCommunicating,
            CommFilter::NonComm => comm == CommState::NonCommunicating,
        }
    }
}

impl FromStr for CommFilter {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "all" => Ok(CommFilter::All),
            "comm" => Ok(CommFilter::Comm),
            "noncomm" | "non-comm" => Ok(CommFilter::NonComm),
            other => Err(format!(
                "unknown comm filter '{}' (expected ALL, Comm or NonComm)",
                other
            )),
        }
    }
}

/// Which flag admits a record to the disconnected/pending tallies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CountBasis {
    /// Disconnection on or before the as-of date (point-in-time backlog).
    #[default]
    Backlog,
    /// Disconnection inside the window bounds.
    Window,
}

impl FromStr for CountBasis {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "backlog" => Ok(CountBasis::Backlog),
            "window" => Ok(CountBasis::Window),
            other => Err(format!("unknown count basis '{}' (expected backlog or window)", other)),
        }
    }
}

impl fmt::Display for CountBasis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CountBasis::Backlog => f.write_str("backlog"),
            CountBasis::Window => f.write_str("window"),
        }
    }
}

/// Post-hoc narrowing of the disconnected subset for spatial display.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct MapFilter {
    pub comm: CommFilter,
    pub zone: Selection,
    /// `None` shows every bucket.
    pub aging: Option<AgingBucket>,
}

/// Everything a report call depends on, passed explicitly.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryContext {
    pub hierarchy: HierarchyFilter,
    pub window: ReportWindow,
    pub map: MapFilter,
    pub proximity_radius_m: f64,
    pub count_basis: CountBasis,
    /// Wall-clock evaluation instant. Aging is measured against this, never
    /// against the window.
    pub now: NaiveDateTime,
}

impl QueryContext {
    pub fn new(now: NaiveDateTime) -> Self {
        QueryContext {
            hierarchy: HierarchyFilter::default(),
            window: ReportWindow::default(),
            map: MapFilter::default(),
            proximity_radius_m: DEFAULT_PROXIMITY_RADIUS_M,
            count_basis: CountBasis::default(),
            now,
        }
    }

    pub fn as_of(&self) -> NaiveDateTime {
        self.window.as_of(self.now)
    }

    pub fn grouping_level(&self) -> Level {
        grouping_level(&self.hierarchy)
    }
}

/// Window-dependent flags. Recomputed on every pass, never stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Annotations {
    pub disc_date_valid: bool,
    pub recon_date_valid: bool,
    pub backlog_member: bool,
}

impl Annotations {
    pub fn is_relevant(&self) -> bool {
        self.disc_date_valid || self.recon_date_valid || self.backlog_member
    }

    pub fn counts_toward(&self, basis: CountBasis) -> bool {
        match basis {
            CountBasis::Backlog => self.backlog_member,
            CountBasis::Window => self.disc_date_valid,
        }
    }
}

/// A caller-owned record viewed through one query context.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct AnnotatedRecord<'a> {
    pub record: &'a MeterRecord,
    pub flags: Annotations,
    pub effective_status: StatusKind,
}

impl AnnotatedRecord<'_> {
    pub fn aging(&self, now: NaiveDateTime) -> AgingBucket {
        aging_bucket(now, self.record.disconnection_date)
    }

    /// Disconnected as of the window and admitted by `basis`.
    pub fn is_open_disconnection(&self, basis: CountBasis) -> bool {
        self.effective_status == StatusKind::Disconnected && self.flags.counts_toward(basis)
    }
}

pub fn classify(record: &MeterRecord, window: &ReportWindow, now: NaiveDateTime) -> Annotations {
    let as_of = window.as_of(now);
    let (disc_date_valid, recon_date_valid) = if window.is_unbounded() {
        (true, true)
    } else {
        (
            window.contains(record.disconnection_date),
            window.contains(record.reconnection_date),
        )
    };
    Annotations {
        disc_date_valid,
        recon_date_valid,
        backlog_member: record.disconnection_date.is_some_and(|d| d <= as_of),
    }
}

/// Stored status rewound to `as_of`: a reconnection dated after `as_of` has
/// not happened yet, so the meter still counts as disconnected.
pub fn effective_status(record: &MeterRecord, as_of: NaiveDateTime) -> StatusKind {
    match (record.status, record.reconnection_date) {
        (StatusKind::Reconnected, Some(reconnected_at)) if reconnected_at > as_of => {
            StatusKind::Disconnected
        }
        (status, _) => status,
    }
}

pub fn aging_bucket(now: NaiveDateTime, disconnected_at: Option<NaiveDateTime>) -> AgingBucket {
    match disconnected_at {
        Some(d) => AgingBucket::from_elapsed_days(elapsed_days(d, now)),
        None => AgingBucket::Unknown,
    }
}

pub fn annotate<'a>(record: &'a MeterRecord, ctx: &QueryContext) -> AnnotatedRecord<'a> {
    AnnotatedRecord {
        record,
        flags: classify(record, &ctx.window, ctx.now),
        effective_status: effective_status(record, ctx.as_of()),
    }
}

/// Hierarchy selection plus temporal relevance. A record survives when it
/// matches every hierarchy selection and at least one of its flags is set.
pub fn apply_filters<'a>(
    records: &'a [MeterRecord],
    ctx: &QueryContext,
) -> Vec<AnnotatedRecord<'a>> {
    let out: Vec<AnnotatedRecord<'a>> = records
        .iter()
        .filter(|r| ctx.hierarchy.matches(r))
        .map(|r| annotate(r, ctx))
        .filter(|a| a.flags.is_relevant())
        .collect();
    debug!(
        total = records.len(),
        retained = out.len(),
        as_of = %ctx.as_of(),
        "applied report filters"
    );
    out
}
