use crate::error::{Error, Result};
use crate::filter::{
    CommFilter, CountBasis, HierarchyFilter, MapFilter, QueryContext, ReportWindow, Selection,
    DEFAULT_PROXIMITY_RADIUS_M,
};
use crate::types::AgingBucket;
use chrono::{NaiveDate, NaiveDateTime};
use serde::Deserialize;
use std::fs;
use std::path::Path;

pub const CONFIG_ENV_VAR: &str = "DCRC_CONFIG";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct FilterConfig {
    #[serde(flatten)]
    pub hierarchy: HierarchyFilter,
    pub start: Option<NaiveDate>,
    pub end: Option<NaiveDate>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MapConfig {
    pub comm: CommFilter,
    pub zone: Selection,
    /// `"ALL"` or an aging bucket label such as `"Above 3 Months"`.
    pub aging: String,
}

impl Default for MapConfig {
    fn default() -> Self {
        MapConfig {
            comm: CommFilter::NonComm,
            zone: Selection::All,
            aging: "ALL".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ProximityConfig {
    pub radius_m: f64,
}

impl Default for ProximityConfig {
    fn default() -> Self {
        ProximityConfig { radius_m: DEFAULT_PROXIMITY_RADIUS_M }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ReportSection {
    pub count_basis: CountBasis,
}

/// Report settings as read from TOML. Every section is optional.
///
/// ```toml
/// [filters]
/// region = "North"
/// start = "2024-01-01"
/// end = "2024-01-31"
///
/// [map]
/// comm = "NonComm"
/// aging = "Above 3 Months"
///
/// [proximity]
/// radius_m = 200
/// ```
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ReportConfig {
    pub filters: FilterConfig,
    pub map: MapConfig,
    pub proximity: ProximityConfig,
    pub report: ReportSection,
}

impl ReportConfig {
    pub fn from_toml_str(s: &str) -> Result<Self> {
        Ok(toml::from_str(s)?)
    }

    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        Self::from_toml_str(&contents)
    }

    /// Explicit path, else `$DCRC_CONFIG`, else built-in defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(p) => Self::load_from_path(p),
            None => match std::env::var(CONFIG_ENV_VAR) {
                Ok(p) if !p.trim().is_empty() => Self::load_from_path(p.trim()),
                _ => Ok(Self::default()),
            },
        }
    }

    pub fn validate(&self) -> Result<()> {
        let r = self.proximity.radius_m;
        if !r.is_finite() || r <= 0.0 {
            return Err(Error::InvalidConfig(format!(
                "proximity.radius_m must be a positive number, got {}",
                r
            )));
        }
        if let (Some(s), Some(e)) = (self.filters.start, self.filters.end) {
            if s > e {
                return Err(Error::InvalidConfig(format!(
                    "filters.start ({}) is after filters.end ({})",
                    s, e
                )));
            }
        }
        parse_aging_selection(&self.map.aging)?;
        Ok(())
    }

    /// Validate and turn the settings into a query context evaluated at `now`.
    pub fn query_context(&self, now: NaiveDateTime) -> Result<QueryContext> {
        self.validate()?;
        Ok(QueryContext {
            hierarchy: self.filters.hierarchy.clone(),
            window: ReportWindow::from_dates(self.filters.start, self.filters.end),
            map: MapFilter {
                comm: self.map.comm,
                zone: self.map.zone.clone(),
                aging: parse_aging_selection(&self.map.aging)?,
            },
            proximity_radius_m: self.proximity.radius_m,
            count_basis: self.report.count_basis,
            now,
        })
    }
}

/// `"ALL"` (or blank) means no aging restriction.
pub fn parse_aging_selection(s: &str) -> Result<Option<AgingBucket>> {
    let s = s.trim();
    if s.is_empty() || s.eq_ignore_ascii_case("ALL") {
        return Ok(None);
    }
    s.parse::<AgingBucket>().map(Some).map_err(Error::InvalidConfig)
}
