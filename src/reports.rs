use crate::filter::{grouping_level, AnnotatedRecord, CountBasis, HierarchyFilter, MapFilter};
use crate::types::{
    AgingBucket, CommMedium, KpiRow, Level, MapPointRow, ProgressRow, ShareRow, StatusCounts,
    StatusKind, TrendRow,
};
use crate::util::{format_int, format_number, or_unknown};
use chrono::{Datelike, NaiveDate, NaiveDateTime};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};

/// Which tallies one annotated record feeds.
fn tally(a: &AnnotatedRecord<'_>, basis: CountBasis) -> StatusCounts {
    let mut c = StatusCounts::default();
    if a.flags.recon_date_valid && a.effective_status == StatusKind::Reconnected {
        c.reconnected = 1;
    }
    if a.flags.counts_toward(basis) {
        match a.effective_status {
            StatusKind::Disconnected => c.disconnected = 1,
            StatusKind::Pending => c.pending = 1,
            _ => {}
        }
    }
    c.total = c.reconnected + c.disconnected + c.pending;
    c
}

#[derive(Debug, Clone, Serialize)]
pub struct ChildRollup {
    pub name: String,
    pub counts: StatusCounts,
}

#[derive(Debug, Clone, Serialize)]
pub struct GroupRollup {
    pub name: String,
    pub counts: StatusCounts,
    /// Empty when grouping at the lowest level.
    pub children: Vec<ChildRollup>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ProgressReport {
    pub level: Level,
    pub child_level: Option<Level>,
    pub groups: Vec<GroupRollup>,
    pub grand_total: StatusCounts,
}

impl ProgressReport {
    /// Flattened table: each parent followed by its children, then the
    /// grand total.
    pub fn rows(&self) -> Vec<ProgressRow> {
        let row = |name: String, c: &StatusCounts| ProgressRow {
            group: name,
            reconnected: c.reconnected,
            disconnected: c.disconnected,
            pending: c.pending,
            total: c.total,
        };
        let mut out = Vec::new();
        for g in &self.groups {
            out.push(row(g.name.clone(), &g.counts));
            for c in &g.children {
                out.push(row(format!("  ↳ {}", c.name), &c.counts));
            }
        }
        out.push(row("Grand Total".to_string(), &self.grand_total));
        out
    }
}

/// Reconnected / disconnected / pending rollup at the level implied by the
/// hierarchy selection, with one nested rollup per parent at the next level
/// down.
pub fn progress_report(
    data: &[AnnotatedRecord<'_>],
    filter: &HierarchyFilter,
    basis: CountBasis,
) -> ProgressReport {
    #[derive(Default)]
    struct Acc {
        counts: StatusCounts,
        children: BTreeMap<String, StatusCounts>,
    }

    let level = grouping_level(filter);
    let child_level = level.child();
    let mut map: BTreeMap<String, Acc> = BTreeMap::new();
    for a in data {
        let c = tally(a, basis);
        let e = map
            .entry(or_unknown(a.record.level_value(level)).to_string())
            .or_default();
        e.counts.add(&c);
        if let Some(child) = child_level {
            e.children
                .entry(or_unknown(a.record.level_value(child)).to_string())
                .or_default()
                .add(&c);
        }
    }

    let mut grand_total = StatusCounts::default();
    let groups = map
        .into_iter()
        .map(|(name, acc)| {
            grand_total.add(&acc.counts);
            GroupRollup {
                name,
                counts: acc.counts,
                children: acc
                    .children
                    .into_iter()
                    .map(|(name, counts)| ChildRollup { name, counts })
                    .collect(),
            }
        })
        .collect();

    ProgressReport { level, child_level, groups, grand_total }
}

#[derive(Debug, Clone, Serialize)]
pub struct AgingMatrixRow {
    pub bucket: AgingBucket,
    pub cells: Vec<usize>,
    pub total: usize,
}

/// Aging bucket × group count matrix over open disconnections.
#[derive(Debug, Clone, Serialize)]
pub struct AgingMatrix {
    pub level: Level,
    pub columns: Vec<String>,
    pub rows: Vec<AgingMatrixRow>,
    pub column_totals: Vec<usize>,
    pub grand_total: usize,
    /// Open disconnections without a usable date. Not part of the grid.
    pub unaged: usize,
}

impl AgingMatrix {
    /// Rows as string cells, header first, for plain table rendering.
    pub fn table(&self) -> Vec<Vec<String>> {
        let mut header = vec!["Aging Bucket".to_string()];
        header.extend(self.columns.iter().cloned());
        header.push("Total".to_string());

        let mut out = vec![header];
        for r in &self.rows {
            let mut line = vec![r.bucket.label().to_string()];
            line.extend(r.cells.iter().map(|c| format_int(*c)));
            line.push(format_int(r.total));
            out.push(line);
        }
        let mut totals = vec!["Grand Total".to_string()];
        totals.extend(self.column_totals.iter().map(|c| format_int(*c)));
        totals.push(format_int(self.grand_total));
        out.push(totals);
        out
    }
}

pub fn aging_matrix(
    data: &[AnnotatedRecord<'_>],
    level: Level,
    basis: CountBasis,
    now: NaiveDateTime,
) -> AgingMatrix {
    let open: Vec<&AnnotatedRecord<'_>> = data
        .iter()
        .filter(|a| a.is_open_disconnection(basis))
        .collect();

    let columns: Vec<String> = open
        .iter()
        .map(|a| or_unknown(a.record.level_value(level)).to_string())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect();

    let mut grid = vec![vec![0usize; columns.len()]; AgingBucket::ORDERED.len()];
    let mut unaged = 0usize;
    for a in &open {
        let Some(row) = AgingBucket::ORDERED.iter().position(|b| *b == a.aging(now)) else {
            unaged += 1;
            continue;
        };
        let key = or_unknown(a.record.level_value(level));
        if let Ok(col) = columns.binary_search_by(|c| c.as_str().cmp(key)) {
            grid[row][col] += 1;
        }
    }

    let mut column_totals = vec![0usize; columns.len()];
    let rows: Vec<AgingMatrixRow> = AgingBucket::ORDERED
        .iter()
        .zip(grid)
        .map(|(bucket, cells)| {
            for (t, c) in column_totals.iter_mut().zip(&cells) {
                *t += c;
            }
            AgingMatrixRow { bucket: *bucket, total: cells.iter().sum(), cells }
        })
        .collect();
    let grand_total = rows.iter().map(|r| r.total).sum();

    AgingMatrix { level, columns, rows, column_totals, grand_total, unaged }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct KpiCount {
    pub count: usize,
    pub rf: usize,
    pub cellular: usize,
}

impl KpiCount {
    fn push(&mut self, medium: CommMedium) {
        self.count += 1;
        match medium {
            CommMedium::Rf => self.rf += 1,
            CommMedium::Cellular => self.cellular += 1,
            CommMedium::Other => {}
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct KpiSummary {
    pub total_disconnections: KpiCount,
    pub reconnected: KpiCount,
    pub disconnected: KpiCount,
    pub pending: KpiCount,
    pub disconnected_today: KpiCount,
    pub reconnected_today: KpiCount,
}

impl KpiSummary {
    pub fn rows(&self) -> Vec<KpiRow> {
        [
            ("Total Disconnections", &self.total_disconnections),
            ("Reconnected", &self.reconnected),
            ("Disconnected", &self.disconnected),
            ("Pending", &self.pending),
            ("Disconnected Today", &self.disconnected_today),
            ("Reconnected Today", &self.reconnected_today),
        ]
        .into_iter()
        .map(|(label, k)| KpiRow {
            kpi: label.to_string(),
            count: format_int(k.count),
            cellular: format_int(k.cellular),
            rf: format_int(k.rf),
        })
        .collect()
    }
}

/// Headline counts with RF / cellular split. "Today" is the calendar day of
/// `now`, independent of the window.
pub fn kpi_summary(
    data: &[AnnotatedRecord<'_>],
    basis: CountBasis,
    now: NaiveDateTime,
) -> KpiSummary {
    let today = now.date();
    let on_today = |d: Option<NaiveDateTime>| d.is_some_and(|d| d.date() == today);

    let mut k = KpiSummary::default();
    for a in data {
        let medium = a.record.medium;
        let c = tally(a, basis);
        if a.flags.counts_toward(basis) {
            k.total_disconnections.push(medium);
        }
        if c.reconnected > 0 {
            k.reconnected.push(medium);
        }
        if c.disconnected > 0 {
            k.disconnected.push(medium);
        }
        if c.pending > 0 {
            k.pending.push(medium);
        }
        if on_today(a.record.disconnection_date) {
            k.disconnected_today.push(medium);
        }
        if on_today(a.record.reconnection_date) && a.effective_status == StatusKind::Reconnected {
            k.reconnected_today.push(medium);
        }
    }
    k
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TrendPoint {
    /// First day of the month.
    pub month: NaiveDate,
    pub disconnections: usize,
    pub reconnections: usize,
}

impl TrendPoint {
    pub fn to_row(&self) -> TrendRow {
        TrendRow {
            month: self.month.format("%b %Y").to_string(),
            disconnections: self.disconnections,
            reconnections: self.reconnections,
        }
    }
}

/// Disconnections and reconnections per calendar month, oldest first.
pub fn monthly_trend(data: &[AnnotatedRecord<'_>]) -> Vec<TrendPoint> {
    let month_of = |d: NaiveDateTime| NaiveDate::from_ymd_opt(d.year(), d.month(), 1);
    let mut months: BTreeMap<NaiveDate, (usize, usize)> = BTreeMap::new();
    for a in data {
        if a.flags.disc_date_valid {
            if let Some(m) = a.record.disconnection_date.and_then(month_of) {
                months.entry(m).or_default().0 += 1;
            }
        }
        if a.flags.recon_date_valid && a.effective_status == StatusKind::Reconnected {
            if let Some(m) = a.record.reconnection_date.and_then(month_of) {
                months.entry(m).or_default().1 += 1;
            }
        }
    }
    months
        .into_iter()
        .map(|(month, (disconnections, reconnections))| TrendPoint {
            month,
            disconnections,
            reconnections,
        })
        .collect()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Distribution {
    /// `(value, count)`, largest first, ties by value.
    pub entries: Vec<(String, usize)>,
    pub total: usize,
}

impl Distribution {
    fn from_counts(counts: BTreeMap<String, usize>) -> Self {
        let total = counts.values().sum();
        let mut entries: Vec<(String, usize)> = counts.into_iter().collect();
        entries.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        Distribution { entries, total }
    }

    pub fn rows(&self) -> Vec<ShareRow> {
        self.entries
            .iter()
            .map(|(value, count)| {
                let share = if self.total == 0 {
                    0.0
                } else {
                    *count as f64 * 100.0 / self.total as f64
                };
                ShareRow { value: value.clone(), count: *count, share: format_number(share, 1) }
            })
            .collect()
    }
}

/// Basis-valid records per value of the grouping level.
pub fn group_distribution(
    data: &[AnnotatedRecord<'_>],
    level: Level,
    basis: CountBasis,
) -> Distribution {
    let mut counts: BTreeMap<String, usize> = BTreeMap::new();
    for a in data.iter().filter(|a| a.flags.counts_toward(basis)) {
        *counts.entry(or_unknown(a.record.level_value(level)).to_string()).or_default() += 1;
    }
    Distribution::from_counts(counts)
}

/// Open disconnections per raw comm-status text.
pub fn comm_status_distribution(data: &[AnnotatedRecord<'_>], basis: CountBasis) -> Distribution {
    let mut counts: BTreeMap<String, usize> = BTreeMap::new();
    for a in data.iter().filter(|a| a.is_open_disconnection(basis)) {
        *counts.entry(or_unknown(&a.record.comm_status).to_string()).or_default() += 1;
    }
    Distribution::from_counts(counts)
}

#[derive(Debug, Clone, Serialize)]
pub struct MapPoint {
    pub meter_id: String,
    pub consumer_no: String,
    pub zone: String,
    pub aging: AgingBucket,
    pub comm_status: String,
    pub lat: f64,
    pub lon: f64,
}

impl MapPoint {
    pub fn to_row(&self) -> MapPointRow {
        MapPointRow {
            meter_id: self.meter_id.clone(),
            consumer_no: self.consumer_no.clone(),
            zone: self.zone.clone(),
            aging: self.aging.label().to_string(),
            comm_status: or_unknown(&self.comm_status).to_string(),
            lat: self.lat,
            lon: self.lon,
        }
    }
}

/// Open disconnections to plot, narrowed by the map filters. Records without
/// valid coordinates are left out.
pub fn map_points(
    data: &[AnnotatedRecord<'_>],
    map: &MapFilter,
    basis: CountBasis,
    now: NaiveDateTime,
) -> Vec<MapPoint> {
    data.iter()
        .filter(|a| a.is_open_disconnection(basis))
        .filter(|a| map.comm.matches(a.record.comm))
        .filter(|a| map.zone.matches(&a.record.zone))
        .filter_map(|a| {
            let aging = a.aging(now);
            if map.aging.is_some_and(|wanted| wanted != aging) {
                return None;
            }
            let (lat, lon) = a.record.coordinates()?;
            Some(MapPoint {
                meter_id: a.record.meter_id.clone(),
                consumer_no: a.record.consumer_no.clone(),
                zone: a.record.zone.clone(),
                aging,
                comm_status: a.record.comm_status.clone(),
                lat,
                lon,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::{apply_filters, QueryContext, ReportWindow};
    use crate::types::MeterRecord;
    use crate::util::start_of_day;

    fn now() -> NaiveDateTime {
        start_of_day(NaiveDate::from_ymd_opt(2024, 6, 1).unwrap())
    }

    #[allow(clippy::too_many_arguments)]
    fn meter(
        region: &str,
        circle: &str,
        division: &str,
        zone: &str,
        status: &str,
        disc: &str,
        recon: &str,
        medium: &str,
    ) -> MeterRecord {
        MeterRecord::from_pairs([
            ("Region Name", region),
            ("Circle Name", circle),
            ("Division Name", division),
            ("Zone/DC Name", zone),
            ("Status", status),
            ("Disc. Date", disc),
            ("Reconnection Date", recon),
            ("Comm Medium", medium),
            ("Comm Status", "Non Communicating"),
            ("Latitude", "28.61"),
            ("Longitude", "77.20"),
        ])
    }

    fn sample() -> Vec<MeterRecord> {
        vec![
            meter("North", "C1", "D1", "Z1", "Disconnected", "2024-05-25", "", "RF"),
            meter("North", "C1", "D1", "Z2", "Disconnected", "2024-02-01", "", "Cellular"),
            meter("North", "C2", "D2", "Z3", "Pending", "2024-04-20", "", "RF"),
            meter("North", "C2", "D2", "Z3", "Reconnected", "2024-03-01", "2024-05-10", "RF"),
            meter("South", "C3", "D3", "Z4", "Disconnected", "2024-04-15", "", ""),
            meter("", "", "", "", "Disconnected", "2024-05-31", "", ""),
            meter("South", "C3", "D3", "Z4", "Reconnected", "2024-01-01", "2024-06-01", "Cellular"),
        ]
    }

    fn assert_rollup_consistent(r: &ProgressReport) {
        let mut sum = StatusCounts::default();
        for g in &r.groups {
            assert_eq!(
                g.counts.total,
                g.counts.reconnected + g.counts.disconnected + g.counts.pending
            );
            if r.child_level.is_some() {
                let child_total: usize = g.children.iter().map(|c| c.counts.total).sum();
                assert_eq!(child_total, g.counts.total, "group {}", g.name);
            }
            sum.add(&g.counts);
        }
        assert_eq!(sum, r.grand_total);
    }

    #[test]
    fn progress_rolls_up_by_region_with_circle_children() {
        let records = sample();
        let ctx = QueryContext::new(now());
        let data = apply_filters(&records, &ctx);
        let r = progress_report(&data, &ctx.hierarchy, ctx.count_basis);
        assert_eq!(r.level, Level::Region);
        assert_eq!(r.child_level, Some(Level::Circle));
        let names: Vec<_> = r.groups.iter().map(|g| g.name.as_str()).collect();
        assert_eq!(names, vec!["North", "South", "Unknown"]);
        let north = &r.groups[0];
        assert_eq!(
            north.counts,
            StatusCounts { reconnected: 1, disconnected: 2, pending: 1, total: 4 }
        );
        assert_eq!(north.children.len(), 2);
        assert_eq!(r.grand_total.total, 7);
        assert_rollup_consistent(&r);
    }

    #[test]
    fn narrowing_to_a_division_groups_by_zone_without_children() {
        let records = sample();
        let mut ctx = QueryContext::new(now());
        ctx.hierarchy.division = "D1".into();
        let data = apply_filters(&records, &ctx);
        let r = progress_report(&data, &ctx.hierarchy, ctx.count_basis);
        assert_eq!(r.level, Level::Zone);
        assert_eq!(r.child_level, None);
        assert!(r.groups.iter().all(|g| g.children.is_empty()));
        assert_eq!(r.grand_total.disconnected, 2);
        assert_rollup_consistent(&r);
    }

    #[test]
    fn time_travel_moves_late_reconnections_into_backlog() {
        let records = sample();
        let mut ctx = QueryContext::new(now());
        ctx.window = ReportWindow::from_dates(
            NaiveDate::from_ymd_opt(2024, 4, 1),
            NaiveDate::from_ymd_opt(2024, 4, 30),
        );
        let data = apply_filters(&records, &ctx);
        let r = progress_report(&data, &ctx.hierarchy, ctx.count_basis);
        // Both reconnections happen after 30 April, so both meters were still
        // disconnected then.
        assert_eq!(r.grand_total.reconnected, 0);
        assert_eq!(r.grand_total.disconnected, 4);
        assert_eq!(r.grand_total.pending, 1);
        assert_rollup_consistent(&r);

        let windowed = progress_report(&data, &ctx.hierarchy, CountBasis::Window);
        assert_eq!(windowed.grand_total.disconnected, 1);
        assert_eq!(windowed.grand_total.pending, 1);
    }

    #[test]
    fn empty_input_is_a_zero_filled_report() {
        let ctx = QueryContext::new(now());
        let r = progress_report(&[], &ctx.hierarchy, ctx.count_basis);
        assert!(r.groups.is_empty());
        assert_eq!(r.grand_total, StatusCounts::default());
        assert_eq!(r.rows().len(), 1);

        let m = aging_matrix(&[], Level::Region, ctx.count_basis, ctx.now);
        assert!(m.columns.is_empty());
        assert_eq!(m.rows.len(), 5);
        assert_eq!(m.grand_total, 0);
    }

    #[test]
    fn aging_matrix_totals_are_consistent() {
        let records = sample();
        let ctx = QueryContext::new(now());
        let data = apply_filters(&records, &ctx);
        let m = aging_matrix(&data, Level::Region, ctx.count_basis, ctx.now);
        assert_eq!(m.columns, vec!["North", "South", "Unknown"]);

        let open = data.iter().filter(|a| a.is_open_disconnection(ctx.count_basis)).count();
        let cell_sum: usize = m.rows.iter().flat_map(|r| r.cells.iter()).sum();
        assert_eq!(cell_sum, open);
        assert_eq!(m.grand_total, open);
        for r in &m.rows {
            assert_eq!(r.total, r.cells.iter().sum::<usize>());
        }
        for (i, t) in m.column_totals.iter().enumerate() {
            assert_eq!(*t, m.rows.iter().map(|r| r.cells[i]).sum::<usize>());
        }
        // North: 2024-05-25 is 7 days old, 2024-02-01 is 121 days old.
        let north = 0;
        assert_eq!(m.rows[0].cells[north], 1);
        assert_eq!(m.rows[4].cells[north], 1);
        assert_eq!(m.table().len(), 7);
    }

    #[test]
    fn kpis_split_by_medium() {
        let records = sample();
        let ctx = QueryContext::new(now());
        let data = apply_filters(&records, &ctx);
        let k = kpi_summary(&data, ctx.count_basis, ctx.now);
        assert_eq!(k.total_disconnections.count, 7);
        assert_eq!(k.disconnected, KpiCount { count: 4, rf: 1, cellular: 1 });
        assert_eq!(k.pending.count, 1);
        assert_eq!(k.reconnected.count, 2);
        assert_eq!(k.reconnected_today, KpiCount { count: 1, rf: 0, cellular: 1 });
        assert_eq!(k.disconnected_today.count, 0);
        assert_eq!(k.rows().len(), 6);
    }

    #[test]
    fn trend_is_chronological() {
        let records = sample();
        let ctx = QueryContext::new(now());
        let data = apply_filters(&records, &ctx);
        let t = monthly_trend(&data);
        let months: Vec<_> = t.iter().map(|p| p.to_row().month).collect();
        assert_eq!(
            months,
            vec!["Jan 2024", "Feb 2024", "Mar 2024", "Apr 2024", "May 2024", "Jun 2024"]
        );
        let may = &t[4];
        assert_eq!((may.disconnections, may.reconnections), (2, 1));
    }

    #[test]
    fn distributions_sum_to_total() {
        let records = sample();
        let ctx = QueryContext::new(now());
        let data = apply_filters(&records, &ctx);
        let g = group_distribution(&data, Level::Region, ctx.count_basis);
        assert_eq!(g.entries[0], ("North".to_string(), 4));
        assert_eq!(g.total, 7);
        let c = comm_status_distribution(&data, ctx.count_basis);
        assert_eq!(c.entries, vec![("Non Communicating".to_string(), 4)]);
        assert_eq!(c.rows()[0].share, "100.0");
    }

    #[test]
    fn map_points_respect_map_filters() {
        let records = sample();
        let mut ctx = QueryContext::new(now());
        let data = apply_filters(&records, &ctx);
        assert_eq!(map_points(&data, &ctx.map, ctx.count_basis, ctx.now).len(), 4);

        ctx.map.aging = Some(AgingBucket::AboveThreeMonths);
        let pts = map_points(&data, &ctx.map, ctx.count_basis, ctx.now);
        assert_eq!(pts.len(), 1);
        assert_eq!(pts[0].zone, "Z2");

        ctx.map.aging = None;
        ctx.map.zone = "Z4".into();
        assert_eq!(map_points(&data, &ctx.map, ctx.count_basis, ctx.now).len(), 1);

        ctx.map.zone = Default::default();
        ctx.map.comm = crate::filter::CommFilter::Comm;
        assert!(map_points(&data, &ctx.map, ctx.count_basis, ctx.now).is_empty());
    }
}
