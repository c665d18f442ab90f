use chrono::{NaiveDate, NaiveDateTime};
use dcrc_report::config::ReportConfig;
use dcrc_report::filter::{apply_filters, effective_status, CountBasis};
use dcrc_report::loader::load_from_reader;
use dcrc_report::proximity::{find_neighbors, NeighborClass};
use dcrc_report::reports::{aging_matrix, kpi_summary, progress_report};
use dcrc_report::util::start_of_day;
use dcrc_report::{AgingBucket, StatusKind};
use rand::rngs::StdRng;
use rand::SeedableRng;

const EXPORT: &str = "\
Region Name,Circle Name,Division Name,Zone/DC Name,meter_id,consumer_no,Status,disc. date,reconnection date,Comm Status,Comm Medium,Latitute,Longitude
East,C1,D1,Z1,M100,K100,Disconnected,2024-01-15,,Non Communicating,RF,28.61390,77.20900
East,C1,D1,Z1,M101,K101,Reconnected,01/10/2024,02/10/2024,Communicating,Cellular,28.61390,77.20900
East,C1,D2,Z2,M102,K102,Pending,01/20/2024,,Non Communicating,RF,28.70000,77.30000
West,C2,D3,Z3,M103,K103,Disconnected,12/01/2023,,Communicating,Cellular,19.07600,72.87770
West,C2,D3,Z3,M104,K104,Disconnected,#N/A,,Non Communicating,RF,19.07610,72.87770
West,C2,D3,Z3,M105,K105,Reconnected,11/01/2023,01/05/2024,Communicating,RF,,
";

fn now() -> NaiveDateTime {
    start_of_day(NaiveDate::from_ymd_opt(2024, 6, 1).unwrap())
}

#[test]
fn january_window_end_to_end() {
    let (records, load) = load_from_reader(EXPORT.as_bytes()).unwrap();
    assert_eq!(load.loaded_rows, 6);

    let cfg = ReportConfig::from_toml_str(
        "[filters]\nstart = \"2024-01-01\"\nend = \"2024-01-31\"\n",
    )
    .unwrap();
    let ctx = cfg.query_context(now()).unwrap();
    let data = apply_filters(&records, &ctx);

    // M104 has no usable dates at all and drops out of a bounded window.
    let ids: Vec<_> = data.iter().map(|a| a.record.meter_id.as_str()).collect();
    assert_eq!(ids, vec!["M100", "M101", "M102", "M103", "M105"]);

    // The February reconnection had not happened by 31 January.
    let m101 = data.iter().find(|a| a.record.meter_id == "M101").unwrap();
    assert_eq!(m101.effective_status, StatusKind::Disconnected);
    assert_eq!(effective_status(m101.record, ctx.as_of()), StatusKind::Disconnected);

    let m100 = data.iter().find(|a| a.record.meter_id == "M100").unwrap();
    assert!(m100.flags.disc_date_valid && m100.flags.backlog_member);
    assert_eq!(m100.aging(ctx.now), AgingBucket::AboveThreeMonths);

    let progress = progress_report(&data, &ctx.hierarchy, ctx.count_basis);
    assert_eq!(progress.grand_total.reconnected, 1);
    assert_eq!(progress.grand_total.disconnected, 3);
    assert_eq!(progress.grand_total.pending, 1);
    assert_eq!(progress.grand_total.total, 5);
    let east = &progress.groups[0];
    assert_eq!(east.name, "East");
    assert_eq!(east.children.iter().map(|c| c.counts.total).sum::<usize>(), east.counts.total);

    let matrix = aging_matrix(&data, ctx.grouping_level(), ctx.count_basis, ctx.now);
    assert_eq!(matrix.columns, vec!["East", "West"]);
    assert_eq!(matrix.grand_total, 3);
    assert_eq!(matrix.rows[0].cells, vec![2, 1]);

    let kpis = kpi_summary(&data, CountBasis::Window, ctx.now);
    assert_eq!(kpis.disconnected.count, 2);
    assert_eq!(kpis.pending.count, 1);
}

#[test]
fn unbounded_window_keeps_undated_rows_out_of_backlog() {
    let (records, _) = load_from_reader(EXPORT.as_bytes()).unwrap();
    let ctx = ReportConfig::default().query_context(now()).unwrap();
    let data = apply_filters(&records, &ctx);
    assert_eq!(data.len(), 6);
    for a in &data {
        let expected = a.record.disconnection_date.is_some_and(|d| d <= ctx.as_of());
        assert_eq!(a.flags.backlog_member, expected, "{}", a.record.meter_id);
    }

    // Window basis still counts the undated row; backlog basis does not.
    let backlog = progress_report(&data, &ctx.hierarchy, CountBasis::Backlog);
    let window = progress_report(&data, &ctx.hierarchy, CountBasis::Window);
    assert_eq!(window.grand_total.disconnected, backlog.grand_total.disconnected + 1);

    let m = aging_matrix(&data, ctx.grouping_level(), CountBasis::Window, ctx.now);
    assert_eq!(m.unaged, 1);
}

#[test]
fn proximity_scans_the_full_record_set() {
    let (records, _) = load_from_reader(EXPORT.as_bytes()).unwrap();
    let mut cfg = ReportConfig::default();
    cfg.filters.hierarchy.region = "West".into();
    let ctx = cfg.query_context(now()).unwrap();
    let data = apply_filters(&records, &ctx);
    assert!(data.iter().all(|a| a.record.region == "West"));

    // The focal meter is in East even though the filtered view is West only.
    let focal = records.iter().find(|r| r.meter_id == "M100").unwrap();
    let mut rng = StdRng::seed_from_u64(11);
    let neighbors = find_neighbors(focal, &records, ctx.proximity_radius_m, &mut rng);
    assert_eq!(neighbors.len(), 1);
    assert_eq!(neighbors[0].meter_id, "M101");
    assert_eq!(neighbors[0].classification, NeighborClass::Reconnected);
    assert_eq!(neighbors[0].distance_m, 0);

    let focal = records.iter().find(|r| r.meter_id == "M104").unwrap();
    let neighbors = find_neighbors(focal, &records, 100.0, &mut rng);
    let ids: Vec<_> = neighbors.iter().map(|n| n.meter_id.as_str()).collect();
    assert_eq!(ids, vec!["M103"]);
    assert_eq!(neighbors[0].classification, NeighborClass::Communicating);
    assert_eq!(neighbors[0].distance_m, 11);
}
