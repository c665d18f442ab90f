// Command-line front end.
//
// Loads a meter CSV export, builds a query context from the config file and
// flags, and prints one report as a markdown table (or JSON with `--json`).
use chrono::{Local, NaiveDate, NaiveDateTime};
use clap::{Args, Parser, Subcommand};
use dcrc_report::config::{ReportConfig, CONFIG_ENV_VAR};
use dcrc_report::filter::{apply_filters, CommFilter, CountBasis, QueryContext};
use dcrc_report::proximity::find_neighbors;
use dcrc_report::types::MeterRecord;
use dcrc_report::util::{format_int, or_unknown, parse_date};
use dcrc_report::{loader, output, reports, Result};
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "dcrc-report")]
#[command(about = "Disconnection / reconnection reports over meter CSV exports", long_about = None)]
struct Cli {
    /// Meter CSV export (header row required)
    #[arg(short, long, global = true, default_value = "meters.csv")]
    input: PathBuf,

    /// TOML report settings
    #[arg(short, long, global = true, env = CONFIG_ENV_VAR)]
    config: Option<PathBuf>,

    /// Print JSON instead of tables
    #[arg(long, global = true)]
    json: bool,

    /// Write the JSON report to this file instead of stdout (implies --json)
    #[arg(short, long, global = true)]
    out: Option<PathBuf>,

    #[command(flatten)]
    filters: FilterArgs,

    #[command(subcommand)]
    command: Commands,
}

/// Overrides for values from the config file.
#[derive(Args)]
struct FilterArgs {
    #[arg(long, global = true)]
    region: Option<String>,
    #[arg(long, global = true)]
    circle: Option<String>,
    #[arg(long, global = true)]
    division: Option<String>,
    #[arg(long, global = true)]
    zone: Option<String>,
    /// First day of the reporting window (YYYY-MM-DD)
    #[arg(long, global = true)]
    start: Option<NaiveDate>,
    /// Last day of the reporting window, inclusive (YYYY-MM-DD)
    #[arg(long, global = true)]
    end: Option<NaiveDate>,
    /// ALL, Comm or NonComm
    #[arg(long, global = true)]
    map_comm: Option<CommFilter>,
    #[arg(long, global = true)]
    map_zone: Option<String>,
    /// ALL or an aging bucket label, e.g. "Above 3 Months"
    #[arg(long, global = true)]
    map_aging: Option<String>,
    #[arg(long, global = true)]
    radius_m: Option<f64>,
    /// backlog or window
    #[arg(long, global = true)]
    count_basis: Option<CountBasis>,
    /// Evaluation instant used for aging and "today" (defaults to now)
    #[arg(long, global = true, value_parser = parse_now)]
    now: Option<NaiveDateTime>,
}

#[derive(Subcommand)]
enum Commands {
    /// Load statistics and headline KPIs
    Summary,
    /// Reconnected / disconnected / pending rollup by hierarchy level
    Progress,
    /// Aging bucket by group matrix of open disconnections
    Aging,
    /// Disconnections and reconnections per month
    Trend,
    /// Share of records per group and per comm status
    Distribution,
    /// Open disconnections selected for the map
    Map {
        /// Maximum rows to print in table mode
        #[arg(short, long, default_value_t = 50)]
        limit: usize,
    },
    /// Reconnected or communicating meters near one meter
    Neighbors {
        #[arg(long)]
        meter_id: String,
        /// Seed for the overlap jitter; random when omitted
        #[arg(long)]
        seed: Option<u64>,
    },
}

fn parse_now(s: &str) -> std::result::Result<NaiveDateTime, String> {
    parse_date(Some(s)).ok_or_else(|| format!("cannot read '{}' as a date", s))
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("dcrc_report=info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn build_context(cli: &Cli) -> Result<QueryContext> {
    let mut cfg = ReportConfig::load(cli.config.as_deref())?;
    let f = &cli.filters;
    if let Some(v) = &f.region {
        cfg.filters.hierarchy.region = v.as_str().into();
    }
    if let Some(v) = &f.circle {
        cfg.filters.hierarchy.circle = v.as_str().into();
    }
    if let Some(v) = &f.division {
        cfg.filters.hierarchy.division = v.as_str().into();
    }
    if let Some(v) = &f.zone {
        cfg.filters.hierarchy.zone = v.as_str().into();
    }
    if f.start.is_some() {
        cfg.filters.start = f.start;
    }
    if f.end.is_some() {
        cfg.filters.end = f.end;
    }
    if let Some(v) = f.map_comm {
        cfg.map.comm = v;
    }
    if let Some(v) = &f.map_zone {
        cfg.map.zone = v.as_str().into();
    }
    if let Some(v) = &f.map_aging {
        cfg.map.aging = v.clone();
    }
    if let Some(v) = f.radius_m {
        cfg.proximity.radius_m = v;
    }
    if let Some(v) = f.count_basis {
        cfg.report.count_basis = v;
    }
    let now = f.now.unwrap_or_else(|| Local::now().naive_local());
    cfg.query_context(now)
}

fn dump<T: Serialize>(out: Option<&Path>, value: &T) -> Result<()> {
    match out {
        Some(path) => {
            output::write_json(path, value)?;
            info!(path = %path.display(), "report written");
            Ok(())
        }
        None => output::print_json(value),
    }
}

fn emit<T: Serialize>(cli: &Cli, value: &T, render: impl FnOnce(&T)) -> Result<()> {
    if cli.json || cli.out.is_some() {
        dump(cli.out.as_deref(), value)
    } else {
        render(value);
        Ok(())
    }
}

#[derive(Serialize)]
struct NeighborReport<'a> {
    meter_id: &'a str,
    consumer_no: &'a str,
    aging: dcrc_report::AgingBucket,
    comm_status: &'a str,
    radius_m: f64,
    neighbors: Vec<dcrc_report::proximity::Neighbor>,
}

fn run(cli: Cli) -> Result<()> {
    let ctx = build_context(&cli)?;
    let (records, load_report) = loader::load_from_path(&cli.input)?;
    let data = apply_filters(&records, &ctx);
    let level = ctx.grouping_level();
    info!(
        level = level.label(),
        retained = data.len(),
        basis = %ctx.count_basis,
        "report context ready"
    );

    match &cli.command {
        Commands::Summary => {
            let kpis = reports::kpi_summary(&data, ctx.count_basis, ctx.now);
            if cli.json || cli.out.is_some() {
                #[derive(Serialize)]
                struct Summary<'a> {
                    load: &'a loader::LoadReport,
                    kpis: &'a reports::KpiSummary,
                }
                let summary = Summary { load: &load_report, kpis: &kpis };
                return dump(cli.out.as_deref(), &summary);
            }
            println!(
                "Processing dataset... ({} rows read, {} loaded, {} in view)",
                format_int(load_report.total_rows),
                format_int(load_report.loaded_rows),
                format_int(data.len())
            );
            if load_report.parse_errors > 0 {
                println!(
                    "Note: {} rows skipped due to CSV errors.",
                    format_int(load_report.parse_errors)
                );
            }
            println!(
                "Info: {} rows with coordinates, {} without a readable disconnection date.\n",
                format_int(load_report.with_coordinates),
                format_int(load_report.undated_disconnections)
            );
            output::preview_table("Key Indicators", None, &kpis.rows(), usize::MAX);
            Ok(())
        }
        Commands::Progress => {
            let report = reports::progress_report(&data, &ctx.hierarchy, ctx.count_basis);
            emit(&cli, &report, |r| {
                let title = format!("DCRC Progress Analysis - {}", r.level.label());
                output::preview_table(&title, None, &r.rows(), usize::MAX);
            })
        }
        Commands::Aging => {
            let matrix = reports::aging_matrix(&data, level, ctx.count_basis, ctx.now);
            emit(&cli, &matrix, |m| {
                println!("Aging Analysis - {}\n", m.level.label());
                println!("{}\n", output::render_grid(m.table()));
                if m.unaged > 0 {
                    println!(
                        "({} open disconnections have no usable date)\n",
                        format_int(m.unaged)
                    );
                }
            })
        }
        Commands::Trend => {
            let trend = reports::monthly_trend(&data);
            emit(&cli, &trend, |t| {
                let rows: Vec<_> = t.iter().map(|p| p.to_row()).collect();
                output::preview_table("Monthly Trend", None, &rows, usize::MAX);
            })
        }
        Commands::Distribution => {
            let groups = reports::group_distribution(&data, level, ctx.count_basis);
            let comm = reports::comm_status_distribution(&data, ctx.count_basis);
            if cli.json || cli.out.is_some() {
                return dump(cli.out.as_deref(), &serde_json::json!({
                    "level": level,
                    "groups": groups,
                    "comm_status": comm,
                }));
            }
            let title = format!("Total Disconnections Analysis - {}", level.label());
            output::preview_table(&title, None, &groups.rows(), usize::MAX);
            output::preview_table(
                "Comm Status of Disconnected Meters",
                None,
                &comm.rows(),
                usize::MAX,
            );
            Ok(())
        }
        Commands::Map { limit } => {
            let points = reports::map_points(&data, &ctx.map, ctx.count_basis, ctx.now);
            emit(&cli, &points, |p| {
                let rows: Vec<_> = p.iter().map(|x| x.to_row()).collect();
                let note = format!("{} meters", format_int(rows.len()));
                output::preview_table("Disconnected Meters on Map", Some(&note), &rows, *limit);
            })
        }
        Commands::Neighbors { meter_id, seed } => {
            let focal = find_focal(&records, meter_id);
            let Some(focal) = focal else {
                println!("No meter with id '{}' and valid coordinates.", meter_id);
                return Ok(());
            };
            let mut rng = match seed {
                Some(s) => StdRng::seed_from_u64(*s),
                None => StdRng::from_entropy(),
            };
            let neighbors = find_neighbors(focal, &records, ctx.proximity_radius_m, &mut rng);
            let report = NeighborReport {
                meter_id: &focal.meter_id,
                consumer_no: &focal.consumer_no,
                aging: dcrc_report::filter::aging_bucket(ctx.now, focal.disconnection_date),
                comm_status: or_unknown(&focal.comm_status),
                radius_m: ctx.proximity_radius_m,
                neighbors,
            };
            emit(&cli, &report, |r| {
                println!("Meter No: {}", r.meter_id);
                println!("Consumer: {}", or_unknown(r.consumer_no));
                println!("Aging: {}", r.aging);
                println!("Comm Status: {}\n", r.comm_status);
                if r.neighbors.is_empty() {
                    println!("No active neighbors within {}m.", r.radius_m);
                    return;
                }
                let rows: Vec<_> = r.neighbors.iter().map(|n| n.to_row()).collect();
                output::preview_table(
                    "Nearby Active Meters (Theft Check)",
                    None,
                    &rows,
                    usize::MAX,
                );
            })
        }
    }
}

/// First record with the id that can anchor a proximity scan.
fn find_focal<'a>(records: &'a [MeterRecord], meter_id: &str) -> Option<&'a MeterRecord> {
    records
        .iter()
        .find(|r| r.meter_id == meter_id.trim() && r.coordinates().is_some())
}

fn main() -> ExitCode {
    init_tracing();
    let cli = Cli::parse();
    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "report failed");
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}
