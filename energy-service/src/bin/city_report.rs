use anyhow::{bail, Result};
use energy_client::{
    analytics::{CityAnalyzer, CityReport, Outcome},
    db,
};
use energy_service::{config::AppConfig, observability};
use std::env;

const USAGE: &str = "usage: city_report [--json] [--year YYYY] [city...]";

struct Args {
    json: bool,
    year: Option<i32>,
    cities: Vec<String>,
}

fn parse_args(raw: impl IntoIterator<Item = String>) -> Result<Args> {
    let mut args = Args {
        json: false,
        year: None,
        cities: Vec::new(),
    };

    let mut it = raw.into_iter();
    while let Some(arg) = it.next() {
        match arg.as_str() {
            "--json" => args.json = true,
            "--year" => {
                let Some(value) = it.next() else {
                    bail!("--year needs a value\n{USAGE}");
                };
                args.year = Some(value.parse().map_err(|e| anyhow::anyhow!("invalid year '{value}': {e}"))?);
            }
            "-h" | "--help" => bail!(USAGE),
            other if other.starts_with("--") => bail!("unknown flag {other}\n{USAGE}"),
            _ => args.cities.push(arg),
        }
    }
    Ok(args)
}

fn print_text(report: &CityReport) {
    println!("== {} ({} months) ==", report.city, report.readings);

    let k = &report.kpis;
    println!("  total consumption:   {:.2} MWh", k.total_consumption_mwh);
    println!("  per-capita:          {:.2} kWh", k.per_capita_kwh);
    println!("  peak month:          {} ({:.2} MWh)", k.peak_month, k.peak_consumption_mwh);
    println!("  lowest month:        {} ({:.2} MWh)", k.trough_month, k.trough_consumption_mwh);
    println!("  mean temperature:    {:.1} °C", k.mean_temperature_c);

    let a = &report.anomalies;
    println!("  anomalies (|z| > {}): {}", a.threshold, a.anomalies.len());
    for anomaly in &a.anomalies {
        println!(
            "    {} {:?} {:.2} MWh (z = {:.2})",
            anomaly.date, anomaly.kind, anomaly.consumption_mwh, anomaly.z_score
        );
    }

    match &report.decomposition {
        Outcome::Ready(d) => println!("  decomposition:       {} months, period {}", d.trend.len(), d.period),
        Outcome::Unavailable { reason } => println!("  decomposition:       unavailable ({reason})"),
    }

    match &report.seasonal_profile {
        Outcome::Ready(years) => println!("  seasonal profile:    {} years", years.len()),
        Outcome::Unavailable { reason } => println!("  seasonal profile:    unavailable ({reason})"),
    }

    println!("  regression:          {}", report.regression.status);
    if let Some(e) = &report.regression_error {
        println!("    {e}");
    }
    for paragraph in report.regression.interpretation.split("\n\n") {
        println!("    {paragraph}");
    }
    println!();
}

#[tokio::main]
async fn main() -> Result<()> {
    observability::init_tracing();

    let args = parse_args(env::args().skip(1))?;
    let cfg = AppConfig::load()?;

    let pool = db::connect(&cfg.database.uri, cfg.database.max_connections, false).await?;
    let analyzer = CityAnalyzer::new(cfg.analysis);

    let cities = if args.cities.is_empty() {
        db::list_cities(&pool).await?
    } else {
        args.cities.clone()
    };

    if !args.json {
        println!("Total consumption by city:");
        for total in db::annual_totals(&pool).await? {
            println!("  {:<20} {:>14.2} MWh over {} months", total.city, total.total_mwh, total.months);
        }
        println!();
    }

    let mut reports = Vec::with_capacity(cities.len());
    for city in &cities {
        let series = match db::load_city(&pool, city).await {
            Ok(s) => s,
            Err(e) => {
                tracing::error!(%city, error = %e, "failed to load city, skipping");
                continue;
            }
        };
        if series.is_empty() {
            tracing::warn!(%city, "no readings for city, skipping");
            continue;
        }
        let series = match args.year {
            Some(y) => series.for_year(y),
            None => series,
        };

        let report = analyzer.analyze(&series);
        if args.json {
            reports.push(report);
        } else {
            print_text(&report);
        }
    }

    if args.json {
        println!("{}", serde_json::to_string_pretty(&reports)?);
    }

    Ok(())
}
