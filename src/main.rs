use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use powermeter_client::backfill;
use powermeter_client::config::UploaderConfig;
use powermeter_client::entity::EntityRef;
use powermeter_client::service::Service;
use powermeter_client::units::{Quantity, Unit};

/// Uploads a CSV export of interval energy readings to a PowerMeter-style
/// metering service.
#[derive(Debug, Parser)]
#[command(name = "csv2powermeter", version)]
struct Args {
    /// CSV data file with `ts` and `kwh` columns.
    csv_file: PathBuf,

    /// AuthSub token (falls back to the config file).
    #[arg(long)]
    token: Option<String>,

    /// Variable path to post on, e.g. /user/1234/5678/variable/abcde.d1.
    #[arg(long)]
    variable: Option<String>,

    /// URI prefix of the service to contact.
    #[arg(long)]
    service: Option<String>,

    /// Path and filename of the configuration file.
    #[arg(short = 'f', long)]
    config: Option<PathBuf>,

    /// Measurement uncertainty in kW h.
    #[arg(long)]
    uncertainty: Option<f64>,

    /// Timestamp uncertainty in seconds.
    #[arg(long)]
    time_uncertainty: Option<f64>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let args = Args::parse();
    let config = UploaderConfig::load(args.config.as_deref())?;

    let token = args
        .token
        .or(config.token)
        .context("missing token: pass --token or set it in the config file")?;
    let variable = args
        .variable
        .or(config.variable)
        .context("missing variable: pass --variable or set it in the config file")?;
    let uncertainty = args.uncertainty.or(config.uncertainty).unwrap_or(0.001);
    let time_uncertainty = args
        .time_uncertainty
        .or(config.time_uncertainty)
        .unwrap_or(1.0);

    let service = match args.service.or(config.service) {
        Some(prefix) => Service::with_uri_prefix(token, prefix),
        None => Service::new(token),
    };

    let measurements = backfill::read_measurements(
        &args.csv_file,
        EntityRef::Path(&variable),
        Quantity::new(uncertainty, Unit::KilowattHour),
        time_uncertainty,
    )?;
    println!(
        "Uploading {} durational readings from {}",
        measurements.len(),
        args.csv_file.display()
    );
    service.batch_post_events(&measurements).await?;
    println!("Done");
    Ok(())
}
