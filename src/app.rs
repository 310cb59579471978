use std::error::Error;

use chrono::Utc;
use clap::{Parser, ValueEnum, error::ErrorKind};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::config::{PublishStrategy, SyncConfig};
use crate::constants::defaults::RESOURCE_ID_HISTORIC;
use crate::errors::SyncError;
use crate::feature::OutputShape;
use crate::source::CkanCsvSource;
use crate::store::ArcGisStore;
use crate::sync::{SyncOutcome, run_sync};

/// Exit code for a successful run, including "no new data".
pub const EXIT_SUCCESS: u8 = 0;
/// Exit code for a run that failed before or during publishing.
pub const EXIT_FAILURE: u8 = 1;
/// Exit code for a run where the store rejected part of the batch.
pub const EXIT_PARTIAL: u8 = 2;

#[derive(Debug, Clone, Copy, ValueEnum)]
enum StrategyArg {
    Append,
    Replace,
}

impl From<StrategyArg> for PublishStrategy {
    fn from(value: StrategyArg) -> Self {
        match value {
            StrategyArg::Append => PublishStrategy::Append,
            StrategyArg::Replace => PublishStrategy::Replace,
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum ShapeArg {
    Esri,
    Geojson,
}

impl From<ShapeArg> for OutputShape {
    fn from(value: ShapeArg) -> Self {
        match value {
            ShapeArg::Esri => OutputShape::Esri,
            ShapeArg::Geojson => OutputShape::GeoJson,
        }
    }
}

#[derive(Debug, Parser)]
#[command(
    name = "ems_sync",
    disable_help_subcommand = true,
    about = "Sync new EMS water-quality samples to an ArcGIS feature layer",
    long_about = "Load the EMS dataset from the BC Data Catalog, find samples not yet in the ArcGIS Online layer, and append (or republish) them.",
    after_help = "Portal credentials and dataset identifiers are read from the environment (MAPHUB_URL, AGO_USERNAME, AGO_PASSWORD, AGO_ITEM_ID, ...). Flags override the environment."
)]
struct EmsSyncCli {
    #[arg(long, value_enum, help = "Publish strategy (default: append)")]
    strategy: Option<StrategyArg>,
    #[arg(long, value_enum, help = "Feature wire shape (default: esri)")]
    shape: Option<ShapeArg>,
    #[arg(
        long = "chunk-size",
        value_name = "ROWS",
        help = "Rows per CSV chunk; 0 reads each file in one pass"
    )]
    chunk_size: Option<usize>,
    #[arg(
        long = "include-historic",
        help = "Also load the historic EMS resource after the current one"
    )]
    include_historic: bool,
    #[arg(
        long = "no-latest-gate",
        help = "Always run the full comparison, even when the latest timestamps match"
    )]
    no_latest_gate: bool,
}

impl EmsSyncCli {
    fn apply(self, config: &mut SyncConfig) {
        if let Some(strategy) = self.strategy {
            config.publish_strategy = strategy.into();
        }
        if let Some(shape) = self.shape {
            config.output_shape = shape.into();
        }
        if let Some(chunk_size) = self.chunk_size {
            config.upstream.chunk_size = (chunk_size > 0).then_some(chunk_size);
        }
        if self.include_historic
            && !config
                .upstream
                .resource_ids
                .iter()
                .any(|id| id == RESOURCE_ID_HISTORIC)
        {
            config
                .upstream
                .resource_ids
                .push(RESOURCE_ID_HISTORIC.to_string());
        }
        if self.no_latest_gate {
            config.latest_timestamp_gate = false;
        }
    }
}

/// Entry point of the `ems_sync` binary; returns the process exit code.
pub fn run_ems_sync<I>(args_iter: I) -> u8
where
    I: Iterator<Item = String>,
{
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .try_init();

    let cli = match parse_cli::<EmsSyncCli, _>(
        std::iter::once("ems_sync".to_string()).chain(args_iter),
    ) {
        Ok(Some(cli)) => cli,
        Ok(None) => return EXIT_SUCCESS,
        Err(err) => {
            error!("[ems_sync:app] {err}");
            return EXIT_FAILURE;
        }
    };

    let result = SyncConfig::from_env().and_then(|mut config| {
        cli.apply(&mut config);
        sync_once(&config)
    });
    report_outcome(&result)
}

fn sync_once(config: &SyncConfig) -> Result<SyncOutcome, SyncError> {
    let run_started = Utc::now();
    info!(
        "[ems_sync:app] starting {} run with {} output",
        config.publish_strategy, config.output_shape
    );
    let store = ArcGisStore::connect(&config.store)?;
    let source = CkanCsvSource::from_settings(&config.upstream);
    run_sync(config, &source, &store, run_started)
}

/// Log the terminal message of a run and map it to an exit code.
pub fn report_outcome(result: &Result<SyncOutcome, SyncError>) -> u8 {
    match result {
        Ok(SyncOutcome::NoNewData { reason }) => {
            info!("[ems_sync:app] no new EMS data ({reason}); exiting");
            EXIT_SUCCESS
        }
        Ok(SyncOutcome::Published {
            report, rejections, ..
        }) if report.is_complete() => {
            if !rejections.is_empty() {
                warn!(
                    "[ems_sync:app] {} new records skipped for missing coordinates",
                    rejections.len()
                );
            }
            info!(
                "[ems_sync:app] new EMS data uploaded ({} features); complete",
                report.succeeded
            );
            EXIT_SUCCESS
        }
        Ok(SyncOutcome::Published { report, .. }) => {
            error!("[ems_sync:app] upload partially failed: {report}");
            EXIT_PARTIAL
        }
        Err(err) => {
            error!("[ems_sync:app] sync failed: {err}");
            EXIT_FAILURE
        }
    }
}

fn parse_cli<T, I>(args: I) -> Result<Option<T>, Box<dyn Error>>
where
    T: Parser,
    I: IntoIterator,
    I::Item: Into<std::ffi::OsString> + Clone,
{
    match T::try_parse_from(args) {
        Ok(cli) => Ok(Some(cli)),
        Err(err) => match err.kind() {
            ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => {
                err.print()?;
                Ok(None)
            }
            _ => Err(err.into()),
        },
    }
}
