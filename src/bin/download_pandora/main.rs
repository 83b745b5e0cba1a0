use std::{path::PathBuf, process::ExitCode};

use clap::Parser;
use clap_verbosity_flag::{InfoLevel, Verbosity};
use error_stack::ResultExt;
use pandora_cf::config::MatchConfig;
use pandora_cf::logging::init_logging;
use pandora_cf::sites::{download_missing, HttpFetcher, SiteRegistry};

fn main() -> ExitCode {
    let clargs = Cli::parse();
    init_logging(clargs.verbosity.log_level_filter());
    if let Err(e) = driver(clargs) {
        eprintln!("ERROR: {e:?}");
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    }
}

fn driver(clargs: Cli) -> error_stack::Result<(), CliError> {
    let mut config = MatchConfig::load(clargs.config.as_deref())
        .change_context(CliError::context("Error loading the configuration"))?;
    if let Some(p) = clargs.locations {
        config.locations = p;
    }
    if let Some(d) = clargs.obs_dir {
        config.obs_dir = d;
    }

    let registry = SiteRegistry::load(&config.locations)
        .change_context(CliError::context("Error loading the site list"))?;
    let fetcher = HttpFetcher::new()
        .change_context(CliError::context("Error setting up the HTTP client"))?;
    let summary = download_missing(&registry, &config.obs_dir, &fetcher)
        .change_context_lazy(|| CliError::context(format!("Error downloading into {}", config.obs_dir.display())))?;

    let mut table = tabled::Table::new([summary]);
    table.with(tabled::settings::Style::blank());
    log::info!("Download summary:\n{table}");
    Ok(())
}

/// Download the Pandora L2 file for each site in the site list that is not
/// already present in the observation directory.
#[derive(Debug, Parser)]
struct Cli {
    /// JSON list of Pandora sites [default: PANDORA_Locations.json]
    #[clap(short = 'l', long)]
    locations: Option<PathBuf>,

    /// Directory to save the Pandora files in [default: obs]
    #[clap(long)]
    obs_dir: Option<PathBuf>,

    /// TOML configuration file, the same one used for matching
    #[clap(long)]
    config: Option<PathBuf>,

    #[command(flatten)]
    verbosity: Verbosity<InfoLevel>,
}

#[derive(Debug, thiserror::Error)]
enum CliError {
    #[error("{0}")]
    Context(String),
}

impl CliError {
    fn context<S: ToString>(ctx: S) -> Self {
        Self::Context(ctx.to_string())
    }
}
