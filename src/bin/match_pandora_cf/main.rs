use std::process::ExitCode;

use clap::Parser;
use error_stack::ResultExt;
use pandora_cf::config::MatchConfig;
use pandora_cf::gridded::nc::NcOpener;
use pandora_cf::logging::init_logging;
use pandora_cf::matching::{run_matchup, RunOutcome};
use pandora_cf::sites::SiteRegistry;

mod cli;

fn main() -> ExitCode {
    let clargs = cli::Cli::parse();
    init_logging(clargs.verbosity.log_level_filter());
    if let Err(e) = driver(clargs) {
        eprintln!("ERROR: {e:?}");
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    }
}

fn driver(clargs: cli::Cli) -> error_stack::Result<(), CliError> {
    let mut config = MatchConfig::load(clargs.config.as_deref())
        .change_context(CliError::context("Error loading the configuration"))?;
    clargs.override_config(&mut config);

    if clargs.print_config {
        let s = config.to_toml_string()
            .change_context(CliError::context("Error printing the configuration"))?;
        println!("{s}");
        return Ok(());
    }

    let nsite = clargs.nsite.ok_or(CliError::context("--nsite is required"))?;
    let registry = SiteRegistry::load(&config.locations)
        .change_context(CliError::context("Error loading the site list"))?;
    let (obs_file, out_file) = registry.site_paths(nsite, &config.obs_dir, &config.output_dir)
        .change_context(CliError::BadSite(nsite))?;

    let m = &config.model;
    let opener = NcOpener::new(&m.lat_name, &m.lon_name, &m.time_name);
    let today = chrono::Local::now().date_naive();
    let outcome = run_matchup(&obs_file, &out_file, &config, opener, today)
        .change_context_lazy(|| CliError::context(format!("Error matching {}", obs_file.display())))?;

    if let RunOutcome::Written { path, summary } = outcome {
        log::info!("Matched {} of {} records into {}", summary.n_matched, summary.n_read, path.display());
    }
    Ok(())
}

#[derive(Debug, thiserror::Error)]
enum CliError {
    #[error("Cannot get the Pandora file for site {0}")]
    BadSite(usize),
    #[error("{0}")]
    Context(String),
}

impl CliError {
    fn context<S: ToString>(ctx: S) -> Self {
        Self::Context(ctx.to_string())
    }
}
