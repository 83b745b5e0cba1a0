//! Command line interface definitions
use std::path::PathBuf;

use clap::Parser;
use clap_verbosity_flag::{InfoLevel, Verbosity};
use pandora_cf::config::MatchConfig;

/// Match one Pandora site's NO2 surface and partial column record to GEOS-CF.
///
/// The site is picked by its position in the site list. Its Pandora file is read
/// from the observation directory and the merged CSV file is written to the output
/// directory. If the Pandora file is missing or the output already exists, nothing
/// is done.
#[derive(Debug, Parser)]
pub(crate) struct Cli {
    /// 0-based index of the site in the site list
    #[clap(short = 'n', long, required_unless_present = "print_config")]
    pub(crate) nsite: Option<usize>,

    /// JSON list of Pandora sites [default: PANDORA_Locations.json]
    #[clap(short = 'l', long)]
    pub(crate) locations: Option<PathBuf>,

    /// TOML file with settings to use instead of the defaults. Values from
    /// PANDORA_CF_* environment variables and the options below override it.
    #[clap(long)]
    pub(crate) config: Option<PathBuf>,

    /// Path template for the hourly chemistry and meteorology files; "<col>"
    /// is replaced with the collection name.
    #[clap(short = 'c', long)]
    pub(crate) cf_template: Option<String>,

    /// Path template for the boundary layer height files
    #[clap(short = 'p', long)]
    pub(crate) pbl_template: Option<String>,

    /// Directory containing the Pandora files [default: obs]
    #[clap(long)]
    pub(crate) obs_dir: Option<PathBuf>,

    /// Directory to write the merged CSV files to [default: merged_csv]
    #[clap(long)]
    pub(crate) output_dir: Option<PathBuf>,

    /// Print the effective configuration as TOML and exit
    #[clap(long)]
    pub(crate) print_config: bool,

    #[command(flatten)]
    pub(crate) verbosity: Verbosity<InfoLevel>,
}

impl Cli {
    /// Apply any options given on the command line on top of `config`
    pub(crate) fn override_config(&self, config: &mut MatchConfig) {
        if let Some(p) = &self.locations {
            config.locations = p.clone();
        }
        if let Some(t) = &self.cf_template {
            config.model.hourly_template = t.clone();
        }
        if let Some(t) = &self.pbl_template {
            config.model.pbl_template = t.clone();
        }
        if let Some(d) = &self.obs_dir {
            config.obs_dir = d.clone();
        }
        if let Some(d) = &self.output_dir {
            config.output_dir = d.clone();
        }
    }
}
