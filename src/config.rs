//! Configuration for matching Pandora files to GEOS-CF.
//!
//! Settings are layered: the built-in defaults, then an optional TOML file, then
//! environment variables starting with `PANDORA_CF_` (use a double underscore to
//! reach nested tables, e.g. `PANDORA_CF_MODEL__HOURLY_TEMPLATE`), then any command
//! line overrides applied by the binary. A TOML file only needs the keys that differ
//! from the defaults, for example:
//!
//! ```toml
//! min_date = "2022-06-01"
//! latency_days = 5
//!
//! [model]
//! hourly_template = "/data/geos-cf/Y%Y/M%m/D%d/GEOS-CF.v01.rpl.<col>_inst_1hr_g1440x721_v72.%Y%m%d_%H00z.nc4"
//!
//! [pandora]
//! preamble_lines = 95
//! ```
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use chrono::NaiveDate;
use error_stack::ResultExt;
use figment::providers::{Env, Format, Serialized, Toml};
use figment::Figment;
use serde::{Deserialize, Serialize};

use crate::gridded::{FieldFamily, FieldPathRule, TimeAlignment};
use crate::readers::pandora::PandoraFormat;

pub const ENV_PREFIX: &str = "PANDORA_CF_";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Could not load the configuration")]
    Loading,
    #[error("Could not serialize the configuration")]
    Serializing,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MatchConfig {
    /// JSON list of Pandora sites
    pub locations: PathBuf,
    /// Directory holding the downloaded Pandora files
    pub obs_dir: PathBuf,
    /// Directory to write the merged CSV files to
    pub output_dir: PathBuf,
    /// Trace gas name used in the output column names, e.g. "no2"
    pub species: String,
    /// Observations before this date are not matched
    pub min_date: NaiveDate,
    /// How many days model output lags real time; observations from midnight
    /// of (today - latency_days) onward are not matched
    pub latency_days: u32,
    /// Observations with a surface layer at or above this height (km) are not matched
    pub max_layer_height_km: f64,
    pub pandora: PandoraFormat,
    pub model: ModelConfig,
}

impl Default for MatchConfig {
    fn default() -> Self {
        Self {
            locations: PathBuf::from("PANDORA_Locations.json"),
            obs_dir: PathBuf::from("obs"),
            output_dir: PathBuf::from("merged_csv"),
            species: "no2".to_string(),
            min_date: NaiveDate::from_ymd_opt(2020, 1, 1).expect("2020-01-01 is a valid date"),
            latency_days: 3,
            max_layer_height_km: 15.0,
            pandora: PandoraFormat::default(),
            model: ModelConfig::default(),
        }
    }
}

impl MatchConfig {
    /// The default configuration merged with `config_file` (if given) and the environment.
    pub fn load(config_file: Option<&Path>) -> error_stack::Result<Self, ConfigError> {
        let mut fig = Figment::from(Serialized::defaults(Self::default()));
        if let Some(p) = config_file {
            if !p.exists() {
                return Err(ConfigError::Loading)
                    .attach_printable_lazy(|| format!("configuration file {} does not exist", p.display()));
            }
            fig = fig.merge(Toml::file(p));
        }
        fig = fig.merge(Env::prefixed(ENV_PREFIX).split("__"));
        Self::from_figment(fig)
    }

    /// The default configuration merged with a TOML string. The environment is not consulted.
    pub fn from_toml_str(toml_str: &str) -> error_stack::Result<Self, ConfigError> {
        let fig = Figment::from(Serialized::defaults(Self::default()))
            .merge(Toml::string(toml_str));
        Self::from_figment(fig)
    }

    fn from_figment(fig: Figment) -> error_stack::Result<Self, ConfigError> {
        fig.extract().change_context(ConfigError::Loading)
    }

    pub fn to_toml_string(&self) -> error_stack::Result<String, ConfigError> {
        toml::to_string_pretty(self).change_context(ConfigError::Serializing)
    }
}

/// Where the model files are and what the variables in them are called
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    /// Template for the hourly instantaneous collections. `strftime` specifiers
    /// are filled with the observation time rounded to the nearest hour, and the
    /// collection placeholder with the chemistry or meteorology collection name.
    pub hourly_template: String,
    /// Template for the time-averaged collection with the boundary layer height.
    /// Filled with the exact observation time.
    pub pbl_template: String,
    pub collection_placeholder: String,
    pub chemistry_collection: String,
    pub meteorology_collection: String,
    pub lat_name: String,
    pub lon_name: String,
    pub time_name: String,
    pub variables: ModelVariables,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            hourly_template: "/discover/nobackup/projects/gmao/geos_cf/pub/GEOS-CF_NRT/ana/Y%Y/M%m/D%d/GEOS-CF.v01.rpl.<col>_inst_1hr_g1440x721_v72.%Y%m%d_%H00z.nc4".to_string(),
            pbl_template: "/discover/nobackup/projects/gmao/geos_cf/pub/GEOS-CF_NRT/ana/Y%Y/M%m/D%d/GEOS-CF.v01.rpl.met_tavg_1hr_g1440x721_x1.%Y%m%d_%H30z.nc4".to_string(),
            collection_placeholder: "<col>".to_string(),
            chemistry_collection: "chm".to_string(),
            meteorology_collection: "met".to_string(),
            lat_name: "lat".to_string(),
            lon_name: "lon".to_string(),
            time_name: "time".to_string(),
            variables: ModelVariables::default(),
        }
    }
}

impl ModelConfig {
    pub fn path_rules(&self) -> HashMap<FieldFamily, FieldPathRule> {
        let hourly = |collection: &str| {
            self.hourly_template.replace(&self.collection_placeholder, collection)
        };

        HashMap::from([
            (FieldFamily::Chemistry, FieldPathRule::new(hourly(&self.chemistry_collection), TimeAlignment::NearestHour)),
            (FieldFamily::Meteorology, FieldPathRule::new(hourly(&self.meteorology_collection), TimeAlignment::NearestHour)),
            (FieldFamily::BoundaryLayer, FieldPathRule::new(&self.pbl_template, TimeAlignment::Exact)),
        ])
    }
}

/// Model variable names. Profiles are expected top of atmosphere first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelVariables {
    /// Trace gas mole fraction (chemistry collection, mol/mol)
    pub mixing_ratio: String,
    /// Surface pressure (meteorology, Pa)
    pub surface_pressure: String,
    /// Air temperature (meteorology, K)
    pub temperature: String,
    /// Layer pressure thickness (meteorology, Pa)
    pub pressure_thickness: String,
    /// Mid-layer height above the surface (meteorology, m)
    pub mid_layer_height: String,
    /// Specific humidity (meteorology, kg/kg)
    pub specific_humidity: String,
    /// Boundary layer height (boundary layer collection, m)
    pub pbl_height: String,
}

impl Default for ModelVariables {
    fn default() -> Self {
        Self {
            mixing_ratio: "NO2".to_string(),
            surface_pressure: "PS".to_string(),
            temperature: "T".to_string(),
            pressure_thickness: "DELP".to_string(),
            mid_layer_height: "ZL".to_string(),
            specific_humidity: "Q".to_string(),
            pbl_height: "ZPBL".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::iter_fenced_blocks;
    use chrono::NaiveDateTime;

    #[test]
    fn test_defaults() {
        let cfg = MatchConfig::from_toml_str("").unwrap();
        assert_eq!(cfg, MatchConfig::default());
        assert_eq!(cfg.pandora.preamble_lines, 93);
        assert_eq!(cfg.pandora.layer_column_field, 68);
    }

    #[test]
    fn test_partial_override() {
        let cfg = MatchConfig::from_toml_str(r#"
            latency_days = 5
            [pandora]
            preamble_lines = 95
            [model.variables]
            mixing_ratio = "O3"
        "#).unwrap();
        assert_eq!(cfg.latency_days, 5);
        assert_eq!(cfg.pandora.preamble_lines, 95);
        // Unspecified keys in a partly given table keep their defaults
        assert_eq!(cfg.pandora.sfc_conc_field, 55);
        assert_eq!(cfg.model.variables.mixing_ratio, "O3");
        assert_eq!(cfg.model.variables.pbl_height, "ZPBL");
    }

    #[test]
    fn test_toml_round_trip() {
        let cfg = MatchConfig::default();
        let s = cfg.to_toml_string().unwrap();
        let cfg2 = MatchConfig::from_toml_str(&s).unwrap();
        assert_eq!(cfg, cfg2);
    }

    #[test]
    fn test_missing_config_file() {
        let err = MatchConfig::load(Some(Path::new("/definitely/not/here.toml"))).unwrap_err();
        assert!(matches!(err.current_context(), ConfigError::Loading));
    }

    #[test]
    fn test_path_rules() {
        let rules = ModelConfig::default().path_rules();
        let t = NaiveDateTime::parse_from_str("2024-02-05 14:40:00", "%Y-%m-%d %H:%M:%S").unwrap();
        let chm = rules[&FieldFamily::Chemistry].path_for(t).unwrap();
        assert!(chm.to_string_lossy().ends_with("Y2024/M02/D05/GEOS-CF.v01.rpl.chm_inst_1hr_g1440x721_v72.20240205_1500z.nc4"));
        let met = rules[&FieldFamily::Meteorology].path_for(t).unwrap();
        assert!(met.to_string_lossy().ends_with("GEOS-CF.v01.rpl.met_inst_1hr_g1440x721_v72.20240205_1500z.nc4"));
        let pbl = rules[&FieldFamily::BoundaryLayer].path_for(t).unwrap();
        assert!(pbl.to_string_lossy().ends_with("GEOS-CF.v01.rpl.met_tavg_1hr_g1440x721_x1.20240205_1430z.nc4"));
    }

    #[test]
    fn test_readme_examples() {
        let readme = PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("README.md");
        let mut n = 0;
        for block in iter_fenced_blocks("toml", [readme]) {
            let block = block.unwrap();
            MatchConfig::from_toml_str(&block)
                .unwrap_or_else(|e| panic!("README example did not parse:\n{block}\n{e:?}"));
            n += 1;
        }
        assert!(n > 0, "expected at least one TOML example in the README");
    }
}
