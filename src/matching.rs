//! Match Pandora observations to the model.
//!
//! [`run_matchup`] handles one Pandora file: it reads the records, drops those outside
//! the date window or with an implausible layer height, looks up the model at each
//! remaining observation with a [`Matcher`], and writes the merged CSV file.
use std::path::{Path, PathBuf};

use chrono::{NaiveDate, NaiveDateTime};
use error_stack::{Report, ResultExt};
use tabled::Tabled;

use crate::column::{compute_column_quantities, SurfaceState, VerticalProfile};
use crate::config::{MatchConfig, ModelConfig, ModelVariables};
use crate::gridded::cache::{CacheStats, FieldCache};
use crate::gridded::{DatasetOpener, GriddedDataset};
use crate::readers::pandora::read_pandora_file;
use crate::readers::{Observation, Station};
use crate::utils::latest_matchable_time;
use crate::writers::merged_csv::write_merged_csv_file;

#[derive(Debug, thiserror::Error)]
pub enum MatchError {
    #[error("Could not read the observations")]
    ReadObservations,
    #[error("Could not get the model values at {0}")]
    Model(NaiveDateTime),
    #[error("Model profile at {0} is not usable")]
    Profile(NaiveDateTime),
    #[error("Could not write the merged output")]
    Write,
}

/// Decides which observations are worth matching.
#[derive(Debug, Clone)]
pub struct ObservationFilter {
    pub min_time: NaiveDateTime,
    pub max_time: NaiveDateTime,
    pub max_layer_height_km: f64,
}

impl ObservationFilter {
    /// Filter for a run on `today`: the latest time allowed is midnight, `latency_days` before today.
    pub fn new(config: &MatchConfig, today: NaiveDate) -> Self {
        Self {
            min_time: config.min_date.and_time(chrono::NaiveTime::MIN),
            max_time: latest_matchable_time(today, config.latency_days),
            max_layer_height_km: config.max_layer_height_km,
        }
    }

    pub fn accepts(&self, obs: &Observation) -> bool {
        let h = obs.layer_height_km;
        obs.time >= self.min_time && obs.time <= self.max_time
            && h > 0.0 && h < self.max_layer_height_km
    }
}

/// The model-derived values for one observation. NaN means "could not be computed".
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DerivedQuantities {
    /// Pandora surface concentration as a dry mixing ratio (ppb)
    pub instrument_sfc_ppb: f64,
    /// Model surface mixing ratio (ppb)
    pub model_sfc_ppb: f64,
    /// Model surface concentration (mol/m3)
    pub model_sfc_conc: f64,
    /// Model partial column up to the Pandora layer height (mol/m2)
    pub model_partial_column: f64,
    /// Model boundary layer height (m)
    pub model_pbl_height: f64,
}

impl DerivedQuantities {
    pub fn unresolved() -> Self {
        Self {
            instrument_sfc_ppb: f64::NAN,
            model_sfc_ppb: f64::NAN,
            model_sfc_conc: f64::NAN,
            model_partial_column: f64::NAN,
            model_pbl_height: f64::NAN,
        }
    }
}

/// One row of the merged output
#[derive(Debug, Clone, PartialEq)]
pub struct MergedRecord {
    pub observation: Observation,
    pub station: Station,
    pub derived: DerivedQuantities,
}

/// Looks up model values for observations, keeping the model files open between calls.
pub struct Matcher<O: DatasetOpener> {
    cache: FieldCache<O>,
    variables: ModelVariables,
    n_unresolved: usize,
}

impl<O: DatasetOpener> Matcher<O> {
    pub fn new(opener: O, model: &ModelConfig) -> Self {
        Self {
            cache: FieldCache::new(opener, model.path_rules()),
            variables: model.variables.clone(),
            n_unresolved: 0,
        }
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    /// How many observations so far could not be matched
    pub fn n_unresolved(&self) -> usize {
        self.n_unresolved
    }

    /// Match one observation. If the model values cannot be obtained, a warning is logged
    /// and the record is returned with all derived values set to NaN.
    pub fn match_observation(&mut self, obs: &Observation, station: Station) -> MergedRecord {
        let derived = match self.model_values(obs, station) {
            Ok(d) => d,
            Err(e) => {
                log::warn!("Could not match the observation at {}: {}", obs.time, e);
                log::debug!("{e:?}");
                self.n_unresolved += 1;
                DerivedQuantities::unresolved()
            }
        };

        MergedRecord { observation: obs.clone(), station, derived }
    }

    pub fn match_all(&mut self, observations: &[Observation], station: Station) -> Vec<MergedRecord> {
        observations.iter()
            .map(|obs| self.match_observation(obs, station))
            .collect()
    }

    fn model_values(&mut self, obs: &Observation, station: Station) -> error_stack::Result<DerivedQuantities, MatchError> {
        let t = obs.time;
        let (lat, lon) = (station.latitude, station.longitude);
        let vars = &self.variables;
        let fields = self.cache.resolve_all(t)
            .change_context(MatchError::Model(t))?;

        let mixing_ratio = fields.chemistry.extract(&vars.mixing_ratio, lat, lon)
            .change_context(MatchError::Model(t))?;

        let met = fields.meteorology;
        let pressure = met.extract_scalar(&vars.surface_pressure, lat, lon)
            .change_context(MatchError::Model(t))?;
        let temperature = met.extract(&vars.temperature, lat, lon)
            .change_context(MatchError::Model(t))?;
        let delp = met.extract(&vars.pressure_thickness, lat, lon)
            .change_context(MatchError::Model(t))?;
        let mid_height = met.extract(&vars.mid_layer_height, lat, lon)
            .change_context(MatchError::Model(t))?;
        let specific_humidity = met.extract(&vars.specific_humidity, lat, lon)
            .change_context(MatchError::Model(t))?;

        let pbl_height = fields.boundary_layer.extract_scalar(&vars.pbl_height, lat, lon)
            .change_context(MatchError::Model(t))?;

        let profile = VerticalProfile::from_top_down(
            delp.view(), mixing_ratio.view(), specific_humidity.view(), mid_height.view()
        ).change_context(MatchError::Profile(t))?;

        // Model levels are stored top down, so the surface is the last level
        let sfc_temperature = temperature.last().copied()
            .ok_or_else(|| Report::new(MatchError::Profile(t)))
            .attach_printable_lazy(|| format!("variable '{}' has no levels", vars.temperature))?;

        let surface = SurfaceState { pressure, temperature: sfc_temperature, mixing_ratio: profile.mixing_ratio[0] };
        let q = compute_column_quantities(&profile, &surface, obs.layer_height_m(), obs.sfc_conc);
        Ok(DerivedQuantities {
            instrument_sfc_ppb: q.instrument_sfc_ppb,
            model_sfc_ppb: q.model_sfc_ppb,
            model_sfc_conc: q.model_sfc_conc,
            model_partial_column: q.model_partial_column,
            model_pbl_height: pbl_height,
        })
    }
}

/// Counts from one file's matchup
#[derive(Debug, Clone, Default, PartialEq, Eq, Tabled)]
pub struct MatchSummary {
    #[tabled(rename = "Records read")]
    pub n_read: usize,
    #[tabled(rename = "Filtered out")]
    pub n_filtered: usize,
    #[tabled(rename = "Matched")]
    pub n_matched: usize,
    #[tabled(rename = "Unresolved")]
    pub n_unresolved: usize,
    #[tabled(rename = "Model files opened")]
    pub n_files_opened: usize,
}

impl MatchSummary {
    pub fn log(&self) {
        let mut table = tabled::Table::new([self.clone()]);
        table.with(tabled::settings::Style::blank());
        log::info!("Matchup summary:\n{table}");
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum RunOutcome {
    /// The Pandora file does not exist; nothing was done
    MissingInput,
    /// The output file already exists; nothing was done
    OutputExists,
    Written { path: PathBuf, summary: MatchSummary },
}

/// Match every usable record in `obs_file` to the model and write the results to `out_file`.
///
/// Does nothing if `obs_file` is missing or `out_file` already exists, so rerunning over a
/// set of sites only processes the new ones. `today` sets the end of the matchable window.
pub fn run_matchup<O: DatasetOpener>(
    obs_file: &Path,
    out_file: &Path,
    config: &MatchConfig,
    opener: O,
    today: NaiveDate,
) -> error_stack::Result<RunOutcome, MatchError> {
    if !obs_file.exists() {
        log::warn!("Pandora file {} not found, skipping", obs_file.display());
        return Ok(RunOutcome::MissingInput);
    }

    if out_file.exists() {
        log::info!("Output file {} already exists, skipping", out_file.display());
        return Ok(RunOutcome::OutputExists);
    }

    let pandora = read_pandora_file(obs_file, &config.pandora)
        .change_context(MatchError::ReadObservations)?;
    let filter = ObservationFilter::new(config, today);
    let kept: Vec<Observation> = pandora.observations.iter()
        .filter(|obs| filter.accepts(obs))
        .cloned()
        .collect();
    log::info!(
        "{} of {} records are between {} and {} with a valid layer height",
        kept.len(), pandora.observations.len(), filter.min_time, filter.max_time
    );

    let mut matcher = Matcher::new(opener, &config.model);
    let records = matcher.match_all(&kept, pandora.station);

    write_merged_csv_file(out_file, &records, &config.species)
        .change_context(MatchError::Write)?;

    let summary = MatchSummary {
        n_read: pandora.observations.len(),
        n_filtered: pandora.observations.len() - kept.len(),
        n_matched: records.len() - matcher.n_unresolved(),
        n_unresolved: matcher.n_unresolved(),
        n_files_opened: matcher.cache_stats().opens,
    };
    summary.log();

    Ok(RunOutcome::Written { path: out_file.to_path_buf(), summary })
}
