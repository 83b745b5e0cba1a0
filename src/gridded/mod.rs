//! Access to gridded model output.
//!
//! Model output is organized in collections ("field families"), each stored as one
//! file per output time. A [`FieldPathRule`] turns an observation time into the path of
//! the file to read for one family; a [`cache::FieldCache`] keeps the most recent file of
//! each family open. Reading values out of a file is abstracted by [`GriddedDataset`] so
//! that the matchup does not depend on the file format.
use std::path::{Path, PathBuf};

use chrono::NaiveDateTime;
use ndarray::Array1;
use serde::{Deserialize, Serialize};

use crate::error::TemplateError;
use crate::interpolation::NearestNeighbor;
use crate::utils::{expand_time_template, round_to_nearest_hour};

pub mod cache;
pub mod memory;
#[cfg(feature = "netcdf")]
pub mod nc;

#[derive(Debug, thiserror::Error)]
pub enum GriddedError {
    #[error("Model file not found: {}", .0.display())]
    DatasetNotFound(PathBuf),
    #[error("Could not open model file {}", .0.display())]
    CouldNotOpen(PathBuf),
    #[error("Variable '{varname}' not found in {}", .path.display())]
    VariableNotFound { varname: String, path: PathBuf },
    #[error("Could not read variable '{varname}' from {}: {reason}", .path.display())]
    ReadError { varname: String, path: PathBuf, reason: String },
    #[error("Could not find the grid cell nearest to lat = {lat}, lon = {lon} in {}", .path.display())]
    NoNearestCell { lat: f64, lon: f64, path: PathBuf },
    #[error("No file path rule defined for the {0} collection")]
    NoPathRule(FieldFamily),
    #[error("Could not build the file path for the {0} collection")]
    PathTemplate(FieldFamily),
}

impl GriddedError {
    pub(crate) fn read_error<V: ToString, R: ToString>(varname: V, path: &Path, reason: R) -> Self {
        Self::ReadError { varname: varname.to_string(), path: path.to_path_buf(), reason: reason.to_string() }
    }

    pub(crate) fn variable_not_found<V: ToString>(varname: V, path: &Path) -> Self {
        Self::VariableNotFound { varname: varname.to_string(), path: path.to_path_buf() }
    }
}

/// The model collections needed to match one observation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display)]
pub enum FieldFamily {
    /// Instantaneous chemistry: trace gas mixing ratios
    #[strum(to_string = "chm")]
    Chemistry,
    /// Instantaneous meteorology: pressure, temperature, humidity, layer heights
    #[strum(to_string = "met")]
    Meteorology,
    /// Time-averaged 2D meteorology with the boundary layer height
    #[strum(to_string = "pbl")]
    BoundaryLayer,
}

/// How an observation time is mapped onto a model output time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeAlignment {
    /// Instantaneous hourly output: use the nearest whole hour
    NearestHour,
    /// Use the observation time as is; the template itself selects the averaging window
    Exact,
}

impl TimeAlignment {
    pub fn align(&self, time: NaiveDateTime) -> Result<NaiveDateTime, TemplateError> {
        match self {
            TimeAlignment::NearestHour => round_to_nearest_hour(time),
            TimeAlignment::Exact => Ok(time),
        }
    }
}

/// A `strftime`-style path template plus the time alignment for one field family
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldPathRule {
    pub template: String,
    pub alignment: TimeAlignment,
}

impl FieldPathRule {
    pub fn new<S: ToString>(template: S, alignment: TimeAlignment) -> Self {
        Self { template: template.to_string(), alignment }
    }

    pub fn path_for(&self, time: NaiveDateTime) -> Result<PathBuf, TemplateError> {
        let t = self.alignment.align(time)?;
        expand_time_template(&self.template, t)
    }
}

/// One open model output file.
pub trait GriddedDataset {
    /// Path this dataset was opened from
    fn path(&self) -> &Path;

    /// Values of `varname` at the first time step in the grid cell nearest to (`lat`, `lon`).
    ///
    /// For a variable with a vertical dimension, the result has one value per level in
    /// the order they are stored in the file. For a 2D variable, it has a single value.
    fn extract(&self, varname: &str, lat: f64, lon: f64) -> error_stack::Result<Array1<f64>, GriddedError>;

    /// Like [`GriddedDataset::extract`], but for 2D fields. Returns the first value if
    /// the variable does have more than one level.
    fn extract_scalar(&self, varname: &str, lat: f64, lon: f64) -> error_stack::Result<f64, GriddedError> {
        let values = self.extract(varname, lat, lon)?;
        values.first().copied()
            .ok_or_else(|| GriddedError::read_error(varname, self.path(), "no values at the requested location").into())
    }
}

/// Something that can open model files as [`GriddedDataset`]s.
pub trait DatasetOpener {
    type Dataset: GriddedDataset;

    /// Whether a dataset exists at `path`. Checked before calling [`DatasetOpener::open`].
    fn exists(&self, path: &Path) -> bool {
        path.exists()
    }

    fn open(&self, path: &Path) -> error_stack::Result<Self::Dataset, GriddedError>;
}

/// Find the (latitude, longitude) indices of the grid cell nearest to a point.
pub(crate) fn nearest_cell(lats: &[f64], lons: &[f64], lat: f64, lon: f64, path: &Path) -> Result<(usize, usize), GriddedError> {
    let err = || GriddedError::NoNearestCell { lat, lon, path: path.to_path_buf() };
    let ilat = NearestNeighbor::linear().nearest_index(lats, lat).map_err(|_| err())?;
    let ilon = NearestNeighbor::longitude().nearest_index(lons, lon).map_err(|_| err())?;
    Ok((ilat, ilon))
}
