//! Model fields held in memory.
//!
//! Used for synthetic grids and in tests, where writing real netCDF files would need
//! the netCDF C library. Variables follow the GEOS-CF dimension order: `(time, lat, lon)`
//! for 2D fields and `(time, lev, lat, lon)` for 3D fields.
use std::cell::RefCell;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use error_stack::Report;
use ndarray::{Array1, ArrayD, Axis};

use super::{nearest_cell, DatasetOpener, GriddedDataset, GriddedError};

#[derive(Debug, Clone)]
pub struct MemoryDataset {
    path: PathBuf,
    lat: Vec<f64>,
    lon: Vec<f64>,
    variables: HashMap<String, ArrayD<f64>>,
}

impl MemoryDataset {
    pub fn new<P: AsRef<Path>>(path: P, lat: Vec<f64>, lon: Vec<f64>) -> Self {
        Self { path: path.as_ref().to_path_buf(), lat, lon, variables: HashMap::new() }
    }

    pub fn with_variable<S: ToString>(mut self, name: S, values: ArrayD<f64>) -> Self {
        self.variables.insert(name.to_string(), values);
        self
    }
}

impl GriddedDataset for MemoryDataset {
    fn path(&self) -> &Path {
        &self.path
    }

    fn extract(&self, varname: &str, lat: f64, lon: f64) -> error_stack::Result<Array1<f64>, GriddedError> {
        let values = self.variables.get(varname)
            .ok_or_else(|| GriddedError::variable_not_found(varname, &self.path))?;

        let ndim = values.ndim();
        if ndim != 3 && ndim != 4 {
            return Err(Report::new(GriddedError::read_error(
                varname, &self.path, format!("expected 3 or 4 dimensions, got {ndim}")
            )));
        }

        let shape = values.shape();
        if shape[ndim-2] != self.lat.len() || shape[ndim-1] != self.lon.len() {
            return Err(Report::new(GriddedError::read_error(
                varname, &self.path, format!("shape {shape:?} does not match the {} x {} grid", self.lat.len(), self.lon.len())
            )));
        }

        if shape[0] == 0 {
            return Err(Report::new(GriddedError::read_error(varname, &self.path, "no time steps")));
        }

        let (ilat, ilon) = nearest_cell(&self.lat, &self.lon, lat, lon, &self.path)?;
        let first_time = values.index_axis(Axis(0), 0);
        let at_lon = first_time.index_axis(Axis(ndim - 2), ilon);
        let column = at_lon.index_axis(Axis(ndim - 3), ilat);
        Ok(column.iter().copied().collect())
    }
}

/// Serves [`MemoryDataset`]s by path, recording each path it opens.
#[derive(Debug, Default)]
pub struct MemoryOpener {
    datasets: HashMap<PathBuf, MemoryDataset>,
    opened: RefCell<Vec<PathBuf>>,
}

impl MemoryOpener {
    pub fn insert(&mut self, dataset: MemoryDataset) {
        self.datasets.insert(dataset.path.clone(), dataset);
    }

    /// Every path passed to [`DatasetOpener::open`], in order
    pub fn opened_paths(&self) -> Vec<PathBuf> {
        self.opened.borrow().clone()
    }
}

impl DatasetOpener for MemoryOpener {
    type Dataset = MemoryDataset;

    fn exists(&self, path: &Path) -> bool {
        self.datasets.contains_key(path)
    }

    fn open(&self, path: &Path) -> error_stack::Result<Self::Dataset, GriddedError> {
        let ds = self.datasets.get(path)
            .cloned()
            .ok_or_else(|| GriddedError::DatasetNotFound(path.to_path_buf()))?;
        self.opened.borrow_mut().push(path.to_path_buf());
        Ok(ds)
    }
}
