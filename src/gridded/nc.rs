//! netCDF back end for model output files (GEOS-CF `.nc4` collections).
use std::path::{Path, PathBuf};

use error_stack::{Report, ResultExt};
use ndarray::Array1;
use netcdf::{Extent, Extents};

use super::{nearest_cell, DatasetOpener, GriddedDataset, GriddedError};

/// Names of the coordinate dimensions in the model files
#[derive(Debug, Clone)]
pub struct NcOpener {
    pub lat_name: String,
    pub lon_name: String,
    pub time_name: String,
}

impl NcOpener {
    pub fn new<S: ToString>(lat_name: S, lon_name: S, time_name: S) -> Self {
        Self { lat_name: lat_name.to_string(), lon_name: lon_name.to_string(), time_name: time_name.to_string() }
    }
}

impl Default for NcOpener {
    fn default() -> Self {
        Self::new("lat", "lon", "time")
    }
}

impl DatasetOpener for NcOpener {
    type Dataset = NcDataset;

    fn open(&self, path: &Path) -> error_stack::Result<Self::Dataset, GriddedError> {
        let file = netcdf::open(path)
            .change_context_lazy(|| GriddedError::CouldNotOpen(path.to_path_buf()))?;
        let lat = read_coordinate(&file, &self.lat_name, path)?;
        let lon = read_coordinate(&file, &self.lon_name, path)?;
        Ok(NcDataset { file, path: path.to_path_buf(), lat, lon, dims: self.clone() })
    }
}

/// An open netCDF model file. The file handle is closed when this is dropped.
pub struct NcDataset {
    file: netcdf::File,
    path: PathBuf,
    lat: Vec<f64>,
    lon: Vec<f64>,
    dims: NcOpener,
}

impl GriddedDataset for NcDataset {
    fn path(&self) -> &Path {
        &self.path
    }

    fn extract(&self, varname: &str, lat: f64, lon: f64) -> error_stack::Result<Array1<f64>, GriddedError> {
        let var = self.file.variable(varname)
            .ok_or_else(|| GriddedError::variable_not_found(varname, &self.path))?;
        let (ilat, ilon) = nearest_cell(&self.lat, &self.lon, lat, lon, &self.path)?;

        // Only read the one column needed rather than the whole global field
        let mut extents = vec![];
        for dim in var.dimensions() {
            let name = dim.name();
            let ext = if name == self.dims.lat_name {
                Extent::Index(ilat)
            } else if name == self.dims.lon_name {
                Extent::Index(ilon)
            } else if name == self.dims.time_name {
                Extent::Index(0)
            } else {
                Extent::Slice { start: 0, stride: 1 }
            };
            extents.push(ext);
        }

        let values = var.get::<f64, _>(Extents::Extent(extents))
            .change_context_lazy(|| GriddedError::read_error(varname, &self.path, "netCDF read failed"))?;
        Ok(values.iter().copied().collect())
    }
}

fn read_coordinate(file: &netcdf::File, name: &str, path: &Path) -> error_stack::Result<Vec<f64>, GriddedError> {
    let var = file.variable(name)
        .ok_or_else(|| Report::new(GriddedError::variable_not_found(name, path)))
        .attach_printable("coordinate variable is required for the nearest grid cell lookup")?;
    var.get_values::<f64, _>(Extents::All)
        .change_context_lazy(|| GriddedError::read_error(name, path, "could not read coordinate values"))
}
