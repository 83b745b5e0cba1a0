//! Keep the most recently used model file of each field family open.
//!
//! Observations from one site come in time order and several share the same model
//! hour, so most lookups reuse the file already open. Only one file per family is
//! ever held: opening a new one drops the old one first.
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use chrono::NaiveDateTime;
use error_stack::{Report, ResultExt};

use super::{DatasetOpener, FieldFamily, FieldPathRule, GriddedError};

/// An open dataset and the path it was resolved from
#[derive(Debug)]
pub struct CachedDataset<D> {
    pub path: PathBuf,
    pub dataset: D,
}

/// What [`FieldCache::resolve`] would have to do for a given family and time
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// The file is already open
    Hit,
    /// The file at this path must be opened, replacing the current one
    Open(PathBuf),
}

/// Counts of cache activity, mainly for the end-of-run summary
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: usize,
    pub opens: usize,
    pub missing: usize,
}

/// The open datasets for the chemistry, meteorology, and boundary layer families at one time
pub struct ModelFields<'c, D> {
    pub chemistry: &'c D,
    pub meteorology: &'c D,
    pub boundary_layer: &'c D,
}

pub struct FieldCache<O: DatasetOpener> {
    opener: O,
    rules: HashMap<FieldFamily, FieldPathRule>,
    entries: HashMap<FieldFamily, CachedDataset<O::Dataset>>,
    stats: CacheStats,
}

impl<O: DatasetOpener> FieldCache<O> {
    pub fn new(opener: O, rules: HashMap<FieldFamily, FieldPathRule>) -> Self {
        Self { opener, rules, entries: HashMap::new(), stats: CacheStats::default() }
    }

    pub fn opener(&self) -> &O {
        &self.opener
    }

    pub fn stats(&self) -> CacheStats {
        self.stats
    }

    /// Path of the dataset currently open for `family`, if any
    pub fn current_path(&self, family: FieldFamily) -> Option<&Path> {
        self.entries.get(&family).map(|e| e.path.as_path())
    }

    /// Work out whether the dataset for `family` at `time` is already open. Does no I/O.
    pub fn plan(&self, family: FieldFamily, time: NaiveDateTime) -> error_stack::Result<Resolution, GriddedError> {
        let rule = self.rules.get(&family)
            .ok_or(GriddedError::NoPathRule(family))?;
        let path = rule.path_for(time)
            .change_context(GriddedError::PathTemplate(family))
            .attach_printable_lazy(|| format!("template = {}", rule.template))?;

        match self.current_path(family) {
            Some(p) if p == path.as_path() => Ok(Resolution::Hit),
            _ => Ok(Resolution::Open(path)),
        }
    }

    /// Return the dataset for `family` at `time`, opening it if it is not the one already open.
    ///
    /// If the file does not exist, returns [`GriddedError::DatasetNotFound`] and leaves the
    /// currently open dataset in place.
    pub fn resolve(&mut self, family: FieldFamily, time: NaiveDateTime) -> error_stack::Result<&O::Dataset, GriddedError> {
        match self.plan(family, time)? {
            Resolution::Hit => {
                self.stats.hits += 1;
            },
            Resolution::Open(path) => {
                if !self.opener.exists(&path) {
                    self.stats.missing += 1;
                    return Err(Report::new(GriddedError::DatasetNotFound(path)));
                }

                log::info!("reading {}", path.display());
                // Release the old file before opening the new one so at most one per family is held
                self.entries.remove(&family);
                let dataset = self.opener.open(&path)?;
                self.stats.opens += 1;
                self.entries.insert(family, CachedDataset { path, dataset });
            },
        }

        self.cached(family)
    }

    /// Resolve all three families for one observation time, in the order chemistry,
    /// meteorology, boundary layer. Stops at the first that cannot be resolved.
    pub fn resolve_all(&mut self, time: NaiveDateTime) -> error_stack::Result<ModelFields<'_, O::Dataset>, GriddedError> {
        self.resolve(FieldFamily::Chemistry, time)?;
        self.resolve(FieldFamily::Meteorology, time)?;
        self.resolve(FieldFamily::BoundaryLayer, time)?;
        Ok(ModelFields {
            chemistry: self.cached(FieldFamily::Chemistry)?,
            meteorology: self.cached(FieldFamily::Meteorology)?,
            boundary_layer: self.cached(FieldFamily::BoundaryLayer)?,
        })
    }

    fn cached(&self, family: FieldFamily) -> error_stack::Result<&O::Dataset, GriddedError> {
        self.entries.get(&family)
            .map(|e| &e.dataset)
            .ok_or_else(|| Report::new(GriddedError::NoPathRule(family)))
    }
}
