//! Reader for Pandora L2 surface/partial-column files (e.g. `*_L2_rnvh3p1-8.txt`).
//!
//! These files start with a block of free-form metadata and column descriptions,
//! then have one record per line. Each record is a single-space separated list of
//! values; the fields needed here are picked out by position.
use std::{path::Path, sync::OnceLock};

use chrono::NaiveDateTime;
use error_stack::ResultExt;
use serde::{Deserialize, Serialize};

use crate::utils::FileBuf;
use super::{Observation, Station};

static LOCATION_REGEX: OnceLock<regex::Regex> = OnceLock::new();

#[derive(Debug, thiserror::Error)]
pub enum PandoraReadError {
    #[error("Could not read Pandora file")]
    Io,
    #[error("Malformed record on line {line}: {reason}")]
    MalformedRecord { line: usize, reason: String },
    #[error("Station location missing from header: {0}")]
    MissingMetadata(String),
}

impl PandoraReadError {
    fn malformed<S: ToString>(line: usize, reason: S) -> Self {
        Self::MalformedRecord { line, reason: reason.to_string() }
    }
}

/// Where to find things in a Pandora file. Field indices are 0-based positions after
/// splitting a record line on single spaces.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PandoraFormat {
    /// Number of lines before the first record
    pub preamble_lines: usize,
    pub time_field: usize,
    pub quality_flag_field: usize,
    pub sfc_conc_field: usize,
    pub layer_height_field: usize,
    pub layer_column_field: usize,
}

impl Default for PandoraFormat {
    /// Field layout of the rnvh3p1-8 product
    fn default() -> Self {
        Self {
            preamble_lines: 93,
            time_field: 0,
            quality_flag_field: 52,
            sfc_conc_field: 55,
            layer_height_field: 67,
            layer_column_field: 68,
        }
    }
}

impl PandoraFormat {
    fn max_field(&self) -> usize {
        [self.time_field, self.quality_flag_field, self.sfc_conc_field, self.layer_height_field, self.layer_column_field]
            .into_iter()
            .max()
            .unwrap_or(0)
    }
}

/// The contents of one Pandora file needed for matching
#[derive(Debug, Clone)]
pub struct PandoraFile {
    pub station: Station,
    pub observations: Vec<Observation>,
}

/// Read the station location and all records from a Pandora file.
///
/// Fails on the first record that does not have enough fields or has a value that
/// cannot be parsed, and if the header does not give both the latitude and longitude.
pub fn read_pandora_file(path: &Path, format: &PandoraFormat) -> error_stack::Result<PandoraFile, PandoraReadError> {
    log::info!("Reading {}", path.display());
    let mut rdr = FileBuf::open(path, "Pandora file")
        .change_context(PandoraReadError::Io)?;

    let mut latitude = None;
    let mut longitude = None;
    for _ in 0..format.preamble_lines {
        let line = rdr.read_lossy_line()
            .change_context(PandoraReadError::Io)?;
        let Some(line) = line else { break };

        match parse_location_line(&line)? {
            Some(LocationValue::Latitude(v)) => {
                log::info!("location latitude: {v}");
                latitude = Some(v);
            },
            Some(LocationValue::Longitude(v)) => {
                log::info!("location longitude: {v}");
                longitude = Some(v);
            },
            None => (),
        }
    }

    let station = match (latitude, longitude) {
        (Some(latitude), Some(longitude)) => Station { latitude, longitude },
        (None, _) => return Err(PandoraReadError::MissingMetadata("no 'Location latitude' line".to_string()))
            .attach_printable_lazy(|| format!("in {}", path.display())),
        (_, None) => return Err(PandoraReadError::MissingMetadata("no 'Location longitude' line".to_string()))
            .attach_printable_lazy(|| format!("in {}", path.display())),
    };

    let mut observations = vec![];
    while let Some(line) = rdr.read_lossy_line().change_context(PandoraReadError::Io)? {
        if is_separator(&line) {
            continue;
        }

        let obs = parse_record(&line, rdr.line_num(), format)
            .attach_printable_lazy(|| format!("in {}", path.display()))?;
        observations.push(obs);
    }

    log::debug!("Read {} records from {}", observations.len(), path.display());
    Ok(PandoraFile { station, observations })
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum LocationValue {
    Latitude(f64),
    Longitude(f64),
}

fn parse_location_line(line: &str) -> Result<Option<LocationValue>, PandoraReadError> {
    let re = LOCATION_REGEX.get_or_init(|| {
        regex::Regex::new(r"Location (?<which>latitude|longitude)[^:]*:(?<value>[^:]*)")
            .expect("Could not compile location regex")
    });

    let Some(caps) = re.captures(line) else { return Ok(None) };
    let value: String = caps["value"].split_whitespace().collect();
    let v = value.parse::<f64>()
        .map_err(|_| PandoraReadError::MissingMetadata(format!(
            "could not parse location {} value '{value}' as a number", &caps["which"]
        )))?;

    if &caps["which"] == "latitude" {
        Ok(Some(LocationValue::Latitude(v)))
    } else {
        Ok(Some(LocationValue::Longitude(v)))
    }
}

/// Blank lines and the dashed lines that close the header carry no data
fn is_separator(line: &str) -> bool {
    let line = line.trim();
    line.is_empty() || line.chars().all(|c| c == '-')
}

fn parse_record(line: &str, line_num: usize, format: &PandoraFormat) -> Result<Observation, PandoraReadError> {
    let fields: Vec<&str> = line.split(' ').collect();
    let nreq = format.max_field() + 1;
    if fields.len() < nreq {
        return Err(PandoraReadError::malformed(
            line_num, format!("expected at least {nreq} fields, found {}", fields.len())
        ));
    }

    let time = parse_pandora_time(fields[format.time_field])
        .ok_or_else(|| PandoraReadError::malformed(
            line_num, format!("could not parse '{}' as a timestamp", fields[format.time_field])
        ))?;

    Ok(Observation {
        time,
        quality_flag: parse_field(&fields, format.quality_flag_field, "quality flag", line_num)?,
        sfc_conc: parse_field(&fields, format.sfc_conc_field, "surface concentration", line_num)?,
        layer_height_km: parse_field(&fields, format.layer_height_field, "layer height", line_num)?,
        layer_column: parse_field(&fields, format.layer_column_field, "layer column", line_num)?,
    })
}

fn parse_field<T: std::str::FromStr>(fields: &[&str], idx: usize, name: &str, line_num: usize) -> Result<T, PandoraReadError> {
    let s = fields[idx];
    s.parse::<T>().map_err(|_| PandoraReadError::malformed(
        line_num, format!("could not parse {name} value '{s}' in field {idx}")
    ))
}

/// Parse times like "20240205T143012.5z" (UTC, fractional seconds optional)
pub fn parse_pandora_time(s: &str) -> Option<NaiveDateTime> {
    let s = s.strip_suffix(['z', 'Z'])?;
    NaiveDateTime::parse_from_str(s, "%Y%m%dT%H%M%S%.f").ok()
}
