//! Writer for the merged Pandora + model CSV files.
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use error_stack::ResultExt;

use crate::error::WriteError;
use crate::matching::MergedRecord;

pub const DATE_FORMAT: &str = "%Y-%m-%d %H:%M";

/// Column names, in order, for a given species (e.g. "no2")
pub fn column_names(species: &str) -> Vec<String> {
    let sp = species.to_lowercase();
    vec![
        "date".to_string(),
        format!("pandora_{sp}_qval"),
        format!("pandora_{sp}_sfcconc"),
        format!("pandora_{sp}_l1hgt"),
        format!("pandora_{sp}_l1col"),
        format!("pandora_{sp}_sfcmr"),
        format!("cf_{sp}_sfcmr"),
        format!("cf_{sp}_sfcconc"),
        format!("cf_{sp}_l1col"),
        format!("cf_{sp}_pbl"),
        "lat".to_string(),
        "lon".to_string(),
    ]
}

/// Write the header and one row per record. Missing (NaN) values are left empty.
pub fn write_merged_csv<W: Write>(mut f: W, records: &[MergedRecord], species: &str) -> error_stack::Result<(), WriteError> {
    writeln!(f, "{}", column_names(species).join(","))
        .change_context(WriteError::IoError)?;

    for rec in records {
        let obs = &rec.observation;
        let d = &rec.derived;
        let row = [
            obs.time.format(DATE_FORMAT).to_string(),
            obs.quality_flag.to_string(),
            format_value(obs.sfc_conc),
            format_value(obs.layer_height_km),
            format_value(obs.layer_column),
            format_value(d.instrument_sfc_ppb),
            format_value(d.model_sfc_ppb),
            format_value(d.model_sfc_conc),
            format_value(d.model_partial_column),
            format_value(d.model_pbl_height),
            format_value(rec.station.latitude),
            format_value(rec.station.longitude),
        ];
        writeln!(f, "{}", row.join(","))
            .change_context(WriteError::IoError)?;
    }

    f.flush().change_context(WriteError::IoError)?;
    Ok(())
}

/// Write the records to `path`.
///
/// The output goes to a hidden sibling file first and is only renamed to `path` once
/// complete, so `path` never exists in a partly written state.
pub fn write_merged_csv_file(path: &Path, records: &[MergedRecord], species: &str) -> error_stack::Result<(), WriteError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .change_context_lazy(|| WriteError::CouldNotCreate(parent.to_path_buf()))?;
    }

    let tmp_path = partial_path(path);
    let f = File::create(&tmp_path)
        .change_context_lazy(|| WriteError::CouldNotCreate(tmp_path.clone()))?;
    let result = write_merged_csv(BufWriter::new(f), records, species);
    if result.is_err() {
        let _ = std::fs::remove_file(&tmp_path);
        return result.attach_printable_lazy(|| format!("while writing {}", tmp_path.display()));
    }

    std::fs::rename(&tmp_path, path)
        .change_context_lazy(|| WriteError::CouldNotRename { from: tmp_path.clone(), to: path.to_path_buf() })?;
    log::info!("Wrote {} records to {}", records.len(), path.display());
    Ok(())
}

fn partial_path(path: &Path) -> PathBuf {
    let name = path.file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    path.with_file_name(format!(".{name}.partial"))
}

/// Shortest representation that reads back to the same value, written the way Python's
/// `repr` writes floats: scientific notation with a signed, two-digit exponent below 1e-4
/// or from 1e16 up, and a trailing ".0" on whole numbers. NaN is an empty string.
fn format_value(v: f64) -> String {
    if v.is_nan() {
        String::new()
    } else if v != 0.0 && v.is_finite() && (v.abs() < 1e-4 || v.abs() >= 1e16) {
        let s = format!("{v:e}");
        let (mantissa, exponent) = s.split_once('e').unwrap_or((s.as_str(), "0"));
        let exponent: i32 = exponent.parse().unwrap_or(0);
        let sign = if exponent < 0 { '-' } else { '+' };
        format!("{mantissa}e{sign}{:02}", exponent.abs())
    } else {
        let s = format!("{v}");
        if v.is_finite() && !s.contains('.') {
            format!("{s}.0")
        } else {
            s
        }
    }
}
