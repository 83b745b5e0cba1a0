//! General utilities, not particular to any one reader or step of the matchup.
use std::fmt::Write as _;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

use chrono::format::{Item, StrftimeItems};
use chrono::{DurationRound, NaiveDate, NaiveDateTime, TimeDelta, Timelike};

use crate::error::TemplateError;

/// Errors opening or reading plain text input files
#[derive(Debug, thiserror::Error)]
pub enum FileError {
    /// Used when a file could not be opened, e.g. it does not exist or there was a file system error.
    /// `descr` must be a short description of the file type, `path` the path to the file
    /// attempted to open, and `reason` the root cause of being unable to open the file.
    #[error("Could not open {descr} at {} because: {reason}", .path.display())]
    CouldNotOpen{descr: String, path: PathBuf, reason: String},
    /// Used when the file could be opened, but the filesystem gave an error while reading its contents.
    #[error("Could not read from {} because: {reason}", .path.display())]
    CouldNotRead{path: PathBuf, reason: String},
}

/// A wrapper around another struct implementing the [`BufRead`] trait that reads lines lossily.
///
/// It stores the path of the file opened so that you can reference it more readily in error messages,
/// and counts lines read so that parse errors can point to the offending line.
pub struct FileBuf<'p, F: BufRead> {
    reader: F,
    pub path: &'p Path,
    line_num: usize,
}

impl<'p> FileBuf<'p, BufReader<File>> {
    /// Open a file in buffered mode.
    ///
    /// # Returns
    /// A [`Result`] with the `FileBuf` instance. An error is returned if the file could
    /// not be opened by `std::fs::File::open`; the error from that method will be displayed
    /// as the `reason` string in the returned [`FileError::CouldNotOpen`].
    pub fn open(file: &'p Path, descr: &str) -> Result<Self, FileError> {
        let f = File::open(file)
            .map_err(|e| FileError::CouldNotOpen { descr: descr.to_owned(), path: file.to_owned(), reason: e.to_string() })?;
        Ok(Self { reader: BufReader::new(f), path: file, line_num: 0 })
    }
}

impl<'p, F: BufRead> FileBuf<'p, F> {
    pub fn from_reader(reader: F, path: &'p Path) -> Self {
        Self { reader, path, line_num: 0 }
    }

    /// Read one line, decoding any invalid UTF-8 sequences lossily.
    ///
    /// Returns `Ok(None)` at the end of the file. The trailing newline (and carriage
    /// return, if present) is removed.
    pub fn read_lossy_line(&mut self) -> Result<Option<String>, FileError> {
        let mut buf = Vec::new();
        let n = self.reader.read_until(b'\n', &mut buf)
            .map_err(|e| FileError::CouldNotRead { path: self.path.to_owned(), reason: e.to_string() })?;
        if n == 0 {
            return Ok(None);
        }

        self.line_num += 1;
        let line = String::from_utf8_lossy(&buf);
        Ok(Some(line.trim_end_matches(['\n', '\r']).to_string()))
    }

    /// The 1-based number of the line most recently returned by [`FileBuf::read_lossy_line`]
    pub fn line_num(&self) -> usize {
        self.line_num
    }
}

/// Round a time to the nearest whole hour.
///
/// A time exactly on the half hour goes to whichever neighboring hour is even, so 13:30
/// becomes 14:00 and 14:30 also becomes 14:00.
pub fn round_to_nearest_hour(time: NaiveDateTime) -> Result<NaiveDateTime, TemplateError> {
    let hour = TimeDelta::hours(1);
    let floor = time.duration_trunc(hour)
        .map_err(|_| TemplateError::Rounding(time))?;
    let remainder = time - floor;
    let half = TimeDelta::minutes(30);

    let round_up = remainder > half || (remainder == half && floor.hour() % 2 == 1);
    if round_up {
        floor.checked_add_signed(hour)
            .ok_or(TemplateError::Rounding(time))
    } else {
        Ok(floor)
    }
}

/// Fill in a `strftime`-style path template with the given time.
///
/// Any non-format text (including collection placeholders like `<col>`) is passed through
/// unchanged. An invalid specifier is an error rather than a panic.
pub fn expand_time_template(template: &str, time: NaiveDateTime) -> Result<PathBuf, TemplateError> {
    let items: Vec<Item> = StrftimeItems::new(template).collect();
    if items.iter().any(|it| matches!(it, Item::Error)) {
        return Err(TemplateError::InvalidSpecifier(template.to_string()));
    }

    let mut s = String::new();
    write!(s, "{}", time.format_with_items(items.iter()))
        .map_err(|_| TemplateError::InvalidSpecifier(template.to_string()))?;
    Ok(PathBuf::from(s))
}

/// The last date whose observations can be matched, given that model output
/// lags real time by `latency_days`. Returned as midnight of that day.
pub fn latest_matchable_time(today: NaiveDate, latency_days: u32) -> NaiveDateTime {
    let day = today - TimeDelta::days(latency_days as i64);
    day.and_hms_opt(0, 0, 0)
        .expect("midnight should always be a valid time")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dt(s: &str) -> NaiveDateTime {
        NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S").unwrap()
    }

    #[test]
    fn test_round_to_hour() {
        assert_eq!(round_to_nearest_hour(dt("2024-02-05 13:29:59")).unwrap(), dt("2024-02-05 13:00:00"));
        assert_eq!(round_to_nearest_hour(dt("2024-02-05 13:30:00")).unwrap(), dt("2024-02-05 14:00:00"));
        assert_eq!(round_to_nearest_hour(dt("2024-02-05 14:30:00")).unwrap(), dt("2024-02-05 14:00:00"));
        assert_eq!(round_to_nearest_hour(dt("2024-02-05 23:30:00")).unwrap(), dt("2024-02-06 00:00:00"));
        assert_eq!(round_to_nearest_hour(dt("2024-02-05 00:30:00")).unwrap(), dt("2024-02-05 00:00:00"));
        assert_eq!(round_to_nearest_hour(dt("2024-02-05 23:45:10")).unwrap(), dt("2024-02-06 00:00:00"));
    }

    #[test]
    fn test_round_just_past_half_hour() {
        let t = NaiveDateTime::parse_from_str("2024-02-05 14:30:00.001", "%Y-%m-%d %H:%M:%S%.f").unwrap();
        assert_eq!(round_to_nearest_hour(t).unwrap(), dt("2024-02-05 15:00:00"));
        let t = NaiveDateTime::parse_from_str("2024-02-05 13:29:59.999", "%Y-%m-%d %H:%M:%S%.f").unwrap();
        assert_eq!(round_to_nearest_hour(t).unwrap(), dt("2024-02-05 13:00:00"));
    }

    #[test]
    fn test_expand_template() {
        let p = expand_time_template("Y%Y/M%m/D%d/cf.<col>.%Y%m%d_%H00z.nc4", dt("2024-02-05 07:00:00")).unwrap();
        assert_eq!(p, PathBuf::from("Y2024/M02/D05/cf.<col>.20240205_0700z.nc4"));
    }

    #[test]
    fn test_expand_bad_template() {
        let err = expand_time_template("cf.%Q.nc4", dt("2024-02-05 07:00:00")).unwrap_err();
        assert!(matches!(err, TemplateError::InvalidSpecifier(_)));
    }

    #[test]
    fn test_latest_matchable_time() {
        let today = NaiveDate::from_ymd_opt(2024, 3, 2).unwrap();
        assert_eq!(latest_matchable_time(today, 3), dt("2024-02-28 00:00:00"));
    }

    #[test]
    fn test_lossy_lines() {
        let bytes: &[u8] = b"Location: S\xe3o Paulo\r\nsecond\n";
        let path = PathBuf::from("mem.txt");
        let mut f = FileBuf::from_reader(bytes, &path);
        let first = f.read_lossy_line().unwrap().unwrap();
        assert!(first.starts_with("Location: S"));
        assert!(first.ends_with("o Paulo"));
        assert_eq!(f.read_lossy_line().unwrap().as_deref(), Some("second"));
        assert_eq!(f.line_num(), 2);
        assert!(f.read_lossy_line().unwrap().is_none());
    }
}
