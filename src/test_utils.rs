use std::{
    io::{BufRead, BufReader, Lines},
    path::{Path, PathBuf},
};

use chrono::NaiveDateTime;
use ndarray::{Array3, Array4};

use crate::config::ModelConfig;
use crate::gridded::memory::{MemoryDataset, MemoryOpener};
use crate::gridded::FieldFamily;
use crate::readers::pandora::PandoraFormat;
use crate::readers::Station;

/// Same field layout as the real product, but a much shorter header
pub(crate) fn test_pandora_format() -> PandoraFormat {
    PandoraFormat { preamble_lines: 12, ..Default::default() }
}

/// Header lines for a synthetic Pandora file. The last of the `n` lines is the dashed
/// separator; the location lines are left out if `None`.
pub(crate) fn pandora_preamble(n: usize, lat: Option<f64>, lon: Option<f64>) -> Vec<String> {
    let mut lines = vec![
        "File name: Pandora999s1_Testville_L2_rnvh3p1-8.txt".to_string(),
        "Full location name: Testville, Nowhere".to_string(),
    ];
    if let Some(lat) = lat {
        lines.push(format!("Location latitude [deg]: {lat}"));
    }
    if let Some(lon) = lon {
        lines.push(format!("Location longitude [deg]: {lon}"));
    }
    lines.push("Location altitude [m]: 57".to_string());

    let mut icol = 1;
    while lines.len() + 1 < n {
        lines.push(format!("Column {icol}: placeholder description"));
        icol += 1;
    }
    lines.push("-".repeat(40));
    assert_eq!(lines.len(), n, "preamble too short to hold the metadata lines");
    lines
}

/// One data record with the given values in the default field positions and "0" everywhere else
pub(crate) fn pandora_data_line(time: &str, qflag: i32, sfc_conc: f64, hgt_km: f64, column: f64) -> String {
    let fmt = PandoraFormat::default();
    let mut fields = vec!["0".to_string(); 72];
    fields[fmt.time_field] = time.to_string();
    fields[fmt.quality_flag_field] = qflag.to_string();
    fields[fmt.sfc_conc_field] = format!("{sfc_conc}");
    fields[fmt.layer_height_field] = format!("{hgt_km}");
    fields[fmt.layer_column_field] = format!("{column}");
    fields.join(" ")
}

pub(crate) fn write_lines(dir: &Path, name: &str, lines: &[String]) -> PathBuf {
    let path = dir.join(name);
    let mut contents = lines.join("\n");
    contents.push('\n');
    std::fs::write(&path, contents).expect("Writing a test file should not fail");
    path
}

/// Station used with [`synthetic_model`]; its nearest grid point is (38.75, -77.0), the (1, 1) cell
pub(crate) const SYNTHETIC_STATION: Station = Station { latitude: 38.77, longitude: -77.01 };

pub(crate) const SYNTHETIC_PS: f64 = 101325.0;
pub(crate) const SYNTHETIC_PBL: f64 = 850.0;

/// Raw (top of atmosphere first) profiles in the station's grid cell
pub(crate) const SYNTHETIC_NO2: [f64; 3] = [1e-8, 2e-8, 3e-8];
pub(crate) const SYNTHETIC_T: [f64; 3] = [220.0, 260.0, 290.0];
pub(crate) const SYNTHETIC_DELP: [f64; 3] = [1800.0, 1200.0, 600.0];
pub(crate) const SYNTHETIC_ZL: [f64; 3] = [300.0, 150.0, 50.0];
pub(crate) const SYNTHETIC_Q: [f64; 3] = [0.005, 0.008, 0.01];

/// Build in-memory chemistry, meteorology and boundary layer files for each of `times`,
/// at the paths the model configuration's templates give for those times.
///
/// The grid is 4 x 3. The station cell holds the `SYNTHETIC_*` values; every other cell
/// holds ten times those values, so reading the wrong cell shows up in the results.
pub(crate) fn synthetic_model(config: &ModelConfig, times: &[NaiveDateTime]) -> MemoryOpener {
    let lat = vec![38.5, 38.75, 39.0, 39.25];
    let lon = vec![-77.25, -77.0, -76.75];
    let (nlat, nlon) = (lat.len(), lon.len());
    let scale = |j: usize, i: usize| if (j, i) == (1, 1) { 1.0 } else { 10.0 };
    let profile = |values: [f64; 3]| {
        Array4::from_shape_fn((1, 3, nlat, nlon), |(_, k, j, i)| values[k] * scale(j, i)).into_dyn()
    };
    let surface = |value: f64| {
        Array3::from_shape_fn((1, nlat, nlon), |(_, j, i)| value * scale(j, i)).into_dyn()
    };

    let vars = &config.variables;
    let rules = config.path_rules();
    let mut opener = MemoryOpener::default();
    for &t in times {
        let chm = rules[&FieldFamily::Chemistry].path_for(t).unwrap();
        opener.insert(
            MemoryDataset::new(chm, lat.clone(), lon.clone())
                .with_variable(&vars.mixing_ratio, profile(SYNTHETIC_NO2))
        );

        let met = rules[&FieldFamily::Meteorology].path_for(t).unwrap();
        opener.insert(
            MemoryDataset::new(met, lat.clone(), lon.clone())
                .with_variable(&vars.surface_pressure, surface(SYNTHETIC_PS))
                .with_variable(&vars.temperature, profile(SYNTHETIC_T))
                .with_variable(&vars.pressure_thickness, profile(SYNTHETIC_DELP))
                .with_variable(&vars.mid_layer_height, profile(SYNTHETIC_ZL))
                .with_variable(&vars.specific_humidity, profile(SYNTHETIC_Q))
        );

        let pbl = rules[&FieldFamily::BoundaryLayer].path_for(t).unwrap();
        opener.insert(
            MemoryDataset::new(pbl, lat.clone(), lon.clone())
                .with_variable(&vars.pbl_height, surface(SYNTHETIC_PBL))
        );
    }
    opener
}

/// Iterate over fenced blocks tagged with `tag` in a series of Markdown files.
///
/// Each item is the text between the opening and closing fence, without a trailing newline.
pub fn iter_fenced_blocks<P, F, I>(tag: &str, files: I) -> FencedBlocks<P, F>
where
    P: AsRef<Path>,
    F: Iterator<Item = P>,
    I: IntoIterator<IntoIter = F>,
{
    FencedBlocks { fence_start: format!("```{tag}"), files: files.into_iter(), lines: None, line_num: 0 }
}

pub struct FencedBlocks<P, F>
where
    P: AsRef<Path>,
    F: Iterator<Item = P>,
{
    fence_start: String,
    files: F,
    lines: Option<Lines<BufReader<std::fs::File>>>,
    line_num: usize,
}

impl<P, F> Iterator for FencedBlocks<P, F>
where
    P: AsRef<Path>,
    F: Iterator<Item = P>,
{
    type Item = std::io::Result<String>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if self.lines.is_none() {
                let path = self.files.next()?;
                match std::fs::File::open(path.as_ref()) {
                    Ok(f) => self.lines = Some(BufReader::new(f).lines()),
                    Err(e) => return Some(Err(e)),
                }
                self.line_num = 0;
            }

            match self.next_line() {
                Some(Ok(line)) if line.starts_with(&self.fence_start) => {
                    return Some(self.read_block(self.line_num));
                },
                Some(Ok(_)) => (),
                Some(Err(e)) => return Some(Err(e)),
                // End of this file, move on to the next
                None => self.lines = None,
            }
        }
    }
}

impl<P, F> FencedBlocks<P, F>
where
    P: AsRef<Path>,
    F: Iterator<Item = P>,
{
    fn read_block(&mut self, starting_line: usize) -> std::io::Result<String> {
        let mut block = vec![];
        loop {
            match self.next_line() {
                Some(Ok(line)) if line.starts_with("```") => return Ok(block.join("\n")),
                Some(Ok(line)) => block.push(line),
                Some(Err(e)) => return Err(e),
                None => {
                    let msg = format!("fenced block starting at line {starting_line} was still unclosed at the end of the file");
                    return Err(std::io::Error::other(msg));
                }
            }
        }
    }

    fn next_line(&mut self) -> Option<std::io::Result<String>> {
        self.line_num += 1;
        self.lines.as_mut().and_then(|it| it.next())
    }
}

#[cfg(test)]
mod tests {
    use itertools::Itertools;

    use super::*;

    #[test]
    fn test_fenced_iter() {
        let dir = tempfile::tempdir().unwrap();
        let f1 = write_lines(dir.path(), "a.md", &[
            "# Title".to_string(), "```toml".to_string(), "key1 = 1".to_string(), "key2 = 2".to_string(), "```".to_string(),
            "```text".to_string(), "not toml".to_string(), "```".to_string(),
        ]);
        let f2 = write_lines(dir.path(), "b.md", &[
            "```toml".to_string(), "key3 = 3".to_string(), "```".to_string(),
        ]);

        let expected = ["key1 = 1\nkey2 = 2", "key3 = 3"];
        for (s, exp) in iter_fenced_blocks("toml", [f1, f2]).zip_eq(expected) {
            assert_eq!(s.unwrap(), exp);
        }
    }

    #[test]
    fn test_unclosed_block() {
        let dir = tempfile::tempdir().unwrap();
        let f = write_lines(dir.path(), "a.md", &["```toml".to_string(), "key1 = 1".to_string()]);
        let mut it = iter_fenced_blocks("toml", [f]);
        assert!(it.next().unwrap().is_err());
    }

    #[test]
    fn test_synthetic_station_cell() {
        let lat = [38.5, 38.75, 39.0, 39.25];
        let lon = [-77.25, -77.0, -76.75];
        let cell = crate::gridded::nearest_cell(&lat, &lon, SYNTHETIC_STATION.latitude, SYNTHETIC_STATION.longitude, Path::new("mem")).unwrap();
        assert_eq!(cell, (1, 1));
    }

    #[test]
    fn test_preamble_length() {
        let lines = pandora_preamble(12, Some(1.0), Some(2.0));
        assert_eq!(lines.len(), 12);
        assert!(lines[11].starts_with("---"));
    }
}
