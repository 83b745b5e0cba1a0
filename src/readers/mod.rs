use chrono::NaiveDateTime;

pub mod pandora;

/// One Pandora L2 record, with the quantities needed for the model matchup.
#[derive(Debug, Clone, PartialEq)]
pub struct Observation {
    /// UTC time of the measurement
    pub time: NaiveDateTime,
    /// Pandora L2 data quality flag
    pub quality_flag: i32,
    /// Surface concentration (mol/m3)
    pub sfc_conc: f64,
    /// Height of the top of the retrieved surface layer, as reported (km)
    pub layer_height_km: f64,
    /// Partial column in the surface layer (mol/m2)
    pub layer_column: f64,
}

impl Observation {
    pub fn layer_height_m(&self) -> f64 {
        self.layer_height_km * 1000.0
    }
}

/// Location of the instrument, read from the file header
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Station {
    pub latitude: f64,
    pub longitude: f64,
}
