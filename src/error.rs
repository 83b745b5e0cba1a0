//! Common errors across the pandora-cf crate

/// Errors related to writing output files
#[derive(Debug, thiserror::Error)]
pub enum WriteError {
    #[error("Could not create output file {}", .0.display())]
    CouldNotCreate(std::path::PathBuf),
    #[error("Error writing to output")]
    IoError,
    #[error("Could not move temporary output {} into place at {}", .from.display(), .to.display())]
    CouldNotRename{from: std::path::PathBuf, to: std::path::PathBuf},
}

/// Errors related to expanding time-templated paths
#[derive(Debug, thiserror::Error)]
pub enum TemplateError {
    #[error("Path template '{0}' contains an invalid strftime specifier")]
    InvalidSpecifier(String),
    #[error("Could not round {0} to the nearest hour")]
    Rounding(chrono::NaiveDateTime),
}
