//! The list of Pandora sites and fetching their L2 files.
//!
//! The site list is a JSON array of objects. The only key used here is `pandora_url`,
//! the download location of the site's NO2 L2 file; any other keys (site names,
//! coordinates, notes) are kept but not interpreted.
use std::io::Write;
use std::path::{Path, PathBuf};

use error_stack::{Report, ResultExt};
use serde::{Deserialize, Serialize};

/// Suffix that replaces `.txt` in the name of a Pandora file to form its merged output name
pub const MERGED_SUFFIX: &str = "+GEOSCF.csv";

#[derive(Debug, thiserror::Error)]
pub enum SiteError {
    #[error("Could not read the site list {}", .0.display())]
    CouldNotRead(PathBuf),
    #[error("Site list {} is not a valid JSON list of sites", .0.display())]
    InvalidSiteList(PathBuf),
    #[error("Site index {index} is out of range, the site list has {nsites} entries")]
    SiteIndexOutOfRange { index: usize, nsites: usize },
    #[error("Site {0} has no pandora_url")]
    NoUrl(usize),
    #[error("Cannot get a file name from URL '{0}'")]
    NoFileName(String),
    #[error("Download from {0} failed")]
    DownloadFailed(String),
    #[error("Could not save download to {}", .0.display())]
    CouldNotSave(PathBuf),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SiteEntry {
    #[serde(default)]
    pub pandora_url: Option<String>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl SiteEntry {
    /// Name of the Pandora file, i.e. the last segment of the URL
    pub fn file_name(&self) -> Option<&str> {
        let url = self.pandora_url.as_deref()?;
        url_file_name(url)
    }
}

fn url_file_name(url: &str) -> Option<&str> {
    let name = url.rsplit('/').next()?;
    if name.is_empty() { None } else { Some(name) }
}

/// Name of the merged output file for a Pandora file name
pub fn merged_output_name(obs_file_name: &str) -> String {
    match obs_file_name.strip_suffix(".txt") {
        Some(stem) => format!("{stem}{MERGED_SUFFIX}"),
        None => format!("{obs_file_name}{MERGED_SUFFIX}"),
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SiteRegistry {
    pub sites: Vec<SiteEntry>,
}

impl SiteRegistry {
    pub fn load(path: &Path) -> error_stack::Result<Self, SiteError> {
        let text = std::fs::read_to_string(path)
            .change_context_lazy(|| SiteError::CouldNotRead(path.to_path_buf()))?;
        Self::from_json(&text)
            .change_context_lazy(|| SiteError::InvalidSiteList(path.to_path_buf()))
    }

    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        let sites = serde_json::from_str(json)?;
        Ok(Self { sites })
    }

    pub fn len(&self) -> usize {
        self.sites.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sites.is_empty()
    }

    pub fn get(&self, index: usize) -> Result<&SiteEntry, SiteError> {
        self.sites.get(index)
            .ok_or(SiteError::SiteIndexOutOfRange { index, nsites: self.sites.len() })
    }

    /// The Pandora file and merged output file for the site at `index`
    pub fn site_paths(&self, index: usize, obs_dir: &Path, output_dir: &Path) -> error_stack::Result<(PathBuf, PathBuf), SiteError> {
        let site = self.get(index)?;
        let url = site.pandora_url.as_deref()
            .ok_or(SiteError::NoUrl(index))?;
        let name = url_file_name(url)
            .ok_or_else(|| SiteError::NoFileName(url.to_string()))?;
        Ok((obs_dir.join(name), output_dir.join(merged_output_name(name))))
    }
}

/// Something that can copy a URL's contents to a local file.
pub trait Fetcher {
    fn fetch(&self, url: &str, dest: &Path) -> error_stack::Result<(), SiteError>;
}

/// Downloads over HTTP(S) with a blocking client
pub struct HttpFetcher {
    client: reqwest::blocking::Client,
}

impl HttpFetcher {
    pub fn new() -> error_stack::Result<Self, SiteError> {
        let client = reqwest::blocking::Client::builder()
            .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
            .build()
            .change_context(SiteError::DownloadFailed("<client setup>".to_string()))?;
        Ok(Self { client })
    }
}

impl Fetcher for HttpFetcher {
    fn fetch(&self, url: &str, dest: &Path) -> error_stack::Result<(), SiteError> {
        let err = || SiteError::DownloadFailed(url.to_string());
        let response = self.client.get(url)
            .send()
            .change_context_lazy(err)?;
        let status = response.status();
        if !status.is_success() {
            return Err(Report::new(err())).attach_printable(format!("HTTP status {status}"));
        }

        let bytes = response.bytes().change_context_lazy(err)?;
        write_atomically(dest, &bytes)
    }
}

/// Write `contents` to a sibling of `dest`, then rename it into place.
pub(crate) fn write_atomically(dest: &Path, contents: &[u8]) -> error_stack::Result<(), SiteError> {
    let err = || SiteError::CouldNotSave(dest.to_path_buf());
    let name = dest.file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    let tmp = dest.with_file_name(format!(".{name}.download"));

    let mut f = std::fs::File::create(&tmp).change_context_lazy(err)?;
    f.write_all(contents).change_context_lazy(err)?;
    drop(f);
    std::fs::rename(&tmp, dest).change_context_lazy(err)?;
    Ok(())
}

/// Counts from one [`download_missing`] pass
#[derive(Debug, Default, Clone, PartialEq, Eq, tabled::Tabled)]
pub struct DownloadSummary {
    #[tabled(rename = "Downloaded")]
    pub downloaded: usize,
    #[tabled(rename = "Already present")]
    pub already_present: usize,
    #[tabled(rename = "No URL")]
    pub no_url: usize,
    #[tabled(rename = "Failed")]
    pub failed: usize,
}

/// Download the Pandora file for every site that has a URL and whose file is not already in `obs_dir`.
///
/// A failed download is logged and the loop moves on to the next site.
pub fn download_missing<F: Fetcher>(registry: &SiteRegistry, obs_dir: &Path, fetcher: &F) -> error_stack::Result<DownloadSummary, SiteError> {
    std::fs::create_dir_all(obs_dir)
        .change_context_lazy(|| SiteError::CouldNotSave(obs_dir.to_path_buf()))?;

    let mut summary = DownloadSummary::default();
    for (i, site) in registry.sites.iter().enumerate() {
        let Some(url) = site.pandora_url.as_deref() else {
            log::debug!("Site {i} has no pandora_url, skipping");
            summary.no_url += 1;
            continue;
        };

        let Some(name) = url_file_name(url) else {
            log::warn!("Cannot get a file name from URL '{url}' for site {i}, skipping");
            summary.failed += 1;
            continue;
        };

        let dest = obs_dir.join(name);
        if dest.exists() {
            log::info!("{} already exists, skipping", dest.display());
            summary.already_present += 1;
            continue;
        }

        log::info!("Downloading {url}");
        match fetcher.fetch(url, &dest) {
            Ok(()) => summary.downloaded += 1,
            Err(e) => {
                log::warn!("Failed to download {url}: {e:?}");
                summary.failed += 1;
            }
        }
    }

    Ok(summary)
}
