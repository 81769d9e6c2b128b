// src/index.rs

//! Package index client
//!
//! Python packages built from source need two things from the index: the
//! sdist URL for a version, and (for `--all-versions`) the list of versions
//! worth building. Both come from the PyPI JSON API.

use crate::error::{Error, Result};
use chrono::{Datelike, NaiveDateTime};
use reqwest::blocking::Client;
use serde::Deserialize;
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Default index endpoint
pub const PYPI_URL: &str = "https://pypi.org/pypi";

/// Timeout for index requests
const HTTP_TIMEOUT: Duration = Duration::from_secs(30);

/// Maximum attempts for an index request
const MAX_RETRIES: u32 = 3;

/// Retry delay in milliseconds, multiplied by the attempt number
const RETRY_DELAY_MS: u64 = 1000;

/// One file of a release, as reported by the index
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct ReleaseFile {
    pub packagetype: String,
    pub filename: String,
    pub url: String,
    #[serde(default)]
    pub upload_time: String,
    #[serde(default)]
    pub python_version: String,
    #[serde(default)]
    pub yanked: bool,
}

impl ReleaseFile {
    /// Year the file was uploaded, if the timestamp is readable
    pub fn upload_year(&self) -> Option<i32> {
        let stamp = self.upload_time.trim_end_matches('Z');
        NaiveDateTime::parse_from_str(stamp, "%Y-%m-%dT%H:%M:%S%.f")
            .map(|t| t.year())
            .ok()
            .or_else(|| stamp.get(..4)?.parse().ok())
    }
}

/// Files per release version
pub type Releases = BTreeMap<String, Vec<ReleaseFile>>;

#[derive(Debug, Deserialize)]
struct ProjectResponse {
    #[serde(default)]
    releases: Releases,
}

/// Which existing binary releases make a version worth building
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CandidateFilter {
    /// Substring a wheel filename must contain, e.g. `-macosx_`
    pub platform_marker: String,
    /// Python tag a wheel must carry, e.g. `cp311`
    pub python_tag: String,
}

impl CandidateFilter {
    /// Versions with macOS wheels for the given Python tag
    pub fn macos(python_tag: impl Into<String>) -> Self {
        Self {
            platform_marker: "-macosx_".to_string(),
            python_tag: python_tag.into(),
        }
    }

    fn matches(&self, file: &ReleaseFile, since_year: i32) -> bool {
        file.packagetype == "bdist_wheel"
            && file.filename.contains(&self.platform_marker)
            && file.python_version == self.python_tag
            && file.upload_year().is_some_and(|year| year >= since_year)
    }
}

/// Compare dotted versions by numeric components
pub fn compare_versions(a: &str, b: &str) -> Ordering {
    let parts = |v: &str| -> Vec<u64> { v.split('.').map(|p| p.parse().unwrap_or(0)).collect() };
    parts(a).cmp(&parts(b)).then_with(|| a.cmp(b))
}

/// Source of release information
pub trait IndexProvider: Send + Sync {
    /// All releases of a project
    fn list_releases(&self, name: &str) -> Result<Releases>;

    /// URL of the non-yanked sdist for a version
    fn source_url(&self, name: &str, version: &str) -> Result<String> {
        let releases = self.list_releases(name)?;
        let files = releases
            .get(version)
            .ok_or_else(|| Error::Index(format!("{name} has no release {version}")))?;
        files
            .iter()
            .find(|f| f.packagetype == "sdist" && !f.yanked)
            .map(|f| f.url.clone())
            .ok_or_else(|| Error::Index(format!("{name} {version} has no source distribution")))
    }

    /// Release versions since `since_year` that have matching binary wheels,
    /// oldest first
    ///
    /// Pre-releases (any version containing a letter) are never candidates.
    fn candidate_versions(
        &self,
        name: &str,
        since_year: i32,
        filter: &CandidateFilter,
    ) -> Result<Vec<String>> {
        let releases = self.list_releases(name)?;
        let mut versions: Vec<String> = releases
            .into_iter()
            .filter(|(version, _)| !version.chars().any(|c| c.is_ascii_alphabetic()))
            .filter(|(_, files)| files.iter().any(|f| filter.matches(f, since_year)))
            .map(|(version, _)| version)
            .collect();
        versions.sort_by(|a, b| compare_versions(a, b));
        Ok(versions)
    }
}

/// [`IndexProvider`] over the PyPI JSON API
///
/// Responses are cached for the life of the provider.
pub struct PyPiIndex {
    client: Client,
    base_url: String,
    cache: Mutex<HashMap<String, Arc<Releases>>>,
}

impl PyPiIndex {
    pub fn new() -> Result<Self> {
        Self::with_base_url(PYPI_URL)
    }

    pub fn with_base_url(base_url: impl Into<String>) -> Result<Self> {
        let client = Client::builder()
            .timeout(HTTP_TIMEOUT)
            .user_agent(concat!("forge/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| Error::Index(format!("failed to create HTTP client: {e}")))?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            cache: Mutex::new(HashMap::new()),
        })
    }

    fn fetch(&self, name: &str) -> Result<Releases> {
        let url = format!("{}/{}/json", self.base_url, name);
        info!("Fetching release data from {}", url);

        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.client.get(&url).send() {
                Ok(response) => {
                    if !response.status().is_success() {
                        return Err(Error::Index(format!("HTTP {} from {}", response.status(), url)));
                    }
                    let project: ProjectResponse = response
                        .json()
                        .map_err(|e| Error::Index(format!("failed to parse {url}: {e}")))?;
                    debug!("{} has {} releases", name, project.releases.len());
                    return Ok(project.releases);
                }
                Err(e) => {
                    if attempt >= MAX_RETRIES {
                        return Err(Error::Index(format!(
                            "failed to fetch {url} after {attempt} attempts: {e}"
                        )));
                    }
                    warn!("Index request attempt {} failed: {}, retrying...", attempt, e);
                    std::thread::sleep(Duration::from_millis(RETRY_DELAY_MS * attempt as u64));
                }
            }
        }
    }
}

impl IndexProvider for PyPiIndex {
    fn list_releases(&self, name: &str) -> Result<Releases> {
        let key = crate::recipe::canonicalize_name(name);
        if let Some(releases) = self.cache.lock().ok().and_then(|c| c.get(&key).cloned()) {
            return Ok((*releases).clone());
        }
        let releases = Arc::new(self.fetch(name)?);
        if let Ok(mut cache) = self.cache.lock() {
            cache.insert(key, releases.clone());
        }
        Ok((*releases).clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixed(Releases);

    impl IndexProvider for Fixed {
        fn list_releases(&self, _name: &str) -> Result<Releases> {
            Ok(self.0.clone())
        }
    }

    fn file(packagetype: &str, filename: &str, python: &str, uploaded: &str) -> ReleaseFile {
        ReleaseFile {
            packagetype: packagetype.to_string(),
            filename: filename.to_string(),
            url: format!("https://files.example.com/{filename}"),
            upload_time: uploaded.to_string(),
            python_version: python.to_string(),
            yanked: false,
        }
    }

    fn releases() -> Releases {
        let mut releases = Releases::new();
        releases.insert(
            "1.10.0".to_string(),
            vec![
                file("sdist", "widget-1.10.0.tar.gz", "source", "2024-02-01T10:00:00"),
                file("bdist_wheel", "widget-1.10.0-cp311-cp311-macosx_11_0_arm64.whl", "cp311", "2024-02-01T10:00:00"),
            ],
        );
        releases.insert(
            "1.9.0".to_string(),
            vec![file("bdist_wheel", "widget-1.9.0-cp311-cp311-macosx_11_0_arm64.whl", "cp311", "2023-06-01T10:00:00.123456")],
        );
        releases.insert(
            "1.2.0".to_string(),
            vec![file("bdist_wheel", "widget-1.2.0-cp311-cp311-macosx_11_0_arm64.whl", "cp311", "2019-06-01T10:00:00")],
        );
        releases.insert(
            "2.0.0rc1".to_string(),
            vec![file("bdist_wheel", "widget-2.0.0rc1-cp311-cp311-macosx_11_0_arm64.whl", "cp311", "2024-05-01T10:00:00")],
        );
        releases.insert(
            "1.11.0".to_string(),
            vec![file("bdist_wheel", "widget-1.11.0-cp312-cp312-macosx_11_0_arm64.whl", "cp312", "2024-05-01T10:00:00")],
        );
        releases.insert(
            "1.12.0".to_string(),
            vec![file("bdist_wheel", "widget-1.12.0-cp311-cp311-manylinux_2_17_x86_64.whl", "cp311", "2024-05-01T10:00:00")],
        );
        releases
    }

    #[test]
    fn test_candidate_versions() {
        let index = Fixed(releases());
        let versions = index
            .candidate_versions("widget", 2022, &CandidateFilter::macos("cp311"))
            .unwrap();
        assert_eq!(versions, vec!["1.9.0", "1.10.0"]);
    }

    #[test]
    fn test_source_url() {
        let mut releases = releases();
        releases.get_mut("1.9.0").unwrap().push(ReleaseFile {
            yanked: true,
            ..file("sdist", "widget-1.9.0.tar.gz", "source", "2023-06-01T10:00:00")
        });
        let index = Fixed(releases);

        assert_eq!(
            index.source_url("widget", "1.10.0").unwrap(),
            "https://files.example.com/widget-1.10.0.tar.gz"
        );
        assert!(matches!(index.source_url("widget", "1.9.0"), Err(Error::Index(_))));
        assert!(matches!(index.source_url("widget", "9.9"), Err(Error::Index(_))));
    }

    #[test]
    fn test_compare_versions() {
        assert_eq!(compare_versions("1.10.0", "1.9.0"), Ordering::Greater);
        assert_eq!(compare_versions("1.2", "1.2.0"), Ordering::Less);
        assert_eq!(compare_versions("2.0", "2.0"), Ordering::Equal);
    }

    #[test]
    fn test_upload_year() {
        let f = file("sdist", "x", "source", "2021-03-04T05:06:07Z");
        assert_eq!(f.upload_year(), Some(2021));
        assert_eq!(file("sdist", "x", "source", "").upload_year(), None);
    }

    #[test]
    fn test_parse_project_response() {
        let json = r#"{
            "info": {"name": "widget"},
            "releases": {
                "1.0": [{
                    "packagetype": "sdist",
                    "filename": "widget-1.0.tar.gz",
                    "url": "https://files.example.com/widget-1.0.tar.gz",
                    "upload_time": "2024-01-01T00:00:00",
                    "python_version": "source",
                    "yanked": false,
                    "size": 1234
                }]
            }
        }"#;
        let project: ProjectResponse = serde_json::from_str(json).unwrap();
        assert_eq!(project.releases["1.0"][0].filename, "widget-1.0.tar.gz");
    }
}
