//! Settings and run request
//!
//! Settings come from a TOML file in the platform config directory; the run
//! request (languages, season, episodes) comes from the command line.

use serde::Deserialize;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Errors that can occur while loading settings or parsing a request
#[derive(Debug, Error)]
pub enum SettingsError {
    /// Failed to determine the platform directories
    #[error("Failed to determine config directory location")]
    ConfigDirectoryNotFound,

    #[error("Failed to read settings file {path}: {source}")]
    ReadFailed {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse settings file {path}: {source}")]
    ParseFailed {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("Folder \"{}\" for {name} doesn't exist.", path.display())]
    FolderMissing { name: &'static str, path: PathBuf },

    #[error("No {kind} configured for language \"{language}\"")]
    MissingCatalogEntry { kind: &'static str, language: String },

    #[error("Invalid season: {0}")]
    InvalidSeason(String),

    #[error("Invalid episode: {0}")]
    InvalidEpisode(String),

    #[error("Duplicate episode: {0}")]
    DuplicateEpisode(u32),

    #[error("Invalid language: {0}")]
    InvalidLanguage(String),

    #[error("Duplicate language: {0}")]
    DuplicateLanguage(String),
}

fn project_dirs() -> Result<directories::ProjectDirs, SettingsError> {
    directories::ProjectDirs::from("de", "westhoffswelt", "episodeassembler")
        .ok_or(SettingsError::ConfigDirectoryNotFound)
}

/// Remote catalog endpoints
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CatalogSettings {
    /// HTML page listing the seasons, per language
    pub available_seasons_url: HashMap<String, String>,

    /// JSON episode listing per language; supports `{resultsPerPage}`,
    /// `{currentPage}`, `{sort}` and `{relatedItemId}`
    pub available_episodes_url: HashMap<String, String>,

    /// Mirror URIs of an episode, tried in order; `{itemId}` is replaced
    pub episode_uri_templates: Vec<String>,

    /// Feed URL for one mirror URI; `{uri}` is replaced
    pub episode_feed_url: String,

    /// Chapter name per language, numbered by the muxer
    pub chapter_name: HashMap<String, String>,
}

impl Default for CatalogSettings {
    fn default() -> Self {
        Self {
            available_seasons_url: HashMap::new(),
            available_episodes_url: HashMap::new(),
            episode_uri_templates: vec![
                "mgid:arc:episode:southparkstudios.com:{itemId}".to_string(),
                "mgid:arc:episode:southpark.de:{itemId}".to_string(),
            ],
            episode_feed_url:
                "http://media.mtvnservices.com/pmt/e1/access/index.html?uri={uri}&configtype=edge"
                    .to_string(),
            chapter_name: HashMap::from([
                ("de".to_string(), "Kapitel".to_string()),
                ("en".to_string(), "Chapter".to_string()),
            ]),
        }
    }
}

impl CatalogSettings {
    pub fn available_seasons_url(&self, language: &str) -> Option<&str> {
        self.available_seasons_url.get(language).map(String::as_str)
    }

    pub fn available_episodes_url(&self, language: &str, season: u32) -> Option<String> {
        self.available_episodes_url.get(language).map(|template| {
            template
                .replace("{resultsPerPage}", "30")
                .replace("{currentPage}", "1")
                .replace("{sort}", "!airdate")
                .replace("{relatedItemId}", &format!("season-{}", season))
        })
    }

    /// Feed URLs for every mirror of an episode, in the order to try them
    pub fn episode_feed_urls(&self, item_id: &str) -> Vec<String> {
        self.episode_uri_templates
            .iter()
            .map(|uri| {
                self.episode_feed_url
                    .replace("{uri}", &uri.replace("{itemId}", item_id))
            })
            .collect()
    }

    pub fn chapter_name(&self, language: &str) -> Option<&str> {
        self.chapter_name.get(language).map(String::as_str)
    }
}

/// Application settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub tmp_folder: PathBuf,
    pub download_folder: PathBuf,
    pub output_folder: PathBuf,

    /// ffmpeg executable; defaults to the sidecar location / `PATH`
    pub ffmpeg: Option<PathBuf>,
    pub mkvmerge: PathBuf,

    /// Per-download timeout; unset means no timeout
    pub download_timeout_secs: Option<f64>,
    /// How often one download may time out before the run fails; unset means no limit
    pub max_timeout_retries: Option<u32>,
    pub poll_interval_ms: u64,

    pub verify_checksums: bool,
    pub update_checksum_on_successful_download: bool,

    pub print_urls: bool,
    pub print_command_calls: bool,
    pub quiet_commands: bool,

    pub go_on_if_downloaded_file_exists: bool,
    pub go_on_if_final_file_exists: bool,

    pub remove_temp_files: bool,
    pub remove_downloaded_files: bool,

    /// Prefix of output filenames and embedded titles
    pub show_name: String,

    pub checksum_ledger: Option<PathBuf>,
    pub anomaly_ledger: Option<PathBuf>,

    pub catalog: CatalogSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            tmp_folder: std::env::temp_dir(),
            download_folder: PathBuf::from("."),
            output_folder: PathBuf::from("."),
            ffmpeg: None,
            mkvmerge: PathBuf::from("mkvmerge"),
            download_timeout_secs: None,
            max_timeout_retries: None,
            poll_interval_ms: 250,
            verify_checksums: true,
            update_checksum_on_successful_download: false,
            print_urls: false,
            print_command_calls: false,
            quiet_commands: true,
            go_on_if_downloaded_file_exists: true,
            go_on_if_final_file_exists: true,
            remove_temp_files: true,
            remove_downloaded_files: false,
            show_name: "South Park".to_string(),
            checksum_ledger: None,
            anomaly_ledger: None,
            catalog: CatalogSettings::default(),
        }
    }
}

impl Settings {
    /// Location of the settings file when none is given explicitly
    ///
    /// - Linux: ~/.config/episodeassembler/settings.toml
    /// - macOS: ~/Library/Application Support/de.westhoffswelt.episodeassembler/settings.toml
    /// - Windows: %APPDATA%\westhoffswelt\episodeassembler\config\settings.toml
    pub fn default_path() -> Result<PathBuf, SettingsError> {
        Ok(project_dirs()?.config_dir().join("settings.toml"))
    }

    /// Loads settings from `path`; a missing file yields the defaults
    pub fn load(path: &Path) -> Result<Self, SettingsError> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = fs::read_to_string(path).map_err(|e| SettingsError::ReadFailed {
            path: path.to_path_buf(),
            source: e,
        })?;

        Self::from_toml(&content).map_err(|e| SettingsError::ParseFailed {
            path: path.to_path_buf(),
            source: e,
        })
    }

    pub fn from_toml(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    /// Checks that folders exist and the catalog knows every requested language
    pub fn validate(&self, languages: &[String]) -> Result<(), SettingsError> {
        for (name, path) in [
            ("temporary files", &self.tmp_folder),
            ("downloads", &self.download_folder),
            ("output", &self.output_folder),
        ] {
            if !path.is_dir() {
                return Err(SettingsError::FolderMissing {
                    name,
                    path: path.clone(),
                });
            }
        }

        for language in languages {
            let missing = |kind| SettingsError::MissingCatalogEntry {
                kind,
                language: language.clone(),
            };

            if self.catalog.available_seasons_url(language).is_none() {
                return Err(missing("season listing URL"));
            }
            if self.catalog.available_episodes_url(language, 1).is_none() {
                return Err(missing("episode listing URL"));
            }
            if self.catalog.chapter_name(language).is_none() {
                return Err(missing("chapter name"));
            }
        }

        Ok(())
    }

    pub fn ffmpeg_path(&self) -> PathBuf {
        self.ffmpeg
            .clone()
            .unwrap_or_else(ffmpeg_sidecar::paths::ffmpeg_path)
    }

    pub fn checksum_ledger_path(&self) -> Result<PathBuf, SettingsError> {
        match &self.checksum_ledger {
            Some(path) => Ok(path.clone()),
            None => Ok(project_dirs()?.data_dir().join("checksums.json")),
        }
    }

    pub fn anomaly_ledger_path(&self) -> Result<PathBuf, SettingsError> {
        match &self.anomaly_ledger {
            Some(path) => Ok(path.clone()),
            None => Ok(project_dirs()?.data_dir().join("anomalies.json")),
        }
    }

    /// Configured timeout; zero, negative, infinite or NaN values mean none
    pub fn download_timeout(&self) -> Option<Duration> {
        self.download_timeout_secs
            .filter(|secs| secs.is_finite() && *secs > 0.0)
            .and_then(|secs| Duration::try_from_secs_f64(secs).ok())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

/// What to download in this run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunRequest {
    /// Requested languages; the first one is the main language
    pub languages: Vec<String>,
    pub season: u32,
    /// Explicitly requested episodes; empty means the whole season
    pub episodes: Vec<u32>,
}

impl RunRequest {
    /// Parses `"de+en"`, `"15"` and an optional `"1-3,9"` style selection
    pub fn parse(
        languages: &str,
        season: &str,
        episodes: Option<&str>,
    ) -> Result<Self, SettingsError> {
        let season = season
            .trim()
            .parse::<u32>()
            .ok()
            .filter(|s| *s > 0)
            .ok_or_else(|| SettingsError::InvalidSeason(season.to_string()))?;

        Ok(Self {
            languages: parse_languages(languages)?,
            season,
            episodes: match episodes {
                Some(arg) if !arg.is_empty() => parse_episode_numbers(arg)?,
                _ => Vec::new(),
            },
        })
    }

    pub fn main_language(&self) -> &str {
        &self.languages[0]
    }
}

/// Splits a `+`-joined language list, rejecting empty and repeated entries
pub fn parse_languages(arg: &str) -> Result<Vec<String>, SettingsError> {
    let mut languages: Vec<String> = Vec::new();

    for language in arg.split('+') {
        let language = language.trim().to_lowercase();

        if language.is_empty() {
            return Err(SettingsError::InvalidLanguage(language));
        }

        if languages.contains(&language) {
            return Err(SettingsError::DuplicateLanguage(language));
        }

        languages.push(language);
    }

    Ok(languages)
}

/// Parses an episode selection such as `"7"`, `"7-10"` or `"1-3,9,10"`
///
/// Ranges expand inclusively in the given direction, so `"7-6"` yields `[7, 6]`.
pub fn parse_episode_numbers(arg: &str) -> Result<Vec<u32>, SettingsError> {
    let mut numbers = Vec::new();

    for number in extract_episode_numbers(arg)? {
        if numbers.contains(&number) {
            return Err(SettingsError::DuplicateEpisode(number));
        }
        numbers.push(number);
    }

    Ok(numbers)
}

fn extract_episode_numbers(arg: &str) -> Result<Vec<u32>, SettingsError> {
    if arg.contains(',') {
        let mut result = Vec::new();
        for split in arg.split(',') {
            if split.is_empty() {
                return Err(SettingsError::InvalidEpisode(String::new()));
            }
            result.extend(extract_episode_numbers(split)?);
        }
        return Ok(result);
    }

    if arg.contains('-') {
        let splits: Vec<&str> = arg.split('-').collect();
        if splits.len() != 2 || splits.iter().any(|s| s.is_empty()) {
            return Err(SettingsError::InvalidEpisode(arg.to_string()));
        }

        let from = single_episode_number(splits[0])?;
        let to = single_episode_number(splits[1])?;

        return Ok(if from <= to {
            (from..=to).collect()
        } else {
            (to..=from).rev().collect()
        });
    }

    Ok(vec![single_episode_number(arg)?])
}

fn single_episode_number(arg: &str) -> Result<u32, SettingsError> {
    arg.parse::<u32>()
        .ok()
        .filter(|n| *n > 0)
        .ok_or_else(|| SettingsError::InvalidEpisode(arg.to_string()))
}
