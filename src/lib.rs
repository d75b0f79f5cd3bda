//! Episode Assembler - Download episodes act by act and mux them into one file
//!
//! This library resolves the acts of each requested episode through the
//! remote catalog, downloads every act in every requested language with
//! parallel ffmpeg processes, verifies the downloads against a checksum
//! ledger and finally muxes them with mkvmerge, one chapter per act.

mod anomaly;
mod catalog;
mod checksum;
mod cleanup;
mod download;
mod merge;
mod model;
mod naming;
mod session;
mod settings;
mod tools;

#[cfg(test)]
mod test_support;

use session::Session;
use std::io;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

// Re-export error types
pub use anomaly::AnomalyError;
pub use catalog::CatalogError;
pub use checksum::ChecksumError;
pub use model::ModelError;
pub use settings::SettingsError;
pub use tools::ToolError;

// Re-export the building blocks a caller wires together
pub use anomaly::AnomalyLedger;
pub use catalog::{Catalog, HttpCatalog, ListedEpisode};
pub use checksum::ChecksumLedger;
pub use model::{Act, Episode, Season};
pub use naming::format_filename;
pub use session::Tools;
pub use settings::{CatalogSettings, RunRequest, Settings};
pub use tools::{
    FetchTool, Ffmpeg, FrameRateProbe, Mkvmerge, MuxTool, RunningProcess, ToolVersion,
};

/// Progress event emitted during a run
///
/// These events allow library users to display what is going on, or to
/// stay silent.
#[derive(Debug, Clone)]
pub enum ProgressEvent {
    /// The season listing was fetched and the episodes to process are known
    SeasonResolved { season: u32, episode_count: usize },

    /// Processing of one episode starts
    EpisodeStarted { label: String, title: String },

    /// No catalog mirror delivered a feed; the episode is skipped
    MetadataUnavailable { label: String },

    /// Stream URL of one act is being looked up
    ResolvingAct { label: String },

    /// The act is already on disk and its checksum matches
    DownloadSkipped { label: String, path: PathBuf },

    /// The act on disk does not match its checksum and is downloaded again
    StaleFileRemoved { label: String, path: PathBuf },

    /// Downloads of this many acts are about to run in parallel
    DownloadsStarting { count: usize },

    /// One download process was started
    DownloadStarted { label: String, path: PathBuf },

    /// Emitted once per polling round while downloads are running
    PollTick,

    /// One download took longer than allowed and is restarted
    DownloadTimedOut {
        label: String,
        timeout: Duration,
        attempt: u32,
    },

    /// One download completed
    DownloadFinished {
        label: String,
        elapsed: Duration,
        size: u64,
    },

    /// Downloaded acts are checked against the checksum ledger
    VerifyingChecksums { updating: bool },

    /// Languages differ in frame rate, so each gets its own output file
    FrameRatesDiffer { rates: Vec<String> },

    /// mkvmerge starts writing an output file
    Merging { label: String, target: PathBuf },

    /// The output file already exists and is kept as is
    MergeSkipped { label: String, target: PathBuf },

    /// mkvmerge finished, possibly with warnings
    Merged {
        label: String,
        target: PathBuf,
        warnings: bool,
    },

    /// Temporary and downloaded files are being removed
    CleaningUp,

    /// A file could not be removed during cleanup
    CleanupFailed { path: PathBuf, reason: String },

    /// All requested episodes were processed
    Complete { assembled: usize, skipped: usize },
}

/// Top-level error type for Episode Assembler operations
#[derive(Debug, Error)]
pub enum DownloaderError {
    /// Error in the season/episode/act hierarchy
    #[error("{0}")]
    Model(#[from] ModelError),

    /// Error reading or writing the checksum ledger
    #[error("Checksum ledger error: {0}")]
    Checksum(#[from] ChecksumError),

    /// Error reading the anomaly ledger
    #[error("Anomaly ledger error: {0}")]
    Anomaly(#[from] AnomalyError),

    /// Invalid settings or request
    #[error("{0}")]
    Settings(#[from] SettingsError),

    /// Error talking to the catalog
    #[error("Catalog error: {0}")]
    Catalog(#[from] CatalogError),

    /// Error running an external tool
    #[error("{0}")]
    Tool(#[from] ToolError),

    /// A file does not hash to its recorded checksum
    #[error("Checksum mismatch for {}: expected {expected}, got {actual}", path.display())]
    ChecksumMismatch {
        path: PathBuf,
        expected: String,
        actual: String,
    },

    /// A file that would be written already exists
    #[error("File \"{}\" already exists.", .0.display())]
    FileAlreadyExists(PathBuf),

    /// A file that should have been downloaded is missing
    #[error("File \"{}\" does not exist.", .0.display())]
    FileMissing(PathBuf),

    /// An external tool exited with a failure code
    #[error("{task} failed with exit code {exit_code}")]
    ExternalToolFailure { task: String, exit_code: i32 },

    /// A download kept timing out
    #[error("Download {label} timed out {attempts} times, giving up")]
    ExternalToolTimeout { label: String, attempts: u32 },

    /// Error writing the mkvmerge options file
    #[error("Failed to serialize mkvmerge options: {0}")]
    Serialization(#[from] serde_json::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

impl DownloaderError {
    /// Exit code for the process: the failing tool's own code, 1 otherwise
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::ExternalToolFailure { exit_code, .. } if *exit_code > 0 => *exit_code,
            _ => 1,
        }
    }
}

/// Downloads and assembles the requested episodes
///
/// Validates the settings, checks that the season is offered, builds the
/// season from the catalog and then processes one episode after another:
/// download all acts, mux them, clean up. The first fatal error ends the
/// whole run; an episode without catalog metadata is skipped.
///
/// Progress events are emitted through the provided callback.
///
/// # Returns
///
/// The number of episodes that were assembled
///
/// # Examples
///
/// ```no_run
/// use episode_assembler::{
///     Ffmpeg, HttpCatalog, Mkvmerge, ProgressEvent, RunRequest, Settings, Tools, run,
/// };
///
/// let settings = Settings::default();
/// let request = RunRequest::parse("de+en", "15", Some("6")).unwrap();
///
/// let catalog = HttpCatalog::new(settings.catalog.clone());
/// let ffmpeg = Ffmpeg::detect(settings.ffmpeg_path(), true).unwrap();
/// let mkvmerge = Mkvmerge::detect(settings.mkvmerge.clone(), true).unwrap();
/// let tools = Tools {
///     catalog: &catalog,
///     fetcher: &ffmpeg,
///     probe: &ffmpeg,
///     muxer: &mkvmerge,
/// };
///
/// let assembled = run(&settings, &request, tools, |event| {
///     if let ProgressEvent::Merged { target, .. } = event {
///         println!("wrote {}", target.display());
///     }
/// })
/// .unwrap();
/// ```
pub fn run<F>(
    settings: &Settings,
    request: &RunRequest,
    tools: Tools<'_>,
    mut progress_callback: F,
) -> Result<usize, DownloaderError>
where
    F: FnMut(ProgressEvent),
{
    settings.validate(&request.languages)?;

    let anomalies = AnomalyLedger::open(&settings.anomaly_ledger_path()?)?;
    let checksums = ChecksumLedger::open(settings.checksum_ledger_path()?);

    let seasons = tools.catalog.available_seasons(request.main_language())?;
    tracing::debug!(?seasons, "available seasons");

    if !seasons.contains(&request.season) {
        return Err(CatalogError::SeasonUnavailable(request.season).into());
    }

    let season = catalog::build_season(
        tools.catalog,
        &anomalies,
        request.season,
        &request.languages,
        &request.episodes,
    )?;
    let episodes = season.select(&request.episodes)?;

    progress_callback(ProgressEvent::SeasonResolved {
        season: season.number(),
        episode_count: episodes.len(),
    });

    let mut session = Session::new(
        settings,
        &request.languages,
        tools,
        checksums,
        anomalies,
        &mut progress_callback,
    );

    let mut assembled = 0;
    let mut skipped = 0;

    for mut episode in episodes {
        session.begin_episode(&episode);

        if session.download(&mut episode)? {
            session.merge(&episode)?;
            session.clean_up();
            assembled += 1;
        } else {
            skipped += 1;
        }
    }

    session.report(ProgressEvent::Complete { assembled, skipped });

    Ok(assembled)
}
