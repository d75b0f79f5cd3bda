//! External tools
//!
//! Downloads, frame-rate probes and muxing are delegated to external
//! processes. Each concern sits behind a small trait so the orchestration
//! can be driven by in-memory fakes in tests.

mod ffmpeg;
mod mkvmerge;

pub use ffmpeg::Ffmpeg;
pub use mkvmerge::Mkvmerge;

use regex::Regex;
use std::cmp::Ordering;
use std::io;
use std::path::{Path, PathBuf};
use std::process::Child;
use thiserror::Error;

/// Errors that can occur while running external tools
#[derive(Debug, Error)]
pub enum ToolError {
    #[error("Failed to run {}: {source}", program.display())]
    SpawnFailed {
        program: PathBuf,
        source: io::Error,
    },

    #[error("Failed to query process {label}: {source}")]
    StatusFailed { label: String, source: io::Error },

    #[error("The version of {tool} could not be extracted from \"{output}\". Please report this issue.")]
    VersionNotFound { tool: &'static str, output: String },

    #[error("{tool} {found} is too old, at least version {required} is required")]
    VersionTooOld {
        tool: &'static str,
        found: ToolVersion,
        required: ToolVersion,
    },
}

/// Handle of an external process that runs in the background
pub trait RunningProcess {
    /// Non-blocking status check
    ///
    /// Returns `None` while the process runs, its exit code once it ended.
    /// A process killed by a signal reports `-1`.
    fn exit_code(&mut self) -> Result<Option<i32>, ToolError>;

    /// Terminates the process and reaps it
    fn kill(&mut self) -> Result<(), ToolError>;
}

impl RunningProcess for Child {
    fn exit_code(&mut self) -> Result<Option<i32>, ToolError> {
        let pid = self.id();
        let status = self.try_wait().map_err(|e| ToolError::StatusFailed {
            label: pid.to_string(),
            source: e,
        })?;

        Ok(status.map(|s| s.code().unwrap_or(-1)))
    }

    fn kill(&mut self) -> Result<(), ToolError> {
        let pid = self.id();
        let status_failed = |e| ToolError::StatusFailed {
            label: pid.to_string(),
            source: e,
        };

        match Child::kill(self) {
            Ok(()) => {}
            // already exited
            Err(e) if e.kind() == io::ErrorKind::InvalidInput => {}
            Err(e) => return Err(status_failed(e)),
        }

        self.wait().map_err(status_failed)?;
        Ok(())
    }
}

/// Starts the download of a stream into a file
pub trait FetchTool {
    fn spawn_fetch(&self, url: &str, target: &Path) -> Result<Box<dyn RunningProcess>, ToolError>;
}

/// Reads the video frame rate of a media file
pub trait FrameRateProbe {
    /// Frame rate as reported by the tool (e.g. `"23.98"`), `None` if not found
    fn frame_rate(&self, file: &Path) -> Result<Option<String>, ToolError>;
}

/// Runs the muxer to completion
pub trait MuxTool {
    /// Runs the muxer with `arguments` and returns its exit code
    ///
    /// 0 is success, 1 success with warnings, anything else a failure.
    fn mux(&self, arguments: &[String]) -> Result<i32, ToolError>;
}

/// Dotted numeric version such as `4.2.2`
#[derive(Debug, Clone)]
pub struct ToolVersion(Vec<u32>);

impl ToolVersion {
    pub fn new(parts: &[u32]) -> Self {
        Self(parts.to_vec())
    }

    /// Parses `"3.4.1"`; empty components (`"4.2."`) are ignored
    pub fn parse(text: &str) -> Option<Self> {
        let parts = text
            .split('.')
            .filter(|part| !part.is_empty())
            .map(|part| part.parse().ok())
            .collect::<Option<Vec<u32>>>()?;

        (!parts.is_empty()).then_some(Self(parts))
    }

    pub fn at_least(&self, other: &ToolVersion) -> bool {
        self.cmp(other) != Ordering::Less
    }
}

impl Ord for ToolVersion {
    /// Missing components count as zero, so `2.2 == 2.2.0`
    fn cmp(&self, other: &Self) -> Ordering {
        let len = self.0.len().max(other.0.len());

        (0..len)
            .map(|i| {
                let a = self.0.get(i).copied().unwrap_or(0);
                let b = other.0.get(i).copied().unwrap_or(0);
                a.cmp(&b)
            })
            .find(|ordering| *ordering != Ordering::Equal)
            .unwrap_or(Ordering::Equal)
    }
}

impl PartialEq for ToolVersion {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for ToolVersion {}

impl PartialOrd for ToolVersion {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl std::fmt::Display for ToolVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let parts: Vec<String> = self.0.iter().map(u32::to_string).collect();
        write!(f, "{}", parts.join("."))
    }
}

/// Extracts a version with `pattern`, whose first group holds the dotted number
fn extract_version(
    tool: &'static str,
    pattern: &str,
    output: &str,
) -> Result<ToolVersion, ToolError> {
    let not_found = || ToolError::VersionNotFound {
        tool,
        output: output.trim().to_string(),
    };

    let pattern = Regex::new(pattern).map_err(|_| not_found())?;

    pattern
        .captures(output)
        .and_then(|captures| ToolVersion::parse(&captures[1]))
        .ok_or_else(not_found)
}

/// Finds the frame rate in ffmpeg's stream description
///
/// e.g. `Stream #0:0: Video: h264 (High), yuv420p, 1280x720, 3437 kb/s, 23.98 fps, 23.98 tbr`
pub fn extract_frame_rate(output: &str) -> Option<String> {
    let pattern = Regex::new(r"kb/s, ((\d|\.)+) fps,").ok()?;

    pattern
        .captures(output)
        .map(|captures| captures[1].to_string())
}

/// Renders a command line for diagnostic output
fn command_line<S: AsRef<std::ffi::OsStr>>(program: &Path, arguments: &[S]) -> String {
    std::iter::once(program.as_os_str())
        .chain(arguments.iter().map(AsRef::as_ref))
        .map(|part| part.to_string_lossy().into_owned())
        .collect::<Vec<_>>()
        .join(" ")
}
