//! ffmpeg wrapper
//!
//! ffmpeg copies the HLS stream of one act into a local file, and its stream
//! description tells the frame rate of a downloaded file.

use super::{
    FetchTool, FrameRateProbe, RunningProcess, ToolError, ToolVersion, command_line,
    extract_frame_rate, extract_version,
};
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

/// `-hide_banner` exists since ffmpeg 2.2
const HIDE_BANNER_SINCE: [u32; 2] = [2, 2];

/// Located and version-checked ffmpeg executable
#[derive(Debug, Clone)]
pub struct Ffmpeg {
    program: PathBuf,
    version: ToolVersion,
    quiet: bool,
}

impl Ffmpeg {
    /// Queries `ffmpeg -version` to check the executable works
    ///
    /// With `quiet`, downloads run with `-loglevel quiet` and their output
    /// is discarded.
    pub fn detect(program: PathBuf, quiet: bool) -> Result<Self, ToolError> {
        tracing::debug!(command = %command_line(&program, &["-version"]), "detecting ffmpeg");

        let output = Command::new(&program)
            .arg("-version")
            .stdin(Stdio::null())
            .output()
            .map_err(|e| ToolError::SpawnFailed {
                program: program.clone(),
                source: e,
            })?;

        let text = format!(
            "{}{}",
            String::from_utf8_lossy(&output.stdout),
            String::from_utf8_lossy(&output.stderr)
        );

        Ok(Self {
            version: parse_version(&text)?,
            program,
            quiet,
        })
    }

    pub fn version(&self) -> &ToolVersion {
        &self.version
    }

    fn hides_banner(&self) -> bool {
        self.version.at_least(&ToolVersion::new(&HIDE_BANNER_SINCE))
    }

    fn fetch_arguments(&self, url: &str, target: &Path) -> Vec<OsString> {
        let mut arguments: Vec<OsString> = Vec::new();

        if self.quiet {
            arguments.extend(["-loglevel", "quiet"].map(OsString::from));
        }
        if self.hides_banner() {
            arguments.push("-hide_banner".into());
        }

        arguments.extend(["-i", url, "-codec", "copy"].map(OsString::from));
        arguments.push(target.as_os_str().to_os_string());

        arguments
    }

    fn probe_arguments(&self, file: &Path) -> Vec<OsString> {
        let mut arguments: Vec<OsString> = Vec::new();

        if self.hides_banner() {
            arguments.push("-hide_banner".into());
        }
        arguments.push("-i".into());
        arguments.push(file.as_os_str().to_os_string());

        arguments
    }
}

impl FetchTool for Ffmpeg {
    fn spawn_fetch(&self, url: &str, target: &Path) -> Result<Box<dyn RunningProcess>, ToolError> {
        let arguments = self.fetch_arguments(url, target);
        tracing::debug!(command = %command_line(&self.program, &arguments), "starting download");

        let (stdout, stderr) = if self.quiet {
            (Stdio::null(), Stdio::null())
        } else {
            (Stdio::inherit(), Stdio::inherit())
        };

        let child = Command::new(&self.program)
            .args(&arguments)
            .stdin(Stdio::null())
            .stdout(stdout)
            .stderr(stderr)
            .spawn()
            .map_err(|e| ToolError::SpawnFailed {
                program: self.program.clone(),
                source: e,
            })?;

        Ok(Box::new(child))
    }
}

impl FrameRateProbe for Ffmpeg {
    fn frame_rate(&self, file: &Path) -> Result<Option<String>, ToolError> {
        let arguments = self.probe_arguments(file);
        tracing::debug!(command = %command_line(&self.program, &arguments), "probing frame rate");

        // Without an output file ffmpeg exits non-zero after printing the
        // stream description to stderr, so the exit code is meaningless here.
        let output = Command::new(&self.program)
            .args(&arguments)
            .stdin(Stdio::null())
            .output()
            .map_err(|e| ToolError::SpawnFailed {
                program: self.program.clone(),
                source: e,
            })?;

        Ok(extract_frame_rate(&String::from_utf8_lossy(&output.stderr)))
    }
}

/// Extracts the version from `ffmpeg -version` output
fn parse_version(output: &str) -> Result<ToolVersion, ToolError> {
    extract_version("ffmpeg", r"(?i)ffmpeg version ((\d|\.)+)(?:\s|-|,)", output)
}
