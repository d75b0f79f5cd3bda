//! mkvmerge wrapper

use super::{MuxTool, ToolError, ToolVersion, command_line, extract_version};
use std::path::PathBuf;
use std::process::{Command, Stdio};

/// `@options.json` files are understood since mkvmerge 9.7
const MINIMUM_VERSION: [u32; 2] = [9, 7];

/// Located and version-checked mkvmerge executable
#[derive(Debug, Clone)]
pub struct Mkvmerge {
    program: PathBuf,
    version: ToolVersion,
    quiet: bool,
}

impl Mkvmerge {
    /// Queries `mkvmerge --version` and rejects versions older than 9.7
    pub fn detect(program: PathBuf, quiet: bool) -> Result<Self, ToolError> {
        tracing::debug!(command = %command_line(&program, &["--version"]), "detecting mkvmerge");

        let output = Command::new(&program)
            .arg("--version")
            .stdin(Stdio::null())
            .output()
            .map_err(|e| ToolError::SpawnFailed {
                program: program.clone(),
                source: e,
            })?;

        let version = parse_version(&String::from_utf8_lossy(&output.stdout))?;
        let required = ToolVersion::new(&MINIMUM_VERSION);

        if !version.at_least(&required) {
            return Err(ToolError::VersionTooOld {
                tool: "mkvmerge",
                found: version,
                required,
            });
        }

        Ok(Self {
            program,
            version,
            quiet,
        })
    }

    pub fn version(&self) -> &ToolVersion {
        &self.version
    }

    fn full_arguments(&self, arguments: &[String]) -> Vec<String> {
        let mut full = Vec::with_capacity(arguments.len() + 1);

        if self.quiet {
            full.push("--quiet".to_string());
        }
        full.extend_from_slice(arguments);

        full
    }
}

impl MuxTool for Mkvmerge {
    fn mux(&self, arguments: &[String]) -> Result<i32, ToolError> {
        let arguments = self.full_arguments(arguments);
        tracing::debug!(command = %command_line(&self.program, &arguments), "muxing");

        let status = Command::new(&self.program)
            .args(&arguments)
            .stdin(Stdio::null())
            .status()
            .map_err(|e| ToolError::SpawnFailed {
                program: self.program.clone(),
                source: e,
            })?;

        Ok(status.code().unwrap_or(-1))
    }
}

fn parse_version(output: &str) -> Result<ToolVersion, ToolError> {
    extract_version("mkvmerge", r"mkvmerge v((\d|\.)+)", output)
}
