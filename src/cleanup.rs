//! Cleanup of temporary and downloaded files
//!
//! The files created while processing one episode are collected here and
//! removed after it was muxed, according to the settings.

use crate::ProgressEvent;
use crate::session::Session;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// Removes a file, treating "already gone" as success
pub(crate) fn remove_if_exists(path: &Path) -> io::Result<()> {
    match fs::remove_file(path) {
        Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e),
        _ => Ok(()),
    }
}

/// Files created while processing the current episode
#[derive(Debug, Default)]
pub(crate) struct Artifacts {
    temp_files: Vec<PathBuf>,
    downloaded_files: Vec<PathBuf>,
}

impl Artifacts {
    pub(crate) fn track_temp(&mut self, path: PathBuf) {
        self.temp_files.push(path);
    }

    pub(crate) fn track_download(&mut self, path: PathBuf) {
        self.downloaded_files.push(path);
    }

    /// Removes the tracked files as requested and forgets all of them
    ///
    /// Both lists are emptied even when nothing is removed. Files that
    /// could not be removed are returned with the error.
    pub(crate) fn clean_up(
        &mut self,
        remove_temp_files: bool,
        remove_downloaded_files: bool,
    ) -> Vec<(PathBuf, io::Error)> {
        let mut failures = Vec::new();

        for (files, remove) in [
            (&mut self.temp_files, remove_temp_files),
            (&mut self.downloaded_files, remove_downloaded_files),
        ] {
            for path in files.drain(..) {
                if !remove {
                    continue;
                }

                if let Err(e) = remove_if_exists(&path) {
                    failures.push((path, e));
                }
            }
        }

        failures
    }

    #[cfg(test)]
    pub(crate) fn is_empty(&self) -> bool {
        self.temp_files.is_empty() && self.downloaded_files.is_empty()
    }
}

impl Session<'_> {
    /// Removes the files of the episode just muxed
    pub(crate) fn clean_up(&mut self) {
        self.report(ProgressEvent::CleaningUp);

        let failures = self.artifacts.clean_up(
            self.settings.remove_temp_files,
            self.settings.remove_downloaded_files,
        );

        for (path, error) in failures {
            tracing::warn!(path = %path.display(), %error, "failed to remove file");
            self.report(ProgressEvent::CleanupFailed {
                path,
                reason: error.to_string(),
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn touch(dir: &TempDir, name: &str) -> PathBuf {
        let path = dir.path().join(name);
        fs::write(&path, name).unwrap();
        path
    }

    #[test]
    fn test_default_policy_keeps_downloads() {
        let dir = TempDir::new().unwrap();
        let options = touch(&dir, "S15E06DE.json");
        let act = touch(&dir, "S15E06A1DE.mp4");

        let mut artifacts = Artifacts::default();
        artifacts.track_temp(options.clone());
        artifacts.track_download(act.clone());

        let failures = artifacts.clean_up(true, false);

        assert!(failures.is_empty());
        assert!(!options.exists());
        assert!(act.exists());
        assert!(artifacts.is_empty());
    }

    #[test]
    fn test_lists_reset_without_removing() {
        let dir = TempDir::new().unwrap();
        let act = touch(&dir, "S15E06A1DE.mp4");

        let mut artifacts = Artifacts::default();
        artifacts.track_download(act.clone());
        artifacts.clean_up(false, false);

        assert!(act.exists());
        assert!(artifacts.is_empty());

        // a later cleanup no longer knows about the file
        artifacts.clean_up(true, true);
        assert!(act.exists());
    }

    #[test]
    fn test_already_removed_file_is_not_a_failure() {
        let dir = TempDir::new().unwrap();

        let mut artifacts = Artifacts::default();
        artifacts.track_temp(dir.path().join("gone.json"));

        assert!(artifacts.clean_up(true, true).is_empty());
    }

    #[test]
    fn test_unremovable_file_is_reported() {
        let dir = TempDir::new().unwrap();
        let subdir = dir.path().join("not-a-file");
        fs::create_dir(&subdir).unwrap();

        let mut artifacts = Artifacts::default();
        artifacts.track_download(subdir.clone());

        let failures = artifacts.clean_up(true, true);
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].0, subdir);
        assert!(artifacts.is_empty());
    }
}
