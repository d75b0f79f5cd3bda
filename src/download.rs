//! Download orchestration
//!
//! All acts of an episode are downloaded in parallel, one external process
//! per act and language. A single thread starts the processes and then
//! polls them at a fixed interval until every one has finished. A non-zero
//! exit code aborts the run; a download exceeding its timeout is killed and
//! started again from scratch.

use crate::catalog::{localize_item_url, select_highest_bitrate};
use crate::checksum;
use crate::cleanup::remove_if_exists;
use crate::model::{Act, Episode, build_acts};
use crate::naming::{act_label, format_filename};
use crate::session::Session;
use crate::tools::RunningProcess;
use crate::{DownloaderError, ProgressEvent};
use std::fs;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Instant;

/// One act in one language being copied to disk
///
/// Owns the external process; dropping a `Download` whose process is still
/// running kills it.
pub(crate) struct Download {
    label: String,
    act: u32,
    language: String,
    url: String,
    target: PathBuf,
    process: Option<Box<dyn RunningProcess>>,
    started: Instant,
    timeouts: u32,
}

impl Download {
    fn new(label: String, act: u32, language: &str, url: String, target: PathBuf) -> Self {
        Self {
            label,
            act,
            language: language.to_string(),
            url,
            target,
            process: None,
            started: Instant::now(),
            timeouts: 0,
        }
    }

    fn is_running(&self) -> bool {
        self.process.is_some()
    }
}

impl Drop for Download {
    fn drop(&mut self) {
        if let Some(mut process) = self.process.take() {
            tracing::debug!(label = %self.label, "stopping unfinished download");

            if let Err(e) = process.kill() {
                tracing::warn!(label = %self.label, error = %e, "failed to stop download");
            }
        }
    }
}

impl Session<'_> {
    /// Downloads every act of `episode` in every requested language
    ///
    /// Adds the acts found in the episode feed to `episode`. Returns `false`
    /// when no catalog mirror delivers the feed, in which case the episode
    /// should be skipped.
    pub(crate) fn download(&mut self, episode: &mut Episode) -> Result<bool, DownloaderError> {
        let label = format_filename(episode.season(), episode.number(), &[], None, None, None);

        let Some(feed_items) = self.fetch_feed(episode) else {
            tracing::warn!(episode = %label, "no mirror delivered episode metadata");
            self.report(ProgressEvent::MetadataUnavailable { label });
            return Ok(false);
        };

        for act in build_acts(&feed_items, self.languages, localize_item_url)? {
            episode.add_act(act)?;
        }

        let mut downloads = Vec::new();
        for act in episode.acts() {
            for language in self.languages {
                if let Some(download) = self.plan_download(episode, act, language)? {
                    downloads.push(download);
                }
            }
        }

        if !downloads.is_empty() {
            self.report(ProgressEvent::DownloadsStarting {
                count: downloads.len(),
            });

            for download in downloads.iter_mut() {
                self.start(download)?;
                self.artifacts.track_download(download.target.clone());
            }

            self.await_downloads(&mut downloads)?;
        }

        let updating = self.settings.update_checksum_on_successful_download;
        self.report(ProgressEvent::VerifyingChecksums { updating });

        for download in &downloads {
            let result = self.verify_checksum(
                episode,
                download.act,
                &download.language,
                &download.target,
                updating,
            );

            match result {
                Err(err @ DownloaderError::ChecksumMismatch { .. }) => {
                    remove_if_exists(&download.target)?;
                    return Err(err);
                }
                other => other?,
            }
        }

        Ok(true)
    }

    /// Tries the catalog mirrors in order until one delivers act items
    fn fetch_feed(&self, episode: &Episode) -> Option<Vec<String>> {
        for feed_url in self.settings.catalog.episode_feed_urls(episode.item_id()) {
            tracing::debug!(url = %feed_url, "fetching episode metadata");

            match self.tools.catalog.episode_feed(&feed_url) {
                Ok(Some(items)) if !items.is_empty() => return Some(items),
                Ok(_) => tracing::warn!(url = %feed_url, "episode feed has no items"),
                Err(e) => tracing::warn!(url = %feed_url, error = %e, "episode feed failed"),
            }
        }

        None
    }

    /// Resolves the stream of one act and decides whether it needs downloading
    ///
    /// An existing file with a matching checksum is kept; one with a wrong
    /// checksum is removed so it gets downloaded again.
    fn plan_download(
        &mut self,
        episode: &Episode,
        act: &Act,
        language: &str,
    ) -> Result<Option<Download>, DownloaderError> {
        let label = act_label(episode.season(), episode.number(), act.number(), language);
        let metadata_url = act.require_metadata_url(language)?;

        self.report(ProgressEvent::ResolvingAct {
            label: label.clone(),
        });

        let url = select_highest_bitrate(&self.tools.catalog.act_stream_url(metadata_url)?);
        let target = self.act_file(episode, act.number(), language);
        tracing::debug!(label = %label, url = %url, target = %target.display(), "resolved act");

        if target.exists() {
            if !self.settings.go_on_if_downloaded_file_exists {
                return Err(DownloaderError::FileAlreadyExists(target));
            }

            // a mismatch returns before the ledger is touched, so verifying
            // and updating can share one pass over the file
            let update = self.settings.update_checksum_on_successful_download;

            match self.verify_checksum(episode, act.number(), language, &target, update) {
                Ok(()) => {
                    self.report(ProgressEvent::DownloadSkipped {
                        label,
                        path: target,
                    });
                    return Ok(None);
                }
                Err(DownloaderError::ChecksumMismatch { .. }) => {
                    fs::remove_file(&target)?;
                    self.report(ProgressEvent::StaleFileRemoved {
                        label: label.clone(),
                        path: target.clone(),
                    });
                }
                Err(e) => return Err(e),
            }
        }

        Ok(Some(Download::new(
            label,
            act.number(),
            language,
            url,
            target,
        )))
    }

    fn start(&mut self, download: &mut Download) -> Result<(), DownloaderError> {
        download.started = Instant::now();
        download.process = Some(
            self.tools
                .fetcher
                .spawn_fetch(&download.url, &download.target)?,
        );

        self.report(ProgressEvent::DownloadStarted {
            label: download.label.clone(),
            path: download.target.clone(),
        });

        Ok(())
    }

    /// Polls the running downloads until all have finished
    ///
    /// A finished process is never polled again.
    fn await_downloads(&mut self, downloads: &mut [Download]) -> Result<(), DownloaderError> {
        let poll_interval = self.settings.poll_interval();
        let timeout = self.settings.download_timeout();

        loop {
            thread::sleep(poll_interval);
            self.report(ProgressEvent::PollTick);

            for download in downloads.iter_mut() {
                let Some(process) = download.process.as_mut() else {
                    continue;
                };

                match process.exit_code()? {
                    None => {
                        if timeout.is_some_and(|limit| download.started.elapsed() > limit) {
                            self.restart_after_timeout(download)?;
                        }
                    }
                    Some(0) => {
                        download.process = None;

                        let size = fs::metadata(&download.target).map(|m| m.len())?;
                        self.report(ProgressEvent::DownloadFinished {
                            label: download.label.clone(),
                            elapsed: download.started.elapsed(),
                            size,
                        });
                    }
                    Some(exit_code) => {
                        download.process = None;
                        tracing::warn!(label = %download.label, exit_code, "download failed");

                        return Err(DownloaderError::ExternalToolFailure {
                            task: download.label.clone(),
                            exit_code,
                        });
                    }
                }
            }

            if !downloads.iter().any(Download::is_running) {
                return Ok(());
            }
        }
    }

    /// Kills a download that ran too long and starts it again on a clean file
    fn restart_after_timeout(&mut self, download: &mut Download) -> Result<(), DownloaderError> {
        if let Some(mut process) = download.process.take() {
            process.kill()?;
        }
        download.timeouts += 1;

        if let Some(max) = self.settings.max_timeout_retries {
            if download.timeouts > max {
                return Err(DownloaderError::ExternalToolTimeout {
                    label: download.label.clone(),
                    attempts: download.timeouts,
                });
            }
        }

        tracing::warn!(label = %download.label, attempt = download.timeouts, "download timed out, retrying");
        self.report(ProgressEvent::DownloadTimedOut {
            label: download.label.clone(),
            timeout: self.settings.download_timeout().unwrap_or_default(),
            attempt: download.timeouts,
        });

        remove_if_exists(&download.target)?;
        self.start(download)
    }

    /// Checks a file against the checksum ledger
    ///
    /// Without a recorded hash, or with verification disabled, nothing is
    /// checked. With `update`, the ledger records the file's hash and the
    /// time of the check, and is saved.
    pub(crate) fn verify_checksum(
        &mut self,
        episode: &Episode,
        act: u32,
        language: &str,
        file: &Path,
        update: bool,
    ) -> Result<(), DownloaderError> {
        let (season, number) = (episode.season(), episode.number());
        let expected = self
            .checksums
            .get_hash(season, number, act, language)?
            .filter(|hash| !hash.is_empty());

        let mut verified = None;

        if let Some(expected) = expected.filter(|_| self.settings.verify_checksums) {
            let verification = checksum::verify(file, &expected)?;

            if !verification.matches {
                return Err(DownloaderError::ChecksumMismatch {
                    path: file.to_path_buf(),
                    actual: verification.actual,
                    expected,
                });
            }

            if update {
                self.checksums
                    .update_last_checked(season, number, act, language)?;
            }
            verified = Some(verification.actual);
        }

        if update {
            let actual = match verified {
                Some(hash) => hash,
                None => checksum::compute_hash(file)?,
            };

            self.checksums
                .update_hash(season, number, act, language, &actual)?;
            self.checksums.save()?;
        }

        Ok(())
    }
}
