//! Per-run state shared by download, merge and cleanup
//!
//! A `Session` is created once per run and processes the selected episodes
//! one after another. Its methods are spread over the `download`, `merge`
//! and `cleanup` modules.

use crate::ProgressEvent;
use crate::anomaly::AnomalyLedger;
use crate::catalog::Catalog;
use crate::checksum::ChecksumLedger;
use crate::cleanup::Artifacts;
use crate::model::Episode;
use crate::naming::{act_label, format_filename};
use crate::settings::Settings;
use crate::tools::{FetchTool, FrameRateProbe, MuxTool};
use std::path::PathBuf;

/// External collaborators of a run
#[derive(Clone, Copy)]
pub struct Tools<'a> {
    pub catalog: &'a dyn Catalog,
    pub fetcher: &'a dyn FetchTool,
    pub probe: &'a dyn FrameRateProbe,
    pub muxer: &'a dyn MuxTool,
}

pub(crate) struct Session<'a> {
    pub(crate) settings: &'a Settings,
    /// Requested languages, main language first
    pub(crate) languages: &'a [String],
    pub(crate) tools: Tools<'a>,
    pub(crate) checksums: ChecksumLedger,
    pub(crate) anomalies: AnomalyLedger,
    pub(crate) artifacts: Artifacts,
    progress: &'a mut dyn FnMut(ProgressEvent),
}

impl<'a> Session<'a> {
    pub(crate) fn new(
        settings: &'a Settings,
        languages: &'a [String],
        tools: Tools<'a>,
        checksums: ChecksumLedger,
        anomalies: AnomalyLedger,
        progress: &'a mut dyn FnMut(ProgressEvent),
    ) -> Self {
        Self {
            settings,
            languages,
            tools,
            checksums,
            anomalies,
            artifacts: Artifacts::default(),
            progress,
        }
    }

    pub(crate) fn report(&mut self, event: ProgressEvent) {
        (self.progress)(event);
    }

    pub(crate) fn begin_episode(&mut self, episode: &Episode) {
        let titles = self
            .languages
            .iter()
            .map(|l| episode.title(l).unwrap_or_default())
            .collect::<Vec<_>>()
            .join(" | ");

        self.report(ProgressEvent::EpisodeStarted {
            label: format_filename(episode.season(), episode.number(), &[], None, None, None),
            title: titles,
        });
    }

    /// Where one act in one language is downloaded to
    pub(crate) fn act_file(&self, episode: &Episode, act: u32, language: &str) -> PathBuf {
        let name = format!(
            "{}.mp4",
            act_label(episode.season(), episode.number(), act, language)
        );
        self.settings.download_folder.join(name)
    }
}

#[cfg(test)]
mod tests {
    use crate::model::Episode;
    use crate::test_support::Fixture;
    use std::path::Path;

    #[test]
    fn test_act_file() {
        let fixture = Fixture::new();
        let episode = Episode::new(15, 6, "item-6").unwrap();

        fixture.with_session(&["de"], |session| {
            let path = session.act_file(&episode, 2, "de");
            assert_eq!(path.file_name(), Some(Path::new("S15E06A2DE.mp4").as_os_str()));
            assert!(path.starts_with(&fixture.settings.download_folder));
        });
    }
}
