//! Frame-rate reconciliation and muxing
//!
//! With several languages, the video of the main language normally carries
//! the audio tracks of all languages. That only works when every source has
//! the same frame rate; otherwise each language gets an output file of its
//! own.

use crate::cleanup::remove_if_exists;
use crate::model::Episode;
use crate::naming::{episode_title, format_filename, output_filename};
use crate::session::Session;
use crate::settings::SettingsError;
use crate::{DownloaderError, ProgressEvent};
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

/// mkvmerge finished, but printed warnings
const EXIT_CODE_WARNINGS: i32 = 1;

/// One act file fed to the muxer
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct ActSource {
    pub file: PathBuf,
    /// Video delay in milliseconds
    pub video_sync: Option<i64>,
    /// Audio delay in milliseconds
    pub audio_sync: Option<i64>,
}

/// The acts of one language, concatenated in order
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct LanguageRun {
    pub language: String,
    pub acts: Vec<ActSource>,
}

/// Everything needed to build one mkvmerge command
#[derive(Debug)]
pub(crate) struct MuxPlan<'a> {
    pub options_file: &'a Path,
    pub target: &'a Path,
    /// Language whose video is used; chapters are named in this language
    pub main_language: &'a str,
    pub chapter_name: &'a str,
    pub runs: Vec<LanguageRun>,
}

/// Builds the mkvmerge arguments for one output file
///
/// Every language contributes its acts as one appended run. Only the main
/// language contributes video. The first video and audio track are flagged
/// default, and a chapter is generated wherever an act is appended.
pub(crate) fn mux_arguments(plan: &MuxPlan<'_>) -> Vec<String> {
    let mut arguments = vec![
        format!("@{}", plan.options_file.display()),
        "-o".to_string(),
        plan.target.display().to_string(),
        "--chapter-language".to_string(),
        plan.main_language.to_string(),
        "--generate-chapters".to_string(),
        "when-appending".to_string(),
        "--generate-chapters-name-template".to_string(),
        format!("{} <NUM>", plan.chapter_name),
        "--default-track".to_string(),
        "0:yes".to_string(),
        "--default-track".to_string(),
        "1:yes".to_string(),
    ];

    for run in &plan.runs {
        arguments.push("--language".to_string());
        arguments.push(format!("1:{}", run.language));

        for (index, act) in run.acts.iter().enumerate() {
            if run.language != plan.main_language {
                arguments.push("--no-video".to_string());
            }

            if let Some(sync) = act.video_sync {
                arguments.push("--sync".to_string());
                arguments.push(format!("0:{}", sync));
            }

            if let Some(sync) = act.audio_sync {
                arguments.push("--sync".to_string());
                arguments.push(format!("1:{}", sync));
            }

            // append to the previous act of this language
            if index > 0 {
                arguments.push("+".to_string());
            }

            arguments.push(act.file.display().to_string());
        }
    }

    arguments
}

impl Session<'_> {
    /// Muxes the downloaded acts of `episode` into one or more output files
    pub(crate) fn merge(&mut self, episode: &Episode) -> Result<(), DownloaderError> {
        let languages = self.languages;
        let Some(main_language) = languages.first() else {
            return Ok(());
        };

        if languages.len() > 1 {
            let rates = self.probe_frame_rates(episode)?;

            if rates.len() > 1 {
                tracing::warn!(?rates, "frame rates differ between languages");
                self.report(ProgressEvent::FrameRatesDiffer {
                    rates: rates
                        .into_iter()
                        .map(|rate| rate.unwrap_or_else(|| "unknown".to_string()))
                        .collect(),
                });

                for language in languages {
                    self.merge_parts(episode, language, std::slice::from_ref(language))?;
                }
                return Ok(());
            }
        }

        self.merge_parts(episode, main_language, languages)
    }

    /// Distinct frame rates over all acts in all languages
    ///
    /// A file whose frame rate cannot be read counts as a rate of its own.
    fn probe_frame_rates(
        &mut self,
        episode: &Episode,
    ) -> Result<BTreeSet<Option<String>>, DownloaderError> {
        let mut rates = BTreeSet::new();

        for language in self.languages {
            for act in episode.acts() {
                let file = self.existing_act_file(episode, act.number(), language)?;
                let rate = self.tools.probe.frame_rate(&file)?;

                tracing::debug!(file = %file.display(), ?rate, "probed frame rate");
                rates.insert(rate);
            }
        }

        Ok(rates)
    }

    fn existing_act_file(
        &self,
        episode: &Episode,
        act: u32,
        language: &str,
    ) -> Result<PathBuf, DownloaderError> {
        let file = self.act_file(episode, act, language);

        if !file.exists() {
            return Err(DownloaderError::FileMissing(file));
        }
        Ok(file)
    }

    /// Muxes the acts of `languages` into one file, taking video from `main_language`
    fn merge_parts(
        &mut self,
        episode: &Episode,
        main_language: &str,
        languages: &[String],
    ) -> Result<(), DownloaderError> {
        let label = format_filename(episode.season(), episode.number(), languages, None, None, None);
        let target = self.settings.output_folder.join(output_filename(
            &self.settings.show_name,
            episode,
            languages,
        ));

        if target.exists() {
            if self.settings.go_on_if_final_file_exists {
                self.report(ProgressEvent::MergeSkipped { label, target });
                return Ok(());
            }
            return Err(DownloaderError::FileAlreadyExists(target));
        }

        self.report(ProgressEvent::Merging {
            label: label.clone(),
            target: target.clone(),
        });

        let chapter_name = self.settings.catalog.chapter_name(main_language).ok_or_else(|| {
            SettingsError::MissingCatalogEntry {
                kind: "chapter name",
                language: main_language.to_string(),
            }
        })?;

        let mut runs = Vec::with_capacity(languages.len());
        for language in languages {
            let mut acts = Vec::with_capacity(episode.acts().len());

            for act in episode.acts() {
                let (season, number, act) = (episode.season(), episode.number(), act.number());

                acts.push(ActSource {
                    file: self.existing_act_file(episode, act, language)?,
                    video_sync: self.anomalies.video_sync(season, number, act, language),
                    audio_sync: self.anomalies.audio_sync(season, number, act, language),
                });
            }

            runs.push(LanguageRun {
                language: language.clone(),
                acts,
            });
        }

        // The title goes through an options file, since not every platform
        // passes arbitrary UTF-8 in command line arguments.
        let options_file = self.settings.tmp_folder.join(format_filename(
            episode.season(),
            episode.number(),
            languages,
            Some("json"),
            None,
            None,
        ));

        if options_file.exists() {
            return Err(DownloaderError::FileAlreadyExists(options_file));
        }

        self.artifacts.track_temp(options_file.clone());

        let title = episode_title(&self.settings.show_name, episode, languages);
        fs::write(&options_file, serde_json::to_string(&["--title", title.as_str()])?)?;

        let arguments = mux_arguments(&MuxPlan {
            options_file: &options_file,
            target: &target,
            main_language,
            chapter_name,
            runs,
        });

        match self.tools.muxer.mux(&arguments)? {
            0 => self.report(ProgressEvent::Merged {
                label,
                target,
                warnings: false,
            }),
            EXIT_CODE_WARNINGS => {
                tracing::warn!(target = %target.display(), "mkvmerge finished with warnings");
                self.report(ProgressEvent::Merged {
                    label,
                    target,
                    warnings: true,
                });
            }
            exit_code => {
                // a leftover options file would block the next attempt
                if let Err(e) = remove_if_exists(&options_file) {
                    tracing::warn!(path = %options_file.display(), error = %e, "failed to remove options file");
                }

                return Err(DownloaderError::ExternalToolFailure {
                    task: "mkvmerge".to_string(),
                    exit_code,
                });
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Act;
    use crate::test_support::Fixture;

    fn source(file: &str) -> ActSource {
        ActSource {
            file: PathBuf::from(file),
            video_sync: None,
            audio_sync: None,
        }
    }

    fn episode() -> Episode {
        let mut episode = Episode::new(15, 6, "item-6").unwrap();
        episode.set_title("de", "Stadt");
        episode.set_title("en", "City Sushi");
        episode.add_act(Act::new(1).unwrap()).unwrap();
        episode.add_act(Act::new(2).unwrap()).unwrap();
        episode
    }

    fn seed_all_acts(fixture: &Fixture) {
        for name in ["S15E06A1DE.mp4", "S15E06A2DE.mp4", "S15E06A1EN.mp4", "S15E06A2EN.mp4"] {
            fixture.seed_download(name, name);
        }
    }

    #[test]
    fn test_mux_arguments() {
        let plan = MuxPlan {
            options_file: Path::new("/tmp/S15E06DE+EN.json"),
            target: Path::new("/out/South Park S15E06 Stadt (City Sushi) DE+EN.mkv"),
            main_language: "de",
            chapter_name: "Kapitel",
            runs: vec![
                LanguageRun {
                    language: "de".to_string(),
                    acts: vec![source("/dl/S15E06A1DE.mp4"), source("/dl/S15E06A2DE.mp4")],
                },
                LanguageRun {
                    language: "en".to_string(),
                    acts: vec![
                        ActSource {
                            file: PathBuf::from("/dl/S15E06A1EN.mp4"),
                            video_sync: Some(-120),
                            audio_sync: Some(40),
                        },
                        source("/dl/S15E06A2EN.mp4"),
                    ],
                },
            ],
        };

        assert_eq!(
            mux_arguments(&plan),
            [
                "@/tmp/S15E06DE+EN.json",
                "-o",
                "/out/South Park S15E06 Stadt (City Sushi) DE+EN.mkv",
                "--chapter-language",
                "de",
                "--generate-chapters",
                "when-appending",
                "--generate-chapters-name-template",
                "Kapitel <NUM>",
                "--default-track",
                "0:yes",
                "--default-track",
                "1:yes",
                "--language",
                "1:de",
                "/dl/S15E06A1DE.mp4",
                "+",
                "/dl/S15E06A2DE.mp4",
                "--language",
                "1:en",
                "--no-video",
                "--sync",
                "0:-120",
                "--sync",
                "1:40",
                "/dl/S15E06A1EN.mp4",
                "--no-video",
                "+",
                "/dl/S15E06A2EN.mp4",
            ]
        );
    }

    #[test]
    fn test_concatenation_marker_only_within_a_run() {
        let plan = MuxPlan {
            options_file: Path::new("o.json"),
            target: Path::new("t.mkv"),
            main_language: "en",
            chapter_name: "Chapter",
            runs: vec![
                LanguageRun {
                    language: "en".to_string(),
                    acts: vec![source("e1"), source("e2"), source("e3")],
                },
                LanguageRun {
                    language: "de".to_string(),
                    acts: vec![source("d1"), source("d2"), source("d3")],
                },
            ],
        };

        let arguments = mux_arguments(&plan);
        let preceded_by_plus = |file: &str| {
            let position = arguments.iter().position(|a| a == file).unwrap();
            arguments[position - 1] == "+"
        };

        assert!(!preceded_by_plus("e1"));
        assert!(preceded_by_plus("e2"));
        assert!(preceded_by_plus("e3"));
        assert!(!preceded_by_plus("d1"));
        assert!(preceded_by_plus("d2"));
        assert!(preceded_by_plus("d3"));
    }

    #[test]
    fn test_equal_frame_rates_give_one_file() {
        let mut fixture = Fixture::new();
        seed_all_acts(&fixture);
        fixture.probe.rates.insert("S15E06A1EN.mp4".to_string(), "23.98".to_string());

        let events = fixture.with_session(&["de", "en"], |session| {
            session.merge(&episode()).unwrap();
        });

        assert_eq!(fixture.probe.probed().len(), 4);
        let calls = fixture.muxer.calls();
        assert_eq!(calls.len(), 1);
        assert!(calls[0].contains(&"1:de".to_string()));
        assert!(calls[0].contains(&"1:en".to_string()));

        let options = fixture.muxer.options();
        assert_eq!(options[0], r#"["--title","South Park S15E06: Stadt | City Sushi"]"#);
        assert!(
            !events
                .iter()
                .any(|e| matches!(e, ProgressEvent::FrameRatesDiffer { .. }))
        );
    }

    #[test]
    fn test_different_frame_rates_give_one_file_per_language() {
        let mut fixture = Fixture::new();
        seed_all_acts(&fixture);
        fixture.probe.rates.insert("S15E06A1DE.mp4".to_string(), "25".to_string());
        fixture.probe.rates.insert("S15E06A2DE.mp4".to_string(), "25".to_string());

        fixture.with_session(&["de", "en"], |session| {
            session.merge(&episode()).unwrap();
        });

        let calls = fixture.muxer.calls();
        assert_eq!(calls.len(), 2);

        assert!(calls[0].iter().any(|a| a.ends_with("South Park S15E06 Stadt DE.mkv")));
        assert!(calls[0].contains(&"1:de".to_string()));
        assert!(!calls[0].contains(&"1:en".to_string()));

        assert!(calls[1].iter().any(|a| a.ends_with("South Park S15E06 City Sushi EN.mkv")));
        assert!(calls[1].contains(&"Chapter <NUM>".to_string()));
        assert!(!calls[1].contains(&"--no-video".to_string()));
    }

    #[test]
    fn test_single_language_skips_probing() {
        let fixture = Fixture::new();
        seed_all_acts(&fixture);

        fixture.with_session(&["en"], |session| {
            session.merge(&episode()).unwrap();
        });

        assert!(fixture.probe.probed().is_empty());
        assert_eq!(fixture.muxer.calls().len(), 1);
    }

    #[test]
    fn test_missing_act_file() {
        let fixture = Fixture::new();
        fixture.seed_download("S15E06A1DE.mp4", "only one");

        fixture.with_session(&["de"], |session| {
            let err = session.merge(&episode()).unwrap_err();
            assert!(matches!(err, DownloaderError::FileMissing(ref p) if p.ends_with("S15E06A2DE.mp4")));
        });
        assert!(fixture.muxer.calls().is_empty());
    }

    #[test]
    fn test_existing_output_is_skipped_or_rejected() {
        let fixture = Fixture::new();
        seed_all_acts(&fixture);
        fs::write(fixture.output_path("South Park S15E06 Stadt DE.mkv"), "done").unwrap();

        let events = fixture.with_session(&["de"], |session| {
            session.merge(&episode()).unwrap();
        });
        assert!(fixture.muxer.calls().is_empty());
        assert!(events.iter().any(|e| matches!(e, ProgressEvent::MergeSkipped { .. })));

        let strict = Fixture::with_settings(|settings| settings.go_on_if_final_file_exists = false);
        seed_all_acts(&strict);
        fs::write(strict.output_path("South Park S15E06 Stadt DE.mkv"), "done").unwrap();

        strict.with_session(&["de"], |session| {
            let err = session.merge(&episode()).unwrap_err();
            assert!(matches!(err, DownloaderError::FileAlreadyExists(_)));
        });
    }

    #[test]
    fn test_leftover_options_file_is_rejected() {
        let fixture = Fixture::new();
        seed_all_acts(&fixture);
        fs::write(fixture.tmp_path("S15E06DE.json"), "[]").unwrap();

        fixture.with_session(&["de"], |session| {
            let err = session.merge(&episode()).unwrap_err();
            assert!(matches!(err, DownloaderError::FileAlreadyExists(ref p) if p.ends_with("S15E06DE.json")));
        });
    }

    #[test]
    fn test_mux_exit_codes() {
        let fixture = Fixture::new();
        seed_all_acts(&fixture);
        fixture.muxer.exit_code.set(1);

        let events = fixture.with_session(&["de"], |session| {
            session.merge(&episode()).unwrap();
        });
        assert!(events.iter().any(|e| matches!(e, ProgressEvent::Merged { warnings: true, .. })));

        let failing = Fixture::new();
        seed_all_acts(&failing);
        failing.muxer.exit_code.set(2);

        failing.with_session(&["de"], |session| {
            let err = session.merge(&episode()).unwrap_err();
            assert_eq!(err.exit_code(), 2);
        });
        assert!(!failing.tmp_path("S15E06DE.json").exists());
    }

    #[test]
    fn test_merge_can_be_retried_after_fatal_mux_exit() {
        let fixture = Fixture::new();
        seed_all_acts(&fixture);
        fixture.muxer.exit_code.set(2);

        fixture.with_session(&["de"], |session| {
            assert!(session.merge(&episode()).is_err());
        });

        fixture.muxer.exit_code.set(0);
        let events = fixture.with_session(&["de"], |session| {
            session.merge(&episode()).unwrap();
        });

        assert_eq!(fixture.muxer.calls().len(), 2);
        assert!(events.iter().any(|e| matches!(e, ProgressEvent::Merged { warnings: false, .. })));
        assert!(fixture.output_path("South Park S15E06 Stadt DE.mkv").exists());
    }
}
