//! In-memory fakes of the catalog and the external tools, and a fixture
//! that wires them to a temporary directory

use crate::anomaly::AnomalyLedger;
use crate::catalog::{Catalog, CatalogError, ListedEpisode};
use crate::checksum::{self, ChecksumLedger};
use crate::session::{Session, Tools};
use crate::settings::{RunRequest, Settings};
use crate::tools::{FetchTool, FrameRateProbe, MuxTool, RunningProcess, ToolError};
use crate::{DownloaderError, ProgressEvent};
use regex::Regex;
use std::cell::{Cell, RefCell};
use std::collections::{HashMap, VecDeque};
use std::fs;
use std::path::{Path, PathBuf};
use std::rc::Rc;
use tempfile::TempDir;

#[derive(Debug, Default)]
pub struct FakeCatalog {
    pub seasons: Vec<u32>,
    /// Listings per language
    pub listings: HashMap<String, Vec<ListedEpisode>>,
    /// Act item templates per feed URL; unknown URLs fail
    pub feeds: HashMap<String, Vec<String>>,
}

impl Catalog for FakeCatalog {
    fn available_seasons(&self, _language: &str) -> Result<Vec<u32>, CatalogError> {
        Ok(self.seasons.clone())
    }

    fn season_listing(
        &self,
        language: &str,
        _season: u32,
    ) -> Result<Vec<ListedEpisode>, CatalogError> {
        Ok(self.listings.get(language).cloned().unwrap_or_default())
    }

    fn episode_feed(&self, feed_url: &str) -> Result<Option<Vec<String>>, CatalogError> {
        self.feeds
            .get(feed_url)
            .map(|items| Some(items.clone()))
            .ok_or_else(|| CatalogError::RequestFailed {
                url: feed_url.to_string(),
                reason: "HTTP 404 Not Found".to_string(),
            })
    }

    fn act_stream_url(&self, act_metadata_url: &str) -> Result<String, CatalogError> {
        Ok(format!(
            "https://cdn/master.m3u8?src={}&__b__=450",
            act_metadata_url
        ))
    }
}

/// Scripted download process
#[derive(Debug)]
pub struct FakeProcess {
    /// Polls answered with "running" before exiting; `None` never exits
    polls_left: Option<u32>,
    exit_code: i32,
    content: String,
    target: Option<PathBuf>,
    kills: Rc<RefCell<Vec<PathBuf>>>,
}

impl FakeProcess {
    pub fn exits_after(polls: u32, exit_code: i32) -> Self {
        Self {
            polls_left: Some(polls),
            exit_code,
            content: "downloaded".to_string(),
            target: None,
            kills: Rc::default(),
        }
    }

    pub fn hangs() -> Self {
        Self {
            polls_left: None,
            ..Self::exits_after(0, 0)
        }
    }

    /// Content written to the target on successful exit
    pub fn writing(mut self, content: &str) -> Self {
        self.content = content.to_string();
        self
    }
}

impl RunningProcess for FakeProcess {
    fn exit_code(&mut self) -> Result<Option<i32>, ToolError> {
        match self.polls_left {
            None => Ok(None),
            Some(0) => {
                if let (0, Some(target)) = (self.exit_code, &self.target) {
                    fs::write(target, &self.content).map_err(|e| ToolError::StatusFailed {
                        label: target.display().to_string(),
                        source: e,
                    })?;
                }
                Ok(Some(self.exit_code))
            }
            Some(n) => {
                self.polls_left = Some(n - 1);
                Ok(None)
            }
        }
    }

    fn kill(&mut self) -> Result<(), ToolError> {
        if let Some(target) = &self.target {
            self.kills.borrow_mut().push(target.clone());
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct SpawnRecord {
    pub url: String,
    pub target: PathBuf,
    /// Whether the target was already on disk when the process started
    pub target_existed: bool,
}

/// Fetcher handing out scripted processes per target file name
///
/// Unscripted targets get a process that succeeds after one poll. Every
/// process leaves a partial file behind right away.
#[derive(Debug, Default)]
pub struct FakeFetcher {
    scripts: RefCell<HashMap<String, VecDeque<FakeProcess>>>,
    spawned: RefCell<Vec<SpawnRecord>>,
    kills: Rc<RefCell<Vec<PathBuf>>>,
}

impl FakeFetcher {
    pub fn script(&self, file_name: &str, processes: Vec<FakeProcess>) {
        self.scripts
            .borrow_mut()
            .insert(file_name.to_string(), processes.into());
    }

    pub fn spawned(&self) -> Vec<SpawnRecord> {
        self.spawned.borrow().clone()
    }

    pub fn killed(&self) -> Vec<PathBuf> {
        self.kills.borrow().clone()
    }
}

impl FetchTool for FakeFetcher {
    fn spawn_fetch(&self, url: &str, target: &Path) -> Result<Box<dyn RunningProcess>, ToolError> {
        let file_name = target
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();

        let mut process = self
            .scripts
            .borrow_mut()
            .get_mut(&file_name)
            .and_then(VecDeque::pop_front)
            .unwrap_or_else(|| FakeProcess::exits_after(1, 0));

        self.spawned.borrow_mut().push(SpawnRecord {
            url: url.to_string(),
            target: target.to_path_buf(),
            target_existed: target.exists(),
        });

        fs::write(target, "partial").map_err(|e| ToolError::SpawnFailed {
            program: PathBuf::from("fake-fetch"),
            source: e,
        })?;

        process.target = Some(target.to_path_buf());
        process.kills = Rc::clone(&self.kills);

        Ok(Box::new(process))
    }
}

/// Probe answering from a table keyed by file name, "23.98" by default
#[derive(Debug, Default)]
pub struct FakeProbe {
    pub rates: HashMap<String, String>,
    probed: RefCell<Vec<PathBuf>>,
}

impl FakeProbe {
    pub fn probed(&self) -> Vec<PathBuf> {
        self.probed.borrow().clone()
    }
}

impl FrameRateProbe for FakeProbe {
    fn frame_rate(&self, file: &Path) -> Result<Option<String>, ToolError> {
        self.probed.borrow_mut().push(file.to_path_buf());

        let file_name = file
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();

        Ok(Some(
            self.rates
                .get(&file_name)
                .cloned()
                .unwrap_or_else(|| "23.98".to_string()),
        ))
    }
}

/// Muxer recording its arguments and the options file content
///
/// On success it creates the output file.
#[derive(Debug, Default)]
pub struct FakeMuxer {
    pub exit_code: Cell<i32>,
    calls: RefCell<Vec<Vec<String>>>,
    options: RefCell<Vec<String>>,
}

impl FakeMuxer {
    pub fn calls(&self) -> Vec<Vec<String>> {
        self.calls.borrow().clone()
    }

    pub fn options(&self) -> Vec<String> {
        self.options.borrow().clone()
    }
}

impl MuxTool for FakeMuxer {
    fn mux(&self, arguments: &[String]) -> Result<i32, ToolError> {
        self.calls.borrow_mut().push(arguments.to_vec());

        if let Some(options_file) = arguments.iter().find_map(|a| a.strip_prefix('@')) {
            self.options
                .borrow_mut()
                .push(fs::read_to_string(options_file).unwrap_or_default());
        }

        let exit_code = self.exit_code.get();
        if exit_code < 2 {
            if let Some(index) = arguments.iter().position(|a| a == "-o") {
                if let Some(target) = arguments.get(index + 1) {
                    let _ = fs::write(target, "muxed");
                }
            }
        }

        Ok(exit_code)
    }
}

/// Settings and fakes around a temporary directory
///
/// The catalog offers seasons 14 to 16; season 15 lists episodes 5 and 6
/// in German and English, two acts each. Only the second mirror answers.
pub struct Fixture {
    pub dir: TempDir,
    pub settings: Settings,
    pub catalog: FakeCatalog,
    pub fetcher: FakeFetcher,
    pub probe: FakeProbe,
    pub muxer: FakeMuxer,
}

impl Fixture {
    pub fn new() -> Self {
        Self::with_settings(|_| {})
    }

    pub fn with_settings(configure: impl FnOnce(&mut Settings)) -> Self {
        let dir = TempDir::new().unwrap();

        for folder in ["tmp", "downloads", "output"] {
            fs::create_dir(dir.path().join(folder)).unwrap();
        }

        let mut settings = Settings {
            tmp_folder: dir.path().join("tmp"),
            download_folder: dir.path().join("downloads"),
            output_folder: dir.path().join("output"),
            checksum_ledger: Some(dir.path().join("checksums.json")),
            anomaly_ledger: Some(dir.path().join("anomalies.json")),
            poll_interval_ms: 1,
            ..Settings::default()
        };

        for language in ["de", "en"] {
            settings.catalog.available_seasons_url.insert(
                language.to_string(),
                format!("http://catalog/{language}/seasons"),
            );
            settings.catalog.available_episodes_url.insert(
                language.to_string(),
                format!("http://catalog/{language}/episodes?id={{relatedItemId}}"),
            );
        }

        configure(&mut settings);

        let listed = |number: u32, title: &str| ListedEpisode {
            number,
            item_id: format!("item-{number}"),
            title: title.to_string(),
            availability: "true".to_string(),
        };

        let mut catalog = FakeCatalog {
            seasons: vec![14, 15, 16],
            ..FakeCatalog::default()
        };
        catalog.listings.insert(
            "de".to_string(),
            vec![listed(5, "Krank"), listed(6, "Stadt")],
        );
        catalog.listings.insert(
            "en".to_string(),
            vec![listed(5, "Sick"), listed(6, "City Sushi")],
        );

        for number in [5, 6] {
            let mirrors = settings.catalog.episode_feed_urls(&format!("item-{number}"));
            let items = (1..=2)
                .map(|act| {
                    format!(
                        "http://media/item-{number}/act{act}?device={{device}}&lang=de"
                    )
                })
                .collect();

            if let Some(second) = mirrors.get(1) {
                catalog.feeds.insert(second.clone(), items);
            }
        }

        Self {
            dir,
            settings,
            catalog,
            fetcher: FakeFetcher::default(),
            probe: FakeProbe::default(),
            muxer: FakeMuxer::default(),
        }
    }

    pub fn tools(&self) -> Tools<'_> {
        Tools {
            catalog: &self.catalog,
            fetcher: &self.fetcher,
            probe: &self.probe,
            muxer: &self.muxer,
        }
    }

    pub fn download_path(&self, name: &str) -> PathBuf {
        self.settings.download_folder.join(name)
    }

    pub fn tmp_path(&self, name: &str) -> PathBuf {
        self.settings.tmp_folder.join(name)
    }

    pub fn output_path(&self, name: &str) -> PathBuf {
        self.settings.output_folder.join(name)
    }

    pub fn checksum_ledger_path(&self) -> PathBuf {
        self.dir.path().join("checksums.json")
    }

    pub fn seed_download(&self, name: &str, content: &str) {
        fs::write(self.download_path(name), content).unwrap();
    }

    /// Records the hash of every act file in the download folder
    pub fn record_checksums(&self) {
        let pattern = Regex::new(r"^S(\d+)E(\d+)A(\d+)([A-Z]+)\.mp4$").unwrap();
        let mut ledger = ChecksumLedger::open(self.checksum_ledger_path());

        for entry in fs::read_dir(&self.settings.download_folder).unwrap() {
            let path = entry.unwrap().path();
            let name = path.file_name().unwrap().to_string_lossy().into_owned();

            if let Some(c) = pattern.captures(&name) {
                let hash = checksum::compute_hash(&path).unwrap();
                ledger
                    .update_hash(
                        c[1].parse().unwrap(),
                        c[2].parse().unwrap(),
                        c[3].parse().unwrap(),
                        &c[4].to_lowercase(),
                        &hash,
                    )
                    .unwrap();
            }
        }

        ledger.save().unwrap();
    }

    pub fn run(
        &self,
        languages: &str,
        season: &str,
        episodes: Option<&str>,
    ) -> Result<usize, DownloaderError> {
        self.run_with(languages, season, episodes, |_| {})
    }

    pub fn run_with(
        &self,
        languages: &str,
        season: &str,
        episodes: Option<&str>,
        progress: impl FnMut(ProgressEvent),
    ) -> Result<usize, DownloaderError> {
        let request = RunRequest::parse(languages, season, episodes)?;
        crate::run(&self.settings, &request, self.tools(), progress)
    }

    /// Runs `f` on a fresh session and returns the events it reported
    pub fn with_session(
        &self,
        languages: &[&str],
        f: impl FnOnce(&mut Session<'_>),
    ) -> Vec<ProgressEvent> {
        let languages: Vec<String> = languages.iter().map(|l| l.to_string()).collect();
        let anomalies = AnomalyLedger::open(&self.dir.path().join("anomalies.json")).unwrap();

        let mut events: Vec<ProgressEvent> = Vec::new();
        let mut record = |event: ProgressEvent| events.push(event);

        let mut session = Session::new(
            &self.settings,
            &languages,
            self.tools(),
            ChecksumLedger::open(self.checksum_ledger_path()),
            anomalies,
            &mut record,
        );
        f(&mut session);
        drop(session);

        events
    }
}
