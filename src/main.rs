use clap::Parser;
use episode_assembler::{
    DownloaderError, Ffmpeg, HttpCatalog, Mkvmerge, ProgressEvent, RunRequest, Settings, Tools,
    run,
};
use humansize::{DECIMAL, format_size};
use indicatif::{ProgressBar, ProgressStyle};
use std::path::PathBuf;
use std::process;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

/// Download episodes act by act in several languages and mux them into one
/// Matroska file per episode
#[derive(Parser, Debug)]
#[command(version, about)]
struct Args {
    /// Languages joined by "+", main language first (e.g. "de+en")
    language: String,

    /// Season number
    season: String,

    /// Episodes such as "6", "1-3" or "1-3,9"; the whole season if omitted
    episodes: Option<String>,

    /// Settings file to use instead of the one in the config directory
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Only print errors
    #[arg(short, long)]
    quiet: bool,

    /// Print debug logging, including URLs and command calls
    #[arg(short, long)]
    verbose: bool,
}

/// Prints progress events, with a spinner while downloads are running
struct Reporter {
    quiet: bool,
    spinner: Option<ProgressBar>,
}

impl Reporter {
    fn new(quiet: bool) -> Self {
        Self {
            quiet,
            spinner: None,
        }
    }

    fn say(&self, message: String) {
        if self.quiet {
            return;
        }

        match &self.spinner {
            Some(spinner) => spinner.println(message),
            None => println!("{}", message),
        }
    }

    fn stop_spinner(&mut self) {
        if let Some(spinner) = self.spinner.take() {
            spinner.finish_and_clear();
        }
    }

    fn handle(&mut self, event: ProgressEvent) {
        match event {
            ProgressEvent::SeasonResolved {
                season,
                episode_count,
            } => {
                self.say(format!(
                    "Season {}: {} episode(s) to process",
                    season, episode_count
                ));
            }
            ProgressEvent::EpisodeStarted { label, title } => {
                self.say(format!("\n=== {} {} ===", label, title));
            }
            ProgressEvent::MetadataUnavailable { label } => {
                self.say(format!("  No metadata for {} available, skipping", label));
            }
            ProgressEvent::ResolvingAct { label } => {
                self.say(format!("  Resolving {}...", label));
            }
            ProgressEvent::DownloadSkipped { label, .. } => {
                self.say(format!("  {} already downloaded", label));
            }
            ProgressEvent::StaleFileRemoved { label, path } => {
                self.say(format!(
                    "  {} does not match its checksum, removed {}",
                    label,
                    path.display()
                ));
            }
            ProgressEvent::DownloadsStarting { count } => {
                if !self.quiet {
                    let spinner = ProgressBar::new_spinner().with_style(
                        ProgressStyle::with_template("  {spinner} {msg} [{elapsed}]")
                            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
                    );
                    spinner.set_message(format!("Downloading {} act(s)", count));
                    self.spinner = Some(spinner);
                }
            }
            ProgressEvent::DownloadStarted { label, .. } => {
                self.say(format!("  Downloading {}", label));
            }
            ProgressEvent::PollTick => {
                if let Some(spinner) = &self.spinner {
                    spinner.tick();
                }
            }
            ProgressEvent::DownloadTimedOut {
                label,
                timeout,
                attempt,
            } => {
                self.say(format!(
                    "  {} took longer than {:.1}s, restarting (attempt {})",
                    label,
                    timeout.as_secs_f64(),
                    attempt + 1
                ));
            }
            ProgressEvent::DownloadFinished {
                label,
                elapsed,
                size,
            } => {
                self.say(format!(
                    "  {} finished: {} in {}",
                    label,
                    format_size(size, DECIMAL),
                    format_elapsed(elapsed)
                ));
            }
            ProgressEvent::VerifyingChecksums { updating } => {
                self.stop_spinner();
                if updating {
                    self.say("  Verifying and recording checksums...".to_string());
                } else {
                    self.say("  Verifying checksums...".to_string());
                }
            }
            ProgressEvent::FrameRatesDiffer { rates } => {
                self.say(format!(
                    "  Frame rates differ ({}), creating one file per language",
                    rates.join(", ")
                ));
            }
            ProgressEvent::Merging { target, .. } => {
                self.say(format!("  Merging into {}", target.display()));
            }
            ProgressEvent::MergeSkipped { target, .. } => {
                self.say(format!("  {} already exists, skipping", target.display()));
            }
            ProgressEvent::Merged {
                target, warnings, ..
            } => {
                if warnings {
                    self.say(format!("  Wrote {} (with warnings)", target.display()));
                } else {
                    self.say(format!("  Wrote {}", target.display()));
                }
            }
            ProgressEvent::CleaningUp => {
                self.say("  Cleaning up...".to_string());
            }
            ProgressEvent::CleanupFailed { path, reason } => {
                eprintln!("  Could not remove {}: {}", path.display(), reason);
            }
            ProgressEvent::Complete { assembled, skipped } => {
                self.say(format!(
                    "\nDone! Assembled {} episode(s), skipped {}.",
                    assembled, skipped
                ));
            }
        }
    }
}

fn format_elapsed(elapsed: Duration) -> String {
    let secs = elapsed.as_secs();
    format!("{}:{:02}", secs / 60, secs % 60)
}

/// Log directives when `RUST_LOG` is unset: warnings plus what the flags ask for
///
/// Feed and act stream URLs are logged by the catalog client and by the
/// download orchestrator, so `print_urls` raises both.
fn log_directives(verbose: bool, settings: &Settings) -> String {
    if verbose {
        return "episode_assembler=debug".to_string();
    }

    let mut directives = vec!["warn"];
    if settings.print_urls {
        directives.push("episode_assembler::catalog=debug");
        directives.push("episode_assembler::download=debug");
    }
    if settings.print_command_calls {
        directives.push("episode_assembler::tools=debug");
    }
    directives.join(",")
}

fn log_filter(args: &Args, settings: &Settings) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(log_directives(args.verbose, settings)))
}

fn load_settings(args: &Args) -> Result<Settings, DownloaderError> {
    let path = match &args.config {
        Some(path) => path.clone(),
        None => Settings::default_path()?,
    };
    Ok(Settings::load(&path)?)
}

fn assemble(
    args: &Args,
    settings: &Settings,
    reporter: &mut Reporter,
) -> Result<usize, DownloaderError> {
    let request = RunRequest::parse(&args.language, &args.season, args.episodes.as_deref())?;

    let ffmpeg = Ffmpeg::detect(settings.ffmpeg_path(), settings.quiet_commands)?;
    let mkvmerge = Mkvmerge::detect(settings.mkvmerge.clone(), settings.quiet_commands)?;
    tracing::info!(
        ffmpeg = %ffmpeg.version(),
        mkvmerge = %mkvmerge.version(),
        "external tools found"
    );

    let catalog = HttpCatalog::new(settings.catalog.clone());
    let tools = Tools {
        catalog: &catalog,
        fetcher: &ffmpeg,
        probe: &ffmpeg,
        muxer: &mkvmerge,
    };

    run(settings, &request, tools, |event| reporter.handle(event))
}

fn main() {
    let args = Args::parse();

    let settings = match load_settings(&args) {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("Error: {}", e);
            process::exit(e.exit_code());
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(log_filter(&args, &settings))
        .with_writer(std::io::stderr)
        .init();

    let mut reporter = Reporter::new(args.quiet);

    if let Err(e) = assemble(&args, &settings, &mut reporter) {
        reporter.stop_spinner();
        eprintln!("\nError: {}", e);
        process::exit(e.exit_code());
    }
}
