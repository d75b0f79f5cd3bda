//! Remote catalog access
//!
//! The catalog lists seasons and episodes, and resolves each act of an
//! episode to a stream URL. The trait keeps the orchestration independent of
//! the HTTP client, so it can run against in-memory fakes.

mod http;
mod types;

pub use http::HttpCatalog;

use crate::anomaly::AnomalyLedger;
use crate::model::{Episode, ModelError, Season};
use thiserror::Error;

/// Errors that can occur during catalog lookups
#[derive(Debug, Error)]
pub enum CatalogError {
    /// Request to the catalog failed
    #[error("Request to {url} failed: {reason}")]
    RequestFailed { url: String, reason: String },

    /// Failed to parse the catalog's response
    #[error("Failed to parse response from {url}: {reason}")]
    ParseFailed { url: String, reason: String },

    /// The response parsed but lacks expected data
    #[error("Response from {url} is missing {what}")]
    InvalidData { url: String, what: &'static str },

    /// The requested season is not offered
    #[error("Invalid season: {0}")]
    SeasonUnavailable(u32),

    /// An explicitly requested episode is listed but cannot be downloaded
    #[error("S{season:02}E{episode:02} is not available: {availability}")]
    EpisodeUnavailable {
        season: u32,
        episode: u32,
        availability: String,
    },

    #[error(transparent)]
    Model(#[from] ModelError),
}

/// One episode as listed by the catalog for one language
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListedEpisode {
    pub number: u32,
    pub item_id: String,
    pub title: String,
    /// "true" when downloadable; e.g. "banned" or "beforepremiere" otherwise
    pub availability: String,
}

impl ListedEpisode {
    pub fn is_available(&self) -> bool {
        matches!(self.availability.as_str(), "true" | "huluplus")
    }
}

/// Read-only access to the remote catalog
pub trait Catalog {
    /// Season numbers offered for a language
    fn available_seasons(&self, language: &str) -> Result<Vec<u32>, CatalogError>;

    /// Episodes of one season, as listed for a language
    fn season_listing(&self, language: &str, season: u32)
    -> Result<Vec<ListedEpisode>, CatalogError>;

    /// Ordered act item templates from one episode feed mirror
    ///
    /// Returns `None` when the mirror answers without any items.
    fn episode_feed(&self, feed_url: &str) -> Result<Option<Vec<String>>, CatalogError>;

    /// Stream URL for one act in one language
    fn act_stream_url(&self, act_metadata_url: &str) -> Result<String, CatalogError>;
}

/// Turns a feed item template into the act metadata URL for one language
///
/// e.g. `".../mgid:arc:video:...?device={device}&aspectRatio=16:9&lang=de"`
pub fn localize_item_url(item_template: &str, language: &str) -> String {
    let lang = format!("lang={}", language);

    format!("{}&format=json", item_template)
        .replace("{device}", "iPad")
        .replace("lang=de", &lang)
        .replace("lang=en", &lang)
}

/// Moves the highest bitrate variant to the front of an HLS playlist URL
///
/// Only matters for older episodes offering 640x480 at both 600 and 800
/// kbit/s; URLs without the marker are returned unchanged.
pub fn select_highest_bitrate(stream_url: &str) -> String {
    stream_url.replace("__b__=450", "__b__=10000")
}

/// Builds a season from the catalog, one ordered pass per language
///
/// The first language to list an episode creates it; every language then
/// contributes its title, preferring a title override from the anomaly
/// ledger. Unavailable episodes are skipped, unless they were explicitly
/// requested.
pub fn build_season(
    catalog: &dyn Catalog,
    anomalies: &AnomalyLedger,
    season_number: u32,
    languages: &[String],
    requested_episodes: &[u32],
) -> Result<Season, CatalogError> {
    let mut season = Season::new(season_number)?;

    for language in languages {
        tracing::debug!(season = season_number, language = %language, "fetching episode listing");

        for listed in catalog.season_listing(language, season_number)? {
            if !listed.is_available() {
                if requested_episodes.contains(&listed.number) {
                    return Err(CatalogError::EpisodeUnavailable {
                        season: season_number,
                        episode: listed.number,
                        availability: listed.availability,
                    });
                }

                tracing::debug!(
                    episode = listed.number,
                    availability = %listed.availability,
                    "skipping unavailable episode"
                );
                continue;
            }

            if season.episode(listed.number).is_none() {
                season.add_episode(Episode::new(season_number, listed.number, &listed.item_id)?)?;
            }

            let title = anomalies
                .title(season_number, listed.number, language)
                .map(str::to_string)
                .unwrap_or(listed.title);

            if let Some(episode) = season.episode_mut(listed.number) {
                episode.set_title(language, title);
            }
        }
    }

    Ok(season)
}
