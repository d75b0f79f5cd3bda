//! HTTP catalog implementation.

use super::types::{ActMetadata, EpisodeFeed, EpisodeListing};
use super::{Catalog, CatalogError, ListedEpisode};
use crate::settings::CatalogSettings;
use regex::Regex;
use serde::de::DeserializeOwned;
use std::collections::BTreeSet;

/// Catalog backed by the public web site and its JSON services.
pub struct HttpCatalog {
    client: reqwest::blocking::Client,
    settings: CatalogSettings,
}

impl HttpCatalog {
    pub fn new(settings: CatalogSettings) -> Self {
        Self {
            client: reqwest::blocking::Client::new(),
            settings,
        }
    }

    /// Fetches a URL and returns its body, failing on non-success status.
    fn fetch_text(&self, url: &str) -> Result<String, CatalogError> {
        tracing::debug!(url, "fetching");

        let response = self
            .client
            .get(url)
            .send()
            .map_err(|e| CatalogError::RequestFailed {
                url: url.to_string(),
                reason: e.to_string(),
            })?;

        if !response.status().is_success() {
            return Err(CatalogError::RequestFailed {
                url: url.to_string(),
                reason: format!(
                    "HTTP {} {}",
                    response.status().as_u16(),
                    response.status().canonical_reason().unwrap_or("Unknown")
                ),
            });
        }

        response.text().map_err(|e| CatalogError::RequestFailed {
            url: url.to_string(),
            reason: e.to_string(),
        })
    }

    fn fetch_json<T: DeserializeOwned>(&self, url: &str) -> Result<T, CatalogError> {
        let body = self.fetch_text(url)?;

        serde_json::from_str(&body).map_err(|e| CatalogError::ParseFailed {
            url: url.to_string(),
            reason: e.to_string(),
        })
    }
}

/// Extracts season numbers from the `data-value="season-N"` filter links.
fn parse_season_numbers(html: &str) -> Vec<u32> {
    // The pattern is a literal, so it always compiles.
    let Ok(pattern) = Regex::new(r#"data-value="season-(\d+)""#) else {
        return Vec::new();
    };

    pattern
        .captures_iter(html)
        .filter_map(|c| c[1].parse().ok())
        .collect::<BTreeSet<u32>>()
        .into_iter()
        .collect()
}

/// Converts a listing result into a `ListedEpisode`.
///
/// The listing encodes season and episode as one digit string ("1506");
/// everything after the first two digits is the episode number.
fn convert_listing(
    url: &str,
    result: super::types::ListingResult,
) -> Result<ListedEpisode, CatalogError> {
    let number = result
        .episode_number
        .get(2..)
        .and_then(|digits| digits.parse::<u32>().ok())
        .filter(|n| *n > 0)
        .ok_or_else(|| CatalogError::ParseFailed {
            url: url.to_string(),
            reason: format!("unexpected episode number \"{}\"", result.episode_number),
        })?;

    Ok(ListedEpisode {
        number,
        item_id: result.item_id,
        title: result.title,
        availability: result.availability,
    })
}

impl Catalog for HttpCatalog {
    fn available_seasons(&self, language: &str) -> Result<Vec<u32>, CatalogError> {
        let url = self
            .settings
            .available_seasons_url(language)
            .ok_or_else(|| CatalogError::InvalidData {
                url: String::new(),
                what: "a season listing URL for this language",
            })?;

        Ok(parse_season_numbers(&self.fetch_text(url)?))
    }

    fn season_listing(
        &self,
        language: &str,
        season: u32,
    ) -> Result<Vec<ListedEpisode>, CatalogError> {
        let url = self
            .settings
            .available_episodes_url(language, season)
            .ok_or_else(|| CatalogError::InvalidData {
                url: String::new(),
                what: "an episode listing URL for this language",
            })?;

        let listing: EpisodeListing = self.fetch_json(&url)?;

        listing
            .results
            .into_iter()
            .map(|result| convert_listing(&url, result))
            .collect()
    }

    fn episode_feed(&self, feed_url: &str) -> Result<Option<Vec<String>>, CatalogError> {
        let feed: EpisodeFeed = self.fetch_json(feed_url)?;

        Ok(feed
            .feed
            .and_then(|body| body.items)
            .map(|items| items.into_iter().map(|item| item.group.content).collect()))
    }

    fn act_stream_url(&self, act_metadata_url: &str) -> Result<String, CatalogError> {
        let metadata: ActMetadata = self.fetch_json(act_metadata_url)?;

        metadata
            .package
            .video
            .item
            .into_iter()
            .next()
            .and_then(|item| item.rendition.into_iter().next())
            .map(|rendition| rendition.src)
            .ok_or_else(|| CatalogError::InvalidData {
                url: act_metadata_url.to_string(),
                what: "a stream rendition",
            })
    }
}
