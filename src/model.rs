//! Season, episode and act containment hierarchy
//!
//! A season owns its episodes, an episode owns its acts. Numbers are unique
//! within their parent and always positive; the `add_*` methods guard both.

use std::collections::HashMap;
use thiserror::Error;

/// Errors raised while assembling the hierarchy
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ModelError {
    /// Season, episode and act numbers start at 1
    #[error("Invalid {kind} number: {number}")]
    InvalidNumber { kind: &'static str, number: u32 },

    /// An episode with the same number was already added to the season
    #[error("Episode {episode} for S{season:02} already exists.")]
    DuplicateEpisode { season: u32, episode: u32 },

    /// An act with the same number was already added to the episode
    #[error("Act {act} for S{season:02}E{episode:02} already exists.")]
    DuplicateAct { season: u32, episode: u32, act: u32 },

    /// A requested episode is not part of the season
    #[error("Episode {episode} for S{season:02} does not exist.")]
    EpisodeNotFound { season: u32, episode: u32 },

    #[error("Act {act} has no metadata URL for language \"{language}\"")]
    MissingMetadataUrl { act: u32, language: String },
}

fn ensure_positive(kind: &'static str, number: u32) -> Result<u32, ModelError> {
    if number == 0 {
        return Err(ModelError::InvalidNumber { kind, number });
    }
    Ok(number)
}

/// One season, holding its episodes in insertion order
#[derive(Debug, Clone, PartialEq)]
pub struct Season {
    number: u32,
    episodes: Vec<Episode>,
}

impl Season {
    pub fn new(number: u32) -> Result<Self, ModelError> {
        Ok(Self {
            number: ensure_positive("season", number)?,
            episodes: Vec::new(),
        })
    }

    pub fn number(&self) -> u32 {
        self.number
    }

    /// Adds an episode, rejecting a second episode with the same number
    pub fn add_episode(&mut self, episode: Episode) -> Result<(), ModelError> {
        if self.episode(episode.number).is_some() {
            return Err(ModelError::DuplicateEpisode {
                season: self.number,
                episode: episode.number,
            });
        }

        self.episodes.push(episode);
        Ok(())
    }

    pub fn episode(&self, number: u32) -> Option<&Episode> {
        self.episodes.iter().find(|e| e.number == number)
    }

    pub fn episode_mut(&mut self, number: u32) -> Option<&mut Episode> {
        self.episodes.iter_mut().find(|e| e.number == number)
    }

    pub fn episodes(&self) -> &[Episode] {
        &self.episodes
    }

    /// Returns clones of the requested episodes, in request order
    ///
    /// An empty request selects every episode of the season.
    pub fn select(&self, numbers: &[u32]) -> Result<Vec<Episode>, ModelError> {
        if numbers.is_empty() {
            return Ok(self.episodes.clone());
        }

        numbers
            .iter()
            .map(|&number| {
                self.episode(number)
                    .cloned()
                    .ok_or(ModelError::EpisodeNotFound {
                        season: self.number,
                        episode: number,
                    })
            })
            .collect()
    }
}

/// One episode: remote item id, localized titles and its acts
#[derive(Debug, Clone, PartialEq)]
pub struct Episode {
    season: u32,
    number: u32,
    /// Same for every language, e.g. "ebb343ef-711d-450e-baa5-60ec0848e977"
    item_id: String,
    titles: HashMap<String, String>,
    acts: Vec<Act>,
}

impl Episode {
    pub fn new(season: u32, number: u32, item_id: impl Into<String>) -> Result<Self, ModelError> {
        Ok(Self {
            season: ensure_positive("season", season)?,
            number: ensure_positive("episode", number)?,
            item_id: item_id.into(),
            titles: HashMap::new(),
            acts: Vec::new(),
        })
    }

    pub fn season(&self) -> u32 {
        self.season
    }

    pub fn number(&self) -> u32 {
        self.number
    }

    pub fn item_id(&self) -> &str {
        &self.item_id
    }

    pub fn set_title(&mut self, language: &str, title: impl Into<String>) {
        self.titles.insert(language.to_string(), title.into());
    }

    pub fn title(&self, language: &str) -> Option<&str> {
        self.titles.get(language).map(String::as_str)
    }

    /// Adds an act, rejecting a second act with the same number
    pub fn add_act(&mut self, act: Act) -> Result<(), ModelError> {
        if self.act(act.number).is_some() {
            return Err(ModelError::DuplicateAct {
                season: self.season,
                episode: self.number,
                act: act.number,
            });
        }

        self.acts.push(act);
        Ok(())
    }

    pub fn act(&self, number: u32) -> Option<&Act> {
        self.acts.iter().find(|a| a.number == number)
    }

    pub fn acts(&self) -> &[Act] {
        &self.acts
    }
}

/// One act: the unit of download and concatenation
#[derive(Debug, Clone, PartialEq)]
pub struct Act {
    number: u32,
    metadata_urls: HashMap<String, String>,
}

impl Act {
    pub fn new(number: u32) -> Result<Self, ModelError> {
        Ok(Self {
            number: ensure_positive("act", number)?,
            metadata_urls: HashMap::new(),
        })
    }

    pub fn number(&self) -> u32 {
        self.number
    }

    pub fn set_metadata_url(&mut self, language: &str, url: impl Into<String>) {
        self.metadata_urls.insert(language.to_string(), url.into());
    }

    pub fn metadata_url(&self, language: &str) -> Option<&str> {
        self.metadata_urls.get(language).map(String::as_str)
    }

    /// Like `metadata_url`, for callers that rely on the URL being set
    pub fn require_metadata_url(&self, language: &str) -> Result<&str, ModelError> {
        self.metadata_url(language)
            .ok_or_else(|| ModelError::MissingMetadataUrl {
                act: self.number,
                language: language.to_string(),
            })
    }
}

/// Builds the acts of an episode from its ordered feed items
///
/// The n-th feed item becomes act n for every language, so act numbers line
/// up across languages by construction. `localize` maps a feed item and a
/// language to that language's metadata URL.
pub fn build_acts<F>(
    feed_items: &[String],
    languages: &[String],
    localize: F,
) -> Result<Vec<Act>, ModelError>
where
    F: Fn(&str, &str) -> String,
{
    feed_items
        .iter()
        .enumerate()
        .map(|(index, item)| {
            let mut act = Act::new(index as u32 + 1)?;
            for language in languages {
                act.set_metadata_url(language, localize(item, language));
            }
            Ok(act)
        })
        .collect()
}
