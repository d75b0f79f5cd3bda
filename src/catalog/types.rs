//! Catalog response types for deserialization.
//!
//! These structures mirror the JSON documents served by the catalog; only
//! the fields this tool reads are declared.

use serde::Deserialize;

/// Episode listing for one season.
#[derive(Debug, Deserialize)]
pub(super) struct EpisodeListing {
    pub results: Vec<ListingResult>,
}

/// One entry of an episode listing.
#[derive(Debug, Deserialize)]
pub(super) struct ListingResult {
    /// Season and episode digits, e.g. "0101" or "1809"
    #[serde(rename = "episodeNumber")]
    pub episode_number: String,
    #[serde(rename = "itemId")]
    pub item_id: String,
    pub title: String,
    /// Usually "true"; "banned", "huluplus" or "beforepremiere" otherwise
    #[serde(rename = "_availability")]
    pub availability: String,
}

/// Episode feed served by one mirror.
#[derive(Debug, Deserialize)]
pub(super) struct EpisodeFeed {
    pub feed: Option<FeedBody>,
}

#[derive(Debug, Deserialize)]
pub(super) struct FeedBody {
    pub items: Option<Vec<FeedItem>>,
}

#[derive(Debug, Deserialize)]
pub(super) struct FeedItem {
    pub group: FeedGroup,
}

#[derive(Debug, Deserialize)]
pub(super) struct FeedGroup {
    /// Act metadata URL template containing `{device}` and `lang=..`
    pub content: String,
}

/// Metadata of one act, carrying the HLS stream renditions.
#[derive(Debug, Deserialize)]
pub(super) struct ActMetadata {
    pub package: ActPackage,
}

#[derive(Debug, Deserialize)]
pub(super) struct ActPackage {
    pub video: ActVideo,
}

#[derive(Debug, Deserialize)]
pub(super) struct ActVideo {
    pub item: Vec<ActVideoItem>,
}

#[derive(Debug, Deserialize)]
pub(super) struct ActVideoItem {
    pub rendition: Vec<Rendition>,
}

#[derive(Debug, Deserialize)]
pub(super) struct Rendition {
    pub src: String,
}
