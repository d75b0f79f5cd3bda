//! File and ledger naming
//!
//! Every file this tool writes, and every ledger key it reads, is derived
//! from the same `S{season:02}E{episode:02}[A{act}][ {title} ][{LANGS}][.{ext}]`
//! pattern. Existing downloads and ledgers on disk depend on it, so the
//! format must stay stable.

use crate::model::Episode;

/// Characters kept in titles used for filenames, besides ASCII letters and digits
const TITLE_EXTRA_CHARS: &str = "äöüßèÄÖÜẞÈ()!%&_' .-";

/// Formats the canonical name for a season/episode/act/language combination
///
/// Language codes are upper-cased and joined with `+`. The act, title and
/// extension segments are left out when not given.
///
/// # Examples
///
/// ```
/// use episode_assembler::format_filename;
///
/// let name = format_filename(15, 6, &["de".to_string()], Some("mp4"), Some(2), None);
/// assert_eq!(name, "S15E06A2DE.mp4");
/// ```
pub fn format_filename(
    season: u32,
    episode: u32,
    languages: &[String],
    extension: Option<&str>,
    act: Option<u32>,
    title: Option<&str>,
) -> String {
    let mut name = format!("S{:02}E{:02}", season, episode);

    if let Some(act) = act {
        name.push_str(&format!("A{}", act));
    }

    if let Some(title) = title.filter(|t| !t.is_empty()) {
        name.push_str(&format!(" {} ", title));
    }

    let languages = languages
        .iter()
        .map(|l| l.to_uppercase())
        .collect::<Vec<_>>()
        .join("+");
    name.push_str(&languages);

    if let Some(extension) = extension.filter(|e| !e.is_empty()) {
        name.push('.');
        name.push_str(extension);
    }

    name
}

/// Label used in progress output and as ledger key for one act in one language
pub fn act_label(season: u32, episode: u32, act: u32, language: &str) -> String {
    format_filename(season, episode, &[language.to_string()], None, Some(act), None)
}

/// Strips a title down to characters that are safe in filenames
///
/// The German low and high double quotes become plain apostrophes, anything
/// outside the allow-list is dropped.
pub fn sanitize_title(title: &str) -> String {
    title
        .chars()
        .map(|c| match c {
            '„' | '“' => '\'',
            c => c,
        })
        .filter(|&c| c.is_ascii_alphanumeric() || TITLE_EXTRA_CHARS.contains(c))
        .collect()
}

/// Title embedded in the merged file: `"<show> S15E06: Titel | Title"`
pub fn episode_title(show_name: &str, episode: &Episode, languages: &[String]) -> String {
    let titles = languages
        .iter()
        .map(|l| episode.title(l).unwrap_or_default())
        .collect::<Vec<_>>()
        .join(" | ");

    format!(
        "{} {}: {}",
        show_name,
        format_filename(episode.season(), episode.number(), &[], None, None, None),
        titles
    )
}

/// Filename of the merged file: `"<show> S15E06 Titel (Title) DE+EN.mkv"`
pub fn output_filename(show_name: &str, episode: &Episode, languages: &[String]) -> String {
    let mut title = String::new();

    for (index, language) in languages.iter().enumerate() {
        let localized = episode.title(language).unwrap_or_default();
        if index > 0 {
            title.push_str(&format!(" ({})", localized));
        } else {
            title.push_str(localized);
        }
    }

    let name = format_filename(
        episode.season(),
        episode.number(),
        languages,
        Some("mkv"),
        None,
        Some(&sanitize_title(&title)),
    );

    format!("{} {}", show_name, name)
}
