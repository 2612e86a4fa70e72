// ============================================================
// Layer 4 — Item Metadata Parsing
// ============================================================
// The item-metadata relation stores genres as one delimited
// string ("Adventure|Animation|Children") and embeds the release
// year in the title ("Toy Story (1995)"). Both parsers are total:
// malformed input yields "no data", never an error, so a bad row
// degrades its feature slots to zero instead of failing a batch.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::domain::genre::Genre;
use crate::domain::rating::ItemMetadata;

// A 4-digit year in parentheses, optionally a range such as "(1994-1998)".
static TITLE_YEAR: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\((\d{4})(?:\s*[-–]\s*\d{0,4})?\)").expect("valid year regex")
});

const MIN_PLAUSIBLE_YEAR: i32 = 1870;
const MAX_PLAUSIBLE_YEAR: i32 = 2100;

/// Split a pipe- or comma-delimited genre string into canonical genres.
/// Unknown names are skipped; duplicates are dropped; order of first
/// appearance is kept.
pub fn parse_genres(raw: &str) -> Vec<Genre> {
    let mut genres = Vec::new();
    for part in raw.split(['|', ',']) {
        if let Some(g) = Genre::from_name(part) {
            if !genres.contains(&g) {
                genres.push(g);
            }
        }
    }
    genres
}

/// Extract the release year embedded in a title.
/// The last parenthesised year wins, since titles can contain other
/// parentheses ("Seven (a.k.a. Se7en) (1995)").
pub fn parse_release_year(title: &str) -> Option<i32> {
    TITLE_YEAR
        .captures_iter(title)
        .last()
        .and_then(|caps| caps.get(1))
        .and_then(|m| m.as_str().parse::<i32>().ok())
        .filter(|y| (MIN_PLAUSIBLE_YEAR..=MAX_PLAUSIBLE_YEAR).contains(y))
}

/// Build item metadata from raw (possibly missing) columns.
pub fn item_metadata(title: Option<&str>, genres: Option<&str>) -> ItemMetadata {
    ItemMetadata {
        genres:       genres.map(parse_genres).unwrap_or_default(),
        release_year: title.and_then(parse_release_year),
    }
}
