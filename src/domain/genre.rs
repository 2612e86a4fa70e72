// ============================================================
// Layer 3 — Genre Taxonomy and Feature Slots
// ============================================================
// The canonical genre list fixes the first 19 slots of every
// feature vector. The slot enums below are the single place that
// says which slot means what; feature code never indexes a
// vector with a bare number.
//
// User vector layout (FEATURE_DIM = 32):
//   [0..19)  per-genre mean normalised rating
//   19       mean rating / 5
//   20       rating variance / 5 (capped at 1)
//   21       interaction count / 100 (capped at 1)
//   22       fraction of ratings >= 4
//   23       fraction of ratings <= 2
//   [24..32) unused, always zero
//
// Item vector layout:
//   [0..19)  one-hot genre membership
//   19       genre count / 5 (capped at 1)
//   [20..26) one-hot decade bucket, 1970s .. 2020s
//   26       recency since 1950
//   [27..32) unused, always zero

use serde::{Deserialize, Serialize};

/// Width of every user and item feature vector.
pub const FEATURE_DIM: usize = 32;

/// The canonical genre taxonomy, in slot order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Genre {
    Action,
    Adventure,
    Animation,
    Children,
    Comedy,
    Crime,
    Documentary,
    Drama,
    Fantasy,
    FilmNoir,
    Horror,
    Imax,
    Musical,
    Mystery,
    Romance,
    SciFi,
    Thriller,
    War,
    Western,
}

impl Genre {
    pub const COUNT: usize = 19;

    pub const ALL: [Genre; Genre::COUNT] = [
        Genre::Action,
        Genre::Adventure,
        Genre::Animation,
        Genre::Children,
        Genre::Comedy,
        Genre::Crime,
        Genre::Documentary,
        Genre::Drama,
        Genre::Fantasy,
        Genre::FilmNoir,
        Genre::Horror,
        Genre::Imax,
        Genre::Musical,
        Genre::Mystery,
        Genre::Romance,
        Genre::SciFi,
        Genre::Thriller,
        Genre::War,
        Genre::Western,
    ];

    /// Position of this genre in the taxonomy (and in the feature vector).
    pub const fn slot(self) -> usize {
        self as usize
    }

    /// The name used in the ratings dataset's genre strings.
    #[cfg(test)]
    pub const fn name(self) -> &'static str {
        match self {
            Genre::Action      => "Action",
            Genre::Adventure   => "Adventure",
            Genre::Animation   => "Animation",
            Genre::Children    => "Children",
            Genre::Comedy      => "Comedy",
            Genre::Crime       => "Crime",
            Genre::Documentary => "Documentary",
            Genre::Drama       => "Drama",
            Genre::Fantasy     => "Fantasy",
            Genre::FilmNoir    => "Film-Noir",
            Genre::Horror      => "Horror",
            Genre::Imax        => "IMAX",
            Genre::Musical     => "Musical",
            Genre::Mystery     => "Mystery",
            Genre::Romance     => "Romance",
            Genre::SciFi       => "Sci-Fi",
            Genre::Thriller    => "Thriller",
            Genre::War         => "War",
            Genre::Western     => "Western",
        }
    }

    /// Case-insensitive lookup by dataset name.
    /// "Children's" and "Sci Fi" spellings from older dumps are accepted.
    pub fn from_name(name: &str) -> Option<Genre> {
        let key: String = name
            .trim()
            .chars()
            .filter(|c| c.is_ascii_alphanumeric())
            .map(|c| c.to_ascii_lowercase())
            .collect();
        let genre = match key.as_str() {
            "action"                 => Genre::Action,
            "adventure"              => Genre::Adventure,
            "animation"              => Genre::Animation,
            "children" | "childrens" => Genre::Children,
            "comedy"                 => Genre::Comedy,
            "crime"                  => Genre::Crime,
            "documentary"            => Genre::Documentary,
            "drama"                  => Genre::Drama,
            "fantasy"                => Genre::Fantasy,
            "filmnoir"               => Genre::FilmNoir,
            "horror"                 => Genre::Horror,
            "imax"                   => Genre::Imax,
            "musical"                => Genre::Musical,
            "mystery"                => Genre::Mystery,
            "romance"                => Genre::Romance,
            "scifi"                  => Genre::SciFi,
            "thriller"               => Genre::Thriller,
            "war"                    => Genre::War,
            "western"                => Genre::Western,
            _ => return None,
        };
        Some(genre)
    }
}

/// Release-decade buckets used by item vectors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decade {
    D1970s,
    D1980s,
    D1990s,
    D2000s,
    D2010s,
    D2020s,
}

impl Decade {
    pub const COUNT: usize = 6;

    pub const ALL: [Decade; Decade::COUNT] = [
        Decade::D1970s,
        Decade::D1980s,
        Decade::D1990s,
        Decade::D2000s,
        Decade::D2010s,
        Decade::D2020s,
    ];

    /// Years outside 1970–2029 have no bucket.
    pub fn of_year(year: i32) -> Option<Decade> {
        match year {
            1970..=1979 => Some(Decade::D1970s),
            1980..=1989 => Some(Decade::D1980s),
            1990..=1999 => Some(Decade::D1990s),
            2000..=2009 => Some(Decade::D2000s),
            2010..=2019 => Some(Decade::D2010s),
            2020..=2029 => Some(Decade::D2020s),
            _ => None,
        }
    }
}

// ─── Slot enumerations ────────────────────────────────────────────────────────

/// Named slots of a user feature vector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UserSlot {
    GenrePreference(Genre),
    MeanRating,
    RatingVariance,
    InteractionCount,
    HighRatingFraction,
    LowRatingFraction,
}

impl UserSlot {
    pub const fn index(self) -> usize {
        match self {
            UserSlot::GenrePreference(g) => g.slot(),
            UserSlot::MeanRating         => Genre::COUNT,
            UserSlot::RatingVariance     => Genre::COUNT + 1,
            UserSlot::InteractionCount   => Genre::COUNT + 2,
            UserSlot::HighRatingFraction => Genre::COUNT + 3,
            UserSlot::LowRatingFraction  => Genre::COUNT + 4,
        }
    }
}

/// Named slots of an item feature vector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemSlot {
    Genre(Genre),
    GenreCount,
    Decade(Decade),
    Recency,
}

impl ItemSlot {
    pub const fn index(self) -> usize {
        match self {
            ItemSlot::Genre(g)   => g.slot(),
            ItemSlot::GenreCount => Genre::COUNT,
            ItemSlot::Decade(d)  => Genre::COUNT + 1 + d as usize,
            ItemSlot::Recency    => Genre::COUNT + 1 + Decade::COUNT,
        }
    }
}

// Both layouts must fit in the fixed vector width.
const _: () = assert!(UserSlot::LowRatingFraction.index() < FEATURE_DIM);
const _: () = assert!(ItemSlot::Recency.index() < FEATURE_DIM);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn taxonomy_order_matches_slots() {
        for (i, g) in Genre::ALL.iter().enumerate() {
            assert_eq!(g.slot(), i);
        }
    }

    #[test]
    fn names_round_trip() {
        for g in Genre::ALL {
            assert_eq!(Genre::from_name(g.name()), Some(g));
        }
        assert_eq!(Genre::from_name(" sci-fi "), Some(Genre::SciFi));
        assert_eq!(Genre::from_name("Children's"), Some(Genre::Children));
        assert_eq!(Genre::from_name("(no genres listed)"), None);
    }

    #[test]
    fn slot_layout() {
        assert_eq!(UserSlot::MeanRating.index(), 19);
        assert_eq!(UserSlot::LowRatingFraction.index(), 23);
        assert_eq!(ItemSlot::GenreCount.index(), 19);
        assert_eq!(ItemSlot::Decade(Decade::D1970s).index(), 20);
        assert_eq!(ItemSlot::Decade(Decade::D2020s).index(), 25);
        assert_eq!(ItemSlot::Recency.index(), 26);
    }

    #[test]
    fn decade_buckets() {
        assert_eq!(Decade::of_year(1995), Some(Decade::D1990s));
        assert_eq!(Decade::of_year(2020), Some(Decade::D2020s));
        assert_eq!(Decade::of_year(1969), None);
    }
}
