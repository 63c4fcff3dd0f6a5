//! Search / genre filtering of the station catalog.
//!
//! Pure functions only: the visible list is recomputed from the catalog and
//! the current criteria whenever the criteria change.

use serde::{Deserialize, Serialize};

use crate::catalog::Catalog;
use crate::protocol::Station;

/// Wire value of the "every genre" sentinel.
pub const ALL_GENRES: &str = "All";

/// Genre selection: either the `All` sentinel or one concrete genre.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum GenreFilter {
    #[default]
    All,
    Genre(String),
}

impl GenreFilter {
    pub fn matches(&self, genre: &str) -> bool {
        match self {
            Self::All => true,
            Self::Genre(g) => g == genre,
        }
    }

    pub fn label(&self) -> &str {
        match self {
            Self::All => ALL_GENRES,
            Self::Genre(g) => g,
        }
    }
}

impl From<String> for GenreFilter {
    fn from(value: String) -> Self {
        if value == ALL_GENRES {
            Self::All
        } else {
            Self::Genre(value)
        }
    }
}

impl From<&str> for GenreFilter {
    fn from(value: &str) -> Self {
        Self::from(value.to_string())
    }
}

impl From<GenreFilter> for String {
    fn from(value: GenreFilter) -> Self {
        match value {
            GenreFilter::All => ALL_GENRES.to_string(),
            GenreFilter::Genre(g) => g,
        }
    }
}

/// The (search text, genre) pair driving the visible subset of the catalog.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct FilterCriteria {
    #[serde(default)]
    pub search_text: String,
    #[serde(default)]
    pub genre: GenreFilter,
}

impl FilterCriteria {
    pub fn new(search_text: impl Into<String>, genre: impl Into<GenreFilter>) -> Self {
        Self {
            search_text: search_text.into(),
            genre: genre.into(),
        }
    }

    pub fn is_unfiltered(&self) -> bool {
        self.search_text.is_empty() && self.genre == GenreFilter::All
    }

    /// True when `station` passes both the search and the genre filter.
    pub fn accepts(&self, station: &Station) -> bool {
        search_matches(&self.search_text, station) && self.genre.matches(&station.genre)
    }
}

/// Case-insensitive substring match against name, description or genre.
/// An empty query matches everything.
pub fn search_matches(query: &str, station: &Station) -> bool {
    if query.is_empty() {
        return true;
    }
    let query = query.to_lowercase();
    [&station.name, &station.description, &station.genre]
        .iter()
        .any(|field| field.to_lowercase().contains(&query))
}

/// Stations passing `criteria`, in catalog order.
pub fn visible_stations<'a>(catalog: &'a Catalog, criteria: &FilterCriteria) -> Vec<&'a Station> {
    catalog.iter().filter(|s| criteria.accepts(s)).collect()
}
