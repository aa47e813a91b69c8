//! Query language for filtering the collection.
//!
//! A query is split on ` OR ` into groups. Inside a group, tokens are read in
//! priority order: quoted phrases, then `key:value` pairs and relational year
//! bounds (`year>=1968`), then bare words. Year bounds are shared by every
//! group and filter the whole result.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::library::Album;

static TOKEN_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#""[^"]*"|(?:year:|artist:|album:|from:|to:|[a-zA-Z]+:)(?:"[^"]*"|\S+)|\S+"#)
        .unwrap_or_else(|error| panic!("invalid token pattern: {error}"))
});

static YEAR_BOUND_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^year(>=|<=|>|<)(\d+)$")
        .unwrap_or_else(|error| panic!("invalid year bound pattern: {error}"))
});

const OR_SEPARATOR: &str = " OR ";

/// Inclusive year bounds. `None` means unbounded on that side.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct YearRange {
    pub min: Option<i32>,
    pub max: Option<i32>,
}

impl YearRange {
    pub fn is_unbounded(&self) -> bool {
        self.min.is_none() && self.max.is_none()
    }

    /// Albums without a numeric year fall outside any bounded range.
    pub fn contains(&self, album: &Album) -> bool {
        if self.is_unbounded() {
            return true;
        }
        let Some(year) = album.numeric_year() else {
            return false;
        };
        self.min.map_or(true, |min| year >= min) && self.max.map_or(true, |max| year <= max)
    }
}

/// Value of a field-qualified term. Quoted values must match the whole field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldValue {
    Contains(String),
    Exact(String),
}

impl FieldValue {
    fn parse(raw: &str) -> Option<Self> {
        match unquote(raw) {
            Some(inner) => {
                let inner = inner.trim().to_lowercase();
                (!inner.is_empty()).then_some(FieldValue::Exact(inner))
            }
            None => Some(FieldValue::Contains(raw.to_lowercase())),
        }
    }

    fn matches(&self, field: &str) -> bool {
        let field = field.to_lowercase();
        match self {
            FieldValue::Contains(needle) => field.contains(needle.as_str()),
            FieldValue::Exact(expected) => field == *expected,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldTerm {
    Artist(FieldValue),
    Album(FieldValue),
    Year(String),
}

impl FieldTerm {
    fn matches(&self, album: &Album) -> bool {
        match self {
            FieldTerm::Artist(value) => value.matches(&album.artist_name),
            FieldTerm::Album(value) => value.matches(&album.album_title),
            FieldTerm::Year(year) => album.year.trim() == year,
        }
    }
}

/// One OR-group. Every term, phrase and field term must match.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SearchGroup {
    pub terms: Vec<String>,
    pub phrases: Vec<String>,
    pub fields: Vec<FieldTerm>,
}

impl SearchGroup {
    pub fn is_empty(&self) -> bool {
        self.terms.is_empty() && self.phrases.is_empty() && self.fields.is_empty()
    }

    pub fn matches(&self, album: &Album) -> bool {
        let title = album.album_title.to_lowercase();
        let artist = album.artist_name.to_lowercase();

        let terms = self.terms.iter().all(|term| {
            title.contains(term.as_str()) || artist.contains(term.as_str()) || album.year == *term
        });
        let phrases = self
            .phrases
            .iter()
            .all(|phrase| title == *phrase || artist == *phrase);

        terms && phrases && self.fields.iter().all(|field| field.matches(album))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SearchQuery {
    pub groups: Vec<SearchGroup>,
    pub years: YearRange,
}

impl SearchQuery {
    pub fn parse(input: &str) -> Self {
        let mut years = YearRange::default();
        let groups = input
            .split(OR_SEPARATOR)
            .map(|section| parse_group(section, &mut years))
            .filter(|group| !group.is_empty())
            .collect();
        Self { groups, years }
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty() && self.years.is_unbounded()
    }

    pub fn matches(&self, album: &Album) -> bool {
        let grouped =
            self.groups.is_empty() || self.groups.iter().any(|group| group.matches(album));
        grouped && self.years.contains(album)
    }

    /// Matching albums in their input order.
    pub fn filter(&self, albums: &[Album]) -> Vec<Album> {
        albums
            .iter()
            .filter(|album| self.matches(album))
            .cloned()
            .collect()
    }
}

pub fn search(query: &str, albums: &[Album]) -> Vec<Album> {
    SearchQuery::parse(query).filter(albums)
}

fn parse_group(section: &str, years: &mut YearRange) -> SearchGroup {
    let mut group = SearchGroup::default();

    for token in TOKEN_PATTERN.find_iter(section).map(|found| found.as_str()) {
        if let Some(inner) = unquote(token) {
            let phrase = inner.trim().to_lowercase();
            if !phrase.is_empty() {
                group.phrases.push(phrase);
            }
            continue;
        }

        if let Some(captures) = YEAR_BOUND_PATTERN.captures(token) {
            let Ok(year) = captures[2].parse::<i32>() else {
                continue;
            };
            match &captures[1] {
                ">=" => years.min = Some(year),
                "<=" => years.max = Some(year),
                ">" => years.min = Some(year.saturating_add(1)),
                _ => years.max = Some(year.saturating_add(1)),
            }
            continue;
        }

        if token == "AND" {
            continue;
        }

        if let Some((key, value)) = token.split_once(':') {
            if apply_key_value(&key.to_lowercase(), value, &mut group, years) {
                continue;
            }
        }

        group.terms.push(token.to_lowercase());
    }

    group
}

/// Applies a recognised `key:value` token. Returns false for unknown keys so
/// the caller can fall back to a general term.
fn apply_key_value(key: &str, value: &str, group: &mut SearchGroup, years: &mut YearRange) -> bool {
    match key {
        "from" => {
            if let Ok(year) = value.trim().parse::<i32>() {
                years.min = Some(year);
            }
            true
        }
        "to" => {
            if let Ok(year) = value.trim().parse::<i32>() {
                years.max = Some(year);
            }
            true
        }
        "year" => {
            let year = unquote(value).unwrap_or(value).trim().to_string();
            if !year.is_empty() {
                group.fields.push(FieldTerm::Year(year));
            }
            true
        }
        "artist" => {
            if let Some(value) = FieldValue::parse(value) {
                group.fields.push(FieldTerm::Artist(value));
            }
            true
        }
        "album" => {
            if let Some(value) = FieldValue::parse(value) {
                group.fields.push(FieldTerm::Album(value));
            }
            true
        }
        _ => false,
    }
}

fn unquote(token: &str) -> Option<&str> {
    if token.len() >= 2 && token.starts_with('"') && token.ends_with('"') {
        Some(&token[1..token.len() - 1])
    } else {
        None
    }
}
