use std::cmp::Ordering;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One entry of the persisted collection.
///
/// The document on disk is a bare JSON array of these records:
///
/// ```json
/// [
///   {
///     "albumTitle": "Abbey Road",
///     "artistName": "The Beatles",
///     "year": "1969",
///     "coverPath": "/home/me/.local/share/album-shelf/covers/the_beatles_abbey_road_4821.png",
///     "dateAdded": "2024-03-01T10:12:44Z"
///   }
/// ]
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Album {
    pub album_title: String,
    pub artist_name: String,
    #[serde(default)]
    pub year: String,
    pub cover_path: PathBuf,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date_added: Option<DateTime<Utc>>,
}

impl Album {
    pub fn key(&self) -> AlbumKey {
        AlbumKey::new(&self.album_title, &self.artist_name)
    }

    pub fn matches(&self, key: &AlbumKey) -> bool {
        key.matches(&self.album_title, &self.artist_name)
    }

    /// Numeric year used by range filters and ordering. Empty or non-numeric
    /// years yield `None`.
    pub fn numeric_year(&self) -> Option<i32> {
        parse_year(&self.year)
    }

    pub fn cover(&self) -> &Path {
        &self.cover_path
    }
}

/// User-supplied fields for add and edit dialogs, before validation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AlbumDraft {
    pub album_title: String,
    pub artist_name: String,
    #[serde(default)]
    pub year: String,
}

impl AlbumDraft {
    pub fn new(
        album_title: impl Into<String>,
        artist_name: impl Into<String>,
        year: impl Into<String>,
    ) -> Self {
        Self {
            album_title: album_title.into(),
            artist_name: artist_name.into(),
            year: year.into(),
        }
    }

    /// Trims every field and rejects drafts without a title or artist.
    pub fn normalized(&self) -> Result<AlbumDraft, String> {
        let album_title = self.album_title.trim();
        let artist_name = self.artist_name.trim();
        if album_title.is_empty() || artist_name.is_empty() {
            return Err("album title and artist name are required".to_string());
        }

        Ok(AlbumDraft {
            album_title: album_title.to_string(),
            artist_name: artist_name.to_string(),
            year: self.year.trim().to_string(),
        })
    }

    pub fn key(&self) -> AlbumKey {
        AlbumKey::new(&self.album_title, &self.artist_name)
    }
}

/// Natural key of an album: the case-insensitive (title, artist) pair.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AlbumKey {
    title: String,
    artist: String,
}

impl AlbumKey {
    pub fn new(title: &str, artist: &str) -> Self {
        Self {
            title: title.trim().to_lowercase(),
            artist: artist.trim().to_lowercase(),
        }
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn artist(&self) -> &str {
        &self.artist
    }

    pub fn matches(&self, title: &str, artist: &str) -> bool {
        title.trim().to_lowercase() == self.title && artist.trim().to_lowercase() == self.artist
    }
}

impl From<&Album> for AlbumKey {
    fn from(album: &Album) -> Self {
        album.key()
    }
}

pub fn parse_year(value: &str) -> Option<i32> {
    value.trim().parse::<i32>().ok()
}

/// Drops a leading "The " / "the " so "The Beatles" files under B.
pub fn strip_leading_article(artist: &str) -> &str {
    artist
        .strip_prefix("The ")
        .or_else(|| artist.strip_prefix("the "))
        .unwrap_or(artist)
}

fn compare_names(a: &str, b: &str) -> Ordering {
    a.to_lowercase()
        .cmp(&b.to_lowercase())
        .then_with(|| a.cmp(b))
}

/// Resting order of the collection: article-stripped artist, then year
/// ascending. Empty or non-numeric years count as 0.
pub fn collection_order(a: &Album, b: &Album) -> Ordering {
    compare_names(
        strip_leading_article(&a.artist_name),
        strip_leading_article(&b.artist_name),
    )
    .then_with(|| year_or_zero(a).cmp(&year_or_zero(b)))
}

pub(crate) fn year_or_zero(album: &Album) -> i32 {
    album.numeric_year().unwrap_or(0)
}

pub fn sort_collection(albums: &mut [Album]) {
    albums.sort_by(collection_order);
}

pub fn position_of(albums: &[Album], key: &AlbumKey) -> Option<usize> {
    albums.iter().position(|album| album.matches(key))
}

#[cfg(test)]
pub(crate) fn album(title: &str, artist: &str, year: &str) -> Album {
    Album {
        album_title: title.to_string(),
        artist_name: artist.to_string(),
        year: year.to_string(),
        cover_path: PathBuf::from(format!("/covers/{title}.png")),
        date_added: None,
    }
}
