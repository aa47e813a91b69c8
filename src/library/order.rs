//! View-level orderings and the persisted sort preference.

use std::cmp::Ordering;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::warn;

use super::album::{collection_order, year_or_zero, Album};
use super::{write_atomically, LibraryError};

pub const OPTIONS_FILE_NAME: &str = "options.json";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SortMethod {
    #[default]
    Artist,
    Year,
    DateAdded,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SortOrder {
    #[default]
    Ascending,
    Descending,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SortOptions {
    pub method: SortMethod,
    pub order: SortOrder,
}

impl SortOptions {
    pub fn new(method: SortMethod, order: SortOrder) -> Self {
        Self { method, order }
    }

    pub fn compare(&self, a: &Album, b: &Album) -> Ordering {
        let ordering = match self.method {
            SortMethod::Artist => collection_order(a, b),
            SortMethod::Year => year_or_zero(a)
                .cmp(&year_or_zero(b))
                .then_with(|| collection_order(a, b)),
            SortMethod::DateAdded => a.date_added.cmp(&b.date_added),
        };
        match self.order {
            SortOrder::Ascending => ordering,
            SortOrder::Descending => ordering.reverse(),
        }
    }

    /// Stable sort of a view; the persisted collection is never touched.
    pub fn apply(&self, albums: &mut [Album]) {
        albums.sort_by(|a, b| self.compare(a, b));
    }
}

/// Reads and writes `options.json` beside the collection document.
pub struct SortOptionsStore {
    path: PathBuf,
}

impl SortOptionsStore {
    pub fn new(data_dir: &Path) -> Self {
        Self {
            path: data_dir.join(OPTIONS_FILE_NAME),
        }
    }

    /// Missing or unreadable options fall back to artist/ascending.
    pub fn load(&self) -> SortOptions {
        let text = match fs::read_to_string(&self.path) {
            Ok(text) => text,
            Err(_) => return SortOptions::default(),
        };
        match serde_json::from_str(&text) {
            Ok(options) => options,
            Err(error) => {
                warn!(path = %self.path.display(), %error, "ignoring unreadable sort options");
                SortOptions::default()
            }
        }
    }

    pub fn save(&self, options: &SortOptions) -> Result<(), LibraryError> {
        let text = serde_json::to_string_pretty(options)?;
        write_atomically(&self.path, text.as_bytes())
    }
}
