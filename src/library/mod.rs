mod album;
mod covers;
mod order;

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use chrono::Utc;
use tempfile::NamedTempFile;
use thiserror::Error;
use tracing::{debug, info, warn};

pub use album::{
    collection_order, parse_year, position_of, sort_collection, strip_leading_article, Album,
    AlbumDraft, AlbumKey,
};
pub use covers::{
    validate_cover_upload, CoverError, CoverStore, MAX_COVER_BYTES, MAX_COVER_DIMENSION,
};
pub use order::{SortMethod, SortOptions, SortOptionsStore, SortOrder};

#[cfg(test)]
pub(crate) use album::album as test_album;
#[cfg(test)]
pub(crate) use covers::png_bytes;

pub const COLLECTION_FILE_NAME: &str = "collection.json";

#[derive(Debug, Error)]
pub enum LibraryError {
    #[error("{0}")]
    Validation(String),
    #[error("album \"{title}\" by {artist} already exists in the collection")]
    Duplicate { title: String, artist: String },
    #[error("album \"{title}\" by {artist} was not found in the collection")]
    NotFound { title: String, artist: String },
    #[error("filesystem error: {0}")]
    Io(#[from] io::Error),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error(transparent)]
    Cover(#[from] CoverError),
}

impl LibraryError {
    fn not_found(title: &str, artist: &str) -> Self {
        Self::NotFound {
            title: title.to_string(),
            artist: artist.to_string(),
        }
    }

    fn duplicate(title: &str, artist: &str) -> Self {
        Self::Duplicate {
            title: title.to_string(),
            artist: artist.to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeleteOutcome {
    pub is_empty: bool,
}

/// Sole owner and writer of `collection.json`.
pub struct CollectionStore {
    path: PathBuf,
    covers: CoverStore,
    #[cfg(test)]
    refuse_saves: std::sync::atomic::AtomicBool,
}

impl CollectionStore {
    pub fn new(data_dir: &Path, covers: CoverStore) -> Self {
        Self {
            path: data_dir.join(COLLECTION_FILE_NAME),
            covers,
            #[cfg(test)]
            refuse_saves: std::sync::atomic::AtomicBool::new(false),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn covers(&self) -> &CoverStore {
        &self.covers
    }

    /// Reads the collection. A missing or corrupt document is replaced by an
    /// empty one; this never fails the caller.
    pub fn load(&self) -> Vec<Album> {
        match self.read_document() {
            Ok(albums) => albums,
            Err(error) => {
                warn!(path = %self.path.display(), %error, "reinitializing collection");
                let albums = Vec::new();
                if let Err(error) = self.save(&albums) {
                    warn!(path = %self.path.display(), %error, "failed to write empty collection");
                }
                albums
            }
        }
    }

    fn read_document(&self) -> Result<Vec<Album>, LibraryError> {
        let text = fs::read_to_string(&self.path)?;
        Ok(serde_json::from_str(&text)?)
    }

    /// Rewrites the whole document through a temp file and rename.
    pub fn save(&self, albums: &[Album]) -> Result<(), LibraryError> {
        #[cfg(test)]
        if self.refuse_saves.load(std::sync::atomic::Ordering::SeqCst) {
            return Err(io::Error::new(io::ErrorKind::PermissionDenied, "save refused").into());
        }
        let text = serde_json::to_string_pretty(albums)?;
        write_atomically(&self.path, text.as_bytes())
    }

    pub async fn add(&self, candidate: &AlbumDraft) -> Result<Album, LibraryError> {
        let draft = candidate.normalized().map_err(LibraryError::Validation)?;
        let key = draft.key();

        let mut albums = self.load();
        if position_of(&albums, &key).is_some() {
            return Err(LibraryError::duplicate(&draft.album_title, &draft.artist_name));
        }

        let cover_path = match self
            .covers
            .resolve_cover(&draft.album_title, &draft.artist_name)
            .await
        {
            Some(path) => path,
            None => self.covers.unknown_cover().to_path_buf(),
        };

        let album = Album {
            album_title: draft.album_title,
            artist_name: draft.artist_name,
            year: draft.year,
            cover_path,
            date_added: Some(Utc::now()),
        };
        albums.push(album.clone());
        sort_collection(&mut albums);

        if let Err(error) = self.save(&albums) {
            self.covers.delete(&album.cover_path);
            return Err(error);
        }
        info!(album = %album.album_title, artist = %album.artist_name, "added album");
        Ok(album)
    }

    pub fn update(
        &self,
        old: &AlbumKey,
        fields: &AlbumDraft,
        new_cover: Option<&[u8]>,
    ) -> Result<Album, LibraryError> {
        let draft = fields.normalized().map_err(LibraryError::Validation)?;

        let mut albums = self.load();
        let index = position_of(&albums, old)
            .ok_or_else(|| LibraryError::not_found(old.title(), old.artist()))?;
        let current = albums[index].clone();

        let new_key = draft.key();
        if new_key != current.key() {
            let collides = albums
                .iter()
                .enumerate()
                .any(|(position, album)| position != index && album.matches(&new_key));
            if collides {
                return Err(LibraryError::duplicate(&draft.album_title, &draft.artist_name));
            }
        }

        let identity_changed = current.album_title != draft.album_title
            || current.artist_name != draft.artist_name;
        let mut cover_path = if identity_changed {
            self.covers
                .relocate(&current.cover_path, &draft.album_title, &draft.artist_name)
        } else {
            current.cover_path.clone()
        };
        let mut undo = CoverUndo {
            original: current.cover_path.clone(),
            moved_to: (cover_path != current.cover_path).then(|| cover_path.clone()),
            created: None,
            replaced: None,
        };

        if let Some(bytes) = new_cover {
            if self.covers.is_unknown(&cover_path) {
                cover_path = self
                    .covers
                    .generate_path(&draft.album_title, &draft.artist_name);
                undo.created = Some(cover_path.clone());
            } else if let Ok(previous) = fs::read(&cover_path) {
                undo.replaced = Some((cover_path.clone(), previous));
            }
            if let Err(error) = self.covers.overwrite(&cover_path, bytes) {
                undo.revert(&self.covers);
                return Err(error.into());
            }
        }

        let reorder =
            current.artist_name != draft.artist_name || current.year != draft.year;
        let updated = Album {
            album_title: draft.album_title,
            artist_name: draft.artist_name,
            year: draft.year,
            cover_path,
            date_added: current.date_added,
        };
        albums[index] = updated.clone();
        if reorder {
            sort_collection(&mut albums);
        }

        if let Err(error) = self.save(&albums) {
            undo.revert(&self.covers);
            return Err(error);
        }
        debug!(album = %updated.album_title, artist = %updated.artist_name, reorder, "updated album");
        Ok(updated)
    }

    pub fn delete(&self, album: &Album) -> Result<DeleteOutcome, LibraryError> {
        let mut albums = self.load();
        let index = position_of(&albums, &album.key())
            .ok_or_else(|| LibraryError::not_found(&album.album_title, &album.artist_name))?;
        let removed = albums.remove(index);

        self.save(&albums)?;
        self.covers.delete(&removed.cover_path);

        info!(album = %removed.album_title, artist = %removed.artist_name, "deleted album");
        Ok(DeleteOutcome {
            is_empty: albums.is_empty(),
        })
    }
}

/// Cover file changes made by an update that has not been saved yet.
struct CoverUndo {
    original: PathBuf,
    moved_to: Option<PathBuf>,
    created: Option<PathBuf>,
    replaced: Option<(PathBuf, Vec<u8>)>,
}

impl CoverUndo {
    /// Puts the cover files back the way the stored document expects them.
    fn revert(self, covers: &CoverStore) {
        if let Some(created) = &self.created {
            covers.delete(created);
        }
        if let Some((path, previous)) = &self.replaced {
            if let Err(error) = fs::write(path, previous) {
                warn!(path = %path.display(), %error, "failed to restore cover contents");
            }
        }
        if let Some(moved_to) = &self.moved_to {
            if let Err(error) = fs::rename(moved_to, &self.original) {
                warn!(
                    from = %moved_to.display(),
                    to = %self.original.display(),
                    %error,
                    "failed to move cover back"
                );
            }
        }
    }
}

/// Replaces `path` with `bytes` so readers only ever see the old or the new
/// contents.
pub(crate) fn write_atomically(path: &Path, bytes: &[u8]) -> Result<(), LibraryError> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    fs::create_dir_all(dir)?;

    let mut file = NamedTempFile::new_in(dir)?;
    file.write_all(bytes)?;
    file.as_file().sync_all()?;
    file.persist(path).map_err(|error| error.error)?;
    Ok(())
}
