//! Cover image cache: filenames, downloads, renames and the shared
//! "unknown cover" fallback.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use image::imageops::FilterType;
use image::{ImageFormat, Rgba, RgbaImage};
use rand::Rng;
use reqwest::Client;
use thiserror::Error;
use tracing::{debug, warn};

use crate::musicbrainz::CoverLookup;

pub const MAX_COVER_DIMENSION: u32 = 1000;
pub const MAX_COVER_BYTES: usize = 5 * 1024 * 1024;

const UNKNOWN_COVER_SIZE: u32 = 300;
const UNKNOWN_COVER_FILL: [u8; 4] = [0xcf, 0xcf, 0xcf, 0xff];
const DISAMBIGUATOR_RANGE: u32 = 1_000_000;

#[derive(Debug, Error)]
pub enum CoverError {
    #[error("cover fetch failed: {0}")]
    Fetch(String),
    #[error("invalid cover url: {0}")]
    InvalidUrl(String),
    #[error("filesystem error: {0}")]
    Io(#[from] io::Error),
    #[error("image error: {0}")]
    Image(#[from] image::ImageError),
}

#[derive(Clone)]
pub struct CoverStore {
    dir: PathBuf,
    unknown_cover: PathBuf,
    client: Client,
    lookup: Option<Arc<dyn CoverLookup>>,
}

impl CoverStore {
    pub fn new(
        dir: PathBuf,
        unknown_cover: PathBuf,
        lookup: Option<Arc<dyn CoverLookup>>,
        timeout: Duration,
    ) -> Result<Self, CoverError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|error| CoverError::Fetch(format!("failed to build http client: {error}")))?;

        Ok(Self {
            dir,
            unknown_cover,
            client,
            lookup,
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn unknown_cover(&self) -> &Path {
        &self.unknown_cover
    }

    pub fn is_unknown(&self, path: &Path) -> bool {
        path == self.unknown_cover
    }

    /// Writes the flat gray fallback image if it is not on disk yet.
    pub fn ensure_unknown_cover(&self) -> Result<(), CoverError> {
        if self.unknown_cover.exists() {
            return Ok(());
        }
        if let Some(parent) = self.unknown_cover.parent() {
            fs::create_dir_all(parent)?;
        }
        let image = RgbaImage::from_pixel(
            UNKNOWN_COVER_SIZE,
            UNKNOWN_COVER_SIZE,
            Rgba(UNKNOWN_COVER_FILL),
        );
        image.save_with_format(&self.unknown_cover, ImageFormat::Png)?;
        debug!(path = %self.unknown_cover.display(), "created unknown cover");
        Ok(())
    }

    /// Looks the album up and caches its cover. Every failure is reported as
    /// `None`; a missing cover never blocks the caller.
    pub async fn resolve_cover(&self, album_title: &str, artist_name: &str) -> Option<PathBuf> {
        let lookup = self.lookup.as_ref()?;
        if album_title.trim().is_empty() || artist_name.trim().is_empty() {
            return None;
        }

        let Some(source_url) = lookup.lookup(artist_name, album_title).await else {
            debug!(album = album_title, artist = artist_name, "no cover found");
            return None;
        };

        match self
            .save_fetched_cover(album_title, artist_name, &source_url)
            .await
        {
            Ok(path) => Some(path),
            Err(error) => {
                warn!(
                    album = album_title,
                    artist = artist_name,
                    %error,
                    "failed to cache cover"
                );
                None
            }
        }
    }

    pub async fn save_fetched_cover(
        &self,
        album_title: &str,
        artist_name: &str,
        source_url: &str,
    ) -> Result<PathBuf, CoverError> {
        let parsed = url::Url::parse(source_url)
            .map_err(|error| CoverError::InvalidUrl(format!("{source_url}: {error}")))?;
        match parsed.scheme() {
            "http" | "https" => {}
            scheme => {
                return Err(CoverError::InvalidUrl(format!(
                    "unsupported scheme '{scheme}'"
                )))
            }
        }

        let response = self
            .client
            .get(parsed)
            .send()
            .await
            .map_err(|error| CoverError::Fetch(format!("request failed: {error}")))?;
        if !response.status().is_success() {
            return Err(CoverError::Fetch(format!(
                "cover returned status {}",
                response.status()
            )));
        }
        let bytes = response
            .bytes()
            .await
            .map_err(|error| CoverError::Fetch(format!("failed to read cover body: {error}")))?;

        self.save_cover_image(album_title, artist_name, &bytes)
    }

    /// Stores artwork in any supported format as a PNG at a fresh path,
    /// scaled down to fit the cover size limit.
    pub fn save_cover_image(
        &self,
        album_title: &str,
        artist_name: &str,
        bytes: &[u8],
    ) -> Result<PathBuf, CoverError> {
        let png = encode_as_png(bytes)?;
        fs::create_dir_all(&self.dir)?;
        let path = self.generate_path(album_title, artist_name);
        fs::write(&path, &png)?;
        debug!(path = %path.display(), bytes = png.len(), "saved cover");
        Ok(path)
    }

    /// Moves a cover to a path derived from the new title and artist. A
    /// failed rename keeps the old path so the cover is never lost.
    pub fn relocate(&self, old_path: &Path, album_title: &str, artist_name: &str) -> PathBuf {
        if self.is_unknown(old_path) {
            return old_path.to_path_buf();
        }

        let new_path = self.generate_path(album_title, artist_name);
        if let Err(error) = fs::create_dir_all(&self.dir) {
            warn!(%error, "failed to create cover directory, keeping old cover path");
            return old_path.to_path_buf();
        }
        match fs::rename(old_path, &new_path) {
            Ok(()) => new_path,
            Err(error) => {
                warn!(
                    from = %old_path.display(),
                    to = %new_path.display(),
                    %error,
                    "failed to rename cover, keeping old path"
                );
                old_path.to_path_buf()
            }
        }
    }

    pub fn overwrite(&self, path: &Path, bytes: &[u8]) -> Result<(), CoverError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, bytes)?;
        Ok(())
    }

    pub fn delete(&self, path: &Path) {
        if self.is_unknown(path) || !path.exists() {
            return;
        }
        if let Err(error) = fs::remove_file(path) {
            warn!(path = %path.display(), %error, "failed to delete cover");
        }
    }

    /// `<covers>/<artist>_<title>_<n>.png` with both names reduced to
    /// lowercase ASCII alphanumerics and underscores.
    pub fn generate_path(&self, album_title: &str, artist_name: &str) -> PathBuf {
        let artist = sanitize(artist_name);
        let title = sanitize(album_title);
        let mut rng = rand::thread_rng();
        loop {
            let id = rng.gen_range(0..DISAMBIGUATOR_RANGE);
            let candidate = self.dir.join(format!("{artist}_{title}_{id}.png"));
            if !candidate.exists() {
                return candidate;
            }
        }
    }
}

fn sanitize(value: &str) -> String {
    value
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_lowercase()
            } else {
                '_'
            }
        })
        .collect()
}

fn encode_as_png(bytes: &[u8]) -> Result<Vec<u8>, CoverError> {
    let mut decoded = image::load_from_memory(bytes)?;
    if decoded.width() > MAX_COVER_DIMENSION || decoded.height() > MAX_COVER_DIMENSION {
        decoded = decoded.resize(MAX_COVER_DIMENSION, MAX_COVER_DIMENSION, FilterType::Triangle);
    }
    let mut out = io::Cursor::new(Vec::new());
    decoded.write_to(&mut out, ImageFormat::Png)?;
    Ok(out.into_inner())
}

/// Checks a user-supplied replacement cover: PNG, at most 5 MB and at most
/// 1000x1000 pixels. Returns the image dimensions.
pub fn validate_cover_upload(bytes: &[u8]) -> Result<(u32, u32), String> {
    if bytes.len() > MAX_COVER_BYTES {
        return Err(format!(
            "cover is too large, the maximum size is {MAX_COVER_BYTES} bytes"
        ));
    }
    match image::guess_format(bytes) {
        Ok(ImageFormat::Png) => {}
        _ => return Err("cover must be a PNG image".to_string()),
    }
    let decoded = image::load_from_memory_with_format(bytes, ImageFormat::Png)
        .map_err(|error| format!("cover could not be decoded: {error}"))?;
    let (width, height) = (decoded.width(), decoded.height());
    if width > MAX_COVER_DIMENSION || height > MAX_COVER_DIMENSION {
        return Err(format!(
            "cover has a max size of {MAX_COVER_DIMENSION}x{MAX_COVER_DIMENSION}"
        ));
    }
    Ok((width, height))
}

#[cfg(test)]
pub(crate) fn png_bytes(width: u32, height: u32, fill: [u8; 4]) -> Vec<u8> {
    let image = RgbaImage::from_pixel(width, height, Rgba(fill));
    let mut out = io::Cursor::new(Vec::new());
    image
        .write_to(&mut out, ImageFormat::Png)
        .expect("encode png");
    out.into_inner()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::theme::{theme_for_cover, Color, ColorConfig};
    use async_trait::async_trait;
    use image::RgbImage;
    use tempfile::TempDir;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    fn jpeg_bytes(width: u32, height: u32, fill: [u8; 3]) -> Vec<u8> {
        let image = RgbImage::from_pixel(width, height, image::Rgb(fill));
        let mut out = io::Cursor::new(Vec::new());
        image.write_to(&mut out, ImageFormat::Jpeg).unwrap();
        out.into_inner()
    }

    /// Serves `body` once as an HTTP/1.1 response and returns the base URL.
    async fn serve_once(body: Vec<u8>) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut request = Vec::new();
            let mut chunk = [0u8; 1024];
            while !request.windows(4).any(|w| w == b"\r\n\r\n") {
                let read = socket.read(&mut chunk).await.unwrap();
                if read == 0 {
                    break;
                }
                request.extend_from_slice(&chunk[..read]);
            }
            let head = format!(
                "HTTP/1.1 200 OK\r\ncontent-type: image/jpeg\r\ncontent-length: {}\r\nconnection: close\r\n\r\n",
                body.len()
            );
            socket.write_all(head.as_bytes()).await.unwrap();
            socket.write_all(&body).await.unwrap();
            socket.shutdown().await.unwrap();
        });
        format!("http://{addr}")
    }

    struct FixedLookup(Option<String>);

    #[async_trait]
    impl CoverLookup for FixedLookup {
        async fn lookup(&self, _artist: &str, _album: &str) -> Option<String> {
            self.0.clone()
        }
    }

    fn store(dir: &TempDir, lookup: Option<Arc<dyn CoverLookup>>) -> CoverStore {
        CoverStore::new(
            dir.path().join("covers"),
            dir.path().join("unknown.png"),
            lookup,
            Duration::from_secs(2),
        )
        .unwrap()
    }

    #[test]
    fn generated_paths_are_sanitized_pngs() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir, None);
        let path = store.generate_path("Sgt. Pepper's", "The Beatles");
        let name = path.file_name().unwrap().to_string_lossy().to_string();

        assert!(path.starts_with(dir.path().join("covers")));
        assert!(name.starts_with("the_beatles_sgt__pepper_s_"));
        assert!(name.ends_with(".png"));
    }

    #[test]
    fn relocate_moves_the_file() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir, None);
        let old = store.generate_path("Help", "Beatles");
        store.overwrite(&old, b"cover").unwrap();

        let new = store.relocate(&old, "Help!", "The Beatles");
        assert_ne!(new, old);
        assert!(!old.exists());
        assert_eq!(fs::read(&new).unwrap(), b"cover");
    }

    #[test]
    fn relocate_keeps_old_path_when_rename_fails() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir, None);
        let missing = dir.path().join("covers").join("gone.png");
        assert_eq!(store.relocate(&missing, "Help!", "The Beatles"), missing);
    }

    #[test]
    fn unknown_cover_is_never_moved_or_deleted() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir, None);
        store.ensure_unknown_cover().unwrap();
        let unknown = store.unknown_cover().to_path_buf();

        assert_eq!(store.relocate(&unknown, "Help!", "The Beatles"), unknown);
        store.delete(&unknown);
        assert!(unknown.exists());
    }

    #[test]
    fn delete_removes_real_covers_and_ignores_missing_ones() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir, None);
        let path = store.generate_path("Blue", "Joni Mitchell");
        store.overwrite(&path, b"png").unwrap();

        store.delete(&path);
        assert!(!path.exists());
        store.delete(&path);
    }

    #[test]
    fn upload_validation_enforces_format_and_dimensions() {
        assert_eq!(
            validate_cover_upload(&png_bytes(20, 10, [1, 2, 3, 255])),
            Ok((20, 10))
        );
        assert!(validate_cover_upload(&png_bytes(1001, 4, [0, 0, 0, 255])).is_err());
        assert!(validate_cover_upload(b"GIF89a not a png").is_err());
        assert!(validate_cover_upload(&vec![0u8; MAX_COVER_BYTES + 1]).is_err());
    }

    #[tokio::test]
    async fn resolve_cover_without_lookup_result_is_none() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir, Some(Arc::new(FixedLookup(None))));
        assert_eq!(store.resolve_cover("Help!", "The Beatles").await, None);

        let disabled = self::store(&dir, None);
        assert_eq!(disabled.resolve_cover("Help!", "The Beatles").await, None);
    }

    #[test]
    fn fetched_jpeg_is_stored_as_a_bounded_png() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir, None);
        let path = store
            .save_cover_image("Abbey Road", "The Beatles", &jpeg_bytes(1200, 600, [200, 30, 40]))
            .unwrap();

        assert!(path.starts_with(store.dir()));
        let bytes = fs::read(&path).unwrap();
        assert_eq!(image::guess_format(&bytes).unwrap(), ImageFormat::Png);
        let decoded = image::load_from_memory(&bytes).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (1000, 500));

        let accent = theme_for_cover(&path, &ColorConfig::default()).accent;
        assert_ne!(accent, Color::NEUTRAL_GRAY);
        assert!(accent.r > accent.g && accent.r > accent.b);
    }

    #[test]
    fn undecodable_artwork_is_not_stored() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir, None);
        let result = store.save_cover_image("Help!", "The Beatles", b"<html>not found</html>");
        assert!(matches!(result, Err(CoverError::Image(_))));
        assert!(!store.dir().exists() || fs::read_dir(store.dir()).unwrap().next().is_none());
    }

    #[tokio::test]
    async fn save_fetched_cover_downloads_into_the_cover_dir() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir, None);
        let base = serve_once(jpeg_bytes(40, 40, [20, 60, 200])).await;

        let path = store
            .save_fetched_cover("Blue", "Joni Mitchell", &format!("{base}/release/x/front-500"))
            .await
            .unwrap();

        assert!(path.starts_with(dir.path().join("covers")));
        let name = path.file_name().unwrap().to_string_lossy().to_string();
        assert!(name.starts_with("joni_mitchell_blue_"));
        assert!(name.ends_with(".png"));
        let bytes = fs::read(&path).unwrap();
        assert_eq!(image::guess_format(&bytes).unwrap(), ImageFormat::Png);
    }

    #[tokio::test]
    async fn resolve_cover_swallows_bad_urls() {
        let dir = TempDir::new().unwrap();
        let lookup = FixedLookup(Some("ftp://example.com/cover.png".to_string()));
        let store = store(&dir, Some(Arc::new(lookup)));
        assert_eq!(store.resolve_cover("Help!", "The Beatles").await, None);
        assert!(matches!(
            store
                .save_fetched_cover("Help!", "The Beatles", "not a url")
                .await,
            Err(CoverError::InvalidUrl(_))
        ));
    }
}
