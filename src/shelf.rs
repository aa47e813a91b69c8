//! The collection as the user sees it: a sorted, optionally filtered view
//! with a focused album, kept in sync with the store through change events.

use std::fs;
use std::sync::{Arc, Mutex};

use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::carousel::{lock, Carousel, ShuffleError, Shuffler, SlotPosition};
use crate::config::AppConfig;
use crate::events::{CollectionEvent, CollectionEvents};
use crate::host::{HostShell, ModalOutcome, ModalRequest};
use crate::library::{
    validate_cover_upload, Album, AlbumDraft, AlbumKey, CollectionStore, CoverStore,
    DeleteOutcome, LibraryError, SortOptions, SortOptionsStore,
};
use crate::musicbrainz::CoverLookup;
use crate::search::SearchQuery;
use crate::stats::{CollectionStats, StatsCache};
use crate::theme::{theme_for_cover, ColorConfig, ThemeColors};

/// What a dialog flow ended with.
#[derive(Debug, Clone, PartialEq)]
pub enum DialogResult {
    Cancelled,
    Added(Album),
    Updated(Album),
    Deleted { is_empty: bool },
}

struct ActiveSearch {
    query: SearchQuery,
    text: String,
    anchor: Option<AlbumKey>,
}

#[derive(Default)]
struct ViewState {
    sort: SortOptions,
    search: Option<ActiveSearch>,
}

struct ShelfInner {
    store: CollectionStore,
    sort_store: SortOptionsStore,
    view: Mutex<ViewState>,
    carousel: Mutex<Carousel>,
    stats: Mutex<StatsCache>,
    events: CollectionEvents,
    shuffler: Shuffler,
    colors: ColorConfig,
}

#[derive(Clone)]
pub struct Shelf {
    inner: Arc<ShelfInner>,
}

impl Shelf {
    /// Prepares the data directory, provisions the unknown cover and loads
    /// the first view with a random album in focus.
    pub fn open(
        config: &AppConfig,
        lookup: Option<Arc<dyn CoverLookup>>,
    ) -> Result<Self, LibraryError> {
        Self::open_with_events(config, lookup, CollectionEvents::new())
    }

    /// Like [`Shelf::open`], publishing on an existing channel so several
    /// views can follow one collection.
    pub fn open_with_events(
        config: &AppConfig,
        lookup: Option<Arc<dyn CoverLookup>>,
        events: CollectionEvents,
    ) -> Result<Self, LibraryError> {
        fs::create_dir_all(&config.data_dir)?;
        let lookup = if config.cover_lookup { lookup } else { None };
        let covers = CoverStore::new(
            config.covers_dir.clone(),
            config.unknown_cover.clone(),
            lookup,
            config.lookup_timeout,
        )?;
        covers.ensure_unknown_cover()?;

        let sort_store = SortOptionsStore::new(&config.data_dir);
        let view = ViewState {
            sort: sort_store.load(),
            search: None,
        };

        let shelf = Self {
            inner: Arc::new(ShelfInner {
                store: CollectionStore::new(&config.data_dir, covers),
                sort_store,
                view: Mutex::new(view),
                carousel: Mutex::new(Carousel::new()),
                stats: Mutex::new(StatsCache::new()),
                events,
                shuffler: Shuffler::new(config.shuffle.clone()),
                colors: config.colors.clone(),
            }),
        };
        shelf.refresh(None);
        info!(
            data_dir = %config.data_dir.display(),
            albums = shelf.len(),
            "opened collection"
        );
        Ok(shelf)
    }

    pub fn store(&self) -> &CollectionStore {
        &self.inner.store
    }

    pub fn events(&self) -> &CollectionEvents {
        &self.inner.events
    }

    /// The visible list, in view order.
    pub fn albums(&self) -> Vec<Album> {
        lock(&self.inner.carousel).albums().to_vec()
    }

    pub fn len(&self) -> usize {
        lock(&self.inner.carousel).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn focused(&self) -> Option<Album> {
        lock(&self.inner.carousel).focused_album().cloned()
    }

    pub fn focused_index(&self) -> Option<usize> {
        lock(&self.inner.carousel).focused_index()
    }

    fn focused_key(&self) -> Option<AlbumKey> {
        lock(&self.inner.carousel).focused_album().map(Album::key)
    }

    pub fn visible(&self) -> Vec<(SlotPosition, Album)> {
        lock(&self.inner.carousel)
            .slots()
            .into_iter()
            .map(|slot| (slot.position, slot.album.clone()))
            .collect()
    }

    pub fn step_by(&self, delta: isize) {
        lock(&self.inner.carousel).step_by(delta);
    }

    pub fn focus(&self, key: &AlbumKey) -> bool {
        lock(&self.inner.carousel).focus(key)
    }

    pub fn theme_for(&self, album: &Album) -> ThemeColors {
        theme_for_cover(&album.cover_path, &self.inner.colors)
    }

    /// Theme of the focused album, or the neutral theme when nothing is
    /// focused.
    pub fn theme(&self) -> ThemeColors {
        self.focused()
            .map(|album| self.theme_for(&album))
            .unwrap_or_default()
    }

    pub fn sort_options(&self) -> SortOptions {
        lock(&self.inner.view).sort
    }

    /// Persists and applies a new sort. Focus follows the previously focused
    /// album, or lands on a random one when it is not in view.
    pub fn set_sort(&self, options: SortOptions) -> Result<(), LibraryError> {
        self.inner.sort_store.save(&options)?;
        lock(&self.inner.view).sort = options;

        let anchor = self.focused_key();
        let albums = self.derive_view();
        let mut carousel = lock(&self.inner.carousel);
        carousel.set_albums(albums, anchor.as_ref());
        let kept = match (&anchor, carousel.focused_album()) {
            (Some(key), Some(album)) => album.matches(key),
            _ => false,
        };
        if !kept {
            carousel.focus_random(&mut rand::thread_rng());
        }
        debug!(?options, "sort changed");
        Ok(())
    }

    pub fn active_search(&self) -> Option<String> {
        lock(&self.inner.view)
            .search
            .as_ref()
            .map(|search| search.text.clone())
    }

    /// Filters the view. The album focused before the first search is
    /// remembered for [`Shelf::clear_search`]. Returns the number of hits.
    pub fn search(&self, text: &str) -> usize {
        if text.trim().is_empty() {
            self.clear_search();
            return self.len();
        }

        let current = self.focused_key();
        {
            let mut view = lock(&self.inner.view);
            let anchor = match view.search.take() {
                Some(previous) => previous.anchor,
                None => current.clone(),
            };
            view.search = Some(ActiveSearch {
                query: SearchQuery::parse(text),
                text: text.to_string(),
                anchor,
            });
        }

        self.refresh(current.as_ref());
        let hits = self.len();
        debug!(query = text, hits, "search applied");
        hits
    }

    pub fn clear_search(&self) {
        let saved = lock(&self.inner.view).search.take();
        let Some(saved) = saved else {
            return;
        };
        let anchor = saved.anchor.or_else(|| self.focused_key());
        self.refresh(anchor.as_ref());
    }

    pub async fn add(&self, draft: &AlbumDraft) -> Result<Album, LibraryError> {
        let album = self.inner.store.add(draft).await?;
        self.publish(CollectionEvent::Added(album.clone()));
        Ok(album)
    }

    /// Edits `album`. Replacement cover bytes are validated before anything
    /// is written.
    pub fn update(
        &self,
        album: &Album,
        draft: &AlbumDraft,
        cover: Option<&[u8]>,
    ) -> Result<Album, LibraryError> {
        if let Some(bytes) = cover {
            validate_cover_upload(bytes).map_err(LibraryError::Validation)?;
        }
        let updated = self.inner.store.update(&album.key(), draft, cover)?;
        self.publish(CollectionEvent::Updated {
            previous: album.key(),
            album: updated.clone(),
        });
        Ok(updated)
    }

    pub fn delete(&self, album: &Album) -> Result<DeleteOutcome, LibraryError> {
        let outcome = self.inner.store.delete(album)?;
        self.publish(CollectionEvent::Deleted);
        Ok(outcome)
    }

    pub fn stats(&self) -> CollectionStats {
        lock(&self.inner.stats)
            .get_with(|| self.inner.store.load())
            .clone()
    }

    pub fn is_shuffling(&self) -> bool {
        self.inner.shuffler.is_busy()
    }

    pub async fn shuffle(&self) -> Result<Option<Album>, ShuffleError> {
        self.inner.shuffler.run(&self.inner.carousel).await
    }

    /// Drops cached state and rebuilds the view from the store. The album
    /// this view had in focus stays focused; it is followed to its new
    /// identity when the event edited it.
    pub fn handle_event(&self, event: &CollectionEvent) {
        self.apply_change(event, None);
    }

    fn apply_change(&self, event: &CollectionEvent, preferred: Option<AlbumKey>) {
        lock(&self.inner.stats).invalidate();
        let anchor = preferred.or_else(|| event.anchor_for(self.focused_key()));
        self.refresh(anchor.as_ref());
    }

    /// Follows changes published by other views on the same channel.
    pub fn spawn_listener(&self) -> JoinHandle<()> {
        let shelf = self.clone();
        let mut receiver = self.inner.events.subscribe();
        tokio::spawn(async move {
            loop {
                match receiver.recv().await {
                    Ok(event) => shelf.handle_event(&event),
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, "missed collection events, refreshing");
                        shelf.handle_event(&CollectionEvent::Deleted);
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        })
    }

    pub async fn add_via_dialog(
        &self,
        host: &dyn HostShell,
    ) -> Result<DialogResult, LibraryError> {
        let request = ModalRequest::Add {
            theme: self.theme(),
        };
        match host.open_modal(request).await {
            ModalOutcome::Add(draft) => {
                let album = self.reported(host, self.add(&draft).await).await?;
                Ok(DialogResult::Added(album))
            }
            _ => Ok(DialogResult::Cancelled),
        }
    }

    /// Focus dialog for `album`, continuing into the edit dialog on request.
    pub async fn focus_via_dialog(
        &self,
        host: &dyn HostShell,
        album: Album,
    ) -> Result<DialogResult, LibraryError> {
        let theme = self.theme_for(&album);
        let outcome = host
            .open_modal(ModalRequest::Focus {
                album: album.clone(),
                theme,
            })
            .await;

        let outcome = match outcome {
            ModalOutcome::Edit => {
                host.open_modal(ModalRequest::Edit {
                    album: album.clone(),
                    theme,
                })
                .await
            }
            other => other,
        };

        match outcome {
            ModalOutcome::Save { draft, cover } => {
                let updated = self.update(&album, &draft, cover.as_deref());
                let updated = self.reported(host, updated).await?;
                Ok(DialogResult::Updated(updated))
            }
            ModalOutcome::Delete => {
                let outcome = self.reported(host, self.delete(&album)).await?;
                Ok(DialogResult::Deleted {
                    is_empty: outcome.is_empty,
                })
            }
            _ => Ok(DialogResult::Cancelled),
        }
    }

    /// Spins the carousel, then opens the focus dialog on the album it
    /// stopped at.
    pub async fn shuffle_via_dialog(
        &self,
        host: &dyn HostShell,
    ) -> Result<DialogResult, LibraryError> {
        match self.shuffle().await {
            Ok(Some(album)) => self.focus_via_dialog(host, album).await,
            Ok(None) => Ok(DialogResult::Cancelled),
            Err(error) => {
                debug!(%error, "shuffle ignored");
                Ok(DialogResult::Cancelled)
            }
        }
    }

    async fn reported<T>(
        &self,
        host: &dyn HostShell,
        result: Result<T, LibraryError>,
    ) -> Result<T, LibraryError> {
        if let Err(error) = &result {
            host.alert(&error.to_string()).await;
        }
        result
    }

    /// Applies a local change, focusing an album this view just added, then
    /// tells the other views.
    fn publish(&self, event: CollectionEvent) {
        let preferred = match &event {
            CollectionEvent::Added(album) => Some(album.key()),
            _ => None,
        };
        self.apply_change(&event, preferred);
        self.inner.events.notify_changed(event);
    }

    fn refresh(&self, anchor: Option<&AlbumKey>) {
        let albums = self.derive_view();
        lock(&self.inner.carousel).set_albums(albums, anchor);
    }

    fn derive_view(&self) -> Vec<Album> {
        let mut albums = self.inner.store.load();
        let view = lock(&self.inner.view);
        view.sort.apply(&mut albums);
        match &view.search {
            Some(search) => search.query.filter(&albums),
            None => albums,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::library::{png_bytes, test_album, SortMethod, SortOrder};
    use tempfile::TempDir;

    fn open(dir: &TempDir, albums: &[Album]) -> Shelf {
        let config = AppConfig::for_data_dir(dir.path());
        let covers = CoverStore::new(
            config.covers_dir.clone(),
            config.unknown_cover.clone(),
            None,
            config.lookup_timeout,
        )
        .unwrap();
        CollectionStore::new(dir.path(), covers).save(albums).unwrap();
        Shelf::open(&config, None).unwrap()
    }

    fn beatles() -> Vec<Album> {
        vec![
            test_album("Help!", "The Beatles", "1965"),
            test_album("Revolver", "The Beatles", "1966"),
            test_album("Abbey Road", "The Beatles", "1969"),
            test_album("Blue", "Joni Mitchell", "1971"),
        ]
    }

    #[test]
    fn open_provisions_unknown_cover() {
        let dir = TempDir::new().unwrap();
        let shelf = open(&dir, &[]);
        assert!(shelf.store().covers().unknown_cover().exists());
        assert!(shelf.is_empty());
        assert_eq!(shelf.focused(), None);
    }

    #[test]
    fn search_then_clear_restores_focus() {
        let dir = TempDir::new().unwrap();
        let shelf = open(&dir, &beatles());
        shelf.focus(&AlbumKey::new("Blue", "Joni Mitchell"));

        assert_eq!(shelf.search("beatles year>=1966"), 2);
        assert_eq!(shelf.active_search().as_deref(), Some("beatles year>=1966"));
        shelf.clear_search();

        assert_eq!(shelf.len(), 4);
        assert_eq!(shelf.focused().unwrap().album_title, "Blue");
        assert_eq!(shelf.active_search(), None);
    }

    #[test]
    fn update_refocuses_by_identity_after_resort() {
        let dir = TempDir::new().unwrap();
        let shelf = open(&dir, &beatles());
        let help = test_album("Help!", "The Beatles", "1965");
        shelf.focus(&help.key());

        shelf
            .update(&help, &AlbumDraft::new("Help!", "The Beatles", "1970"), None)
            .unwrap();

        assert_eq!(shelf.focused_index(), Some(2));
        assert_eq!(shelf.focused().unwrap().year, "1970");
    }

    #[test]
    fn update_rejects_oversized_cover_without_side_effects() {
        let dir = TempDir::new().unwrap();
        let shelf = open(&dir, &beatles());
        let before = fs::read(shelf.store().path()).unwrap();

        let huge = png_bytes(1200, 10, [1, 2, 3, 255]);
        let result = shelf.update(
            &test_album("Help!", "The Beatles", "1965"),
            &AlbumDraft::new("Help!", "The Beatles", "1965"),
            Some(&huge),
        );

        assert!(matches!(result, Err(LibraryError::Validation(_))));
        assert_eq!(fs::read(shelf.store().path()).unwrap(), before);
    }

    #[test]
    fn deleting_the_focused_album_clamps_focus() {
        let dir = TempDir::new().unwrap();
        let shelf = open(&dir, &beatles());
        let blue = test_album("Blue", "Joni Mitchell", "1971");
        shelf.focus(&blue.key());

        let outcome = shelf.delete(&blue).unwrap();
        assert!(!outcome.is_empty);
        assert_eq!(shelf.focused_index(), Some(2));
    }

    #[test]
    fn sort_change_keeps_focus_and_persists() {
        let dir = TempDir::new().unwrap();
        let shelf = open(&dir, &beatles());
        shelf.focus(&AlbumKey::new("Help!", "The Beatles"));

        let options = SortOptions::new(SortMethod::Year, SortOrder::Descending);
        shelf.set_sort(options).unwrap();

        assert_eq!(shelf.focused_index(), Some(3));
        assert_eq!(shelf.albums()[0].album_title, "Blue");
        assert_eq!(SortOptionsStore::new(dir.path()).load(), options);
    }

    #[tokio::test]
    async fn stats_follow_mutations() {
        let dir = TempDir::new().unwrap();
        let shelf = open(&dir, &beatles());
        assert_eq!(shelf.stats().size, 4);

        shelf
            .add(&AlbumDraft::new("Let It Be", "The Beatles", "1970"))
            .await
            .unwrap();
        let stats = shelf.stats();
        assert_eq!(stats.size, 5);
        assert_eq!(stats.top_artist.as_deref(), Some("The Beatles"));
        assert_eq!(shelf.focused().unwrap().album_title, "Let It Be");
    }
}
