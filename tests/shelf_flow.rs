use std::collections::VecDeque;
use std::fs;
use std::io::Cursor;
use std::sync::{Arc, Mutex};

use album_shelf_lib::{
    Album, AlbumDraft, AlbumKey, AppConfig, CollectionEvents, CoverLookup, DialogResult, HostShell, LibraryError,
    ModalOutcome, ModalRequest, Shelf, ShuffleConfig,
};
use async_trait::async_trait;
use image::{ImageFormat, Rgba, RgbaImage};
use tempfile::TempDir;

#[derive(Default)]
struct ScriptedHost {
    outcomes: Mutex<VecDeque<ModalOutcome>>,
    requests: Mutex<Vec<ModalRequest>>,
    alerts: Mutex<Vec<String>>,
}

impl ScriptedHost {
    fn answering(outcomes: Vec<ModalOutcome>) -> Self {
        Self {
            outcomes: Mutex::new(outcomes.into()),
            ..Self::default()
        }
    }

    fn requests(&self) -> Vec<ModalRequest> {
        self.requests.lock().unwrap().clone()
    }

    fn alerts(&self) -> Vec<String> {
        self.alerts.lock().unwrap().clone()
    }
}

#[async_trait]
impl HostShell for ScriptedHost {
    async fn open_modal(&self, request: ModalRequest) -> ModalOutcome {
        self.requests.lock().unwrap().push(request);
        self.outcomes
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(ModalOutcome::Cancelled)
    }

    async fn alert(&self, message: &str) {
        self.alerts.lock().unwrap().push(message.to_string());
    }
}

/// Answers every lookup with a URL the cover store refuses to fetch.
struct UnfetchableLookup;

#[async_trait]
impl CoverLookup for UnfetchableLookup {
    async fn lookup(&self, _artist: &str, _album: &str) -> Option<String> {
        Some("file:///covers/abbey_road.png".to_string())
    }
}

fn config(dir: &TempDir) -> AppConfig {
    let mut config = AppConfig::for_data_dir(dir.path());
    config.shuffle = ShuffleConfig {
        warm_up_ms: 100,
        final_pause_ms: 10,
        ..ShuffleConfig::default()
    };
    config
}

fn png(width: u32, height: u32) -> Vec<u8> {
    let image = RgbaImage::from_pixel(width, height, Rgba([200, 30, 40, 255]));
    let mut out = Cursor::new(Vec::new());
    image.write_to(&mut out, ImageFormat::Png).unwrap();
    out.into_inner()
}

#[tokio::test]
async fn add_dialog_adds_and_reports_duplicates() {
    let dir = TempDir::new().unwrap();
    let lookup: Arc<dyn CoverLookup> = Arc::new(UnfetchableLookup);
    let shelf = Shelf::open(&config(&dir), Some(lookup)).unwrap();
    let draft = AlbumDraft::new("Abbey Road", "The Beatles", "1969");

    let host = ScriptedHost::answering(vec![ModalOutcome::Add(draft.clone())]);
    let result = shelf.add_via_dialog(&host).await.unwrap();
    let album = match result {
        DialogResult::Added(album) => album,
        other => panic!("expected an added album, got {other:?}"),
    };
    assert_eq!(album.cover_path, shelf.store().covers().unknown_cover());
    assert_eq!(shelf.focused(), Some(album));
    assert!(matches!(host.requests()[0], ModalRequest::Add { .. }));

    let host = ScriptedHost::answering(vec![ModalOutcome::Add(AlbumDraft::new(
        "ABBEY ROAD",
        "the beatles",
        "",
    ))]);
    let result = shelf.add_via_dialog(&host).await;
    assert!(matches!(result, Err(LibraryError::Duplicate { .. })));
    assert_eq!(host.alerts().len(), 1);
    assert_eq!(shelf.store().load().len(), 1);
}

#[tokio::test]
async fn edit_dialog_writes_uploaded_cover_beside_the_sentinel() {
    let dir = TempDir::new().unwrap();
    let shelf = Shelf::open(&config(&dir), None).unwrap();
    let album = shelf
        .add(&AlbumDraft::new("Blue", "Joni Mitchell", "1971"))
        .await
        .unwrap();
    let unknown = shelf.store().covers().unknown_cover().to_path_buf();
    let sentinel = fs::read(&unknown).unwrap();

    let cover = png(40, 40);
    let host = ScriptedHost::answering(vec![
        ModalOutcome::Edit,
        ModalOutcome::Save {
            draft: AlbumDraft::new("Blue", "Joni Mitchell", "1971"),
            cover: Some(cover.clone()),
        },
    ]);
    let result = shelf.focus_via_dialog(&host, album).await.unwrap();
    let updated = match result {
        DialogResult::Updated(updated) => updated,
        other => panic!("expected an update, got {other:?}"),
    };

    assert_ne!(updated.cover_path, unknown);
    assert_eq!(fs::read(&updated.cover_path).unwrap(), cover);
    assert_eq!(fs::read(&unknown).unwrap(), sentinel);

    let requests = host.requests();
    assert!(matches!(requests[0], ModalRequest::Focus { .. }));
    assert!(matches!(requests[1], ModalRequest::Edit { .. }));

    let accent = shelf.theme().accent;
    assert_eq!(accent.to_string(), "#c00020");
}

#[tokio::test]
async fn delete_from_focus_dialog_keeps_the_sentinel() {
    let dir = TempDir::new().unwrap();
    let shelf = Shelf::open(&config(&dir), None).unwrap();
    let album = shelf
        .add(&AlbumDraft::new("Help!", "The Beatles", "1965"))
        .await
        .unwrap();

    let host = ScriptedHost::answering(vec![ModalOutcome::Delete]);
    let result = shelf.focus_via_dialog(&host, album.clone()).await.unwrap();

    assert_eq!(result, DialogResult::Deleted { is_empty: true });
    assert!(shelf.store().covers().unknown_cover().exists());
    assert!(shelf.is_empty());

    let host = ScriptedHost::answering(vec![ModalOutcome::Delete]);
    let stale = shelf.focus_via_dialog(&host, album).await;
    assert!(matches!(stale, Err(LibraryError::NotFound { .. })));
    assert_eq!(host.alerts().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn shuffle_ends_in_the_focus_dialog() {
    let dir = TempDir::new().unwrap();
    let shelf = Shelf::open(&config(&dir), None).unwrap();
    for (title, year) in [("Help!", "1965"), ("Revolver", "1966"), ("Abbey Road", "1969")] {
        shelf
            .add(&AlbumDraft::new(title, "The Beatles", year))
            .await
            .unwrap();
    }

    let host = ScriptedHost::default();
    let result = shelf.shuffle_via_dialog(&host).await.unwrap();
    assert_eq!(result, DialogResult::Cancelled);

    let requests = host.requests();
    assert_eq!(requests.len(), 1);
    let album = match &requests[0] {
        ModalRequest::Focus { album, .. } => album,
        other => panic!("expected the focus dialog, got {other:?}"),
    };
    assert_eq!(shelf.focused().as_ref(), Some(album));
    assert!(!shelf.is_shuffling());
}

#[tokio::test]
async fn second_view_follows_changes_from_the_first() {
    let dir = TempDir::new().unwrap();
    let events = CollectionEvents::new();
    let editor = Shelf::open_with_events(&config(&dir), None, events.clone()).unwrap();
    let viewer = Shelf::open_with_events(&config(&dir), None, events).unwrap();
    let listener = viewer.spawn_listener();

    editor
        .add(&AlbumDraft::new("Aja", "Steely Dan", "1977"))
        .await
        .unwrap();

    for _ in 0..100 {
        if viewer.len() == 1 {
            break;
        }
        tokio::task::yield_now().await;
    }
    assert_eq!(viewer.len(), 1);
    assert_eq!(viewer.focused().unwrap().album_title, "Aja");
    listener.abort();
}

async fn wait_for(viewer: &Shelf, seen: impl Fn(&[Album]) -> bool) {
    for _ in 0..100 {
        if seen(&viewer.albums()) {
            return;
        }
        tokio::task::yield_now().await;
    }
    panic!("view never caught up");
}

#[tokio::test]
async fn second_view_keeps_its_own_focus_across_sibling_edits() {
    let dir = TempDir::new().unwrap();
    let events = CollectionEvents::new();
    let editor = Shelf::open_with_events(&config(&dir), None, events.clone()).unwrap();
    for (title, artist, year) in [
        ("Help!", "The Beatles", "1965"),
        ("Blue", "Joni Mitchell", "1971"),
        ("Aja", "Steely Dan", "1977"),
    ] {
        editor
            .add(&AlbumDraft::new(title, artist, year))
            .await
            .unwrap();
    }
    let viewer = Shelf::open_with_events(&config(&dir), None, events).unwrap();
    let listener = viewer.spawn_listener();
    assert!(viewer.focus(&AlbumKey::new("Blue", "Joni Mitchell")));

    let help = editor.albums().into_iter().find(|a| a.album_title == "Help!").unwrap();
    editor
        .update(&help, &AlbumDraft::new("Help!", "The Beatles", "1999"), None)
        .unwrap();
    wait_for(&viewer, |albums| albums.iter().any(|a| a.year == "1999")).await;
    assert_eq!(viewer.focused().unwrap().album_title, "Blue");

    let blue = viewer.focused().unwrap();
    editor
        .update(&blue, &AlbumDraft::new("Blue (Remastered)", "Joni Mitchell", "1971"), None)
        .unwrap();
    wait_for(&viewer, |albums| {
        albums.iter().any(|a| a.album_title == "Blue (Remastered)")
    })
    .await;
    assert_eq!(viewer.focused().unwrap().album_title, "Blue (Remastered)");
    listener.abort();
}
