//! Collection-changed notifications. Subscribers treat every event as a
//! signal to refetch, never as a delta to merge.

use tokio::sync::broadcast;
use tracing::trace;

use crate::library::{Album, AlbumKey};

const CHANNEL_CAPACITY: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CollectionEvent {
    Added(Album),
    /// `previous` is the identity the album had before the edit.
    Updated {
        previous: AlbumKey,
        album: Album,
    },
    Deleted,
}

impl CollectionEvent {
    /// The album the change produced, if any.
    pub fn album(&self) -> Option<&Album> {
        match self {
            CollectionEvent::Added(album) | CollectionEvent::Updated { album, .. } => Some(album),
            CollectionEvent::Deleted => None,
        }
    }

    /// Where focus on `focused` should land once the change is visible. Only
    /// an edit of the focused album itself moves the anchor.
    pub fn anchor_for(&self, focused: Option<AlbumKey>) -> Option<AlbumKey> {
        match (self, focused) {
            (CollectionEvent::Updated { previous, album }, Some(key)) if key == *previous => {
                Some(album.key())
            }
            (_, focused) => focused,
        }
    }
}

#[derive(Debug, Clone)]
pub struct CollectionEvents {
    sender: broadcast::Sender<CollectionEvent>,
}

impl Default for CollectionEvents {
    fn default() -> Self {
        Self::new()
    }
}

impl CollectionEvents {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<CollectionEvent> {
        self.sender.subscribe()
    }

    /// Delivers to every current subscriber. Having none is not an error.
    pub fn notify_changed(&self, event: CollectionEvent) {
        let delivered = self.sender.send(event).unwrap_or(0);
        trace!(delivered, "collection change published");
    }
}
