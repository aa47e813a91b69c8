//! Boundary to the host shell that owns dialogs.

use async_trait::async_trait;

use crate::library::{Album, AlbumDraft};
use crate::theme::ThemeColors;

#[derive(Debug, Clone, PartialEq)]
pub enum ModalRequest {
    Add { theme: ThemeColors },
    Focus { album: Album, theme: ThemeColors },
    Edit { album: Album, theme: ThemeColors },
}

#[derive(Debug, Clone, PartialEq)]
pub enum ModalOutcome {
    Cancelled,
    /// Add dialog confirmed.
    Add(AlbumDraft),
    /// Focus dialog asked to edit the album.
    Edit,
    /// Edit dialog saved, optionally with replacement PNG bytes.
    Save {
        draft: AlbumDraft,
        cover: Option<Vec<u8>>,
    },
    Delete,
}

#[async_trait]
pub trait HostShell: Send + Sync {
    async fn open_modal(&self, request: ModalRequest) -> ModalOutcome;

    /// Shows a user-facing failure.
    async fn alert(&self, message: &str);
}
