pub mod carousel;
pub mod config;
pub mod events;
pub mod host;
pub mod library;
pub mod musicbrainz;
pub mod search;
pub mod shelf;
pub mod stats;
pub mod theme;

pub use carousel::{Carousel, ShuffleConfig, ShuffleError, Shuffler, Slot, SlotPosition};
pub use config::{AppConfig, ConfigError, FileConfig};
pub use events::{CollectionEvent, CollectionEvents};
pub use host::{HostShell, ModalOutcome, ModalRequest};
pub use library::{
    Album, AlbumDraft, AlbumKey, CollectionStore, CoverError, CoverStore, DeleteOutcome,
    LibraryError, SortMethod, SortOptions, SortOrder,
};
pub use musicbrainz::{CoverLookup, MusicbrainzCredentials, MusicbrainzLookup};
pub use search::{search, SearchQuery};
pub use shelf::{DialogResult, Shelf};
pub use stats::{CollectionStats, StatsCache};
pub use theme::{extract_color, Color, ColorConfig, ThemeColors};
