//! Focus tracking for the five-slot cover carousel and the shuffle spin.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::time::sleep;
use tracing::{debug, warn};

use crate::library::{position_of, Album, AlbumKey};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SlotPosition {
    WayLeft,
    Left,
    Center,
    Right,
    WayRight,
}

impl SlotPosition {
    pub fn offset(self) -> isize {
        match self {
            SlotPosition::WayLeft => -2,
            SlotPosition::Left => -1,
            SlotPosition::Center => 0,
            SlotPosition::Right => 1,
            SlotPosition::WayRight => 2,
        }
    }

    /// Positions shown for a list of `len` albums.
    pub fn visible_for(len: usize) -> &'static [SlotPosition] {
        use SlotPosition::*;
        match len {
            0 => &[],
            1 => &[Center],
            2 => &[Center, Right],
            3 | 4 => &[Left, Center, Right],
            _ => &[WayLeft, Left, Center, Right, WayRight],
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Slot<'a> {
    pub position: SlotPosition,
    pub index: usize,
    pub album: &'a Album,
}

#[derive(Debug, Clone, Default)]
pub struct Carousel {
    albums: Vec<Album>,
    focused: usize,
}

impl Carousel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn albums(&self) -> &[Album] {
        &self.albums
    }

    pub fn len(&self) -> usize {
        self.albums.len()
    }

    pub fn is_empty(&self) -> bool {
        self.albums.is_empty()
    }

    pub fn focused_index(&self) -> Option<usize> {
        (!self.albums.is_empty()).then_some(self.focused)
    }

    pub fn focused_album(&self) -> Option<&Album> {
        self.albums.get(self.focused)
    }

    pub fn set_albums(&mut self, albums: Vec<Album>, anchor: Option<&AlbumKey>) {
        self.set_albums_with(albums, anchor, &mut rand::thread_rng());
    }

    /// Replaces the visible list. Focus moves to `anchor` when it is present
    /// in the new list, otherwise the previous index is clamped into range.
    /// The first fill of an empty carousel without an anchor picks a random
    /// album.
    pub fn set_albums_with<R: Rng + ?Sized>(
        &mut self,
        albums: Vec<Album>,
        anchor: Option<&AlbumKey>,
        rng: &mut R,
    ) {
        let was_empty = self.albums.is_empty();
        self.albums = albums;

        if self.albums.is_empty() {
            self.focused = 0;
            return;
        }

        if let Some(index) = anchor.and_then(|key| position_of(&self.albums, key)) {
            self.focused = index;
        } else if anchor.is_none() && was_empty {
            self.focused = rng.gen_range(0..self.albums.len());
        } else {
            self.focused = self.focused.min(self.albums.len() - 1);
        }
    }

    /// Focuses the album with `key`. Leaves focus untouched when absent.
    pub fn focus(&mut self, key: &AlbumKey) -> bool {
        match position_of(&self.albums, key) {
            Some(index) => {
                self.focused = index;
                true
            }
            None => false,
        }
    }

    pub fn focus_random<R: Rng + ?Sized>(&mut self, rng: &mut R) {
        if !self.albums.is_empty() {
            self.focused = rng.gen_range(0..self.albums.len());
        }
    }

    pub fn step_by(&mut self, delta: isize) {
        let len = self.albums.len();
        if len == 0 {
            return;
        }
        self.focused = wrap(self.focused, delta, len);
    }

    pub fn slots(&self) -> Vec<Slot<'_>> {
        let len = self.albums.len();
        SlotPosition::visible_for(len)
            .iter()
            .map(|&position| {
                let index = wrap(self.focused, position.offset(), len);
                Slot {
                    position,
                    index,
                    album: &self.albums[index],
                }
            })
            .collect()
    }
}

fn wrap(index: usize, delta: isize, len: usize) -> usize {
    (index as isize + delta).rem_euclid(len as isize) as usize
}

/// Timing of the shuffle spin. Intervals are in milliseconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ShuffleConfig {
    pub start_interval_ms: u64,
    pub target_interval_ms: u64,
    pub min_acceleration: f64,
    pub max_acceleration: f64,
    pub warm_up_ms: u64,
    pub final_pause_ms: u64,
}

impl Default for ShuffleConfig {
    fn default() -> Self {
        Self {
            start_interval_ms: 50,
            target_interval_ms: 200,
            min_acceleration: 1.03,
            max_acceleration: 1.15,
            warm_up_ms: 1000,
            final_pause_ms: 500,
        }
    }
}

impl ShuffleConfig {
    pub fn final_pause(&self) -> Duration {
        Duration::from_millis(self.final_pause_ms)
    }

    /// Replaces acceleration bounds that are not finite numbers with the
    /// defaults.
    pub fn sanitized(mut self) -> Self {
        if !self.min_acceleration.is_finite() || !self.max_acceleration.is_finite() {
            warn!(
                min = self.min_acceleration,
                max = self.max_acceleration,
                "ignoring non-finite shuffle acceleration"
            );
            let defaults = Self::default();
            self.min_acceleration = defaults.min_acceleration;
            self.max_acceleration = defaults.max_acceleration;
        }
        self
    }

    pub fn random_acceleration<R: Rng + ?Sized>(&self, rng: &mut R) -> f64 {
        let (min, max) = (self.min_acceleration, self.max_acceleration);
        if !min.is_finite() {
            Self::default().min_acceleration
        } else if max.is_finite() && min < max {
            rng.gen_range(min..=max)
        } else {
            min
        }
    }

    /// Sleeps between consecutive steps. The spin advances once more than
    /// there are intervals: a step happens before every sleep and after the
    /// last one.
    pub fn intervals(&self, acceleration: f64) -> Vec<Duration> {
        let target = self.target_interval_ms as f64;
        let mut speed = self.start_interval_ms as f64;
        let mut warm_up = self.warm_up_ms as f64;
        let mut intervals = Vec::new();

        while speed < target {
            if warm_up > 0.0 && speed > 0.0 {
                warm_up -= speed;
            } else if acceleration > 1.0 && speed > 0.0 {
                speed = (speed * acceleration).min(target);
            } else {
                speed = target;
            }
            intervals.push(Duration::from_secs_f64(speed / 1000.0));
        }
        intervals
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ShuffleError {
    #[error("a shuffle is already running")]
    Busy,
}

/// Runs the shuffle spin against a shared carousel. Only one spin runs at a
/// time; dropping the future cancels it and releases the guard.
#[derive(Debug, Clone)]
pub struct Shuffler {
    config: ShuffleConfig,
    busy: Arc<AtomicBool>,
}

struct BusyGuard<'a>(&'a AtomicBool);

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl Shuffler {
    pub fn new(config: ShuffleConfig) -> Self {
        Self {
            config,
            busy: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn config(&self) -> &ShuffleConfig {
        &self.config
    }

    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }

    pub async fn run(&self, carousel: &Mutex<Carousel>) -> Result<Option<Album>, ShuffleError> {
        let acceleration = self.config.random_acceleration(&mut rand::thread_rng());
        self.run_with_acceleration(carousel, acceleration).await
    }

    /// Returns the album focused when the spin stops, or `None` if the list
    /// was empty or emptied while spinning.
    pub async fn run_with_acceleration(
        &self,
        carousel: &Mutex<Carousel>,
        acceleration: f64,
    ) -> Result<Option<Album>, ShuffleError> {
        if self
            .busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(ShuffleError::Busy);
        }
        let _guard = BusyGuard(&self.busy);

        if lock(carousel).is_empty() {
            return Ok(None);
        }

        let intervals = self.config.intervals(acceleration);
        debug!(steps = intervals.len() + 1, acceleration, "shuffle started");

        for interval in intervals.iter().map(Some).chain(std::iter::once(None)) {
            {
                let mut carousel = lock(carousel);
                if carousel.is_empty() {
                    return Ok(None);
                }
                carousel.step_by(1);
            }
            if let Some(interval) = interval {
                sleep(*interval).await;
            }
        }

        sleep(self.config.final_pause()).await;
        let focused = lock(carousel).focused_album().cloned();
        Ok(focused)
    }
}

/// Locks `mutex`, recovering the data if a previous holder panicked.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
