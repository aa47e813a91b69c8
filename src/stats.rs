use std::collections::{BTreeMap, HashMap, HashSet};

use crate::library::Album;

/// Years before this are left out of the lower bound and the decade chart.
pub const MODERN_YEAR_FLOOR: i32 = 1900;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CollectionStats {
    pub size: usize,
    pub artist_count: usize,
    pub top_artist: Option<String>,
    pub top_artist_count: usize,
    pub albums_by_year: BTreeMap<i32, usize>,
    pub min_year: Option<i32>,
    pub max_year: Option<i32>,
    pub albums_by_decade: BTreeMap<i32, usize>,
}

impl CollectionStats {
    pub fn compute(albums: &[Album]) -> Self {
        let artists: HashSet<&str> = albums.iter().map(|a| a.artist_name.as_str()).collect();

        let mut per_artist: HashMap<&str, usize> = HashMap::new();
        let mut top_artist = None;
        let mut top_artist_count = 0;
        for album in albums {
            let count = per_artist.entry(album.artist_name.as_str()).or_default();
            *count += 1;
            if *count > top_artist_count {
                top_artist_count = *count;
                top_artist = Some(album.artist_name.clone());
            }
        }

        let mut albums_by_year = BTreeMap::new();
        for year in albums.iter().filter_map(Album::numeric_year) {
            *albums_by_year.entry(year).or_insert(0) += 1;
        }

        let mut albums_by_decade = BTreeMap::new();
        for (&year, &count) in albums_by_year.range(MODERN_YEAR_FLOOR..) {
            *albums_by_decade.entry(year.div_euclid(10) * 10).or_insert(0) += count;
        }

        Self {
            size: albums.len(),
            artist_count: artists.len(),
            top_artist,
            top_artist_count,
            min_year: albums_by_year.range(MODERN_YEAR_FLOOR..).next().map(|(y, _)| *y),
            max_year: albums_by_year.keys().next_back().copied(),
            albums_by_year,
            albums_by_decade,
        }
    }
}

/// Stats are computed on first use and kept until `invalidate` is called.
#[derive(Debug, Default)]
pub struct StatsCache {
    cached: Option<CollectionStats>,
}

impl StatsCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn invalidate(&mut self) {
        self.cached = None;
    }

    pub fn is_cached(&self) -> bool {
        self.cached.is_some()
    }

    /// Returns the cached stats, computing them from `load` on a miss.
    pub fn get_with<F>(&mut self, load: F) -> &CollectionStats
    where
        F: FnOnce() -> Vec<Album>,
    {
        self.cached
            .get_or_insert_with(|| CollectionStats::compute(&load()))
    }
}
