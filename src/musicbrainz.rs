use std::cmp::Ordering;
use std::env;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde_json::Value;
use tokio::sync::Mutex;
use tokio::time::sleep;
use tracing::{debug, warn};

const SEARCH_URL: &str = "https://musicbrainz.org/ws/2/release/";
const COVER_ART_URL: &str = "https://coverartarchive.org/release";
const MAX_ATTEMPTS: usize = 3;
const MIN_SCORE: f32 = 50.0;
const REQUEST_INTERVAL: Duration = Duration::from_millis(1100);
const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(5);

/// Best-effort album art lookup. Returns an image URL, or `None` when nothing
/// usable was found for any reason.
#[async_trait]
pub trait CoverLookup: Send + Sync {
    async fn lookup(&self, artist: &str, album: &str) -> Option<String>;
}

pub struct MusicbrainzLookup {
    client: Client,
    rate_limiter: Mutex<RateLimiter>,
    max_retry_delay: Duration,
}

impl MusicbrainzLookup {
    pub fn new(credentials: &MusicbrainzCredentials, timeout: Duration) -> reqwest::Result<Self> {
        let client = Client::builder()
            .user_agent(credentials.user_agent.clone())
            .timeout(timeout)
            .build()?;

        Ok(Self {
            client,
            rate_limiter: Mutex::new(RateLimiter::new(REQUEST_INTERVAL)),
            max_retry_delay: timeout,
        })
    }

    async fn search_release(&self, query: &str) -> Result<Option<String>, LookupFailure> {
        let mut attempts = 0usize;
        loop {
            attempts += 1;
            self.rate_limiter.lock().await.wait().await;
            let response = self
                .client
                .get(SEARCH_URL)
                .query(&[("fmt", "json"), ("limit", "5"), ("query", query)])
                .send()
                .await
                .map_err(|error| LookupFailure(format!("request failed: {error}")))?;

            match response.status() {
                StatusCode::OK => {
                    let body: Value = response.json().await.map_err(|error| {
                        LookupFailure(format!("failed to parse MusicBrainz response: {error}"))
                    })?;
                    return Ok(best_release_id(&body));
                }
                StatusCode::TOO_MANY_REQUESTS | StatusCode::SERVICE_UNAVAILABLE => {
                    if attempts >= MAX_ATTEMPTS {
                        return Err(LookupFailure("rate limited by MusicBrainz".to_string()));
                    }
                    let header = response
                        .headers()
                        .get("Retry-After")
                        .and_then(|value| value.to_str().ok());
                    let delay = retry_delay(header, self.max_retry_delay);
                    debug!(?delay, attempts, "MusicBrainz asked us to back off");
                    sleep(delay).await;
                }
                StatusCode::NOT_FOUND => return Ok(None),
                status => {
                    return Err(LookupFailure(format!(
                        "unexpected MusicBrainz status: {status}"
                    )));
                }
            }
        }
    }
}

#[async_trait]
impl CoverLookup for MusicbrainzLookup {
    async fn lookup(&self, artist: &str, album: &str) -> Option<String> {
        let query = build_search_query(artist, album)?;
        match self.search_release(&query).await {
            Ok(Some(release_id)) => Some(cover_url(&release_id)),
            Ok(None) => {
                debug!(%query, "no MusicBrainz release matched");
                None
            }
            Err(LookupFailure(message)) => {
                warn!(%query, %message, "MusicBrainz lookup failed");
                None
            }
        }
    }
}

pub struct MusicbrainzCredentials {
    pub user_agent: String,
}

impl MusicbrainzCredentials {
    /// Builds the user agent MusicBrainz asks clients to send, overridable
    /// through `ALBUM_SHELF_APP_NAME`, `ALBUM_SHELF_APP_VERSION` and
    /// `ALBUM_SHELF_APP_CONTACT`.
    pub fn from_env() -> Self {
        let app_name = non_empty_var("ALBUM_SHELF_APP_NAME")
            .unwrap_or_else(|| env!("CARGO_PKG_NAME").to_string());
        let app_version = non_empty_var("ALBUM_SHELF_APP_VERSION")
            .unwrap_or_else(|| env!("CARGO_PKG_VERSION").to_string());
        let contact = non_empty_var("ALBUM_SHELF_APP_CONTACT")
            .unwrap_or_else(|| "https://github.com/your-org/album-shelf".to_string());

        Self {
            user_agent: format!("{app_name}/{app_version} ({contact})"),
        }
    }
}

fn non_empty_var(name: &str) -> Option<String> {
    env::var(name).ok().filter(|value| !value.trim().is_empty())
}

struct RateLimiter {
    last: Option<Instant>,
    interval: Duration,
}

impl RateLimiter {
    fn new(interval: Duration) -> Self {
        Self {
            last: None,
            interval,
        }
    }

    async fn wait(&mut self) {
        if let Some(last) = self.last {
            let elapsed = last.elapsed();
            if elapsed < self.interval {
                sleep(self.interval - elapsed).await;
            }
        }
        self.last = Some(Instant::now());
    }
}

struct LookupFailure(String);

/// Seconds from a `Retry-After` header, never longer than `cap`.
fn retry_delay(header: Option<&str>, cap: Duration) -> Duration {
    header
        .and_then(|value| value.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
        .unwrap_or(DEFAULT_RETRY_DELAY)
        .min(cap)
}

fn best_release_id(body: &Value) -> Option<String> {
    let releases = body.get("releases").and_then(|value| value.as_array())?;

    let mut scored: Vec<(f32, &Value)> = releases
        .iter()
        .map(|release| {
            let score = release
                .get("score")
                .and_then(|value| value.as_f64())
                .map(|value| value as f32)
                .unwrap_or(0.0);
            (score, release)
        })
        .collect();
    scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(Ordering::Equal));

    let (score, release) = scored.into_iter().next()?;
    if score < MIN_SCORE {
        return None;
    }
    release
        .get("id")
        .and_then(|value| value.as_str())
        .map(|id| id.to_string())
}

fn build_search_query(artist: &str, album: &str) -> Option<String> {
    let artist = normalize_term(artist)?;
    let album = normalize_term(album)?;
    Some(format!("artist:\"{artist}\" AND release:\"{album}\""))
}

fn normalize_term(value: &str) -> Option<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.replace('"', "\\\""))
    }
}

fn cover_url(release_id: &str) -> String {
    format!("{COVER_ART_URL}/{release_id}/front-500")
}
