//! Remote song/artist classifier client.

use std::num::NonZeroU32;
use std::time::{Duration, Instant};

use governor::state::NotKeyed;
use governor::{Quota, RateLimiter};
use log::{debug, info};
use serde::Deserialize;

const CLASSIFIER_USER_AGENT: &str = concat!("scenecast/", env!("CARGO_PKG_VERSION"));
const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);
const RATE_LIMIT_WAIT_CAP: Duration = Duration::from_secs(10);
const MAX_ATTEMPTS: u32 = 3;
const BACKOFF_BASE: Duration = Duration::from_millis(500);
const BACKOFF_CAP: Duration = Duration::from_secs(4);

/// A classifier's best guess for one item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassifierAnswer {
    pub song: String,
    /// May be empty.
    pub artist: String,
}

/// Anything that can turn `(id, title)` into a song/artist pair.
pub trait Classifier: Send + Sync {
    fn classify(&self, id: &str, title: &str) -> Result<ClassifierAnswer, String>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum HttpFailureKind {
    Timeout,
    RateLimited,
    Hard,
}

#[derive(Debug)]
struct RequestFailure {
    kind: HttpFailureKind,
    message: String,
}

impl RequestFailure {
    fn hard(message: impl Into<String>) -> Self {
        Self {
            kind: HttpFailureKind::Hard,
            message: message.into(),
        }
    }

    fn is_retryable(&self) -> bool {
        matches!(
            self.kind,
            HttpFailureKind::Timeout | HttpFailureKind::RateLimited
        )
    }
}

fn classify_ureq_failure(error: &ureq::Error) -> HttpFailureKind {
    match error {
        ureq::Error::Status(code, _) => match code {
            429 => HttpFailureKind::RateLimited,
            408 | 500..=599 => HttpFailureKind::Timeout,
            _ => HttpFailureKind::Hard,
        },
        ureq::Error::Transport(transport) => {
            let lowered = transport.to_string().to_ascii_lowercase();
            if lowered.contains("timed out") || lowered.contains("timeout") {
                HttpFailureKind::Timeout
            } else {
                HttpFailureKind::Hard
            }
        }
    }
}

fn backoff_delay(attempt: u32) -> Duration {
    let exponent = attempt.saturating_sub(1).min(6);
    BACKOFF_BASE
        .checked_mul(1u32 << exponent)
        .unwrap_or(BACKOFF_CAP)
        .min(BACKOFF_CAP)
}

/// Runs `operation` until it succeeds, fails hard, or runs out of attempts.
fn execute_with_backoff<T, F, S>(label: &str, mut operation: F, mut sleep: S) -> Result<T, String>
where
    F: FnMut() -> Result<T, RequestFailure>,
    S: FnMut(Duration),
{
    let mut attempt = 1u32;
    loop {
        match operation() {
            Ok(value) => return Ok(value),
            Err(failure) if failure.is_retryable() && attempt < MAX_ATTEMPTS => {
                let backoff = backoff_delay(attempt);
                info!(
                    "Classifier[{}]: attempt {} failed ({}), retrying in {:?}",
                    label, attempt, failure.message, backoff
                );
                sleep(backoff);
                attempt = attempt.saturating_add(1);
            }
            Err(failure) => return Err(failure.message),
        }
    }
}

#[derive(Debug, Deserialize)]
struct ClassifierResponse {
    #[serde(default)]
    song: Option<String>,
    #[serde(default)]
    artist: Option<String>,
}

/// Parses `{"song": "...", "artist": "..."}`; an empty song is a failure.
pub fn parse_classifier_response(body: &str) -> Result<ClassifierAnswer, String> {
    let parsed: ClassifierResponse = serde_json::from_str(body)
        .map_err(|error| format!("Invalid classifier response: {error}"))?;
    let song = parsed.song.unwrap_or_default().trim().to_string();
    if song.is_empty() {
        return Err("Classifier returned an empty song".to_string());
    }
    Ok(ClassifierAnswer {
        song,
        artist: parsed.artist.unwrap_or_default().trim().to_string(),
    })
}

/// HTTPS classifier with a shared request quota.
pub struct HttpClassifier {
    endpoint: String,
    credential: String,
    agent: ureq::Agent,
    limiter: RateLimiter<NotKeyed, governor::state::InMemoryState, governor::clock::DefaultClock>,
}

impl HttpClassifier {
    pub fn new(endpoint: &str, credential: &str) -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout_connect(Duration::from_secs(5))
            .timeout_read(Duration::from_secs(10))
            .timeout_write(Duration::from_secs(10))
            .build();
        Self {
            endpoint: endpoint.to_string(),
            credential: credential.to_string(),
            agent,
            limiter: RateLimiter::direct(
                Quota::with_period(Duration::from_secs(2))
                    .expect("valid limiter period")
                    .allow_burst(NonZeroU32::new(1).expect("non-zero limiter burst")),
            ),
        }
    }

    fn wait_for_rate_limit_slot(&self) -> bool {
        if self.limiter.check().is_ok() {
            return true;
        }
        let deadline = Instant::now() + RATE_LIMIT_WAIT_CAP;
        while Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(100));
            if self.limiter.check().is_ok() {
                return true;
            }
        }
        false
    }

    fn request_once(&self, id: &str, title: &str) -> Result<ClassifierAnswer, RequestFailure> {
        if !self.wait_for_rate_limit_slot() {
            return Err(RequestFailure {
                kind: HttpFailureKind::RateLimited,
                message: "local rate limit wait exceeded".to_string(),
            });
        }
        let response = self
            .agent
            .post(&self.endpoint)
            .set("User-Agent", CLASSIFIER_USER_AGENT)
            .set("Accept", "application/json")
            .set("Authorization", &format!("Bearer {}", self.credential))
            .timeout(REQUEST_TIMEOUT)
            .send_json(serde_json::json!({ "id": id, "title": title }))
            .map_err(|error| RequestFailure {
                kind: classify_ureq_failure(&error),
                message: format!("Request failed: {error}"),
            })?;
        let body = response.into_string().map_err(|error| {
            let timed_out = matches!(
                error.kind(),
                std::io::ErrorKind::TimedOut | std::io::ErrorKind::WouldBlock
            );
            RequestFailure {
                kind: if timed_out {
                    HttpFailureKind::Timeout
                } else {
                    HttpFailureKind::Hard
                },
                message: format!("Failed to read response: {error}"),
            }
        })?;
        parse_classifier_response(&body).map_err(RequestFailure::hard)
    }
}

impl Classifier for HttpClassifier {
    fn classify(&self, id: &str, title: &str) -> Result<ClassifierAnswer, String> {
        debug!("Classifier[{}]: requesting metadata for {:?}", id, title);
        execute_with_backoff(id, || self.request_once(id, title), std::thread::sleep)
    }
}
