//! Bounded polling for resources that settle asynchronously on the provider side.

use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;
use validator::Validate;

use crate::provider::ProviderError;

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum WaitError {
    #[error("Gave up after {attempts} attempts, last status: {last_status}")]
    Timeout { attempts: u32, last_status: String },

    #[error(transparent)]
    Provider(#[from] ProviderError),
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Validate)]
pub struct PollSettings {
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,

    #[validate(range(min = 1))]
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
}

fn default_interval_secs() -> u64 {
    15
}

fn default_max_attempts() -> u32 {
    40
}

impl Default for PollSettings {
    fn default() -> Self {
        return Self {
            interval_secs: default_interval_secs(),
            max_attempts: default_max_attempts(),
        };
    }
}

impl PollSettings {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}

/// What a single probe observed.
#[derive(Debug, Clone, PartialEq)]
pub enum Poll<T> {
    Ready(T),
    Pending(String),
}

/// Calls `probe` until it reports ready, fails, or `max_attempts` is used up.
///
/// Sleeps `interval` between attempts, never after the last one. A provider
/// error from the probe ends the wait immediately.
pub async fn poll_until<T, F, Fut>(
    what: &str,
    settings: &PollSettings,
    mut probe: F,
) -> Result<T, WaitError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<Poll<T>, ProviderError>>,
{
    let mut last_status = String::from("not polled");

    for attempt in 1..=settings.max_attempts {
        match probe().await? {
            Poll::Ready(value) => return Ok(value),
            Poll::Pending(status) => {
                debug!(what, attempt, status = %status, "Still waiting");
                last_status = status;
            }
        }

        if attempt < settings.max_attempts {
            tokio::time::sleep(settings.interval()).await;
        }
    }

    return Err(WaitError::Timeout {
        attempts: settings.max_attempts,
        last_status,
    });
}
