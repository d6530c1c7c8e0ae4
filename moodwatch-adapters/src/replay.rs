//! Replay source that plays back a scripted sequence of fetch outcomes.

use std::collections::VecDeque;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::{FetchError, ValueSource};

/// A source that returns pre-recorded outcomes in order.
///
/// Once the script runs out every fetch fails with [`FetchError::Exhausted`].
///
/// # Example
///
/// ```rust
/// use moodwatch_adapters::{FetchError, ReplaySource};
///
/// let source = ReplaySource::new(vec![
///     Err(FetchError::Timeout),
///     Ok("50.0".to_string()),
/// ]);
/// assert_eq!(source.remaining(), 2);
/// ```
#[derive(Debug)]
pub struct ReplaySource {
    steps: Mutex<VecDeque<Result<String, FetchError>>>,
    description: String,
}

impl ReplaySource {
    /// Create a replay source from a list of outcomes.
    pub fn new(steps: Vec<Result<String, FetchError>>) -> Self {
        Self {
            steps: Mutex::new(steps.into()),
            description: "replay".to_string(),
        }
    }

    /// Create a replay source that only ever succeeds with the given values.
    pub fn values<I, S>(values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(values.into_iter().map(|v| Ok(v.into())).collect())
    }

    /// Append another outcome to the end of the script.
    pub fn push(&self, step: Result<String, FetchError>) {
        self.steps.lock().push_back(step);
    }

    /// Number of outcomes not yet replayed.
    pub fn remaining(&self) -> usize {
        self.steps.lock().len()
    }
}

#[async_trait]
impl ValueSource for ReplaySource {
    async fn fetch_raw(&self) -> Result<String, FetchError> {
        self.steps
            .lock()
            .pop_front()
            .unwrap_or(Err(FetchError::Exhausted))
    }

    fn description(&self) -> &str {
        &self.description
    }
}
