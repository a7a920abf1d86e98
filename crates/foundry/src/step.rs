//! Durable, memoized steps.
//!
//! A [`StepExecutor`] wraps each externally visible unit of work of a job
//! run. The first successful execution of a step records its output in a
//! [`StepStore`]; any later call with the same run id and step name, in this
//! process or in a process resuming the run, returns the recorded output
//! without invoking the work again. Failures are never recorded, so a failed
//! step is retried when the enclosing job is retried.

use std::error::Error as StdError;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use serde::Serialize;
use serde::de::DeserializeOwned;
use thiserror::Error;
use tracing::debug;

use crate::store::{StepStore, StorageError};

/// Errors raised by [`StepExecutor::run`].
#[derive(Debug, Error)]
pub enum StepError {
    /// The wrapped work failed; nothing was recorded.
    #[error("step '{step}' failed: {source}")]
    Failed {
        /// Step name.
        step: String,
        /// Error returned by the work.
        #[source]
        source: Box<dyn StdError + Send + Sync>,
    },

    /// The memo table could not be read or written.
    #[error("step '{step}' storage error: {source}")]
    Store {
        /// Step name.
        step: String,
        /// Underlying storage error.
        #[source]
        source: StorageError,
    },

    /// A recorded output does not match the type the caller expects.
    #[error("step '{step}' output could not be encoded or decoded: {source}")]
    Codec {
        /// Step name.
        step: String,
        /// Underlying serde error.
        #[source]
        source: serde_json::Error,
    },
}

impl StepError {
    /// Name of the step that failed.
    pub fn step(&self) -> &str {
        match self {
            Self::Failed { step, .. } | Self::Store { step, .. } | Self::Codec { step, .. } => step,
        }
    }
}

/// Memoizing executor scoped to one job run.
#[derive(Clone)]
pub struct StepExecutor {
    run_id: String,
    store: Arc<dyn StepStore>,
}

impl fmt::Debug for StepExecutor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StepExecutor")
            .field("run_id", &self.run_id)
            .finish_non_exhaustive()
    }
}

impl StepExecutor {
    /// Create an executor for `run_id` backed by `store`.
    pub fn new(run_id: impl Into<String>, store: Arc<dyn StepStore>) -> Self {
        Self {
            run_id: run_id.into(),
            store,
        }
    }

    /// The job run this executor memoizes for.
    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    /// Run `work` at most once for this run and step name.
    ///
    /// # Errors
    ///
    /// Returns [`StepError::Failed`] if `work` fails, and
    /// [`StepError::Store`] / [`StepError::Codec`] if the memo table cannot
    /// be used. None of these are recorded.
    pub async fn run<T, E, F, Fut>(&self, step: &str, work: F) -> Result<T, StepError>
    where
        T: Serialize + DeserializeOwned,
        E: Into<Box<dyn StdError + Send + Sync>>,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let recorded = self
            .store
            .load(&self.run_id, step)
            .await
            .map_err(|source| StepError::Store {
                step: step.to_string(),
                source,
            })?;

        if let Some(value) = recorded {
            debug!(run_id = %self.run_id, step, "replaying recorded step");
            return serde_json::from_value(value).map_err(|source| StepError::Codec {
                step: step.to_string(),
                source,
            });
        }

        debug!(run_id = %self.run_id, step, "running step");
        let output = work().await.map_err(|e| StepError::Failed {
            step: step.to_string(),
            source: e.into(),
        })?;

        let value = serde_json::to_value(&output).map_err(|source| StepError::Codec {
            step: step.to_string(),
            source,
        })?;
        self.store
            .save(&self.run_id, step, &value)
            .await
            .map_err(|source| StepError::Store {
                step: step.to_string(),
                source,
            })?;

        Ok(output)
    }
}
