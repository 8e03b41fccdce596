//! Request/response surface over a [`CrawlController`].
//!
//! Responses are plain data. Failures come back as `{error}` rather than
//! crossing the boundary as errors.

use crate::controller::{CrawlController, CrawlError, CrawlOutcome};
use crate::model::Graph;
use mutuals_scanner::RelationshipSource;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, PoisonError};
use tracing::{info, warn};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "camelCase")]
pub enum Command {
    Count,
    Scan {
        #[serde(default)]
        limit: Option<usize>,
    },
    Stop,
    ClearData,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Response {
    Count { count: usize },
    Data { data: Graph },
    Cancelled { cancelled: bool, partial: usize },
    Error { error: String },
    Ok { ok: bool },
}

impl Response {
    pub fn ok() -> Self {
        Response::Ok { ok: true }
    }

    pub fn error(error: impl ToString) -> Self {
        Response::Error {
            error: error.to_string(),
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Response::Error { .. })
    }

    pub fn to_json(&self) -> Result<String, CrawlError> {
        Ok(serde_json::to_string(self)?)
    }
}

impl From<Result<CrawlOutcome, CrawlError>> for Response {
    fn from(result: Result<CrawlOutcome, CrawlError>) -> Self {
        match result {
            Ok(CrawlOutcome::Completed(data)) => Response::Data { data },
            Ok(CrawlOutcome::Cancelled { partial }) => Response::Cancelled {
                cancelled: true,
                partial,
            },
            Err(e) => Response::error(e),
        }
    }
}

pub struct ControlSurface<S: RelationshipSource> {
    controller: Arc<CrawlController<S>>,
}

impl<S: RelationshipSource> Clone for ControlSurface<S> {
    fn clone(&self) -> Self {
        Self {
            controller: Arc::clone(&self.controller),
        }
    }
}

impl<S: RelationshipSource> ControlSurface<S> {
    pub fn new(controller: Arc<CrawlController<S>>) -> Self {
        Self { controller }
    }

    pub fn controller(&self) -> &Arc<CrawlController<S>> {
        &self.controller
    }

    pub async fn handle(&self, command: Command) -> Response {
        match command {
            Command::Count => match self.controller.count().await {
                Ok(count) => Response::Count { count },
                Err(e) => Response::error(e),
            },
            Command::Scan { limit } => self.controller.start(limit).await.into(),
            Command::Stop => {
                self.controller.stop();
                Response::ok()
            }
            Command::ClearData => self.clear_data(),
        }
    }

    /// Cancels any running scan so it can't write cleared data back, then
    /// wipes the store.
    fn clear_data(&self) -> Response {
        self.controller.discard();
        let result = self
            .controller
            .store()
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear_and_discard();
        match result {
            Ok(()) => {
                info!("Stored data cleared");
                Response::ok()
            }
            Err(e) => {
                warn!("Could not clear stored data: {}", e);
                Response::error(CrawlError::from(e))
            }
        }
    }
}
