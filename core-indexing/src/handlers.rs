//! Handlers for the task names the server knows about.

use crate::error::{IndexingError, Result};
use crate::indexer::Indexer;
use crate::task_server::{JobHandler, INDEX_USER_TASK, TEST_TASK};
use async_trait::async_trait;
use core_runtime::logging::redact_if_sensitive;
use std::sync::Arc;
use tracing::info;

/// Runs `index_user(username, token)` jobs.
pub struct IndexUserHandler {
    indexer: Arc<Indexer>,
}

impl IndexUserHandler {
    pub fn new(indexer: Arc<Indexer>) -> Self {
        Self { indexer }
    }
}

#[async_trait]
impl JobHandler for IndexUserHandler {
    fn name(&self) -> &str {
        INDEX_USER_TASK
    }

    async fn run(&self, args: &[String]) -> Result<()> {
        let [username, token] = args else {
            return Err(IndexingError::InvalidArguments {
                task: INDEX_USER_TASK.to_string(),
                message: format!("expected [username, token], got {} arguments", args.len()),
            });
        };

        self.indexer.index_user(username, token).await?;
        Ok(())
    }
}

/// Logs its message. Used to check that workers are alive.
pub struct TestTaskHandler;

#[async_trait]
impl JobHandler for TestTaskHandler {
    fn name(&self) -> &str {
        TEST_TASK
    }

    async fn run(&self, args: &[String]) -> Result<()> {
        let message = args.first().map(String::as_str).unwrap_or_default();
        let token = args.get(1).map(String::as_str).unwrap_or_default();
        info!(
            message,
            token = %redact_if_sensitive("token", token),
            "Test task received"
        );
        Ok(())
    }
}
