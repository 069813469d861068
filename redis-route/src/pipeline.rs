//! Pipeline support for batching Redis commands
//!
//! A [`Pipeline`] buffers write commands and sends them in a single network
//! round-trip when committed. Reads issued through the pipeline flush the
//! buffer first, so a caller always reads its own writes.
//!
//! # Examples
//!
//! ```no_run
//! use redis_route::{cmd, Client, ConnectionConfig, PipelineReply};
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let client = Client::connect(ConnectionConfig::new("redis://localhost:6379")).await?;
//!
//! let mut pipeline = client.start_pipeline();
//! pipeline.set("key1", "value1").await?;
//! let counter = pipeline.incr("counter").await?;
//!
//! let mut results = pipeline.commit(true).await?;
//! let value: i64 = results.take(counter)?;
//! println!("counter = {}", value);
//! # Ok(())
//! # }
//! ```

use crate::executor::Executor;
use crate::protocol::Cmd;
use redis_route_core::{
    error::{RedisError, RedisResult},
    value::{FromRespValue, RespValue},
};
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Placeholder for the reply of a buffered command
#[derive(Debug)]
pub struct Queued<T> {
    index: usize,
    _reply: PhantomData<fn() -> T>,
}

impl<T> Queued<T> {
    /// Position of the command in the pipeline
    #[must_use]
    pub const fn index(&self) -> usize {
        self.index
    }
}

/// Outcome of [`Pipeline::execute`]
#[derive(Debug)]
pub enum PipelineReply<T> {
    /// The command was buffered; redeem the placeholder after commit
    Queued(Queued<T>),
    /// The command ran immediately
    Ready(T),
}

/// Replies of a committed pipeline
#[derive(Debug, Default)]
pub struct PipelineResults {
    replies: Vec<Option<RespValue>>,
}

impl PipelineResults {
    /// Take the reply for a queued command, converted to its requested type.
    ///
    /// # Errors
    ///
    /// Returns the server error if the command failed, or a `Type` error if
    /// the reply does not convert or was already taken.
    pub fn take<T: FromRespValue>(&mut self, queued: Queued<T>) -> RedisResult<T> {
        let reply = self
            .replies
            .get_mut(queued.index)
            .and_then(Option::take)
            .ok_or_else(|| {
                RedisError::Type(format!("No reply for pipelined command #{}", queued.index))
            })?;
        T::from_resp(reply.into_result()?)
    }

    /// Number of replies
    #[must_use]
    pub fn len(&self) -> usize {
        self.replies.len()
    }

    /// Whether nothing was committed
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.replies.is_empty()
    }

    /// All raw replies in submission order
    #[must_use]
    pub fn into_values(self) -> Vec<RespValue> {
        self.replies
            .into_iter()
            .map(|reply| reply.unwrap_or(RespValue::Null))
            .collect()
    }
}

/// A buffer of commands owned by one caller until committed
pub struct Pipeline {
    executor: Arc<Executor>,
    pending: Vec<(Option<Vec<u8>>, Cmd)>,
    replies: Vec<Option<RespValue>>,
    next_index: usize,
    auto_commit: usize,
    buffer_reads: bool,
}

impl Pipeline {
    pub(crate) fn new(executor: Arc<Executor>) -> Self {
        let auto_commit = executor.config().auto_pipeline;
        let buffer_reads = executor.config().full_pipeline;
        Self {
            executor,
            pending: Vec::new(),
            replies: Vec::new(),
            next_index: 0,
            auto_commit,
            buffer_reads,
        }
    }

    /// Submit a command.
    ///
    /// Writes (and reads, in full-pipeline mode) are buffered and answered with
    /// a placeholder; the buffer is sent once it holds `auto_pipeline`
    /// commands. Other reads flush the buffer and run immediately.
    pub async fn execute<T: FromRespValue>(
        &mut self,
        key: Option<&[u8]>,
        cmd: Cmd,
        write: bool,
    ) -> RedisResult<PipelineReply<T>> {
        if write || self.buffer_reads {
            let queued = self.enqueue(key, cmd);
            if self.auto_commit > 0 && self.pending.len() >= self.auto_commit {
                debug!("Auto-committing {} pipelined commands", self.pending.len());
                self.flush().await?;
            }
            return Ok(PipelineReply::Queued(queued));
        }

        self.flush().await?;
        let value = self.executor.execute(key, false, &cmd).await?;
        Ok(PipelineReply::Ready(value))
    }

    fn enqueue<T>(&mut self, key: Option<&[u8]>, cmd: Cmd) -> Queued<T> {
        self.pending.push((key.map(<[u8]>::to_vec), cmd));
        let index = self.next_index;
        self.next_index += 1;
        Queued {
            index,
            _reply: PhantomData,
        }
    }

    /// Buffer `SET key value`
    pub async fn set(&mut self, key: &str, value: impl Into<RespValue>) -> RedisResult<Queued<()>> {
        self.queue_write(key, Cmd::new("SET").arg(key).arg(value)).await
    }

    /// Buffer `SET key value PX milliseconds`
    pub async fn set_ex(
        &mut self,
        key: &str,
        value: impl Into<RespValue>,
        ttl: Duration,
    ) -> RedisResult<Queued<()>> {
        let millis = u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX).max(1);
        let cmd = Cmd::new("SET").arg(key).arg(value).arg("PX").arg(millis);
        self.queue_write(key, cmd).await
    }

    /// Buffer `DEL key`
    pub async fn del(&mut self, key: &str) -> RedisResult<Queued<i64>> {
        self.queue_write(key, Cmd::new("DEL").arg(key)).await
    }

    /// Buffer `INCR key`
    pub async fn incr(&mut self, key: &str) -> RedisResult<Queued<i64>> {
        self.queue_write(key, Cmd::new("INCR").arg(key)).await
    }

    /// Buffer `EXPIRE key seconds`
    pub async fn expire(&mut self, key: &str, ttl: Duration) -> RedisResult<Queued<bool>> {
        self.queue_write(key, Cmd::new("EXPIRE").arg(key).arg(ttl.as_secs()))
            .await
    }

    async fn queue_write<T: FromRespValue>(&mut self, key: &str, cmd: Cmd) -> RedisResult<Queued<T>> {
        match self.execute(Some(key.as_bytes()), cmd, true).await? {
            PipelineReply::Queued(queued) => Ok(queued),
            // writes are never answered immediately
            PipelineReply::Ready(_) => Err(RedisError::Type("Write was not queued".to_string())),
        }
    }

    /// Number of commands waiting to be sent
    #[must_use]
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    /// Whether nothing is waiting to be sent
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    async fn flush(&mut self) -> RedisResult<()> {
        if self.pending.is_empty() {
            return Ok(());
        }
        let batch = std::mem::take(&mut self.pending);
        let result = match self.executor.execute_batch(&batch).await {
            Ok(replies) if replies.len() == batch.len() => Ok(replies),
            Ok(replies) => Err(RedisError::Protocol(format!(
                "Pipeline of {} commands got {} replies",
                batch.len(),
                replies.len()
            ))),
            Err(e) => Err(e),
        };
        match result {
            Ok(replies) => {
                self.replies.extend(replies.into_iter().map(Some));
                Ok(())
            }
            Err(e) => {
                // one slot per lost command keeps later placeholders aligned
                let failed = RespValue::Error(format!("ERR pipeline flush failed: {}", e));
                self.replies
                    .extend(std::iter::repeat(Some(failed)).take(batch.len()));
                Err(e)
            }
        }
    }

    /// Send everything still buffered and close the pipeline.
    ///
    /// Replies are always read so the connection stays in sync; when
    /// `require_result` is false they are dropped and the returned set is empty.
    pub async fn commit(mut self, require_result: bool) -> RedisResult<PipelineResults> {
        self.flush().await?;
        if !require_result {
            return Ok(PipelineResults::default());
        }
        Ok(PipelineResults {
            replies: std::mem::take(&mut self.replies),
        })
    }
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("pending", &self.pending.len())
            .field("committed", &self.replies.len())
            .finish()
    }
}
