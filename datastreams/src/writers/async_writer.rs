use async_trait::async_trait;
use datastreams_config::shared::ComponentConfig;
use serde::Deserialize;

use crate::error::EtlResult;
use crate::tasks::TaskQueue;
use crate::types::StreamEntry;
use crate::writers::base::Writer;

#[derive(Debug, Clone, Deserialize)]
pub struct AsyncWriterArgs {
    /// The writer that runs the queued jobs.
    pub writer: ComponentConfig,
}

/// Queues writes on a [`TaskQueue`] and returns entries untouched.
///
/// Outcomes of the queued writes are only visible in the logs and in the queue report.
pub struct AsyncWriter {
    writer: ComponentConfig,
    queue: TaskQueue,
}

impl AsyncWriter {
    pub const NAME: &'static str = "AsyncWriter";

    pub fn new(args: AsyncWriterArgs, queue: TaskQueue) -> Self {
        Self {
            writer: args.writer,
            queue,
        }
    }
}

#[async_trait]
impl Writer for AsyncWriter {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    async fn write(&self, entry: &StreamEntry) -> EtlResult<StreamEntry> {
        self.queue.write_entry(self.writer.clone(), entry.clone())?;

        Ok(entry.clone())
    }

    async fn write_many(&self, entries: Vec<StreamEntry>) -> EtlResult<Vec<StreamEntry>> {
        self.queue
            .write_many_entries(self.writer.clone(), entries.clone())?;

        Ok(entries)
    }
}
