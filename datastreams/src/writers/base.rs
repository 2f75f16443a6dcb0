use async_trait::async_trait;

use crate::error::EtlResult;
use crate::types::StreamEntry;

/// Persists transformed entries.
///
/// An error from [`Writer::write`] whose kind is entry-scoped is recorded on the entry by the
/// orchestrator. [`Writer::write_many`] records per-entry failures itself and only fails when the
/// whole batch could not be written.
#[async_trait]
pub trait Writer: Send + Sync {
    /// Name used to tag errors raised by this writer.
    fn name(&self) -> &'static str;

    async fn write(&self, entry: &StreamEntry) -> EtlResult<StreamEntry>;

    /// Writes a group of entries, returning one entry per input in the same order.
    ///
    /// The default writes entries one by one.
    async fn write_many(&self, entries: Vec<StreamEntry>) -> EtlResult<Vec<StreamEntry>> {
        let mut written = Vec::with_capacity(entries.len());
        for entry in entries {
            match self.write(&entry).await {
                Ok(result) => written.push(result),
                Err(err) if err.is_entry_scoped() => {
                    written.push(entry.with_stage_error(self.name(), &err))
                }
                Err(err) => return Err(err),
            }
        }

        Ok(written)
    }
}
