use crate::error::EtlResult;
use crate::types::StreamEntry;

/// Reshapes or validates a single entry.
///
/// Transformers are pure and synchronous. A failed transformation is returned as an error and the
/// orchestrator records it on the entry, skipping the remaining transformers.
pub trait Transformer: Send + Sync {
    /// Name used to tag errors raised by this transformer.
    fn name(&self) -> &'static str;

    fn apply(&self, entry: &StreamEntry) -> EtlResult<StreamEntry>;
}
