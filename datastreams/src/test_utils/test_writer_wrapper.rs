use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::{Notify, RwLock};

use crate::error::EtlResult;
use crate::types::StreamEntry;
use crate::writers::Writer;

type EntriesCondition = Box<dyn Fn(&[StreamEntry]) -> bool + Send + Sync>;

struct Inner {
    entries: Vec<StreamEntry>,
    write_many_calls: usize,
    conditions: Vec<(EntriesCondition, Arc<Notify>)>,
}

impl Inner {
    fn check_conditions(&mut self) {
        let entries = &self.entries;
        self.conditions.retain(|(condition, notify)| {
            let should_retain = !condition(entries);
            if !should_retain {
                notify.notify_one();
            }
            should_retain
        });
    }
}

/// Wraps a writer and records the entries it returned.
///
/// Clones share the recorded entries, so a clone can be handed to a registry while the test keeps
/// another one to inspect.
pub struct TestWriterWrapper<W> {
    writer: Arc<W>,
    inner: Arc<RwLock<Inner>>,
}

impl<W> Clone for TestWriterWrapper<W> {
    fn clone(&self) -> Self {
        Self {
            writer: self.writer.clone(),
            inner: self.inner.clone(),
        }
    }
}

impl<W> TestWriterWrapper<W> {
    pub fn wrap(writer: W) -> Self {
        let inner = Inner {
            entries: Vec::new(),
            write_many_calls: 0,
            conditions: Vec::new(),
        };

        Self {
            writer: Arc::new(writer),
            inner: Arc::new(RwLock::new(inner)),
        }
    }

    /// Entries returned by the wrapped writer, in the order they were written.
    pub async fn entries(&self) -> Vec<StreamEntry> {
        self.inner.read().await.entries.clone()
    }

    pub async fn write_many_calls(&self) -> usize {
        self.inner.read().await.write_many_calls
    }

    /// Returns a [`Notify`] triggered once `condition` holds for the recorded entries.
    pub async fn notify_on_entries<F>(&self, condition: F) -> Arc<Notify>
    where
        F: Fn(&[StreamEntry]) -> bool + Send + Sync + 'static,
    {
        let notify = Arc::new(Notify::new());
        let mut inner = self.inner.write().await;
        inner.conditions.push((Box::new(condition), notify.clone()));
        inner.check_conditions();

        notify
    }

    /// Waits until at least `count` entries were written.
    pub async fn wait_for_entries(&self, count: usize) -> Arc<Notify> {
        self.notify_on_entries(move |entries| entries.len() >= count)
            .await
    }
}

#[async_trait]
impl<W: Writer> Writer for TestWriterWrapper<W> {
    fn name(&self) -> &'static str {
        self.writer.name()
    }

    async fn write(&self, entry: &StreamEntry) -> EtlResult<StreamEntry> {
        let result = self.writer.write(entry).await;

        let mut inner = self.inner.write().await;
        if let Ok(written) = &result {
            inner.entries.push(written.clone());
        }
        inner.check_conditions();

        result
    }

    async fn write_many(&self, entries: Vec<StreamEntry>) -> EtlResult<Vec<StreamEntry>> {
        let result = self.writer.write_many(entries).await;

        let mut inner = self.inner.write().await;
        inner.write_many_calls += 1;
        if let Ok(written) = &result {
            inner.entries.extend(written.iter().cloned());
        }
        inner.check_conditions();

        result
    }
}
