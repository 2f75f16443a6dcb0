//! The orchestrator driving readers, transformers and writers.
//!
//! A [`DataStream`] reads entries lazily through its reader chain, groups them in batches and
//! pushes every batch through the transformers, the filter and the writers. One result is yielded
//! per read entry. Errors of the reader, transformer, writer and factory categories are recorded
//! on the entry that caused them; any other error is yielded once and ends the stream.

use async_stream::stream;
use datastreams_config::shared::BatchConfig;
use futures::stream::{self, BoxStream};
use futures::{StreamExt, future};
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::bail;
use crate::concurrency::stream::BatchStream;
use crate::error::{ErrorKind, EtlResult};
use crate::etl_error;
use crate::readers::{Reader, ReaderStream};
use crate::transformers::Transformer;
use crate::types::{Payload, StreamEntry};
use crate::writers::Writer;

/// Predicate deciding which transformed entries are skipped instead of written.
pub type EntryFilter = Arc<dyn Fn(&StreamEntry) -> bool + Send + Sync>;

/// Item of the reader chain: a raw item, or an entry that already failed while reading.
type ChainItem = EtlResult<Result<Payload, StreamEntry>>;

struct Components {
    readers: Vec<Box<dyn Reader>>,
    transformers: Vec<Box<dyn Transformer>>,
    writers: Vec<Box<dyn Writer>>,
}

/// A configured pipeline. Cheap to clone, every clone shares the same components.
#[derive(Clone)]
pub struct DataStream {
    components: Arc<Components>,
    filter: Option<EntryFilter>,
    batch: BatchConfig,
}

impl DataStream {
    /// Creates a datastream, checking that the reader chain can be driven.
    ///
    /// The first reader must be able to open its own origin and every following reader must
    /// accept items from the previous one.
    pub fn new(
        readers: Vec<Box<dyn Reader>>,
        transformers: Vec<Box<dyn Transformer>>,
        writers: Vec<Box<dyn Writer>>,
        batch: BatchConfig,
    ) -> EtlResult<Self> {
        let Some(first) = readers.first() else {
            bail!(ErrorKind::ConfigError, "At least one reader must be configured");
        };
        if writers.is_empty() {
            bail!(ErrorKind::ConfigError, "At least one writer must be configured");
        }
        if !first.capabilities().root {
            bail!(
                ErrorKind::UnsupportedReaderMode,
                "First reader cannot read without an upstream item",
                first.name()
            );
        }
        if let Some(reader) = readers.iter().skip(1).find(|r| !r.capabilities().chain) {
            bail!(
                ErrorKind::UnsupportedReaderMode,
                "Reader cannot be chained",
                reader.name()
            );
        }

        Ok(Self {
            components: Arc::new(Components {
                readers,
                transformers,
                writers,
            }),
            filter: None,
            batch,
        })
    }

    /// Skips, instead of writing, every transformed entry matching `filter`.
    pub fn with_filter<F>(mut self, filter: F) -> Self
    where
        F: Fn(&StreamEntry) -> bool + Send + Sync + 'static,
    {
        self.filter = Some(Arc::new(filter));
        self
    }

    pub fn batch_config(&self) -> &BatchConfig {
        &self.batch
    }

    /// Streams the entries produced by the reader chain, without transforming or writing them.
    pub fn read(&self) -> BoxStream<'static, EtlResult<StreamEntry>> {
        let components = self.components.clone();
        let first = &components.readers[0];

        let mut items =
            tag_reader_errors(first.name(), first.read(None), Payload::Value(Value::Null));
        for index in 1..components.readers.len() {
            let components = components.clone();
            items = items
                .flat_map(move |item| match item {
                    Ok(Ok(payload)) => {
                        let reader = &components.readers[index];
                        tag_reader_errors(reader.name(), reader.read(Some(payload.clone())), payload)
                    }
                    other => stream::once(future::ready(other)).boxed(),
                })
                .boxed();
        }

        items
            .map(|item| {
                item.map(|entry| match entry {
                    Ok(payload) => StreamEntry::new(payload),
                    Err(errored) => errored,
                })
            })
            .boxed()
    }

    /// Runs the whole pipeline, yielding one result per read entry in read order.
    ///
    /// Entries are written one by one as they are reached, or, with `write_many`, as one group
    /// per batch once the whole batch went through the transformers and the filter.
    pub fn process(&self) -> BoxStream<'static, EtlResult<StreamEntry>> {
        let components = self.components.clone();
        let filter = self.filter.clone();
        let write_many = self.batch.write_many;
        let mut batches = BatchStream::wrap(self.read(), self.batch.batch_size);

        Box::pin(stream! {
            while let Some(batch) = batches.next().await {
                debug!(size = batch.len(), "processing batch");

                // Batch results in read order, `None` marks entries waiting for the group write.
                let mut results: Vec<Option<StreamEntry>> = Vec::with_capacity(batch.len());
                let mut write_group = Vec::new();
                let mut fatal = None;

                for item in batch {
                    let staged = item.and_then(|entry| {
                        stage(&components.transformers, filter.as_ref(), entry)
                    });

                    match staged {
                        Ok(Staged::Done(entry)) if write_many => results.push(Some(entry)),
                        Ok(Staged::Done(entry)) => {
                            yield Ok(entry);
                        }
                        Ok(Staged::Write(entry)) if write_many => {
                            results.push(None);
                            write_group.push(entry);
                        }
                        Ok(Staged::Write(entry)) => {
                            match write_one(&components.writers, entry).await {
                                Ok(written) => {
                                    yield Ok(written);
                                }
                                Err(err) => {
                                    yield Err(err);
                                    return;
                                }
                            }
                        }
                        Err(err) => {
                            fatal = Some(err);
                            break;
                        }
                    }
                }

                if !write_group.is_empty() {
                    match write_batch(&components.writers, write_group).await {
                        Ok(written) => {
                            let mut written = written.into_iter();
                            for slot in results.iter_mut().filter(|slot| slot.is_none()) {
                                *slot = written.next();
                            }
                        }
                        Err(err) => {
                            yield Err(err);
                            return;
                        }
                    }
                }

                for entry in results.into_iter().flatten() {
                    yield Ok(entry);
                }

                if let Some(err) = fatal {
                    yield Err(err);
                    return;
                }
            }
        })
    }
}

impl fmt::Debug for DataStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names = |names: Vec<&'static str>| names.join(", ");

        f.debug_struct("DataStream")
            .field(
                "readers",
                &names(self.components.readers.iter().map(|r| r.name()).collect()),
            )
            .field(
                "transformers",
                &names(self.components.transformers.iter().map(|t| t.name()).collect()),
            )
            .field(
                "writers",
                &names(self.components.writers.iter().map(|w| w.name()).collect()),
            )
            .field("batch", &self.batch)
            .finish()
    }
}

/// Turns entry-scoped errors of `reader` into errored entries carrying `input`.
fn tag_reader_errors(
    reader: &'static str,
    items: ReaderStream,
    input: Payload,
) -> BoxStream<'static, ChainItem> {
    items
        .map(move |item| match item {
            Ok(payload) => Ok(Ok(payload)),
            Err(err) if err.is_entry_scoped() => {
                Ok(Err(StreamEntry::new(input.clone()).with_stage_error(reader, &err)))
            }
            Err(err) => Err(err),
        })
        .boxed()
}

/// What is left to do with an entry once it went through the transformers and the filter.
enum Staged {
    /// Errored or filtered, only reported.
    Done(StreamEntry),
    Write(StreamEntry),
}

fn stage(
    transformers: &[Box<dyn Transformer>],
    filter: Option<&EntryFilter>,
    entry: StreamEntry,
) -> EtlResult<Staged> {
    if entry.has_errors() {
        return Ok(Staged::Done(entry));
    }

    match transform(transformers, entry)? {
        Err(errored) => Ok(Staged::Done(errored)),
        Ok(entry) => match filter {
            Some(filter) if filter(&entry) => Ok(Staged::Done(entry.into_filtered())),
            _ => Ok(Staged::Write(entry)),
        },
    }
}

/// Applies `transformers` in order, stopping at the first failure.
fn transform(
    transformers: &[Box<dyn Transformer>],
    entry: StreamEntry,
) -> EtlResult<Result<StreamEntry, StreamEntry>> {
    let mut current = entry;
    for transformer in transformers {
        match transformer.apply(&current) {
            Ok(next) => current = next,
            Err(err) if err.is_entry_scoped() => {
                return Ok(Err(current.with_stage_error(transformer.name(), &err)));
            }
            Err(err) => return Err(err),
        }
    }

    Ok(Ok(current))
}

/// Writes one entry. An entry failing in one writer is not handed to the next ones.
async fn write_one(writers: &[Box<dyn Writer>], entry: StreamEntry) -> EtlResult<StreamEntry> {
    let mut current = entry;
    for writer in writers {
        match writer.write(&current).await {
            Ok(next) => current = next,
            Err(err) if err.is_entry_scoped() => {
                return Ok(current.with_stage_error(writer.name(), &err));
            }
            Err(err) => return Err(err),
        }
    }

    Ok(current)
}

/// Writes the group through `write_many` of every writer, mapping results back by position.
async fn write_batch(
    writers: &[Box<dyn Writer>],
    entries: Vec<StreamEntry>,
) -> EtlResult<Vec<StreamEntry>> {
    let mut group = entries;
    for writer in writers {
        let positions: Vec<usize> = (0..group.len())
            .filter(|&position| !group[position].has_errors())
            .collect();
        if positions.is_empty() {
            break;
        }

        let pending: Vec<StreamEntry> = positions.iter().map(|&p| group[p].clone()).collect();
        match writer.write_many(pending).await {
            Ok(written) if written.len() == positions.len() => {
                for (position, entry) in positions.into_iter().zip(written) {
                    group[position] = entry;
                }
            }
            Ok(written) => {
                let err = etl_error!(
                    ErrorKind::WriteFailed,
                    "Writer returned a wrong number of entries",
                    format!("expected {}, got {}", positions.len(), written.len())
                );
                for position in positions {
                    group[position] = group[position].clone().with_stage_error(writer.name(), &err);
                }
            }
            Err(err) if err.is_entry_scoped() => {
                warn!(writer = writer.name(), %err, "batch write failed");
                for position in positions {
                    group[position] = group[position].clone().with_stage_error(writer.name(), &err);
                }
            }
            Err(err) => return Err(err),
        }
    }

    Ok(group)
}

/// Outcome counters of a datastream run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunReport {
    pub total: usize,
    pub succeeded: usize,
    pub errored: usize,
    pub filtered: usize,
}

impl RunReport {
    /// Counts `entry` as errored, filtered or succeeded, in that order of precedence.
    pub fn record(&mut self, entry: &StreamEntry) {
        self.total += 1;
        if entry.has_errors() {
            self.errored += 1;
        } else if entry.filtered {
            self.filtered += 1;
        } else {
            self.succeeded += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::components::{FailingWriter, TestReader, TestTransformer};
    use crate::test_utils::test_writer_wrapper::TestWriterWrapper;
    use crate::writers::YamlWriter;
    use crate::writers::yaml::YamlWriterArgs;
    use futures::TryStreamExt;
    use serde_json::json;

    fn datastream(values: Vec<Value>, writers: Vec<Box<dyn Writer>>, batch: BatchConfig) -> DataStream {
        DataStream::new(
            vec![Box::new(TestReader::new(values))],
            vec![Box::new(TestTransformer)],
            writers,
            batch,
        )
        .unwrap()
    }

    fn yaml_writer(dir: &tempfile::TempDir) -> Box<dyn Writer> {
        Box::new(YamlWriter::new(YamlWriterArgs {
            filepath: dir.path().join("out.yaml"),
        }))
    }

    #[tokio::test]
    async fn transform_errors_do_not_reach_writers() {
        let dir = tempfile::tempdir().unwrap();
        let stream = datastream(vec![json!(1), json!(-1)], vec![yaml_writer(&dir)], BatchConfig::default());

        let results: Vec<_> = stream.process().try_collect().await.unwrap();

        assert_eq!(results.len(), 2);
        assert_eq!(results[0].value(), Some(&json!(2)));
        assert!(results[0].errors.is_empty());
        assert_eq!(results[1].value(), Some(&json!(-1)));
        assert_eq!(
            results[1].errors,
            vec!["TestTransformer: Value cannot be negative".to_string()]
        );

        let written = std::fs::read_to_string(dir.path().join("out.yaml")).unwrap();
        let written: Vec<Value> = serde_yaml::from_str(&written).unwrap();
        assert_eq!(written, vec![json!(2)]);
    }

    #[tokio::test]
    async fn filtered_entries_are_not_written() {
        let dir = tempfile::tempdir().unwrap();
        let stream = datastream(
            vec![json!(1), json!(2), json!(3)],
            vec![yaml_writer(&dir)],
            BatchConfig::default(),
        )
        .with_filter(|entry| entry.value() == Some(&json!(4)));

        let results: Vec<_> = stream.process().try_collect().await.unwrap();
        let mut report = RunReport::default();
        results.iter().for_each(|entry| report.record(entry));

        assert_eq!(results[2].value(), Some(&json!(4)));
        assert!(results[2].filtered);
        assert!(!results[0].filtered);
        assert_eq!(report, RunReport { total: 3, succeeded: 2, errored: 0, filtered: 1 });
    }

    #[tokio::test]
    async fn batched_writes_keep_read_order() {
        let dir = tempfile::tempdir().unwrap();
        let batch = BatchConfig {
            batch_size: 2,
            write_many: true,
        };
        let writer = TestWriterWrapper::wrap(YamlWriter::new(YamlWriterArgs {
            filepath: dir.path().join("out.yaml"),
        }));
        let written = writer.wait_for_entries(3).await;
        let stream = datastream(
            vec![json!(1), json!(-1), json!(2), json!(3), json!(-2)],
            vec![Box::new(writer.clone())],
            batch,
        );

        let results: Vec<_> = stream.process().try_collect().await.unwrap();
        let values: Vec<_> = results.iter().map(|e| e.value().cloned().unwrap()).collect();

        assert_eq!(values, vec![json!(2), json!(-1), json!(3), json!(4), json!(-2)]);

        written.notified().await;
        // The last batch has nothing left to write.
        assert_eq!(writer.write_many_calls().await, 2);
        let written: Vec<_> = writer
            .entries()
            .await
            .iter()
            .map(|e| e.value().cloned().unwrap())
            .collect();
        assert_eq!(written, vec![json!(2), json!(3), json!(4)]);
    }

    #[tokio::test]
    async fn writer_errors_stop_later_writers() {
        let dir = tempfile::tempdir().unwrap();
        let stream = datastream(
            vec![json!(1)],
            vec![Box::new(FailingWriter), yaml_writer(&dir)],
            BatchConfig::default(),
        );

        let results: Vec<_> = stream.process().try_collect().await.unwrap();

        assert_eq!(results[0].errors, vec!["FailingWriter: Write refused: 2".to_string()]);
        assert!(!dir.path().join("out.yaml").exists());
    }

    #[tokio::test]
    async fn failed_batch_marks_every_entry() {
        let stream = datastream(
            vec![json!(1), json!(2)],
            vec![Box::new(FailingWriter)],
            BatchConfig {
                batch_size: 10,
                write_many: true,
            },
        );

        let results: Vec<_> = stream.process().try_collect().await.unwrap();

        assert_eq!(results.len(), 2);
        assert!(results.iter().all(|entry| entry.errors.len() == 1));
    }

    #[test]
    fn chained_reader_must_accept_items() {
        let result = DataStream::new(
            vec![
                Box::new(TestReader::new(vec![])),
                Box::new(crate::readers::SparqlReader::new(
                    crate::readers::sparql::SparqlReaderArgs {
                        origin: "http://localhost/sparql".to_string(),
                        query: "SELECT * WHERE {}".to_string(),
                    },
                )),
            ],
            vec![],
            vec![Box::new(FailingWriter)],
            BatchConfig::default(),
        );

        assert_eq!(result.unwrap_err().kind(), ErrorKind::UnsupportedReaderMode);
    }
}
