use datastreams::tasks::{TaskQueue, TaskReport};
use datastreams_config::shared::DataStreamConfig;
use datastreams_telemetry::init_test_tracing;
use futures::TryStreamExt;

use crate::support::memory_factory;

mod support;

fn async_config(origin: &std::path::Path, write_many: bool) -> DataStreamConfig {
    DataStreamConfig::from_yaml_str(&format!(
        r#"
readers:
  - type: json
    args:
      origin: {}
transformers:
  - type: test
writers:
  - type: async
    args:
      writer:
        type: service
batch_size: 2
write_many: {write_many}
"#,
        origin.display()
    ))
    .unwrap()
}

#[tokio::test(flavor = "multi_thread")]
async fn async_writer_returns_entries_and_writes_in_background() {
    init_test_tracing();
    let (factory, services) = memory_factory();
    let (queue, handle) = TaskQueue::start(factory.clone());
    let dir = tempfile::tempdir().unwrap();
    let origin = dir.path().join("numbers.json");
    std::fs::write(&origin, "[1, -1, 2]").unwrap();

    let results: Vec<_> = factory
        .with_task_queue(queue)
        .create(&async_config(&origin, false))
        .unwrap()
        .process()
        .try_collect()
        .await
        .unwrap();

    // Writes are only queued, the numbers never reach the store as records.
    assert_eq!(results.len(), 3);
    assert!(results.iter().all(|entry| entry.record.is_none()));
    assert_eq!(results[1].errors.len(), 1);

    let report = handle.wait().await.unwrap();

    // Numbers are not mappings, so every queued write fails in the service writer.
    assert_eq!(
        report,
        TaskReport {
            jobs: 2,
            succeeded: 0,
            errored: 2
        }
    );
    assert!(services.vocabularies.is_empty().await);
}

#[tokio::test(flavor = "multi_thread")]
async fn async_batches_become_one_job_each() {
    init_test_tracing();
    let (factory, services) = memory_factory();
    let (queue, handle) = TaskQueue::start(factory.clone());
    let dir = tempfile::tempdir().unwrap();
    let origin = dir.path().join("languages.json");
    std::fs::write(
        &origin,
        r#"[{"id": "eng", "type": "languages"}, {"id": "fra", "type": "languages"}, {"id": "deu", "type": "languages"}]"#,
    )
    .unwrap();
    let mut config = async_config(&origin, true);
    config.transformers.clear();

    let results: Vec<_> = factory
        .with_task_queue(queue)
        .create(&config)
        .unwrap()
        .process()
        .try_collect()
        .await
        .unwrap();

    assert_eq!(results.len(), 3);
    assert!(results.iter().all(|entry| !entry.has_errors()));

    let report = handle.wait().await.unwrap();

    assert_eq!(
        report,
        TaskReport {
            jobs: 2,
            succeeded: 3,
            errored: 0
        }
    );
    assert_eq!(services.vocabularies.len().await, 3);
}
