use datastreams::datastream::RunReport;
use datastreams::error::ErrorKind;
use datastreams::service::RecordId;
use datastreams::types::Payload;
use datastreams_config::shared::DataStreamConfig;
use datastreams_telemetry::init_test_tracing;
use futures::{StreamExt, TryStreamExt};
use serde_json::{Value, json};

use datastreams::test_utils::components::RecordingTransformer;

use crate::support::{memory_factory, memory_factory_with, write_zip};

mod support;

#[tokio::test(flavor = "multi_thread")]
async fn transform_errors_are_reported_per_entry() {
    init_test_tracing();
    let (factory, _services) = memory_factory();
    let dir = tempfile::tempdir().unwrap();
    let config = DataStreamConfig::from_yaml_str(&format!(
        r#"
readers:
  - type: test
    args:
      origin: [1, -1]
transformers:
  - type: test
writers:
  - type: yaml
    args:
      filepath: {}
"#,
        dir.path().join("out.yaml").display()
    ))
    .unwrap();

    let results: Vec<_> = factory
        .create(&config)
        .unwrap()
        .process()
        .try_collect()
        .await
        .unwrap();

    assert_eq!(results.len(), 2);
    assert_eq!(results[0].value(), Some(&json!(2)));
    assert!(results[0].errors.is_empty());
    assert_eq!(results[1].value(), Some(&json!(-1)));
    assert_eq!(
        results[1].errors,
        vec!["TestTransformer: Value cannot be negative".to_string()]
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn malformed_archive_member_does_not_stop_siblings() {
    init_test_tracing();
    let (factory, services) = memory_factory();
    let dir = tempfile::tempdir().unwrap();
    let archive = write_zip(
        dir.path(),
        "languages.zip",
        &[
            ("a.json", r#"{"id": "eng", "type": "languages"}"#),
            ("bad.json", r#"{"id": "#),
            (
                "c.json",
                r#"[{"id": "fra", "type": "languages"}, {"id": "deu", "type": "languages"}]"#,
            ),
        ],
    );
    let config = DataStreamConfig::from_yaml_str(&format!(
        r#"
readers:
  - type: zip
    args:
      origin: {}
      regex: "\\.json$"
  - type: json
writers:
  - type: service
"#,
        archive.display()
    ))
    .unwrap();

    let results: Vec<_> = factory
        .create(&config)
        .unwrap()
        .process()
        .try_collect()
        .await
        .unwrap();

    let ids: Vec<_> = results
        .iter()
        .map(|entry| entry.value().and_then(|v| v.get("id")).cloned())
        .collect();
    assert_eq!(
        ids,
        vec![Some(json!("eng")), None, Some(json!("fra")), Some(json!("deu"))]
    );

    let errored = &results[1];
    assert_eq!(errored.errors.len(), 1);
    assert!(errored.errors[0].starts_with("JsonReader: "));
    assert!(errored.errors[0].contains("bad.json"));
    assert!(matches!(&errored.entry, Payload::Bytes(blob) if blob.display_name() == "bad.json"));

    assert_eq!(services.vocabularies.len().await, 3);
}

#[tokio::test(flavor = "multi_thread")]
async fn read_errors_never_reach_transformers() {
    init_test_tracing();
    let recorder = RecordingTransformer::new();
    let registered = recorder.clone();
    let (factory, _services) = memory_factory_with(move |registry| {
        registry.register_transformer("record", move |_, _| Ok(Box::new(registered.clone())));
    });
    let dir = tempfile::tempdir().unwrap();
    let archive = write_zip(
        dir.path(),
        "languages.zip",
        &[
            ("a.json", r#"{"id": "eng", "type": "languages"}"#),
            ("bad.json", r#"{"id": "#),
            ("c.json", r#"{"id": "fra", "type": "languages"}"#),
        ],
    );
    let config = DataStreamConfig::from_yaml_str(&format!(
        r#"
readers:
  - type: zip
    args:
      origin: {}
  - type: json
transformers:
  - type: record
writers:
  - type: service
"#,
        archive.display()
    ))
    .unwrap();

    let results: Vec<_> = factory
        .create(&config)
        .unwrap()
        .process()
        .try_collect()
        .await
        .unwrap();

    assert_eq!(results.len(), 3);
    assert_eq!(results[1].errors.len(), 1);
    assert_eq!(
        recorder.seen(),
        vec![
            Payload::Value(json!({"id": "eng", "type": "languages"})),
            Payload::Value(json!({"id": "fra", "type": "languages"})),
        ]
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn ror_dump_is_loaded_into_funders() {
    init_test_tracing();
    let (factory, services) = memory_factory();
    let dir = tempfile::tempdir().unwrap();
    let record = json!([
        {
            "id": "https://ror.org/05dxps055",
            "names": [
                {"value": "California Institute of Technology", "types": ["ror_display", "label"], "lang": "en"},
                {"value": "Caltech", "types": ["acronym"], "lang": null}
            ],
            "locations": [{"geonames_details": {"country_code": "US", "name": "Pasadena"}}],
            "external_ids": [
                {"type": "fundref", "all": ["100006961"], "preferred": "100006961"}
            ],
            "status": "active",
            "types": ["education"]
        },
        {"id": "not a ror id", "names": []}
    ]);
    let archive = write_zip(
        dir.path(),
        "ror.zip",
        &[("v1.50-ror-data.json", &record.to_string())],
    );
    let config = DataStreamConfig::from_yaml_str(&format!(
        r#"
readers:
  - type: zip
    args:
      origin: {}
      regex: "\\.json$"
  - type: json
transformers:
  - type: ror-funder
writers:
  - type: funders-service
batch_size: 10
write_many: true
"#,
        archive.display()
    ))
    .unwrap();

    let mut report = RunReport::default();
    let mut results = factory.create(&config).unwrap().process();
    while let Some(result) = results.next().await {
        report.record(&result.unwrap());
    }

    assert_eq!(
        report,
        RunReport {
            total: 2,
            succeeded: 1,
            errored: 1,
            filtered: 0
        }
    );

    let funder = services
        .funders
        .get(&RecordId::new("05dxps055"))
        .await
        .unwrap();
    assert_eq!(funder["acronym"], json!("Caltech"));
    assert_eq!(funder["country"], json!("US"));
    assert_eq!(
        funder["identifiers"],
        json!([
            {"scheme": "ror", "identifier": "05dxps055"},
            {"scheme": "doi", "identifier": "10.13039/100006961"}
        ])
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn batches_are_written_with_one_call_each() {
    init_test_tracing();
    let (factory, services) = memory_factory();
    let values: Vec<Value> = (0..5)
        .map(|i| json!({"id": format!("lang-{i}"), "type": "languages"}))
        .collect();
    let dir = tempfile::tempdir().unwrap();
    let origin = dir.path().join("languages.json");
    std::fs::write(&origin, Value::Array(values).to_string()).unwrap();
    let config = DataStreamConfig::from_yaml_str(&format!(
        r#"
readers:
  - type: json
    args:
      origin: {}
writers:
  - type: service
batch_size: 2
write_many: true
"#,
        origin.display()
    ))
    .unwrap();

    let results: Vec<_> = factory
        .create(&config)
        .unwrap()
        .process()
        .try_collect()
        .await
        .unwrap();

    let ids: Vec<_> = results
        .iter()
        .map(|entry| entry.record.as_ref().unwrap()["id"].clone())
        .collect();
    assert_eq!(
        ids,
        vec![
            json!("lang-0"),
            json!("lang-1"),
            json!("lang-2"),
            json!("lang-3"),
            json!("lang-4")
        ]
    );
    assert_eq!(services.vocabularies.len().await, 5);
}

#[tokio::test(flavor = "multi_thread")]
async fn missing_origin_ends_the_run() {
    init_test_tracing();
    let (factory, _services) = memory_factory();
    let config = DataStreamConfig::from_yaml_str(
        r#"
readers:
  - type: json
    args:
      origin: /does/not/exist.json
writers:
  - type: service
"#,
    )
    .unwrap();

    let results: Vec<_> = factory.create(&config).unwrap().process().collect().await;

    assert_eq!(results.len(), 1);
    assert_eq!(results[0].as_ref().unwrap_err().kind(), ErrorKind::IoError);
}

#[tokio::test(flavor = "multi_thread")]
async fn unknown_components_fail_before_reading() {
    init_test_tracing();
    let (factory, _services) = memory_factory();
    let config = DataStreamConfig::from_yaml_str(
        "readers:\n  - type: foo\nwriters:\n  - type: service\n",
    )
    .unwrap();

    let err = factory.create(&config).err().unwrap();

    assert_eq!(err.kind(), ErrorKind::ComponentNotConfigured);
    assert!(err.message().contains("Reader foo not configured."));
}
