#![allow(dead_code)]

use datastreams::factories::{DataStreamFactory, FactoryContext, Registry};
use datastreams::service::{IdStrategy, MemoryRecordService, RecordService};
use datastreams::test_utils::components::register_test_components;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use zip::write::SimpleFileOptions;

/// Record services registered by [`memory_factory`].
pub struct MemoryServices {
    pub vocabularies: MemoryRecordService,
    pub funders: MemoryRecordService,
}

/// A factory with the built-in and test components, backed by in-memory record services.
pub fn memory_factory() -> (DataStreamFactory, MemoryServices) {
    memory_factory_with(|_| {})
}

/// Like [`memory_factory`], with extra components registered by `register`.
pub fn memory_factory_with(
    register: impl FnOnce(&mut Registry),
) -> (DataStreamFactory, MemoryServices) {
    let services = MemoryServices {
        vocabularies: MemoryRecordService::new(IdStrategy::TypeAndId),
        funders: MemoryRecordService::new(IdStrategy::IdOnly),
    };
    let context = FactoryContext::default()
        .with_service(
            "vocabularies",
            Arc::new(services.vocabularies.clone()) as Arc<dyn RecordService>,
        )
        .with_service(
            "funders",
            Arc::new(services.funders.clone()) as Arc<dyn RecordService>,
        );

    let mut registry = Registry::default();
    register_test_components(&mut registry);
    register(&mut registry);

    (DataStreamFactory::with_registry(registry, context), services)
}

/// Writes a ZIP archive holding `members` in the given order.
pub fn write_zip(dir: &Path, name: &str, members: &[(&str, &str)]) -> PathBuf {
    let path = dir.join(name);
    let file = std::fs::File::create(&path).unwrap();
    let mut zip = zip::ZipWriter::new(file);
    for (member, content) in members {
        zip.start_file(*member, SimpleFileOptions::default()).unwrap();
        zip.write_all(content.as_bytes()).unwrap();
    }
    zip.finish().unwrap();

    path
}
