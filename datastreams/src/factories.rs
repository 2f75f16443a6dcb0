//! Building datastreams from declarative configuration.
//!
//! A [`Registry`] maps the `type` of every component spec to a constructor. Constructors receive
//! the raw `args` mapping and a [`FactoryContext`] holding the shared resources (record services,
//! the task queue). Everything is built eagerly, so a bad configuration fails before anything is
//! read.

use datastreams_config::shared::{ComponentConfig, DataStreamConfig};
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::datastream::DataStream;
use crate::error::{ErrorKind, EtlResult};
use crate::readers::archive::{ArchiveReaderArgs, GzReaderArgs, TarReaderArgs};
use crate::readers::formats::{CsvReaderArgs, FileReaderArgs, XmlReaderArgs};
use crate::readers::http::{HttpReaderArgs, RorHttpReaderArgs};
use crate::readers::oaipmh::OaiPmhReaderArgs;
use crate::readers::sparql::SparqlReaderArgs;
use crate::readers::{
    CsvReader, GzReader, JsonLinesReader, JsonReader, OaiPmhReader, RdfReader, Reader,
    RorHttpReader, SimpleHttpReader, SparqlReader, TarReader, XmlReader, YamlReader, ZipReader,
};
use crate::service::{IdStrategy, RecordService};
use crate::tasks::TaskQueue;
use crate::transformers::ror::RorTransformerArgs;
use crate::transformers::xml::XmlTransformerArgs;
use crate::transformers::{RorTransformer, Transformer, XmlTransformer};
use crate::writers::async_writer::AsyncWriterArgs;
use crate::writers::service::ServiceWriterArgs;
use crate::writers::yaml::YamlWriterArgs;
use crate::writers::{AsyncWriter, ServiceWriter, Writer, YamlWriter};
use crate::{bail, etl_error};

/// DOI prefix of the Crossref funder registry.
pub const FUNDREF_DOI_PREFIX: &str = "10.13039";

/// Default record service of the generic `service` writer.
pub const DEFAULT_SERVICE: &str = "vocabularies";

pub type ReaderConstructor =
    Arc<dyn Fn(&Value, &FactoryContext) -> EtlResult<Box<dyn Reader>> + Send + Sync>;
pub type TransformerConstructor =
    Arc<dyn Fn(&Value, &FactoryContext) -> EtlResult<Box<dyn Transformer>> + Send + Sync>;
pub type WriterConstructor =
    Arc<dyn Fn(&Value, &FactoryContext) -> EtlResult<Box<dyn Writer>> + Send + Sync>;

/// Deserializes component arguments, a missing (`null`) mapping meaning no arguments.
pub fn parse_args<T: DeserializeOwned>(kind: &str, name: &str, args: &Value) -> EtlResult<T> {
    let args = match args {
        Value::Null => Value::Object(Map::new()),
        args => args.clone(),
    };

    serde_json::from_value(args).map_err(|err| {
        etl_error!(
            ErrorKind::InvalidComponentArgs,
            "Invalid component arguments",
            format!("{kind} {name}: {err}")
        )
    })
}

/// Resources shared by the components built from a configuration.
#[derive(Clone, Default)]
pub struct FactoryContext {
    services: HashMap<String, Arc<dyn RecordService>>,
    task_queue: Option<TaskQueue>,
}

impl FactoryContext {
    /// Makes `service` available to service writers under `name`.
    pub fn with_service(mut self, name: impl Into<String>, service: Arc<dyn RecordService>) -> Self {
        self.services.insert(name.into(), service);
        self
    }

    pub fn with_task_queue(mut self, queue: TaskQueue) -> Self {
        self.task_queue = Some(queue);
        self
    }

    pub fn service(&self, name: &str) -> EtlResult<Arc<dyn RecordService>> {
        match self.services.get(name) {
            Some(service) => Ok(service.clone()),
            None => bail!(
                ErrorKind::ComponentNotConfigured,
                "Record service not configured",
                name
            ),
        }
    }

    pub fn task_queue(&self) -> EtlResult<TaskQueue> {
        match &self.task_queue {
            Some(queue) => Ok(queue.clone()),
            None => bail!(ErrorKind::ComponentNotConfigured, "Task queue not configured"),
        }
    }
}

impl fmt::Debug for FactoryContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut services: Vec<_> = self.services.keys().collect();
        services.sort();

        f.debug_struct("FactoryContext")
            .field("services", &services)
            .field("task_queue", &self.task_queue.is_some())
            .finish()
    }
}

/// Component constructors by registered name, one map per component kind.
#[derive(Clone)]
pub struct Registry {
    readers: HashMap<String, ReaderConstructor>,
    transformers: HashMap<String, TransformerConstructor>,
    writers: HashMap<String, WriterConstructor>,
}

impl Registry {
    /// A registry without any component.
    pub fn empty() -> Self {
        Self {
            readers: HashMap::new(),
            transformers: HashMap::new(),
            writers: HashMap::new(),
        }
    }

    pub fn register_reader<F>(&mut self, name: impl Into<String>, constructor: F)
    where
        F: Fn(&Value, &FactoryContext) -> EtlResult<Box<dyn Reader>> + Send + Sync + 'static,
    {
        self.readers.insert(name.into(), Arc::new(constructor));
    }

    pub fn register_transformer<F>(&mut self, name: impl Into<String>, constructor: F)
    where
        F: Fn(&Value, &FactoryContext) -> EtlResult<Box<dyn Transformer>> + Send + Sync + 'static,
    {
        self.transformers.insert(name.into(), Arc::new(constructor));
    }

    pub fn register_writer<F>(&mut self, name: impl Into<String>, constructor: F)
    where
        F: Fn(&Value, &FactoryContext) -> EtlResult<Box<dyn Writer>> + Send + Sync + 'static,
    {
        self.writers.insert(name.into(), Arc::new(constructor));
    }

    pub fn reader(
        &self,
        config: &ComponentConfig,
        context: &FactoryContext,
    ) -> EtlResult<Box<dyn Reader>> {
        let constructor = lookup(&self.readers, "Reader", &config.type_)?;
        constructor(&config.args, context)
    }

    pub fn transformer(
        &self,
        config: &ComponentConfig,
        context: &FactoryContext,
    ) -> EtlResult<Box<dyn Transformer>> {
        let constructor = lookup(&self.transformers, "Transformer", &config.type_)?;
        constructor(&config.args, context)
    }

    pub fn writer(
        &self,
        config: &ComponentConfig,
        context: &FactoryContext,
    ) -> EtlResult<Box<dyn Writer>> {
        let constructor = lookup(&self.writers, "Writer", &config.type_)?;
        constructor(&config.args, context)
    }

    fn register_builtin_readers(&mut self) {
        self.register_reader("zip", |args, _| {
            let args: ArchiveReaderArgs = parse_args("Reader", "zip", args)?;
            Ok(Box::new(ZipReader::new(args)?))
        });
        self.register_reader("tar", |args, _| {
            let args: TarReaderArgs = parse_args("Reader", "tar", args)?;
            Ok(Box::new(TarReader::new(args)?))
        });
        self.register_reader("gzip", |args, _| {
            let args: GzReaderArgs = parse_args("Reader", "gzip", args)?;
            Ok(Box::new(GzReader::new(args)))
        });
        self.register_reader("json", |args, _| {
            let args: FileReaderArgs = parse_args("Reader", "json", args)?;
            Ok(Box::new(JsonReader::new(args)))
        });
        self.register_reader("jsonl", |args, _| {
            let args: FileReaderArgs = parse_args("Reader", "jsonl", args)?;
            Ok(Box::new(JsonLinesReader::new(args)))
        });
        self.register_reader("yaml", |args, _| {
            let args: FileReaderArgs = parse_args("Reader", "yaml", args)?;
            Ok(Box::new(YamlReader::new(args)))
        });
        self.register_reader("csv", |args, _| {
            let args: CsvReaderArgs = parse_args("Reader", "csv", args)?;
            Ok(Box::new(CsvReader::new(args)?))
        });
        self.register_reader("xml", |args, _| {
            let args: XmlReaderArgs = parse_args("Reader", "xml", args)?;
            Ok(Box::new(XmlReader::new(args)))
        });
        self.register_reader("rdf", |args, _| {
            let args: FileReaderArgs = parse_args("Reader", "rdf", args)?;
            Ok(Box::new(RdfReader::new(args)))
        });
        self.register_reader("http", |args, _| {
            let args: HttpReaderArgs = parse_args("Reader", "http", args)?;
            Ok(Box::new(SimpleHttpReader::new(args)?))
        });
        self.register_reader("ror-http", |args, _| {
            let args: RorHttpReaderArgs = parse_args("Reader", "ror-http", args)?;
            Ok(Box::new(RorHttpReader::new(args)))
        });
        self.register_reader("oaipmh", |args, _| {
            let args: OaiPmhReaderArgs = parse_args("Reader", "oaipmh", args)?;
            Ok(Box::new(OaiPmhReader::new(args)))
        });
        self.register_reader("sparql", |args, _| {
            let args: SparqlReaderArgs = parse_args("Reader", "sparql", args)?;
            Ok(Box::new(SparqlReader::new(args)))
        });
    }

    fn register_builtin_transformers(&mut self) {
        self.register_transformer("xml", |args, _| {
            let args: XmlTransformerArgs = parse_args("Transformer", "xml", args)?;
            Ok(Box::new(XmlTransformer::new(args)))
        });
        for name in ["ror", "ror-affiliations"] {
            self.register_transformer(name, move |args, _| {
                let args: RorTransformerArgs = parse_args("Transformer", name, args)?;
                Ok(Box::new(RorTransformer::new(args)))
            });
        }
        self.register_transformer("ror-funder", |args, _| {
            let mut args: RorTransformerArgs = parse_args("Transformer", "ror-funder", args)?;
            args.funder_fundref_doi_prefix
                .get_or_insert_with(|| FUNDREF_DOI_PREFIX.to_string());
            Ok(Box::new(RorTransformer::new(args)))
        });
    }

    fn register_builtin_writers(&mut self) {
        let service_writers = [
            ("service", DEFAULT_SERVICE, IdStrategy::TypeAndId),
            ("affiliations-service", "affiliations", IdStrategy::IdOnly),
            ("awards-service", "awards", IdStrategy::IdOnly),
            ("funders-service", "funders", IdStrategy::IdOnly),
            ("names-service", "names", IdStrategy::IdOnly),
            ("subjects-service", "subjects", IdStrategy::IdOnly),
        ];
        for (name, default_service, default_strategy) in service_writers {
            self.register_writer(name, move |args, context| {
                let args: ServiceWriterArgs = parse_args("Writer", name, args)?;
                let service = context.service(args.service.as_deref().unwrap_or(default_service))?;
                let strategy = args.id_strategy.unwrap_or(default_strategy);

                Ok(Box::new(ServiceWriter::new(
                    service,
                    args.insert,
                    args.update,
                    strategy,
                )))
            });
        }

        self.register_writer("yaml", |args, _| {
            let args: YamlWriterArgs = parse_args("Writer", "yaml", args)?;
            Ok(Box::new(YamlWriter::new(args)))
        });
        self.register_writer("async", |args, context| {
            let args: AsyncWriterArgs = parse_args("Writer", "async", args)?;
            Ok(Box::new(AsyncWriter::new(args, context.task_queue()?)))
        });
    }
}

impl Default for Registry {
    /// A registry holding every built-in component.
    fn default() -> Self {
        let mut registry = Self::empty();
        registry.register_builtin_readers();
        registry.register_builtin_transformers();
        registry.register_builtin_writers();

        registry
    }
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fn names(mut names: Vec<&String>) -> Vec<&String> {
            names.sort();
            names
        }

        f.debug_struct("Registry")
            .field("readers", &names(self.readers.keys().collect()))
            .field("transformers", &names(self.transformers.keys().collect()))
            .field("writers", &names(self.writers.keys().collect()))
            .finish()
    }
}

fn lookup<'a, C>(constructors: &'a HashMap<String, C>, kind: &str, name: &str) -> EtlResult<&'a C> {
    match constructors.get(name) {
        Some(constructor) => Ok(constructor),
        None => bail!(
            ErrorKind::ComponentNotConfigured,
            "Component not configured",
            format!("{kind} {name} not configured.")
        ),
    }
}

/// Builds datastreams and single components from configuration.
#[derive(Debug, Clone)]
pub struct DataStreamFactory {
    registry: Arc<Registry>,
    context: FactoryContext,
}

impl DataStreamFactory {
    /// A factory using the built-in components.
    pub fn new(context: FactoryContext) -> Self {
        Self::with_registry(Registry::default(), context)
    }

    pub fn with_registry(registry: Registry, context: FactoryContext) -> Self {
        Self {
            registry: Arc::new(registry),
            context,
        }
    }

    pub fn context(&self) -> &FactoryContext {
        &self.context
    }

    /// A factory sharing the registry of this one, whose async writers use `queue`.
    pub fn with_task_queue(&self, queue: TaskQueue) -> Self {
        Self {
            registry: self.registry.clone(),
            context: self.context.clone().with_task_queue(queue),
        }
    }

    pub fn reader(&self, config: &ComponentConfig) -> EtlResult<Box<dyn Reader>> {
        self.registry.reader(config, &self.context)
    }

    pub fn transformer(&self, config: &ComponentConfig) -> EtlResult<Box<dyn Transformer>> {
        self.registry.transformer(config, &self.context)
    }

    pub fn writer(&self, config: &ComponentConfig) -> EtlResult<Box<dyn Writer>> {
        self.registry.writer(config, &self.context)
    }

    /// Validates `config` and builds every component it names.
    pub fn create(&self, config: &DataStreamConfig) -> EtlResult<DataStream> {
        config.validate()?;

        let readers = config
            .readers
            .iter()
            .map(|reader| self.reader(reader))
            .collect::<EtlResult<Vec<_>>>()?;
        let transformers = config
            .transformers
            .iter()
            .map(|transformer| self.transformer(transformer))
            .collect::<EtlResult<Vec<_>>>()?;
        let writers = config
            .writers
            .iter()
            .map(|writer| self.writer(writer))
            .collect::<EtlResult<Vec<_>>>()?;

        DataStream::new(readers, transformers, writers, config.batch.clone())
    }
}
