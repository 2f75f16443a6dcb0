use clap::{Args, Parser, Subcommand};
use datastreams::datastream::RunReport;
use datastreams::factories::{DataStreamFactory, FactoryContext};
use datastreams::fixtures::VocabularyFixture;
use datastreams::service::{IdStrategy, MemoryRecordService, RecordService};
use datastreams::tasks::TaskQueue;
use datastreams_config::shared::{ComponentConfig, DataStreamConfig, ImporterConfig};
use futures::StreamExt;
use serde_json::{Value, json};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info};

use crate::config::datastream_config;

/// Record services the built-in service writers resolve by name.
const SERVICE_NAMES: [(&str, IdStrategy); 6] = [
    ("vocabularies", IdStrategy::TypeAndId),
    ("affiliations", IdStrategy::IdOnly),
    ("awards", IdStrategy::IdOnly),
    ("funders", IdStrategy::IdOnly),
    ("names", IdStrategy::IdOnly),
    ("subjects", IdStrategy::IdOnly),
];

#[derive(Debug, Parser)]
#[command(name = "vocabularies", version, about, arg_required_else_help = true)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Import a vocabulary, failing entries that already exist.
    Import(VocabularyArgs),
    /// Update the existing entries of a vocabulary.
    Update(VocabularyArgs),
    /// Convert a vocabulary into a YAML file instead of writing it to the store.
    Convert {
        #[command(flatten)]
        args: VocabularyArgs,
        /// YAML file the converted entries are appended to
        #[arg(short, long)]
        target: PathBuf,
    },
    /// Load every vocabulary of a fixtures file.
    Fixtures {
        /// YAML mapping of vocabulary id to datastream
        #[arg(short, long)]
        filepath: PathBuf,
    },
}

#[derive(Debug, Args)]
pub struct VocabularyArgs {
    /// Name of the vocabulary to process
    #[arg(short, long)]
    pub vocabulary: String,
    #[command(flatten)]
    pub source: SourceArgs,
    /// Stop after this many entries
    #[arg(short, long)]
    pub num_samples: Option<usize>,
}

#[derive(Debug, Args)]
#[group(required = true, multiple = true)]
pub struct SourceArgs {
    /// YAML file holding the datastream of the vocabulary
    #[arg(short, long)]
    pub filepath: Option<PathBuf>,
    /// Overrides the origin of the first reader
    #[arg(short, long)]
    pub origin: Option<String>,
}

/// Runs `command` against in-memory record services.
pub async fn run(command: Command, config: &ImporterConfig) -> anyhow::Result<()> {
    let factory = memory_factory();

    match command {
        Command::Import(args) => {
            let datastream = resolve(config, &args)?;
            import(&factory, &args.vocabulary, &datastream, args.num_samples).await?;
        }
        Command::Update(args) => {
            let mut datastream = resolve(config, &args)?;
            force_update(&mut datastream);
            import(&factory, &args.vocabulary, &datastream, args.num_samples).await?;
        }
        Command::Convert { args, target } => {
            let mut datastream = resolve(config, &args)?;
            datastream.writers = vec![ComponentConfig::with_args(
                "yaml",
                json!({"filepath": target}),
            )];
            import(&factory, &args.vocabulary, &datastream, args.num_samples).await?;
        }
        Command::Fixtures { filepath } => {
            let fixtures = VocabularyFixture::new(filepath, factory).load().await?;
            for fixture in fixtures {
                print_report(&fixture.vocabulary, &fixture.report);
            }
        }
    }

    Ok(())
}

fn memory_factory() -> DataStreamFactory {
    let context = SERVICE_NAMES
        .into_iter()
        .fold(FactoryContext::default(), |context, (name, strategy)| {
            let service: Arc<dyn RecordService> = Arc::new(MemoryRecordService::new(strategy));
            context.with_service(name, service)
        });

    DataStreamFactory::new(context)
}

fn resolve(config: &ImporterConfig, args: &VocabularyArgs) -> anyhow::Result<DataStreamConfig> {
    datastream_config(
        config,
        &args.vocabulary,
        args.source.filepath.as_deref(),
        args.source.origin.as_deref(),
    )
}

/// Turns every service writer into an update-only writer.
fn force_update(datastream: &mut DataStreamConfig) {
    for writer in &mut datastream.writers {
        if writer.type_ == "service" || writer.type_.ends_with("-service") {
            writer.set_arg("insert", Value::Bool(false));
            writer.set_arg("update", Value::Bool(true));
        }
    }
}

/// Processes the datastream of `vocabulary`, waiting for queued writes before reporting.
async fn import(
    factory: &DataStreamFactory,
    vocabulary: &str,
    config: &DataStreamConfig,
    num_samples: Option<usize>,
) -> anyhow::Result<RunReport> {
    info!(vocabulary, "processing vocabulary");

    let (queue, handle) = TaskQueue::start(factory.clone());
    let datastream = factory.with_task_queue(queue).create(config)?;

    let mut results = datastream.process();
    if let Some(num_samples) = num_samples {
        results = results.take(num_samples).boxed();
    }

    let mut report = RunReport::default();
    while let Some(result) = results.next().await {
        let entry = result?;
        report.record(&entry);
        for err in &entry.errors {
            error!(vocabulary, entry = %entry.entry, "{err}");
        }
    }
    if num_samples.is_some_and(|num_samples| report.total == num_samples) {
        info!(vocabulary, num_samples, "number of samples reached");
    }

    let tasks = handle.wait().await?;
    if tasks.jobs > 0 {
        info!(
            vocabulary,
            jobs = tasks.jobs,
            succeeded = tasks.succeeded,
            errored = tasks.errored,
            "queued writes completed"
        );
    }

    print_report(vocabulary, &report);

    Ok(report)
}

fn print_report(vocabulary: &str, report: &RunReport) {
    println!(
        "Vocabulary {vocabulary} loaded. Total items {}. {} items succeeded, {} contained errors, {} filtered.",
        report.total, report.succeeded, report.errored, report.filtered
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn update_forces_service_writers_to_update_only() {
        let mut datastream = DataStreamConfig::from_yaml_str(
            "readers:\n  - type: json\nwriters:\n  - type: names-service\n  - type: yaml\n    args:\n      filepath: out.yaml\n",
        )
        .unwrap();

        force_update(&mut datastream);

        assert_eq!(
            datastream.writers[0].args,
            json!({"insert": false, "update": true})
        );
        assert_eq!(datastream.writers[1].args, json!({"filepath": "out.yaml"}));
    }

    #[test]
    fn import_requires_a_filepath_or_an_origin() {
        let err = Cli::try_parse_from(["vocabularies", "import", "--vocabulary", "names"]);
        assert!(err.is_err());

        let cli = Cli::try_parse_from([
            "vocabularies",
            "import",
            "-v",
            "names",
            "--origin",
            "names.yaml",
            "-n",
            "5",
        ])
        .unwrap();
        assert!(matches!(
            cli.command,
            Command::Import(VocabularyArgs {
                num_samples: Some(5),
                ..
            })
        ));
    }

    #[tokio::test]
    async fn import_counts_every_outcome() {
        let dir = tempfile::tempdir().unwrap();
        let origin = dir.path().join("languages.yaml");
        std::fs::write(
            &origin,
            "- id: eng\n  type: languages\n- id: eng\n  type: languages\n- title: no id\n",
        )
        .unwrap();
        let config = DataStreamConfig::from_yaml_str(&format!(
            "readers:\n  - type: yaml\n    args:\n      origin: {}\nwriters:\n  - type: service\n",
            origin.display()
        ))
        .unwrap();

        let report = import(&memory_factory(), "languages", &config, None)
            .await
            .unwrap();

        assert_eq!(
            report,
            RunReport {
                total: 3,
                succeeded: 1,
                errored: 2,
                filtered: 0
            }
        );
    }

    #[tokio::test]
    async fn convert_stops_after_the_requested_samples() {
        let dir = tempfile::tempdir().unwrap();
        let origin = dir.path().join("numbers.json");
        let target = dir.path().join("numbers.yaml");
        std::fs::write(&origin, "[1, 2, 3]").unwrap();
        let mut config = DataStreamConfig::from_yaml_str(&format!(
            "readers:\n  - type: json\n    args:\n      origin: {}\nwriters:\n  - type: service\n",
            origin.display()
        ))
        .unwrap();
        config.writers = vec![ComponentConfig::with_args(
            "yaml",
            json!({"filepath": target}),
        )];

        let report = import(&memory_factory(), "numbers", &config, Some(2))
            .await
            .unwrap();

        assert_eq!(report.total, 2);
        assert_eq!(report.succeeded, 2);
    }
}
