#![forbid(unsafe_code)]

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use fermi_harness::context_generation::{self, ContextGenConfig};
use fermi_harness::experiment::{self, ContextMode, ExperimentConfig, RunSummary};
use fermi_harness::gateway::{BatchApiClient, ModelSelection, Provider, ProviderSettings};
use fermi_harness::retrieval;
use fermi_harness::{CsvTableStore, ExperimentType};

#[derive(Parser)]
#[command(name = "fermi", version, about = "Fermi estimation context experiments")]
struct Cli {
    /// Directory holding experiment_data/, results/ and batches/
    #[arg(long, global = true, default_value = ".")]
    data_dir: PathBuf,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Sample target question responses
    Run {
        #[arg(long, default_value = "gpt-3.5-turbo")]
        model: String,
        #[arg(long, default_value = "simple")]
        context_prompt: String,
        #[arg(long, default_value = "onlyanswer")]
        target_prompt: String,
        /// decrease, increase or neutral
        #[arg(long)]
        experiment_type: Option<ExperimentType>,
        /// Source model of the context questions; omit for single-turn runs
        #[arg(long)]
        context: Option<String>,
        #[arg(long, default_value = "general")]
        bias: String,
        #[arg(long, default_value_t = 10)]
        samples: u32,
        #[arg(long)]
        as_batch: bool,
        /// Ask the context question now instead of reusing recorded answers
        #[arg(long)]
        generate_context: bool,
        /// Answer every call with a fixed mock response
        #[arg(long)]
        debug: bool,
    },
    /// Generate context questions
    GenerateContext {
        #[arg(long, default_value = "gpt-4-turbo")]
        model: String,
        #[arg(long, default_value = "general")]
        bias: String,
        #[arg(long)]
        experiment_type: Option<ExperimentType>,
        #[arg(long, default_value_t = 0, value_parser = clap::value_parser!(u8).range(0..=1))]
        turn: u8,
        #[arg(long)]
        as_batch: bool,
        #[arg(long)]
        debug: bool,
    },
    /// Merge a finished target (or context answer) batch into the result tables
    ReadBatch {
        #[arg(long)]
        batch_id: String,
        /// The batch holds context answers rather than target responses
        #[arg(long)]
        context_answers: bool,
    },
    /// Merge a finished context question batch
    ReadContextBatch {
        #[arg(long)]
        batch_id: String,
        /// Write to the bias's first-turn table
        #[arg(long)]
        first_turn: bool,
    },
}

fn report(summary: &RunSummary) {
    match &summary.batch {
        Some(flush) => {
            eprintln!(
                "[batch] {} calls written to {}",
                summary.enqueued,
                flush.path.display()
            );
            if let Some(job) = &flush.job {
                println!("{}", job.id);
            }
        }
        None => eprintln!("[run] {} rows recorded", summary.recorded),
    }
}

fn batch_client() -> Result<BatchApiClient, Box<dyn std::error::Error>> {
    let settings = ProviderSettings::from_env(Provider::OpenAi)?;
    Ok(BatchApiClient::new(&settings)?)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let store = CsvTableStore::new(&cli.data_dir);

    match cli.command {
        Commands::Run {
            model,
            context_prompt,
            target_prompt,
            experiment_type,
            context,
            bias,
            samples,
            as_batch,
            generate_context,
            debug,
        } => {
            let mode = if generate_context {
                ContextMode::Generate
            } else {
                ContextMode::Reuse
            };
            let mut config = ExperimentConfig::new(ModelSelection::resolve(&model)?)
                .bias(bias)
                .samples(samples)
                .experiment_type(experiment_type)
                .context_prompt(context_prompt)
                .target_prompt(target_prompt)
                .context_mode(mode)
                .debug(debug)
                .batch(as_batch);
            if let Some(source) = context {
                config = config.context(source);
            }

            let summary = experiment::execute(&config, &store).await?;
            report(&summary);
        }
        Commands::GenerateContext {
            model,
            bias,
            experiment_type,
            turn,
            as_batch,
            debug,
        } => {
            let config = ContextGenConfig::new(ModelSelection::resolve(&model)?)
                .bias(bias)
                .experiment_type(experiment_type)
                .turn(usize::from(turn))
                .debug(debug)
                .batch(as_batch);
            let summary = context_generation::execute(&config, &store).await?;
            report(&summary);
        }
        Commands::ReadBatch {
            batch_id,
            context_answers,
        } => {
            let client = batch_client()?;
            let rows = retrieval::read_target_batch(&client, &store, &batch_id, context_answers).await?;
            eprintln!("[read-batch] {rows} rows merged from {batch_id}");
        }
        Commands::ReadContextBatch {
            batch_id,
            first_turn,
        } => {
            let client = batch_client()?;
            let rows = retrieval::read_context_batch(&client, &store, &batch_id, first_turn).await?;
            eprintln!("[read-context-batch] {rows} rows merged from {batch_id}");
        }
    }

    Ok(())
}
