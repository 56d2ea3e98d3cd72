use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use deidentify::{
    AnthropicClient, AnthropicConfig, CitationScheme, LookupService, LookupStore, Pipeline,
    PipelineConfig, RuleSet, collect_inputs, process_batch, read_source,
};

#[derive(Parser)]
#[command(name = "deidentify")]
#[command(author, version, about = "Interview transcript de-identification pipeline", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// De-identify transcripts and write redacted text, mapping, tags and citations
    Process {
        /// Transcript files or directories (.txt, .vtt, .json)
        #[arg(short, long, required = true, num_args = 1..)]
        input: Vec<PathBuf>,

        /// Output directory
        #[arg(short, long)]
        output: PathBuf,

        /// Pipeline configuration (TOML)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Rule table overriding the built-in one (TOML)
        #[arg(long)]
        rules: Option<PathBuf>,

        /// Lookup store of known names and places (JSON)
        #[arg(long)]
        lookup: Option<PathBuf>,

        /// Add the model annotation pass (needs ANTHROPIC_API_KEY)
        #[arg(long)]
        llm: bool,

        /// Documents processed concurrently
        #[arg(long)]
        concurrency: Option<usize>,

        /// Citation scheme
        #[arg(long, value_enum)]
        scheme: Option<CitationScheme>,

        /// Utterances per page in the redacted transcript (0 disables page markers)
        #[arg(long)]
        lines_per_page: Option<usize>,

        /// Verbose output
        #[arg(short, long)]
        verbose: bool,
    },

    /// Analyze a transcript without writing anything
    Analyze {
        /// Input transcript file
        #[arg(short, long)]
        input: PathBuf,

        /// Rule table overriding the built-in one (TOML)
        #[arg(long)]
        rules: Option<PathBuf>,

        /// Lookup store of known names and places (JSON)
        #[arg(long)]
        lookup: Option<PathBuf>,

        /// Verbose output
        #[arg(short, long)]
        verbose: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Process {
            input,
            output,
            config,
            rules,
            lookup,
            llm,
            concurrency,
            scheme,
            lines_per_page,
            verbose,
        } => {
            setup_logging(verbose);
            let mut config = match config {
                Some(path) => PipelineConfig::load(&path).context("Failed to load configuration")?,
                None => PipelineConfig::default(),
            };
            if let Some(concurrency) = concurrency {
                config.batch.concurrency = concurrency.max(1);
            }
            if let Some(scheme) = scheme {
                config.cite.scheme = scheme;
            }
            if let Some(lines) = lines_per_page {
                config.cite.lines_per_page = (lines > 0).then_some(lines);
            }
            config.batch.use_llm |= llm;
            process_transcripts(input, output, config, rules, lookup).await
        }
        Commands::Analyze {
            input,
            rules,
            lookup,
            verbose,
        } => {
            setup_logging(verbose);
            analyze_transcript(input, rules, lookup)
        }
    }
}

fn setup_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    let subscriber = FmtSubscriber::builder().with_env_filter(filter).finish();
    tracing::subscriber::set_global_default(subscriber).ok();
}

fn load_rules(path: Option<&Path>) -> Result<RuleSet> {
    let rules = match path {
        Some(path) => RuleSet::load(path).context("Failed to load rule table")?,
        None => RuleSet::builtin().context("Failed to load built-in rule table")?,
    };
    info!("Rule table version {}", rules.version);
    Ok(rules)
}

fn load_lookup(path: Option<&Path>) -> Arc<dyn LookupService> {
    match path {
        Some(path) => Arc::new(LookupStore::open_or_empty(path)),
        None => {
            warn!("No lookup store given; only pattern cues will find entities");
            Arc::new(LookupStore::empty())
        }
    }
}

async fn process_transcripts(
    input: Vec<PathBuf>,
    output: PathBuf,
    config: PipelineConfig,
    rules: Option<PathBuf>,
    lookup: Option<PathBuf>,
) -> Result<()> {
    let inputs = collect_inputs(&input)?;
    if inputs.is_empty() {
        bail!("No transcript files found in {:?}", input);
    }

    let llm = if config.batch.use_llm {
        match AnthropicConfig::from_env() {
            Ok(api_config) => {
                let client = AnthropicClient::new(api_config);
                info!("Model annotation enabled ({})", client.model());
                Some(Arc::new(client))
            }
            Err(e) => {
                warn!("Model annotation disabled: {:#}", e);
                None
            }
        }
    } else {
        None
    };

    let rules = load_rules(rules.as_deref())?;
    let lookup = load_lookup(lookup.as_deref());
    let pipeline = Arc::new(Pipeline::new(rules, lookup, config)?);

    let summary = process_batch(pipeline, inputs, &output, llm).await?;

    for document in summary.documents.iter().filter(|d| !d.is_ok()) {
        warn!(
            "Failed: {} ({})",
            document.source.display(),
            document.error.as_deref().unwrap_or("unknown error")
        );
    }
    info!(
        "Complete: {} of {} documents written to {:?}",
        summary.succeeded(),
        summary.documents.len(),
        output
    );
    Ok(())
}

fn analyze_transcript(
    input: PathBuf,
    rules: Option<PathBuf>,
    lookup: Option<PathBuf>,
) -> Result<()> {
    info!("Analyzing transcript from {:?}", input);
    let document = read_source(&input)?;
    let pipeline = Pipeline::new(
        load_rules(rules.as_deref())?,
        load_lookup(lookup.as_deref()),
        PipelineConfig::default(),
    )?;
    let output = pipeline
        .process(&document, &[])
        .context("Failed to process transcript")?;

    println!("Transcript Analysis");
    println!("===================");
    println!("Format: {:?}", document.format);
    println!("Utterances: {} ({} skipped)", output.original.len(), output.skipped);
    println!("Speakers: {:?}", output.original.speakers());
    println!(
        "Timestamps: {}",
        if output.citations.index.has_timestamps() { "yes" } else { "no" }
    );
    println!();

    println!("Entities");
    println!("--------");
    println!(
        "Mentions: {} ({} ambiguous, {} candidates, {} dropped, {} extended)",
        output.extraction.mentions.len(),
        output.extraction.ambiguous_count(),
        output.extraction.candidates,
        output.extraction.dropped,
        output.extraction.extended
    );
    for entity in &output.entities {
        let code = entity.code.map(|c| c.to_string()).unwrap_or_default();
        println!(
            "{:<16} {:>3} mentions  {:<12} variants: {}",
            code,
            entity.mention_count(),
            format!("{:?}", entity.resolution),
            entity.variants.iter().cloned().collect::<Vec<_>>().join(", ")
        );
    }
    println!();

    println!("Tags");
    println!("----");
    let mut by_category: BTreeMap<&str, usize> = BTreeMap::new();
    for tag in &output.tags.tags {
        *by_category.entry(tag.category.as_str()).or_insert(0) += 1;
    }
    for (category, count) in &by_category {
        println!("{}: {}", category, count);
    }
    println!();

    println!("Audit");
    println!("-----");
    let audit = &output.audit;
    println!("Leaks: {}", audit.leaks.len());
    println!("Citation errors: {}", audit.citation_errors.len());
    println!("Untagged utterances: {}", audit.untagged.len());
    println!("Round-trip mismatches: {}", audit.round_trip_mismatches.len());
    println!("Passed: {}", audit.passed());

    Ok(())
}
