use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use redliner::config::{setup_api_key_interactive, Config};
use redliner::llm::{parse_generation, OpenRouterClient, Reviewer, StaticClauses};
use redliner::redline::{
    apply_edits, extract_revisions, normalize, render_diff, validate, Edit, GateConfig,
    QualityIssue,
};
use redliner::{logging, CancellationToken};
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(
    name = "redliner",
    about = "Redline contracts with model-drafted block edits and a mechanical quality gate",
    version
)]
struct Cli {
    /// Debug-level logging (overridden by REDLINER_LOG)
    #[arg(long, global = true)]
    verbose: bool,

    /// Emit logs as JSON lines on stderr
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Review a contract and print the redline
    Review(ReviewArgs),
    /// Gate and apply a saved generator response without calling the service
    Check(CheckArgs),
    /// Print the redline between two texts
    Diff(PairArgs),
    /// Print find/replace revisions between two texts as JSON
    Revisions(PairArgs),
    /// Store the OpenRouter API key in the system keychain
    Setup,
}

#[derive(Args, Debug)]
struct ReviewArgs {
    /// Contract text file
    file: PathBuf,
    /// Negotiating positions to compare the contract against
    #[arg(long)]
    playbook: Option<PathBuf>,
    /// Pre-formatted reference clauses to include in the prompt
    #[arg(long)]
    references: Option<PathBuf>,
    /// Model tier ("balanced", "smart") or provider model id
    #[arg(long)]
    model: Option<String>,
    /// Request timeout in seconds
    #[arg(long)]
    timeout: Option<u64>,
    /// Treat ambiguous anchors as errors
    #[arg(long)]
    strict_anchors: bool,
    /// Print the full result as JSON
    #[arg(long)]
    json: bool,
    /// Write the output to a file instead of stdout
    #[arg(long)]
    output: Option<PathBuf>,
}

#[derive(Args, Debug)]
struct CheckArgs {
    /// Contract text file
    file: PathBuf,
    /// Raw generator response to check
    #[arg(long)]
    response: PathBuf,
    #[arg(long)]
    strict_anchors: bool,
    #[arg(long)]
    json: bool,
}

#[derive(Args, Debug)]
struct PairArgs {
    original: PathBuf,
    modified: PathBuf,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init_tracing(cli.verbose, cli.log_json);

    match cli.command {
        Commands::Review(args) => run_review(args).await,
        Commands::Check(args) => run_check(args),
        Commands::Diff(args) => run_diff(args),
        Commands::Revisions(args) => run_revisions(args),
        Commands::Setup => setup_api_key_interactive(),
    }
}

async fn run_review(args: ReviewArgs) -> Result<()> {
    let mut config = Config::load();
    if let Some(model) = args.model {
        config.model = model;
    }
    if let Some(timeout) = args.timeout {
        config.request_timeout_secs = timeout;
    }
    config.strict_anchors |= args.strict_anchors;

    let document = read_text(&args.file, "contract")?;
    let playbook = args
        .playbook
        .as_deref()
        .map(|path| read_text(path, "playbook"))
        .transpose()?;

    let client = OpenRouterClient::from_config(&config)?;
    info!(model = client.model(), file = %args.file.display(), "starting review");

    let mut reviewer = Reviewer::new(client)
        .with_gate_config(GateConfig {
            strict_anchors: config.strict_anchors,
        })
        .with_markers(config.markers());
    if let Some(path) = args.references.as_deref() {
        reviewer = reviewer.with_retriever(StaticClauses::new(read_text(path, "references")?));
    }

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("interrupted, cancelling review");
                cancel.cancel();
            }
        });
    }

    let outcome = reviewer
        .review(&document, playbook.as_deref(), &cancel)
        .await?;

    if let Some(warnings) = &outcome.quality_warnings {
        for warning in warnings {
            warn!("{}", warning);
        }
    }
    if let Some(refusal) = &outcome.generator_error {
        warn!(reason = %refusal, "generator declined to edit");
    }

    let rendered = if args.json {
        serde_json::to_string_pretty(&outcome)?
    } else {
        outcome.redlined_text.clone()
    };
    emit(&rendered, args.output.as_deref())
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CheckReport {
    edits: Vec<Edit>,
    issues: Vec<QualityIssue>,
    failed_edits: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    generator_error: Option<String>,
    redlined_text: String,
}

fn run_check(args: CheckArgs) -> Result<()> {
    let config = Config::load();
    let source = normalize(&read_text(&args.file, "contract")?);
    let raw = read_text(&args.response, "response")?;

    let parsed = parse_generation(&raw)?;
    let edits: Vec<Edit> = parsed.edits.iter().map(Edit::normalized).collect();
    let gate = GateConfig {
        strict_anchors: config.strict_anchors || args.strict_anchors,
    };
    let issues = validate(&edits, &source, parsed.self_check.as_ref(), gate);
    let report = apply_edits(&source, &edits);
    let redlined_text = render_diff(&source, &report.document, &config.markers());

    let check = CheckReport {
        edits,
        issues,
        failed_edits: report.failures,
        generator_error: parsed.error,
        redlined_text,
    };

    if args.json {
        return emit(&serde_json::to_string_pretty(&check)?, None);
    }

    for issue in &check.issues {
        eprintln!("{}", issue);
    }
    for failure in &check.failed_edits {
        eprintln!("not applied: {}", failure);
    }
    if let Some(refusal) = &check.generator_error {
        eprintln!("generator declined: {}", refusal);
    }
    emit(&check.redlined_text, None)
}

fn run_diff(args: PairArgs) -> Result<()> {
    let config = Config::load();
    let (original, modified) = read_pair(&args)?;
    emit(&render_diff(&original, &modified, &config.markers()), None)
}

fn run_revisions(args: PairArgs) -> Result<()> {
    let (original, modified) = read_pair(&args)?;
    let revisions = extract_revisions(&original, &modified);
    for revision in revisions.iter().filter(|r| !r.is_reliable()) {
        warn!(find = %revision.find, "find text is short and may match the wrong place");
    }
    emit(&serde_json::to_string_pretty(&revisions)?, None)
}

fn read_pair(args: &PairArgs) -> Result<(String, String)> {
    Ok((
        normalize(&read_text(&args.original, "original")?),
        normalize(&read_text(&args.modified, "modified")?),
    ))
}

fn read_text(path: &Path, label: &str) -> Result<String> {
    std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {} '{}'", label, path.display()))
}

fn emit(text: &str, output: Option<&Path>) -> Result<()> {
    match output {
        Some(path) => {
            std::fs::write(path, text)
                .with_context(|| format!("Failed to write output '{}'", path.display()))?;
            info!(path = %path.display(), "wrote output");
        }
        None => println!("{}", text),
    }
    Ok(())
}
