use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use dealscan_core::{
    render_classification, render_report, render_rules, Analyzer, DocumentClassifier,
    FileRuleRepository, OutputFormat, ProvisionAnalyzer, ProvisionRegistry, RuleRepository,
};
use tokio::io::AsyncReadExt;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

mod settings;

use settings::Settings;

#[derive(Parser, Debug)]
#[command(
    name = "dealscan",
    author,
    version,
    about = "M&A transaction document provision analyzer"
)]
struct Cli {
    /// Directory containing provision rule packs (*.yaml, *.yml, *.json) [default: ./rules]
    #[arg(long = "rules-dir", value_name = "DIR", global = true)]
    rules_dir: Option<PathBuf>,

    /// Optional settings file (TOML, YAML or JSON)
    #[arg(long, value_name = "FILE", global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Analyze a document and report provision findings
    Analyze {
        /// Document text file; reads stdin when omitted or `-`
        input: Option<PathBuf>,
        /// Output format
        #[arg(long, value_enum, default_value_t = Format::Human)]
        format: Format,
    },
    /// Classify a document without evaluating provisions
    Classify {
        /// Document text file; reads stdin when omitted or `-`
        input: Option<PathBuf>,
        /// Emit the classification as JSON
        #[arg(long)]
        json: bool,
    },
    /// List all loaded rules
    ListRules {
        /// Emit rules as JSON instead of human-readable text
        #[arg(long)]
        json: bool,
    },
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum Format {
    Human,
    Json,
}

impl From<Format> for OutputFormat {
    fn from(format: Format) -> Self {
        match format {
            Format::Human => OutputFormat::Human,
            Format::Json => OutputFormat::Json,
        }
    }
}

fn output_format(json: bool) -> OutputFormat {
    if json {
        OutputFormat::Json
    } else {
        OutputFormat::Human
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();
    let settings = Settings::load(cli.config.as_deref())?;
    let rules_dir = settings.resolve_rules_dir(cli.rules_dir);

    match cli.command.unwrap_or(Commands::ListRules { json: false }) {
        Commands::Analyze { input, format } => {
            analyze(&rules_dir, &settings, input.as_deref(), format.into()).await?
        }
        Commands::Classify { input, json } => classify(input.as_deref(), json).await?,
        Commands::ListRules { json } => list_rules(&rules_dir, json).await?,
    }
    Ok(())
}

async fn analyze(
    rules_dir: &Path,
    settings: &Settings,
    input: Option<&Path>,
    format: OutputFormat,
) -> Result<()> {
    let repo = FileRuleRepository::new(rules_dir);
    let registry = ProvisionRegistry::load(&repo)
        .await
        .with_context(|| format!("failed to load rules from {}", rules_dir.display()))?;
    if registry.is_empty() {
        warn!(rules_dir = %rules_dir.display(), "no provision rules found; only classification will run");
    }
    let analyzer = ProvisionAnalyzer::with_config(Arc::new(registry), settings.engine.clone())
        .context("invalid engine configuration")?;

    let text = read_input(input).await?;
    let report = analyzer.analyze(&text);
    info!(
        document_type = report.document_type.as_str(),
        findings = report.findings.len(),
        "analysis finished"
    );
    print!("{}", render_report(&report, format)?);
    Ok(())
}

async fn classify(input: Option<&Path>, json: bool) -> Result<()> {
    let classifier = DocumentClassifier::new()?;
    let text = read_input(input).await?;
    let classification = classifier.classify_with_signals(&text);
    print!(
        "{}",
        render_classification(&classification, output_format(json))?
    );
    Ok(())
}

async fn list_rules(rules_dir: &Path, json: bool) -> Result<()> {
    let repo = FileRuleRepository::new(rules_dir);
    let rules = RuleRepository::load_rules(&repo)
        .await
        .with_context(|| format!("failed to load rules from {}", rules_dir.display()))?;
    // Only list packs the analyzer would accept.
    ProvisionRegistry::new(rules.clone())
        .with_context(|| format!("failed to load rules from {}", rules_dir.display()))?;
    if !json {
        println!("Rule pack: {}", rules_dir.display());
    }
    print!("{}", render_rules(&rules, output_format(json))?);
    Ok(())
}

async fn read_input(input: Option<&Path>) -> Result<String> {
    match input {
        Some(path) if path != Path::new("-") => tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("failed to read document at {}", path.display())),
        _ => {
            let mut buffer = String::new();
            tokio::io::stdin()
                .read_to_string(&mut buffer)
                .await
                .context("failed to read document from stdin")?;
            Ok(buffer)
        }
    }
}

fn init_tracing() {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,tokio=warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .try_init();
}
