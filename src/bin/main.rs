//! nlq CLI - translate analytics questions to SQL
//!
//! Usage:
//!   nlq translate <TEXT> [--respond ID=VALUE]... [--dialect <dialect>] [--json]
//!   nlq tables
//!   nlq suggest <metric|dimension> <TERM>
//!
//! Examples:
//!   nlq translate "revenue by country last 30 days"
//!   nlq translate "rev by country" --respond "ambiguous|metric|rev=GGR"
//!   nlq suggest metric "turnover"

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand, ValueEnum};
use nlq::cache::SystemClock;
use nlq::config::Settings;
use nlq::dictionary::EntityDictionary;
use nlq::entities::EntityKind;
use nlq::extract::PatternExtractor;
use nlq::gaming;
use nlq::schema::{SchemaProvider, StaticSchemaProvider, TomlSchemaProvider};
use nlq::service::{SemanticLayerService, TranslationResponse};
use nlq::sql::Dialect;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "nlq")]
#[command(about = "nlq - translate natural-language analytics questions into parameterized SQL")]
#[command(version)]
struct Cli {
    /// Settings file (defaults to NLQ_CONFIG, ./nlq.toml, then the user config dir)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Translate a question to SQL
    Translate {
        /// The question
        text: String,

        /// Answer a clarification prompt (repeatable)
        #[arg(short, long, value_name = "ID=VALUE")]
        respond: Vec<String>,

        /// SQL dialect to generate (overrides settings)
        #[arg(short, long)]
        dialect: Option<DialectArg>,

        /// Print the full response as JSON
        #[arg(long)]
        json: bool,
    },

    /// List tables, views and relationships of the active schema
    Tables,

    /// Suggest dictionary entries for a term
    Suggest {
        kind: KindArg,
        term: String,
    },
}

#[derive(Clone, ValueEnum)]
enum DialectArg {
    Postgres,
    Tsql,
    Duckdb,
}

impl From<DialectArg> for Dialect {
    fn from(arg: DialectArg) -> Self {
        match arg {
            DialectArg::Postgres => Dialect::Postgres,
            DialectArg::Tsql => Dialect::TSql,
            DialectArg::Duckdb => Dialect::DuckDb,
        }
    }
}

#[derive(Clone, ValueEnum)]
enum KindArg {
    Metric,
    Dimension,
}

impl From<KindArg> for EntityKind {
    fn from(arg: KindArg) -> Self {
        match arg {
            KindArg::Metric => EntityKind::Metric,
            KindArg::Dimension => EntityKind::Dimension,
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("nlq=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let mut settings = match &cli.config {
        Some(path) => Settings::from_file(path),
        None => Settings::load(),
    }
    .unwrap_or_else(|e| {
        eprintln!("Warning: {}; using default settings", e);
        Settings::default()
    });

    if let Commands::Translate {
        dialect: Some(dialect),
        ..
    } = &cli.command
    {
        settings.translation.dialect = dialect.clone().into();
    }

    let service = match build_service(settings).await {
        Ok(service) => service,
        Err(e) => {
            eprintln!("Error: {}", e);
            return ExitCode::FAILURE;
        }
    };

    match cli.command {
        Commands::Translate {
            text,
            respond,
            json,
            ..
        } => cmd_translate(&service, &text, &respond, json).await,
        Commands::Tables => cmd_tables(&service),
        Commands::Suggest { kind, term } => cmd_suggest(&service, kind.into(), &term),
    }
}

async fn build_service(settings: Settings) -> Result<SemanticLayerService, String> {
    let dictionary = match settings
        .sources
        .resolved_dictionary_path()
        .map_err(|e| e.to_string())?
    {
        Some(path) => EntityDictionary::from_file(&path)
            .map_err(|e| format!("dictionary '{}': {}", path.display(), e))?,
        None => gaming::dictionary().map_err(|e| e.to_string())?,
    };
    let dictionary = Arc::new(dictionary);

    let provider: Arc<dyn SchemaProvider> =
        match settings.sources.resolved_schema_path().map_err(|e| e.to_string())? {
            Some(path) => Arc::new(TomlSchemaProvider::new(path)),
            None => Arc::new(StaticSchemaProvider::new(gaming::schema_definition())),
        };

    let extractor = Arc::new(PatternExtractor::new(dictionary.clone()));
    SemanticLayerService::new(settings, extractor, provider, dictionary, Arc::new(SystemClock))
        .await
        .map_err(|e| e.to_string())
}

async fn cmd_translate(
    service: &SemanticLayerService,
    text: &str,
    respond: &[String],
    json: bool,
) -> ExitCode {
    let mut responses = BTreeMap::new();
    for pair in respond {
        match pair.rsplit_once('=') {
            Some((id, value)) => {
                responses.insert(id.to_string(), value.to_string());
            }
            None => {
                eprintln!("Invalid --respond '{}': expected ID=VALUE", pair);
                return ExitCode::FAILURE;
            }
        }
    }

    let cancel = CancellationToken::new();
    let mut result = service.translate_query(text, None, &cancel).await;
    if let Ok(first) = &result {
        if first.needs_clarification && !responses.is_empty() {
            result = service
                .apply_clarification(&first.entities, &responses, &cancel)
                .await;
        }
    }

    let response = match result {
        Ok(response) => response,
        Err(e) => {
            eprintln!("Translation error [{}]: {}", e.kind(), e);
            return ExitCode::FAILURE;
        }
    };

    if json {
        return match serde_json::to_string_pretty(&response) {
            Ok(out) => {
                println!("{}", out);
                ExitCode::SUCCESS
            }
            Err(e) => {
                eprintln!("Error serializing response: {}", e);
                ExitCode::FAILURE
            }
        };
    }

    print_response(&response);
    if response.needs_clarification {
        ExitCode::from(2)
    } else {
        ExitCode::SUCCESS
    }
}

fn print_response(response: &TranslationResponse) {
    if response.needs_clarification {
        println!("Clarification needed:");
        for prompt in &response.prompts {
            println!("  [{}] {}", prompt.conflict_id, prompt);
        }
        println!();
        println!("Answer with --respond '<id>=<value>'");
    } else if let Some(translation) = &response.translation {
        println!("{}", translation.sql);
        if !translation.parameters.is_empty() {
            println!();
            println!("-- Parameters:");
            for param in &translation.parameters {
                println!("--   {} = {}", param.name, param.value);
            }
        }
        if !translation.explanation.is_empty() {
            println!();
            println!("-- Plan:");
            for step in &translation.explanation {
                println!("--   {}", step);
            }
        }
        for hint in &translation.index_hints {
            println!("-- Index: {}", hint);
        }
    }

    for warning in &response.warnings {
        eprintln!("Warning: {}", warning);
    }
}

fn cmd_tables(service: &SemanticLayerService) -> ExitCode {
    let snapshot = service.schema();
    let model = &snapshot.model;

    println!("Schema version {}", snapshot.version);
    println!();
    println!("Tables:");
    for table in model.tables() {
        let columns: Vec<&str> = table.columns.iter().map(|c| c.name.as_str()).collect();
        println!("  - {} [{:?}] ({})", table.name, table.kind, columns.join(", "));
    }

    if !model.views().is_empty() {
        println!();
        println!("Views:");
        for view in model.views() {
            let kind = if view.materialized { "materialized" } else { "view" };
            println!(
                "  - {} [{}] over {}",
                view.name,
                kind,
                view.source_tables.join(", ")
            );
        }
    }

    if !model.relationships().is_empty() {
        println!();
        println!("Relationships:");
        for rel in model.relationships() {
            println!(
                "  - {}.{} -> {}.{} ({})",
                rel.from_table, rel.from_column, rel.to_table, rel.to_column, rel.cardinality
            );
        }
    }

    ExitCode::SUCCESS
}

fn cmd_suggest(service: &SemanticLayerService, kind: EntityKind, term: &str) -> ExitCode {
    let suggestions = service.suggestions(kind, term);
    if suggestions.is_empty() {
        println!("No {} matches '{}'", kind, term);
        return ExitCode::FAILURE;
    }
    for name in suggestions {
        println!("{}", name);
    }
    ExitCode::SUCCESS
}
