use query_assistant::{AskOutcome, AssistantConfig, CorrectionSet, FieldRef, QueryAssistant, ResultSet};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::collections::BTreeMap;
use tracing::info;
use tracing_subscriber::EnvFilter;

const MAX_DISPLAY_ROWS: usize = 50;

#[derive(Parser)]
#[command(name = "query-assistant")]
#[command(about = "Ask business questions of a relational database in plain language")]
#[command(version)]
struct Args {
    /// Database connection URL (or set DATABASE_URL)
    #[arg(long, global = true)]
    database_url: Option<String>,

    /// Database schema to introspect (or set DB_SCHEMA)
    #[arg(long, global = true)]
    db_schema: Option<String>,

    /// Model API key (or set OPENAI_API_KEY)
    #[arg(long, global = true)]
    api_key: Option<String>,

    /// Model name (or set OPENAI_MODEL)
    #[arg(long, global = true)]
    model: Option<String>,

    /// Minimum similarity (0-100) for value corrections (or set FUZZY_THRESHOLD)
    #[arg(long, global = true, value_parser = clap::value_parser!(u8).range(0..=100))]
    threshold: Option<u8>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Answer a question end to end
    Ask {
        question: String,

        /// Retry with the best correction of every field when the first query finds nothing
        #[arg(long)]
        auto_correct: bool,

        /// Corrected value to use on retry, as table.column=value (repeatable)
        #[arg(long = "select", value_parser = parse_selection)]
        selections: Vec<(String, String)>,

        /// Print result rows as JSON records instead of a table
        #[arg(long)]
        json: bool,
    },
    /// Only check whether a question fits the database
    Validate { question: String },
    /// Validate and generate SQL without executing it
    Generate { question: String },
    /// Print the introspected schema as JSON
    Schema,
}

fn parse_selection(raw: &str) -> std::result::Result<(String, String), String> {
    let (field, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected table.column=value, got '{}'", raw))?;
    let field = FieldRef::parse(field).ok_or_else(|| format!("'{}' is not a table.column reference", field))?;
    Ok((field.to_string(), value.trim().to_string()))
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables from .env file
    dotenv::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("query_assistant=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let config = load_config(&args)?;
    let assistant = QueryAssistant::connect(config)
        .await
        .context("Failed to start assistant")?;

    match args.command {
        Commands::Ask {
            question,
            auto_correct,
            selections,
            json,
        } => ask(&assistant, &question, auto_correct, selections.into_iter().collect(), json).await,
        Commands::Validate { question } => validate(&assistant, &question).await,
        Commands::Generate { question } => generate(&assistant, &question).await,
        Commands::Schema => {
            let schema = assistant.schema().await?;
            println!("{}", serde_json::to_string_pretty(&*schema)?);
            Ok(())
        }
    }
}

/// Environment configuration with command-line flags taking precedence.
fn load_config(args: &Args) -> Result<AssistantConfig> {
    let threshold = args.threshold.map(|t| t.to_string());
    let config = AssistantConfig::from_lookup(|key| {
        let flag = match key {
            "DATABASE_URL" => args.database_url.clone(),
            "DB_SCHEMA" => args.db_schema.clone(),
            "OPENAI_API_KEY" => args.api_key.clone(),
            "OPENAI_MODEL" => args.model.clone(),
            "FUZZY_THRESHOLD" => threshold.clone(),
            _ => None,
        };
        flag.or_else(|| std::env::var(key).ok())
    })?;
    Ok(config)
}

async fn ask(
    assistant: &QueryAssistant,
    question: &str,
    auto_correct: bool,
    selections: BTreeMap<String, String>,
    json: bool,
) -> Result<()> {
    print_banner(&format!("QUESTION: {}", question));

    let outcome = assistant.ask(question).await?;
    let outcome = match outcome {
        AskOutcome::NeedsCorrection {
            query, corrections, ..
        } => {
            println!("\n SQL:\n{}", query.sanitized_text);
            println!("\n The query returned no usable rows.");
            print_corrections(&corrections);

            let mut chosen = if auto_correct {
                corrections.top_choices()
            } else {
                BTreeMap::new()
            };
            chosen.extend(selections);

            if chosen.is_empty() {
                println!("\n Re-run with --auto-correct or --select table.column=value to retry.");
                return Ok(());
            }

            info!("Retrying with corrections: {:?}", chosen);
            println!("\n Retrying with:");
            for (field, value) in &chosen {
                println!("   {} = '{}'", field, value);
            }
            assistant.ask_with_corrections(question, &chosen).await?
        }
        other => other,
    };

    print_outcome(&outcome, json)?;
    Ok(())
}

async fn validate(assistant: &QueryAssistant, question: &str) -> Result<()> {
    let verdict = assistant.validate_context(question).await?;
    println!("Related:   {}", verdict.is_related);
    println!("Reasoning: {}", verdict.reasoning);
    if let Some(reframed) = verdict.reframed_question {
        println!("Suggestion: {}", reframed);
    }
    Ok(())
}

async fn generate(assistant: &QueryAssistant, question: &str) -> Result<()> {
    let verdict = assistant.validate_context(question).await?;
    if !verdict.is_related {
        println!("{}", verdict.reframed_question.unwrap_or(verdict.reasoning));
        return Ok(());
    }

    let query = assistant.generate_query(question, None).await?;
    println!("{}", query.sanitized_text);
    Ok(())
}

fn print_outcome(outcome: &AskOutcome, json: bool) -> Result<()> {
    match outcome {
        AskOutcome::Rejected(verdict) => {
            println!("\n I can't answer that question from this database.");
            println!(" Reason: {}", verdict.reasoning);
            if let Some(reframed) = &verdict.reframed_question {
                println!("\n {}", reframed);
            }
        }
        AskOutcome::Answered {
            query,
            result,
            narrative,
        } => {
            println!("\n SQL:\n{}", query.sanitized_text);
            print_banner(&format!("RESULTS ({} rows)", result.row_count()));
            if json {
                println!("{}", serde_json::to_string_pretty(&result.to_records())?);
            } else {
                print_table(result);
            }
            print_banner("INSIGHTS");
            println!("\n{}", narrative);
        }
        AskOutcome::NeedsCorrection { corrections, .. } => {
            print_corrections(corrections);
        }
        AskOutcome::NoResults { query } => {
            println!("\n SQL:\n{}", query.sanitized_text);
            println!("\n No results found, and no similar values were found to suggest.");
        }
    }
    Ok(())
}

fn print_corrections(corrections: &CorrectionSet) {
    println!("\n Did you mean one of these values?");
    for (field, candidates) in &corrections.fields {
        println!("   {}:", field);
        for candidate in candidates.iter().take(5) {
            println!("      - {} ({}%)", candidate.value, candidate.score);
        }
    }
}

fn print_table(result: &ResultSet) {
    println!("{}", result.columns().join(" | "));
    println!("{}", "-".repeat(80));
    for row in result.rows().iter().take(MAX_DISPLAY_ROWS) {
        let cells: Vec<String> = row.iter().map(|v| v.to_string()).collect();
        println!("{}", cells.join(" | "));
    }
    if result.row_count() > MAX_DISPLAY_ROWS {
        println!("... {} more rows", result.row_count() - MAX_DISPLAY_ROWS);
    }
}

fn print_banner(title: &str) {
    println!("\n{}", "=".repeat(80));
    println!(" {}", title);
    println!("{}", "=".repeat(80));
}
