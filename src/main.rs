/// Loads MCQ fixture batches into the question bank.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// SQLite database to load into.
    #[arg(long, env = "MCQ_DATABASE_URL", default_value = "sqlite:mcq_bank.db", global = true)]
    database_url: String,

    /// The command to execute. If no command is given, help is shown.
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Upserts every MCQ in a fixture file, or in each *.json file of a directory.
    Load {
        /// Fixture file or directory of fixture files.
        path: PathBuf,
        /// How many MCQs share one transaction.
        #[arg(long, short, default_value_t = DEFAULT_BATCH_SIZE)]
        batch_size: usize,
    },

    /// Shows how many MCQs are stored, per subspecialty.
    Stats,

    /// Prints one stored MCQ.
    Show {
        /// The MCQ's primary key.
        key: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "mcq_loader=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // --- Parse CLI commands ---
    let cli = Cli::parse();

    let Some(command) = cli.command else {
        // If no command was given, print help.
        Cli::parse_from(["", "--help"]);
        return Ok(());
    };

    // --- Database Setup ---
    let pool = db::connect(&cli.database_url).await?;

    match command {
        Commands::Load { path, batch_size } => {
            println!("\n--- Loading fixtures from {} ---", path.display());
            let sources = load_fixtures(&path)?;

            let mut total = LoadReport::default();
            for source in sources {
                println!(
                    "Importing {} MCQs from {}",
                    source.entries.len(),
                    source.path.display()
                );
                let report = load_in_batches(&pool, &source.entries, batch_size)
                    .await
                    .with_context(|| format!("Import of {} aborted", source.path.display()))?;
                println!("  {}", report.summary_line());
                for failure in &report.failures {
                    println!(
                        "  - entry #{:<5} key {:<12} {}",
                        failure.index,
                        failure.key.as_deref().unwrap_or("-"),
                        failure.error
                    );
                }
                let offset = total.attempted;
                total.merge(report, offset);
            }

            println!("\n--- Load Finished ---");
            println!("{}", total.summary_line());
        }
        Commands::Stats => {
            println!("\n--- Question Bank ---");
            let total = db::count_questions(&pool).await?;
            if total == 0 {
                println!("No MCQs found in the database. Use the 'load' command to populate it.");
            } else {
                println!("Total MCQs: {}", total);
                println!("\nMCQs by Subspecialty:");
                for row in db::subspecialty_counts(&pool).await? {
                    println!("  - {:<40} {}", row.subspecialty, row.count);
                }
            }
        }
        Commands::Show { key } => {
            let key = QuestionKey::new(key).context("Invalid MCQ key.")?;
            match db::fetch_question(&pool, &key).await? {
                Some(question) => {
                    println!("\n--- MCQ {} ---", question.key);
                    if let Some(number) = &question.question_number {
                        println!("Number:  {}", number);
                    }
                    println!("Subspecialty: {}", question.subspecialty);
                    if let Some(exam) = &question.exam_type {
                        println!(
                            "Exam:    {} {}",
                            exam,
                            question.exam_year.as_deref().unwrap_or("")
                        );
                    }
                    println!("\n{}", question.question_text);
                    if let Some(Json(options)) = &question.options {
                        println!("{}", serde_json::to_string_pretty(options)?);
                    }
                    println!("Answer:  {}", question.correct_answer);
                    println!("Loaded:  {}", question.loaded_at);
                }
                None => println!("No MCQ stored under key {}.", key),
            }
        }
    }

    Ok(())
}

pub mod db;
pub mod error;
pub mod fixtures;
pub mod loader;
pub mod questions;

use anyhow::Context;
use clap::Parser;
use clap::Subcommand;
use fixtures::load_fixtures;
use loader::{DEFAULT_BATCH_SIZE, LoadReport, load_in_batches};
use questions::QuestionKey;
use sqlx::types::Json;
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
