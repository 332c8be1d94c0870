use crate::questions::{QuestionFields, QuestionKey};
use anyhow::Context;
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::FromRow;
use sqlx::SqlitePool;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::types::Json;
use std::str::FromStr;

#[derive(Debug, FromRow)]
pub struct StoredQuestion {
    #[sqlx(rename = "id")]
    pub key: String,
    pub question_number: Option<String>,
    pub question_text: String,
    pub options: Option<Json<Value>>,
    pub correct_answer: String,
    pub correct_answer_text: Option<String>,
    pub subspecialty: String,
    pub source_file: Option<String>,
    pub exam_type: Option<String>,
    pub exam_year: Option<String>,
    pub ai_generated: bool,
    pub unified_explanation: Option<String>,
    pub fixed_at: Option<DateTime<Utc>>,
    pub word_count: Option<i64>,
    pub explanation: Option<String>,
    pub explanation_sections: Option<Json<Value>>,
    pub verification_confidence: Option<String>,
    pub primary_category: Option<String>,
    pub secondary_category: Option<String>,
    pub key_concept: Option<String>,
    pub difficulty_level: Option<String>,
    pub image_url: Option<String>,
    pub loaded_at: DateTime<Utc>,
}

impl StoredQuestion {
    /// The payload as it was last loaded.
    pub fn fields(&self) -> QuestionFields {
        QuestionFields {
            question_number: self.question_number.clone(),
            question_text: self.question_text.clone(),
            options: self.options.as_ref().map(|j| j.0.clone()),
            correct_answer: self.correct_answer.clone(),
            correct_answer_text: self.correct_answer_text.clone(),
            subspecialty: self.subspecialty.clone(),
            source_file: self.source_file.clone(),
            exam_type: self.exam_type.clone(),
            exam_year: self.exam_year.clone(),
            ai_generated: self.ai_generated,
            unified_explanation: self.unified_explanation.clone(),
            fixed_at: self.fixed_at,
            word_count: self.word_count,
            explanation: self.explanation.clone(),
            explanation_sections: self.explanation_sections.as_ref().map(|j| j.0.clone()),
            verification_confidence: self.verification_confidence.clone(),
            primary_category: self.primary_category.clone(),
            secondary_category: self.secondary_category.clone(),
            key_concept: self.key_concept.clone(),
            difficulty_level: self.difficulty_level.clone(),
            image_url: self.image_url.clone(),
        }
    }
}

#[derive(Debug, FromRow)]
pub struct SubspecialtyCount {
    pub subspecialty: String,
    pub count: i64,
}

/// Opens (creating if needed) the SQLite database at `database_url` and
/// applies any pending migrations.
pub async fn connect(database_url: &str) -> anyhow::Result<SqlitePool> {
    let options = SqliteConnectOptions::from_str(database_url)
        .with_context(|| format!("Invalid database URL: {}", database_url))?
        .create_if_missing(true);

    connect_with(options, 5)
        .await
        .with_context(|| format!("Failed to open {}", database_url))
}

pub async fn connect_with(
    options: SqliteConnectOptions,
    max_connections: u32,
) -> anyhow::Result<SqlitePool> {
    let pool = SqlitePoolOptions::new()
        .max_connections(max_connections)
        .connect_with(options)
        .await
        .context("Failed to connect to the database.")?;

    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .context("Failed to run database migrations.")?;

    Ok(pool)
}

/// A migrated in-memory database on a single connection that is never
/// recycled, so the data lives as long as the pool.
#[cfg(test)]
pub async fn connect_in_memory() -> anyhow::Result<SqlitePool> {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect("sqlite::memory:")
        .await
        .context("Failed to open in-memory database.")?;

    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .context("Failed to run database migrations.")?;

    Ok(pool)
}

/// Fetches a single stored question.
///
/// Returns `Ok(None)` if nothing has been loaded under this key.
pub async fn fetch_question(
    pool: &SqlitePool,
    key: &QuestionKey,
) -> anyhow::Result<Option<StoredQuestion>> {
    let question = sqlx::query_as::<_, StoredQuestion>("SELECT * FROM mcqs WHERE id = ?")
        .bind(key.as_str())
        .fetch_optional(pool)
        .await
        .with_context(|| format!("Failed to fetch MCQ with key: {}", key))?;

    Ok(question)
}

#[cfg(test)]
pub async fn fetch_all_questions(pool: &SqlitePool) -> anyhow::Result<Vec<StoredQuestion>> {
    let questions = sqlx::query_as::<_, StoredQuestion>("SELECT * FROM mcqs ORDER BY id ASC")
        .fetch_all(pool)
        .await
        .context("Failed to fetch MCQs from the database.")?;

    Ok(questions)
}

pub async fn count_questions(pool: &SqlitePool) -> anyhow::Result<i64> {
    let count = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM mcqs")
        .fetch_one(pool)
        .await
        .context("Failed to count MCQs.")?;

    Ok(count)
}

/// Number of stored questions per subspecialty, largest first.
pub async fn subspecialty_counts(pool: &SqlitePool) -> anyhow::Result<Vec<SubspecialtyCount>> {
    let counts = sqlx::query_as::<_, SubspecialtyCount>(
        r#"
        SELECT subspecialty, COUNT(*) AS count
        FROM mcqs
        GROUP BY subspecialty
        ORDER BY count DESC, subspecialty ASC
        "#,
    )
    .fetch_all(pool)
    .await
    .context("Failed to count MCQs by subspecialty.")?;

    Ok(counts)
}
