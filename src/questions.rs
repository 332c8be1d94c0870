/// Opaque identity of a question. Only ever compared for equality.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct QuestionKey(String);

impl QuestionKey {
    pub fn new(key: impl Into<String>) -> Result<Self, RecordError> {
        let key = key.into();
        if key.trim().is_empty() {
            return Err(RecordError::InvalidKey("key is empty".to_string()));
        }
        Ok(QuestionKey(key))
    }

    /// Fixture keys show up both as `"99993310"` and `99993310`.
    /// Either way the decimal text is the key.
    pub fn from_json(value: &Value) -> Result<Self, RecordError> {
        match value {
            Value::String(s) => QuestionKey::new(s.as_str()),
            Value::Number(n) if n.is_i64() || n.is_u64() => QuestionKey::new(n.to_string()),
            Value::Null => Err(RecordError::InvalidKey("missing pk".to_string())),
            other => Err(RecordError::InvalidKey(format!(
                "unsupported pk value {}",
                other
            ))),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for QuestionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

pub const CORRECT_ANSWER_MAX_LEN: usize = 15;

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct QuestionFields {
    #[serde(default, deserialize_with = "text_or_number")]
    pub question_number: Option<String>,
    pub question_text: String,
    #[serde(default)]
    pub options: Option<Value>,
    #[serde(deserialize_with = "single_answer")]
    pub correct_answer: String,
    #[serde(default)]
    pub correct_answer_text: Option<String>,
    pub subspecialty: String,
    #[serde(default)]
    pub source_file: Option<String>,
    #[serde(default)]
    pub exam_type: Option<String>,
    #[serde(default, deserialize_with = "text_or_number")]
    pub exam_year: Option<String>,
    #[serde(default)]
    pub ai_generated: bool,
    #[serde(default)]
    pub unified_explanation: Option<String>,
    #[serde(default)]
    pub fixed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub word_count: Option<i64>,
    #[serde(default)]
    pub explanation: Option<String>,
    #[serde(default)]
    pub explanation_sections: Option<Value>,
    #[serde(default)]
    pub verification_confidence: Option<String>,
    #[serde(default)]
    pub primary_category: Option<String>,
    #[serde(default)]
    pub secondary_category: Option<String>,
    #[serde(default)]
    pub key_concept: Option<String>,
    #[serde(default)]
    pub difficulty_level: Option<String>,
    #[serde(default)]
    pub image_url: Option<String>,
}

impl QuestionFields {
    /// Decodes and validates a `fields` object from a fixture entry.
    pub fn from_json(value: &Value) -> Result<Self, RecordError> {
        let fields = QuestionFields::deserialize(value)
            .map_err(|e| RecordError::InvalidFields(e.to_string()))?;
        fields.validate()?;
        Ok(fields)
    }

    fn validate(&self) -> Result<(), RecordError> {
        if self.question_text.trim().is_empty() {
            return Err(RecordError::InvalidFields(
                "question_text is empty".to_string(),
            ));
        }
        if self.subspecialty.trim().is_empty() {
            return Err(RecordError::InvalidFields("subspecialty is empty".to_string()));
        }
        if self.correct_answer.trim().is_empty() {
            return Err(RecordError::InvalidFields(
                "correct_answer is empty".to_string(),
            ));
        }
        let limited: [(&str, Option<&str>, usize); 11] = [
            ("question_number", self.question_number.as_deref(), 20),
            ("correct_answer", Some(self.correct_answer.as_str()), CORRECT_ANSWER_MAX_LEN),
            ("subspecialty", Some(self.subspecialty.as_str()), 100),
            ("source_file", self.source_file.as_deref(), 255),
            ("exam_type", self.exam_type.as_deref(), 50),
            ("exam_year", self.exam_year.as_deref(), 10),
            ("verification_confidence", self.verification_confidence.as_deref(), 50),
            ("primary_category", self.primary_category.as_deref(), 100),
            ("secondary_category", self.secondary_category.as_deref(), 100),
            ("difficulty_level", self.difficulty_level.as_deref(), 50),
            ("image_url", self.image_url.as_deref(), 200),
        ];
        for (name, value, max) in limited {
            if let Some(value) = value {
                if value.chars().count() > max {
                    return Err(RecordError::InvalidFields(format!(
                        "{} '{}' is longer than {} characters",
                        name, value, max
                    )));
                }
            }
        }
        if let Some(options) = &self.options {
            if !(options.is_object() || options.is_array()) {
                return Err(RecordError::InvalidFields(
                    "options must be an object or an array".to_string(),
                ));
            }
        }
        if let Some(sections) = &self.explanation_sections {
            if !sections.is_object() {
                return Err(RecordError::InvalidFields(
                    "explanation_sections must be an object".to_string(),
                ));
            }
        }
        Ok(())
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum TextOrNumber {
    Text(String),
    Number(i64),
}

fn text_or_number<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(
        Option::<TextOrNumber>::deserialize(deserializer)?.map(|v| match v {
            TextOrNumber::Text(s) => s,
            TextOrNumber::Number(n) => n.to_string(),
        }),
    )
}

#[derive(Deserialize)]
#[serde(untagged)]
enum AnswerRepr {
    Single(String),
    Many(Vec<String>),
}

// Some exports carry the answer as a one-element list.
fn single_answer<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    match AnswerRepr::deserialize(deserializer)? {
        AnswerRepr::Single(s) => Ok(s),
        AnswerRepr::Many(list) => list
            .into_iter()
            .next()
            .ok_or_else(|| D::Error::custom("correct_answer list is empty")),
    }
}

static DRIVE_FILE_ID_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    vec![
        Regex::new(r"/file/d/([a-zA-Z0-9_-]+)").unwrap(),
        Regex::new(r"/d/([a-zA-Z0-9_-]+)").unwrap(),
        Regex::new(r"open\?id=([a-zA-Z0-9_-]+)").unwrap(),
        Regex::new(r"id=([a-zA-Z0-9_-]+)").unwrap(),
    ]
});

/// Rewrites Google Drive share links to the embeddable preview form.
/// Anything else is returned unchanged.
pub fn normalize_image_url(url: &str) -> String {
    if !url.contains("drive.google.com") {
        return url.to_string();
    }
    DRIVE_FILE_ID_PATTERNS
        .iter()
        .find_map(|re| re.captures(url))
        .map(|caps| format!("https://drive.google.com/file/d/{}/preview", &caps[1]))
        .unwrap_or_else(|| url.to_string())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Created,
    Updated,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Question {
    pub key: QuestionKey,
    pub fields: QuestionFields,
}

impl Question {
    pub fn new(key: QuestionKey, fields: QuestionFields) -> Self {
        Question { key, fields }.normalized()
    }

    pub fn normalized(mut self) -> Self {
        self.fields.image_url = self
            .fields
            .image_url
            .as_deref()
            .map(normalize_image_url);
        self
    }

    /// Creates the row for this key, or overwrites every column of the
    /// existing one. Fields missing from the payload are stored as NULL.
    pub async fn upsert(&self, conn: &mut SqliteConnection) -> Result<UpsertOutcome, sqlx::Error> {
        let existing = sqlx::query_scalar::<_, i64>("SELECT 1 FROM mcqs WHERE id = ?")
            .bind(self.key.as_str())
            .fetch_optional(&mut *conn)
            .await?;

        let f = &self.fields;
        sqlx::query(
            r#"
            INSERT INTO mcqs (
                id, question_number, question_text, options, correct_answer,
                correct_answer_text, subspecialty, source_file, exam_type, exam_year,
                ai_generated, unified_explanation, fixed_at, word_count, explanation,
                explanation_sections, verification_confidence, primary_category,
                secondary_category, key_concept, difficulty_level, image_url, loaded_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                question_number = excluded.question_number,
                question_text = excluded.question_text,
                options = excluded.options,
                correct_answer = excluded.correct_answer,
                correct_answer_text = excluded.correct_answer_text,
                subspecialty = excluded.subspecialty,
                source_file = excluded.source_file,
                exam_type = excluded.exam_type,
                exam_year = excluded.exam_year,
                ai_generated = excluded.ai_generated,
                unified_explanation = excluded.unified_explanation,
                fixed_at = excluded.fixed_at,
                word_count = excluded.word_count,
                explanation = excluded.explanation,
                explanation_sections = excluded.explanation_sections,
                verification_confidence = excluded.verification_confidence,
                primary_category = excluded.primary_category,
                secondary_category = excluded.secondary_category,
                key_concept = excluded.key_concept,
                difficulty_level = excluded.difficulty_level,
                image_url = excluded.image_url,
                loaded_at = excluded.loaded_at
            "#,
        )
        .bind(self.key.as_str())
        .bind(&f.question_number)
        .bind(&f.question_text)
        .bind(f.options.as_ref().map(Json))
        .bind(&f.correct_answer)
        .bind(&f.correct_answer_text)
        .bind(&f.subspecialty)
        .bind(&f.source_file)
        .bind(&f.exam_type)
        .bind(&f.exam_year)
        .bind(f.ai_generated)
        .bind(&f.unified_explanation)
        .bind(f.fixed_at)
        .bind(f.word_count)
        .bind(&f.explanation)
        .bind(f.explanation_sections.as_ref().map(Json))
        .bind(&f.verification_confidence)
        .bind(&f.primary_category)
        .bind(&f.secondary_category)
        .bind(&f.key_concept)
        .bind(&f.difficulty_level)
        .bind(&f.image_url)
        .bind(Utc::now())
        .execute(&mut *conn)
        .await?;

        Ok(match existing {
            Some(_) => UpsertOutcome::Updated,
            None => UpsertOutcome::Created,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn numeric_and_string_keys_are_the_same_token() {
        let a = QuestionKey::from_json(&json!("99993310")).unwrap();
        let b = QuestionKey::from_json(&json!(99993310)).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.as_str(), "99993310");
    }

    #[test]
    fn keys_are_not_numbers() {
        let a = QuestionKey::from_json(&json!("007")).unwrap();
        let b = QuestionKey::from_json(&json!(7)).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn rejects_missing_or_fractional_keys() {
        assert!(matches!(
            QuestionKey::from_json(&Value::Null),
            Err(RecordError::InvalidKey(_))
        ));
        assert!(QuestionKey::from_json(&json!(1.5)).is_err());
        assert!(QuestionKey::from_json(&json!("  ")).is_err());
    }

    #[test]
    fn decodes_fixture_fields() {
        let fields = QuestionFields::from_json(&json!({
            "question_number": "339",
            "question_text": "Site of lesion in weber syndrome",
            "options": {"A": "Base of midbrain", "B": "tegmentum", "C": "tectum"},
            "correct_answer": "A",
            "subspecialty": "Vascular Neurology/Stroke",
            "exam_type": "Part II",
            "exam_year": 2020,
            "explanation_sections": {"clinical_pearls": "Ventral midbrain."},
            "source_file": "vascular_mcqs.json"
        }))
        .unwrap();

        assert_eq!(fields.exam_year.as_deref(), Some("2020"));
        assert_eq!(fields.question_number.as_deref(), Some("339"));
        assert_eq!(fields.options.unwrap()["B"], "tegmentum");
        assert!(!fields.ai_generated);
        assert!(fields.image_url.is_none());
    }

    #[test]
    fn answer_list_uses_first_entry() {
        let fields = QuestionFields::from_json(&json!({
            "question_text": "q",
            "correct_answer": ["C", "D"],
            "subspecialty": "Epilepsy"
        }))
        .unwrap();
        assert_eq!(fields.correct_answer, "C");
    }

    #[test]
    fn rejects_bad_shapes() {
        let missing_text = json!({"correct_answer": "A", "subspecialty": "Epilepsy"});
        let unknown_field = json!({
            "question_text": "q", "correct_answer": "A", "subspecialty": "Epilepsy",
            "colour": "blue"
        });
        let long_answer = json!({
            "question_text": "q", "correct_answer": "A, B, C, D, E, F, G", "subspecialty": "Epilepsy"
        });
        let scalar_options = json!({
            "question_text": "q", "correct_answer": "A", "subspecialty": "Epilepsy",
            "options": "A) yes"
        });
        let listed_sections = json!({
            "question_text": "q", "correct_answer": "A", "subspecialty": "Epilepsy",
            "explanation_sections": ["conceptual_foundation", "pathophysiology"]
        });

        for bad in [
            missing_text,
            unknown_field,
            long_answer,
            scalar_options,
            listed_sections,
            Value::Null,
        ] {
            assert!(
                matches!(QuestionFields::from_json(&bad), Err(RecordError::InvalidFields(_))),
                "accepted {bad}"
            );
        }
    }

    #[test]
    fn column_length_limits_apply_to_every_bounded_field() {
        let base = json!({
            "question_text": "q", "correct_answer": "A", "subspecialty": "Epilepsy"
        });
        let too_long = [
            ("question_number", "Q".repeat(21)),
            ("subspecialty", "S".repeat(101)),
            ("exam_type", "E".repeat(51)),
            ("exam_year", "2020-2021-x".to_string()),
            ("source_file", "f".repeat(256)),
            ("primary_category", "c".repeat(101)),
            ("difficulty_level", "d".repeat(51)),
            ("image_url", format!("https://example.org/{}", "i".repeat(200))),
        ];

        for (field, value) in too_long {
            let mut payload = base.clone();
            payload[field] = json!(value);
            let err = QuestionFields::from_json(&payload).unwrap_err();
            assert!(
                matches!(&err, RecordError::InvalidFields(msg) if msg.starts_with(field)),
                "{field}: {err}"
            );
        }

        let mut at_limit = base.clone();
        at_limit["question_number"] = json!("Q".repeat(20));
        at_limit["exam_year"] = json!("2020/2021");
        assert!(QuestionFields::from_json(&at_limit).is_ok());
    }

    #[test]
    fn drive_links_become_preview_links() {
        assert_eq!(
            normalize_image_url("https://drive.google.com/file/d/abc_12-3/view?usp=sharing"),
            "https://drive.google.com/file/d/abc_12-3/preview"
        );
        assert_eq!(
            normalize_image_url("https://drive.google.com/open?id=XYZ"),
            "https://drive.google.com/file/d/XYZ/preview"
        );
        assert_eq!(
            normalize_image_url("https://example.org/img.png"),
            "https://example.org/img.png"
        );
        assert_eq!(
            normalize_image_url("https://drive.google.com/drive/my-drive"),
            "https://drive.google.com/drive/my-drive"
        );
    }
}

use crate::error::RecordError;
use chrono::{DateTime, Utc};
use regex::Regex;
use serde::de::Error as _;
use serde::{Deserialize, Deserializer};
use serde_json::Value;
use sqlx::SqliteConnection;
use sqlx::types::Json;
use std::fmt;
use std::sync::LazyLock;
