/// Discriminator carried by every MCQ entry in a fixture document.
pub const MCQ_MODEL: &str = "mcq.mcq";

/// One element of a fixture document, kept loose until it is loaded so a
/// single malformed entry cannot reject the whole file.
#[derive(Debug, Clone, PartialEq)]
pub struct FixtureEntry {
    pub model: Option<String>,
    pub pk: Value,
    pub fields: Value,
}

impl FixtureEntry {
    pub fn mcq(pk: impl Into<Value>, fields: Value) -> Self {
        FixtureEntry {
            model: Some(MCQ_MODEL.to_string()),
            pk: pk.into(),
            fields,
        }
    }

    /// The key as written in the fixture, for log lines about entries
    /// that never made it to a `Question`.
    pub fn raw_key(&self) -> Option<String> {
        match &self.pk {
            Value::String(s) => Some(s.clone()),
            Value::Null => None,
            other => Some(other.to_string()),
        }
    }

    pub fn to_question(&self) -> Result<Question, RecordError> {
        if self.model.as_deref() != Some(MCQ_MODEL) {
            return Err(RecordError::UnexpectedModel {
                expected: MCQ_MODEL,
                found: self.model.clone(),
            });
        }
        let key = QuestionKey::from_json(&self.pk)?;
        let fields = QuestionFields::from_json(&self.fields)?;
        Ok(Question::new(key, fields))
    }
}

impl From<Value> for FixtureEntry {
    fn from(value: Value) -> Self {
        match value {
            Value::Object(mut obj) => FixtureEntry {
                model: obj.get("model").and_then(Value::as_str).map(str::to_string),
                pk: obj.remove("pk").unwrap_or(Value::Null),
                fields: obj.remove("fields").unwrap_or(Value::Null),
            },
            _ => FixtureEntry {
                model: None,
                pk: Value::Null,
                fields: Value::Null,
            },
        }
    }
}

/// Parses a fixture document: a JSON array of `{model, pk, fields}` objects.
pub fn parse_fixture(json: &str) -> anyhow::Result<Vec<FixtureEntry>> {
    let raw: Vec<Value> =
        serde_json::from_str(json).context("Fixture document must be a JSON array.")?;
    Ok(raw.into_iter().map(FixtureEntry::from).collect())
}

#[derive(Debug)]
pub struct FixtureSource {
    pub path: PathBuf,
    pub entries: Vec<FixtureEntry>,
}

pub fn load_fixture_file(path: &Path) -> anyhow::Result<FixtureSource> {
    let json = fs::read_to_string(path)
        .with_context(|| format!("Failed to read fixture file '{}'", path.display()))?;

    let entries = parse_fixture(&json)
        .with_context(|| format!("'{}' is not a fixture document", path.display()))?;

    debug!(path = %path.display(), entries = entries.len(), "read fixture file");

    Ok(FixtureSource {
        path: path.to_path_buf(),
        entries,
    })
}

/// Loads every `*.json` file directly inside `dir`, in file name order.
pub fn load_fixture_dir(dir: &Path) -> anyhow::Result<Vec<FixtureSource>> {
    let mut paths = Vec::new();
    for entry in fs::read_dir(dir)
        .with_context(|| format!("Failed to read fixture directory '{}'", dir.display()))?
    {
        let path = entry?.path();
        if path.is_file() && path.extension().is_some_and(|ext| ext == "json") {
            paths.push(path);
        }
    }
    paths.sort();

    if paths.is_empty() {
        warn!(dir = %dir.display(), "no fixture files found");
    }

    paths.iter().map(|p| load_fixture_file(p)).collect()
}

/// A file is loaded on its own, a directory file by file.
pub fn load_fixtures(path: &Path) -> anyhow::Result<Vec<FixtureSource>> {
    if path.is_dir() {
        load_fixture_dir(path)
    } else {
        Ok(vec![load_fixture_file(path)?])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn weber() -> Value {
        json!({
            "model": "mcq.mcq",
            "pk": "99993310",
            "fields": {
                "question_text": "Site of lesion in weber syndrome",
                "options": {"A": "Base of midbrain", "B": "tegmentum", "C": "tectum"},
                "correct_answer": "A",
                "subspecialty": "Vascular Neurology/Stroke",
                "exam_year": 2020
            }
        })
    }

    #[test]
    fn entry_becomes_question() {
        let entry = FixtureEntry::from(weber());
        let question = entry.to_question().unwrap();
        assert_eq!(question.key.as_str(), "99993310");
        assert_eq!(question.fields.subspecialty, "Vascular Neurology/Stroke");
    }

    #[test]
    fn wrong_or_missing_model_is_rejected() {
        let mut other = weber();
        other["model"] = json!("mcq.flashcard");
        let err = FixtureEntry::from(other).to_question().unwrap_err();
        assert!(matches!(
            err,
            RecordError::UnexpectedModel { found: Some(ref m), .. } if m == "mcq.flashcard"
        ));

        let mut missing = weber();
        missing.as_object_mut().unwrap().remove("model");
        let err = FixtureEntry::from(missing).to_question().unwrap_err();
        assert!(matches!(err, RecordError::UnexpectedModel { found: None, .. }));
    }

    #[test]
    fn non_object_entries_survive_parsing() {
        let entries = parse_fixture(&format!("[{}, 42, \"oops\"]", weber())).unwrap();
        assert_eq!(entries.len(), 3);
        assert!(entries[0].to_question().is_ok());
        assert!(entries[1].to_question().is_err());
        assert!(entries[2].to_question().is_err());
    }

    #[test]
    fn document_must_be_an_array() {
        assert!(parse_fixture("{\"model\": \"mcq.mcq\"}").is_err());
        assert!(parse_fixture("not json").is_err());
    }

    #[test]
    fn directory_loads_json_files_in_name_order() {
        let dir = tempfile::tempdir().unwrap();
        for (name, pk) in [("02_b.json", "2"), ("01_a.json", "1")] {
            let mut entry = weber();
            entry["pk"] = json!(pk);
            fs::write(dir.path().join(name), format!("[{}]", entry)).unwrap();
        }
        fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

        let sources = load_fixtures(dir.path()).unwrap();
        assert_eq!(sources.len(), 2);
        assert!(sources[0].path.ends_with("01_a.json"));
        assert_eq!(sources[0].entries[0].raw_key().as_deref(), Some("1"));
        assert!(sources[1].path.ends_with("02_b.json"));
    }

    #[test]
    fn file_that_is_not_an_array_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("object.json");
        fs::write(&path, weber().to_string()).unwrap();

        let err = load_fixture_file(&path).unwrap_err();
        assert!(format!("{err:#}").contains("must be a JSON array"));
    }

    #[test]
    fn missing_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(load_fixtures(&dir.path().join("absent.json")).is_err());
    }
}

use crate::error::RecordError;
use crate::questions::{Question, QuestionFields, QuestionKey};
use anyhow::Context;
use serde_json::Value;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
