use sqlx::error::ErrorKind;
use thiserror::Error;

/// Why a single fixture entry could not be loaded.
///
/// These never abort a batch. The loader records them and moves on to the
/// next entry; anything that should abort the batch is returned as an
/// `anyhow::Error` instead.
#[derive(Debug, Error)]
pub enum RecordError {
    #[error("expected model `{expected}`, found {}", describe_model(.found))]
    UnexpectedModel {
        expected: &'static str,
        found: Option<String>,
    },

    #[error("invalid primary key: {0}")]
    InvalidKey(String),

    #[error("invalid fields: {0}")]
    InvalidFields(String),

    #[error("storage rejected record: {0}")]
    Storage(sqlx::Error),
}

// Primary SQLite result codes that describe the row being written rather
// than the state of the database.
const SQLITE_TOOBIG: i64 = 18;
const SQLITE_CONSTRAINT: i64 = 19;
const SQLITE_MISMATCH: i64 = 20;

impl RecordError {
    /// Sorts a write error into the record tier or the batch tier.
    ///
    /// Constraint violations (including `RAISE(ABORT)` from triggers) and
    /// type mismatches come back as `Ok(RecordError::Storage)`. Everything
    /// else, such as a locked or busy database, I/O failures or pool
    /// errors, is handed back unchanged as `Err` for the caller to propagate.
    pub fn from_storage(err: sqlx::Error) -> Result<RecordError, sqlx::Error> {
        let rejects_record = match &err {
            sqlx::Error::Database(db) => match db.kind() {
                ErrorKind::UniqueViolation
                | ErrorKind::ForeignKeyViolation
                | ErrorKind::NotNullViolation
                | ErrorKind::CheckViolation => true,
                _ => db
                    .code()
                    .and_then(|code| code.parse::<i64>().ok())
                    .is_some_and(|code| {
                        matches!(code & 0xff, SQLITE_TOOBIG | SQLITE_CONSTRAINT | SQLITE_MISMATCH)
                    }),
            },
            _ => false,
        };

        if rejects_record {
            Ok(RecordError::Storage(err))
        } else {
            Err(err)
        }
    }
}

fn describe_model(found: &Option<String>) -> String {
    match found {
        Some(model) => format!("`{}`", model),
        None => "no model".to_string(),
    }
}
