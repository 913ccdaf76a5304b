use serde::Serialize;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;

mod record;

pub use record::{
    CardKind, NarrativeAssessment, RecordError, ReportCard, StandardAssessment, Subject,
    TYPE_NARRATIVE, TYPE_STANDARD, TYPE_STANDARDS_BASED,
};

/// Failures raised while reading or parsing a report card source.
///
/// Cloneable so one failed load can be reported to every caller waiting on it.
#[derive(Debug, Clone, thiserror::Error)]
pub enum CatalogError {
    #[error("report card source {} is unavailable: {source}", .path.display())]
    SourceUnavailable {
        path: PathBuf,
        #[source]
        source: Arc<std::io::Error>,
    },
    #[error("malformed report card source: {reason}")]
    MalformedSource { reason: String },
    #[error("report card #{index} is malformed: {source}")]
    MalformedRecord {
        index: usize,
        #[source]
        source: RecordError,
    },
}

impl CatalogError {
    pub fn malformed_source<S: Into<String>>(reason: S) -> Self {
        CatalogError::MalformedSource {
            reason: reason.into(),
        }
    }
}

/// Temporal key used to group report cards into filing periods.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PeriodField {
    /// Full filing date, e.g. `2025-01-01`.
    ReferenceDate,
    /// Calendar month, e.g. `2025-01`.
    #[default]
    MonthYear,
}

impl PeriodField {
    pub fn as_str(&self) -> &'static str {
        match self {
            PeriodField::ReferenceDate => "reference_date",
            PeriodField::MonthYear => "month_year",
        }
    }
}

impl fmt::Display for PeriodField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PeriodField {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "reference_date" | "date" => Ok(PeriodField::ReferenceDate),
            "month_year" | "month" => Ok(PeriodField::MonthYear),
            other => Err(format!("unknown period field `{other}`")),
        }
    }
}

/// Where the raw catalog document comes from.
pub trait CardSource: Send + Sync + 'static {
    /// Human readable location used in logs and error messages.
    fn describe(&self) -> String;
    fn read(&self) -> Result<String, CatalogError>;
}

/// JSON document stored on disk.
#[derive(Debug, Clone)]
pub struct FileSource {
    path: PathBuf,
}

impl FileSource {
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl CardSource for FileSource {
    fn describe(&self) -> String {
        self.path.display().to_string()
    }

    fn read(&self) -> Result<String, CatalogError> {
        fs::read_to_string(&self.path).map_err(|source| CatalogError::SourceUnavailable {
            path: self.path.clone(),
            source: Arc::new(source),
        })
    }
}

/// Document held in memory, mostly for embedding and tests.
#[derive(Debug, Clone)]
pub struct InlineSource {
    label: String,
    document: String,
}

impl InlineSource {
    pub fn new<S: Into<String>>(document: S) -> Self {
        Self::labeled("inline", document)
    }

    pub fn labeled<L: Into<String>, S: Into<String>>(label: L, document: S) -> Self {
        Self {
            label: label.into(),
            document: document.into(),
        }
    }
}

impl CardSource for InlineSource {
    fn describe(&self) -> String {
        self.label.clone()
    }

    fn read(&self) -> Result<String, CatalogError> {
        Ok(self.document.clone())
    }
}
