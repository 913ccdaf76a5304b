use chrono::NaiveDate;
use serde::Serialize;
use serde_json::{Map, Value, json};
use tracing::debug;

use crate::PeriodField;

pub const TYPE_STANDARD: &str = "standard";
pub const TYPE_NARRATIVE: &str = "narrative";
pub const TYPE_STANDARDS_BASED: &str = "standards_based";

/// Reasons a single catalog entry cannot become a [`ReportCard`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RecordError {
    #[error("entry is not a JSON object")]
    NotAnObject,
    #[error("missing required field `{0}`")]
    MissingField(&'static str),
}

/// One graded subject on a standard report card.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Subject {
    pub name: String,
    pub grade: Option<String>,
}

/// One assessed standard on a standards-based report card.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StandardAssessment {
    pub name: String,
    pub rating: Option<String>,
    pub comment: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct NarrativeAssessment {
    pub assessment: Option<String>,
    pub teacher_name: Option<String>,
    pub areas_of_strength: Vec<String>,
    pub areas_for_growth: Vec<String>,
}

/// Variant payload, resolved once when the card is built.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CardKind {
    Standard { subjects: Vec<Subject> },
    Narrative(NarrativeAssessment),
    StandardsBased { standards: Vec<StandardAssessment> },
    /// Type tag outside the three known variants, kept verbatim.
    Unrecognized { tag: String },
}

impl CardKind {
    fn from_payload(tag: &str, payload: &Map<String, Value>) -> Self {
        match tag {
            TYPE_STANDARD => CardKind::Standard {
                subjects: parse_entries(payload.get("subjects"), parse_subject),
            },
            TYPE_NARRATIVE => CardKind::Narrative(NarrativeAssessment {
                assessment: text(payload, "narrative_assessment"),
                teacher_name: text(payload, "teacher_name"),
                areas_of_strength: string_list(payload.get("areas_of_strength")),
                areas_for_growth: string_list(payload.get("areas_for_growth")),
            }),
            TYPE_STANDARDS_BASED => CardKind::StandardsBased {
                standards: parse_entries(payload.get("standards"), parse_standard),
            },
            other => CardKind::Unrecognized {
                tag: other.to_string(),
            },
        }
    }

    pub fn tag(&self) -> &str {
        match self {
            CardKind::Standard { .. } => TYPE_STANDARD,
            CardKind::Narrative(_) => TYPE_NARRATIVE,
            CardKind::StandardsBased { .. } => TYPE_STANDARDS_BASED,
            CardKind::Unrecognized { tag } => tag,
        }
    }

    pub fn display_label(&self) -> &str {
        match self {
            CardKind::Standard { .. } => "Standard",
            CardKind::Narrative(_) => "Narrative",
            CardKind::StandardsBased { .. } => "Standards-Based",
            CardKind::Unrecognized { tag } => tag,
        }
    }
}

/// Immutable report card built from one entry of the catalog document.
#[derive(Debug, Clone, PartialEq)]
pub struct ReportCard {
    id: String,
    report_card_type: String,
    student_name: String,
    grade_level: Option<String>,
    account_name: String,
    reference_date: Option<String>,
    month_year: Option<String>,
    kind: CardKind,
    payload: Map<String, Value>,
}

impl ReportCard {
    pub fn from_value(value: Value) -> Result<Self, RecordError> {
        match value {
            Value::Object(payload) => Self::from_payload(payload),
            _ => Err(RecordError::NotAnObject),
        }
    }

    pub fn from_payload(payload: Map<String, Value>) -> Result<Self, RecordError> {
        let id = scalar(payload.get("uuid"))
            .or_else(|| scalar(payload.get("id")))
            .filter(|id| !id.is_empty())
            .ok_or(RecordError::MissingField("uuid"))?;
        let report_card_type = scalar(payload.get("report_card_type"))
            .ok_or(RecordError::MissingField("report_card_type"))?;

        let reference_date = text(&payload, "reference_date");
        let month_year = text(&payload, "month_year")
            .or_else(|| reference_date.as_deref().and_then(month_of));
        let kind = CardKind::from_payload(&report_card_type, &payload);

        Ok(Self {
            student_name: text(&payload, "student_name").unwrap_or_default(),
            grade_level: scalar(payload.get("grade_level")),
            account_name: text(&payload, "account_name").unwrap_or_default(),
            id,
            report_card_type,
            reference_date,
            month_year,
            kind,
            payload,
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn report_card_type(&self) -> &str {
        &self.report_card_type
    }

    pub fn student_name(&self) -> &str {
        &self.student_name
    }

    pub fn grade_level(&self) -> Option<&str> {
        self.grade_level.as_deref()
    }

    pub fn account_name(&self) -> &str {
        &self.account_name
    }

    pub fn reference_date(&self) -> Option<&str> {
        self.reference_date.as_deref()
    }

    /// Explicit `month_year`, or the month of a `YYYY-MM-DD` reference date.
    pub fn month_year(&self) -> Option<&str> {
        self.month_year.as_deref()
    }

    pub fn period(&self, field: PeriodField) -> Option<&str> {
        match field {
            PeriodField::ReferenceDate => self.reference_date(),
            PeriodField::MonthYear => self.month_year(),
        }
    }

    pub fn kind(&self) -> &CardKind {
        &self.kind
    }

    pub fn is_standard(&self) -> bool {
        matches!(self.kind, CardKind::Standard { .. })
    }

    pub fn is_narrative(&self) -> bool {
        matches!(self.kind, CardKind::Narrative(_))
    }

    pub fn is_standards_based(&self) -> bool {
        matches!(self.kind, CardKind::StandardsBased { .. })
    }

    pub fn subjects(&self) -> &[Subject] {
        match &self.kind {
            CardKind::Standard { subjects } => subjects,
            _ => &[],
        }
    }

    pub fn narrative(&self) -> Option<&NarrativeAssessment> {
        match &self.kind {
            CardKind::Narrative(narrative) => Some(narrative),
            _ => None,
        }
    }

    pub fn narrative_assessment(&self) -> Option<&str> {
        self.narrative()?.assessment.as_deref()
    }

    pub fn teacher_name(&self) -> Option<&str> {
        self.narrative()?.teacher_name.as_deref()
    }

    pub fn areas_of_strength(&self) -> &[String] {
        self.narrative()
            .map(|n| n.areas_of_strength.as_slice())
            .unwrap_or_default()
    }

    pub fn areas_for_growth(&self) -> &[String] {
        self.narrative()
            .map(|n| n.areas_for_growth.as_slice())
            .unwrap_or_default()
    }

    pub fn standards(&self) -> &[StandardAssessment] {
        match &self.kind {
            CardKind::StandardsBased { standards } => standards,
            _ => &[],
        }
    }

    /// Raw payload lookup; JSON `null` reads as absent.
    pub fn field(&self, name: &str) -> Option<&Value> {
        self.payload.get(name).filter(|value| !value.is_null())
    }

    pub fn payload(&self) -> &Map<String, Value> {
        &self.payload
    }

    pub fn to_json_value(&self) -> Value {
        json!({
            "id": self.id,
            "report_card_type": self.report_card_type,
            "student_name": self.student_name,
            "grade_level": self.grade_level,
            "account_name": self.account_name,
            "reference_date": self.reference_date,
            "month_year": self.month_year,
            "details": self.kind,
            "data": self.payload,
        })
    }
}

macro_rules! payload_accessors {
    ($($name:ident => $key:literal),* $(,)?) => {
        impl ReportCard {
            $(
                pub fn $name(&self) -> Option<&Value> {
                    self.field($key)
                }
            )*
        }
    };
}

payload_accessors! {
    teacher => "teacher",
    attendance => "attendance",
    overall_comments => "overall_comments",
    gpa => "gpa",
    weighted_gpa => "weighted_gpa",
    courses => "courses",
    class_rank => "class_rank",
    class_size => "class_size",
    test_scores => "test_scores",
    conduct => "conduct",
    principal_comments => "principal_comments",
    counselor_comments => "counselor_comments",
    sections => "sections",
}

fn scalar(value: Option<&Value>) -> Option<String> {
    match value? {
        Value::String(text) => Some(text.clone()),
        Value::Number(number) => Some(number.to_string()),
        Value::Bool(flag) => Some(flag.to_string()),
        _ => None,
    }
}

fn text(payload: &Map<String, Value>, key: &str) -> Option<String> {
    payload.get(key).and_then(Value::as_str).map(str::to_string)
}

fn string_list(value: Option<&Value>) -> Vec<String> {
    value
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

fn parse_entries<T>(value: Option<&Value>, parse: fn(&Value) -> Option<T>) -> Vec<T> {
    let Some(items) = value.and_then(Value::as_array) else {
        return Vec::new();
    };

    items
        .iter()
        .filter_map(|item| {
            let parsed = parse(item);
            if parsed.is_none() {
                debug!(entry = %item, "skipping unreadable report card entry");
            }
            parsed
        })
        .collect()
}

fn parse_subject(value: &Value) -> Option<Subject> {
    let name = value.get("name")?.as_str()?.to_string();
    Some(Subject {
        name,
        grade: scalar(value.get("grade")),
    })
}

fn parse_standard(value: &Value) -> Option<StandardAssessment> {
    let name = value
        .get("name")
        .or_else(|| value.get("standard"))?
        .as_str()?
        .to_string();
    Some(StandardAssessment {
        name,
        rating: scalar(value.get("rating")),
        comment: value
            .get("comment")
            .and_then(Value::as_str)
            .map(str::to_string),
    })
}

fn month_of(date: &str) -> Option<String> {
    NaiveDate::parse_from_str(date, "%Y-%m-%d")
        .ok()
        .map(|date| date.format("%Y-%m").to_string())
}
