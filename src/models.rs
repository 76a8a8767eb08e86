use serde::{Deserialize, Serialize};
use std::fmt;

/// Insurance category. Declaration order is the reporting order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Scheme {
    Pension,
    Medical,
    SeriousIllness,
    Unemployment,
    Injury,
}

impl Scheme {
    pub const ALL: [Scheme; 5] = [
        Scheme::Pension,
        Scheme::Medical,
        Scheme::SeriousIllness,
        Scheme::Unemployment,
        Scheme::Injury,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pension => "pension",
            Self::Medical => "medical",
            Self::SeriousIllness => "serious_illness",
            Self::Unemployment => "unemployment",
            Self::Injury => "injury",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Pension => "养老保险",
            Self::Medical => "医疗保险",
            Self::SeriousIllness => "大额医疗",
            Self::Unemployment => "失业保险",
            Self::Injury => "工伤保险",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|scheme| scheme.as_str() == raw.trim())
    }
}

impl fmt::Display for Scheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Who pays: the employee ("personal") or the employer ("unit").
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Part {
    Personal,
    Unit,
}

impl Part {
    pub const ALL: [Part; 2] = [Part::Personal, Part::Unit];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Personal => "personal",
            Self::Unit => "unit",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Personal => "个人",
            Self::Unit => "单位",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|part| part.as_str() == raw.trim())
    }
}

impl fmt::Display for Part {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileType {
    Normal,
    Adjustment,
}

impl FileType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Normal => "normal",
            Self::Adjustment => "adjustment",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim() {
            "normal" => Some(Self::Normal),
            "adjustment" => Some(Self::Adjustment),
            _ => None,
        }
    }

    pub fn is_adjustment(self) -> bool {
        self == Self::Adjustment
    }
}

impl fmt::Display for FileType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub const PERIOD_STATUS_DRAFT: &str = "draft";
pub const PERIOD_STATUS_PROCESSED: &str = "processed";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Period {
    pub id: i64,
    pub year_month: String,
    pub status: String,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceFile {
    pub id: String,
    pub period_id: i64,
    pub file_name: String,
    pub stored_path: String,
    pub original_name: String,
    pub scheme: Scheme,
    pub part: Part,
    pub file_type: FileType,
    pub rows: usize,
    pub status: String,
    pub content_sha1: String,
    pub notes: String,
    pub uploaded_at: String,
}

/// One contribution line from one uploaded file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawRecord {
    pub period_id: i64,
    pub source_file_id: String,
    pub sequence: i64,
    pub name: String,
    pub id_type: String,
    pub id_number: String,
    pub department: String,
    pub pay_salary: f64,
    pub pay_base: f64,
    pub rate_text: String,
    pub amount_due: f64,
    pub amount_adjust: f64,
    pub person_code: String,
    pub scheme: Scheme,
    pub part: Part,
    pub file_type: FileType,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RosterEntry {
    pub period_id: i64,
    pub id_number: String,
    pub name: String,
    pub department: String,
    pub title: String,
    pub remarks: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PeriodSummary {
    pub period_id: i64,
    pub scheme: Scheme,
    pub part: Part,
    pub headcount: usize,
    pub base_total: f64,
    pub amount_total: f64,
    pub is_adjustment: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersonalCharge {
    pub period_id: i64,
    pub name: String,
    pub id_number: String,
    pub department: String,
    pub base: f64,
    pub pension: f64,
    pub medical_maternity: f64,
    pub serious_illness: f64,
    pub unemployment: f64,
    pub subtotal: f64,
    pub is_adjustment: bool,
}

/// `medical_maternity` already includes `serious_illness`; the latter is kept
/// for reporting only and is not added again into `subtotal`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnitCharge {
    pub period_id: i64,
    pub name: String,
    pub id_number: String,
    pub department: String,
    pub base: f64,
    pub pension: f64,
    pub medical_maternity: f64,
    pub serious_illness: f64,
    pub injury: f64,
    pub unemployment: f64,
    pub subtotal: f64,
    pub is_adjustment: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ParseResult {
    pub file: SourceFile,
    pub imported: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProcessOutput {
    pub period_id: i64,
    pub summaries: Vec<PeriodSummary>,
    pub personal: Vec<PersonalCharge>,
    pub unit: Vec<UnitCharge>,
}

pub(crate) fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
