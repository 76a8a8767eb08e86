use regex::Regex;
use serde::Serialize;
use std::path::Path;
use std::sync::OnceLock;

use crate::error::{LedgerError, LedgerResult};
use crate::header_map::{
    cell_float, cell_int, normalize_header, CONTRIBUTION_ALIAS_SPECS, CONTRIBUTION_HEADER_MATCH,
    CONTRIBUTION_REQUIRED_FIELDS,
};
use crate::models::{FileType, Part, RawRecord, Scheme};

/// Where the rows of one contribution sheet are going.
#[derive(Debug, Clone)]
pub struct RecordTarget<'a> {
    pub period_id: i64,
    pub source_file_id: &'a str,
    pub scheme: Scheme,
    pub part: Part,
    pub file_type: FileType,
}

/// Turns the rows of one contribution sheet (header first) into raw records.
///
/// Fully empty rows and rows without a sequence, name or id number are
/// skipped silently. The `应补(退)费额` column is optional; without it the
/// adjust amount mirrors the amount due.
pub fn build_raw_records(
    rows: &[Vec<String>],
    target: &RecordTarget<'_>,
) -> LedgerResult<Vec<RawRecord>> {
    let Some((header, body)) = rows.split_first() else {
        return Err(LedgerError::TooFewRows);
    };
    let columns = normalize_header(
        header,
        CONTRIBUTION_ALIAS_SPECS,
        CONTRIBUTION_REQUIRED_FIELDS,
        CONTRIBUTION_HEADER_MATCH,
    )?;
    let has_adjust_column = columns.contains("amount_adjust");

    let mut records = Vec::new();
    for row in body {
        if row.iter().all(|cell| cell.trim().is_empty()) {
            continue;
        }
        let sequence = columns.text(row, "sequence");
        let name = columns.text(row, "name");
        let id_number = columns.text(row, "id_number");
        if sequence.is_empty() || name.is_empty() || id_number.is_empty() {
            continue;
        }

        let amount_due = cell_float(&columns.text(row, "amount_due"));
        let amount_adjust = if has_adjust_column {
            cell_float(&columns.text(row, "amount_adjust"))
        } else {
            amount_due
        };

        records.push(RawRecord {
            period_id: target.period_id,
            source_file_id: target.source_file_id.to_string(),
            sequence: cell_int(&sequence),
            name,
            id_type: columns.text(row, "id_type"),
            id_number,
            department: columns.text(row, "department"),
            pay_salary: cell_float(&columns.text(row, "salary")),
            pay_base: cell_float(&columns.text(row, "base")),
            rate_text: columns.text(row, "rate"),
            amount_due,
            amount_adjust,
            person_code: columns.text(row, "person_code"),
            scheme: target.scheme,
            part: target.part,
            file_type: target.file_type,
        });
    }

    if records.is_empty() {
        return Err(LedgerError::NoValidRows("缴费明细"));
    }
    Ok(records)
}

/// Scheme, part and coverage inferred from an adjustment export's file name,
/// e.g. `张三职工基本养老保险(个人缴纳)_2025-01至2025-03_未申报信息明细.xlsx`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AdjustmentFileName {
    pub scheme: Scheme,
    pub part: Part,
    pub coverage_from: Option<String>,
    pub coverage_to: Option<String>,
}

impl AdjustmentFileName {
    pub fn notes(&self) -> String {
        match (&self.coverage_from, &self.coverage_to) {
            (Some(from), Some(to)) => format!("{from}至{to}"),
            _ => String::new(),
        }
    }
}

fn coverage_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(\d{4}-\d{2})\s*至\s*(\d{4}-\d{2})").expect("coverage regex"))
}

// Order matters: "养老保险" must win over the medical keywords, and
// "医疗保险" is checked before "大额医疗".
const SCHEME_KEYWORDS: &[(&str, Scheme)] = &[
    ("职工基本养老保险", Scheme::Pension),
    ("养老保险", Scheme::Pension),
    ("失业保险", Scheme::Unemployment),
    ("工伤保险", Scheme::Injury),
    ("医疗保险", Scheme::Medical),
    ("大额医疗", Scheme::SeriousIllness),
];

pub fn parse_adjustment_file_name(file_name: &str) -> LedgerResult<AdjustmentFileName> {
    let stem = Path::new(file_name)
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or(file_name);

    let scheme = SCHEME_KEYWORDS
        .iter()
        .find(|(keyword, _)| stem.contains(keyword))
        .map(|(_, scheme)| *scheme)
        .ok_or_else(|| LedgerError::InvalidInput(format!("无法识别险种类型: {file_name}")))?;

    let part = if stem.contains("个人缴纳") {
        Part::Personal
    } else if stem.contains("单位缴纳") {
        Part::Unit
    } else if scheme == Scheme::Injury {
        Part::Unit
    } else {
        return Err(LedgerError::InvalidInput(format!(
            "无法识别缴费部分: {file_name}"
        )));
    };

    let (coverage_from, coverage_to) = match coverage_re().captures(stem) {
        Some(caps) => (
            caps.get(1).map(|m| m.as_str().to_string()),
            caps.get(2).map(|m| m.as_str().to_string()),
        ),
        None => (None, None),
    };

    Ok(AdjustmentFileName {
        scheme,
        part,
        coverage_from,
        coverage_to,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rows(lines: &[&[&str]]) -> Vec<Vec<String>> {
        lines
            .iter()
            .map(|line| line.iter().map(|c| (*c).to_string()).collect())
            .collect()
    }

    fn target(file_type: FileType) -> RecordTarget<'static> {
        RecordTarget {
            period_id: 7,
            source_file_id: "file-1",
            scheme: Scheme::Pension,
            part: Part::Personal,
            file_type,
        }
    }

    const HEADER: &[&str] = &[
        "序号", "姓名", "证件类型", "证件号码", "部门", "缴费工资", "缴费基数", "费率", "应缴费额",
    ];

    #[test]
    fn builds_records_and_skips_incomplete_rows() {
        let sheet = rows(&[
            HEADER,
            &["1", "张三", "居民身份证", "110101199001011234", "财务部", "12,000", "10000", "8%", "800"],
            &["", "", "", "", "", "", "", "", ""],
            &["2", "", "居民身份证", "110101199001015678", "", "9000", "9000", "8%", "720"],
            &["", "李四", "居民身份证", "110101199001019999", "", "9000", "9000", "8%", "720"],
            &["003", "王五", "", "110101199001010000", "", "abc", "5000", "8%", "400.50"],
        ]);
        let records = build_raw_records(&sheet, &target(FileType::Normal)).expect("build records");
        assert_eq!(records.len(), 2);

        let first = &records[0];
        assert_eq!(first.period_id, 7);
        assert_eq!(first.source_file_id, "file-1");
        assert_eq!(first.sequence, 1);
        assert_eq!(first.department, "财务部");
        assert_eq!(first.pay_salary, 12000.0);
        assert_eq!(first.rate_text, "8%");
        assert_eq!(first.amount_adjust, first.amount_due);

        let second = &records[1];
        assert_eq!(second.sequence, 3);
        assert_eq!(second.pay_salary, 0.0);
        assert_eq!(second.amount_due, 400.5);
        assert_eq!(second.scheme, Scheme::Pension);
        assert_eq!(second.file_type, FileType::Normal);
    }

    #[test]
    fn adjust_column_is_used_when_present() {
        let mut header = HEADER.to_vec();
        header.push("应补(退)费额");
        let sheet = rows(&[
            &header,
            &["1", "张三", "", "A1", "", "0", "5000", "8%", "400", "-120"],
        ]);
        let records =
            build_raw_records(&sheet, &target(FileType::Adjustment)).expect("build records");
        assert_eq!(records[0].amount_due, 400.0);
        assert_eq!(records[0].amount_adjust, -120.0);
        assert_eq!(records[0].file_type, FileType::Adjustment);
    }

    #[test]
    fn sheet_without_valid_rows_is_rejected() {
        let sheet = rows(&[HEADER, &["", "", "", "", "", "", "", "", ""]]);
        let err = build_raw_records(&sheet, &target(FileType::Normal)).expect_err("no rows");
        assert!(matches!(err, LedgerError::NoValidRows(_)));
        assert_eq!(err.category(), "NO_DATA_ERROR");
    }

    #[test]
    fn missing_required_column_fails_before_rows_are_read() {
        let sheet = rows(&[
            &["序号", "姓名", "证件号码", "缴费工资", "缴费基数", "费率"],
            &["1", "张三", "A1", "1", "1", "8%"],
        ]);
        let err = build_raw_records(&sheet, &target(FileType::Normal)).expect_err("no amount");
        assert!(matches!(
            err,
            LedgerError::MissingColumn {
                field: "amount_due",
                ..
            }
        ));
    }

    #[test]
    fn adjustment_file_names_resolve_scheme_part_and_coverage() {
        let parsed = parse_adjustment_file_name(
            "张英俊职工基本养老保险(个人缴纳)_2025-01至2025-03_未申报信息明细.xlsx",
        )
        .expect("pension personal");
        assert_eq!(parsed.scheme, Scheme::Pension);
        assert_eq!(parsed.part, Part::Personal);
        assert_eq!(parsed.notes(), "2025-01至2025-03");

        let injury = parse_adjustment_file_name("工伤保险_2025-02至2025-02.xlsx").expect("injury");
        assert_eq!(injury.scheme, Scheme::Injury);
        assert_eq!(injury.part, Part::Unit);

        let medical = parse_adjustment_file_name("职工基本医疗保险(单位缴纳).xls").expect("medical");
        assert_eq!(medical.scheme, Scheme::Medical);
        assert_eq!(medical.part, Part::Unit);
        assert_eq!(medical.notes(), "");

        let serious = parse_adjustment_file_name("大额医疗(个人缴纳).xlsx").expect("serious");
        assert_eq!(serious.scheme, Scheme::SeriousIllness);

        assert!(parse_adjustment_file_name("住房公积金(个人缴纳).xlsx").is_err());
        assert!(parse_adjustment_file_name("失业保险.xlsx").is_err());
    }
}
