use std::collections::{BTreeMap, HashMap};

use crate::error::{LedgerError, LedgerResult};

#[derive(Debug)]
pub struct AliasSpec {
    pub field: &'static str,
    pub aliases: &'static [&'static str],
}

pub const CONTRIBUTION_ALIAS_SPECS: &[AliasSpec] = &[
    AliasSpec {
        field: "sequence",
        aliases: &["序号"],
    },
    AliasSpec {
        field: "name",
        aliases: &["姓名"],
    },
    AliasSpec {
        field: "id_type",
        aliases: &["证件类型"],
    },
    AliasSpec {
        field: "id_number",
        aliases: &["证件号码"],
    },
    AliasSpec {
        field: "department",
        aliases: &["部门"],
    },
    AliasSpec {
        field: "salary",
        aliases: &["缴费工资"],
    },
    AliasSpec {
        field: "base",
        aliases: &["缴费基数"],
    },
    AliasSpec {
        field: "rate",
        aliases: &["费率"],
    },
    AliasSpec {
        field: "amount_due",
        aliases: &["应缴费额"],
    },
    AliasSpec {
        field: "deduction",
        aliases: &["减免费额"],
    },
    AliasSpec {
        field: "amount_adjust",
        aliases: &["应补(退)费额"],
    },
    AliasSpec {
        field: "person_code",
        aliases: &["人员编号"],
    },
];

pub const CONTRIBUTION_REQUIRED_FIELDS: &[&str] = &[
    "sequence",
    "name",
    "id_number",
    "salary",
    "base",
    "rate",
    "amount_due",
];

pub const ROSTER_ALIAS_SPECS: &[AliasSpec] = &[
    AliasSpec {
        field: "name",
        aliases: &["姓名", "name"],
    },
    AliasSpec {
        field: "id_number",
        aliases: &["证件号码", "身份证号码", "身份证号", "idnumber", "id_no", "id"],
    },
    AliasSpec {
        field: "department",
        aliases: &["部门", "department", "dept"],
    },
    AliasSpec {
        field: "title",
        aliases: &["岗位", "职务", "title", "position"],
    },
    AliasSpec {
        field: "remarks",
        aliases: &["备注", "remarks", "remark", "note"],
    },
];

pub const ROSTER_REQUIRED_FIELDS: &[&str] = &["id_number", "department"];

pub fn trim_cell(text: &str) -> String {
    text.trim()
        .trim_start_matches('\u{feff}')
        .trim()
        .to_string()
}

/// How header cells are compared with aliases.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeaderMatch {
    /// The trimmed cell must equal the alias.
    Exact,
    /// Case and whitespace are ignored.
    Loose,
}

pub const CONTRIBUTION_HEADER_MATCH: HeaderMatch = HeaderMatch::Exact;
pub const ROSTER_HEADER_MATCH: HeaderMatch = HeaderMatch::Loose;

fn normalize_key(key: &str, mode: HeaderMatch) -> String {
    match mode {
        HeaderMatch::Exact => trim_cell(key),
        HeaderMatch::Loose => trim_cell(key)
            .to_lowercase()
            .chars()
            .filter(|c| !c.is_whitespace())
            .collect(),
    }
}

/// Sequence numbers and other integer cells. Never fails; garbage is 0.
pub fn cell_int(raw: &str) -> i64 {
    let text = trim_cell(raw);
    let text = text.trim_start_matches('0');
    if text.is_empty() {
        return 0;
    }
    if let Ok(value) = text.parse::<i64>() {
        return value;
    }
    match text.parse::<f64>() {
        Ok(value) if value.is_finite() => value.trunc() as i64,
        _ => 0,
    }
}

/// Currency and rate cells: tolerates `1,234.50` and `8%`. Never fails.
pub fn cell_float(raw: &str) -> f64 {
    let text = trim_cell(raw).replace(',', "");
    let text = text.strip_suffix('%').unwrap_or(&text).trim();
    if text.is_empty() {
        return 0.0;
    }
    match text.parse::<f64>() {
        Ok(value) if value.is_finite() => value,
        _ => 0.0,
    }
}

/// Column positions of the recognized fields of one header row.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HeaderMap {
    columns: BTreeMap<&'static str, usize>,
}

impl HeaderMap {
    pub fn resolve(header_row: &[String], specs: &'static [AliasSpec], mode: HeaderMatch) -> Self {
        let mut normalized: HashMap<String, usize> = HashMap::new();
        for (idx, cell) in header_row.iter().enumerate() {
            let key = normalize_key(cell, mode);
            if !key.is_empty() {
                normalized.entry(key).or_insert(idx);
            }
        }

        let mut columns = BTreeMap::new();
        for spec in specs {
            for alias in spec.aliases {
                if let Some(idx) = normalized.get(&normalize_key(alias, mode)) {
                    columns.insert(spec.field, *idx);
                    break;
                }
            }
        }
        Self { columns }
    }

    pub fn require(
        &self,
        specs: &'static [AliasSpec],
        required: &[&'static str],
    ) -> LedgerResult<()> {
        for &field in required {
            if self.columns.contains_key(field) {
                continue;
            }
            let label = specs
                .iter()
                .find(|spec| spec.field == field)
                .and_then(|spec| spec.aliases.first().copied())
                .unwrap_or(field);
            return Err(LedgerError::MissingColumn { field, label });
        }
        Ok(())
    }

    pub fn index(&self, field: &str) -> Option<usize> {
        self.columns.get(field).copied()
    }

    pub fn contains(&self, field: &str) -> bool {
        self.columns.contains_key(field)
    }

    /// Trimmed cell text, empty when the column or the cell is absent.
    pub fn text(&self, row: &[String], field: &str) -> String {
        self.index(field)
            .and_then(|idx| row.get(idx))
            .map(|cell| trim_cell(cell))
            .unwrap_or_default()
    }
}

/// Resolves `header_row` and fails on the first required field with no column.
pub fn normalize_header(
    header_row: &[String],
    specs: &'static [AliasSpec],
    required: &[&'static str],
    mode: HeaderMatch,
) -> LedgerResult<HeaderMap> {
    let map = HeaderMap::resolve(header_row, specs, mode);
    map.require(specs, required)?;
    Ok(map)
}
