use crate::error::{LedgerError, LedgerResult};
use crate::header_map::{
    normalize_header, ROSTER_ALIAS_SPECS, ROSTER_HEADER_MATCH, ROSTER_REQUIRED_FIELDS,
};
use crate::models::RosterEntry;

/// Roster rows (header first) to entries. Rows without an id number or a
/// department are dropped; at least one entry must survive.
pub fn build_roster_entries(rows: &[Vec<String>], period_id: i64) -> LedgerResult<Vec<RosterEntry>> {
    let Some((header, body)) = rows.split_first() else {
        return Err(LedgerError::TooFewRows);
    };
    let columns = normalize_header(header, ROSTER_ALIAS_SPECS, ROSTER_REQUIRED_FIELDS, ROSTER_HEADER_MATCH)?;

    let entries = body
        .iter()
        .filter_map(|row| {
            let id_number = columns.text(row, "id_number");
            let department = columns.text(row, "department");
            if id_number.is_empty() || department.is_empty() {
                return None;
            }
            Some(RosterEntry {
                period_id,
                id_number,
                name: columns.text(row, "name"),
                department,
                title: columns.text(row, "title"),
                remarks: columns.text(row, "remarks"),
            })
        })
        .collect::<Vec<_>>();

    if entries.is_empty() {
        return Err(LedgerError::NoValidRows("花名册"));
    }
    Ok(entries)
}
