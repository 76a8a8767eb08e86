use serde::Serialize;

use crate::error::LedgerResult;
use crate::models::{
    FileType, Part, Period, PeriodSummary, PersonalCharge, RawRecord, RosterEntry, Scheme,
    SourceFile, UnitCharge,
};
use crate::period_aggregation::Aggregates;

/// Which aggregate rows a write replaces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggregateScope {
    /// Every summary and charge row of the period, flagged or not. Also
    /// marks the period processed.
    Normal,
    /// Only the adjustment-flagged rows. Normal rows and the period status
    /// are left alone.
    Adjustment,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RosterCopy {
    pub source_period_id: i64,
    pub copied: usize,
}

/// Persistence for everything hanging off a period.
///
/// Every method that writes runs as one transaction: either all of its
/// deletes and inserts are applied, or none are.
pub trait PeriodStore {
    fn create_period(&self, year_month: &str) -> LedgerResult<Period>;
    fn load_period(&self, period_id: i64) -> LedgerResult<Period>;
    fn list_periods(&self) -> LedgerResult<Vec<Period>>;
    /// Removes the period and everything attached to it.
    fn delete_period(&self, period_id: i64) -> LedgerResult<()>;

    /// Drops the normal records and source file of (period, scheme, part)
    /// and stores `file` with `rows` in their place. Returns the source
    /// files that were replaced.
    fn replace_scheme(
        &self,
        period_id: i64,
        scheme: Scheme,
        part: Part,
        file: &SourceFile,
        rows: &[RawRecord],
    ) -> LedgerResult<Vec<SourceFile>>;
    /// Adds an adjustment file and its records next to the existing ones.
    fn append_adjustment(&self, file: &SourceFile, rows: &[RawRecord]) -> LedgerResult<()>;
    fn list_source_files(&self, period_id: i64) -> LedgerResult<Vec<SourceFile>>;
    fn load_raw_records(&self, period_id: i64, file_type: FileType) -> LedgerResult<Vec<RawRecord>>;

    fn replace_roster(&self, period_id: i64, entries: &[RosterEntry]) -> LedgerResult<usize>;
    /// Copies the most recently stored roster of any other period into
    /// `period_id`, replacing what is there.
    fn copy_latest_roster(&self, period_id: i64) -> LedgerResult<RosterCopy>;
    fn load_roster(&self, period_id: i64) -> LedgerResult<Vec<RosterEntry>>;

    fn replace_aggregates(
        &self,
        period_id: i64,
        scope: AggregateScope,
        aggregates: &Aggregates,
    ) -> LedgerResult<()>;
    fn load_summaries(
        &self,
        period_id: i64,
        is_adjustment: Option<bool>,
    ) -> LedgerResult<Vec<PeriodSummary>>;
    fn load_personal_charges(
        &self,
        period_id: i64,
        is_adjustment: Option<bool>,
    ) -> LedgerResult<Vec<PersonalCharge>>;
    fn load_unit_charges(
        &self,
        period_id: i64,
        is_adjustment: Option<bool>,
    ) -> LedgerResult<Vec<UnitCharge>>;

    /// Deletes roster, records, aggregates and source files; status goes
    /// back to draft.
    fn reset_period(&self, period_id: i64) -> LedgerResult<()>;
    /// Deletes the records, source files and aggregate rows of one
    /// classification only.
    fn clear_category(&self, period_id: i64, file_type: FileType) -> LedgerResult<()>;
}
