mod adjustment_overlay;
pub mod charge_export;
mod config;
mod contribution_import;
mod error;
mod header_map;
mod ledger_db;
mod models;
mod period_aggregation;
pub mod period_service;
mod period_store;
pub mod read_queries;
mod roster_import;
mod roster_index;
mod sheet_reader;

pub use adjustment_overlay::build_adjustment_overlay;
pub use charge_export::{export_part_charges, export_scheme_charges, ExportedFile};
pub use config::LedgerConfig;
pub use contribution_import::{
    build_raw_records, parse_adjustment_file_name, AdjustmentFileName, RecordTarget,
};
pub use error::{LedgerError, LedgerResult};
pub use header_map::{
    normalize_header, AliasSpec, HeaderMap, HeaderMatch, CONTRIBUTION_ALIAS_SPECS,
    CONTRIBUTION_HEADER_MATCH, CONTRIBUTION_REQUIRED_FIELDS, ROSTER_ALIAS_SPECS,
    ROSTER_HEADER_MATCH, ROSTER_REQUIRED_FIELDS,
};
pub use ledger_db::{
    apply_embedded_migrations, inspect_status_at_path, query_admin_db_stats_at_path,
    LedgerAdminDbStatsResult, LedgerDbMigrateResult, LedgerDbStatus, SqliteLedger,
};
pub use models::{
    FileType, ParseResult, Part, Period, PeriodSummary, PersonalCharge, ProcessOutput, RawRecord,
    RosterEntry, Scheme, SourceFile, UnitCharge, PERIOD_STATUS_DRAFT, PERIOD_STATUS_PROCESSED,
};
pub use period_aggregation::{
    aggregate_normal, build_aggregates, validate_required, Aggregates, REQUIRED_UPLOADS,
};
pub use period_service::{BatchFile, BatchItemResult, PeriodService, RosterImport};
pub use period_store::{AggregateScope, PeriodStore, RosterCopy};
pub use read_queries::{ChargeView, PartCharges, SchemeChargeDetail};
pub use roster_import::build_roster_entries;
pub use roster_index::{RosterIndex, RosterPerson};
pub use sheet_reader::{file_sha1, is_supported_sheet, read_table_rows};
