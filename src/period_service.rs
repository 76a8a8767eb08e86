use chrono::{NaiveDate, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use uuid::Uuid;
use walkdir::WalkDir;

use crate::adjustment_overlay::build_adjustment_overlay;
use crate::contribution_import::{build_raw_records, parse_adjustment_file_name, RecordTarget};
use crate::error::{LedgerError, LedgerResult};
use crate::models::{FileType, Part, ParseResult, Period, ProcessOutput, Scheme, SourceFile};
use crate::period_aggregation::{aggregate_normal, Aggregates};
use crate::period_store::{AggregateScope, PeriodStore, RosterCopy};
use crate::roster_import::build_roster_entries;
use crate::roster_index::RosterIndex;
use crate::sheet_reader::{file_sha1, is_supported_sheet, read_table_rows};

const SOURCE_FILE_STATUS_PARSED: &str = "parsed";

/// One file of a normal batch upload.
#[derive(Debug, Clone, Deserialize)]
pub struct BatchFile {
    pub path: PathBuf,
    pub scheme: Scheme,
    pub part: Part,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BatchItemResult {
    pub original_name: String,
    pub scheme: Option<Scheme>,
    pub part: Option<Part>,
    pub file_id: Option<String>,
    pub imported: usize,
    pub duplicate: bool,
    pub error: Option<String>,
    pub error_category: Option<String>,
}

impl BatchItemResult {
    fn failed(mut self, err: &LedgerError) -> Self {
        self.error = Some(err.to_string());
        self.error_category = Some(err.category().to_string());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RosterImport {
    pub period_id: i64,
    pub imported: usize,
    pub stored_path: String,
}

fn now_rfc3339() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)
}

fn file_name_of(path: &Path) -> String {
    path.file_name()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| path.to_string_lossy().to_string())
}

/// Accepts `YYYY-MM` with a real month; returns it unchanged.
pub fn validate_year_month(raw: &str) -> LedgerResult<String> {
    let text = raw.trim();
    let invalid = || LedgerError::InvalidInput(format!("账期格式应为 YYYY-MM: {raw}"));
    if text.len() != 7 || text.as_bytes().get(4) != Some(&b'-') {
        return Err(invalid());
    }
    NaiveDate::parse_from_str(&format!("{text}-01"), "%Y-%m-%d").map_err(|_| invalid())?;
    Ok(text.to_string())
}

fn output(period_id: i64, aggregates: Aggregates) -> ProcessOutput {
    ProcessOutput {
        period_id,
        summaries: aggregates.summaries,
        personal: aggregates.personal,
        unit: aggregates.unit,
    }
}

/// Ingestion, processing and housekeeping for periods on top of a
/// [`PeriodStore`].
#[derive(Debug, Clone)]
pub struct PeriodService<S> {
    store: S,
    upload_root: PathBuf,
}

impl<S: PeriodStore> PeriodService<S> {
    pub fn new(store: S, upload_root: impl Into<PathBuf>) -> Self {
        Self {
            store,
            upload_root: upload_root.into(),
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    fn period_dir(&self, period_id: i64) -> PathBuf {
        self.upload_root.join(period_id.to_string())
    }

    /// Copies `source` below the period's upload directory under a fresh name.
    fn stash_upload(
        &self,
        period_id: i64,
        category: Option<&str>,
        source: &Path,
        stem: &str,
    ) -> LedgerResult<PathBuf> {
        let mut dir = self.period_dir(period_id);
        if let Some(category) = category {
            dir = dir.join(category);
        }
        fs::create_dir_all(&dir).map_err(|source| LedgerError::Io {
            context: format!("创建上传目录失败: {}", dir.to_string_lossy()),
            source,
        })?;
        let ext = source
            .extension()
            .and_then(|s| s.to_str())
            .map(|s| s.to_ascii_lowercase())
            .unwrap_or_else(|| "xlsx".to_string());
        let target = dir.join(format!("{stem}.{ext}"));
        fs::copy(source, &target).map_err(|err| LedgerError::Io {
            context: format!("保存上传文件失败: {}", target.to_string_lossy()),
            source: err,
        })?;
        Ok(target)
    }

    fn remove_stored_file(&self, period_id: i64, path: &Path) {
        if let Err(err) = fs::remove_file(path) {
            if err.kind() != std::io::ErrorKind::NotFound {
                warn!(period_id, path = %path.display(), error = %err, "failed to remove stored upload");
            }
        }
    }

    fn remove_period_dir(&self, period_id: i64) {
        let dir = self.period_dir(period_id);
        if dir.exists() {
            if let Err(err) = fs::remove_dir_all(&dir) {
                warn!(period_id, dir = %dir.display(), error = %err, "failed to remove upload directory");
            }
        }
    }

    pub fn create_period(&self, year_month: &str) -> LedgerResult<Period> {
        let year_month = validate_year_month(year_month)?;
        let period = self.store.create_period(&year_month)?;
        info!(period_id = period.id, year_month = %period.year_month, "period created");
        Ok(period)
    }

    fn ingest_sheet(
        &self,
        period_id: i64,
        source: &Path,
        scheme: Scheme,
        part: Part,
        file_type: FileType,
        notes: String,
    ) -> LedgerResult<ParseResult> {
        self.store.load_period(period_id)?;
        let rows = read_table_rows(source)?;
        let content_sha1 = file_sha1(source)?;
        let file_id = Uuid::new_v4().to_string();
        let records = build_raw_records(
            &rows,
            &RecordTarget {
                period_id,
                source_file_id: &file_id,
                scheme,
                part,
                file_type,
            },
        )?;

        let category = file_type.is_adjustment().then_some("adjustments");
        let stored_path = self.stash_upload(period_id, category, source, &file_id)?;
        let file = SourceFile {
            id: file_id,
            period_id,
            file_name: file_name_of(&stored_path),
            stored_path: stored_path.to_string_lossy().to_string(),
            original_name: file_name_of(source),
            scheme,
            part,
            file_type,
            rows: records.len(),
            status: SOURCE_FILE_STATUS_PARSED.to_string(),
            content_sha1,
            notes,
            uploaded_at: now_rfc3339(),
        };

        let stored = match file_type {
            FileType::Normal => self
                .store
                .replace_scheme(period_id, scheme, part, &file, &records),
            FileType::Adjustment => self
                .store
                .append_adjustment(&file, &records)
                .map(|_| Vec::new()),
        };
        let replaced = match stored {
            Ok(replaced) => replaced,
            Err(err) => {
                self.remove_stored_file(period_id, &stored_path);
                return Err(err);
            }
        };
        for old in replaced.iter().filter(|old| old.stored_path != file.stored_path) {
            self.remove_stored_file(period_id, Path::new(&old.stored_path));
        }

        info!(
            period_id,
            scheme = %scheme,
            part = %part,
            file_type = %file_type,
            imported = records.len(),
            original_name = %file.original_name,
            "contribution file ingested"
        );
        Ok(ParseResult {
            imported: records.len(),
            file,
        })
    }

    /// Replaces the normal records of (period, scheme, part) with `source`.
    pub fn ingest_contribution_file(
        &self,
        period_id: i64,
        source: &Path,
        scheme: Scheme,
        part: Part,
    ) -> LedgerResult<ParseResult> {
        self.ingest_sheet(period_id, source, scheme, part, FileType::Normal, String::new())
    }

    /// Adds an adjustment file. Scheme and part come from `target`, or from
    /// the file name when `target` is `None`.
    pub fn ingest_adjustment_file(
        &self,
        period_id: i64,
        source: &Path,
        target: Option<(Scheme, Part)>,
    ) -> LedgerResult<ParseResult> {
        let file_name = file_name_of(source);
        let (scheme, part, notes) = match target {
            Some((scheme, part)) => {
                let notes = parse_adjustment_file_name(&file_name)
                    .map(|parsed| parsed.notes())
                    .unwrap_or_default();
                (scheme, part, notes)
            }
            None => {
                let parsed = parse_adjustment_file_name(&file_name)?;
                (parsed.scheme, parsed.part, parsed.notes())
            }
        };
        self.ingest_sheet(period_id, source, scheme, part, FileType::Adjustment, notes)
    }

    /// Ingests each normal file on its own; one bad file does not stop the
    /// rest. Files with the same content as an earlier item are skipped.
    pub fn ingest_batch(
        &self,
        period_id: i64,
        files: &[BatchFile],
    ) -> LedgerResult<Vec<BatchItemResult>> {
        self.store.load_period(period_id)?;
        let mut seen = HashSet::new();
        let mut items = Vec::with_capacity(files.len());
        for file in files {
            let item = BatchItemResult {
                original_name: file_name_of(&file.path),
                scheme: Some(file.scheme),
                part: Some(file.part),
                ..BatchItemResult::default()
            };
            let digest = match file_sha1(&file.path) {
                Ok(digest) => digest,
                Err(err) => {
                    items.push(item.failed(&err));
                    continue;
                }
            };
            if !seen.insert(digest) {
                debug!(period_id, original_name = %item.original_name, "duplicate file skipped");
                items.push(BatchItemResult {
                    duplicate: true,
                    ..item
                });
                continue;
            }
            match self.ingest_contribution_file(period_id, &file.path, file.scheme, file.part) {
                Ok(result) => items.push(BatchItemResult {
                    file_id: Some(result.file.id),
                    imported: result.imported,
                    ..item
                }),
                Err(err) => {
                    warn!(period_id, original_name = %item.original_name, error = %err, "batch item failed");
                    items.push(item.failed(&err));
                }
            }
        }
        Ok(items)
    }

    /// Adjustment counterpart of [`Self::ingest_batch`]. Duplicates are only
    /// detected within this batch; earlier batches accumulate.
    pub fn ingest_adjustment_batch(
        &self,
        period_id: i64,
        paths: &[PathBuf],
    ) -> LedgerResult<Vec<BatchItemResult>> {
        self.store.load_period(period_id)?;
        let mut seen = HashSet::new();
        let mut items = Vec::with_capacity(paths.len());
        for path in paths {
            let mut item = BatchItemResult {
                original_name: file_name_of(path),
                ..BatchItemResult::default()
            };
            match parse_adjustment_file_name(&item.original_name) {
                Ok(parsed) => {
                    item.scheme = Some(parsed.scheme);
                    item.part = Some(parsed.part);
                }
                Err(err) => {
                    items.push(item.failed(&err));
                    continue;
                }
            }

            let digest = match file_sha1(path) {
                Ok(digest) => digest,
                Err(err) => {
                    items.push(item.failed(&err));
                    continue;
                }
            };
            if !seen.insert(digest) {
                item.duplicate = true;
                items.push(item);
                continue;
            }

            match self.ingest_adjustment_file(period_id, path, None) {
                Ok(result) => {
                    item.file_id = Some(result.file.id);
                    item.imported = result.imported;
                    items.push(item);
                }
                Err(err) => {
                    warn!(period_id, original_name = %item.original_name, error = %err, "adjustment item failed");
                    items.push(item.failed(&err));
                }
            }
        }
        Ok(items)
    }

    /// Every spreadsheet below `dir`, in path order, as one adjustment batch.
    pub fn ingest_adjustment_dir(
        &self,
        period_id: i64,
        dir: &Path,
    ) -> LedgerResult<Vec<BatchItemResult>> {
        if !dir.is_dir() {
            return Err(LedgerError::FileNotFound(dir.to_string_lossy().to_string()));
        }
        let mut paths = WalkDir::new(dir)
            .follow_links(false)
            .into_iter()
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.file_type().is_file())
            .map(|entry| entry.into_path())
            .filter(|path| is_supported_sheet(path))
            .collect::<Vec<_>>();
        paths.sort();
        debug!(period_id, dir = %dir.display(), files = paths.len(), "adjustment directory scanned");
        self.ingest_adjustment_batch(period_id, &paths)
    }

    /// Replaces the period's roster with the entries of `source`.
    pub fn ingest_roster(&self, period_id: i64, source: &Path) -> LedgerResult<RosterImport> {
        self.store.load_period(period_id)?;
        let rows = read_table_rows(source)?;
        let entries = build_roster_entries(&rows, period_id)?;
        let stored_path = self.stash_upload(
            period_id,
            Some("roster"),
            source,
            &Uuid::new_v4().to_string(),
        )?;
        let imported = match self.store.replace_roster(period_id, &entries) {
            Ok(imported) => imported,
            Err(err) => {
                self.remove_stored_file(period_id, &stored_path);
                return Err(err);
            }
        };
        info!(period_id, imported, "roster ingested");
        Ok(RosterImport {
            period_id,
            imported,
            stored_path: stored_path.to_string_lossy().to_string(),
        })
    }

    pub fn import_latest_roster(&self, period_id: i64) -> LedgerResult<RosterCopy> {
        self.store.load_period(period_id)?;
        let copy = self.store.copy_latest_roster(period_id)?;
        info!(
            period_id,
            source_period_id = copy.source_period_id,
            copied = copy.copied,
            "roster copied from latest period"
        );
        Ok(copy)
    }

    /// Aggregates the normal records and replaces every aggregate row of the
    /// period. Adjustment rows must be rebuilt afterwards.
    pub fn process_period(&self, period_id: i64) -> LedgerResult<ProcessOutput> {
        self.store.load_period(period_id)?;
        let records = self.store.load_raw_records(period_id, FileType::Normal)?;
        let roster = RosterIndex::build(&self.store.load_roster(period_id)?);
        let aggregates = aggregate_normal(period_id, &records, &roster)?;
        self.store
            .replace_aggregates(period_id, AggregateScope::Normal, &aggregates)?;
        info!(
            period_id,
            records = records.len(),
            roster = roster.len(),
            people = aggregates.personal.len(),
            "period processed"
        );
        Ok(output(period_id, aggregates))
    }

    /// Rebuilds the adjustment-flagged rows only; returns just those rows.
    pub fn process_adjustments(&self, period_id: i64) -> LedgerResult<ProcessOutput> {
        self.store.load_period(period_id)?;
        let records = self
            .store
            .load_raw_records(period_id, FileType::Adjustment)?;
        let roster = RosterIndex::build(&self.store.load_roster(period_id)?);
        let aggregates = build_adjustment_overlay(period_id, &records, &roster)?;
        self.store
            .replace_aggregates(period_id, AggregateScope::Adjustment, &aggregates)?;
        info!(
            period_id,
            records = records.len(),
            people = aggregates.personal.len(),
            "adjustments processed"
        );
        Ok(output(period_id, aggregates))
    }

    /// Drops everything ingested for the period and its uploaded files.
    pub fn reset_period(&self, period_id: i64) -> LedgerResult<Period> {
        self.store.load_period(period_id)?;
        self.store.reset_period(period_id)?;
        self.remove_period_dir(period_id);
        info!(period_id, "period reset");
        self.store.load_period(period_id)
    }

    pub fn clear_files(&self, period_id: i64) -> LedgerResult<()> {
        self.store.load_period(period_id)?;
        self.store.clear_category(period_id, FileType::Normal)?;
        info!(period_id, "normal files cleared");
        Ok(())
    }

    pub fn clear_adjustments(&self, period_id: i64) -> LedgerResult<()> {
        self.store.load_period(period_id)?;
        self.store.clear_category(period_id, FileType::Adjustment)?;
        let dir = self.period_dir(period_id).join("adjustments");
        if dir.exists() {
            if let Err(err) = fs::remove_dir_all(&dir) {
                warn!(period_id, error = %err, "failed to remove adjustment uploads");
            }
        }
        info!(period_id, "adjustments cleared");
        Ok(())
    }

    pub fn delete_period(&self, period_id: i64) -> LedgerResult<()> {
        let period = self.store.load_period(period_id)?;
        self.store.delete_period(period_id)?;
        self.remove_period_dir(period_id);
        info!(period_id, year_month = %period.year_month, "period deleted");
        Ok(())
    }
}
