use chrono::{SecondsFormat, Utc};
use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use rusqlite::{params, Connection, OptionalExtension, Row, Transaction, TransactionBehavior};
use serde::Serialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::error::{LedgerError, LedgerResult, StorageContext};
use crate::models::{
    FileType, Part, Period, PeriodSummary, PersonalCharge, RawRecord, RosterEntry, Scheme,
    SourceFile, UnitCharge, PERIOD_STATUS_DRAFT, PERIOD_STATUS_PROCESSED,
};
use crate::period_aggregation::{sort_summaries, Aggregates};
use crate::period_store::{AggregateScope, PeriodStore, RosterCopy};

const ADMIN_DATA_TABLES: &[&str] = &[
    "periods",
    "source_files",
    "raw_records",
    "roster_entries",
    "period_summaries",
    "personal_charges",
    "unit_charges",
];

const MIGRATIONS: &[(&str, &str)] = &[(
    "0001_init.sql",
    include_str!("../db/migrations/0001_init.sql"),
)];

#[derive(Debug, Serialize)]
pub struct LedgerDbStatus {
    pub db_path: String,
    pub exists: bool,
    pub migration_files: Vec<String>,
    pub applied_versions: Vec<String>,
    pub pending_versions: Vec<String>,
    pub schema_migrations_table_exists: bool,
    pub ready: bool,
}

#[derive(Debug, Serialize)]
pub struct LedgerDbMigrateResult {
    pub db_path: String,
    pub created: bool,
    pub applied_now: Vec<String>,
    pub skipped: Vec<String>,
    pub applied_total: usize,
    pub pending_total: usize,
}

#[derive(Debug, Serialize)]
pub struct LedgerAdminDbStatsSummary {
    pub table_count: usize,
    pub total_rows: i64,
}

#[derive(Debug, Serialize)]
pub struct LedgerAdminDbTableCountRow {
    pub table: String,
    pub row_count: i64,
}

#[derive(Debug, Serialize)]
pub struct LedgerAdminDbStatsResult {
    pub db_path: String,
    pub summary: LedgerAdminDbStatsSummary,
    pub rows: Vec<LedgerAdminDbTableCountRow>,
}

macro_rules! text_column {
    ($ty:ty, $what:literal) => {
        impl ToSql for $ty {
            fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
                Ok(ToSqlOutput::from(self.as_str()))
            }
        }

        impl FromSql for $ty {
            fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
                let text = value.as_str()?;
                <$ty>::parse(text)
                    .ok_or_else(|| FromSqlError::Other(format!("未知{}: {text}", $what).into()))
            }
        }
    };
}

text_column!(Scheme, "险种");
text_column!(Part, "缴费部分");
text_column!(FileType, "文件类型");

fn now_rfc3339() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)
}

fn ensure_schema_migrations_table(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS schema_migrations (
            version TEXT PRIMARY KEY,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        );
        "#,
    )
}

fn has_schema_migrations_table(conn: &Connection) -> rusqlite::Result<bool> {
    let exists = conn
        .query_row(
            "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type='table' AND name='schema_migrations')",
            [],
            |row| row.get::<_, i64>(0),
        )
        .map(|v| v != 0)?;
    Ok(exists)
}

fn load_applied_versions(conn: &Connection) -> rusqlite::Result<Vec<String>> {
    let mut stmt = conn.prepare("SELECT version FROM schema_migrations ORDER BY version ASC")?;
    let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
    let mut versions = Vec::new();
    for row in rows {
        versions.push(row?);
    }
    Ok(versions)
}

fn list_non_system_tables(conn: &Connection) -> LedgerResult<HashSet<String>> {
    let mut stmt = conn
        .prepare("SELECT name FROM sqlite_master WHERE type='table' AND name NOT LIKE 'sqlite_%'")
        .step("读取 sqlite_master 失败")?;
    let rows = stmt
        .query_map([], |row| row.get::<_, String>(0))
        .step("查询 sqlite_master 失败")?;
    let mut names = HashSet::new();
    for row in rows {
        names.insert(row.step("读取表名失败")?);
    }
    Ok(names)
}

fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

pub fn query_admin_db_stats_at_path(db_path: &Path) -> LedgerResult<LedgerAdminDbStatsResult> {
    if !db_path.exists() {
        return Err(LedgerError::FileNotFound(
            db_path.to_string_lossy().to_string(),
        ));
    }

    let conn = Connection::open(db_path).step("打开数据库失败")?;
    let existing = list_non_system_tables(&conn)?;

    let mut rows = Vec::new();
    let mut total_rows = 0_i64;
    for table in ADMIN_DATA_TABLES {
        if !existing.contains(*table) {
            continue;
        }
        let sql = format!("SELECT COUNT(*) FROM {}", quote_ident(table));
        let row_count = conn
            .query_row(&sql, [], |row| row.get::<_, i64>(0))
            .step(&format!("统计表 {table} 行数失败"))?;
        total_rows += row_count;
        rows.push(LedgerAdminDbTableCountRow {
            table: (*table).to_string(),
            row_count,
        });
    }

    Ok(LedgerAdminDbStatsResult {
        db_path: db_path.to_string_lossy().to_string(),
        summary: LedgerAdminDbStatsSummary {
            table_count: rows.len(),
            total_rows,
        },
        rows,
    })
}

pub fn inspect_status_at_path(db_path: &Path) -> LedgerResult<LedgerDbStatus> {
    let migration_files = MIGRATIONS
        .iter()
        .map(|(v, _)| (*v).to_string())
        .collect::<Vec<_>>();
    if !db_path.exists() {
        return Ok(LedgerDbStatus {
            db_path: db_path.to_string_lossy().to_string(),
            exists: false,
            migration_files: migration_files.clone(),
            applied_versions: Vec::new(),
            pending_versions: migration_files,
            schema_migrations_table_exists: false,
            ready: false,
        });
    }

    let conn = Connection::open(db_path).step("打开数据库失败")?;
    let schema_table_exists =
        has_schema_migrations_table(&conn).step("检查 schema_migrations 失败")?;

    let applied_versions = if schema_table_exists {
        load_applied_versions(&conn).step("读取 schema_migrations 失败")?
    } else {
        Vec::new()
    };
    let applied_set = applied_versions.iter().cloned().collect::<HashSet<_>>();
    let pending_versions = migration_files
        .iter()
        .filter(|v| !applied_set.contains(*v))
        .cloned()
        .collect::<Vec<_>>();

    Ok(LedgerDbStatus {
        db_path: db_path.to_string_lossy().to_string(),
        exists: true,
        migration_files,
        applied_versions,
        ready: pending_versions.is_empty(),
        pending_versions,
        schema_migrations_table_exists: schema_table_exists,
    })
}

pub fn apply_embedded_migrations(db_path: &Path) -> LedgerResult<LedgerDbMigrateResult> {
    let created = !db_path.exists();
    if let Some(parent) = db_path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(|source| LedgerError::Io {
            context: "创建数据库目录失败".to_string(),
            source,
        })?;
    }

    let mut conn = Connection::open(db_path).step("打开数据库失败")?;
    conn.execute_batch("PRAGMA foreign_keys = ON;")
        .step("设置 foreign_keys 失败")?;
    ensure_schema_migrations_table(&conn).step("初始化 schema_migrations 失败")?;

    let already = load_applied_versions(&conn)
        .step("读取已应用迁移失败")?
        .into_iter()
        .collect::<HashSet<_>>();

    let mut applied_now = Vec::new();
    let mut skipped = Vec::new();

    for (version, sql) in MIGRATIONS {
        if already.contains(*version) {
            skipped.push((*version).to_string());
            continue;
        }
        let tx = conn
            .transaction()
            .step(&format!("开始迁移事务失败 ({version})"))?;
        tx.execute_batch(sql)
            .step(&format!("执行迁移失败 ({version})"))?;
        tx.execute(
            "INSERT INTO schema_migrations(version) VALUES (?1)",
            [*version],
        )
        .step(&format!("写入 schema_migrations 失败 ({version})"))?;
        tx.commit()
            .step(&format!("提交迁移事务失败 ({version})"))?;
        debug!(version = *version, "applied migration");
        applied_now.push((*version).to_string());
    }

    let final_applied_total = load_applied_versions(&conn)
        .step("读取迁移结果失败")?
        .len();
    let pending_total = MIGRATIONS.len().saturating_sub(final_applied_total);

    Ok(LedgerDbMigrateResult {
        db_path: db_path.to_string_lossy().to_string(),
        created,
        applied_now,
        skipped,
        applied_total: final_applied_total,
        pending_total,
    })
}

fn period_from_row(row: &Row<'_>) -> rusqlite::Result<Period> {
    Ok(Period {
        id: row.get(0)?,
        year_month: row.get(1)?,
        status: row.get(2)?,
        created_at: row.get(3)?,
        updated_at: row.get(4)?,
    })
}

const PERIOD_COLUMNS: &str = "id, year_month, status, created_at, updated_at";

fn source_file_from_row(row: &Row<'_>) -> rusqlite::Result<SourceFile> {
    Ok(SourceFile {
        id: row.get(0)?,
        period_id: row.get(1)?,
        file_name: row.get(2)?,
        stored_path: row.get(3)?,
        original_name: row.get(4)?,
        scheme: row.get(5)?,
        part: row.get(6)?,
        file_type: row.get(7)?,
        rows: row.get::<_, i64>(8)?.max(0) as usize,
        status: row.get(9)?,
        content_sha1: row.get(10)?,
        notes: row.get(11)?,
        uploaded_at: row.get(12)?,
    })
}

const SOURCE_FILE_COLUMNS: &str = "id, period_id, file_name, stored_path, original_name, scheme, part, file_type, rows, status, content_sha1, notes, uploaded_at";

fn insert_source_file(tx: &Transaction<'_>, file: &SourceFile) -> LedgerResult<()> {
    tx.execute(
        r#"
        INSERT INTO source_files(id, period_id, file_name, stored_path, original_name, scheme, part, file_type, rows, status, content_sha1, notes, uploaded_at)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)
        "#,
        params![
            file.id,
            file.period_id,
            file.file_name,
            file.stored_path,
            file.original_name,
            file.scheme,
            file.part,
            file.file_type,
            file.rows as i64,
            file.status,
            file.content_sha1,
            file.notes,
            file.uploaded_at,
        ],
    )
    .step("保存源文件记录失败")?;
    Ok(())
}

fn insert_raw_records(tx: &Transaction<'_>, rows: &[RawRecord]) -> LedgerResult<()> {
    let mut stmt = tx
        .prepare(
            r#"
            INSERT INTO raw_records(period_id, source_file_id, sequence, name, id_type, id_number, department, pay_salary, pay_base, rate_text, amount_due, amount_adjust, person_code, scheme, part, file_type)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)
            "#,
        )
        .step("准备写入原始记录失败")?;
    for rec in rows {
        stmt.execute(params![
            rec.period_id,
            rec.source_file_id,
            rec.sequence,
            rec.name,
            rec.id_type,
            rec.id_number,
            rec.department,
            rec.pay_salary,
            rec.pay_base,
            rec.rate_text,
            rec.amount_due,
            rec.amount_adjust,
            rec.person_code,
            rec.scheme,
            rec.part,
            rec.file_type,
        ])
        .step("写入原始记录失败")?;
    }
    Ok(())
}

fn insert_roster_entries(
    tx: &Transaction<'_>,
    period_id: i64,
    entries: &[RosterEntry],
) -> LedgerResult<()> {
    let mut stmt = tx
        .prepare(
            "INSERT INTO roster_entries(period_id, name, id_number, department, title, remarks) VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        )
        .step("准备写入花名册失败")?;
    for entry in entries {
        stmt.execute(params![
            period_id,
            entry.name,
            entry.id_number,
            entry.department,
            entry.title,
            entry.remarks,
        ])
        .step("写入花名册失败")?;
    }
    Ok(())
}

fn insert_aggregates(
    tx: &Transaction<'_>,
    period_id: i64,
    aggregates: &Aggregates,
) -> LedgerResult<()> {
    let mut stmt = tx
        .prepare(
            "INSERT INTO period_summaries(period_id, scheme, part, headcount, base_total, amount_total, is_adjustment) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        )
        .step("准备写入汇总失败")?;
    for s in &aggregates.summaries {
        stmt.execute(params![
            period_id,
            s.scheme,
            s.part,
            s.headcount as i64,
            s.base_total,
            s.amount_total,
            s.is_adjustment,
        ])
        .step("写入汇总失败")?;
    }

    let mut stmt = tx
        .prepare(
            r#"
            INSERT INTO personal_charges(period_id, name, id_number, department, base, pension, medical_maternity, serious_illness, unemployment, subtotal, is_adjustment)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
            "#,
        )
        .step("准备写入个人扣款明细失败")?;
    for c in &aggregates.personal {
        stmt.execute(params![
            period_id,
            c.name,
            c.id_number,
            c.department,
            c.base,
            c.pension,
            c.medical_maternity,
            c.serious_illness,
            c.unemployment,
            c.subtotal,
            c.is_adjustment,
        ])
        .step("写入个人扣款明细失败")?;
    }

    let mut stmt = tx
        .prepare(
            r#"
            INSERT INTO unit_charges(period_id, name, id_number, department, base, pension, medical_maternity, serious_illness, injury, unemployment, subtotal, is_adjustment)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
            "#,
        )
        .step("准备写入单位扣款明细失败")?;
    for c in &aggregates.unit {
        stmt.execute(params![
            period_id,
            c.name,
            c.id_number,
            c.department,
            c.base,
            c.pension,
            c.medical_maternity,
            c.serious_illness,
            c.injury,
            c.unemployment,
            c.subtotal,
            c.is_adjustment,
        ])
        .step("写入单位扣款明细失败")?;
    }
    Ok(())
}

/// Deletes aggregate rows of a period; `only_flag` narrows to one flag value.
fn delete_aggregates(
    tx: &Transaction<'_>,
    period_id: i64,
    only_flag: Option<bool>,
) -> LedgerResult<()> {
    for (table, context) in [
        ("period_summaries", "删除旧汇总失败"),
        ("personal_charges", "删除旧个人扣款明细失败"),
        ("unit_charges", "删除旧单位扣款明细失败"),
    ] {
        let sql = format!(
            "DELETE FROM {table} WHERE period_id = ?1 AND (?2 IS NULL OR is_adjustment = ?2)"
        );
        tx.execute(&sql, params![period_id, only_flag]).step(context)?;
    }
    Ok(())
}

fn set_period_status(tx: &Transaction<'_>, period_id: i64, status: &str) -> LedgerResult<()> {
    let changed = tx
        .execute(
            "UPDATE periods SET status = ?1, updated_at = ?2 WHERE id = ?3",
            params![status, now_rfc3339(), period_id],
        )
        .step("更新账期状态失败")?;
    if changed == 0 {
        return Err(LedgerError::PeriodNotFound(period_id));
    }
    Ok(())
}

/// SQLite-backed [`PeriodStore`]. Each call opens its own connection.
#[derive(Debug, Clone)]
pub struct SqliteLedger {
    db_path: PathBuf,
}

impl SqliteLedger {
    /// Opens (creating if needed) the database and applies pending migrations.
    pub fn open(db_path: impl Into<PathBuf>) -> LedgerResult<Self> {
        let db_path = db_path.into();
        let migrated = apply_embedded_migrations(&db_path)?;
        if !migrated.applied_now.is_empty() {
            debug!(
                db_path = %db_path.display(),
                applied = migrated.applied_now.len(),
                "ledger database migrated"
            );
        }
        Ok(Self { db_path })
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    fn connect(&self) -> LedgerResult<Connection> {
        let conn = Connection::open(&self.db_path).step("打开数据库失败")?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")
            .step("设置 foreign_keys 失败")?;
        Ok(conn)
    }

    /// Runs `body` inside a `BEGIN IMMEDIATE` transaction and commits it.
    fn write<T>(
        &self,
        body: impl FnOnce(&Transaction<'_>) -> LedgerResult<T>,
    ) -> LedgerResult<T> {
        let mut conn = self.connect()?;
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .step("开始事务失败")?;
        let out = body(&tx)?;
        tx.commit().step("提交事务失败")?;
        Ok(out)
    }

    fn load_charges<T>(
        &self,
        table: &str,
        columns: &str,
        period_id: i64,
        is_adjustment: Option<bool>,
        map: impl FnMut(&Row<'_>) -> rusqlite::Result<T>,
    ) -> LedgerResult<Vec<T>> {
        let conn = self.connect()?;
        let sql = format!(
            "SELECT {columns} FROM {table} WHERE period_id = ?1 AND (?2 IS NULL OR is_adjustment = ?2) ORDER BY id_number ASC, is_adjustment ASC"
        );
        let mut stmt = conn.prepare(&sql).step("读取扣款明细失败")?;
        let rows = stmt
            .query_map(params![period_id, is_adjustment], map)
            .step("查询扣款明细失败")?
            .collect::<rusqlite::Result<Vec<_>>>()
            .step("读取扣款明细行失败")?;
        Ok(rows)
    }
}

impl PeriodStore for SqliteLedger {
    fn create_period(&self, year_month: &str) -> LedgerResult<Period> {
        let now = now_rfc3339();
        let id = self.write(|tx| {
            tx.execute(
                "INSERT INTO periods(year_month, status, created_at, updated_at) VALUES (?1, ?2, ?3, ?3)",
                params![year_month, PERIOD_STATUS_DRAFT, now],
            )
            .step("创建账期失败")?;
            Ok(tx.last_insert_rowid())
        })?;
        self.load_period(id)
    }

    fn load_period(&self, period_id: i64) -> LedgerResult<Period> {
        let conn = self.connect()?;
        conn.query_row(
            &format!("SELECT {PERIOD_COLUMNS} FROM periods WHERE id = ?1"),
            [period_id],
            period_from_row,
        )
        .optional()
        .step("读取账期失败")?
        .ok_or(LedgerError::PeriodNotFound(period_id))
    }

    fn list_periods(&self) -> LedgerResult<Vec<Period>> {
        let conn = self.connect()?;
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {PERIOD_COLUMNS} FROM periods ORDER BY year_month DESC, id DESC"
            ))
            .step("读取账期列表失败")?;
        let rows = stmt
            .query_map([], period_from_row)
            .step("查询账期列表失败")?
            .collect::<rusqlite::Result<Vec<_>>>()
            .step("读取账期行失败")?;
        Ok(rows)
    }

    fn delete_period(&self, period_id: i64) -> LedgerResult<()> {
        self.write(|tx| {
            let changed = tx
                .execute("DELETE FROM periods WHERE id = ?1", [period_id])
                .step("删除账期失败")?;
            if changed == 0 {
                return Err(LedgerError::PeriodNotFound(period_id));
            }
            Ok(())
        })
    }

    fn replace_scheme(
        &self,
        period_id: i64,
        scheme: Scheme,
        part: Part,
        file: &SourceFile,
        rows: &[RawRecord],
    ) -> LedgerResult<Vec<SourceFile>> {
        self.write(|tx| {
            let replaced = {
                let mut stmt = tx
                    .prepare(&format!(
                        "SELECT {SOURCE_FILE_COLUMNS} FROM source_files WHERE period_id = ?1 AND scheme = ?2 AND part = ?3 AND file_type = ?4"
                    ))
                    .step("读取旧源文件失败")?;
                let files = stmt
                    .query_map(
                        params![period_id, scheme, part, FileType::Normal],
                        source_file_from_row,
                    )
                    .step("查询旧源文件失败")?
                    .collect::<rusqlite::Result<Vec<_>>>()
                    .step("读取旧源文件行失败")?;
                files
            };
            tx.execute(
                "DELETE FROM raw_records WHERE period_id = ?1 AND scheme = ?2 AND part = ?3 AND file_type = ?4",
                params![period_id, scheme, part, FileType::Normal],
            )
            .step("删除旧原始记录失败")?;
            tx.execute(
                "DELETE FROM source_files WHERE period_id = ?1 AND scheme = ?2 AND part = ?3 AND file_type = ?4",
                params![period_id, scheme, part, FileType::Normal],
            )
            .step("删除旧源文件记录失败")?;
            insert_source_file(tx, file)?;
            insert_raw_records(tx, rows)?;
            Ok(replaced)
        })
    }

    fn append_adjustment(&self, file: &SourceFile, rows: &[RawRecord]) -> LedgerResult<()> {
        self.write(|tx| {
            insert_source_file(tx, file)?;
            insert_raw_records(tx, rows)
        })
    }

    fn list_source_files(&self, period_id: i64) -> LedgerResult<Vec<SourceFile>> {
        let conn = self.connect()?;
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {SOURCE_FILE_COLUMNS} FROM source_files WHERE period_id = ?1 ORDER BY file_type ASC, uploaded_at ASC, original_name ASC"
            ))
            .step("读取源文件列表失败")?;
        let rows = stmt
            .query_map([period_id], source_file_from_row)
            .step("查询源文件列表失败")?
            .collect::<rusqlite::Result<Vec<_>>>()
            .step("读取源文件行失败")?;
        Ok(rows)
    }

    fn load_raw_records(&self, period_id: i64, file_type: FileType) -> LedgerResult<Vec<RawRecord>> {
        let conn = self.connect()?;
        let mut stmt = conn
            .prepare(
                r#"
                SELECT period_id, source_file_id, sequence, name, id_type, id_number, department,
                       pay_salary, pay_base, rate_text, amount_due, amount_adjust, person_code,
                       scheme, part, file_type
                FROM raw_records
                WHERE period_id = ?1 AND file_type = ?2
                ORDER BY id ASC
                "#,
            )
            .step("读取原始记录失败")?;
        let rows = stmt
            .query_map(params![period_id, file_type], |row| {
                Ok(RawRecord {
                    period_id: row.get(0)?,
                    source_file_id: row.get(1)?,
                    sequence: row.get(2)?,
                    name: row.get(3)?,
                    id_type: row.get(4)?,
                    id_number: row.get(5)?,
                    department: row.get(6)?,
                    pay_salary: row.get(7)?,
                    pay_base: row.get(8)?,
                    rate_text: row.get(9)?,
                    amount_due: row.get(10)?,
                    amount_adjust: row.get(11)?,
                    person_code: row.get(12)?,
                    scheme: row.get(13)?,
                    part: row.get(14)?,
                    file_type: row.get(15)?,
                })
            })
            .step("查询原始记录失败")?
            .collect::<rusqlite::Result<Vec<_>>>()
            .step("读取原始记录行失败")?;
        Ok(rows)
    }

    fn replace_roster(&self, period_id: i64, entries: &[RosterEntry]) -> LedgerResult<usize> {
        self.write(|tx| {
            tx.execute("DELETE FROM roster_entries WHERE period_id = ?1", [period_id])
                .step("删除旧花名册失败")?;
            insert_roster_entries(tx, period_id, entries)?;
            Ok(entries.len())
        })
    }

    fn copy_latest_roster(&self, period_id: i64) -> LedgerResult<RosterCopy> {
        self.write(|tx| {
            let source_period_id = tx
                .query_row(
                    "SELECT period_id FROM roster_entries WHERE period_id != ?1 ORDER BY id DESC LIMIT 1",
                    [period_id],
                    |row| row.get::<_, i64>(0),
                )
                .optional()
                .step("查找最新花名册失败")?
                .ok_or(LedgerError::NoRosterToCopy)?;

            tx.execute("DELETE FROM roster_entries WHERE period_id = ?1", [period_id])
                .step("删除旧花名册失败")?;
            let copied = tx
                .execute(
                    r#"
                    INSERT INTO roster_entries(period_id, name, id_number, department, title, remarks)
                    SELECT ?1, name, id_number, department, title, remarks
                    FROM roster_entries
                    WHERE period_id = ?2
                    ORDER BY id_number ASC
                    "#,
                    params![period_id, source_period_id],
                )
                .step("复制花名册失败")?;
            Ok(RosterCopy {
                source_period_id,
                copied,
            })
        })
    }

    fn load_roster(&self, period_id: i64) -> LedgerResult<Vec<RosterEntry>> {
        let conn = self.connect()?;
        let mut stmt = conn
            .prepare(
                "SELECT period_id, id_number, name, department, title, remarks FROM roster_entries WHERE period_id = ?1 ORDER BY id ASC",
            )
            .step("读取花名册失败")?;
        let rows = stmt
            .query_map([period_id], |row| {
                Ok(RosterEntry {
                    period_id: row.get(0)?,
                    id_number: row.get(1)?,
                    name: row.get(2)?,
                    department: row.get(3)?,
                    title: row.get(4)?,
                    remarks: row.get(5)?,
                })
            })
            .step("查询花名册失败")?
            .collect::<rusqlite::Result<Vec<_>>>()
            .step("读取花名册行失败")?;
        Ok(rows)
    }

    fn replace_aggregates(
        &self,
        period_id: i64,
        scope: AggregateScope,
        aggregates: &Aggregates,
    ) -> LedgerResult<()> {
        self.write(|tx| {
            match scope {
                AggregateScope::Normal => delete_aggregates(tx, period_id, None)?,
                AggregateScope::Adjustment => delete_aggregates(tx, period_id, Some(true))?,
            }
            insert_aggregates(tx, period_id, aggregates)?;
            if scope == AggregateScope::Normal {
                set_period_status(tx, period_id, PERIOD_STATUS_PROCESSED)?;
            }
            Ok(())
        })
    }

    fn load_summaries(
        &self,
        period_id: i64,
        is_adjustment: Option<bool>,
    ) -> LedgerResult<Vec<PeriodSummary>> {
        let conn = self.connect()?;
        let mut stmt = conn
            .prepare(
                r#"
                SELECT period_id, scheme, part, headcount, base_total, amount_total, is_adjustment
                FROM period_summaries
                WHERE period_id = ?1 AND (?2 IS NULL OR is_adjustment = ?2)
                "#,
            )
            .step("读取汇总失败")?;
        let mut rows = stmt
            .query_map(params![period_id, is_adjustment], |row| {
                Ok(PeriodSummary {
                    period_id: row.get(0)?,
                    scheme: row.get(1)?,
                    part: row.get(2)?,
                    headcount: row.get::<_, i64>(3)?.max(0) as usize,
                    base_total: row.get(4)?,
                    amount_total: row.get(5)?,
                    is_adjustment: row.get(6)?,
                })
            })
            .step("查询汇总失败")?
            .collect::<rusqlite::Result<Vec<_>>>()
            .step("读取汇总行失败")?;
        sort_summaries(&mut rows);
        Ok(rows)
    }

    fn load_personal_charges(
        &self,
        period_id: i64,
        is_adjustment: Option<bool>,
    ) -> LedgerResult<Vec<PersonalCharge>> {
        self.load_charges(
            "personal_charges",
            "period_id, name, id_number, department, base, pension, medical_maternity, serious_illness, unemployment, subtotal, is_adjustment",
            period_id,
            is_adjustment,
            |row| {
                Ok(PersonalCharge {
                    period_id: row.get(0)?,
                    name: row.get(1)?,
                    id_number: row.get(2)?,
                    department: row.get(3)?,
                    base: row.get(4)?,
                    pension: row.get(5)?,
                    medical_maternity: row.get(6)?,
                    serious_illness: row.get(7)?,
                    unemployment: row.get(8)?,
                    subtotal: row.get(9)?,
                    is_adjustment: row.get(10)?,
                })
            },
        )
    }

    fn load_unit_charges(
        &self,
        period_id: i64,
        is_adjustment: Option<bool>,
    ) -> LedgerResult<Vec<UnitCharge>> {
        self.load_charges(
            "unit_charges",
            "period_id, name, id_number, department, base, pension, medical_maternity, serious_illness, injury, unemployment, subtotal, is_adjustment",
            period_id,
            is_adjustment,
            |row| {
                Ok(UnitCharge {
                    period_id: row.get(0)?,
                    name: row.get(1)?,
                    id_number: row.get(2)?,
                    department: row.get(3)?,
                    base: row.get(4)?,
                    pension: row.get(5)?,
                    medical_maternity: row.get(6)?,
                    serious_illness: row.get(7)?,
                    injury: row.get(8)?,
                    unemployment: row.get(9)?,
                    subtotal: row.get(10)?,
                    is_adjustment: row.get(11)?,
                })
            },
        )
    }

    fn reset_period(&self, period_id: i64) -> LedgerResult<()> {
        self.write(|tx| {
            for (table, context) in [
                ("roster_entries", "删除花名册失败"),
                ("raw_records", "删除原始记录失败"),
                ("period_summaries", "删除汇总失败"),
                ("personal_charges", "删除个人扣款明细失败"),
                ("unit_charges", "删除单位扣款明细失败"),
                ("source_files", "删除源文件记录失败"),
            ] {
                tx.execute(&format!("DELETE FROM {table} WHERE period_id = ?1"), [period_id])
                    .step(context)?;
            }
            set_period_status(tx, period_id, PERIOD_STATUS_DRAFT)
        })
    }

    fn clear_category(&self, period_id: i64, file_type: FileType) -> LedgerResult<()> {
        self.write(|tx| {
            tx.execute(
                "DELETE FROM raw_records WHERE period_id = ?1 AND file_type = ?2",
                params![period_id, file_type],
            )
            .step("删除原始记录失败")?;
            delete_aggregates(tx, period_id, Some(file_type.is_adjustment()))?;
            tx.execute(
                "DELETE FROM source_files WHERE period_id = ?1 AND file_type = ?2",
                params![period_id, file_type],
            )
            .step("删除源文件记录失败")?;
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::period_aggregation::build_aggregates;
    use crate::roster_index::RosterIndex;
    use std::fs;
    use uuid::Uuid;

    fn create_temp_path(prefix: &str, ext: &str) -> PathBuf {
        let unique = format!("{prefix}_{}_{}.{}", std::process::id(), Uuid::new_v4(), ext);
        std::env::temp_dir().join(unique)
    }

    fn open_temp_ledger(prefix: &str) -> (SqliteLedger, PathBuf) {
        let db_path = create_temp_path(prefix, "db");
        let ledger = SqliteLedger::open(&db_path).expect("open temp ledger");
        (ledger, db_path)
    }

    fn source_file(period_id: i64, scheme: Scheme, part: Part, file_type: FileType) -> SourceFile {
        SourceFile {
            id: Uuid::new_v4().to_string(),
            period_id,
            file_name: "stored.csv".to_string(),
            stored_path: "/tmp/stored.csv".to_string(),
            original_name: format!("{scheme}-{part}.csv"),
            scheme,
            part,
            file_type,
            rows: 1,
            status: "parsed".to_string(),
            content_sha1: Uuid::new_v4().to_string(),
            notes: String::new(),
            uploaded_at: now_rfc3339(),
        }
    }

    fn raw(file: &SourceFile, id_number: &str, amount: f64) -> RawRecord {
        RawRecord {
            period_id: file.period_id,
            source_file_id: file.id.clone(),
            sequence: 1,
            name: "张三".to_string(),
            id_type: String::new(),
            id_number: id_number.to_string(),
            department: String::new(),
            pay_salary: 5000.0,
            pay_base: 5000.0,
            rate_text: "8%".to_string(),
            amount_due: amount,
            amount_adjust: amount,
            person_code: String::new(),
            scheme: file.scheme,
            part: file.part,
            file_type: file.file_type,
        }
    }

    fn count(db_path: &Path, sql: &str) -> i64 {
        let conn = Connection::open(db_path).expect("open temp db for verification");
        conn.query_row(sql, [], |row| row.get(0)).expect("count rows")
    }

    #[test]
    fn migrations_are_applied_once() {
        let (ledger, db_path) = open_temp_ledger("si_ledger_migrate");
        let again = apply_embedded_migrations(ledger.db_path()).expect("second migrate");
        assert!(again.applied_now.is_empty());
        assert_eq!(again.skipped, vec!["0001_init.sql".to_string()]);

        let status = inspect_status_at_path(&db_path).expect("status");
        assert!(status.ready);
        assert!(status.pending_versions.is_empty());

        let stats = query_admin_db_stats_at_path(&db_path).expect("stats");
        assert_eq!(stats.summary.table_count, ADMIN_DATA_TABLES.len());
        assert_eq!(stats.summary.total_rows, 0);

        let _ = fs::remove_file(&db_path);
    }

    #[test]
    fn normal_upload_replaces_and_adjustment_upload_accumulates() {
        let (ledger, db_path) = open_temp_ledger("si_ledger_replace");
        let period = ledger.create_period("2025-01").expect("create period");
        assert_eq!(period.status, PERIOD_STATUS_DRAFT);

        let first = source_file(period.id, Scheme::Pension, Part::Personal, FileType::Normal);
        ledger
            .replace_scheme(
                period.id,
                Scheme::Pension,
                Part::Personal,
                &first,
                &[raw(&first, "A1", 400.0), raw(&first, "A2", 300.0)],
            )
            .expect("first upload");
        let second = source_file(period.id, Scheme::Pension, Part::Personal, FileType::Normal);
        let replaced = ledger
            .replace_scheme(
                period.id,
                Scheme::Pension,
                Part::Personal,
                &second,
                &[raw(&second, "A3", 100.0)],
            )
            .expect("second upload");
        assert_eq!(replaced.len(), 1);
        assert_eq!(replaced[0].id, first.id);
        assert_eq!(replaced[0].stored_path, first.stored_path);

        let normal = ledger
            .load_raw_records(period.id, FileType::Normal)
            .expect("load normal");
        assert_eq!(normal.len(), 1);
        assert_eq!(normal[0].id_number, "A3");
        assert_eq!(normal[0].source_file_id, second.id);

        for _ in 0..2 {
            let adj = source_file(period.id, Scheme::Pension, Part::Personal, FileType::Adjustment);
            ledger
                .append_adjustment(&adj, &[raw(&adj, "A1", 50.0)])
                .expect("append adjustment");
        }
        let adjustments = ledger
            .load_raw_records(period.id, FileType::Adjustment)
            .expect("load adjustments");
        assert_eq!(adjustments.len(), 2);
        assert_eq!(ledger.list_source_files(period.id).expect("files").len(), 3);

        let _ = fs::remove_file(&db_path);
    }

    #[test]
    fn failed_replace_rolls_back_to_previous_upload() {
        let (ledger, db_path) = open_temp_ledger("si_ledger_rollback");
        let period = ledger.create_period("2025-02").expect("create period");
        let first = source_file(period.id, Scheme::Medical, Part::Unit, FileType::Normal);
        ledger
            .replace_scheme(period.id, Scheme::Medical, Part::Unit, &first, &[raw(&first, "A1", 1.0)])
            .expect("first upload");

        let second = source_file(period.id, Scheme::Medical, Part::Unit, FileType::Normal);
        let mut broken = raw(&second, "A2", 2.0);
        broken.period_id = period.id + 1000;
        let err = ledger
            .replace_scheme(period.id, Scheme::Medical, Part::Unit, &second, &[broken])
            .expect_err("foreign key violation");
        assert_eq!(err.category(), "PERSISTENCE_ERROR");

        let records = ledger
            .load_raw_records(period.id, FileType::Normal)
            .expect("load normal");
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].id_number, "A1");
        assert_eq!(
            count(&db_path, "SELECT COUNT(*) FROM source_files"),
            1,
            "old source file must survive the failed replace"
        );

        let _ = fs::remove_file(&db_path);
    }

    #[test]
    fn aggregate_scopes_only_touch_their_rows() {
        let (ledger, db_path) = open_temp_ledger("si_ledger_scopes");
        let period = ledger.create_period("2025-03").expect("create period");
        let file = source_file(period.id, Scheme::Pension, Part::Personal, FileType::Normal);
        let records = vec![raw(&file, "A1", 500.0)];

        let normal = build_aggregates(period.id, &records, &RosterIndex::default(), false);
        ledger
            .replace_aggregates(period.id, AggregateScope::Normal, &normal)
            .expect("normal aggregates");
        assert_eq!(
            ledger.load_period(period.id).expect("period").status,
            PERIOD_STATUS_PROCESSED
        );

        let mut adj_records = records.clone();
        adj_records[0].amount_due = 20.0;
        let overlay = build_aggregates(period.id, &adj_records, &RosterIndex::default(), true);
        ledger
            .replace_aggregates(period.id, AggregateScope::Adjustment, &overlay)
            .expect("adjustment aggregates");
        ledger
            .replace_aggregates(period.id, AggregateScope::Adjustment, &overlay)
            .expect("adjustment aggregates again");

        let all = ledger.load_personal_charges(period.id, None).expect("all");
        assert_eq!(all.len(), 2);
        assert!(!all[0].is_adjustment);
        assert!(all[1].is_adjustment);
        assert_eq!(all[1].pension, 20.0);
        assert_eq!(
            ledger
                .load_summaries(period.id, Some(false))
                .expect("normal summaries")[0]
                .amount_total,
            500.0
        );

        // a normal run clears everything, flagged rows included
        ledger
            .replace_aggregates(period.id, AggregateScope::Normal, &normal)
            .expect("normal again");
        assert_eq!(
            ledger.load_unit_charges(period.id, Some(true)).expect("flagged").len(),
            0
        );

        let _ = fs::remove_file(&db_path);
    }

    #[test]
    fn stored_summaries_load_in_wire_name_order() {
        let (ledger, db_path) = open_temp_ledger("si_ledger_summary_order");
        let period = ledger.create_period("2025-05").expect("create period");
        let mut records = Vec::new();
        for (part, scheme) in [
            (Part::Unit, Scheme::Injury),
            (Part::Personal, Scheme::Pension),
            (Part::Unit, Scheme::Medical),
            (Part::Personal, Scheme::Medical),
        ] {
            let file = source_file(period.id, scheme, part, FileType::Normal);
            records.push(raw(&file, "A1", 10.0));
        }
        let normal = build_aggregates(period.id, &records, &RosterIndex::default(), false);
        ledger
            .replace_aggregates(period.id, AggregateScope::Normal, &normal)
            .expect("normal aggregates");
        let overlay = build_aggregates(period.id, &records, &RosterIndex::default(), true);
        ledger
            .replace_aggregates(period.id, AggregateScope::Adjustment, &overlay)
            .expect("adjustment aggregates");

        let keys = ledger
            .load_summaries(period.id, None)
            .expect("summaries")
            .iter()
            .map(|s| (s.is_adjustment, format!("{}/{}", s.part, s.scheme)))
            .collect::<Vec<_>>();
        let expected = ["personal/medical", "personal/pension", "unit/injury", "unit/medical"];
        let mut want = expected
            .iter()
            .map(|k| (false, k.to_string()))
            .collect::<Vec<_>>();
        want.extend(expected.iter().map(|k| (true, k.to_string())));
        assert_eq!(keys, want);

        let _ = fs::remove_file(&db_path);
    }

    #[test]
    fn reset_and_clear_remove_their_categories() {
        let (ledger, db_path) = open_temp_ledger("si_ledger_reset");
        let period = ledger.create_period("2025-04").expect("create period");
        let normal_file = source_file(period.id, Scheme::Pension, Part::Unit, FileType::Normal);
        let adj_file = source_file(period.id, Scheme::Pension, Part::Unit, FileType::Adjustment);
        let normal_rows = vec![raw(&normal_file, "A1", 10.0)];
        let adj_rows = vec![raw(&adj_file, "A1", 1.0)];
        ledger
            .replace_scheme(period.id, Scheme::Pension, Part::Unit, &normal_file, &normal_rows)
            .expect("normal");
        ledger.append_adjustment(&adj_file, &adj_rows).expect("adjustment");
        ledger
            .replace_aggregates(
                period.id,
                AggregateScope::Normal,
                &build_aggregates(period.id, &normal_rows, &RosterIndex::default(), false),
            )
            .expect("normal aggregates");
        ledger
            .replace_aggregates(
                period.id,
                AggregateScope::Adjustment,
                &build_aggregates(period.id, &adj_rows, &RosterIndex::default(), true),
            )
            .expect("adjustment aggregates");
        ledger
            .replace_roster(
                period.id,
                &[RosterEntry {
                    period_id: period.id,
                    id_number: "A1".to_string(),
                    name: "张三".to_string(),
                    department: "财务部".to_string(),
                    title: String::new(),
                    remarks: String::new(),
                }],
            )
            .expect("roster");

        ledger
            .clear_category(period.id, FileType::Adjustment)
            .expect("clear adjustments");
        assert!(ledger
            .load_raw_records(period.id, FileType::Adjustment)
            .expect("adjustments")
            .is_empty());
        assert_eq!(ledger.load_raw_records(period.id, FileType::Normal).expect("normal").len(), 1);
        assert_eq!(ledger.load_unit_charges(period.id, None).expect("unit").len(), 1);

        ledger.reset_period(period.id).expect("reset");
        let period_after = ledger.load_period(period.id).expect("period");
        assert_eq!(period_after.status, PERIOD_STATUS_DRAFT);
        for table in ADMIN_DATA_TABLES.iter().filter(|t| **t != "periods") {
            assert_eq!(
                count(&db_path, &format!("SELECT COUNT(*) FROM {table}")),
                0,
                "{table} should be empty after reset"
            );
        }

        let _ = fs::remove_file(&db_path);
    }

    #[test]
    fn latest_roster_is_copied_from_another_period() {
        let (ledger, db_path) = open_temp_ledger("si_ledger_roster_copy");
        let target = ledger.create_period("2025-06").expect("target");
        assert!(matches!(
            ledger.copy_latest_roster(target.id),
            Err(LedgerError::NoRosterToCopy)
        ));

        let entry = |id: &str, dept: &str| RosterEntry {
            period_id: 0,
            id_number: id.to_string(),
            name: String::new(),
            department: dept.to_string(),
            title: String::new(),
            remarks: String::new(),
        };
        let older = ledger.create_period("2025-04").expect("older");
        let newer = ledger.create_period("2025-05").expect("newer");
        ledger
            .replace_roster(newer.id, &[entry("B1", "人事部"), entry("B2", "财务部")])
            .expect("newer roster");
        ledger
            .replace_roster(older.id, &[entry("A1", "行政部")])
            .expect("older roster written last");

        let copy = ledger.copy_latest_roster(target.id).expect("copy");
        assert_eq!(copy.source_period_id, older.id);
        assert_eq!(copy.copied, 1);
        let roster = ledger.load_roster(target.id).expect("roster");
        assert_eq!(roster[0].id_number, "A1");
        assert_eq!(roster[0].period_id, target.id);

        ledger.delete_period(older.id).expect("delete period");
        assert!(matches!(
            ledger.load_period(older.id),
            Err(LedgerError::PeriodNotFound(_))
        ));
        assert_eq!(ledger.load_roster(older.id).expect("cascade").len(), 0);

        let _ = fs::remove_file(&db_path);
    }
}
