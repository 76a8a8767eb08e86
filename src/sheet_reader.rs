use calamine::{open_workbook_auto, Reader};
use sha1::{Digest, Sha1};
use std::path::Path;

use crate::error::{LedgerError, LedgerResult};
use crate::header_map::trim_cell;

const SUPPORTED_EXTENSIONS: &[&str] = &["csv", "xlsx", "xls", "xlsm", "ods"];

pub fn is_supported_sheet(path: &Path) -> bool {
    let suffix = extension_of(path);
    SUPPORTED_EXTENSIONS.contains(&suffix.as_str())
}

fn extension_of(path: &Path) -> String {
    path.extension()
        .and_then(|s| s.to_str())
        .unwrap_or_default()
        .to_ascii_lowercase()
}

fn read_csv_rows(path: &Path) -> LedgerResult<Vec<Vec<String>>> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_path(path)
        .map_err(|source| LedgerError::Csv {
            context: "读取 CSV 失败".to_string(),
            source,
        })?;

    let mut rows = Vec::new();
    for rec in reader.records() {
        let rec = rec.map_err(|source| LedgerError::Csv {
            context: "读取 CSV 行失败".to_string(),
            source,
        })?;
        rows.push(rec.iter().map(trim_cell).collect());
    }
    Ok(rows)
}

fn read_workbook_rows(path: &Path) -> LedgerResult<Vec<Vec<String>>> {
    let mut workbook =
        open_workbook_auto(path).map_err(|e| LedgerError::SheetRead(format!("打开表格失败: {e}")))?;
    let first_sheet = workbook
        .sheet_names()
        .first()
        .cloned()
        .ok_or(LedgerError::MissingWorksheet)?;

    let range = workbook
        .worksheet_range(&first_sheet)
        .map_err(|e| LedgerError::SheetRead(format!("读取工作表 {first_sheet} 失败: {e}")))?;

    Ok(range
        .rows()
        .map(|row| {
            row.iter()
                .map(|cell| trim_cell(&cell.to_string()))
                .collect::<Vec<_>>()
        })
        .collect())
}

/// All rows of the first worksheet (or of the CSV file), header included.
/// Fails when the file has no data row below the header.
pub fn read_table_rows(path: &Path) -> LedgerResult<Vec<Vec<String>>> {
    if !path.is_file() {
        return Err(LedgerError::FileNotFound(path.to_string_lossy().to_string()));
    }

    let suffix = extension_of(path);
    let rows = match suffix.as_str() {
        "csv" => read_csv_rows(path)?,
        "xlsx" | "xls" | "xlsm" | "ods" => read_workbook_rows(path)?,
        _ => return Err(LedgerError::UnsupportedFormat(suffix)),
    };
    if rows.len() < 2 {
        return Err(LedgerError::TooFewRows);
    }
    Ok(rows)
}

pub fn file_sha1(path: &Path) -> LedgerResult<String> {
    let bytes = std::fs::read(path).map_err(|source| LedgerError::Io {
        context: format!("读取文件失败: {}", path.to_string_lossy()),
        source,
    })?;
    let mut hasher = Sha1::new();
    hasher.update(&bytes);
    Ok(format!("{:x}", hasher.finalize()))
}
