use csv::WriterBuilder;
use serde::Serialize;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::info;

use crate::error::{LedgerError, LedgerResult};
use crate::models::{round2, Part, PersonalCharge, Scheme, UnitCharge};
use crate::period_store::PeriodStore;
use crate::read_queries::{
    query_personal_charges, query_scheme_charges, query_unit_charges, ChargeView,
    SchemeChargeDetail,
};

pub const PERSONAL_HEADERS: [&str; 10] = [
    "序号",
    "姓名",
    "证件号码",
    "部门",
    "基数",
    "养老保险",
    "医疗+生育保险",
    "大额医疗",
    "失业保险",
    "小计",
];

pub const UNIT_HEADERS: [&str; 10] = [
    "序号",
    "姓名",
    "证件号码",
    "部门",
    "基数",
    "养老保险",
    "医疗+生育保险",
    "工伤保险",
    "失业保险",
    "小计",
];

pub const SCHEME_DETAIL_HEADERS: [&str; 6] =
    ["序号", "姓名", "证件号码", "部门", "缴费基数", "应缴金额"];

const TOTAL_LABEL: &str = "合计";
const UTF8_BOM: &[u8] = b"\xEF\xBB\xBF";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExportedFile {
    pub path: String,
    pub rows: usize,
}

fn amount_text(value: f64) -> String {
    format!("{:.2}", value)
}

pub fn charges_file_stem(year_month: &str, part: Part) -> String {
    format!("{year_month}-{}扣款明细", part.label())
}

pub fn scheme_file_stem(year_month: &str, scheme: Scheme, part: Part) -> String {
    format!("{year_month}-{}-{}明细", scheme.label(), part.label())
}

fn csv_error(source: csv::Error) -> LedgerError {
    LedgerError::Csv {
        context: "写入 CSV 失败".to_string(),
        source,
    }
}

/// Writes a header, one line per row and a `合计` line that sums every
/// numeric column.
fn write_table<W: Write>(
    mut writer: W,
    headers: &[&str],
    rows: &[(String, String, String, Vec<f64>)],
) -> LedgerResult<()> {
    writer.write_all(UTF8_BOM).map_err(|source| LedgerError::Io {
        context: "写入导出文件失败".to_string(),
        source,
    })?;
    let mut wtr = WriterBuilder::new().has_headers(true).from_writer(writer);
    wtr.write_record(headers).map_err(csv_error)?;

    let mut totals = vec![0.0_f64; headers.len().saturating_sub(4)];
    for (idx, (name, id_number, department, values)) in rows.iter().enumerate() {
        let mut record = vec![
            (idx + 1).to_string(),
            name.clone(),
            id_number.clone(),
            department.clone(),
        ];
        for (col, value) in values.iter().enumerate() {
            totals[col] += value;
            record.push(amount_text(*value));
        }
        wtr.write_record(&record).map_err(csv_error)?;
    }

    let mut total_record = vec![
        TOTAL_LABEL.to_string(),
        String::new(),
        String::new(),
        String::new(),
    ];
    total_record.extend(totals.into_iter().map(|v| amount_text(round2(v))));
    wtr.write_record(&total_record).map_err(csv_error)?;
    wtr.flush().map_err(|source| LedgerError::Io {
        context: "写入导出文件失败".to_string(),
        source,
    })
}

pub fn write_personal_charges<W: Write>(writer: W, rows: &[PersonalCharge]) -> LedgerResult<()> {
    let lines = rows
        .iter()
        .map(|c| {
            (
                c.name.clone(),
                c.id_number.clone(),
                c.department.clone(),
                vec![
                    c.base,
                    c.pension,
                    c.medical_maternity,
                    c.serious_illness,
                    c.unemployment,
                    c.subtotal,
                ],
            )
        })
        .collect::<Vec<_>>();
    write_table(writer, &PERSONAL_HEADERS, &lines)
}

pub fn write_unit_charges<W: Write>(writer: W, rows: &[UnitCharge]) -> LedgerResult<()> {
    let lines = rows
        .iter()
        .map(|c| {
            (
                c.name.clone(),
                c.id_number.clone(),
                c.department.clone(),
                vec![
                    c.base,
                    c.pension,
                    c.medical_maternity,
                    c.injury,
                    c.unemployment,
                    c.subtotal,
                ],
            )
        })
        .collect::<Vec<_>>();
    write_table(writer, &UNIT_HEADERS, &lines)
}

pub fn write_scheme_details<W: Write>(writer: W, rows: &[SchemeChargeDetail]) -> LedgerResult<()> {
    let lines = rows
        .iter()
        .map(|d| {
            (
                d.name.clone(),
                d.id_number.clone(),
                d.department.clone(),
                vec![d.base, d.amount],
            )
        })
        .collect::<Vec<_>>();
    write_table(writer, &SCHEME_DETAIL_HEADERS, &lines)
}

fn create_export_file(out_dir: &Path, stem: &str) -> LedgerResult<(PathBuf, fs::File)> {
    fs::create_dir_all(out_dir).map_err(|source| LedgerError::Io {
        context: format!("创建导出目录失败: {}", out_dir.to_string_lossy()),
        source,
    })?;
    let path = out_dir.join(format!("{stem}.csv"));
    let file = fs::File::create(&path).map_err(|source| LedgerError::Io {
        context: format!("创建导出文件失败: {}", path.to_string_lossy()),
        source,
    })?;
    Ok((path, file))
}

/// Writes `<out_dir>/<YYYY-MM>-<个人|单位>扣款明细.csv`.
pub fn export_part_charges<S: PeriodStore>(
    store: &S,
    period_id: i64,
    part: Part,
    view: ChargeView,
    out_dir: &Path,
) -> LedgerResult<ExportedFile> {
    let period = store.load_period(period_id)?;
    let stem = charges_file_stem(&period.year_month, part);
    let (path, count) = match part {
        Part::Personal => {
            let charges = query_personal_charges(store, period_id, view)?;
            if charges.is_empty() {
                return Err(LedgerError::InvalidInput("没有可导出的个人扣款明细".to_string()));
            }
            let (path, file) = create_export_file(out_dir, &stem)?;
            write_personal_charges(file, &charges)?;
            (path, charges.len())
        }
        Part::Unit => {
            let charges = query_unit_charges(store, period_id, view)?;
            if charges.is_empty() {
                return Err(LedgerError::InvalidInput("没有可导出的单位扣款明细".to_string()));
            }
            let (path, file) = create_export_file(out_dir, &stem)?;
            write_unit_charges(file, &charges)?;
            (path, charges.len())
        }
    };
    info!(period_id, part = %part, rows = count, "charges exported");
    Ok(ExportedFile {
        path: path.to_string_lossy().to_string(),
        rows: count,
    })
}

/// Writes `<out_dir>/<YYYY-MM>-<险种>-<个人|单位>明细.csv`.
pub fn export_scheme_charges<S: PeriodStore>(
    store: &S,
    period_id: i64,
    scheme: Scheme,
    part: Part,
    view: ChargeView,
    out_dir: &Path,
) -> LedgerResult<ExportedFile> {
    let period = store.load_period(period_id)?;
    let details = query_scheme_charges(store, period_id, scheme, part, view)?;
    let (path, file) = create_export_file(out_dir, &scheme_file_stem(&period.year_month, scheme, part))?;
    write_scheme_details(file, &details)?;
    info!(period_id, scheme = %scheme, part = %part, rows = details.len(), "scheme details exported");
    Ok(ExportedFile {
        path: path.to_string_lossy().to_string(),
        rows: details.len(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::period_service::tests::{fixture, processed_fixture};
    use crate::sheet_reader::read_table_rows;

    fn detail(id_number: &str, base: f64, amount: f64) -> SchemeChargeDetail {
        SchemeChargeDetail {
            name: format!("name-{id_number}"),
            id_number: id_number.to_string(),
            department: "财务部".to_string(),
            base,
            amount,
        }
    }

    #[test]
    fn scheme_details_end_with_a_total_line() {
        let mut buf = Vec::new();
        write_scheme_details(&mut buf, &[detail("A", 5000.0, 10.1), detail("B", 4000.0, 20.2)])
            .expect("write details");
        assert!(buf.starts_with(UTF8_BOM));

        let text = String::from_utf8(buf[UTF8_BOM.len()..].to_vec()).expect("utf8");
        let lines = text.lines().collect::<Vec<_>>();
        assert_eq!(lines[0], "序号,姓名,证件号码,部门,缴费基数,应缴金额");
        assert_eq!(lines[1], "1,name-A,A,财务部,5000.00,10.10");
        assert_eq!(lines[3], "合计,,,,9000.00,30.30");
    }

    #[test]
    fn file_stems_follow_period_and_labels() {
        assert_eq!(charges_file_stem("2025-01", Part::Unit), "2025-01-单位扣款明细");
        assert_eq!(
            scheme_file_stem("2025-01", Scheme::SeriousIllness, Part::Personal),
            "2025-01-大额医疗-个人明细"
        );
    }

    #[test]
    fn exported_unit_charges_read_back_as_a_sheet() {
        let (fx, period) = processed_fixture("si_ledger_export_unit");
        let out_dir = fx.root.join("exports");
        let exported = export_part_charges(
            fx.service.store(),
            period.id,
            Part::Unit,
            ChargeView::Normal,
            &out_dir,
        )
        .expect("export unit");
        assert_eq!(exported.rows, 1);
        assert!(exported.path.ends_with("2025-01-单位扣款明细.csv"));

        let rows = read_table_rows(Path::new(&exported.path)).expect("read export");
        assert_eq!(rows[0], UNIT_HEADERS.map(String::from).to_vec());
        assert_eq!(rows[1][4], "6000.00");
        assert_eq!(rows[1][6], "900.00");
        assert_eq!(rows[1][9], "2030.00");
        assert_eq!(rows[2][0], "合计");
        assert_eq!(rows[2][9], "2030.00");
    }

    #[test]
    fn empty_period_has_nothing_to_export() {
        let fx = fixture("si_ledger_export_empty");
        let period = fx.service.create_period("2025-06").expect("create period");
        let err = export_part_charges(
            fx.service.store(),
            period.id,
            Part::Personal,
            ChargeView::Normal,
            &fx.root.join("exports"),
        )
        .expect_err("nothing to export");
        assert_eq!(err.category(), "VALIDATION_ERROR");
    }
}
