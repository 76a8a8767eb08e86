use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::{LedgerError, LedgerResult};
use crate::models::{round2, Part, PeriodSummary, PersonalCharge, Scheme, UnitCharge};
use crate::period_store::PeriodStore;

/// Which charge rows a query returns.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChargeView {
    #[default]
    Normal,
    Adjustment,
    /// Normal and adjustment rows merged per id number.
    Combined,
    /// Normal and adjustment rows side by side, unmerged.
    All,
}

impl ChargeView {
    fn flag(self) -> Option<bool> {
        match self {
            Self::Normal => Some(false),
            Self::Adjustment => Some(true),
            Self::Combined | Self::All => None,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct SummariesQueryRequest {
    pub period_id: i64,
    pub view: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ChargesQueryRequest {
    pub period_id: i64,
    pub part: String,
    pub view: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct SchemeChargesQueryRequest {
    pub period_id: i64,
    pub scheme: String,
    pub part: String,
    pub view: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SchemeChargeDetail {
    pub name: String,
    pub id_number: String,
    pub department: String,
    pub base: f64,
    pub amount: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "part", rename_all = "snake_case")]
pub enum PartCharges {
    Personal { items: Vec<PersonalCharge> },
    Unit { items: Vec<UnitCharge> },
}

fn parse_optional_text(raw: Option<String>) -> String {
    raw.unwrap_or_default().trim().to_string()
}

pub fn parse_view(raw: Option<String>) -> LedgerResult<ChargeView> {
    match parse_optional_text(raw).as_str() {
        "" | "normal" => Ok(ChargeView::Normal),
        "adjustment" => Ok(ChargeView::Adjustment),
        "combined" => Ok(ChargeView::Combined),
        "all" => Ok(ChargeView::All),
        other => Err(LedgerError::InvalidInput(format!(
            "view 仅支持 normal/adjustment/combined/all: {other}"
        ))),
    }
}

pub fn parse_scheme(raw: &str) -> LedgerResult<Scheme> {
    Scheme::parse(raw).ok_or_else(|| LedgerError::InvalidInput(format!("未知险种: {raw}")))
}

pub fn parse_part(raw: &str) -> LedgerResult<Part> {
    Part::parse(raw).ok_or_else(|| LedgerError::InvalidInput(format!("未知缴费部分: {raw}")))
}

/// Summaries of a period. `Combined` behaves like `All`: headcounts of the
/// two populations cannot be merged without the person lists.
pub fn query_summaries<S: PeriodStore>(
    store: &S,
    period_id: i64,
    view: ChargeView,
) -> LedgerResult<Vec<PeriodSummary>> {
    store.load_period(period_id)?;
    store.load_summaries(period_id, view.flag())
}

fn pick_text(primary: &mut String, fallback: &str) {
    if primary.trim().is_empty() && !fallback.trim().is_empty() {
        *primary = fallback.to_string();
    }
}

/// Merges adjustment rows into normal rows per id number. Columns are
/// summed; base comes from the normal row unless it is zero.
pub fn combine_personal(rows: Vec<PersonalCharge>) -> Vec<PersonalCharge> {
    let mut merged: BTreeMap<String, PersonalCharge> = BTreeMap::new();
    let (normal, adjustment): (Vec<_>, Vec<_>) = rows.into_iter().partition(|c| !c.is_adjustment);
    for row in normal.into_iter().chain(adjustment) {
        match merged.get_mut(&row.id_number) {
            None => {
                merged.insert(row.id_number.clone(), row);
            }
            Some(acc) => {
                pick_text(&mut acc.name, &row.name);
                pick_text(&mut acc.department, &row.department);
                if acc.base == 0.0 {
                    acc.base = row.base;
                }
                acc.pension = round2(acc.pension + row.pension);
                acc.medical_maternity = round2(acc.medical_maternity + row.medical_maternity);
                acc.serious_illness = round2(acc.serious_illness + row.serious_illness);
                acc.unemployment = round2(acc.unemployment + row.unemployment);
            }
        }
    }
    merged
        .into_values()
        .map(|mut row| {
            row.subtotal =
                round2(row.pension + row.medical_maternity + row.serious_illness + row.unemployment);
            row
        })
        .collect()
}

/// Unit counterpart of [`combine_personal`].
pub fn combine_unit(rows: Vec<UnitCharge>) -> Vec<UnitCharge> {
    let mut merged: BTreeMap<String, UnitCharge> = BTreeMap::new();
    let (normal, adjustment): (Vec<_>, Vec<_>) = rows.into_iter().partition(|c| !c.is_adjustment);
    for row in normal.into_iter().chain(adjustment) {
        match merged.get_mut(&row.id_number) {
            None => {
                merged.insert(row.id_number.clone(), row);
            }
            Some(acc) => {
                pick_text(&mut acc.name, &row.name);
                pick_text(&mut acc.department, &row.department);
                if acc.base == 0.0 {
                    acc.base = row.base;
                }
                acc.pension = round2(acc.pension + row.pension);
                acc.medical_maternity = round2(acc.medical_maternity + row.medical_maternity);
                acc.serious_illness = round2(acc.serious_illness + row.serious_illness);
                acc.injury = round2(acc.injury + row.injury);
                acc.unemployment = round2(acc.unemployment + row.unemployment);
            }
        }
    }
    merged
        .into_values()
        .map(|mut row| {
            row.subtotal =
                round2(row.pension + row.medical_maternity + row.injury + row.unemployment);
            row
        })
        .collect()
}

pub fn query_personal_charges<S: PeriodStore>(
    store: &S,
    period_id: i64,
    view: ChargeView,
) -> LedgerResult<Vec<PersonalCharge>> {
    store.load_period(period_id)?;
    let rows = store.load_personal_charges(period_id, view.flag())?;
    Ok(match view {
        ChargeView::Combined => combine_personal(rows),
        _ => rows,
    })
}

pub fn query_unit_charges<S: PeriodStore>(
    store: &S,
    period_id: i64,
    view: ChargeView,
) -> LedgerResult<Vec<UnitCharge>> {
    store.load_period(period_id)?;
    let rows = store.load_unit_charges(period_id, view.flag())?;
    Ok(match view {
        ChargeView::Combined => combine_unit(rows),
        _ => rows,
    })
}

pub fn query_part_charges<S: PeriodStore>(
    store: &S,
    period_id: i64,
    part: Part,
    view: ChargeView,
) -> LedgerResult<PartCharges> {
    Ok(match part {
        Part::Personal => PartCharges::Personal {
            items: query_personal_charges(store, period_id, view)?,
        },
        Part::Unit => PartCharges::Unit {
            items: query_unit_charges(store, period_id, view)?,
        },
    })
}

fn personal_scheme_amount(charge: &PersonalCharge, scheme: Scheme) -> Option<f64> {
    match scheme {
        Scheme::Pension => Some(charge.pension),
        Scheme::Medical => Some(charge.medical_maternity),
        Scheme::SeriousIllness => Some(charge.serious_illness),
        Scheme::Unemployment => Some(charge.unemployment),
        Scheme::Injury => None,
    }
}

fn unit_scheme_amount(charge: &UnitCharge, scheme: Scheme) -> f64 {
    match scheme {
        Scheme::Pension => charge.pension,
        Scheme::Medical => charge.medical_maternity,
        Scheme::SeriousIllness => charge.serious_illness,
        Scheme::Unemployment => charge.unemployment,
        Scheme::Injury => charge.injury,
    }
}

/// One line per charge row for a single (scheme, part) column. Medical reads
/// the medical+maternity column. Personal injury has no column and yields
/// an empty list.
pub fn query_scheme_charges<S: PeriodStore>(
    store: &S,
    period_id: i64,
    scheme: Scheme,
    part: Part,
    view: ChargeView,
) -> LedgerResult<Vec<SchemeChargeDetail>> {
    let details = match part {
        Part::Personal => query_personal_charges(store, period_id, view)?
            .into_iter()
            .filter_map(|charge| {
                personal_scheme_amount(&charge, scheme).map(|amount| SchemeChargeDetail {
                    name: charge.name,
                    id_number: charge.id_number,
                    department: charge.department,
                    base: charge.base,
                    amount,
                })
            })
            .collect(),
        Part::Unit => query_unit_charges(store, period_id, view)?
            .into_iter()
            .map(|charge| SchemeChargeDetail {
                amount: unit_scheme_amount(&charge, scheme),
                name: charge.name,
                id_number: charge.id_number,
                department: charge.department,
                base: charge.base,
            })
            .collect(),
    };
    Ok(details)
}

pub fn summaries_query<S: PeriodStore>(
    store: &S,
    req: SummariesQueryRequest,
) -> LedgerResult<Vec<PeriodSummary>> {
    query_summaries(store, req.period_id, parse_view(req.view)?)
}

pub fn charges_query<S: PeriodStore>(
    store: &S,
    req: ChargesQueryRequest,
) -> LedgerResult<PartCharges> {
    let part = parse_part(&req.part)?;
    query_part_charges(store, req.period_id, part, parse_view(req.view)?)
}

pub fn scheme_charges_query<S: PeriodStore>(
    store: &S,
    req: SchemeChargesQueryRequest,
) -> LedgerResult<Vec<SchemeChargeDetail>> {
    let scheme = parse_scheme(&req.scheme)?;
    let part = parse_part(&req.part)?;
    query_scheme_charges(store, req.period_id, scheme, part, parse_view(req.view)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::period_service::tests::{processed_fixture, write_contribution_csv};

    #[test]
    fn view_parsing_defaults_to_normal() {
        assert_eq!(parse_view(None).expect("default"), ChargeView::Normal);
        assert_eq!(
            parse_view(Some(" combined ".to_string())).expect("combined"),
            ChargeView::Combined
        );
        let err = parse_view(Some("merged".to_string())).expect_err("unknown view");
        assert_eq!(err.category(), "VALIDATION_ERROR");
    }

    #[test]
    fn combined_view_sums_adjustments_into_normal_rows() {
        let (fx, period) = processed_fixture("si_ledger_queries_combined");
        let adj = write_contribution_csv(
            &fx.inbox,
            "养老保险(个人缴纳)_2024-12至2024-12.csv",
            &[("ID1", "张三", 4800.0, 20.0), ("ID2", "李四", 4000.0, 320.0)],
        );
        fx.service
            .ingest_adjustment_file(period.id, &adj, None)
            .expect("adjustment");
        fx.service.process_adjustments(period.id).expect("overlay");

        let store = fx.service.store();
        let normal = query_personal_charges(store, period.id, ChargeView::Normal).expect("normal");
        assert_eq!(normal.len(), 1);

        let all = query_personal_charges(store, period.id, ChargeView::All).expect("all");
        assert_eq!(all.len(), 3);

        let combined =
            query_personal_charges(store, period.id, ChargeView::Combined).expect("combined");
        assert_eq!(combined.len(), 2);
        let id1 = &combined[0];
        assert_eq!(id1.id_number, "ID1");
        assert_eq!(id1.base, 5000.0);
        assert_eq!(id1.pension, 520.0);
        assert_eq!(id1.subtotal, 1000.0);
        assert!(!id1.is_adjustment);

        let id2 = &combined[1];
        assert_eq!(id2.base, 4000.0);
        assert_eq!(id2.subtotal, 320.0);
        assert!(id2.is_adjustment);
    }

    #[test]
    fn scheme_details_read_the_matching_column() {
        let (fx, period) = processed_fixture("si_ledger_queries_scheme");
        let store = fx.service.store();

        let medical = query_scheme_charges(
            store,
            period.id,
            Scheme::Medical,
            Part::Unit,
            ChargeView::Normal,
        )
        .expect("unit medical");
        assert_eq!(medical.len(), 1);
        assert_eq!(medical[0].amount, 900.0);
        assert_eq!(medical[0].base, 6000.0);

        let injury = query_scheme_charges(
            store,
            period.id,
            Scheme::Injury,
            Part::Personal,
            ChargeView::Normal,
        )
        .expect("personal injury");
        assert!(injury.is_empty());

        let via_request = scheme_charges_query(
            store,
            SchemeChargesQueryRequest {
                period_id: period.id,
                scheme: "serious_illness".to_string(),
                part: "personal".to_string(),
                view: None,
            },
        )
        .expect("request");
        assert_eq!(via_request[0].amount, 50.0);
    }

    #[test]
    fn unknown_scheme_or_period_is_rejected() {
        let (fx, period) = processed_fixture("si_ledger_queries_invalid");
        let store = fx.service.store();
        let err = charges_query(
            store,
            ChargesQueryRequest {
                period_id: period.id,
                part: "employer".to_string(),
                view: None,
            },
        )
        .expect_err("bad part");
        assert!(err.to_string().contains("employer"));

        let err = summaries_query(
            store,
            SummariesQueryRequest {
                period_id: period.id + 50,
                view: None,
            },
        )
        .expect_err("bad period");
        assert!(matches!(err, LedgerError::PeriodNotFound(_)));
    }
}
