use crate::error::{LedgerError, LedgerResult};
use crate::models::{FileType, RawRecord};
use crate::period_aggregation::{build_aggregates, Aggregates};
use crate::roster_index::RosterIndex;

/// Aggregates the adjustment population of a period on its own.
///
/// Only records classified as adjustments take part; normal records in the
/// input are ignored. There is no required-scheme gate, since an adjustment
/// batch usually covers a few schemes only. Every row comes back flagged.
pub fn build_adjustment_overlay(
    period_id: i64,
    records: &[RawRecord],
    roster: &RosterIndex,
) -> LedgerResult<Aggregates> {
    let adjustments = records
        .iter()
        .filter(|rec| rec.file_type.is_adjustment())
        .cloned()
        .collect::<Vec<_>>();
    if adjustments.is_empty() {
        return Err(LedgerError::NoRecords(FileType::Adjustment));
    }
    Ok(build_aggregates(period_id, &adjustments, roster, true))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Part, Scheme};
    use crate::period_aggregation::aggregate_normal;
    use crate::period_aggregation::tests::{complete_person, record};

    fn adjustment(id_number: &str, part: Part, scheme: Scheme, base: f64, amount: f64) -> RawRecord {
        let mut rec = record(id_number, part, scheme, base, amount);
        rec.file_type = FileType::Adjustment;
        rec.source_file_id = format!("adj-{part}-{scheme}");
        rec
    }

    #[test]
    fn overlay_covers_a_subset_of_schemes_and_flags_every_row() {
        let records = vec![
            adjustment("ID1", Part::Personal, Scheme::Pension, 5000.0, 120.0),
            adjustment("ID1", Part::Personal, Scheme::Pension, 5000.0, -20.0),
            adjustment("ID2", Part::Unit, Scheme::Injury, 6000.0, 15.5),
        ];
        let out = build_adjustment_overlay(4, &records, &RosterIndex::default())
            .expect("overlay");

        assert_eq!(out.summaries.len(), 2);
        assert!(out.summaries.iter().all(|s| s.is_adjustment));
        assert!(out.personal.iter().all(|c| c.is_adjustment));
        assert!(out.unit.iter().all(|c| c.is_adjustment));

        let pension = &out.summaries[0];
        assert_eq!(pension.headcount, 1);
        assert_eq!(pension.amount_total, 100.0);

        let id1 = &out.personal[0];
        assert_eq!(id1.id_number, "ID1");
        assert_eq!(id1.subtotal, 100.0);
        assert_eq!(out.unit[1].injury, 15.5);
        assert_eq!(out.unit[1].subtotal, 15.5);
    }

    #[test]
    fn normal_results_are_unchanged_by_adjustment_records() {
        let normal = complete_person("ID1");
        let before = aggregate_normal(1, &normal, &RosterIndex::default()).expect("normal");

        let mut mixed = normal.clone();
        mixed.push(adjustment("ID1", Part::Unit, Scheme::Pension, 6000.0, 300.0));
        mixed.push(adjustment("ID9", Part::Personal, Scheme::Medical, 4000.0, 80.0));

        let normal_only = mixed
            .iter()
            .filter(|r| r.file_type == FileType::Normal)
            .cloned()
            .collect::<Vec<_>>();
        let after = aggregate_normal(1, &normal_only, &RosterIndex::default()).expect("normal");
        assert_eq!(before, after);

        let overlay = build_adjustment_overlay(1, &mixed, &RosterIndex::default()).expect("overlay");
        assert_eq!(overlay.personal.len(), 2);
        assert_eq!(overlay.unit[0].pension, 300.0);
        assert_eq!(overlay.unit[0].subtotal, 300.0);
    }

    #[test]
    fn empty_adjustment_population_is_an_error() {
        let err = build_adjustment_overlay(1, &complete_person("ID1"), &RosterIndex::default())
            .expect_err("only normal records");
        assert!(matches!(err, LedgerError::NoRecords(FileType::Adjustment)));
    }
}
