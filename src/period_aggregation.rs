use std::collections::{BTreeMap, BTreeSet, HashSet};

use crate::error::{LedgerError, LedgerResult};
use crate::models::{
    round2, FileType, Part, PeriodSummary, PersonalCharge, RawRecord, Scheme, UnitCharge,
};
use crate::roster_index::RosterIndex;

/// Schemes that must have at least one normal record per part before a
/// period can be processed.
pub const REQUIRED_UPLOADS: &[(Part, &[Scheme])] = &[
    (
        Part::Personal,
        &[
            Scheme::Pension,
            Scheme::Medical,
            Scheme::SeriousIllness,
            Scheme::Unemployment,
        ],
    ),
    (
        Part::Unit,
        &[
            Scheme::Pension,
            Scheme::Medical,
            Scheme::SeriousIllness,
            Scheme::Unemployment,
            Scheme::Injury,
        ],
    ),
];

/// Summary and charge rows computed from one record population.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Aggregates {
    pub summaries: Vec<PeriodSummary>,
    pub personal: Vec<PersonalCharge>,
    pub unit: Vec<UnitCharge>,
}

pub fn validate_required(records: &[RawRecord]) -> LedgerResult<()> {
    let found = records
        .iter()
        .map(|rec| (rec.part, rec.scheme))
        .collect::<HashSet<_>>();
    for (part, schemes) in REQUIRED_UPLOADS {
        for scheme in schemes.iter() {
            if !found.contains(&(*part, *scheme)) {
                return Err(LedgerError::MissingScheme {
                    part: *part,
                    scheme: *scheme,
                });
            }
        }
    }
    Ok(())
}

#[derive(Debug, Default)]
struct GroupTotals {
    id_numbers: BTreeSet<String>,
    base_total: f64,
    amount_total: f64,
}

#[derive(Debug, Default, Clone, Copy)]
struct SchemeBuckets {
    pension: f64,
    medical: f64,
    serious_illness: f64,
    unemployment: f64,
    injury: f64,
}

impl SchemeBuckets {
    fn add(&mut self, scheme: Scheme, amount: f64) {
        let slot = match scheme {
            Scheme::Pension => &mut self.pension,
            Scheme::Medical => &mut self.medical,
            Scheme::SeriousIllness => &mut self.serious_illness,
            Scheme::Unemployment => &mut self.unemployment,
            Scheme::Injury => &mut self.injury,
        };
        *slot += amount;
    }
}

#[derive(Debug, Default)]
struct PersonAccumulator {
    name: String,
    department: String,
    personal_base: f64,
    unit_base: f64,
    personal: SchemeBuckets,
    unit: SchemeBuckets,
}

impl PersonAccumulator {
    fn new(record: &RawRecord, roster: &RosterIndex) -> Self {
        let (name, department) = match roster.get(&record.id_number) {
            Some(person) => (person.name.clone(), person.department.clone()),
            None => (String::new(), String::new()),
        };
        let mut acc = Self {
            name,
            department,
            ..Self::default()
        };
        acc.fill_identity(record);
        acc
    }

    fn fill_identity(&mut self, record: &RawRecord) {
        if self.name.is_empty() {
            self.name = record.name.clone();
        }
        if self.department.is_empty() {
            self.department = record.department.clone();
        }
    }

    fn fold(&mut self, record: &RawRecord) {
        let (base, buckets) = match record.part {
            Part::Personal => (&mut self.personal_base, &mut self.personal),
            Part::Unit => (&mut self.unit_base, &mut self.unit),
        };
        if *base == 0.0 {
            *base = record.pay_base;
        }
        buckets.add(record.scheme, record.amount_due);
    }
}

/// Total order over every field that feeds a charge row, so records that
/// share file id and sequence still fold the same way from any input order.
fn canonical_order(records: &[RawRecord]) -> Vec<&RawRecord> {
    let mut ordered = records.iter().collect::<Vec<_>>();
    ordered.sort_by(|a, b| {
        a.id_number
            .cmp(&b.id_number)
            .then(a.part.cmp(&b.part))
            .then(a.scheme.cmp(&b.scheme))
            .then(a.sequence.cmp(&b.sequence))
            .then(a.source_file_id.cmp(&b.source_file_id))
            .then(a.pay_base.total_cmp(&b.pay_base))
            .then(a.amount_due.total_cmp(&b.amount_due))
            .then(a.amount_adjust.total_cmp(&b.amount_adjust))
            .then(a.pay_salary.total_cmp(&b.pay_salary))
            .then(a.name.cmp(&b.name))
            .then(a.department.cmp(&b.department))
            .then(a.person_code.cmp(&b.person_code))
            .then(a.id_type.cmp(&b.id_type))
            .then(a.rate_text.cmp(&b.rate_text))
    });
    ordered
}

/// Flagged rows after normal ones, then by the part and scheme wire names.
pub(crate) fn sort_summaries(rows: &mut [PeriodSummary]) {
    rows.sort_by(|a, b| {
        a.is_adjustment
            .cmp(&b.is_adjustment)
            .then(a.part.as_str().cmp(b.part.as_str()))
            .then(a.scheme.as_str().cmp(b.scheme.as_str()))
    });
}

fn add_to_group(groups: &mut BTreeMap<(Part, Scheme), GroupTotals>, rec: &RawRecord) {
    let group = groups.entry((rec.part, rec.scheme)).or_default();
    group.id_numbers.insert(rec.id_number.clone());
    group.base_total += rec.pay_base;
    group.amount_total += rec.amount_due;
}

fn build_summaries(
    period_id: i64,
    groups: BTreeMap<(Part, Scheme), GroupTotals>,
    is_adjustment: bool,
) -> Vec<PeriodSummary> {
    let mut rows = groups
        .into_iter()
        .map(|((part, scheme), totals)| PeriodSummary {
            period_id,
            scheme,
            part,
            headcount: totals.id_numbers.len(),
            base_total: round2(totals.base_total),
            amount_total: round2(totals.amount_total),
            is_adjustment,
        })
        .collect::<Vec<_>>();
    sort_summaries(&mut rows);
    rows
}

/// Folds `records` into group summaries and one personal and one unit
/// charge row per id number. Every output row carries `is_adjustment`.
///
/// The result depends only on the record and roster contents, never on the
/// order `records` arrive in.
pub fn build_aggregates(
    period_id: i64,
    records: &[RawRecord],
    roster: &RosterIndex,
    is_adjustment: bool,
) -> Aggregates {
    let mut groups: BTreeMap<(Part, Scheme), GroupTotals> = BTreeMap::new();
    let mut people: BTreeMap<String, PersonAccumulator> = BTreeMap::new();

    for rec in canonical_order(records) {
        add_to_group(&mut groups, rec);

        let person = people
            .entry(rec.id_number.clone())
            .and_modify(|acc| acc.fill_identity(rec))
            .or_insert_with(|| PersonAccumulator::new(rec, roster));
        person.fold(rec);
    }

    let mut personal = Vec::with_capacity(people.len());
    let mut unit = Vec::with_capacity(people.len());
    for (id_number, person) in people {
        let p = person.personal;
        let (pension, medical, serious_illness, unemployment) = (
            round2(p.pension),
            round2(p.medical),
            round2(p.serious_illness),
            round2(p.unemployment),
        );
        personal.push(PersonalCharge {
            period_id,
            name: person.name.clone(),
            id_number: id_number.clone(),
            department: person.department.clone(),
            base: round2(person.personal_base),
            pension,
            medical_maternity: medical,
            serious_illness,
            unemployment,
            subtotal: round2(pension + medical + serious_illness + unemployment),
            is_adjustment,
        });

        // serious illness is reported on its own but paid inside medical/maternity
        let u = person.unit;
        let (pension, medical_maternity, injury, unemployment) = (
            round2(u.pension),
            round2(u.medical + u.serious_illness),
            round2(u.injury),
            round2(u.unemployment),
        );
        unit.push(UnitCharge {
            period_id,
            name: person.name,
            id_number,
            department: person.department,
            base: round2(person.unit_base.max(person.personal_base)),
            pension,
            medical_maternity,
            serious_illness: round2(u.serious_illness),
            injury,
            unemployment,
            subtotal: round2(pension + medical_maternity + injury + unemployment),
            is_adjustment,
        });
    }

    Aggregates {
        summaries: build_summaries(period_id, groups, is_adjustment),
        personal,
        unit,
    }
}

/// Normal processing: the period's normal records must be non-empty and
/// cover every required (part, scheme) pair.
pub fn aggregate_normal(
    period_id: i64,
    records: &[RawRecord],
    roster: &RosterIndex,
) -> LedgerResult<Aggregates> {
    if records.is_empty() {
        return Err(LedgerError::NoRecords(FileType::Normal));
    }
    validate_required(records)?;
    Ok(build_aggregates(period_id, records, roster, false))
}
