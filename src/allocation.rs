//! Freight-cost allocation.
//!
//! Every freight group declares one total cost. The cost is split across the
//! group's qualifying rows in proportion to each row's ton-distance
//! (tonnage × upper bound of the distance range).
//!
//! 1. Rows are filtered: a group id, every qualifying flag, a numeric tonnage
//!    and a readable distance bound are required.
//! 2. Per group, ton-distance is summed and the declared cost taken as the
//!    maximum of the members' authoritative cost.
//! 3. Group totals are joined back onto each row and the share computed,
//!    rounded to cents.
use crate::derive::with_range_upper_bound;
use crate::types::{Dataset, Value};
use crate::util::round_to;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use tracing::{debug, warn};

/// Column names the allocation reads and writes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FreightSpec {
    pub group: &'static str,
    pub cost: &'static str,
    pub distance: &'static str,
    pub tonnage: &'static str,
    pub flags: &'static [&'static str],
    pub max_distance: &'static str,
    pub ton_distance: &'static str,
    pub group_ton_distance: &'static str,
    pub group_cost: &'static str,
    pub allocated: &'static str,
}

impl Default for FreightSpec {
    fn default() -> Self {
        FreightSpec {
            group: "运费组",
            cost: "运费",
            distance: "距离",
            tonnage: "客户吨位",
            flags: &["上车费B", "款项类型", "发货客户业务员", "运输路线"],
            max_distance: "最大距离",
            ton_distance: "吨公里",
            group_ton_distance: "总吨公里",
            group_cost: "总运费",
            allocated: "客户分摊运费",
        }
    }
}

/// A row's share of its group cost.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub enum Allocated {
    Amount(f64),
    /// The group has zero total ton-distance or no declared cost.
    Undefined,
}

impl Allocated {
    pub fn amount(&self) -> Option<f64> {
        match self {
            Allocated::Amount(v) => Some(*v),
            Allocated::Undefined => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AllocatedRow {
    /// Index of the row in the source dataset.
    pub source_row: usize,
    pub group: String,
    pub max_distance: f64,
    pub ton_distance: f64,
    pub group_ton_distance: f64,
    pub group_cost: Option<f64>,
    pub allocated: Allocated,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum ExclusionReason {
    MissingGroup,
    FlagNotSet(String),
    MissingTonnage,
    NoDistanceBound,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Exclusion {
    pub row: usize,
    pub reason: ExclusionReason,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GroupTotals {
    pub group: String,
    pub members: usize,
    pub ton_distance: f64,
    pub cost: Option<f64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AllocationReport {
    /// Source rows with the distance bound added and the cost column replaced
    /// by each group's authoritative cost.
    pub source: Dataset,
    pub rows: Vec<AllocatedRow>,
    pub groups: Vec<GroupTotals>,
    pub excluded: Vec<Exclusion>,
    /// Rows, qualifying or not, whose distance text has no readable range.
    pub unbounded_distance_rows: usize,
    /// Groups whose total ton-distance is zero.
    pub degenerate_groups: Vec<String>,
    /// Groups without any readable declared cost.
    pub uncosted_groups: Vec<String>,
    /// Groups whose members declare different costs.
    pub inconsistent_cost_groups: Vec<String>,
}

#[derive(Default)]
struct DeclaredCost {
    first: Option<f64>,
    inconsistent: bool,
}

pub fn allocate(dataset: &Dataset, spec: &FreightSpec) -> AllocationReport {
    let (enriched, unbounded_distance_rows) =
        with_range_upper_bound(dataset, spec.distance, spec.max_distance);
    if unbounded_distance_rows > 0 {
        debug!(rows = unbounded_distance_rows, "distance without a readable range");
    }

    // The first readable cost of a group is authoritative for every member.
    let mut declared: HashMap<String, DeclaredCost> = HashMap::new();
    for row in 0..enriched.len() {
        let group = enriched.value(row, spec.group);
        if group.is_missing() {
            continue;
        }
        let Some(cost) = enriched.value(row, spec.cost).as_f64() else { continue };
        let entry = declared.entry(group.as_key()).or_default();
        match entry.first {
            None => entry.first = Some(cost),
            Some(first) if (first - cost).abs() > 1e-9 => entry.inconsistent = true,
            Some(_) => {}
        }
    }
    let broadcast: Vec<Value> = (0..enriched.len())
        .map(|row| {
            let group = enriched.value(row, spec.group);
            if group.is_missing() {
                return Value::Missing;
            }
            declared
                .get(&group.as_key())
                .and_then(|d| d.first)
                .map(Value::Number)
                .unwrap_or(Value::Missing)
        })
        .collect();
    let source = enriched.with_column(spec.cost, broadcast);

    // Pass 1: filter and weigh.
    let mut excluded = Vec::new();
    let mut qualifying: Vec<(usize, String, f64, f64)> = Vec::new();
    for row in 0..source.len() {
        match qualify(&source, spec, row) {
            Ok((group, max_distance, tonnage)) => {
                qualifying.push((row, group, max_distance, tonnage * max_distance))
            }
            Err(reason) => excluded.push(Exclusion { row, reason }),
        }
    }

    // Pass 2: group totals.
    let mut totals: BTreeMap<String, GroupTotals> = BTreeMap::new();
    for (row, group, _, weight) in &qualifying {
        let cost = source.value(*row, spec.cost).as_f64();
        let t = totals.entry(group.clone()).or_insert_with(|| GroupTotals {
            group: group.clone(),
            members: 0,
            ton_distance: 0.0,
            cost: None,
        });
        t.members += 1;
        t.ton_distance += weight;
        t.cost = match (t.cost, cost) {
            (Some(a), Some(b)) => Some(a.max(b)),
            (a, b) => a.or(b),
        };
    }

    // Pass 3: broadcast and allocate.
    let rows: Vec<AllocatedRow> = qualifying
        .into_iter()
        .map(|(source_row, group, max_distance, ton_distance)| {
            let t = &totals[&group];
            let allocated = match t.cost {
                Some(cost) if t.ton_distance != 0.0 => {
                    Allocated::Amount(round_to(ton_distance / t.ton_distance * cost, 2))
                }
                _ => Allocated::Undefined,
            };
            AllocatedRow {
                source_row,
                group,
                max_distance,
                ton_distance,
                group_ton_distance: t.ton_distance,
                group_cost: t.cost,
                allocated,
            }
        })
        .collect();

    let degenerate_groups: Vec<String> = totals
        .values()
        .filter(|t| t.ton_distance == 0.0)
        .map(|t| t.group.clone())
        .collect();
    let uncosted_groups: Vec<String> = totals
        .values()
        .filter(|t| t.cost.is_none())
        .map(|t| t.group.clone())
        .collect();
    let mut inconsistent_cost_groups: Vec<String> = declared
        .iter()
        .filter(|(_, d)| d.inconsistent)
        .map(|(g, _)| g.clone())
        .collect();
    inconsistent_cost_groups.sort();

    for group in &degenerate_groups {
        warn!(group = %group, "freight group has zero ton-distance, allocation undefined");
    }
    for group in &uncosted_groups {
        warn!(group = %group, "freight group has no declared cost, allocation undefined");
    }
    for group in &inconsistent_cost_groups {
        warn!(group = %group, "freight group members declare different costs, first one used");
    }
    debug!(
        qualifying = rows.len(),
        excluded = excluded.len(),
        groups = totals.len(),
        "allocated freight"
    );

    AllocationReport {
        source,
        rows,
        groups: totals.into_values().collect(),
        excluded,
        unbounded_distance_rows,
        degenerate_groups,
        uncosted_groups,
        inconsistent_cost_groups,
    }
}

fn qualify(source: &Dataset, spec: &FreightSpec, row: usize) -> Result<(String, f64, f64), ExclusionReason> {
    let group = source.value(row, spec.group);
    if group.is_missing() {
        return Err(ExclusionReason::MissingGroup);
    }
    if let Some(flag) = spec.flags.iter().find(|f| !source.value(row, f).is_truthy()) {
        return Err(ExclusionReason::FlagNotSet(flag.to_string()));
    }
    let tonnage = source
        .value(row, spec.tonnage)
        .as_f64()
        .ok_or(ExclusionReason::MissingTonnage)?;
    let max_distance = source
        .value(row, spec.max_distance)
        .as_f64()
        .ok_or(ExclusionReason::NoDistanceBound)?;
    Ok((group.as_key(), max_distance, tonnage))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const COLUMNS: [&str; 8] = [
        "运费组", "运费", "距离", "上车费B", "款项类型", "发货客户业务员", "运输路线", "客户吨位",
    ];

    fn row(group: &str, cost: Option<f64>, distance: &str, tonnage: f64) -> Vec<Value> {
        vec![
            if group.is_empty() { Value::Missing } else { Value::text(group) },
            cost.map(Value::Number).unwrap_or(Value::Missing),
            Value::text(distance),
            Value::Number(30.0),
            Value::text("现金"),
            Value::text("张三"),
            Value::text("A线"),
            Value::Number(tonnage),
        ]
    }

    fn dataset(rows: Vec<Vec<Value>>) -> Dataset {
        Dataset::new(COLUMNS.iter().map(|c| c.to_string()).collect(), rows)
    }

    #[test]
    fn splits_cost_by_ton_distance() {
        // weights 4 × 10 = 40 and 6 × 10 = 60
        let ds = dataset(vec![
            row("G1", Some(100.0), "0-10", 4.0),
            row("G1", Some(100.0), "5-10", 6.0),
        ]);
        let report = allocate(&ds, &FreightSpec::default());

        let amounts: Vec<Option<f64>> = report.rows.iter().map(|r| r.allocated.amount()).collect();
        assert_eq!(amounts, vec![Some(40.0), Some(60.0)]);
        assert_eq!(report.rows[0].group_ton_distance, 100.0);
        assert_eq!(report.groups.len(), 1);
        assert!(report.excluded.is_empty());
    }

    #[test]
    fn group_sum_reconciles_within_rounding() {
        let ds = dataset(vec![
            row("G1", Some(1000.0), "0-30", 1.0),
            row("G1", Some(1000.0), "0-30", 1.0),
            row("G1", Some(1000.0), "0-30", 1.0),
            row("G2", Some(77.7), "10–45", 2.2),
            row("G2", Some(77.7), "10—90", 3.1),
        ]);
        let report = allocate(&ds, &FreightSpec::default());

        for g in &report.groups {
            let members: Vec<&AllocatedRow> = report.rows.iter().filter(|r| r.group == g.group).collect();
            let sum: f64 = members.iter().filter_map(|r| r.allocated.amount()).sum();
            let cost = g.cost.unwrap();
            assert!((sum - cost).abs() <= 0.01 * members.len() as f64, "{} {} {}", g.group, sum, cost);
        }
    }

    #[test]
    fn first_declared_cost_wins() {
        let ds = dataset(vec![
            row("G1", Some(100.0), "0-10", 1.0),
            row("G1", None, "0-10", 1.0),
            row("G1", Some(300.0), "0-10", 2.0),
        ]);
        let report = allocate(&ds, &FreightSpec::default());

        assert_eq!(report.groups[0].cost, Some(100.0));
        assert_eq!(report.source.value(1, "运费"), &Value::Number(100.0));
        assert_eq!(report.inconsistent_cost_groups, vec!["G1"]);
        let sum: f64 = report.rows.iter().filter_map(|r| r.allocated.amount()).sum();
        assert!((sum - 100.0).abs() < 0.03);
    }

    #[test]
    fn rows_missing_qualifying_fields_are_filtered() {
        let mut no_flag = row("G1", Some(50.0), "0-10", 1.0);
        no_flag[4] = Value::Missing;
        let mut zero_flag = row("G1", Some(50.0), "0-10", 1.0);
        zero_flag[3] = Value::Number(0.0);
        let ds = dataset(vec![
            row("G1", Some(50.0), "0-10", 1.0),
            row("", Some(50.0), "0-10", 1.0),
            no_flag,
            zero_flag,
            row("G1", Some(50.0), "市内", 1.0),
        ]);
        let report = allocate(&ds, &FreightSpec::default());

        assert_eq!(report.rows.len(), 1);
        assert_eq!(report.rows[0].allocated, Allocated::Amount(50.0));
        let reasons: Vec<ExclusionReason> = report.excluded.iter().map(|e| e.reason.clone()).collect();
        assert_eq!(
            reasons,
            vec![
                ExclusionReason::MissingGroup,
                ExclusionReason::FlagNotSet("款项类型".to_string()),
                ExclusionReason::FlagNotSet("上车费B".to_string()),
                ExclusionReason::NoDistanceBound,
            ]
        );
        assert_eq!(report.unbounded_distance_rows, 1);
    }

    #[test]
    fn zero_weight_group_is_undefined_not_fatal() {
        let ds = dataset(vec![
            row("G0", Some(80.0), "0-10", 0.0),
            row("G0", Some(80.0), "0-20", 0.0),
            row("G1", Some(10.0), "0-10", 1.0),
        ]);
        let report = allocate(&ds, &FreightSpec::default());

        assert_eq!(report.degenerate_groups, vec!["G0"]);
        assert_eq!(report.rows[0].allocated, Allocated::Undefined);
        assert_eq!(report.rows[1].allocated, Allocated::Undefined);
        assert_eq!(report.rows[2].allocated, Allocated::Amount(10.0));
    }
}
