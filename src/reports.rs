use crate::types::Dataset;
use crate::util::parse_f64_safe;
use serde::Serialize;
use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::str::FromStr;
use tracing::debug;

/// Key label of the synthesized grand-total row.
pub const TOTAL_LABEL: &str = "合计";
/// Pivot header used for rows whose pivot field is blank.
pub const BLANK_AXIS_LABEL: &str = "(空白)";

/// A grouping field and the header it is presented under.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyColumn {
    pub source: &'static str,
    pub label: &'static str,
}

/// A summed numeric field. `total_label` names its row-total column when the
/// report is pivoted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Metric {
    pub source: &'static str,
    pub total_label: &'static str,
}

/// `numerator / denominator` over two metrics, computed after summing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RatioColumn {
    pub label: &'static str,
    pub numerator: &'static str,
    pub denominator: &'static str,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AggregationSpec {
    pub keys: Vec<KeyColumn>,
    pub pivot: Option<&'static str>,
    pub metrics: Vec<Metric>,
    pub ratios: Vec<RatioColumn>,
}

impl AggregationSpec {
    fn metric_position(&self, source: &str) -> Option<usize> {
        self.metrics.iter().position(|m| m.source == source)
    }
}

/// The report variants the tool can produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ReportKind {
    Sales,
    GrossProfit,
    MachineLoss,
    Freight,
}

impl ReportKind {
    pub const ALL: [ReportKind; 4] = [
        ReportKind::Sales,
        ReportKind::GrossProfit,
        ReportKind::MachineLoss,
        ReportKind::Freight,
    ];

    pub fn slug(&self) -> &'static str {
        match self {
            ReportKind::Sales => "sales",
            ReportKind::GrossProfit => "gross-profit",
            ReportKind::MachineLoss => "machine-loss",
            ReportKind::Freight => "freight",
        }
    }

    /// Columns that must be present before the report can be built.
    pub fn required_columns(&self) -> &'static [&'static str] {
        match self {
            ReportKind::Sales => &["商品", "品名", "品牌", "业务员", "数量"],
            ReportKind::GrossProfit => &["商品级次", "商品", "商品描述", "业务员", "销售金额", "净毛利"],
            ReportKind::MachineLoss => &["分切机台", "加工量", "实际损耗"],
            ReportKind::Freight => &[
                "运费组",
                "运费",
                "距离",
                "上车费B",
                "款项类型",
                "发货客户业务员",
                "运输路线",
                "客户吨位",
            ],
        }
    }

    /// Descriptive part of the output file name.
    pub fn report_name(&self) -> &'static str {
        match self {
            ReportKind::Sales => "销售汇总",
            ReportKind::GrossProfit => "销售毛利",
            ReportKind::MachineLoss => "分切机台损耗报表",
            ReportKind::Freight => "运费分摊结果",
        }
    }

    pub fn sheet_name(&self) -> &'static str {
        match self {
            ReportKind::Sales | ReportKind::GrossProfit => "销售汇总",
            ReportKind::MachineLoss => "分切机台损耗",
            ReportKind::Freight => "运费分摊结果",
        }
    }

    /// Worksheet read from spreadsheet input when none is requested.
    pub fn default_input_sheet(&self) -> Option<&'static str> {
        match self {
            ReportKind::Freight => Some("明细费用"),
            _ => None,
        }
    }

    /// Columns worth showing in a console preview; `None` shows everything.
    pub fn preview_columns(&self) -> Option<&'static [&'static str]> {
        match self {
            ReportKind::Freight => Some(&[
                "运费组",
                "上车费B",
                "款项类型",
                "发货客户业务员",
                "运输路线",
                "客户吨位",
                "最大距离",
                "吨公里",
                "总运费",
                "客户分摊运费",
            ]),
            _ => None,
        }
    }

    /// Grouping layout for the aggregated kinds; `Freight` allocates instead.
    pub fn aggregation(&self) -> Option<AggregationSpec> {
        let key = |source, label| KeyColumn { source, label };
        match self {
            ReportKind::Sales => Some(AggregationSpec {
                keys: vec![key("商品", "商品"), key("品名", "品名"), key("品牌", "品牌")],
                pivot: Some("业务员"),
                metrics: vec![Metric { source: "数量", total_label: "合计" }],
                ratios: Vec::new(),
            }),
            ReportKind::GrossProfit => Some(AggregationSpec {
                keys: vec![
                    key("商品级次", "二级分类"),
                    key("商品", "一级分类"),
                    key("末级分类", "末级分类"),
                ],
                pivot: Some("业务员"),
                metrics: vec![
                    Metric { source: "销售金额", total_label: "销售金额合计" },
                    Metric { source: "净毛利", total_label: "净毛利合计" },
                ],
                ratios: Vec::new(),
            }),
            ReportKind::MachineLoss => Some(AggregationSpec {
                keys: vec![key("分切机台", "分切机台")],
                pivot: None,
                metrics: vec![
                    Metric { source: "加工量", total_label: "加工量" },
                    Metric { source: "实际损耗", total_label: "实际损耗" },
                ],
                ratios: vec![RatioColumn {
                    label: "损耗率",
                    numerator: "实际损耗",
                    denominator: "加工量",
                }],
            }),
            ReportKind::Freight => None,
        }
    }
}

impl fmt::Display for ReportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.slug())
    }
}

impl FromStr for ReportKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase().replace('_', "-");
        ReportKind::ALL
            .into_iter()
            .find(|k| k.slug() == wanted)
            .ok_or_else(|| {
                let names: Vec<&str> = ReportKind::ALL.iter().map(|k| k.slug()).collect();
                format!("unknown report kind {:?}, expected one of: {}", s, names.join(", "))
            })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AggregatedRow {
    pub key: Vec<String>,
    pub values: Vec<f64>,
    /// `None` where the denominator summed to zero.
    pub ratios: Vec<Option<f64>>,
}

/// Grouped, optionally pivoted result. `rows` hold one entry per distinct
/// key in ascending [`compare_keys`] order; `total` is the grand-total row
/// summed from them.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AggregatedReport {
    pub key_labels: Vec<String>,
    pub value_columns: Vec<String>,
    pub ratio_columns: Vec<String>,
    pub pivot_values: Vec<String>,
    pub rows: Vec<AggregatedRow>,
    pub total: AggregatedRow,
    /// Non-blank metric cells that could not be read as numbers.
    pub skipped_values: usize,
}

impl AggregatedReport {
    /// Data rows followed by the grand-total row.
    pub fn rows_with_total(&self) -> impl Iterator<Item = &AggregatedRow> {
        self.rows.iter().chain(std::iter::once(&self.total))
    }

    pub fn value_index(&self, column: &str) -> Option<usize> {
        self.value_columns.iter().position(|c| c == column)
    }
}

/// Group `dataset` by the key columns, cross-tabulate over the pivot field and
/// sum every metric. Absent (key, pivot value) combinations are zero-filled.
pub fn aggregate(dataset: &Dataset, spec: &AggregationSpec) -> AggregatedReport {
    let key_idx: Vec<Option<usize>> = spec.keys.iter().map(|k| dataset.column_index(k.source)).collect();
    let pivot_idx = spec.pivot.and_then(|p| dataset.column_index(p));
    let metric_idx: Vec<Option<usize>> = spec
        .metrics
        .iter()
        .map(|m| dataset.column_index(m.source))
        .collect();
    let n_metrics = spec.metrics.len();

    let mut cells: HashMap<Vec<String>, HashMap<String, Vec<f64>>> = HashMap::new();
    let mut axis: HashSet<String> = HashSet::new();
    let mut skipped_values = 0usize;

    for record in dataset.records() {
        let key: Vec<String> = key_idx
            .iter()
            .map(|i| i.map(|i| record.get(i).as_key()).unwrap_or_default())
            .collect();
        let axis_value = match (spec.pivot, pivot_idx) {
            (Some(_), Some(i)) => match record.get(i).as_key() {
                v if v.is_empty() => BLANK_AXIS_LABEL.to_string(),
                v => v,
            },
            (Some(_), None) => BLANK_AXIS_LABEL.to_string(),
            (None, _) => String::new(),
        };
        if spec.pivot.is_some() {
            axis.insert(axis_value.clone());
        }

        let sums = cells
            .entry(key)
            .or_default()
            .entry(axis_value)
            .or_insert_with(|| vec![0.0; n_metrics]);
        for (m, idx) in metric_idx.iter().enumerate() {
            let Some(idx) = idx else { continue };
            let value = record.get(*idx);
            match value.as_f64() {
                Some(v) => sums[m] += v,
                None if value.is_missing() => {}
                None => skipped_values += 1,
            }
        }
    }

    let mut pivot_values: Vec<String> = axis.into_iter().collect();
    pivot_values.sort_by(|a, b| compare_field(a, b));
    let value_columns = value_columns(spec, &pivot_values);

    let mut grouped: Vec<(Vec<String>, HashMap<String, Vec<f64>>)> = cells.into_iter().collect();
    grouped.sort_by(|(a, _), (b, _)| compare_keys(a, b));

    let rows: Vec<AggregatedRow> = grouped
        .into_iter()
        .map(|(key, by_axis)| {
            let values = if spec.pivot.is_some() {
                let sums = &by_axis;
                let mut values: Vec<f64> = (0..n_metrics)
                    .flat_map(|m| {
                        pivot_values
                            .iter()
                            .map(move |a| sums.get(a).map(|s| s[m]).unwrap_or(0.0))
                    })
                    .collect();
                let width = pivot_values.len();
                let totals: Vec<f64> = (0..n_metrics)
                    .map(|m| values[m * width..(m + 1) * width].iter().sum())
                    .collect();
                values.extend(totals);
                values
            } else {
                by_axis
                    .into_values()
                    .next()
                    .unwrap_or_else(|| vec![0.0; n_metrics])
            };
            let ratios = ratios(spec, &pivot_values, &values);
            AggregatedRow { key, values, ratios }
        })
        .collect();

    let mut total_values = vec![0.0; value_columns.len()];
    for row in &rows {
        for (t, v) in total_values.iter_mut().zip(&row.values) {
            *t += v;
        }
    }
    let mut total_key = vec![String::new(); spec.keys.len()];
    if let Some(first) = total_key.first_mut() {
        *first = TOTAL_LABEL.to_string();
    }
    let total = AggregatedRow {
        key: total_key,
        ratios: ratios(spec, &pivot_values, &total_values),
        values: total_values,
    };

    debug!(
        groups = rows.len(),
        pivot_columns = pivot_values.len(),
        skipped_values,
        "aggregated dataset"
    );

    AggregatedReport {
        key_labels: spec.keys.iter().map(|k| k.label.to_string()).collect(),
        value_columns,
        ratio_columns: spec.ratios.iter().map(|r| r.label.to_string()).collect(),
        pivot_values,
        rows,
        total,
        skipped_values,
    }
}

/// Orders one key field: numbers numerically and ahead of text, text by its
/// characters. Equal numbers spelled differently (`1`, `1.0`) fall back to text.
pub fn compare_field(a: &str, b: &str) -> Ordering {
    match (parse_f64_safe(Some(a)), parse_f64_safe(Some(b))) {
        (Some(x), Some(y)) => x.total_cmp(&y).then_with(|| a.cmp(b)),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => a.cmp(b),
    }
}

/// Field-by-field [`compare_field`] over composite group keys.
pub fn compare_keys(a: &[String], b: &[String]) -> Ordering {
    a.iter()
        .zip(b)
        .map(|(x, y)| compare_field(x, y))
        .find(|o| o.is_ne())
        .unwrap_or_else(|| a.len().cmp(&b.len()))
}

fn value_columns(spec: &AggregationSpec, pivot_values: &[String]) -> Vec<String> {
    if spec.pivot.is_none() {
        return spec.metrics.iter().map(|m| m.source.to_string()).collect();
    }
    let single = spec.metrics.len() == 1;
    // A pivot value spelled like a total column keeps the metric prefix so
    // every header stays unique.
    let reserved = |a: &str| a == TOTAL_LABEL || spec.metrics.iter().any(|m| m.total_label == a);
    let mut columns: Vec<String> = spec
        .metrics
        .iter()
        .flat_map(|m| {
            pivot_values.iter().map(move |a| {
                if single && !reserved(a.as_str()) {
                    a.clone()
                } else {
                    format!("{}_{}", m.source, a)
                }
            })
        })
        .collect();
    columns.extend(spec.metrics.iter().map(|m| m.total_label.to_string()));
    columns
}

// Index of the column holding a metric's per-row total.
fn metric_total_index(spec: &AggregationSpec, pivot_values: &[String], metric: usize) -> usize {
    if spec.pivot.is_some() {
        spec.metrics.len() * pivot_values.len() + metric
    } else {
        metric
    }
}

fn ratios(spec: &AggregationSpec, pivot_values: &[String], values: &[f64]) -> Vec<Option<f64>> {
    spec.ratios
        .iter()
        .map(|r| {
            let num = spec.metric_position(r.numerator)?;
            let den = spec.metric_position(r.denominator)?;
            let num = values[metric_total_index(spec, pivot_values, num)];
            let den = values[metric_total_index(spec, pivot_values, den)];
            if den == 0.0 {
                None
            } else {
                Some(num / den)
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Value;
    use pretty_assertions::assert_eq;

    fn sales_dataset(rows: &[(&str, &str, &str, &str, &str)]) -> Dataset {
        Dataset::new(
            ["商品", "品名", "品牌", "业务员", "数量"].iter().map(|c| c.to_string()).collect(),
            rows.iter()
                .map(|(p, n, b, s, q)| {
                    [p, n, b, s, q]
                        .iter()
                        .map(|v| if v.is_empty() { Value::Missing } else { Value::text(**v) })
                        .collect()
                })
                .collect(),
        )
    }

    fn sales_spec() -> AggregationSpec {
        ReportKind::Sales.aggregation().unwrap()
    }

    #[test]
    fn pivots_salespeople_into_columns() {
        let ds = sales_dataset(&[("A", "n1", "b1", "X", "3"), ("A", "n1", "b1", "Y", "5")]);
        let report = aggregate(&ds, &sales_spec());

        assert_eq!(report.key_labels, vec!["商品", "品名", "品牌"]);
        assert_eq!(report.value_columns, vec!["X", "Y", "合计"]);
        assert_eq!(report.rows.len(), 1);
        assert_eq!(report.rows[0].key, vec!["A", "n1", "b1"]);
        assert_eq!(report.rows[0].values, vec![3.0, 5.0, 8.0]);
        assert_eq!(report.total.key, vec!["合计", "", ""]);
        assert_eq!(report.total.values, vec![3.0, 5.0, 8.0]);
    }

    #[test]
    fn output_is_dense_and_total_matches_columns() {
        let ds = sales_dataset(&[
            ("A", "n1", "b1", "X", "3"),
            ("A", "n1", "b1", "X", "4"),
            ("B", "n2", "b1", "Y", "5"),
            ("C", "n3", "b2", "Z", "1.5"),
        ]);
        let report = aggregate(&ds, &sales_spec());

        assert_eq!(report.pivot_values, vec!["X", "Y", "Z"]);
        for row in &report.rows {
            assert_eq!(row.values.len(), report.value_columns.len());
        }
        assert_eq!(report.rows[0].values, vec![7.0, 0.0, 0.0, 7.0]);
        for col in 0..report.value_columns.len() {
            let column_sum: f64 = report.rows.iter().map(|r| r.values[col]).sum();
            assert_eq!(report.total.values[col], column_sum);
        }
        assert_eq!(report.rows_with_total().count(), 4);
    }

    #[test]
    fn blank_keys_form_their_own_bucket() {
        let ds = sales_dataset(&[("", "n1", "b1", "X", "2"), ("A", "n1", "b1", "", "1")]);
        let report = aggregate(&ds, &sales_spec());

        assert_eq!(report.rows.len(), 2);
        assert_eq!(report.rows[0].key, vec!["", "n1", "b1"]);
        assert_eq!(report.value_columns, vec![BLANK_AXIS_LABEL, "X", "合计"]);
        assert_eq!(report.rows[1].values, vec![1.0, 0.0, 1.0]);
    }

    #[test]
    fn unreadable_metric_cells_are_counted_not_summed() {
        let ds = sales_dataset(&[("A", "n1", "b1", "X", "abc"), ("A", "n1", "b1", "X", "2")]);
        let report = aggregate(&ds, &sales_spec());
        assert_eq!(report.skipped_values, 1);
        assert_eq!(report.total.values, vec![2.0, 2.0]);
    }

    #[test]
    fn multi_metric_pivot_labels_and_totals() {
        let ds = Dataset::new(
            ["商品级次", "商品", "末级分类", "业务员", "销售金额", "净毛利"]
                .iter()
                .map(|c| c.to_string())
                .collect(),
            vec![
                ["二级", "卷材", "冷轧", "X", "100", "10"],
                ["二级", "卷材", "冷轧", "Y", "50", "4"],
            ]
            .iter()
            .map(|r| r.iter().map(|v| Value::text(*v)).collect())
            .collect(),
        );
        let report = aggregate(&ds, &ReportKind::GrossProfit.aggregation().unwrap());

        assert_eq!(report.key_labels, vec!["二级分类", "一级分类", "末级分类"]);
        assert_eq!(
            report.value_columns,
            vec!["销售金额_X", "销售金额_Y", "净毛利_X", "净毛利_Y", "销售金额合计", "净毛利合计"]
        );
        assert_eq!(report.total.values, vec![100.0, 50.0, 10.0, 4.0, 150.0, 14.0]);
    }

    #[test]
    fn ratio_is_recomputed_on_the_total_row() {
        let ds = Dataset::new(
            vec!["分切机台".into(), "加工量".into(), "实际损耗".into()],
            vec![
                vec![Value::text("M1"), Value::Number(100.0), Value::Number(5.0)],
                vec![Value::text("M1"), Value::Number(50.0), Value::Number(5.0)],
                vec![Value::text("M2"), Value::Number(0.0), Value::Number(1.0)],
            ],
        );
        let report = aggregate(&ds, &ReportKind::MachineLoss.aggregation().unwrap());

        assert_eq!(report.value_columns, vec!["加工量", "实际损耗"]);
        assert_eq!(report.rows[0].values, vec![150.0, 10.0]);
        assert!((report.rows[0].ratios[0].unwrap() - 10.0 / 150.0).abs() < 1e-12);
        assert_eq!(report.rows[1].ratios, vec![None]);
        assert!((report.total.ratios[0].unwrap() - 11.0 / 150.0).abs() < 1e-12);
    }

    #[test]
    fn pivot_value_named_like_the_total_gets_prefixed() {
        let ds = sales_dataset(&[("A", "n1", "b1", "合计", "3"), ("A", "n1", "b1", "Y", "5")]);
        let report = aggregate(&ds, &sales_spec());

        assert_eq!(report.value_columns, vec!["Y", "数量_合计", "合计"]);
        assert_eq!(report.rows[0].values, vec![5.0, 3.0, 8.0]);
        let unique: HashSet<&String> = report.value_columns.iter().collect();
        assert_eq!(unique.len(), report.value_columns.len());
    }

    #[test]
    fn numeric_keys_sort_numerically() {
        let ds = Dataset::new(
            vec!["分切机台".into(), "加工量".into(), "实际损耗".into()],
            ["9", "10", "2", "B1", "A1"]
                .iter()
                .map(|id| vec![Value::text(*id), Value::Number(10.0), Value::Number(1.0)])
                .collect(),
        );
        let report = aggregate(&ds, &ReportKind::MachineLoss.aggregation().unwrap());
        let order: Vec<&str> = report.rows.iter().map(|r| r.key[0].as_str()).collect();
        assert_eq!(order, vec!["2", "9", "10", "A1", "B1"]);
    }

    #[test]
    fn numeric_pivot_values_sort_numerically() {
        let ds = sales_dataset(&[
            ("A", "n1", "b1", "10", "1"),
            ("A", "n1", "b1", "9", "2"),
            ("A", "n1", "b1", "2", "3"),
        ]);
        let report = aggregate(&ds, &sales_spec());
        assert_eq!(report.value_columns, vec!["2", "9", "10", "合计"]);
        assert_eq!(report.rows[0].values, vec![3.0, 2.0, 1.0, 6.0]);
    }

    #[test]
    fn key_comparison_is_field_by_field() {
        let key = |a: &str, b: &str| vec![a.to_string(), b.to_string()];
        assert_eq!(compare_keys(&key("2", "z"), &key("10", "a")), Ordering::Less);
        assert_eq!(compare_keys(&key("x", "9"), &key("x", "10")), Ordering::Less);
        assert_eq!(compare_field("1", "1.0"), Ordering::Less);
        assert_eq!(compare_field("", "3"), Ordering::Greater);
    }

    #[test]
    fn report_kind_parses_from_slug() {
        assert_eq!("gross_profit".parse::<ReportKind>(), Ok(ReportKind::GrossProfit));
        assert_eq!("Freight".parse::<ReportKind>(), Ok(ReportKind::Freight));
        assert!("pricing".parse::<ReportKind>().is_err());
    }
}
