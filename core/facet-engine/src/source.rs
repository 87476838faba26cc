//! FILENAME: core/facet-engine/src/source.rs
//! Grouped rows and the sources that produce them.
//!
//! `GroupingSource` is the seam through which the engine's host runs compiled
//! queries. `MemorySource` executes a query's grouping plan over in-memory
//! records and follows the same semantics as the SQL rendition: soft-deleted
//! records are skipped, nulls group under the unassigned label, null dates
//! are excluded and array columns expand one row per element.

use std::cmp::Ordering;

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use smallvec::SmallVec;

use crate::bucket::{bucket_date, bucket_order, parse_date};
use crate::error::SourceError;
use crate::header::CompositeKey;
use crate::query::{AggregateOp, CompiledQuery, GroupExpr, GroupingPlan, QueryOrder};

// ============================================================================
// GROUPED ROWS
// ============================================================================

/// Per-level values of a grouped row, outermost first.
pub type RowValues = SmallVec<[String; 4]>;

/// One row returned by a compiled query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupedRow {
    pub values: RowValues,
    pub count: u64,
    #[serde(default)]
    pub aggregates: Vec<Option<f64>>,
}

impl GroupedRow {
    pub fn new<I, S>(values: I, count: u64) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        GroupedRow {
            values: values.into_iter().map(Into::into).collect(),
            count,
            aggregates: Vec::new(),
        }
    }

    /// The single value of a one-facet row.
    pub fn value(&self) -> Option<&str> {
        self.values.first().map(String::as_str)
    }

    pub fn composite_key(&self) -> CompositeKey {
        CompositeKey::new(self.values.iter().cloned())
    }
}

/// Executes compiled queries. Implemented by the relational store adapter in
/// the host and by `MemorySource`.
pub trait GroupingSource {
    fn execute(&mut self, query: &CompiledQuery) -> Result<Vec<GroupedRow>, SourceError>;
}

// ============================================================================
// RECORDS
// ============================================================================

/// A flat record with loosely-typed fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub id: String,
    #[serde(default)]
    pub deleted: bool,
    #[serde(default)]
    pub fields: FxHashMap<String, Value>,
}

impl Record {
    pub fn new(id: impl Into<String>) -> Self {
        Record {
            id: id.into(),
            deleted: false,
            fields: FxHashMap::default(),
        }
    }

    pub fn with(mut self, field: impl Into<String>, value: Value) -> Self {
        self.fields.insert(field.into(), value);
        self
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field).filter(|v| !v.is_null())
    }
}

// ============================================================================
// SORT KEYS
// ============================================================================

/// Ordering key of one group value. Numbers sort before text, as they do in
/// SQLite.
#[derive(Debug, Clone, PartialEq)]
enum SortKey {
    Number(f64),
    Text(String),
}

impl SortKey {
    fn compare(&self, other: &SortKey) -> Ordering {
        match (self, other) {
            (SortKey::Number(a), SortKey::Number(b)) => a.partial_cmp(b).unwrap_or(Ordering::Equal),
            (SortKey::Number(_), SortKey::Text(_)) => Ordering::Less,
            (SortKey::Text(_), SortKey::Number(_)) => Ordering::Greater,
            (SortKey::Text(a), SortKey::Text(b)) => a.cmp(b),
        }
    }
}

/// A candidate group value with its ordering key.
#[derive(Debug, Clone)]
struct Cell {
    label: String,
    sort: SortKey,
}

fn scalar_label(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

fn scalar_cell(value: &Value) -> Cell {
    let label = scalar_label(value);
    let sort = match value.as_f64() {
        Some(n) => SortKey::Number(n),
        None => SortKey::Text(label.clone()),
    };
    Cell { label, sort }
}

/// Elements of an array-valued column. JSON-encoded text is decoded first,
/// matching `json_each` over a text column.
fn array_elements(value: &Value) -> Vec<Value> {
    match value {
        Value::Array(items) => items.clone(),
        Value::String(text) => match serde_json::from_str::<Value>(text) {
            Ok(Value::Array(items)) => items,
            _ => Vec::new(),
        },
        _ => Vec::new(),
    }
}

// ============================================================================
// AGGREGATION
// ============================================================================

#[derive(Debug, Clone, Default)]
struct Accumulator {
    count: u64,
    sum: f64,
    min: Option<f64>,
    max: Option<f64>,
}

impl Accumulator {
    fn add(&mut self, value: Option<f64>) {
        if let Some(v) = value {
            self.count += 1;
            self.sum += v;
            self.min = Some(self.min.map_or(v, |m| m.min(v)));
            self.max = Some(self.max.map_or(v, |m| m.max(v)));
        }
    }

    fn finish(&self, op: AggregateOp) -> Option<f64> {
        match op {
            AggregateOp::Count => Some(self.count as f64),
            AggregateOp::Sum if self.count > 0 => Some(self.sum),
            AggregateOp::Average if self.count > 0 => Some(self.sum / self.count as f64),
            AggregateOp::Min => self.min,
            AggregateOp::Max => self.max,
            _ => None,
        }
    }
}

struct Group {
    cells: Vec<Cell>,
    count: u64,
    accumulators: Vec<Accumulator>,
}

// ============================================================================
// MEMORY SOURCE
// ============================================================================

/// In-memory record store executing grouping plans.
#[derive(Debug, Clone, Default)]
pub struct MemorySource {
    records: Vec<Record>,
}

impl MemorySource {
    pub fn new() -> Self {
        MemorySource::default()
    }

    pub fn with_records(records: Vec<Record>) -> Self {
        MemorySource { records }
    }

    /// Parses a JSON array of records.
    pub fn from_json(json: &str) -> Result<Self, SourceError> {
        let records: Vec<Record> = serde_json::from_str(json)
            .map_err(|e| SourceError::Execution(format!("invalid records: {}", e)))?;
        Ok(MemorySource { records })
    }

    pub fn insert(&mut self, record: Record) {
        self.records.push(record);
    }

    /// Marks a record as logically deleted. Returns false if it is unknown.
    pub fn soft_delete(&mut self, id: &str) -> bool {
        match self.records.iter_mut().find(|r| r.id == id) {
            Some(record) => {
                record.deleted = true;
                true
            }
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Candidate values a record contributes to one grouping column. Empty
    /// means the record is excluded from the grouping.
    fn cells_for(record: &Record, plan: &GroupingPlan, column: usize) -> Vec<Cell> {
        let group = &plan.columns[column];
        let raw = record.get(&group.source_column);
        match group.expr {
            GroupExpr::Direct => match raw {
                Some(value) => vec![scalar_cell(value)],
                None => vec![Cell {
                    label: plan.unassigned_label.clone(),
                    sort: SortKey::Text(plan.unassigned_label.clone()),
                }],
            },
            GroupExpr::DateBucket(format) => raw
                .and_then(|value| value.as_str())
                .and_then(parse_date)
                .map(|date| {
                    let label = bucket_date(date, format);
                    let sort = match bucket_order(date, format) {
                        Some(n) => SortKey::Number(n as f64),
                        None => SortKey::Text(label.clone()),
                    };
                    vec![Cell { label, sort }]
                })
                .unwrap_or_default(),
            GroupExpr::Expand => raw
                .map(array_elements)
                .unwrap_or_default()
                .iter()
                .filter(|v| !v.is_null())
                .map(scalar_cell)
                .collect(),
        }
    }

    fn run(&self, plan: &GroupingPlan) -> Vec<GroupedRow> {
        if plan.vacuous || plan.columns.is_empty() {
            return Vec::new();
        }

        let mut index: FxHashMap<RowValues, usize> = FxHashMap::default();
        let mut groups: Vec<Group> = Vec::new();

        for record in self.records.iter().filter(|r| !r.deleted) {
            let per_column: Vec<Vec<Cell>> = (0..plan.columns.len())
                .map(|c| Self::cells_for(record, plan, c))
                .collect();
            if per_column.iter().any(Vec::is_empty) {
                continue;
            }
            let measures: Vec<Option<f64>> = plan
                .aggregates
                .iter()
                .map(|a| record.get(&a.column).and_then(Value::as_f64))
                .collect();

            // Cartesian product of the per-column candidates.
            let mut combos: Vec<Vec<Cell>> = vec![Vec::new()];
            for cells in &per_column {
                let mut next = Vec::with_capacity(combos.len() * cells.len());
                for combo in &combos {
                    for cell in cells {
                        let mut extended = combo.clone();
                        extended.push(cell.clone());
                        next.push(extended);
                    }
                }
                combos = next;
            }

            for combo in combos {
                let key: RowValues = combo.iter().map(|c| c.label.clone()).collect();
                let slot = *index.entry(key).or_insert_with(|| {
                    groups.push(Group {
                        cells: combo.clone(),
                        count: 0,
                        accumulators: vec![Accumulator::default(); plan.aggregates.len()],
                    });
                    groups.len() - 1
                });
                let group = &mut groups[slot];
                group.count += 1;
                for (acc, measure) in group.accumulators.iter_mut().zip(&measures) {
                    acc.add(*measure);
                }
            }
        }

        match plan.order {
            QueryOrder::CountDesc => groups.sort_by(|a, b| b.count.cmp(&a.count)),
            QueryOrder::FacetValues => groups.sort_by(|a, b| {
                a.cells
                    .iter()
                    .zip(&b.cells)
                    .map(|(x, y)| x.sort.compare(&y.sort))
                    .find(|o| *o != Ordering::Equal)
                    .unwrap_or(Ordering::Equal)
            }),
        }

        groups
            .into_iter()
            .map(|group| GroupedRow {
                values: group.cells.into_iter().map(|c| c.label).collect(),
                count: group.count,
                aggregates: plan
                    .aggregates
                    .iter()
                    .zip(&group.accumulators)
                    .map(|(spec, acc)| acc.finish(spec.op))
                    .collect(),
            })
            .collect()
    }
}

impl GroupingSource for MemorySource {
    fn execute(&mut self, query: &CompiledQuery) -> Result<Vec<GroupedRow>, SourceError> {
        let rows = self.run(&query.plan);
        log::debug!(target: "SOURCE", "grouped {} records into {} rows", self.records.len(), rows.len());
        Ok(rows)
    }
}
