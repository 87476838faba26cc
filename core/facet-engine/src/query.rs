//! FILENAME: core/facet-engine/src/query.rs
//! Facet Query Compiler - Turns facet semantics into grouping queries.
//!
//! Every compiled query carries two renditions of the same grouping:
//! - `sql` + `params`: SQLite-dialect text for the relational store
//! - `plan`: a structured grouping plan for sources that do not speak SQL
//!
//! Structural guarantees:
//! 1. Single-facet queries project `value` and `card_count`; stacked queries
//!    project `facet_0..facet_N` and `card_count`.
//! 2. Every query excludes soft-deleted records.
//! 3. Multi-select expansion never emits rows for null or empty arrays.
//! 4. Date buckets are pure functions of the value and the granularity.

use serde::{Deserialize, Serialize};

use crate::bucket::MONTH_NAMES;
use crate::definition::{DataType, FacetConfig, FacetId, TimeFormat};
use crate::error::FacetError;
use crate::settings::{EngineSettings, SourceSchema, DEFAULT_UNASSIGNED_LABEL};

// ============================================================================
// QUERY TYPES
// ============================================================================

/// A positional parameter bound to a `?` placeholder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum QueryParam {
    Text(String),
    Integer(i64),
}

/// Ordering of grouped rows.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum QueryOrder {
    /// Largest groups first.
    #[default]
    CountDesc,
    /// Ascending by each facet's value, outermost facet first. Month-name
    /// buckets order by month number.
    FacetValues,
}

/// Aggregations available as summaries alongside the count.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AggregateOp {
    Count,
    Sum,
    Average,
    Min,
    Max,
}

impl AggregateOp {
    fn sql_function(&self) -> &'static str {
        match self {
            AggregateOp::Count => "COUNT",
            AggregateOp::Sum => "SUM",
            AggregateOp::Average => "AVG",
            AggregateOp::Min => "MIN",
            AggregateOp::Max => "MAX",
        }
    }
}

/// A summary over a record column, projected as `agg_N`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AggregateSpec {
    pub column: String,
    pub op: AggregateOp,
}

/// Options for stacked (multi-facet) queries.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StackOptions {
    pub order: QueryOrder,
    pub aggregates: Vec<AggregateSpec>,
}

/// How one facet's group value is derived from its source column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GroupExpr {
    /// The column value itself, with the unassigned sentinel for null.
    Direct,
    /// The column truncated to a date bucket; null dates are excluded.
    DateBucket(TimeFormat),
    /// One row per element of an array-valued column; null or empty arrays
    /// are excluded.
    Expand,
}

/// One projected grouping column of a plan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupColumn {
    pub facet_id: FacetId,
    pub alias: String,
    pub source_column: String,
    pub expr: GroupExpr,
}

/// Structured description of a compiled grouping.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupingPlan {
    pub columns: Vec<GroupColumn>,
    pub aggregates: Vec<AggregateSpec>,
    pub order: QueryOrder,
    /// The query is guaranteed to return zero rows.
    pub vacuous: bool,
    pub unassigned_label: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompiledQuery {
    pub sql: String,
    pub params: Vec<QueryParam>,
    pub plan: GroupingPlan,
}

impl CompiledQuery {
    /// Number of facet value columns each result row carries.
    pub fn value_columns(&self) -> usize {
        self.plan.columns.len()
    }
}

// ============================================================================
// PER-FACET FRAGMENTS
// ============================================================================

/// SQL fragments contributed by one facet.
struct FacetFragment {
    select: String,
    sort: Option<String>,
    join: Option<String>,
    filters: Vec<String>,
    params: Vec<QueryParam>,
    column: GroupColumn,
}

/// Quotes an identifier, doubling embedded quotes.
fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

fn date_bucket_sql(column: &str, format: TimeFormat) -> String {
    match format {
        TimeFormat::Year => format!("strftime('%Y', {})", column),
        TimeFormat::Quarter => format!(
            "'Q' || ((CAST(strftime('%m', {}) AS INTEGER) - 1) / 3 + 1)",
            column
        ),
        TimeFormat::Month => format!("strftime('%Y-%m', {})", column),
        TimeFormat::MonthName => {
            let arms: Vec<String> = MONTH_NAMES
                .iter()
                .enumerate()
                .map(|(i, name)| format!("WHEN '{:02}' THEN '{}'", i + 1, name))
                .collect();
            format!("CASE strftime('%m', {}) {} END", column, arms.join(" "))
        }
        TimeFormat::Week => format!("strftime('%Y-W%W', {})", column),
        TimeFormat::Day => format!("strftime('%Y-%m-%d', {})", column),
    }
}

// ============================================================================
// COMPILER
// ============================================================================

/// Compiles FacetConfigs into grouping queries. Stateless apart from the
/// schema names and the unassigned label.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FacetQueryCompiler {
    schema: SourceSchema,
    unassigned_label: String,
}

impl Default for FacetQueryCompiler {
    fn default() -> Self {
        FacetQueryCompiler::new(SourceSchema::default(), DEFAULT_UNASSIGNED_LABEL)
    }
}

impl FacetQueryCompiler {
    pub fn new(schema: SourceSchema, unassigned_label: impl Into<String>) -> Self {
        FacetQueryCompiler {
            schema,
            unassigned_label: unassigned_label.into(),
        }
    }

    pub fn from_settings(settings: &EngineSettings) -> Self {
        FacetQueryCompiler::new(settings.schema.clone(), settings.unassigned_label.clone())
    }

    fn table(&self) -> String {
        quote_ident(&self.schema.table)
    }

    fn column_ref(&self, column: &str) -> String {
        format!("{}.{}", self.table(), quote_ident(column))
    }

    fn not_deleted(&self) -> String {
        format!("{} IS NULL", self.column_ref(&self.schema.deleted_column))
    }

    /// Builds the grouping fragment for one facet. `expansion_alias` names
    /// the table-valued join when the facet is multi-valued.
    fn fragment(
        &self,
        facet: &FacetConfig,
        alias: &str,
        expansion_alias: &str,
    ) -> Result<FacetFragment, FacetError> {
        facet.validate()?;
        let column = self.column_ref(&facet.source_column);
        let mut group_column = GroupColumn {
            facet_id: facet.id.clone(),
            alias: alias.to_string(),
            source_column: facet.source_column.clone(),
            expr: GroupExpr::Direct,
        };

        let fragment = match &facet.data_type {
            DataType::Date => {
                let format = facet.time_format.ok_or_else(|| FacetError::MissingTimeFormat {
                    facet_id: facet.id.clone(),
                })?;
                group_column.expr = GroupExpr::DateBucket(format);
                let sort = match format {
                    TimeFormat::MonthName => Some(format!(
                        "MIN(CAST(strftime('%m', {}) AS INTEGER))",
                        column
                    )),
                    _ => None,
                };
                FacetFragment {
                    select: date_bucket_sql(&column, format),
                    sort,
                    join: None,
                    filters: vec![format!("{} IS NOT NULL", column)],
                    params: Vec::new(),
                    column: group_column,
                }
            }
            DataType::MultiSelect => {
                group_column.expr = GroupExpr::Expand;
                FacetFragment {
                    select: format!("{}.value", expansion_alias),
                    sort: None,
                    join: Some(format!("JOIN json_each({}) AS {}", column, expansion_alias)),
                    filters: vec![
                        format!("{} IS NOT NULL", column),
                        format!("json_array_length({}) > 0", column),
                    ],
                    params: Vec::new(),
                    column: group_column,
                }
            }
            DataType::Text | DataType::Select | DataType::Number => FacetFragment {
                select: format!("COALESCE({}, ?)", column),
                sort: None,
                join: None,
                filters: Vec::new(),
                params: vec![QueryParam::Text(self.unassigned_label.clone())],
                column: group_column,
            },
            DataType::Unsupported(name) => {
                return Err(FacetError::UnsupportedDataType {
                    facet_id: facet.id.clone(),
                    data_type: name.clone(),
                })
            }
        };
        Ok(fragment)
    }

    fn plan(&self, columns: Vec<GroupColumn>, options: &StackOptions, vacuous: bool) -> GroupingPlan {
        GroupingPlan {
            columns,
            aggregates: options.aggregates.clone(),
            order: options.order,
            vacuous,
            unassigned_label: self.unassigned_label.clone(),
        }
    }

    /// A query that keeps the projection shape and the soft-deletion filter
    /// but can never return a row.
    fn empty_query(&self, aliases: &[String], columns: Vec<GroupColumn>, options: &StackOptions) -> CompiledQuery {
        let mut projection: Vec<String> = aliases.iter().map(|a| format!("NULL AS {}", a)).collect();
        projection.push("0 AS card_count".to_string());
        for (i, _) in options.aggregates.iter().enumerate() {
            projection.push(format!("NULL AS agg_{}", i));
        }
        let sql = format!(
            "SELECT {} FROM {} WHERE {} AND 0",
            projection.join(", "),
            self.table(),
            self.not_deleted()
        );
        CompiledQuery {
            sql,
            params: Vec::new(),
            plan: self.plan(columns, options, true),
        }
    }

    /// Compiles a `(value, card_count)` query for one facet, largest groups
    /// first.
    pub fn compile_facet(&self, facet: &FacetConfig) -> Result<CompiledQuery, FacetError> {
        self.compile_facet_ordered(facet, QueryOrder::CountDesc)
    }

    pub fn compile_facet_ordered(
        &self,
        facet: &FacetConfig,
        order: QueryOrder,
    ) -> Result<CompiledQuery, FacetError> {
        let fragment = self.fragment(facet, "value", "je")?;
        let options = StackOptions { order, aggregates: Vec::new() };

        if facet.is_vacuous() {
            log::debug!(target: "QUERY", "facet '{}' has no source column, compiling empty query", facet.id);
            return Ok(self.empty_query(&["value".to_string()], vec![fragment.column], &options));
        }

        let mut conditions = vec![self.not_deleted()];
        conditions.extend(fragment.filters.iter().cloned());

        let mut sql = format!(
            "SELECT {} AS value, COUNT(*) AS card_count FROM {}",
            fragment.select,
            self.table()
        );
        if let Some(join) = &fragment.join {
            sql.push(' ');
            sql.push_str(join);
        }
        sql.push_str(&format!(" WHERE {} GROUP BY value", conditions.join(" AND ")));
        match order {
            QueryOrder::CountDesc => sql.push_str(" ORDER BY card_count DESC"),
            QueryOrder::FacetValues => {
                let sort = fragment.sort.clone().unwrap_or_else(|| "value".to_string());
                sql.push_str(&format!(" ORDER BY {}", sort));
            }
        }

        log::debug!(target: "QUERY", "facet '{}': {}", facet.id, sql);
        Ok(CompiledQuery {
            sql,
            params: fragment.params.clone(),
            plan: self.plan(vec![fragment.column], &options, false),
        })
    }

    /// Compiles one query grouping by every facet in order, projecting
    /// `facet_0..facet_N`, `card_count` and any requested aggregates.
    pub fn compile_stacked(
        &self,
        facets: &[FacetConfig],
        options: &StackOptions,
    ) -> Result<CompiledQuery, FacetError> {
        let aliases: Vec<String> = (0..facets.len()).map(|i| format!("facet_{}", i)).collect();
        let fragments = facets
            .iter()
            .enumerate()
            .map(|(i, facet)| self.fragment(facet, &aliases[i], &format!("je_{}", i)))
            .collect::<Result<Vec<_>, _>>()?;
        let columns: Vec<GroupColumn> = fragments.iter().map(|f| f.column.clone()).collect();

        if facets.is_empty() || facets.iter().any(|f| f.is_vacuous()) {
            log::debug!(target: "QUERY", "stacked query over {} facets is vacuous", facets.len());
            return Ok(self.empty_query(&aliases, columns, options));
        }

        let mut projection = Vec::with_capacity(fragments.len() + 1 + options.aggregates.len());
        let mut params = Vec::new();
        let mut joins = Vec::new();
        let mut conditions = vec![self.not_deleted()];
        for fragment in &fragments {
            projection.push(format!("{} AS {}", fragment.select, fragment.column.alias));
            params.extend(fragment.params.iter().cloned());
            if let Some(join) = &fragment.join {
                joins.push(join.clone());
            }
            conditions.extend(fragment.filters.iter().cloned());
        }
        projection.push("COUNT(*) AS card_count".to_string());
        for (i, aggregate) in options.aggregates.iter().enumerate() {
            projection.push(format!(
                "{}({}) AS agg_{}",
                aggregate.op.sql_function(),
                self.column_ref(&aggregate.column),
                i
            ));
        }

        let mut sql = format!("SELECT {} FROM {}", projection.join(", "), self.table());
        for join in &joins {
            sql.push(' ');
            sql.push_str(join);
        }
        sql.push_str(&format!(
            " WHERE {} GROUP BY {}",
            conditions.join(" AND "),
            aliases.join(", ")
        ));
        match options.order {
            QueryOrder::CountDesc => sql.push_str(" ORDER BY card_count DESC"),
            QueryOrder::FacetValues => {
                let sorts: Vec<String> = fragments
                    .iter()
                    .map(|f| f.sort.clone().unwrap_or_else(|| f.column.alias.clone()))
                    .collect();
                sql.push_str(&format!(" ORDER BY {}", sorts.join(", ")));
            }
        }

        log::debug!(target: "QUERY", "stacked [{}]: {}", facets.len(), sql);
        Ok(CompiledQuery {
            sql,
            params,
            plan: self.plan(columns, options, false),
        })
    }
}
