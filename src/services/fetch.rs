use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::Serialize;
use serde_json::Value;
use sqlx::postgres::{PgColumn, PgRow};
use sqlx::{Column, PgPool, Postgres, QueryBuilder, Row, TypeInfo};

use crate::json::RowMap;

/// Hard row caps. Size bounds, not time bounds; no query runs uncapped.
pub const DEFAULT_ROW_LIMIT: i64 = 5_000;
pub const POINT_LOOKUP_LIMIT: i64 = 10;
pub const HOURLY_ROW_LIMIT: i64 = 20_000;

pub(crate) const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.f";

/// Typed constraint on one column. Callers never supply SQL text.
#[derive(Debug, Clone)]
pub enum Predicate {
    EqInt(i64),
    AnyInt(Vec<i64>),
    /// Inclusive on both ends.
    TimeBetween {
        start: NaiveDateTime,
        end: NaiveDateTime,
    },
    /// Calendar-day + hour match on a timestamp column, ignoring year.
    DayHourEq {
        month: u32,
        day: u32,
        hour: i32,
    },
    DayHourLte {
        month: u32,
        day: u32,
        hour: i32,
    },
}

/// One bounded SELECT against a resolved table. `table`, predicate columns
/// and `order_by` are trusted identifiers (resolver output or literals), not
/// request input.
#[derive(Debug, Clone)]
pub struct FetchRequest {
    pub table: String,
    pub predicates: Vec<(String, Predicate)>,
    pub order_by: Option<String>,
    pub limit: i64,
}

/// Uniform per-source query outcome. A failed fetch is data, not an error:
/// `ok == false` implies empty rows and a non-null error message.
#[derive(Debug, Clone, Serialize, utoipa::ToSchema)]
pub struct SourceResult {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub table: Option<String>,
    pub columns: Vec<String>,
    pub rows: Vec<RowMap>,
    pub row_count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl SourceResult {
    pub fn success(table: String, columns: Vec<String>, rows: Vec<RowMap>) -> Self {
        let row_count = rows.len();
        Self {
            ok: true,
            table: Some(table),
            columns,
            rows,
            row_count,
            error: None,
        }
    }

    pub fn failure(table: Option<String>, error: impl Into<String>) -> Self {
        Self {
            ok: false,
            table,
            columns: Vec::new(),
            rows: Vec::new(),
            row_count: 0,
            error: Some(error.into()),
        }
    }
}

/// Runs the request, folding every failure (connectivity, bad identifier,
/// decode) into a failed envelope rather than an `Err`.
pub async fn fetch_rows(pool: &PgPool, request: &FetchRequest) -> SourceResult {
    match run_fetch(pool, request).await {
        Ok(result) => result,
        Err(err) => {
            tracing::warn!(table = %request.table, error = %err, "row fetch failed");
            SourceResult::failure(Some(request.table.clone()), err.to_string())
        }
    }
}

async fn run_fetch(pool: &PgPool, request: &FetchRequest) -> Result<SourceResult, sqlx::Error> {
    let mut query = build_query(request);
    let rows = query.build().fetch_all(pool).await?;

    let columns: Vec<String> = rows
        .first()
        .map(|row| {
            row.columns()
                .iter()
                .map(|column| column.name().to_string())
                .collect()
        })
        .unwrap_or_default();

    let mut decoded = Vec::with_capacity(rows.len());
    for row in &rows {
        decoded.push(row_to_map(row)?);
    }

    Ok(SourceResult::success(request.table.clone(), columns, decoded))
}

pub fn build_query(request: &FetchRequest) -> QueryBuilder<'static, Postgres> {
    let mut qb = QueryBuilder::<Postgres>::new(format!("SELECT * FROM {}", request.table));

    let mut prefix = " WHERE ";
    for (column, predicate) in &request.predicates {
        match predicate {
            Predicate::EqInt(value) => {
                qb.push(format!("{prefix}{column} = "));
                qb.push_bind(*value);
            }
            Predicate::AnyInt(values) => {
                qb.push(format!("{prefix}{column} = ANY("));
                qb.push_bind(values.clone());
                qb.push(")");
            }
            Predicate::TimeBetween { start, end } => {
                qb.push(format!("{prefix}{column} >= "));
                qb.push_bind(*start);
                qb.push(format!(" AND {column} <= "));
                qb.push_bind(*end);
            }
            Predicate::DayHourEq { month, day, hour } => {
                push_day_filter(&mut qb, prefix, column, *month, *day);
                qb.push(format!(" AND EXTRACT(HOUR FROM {column})::int = "));
                qb.push_bind(*hour);
            }
            Predicate::DayHourLte { month, day, hour } => {
                push_day_filter(&mut qb, prefix, column, *month, *day);
                qb.push(format!(" AND EXTRACT(HOUR FROM {column})::int <= "));
                qb.push_bind(*hour);
            }
        }
        prefix = " AND ";
    }

    if let Some(order_by) = &request.order_by {
        qb.push(format!(" ORDER BY {order_by}"));
    }
    qb.push(" LIMIT ");
    qb.push_bind(request.limit);
    qb
}

fn push_day_filter(
    qb: &mut QueryBuilder<'static, Postgres>,
    prefix: &str,
    column: &str,
    month: u32,
    day: u32,
) {
    qb.push(format!("{prefix}EXTRACT(MONTH FROM {column})::int = "));
    qb.push_bind(month as i32);
    qb.push(format!(" AND EXTRACT(DAY FROM {column})::int = "));
    qb.push_bind(day as i32);
}

pub fn row_to_map(row: &PgRow) -> Result<RowMap, sqlx::Error> {
    let mut map = serde_json::Map::new();
    for column in row.columns() {
        map.insert(column.name().to_string(), decode_column(row, column)?);
    }
    Ok(RowMap(map))
}

fn decode_column(row: &PgRow, column: &PgColumn) -> Result<Value, sqlx::Error> {
    let index = column.ordinal();
    let value = match column.type_info().name() {
        "INT2" => json_from(row.try_get::<Option<i16>, _>(index)?),
        "INT4" => json_from(row.try_get::<Option<i32>, _>(index)?),
        "INT8" => json_from(row.try_get::<Option<i64>, _>(index)?),
        "FLOAT4" => json_from(row.try_get::<Option<f32>, _>(index)?.map(f64::from)),
        "FLOAT8" => json_from(row.try_get::<Option<f64>, _>(index)?),
        "NUMERIC" => json_from(
            row.try_get::<Option<Decimal>, _>(index)?
                .and_then(|value| value.to_f64()),
        ),
        "BOOL" => json_from(row.try_get::<Option<bool>, _>(index)?),
        "VARCHAR" | "TEXT" | "BPCHAR" | "NAME" => {
            json_from(row.try_get::<Option<String>, _>(index)?)
        }
        "TIMESTAMP" => json_from(
            row.try_get::<Option<NaiveDateTime>, _>(index)?
                .map(|value| value.format(TIMESTAMP_FORMAT).to_string()),
        ),
        "TIMESTAMPTZ" => json_from(
            row.try_get::<Option<DateTime<Utc>>, _>(index)?
                .map(|value| value.to_rfc3339()),
        ),
        "DATE" => json_from(
            row.try_get::<Option<NaiveDate>, _>(index)?
                .map(|value| value.format("%Y-%m-%d").to_string()),
        ),
        "TIME" => json_from(
            row.try_get::<Option<NaiveTime>, _>(index)?
                .map(|value| value.format("%H:%M:%S%.f").to_string()),
        ),
        "JSON" | "JSONB" => row.try_get::<Option<Value>, _>(index)?.unwrap_or(Value::Null),
        // Exotic column types degrade to null rather than failing the fetch.
        _ => Value::Null,
    };
    Ok(value)
}

fn json_from<T>(value: Option<T>) -> Value
where
    Value: From<T>,
{
    value.map(Value::from).unwrap_or(Value::Null)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn naive(s: &str) -> NaiveDateTime {
        NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S").expect("valid timestamp")
    }

    #[test]
    fn builds_point_lookup_sql() {
        let request = FetchRequest {
            table: "fisi9t_unique_patient_profile".to_string(),
            predicates: vec![
                ("subject_id".to_string(), Predicate::EqInt(10002428)),
                ("stay_id".to_string(), Predicate::EqInt(35479615)),
                ("hadm_id".to_string(), Predicate::EqInt(23473524)),
            ],
            order_by: None,
            limit: POINT_LOOKUP_LIMIT,
        };
        let query = build_query(&request);
        assert_eq!(
            query.sql(),
            "SELECT * FROM fisi9t_unique_patient_profile \
             WHERE subject_id = $1 AND stay_id = $2 AND hadm_id = $3 LIMIT $4"
        );
    }

    #[test]
    fn builds_window_sql_inclusive_on_both_ends() {
        let request = FetchRequest {
            table: "fisi9t_vitalsign_hourly".to_string(),
            predicates: vec![
                ("subject_id".to_string(), Predicate::EqInt(1)),
                ("stay_id".to_string(), Predicate::EqInt(2)),
                (
                    "charttime_hour".to_string(),
                    Predicate::TimeBetween {
                        start: naive("2101-03-13T04:00:00"),
                        end: naive("2101-03-13T10:00:00"),
                    },
                ),
            ],
            order_by: Some("charttime_hour".to_string()),
            limit: HOURLY_ROW_LIMIT,
        };
        let query = build_query(&request);
        assert_eq!(
            query.sql(),
            "SELECT * FROM fisi9t_vitalsign_hourly \
             WHERE subject_id = $1 AND stay_id = $2 \
             AND charttime_hour >= $3 AND charttime_hour <= $4 \
             ORDER BY charttime_hour LIMIT $5"
        );
    }

    #[test]
    fn builds_hour_equality_sql_for_admitted_stays() {
        let request = FetchRequest {
            table: "fisi9t_vitalsign_hourly".to_string(),
            predicates: vec![
                ("stay_id".to_string(), Predicate::AnyInt(vec![31, 32])),
                (
                    "charttime_hour".to_string(),
                    Predicate::DayHourEq {
                        month: 3,
                        day: 13,
                        hour: 7,
                    },
                ),
            ],
            order_by: None,
            limit: HOURLY_ROW_LIMIT,
        };
        let query = build_query(&request);
        assert_eq!(
            query.sql(),
            "SELECT * FROM fisi9t_vitalsign_hourly \
             WHERE stay_id = ANY($1) \
             AND EXTRACT(MONTH FROM charttime_hour)::int = $2 \
             AND EXTRACT(DAY FROM charttime_hour)::int = $3 \
             AND EXTRACT(HOUR FROM charttime_hour)::int = $4 LIMIT $5"
        );
    }

    #[test]
    fn builds_hour_upper_bound_sql() {
        let request = FetchRequest {
            table: "fisi9t_procedureevents_hourly".to_string(),
            predicates: vec![(
                "charttime_hour".to_string(),
                Predicate::DayHourLte {
                    month: 3,
                    day: 13,
                    hour: 5,
                },
            )],
            order_by: Some("charttime_hour, charttime, itemid".to_string()),
            limit: DEFAULT_ROW_LIMIT,
        };
        let query = build_query(&request);
        assert_eq!(
            query.sql(),
            "SELECT * FROM fisi9t_procedureevents_hourly \
             WHERE EXTRACT(MONTH FROM charttime_hour)::int = $1 \
             AND EXTRACT(DAY FROM charttime_hour)::int = $2 \
             AND EXTRACT(HOUR FROM charttime_hour)::int <= $3 \
             ORDER BY charttime_hour, charttime, itemid LIMIT $4"
        );
    }

    #[test]
    fn success_envelope_counts_rows_and_carries_no_error() {
        let mut row = serde_json::Map::new();
        row.insert("heart_rate".to_string(), Value::from(88));
        let result = SourceResult::success(
            "fisi9t_vitalsign_hourly".to_string(),
            vec!["heart_rate".to_string()],
            vec![RowMap(row)],
        );
        assert!(result.ok);
        assert_eq!(result.row_count, 1);
        assert_eq!(result.error, None);
    }

    #[test]
    fn failure_envelope_is_empty_with_error_set() {
        let result = SourceResult::failure(None, "No profile table found");
        assert!(!result.ok);
        assert!(result.rows.is_empty());
        assert!(result.columns.is_empty());
        assert_eq!(result.row_count, 0);
        assert_eq!(result.error.as_deref(), Some("No profile table found"));

        let json = serde_json::to_value(&result).expect("serializes");
        assert!(json.get("table").is_none());
        assert_eq!(json["error"], "No profile table found");
    }
}
