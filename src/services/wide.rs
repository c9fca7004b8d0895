use chrono::NaiveDateTime;
use serde_json::Value;
use sqlx::PgPool;
use std::collections::{BTreeMap, BTreeSet};

use super::catalog::{FeatureSource, SourceCatalog};
use super::features::{resolve_or_failure, stay_window_request, vitals_request};
use super::fetch::{self, SourceResult, TIMESTAMP_FORMAT};
use super::{PatientIds, TimeWindow};
use crate::json::RowMap;

pub const WIDE_TABLE_NAME: &str = "hourly_wide_assembled";

const IDENTITY_COLUMNS: [&str; 4] = ["subject_id", "stay_id", "hadm_id", "charttime_hour"];

#[derive(Debug, Clone, Copy)]
pub struct WideOptions {
    pub include_sofa: bool,
    pub include_labs: bool,
}

impl Default for WideOptions {
    fn default() -> Self {
        Self {
            include_sofa: true,
            include_labs: true,
        }
    }
}

/// Assembles one wide row per hour from vitals plus optional severity and
/// lab sources. Vitals is the anchor: if it cannot be resolved or fetched
/// the assembly fails as a whole. Optional sources degrade silently.
pub async fn assemble_hourly_wide(
    pool: &PgPool,
    catalog: &SourceCatalog,
    ids: PatientIds,
    window: TimeWindow,
    options: WideOptions,
) -> SourceResult {
    let vitals_table = match resolve_or_failure(
        pool,
        catalog,
        FeatureSource::VitalsHourly,
        "Missing vitals table",
    )
    .await
    {
        Ok(table) => table,
        Err(failure) => return failure,
    };
    let vitals = fetch::fetch_rows(pool, &vitals_request(&vitals_table, ids, window)).await;
    if !vitals.ok {
        return vitals;
    }

    let mut sources: Vec<(FeatureSource, SourceResult)> =
        vec![(FeatureSource::VitalsHourly, vitals)];

    if options.include_sofa {
        if let Some(result) =
            optional_source(pool, catalog, FeatureSource::SofaHourly, ids, window).await
        {
            sources.push((FeatureSource::SofaHourly, result));
        }
    }
    if options.include_labs {
        for source in [
            FeatureSource::ChemistryHourly,
            FeatureSource::CoagulationHourly,
        ] {
            if let Some(result) = optional_source(pool, catalog, source, ids, window).await {
                sources.push((source, result));
            }
        }
    }

    merge_wide(ids, &sources)
}

async fn optional_source(
    pool: &PgPool,
    catalog: &SourceCatalog,
    source: FeatureSource,
    ids: PatientIds,
    window: TimeWindow,
) -> Option<SourceResult> {
    match catalog.resolve(pool, source).await {
        Ok(Some(table)) => {
            let request = stay_window_request(&table, ids.stay_id, window, "charttime_hour");
            Some(fetch::fetch_rows(pool, &request).await)
        }
        Ok(None) => None,
        Err(err) => {
            tracing::warn!(source = source.key(), error = %err, "optional source resolution failed");
            None
        }
    }
}

/// Outer-join merge keyed by `charttime_hour`. A wide row exists for an hour
/// if any contributing source has a row there; sources absent at an hour
/// leave their columns absent rather than null-filled. Failed envelopes and
/// rows without a parseable hour key contribute nothing.
pub fn merge_wide(ids: PatientIds, sources: &[(FeatureSource, SourceResult)]) -> SourceResult {
    let mut by_hour: BTreeMap<NaiveDateTime, RowMap> = BTreeMap::new();
    let mut columns: Vec<String> = IDENTITY_COLUMNS.iter().map(|name| name.to_string()).collect();
    let mut seen: BTreeSet<String> = columns.iter().cloned().collect();

    for (source, result) in sources {
        if !result.ok {
            continue;
        }
        let prefix = source.wide_prefix();
        for row in &result.rows {
            let Some(hour) = parse_hour_key(row.get("charttime_hour")) else {
                continue;
            };
            let wide = by_hour
                .entry(hour)
                .or_insert_with(|| seed_row(ids, hour));
            for (name, value) in row.iter() {
                if IDENTITY_COLUMNS.contains(&name.as_str()) {
                    continue;
                }
                let namespaced = format!("{prefix}__{name}");
                if seen.insert(namespaced.clone()) {
                    columns.push(namespaced.clone());
                }
                wide.insert(namespaced, value.clone());
            }
        }
    }

    let rows: Vec<RowMap> = by_hour.into_values().collect();
    SourceResult::success(WIDE_TABLE_NAME.to_string(), columns, rows)
}

fn seed_row(ids: PatientIds, hour: NaiveDateTime) -> RowMap {
    let mut row = serde_json::Map::new();
    row.insert("subject_id".to_string(), Value::from(ids.subject_id));
    row.insert("stay_id".to_string(), Value::from(ids.stay_id));
    row.insert("hadm_id".to_string(), Value::from(ids.hadm_id));
    row.insert(
        "charttime_hour".to_string(),
        Value::String(hour.format(TIMESTAMP_FORMAT).to_string()),
    );
    RowMap(row)
}

fn parse_hour_key(value: Option<&Value>) -> Option<NaiveDateTime> {
    let raw = value?.as_str()?;
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
        .or_else(|_| NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S%.f"))
        .ok()
}
