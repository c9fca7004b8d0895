use sqlx::PgPool;
use std::collections::BTreeMap;

use super::catalog::{FeatureSource, SourceCatalog};
use super::fetch::{
    self, FetchRequest, Predicate, SourceResult, HOURLY_ROW_LIMIT, POINT_LOOKUP_LIMIT,
};
use super::{PatientIds, TimeWindow};

pub type SourceMap = BTreeMap<String, SourceResult>;

#[derive(Debug, Clone, Copy)]
pub struct HourlyOptions {
    pub include_procedures: bool,
    pub include_sofa: bool,
}

impl Default for HourlyOptions {
    fn default() -> Self {
        Self {
            include_procedures: true,
            include_sofa: true,
        }
    }
}

/// Point lookup of the patient's profile row by exact identifiers.
pub async fn static_sources(
    pool: &PgPool,
    catalog: &SourceCatalog,
    ids: PatientIds,
) -> SourceMap {
    let mut sources = SourceMap::new();
    let result = match resolve_or_failure(
        pool,
        catalog,
        FeatureSource::Profile,
        "No profile table found",
    )
    .await
    {
        Ok(table) => fetch::fetch_rows(pool, &profile_request(&table, ids)).await,
        Err(failure) => failure,
    };
    sources.insert(FeatureSource::Profile.key().to_string(), result);
    sources
}

/// Per-source windowed fetches. Sources are independent: one missing or
/// failing table degrades only its own envelope, never its siblings.
pub async fn hourly_sources(
    pool: &PgPool,
    catalog: &SourceCatalog,
    ids: PatientIds,
    window: TimeWindow,
    options: HourlyOptions,
) -> SourceMap {
    let mut sources = SourceMap::new();

    let vitals = match resolve_or_failure(
        pool,
        catalog,
        FeatureSource::VitalsHourly,
        "No vitals table found",
    )
    .await
    {
        Ok(table) => fetch::fetch_rows(pool, &vitals_request(&table, ids, window)).await,
        Err(failure) => failure,
    };
    sources.insert(FeatureSource::VitalsHourly.key().to_string(), vitals);

    if options.include_procedures {
        let procedures = match resolve_or_failure(
            pool,
            catalog,
            FeatureSource::ProceduresHourly,
            "No procedures table found",
        )
        .await
        {
            Ok(table) => {
                let request = stay_window_request(
                    &table,
                    ids.stay_id,
                    window,
                    "charttime_hour, charttime, itemid",
                );
                fetch::fetch_rows(pool, &request).await
            }
            Err(failure) => failure,
        };
        sources.insert(FeatureSource::ProceduresHourly.key().to_string(), procedures);
    }

    if options.include_sofa {
        let sofa = match resolve_or_failure(
            pool,
            catalog,
            FeatureSource::SofaHourly,
            "No SOFA table found",
        )
        .await
        {
            Ok(table) => {
                let request = stay_window_request(&table, ids.stay_id, window, "charttime_hour");
                fetch::fetch_rows(pool, &request).await
            }
            Err(failure) => failure,
        };
        sources.insert(FeatureSource::SofaHourly.key().to_string(), sofa);
    }

    sources
}

/// Static and hourly source maps merged into one. Source names never
/// actually collide, but the static entry wins if they ever did.
pub async fn combined_sources(
    pool: &PgPool,
    catalog: &SourceCatalog,
    ids: PatientIds,
    window: TimeWindow,
) -> SourceMap {
    let static_map = static_sources(pool, catalog, ids).await;
    let hourly = hourly_sources(pool, catalog, ids, window, HourlyOptions::default()).await;
    overlay_static(hourly, static_map)
}

fn overlay_static(mut hourly: SourceMap, static_map: SourceMap) -> SourceMap {
    for (key, result) in static_map {
        hourly.insert(key, result);
    }
    hourly
}

pub(crate) async fn resolve_or_failure(
    pool: &PgPool,
    catalog: &SourceCatalog,
    source: FeatureSource,
    missing_message: &str,
) -> Result<String, SourceResult> {
    match catalog.resolve(pool, source).await {
        Ok(Some(table)) => Ok(table),
        Ok(None) => Err(SourceResult::failure(None, missing_message)),
        Err(err) => {
            tracing::warn!(source = source.key(), error = %err, "table resolution failed");
            Err(SourceResult::failure(None, err.to_string()))
        }
    }
}

fn profile_request(table: &str, ids: PatientIds) -> FetchRequest {
    FetchRequest {
        table: table.to_string(),
        predicates: vec![
            ("subject_id".to_string(), Predicate::EqInt(ids.subject_id)),
            ("stay_id".to_string(), Predicate::EqInt(ids.stay_id)),
            ("hadm_id".to_string(), Predicate::EqInt(ids.hadm_id)),
        ],
        order_by: None,
        limit: POINT_LOOKUP_LIMIT,
    }
}

pub(crate) fn vitals_request(table: &str, ids: PatientIds, window: TimeWindow) -> FetchRequest {
    FetchRequest {
        table: table.to_string(),
        predicates: vec![
            ("subject_id".to_string(), Predicate::EqInt(ids.subject_id)),
            ("stay_id".to_string(), Predicate::EqInt(ids.stay_id)),
            (
                "charttime_hour".to_string(),
                Predicate::TimeBetween {
                    start: window.start,
                    end: window.end,
                },
            ),
        ],
        order_by: Some("charttime_hour".to_string()),
        limit: HOURLY_ROW_LIMIT,
    }
}

pub(crate) fn stay_window_request(
    table: &str,
    stay_id: i64,
    window: TimeWindow,
    order_by: &str,
) -> FetchRequest {
    FetchRequest {
        table: table.to_string(),
        predicates: vec![
            ("stay_id".to_string(), Predicate::EqInt(stay_id)),
            (
                "charttime_hour".to_string(),
                Predicate::TimeBetween {
                    start: window.start,
                    end: window.end,
                },
            ),
        ],
        order_by: Some(order_by.to_string()),
        limit: HOURLY_ROW_LIMIT,
    }
}
