use axum::extract::{Path, RawQuery};
use axum::http::StatusCode;
use axum::routing::get;
use axum::{Json, Router};
use chrono::{DateTime, Duration, NaiveDateTime};
use url::form_urlencoded;

use crate::services::features::{self, HourlyOptions, SourceMap};
use crate::services::wide::{self, WideOptions};
use crate::services::{PatientIds, TimeWindow};
use crate::state::AppState;

/// Window length applied when only `as_of` is supplied.
pub(crate) const DEFAULT_WINDOW_HOURS: i64 = 6;

const TIMESTAMP_INPUT_FORMATS: [&str; 4] = [
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M",
];

#[derive(Debug, Clone, serde::Serialize, utoipa::ToSchema)]
pub(crate) struct StaticFeaturesResponse {
    pub(crate) patient: PatientIds,
    #[schema(value_type = Object)]
    pub(crate) sources: SourceMap,
}

#[derive(Debug, Clone, serde::Serialize, utoipa::ToSchema)]
pub(crate) struct WindowedFeaturesResponse {
    pub(crate) patient: PatientIds,
    pub(crate) window: TimeWindow,
    #[schema(value_type = Object)]
    pub(crate) sources: SourceMap,
}

/// Last occurrence wins when a key repeats, like the upstream query dicts.
pub(crate) fn query_param(raw: Option<&str>, key: &str) -> Option<String> {
    let raw = raw?;
    let mut found = None;
    for (name, value) in form_urlencoded::parse(raw.as_bytes()) {
        if name.as_ref() == key {
            found = Some(value.into_owned());
        }
    }
    found
}

/// Include-flags default to on; anything but a case-insensitive "true"
/// switches a source off.
pub(crate) fn flag_enabled(raw: Option<&str>, key: &str) -> bool {
    match query_param(raw, key) {
        None => true,
        Some(value) => value.eq_ignore_ascii_case("true"),
    }
}

pub(crate) fn parse_timestamp(
    raw: &str,
    param: &str,
) -> Result<NaiveDateTime, (StatusCode, String)> {
    let trimmed = raw.trim();
    if let Ok(parsed) = DateTime::parse_from_rfc3339(trimmed) {
        return Ok(parsed.naive_utc());
    }
    for format in TIMESTAMP_INPUT_FORMATS {
        if let Ok(parsed) = NaiveDateTime::parse_from_str(trimmed, format) {
            return Ok(parsed);
        }
    }
    Err((
        StatusCode::BAD_REQUEST,
        format!("Invalid {param} timestamp: {trimmed}"),
    ))
}

pub(crate) fn parse_window_hours(
    raw: Option<&str>,
    default_hours: i64,
) -> Result<i64, (StatusCode, String)> {
    match query_param(raw, "window_hours") {
        None => Ok(default_hours),
        Some(value) => value.trim().parse::<i64>().map_err(|_| {
            (
                StatusCode::BAD_REQUEST,
                format!("Invalid window_hours value: {value}"),
            )
        }),
    }
}

/// Explicit `start`+`end` take precedence; otherwise the window reaches back
/// `window_hours` from `as_of`. Both bounds are inclusive.
pub(crate) fn resolve_time_window(
    raw: Option<&str>,
    default_hours: i64,
) -> Result<TimeWindow, (StatusCode, String)> {
    let start_raw = query_param(raw, "start").filter(|value| !value.is_empty());
    let end_raw = query_param(raw, "end").filter(|value| !value.is_empty());

    if let (Some(start_raw), Some(end_raw)) = (&start_raw, &end_raw) {
        let start = parse_timestamp(start_raw, "start")?;
        let end = parse_timestamp(end_raw, "end")?;
        return Ok(TimeWindow { start, end });
    }

    if let Some(as_of_raw) = query_param(raw, "as_of").filter(|value| !value.is_empty()) {
        let end = parse_timestamp(&as_of_raw, "as_of")?;
        let window_hours = parse_window_hours(raw, default_hours)?;
        let start = Duration::try_hours(window_hours)
            .and_then(|span| end.checked_sub_signed(span))
            .ok_or_else(|| {
                (
                    StatusCode::BAD_REQUEST,
                    format!("Invalid window_hours value: {window_hours}"),
                )
            })?;
        return Ok(TimeWindow { start, end });
    }

    Err((
        StatusCode::BAD_REQUEST,
        "Provide either start+end params, or as_of (+ optional window_hours).".to_string(),
    ))
}

#[utoipa::path(
    get,
    path = "/api/patients/{subject_id}/{stay_id}/{hadm_id}/features/static",
    tag = "features",
    params(
        ("subject_id" = i64, Path, description = "Subject identifier"),
        ("stay_id" = i64, Path, description = "ICU stay identifier"),
        ("hadm_id" = i64, Path, description = "Hospital admission identifier")
    ),
    responses((status = 200, description = "Static feature envelopes", body = StaticFeaturesResponse))
)]
pub(crate) async fn static_features(
    axum::extract::State(state): axum::extract::State<AppState>,
    Path((subject_id, stay_id, hadm_id)): Path<(i64, i64, i64)>,
) -> Json<StaticFeaturesResponse> {
    let ids = PatientIds {
        subject_id,
        stay_id,
        hadm_id,
    };
    let sources = features::static_sources(&state.db, &state.catalog, ids).await;
    Json(StaticFeaturesResponse {
        patient: ids,
        sources,
    })
}

#[utoipa::path(
    get,
    path = "/api/patients/{subject_id}/{stay_id}/{hadm_id}/features/hourly",
    tag = "features",
    params(
        ("subject_id" = i64, Path, description = "Subject identifier"),
        ("stay_id" = i64, Path, description = "ICU stay identifier"),
        ("hadm_id" = i64, Path, description = "Hospital admission identifier"),
        ("start" = Option<String>, Query, description = "Window start (inclusive)"),
        ("end" = Option<String>, Query, description = "Window end (inclusive)"),
        ("as_of" = Option<String>, Query, description = "Window end when start/end are absent"),
        ("window_hours" = Option<i64>, Query, description = "Hours before as_of (default 6)"),
        ("include_procedures" = Option<bool>, Query, description = "Fetch the procedures source (default true)"),
        ("include_sofa" = Option<bool>, Query, description = "Fetch the SOFA source (default true)")
    ),
    responses(
        (status = 200, description = "Hourly feature envelopes", body = WindowedFeaturesResponse),
        (status = 400, description = "Invalid window parameters")
    )
)]
pub(crate) async fn hourly_features(
    axum::extract::State(state): axum::extract::State<AppState>,
    Path((subject_id, stay_id, hadm_id)): Path<(i64, i64, i64)>,
    RawQuery(raw): RawQuery,
) -> Result<Json<WindowedFeaturesResponse>, (StatusCode, String)> {
    let ids = PatientIds {
        subject_id,
        stay_id,
        hadm_id,
    };
    let window = resolve_time_window(raw.as_deref(), DEFAULT_WINDOW_HOURS)?;
    let options = HourlyOptions {
        include_procedures: flag_enabled(raw.as_deref(), "include_procedures"),
        include_sofa: flag_enabled(raw.as_deref(), "include_sofa"),
    };
    let sources = features::hourly_sources(&state.db, &state.catalog, ids, window, options).await;
    Ok(Json(WindowedFeaturesResponse {
        patient: ids,
        window,
        sources,
    }))
}

#[utoipa::path(
    get,
    path = "/api/patients/{subject_id}/{stay_id}/{hadm_id}/features/hourly-wide",
    tag = "features",
    params(
        ("subject_id" = i64, Path, description = "Subject identifier"),
        ("stay_id" = i64, Path, description = "ICU stay identifier"),
        ("hadm_id" = i64, Path, description = "Hospital admission identifier"),
        ("start" = Option<String>, Query, description = "Window start (inclusive)"),
        ("end" = Option<String>, Query, description = "Window end (inclusive)"),
        ("as_of" = Option<String>, Query, description = "Window end when start/end are absent"),
        ("window_hours" = Option<i64>, Query, description = "Hours before as_of (default 6)"),
        ("include_sofa" = Option<bool>, Query, description = "Join the SOFA source (default true)"),
        ("include_labs" = Option<bool>, Query, description = "Join the lab sources (default true)")
    ),
    responses(
        (status = 200, description = "One joined wide envelope per hour", body = WindowedFeaturesResponse),
        (status = 400, description = "Invalid window parameters")
    )
)]
pub(crate) async fn hourly_wide_features(
    axum::extract::State(state): axum::extract::State<AppState>,
    Path((subject_id, stay_id, hadm_id)): Path<(i64, i64, i64)>,
    RawQuery(raw): RawQuery,
) -> Result<Json<WindowedFeaturesResponse>, (StatusCode, String)> {
    let ids = PatientIds {
        subject_id,
        stay_id,
        hadm_id,
    };
    let window = resolve_time_window(raw.as_deref(), DEFAULT_WINDOW_HOURS)?;
    let options = WideOptions {
        include_sofa: flag_enabled(raw.as_deref(), "include_sofa"),
        include_labs: flag_enabled(raw.as_deref(), "include_labs"),
    };
    let assembled = wide::assemble_hourly_wide(&state.db, &state.catalog, ids, window, options).await;
    let mut sources = SourceMap::new();
    sources.insert("hourly_wide".to_string(), assembled);
    Ok(Json(WindowedFeaturesResponse {
        patient: ids,
        window,
        sources,
    }))
}

#[utoipa::path(
    get,
    path = "/api/patients/{subject_id}/{stay_id}/{hadm_id}/feature-bundle",
    tag = "features",
    params(
        ("subject_id" = i64, Path, description = "Subject identifier"),
        ("stay_id" = i64, Path, description = "ICU stay identifier"),
        ("hadm_id" = i64, Path, description = "Hospital admission identifier"),
        ("start" = Option<String>, Query, description = "Window start (inclusive)"),
        ("end" = Option<String>, Query, description = "Window end (inclusive)"),
        ("as_of" = Option<String>, Query, description = "Window end when start/end are absent"),
        ("window_hours" = Option<i64>, Query, description = "Hours before as_of (default 6)")
    ),
    responses(
        (status = 200, description = "Static and hourly envelopes in one map", body = WindowedFeaturesResponse),
        (status = 400, description = "Invalid window parameters")
    )
)]
pub(crate) async fn feature_bundle(
    axum::extract::State(state): axum::extract::State<AppState>,
    Path((subject_id, stay_id, hadm_id)): Path<(i64, i64, i64)>,
    RawQuery(raw): RawQuery,
) -> Result<Json<WindowedFeaturesResponse>, (StatusCode, String)> {
    let ids = PatientIds {
        subject_id,
        stay_id,
        hadm_id,
    };
    let window = resolve_time_window(raw.as_deref(), DEFAULT_WINDOW_HOURS)?;
    let sources = features::combined_sources(&state.db, &state.catalog, ids, window).await;
    Ok(Json(WindowedFeaturesResponse {
        patient: ids,
        window,
        sources,
    }))
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route(
            "/patients/{subject_id}/{stay_id}/{hadm_id}/features/static",
            get(static_features),
        )
        .route(
            "/patients/{subject_id}/{stay_id}/{hadm_id}/features/hourly",
            get(hourly_features),
        )
        .route(
            "/patients/{subject_id}/{stay_id}/{hadm_id}/features/hourly-wide",
            get(hourly_wide_features),
        )
        .route(
            "/patients/{subject_id}/{stay_id}/{hadm_id}/feature-bundle",
            get(feature_bundle),
        )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn naive(s: &str) -> NaiveDateTime {
        NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S").expect("valid timestamp")
    }

    #[test]
    fn query_param_takes_the_last_occurrence() {
        let raw = Some("page=1&page=3");
        assert_eq!(query_param(raw, "page").as_deref(), Some("3"));
        assert_eq!(query_param(raw, "missing"), None);
        assert_eq!(query_param(None, "page"), None);
    }

    #[test]
    fn include_flags_default_on_and_compare_case_insensitively() {
        assert!(flag_enabled(None, "include_sofa"));
        assert!(flag_enabled(Some("other=1"), "include_sofa"));
        assert!(flag_enabled(Some("include_sofa=true"), "include_sofa"));
        assert!(flag_enabled(Some("include_sofa=TRUE"), "include_sofa"));
        assert!(!flag_enabled(Some("include_sofa=false"), "include_sofa"));
        assert!(!flag_enabled(Some("include_sofa=1"), "include_sofa"));
        assert!(!flag_enabled(Some("include_sofa="), "include_sofa"));
    }

    #[test]
    fn timestamps_parse_rfc3339_and_naive_forms() {
        assert_eq!(
            parse_timestamp("2101-03-13T10:00:00Z", "as_of").expect("parses"),
            naive("2101-03-13T10:00:00")
        );
        assert_eq!(
            parse_timestamp("2101-03-13T10:00", "as_of").expect("parses"),
            naive("2101-03-13T10:00:00")
        );
        assert_eq!(
            parse_timestamp("2101-03-13 10:00:00", "as_of").expect("parses"),
            naive("2101-03-13T10:00:00")
        );
        assert_eq!(
            parse_timestamp("2101-03-13T10:00:00.500", "as_of")
                .expect("parses")
                .format("%H:%M:%S%.3f")
                .to_string(),
            "10:00:00.500"
        );
    }

    #[test]
    fn malformed_timestamps_name_the_parameter() {
        let (status, message) = parse_timestamp("yesterday", "start").expect_err("rejects");
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(message.contains("start"));
        assert!(message.contains("yesterday"));
    }

    #[test]
    fn explicit_bounds_take_precedence_over_as_of() {
        let raw = Some(
            "start=2101-03-13T04:00:00&end=2101-03-13T10:00:00&as_of=2101-03-13T23:00:00",
        );
        let window = resolve_time_window(raw, DEFAULT_WINDOW_HOURS).expect("resolves");
        assert_eq!(window.start, naive("2101-03-13T04:00:00"));
        assert_eq!(window.end, naive("2101-03-13T10:00:00"));
    }

    #[test]
    fn as_of_reaches_back_the_default_window() {
        let raw = Some("as_of=2101-03-13T10:00:00");
        let window = resolve_time_window(raw, DEFAULT_WINDOW_HOURS).expect("resolves");
        assert_eq!(window.start, naive("2101-03-13T04:00:00"));
        assert_eq!(window.end, naive("2101-03-13T10:00:00"));
    }

    #[test]
    fn as_of_honors_an_explicit_window_length() {
        let raw = Some("as_of=2101-03-13T10:00:00&window_hours=24");
        let window = resolve_time_window(raw, DEFAULT_WINDOW_HOURS).expect("resolves");
        assert_eq!(window.start, naive("2101-03-12T10:00:00"));
        assert_eq!(window.end, naive("2101-03-13T10:00:00"));
    }

    #[test]
    fn empty_bounds_fall_through_to_as_of() {
        let raw = Some("start=&end=&as_of=2101-03-13T10:00:00");
        let window = resolve_time_window(raw, DEFAULT_WINDOW_HOURS).expect("resolves");
        assert_eq!(window.end, naive("2101-03-13T10:00:00"));
    }

    #[test]
    fn missing_window_parameters_are_rejected() {
        let (status, message) =
            resolve_time_window(Some("include_sofa=false"), DEFAULT_WINDOW_HOURS)
                .expect_err("rejects");
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(
            message,
            "Provide either start+end params, or as_of (+ optional window_hours)."
        );
    }

    #[test]
    fn malformed_window_hours_are_rejected() {
        let raw = Some("as_of=2101-03-13T10:00:00&window_hours=six");
        let (status, message) =
            resolve_time_window(raw, DEFAULT_WINDOW_HOURS).expect_err("rejects");
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(message.contains("window_hours"));
    }

    #[test]
    fn unrepresentable_window_lengths_are_rejected() {
        let raw = Some("as_of=2101-03-13T10:00:00&window_hours=9223372036854775807");
        let (status, message) =
            resolve_time_window(raw, DEFAULT_WINDOW_HOURS).expect_err("rejects");
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(message.contains("window_hours"));
    }

    #[test]
    fn only_one_explicit_bound_falls_back_to_as_of_rules() {
        let raw = Some("start=2101-03-13T04:00:00");
        let (status, _) = resolve_time_window(raw, DEFAULT_WINDOW_HOURS).expect_err("rejects");
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }
}
