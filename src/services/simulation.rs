use chrono::{Datelike, NaiveDate, NaiveDateTime};
use serde::Serialize;
use sqlx::{FromRow, PgPool, Postgres, QueryBuilder};
use std::sync::{Mutex, MutexGuard};

use super::PatientIds;
use crate::cohort::CohortFilter;

/// Hour the ward clock can reach, saturating at the end of the simulated
/// day. -1 means the simulation has not started and no patient is visible.
pub const TERMINAL_HOUR: i32 = 23;

/// In-memory simulation clock. Single writer state shared by all requests;
/// resets to -1 on process restart. The terminal check and the increment
/// happen under one lock acquisition, so observers never see an hour
/// outside [-1, 23].
#[derive(Debug)]
pub struct SimulationClock {
    current_hour: Mutex<i32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClockTick {
    Advanced(i32),
    Saturated,
}

impl SimulationClock {
    pub fn new() -> Self {
        Self {
            current_hour: Mutex::new(-1),
        }
    }

    pub fn current_hour(&self) -> i32 {
        *self.lock()
    }

    pub fn advance(&self) -> ClockTick {
        let mut hour = self.lock();
        if *hour >= TERMINAL_HOUR {
            ClockTick::Saturated
        } else {
            *hour += 1;
            ClockTick::Advanced(*hour)
        }
    }

    fn lock(&self) -> MutexGuard<'_, i32> {
        match self.current_hour.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                tracing::warn!("simulation clock mutex poisoned; recovering");
                poisoned.into_inner()
            }
        }
    }
}

impl Default for SimulationClock {
    fn default() -> Self {
        Self::new()
    }
}

/// Wall-clock label shown alongside the hour. Display runs one hour ahead
/// of the data hour so the first tick reads 01:00 rather than 00:00.
pub fn display_time(sim_date: NaiveDate, current_hour: i32) -> String {
    let display_hour = current_hour + 1;
    if display_hour <= 0 {
        format!("{} 00:00", sim_date.format("%B %-d, %Y"))
    } else if display_hour >= 24 {
        let next_day = sim_date.succ_opt().unwrap_or(sim_date);
        format!("{} 00:00", next_day.format("%B %-d, %Y"))
    } else {
        format!("{} {:02}:00", sim_date.format("%B %-d, %Y"), display_hour)
    }
}

const PROFILE_COLUMNS: &str = "subject_id::bigint AS subject_id, \
     stay_id::bigint AS stay_id, \
     hadm_id::bigint AS hadm_id, \
     anchor_age::int AS anchor_age, \
     gender, race, first_careunit, intime, outtime, \
     los::float8 AS los";

#[derive(Debug, Clone, FromRow)]
pub struct PatientStayRow {
    pub subject_id: i64,
    pub stay_id: i64,
    pub hadm_id: i64,
    pub anchor_age: Option<i32>,
    pub gender: Option<String>,
    pub race: Option<String>,
    pub first_careunit: Option<String>,
    pub intime: Option<NaiveDateTime>,
    pub outtime: Option<NaiveDateTime>,
    pub los: Option<f64>,
}

#[derive(Debug, Clone, Serialize, utoipa::ToSchema)]
pub struct PatientStay {
    pub subject_id: i64,
    pub stay_id: i64,
    pub hadm_id: i64,
    pub anchor_age: Option<i32>,
    pub gender: Option<String>,
    pub race: Option<String>,
    pub first_careunit: Option<String>,
    pub intime: Option<NaiveDateTime>,
    pub outtime: Option<NaiveDateTime>,
    pub los: Option<f64>,
}

impl From<PatientStayRow> for PatientStay {
    fn from(row: PatientStayRow) -> Self {
        Self {
            subject_id: row.subject_id,
            stay_id: row.stay_id,
            hadm_id: row.hadm_id,
            anchor_age: row.anchor_age,
            gender: row.gender,
            race: row.race,
            first_careunit: row.first_careunit,
            intime: row.intime,
            outtime: row.outtime,
            los: row.los,
        }
    }
}

/// Visibility queries over the resolved profile table: which stays exist at
/// a given simulation hour. The cohort restriction applies before the
/// admission-hour comparison, and every query pins the simulated
/// month/day while ignoring the (shifted) MIMIC year.
pub struct CohortGate<'a> {
    pub pool: &'a PgPool,
    pub table: &'a str,
    pub sim_date: NaiveDate,
    pub cohort: Option<&'a CohortFilter>,
}

impl CohortGate<'_> {
    pub async fn admitted_count(&self, hour: i32) -> Result<i64, sqlx::Error> {
        if hour < 0 {
            return Ok(0);
        }
        let mut query = admitted_base("COUNT(*)", self.table, self.sim_date, self.cohort, hour);
        query.build_query_scalar::<i64>().fetch_one(self.pool).await
    }

    pub async fn admitted_page(
        &self,
        hour: i32,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<PatientStay>, sqlx::Error> {
        if hour < 0 {
            return Ok(Vec::new());
        }
        let mut query =
            admitted_base(PROFILE_COLUMNS, self.table, self.sim_date, self.cohort, hour);
        query.push(" ORDER BY subject_id LIMIT ");
        query.push_bind(limit);
        query.push(" OFFSET ");
        query.push_bind(offset);
        let rows: Vec<PatientStayRow> = query.build_query_as().fetch_all(self.pool).await?;
        Ok(rows.into_iter().map(PatientStay::from).collect())
    }

    pub async fn admitted_stay_ids(&self, hour: i32) -> Result<Vec<i64>, sqlx::Error> {
        if hour < 0 {
            return Ok(Vec::new());
        }
        let mut query = admitted_base(
            "stay_id::bigint",
            self.table,
            self.sim_date,
            self.cohort,
            hour,
        );
        query.build_query_scalar::<i64>().fetch_all(self.pool).await
    }

    pub async fn new_arrivals(&self, hour: i32) -> Result<Vec<PatientStay>, sqlx::Error> {
        let mut query = profile_day_query(PROFILE_COLUMNS, self.table, self.sim_date, self.cohort);
        query.push(" AND EXTRACT(HOUR FROM intime)::int = ");
        query.push_bind(hour);
        query.push(" ORDER BY subject_id");
        let rows: Vec<PatientStayRow> = query.build_query_as().fetch_all(self.pool).await?;
        Ok(rows.into_iter().map(PatientStay::from).collect())
    }
}

/// Point lookup by the full identifier triple, independent of the clock.
pub async fn find_patient(
    pool: &PgPool,
    table: &str,
    ids: PatientIds,
) -> Result<Option<PatientStay>, sqlx::Error> {
    let mut query = patient_lookup_query(table, ids);
    let row: Option<PatientStayRow> = query.build_query_as().fetch_optional(pool).await?;
    Ok(row.map(PatientStay::from))
}

fn patient_lookup_query(table: &str, ids: PatientIds) -> QueryBuilder<'static, Postgres> {
    let mut qb =
        QueryBuilder::<Postgres>::new(format!("SELECT {PROFILE_COLUMNS} FROM {table} WHERE "));
    qb.push("subject_id = ");
    qb.push_bind(ids.subject_id);
    qb.push(" AND stay_id = ");
    qb.push_bind(ids.stay_id);
    qb.push(" AND hadm_id = ");
    qb.push_bind(ids.hadm_id);
    qb.push(" LIMIT 1");
    qb
}

fn admitted_base(
    select: &str,
    table: &str,
    sim_date: NaiveDate,
    cohort: Option<&CohortFilter>,
    hour: i32,
) -> QueryBuilder<'static, Postgres> {
    let mut qb = profile_day_query(select, table, sim_date, cohort);
    qb.push(" AND EXTRACT(HOUR FROM intime)::int <= ");
    qb.push_bind(hour);
    qb
}

fn profile_day_query(
    select: &str,
    table: &str,
    sim_date: NaiveDate,
    cohort: Option<&CohortFilter>,
) -> QueryBuilder<'static, Postgres> {
    let mut qb = QueryBuilder::<Postgres>::new(format!("SELECT {select} FROM {table} WHERE "));
    push_cohort_filter(&mut qb, cohort);
    qb.push("EXTRACT(MONTH FROM intime)::int = ");
    qb.push_bind(sim_date.month() as i32);
    qb.push(" AND EXTRACT(DAY FROM intime)::int = ");
    qb.push_bind(sim_date.day() as i32);
    qb
}

fn push_cohort_filter(qb: &mut QueryBuilder<'static, Postgres>, cohort: Option<&CohortFilter>) {
    match cohort {
        None => {}
        Some(CohortFilter::SubjectIds { values }) => {
            qb.push("subject_id = ANY(");
            qb.push_bind(values.clone());
            qb.push(") AND ");
        }
        Some(CohortFilter::Tuples { values }) => {
            // An explicitly configured empty cohort matches nothing.
            if values.is_empty() {
                qb.push("FALSE AND ");
            } else {
                qb.push("(subject_id, stay_id, hadm_id) IN");
                qb.push_tuples(values.iter(), |mut b, (subject_id, stay_id, hadm_id)| {
                    b.push_bind(*subject_id)
                        .push_bind(*stay_id)
                        .push_bind(*hadm_id);
                });
                qb.push(" AND ");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn clock_starts_unstarted_and_counts_to_terminal() {
        let clock = SimulationClock::new();
        assert_eq!(clock.current_hour(), -1);

        for expected in 0..=TERMINAL_HOUR {
            assert_eq!(clock.advance(), ClockTick::Advanced(expected));
        }
        assert_eq!(clock.advance(), ClockTick::Saturated);
        assert_eq!(clock.advance(), ClockTick::Saturated);
        assert_eq!(clock.current_hour(), TERMINAL_HOUR);
    }

    #[test]
    fn concurrent_advances_never_exceed_terminal_hour() {
        let clock = Arc::new(SimulationClock::new());
        let mut handles = Vec::new();
        for _ in 0..30 {
            let clock = Arc::clone(&clock);
            handles.push(std::thread::spawn(move || match clock.advance() {
                ClockTick::Advanced(hour) => {
                    assert!((0..=TERMINAL_HOUR).contains(&hour));
                    1
                }
                ClockTick::Saturated => 0,
            }));
        }
        let advanced: i32 = handles
            .into_iter()
            .map(|handle| handle.join().expect("thread panicked"))
            .sum();

        assert_eq!(advanced, 24);
        assert_eq!(clock.current_hour(), TERMINAL_HOUR);
    }

    #[test]
    fn display_time_runs_one_hour_ahead() {
        let date = NaiveDate::from_ymd_opt(2025, 3, 13).expect("valid date");
        assert_eq!(display_time(date, -1), "March 13, 2025 00:00");
        assert_eq!(display_time(date, 0), "March 13, 2025 01:00");
        assert_eq!(display_time(date, 8), "March 13, 2025 09:00");
        assert_eq!(display_time(date, 22), "March 13, 2025 23:00");
        assert_eq!(display_time(date, 23), "March 14, 2025 00:00");
    }

    #[test]
    fn display_time_rolls_over_month_boundaries() {
        let date = NaiveDate::from_ymd_opt(2024, 12, 31).expect("valid date");
        assert_eq!(display_time(date, 23), "January 1, 2025 00:00");
    }

    #[test]
    fn admitted_sql_pins_day_and_hour() {
        let date = NaiveDate::from_ymd_opt(2025, 3, 13).expect("valid date");
        let query = admitted_base("COUNT(*)", "fisi9t_unique_patient_profile", date, None, 7);
        assert_eq!(
            query.sql(),
            "SELECT COUNT(*) FROM fisi9t_unique_patient_profile \
             WHERE EXTRACT(MONTH FROM intime)::int = $1 \
             AND EXTRACT(DAY FROM intime)::int = $2 \
             AND EXTRACT(HOUR FROM intime)::int <= $3"
        );
    }

    #[test]
    fn subject_cohort_filters_before_hour_comparison() {
        let date = NaiveDate::from_ymd_opt(2025, 3, 13).expect("valid date");
        let cohort = CohortFilter::SubjectIds {
            values: vec![10002428],
        };
        let query = admitted_base(
            PROFILE_COLUMNS,
            "fisi9t_unique_patient_profile",
            date,
            Some(&cohort),
            7,
        );
        let sql = query.sql();
        assert!(sql.contains("WHERE subject_id = ANY($1) AND "));
        assert!(sql.contains("EXTRACT(HOUR FROM intime)::int <= $4"));
    }

    #[test]
    fn tuple_cohort_uses_composite_membership() {
        let date = NaiveDate::from_ymd_opt(2025, 3, 13).expect("valid date");
        let cohort = CohortFilter::Tuples {
            values: vec![(1, 2, 3), (4, 5, 6)],
        };
        let query = profile_day_query(
            "COUNT(*)",
            "fisi9t_unique_patient_profile",
            date,
            Some(&cohort),
        );
        let sql = query.sql();
        assert!(sql.contains("(subject_id, stay_id, hadm_id) IN"));
        assert!(sql.contains("($1, $2, $3)"));
        assert!(sql.contains("($4, $5, $6)"));
    }

    #[test]
    fn empty_tuple_cohort_matches_nothing() {
        let date = NaiveDate::from_ymd_opt(2025, 3, 13).expect("valid date");
        let cohort = CohortFilter::Tuples { values: Vec::new() };
        let query = profile_day_query(
            "COUNT(*)",
            "fisi9t_unique_patient_profile",
            date,
            Some(&cohort),
        );
        assert!(query.sql().contains("WHERE FALSE AND "));
    }

    #[test]
    fn new_arrivals_sql_uses_exact_hour_equality() {
        let date = NaiveDate::from_ymd_opt(2025, 3, 13).expect("valid date");
        let mut query = profile_day_query("COUNT(*)", "fisi9t_unique_patient_profile", date, None);
        query.push(" AND EXTRACT(HOUR FROM intime)::int = ");
        query.push_bind(7_i32);
        assert!(query.sql().ends_with("EXTRACT(HOUR FROM intime)::int = $3"));
    }

    #[test]
    fn patient_lookup_sql_binds_the_full_triple() {
        let ids = PatientIds {
            subject_id: 10002428,
            stay_id: 35479615,
            hadm_id: 23473524,
        };
        let query = patient_lookup_query("fisi9t_unique_patient_profile", ids);
        assert!(query.sql().ends_with(
            "WHERE subject_id = $1 AND stay_id = $2 AND hadm_id = $3 LIMIT 1"
        ));
    }
}
