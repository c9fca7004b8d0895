use anyhow::{Context, Result};
use chrono::NaiveDate;
use std::path::PathBuf;

#[derive(Debug, Clone)]
pub struct WardConfig {
    pub database_url: String,
    pub sim_date: NaiveDate,
    pub cohort_path: Option<PathBuf>,
}

impl WardConfig {
    pub fn from_env() -> Result<Self> {
        let database_url = std::env::var("WARD_DATABASE_URL")
            .ok()
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
            .context("WARD_DATABASE_URL must be set to a Postgres connection string")?;
        let database_url = normalize_database_url(database_url);
        if database_url.trim().is_empty() {
            anyhow::bail!("WARD_DATABASE_URL resolved to an empty value");
        }

        let sim_month = env_u32("WARD_SIM_MONTH", 3);
        let sim_day = env_u32("WARD_SIM_DAY", 13);
        let display_year = env_i32("WARD_SIM_DISPLAY_YEAR", 2025);
        let sim_date = sim_date_from_parts(display_year, sim_month, sim_day)?;

        let cohort_path = env_optional_path("WARD_COHORT_PATH");

        Ok(Self {
            database_url,
            sim_date,
            cohort_path,
        })
    }
}

fn sim_date_from_parts(year: i32, month: u32, day: u32) -> Result<NaiveDate> {
    NaiveDate::from_ymd_opt(year, month, day).with_context(|| {
        format!(
            "WARD_SIM_MONTH/WARD_SIM_DAY/WARD_SIM_DISPLAY_YEAR do not form a valid date ({year}-{month}-{day})"
        )
    })
}

fn env_optional_string(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn env_u32(key: &str, default: u32) -> u32 {
    std::env::var(key)
        .ok()
        .and_then(|value| value.trim().parse::<u32>().ok())
        .unwrap_or(default)
}

fn env_i32(key: &str, default: i32) -> i32 {
    std::env::var(key)
        .ok()
        .and_then(|value| value.trim().parse::<i32>().ok())
        .unwrap_or(default)
}

fn env_optional_path(key: &str) -> Option<PathBuf> {
    env_optional_string(key).map(PathBuf::from)
}

fn normalize_database_url(url: String) -> String {
    // SQLAlchemy-style URLs from older deployments carry a driver suffix.
    if let Some(stripped) = url.strip_prefix("postgresql+psycopg://") {
        return format!("postgresql://{stripped}");
    }
    if let Some(stripped) = url.strip_prefix("postgresql+psycopg2://") {
        return format!("postgresql://{stripped}");
    }
    if let Some(stripped) = url.strip_prefix("postgresql+asyncpg://") {
        return format!("postgresql://{stripped}");
    }
    url
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_sqlalchemy_driver_suffixes() {
        assert_eq!(
            normalize_database_url("postgresql+psycopg://u@localhost/mimic".to_string()),
            "postgresql://u@localhost/mimic"
        );
        assert_eq!(
            normalize_database_url("postgresql+psycopg2://u@localhost/mimic".to_string()),
            "postgresql://u@localhost/mimic"
        );
        assert_eq!(
            normalize_database_url("postgresql+asyncpg://u@localhost/mimic".to_string()),
            "postgresql://u@localhost/mimic"
        );
        assert_eq!(
            normalize_database_url("postgresql://u@localhost/mimic".to_string()),
            "postgresql://u@localhost/mimic"
        );
    }

    #[test]
    fn accepts_default_simulated_date() {
        let date = sim_date_from_parts(2025, 3, 13).expect("default date is valid");
        assert_eq!(date, NaiveDate::from_ymd_opt(2025, 3, 13).expect("valid"));
    }

    #[test]
    fn rejects_impossible_simulated_date() {
        assert!(sim_date_from_parts(2025, 2, 30).is_err());
        assert!(sim_date_from_parts(2025, 13, 1).is_err());
    }
}
