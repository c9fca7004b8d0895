use serde::Serialize;
use sqlx::PgPool;
use std::collections::BTreeMap;

/// Logical datasets served by the feature endpoints. Each maps to an ordered
/// candidate list of physical tables; the first that exists wins. Physical
/// naming has drifted across pipeline versions, so resolution is defensive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, utoipa::ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum FeatureSource {
    Profile,
    VitalsHourly,
    ProceduresHourly,
    SofaHourly,
    ChemistryHourly,
    CoagulationHourly,
}

pub const ALL_SOURCES: [FeatureSource; 6] = [
    FeatureSource::Profile,
    FeatureSource::VitalsHourly,
    FeatureSource::ProceduresHourly,
    FeatureSource::SofaHourly,
    FeatureSource::ChemistryHourly,
    FeatureSource::CoagulationHourly,
];

impl FeatureSource {
    pub fn key(self) -> &'static str {
        match self {
            Self::Profile => "profile",
            Self::VitalsHourly => "vitals_hourly",
            Self::ProceduresHourly => "procedures_hourly",
            Self::SofaHourly => "sofa_hourly",
            Self::ChemistryHourly => "chemistry_hourly",
            Self::CoagulationHourly => "coagulation_hourly",
        }
    }

    /// Short name used when prefixing columns in the assembled wide table.
    pub fn wide_prefix(self) -> &'static str {
        match self {
            Self::Profile => "profile",
            Self::VitalsHourly => "vitals",
            Self::ProceduresHourly => "procedures",
            Self::SofaHourly => "sofa",
            Self::ChemistryHourly => "chemistry",
            Self::CoagulationHourly => "coagulation",
        }
    }

    fn env_var(self) -> &'static str {
        match self {
            Self::Profile => "WARD_TABLES_PROFILE",
            Self::VitalsHourly => "WARD_TABLES_VITALS_HOURLY",
            Self::ProceduresHourly => "WARD_TABLES_PROCEDURES_HOURLY",
            Self::SofaHourly => "WARD_TABLES_SOFA_HOURLY",
            Self::ChemistryHourly => "WARD_TABLES_CHEMISTRY_HOURLY",
            Self::CoagulationHourly => "WARD_TABLES_COAGULATION_HOURLY",
        }
    }

    fn default_candidates(self) -> &'static [&'static str] {
        match self {
            Self::Profile => &[
                "fisi9t_unique_patient_profile",
                "mimiciv_derived.fisi9t_unique_patient_profile",
            ],
            Self::VitalsHourly => &[
                "fisi9t_vitalsign_hourly",
                "mimiciv_derived.fisi9t_vitalsign_hourly",
            ],
            Self::ProceduresHourly => &[
                "fisi9t_procedureevents_hourly",
                "mimiciv_derived.fisi9t_procedureevents_hourly",
            ],
            Self::SofaHourly => &[
                "sofa_hourly",
                "mimiciv_derived.sofa_hourly",
                "sofa",
                "mimiciv_derived.sofa",
            ],
            Self::ChemistryHourly => &[
                "fisi9t_chemistry_hourly",
                "mimiciv_derived.fisi9t_chemistry_hourly",
                "chemistry_hourly",
                "mimiciv_derived.chemistry_hourly",
            ],
            Self::CoagulationHourly => &[
                "fisi9t_coagulation_hourly",
                "mimiciv_derived.fisi9t_coagulation_hourly",
                "coagulation_hourly",
                "mimiciv_derived.coagulation_hourly",
            ],
        }
    }
}

/// Candidate table lists per source, defaults overridable through
/// `WARD_TABLES_<SOURCE>` env vars (comma-separated, tried in order).
#[derive(Debug, Clone)]
pub struct SourceCatalog {
    candidates: BTreeMap<FeatureSource, Vec<String>>,
}

impl SourceCatalog {
    pub fn from_env() -> Self {
        Self::with_overrides(|source| std::env::var(source.env_var()).ok())
    }

    fn with_overrides<F>(lookup: F) -> Self
    where
        F: Fn(FeatureSource) -> Option<String>,
    {
        let mut candidates = BTreeMap::new();
        for source in ALL_SOURCES {
            let configured = lookup(source).map(|raw| parse_candidate_list(&raw));
            let list = match configured {
                Some(list) if !list.is_empty() => list,
                _ => source
                    .default_candidates()
                    .iter()
                    .map(|name| name.to_string())
                    .collect(),
            };
            candidates.insert(source, list);
        }
        Self { candidates }
    }

    pub fn candidates(&self, source: FeatureSource) -> &[String] {
        self.candidates
            .get(&source)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    /// First candidate that exists in the store, probed in priority order.
    /// A name is only ever used after `to_regclass` accepts it, so resolved
    /// names are always valid (possibly schema-qualified) identifiers.
    pub async fn resolve(
        &self,
        pool: &PgPool,
        source: FeatureSource,
    ) -> Result<Option<String>, sqlx::Error> {
        for name in self.candidates(source) {
            if table_exists(pool, name).await? {
                return Ok(Some(name.clone()));
            }
        }
        Ok(None)
    }
}

async fn table_exists(pool: &PgPool, table: &str) -> Result<bool, sqlx::Error> {
    let (exists,): (bool,) = sqlx::query_as("SELECT to_regclass($1) IS NOT NULL")
        .bind(table)
        .fetch_one(pool)
        .await?;
    Ok(exists)
}

fn parse_candidate_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .map(ToOwned::to_owned)
        .collect()
}
