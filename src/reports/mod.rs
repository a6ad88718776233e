//! Usage report types
//!
//! Reports are addressed by a composite key `"<subject-uuid>_<ReportId>"`,
//! validated before any lookup. Points are rendering-only values derived
//! fresh from the usage index per request; nothing here is persisted.

pub mod generators;

pub use generators::{
    generate, top_cities, top_countries, total_downloads, total_visits, total_visits_per_month,
};

use serde::Serialize;
use std::fmt;
use thiserror::Error;
use uuid::Uuid;

use crate::hierarchy::SubjectType;

/// The report kinds a subject can be asked for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportId {
    TotalVisits,
    TotalVisitsPerMonth,
    TotalDownloads,
    TopCountries,
    TopCities,
}

impl fmt::Display for ReportId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ReportId::TotalVisits => "TotalVisits",
            ReportId::TotalVisitsPerMonth => "TotalVisitsPerMonth",
            ReportId::TotalDownloads => "TotalDownloads",
            ReportId::TopCountries => "TopCountries",
            ReportId::TopCities => "TopCities",
        };
        f.write_str(s)
    }
}

impl std::str::FromStr for ReportId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "TotalVisits" => Ok(ReportId::TotalVisits),
            "TotalVisitsPerMonth" => Ok(ReportId::TotalVisitsPerMonth),
            "TotalDownloads" => Ok(ReportId::TotalDownloads),
            "TopCountries" => Ok(ReportId::TopCountries),
            "TopCities" => Ok(ReportId::TopCities),
            other => Err(format!("unknown report id '{other}'")),
        }
    }
}

/// Parse a composite report key (`"<uuid>_<ReportId>"`)
pub fn parse_composite_key(raw: &str) -> Result<(Uuid, ReportId), ReportError> {
    let invalid = || ReportError::InvalidCompositeKey(raw.to_string());

    let (subject, report) = raw.split_once('_').ok_or_else(invalid)?;
    let subject_id = Uuid::parse_str(subject).map_err(|_| invalid())?;
    let report_id = report.parse::<ReportId>().map_err(|_| invalid())?;
    Ok((subject_id, report_id))
}

/// One rendered report value
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ReportPoint {
    /// A visited subject (item page views, per-bitstream downloads, ...)
    Subject {
        subject_type: SubjectType,
        id: Uuid,
        label: String,
        views: i64,
    },

    /// A calendar-month bucket, labeled "<Month name> <Year>"
    Date { id: String, views: i64 },

    /// A country bucket keyed by ISO code
    Country { id: String, label: String, views: i64 },

    /// A city bucket keyed by city name
    City { id: String, views: i64 },
}

impl ReportPoint {
    pub fn views(&self) -> i64 {
        match self {
            ReportPoint::Subject { views, .. }
            | ReportPoint::Date { views, .. }
            | ReportPoint::Country { views, .. }
            | ReportPoint::City { views, .. } => *views,
        }
    }
}

#[derive(Debug, Error)]
pub enum ReportError {
    /// Malformed composite key; rejected before any lookup
    #[error("invalid composite report key '{0}'")]
    InvalidCompositeKey(String),

    /// Well-formed id but no such subject exists
    #[error("no such subject {0}")]
    SubjectNotFound(Uuid),

    /// Report kind not applicable to the subject's type
    #[error("report {report} is not applicable to {subject_type} subjects")]
    InvalidReportTarget {
        report: ReportId,
        subject_type: SubjectType,
    },

    #[error(transparent)]
    Index(#[from] anyhow::Error),
}
