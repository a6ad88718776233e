//! Report generators
//!
//! Each generator is a pure async function over an injected usage-index
//! client; any backend satisfying `count`/`group_by` works. Generators
//! never fail for "no data" — only for unsupported target types.

use anyhow::Context;
use chrono::{DateTime, Datelike, Months, NaiveDate, Utc};

use crate::hierarchy::{ContentArena, ContentNode, SubjectType};
use crate::index::{Dimension, UsageIndex, UsageQuery};
use crate::reports::{ReportError, ReportId, ReportPoint};

/// Optional inclusive-start/exclusive-end Unix timestamp range
pub type DateRange = Option<(i64, i64)>;

fn ranged(mut query: UsageQuery, range: DateRange) -> UsageQuery {
    if let Some((start, end)) = range {
        query = query.between(start, end);
    }
    query
}

/// Total visit count for one subject, as a single point.
///
/// A never-visited subject yields an explicit zero point, not an empty list.
pub async fn total_visits(
    index: &dyn UsageIndex,
    node: &ContentNode,
    range: DateRange,
) -> Result<Vec<ReportPoint>, ReportError> {
    let views = index
        .count(&ranged(UsageQuery::subject(node.subject_type, node.id), range))
        .await?;

    Ok(vec![ReportPoint::Subject {
        subject_type: node.subject_type,
        id: node.id,
        label: node.name.clone(),
        views,
    }])
}

/// Visits bucketed per calendar month: exactly 7 points, the current month
/// and the 6 before it, zero-filled.
pub async fn total_visits_per_month(
    index: &dyn UsageIndex,
    node: &ContentNode,
    now: i64,
) -> Result<Vec<ReportPoint>, ReportError> {
    let current_month = month_start(now).map_err(ReportError::Index)?;
    let mut points = Vec::with_capacity(7);

    for offset in (0..7u32).rev() {
        let start = current_month
            .checked_sub_months(Months::new(offset))
            .context("month bucket out of range")?;
        let end = start
            .checked_add_months(Months::new(1))
            .context("month bucket out of range")?;

        let query = UsageQuery::subject(node.subject_type, node.id)
            .between(day_timestamp(start), day_timestamp(end));
        let views = index.count(&query).await?;

        points.push(ReportPoint::Date {
            id: start.format("%B %Y").to_string(),
            views,
        });
    }

    Ok(points)
}

/// Download counts.
///
/// For an item: one point per owned bitstream that was downloaded at least
/// once, keyed by bitstream name, descending by count — an empty list when
/// the item owns no bitstreams or none were downloaded. For a bitstream:
/// a single point. Any other subject type is rejected.
pub async fn total_downloads(
    index: &dyn UsageIndex,
    arena: &ContentArena,
    node: &ContentNode,
    range: DateRange,
) -> Result<Vec<ReportPoint>, ReportError> {
    match node.subject_type {
        SubjectType::Bitstream => {
            let views = index
                .count(&ranged(
                    UsageQuery::downloads(SubjectType::Bitstream, node.id),
                    range,
                ))
                .await?;
            Ok(vec![ReportPoint::Subject {
                subject_type: SubjectType::Bitstream,
                id: node.id,
                label: node.name.clone(),
                views,
            }])
        }
        SubjectType::Item => {
            let mut counted = Vec::new();
            for bitstream in arena.bitstreams_of(node.id) {
                let views = index
                    .count(&ranged(
                        UsageQuery::downloads(SubjectType::Bitstream, bitstream.id),
                        range,
                    ))
                    .await?;
                if views > 0 {
                    counted.push((bitstream, views));
                }
            }
            counted.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.name.cmp(&b.0.name)));

            Ok(counted
                .into_iter()
                .map(|(bitstream, views)| ReportPoint::Subject {
                    subject_type: SubjectType::Bitstream,
                    id: bitstream.id,
                    label: bitstream.name.clone(),
                    views,
                })
                .collect())
        }
        other => Err(ReportError::InvalidReportTarget {
            report: ReportId::TotalDownloads,
            subject_type: other,
        }),
    }
}

/// Visits grouped by country, descending; empty when never visited.
pub async fn top_countries(
    index: &dyn UsageIndex,
    node: &ContentNode,
    range: DateRange,
    limit: Option<i64>,
) -> Result<Vec<ReportPoint>, ReportError> {
    let buckets = index
        .group_by(
            Dimension::Country,
            &ranged(UsageQuery::subject(node.subject_type, node.id), range),
            limit,
        )
        .await?;

    Ok(buckets
        .into_iter()
        .map(|b| ReportPoint::Country {
            label: b.label.unwrap_or_else(|| b.key.clone()),
            id: b.key,
            views: b.count,
        })
        .collect())
}

/// Visits grouped by city, descending; empty when never visited.
pub async fn top_cities(
    index: &dyn UsageIndex,
    node: &ContentNode,
    range: DateRange,
    limit: Option<i64>,
) -> Result<Vec<ReportPoint>, ReportError> {
    let buckets = index
        .group_by(
            Dimension::City,
            &ranged(UsageQuery::subject(node.subject_type, node.id), range),
            limit,
        )
        .await?;

    Ok(buckets
        .into_iter()
        .map(|b| ReportPoint::City {
            id: b.key,
            views: b.count,
        })
        .collect())
}

/// Dispatch a report request to its generator.
pub async fn generate(
    report: ReportId,
    index: &dyn UsageIndex,
    arena: &ContentArena,
    node: &ContentNode,
    now: i64,
    range: DateRange,
) -> Result<Vec<ReportPoint>, ReportError> {
    match report {
        ReportId::TotalVisits => total_visits(index, node, range).await,
        ReportId::TotalVisitsPerMonth => total_visits_per_month(index, node, now).await,
        ReportId::TotalDownloads => total_downloads(index, arena, node, range).await,
        ReportId::TopCountries => top_countries(index, node, range, None).await,
        ReportId::TopCities => top_cities(index, node, range, None).await,
    }
}

fn month_start(now: i64) -> anyhow::Result<NaiveDate> {
    let date = DateTime::<Utc>::from_timestamp(now, 0)
        .context("timestamp out of range")?
        .date_naive();
    date.with_day(1).context("invalid month start")
}

fn day_timestamp(date: NaiveDate) -> i64 {
    date.and_hms_opt(0, 0, 0)
        .map(|dt| dt.and_utc().timestamp())
        .unwrap_or_default()
}
