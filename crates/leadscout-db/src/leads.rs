//! Canonical lead storage.
//!
//! [`LeadStore`] is the storage boundary the scanner writes through. `put` is
//! idempotent per identity key: storing a key twice reports a conflict and
//! leaves the first row untouched, so at-least-once delivery is safe.

use crate::error::{DatabaseError, Result};
use crate::Database;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use leadscout_core::{CanonicalLead, SourceId};
use serde::{Deserialize, Serialize};
use sqlx::{QueryBuilder, Row, Sqlite};
use std::collections::{BTreeMap, BTreeSet};

/// Result of storing a lead.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PutOutcome {
    /// A new row was written
    Inserted,
    /// The identity key already existed; nothing changed
    Conflict,
}

/// Filters for querying and exporting stored leads.
///
/// Text filters compare case-insensitively. Unset fields match everything.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LeadFilter {
    /// Exact city
    pub city: Option<String>,
    /// Exact niche category
    pub niche: Option<String>,
    /// Leads that this source contributed to
    pub source: Option<SourceId>,
    /// Minimum confidence score
    pub min_confidence: Option<f64>,
    /// Maximum number of leads returned
    pub limit: Option<usize>,
}

impl LeadFilter {
    /// Whether a lead passes every set filter (ignores `limit`).
    #[must_use]
    pub fn matches(&self, lead: &CanonicalLead) -> bool {
        let eq = |filter: &Option<String>, value: &str| {
            filter
                .as_deref()
                .map_or(true, |f| f.eq_ignore_ascii_case(value))
        };

        eq(&self.city, &lead.city)
            && eq(&self.niche, &lead.niche_category)
            && self
                .source
                .as_ref()
                .map_or(true, |s| lead.merge_sources.contains(s))
            && self
                .min_confidence
                .map_or(true, |min| lead.confidence_score >= min)
    }
}

/// Lead counts grouped for reporting.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeadStats {
    /// Number of stored leads
    pub total: u64,
    /// Leads per city
    pub by_city: BTreeMap<String, u64>,
    /// Leads per niche category
    pub by_niche: BTreeMap<String, u64>,
    /// Leads each source contributed to; a merged lead counts once per source
    pub by_source: BTreeMap<String, u64>,
}

impl LeadStats {
    /// Compute stats from leads in memory.
    #[must_use]
    pub fn from_leads<'a>(leads: impl IntoIterator<Item = &'a CanonicalLead>) -> Self {
        let mut stats = Self::default();
        for lead in leads {
            stats.total += 1;
            *stats.by_city.entry(lead.city.clone()).or_default() += 1;
            *stats.by_niche.entry(lead.niche_category.clone()).or_default() += 1;
            for source in &lead.merge_sources {
                *stats.by_source.entry(source.to_string()).or_default() += 1;
            }
        }
        stats
    }
}

/// Storage collaborator for canonical leads.
#[async_trait]
pub trait LeadStore: Send + Sync {
    /// Store a new lead. An existing identity key is a conflict, not an error.
    async fn put(&self, lead: &CanonicalLead) -> Result<PutOutcome>;

    /// Overwrite the stored fields of an existing lead. Returns whether a row changed.
    async fn update(&self, lead: &CanonicalLead) -> Result<bool>;

    /// Delete a lead by identity key. Returns whether a row was removed.
    async fn remove(&self, identity_key: &str) -> Result<bool>;

    /// Fetch one lead by identity key.
    async fn get(&self, identity_key: &str) -> Result<Option<CanonicalLead>>;

    /// Leads matching the filter, ordered by first sighting.
    async fn query(&self, filter: &LeadFilter) -> Result<Vec<CanonicalLead>>;

    /// Counts by city, niche and source.
    async fn stats(&self) -> Result<LeadStats>;
}

const LEAD_COLUMNS: &str = "identity_key, source, name, address, city, country, phone, email, \
     website, niche_category, extra_fields, merge_sources, first_seen, last_seen, confidence_score";

#[async_trait]
impl LeadStore for Database {
    async fn put(&self, lead: &CanonicalLead) -> Result<PutOutcome> {
        let result = sqlx::query(
            "INSERT INTO leads (identity_key, source, name, address, city, country, phone, email,
                                website, niche_category, extra_fields, merge_sources, first_seen,
                                last_seen, confidence_score)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(identity_key) DO NOTHING",
        )
        .bind(&lead.identity_key)
        .bind(lead.source.as_str())
        .bind(&lead.name)
        .bind(&lead.address)
        .bind(&lead.city)
        .bind(&lead.country)
        .bind(&lead.phone)
        .bind(&lead.email)
        .bind(&lead.website)
        .bind(&lead.niche_category)
        .bind(serde_json::to_string(&lead.extra_fields)?)
        .bind(serde_json::to_string(&lead.merge_sources)?)
        .bind(lead.first_seen.to_rfc3339())
        .bind(lead.last_seen.to_rfc3339())
        .bind(lead.confidence_score)
        .execute(self.pool())
        .await?;

        if result.rows_affected() == 0 {
            tracing::debug!(identity_key = %lead.identity_key, "lead already stored");
            Ok(PutOutcome::Conflict)
        } else {
            Ok(PutOutcome::Inserted)
        }
    }

    async fn update(&self, lead: &CanonicalLead) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE leads SET name = ?, address = ?, city = ?, country = ?, phone = ?, email = ?,
                              website = ?, niche_category = ?, extra_fields = ?, merge_sources = ?,
                              first_seen = ?, last_seen = ?, confidence_score = ?
             WHERE identity_key = ?",
        )
        .bind(&lead.name)
        .bind(&lead.address)
        .bind(&lead.city)
        .bind(&lead.country)
        .bind(&lead.phone)
        .bind(&lead.email)
        .bind(&lead.website)
        .bind(&lead.niche_category)
        .bind(serde_json::to_string(&lead.extra_fields)?)
        .bind(serde_json::to_string(&lead.merge_sources)?)
        .bind(lead.first_seen.to_rfc3339())
        .bind(lead.last_seen.to_rfc3339())
        .bind(lead.confidence_score)
        .bind(&lead.identity_key)
        .execute(self.pool())
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn remove(&self, identity_key: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM leads WHERE identity_key = ?")
            .bind(identity_key)
            .execute(self.pool())
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn get(&self, identity_key: &str) -> Result<Option<CanonicalLead>> {
        let row = sqlx::query(&format!(
            "SELECT {LEAD_COLUMNS} FROM leads WHERE identity_key = ?"
        ))
        .bind(identity_key)
        .fetch_optional(self.pool())
        .await?;

        row.as_ref().map(lead_from_row).transpose()
    }

    async fn query(&self, filter: &LeadFilter) -> Result<Vec<CanonicalLead>> {
        let mut builder: QueryBuilder<'_, Sqlite> =
            QueryBuilder::new(format!("SELECT {LEAD_COLUMNS} FROM leads WHERE 1 = 1"));

        if let Some(city) = &filter.city {
            builder.push(" AND LOWER(city) = LOWER(").push_bind(city.clone()).push(")");
        }
        if let Some(niche) = &filter.niche {
            builder
                .push(" AND LOWER(niche_category) = LOWER(")
                .push_bind(niche.clone())
                .push(")");
        }
        if let Some(source) = &filter.source {
            builder
                .push(" AND EXISTS (SELECT 1 FROM json_each(leads.merge_sources) WHERE value = ")
                .push_bind(source.to_string())
                .push(")");
        }
        if let Some(min) = filter.min_confidence {
            builder.push(" AND confidence_score >= ").push_bind(min);
        }
        builder.push(" ORDER BY first_seen, identity_key");
        if let Some(limit) = filter.limit {
            builder
                .push(" LIMIT ")
                .push_bind(i64::try_from(limit).unwrap_or(i64::MAX));
        }

        let rows = builder.build().fetch_all(self.pool()).await?;
        rows.iter().map(lead_from_row).collect()
    }

    async fn stats(&self) -> Result<LeadStats> {
        let pool = self.pool();

        let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM leads")
            .fetch_one(pool)
            .await?;

        let grouped = |sql: &'static str| async move {
            let rows: Vec<(String, i64)> = sqlx::query_as(sql).fetch_all(pool).await?;
            Ok::<_, DatabaseError>(
                rows.into_iter()
                    .map(|(key, count)| (key, count.unsigned_abs()))
                    .collect::<BTreeMap<_, _>>(),
            )
        };

        Ok(LeadStats {
            total: total.unsigned_abs(),
            by_city: grouped("SELECT city, COUNT(*) FROM leads GROUP BY city").await?,
            by_niche: grouped("SELECT niche_category, COUNT(*) FROM leads GROUP BY niche_category")
                .await?,
            by_source: grouped(
                "SELECT j.value, COUNT(*) FROM leads, json_each(leads.merge_sources) AS j
                 GROUP BY j.value",
            )
            .await?,
        })
    }
}

fn parse_timestamp(value: &str, column: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| DatabaseError::Decode(format!("invalid {column} '{value}': {e}")))
}

fn lead_from_row(row: &sqlx::sqlite::SqliteRow) -> Result<CanonicalLead> {
    let source: String = row.try_get("source")?;
    let source = SourceId::new(&source)
        .map_err(|e| DatabaseError::Decode(format!("invalid source '{source}': {e}")))?;

    let extra_fields: String = row.try_get("extra_fields")?;
    let extra_fields: BTreeMap<String, String> = serde_json::from_str(&extra_fields)?;

    let merge_sources: String = row.try_get("merge_sources")?;
    let merge_sources: BTreeSet<SourceId> = serde_json::from_str(&merge_sources)?;

    let first_seen: String = row.try_get("first_seen")?;
    let last_seen: String = row.try_get("last_seen")?;

    Ok(CanonicalLead {
        identity_key: row.try_get("identity_key")?,
        source,
        name: row.try_get("name")?,
        address: row.try_get("address")?,
        city: row.try_get("city")?,
        country: row.try_get("country")?,
        phone: row.try_get("phone")?,
        email: row.try_get("email")?,
        website: row.try_get("website")?,
        niche_category: row.try_get("niche_category")?,
        extra_fields,
        merge_sources,
        first_seen: parse_timestamp(&first_seen, "first_seen")?,
        last_seen: parse_timestamp(&last_seen, "last_seen")?,
        confidence_score: row.try_get("confidence_score")?,
    })
}
