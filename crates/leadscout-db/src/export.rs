//! CSV and JSON export of canonical leads.

use crate::error::{DatabaseError, Result};
use crate::leads::LeadFilter;
use chrono::Utc;
use leadscout_core::CanonicalLead;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Output file format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    /// Comma-separated values, one row per lead
    Csv,
    /// Pretty-printed JSON array of leads
    Json,
}

impl ExportFormat {
    /// File extension without the dot.
    #[must_use]
    pub fn extension(self) -> &'static str {
        match self {
            Self::Csv => "csv",
            Self::Json => "json",
        }
    }
}

impl fmt::Display for ExportFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

impl FromStr for ExportFormat {
    type Err = DatabaseError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "csv" => Ok(Self::Csv),
            "json" => Ok(Self::Json),
            other => Err(DatabaseError::Export(format!("unsupported format '{other}'"))),
        }
    }
}

/// One CSV row. Source-specific fields come from `extra_fields`.
#[derive(Debug, Serialize)]
struct CsvRow<'a> {
    place_id: &'a str,
    name: &'a str,
    address: &'a str,
    city: &'a str,
    country: &'a str,
    phone: &'a str,
    email: &'a str,
    website: &'a str,
    category: &'a str,
    rating: &'a str,
    reviews: &'a str,
    latitude: &'a str,
    longitude: &'a str,
    source_url: &'a str,
    sources: String,
    confidence: f64,
    first_seen: String,
    last_seen: String,
    identity_key: &'a str,
}

impl<'a> CsvRow<'a> {
    fn new(lead: &'a CanonicalLead) -> Self {
        let extra = |key: &str| lead.extra_fields.get(key).map_or("", String::as_str);
        let category = match extra("category") {
            "" => lead.niche_category.as_str(),
            category => category,
        };

        Self {
            place_id: extra("place_id"),
            name: &lead.name,
            address: &lead.address,
            city: &lead.city,
            country: &lead.country,
            phone: lead.phone.as_deref().unwrap_or_default(),
            email: lead.email.as_deref().unwrap_or_default(),
            website: lead.website.as_deref().unwrap_or_default(),
            category,
            rating: extra("rating"),
            reviews: extra("review_count"),
            latitude: extra("latitude"),
            longitude: extra("longitude"),
            source_url: extra("source_url"),
            sources: lead
                .merge_sources
                .iter()
                .map(leadscout_core::SourceId::as_str)
                .collect::<Vec<_>>()
                .join(";"),
            confidence: lead.confidence_score,
            first_seen: lead.first_seen.to_rfc3339(),
            last_seen: lead.last_seen.to_rfc3339(),
            identity_key: &lead.identity_key,
        }
    }
}

/// Writes lead exports into one output directory.
#[derive(Debug, Clone)]
pub struct LeadExporter {
    output_dir: PathBuf,
}

impl LeadExporter {
    /// Export into `output_dir`; the directory is created on first export.
    #[must_use]
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
        }
    }

    /// Output directory.
    #[must_use]
    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// Write `leads` (optionally filtered) to a new timestamped file and return its path.
    pub fn export(
        &self,
        leads: &[CanonicalLead],
        format: ExportFormat,
        filter: Option<&LeadFilter>,
    ) -> Result<PathBuf> {
        let mut selected: Vec<&CanonicalLead> = leads
            .iter()
            .filter(|lead| filter.map_or(true, |f| f.matches(lead)))
            .collect();
        if let Some(limit) = filter.and_then(|f| f.limit) {
            selected.truncate(limit);
        }

        std::fs::create_dir_all(&self.output_dir)?;
        let path = self.next_path(format);

        match format {
            ExportFormat::Csv => {
                let mut writer = csv::Writer::from_path(&path)?;
                for lead in &selected {
                    writer.serialize(CsvRow::new(lead))?;
                }
                writer.flush()?;
            }
            ExportFormat::Json => {
                let json = serde_json::to_string_pretty(&selected)?;
                std::fs::write(&path, json)?;
            }
        }

        tracing::info!(
            path = %path.display(),
            format = %format,
            leads = selected.len(),
            "exported leads"
        );
        Ok(path)
    }

    fn next_path(&self, format: ExportFormat) -> PathBuf {
        let stem = format!("leads_{}", Utc::now().format("%Y%m%d_%H%M%S"));
        let ext = format.extension();

        let mut path = self.output_dir.join(format!("{stem}.{ext}"));
        let mut n = 1;
        while path.exists() {
            path = self.output_dir.join(format!("{stem}_{n}.{ext}"));
            n += 1;
        }
        path
    }
}
