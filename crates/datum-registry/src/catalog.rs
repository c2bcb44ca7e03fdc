//! Catalog listing, suggestions and registry statistics

use std::collections::BTreeSet;

use datum_core::{DatumError, Identifier, RegistryId, Release, Result};
use datum_journal::{RecordStatus, RegistryRecord};
use serde::{Deserialize, Serialize};

use crate::history::MAX_PAGE_SIZE;
use crate::index::RegistryIndex;

/// Default catalog page size
pub const DEFAULT_CATALOG_LIMIT: usize = 20;

/// Default number of suggestions
pub const DEFAULT_SUGGESTIONS: usize = 5;

/// Most suggestions returned at once
pub const MAX_SUGGESTIONS: usize = 20;

/// Lowest similarity a suggestion may have
pub const SUGGEST_CUTOFF: f64 = 0.4;

/// Catalog search parameters
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct CatalogQuery {
    /// Case-insensitive text matched against identifier, title, description and tags
    #[serde(default)]
    pub q: Option<String>,
    /// Exact tag filter, case-insensitive
    #[serde(default)]
    pub tag: Option<String>,
    /// Page size, 1..=500
    #[serde(default)]
    pub limit: Option<usize>,
    /// Entries to skip
    #[serde(default)]
    pub offset: usize,
}

/// One identifier as listed in the catalog
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CatalogEntry {
    /// Identifier
    pub identifier: Identifier,
    /// Home registry
    pub home: RegistryId,
    /// Newest publication that has not been retracted
    pub latest: Option<Release>,
    /// Number of releases in the chain, tombstones included
    pub releases: usize,
    /// Lifecycle status
    pub status: RecordStatus,
    /// Whether integrity flags are raised
    pub flagged: bool,
}

/// A page of catalog entries
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CatalogPage {
    /// Entries, newest first
    pub items: Vec<CatalogEntry>,
    /// Matching entries across all pages
    pub total: usize,
    /// Page size used
    pub limit: usize,
    /// Entries skipped
    pub offset: usize,
    /// Whether a following page exists
    pub has_next: bool,
    /// Whether a preceding page exists
    pub has_prev: bool,
}

/// A close match for a partial identifier
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Suggestion {
    /// Suggested identifier
    pub identifier: Identifier,
    /// Similarity in `0.0..=1.0`
    pub score: f64,
}

/// Registry-wide counts
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RegistryStats {
    /// Identifiers held
    pub identifiers: usize,
    /// Distinct namespaces
    pub namespaces: usize,
    /// Releases across all chains
    pub releases: usize,
    /// Tombstones across all chains
    pub retractions: usize,
    /// Identifiers with integrity flags
    pub flagged: usize,
    /// Identifiers homed here
    pub homed_here: usize,
    /// Retired identifiers
    pub retired: usize,
}

fn entry(record: &RegistryRecord) -> CatalogEntry {
    CatalogEntry {
        identifier: record.identifier().clone(),
        home: record.home,
        latest: record.chain.latest_publication().cloned(),
        releases: record.chain.len(),
        status: record.status,
        flagged: !record.flags.is_empty(),
    }
}

fn matches_text(entry: &CatalogEntry, needle: &str) -> bool {
    if entry.identifier.to_string().contains(needle) {
        return true;
    }
    let Some(latest) = &entry.latest else {
        return false;
    };
    let meta = &latest.metadata;
    [meta.title.as_deref(), meta.description.as_deref()]
        .into_iter()
        .flatten()
        .any(|field| field.to_lowercase().contains(needle))
        || meta.tags.iter().any(|t| t.to_lowercase().contains(needle))
}

fn has_tag(entry: &CatalogEntry, tag: &str) -> bool {
    entry
        .latest
        .as_ref()
        .is_some_and(|r| r.metadata.tags.iter().any(|t| t.eq_ignore_ascii_case(tag)))
}

impl RegistryIndex {
    async fn all_records(&self) -> Result<Vec<RegistryRecord>> {
        let mut records = Vec::new();
        for identifier in self.store().identifiers().await? {
            if let Some(record) = self.store().load(&identifier).await? {
                records.push(record);
            }
        }
        Ok(records)
    }

    /// List or search identifiers by their latest publication
    pub async fn catalog(&self, query: &CatalogQuery) -> Result<CatalogPage> {
        let limit = query.limit.unwrap_or(DEFAULT_CATALOG_LIMIT);
        if limit == 0 || limit > MAX_PAGE_SIZE {
            return Err(DatumError::invalid_format(format!(
                "limit must be between 1 and {MAX_PAGE_SIZE}, got {limit}"
            )));
        }
        let needle = query.q.as_deref().map(str::to_lowercase).filter(|q| !q.trim().is_empty());

        let mut entries: Vec<CatalogEntry> = self
            .all_records()
            .await?
            .iter()
            .map(entry)
            .filter(|e| needle.as_deref().map_or(true, |n| matches_text(e, n)))
            .filter(|e| query.tag.as_deref().map_or(true, |t| has_tag(e, t)))
            .collect();

        entries.sort_by(|a, b| {
            let at = a.latest.as_ref().map(|r| r.published_at);
            let bt = b.latest.as_ref().map(|r| r.published_at);
            bt.cmp(&at).then_with(|| a.identifier.cmp(&b.identifier))
        });

        let total = entries.len();
        let items: Vec<CatalogEntry> = entries.into_iter().skip(query.offset).take(limit).collect();
        Ok(CatalogPage {
            items,
            total,
            limit,
            offset: query.offset,
            has_next: query.offset + limit < total,
            has_prev: query.offset > 0,
        })
    }

    /// Identifiers that closely resemble `q`, best first
    pub async fn suggest(&self, q: &str, n: Option<usize>) -> Result<Vec<Suggestion>> {
        let n = n.unwrap_or(DEFAULT_SUGGESTIONS);
        if n == 0 || n > MAX_SUGGESTIONS {
            return Err(DatumError::invalid_format(format!(
                "n must be between 1 and {MAX_SUGGESTIONS}, got {n}"
            )));
        }
        let q = q.trim();
        if q.is_empty() {
            return Err(DatumError::invalid_format("query must not be empty"));
        }

        let mut scored: Vec<Suggestion> = self
            .store()
            .identifiers()
            .await?
            .into_iter()
            .map(|identifier| Suggestion {
                score: strsim::normalized_levenshtein(q, &identifier.to_string()),
                identifier,
            })
            .filter(|s| s.score >= SUGGEST_CUTOFF)
            .collect();
        scored.sort_by(|a, b| {
            b.score
                .total_cmp(&a.score)
                .then_with(|| a.identifier.cmp(&b.identifier))
        });
        scored.truncate(n);
        Ok(scored)
    }

    /// Every identifier under `namespace`
    pub async fn namespace(&self, namespace: &str) -> Result<Vec<CatalogEntry>> {
        let entries: Vec<CatalogEntry> = self
            .all_records()
            .await?
            .iter()
            .filter(|r| r.identifier().namespace() == namespace)
            .map(entry)
            .collect();
        if entries.is_empty() {
            return Err(DatumError::not_found(format!("namespace {namespace}")));
        }
        Ok(entries)
    }

    /// Registry-wide counts
    pub async fn stats(&self) -> Result<RegistryStats> {
        let records = self.all_records().await?;
        let namespaces: BTreeSet<&str> = records.iter().map(|r| r.identifier().namespace()).collect();
        let local = self.local_id();
        Ok(RegistryStats {
            identifiers: records.len(),
            namespaces: namespaces.len(),
            releases: records.iter().map(|r| r.chain.len()).sum(),
            retractions: records
                .iter()
                .map(|r| r.chain.releases().iter().filter(|x| x.is_tombstone()).count())
                .sum(),
            flagged: records.iter().filter(|r| !r.flags.is_empty()).count(),
            homed_here: records.iter().filter(|r| r.is_home(local)).count(),
            retired: records.iter().filter(|r| !r.is_active()).count(),
        })
    }
}
