//! Paginated chain history
//!
//! History is served page by page from the verified prefix of a chain. A
//! cursor is the last version a caller has seen; passing it back resumes
//! after that version, so a listing can be restarted at any point.
//!
//! When a stored chain fails verification the page says so: it carries the
//! record's integrity markers and the last verified version, and
//! `truncated` is set because releases past that point are withheld.

use std::collections::VecDeque;
use std::fmt;
use std::str::FromStr;

use datum_core::{DatumError, Identifier, Release, Result};
use datum_journal::IntegrityFlag;
use futures::stream::{self, BoxStream, StreamExt};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::index::RegistryIndex;

/// Default page size
pub const DEFAULT_PAGE_SIZE: usize = 20;

/// Largest page size accepted
pub const MAX_PAGE_SIZE: usize = 500;

/// Resume position within a history listing
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct HistoryCursor(u64);

impl HistoryCursor {
    /// Cursor positioned after `version`
    pub fn after(version: u64) -> Self {
        Self(version)
    }

    /// Last version already returned
    pub fn version(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for HistoryCursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}", self.0)
    }
}

impl FromStr for HistoryCursor {
    type Err = DatumError;

    fn from_str(s: &str) -> Result<Self> {
        s.strip_prefix('v')
            .and_then(|n| n.parse().ok())
            .map(Self)
            .ok_or_else(|| DatumError::invalid_format(format!("invalid history cursor '{s}'")))
    }
}

impl Serialize for HistoryCursor {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for HistoryCursor {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// One page of history
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HistoryPage {
    /// Identifier listed
    pub identifier: Identifier,
    /// Releases in version order
    pub releases: Vec<Release>,
    /// Cursor for the following page
    pub next_cursor: Option<HistoryCursor>,
    /// Whether more verified releases follow
    pub has_more: bool,
    /// Highest version that verified
    pub verified_through: u64,
    /// Whether stored releases past `verified_through` are withheld
    pub truncated: bool,
    /// Divergence and corruption markers
    pub markers: Vec<IntegrityFlag>,
}

impl HistoryPage {
    /// Error describing the withheld tail, if any
    pub fn truncation_error(&self) -> Option<DatumError> {
        if !self.truncated {
            return None;
        }
        let version = self
            .markers
            .iter()
            .filter_map(|flag| match flag {
                IntegrityFlag::Corruption { version, .. } => Some(*version),
                IntegrityFlag::Divergence { .. } => None,
            })
            .min()
            .unwrap_or(self.verified_through + 1);
        Some(DatumError::chain_corrupted(
            &self.identifier,
            version,
            format!("history withheld after version {}", self.verified_through),
        ))
    }
}

/// Check a requested page size
pub fn page_size(limit: Option<usize>) -> Result<usize> {
    let limit = limit.unwrap_or(DEFAULT_PAGE_SIZE);
    if limit == 0 || limit > MAX_PAGE_SIZE {
        return Err(DatumError::invalid_format(format!(
            "limit must be between 1 and {MAX_PAGE_SIZE}, got {limit}"
        )));
    }
    Ok(limit)
}

impl RegistryIndex {
    /// One page of an identifier's verified history
    pub async fn history(
        &self,
        identifier: &Identifier,
        cursor: Option<HistoryCursor>,
        limit: Option<usize>,
    ) -> Result<HistoryPage> {
        let limit = page_size(limit)?;
        let record = self.record(identifier).await?;
        let (chain, markers) = self.verified_view(&record).await?;
        let truncated = chain.len() < record.chain.len();

        let after = cursor.map_or(0, |c| c.version());
        let releases = chain.releases_after(after, limit).to_vec();
        let has_more = releases
            .last()
            .is_some_and(|last| chain.tip_version().is_some_and(|tip| tip > last.version));
        let next_cursor = if has_more {
            releases.last().map(|r| HistoryCursor::after(r.version))
        } else {
            None
        };

        Ok(HistoryPage {
            identifier: identifier.clone(),
            releases,
            next_cursor,
            has_more,
            verified_through: chain.tip_version().unwrap_or(0),
            truncated,
            markers,
        })
    }

    /// Lazily walk an identifier's verified history, one page at a time
    ///
    /// The stream ends after the last release or at the first error. A chain
    /// that only partly verifies ends with a `ChainCorrupted` error after its
    /// verified prefix, so a consumer never mistakes the prefix for the whole.
    pub fn history_stream<'a>(
        &'a self,
        identifier: &'a Identifier,
        from: Option<HistoryCursor>,
        page: usize,
    ) -> BoxStream<'a, Result<Release>> {
        struct State {
            cursor: Option<HistoryCursor>,
            buffer: VecDeque<Release>,
            exhausted: bool,
            trailing: Option<DatumError>,
        }

        let initial = State {
            cursor: from,
            buffer: VecDeque::new(),
            exhausted: false,
            trailing: None,
        };

        stream::unfold(initial, move |mut state| async move {
            loop {
                if let Some(release) = state.buffer.pop_front() {
                    return Some((Ok(release), state));
                }
                if state.exhausted {
                    return state.trailing.take().map(|e| (Err(e), state));
                }
                match self.history(identifier, state.cursor, Some(page)).await {
                    Ok(p) => {
                        state.exhausted = !p.has_more;
                        state.cursor = p.next_cursor;
                        if state.exhausted {
                            state.trailing = p.truncation_error();
                        }
                        state.buffer.extend(p.releases);
                    }
                    Err(e) => {
                        state.exhausted = true;
                        return Some((Err(e), state));
                    }
                }
            }
        })
        .boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cursor_text_form() {
        let c = HistoryCursor::after(42);
        assert_eq!(c.to_string(), "v42");
        assert_eq!("v42".parse::<HistoryCursor>().unwrap(), c);
        assert!("42".parse::<HistoryCursor>().is_err());
        assert!("vx".parse::<HistoryCursor>().is_err());
    }

    #[test]
    fn test_page_size_bounds() {
        assert_eq!(page_size(None).unwrap(), DEFAULT_PAGE_SIZE);
        assert_eq!(page_size(Some(500)).unwrap(), 500);
        assert!(page_size(Some(0)).is_err());
        assert!(page_size(Some(501)).is_err());
    }
}
