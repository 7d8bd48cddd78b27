//! Pagination primitives and the list envelope shared by vulnerability listings.

use serde::{Deserialize, Serialize};

/// Pagination query parameters.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Pagination {
    pub page: Option<i64>,
    pub page_size: Option<i64>,
}

impl Pagination {
    /// Maximum items per page.
    const MAX_PAGE_SIZE: i64 = 1000;

    /// Default items per page.
    const DEFAULT_PAGE_SIZE: i64 = 100;

    pub fn limit(&self) -> i64 {
        self.page_size
            .unwrap_or(Self::DEFAULT_PAGE_SIZE)
            .clamp(1, Self::MAX_PAGE_SIZE)
    }

    pub fn offset(&self) -> i64 {
        (self.current_page() - 1).saturating_mul(self.limit())
    }

    pub fn current_page(&self) -> i64 {
        self.page.unwrap_or(1).max(1)
    }
}

/// One entry of a list envelope.
#[derive(Debug, Clone, Serialize)]
pub struct ListEntry<T: Serialize> {
    pub id: serde_json::Value,
    pub key: serde_json::Value,
    pub value: T,
}

/// `{vulnerabilities: [{id, key, value}], count}`, the list shape of the API.
#[derive(Debug, Clone, Serialize)]
pub struct VulnerabilityList<T: Serialize> {
    pub vulnerabilities: Vec<ListEntry<T>>,
    pub count: i64,
}

impl<T: Serialize> VulnerabilityList<T> {
    /// Envelope keyed by each item's id.
    pub fn keyed(items: Vec<(i64, T)>, count: i64) -> Self {
        Self {
            vulnerabilities: items
                .into_iter()
                .map(|(id, value)| ListEntry {
                    id: id.into(),
                    key: id.into(),
                    value,
                })
                .collect(),
            count,
        }
    }

    /// Envelope keyed by row position, used for grouped rows.
    pub fn indexed(items: Vec<T>, count: i64) -> Self {
        Self {
            vulnerabilities: items
                .into_iter()
                .enumerate()
                .map(|(idx, value)| ListEntry {
                    id: idx.into(),
                    key: idx.into(),
                    value,
                })
                .collect(),
            count,
        }
    }
}
