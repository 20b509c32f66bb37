//! Pagination for the admin query views.

use serde::{Deserialize, Serialize};

use crate::constants;

/// `limit`/`skip` window requested by a caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageRequest {
    #[serde(default = "default_limit")]
    pub limit: usize,
    #[serde(default)]
    pub skip: usize,
}

fn default_limit() -> usize {
    constants::DEFAULT_PAGE_LIMIT
}

impl Default for PageRequest {
    fn default() -> Self {
        Self {
            limit: default_limit(),
            skip: 0,
        }
    }
}

impl PageRequest {
    #[must_use]
    pub fn new(limit: usize, skip: usize) -> Self {
        Self { limit, skip }
    }

    /// Clamp `limit` into `1..=max_limit`.
    #[must_use]
    pub fn clamped(self, max_limit: usize) -> Self {
        Self {
            limit: self.limit.clamp(1, max_limit.max(1)),
            skip: self.skip,
        }
    }
}

/// One page of results plus the `{total, limit, skip}` envelope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total: usize,
    pub limit: usize,
    pub skip: usize,
}

impl<T> Page<T> {
    /// Cut a page out of an already-filtered, already-sorted result set.
    #[must_use]
    pub fn from_vec(all: Vec<T>, request: PageRequest) -> Self {
        let total = all.len();
        let items = all
            .into_iter()
            .skip(request.skip)
            .take(request.limit)
            .collect();
        Self {
            items,
            total,
            limit: request.limit,
            skip: request.skip,
        }
    }

    #[must_use]
    pub fn has_more(&self) -> bool {
        self.skip + self.items.len() < self.total
    }
}
