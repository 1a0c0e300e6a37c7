// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Boundary to the remote game API.
//!
//! The orchestrator only needs one operation: fetch one page of one data
//! type for one owner. Transport, auth and response mapping live behind
//! [`RemoteSource`] in the embedding application.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::data_type::DataType;
use crate::record::OwnerId;

/// Which slice of a listing to fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PageRequest {
    /// Unpaginated endpoint
    Single,
    /// 1-based page number
    Page(u32),
    /// Records with an id strictly below the boundary; `None` starts from the newest
    Before(Option<i64>),
}

/// How long the remote says a response stays valid.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum CacheHint {
    #[default]
    None,
    /// Epoch millis
    ExpiresAt(i64),
    /// Raw `Expires` header value (RFC 2822 / HTTP date)
    HttpDate(String),
}

/// One page of remote records, in remote order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RemotePage {
    pub records: Vec<Value>,
    pub cache_hint: CacheHint,
    /// Reported on page 1 of paged endpoints
    pub total_pages: Option<u32>,
}

impl RemotePage {
    #[must_use]
    pub fn new(records: Vec<Value>) -> Self {
        Self {
            records,
            ..Default::default()
        }
    }

    #[must_use]
    pub fn with_cache_hint(mut self, hint: CacheHint) -> Self {
        self.cache_hint = hint;
        self
    }

    #[must_use]
    pub fn with_total_pages(mut self, total: u32) -> Self {
        self.total_pages = Some(total);
        self
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum RemoteError {
    #[error("transport error: {0}")]
    Transport(String),
    #[error("remote returned {code}: {message}")]
    Status { code: u16, message: String },
    #[error("malformed response: {0}")]
    Malformed(String),
    #[error("remote call timed out after {0}ms")]
    Timeout(u64),
    #[error("circuit open for {0}")]
    CircuitOpen(DataType),
}

impl RemoteError {
    /// The response arrived but can't be used, as opposed to not arriving.
    #[must_use]
    pub fn is_malformed(&self) -> bool {
        matches!(self, RemoteError::Malformed(_))
    }
}

/// Source of remote snapshots.
#[async_trait]
pub trait RemoteSource: Send + Sync {
    async fn fetch_page(
        &self,
        owner: OwnerId,
        data_type: DataType,
        request: PageRequest,
    ) -> Result<RemotePage, RemoteError>;
}
