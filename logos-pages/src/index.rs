//! Remote key/value index, scoped per page or global.
//!
//! Every operation is one correlated request; nothing is cached locally.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::client::PageClient;
use crate::error::Result;
use crate::protocol::RequestKind;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KV {
    pub key: String,
    pub value: Value,
}

impl KV {
    pub fn new(key: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

/// One hit of a prefix scan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanEntry {
    /// Owning page; may be empty when the server omits it on per-page scans
    #[serde(default)]
    pub page: String,
    pub key: String,
    pub value: Value,
}

/// Index operations issued through a [`PageClient`].
#[derive(Clone, Copy)]
pub struct Index<'a> {
    client: &'a PageClient,
}

impl<'a> Index<'a> {
    pub(crate) fn new(client: &'a PageClient) -> Self {
        Self { client }
    }

    pub async fn set(self, page: &str, key: &str, value: Value) -> Result<()> {
        self.client
            .call(RequestKind::IndexSet, vec![json!(page), json!(key), value])
            .await?;
        Ok(())
    }

    /// Write entries one `index.set` at a time, in order.
    ///
    /// Not atomic: on failure the entries before the failing one stay written,
    /// the rest are never attempted, and the failing entry's error is returned.
    pub async fn batch_set(self, page: &str, entries: &[KV]) -> Result<()> {
        for (applied, entry) in entries.iter().enumerate() {
            if let Err(e) = self.set(page, &entry.key, entry.value.clone()).await {
                log::warn!(
                    "Index batch on {page} stopped at {}: {applied}/{} entries written",
                    entry.key,
                    entries.len()
                );
                return Err(e);
            }
        }
        Ok(())
    }

    /// Value under `key`, or `None` when the server returns null.
    pub async fn get(self, page: &str, key: &str) -> Result<Option<Value>> {
        let value = self
            .client
            .call(RequestKind::IndexGet, vec![json!(page), json!(key)])
            .await?;
        Ok((!value.is_null()).then_some(value))
    }

    pub async fn scan_prefix_for_page(self, page: &str, prefix: &str) -> Result<Vec<ScanEntry>> {
        self.client
            .call_as(RequestKind::IndexScanPrefixForPage, vec![json!(page), json!(prefix)])
            .await
    }

    pub async fn scan_prefix_global(self, prefix: &str) -> Result<Vec<ScanEntry>> {
        self.client
            .call_as(RequestKind::IndexScanPrefixGlobal, vec![json!(prefix)])
            .await
    }

    pub async fn delete_prefix_for_page(self, page: &str, prefix: &str) -> Result<()> {
        self.client
            .call(RequestKind::IndexDeletePrefixForPage, vec![json!(page), json!(prefix)])
            .await?;
        Ok(())
    }

    pub async fn delete(self, page: &str, key: &str) -> Result<()> {
        self.client
            .call(RequestKind::IndexDelete, vec![json!(page), json!(key)])
            .await?;
        Ok(())
    }
}
