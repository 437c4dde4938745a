//! Balance-history REST client.
//!
//! The service returns updates newest-first in pages; the client walks every page and
//! hands back one ascending sequence. Pages of windows closed before the configured
//! horizon are cached in SQLite, since that history can no longer change.

use crate::chain::cache::Cache;
use crate::chain::rpc::{HttpTransport, RpcConfig, RpcError};
use crate::compute::{BalanceUpdate, InputValidationError};
use crate::error::{DecodeError, Result};
use crate::tx::Pubkey;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

const NAMESPACE: &str = "balance_history";

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct HistoryConfig {
    pub base_url: String,
    pub page_limit: usize,
    /// Serve only from cache; a miss is an error.
    pub offline: bool,
    pub cache_path: Option<String>,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:8080/api/v1".to_string(),
            page_limit: 500,
            offline: false,
            cache_path: None,
        }
    }
}

/// One history request. `from`/`to` are inclusive unix seconds.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct HistoryQuery {
    #[serde(with = "crate::tx::serde_pubkey")]
    pub account: Pubkey,
    #[serde(with = "crate::tx::serde_pubkey")]
    pub asset: Pubkey,
    pub from: Option<i64>,
    pub to: Option<i64>,
    /// Most updates one window may carry. A longer history is refused, never truncated.
    pub limit: Option<usize>,
}

#[async_trait]
pub trait BalanceHistory: Send + Sync {
    /// Updates for the query, ascending by timestamp.
    async fn balance_updates(&self, query: &HistoryQuery) -> Result<Vec<BalanceUpdate>>;
}

pub struct HistoryClient {
    transport: HttpTransport,
    config: HistoryConfig,
    cache: Option<Cache>,
    /// Windows ending strictly before this timestamp are immutable and cacheable.
    closed_before: i64,
}

impl HistoryClient {
    pub fn new(
        config: HistoryConfig,
        rpc: RpcConfig,
        cache: Option<Cache>,
        closed_before: i64,
    ) -> std::result::Result<Self, RpcError> {
        Ok(Self {
            transport: HttpTransport::new(config.base_url.clone(), rpc)?,
            config,
            cache,
            closed_before,
        })
    }

    fn page_path(&self, query: &HistoryQuery, offset: usize) -> String {
        let mut path = format!(
            "/balances/history?account={}&asset={}&limit={}&offset={}",
            urlencoding::encode(&query.account.to_string()),
            urlencoding::encode(&query.asset.to_string()),
            self.config.page_limit,
            offset
        );
        if let Some(from) = query.from {
            path.push_str(&format!("&from={from}"));
        }
        if let Some(to) = query.to {
            path.push_str(&format!("&to={to}"));
        }
        path
    }

    fn cacheable(&self, query: &HistoryQuery) -> bool {
        query.to.is_some_and(|to| to < self.closed_before)
    }

    async fn page(&self, query: &HistoryQuery, offset: usize) -> Result<Vec<BalanceUpdate>> {
        let path = self.page_path(query, offset);
        let key = Cache::key_for(NAMESPACE, &path);
        let cacheable = self.cacheable(query);
        if let Some(cache) = self.cache.as_ref().filter(|_| cacheable) {
            if let Some(hit) = cache.get_json::<Vec<BalanceUpdate>>(&key).map_err(RpcError::from)? {
                debug!(%key, "cache hit");
                return Ok(hit);
            }
        }
        if self.config.offline {
            return Err(RpcError::OfflineMiss.into());
        }
        let body = self.transport.get_text(&path).await?;
        let page: Vec<BalanceUpdate> = serde_json::from_str(&body).map_err(DecodeError::from)?;
        if let Some(cache) = self.cache.as_ref().filter(|_| cacheable) {
            cache
                .put_json(NAMESPACE, &key, &page)
                .map_err(RpcError::from)?;
        }
        Ok(page)
    }
}

/// Newest-first pages into one ascending sequence. Dropping the oldest updates would
/// misstate the balance at the window start, so more than `limit` is an error.
fn assemble(
    pages: Vec<Vec<BalanceUpdate>>,
    query: &HistoryQuery,
) -> std::result::Result<Vec<BalanceUpdate>, InputValidationError> {
    let mut newest_first: Vec<BalanceUpdate> = pages.into_iter().flatten().collect();
    if let Some(limit) = query.limit.filter(|l| newest_first.len() > *l) {
        return Err(InputValidationError::HistoryTruncated {
            start: query.from.unwrap_or_default(),
            limit,
        });
    }
    newest_first.reverse();
    Ok(newest_first)
}

#[async_trait]
impl BalanceHistory for HistoryClient {
    async fn balance_updates(&self, query: &HistoryQuery) -> Result<Vec<BalanceUpdate>> {
        let page_limit = self.config.page_limit.max(1);
        let mut pages = Vec::new();
        let mut offset = 0;
        loop {
            let page = self.page(query, offset).await?;
            let n = page.len();
            offset += n;
            pages.push(page);
            let capped = query.limit.is_some_and(|l| offset > l);
            if n < page_limit || capped {
                break;
            }
        }
        let updates = assemble(pages, query)?;
        info!(account = %query.account, count = updates.len(), "balance history");
        Ok(updates)
    }
}
