use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

use crate::error::ChatError;
use crate::types::{Message, Pagination};

/// One page of conversation history as returned by the REST endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct HistoryPage {
    pub data: Vec<Message>,
    pub pagination: Pagination,
}

/// Paginated conversation-history fetch. The conversation store only talks
/// to this trait; tests supply an in-memory implementation.
#[async_trait]
pub trait HistoryApi: Send + Sync {
    async fn fetch_messages(
        &self,
        contact_id: &str,
        estimate_id: Option<&str>,
        page: u32,
        per_page: u32,
    ) -> Result<HistoryPage, ChatError>;
}

/// REST implementation of [`HistoryApi`].
pub struct RestHistory {
    http: reqwest::Client,
    base_url: String,
    token: Option<String>,
}

impl RestHistory {
    pub fn new(base_url: impl Into<String>, token: Option<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into(),
            token,
        }
    }
}

#[async_trait]
impl HistoryApi for RestHistory {
    async fn fetch_messages(
        &self,
        contact_id: &str,
        estimate_id: Option<&str>,
        page: u32,
        per_page: u32,
    ) -> Result<HistoryPage, ChatError> {
        let url = format!("{}/contacts/{}/messages", self.base_url, contact_id);
        debug!(%url, page, "fetching conversation history");

        let mut req = self.http.get(&url).query(&[
            ("page", page.to_string()),
            ("perPage", per_page.to_string()),
        ]);
        if let Some(estimate_id) = estimate_id {
            req = req.query(&[("estimateId", estimate_id)]);
        }
        if let Some(token) = self.token.as_ref() {
            req = req.bearer_auth(token);
        }

        let resp = req.send().await?;
        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(ChatError::Request(format!(
                "history fetch failed: {status} {body}"
            )));
        }

        let page = resp.json::<HistoryPage>().await?;
        Ok(page)
    }
}
