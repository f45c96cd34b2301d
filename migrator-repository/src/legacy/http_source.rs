use std::time::Duration;

use async_trait::async_trait;
use migrator_shared::types::{EntityType, LegacyPage, LegacyRecord};
use reqwest::Client as ReqwestClient;
use serde::Deserialize;
use serde_json::{Map, Value};
use tracing::{debug, instrument, warn};

use crate::errors::LegacySourceError;
use crate::interfaces::LegacySource;

/// Connection settings for [`HttpLegacySource`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpLegacySourceConfig {
    /// API root, e.g. `https://app.example.com/api/1.1`.
    pub base_url: String,
    pub api_token: String,
    /// Timeout applied to every request.
    pub timeout: Duration,
}

#[derive(Debug, Deserialize)]
struct DataApiEnvelope {
    response: DataApiResponse,
}

#[derive(Debug, Deserialize)]
struct DataApiResponse {
    #[serde(default)]
    results: Vec<Map<String, Value>>,
    #[serde(default)]
    remaining: u64,
}

/// Production legacy source that pages through the Data API over HTTPS.
///
/// Requests look like `GET {base}/obj/{type}?cursor=N&limit=M` and are
/// authenticated with a bearer token.
pub struct HttpLegacySource {
    base_url: String,
    api_token: String,
    client: ReqwestClient,
}

impl HttpLegacySource {
    pub fn new(config: HttpLegacySourceConfig) -> Result<Self, LegacySourceError> {
        if config.base_url.trim().is_empty() {
            return Err(LegacySourceError::Config("base url is empty".to_string()));
        }
        let client = ReqwestClient::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| LegacySourceError::Config(e.to_string()))?;

        Ok(Self {
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_token: config.api_token,
            client,
        })
    }

    fn listing_url(&self, entity: EntityType) -> String {
        format!("{}/obj/{}", self.base_url, entity.legacy_type_name())
    }
}

/// Decodes a Data API listing body into a page of records.
pub(crate) fn parse_page(entity: EntityType, body: &str) -> Result<LegacyPage, LegacySourceError> {
    let envelope: DataApiEnvelope =
        serde_json::from_str(body).map_err(|e| LegacySourceError::decode(e.to_string()))?;

    let mut page = LegacyPage {
        remaining: envelope.response.remaining,
        ..LegacyPage::default()
    };
    for (idx, object) in envelope.response.results.into_iter().enumerate() {
        match LegacyRecord::from_api_object(entity, object) {
            Some(record) => page.records.push(record),
            None => {
                warn!(entity = %entity, offset = idx, "Result has no _id");
                page.unidentified.push(idx as u64);
            }
        }
    }
    Ok(page)
}

#[async_trait]
impl LegacySource for HttpLegacySource {
    #[instrument(skip(self), fields(entity = %entity))]
    async fn fetch_page(
        &self,
        entity: EntityType,
        cursor: u64,
        limit: u32,
    ) -> Result<LegacyPage, LegacySourceError> {
        let response = self
            .client
            .get(self.listing_url(entity))
            .bearer_auth(&self.api_token)
            .query(&[("cursor", cursor.to_string()), ("limit", limit.to_string())])
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(LegacySourceError::from_status(status.as_u16(), body));
        }

        let page = parse_page(entity, &body)?;
        debug!(
            cursor,
            returned = page.returned(),
            remaining = page.remaining,
            "Fetched legacy page"
        );
        Ok(page)
    }
}
