use reqwest::header::CONTENT_TYPE;
use reqwest::StatusCode;
use serde::Deserialize;
use tracing::warn;

use crate::config::DexConfig;
use crate::error::{DexError, Result};
use crate::metrics::{MetricEnvelope, MetricKind, MetricPoint};

const API_KEY_HEADER: &str = "X-API-Key";

const DETAIL_PATH: &str = "/v1/detail";
const METRIC_PATH: &str = "/v1/metric";

// ─── Wire types ──────────────────────────────────────────────────

/// `GET /v1/detail` response.
#[derive(Debug, Clone, Deserialize)]
pub struct KeyDetail {
    pub data: KeyDetailData,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct KeyDetailData {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub metrics: Vec<String>,
}

impl KeyDetail {
    /// True when the key is allowed to collect `kind`.
    pub fn allows(&self, kind: MetricKind) -> bool {
        self.data
            .metrics
            .iter()
            .filter_map(|m| MetricKind::from_name(m))
            .any(|k| k == kind)
    }
}

// ─── DexClient ───────────────────────────────────────────────────

/// Thin wrapper over the two DEX endpoints. Cheap to share behind an `Arc`;
/// the inner `reqwest::Client` pools connections.
pub struct DexClient {
    http: reqwest::Client,
    host: String,
    service_key: String,
}

impl DexClient {
    pub fn new(config: &DexConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.http_timeout)
            .build()?;

        Ok(Self {
            http,
            host: config.host.trim_end_matches('/').to_owned(),
            service_key: config.service_key.clone(),
        })
    }

    /// Which metric kinds this key may collect. Anything but a 200 with a
    /// well-formed document is an error.
    pub async fn fetch_key_detail(&self) -> Result<KeyDetail> {
        let resp = self
            .http
            .get(format!("{}{DETAIL_PATH}", self.host))
            .header(API_KEY_HEADER, &self.service_key)
            .send()
            .await?;

        let resp = expect_status(resp, StatusCode::OK, "fetch_key_detail").await?;
        let bytes = resp.bytes().await?;
        serde_json::from_slice(&bytes).map_err(DexError::Decode)
    }

    /// Upload one batch. DEX answers 204 on success.
    pub async fn send_metrics(&self, batch: &[MetricPoint]) -> Result<()> {
        let body = serde_json::to_vec(&MetricEnvelope { payload: batch })
            .map_err(DexError::Encode)?;

        let resp = self
            .http
            .post(format!("{}{METRIC_PATH}", self.host))
            .header(API_KEY_HEADER, &self.service_key)
            .header(CONTENT_TYPE, "application/json")
            .body(body)
            .send()
            .await?;

        expect_status(resp, StatusCode::NO_CONTENT, "send_metrics").await?;
        Ok(())
    }
}

/// Pass the response through if it carries `expected`, otherwise turn it
/// into `UnexpectedStatus` with whatever body the server sent back.
async fn expect_status(
    resp: reqwest::Response,
    expected: StatusCode,
    endpoint: &'static str,
) -> Result<reqwest::Response> {
    let actual = resp.status();
    if actual == expected {
        return Ok(resp);
    }

    let body = resp.text().await.unwrap_or_else(|e| {
        warn!("{endpoint}: reading error body failed: {e}");
        String::new()
    });

    Err(DexError::UnexpectedStatus {
        endpoint,
        expected: expected.as_u16(),
        actual: actual.as_u16(),
        body,
    })
}
