// HTTP implementation of the tracking backend contract
use crate::application::tracking_api::TrackingApi;
use crate::domain::position::QueuedPoint;
use crate::domain::session::{
    IngestResponse, PointsPage, PointsQuery, SessionSummary, StartSessionResponse,
    StopSessionRequest,
};
use crate::error::ApiError;
use crate::infrastructure::config::ApiSettings;
use anyhow::Context;
use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use reqwest::{Method, RequestBuilder};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct HttpTrackingApi {
    client: reqwest::Client,
    base_url: String,
    token: Option<String>,
    token_type: String,
}

#[derive(Debug, Serialize)]
struct IngestRequest<'a> {
    points: &'a [QueuedPoint],
}

impl HttpTrackingApi {
    pub fn new(settings: &ApiSettings) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(settings.timeout_secs))
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            client,
            base_url: settings.base_url.trim().trim_end_matches('/').to_string(),
            token: settings.token.clone().filter(|t| !t.is_empty()),
            token_type: settings
                .token_type
                .clone()
                .filter(|t| !t.is_empty())
                .unwrap_or_else(|| "Bearer".to_string()),
        })
    }

    fn session_url(&self, session_id: &str, action: &str) -> String {
        format!(
            "{}/sessions/{}/{}",
            self.base_url,
            urlencoding::encode(session_id),
            action
        )
    }

    fn request(&self, method: Method, url: &str) -> RequestBuilder {
        let mut builder = self
            .client
            .request(method, url)
            .header("Accept", "application/json")
            // Keeps tunnelling proxies from answering with an HTML interstitial
            .header("ngrok-skip-browser-warning", "1")
            .header("X-Correlation-Id", uuid::Uuid::new_v4().to_string());
        if let Some(token) = &self.token {
            builder = builder.header("Authorization", format!("{} {}", self.token_type, token));
        }
        builder
    }

    /// Send the request and return the parsed JSON body
    async fn execute(&self, builder: RequestBuilder) -> Result<Value, ApiError> {
        let response = builder
            .send()
            .await
            .map_err(|e| ApiError::Transport(e.to_string()))?;

        let status = response.status();
        let declared_json = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_none_or(|ct| ct.contains("json"));
        let body = response
            .text()
            .await
            .map_err(|e| ApiError::Transport(e.to_string()))?;

        let value = if body.trim().is_empty() {
            Some(Value::Null)
        } else if declared_json {
            serde_json::from_str::<Value>(&body).ok()
        } else {
            None
        };

        let Some(value) = value else {
            tracing::warn!("Non-JSON response with status {}", status);
            return Err(ApiError::NotJson {
                status: status.as_u16(),
            });
        };

        if !status.is_success() {
            let message = value
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();
            return Err(ApiError::Status {
                status: status.as_u16(),
                message,
            });
        }

        Ok(value)
    }

    /// Send and decode the `data` field of the response envelope
    async fn execute_data<T: DeserializeOwned>(&self, builder: RequestBuilder) -> Result<Option<T>, ApiError> {
        data_of(self.execute(builder).await?)
    }
}

fn data_of<T: DeserializeOwned>(body: Value) -> Result<Option<T>, ApiError> {
    match body {
        Value::Object(mut map) => map
            .remove("data")
            .filter(|d| !d.is_null())
            .map(serde_json::from_value)
            .transpose()
            .map_err(|e| ApiError::Decode(e.to_string())),
        _ => Ok(None),
    }
}

/// Session lists come back either bare or paged under `items`/`content`
fn extract_session_list(data: Value) -> Result<Vec<SessionSummary>, ApiError> {
    let list = match data {
        Value::Array(_) => data,
        Value::Object(mut map) => map
            .remove("items")
            .filter(Value::is_array)
            .or_else(|| map.remove("content").filter(Value::is_array))
            .unwrap_or(Value::Array(Vec::new())),
        _ => Value::Array(Vec::new()),
    };
    serde_json::from_value(list).map_err(|e| ApiError::Decode(e.to_string()))
}

#[async_trait]
impl TrackingApi for HttpTrackingApi {
    async fn start_session(&self) -> Result<StartSessionResponse, ApiError> {
        let url = format!("{}/sessions/start", self.base_url);
        self.execute_data(self.request(Method::POST, &url))
            .await?
            .ok_or(ApiError::MissingData)
    }

    async fn stop_session(&self, session_id: &str, request: &StopSessionRequest) -> Result<(), ApiError> {
        let url = self.session_url(session_id, "stop");
        self.execute(self.request(Method::POST, &url).json(request))
            .await?;
        Ok(())
    }

    async fn ingest_points(&self, session_id: &str, points: &[QueuedPoint]) -> Result<IngestResponse, ApiError> {
        let url = self.session_url(session_id, "points");
        let body = IngestRequest { points };
        let response = self
            .execute_data::<IngestResponse>(self.request(Method::POST, &url).json(&body))
            .await?;
        Ok(response.unwrap_or_default())
    }

    async fn list_sessions(&self) -> Result<Vec<SessionSummary>, ApiError> {
        let url = format!("{}/sessions", self.base_url);
        let body = self.execute(self.request(Method::GET, &url)).await?;
        if body.is_array() {
            return extract_session_list(body);
        }
        match data_of::<Value>(body)? {
            Some(data) => extract_session_list(data),
            None => Ok(Vec::new()),
        }
    }

    async fn session_points(&self, session_id: &str, query: PointsQuery) -> Result<PointsPage, ApiError> {
        let url = self.session_url(session_id, "points");
        let builder = self.request(Method::GET, &url).query(&[
            ("max", query.max.to_string()),
            ("downsample", query.downsample.to_string()),
            ("simplifyEpsM", query.simplify_eps_m.to_string()),
        ]);
        Ok(self.execute_data::<PointsPage>(builder).await?.unwrap_or_default())
    }
}
