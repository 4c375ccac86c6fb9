//! HTTP 传输实现 - 基于 reqwest 的同步 API 客户端
//!
//! 只负责请求 / 响应搬运，不做重试；重试策略由心跳调度与离线队列决定。

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Response, StatusCode};
use serde::Deserialize;
use tracing::info;

use super::{ApiError, ApiResult, CollectionPage, DeleteNotice, SyncTransport, TimestampSnapshot, WriteReceipt};
use crate::collections::CollectionKind;
use crate::sdk::HttpClientConfig;
use crate::sync::timestamps::Stamp;

/// HTTP 传输（生产实现）
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Client,
    base_url: String,
}

impl HttpTransport {
    /// 创建 HTTP 传输。`base_url` 必须带 http:// 或 https:// 前缀。
    pub fn new(config: &HttpClientConfig, base_url: impl Into<String>) -> ApiResult<Self> {
        let base_url = base_url.into();
        if !base_url.starts_with("http://") && !base_url.starts_with("https://") {
            return Err(ApiError::Payload(format!(
                "base_url must include http:// or https://: {}",
                base_url
            )));
        }

        let mut builder = Client::builder();
        if let Some(timeout) = config.connect_timeout_secs {
            builder = builder.connect_timeout(Duration::from_secs(timeout));
        }
        if let Some(timeout) = config.request_timeout_secs {
            builder = builder.timeout(Duration::from_secs(timeout));
        }
        let client = builder
            .build()
            .map_err(|e| ApiError::Network(format!("build HTTP client: {}", e)))?;

        let base_url = base_url.trim_end_matches('/').to_string();
        info!("✅ HTTP 传输已创建 (base_url: {})", base_url);
        Ok(Self { client, base_url })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path)
    }

    /// 统一处理响应：非 2xx 提取错误信息，2xx 反序列化
    async fn read_json<T: for<'de> Deserialize<'de>>(response: Response) -> ApiResult<T> {
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ApiError::Status {
                status: status.as_u16(),
                message: parse_api_error(status, &body),
            });
        }
        response
            .json::<T>()
            .await
            .map_err(|e| ApiError::Payload(e.to_string()))
    }

    async fn get_json<T: for<'de> Deserialize<'de>>(
        &self,
        path: &str,
        query: &[(&str, &str)],
    ) -> ApiResult<T> {
        let response = self
            .client
            .get(self.url(path))
            .query(query)
            .header("Accept", "application/json")
            .send()
            .await
            .map_err(|e| ApiError::Network(e.to_string()))?;
        Self::read_json(response).await
    }

    async fn post_json<T: for<'de> Deserialize<'de>>(
        &self,
        path: &str,
        store_id: &str,
        payload: &serde_json::Value,
    ) -> ApiResult<T> {
        let response = self
            .client
            .post(self.url(path))
            .query(&[("storeId", store_id)])
            .json(payload)
            .send()
            .await
            .map_err(|e| ApiError::Network(e.to_string()))?;
        Self::read_json(response).await
    }
}

#[async_trait]
impl SyncTransport for HttpTransport {
    async fn fetch_collection_page(
        &self,
        store_id: &str,
        kind: CollectionKind,
        after: Option<&Stamp>,
        skip: usize,
    ) -> ApiResult<CollectionPage> {
        let skip = skip.to_string();
        let path = format!("collections/{}", kind.as_str());
        match after {
            Some(stamp) => {
                self.get_json(
                    &path,
                    &[("storeId", store_id), ("after", stamp.as_str()), ("skip", skip.as_str())],
                )
                .await
            }
            None => {
                self.get_json(&path, &[("storeId", store_id), ("skip", skip.as_str())])
                    .await
            }
        }
    }

    async fn fetch_timestamps(&self, store_id: &str) -> ApiResult<TimestampSnapshot> {
        self.get_json("timestamps", &[("storeId", store_id)]).await
    }

    async fn fetch_delete_activity(&self, store_id: &str, after: &Stamp) -> ApiResult<Vec<DeleteNotice>> {
        self.get_json(
            "deleteActivity",
            &[("storeId", store_id), ("after", after.as_str())],
        )
        .await
    }

    async fn create_record(
        &self,
        store_id: &str,
        collection: &str,
        payload: &serde_json::Value,
    ) -> ApiResult<WriteReceipt> {
        self.post_json(&format!("{}/create", collection), store_id, payload)
            .await
    }

    async fn update_record(
        &self,
        store_id: &str,
        collection: &str,
        payload: &serde_json::Value,
    ) -> ApiResult<WriteReceipt> {
        self.post_json(&format!("{}/update", collection), store_id, payload)
            .await
    }
}

/// 错误体可能是 JSON（{"error": ...} / {"message": ...}）也可能是纯文本
#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    error: Option<String>,
    message: Option<String>,
}

fn parse_api_error(status: StatusCode, body: &str) -> String {
    if let Ok(payload) = serde_json::from_str::<ApiErrorBody>(body) {
        if let Some(message) = payload.message.or(payload.error) {
            return message.trim().to_string();
        }
    }
    let trimmed = body.trim();
    if trimmed.is_empty() {
        format!("HTTP {}", status.as_u16())
    } else {
        trimmed.to_string()
    }
}
