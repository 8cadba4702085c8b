//! 远端状态存储的 REST 实现
//!
//! 使用 reqwest 作为底层 HTTP 客户端（纯 Rust rustls，无 OpenSSL）。
//! 服务端约定：每个身份一行，`PUT /state/{user_id}` 整文档替换，
//! `GET /state/{user_id}` 返回 404 表示该身份还没有任何数据。

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use std::time::Duration;
use tracing::debug;

use crate::config::HttpClientConfig;
use crate::error::{Result, StateSyncSDKError};
use crate::snapshot::StateSnapshot;
use super::RemoteStateStore;

/// REST 远端状态存储
#[derive(Debug)]
pub struct RestRemoteStateStore {
    client: Client,
    base_url: String,
    api_key: Option<String>,
}

impl RestRemoteStateStore {
    pub fn new(
        base_url: String,
        api_key: Option<String>,
        config: &HttpClientConfig,
    ) -> Result<Self> {
        let mut builder = Client::builder();
        if let Some(secs) = config.connect_timeout_secs {
            builder = builder.connect_timeout(Duration::from_secs(secs));
        }
        if let Some(secs) = config.request_timeout_secs {
            builder = builder.timeout(Duration::from_secs(secs));
        }
        let client = builder
            .build()
            .map_err(|e| StateSyncSDKError::Config(format!("构建 HTTP 客户端失败: {}", e)))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
        })
    }

    fn state_url(&self, user_id: &str) -> String {
        format!("{}/state/{}", self.base_url, user_id)
    }

    fn with_auth(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.api_key {
            Some(key) => request.header("apikey", key),
            None => request,
        }
    }
}

#[async_trait]
impl RemoteStateStore for RestRemoteStateStore {
    async fn fetch_state(&self, user_id: &str) -> Result<Option<StateSnapshot>> {
        let url = self.state_url(user_id);
        debug!("📥 拉取远端状态: {}", url);

        let response = self.with_auth(self.client.get(&url)).send().await?;

        if response.status() == StatusCode::NOT_FOUND {
            // 该身份还没有远端数据（首次登录）
            return Ok(None);
        }

        let response = response.error_for_status()?;
        let snapshot: StateSnapshot = response.json().await?;

        if !snapshot.is_current_schema() {
            return Err(StateSyncSDKError::InvalidData(format!(
                "远端快照 schema 版本不符: {}",
                snapshot.schema_version
            )));
        }

        Ok(Some(snapshot))
    }

    async fn upsert_state(&self, user_id: &str, snapshot: &StateSnapshot) -> Result<()> {
        let url = self.state_url(user_id);
        debug!("📤 推送远端状态: {}", url);

        let response = self
            .with_auth(self.client.put(&url))
            .json(snapshot)
            .send()
            .await?;

        response.error_for_status()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_url_building_strips_trailing_slash() {
        let store = RestRemoteStateStore::new(
            "https://state.example.com/api/app/".to_string(),
            None,
            &HttpClientConfig::default(),
        )
        .unwrap();

        assert_eq!(
            store.state_url("user_1"),
            "https://state.example.com/api/app/state/user_1"
        );
    }
}
