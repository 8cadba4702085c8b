//! SDK 配置
//!
//! 所有经验常量（防抖间隔、重试间隔、锁超时、会话查询超时等）都收敛到这里，
//! 不允许散落在各模块里硬编码 —— 最优值取决于部署网络环境，必须可调。

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// HTTP 客户端配置（远端状态存储 REST 实现用）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpClientConfig {
    /// 连接超时（秒）
    pub connect_timeout_secs: Option<u64>,
    /// 请求超时（秒）
    pub request_timeout_secs: Option<u64>,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            connect_timeout_secs: Some(10),
            request_timeout_secs: Some(30),
        }
    }
}

/// StateSync SDK 配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateSyncConfig {
    /// 数据存储目录
    pub data_dir: PathBuf,
    /// 远端状态服务 API 基础 URL（使用内置 REST 实现时必填）
    ///
    /// 例如：https://state.example.com/api/app
    pub state_api_base_url: Option<String>,
    /// 远端状态服务 API Key（可选，随请求头发送）
    pub state_api_key: Option<String>,
    /// 本地变更推送防抖间隔（毫秒）
    pub push_debounce_ms: u64,
    /// 失败态后台重试间隔（秒）
    pub retry_interval_secs: u64,
    /// 跨上下文同步锁超时（毫秒）—— 超过此时长的锁记录视为已失效，可被抢占
    pub lock_timeout_ms: u64,
    /// 会话查询超时（毫秒）—— 超时后降级读本地缓存的会话痕迹
    pub session_lookup_timeout_ms: u64,
    /// 待验证会话（OTP 等）的最大存活时长（秒），超过视为已放弃
    pub verification_max_age_secs: u64,
    /// 开发环境会话查询竞态的重试延迟（毫秒）
    pub session_race_retry_delay_ms: u64,
    /// HTTP 客户端配置
    pub http_client_config: HttpClientConfig,
    /// 调试模式
    pub debug_mode: bool,
}

impl Default for StateSyncConfig {
    fn default() -> Self {
        Self {
            data_dir: get_default_data_dir(),
            state_api_base_url: None,
            state_api_key: None,
            push_debounce_ms: 1200,
            retry_interval_secs: 30,
            lock_timeout_ms: 5000,
            session_lookup_timeout_ms: 5000,
            verification_max_age_secs: 600, // 10 分钟
            session_race_retry_delay_ms: 500,
            http_client_config: HttpClientConfig::default(),
            debug_mode: false,
        }
    }
}

impl StateSyncConfig {
    pub fn builder() -> StateSyncConfigBuilder {
        StateSyncConfigBuilder::new()
    }
}

/// 获取默认数据目录 ~/.statesync/
fn get_default_data_dir() -> PathBuf {
    if let Some(home_dir) = std::env::var("HOME").ok().map(PathBuf::from) {
        home_dir.join(".statesync")
    } else if let Some(home_dir) = std::env::var("USERPROFILE").ok().map(PathBuf::from) {
        // Windows 支持
        home_dir.join(".statesync")
    } else {
        // 如果无法获取用户主目录，则回退到当前目录
        PathBuf::from("./statesync_data")
    }
}

/// StateSync SDK 配置构建器
pub struct StateSyncConfigBuilder {
    config: StateSyncConfig,
}

impl StateSyncConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: StateSyncConfig::default(),
        }
    }

    pub fn data_dir<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.config.data_dir = path.as_ref().to_path_buf();
        self
    }

    pub fn state_api_base_url<S: Into<String>>(mut self, url: S) -> Self {
        self.config.state_api_base_url = Some(url.into());
        self
    }

    pub fn state_api_key<S: Into<String>>(mut self, key: S) -> Self {
        self.config.state_api_key = Some(key.into());
        self
    }

    pub fn push_debounce_ms(mut self, ms: u64) -> Self {
        self.config.push_debounce_ms = ms;
        self
    }

    pub fn retry_interval_secs(mut self, secs: u64) -> Self {
        self.config.retry_interval_secs = secs;
        self
    }

    pub fn lock_timeout_ms(mut self, ms: u64) -> Self {
        self.config.lock_timeout_ms = ms;
        self
    }

    pub fn session_lookup_timeout_ms(mut self, ms: u64) -> Self {
        self.config.session_lookup_timeout_ms = ms;
        self
    }

    pub fn verification_max_age_secs(mut self, secs: u64) -> Self {
        self.config.verification_max_age_secs = secs;
        self
    }

    pub fn debug_mode(mut self, debug: bool) -> Self {
        self.config.debug_mode = debug;
        self
    }

    pub fn build(self) -> StateSyncConfig {
        self.config
    }
}

impl Default for StateSyncConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}
