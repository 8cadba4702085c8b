//! 失败分类 - 瞬时（网络/服务端抖动）vs 永久（应用级错误）
//!
//! 这是一个纯二分决策：瞬时 → 状态 offline（在线事件负责下一次重试），
//! 永久 → 状态 error（定时器负责下一次重试）。两个分支对缓冲数据的
//! 处理完全一致，分类只影响 UI 呈现和由哪个后台过程接手。

use regex::Regex;
use std::sync::OnceLock;

use crate::error::StateSyncSDKError;

/// 失败类别
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    /// 网络或服务端瞬时问题，等环境恢复自动重试
    Transient,
    /// 应用级错误，仍会自动重试，但 UI 可以提示用户关注
    Permanent,
}

/// 网络类失败的文案特征
fn network_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(
            r"(?i)failed to fetch|fetch failed|network ?error|dns|name resolution|timed? ?out|connection (refused|reset|closed|aborted)|unreachable|temporarily unavailable|no route to host|broken pipe",
        )
        .expect("网络失败特征正则非法")
    })
}

/// 对一次失败做分类
///
/// `online` 是失败发生时刻的连通性判断：明确离线时不用再看错误内容。
pub fn classify_failure(error: &StateSyncSDKError, online: bool) -> FailureClass {
    if !online {
        return FailureClass::Transient;
    }

    match error {
        StateSyncSDKError::Network(_) | StateSyncSDKError::Timeout(_) => FailureClass::Transient,
        StateSyncSDKError::Remote { status, message } => {
            // 5xx 服务端错误视为瞬时，4xx 客户端错误视为永久
            if let Some(code) = status {
                if (500..600).contains(code) {
                    return FailureClass::Transient;
                }
            }
            if network_pattern().is_match(message) {
                FailureClass::Transient
            } else {
                FailureClass::Permanent
            }
        }
        other => {
            if network_pattern().is_match(&other.to_string()) {
                FailureClass::Transient
            } else {
                FailureClass::Permanent
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn remote(status: Option<u16>, message: &str) -> StateSyncSDKError {
        StateSyncSDKError::Remote {
            status,
            message: message.to_string(),
        }
    }

    #[test]
    fn test_offline_is_always_transient() {
        let err = StateSyncSDKError::Other("anything at all".to_string());
        assert_eq!(classify_failure(&err, false), FailureClass::Transient);
    }

    #[test]
    fn test_server_errors_are_transient() {
        assert_eq!(
            classify_failure(&remote(Some(500), "internal"), true),
            FailureClass::Transient
        );
        assert_eq!(
            classify_failure(&remote(Some(503), "service unavailable"), true),
            FailureClass::Transient
        );
        assert_eq!(
            classify_failure(&remote(Some(599), "edge"), true),
            FailureClass::Transient
        );
    }

    #[test]
    fn test_client_errors_are_permanent() {
        assert_eq!(
            classify_failure(&remote(Some(400), "bad request"), true),
            FailureClass::Permanent
        );
        assert_eq!(
            classify_failure(&remote(Some(404), "row missing"), true),
            FailureClass::Permanent
        );
        assert_eq!(
            classify_failure(&remote(Some(422), "schema rejected"), true),
            FailureClass::Permanent
        );
    }

    #[test]
    fn test_network_error_variants_are_transient() {
        assert_eq!(
            classify_failure(&StateSyncSDKError::Network("conn".into()), true),
            FailureClass::Transient
        );
        assert_eq!(
            classify_failure(&StateSyncSDKError::Timeout("slow".into()), true),
            FailureClass::Transient
        );
    }

    #[test]
    fn test_message_patterns_are_transient() {
        for message in [
            "Failed to fetch",
            "fetch failed",
            "NetworkError when attempting to fetch resource",
            "DNS resolution failure for host",
            "request timed out",
            "connection refused",
            "Connection reset by peer",
            "host unreachable",
        ] {
            assert_eq!(
                classify_failure(&StateSyncSDKError::Other(message.to_string()), true),
                FailureClass::Transient,
                "应判为瞬时: {}",
                message
            );
        }
    }

    #[test]
    fn test_application_errors_are_permanent() {
        for message in ["invalid payload", "permission denied", "quota exceeded"] {
            assert_eq!(
                classify_failure(&StateSyncSDKError::Other(message.to_string()), true),
                FailureClass::Permanent,
                "应判为永久: {}",
                message
            );
        }
    }
}
