//! 同步状态机 - 纯转移函数
//!
//! 对账逻辑最容易腐化成散落各处的嵌套条件和提前返回，所以这里把
//! 全部决策收敛成一个纯函数：`(状态, 事件) -> (新状态, 副作用列表)`。
//! 本模块不做任何 I/O：拉取、推送、加锁、写缓冲都只是返回给引擎的
//! "指令"，引擎负责执行。这样每一条转移都能在单测里确定性地验证。
//!
//! 不变式（引擎执行副作用时必须维持）：
//! - 任何失败路径都不丢数据：PushFailed 时快照必须留在缓冲里
//! - 有待同步快照时永远先推后拉：本地未送达的数据不能被拉取悄悄覆盖
//! - 锁拿不到不算错：数据留在缓冲里，乐观置 ok

use super::{CloudMode, SyncStatus};
use crate::sync::failure::FailureClass;

/// 状态机的自有状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MachineState {
    pub mode: CloudMode,
    pub status: SyncStatus,
    /// 是否已完成一轮会话解析（未初始化时本地变更不触发推送）
    pub initialized: bool,
    /// 待同步缓冲是否非空（引擎负责与持久层保持一致）
    pub has_pending: bool,
}

impl MachineState {
    /// 会话开始前的初始状态
    pub fn initial() -> Self {
        Self {
            mode: CloudMode::Guest,
            status: SyncStatus::Idle,
            initialized: false,
            has_pending: false,
        }
    }
}

/// 输入事件
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncEvent {
    /// 会话解析完成
    SessionResolved {
        has_session: bool,
        /// 解析前引擎是否处于"cloud 模式 + 已知正式用户"
        was_cloud_user: bool,
        online: bool,
    },
    /// 同步锁竞争失败（别的上下文在处理）
    LockContended,
    /// 同步锁已拿到
    LockAcquired,
    /// 远端拉取完成
    RemoteFetched { found: bool },
    /// 远端拉取失败
    PullFailed { class: FailureClass },
    /// 一次推送开始（已确认在线）
    PushStarted,
    /// 推送在发起前发现离线，被推迟
    PushDeferredOffline,
    /// 推送成功，远端已确认
    PushSucceeded,
    /// 推送失败
    PushFailed { class: FailureClass },
    /// 连通性恢复
    WentOnline,
    /// 连通性丢失
    WentOffline,
    /// 观测字段发生本地变更
    LocalMutation,
    /// 重试定时器触发
    RetryTick,
}

/// 副作用指令（由引擎执行）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncEffect {
    /// 清空本地与缓冲数据、重置持久化痕迹（确认登出后的破坏性清理）
    WipeLocalState,
    /// 把当前内存快照写入待同步缓冲
    BufferCurrentSnapshot,
    /// 尝试获取跨上下文同步锁并继续对账
    AcquireLock,
    /// 拉取远端快照
    PullRemote,
    /// 推送缓冲中的待同步快照
    PushPending,
    /// 远端无数据，把当前快照作为初始种子推上去
    PushCurrentAsSeed,
    /// 用远端快照整体替换本地状态
    ReplaceLocalWithRemote,
    /// 拉取订阅权益
    FetchEntitlement,
    /// 清空待同步缓冲（仅推送确认成功后）
    ClearPendingBuffer,
    /// 调度一次防抖推送
    ScheduleDebouncedPush,
}

/// 一次转移的结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transition {
    pub next: MachineState,
    pub effects: Vec<SyncEffect>,
}

fn stay(state: &MachineState) -> Transition {
    Transition {
        next: *state,
        effects: Vec::new(),
    }
}

/// 纯转移函数
pub fn transition(state: &MachineState, event: SyncEvent) -> Transition {
    use SyncEffect as E;
    use SyncEvent as Ev;

    match event {
        Ev::SessionResolved {
            has_session,
            was_cloud_user,
            online,
        } => {
            if !has_session {
                // guest 模式：idle 是本会话的终态，除非身份再次变化。
                // 曾经登录过 → 破坏性清理，guest 数据不得跨账号泄漏。
                let effects = if was_cloud_user {
                    vec![E::WipeLocalState]
                } else {
                    Vec::new()
                };
                return Transition {
                    next: MachineState {
                        mode: CloudMode::Guest,
                        status: SyncStatus::Idle,
                        initialized: true,
                        has_pending: false,
                    },
                    effects,
                };
            }
            if !online {
                // 有身份但没网：变更立即入缓冲，不发起远端调用
                return Transition {
                    next: MachineState {
                        mode: CloudMode::Cloud,
                        status: SyncStatus::Offline,
                        initialized: true,
                        has_pending: true,
                    },
                    effects: vec![E::BufferCurrentSnapshot],
                };
            }
            Transition {
                next: MachineState {
                    mode: CloudMode::Cloud,
                    status: state.status,
                    initialized: true,
                    has_pending: state.has_pending,
                },
                effects: vec![E::AcquireLock],
            }
        }

        Ev::LockContended => {
            // 别的上下文在处理 —— 乐观地视为同步已在别处完成
            Transition {
                next: MachineState {
                    status: SyncStatus::Ok,
                    ..*state
                },
                effects: Vec::new(),
            }
        }

        Ev::LockAcquired => {
            // 有待同步数据永远先推：本地未送达的数据不能被拉取覆盖
            let effects = if state.has_pending {
                vec![E::PushPending]
            } else {
                vec![E::PullRemote]
            };
            Transition {
                next: MachineState {
                    status: SyncStatus::Syncing,
                    ..*state
                },
                effects,
            }
        }

        Ev::RemoteFetched { found } => {
            if found {
                // 本地没有未送达数据时，远端是权威：整体替换
                Transition {
                    next: MachineState {
                        status: SyncStatus::Ok,
                        ..*state
                    },
                    effects: vec![E::ReplaceLocalWithRemote, E::FetchEntitlement],
                }
            } else {
                // 首次登录：以当前本地快照为种子
                Transition {
                    next: *state,
                    effects: vec![E::PushCurrentAsSeed],
                }
            }
        }

        Ev::PullFailed { class } => {
            // 拉取失败不入缓冲：本地没有未送达数据，远端可能更新，
            // 此时缓冲当前快照反而会让陈旧本地状态覆盖远端
            let status = match class {
                FailureClass::Transient => SyncStatus::Offline,
                FailureClass::Permanent => SyncStatus::Error,
            };
            Transition {
                next: MachineState { status, ..*state },
                effects: Vec::new(),
            }
        }

        Ev::PushStarted => Transition {
            next: MachineState {
                status: SyncStatus::Syncing,
                ..*state
            },
            effects: Vec::new(),
        },

        Ev::PushDeferredOffline => Transition {
            next: MachineState {
                status: SyncStatus::Offline,
                has_pending: true,
                ..*state
            },
            effects: vec![E::BufferCurrentSnapshot],
        },

        Ev::PushSucceeded => Transition {
            next: MachineState {
                status: SyncStatus::Ok,
                has_pending: false,
                ..*state
            },
            effects: vec![E::ClearPendingBuffer],
        },

        Ev::PushFailed { class } => {
            let status = match class {
                FailureClass::Transient => SyncStatus::Offline,
                FailureClass::Permanent => SyncStatus::Error,
            };
            // 两个分支都保留缓冲：失败永远不丢数据
            Transition {
                next: MachineState {
                    status,
                    has_pending: true,
                    ..*state
                },
                effects: Vec::new(),
            }
        }

        Ev::WentOnline => {
            if state.mode == CloudMode::Cloud && state.initialized && state.has_pending {
                Transition {
                    next: *state,
                    effects: vec![E::PushPending],
                }
            } else {
                stay(state)
            }
        }

        Ev::WentOffline => {
            if state.mode == CloudMode::Cloud && state.initialized {
                Transition {
                    next: MachineState {
                        status: SyncStatus::Offline,
                        has_pending: true,
                        ..*state
                    },
                    effects: vec![E::BufferCurrentSnapshot],
                }
            } else {
                stay(state)
            }
        }

        Ev::LocalMutation => {
            if state.mode == CloudMode::Cloud && state.initialized {
                Transition {
                    next: *state,
                    effects: vec![E::ScheduleDebouncedPush],
                }
            } else {
                stay(state)
            }
        }

        Ev::RetryTick => {
            // 只排空 error：offline 有专属的在线事件触发器
            if state.mode == CloudMode::Cloud
                && state.initialized
                && state.status == SyncStatus::Error
                && state.has_pending
            {
                Transition {
                    next: *state,
                    effects: vec![E::PushPending],
                }
            } else {
                stay(state)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cloud_state(status: SyncStatus, has_pending: bool) -> MachineState {
        MachineState {
            mode: CloudMode::Cloud,
            status,
            initialized: true,
            has_pending,
        }
    }

    #[test]
    fn test_no_session_goes_guest_idle() {
        let t = transition(
            &MachineState::initial(),
            SyncEvent::SessionResolved {
                has_session: false,
                was_cloud_user: false,
                online: true,
            },
        );
        assert_eq!(t.next.mode, CloudMode::Guest);
        assert_eq!(t.next.status, SyncStatus::Idle);
        assert!(t.next.initialized);
        assert!(t.effects.is_empty());
    }

    #[test]
    fn test_logout_of_known_user_wipes_local_state() {
        let t = transition(
            &cloud_state(SyncStatus::Ok, false),
            SyncEvent::SessionResolved {
                has_session: false,
                was_cloud_user: true,
                online: true,
            },
        );
        assert_eq!(t.next.mode, CloudMode::Guest);
        assert_eq!(t.effects, vec![SyncEffect::WipeLocalState]);
    }

    #[test]
    fn test_session_without_connectivity_buffers_and_goes_offline() {
        let t = transition(
            &MachineState::initial(),
            SyncEvent::SessionResolved {
                has_session: true,
                was_cloud_user: false,
                online: false,
            },
        );
        assert_eq!(t.next.mode, CloudMode::Cloud);
        assert_eq!(t.next.status, SyncStatus::Offline);
        assert!(t.next.has_pending);
        assert_eq!(t.effects, vec![SyncEffect::BufferCurrentSnapshot]);
    }

    #[test]
    fn test_session_online_tries_lock() {
        let t = transition(
            &MachineState::initial(),
            SyncEvent::SessionResolved {
                has_session: true,
                was_cloud_user: false,
                online: true,
            },
        );
        assert_eq!(t.next.mode, CloudMode::Cloud);
        assert_eq!(t.effects, vec![SyncEffect::AcquireLock]);
    }

    #[test]
    fn test_lock_contention_is_optimistic_ok() {
        let t = transition(&cloud_state(SyncStatus::Idle, true), SyncEvent::LockContended);
        assert_eq!(t.next.status, SyncStatus::Ok);
        // 数据留在缓冲里，没有任何丢弃性副作用
        assert!(t.next.has_pending);
        assert!(t.effects.is_empty());
    }

    #[test]
    fn test_pending_push_takes_priority_over_pull() {
        let t = transition(&cloud_state(SyncStatus::Idle, true), SyncEvent::LockAcquired);
        assert_eq!(t.next.status, SyncStatus::Syncing);
        assert_eq!(t.effects, vec![SyncEffect::PushPending]);

        let t = transition(&cloud_state(SyncStatus::Idle, false), SyncEvent::LockAcquired);
        assert_eq!(t.effects, vec![SyncEffect::PullRemote]);
    }

    #[test]
    fn test_remote_found_replaces_local_and_fetches_entitlement() {
        let t = transition(
            &cloud_state(SyncStatus::Syncing, false),
            SyncEvent::RemoteFetched { found: true },
        );
        assert_eq!(t.next.status, SyncStatus::Ok);
        assert_eq!(
            t.effects,
            vec![
                SyncEffect::ReplaceLocalWithRemote,
                SyncEffect::FetchEntitlement
            ]
        );
    }

    #[test]
    fn test_remote_empty_seeds_with_local() {
        let t = transition(
            &cloud_state(SyncStatus::Syncing, false),
            SyncEvent::RemoteFetched { found: false },
        );
        assert_eq!(t.effects, vec![SyncEffect::PushCurrentAsSeed]);
    }

    #[test]
    fn test_push_success_clears_buffer() {
        let t = transition(&cloud_state(SyncStatus::Syncing, true), SyncEvent::PushSucceeded);
        assert_eq!(t.next.status, SyncStatus::Ok);
        assert!(!t.next.has_pending);
        assert_eq!(t.effects, vec![SyncEffect::ClearPendingBuffer]);
    }

    #[test]
    fn test_push_failure_keeps_buffer_and_splits_by_class() {
        let t = transition(
            &cloud_state(SyncStatus::Syncing, true),
            SyncEvent::PushFailed {
                class: FailureClass::Transient,
            },
        );
        assert_eq!(t.next.status, SyncStatus::Offline);
        assert!(t.next.has_pending);

        let t = transition(
            &cloud_state(SyncStatus::Syncing, true),
            SyncEvent::PushFailed {
                class: FailureClass::Permanent,
            },
        );
        assert_eq!(t.next.status, SyncStatus::Error);
        assert!(t.next.has_pending);
    }

    #[test]
    fn test_went_online_drains_pending_only() {
        let t = transition(&cloud_state(SyncStatus::Offline, true), SyncEvent::WentOnline);
        assert_eq!(t.effects, vec![SyncEffect::PushPending]);

        let t = transition(&cloud_state(SyncStatus::Ok, false), SyncEvent::WentOnline);
        assert!(t.effects.is_empty());

        // guest 模式不理会连通性
        let t = transition(&MachineState::initial(), SyncEvent::WentOnline);
        assert!(t.effects.is_empty());
    }

    #[test]
    fn test_went_offline_buffers_immediately() {
        let t = transition(&cloud_state(SyncStatus::Ok, false), SyncEvent::WentOffline);
        assert_eq!(t.next.status, SyncStatus::Offline);
        assert_eq!(t.effects, vec![SyncEffect::BufferCurrentSnapshot]);
    }

    #[test]
    fn test_local_mutation_schedules_debounce_only_when_cloud_initialized() {
        let t = transition(&cloud_state(SyncStatus::Ok, false), SyncEvent::LocalMutation);
        assert_eq!(t.effects, vec![SyncEffect::ScheduleDebouncedPush]);

        let t = transition(&MachineState::initial(), SyncEvent::LocalMutation);
        assert!(t.effects.is_empty());

        let uninitialized = MachineState {
            mode: CloudMode::Cloud,
            status: SyncStatus::Idle,
            initialized: false,
            has_pending: false,
        };
        let t = transition(&uninitialized, SyncEvent::LocalMutation);
        assert!(t.effects.is_empty());
    }

    #[test]
    fn test_retry_tick_drains_error_state_only() {
        let t = transition(&cloud_state(SyncStatus::Error, true), SyncEvent::RetryTick);
        assert_eq!(t.effects, vec![SyncEffect::PushPending]);

        // offline 不归定时器管（在线事件负责）
        let t = transition(&cloud_state(SyncStatus::Offline, true), SyncEvent::RetryTick);
        assert!(t.effects.is_empty());

        // error 但缓冲已空：没有可推的
        let t = transition(&cloud_state(SyncStatus::Error, false), SyncEvent::RetryTick);
        assert!(t.effects.is_empty());
    }

    #[test]
    fn test_pull_failure_does_not_buffer() {
        let t = transition(
            &cloud_state(SyncStatus::Syncing, false),
            SyncEvent::PullFailed {
                class: FailureClass::Transient,
            },
        );
        assert_eq!(t.next.status, SyncStatus::Offline);
        assert!(!t.next.has_pending);
        assert!(t.effects.is_empty());
    }
}
