//! 命令优先级

/// 网关调用优先级
///
/// - **Normal**: 受熔断器门控，读操作失败时可降级
/// - **Emergency**: 急停专用，跳过熔断门控直接尝试，失败从不降级
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CommandPriority {
    #[default]
    Normal,
    Emergency,
}

impl CommandPriority {
    pub fn bypasses_breaker(self) -> bool {
        self == Self::Emergency
    }
}
