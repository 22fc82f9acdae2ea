//! 通用枚举模块。
//!
//! 本模块定义了消息系统中在服务端、客户端以及线上协议之间共享的枚举类型，
//! 保证诸如用户角色、消息状态等概念在整个系统中有一致的表示。
//!
//! 所有枚举都派生 `Serialize`, `Deserialize`, `Debug`, `Clone`, `Copy`, `PartialEq`, `Eq`, `Hash`。

use serde::{Deserialize, Serialize};
use std::fmt;

/// 会话参与方在系统中的角色。
///
/// 每个会话恰好有一个租户 (`Tenant`) 和一个物业经理 (`Manager`)。
/// 线上格式为小写字符串 `"tenant"` / `"manager"`。
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum UserRole {
    /// 租户。
    Tenant,
    /// 物业经理。
    Manager,
}

impl UserRole {
    /// 从令牌中的角色字符串解析角色，大小写不敏感。
    ///
    /// 除 `tenant` / `manager` 之外的值返回 `None`。
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "tenant" => Some(UserRole::Tenant),
            "manager" => Some(UserRole::Manager),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            UserRole::Tenant => "tenant",
            UserRole::Manager => "manager",
        }
    }
}

impl fmt::Display for UserRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 消息的投递状态。
///
/// 状态只能单向推进：`Sent` → `Delivered` → `Read`，不允许回退。
/// 允许跳级（`Sent` 直接变为 `Read`），例如接收方直接拉取了历史记录。
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageStatus {
    /// 已持久化，尚未到达接收方的在线连接。
    Sent,
    /// 已送达接收方的在线连接。
    Delivered,
    /// 接收方已阅读。
    Read,
}

impl MessageStatus {
    fn rank(self) -> u8 {
        match self {
            MessageStatus::Sent => 0,
            MessageStatus::Delivered => 1,
            MessageStatus::Read => 2,
        }
    }

    /// 判断从当前状态能否推进到 `next`。相同状态视为不可推进。
    pub fn can_advance_to(self, next: MessageStatus) -> bool {
        next.rank() > self.rank()
    }
}

impl fmt::Display for MessageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    /// 测试角色解析是否大小写不敏感，并拒绝未知角色。
    fn test_user_role_parse() {
        assert_eq!(UserRole::parse("tenant"), Some(UserRole::Tenant));
        assert_eq!(UserRole::parse("Manager"), Some(UserRole::Manager));
        assert_eq!(UserRole::parse(" TENANT "), Some(UserRole::Tenant));
        assert_eq!(UserRole::parse("admin"), None, "未知角色应解析失败");
        assert_eq!(UserRole::parse(""), None);
    }

    #[test]
    /// 测试 `UserRole` 的线上格式为小写字符串。
    fn test_user_role_wire_format() {
        assert_eq!(serde_json::to_string(&UserRole::Tenant).unwrap(), "\"tenant\"");
        let parsed: UserRole = serde_json::from_str("\"manager\"").unwrap();
        assert_eq!(parsed, UserRole::Manager);
    }

    #[test]
    /// 测试消息状态只允许向前推进。
    fn test_message_status_only_moves_forward() {
        assert!(MessageStatus::Sent.can_advance_to(MessageStatus::Delivered));
        assert!(MessageStatus::Sent.can_advance_to(MessageStatus::Read));
        assert!(MessageStatus::Delivered.can_advance_to(MessageStatus::Read));

        assert!(!MessageStatus::Read.can_advance_to(MessageStatus::Delivered), "Read 不能回退到 Delivered");
        assert!(!MessageStatus::Delivered.can_advance_to(MessageStatus::Sent));
        assert!(!MessageStatus::Read.can_advance_to(MessageStatus::Read), "相同状态不算推进");
    }

    #[test]
    fn test_message_status_serializes_as_variant_name() {
        assert_eq!(serde_json::to_string(&MessageStatus::Delivered).unwrap(), "\"Delivered\"");
    }
}
