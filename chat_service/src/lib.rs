//! `chat_service` 服务端核心库。
//!
//! 租户与物业经理之间的实时消息服务：WebSocket 实时通道加上 REST 回退接口。
//!
//! 主要模块包括：
//! - `api`: REST 路由（会话列表、历史分页、发送、未读数、删除）以及健康检查。
//! - `auth`: bearer token 校验与 axum 鉴权提取器。
//! - `config`: 配置文件加载、环境变量覆盖与校验。
//! - `db`: 消息存储适配层（trait 与内存实现）。
//! - `error`: 应用错误分类及其 HTTP 映射。
//! - `state`: 在路由与连接任务之间共享的 `AppState`。
//! - `ws_server`: WebSocket 服务端，处理连接、房间、在线状态与事件路由。

pub mod api;
pub mod auth;
pub mod config;
pub mod db;
pub mod error;
pub mod state;
pub mod ws_server;
