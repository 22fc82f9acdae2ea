// chat_service/src/error.rs

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use log::error;
use serde_json::json;
use thiserror::Error;

use crate::db::StoreError;

/// 应用的主要错误类型
///
/// 前五种对应对外可见的错误分类：REST 接口映射为 HTTP 状态码，
/// 实时通道上则转为发给触发方的 `message:error`。
#[derive(Error, Debug)]
pub enum AppError {
    /// 缺少、无效或过期的 token。
    #[error("未授权: {0}")]
    Unauthorized(String),

    /// 已认证，但不是该会话的参与方或角色不被允许。
    #[error("禁止访问: {0}")]
    Forbidden(String),

    #[error("请求参数无效: {0}")]
    Validation(String),

    #[error("资源不存在: {0}")]
    NotFound(String),

    /// 同一来源的请求超过限流阈值。
    #[error("请求过于频繁: {0}")]
    RateLimited(String),

    /// 存储层故障。详细信息只写日志，不返回给客户端。
    #[error("存储错误: {0}")]
    Store(String),

    #[error("配置错误: {0}")]
    ConfigError(String),
}

impl AppError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            AppError::Forbidden(_) => StatusCode::FORBIDDEN,
            AppError::Validation(_) => StatusCode::BAD_REQUEST,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::RateLimited(_) => StatusCode::TOO_MANY_REQUESTS,
            AppError::Store(_) | AppError::ConfigError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// 可以安全返回给客户端的错误描述。
    pub fn client_message(&self) -> String {
        match self {
            AppError::Unauthorized(msg)
            | AppError::Forbidden(msg)
            | AppError::Validation(msg)
            | AppError::NotFound(msg)
            | AppError::RateLimited(msg) => msg.clone(),
            AppError::Store(_) | AppError::ConfigError(_) => "Internal server error".to_string(),
        }
    }
}

impl From<StoreError> for AppError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Validation(msg) => AppError::Validation(msg),
            StoreError::NotFound(msg) => AppError::NotFound(msg),
            StoreError::Backend(msg) => AppError::Store(msg),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            error!("[API] 请求处理失败: {}", self);
        }
        let body = Json(json!({
            "status": "error",
            "message": self.client_message(),
        }));
        (status, body).into_response()
    }
}
