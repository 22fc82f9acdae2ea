// chat_service/src/auth.rs

//! 鉴权：把 bearer token 校验为 `{userId, role}`。
//!
//! token 的签发由外部系统负责，本服务只做校验。REST 路由通过 [`AuthUser`] 提取器完成鉴权，
//! WebSocket 握手则在升级前直接调用 [`TokenVerifier`]。

use async_trait::async_trait;
use axum::{
    extract::FromRequestParts,
    http::{header::AUTHORIZATION, request::Parts, HeaderMap},
};
use chat_models::UserRole;
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use log::{debug, warn};
use serde::{Deserialize, Serialize};

use crate::error::AppError;
use crate::state::AppState;

/// 通过校验的调用者身份。
#[derive(Debug, Clone, PartialEq)]
pub struct AuthenticatedUser {
    pub user_id: String,
    pub role: UserRole,
}

/// token 中的声明。其余字段（如 `email`）被忽略。
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Claims {
    pub user_id: String,
    pub role: String,
    pub exp: usize,
}

#[async_trait]
pub trait TokenVerifier: Send + Sync {
    /// 校验 token。签名错误或过期返回 `Unauthorized`，角色不被允许返回 `Forbidden`。
    async fn verify(&self, token: &str) -> Result<AuthenticatedUser, AppError>;
}

/// 基于 HS256 共享密钥的 JWT 校验器。
pub struct JwtVerifier {
    decoding_key: DecodingKey,
    validation: Validation,
}

impl JwtVerifier {
    pub fn new(secret: &str) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_required_spec_claims(&["exp"]);
        Self {
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            validation,
        }
    }
}

#[async_trait]
impl TokenVerifier for JwtVerifier {
    async fn verify(&self, token: &str) -> Result<AuthenticatedUser, AppError> {
        let data = decode::<Claims>(token, &self.decoding_key, &self.validation).map_err(|e| {
            debug!("[鉴权] token 校验失败: {}", e);
            AppError::Unauthorized("Invalid token".to_string())
        })?;

        let claims = data.claims;
        if claims.user_id.trim().is_empty() {
            return Err(AppError::Unauthorized("Invalid token".to_string()));
        }
        let role = UserRole::parse(&claims.role).ok_or_else(|| {
            warn!("[鉴权] 用户 {} 的角色 '{}' 不被允许", claims.user_id, claims.role);
            AppError::Forbidden("Access denied".to_string())
        })?;

        Ok(AuthenticatedUser { user_id: claims.user_id, role })
    }
}

/// 从 `Authorization: Bearer <token>` 请求头中取出 token。
pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    let value = headers.get(AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = value.split_once(' ')?;
    let token = token.trim();
    (scheme.eq_ignore_ascii_case("bearer") && !token.is_empty()).then_some(token)
}

/// REST 路由使用的鉴权提取器。
#[derive(Debug, Clone)]
pub struct AuthUser(pub AuthenticatedUser);

#[async_trait]
impl FromRequestParts<AppState> for AuthUser {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let token = bearer_token(&parts.headers)
            .ok_or_else(|| AppError::Unauthorized("No token provided".to_string()))?;
        let user = state.verifier.verify(token).await?;
        Ok(AuthUser(user))
    }
}
