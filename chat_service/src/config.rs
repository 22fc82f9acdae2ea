// chat_service/src/config.rs

//! 应用配置的加载与访问。
//!
//! 配置来自 `app_settings.json`（路径可通过 `CHAT_SERVICE_CONFIG` 覆盖），文件不存在或
//! 损坏时写入默认配置。加载后再用环境变量覆盖部分字段，最后进行校验。

use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use crate::error::AppError;

/// 配置文件路径的环境变量名。
pub const CONFIG_PATH_ENV: &str = "CHAT_SERVICE_CONFIG";
pub const HOST_ENV: &str = "CHAT_SERVICE_HOST";
pub const PORT_ENV: &str = "CHAT_SERVICE_PORT";
pub const JWT_SECRET_ENV: &str = "JWT_SECRET";

/// 默认配置文件名
pub const DEFAULT_CONFIG_FILE: &str = "app_settings.json";
/// HTTP / WebSocket 服务的默认主机地址
pub const DEFAULT_HOST: &str = "0.0.0.0";
/// HTTP / WebSocket 服务的默认端口号
pub const DEFAULT_PORT: u16 = 3002;

/// HTTP 服务配置
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// 允许跨域访问的来源。包含 `"*"` 时放开所有来源。
    pub allowed_origins: Vec<String>,
    /// 每个来源 IP 每分钟允许的请求数，0 表示不限流。
    pub rate_limit_per_minute: u32,
    /// 收到退出信号后等待连接自然结束的最长时间，超时后直接退出。
    pub shutdown_grace_seconds: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            allowed_origins: vec!["http://localhost:3000".to_string()],
            rate_limit_per_minute: 100,
            shutdown_grace_seconds: 10,
        }
    }
}

/// WebSocket 连接相关配置
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct WebSocketConfig {
    /// 心跳检查（以及服务端 Ping）的间隔时间（单位：秒）
    pub heartbeat_check_interval_seconds: u64,
    /// 客户端超时时间（单位：秒）
    pub client_timeout_seconds: u64,
    /// 每个连接出站队列的容量，队列写满的连接会被断开
    pub outbound_queue_capacity: usize,
    /// 握手阶段 token 校验的超时时间（单位：毫秒）
    pub handshake_timeout_ms: u64,
    /// REST 发送消息后是否向会话房间推送 `message:new`
    pub realtime_fanout_enabled: bool,
}

impl Default for WebSocketConfig {
    fn default() -> Self {
        Self {
            heartbeat_check_interval_seconds: 25,
            client_timeout_seconds: 60,
            outbound_queue_capacity: 64,
            handshake_timeout_ms: 5000,
            realtime_fanout_enabled: true,
        }
    }
}

/// 鉴权配置
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
#[serde(default)]
pub struct AuthConfig {
    /// HS256 签名密钥。为空时服务拒绝启动。
    pub jwt_secret: String,
}

/// 消息相关的限制
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct MessagesConfig {
    pub default_page_size: usize,
    pub max_page_size: usize,
    /// 单条消息内容（去除首尾空白后）的最大字符数
    pub max_content_length: usize,
}

impl Default for MessagesConfig {
    fn default() -> Self {
        Self {
            default_page_size: 50,
            max_page_size: 100,
            max_content_length: 5000,
        }
    }
}

/// 应用的主配置结构体
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub websocket: WebSocketConfig,
    pub auth: AuthConfig,
    pub messages: MessagesConfig,
}

impl AppConfig {
    /// 用环境变量覆盖配置。`lookup` 便于在测试中注入变量而不修改进程环境。
    pub fn apply_env_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(host) = lookup(HOST_ENV).filter(|v| !v.trim().is_empty()) {
            self.server.host = host;
        }
        if let Some(port) = lookup(PORT_ENV) {
            match port.trim().parse::<u16>() {
                Ok(port) => self.server.port = port,
                Err(e) => warn!("[配置模块] 忽略无效的 {} 值 '{}': {}", PORT_ENV, port, e),
            }
        }
        if let Some(secret) = lookup(JWT_SECRET_ENV) {
            self.auth.jwt_secret = secret;
        }
    }

    /// 校验配置，缺少 JWT 密钥或数值不合理时返回 `AppError::ConfigError`。
    pub fn validate(&self) -> Result<(), AppError> {
        if self.auth.jwt_secret.trim().is_empty() {
            return Err(AppError::ConfigError(format!(
                "未配置 JWT 密钥，请设置环境变量 {} 或 auth.jwt_secret",
                JWT_SECRET_ENV
            )));
        }
        if self.messages.max_page_size == 0 || self.messages.default_page_size == 0 {
            return Err(AppError::ConfigError("分页大小必须大于 0".to_string()));
        }
        if self.websocket.outbound_queue_capacity == 0 {
            return Err(AppError::ConfigError("outbound_queue_capacity 必须大于 0".to_string()));
        }
        if self.websocket.heartbeat_check_interval_seconds == 0 {
            return Err(AppError::ConfigError("heartbeat_check_interval_seconds 必须大于 0".to_string()));
        }
        Ok(())
    }

    /// 服务监听地址，形如 `0.0.0.0:3002`。
    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}

// 全局静态应用配置实例
static APP_CONFIG: OnceLock<AppConfig> = OnceLock::new();

/// 获取配置文件路径
fn get_config_file_path() -> PathBuf {
    if let Ok(path) = env::var(CONFIG_PATH_ENV) {
        if !path.trim().is_empty() {
            return PathBuf::from(path);
        }
    }
    env::current_dir()
        .unwrap_or_else(|_| PathBuf::from("."))
        .join(DEFAULT_CONFIG_FILE)
}

/// 从指定路径加载配置；文件不存在或无法解析时写入并返回默认配置。
pub fn load_or_create_config(config_file_path: &Path) -> AppConfig {
    match fs::read_to_string(config_file_path) {
        Ok(content) => match serde_json::from_str::<AppConfig>(&content) {
            Ok(config) => {
                info!("[配置模块] 已成功从配置文件 {:?} 加载应用配置。", config_file_path);
                config
            }
            Err(e) => {
                warn!(
                    "[配置模块] 警告：从 {:?} 反序列化配置失败: {}. 文件可能已损坏。将使用默认配置并尝试覆盖。",
                    config_file_path, e
                );
                let default_config = AppConfig::default();
                save_config(&default_config, config_file_path);
                default_config
            }
        },
        Err(e) => {
            info!(
                "[配置模块] 未在 {:?} 找到配置文件或读取时发生错误 (错误: {}). 将使用默认配置并尝试创建新文件。",
                config_file_path, e
            );
            let default_config = AppConfig::default();
            save_config(&default_config, config_file_path);
            default_config
        }
    }
}

/// 保存配置到文件
fn save_config(config: &AppConfig, path: &Path) {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            if let Err(e) = fs::create_dir_all(parent) {
                warn!("[配置模块] 错误：创建配置目录 {:?} 失败: {}", parent, e);
                return;
            }
        }
    }

    match serde_json::to_string_pretty(config) {
        Ok(content) => {
            if let Err(e) = fs::write(path, content) {
                warn!("[配置模块] 错误：将配置写入文件 {:?} 时失败: {}", path, e);
            } else {
                info!("[配置模块] 已成功将当前配置保存到 {:?}.", path);
            }
        }
        Err(e) => {
            warn!("[配置模块] 错误：序列化配置信息以便保存时失败: {}", e);
        }
    }
}

/// 初始化全局应用配置：加载文件、应用环境变量覆盖并校验。
pub fn init_config() -> Result<&'static AppConfig, AppError> {
    let mut loaded_config = load_or_create_config(&get_config_file_path());
    loaded_config.apply_env_overrides(|key| env::var(key).ok());
    loaded_config.validate()?;

    if APP_CONFIG.set(loaded_config).is_err() {
        warn!("[配置模块] 全局应用配置 APP_CONFIG 已被初始化，本次 init_config 调用未覆盖已有配置。");
    }
    info!("[配置模块] 应用配置已成功初始化完毕。");
    get_config()
}

/// 获取已加载的全局应用配置
pub fn get_config() -> Result<&'static AppConfig, AppError> {
    APP_CONFIG
        .get()
        .ok_or_else(|| AppError::ConfigError("全局应用配置尚未初始化，请先调用 init_config()".to_string()))
}
