// chat_service/src/main.rs

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use chat_service::{config, state::AppState, ws_server::heartbeat_monitor::HeartbeatMonitor, ws_server::service::WsService};

#[tokio::main]
async fn main() -> Result<()> {
    // 默认 Info 级别，RUST_LOG 可以覆盖。
    if let Err(e) = env_logger::Builder::new()
        .filter_level(log::LevelFilter::Info)
        .parse_default_env()
        .format_timestamp_millis()
        .try_init()
    {
        // 日志系统尚未可用
        eprintln!("初始化 env_logger 失败: {}", e);
    }
    log::info!("日志系统已初始化。");

    let app_config = config::init_config()?;
    let state = AppState::from_config(app_config.clone());

    let websocket_config = &app_config.websocket;
    let monitor = HeartbeatMonitor::new(
        Arc::clone(&state.connection_manager),
        Duration::from_secs(websocket_config.client_timeout_seconds),
        Duration::from_secs(websocket_config.heartbeat_check_interval_seconds),
    );
    tokio::spawn(monitor.run());
    log::info!("[主程序] 心跳监视器已启动。");

    let service = WsService::new(state);
    if let Err(e) = service.start().await {
        log::error!("[主程序] 服务运行过程中遇到错误: {:?}", e);
        return Err(e);
    }
    log::info!("[主程序] 服务已退出。");
    Ok(())
}
