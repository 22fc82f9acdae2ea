// chat_service/src/ws_server/heartbeat_monitor.rs

//! 心跳监视器模块。
//!
//! 定期检查所有连接的最后活跃时间。超过超时阈值没有收到任何帧（包括对服务端 Ping 的 Pong）
//! 的连接会被要求关闭，随后由连接任务执行正常的断开清理（注销登记、离开房间、广播下线）。

use chrono::Utc;
use log::{debug, info, warn};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;

use crate::ws_server::connection_manager::ConnectionManager;

pub struct HeartbeatMonitor {
    connection_manager: Arc<ConnectionManager>,
    /// 客户端被判断为超时的最大不活动时长。
    client_timeout_duration: Duration,
    check_interval: Duration,
}

impl HeartbeatMonitor {
    pub fn new(
        connection_manager: Arc<ConnectionManager>,
        client_timeout_duration: Duration,
        check_interval: Duration,
    ) -> Self {
        info!(
            "[心跳监视器] 正在创建 HeartbeatMonitor 实例。客户端超时阈值: {:?}，检查周期: {:?}",
            client_timeout_duration, check_interval
        );
        Self {
            connection_manager,
            client_timeout_duration,
            check_interval,
        }
    }

    /// 启动心跳监视器的主运行循环，直到所在任务被取消。
    pub async fn run(self) {
        info!("[心跳监视器] 后台运行循环已启动。");
        loop {
            sleep(self.check_interval).await;
            self.check_for_timed_out_clients().await;
        }
    }

    /// 检查一轮，返回本轮被要求关闭的连接数。
    pub async fn check_for_timed_out_clients(&self) -> usize {
        let clients_snapshot = self.connection_manager.all_sessions();
        if clients_snapshot.is_empty() {
            debug!("[心跳监视器] 当前没有活动的客户端连接，无需执行超时检查。");
            return 0;
        }

        let chrono_timeout_threshold = match chrono::Duration::from_std(self.client_timeout_duration) {
            Ok(duration) => duration,
            Err(e) => {
                warn!(
                    "[心跳监视器] 无法转换配置的超时时长 ({:?}): {}. 本轮使用 60 秒。",
                    self.client_timeout_duration, e
                );
                chrono::Duration::seconds(60)
            }
        };

        let now = Utc::now();
        let mut timed_out = 0;
        for client_session in &clients_snapshot {
            if client_session.should_close() {
                continue;
            }
            let last_seen = client_session.last_seen().await;
            if now.signed_duration_since(last_seen) > chrono_timeout_threshold {
                warn!(
                    "[心跳监视器] 客户端 {} (用户: {}, addr: {:?}) 已超时！最后活跃时间: {}，将断开连接。",
                    client_session.client_id, client_session.user_id, client_session.addr, last_seen
                );
                client_session.request_close();
                timed_out += 1;
            }
        }
        debug!(
            "[心跳监视器] 本轮检查了 {} 个连接，{} 个超时。",
            clients_snapshot.len(),
            timed_out
        );
        timed_out
    }
}
