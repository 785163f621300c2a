//! 客户端与连接引导
//!
//! 启动流程：
//!
//! 1. 创建并初始化引擎（失败即致命）
//! 2. 订阅 `AirLinkConnection`
//! 3. 重置连接参数：`Connection/1` 重置，`Connection/2` 写入 IP，
//!    `Connection/3` 写入端口，`Connection/0` 发起连接
//! 4. `wait_for_link` 等待 `AirLinkConnection == true` 的推送

use crate::chassis::Chassis;
use crate::config::ClientConfig;
use crate::error::ClientError;
use crate::gimbal::Gimbal;
use parking_lot::{Condvar, Mutex};
use robomaster_bridge::Transport;
use robomaster_driver::{CommandController, ControllerBuilder};
use robomaster_protocol::keys::AIR_LINK_CONNECTION;
use robomaster_protocol::{EventCode, EventType, KeyResult, connection};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// 客户端订阅链路状态使用的监听者 ID
pub const LINK_LISTENER_ID: &str = "robomaster-client-link";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Idle,
    Running,
    Stopped,
}

#[derive(Debug, Default)]
struct LinkStatus {
    up: bool,
    /// 观察到链路建立的推送编号
    established_by: Option<u64>,
}

/// 链路状态（由监听回调更新）
#[derive(Default)]
struct LinkState {
    status: Mutex<LinkStatus>,
    changed: Condvar,
}

impl LinkState {
    fn update(&self, result: &KeyResult, push: Option<u64>) {
        let Some(up) = result.value_bool() else {
            debug!("Ignoring link update: {}", result.error_description);
            return;
        };
        let mut status = self.status.lock();
        if status.up != up {
            info!("Air link {}", if up { "established" } else { "lost" });
        }
        status.up = up;
        status.established_by = if up { push } else { None };
        self.changed.notify_all();
    }

    fn reset(&self) {
        *self.status.lock() = LinkStatus::default();
        self.changed.notify_all();
    }
}

/// RoboMaster 客户端
pub struct Client {
    bridge: Arc<dyn Transport>,
    controller: Arc<CommandController>,
    config: ClientConfig,
    link: Arc<LinkState>,
    phase: Mutex<Phase>,
}

impl Client {
    /// 创建客户端（不会与引擎通信，直到 [`start`](Self::start)）
    pub fn new(bridge: Arc<dyn Transport>, config: ClientConfig) -> Result<Self, ClientError> {
        let controller = ControllerBuilder::new()
            .config(config.controller_config())
            .build(bridge.clone())?;
        Ok(Self {
            bridge,
            controller: Arc::new(controller),
            config,
            link: Arc::new(LinkState::default()),
            phase: Mutex::new(Phase::Idle),
        })
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// 底层命令分发器
    pub fn controller(&self) -> &Arc<CommandController> {
        &self.controller
    }

    pub fn chassis(&self) -> Chassis {
        Chassis::new(self.controller.clone())
    }

    pub fn gimbal(&self) -> Gimbal {
        Gimbal::new(self.controller.clone())
    }

    pub fn is_running(&self) -> bool {
        *self.phase.lock() == Phase::Running
    }

    pub fn is_link_up(&self) -> bool {
        self.link.status.lock().up
    }

    /// 启动客户端并发起连接
    ///
    /// 重复调用无副作用。已停止的客户端不能再次启动。
    ///
    /// # 错误
    ///
    /// - `ClientError::Bridge`: 创建或初始化引擎失败
    /// - `ClientError::InitializeFailed`: 引擎报告未就绪
    /// - `ClientError::NotRunning`: 客户端已停止
    pub fn start(&self) -> Result<(), ClientError> {
        let mut phase = self.phase.lock();
        match *phase {
            Phase::Running => return Ok(()),
            Phase::Stopped => return Err(ClientError::NotRunning),
            Phase::Idle => {},
        }

        self.bridge.create(
            &self.config.bridge_name,
            self.config.debuggable,
            &self.config.log_path,
        )?;
        if !self.bridge.initialize()? {
            warn!("Unity bridge refused to initialize");
            if let Err(e) = self.bridge.destroy() {
                debug!("Destroy after failed initialize: {}", e);
            }
            return Err(ClientError::InitializeFailed);
        }

        if let Err(e) = self.bootstrap() {
            let _ = self
                .controller
                .stop_listening(AIR_LINK_CONNECTION, LINK_LISTENER_ID);
            if let Err(e) = self.bridge.uninitialize() {
                debug!("Uninitialize after failed start: {}", e);
            }
            if let Err(e) = self.bridge.destroy() {
                debug!("Destroy after failed start: {}", e);
            }
            return Err(e);
        }

        *phase = Phase::Running;
        info!(
            "Client started, connecting to {}:{}",
            self.config.robot_ip, self.config.port
        );
        Ok(())
    }

    /// 重置连接参数并发起连接
    pub fn connect(&self, robot_ip: &str, port: u16) -> Result<(), ClientError> {
        let code = |sub_type| EventCode::new(EventType::Connection, sub_type).code();

        self.bridge.send_event(code(connection::RESET), &[], 0)?;
        self.bridge
            .send_event_with_string(code(connection::SET_IP), robot_ip, 0)?;
        self.bridge
            .send_event_with_number(code(connection::SET_PORT), u64::from(port), 0)?;
        self.bridge.send_event(code(connection::CONNECT), &[], 0)?;
        debug!("Connection requested: {}:{}", robot_ip, port);
        Ok(())
    }

    /// 阻塞等待链路建立
    ///
    /// 返回时，带来链路建立消息的推送已经送达该 Key 的所有监听者。
    ///
    /// # 错误
    ///
    /// - `ClientError::LinkTimeout`: 超时前未收到链路建立推送
    /// - `ClientError::NotRunning`: 客户端未启动
    pub fn wait_for_link(&self, timeout: Duration) -> Result<(), ClientError> {
        if !self.is_running() {
            return Err(ClientError::NotRunning);
        }

        let deadline = Instant::now() + timeout;
        let established_by = {
            let mut status = self.link.status.lock();
            while !status.up {
                if self.link.changed.wait_until(&mut status, deadline).timed_out() && !status.up {
                    return Err(ClientError::LinkTimeout { timeout });
                }
            }
            status.established_by
        };

        // 等待同一推送的其他监听者全部返回
        if let Some(push) = established_by
            && !self.controller.push_progress().wait_completed(push, deadline)
        {
            return Err(ClientError::LinkTimeout { timeout });
        }
        Ok(())
    }

    /// 使用配置中的超时等待链路建立
    pub fn wait_for_link_default(&self) -> Result<(), ClientError> {
        self.wait_for_link(self.config.link_timeout())
    }

    /// 停止客户端：拆除分发器，反初始化并销毁引擎
    ///
    /// 重复调用无副作用。
    pub fn stop(&self) -> Result<(), ClientError> {
        let mut phase = self.phase.lock();
        let was_running = *phase == Phase::Running;
        *phase = Phase::Stopped;

        self.controller.teardown();
        self.link.reset();
        if !was_running {
            return Ok(());
        }

        self.bridge.uninitialize()?;
        self.bridge.destroy()?;
        info!("Client stopped");
        Ok(())
    }

    fn bootstrap(&self) -> Result<(), ClientError> {
        let link = self.link.clone();
        let pushes = self.controller.push_progress();
        self.controller.start_listening(
            AIR_LINK_CONNECTION,
            LINK_LISTENER_ID,
            move |result: &KeyResult| link.update(result, pushes.current()),
            false,
        )?;
        self.connect(&self.config.robot_ip, self.config.port)
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        if let Err(e) = self.stop() {
            warn!("Client shutdown failed: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use robomaster_bridge::{MockBridge, SentPayload, SimBridge};
    use robomaster_protocol::{DataType, encode_tag};
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::thread;

    fn client_with(bridge: Arc<dyn Transport>) -> Client {
        Client::new(bridge, ClientConfig::default()).unwrap()
    }

    #[test]
    fn test_start_sends_connection_sequence() {
        let mock = Arc::new(MockBridge::new());
        let client = client_with(mock.clone());
        client.start().unwrap();

        assert_eq!(mock.created(), Some(("Robomaster".to_string(), false)));
        assert!(mock.is_initialized());

        let sent = mock.sent();
        let codes: Vec<EventCode> = sent.iter().map(|e| e.code().unwrap()).collect();
        assert_eq!(
            codes,
            vec![
                EventCode::new(EventType::StartListening, AIR_LINK_CONNECTION.wire_id()),
                EventCode::new(EventType::Connection, connection::RESET),
                EventCode::new(EventType::Connection, connection::SET_IP),
                EventCode::new(EventType::Connection, connection::SET_PORT),
                EventCode::new(EventType::Connection, connection::CONNECT),
            ]
        );
        assert_eq!(sent[2].payload, SentPayload::Text("192.168.2.1".to_string()));
        assert_eq!(sent[3].payload, SentPayload::Number(10607));
    }

    #[test]
    fn test_initialize_failure_is_fatal() {
        let mock = Arc::new(MockBridge::new());
        mock.set_initialize_result(false);
        let client = client_with(mock.clone());

        let err = client.start().unwrap_err();
        assert!(matches!(err, ClientError::InitializeFailed));
        assert!(err.is_transport_fault());
        assert!(!client.is_running());
        assert!(mock.sent().is_empty());
    }

    #[test]
    fn test_wait_for_link_times_out_without_push() {
        let mock = Arc::new(MockBridge::new());
        let client = client_with(mock);
        client.start().unwrap();

        let err = client
            .wait_for_link(Duration::from_millis(30))
            .unwrap_err();
        assert!(matches!(err, ClientError::LinkTimeout { .. }));
    }

    #[test]
    fn test_link_established_with_simulated_robot() {
        let sim = Arc::new(SimBridge::new().unwrap());
        let client = client_with(sim.clone());
        client.start().unwrap();

        client.wait_for_link(Duration::from_secs(2)).unwrap();
        assert!(client.is_link_up());
        assert_eq!(
            sim.connection_target(),
            (Some("192.168.2.1".to_string()), Some(10607))
        );
    }

    #[test]
    fn test_wait_for_link_waits_for_every_link_listener() {
        let mock = Arc::new(MockBridge::new());
        let client = client_with(mock.clone());
        client.start().unwrap();

        let app_done = Arc::new(AtomicBool::new(false));
        let app_done_clone = app_done.clone();
        client
            .controller()
            .start_listening(
                AIR_LINK_CONNECTION,
                "app",
                move |_: &KeyResult| {
                    thread::sleep(Duration::from_millis(300));
                    app_done_clone.store(true, Ordering::SeqCst);
                },
                false,
            )
            .unwrap();

        let wire_id = AIR_LINK_CONNECTION.wire_id();
        let envelope = format!(r#"{{"Tag":0,"Key":{wire_id},"Error":0,"Value":true}}"#);
        let code = EventCode::new(EventType::StartListening, wire_id).code();
        let tag = encode_tag(DataType::String, u64::from(wire_id)).unwrap();
        assert!(mock.inject(code, envelope.as_bytes(), tag));

        client.wait_for_link(Duration::from_secs(2)).unwrap();
        assert!(app_done.load(Ordering::SeqCst));
        assert!(client.is_link_up());
    }

    #[test]
    fn test_stop_is_idempotent_and_final() {
        let mock = Arc::new(MockBridge::new());
        let client = client_with(mock.clone());
        client.start().unwrap();

        client.stop().unwrap();
        client.stop().unwrap();
        assert!(!mock.is_initialized());
        assert_eq!(mock.created(), None);
        assert!(matches!(client.start(), Err(ClientError::NotRunning)));
        assert!(matches!(
            client.wait_for_link(Duration::from_millis(1)),
            Err(ClientError::NotRunning)
        ));
    }
}
