//! 底盘虚拟摇杆控制

use crate::error::ClientError;
use robomaster_driver::CommandController;
use robomaster_protocol::VirtualStick;
use robomaster_protocol::keys::{MAIN_CONTROLLER_VIRTUAL_STICK, MAIN_CONTROLLER_VIRTUAL_STICK_ENABLED};
use std::sync::Arc;
use tracing::trace;

/// 底盘控制句柄
///
/// 摇杆指令以 DirectSend 发送，不等待应答，适合高频调用。
#[derive(Clone)]
pub struct Chassis {
    controller: Arc<CommandController>,
}

impl Chassis {
    pub(crate) fn new(controller: Arc<CommandController>) -> Self {
        Self { controller }
    }

    /// 发送一帧虚拟摇杆指令
    ///
    /// # 示例
    ///
    /// ```no_run
    /// # use robomaster_client::Client;
    /// use robomaster_protocol::VirtualStick;
    /// # fn demo(client: &Client) -> Result<(), robomaster_client::ClientError> {
    /// client.chassis().send_sticks(&VirtualStick {
    ///     left_vertical: 0.5,
    ///     left_enabled: true,
    ///     ..VirtualStick::default()
    /// })?;
    /// # Ok(())
    /// # }
    /// ```
    pub fn send_sticks(&self, sticks: &VirtualStick) -> Result<(), ClientError> {
        let packed = sticks.pack();
        trace!("Virtual stick {:?} -> 0x{:016X}", sticks, packed);
        self.controller
            .direct_send(MAIN_CONTROLLER_VIRTUAL_STICK, packed)?;
        Ok(())
    }

    /// 摇杆回中（保持控制权）
    pub fn stop(&self) -> Result<(), ClientError> {
        self.send_sticks(&VirtualStick {
            left_enabled: true,
            right_enabled: true,
            ..VirtualStick::default()
        })
    }

    /// 开关虚拟摇杆（不等待应答）
    pub fn set_virtual_stick_enabled(&self, enabled: bool) -> Result<(), ClientError> {
        self.controller
            .set_value(MAIN_CONTROLLER_VIRTUAL_STICK_ENABLED, &enabled, None)?;
        Ok(())
    }
}
