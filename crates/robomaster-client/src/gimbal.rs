//! 云台动作

use crate::error::ClientError;
use robomaster_driver::{CommandController, DriverError, ResultCallback};
use robomaster_protocol::keys::{
    GIMBAL_ANGLE_INCREMENT_ROTATION, GIMBAL_CLOSE_ATTITUDE_UPDATES, GIMBAL_OPEN_ATTITUDE_UPDATES,
    GIMBAL_RESET_POSITION, GIMBAL_WORK_MODE,
};
use robomaster_protocol::{GimbalAngleRotation, ProtocolError};
use std::sync::Arc;

/// 云台控制句柄
#[derive(Clone)]
pub struct Gimbal {
    controller: Arc<CommandController>,
}

impl Gimbal {
    pub(crate) fn new(controller: Arc<CommandController>) -> Self {
        Self { controller }
    }

    /// 相对当前姿态旋转
    ///
    /// # 参数
    ///
    /// - `rotation`: 俯仰/偏航增量与运动时间
    /// - `callback`: 动作完成应答（`None` 时不关联应答）
    pub fn rotate_by(
        &self,
        rotation: GimbalAngleRotation,
        callback: Option<ResultCallback>,
    ) -> Result<(), ClientError> {
        let value = serde_json::to_value(rotation)
            .map_err(|e| DriverError::Protocol(ProtocolError::Encode(e.to_string())))?;
        self.controller
            .perform_action(GIMBAL_ANGLE_INCREMENT_ROTATION, Some(value), callback)?;
        Ok(())
    }

    pub fn reset_position(&self, callback: Option<ResultCallback>) -> Result<(), ClientError> {
        self.controller
            .perform_action(GIMBAL_RESET_POSITION, None, callback)?;
        Ok(())
    }

    pub fn set_work_mode(
        &self,
        mode: i64,
        callback: Option<ResultCallback>,
    ) -> Result<(), ClientError> {
        self.controller
            .set_value(GIMBAL_WORK_MODE, &mode, callback)?;
        Ok(())
    }

    /// 开启或关闭姿态推送
    pub fn set_attitude_updates(&self, enabled: bool) -> Result<(), ClientError> {
        let key = if enabled {
            GIMBAL_OPEN_ATTITUDE_UPDATES
        } else {
            GIMBAL_CLOSE_ATTITUDE_UPDATES
        };
        self.controller.perform_action(key, None, None)?;
        Ok(())
    }
}
