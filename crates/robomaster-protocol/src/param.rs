//! 出站参数值编码
//!
//! SetValue / PerformAction 的负载是 `{"Value": <值>}` 形式的 JSON。
//! 虚拟摇杆则通过 DirectSend 发送一个打包后的 64 位整数。

use crate::ProtocolError;
use bilge::prelude::*;
use serde::{Deserialize, Serialize};

/// 将值编码为 `{"Value": value}` JSON 字节
///
/// # 示例
///
/// ```
/// use robomaster_protocol::encode_value;
///
/// assert_eq!(encode_value(&true).unwrap(), br#"{"Value":true}"#.to_vec());
/// ```
pub fn encode_value<T: Serialize + ?Sized>(value: &T) -> Result<Vec<u8>, ProtocolError> {
    #[derive(Serialize)]
    struct Envelope<'a, T: Serialize + ?Sized> {
        #[serde(rename = "Value")]
        value: &'a T,
    }

    serde_json::to_vec(&Envelope { value }).map_err(|e| ProtocolError::Encode(e.to_string()))
}

// ============================================================================
// 结构体参数
// ============================================================================

/// 云台角度旋转参数
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct GimbalAngleRotation {
    pub pitch: i16,
    pub yaw: i16,
    /// 运动时间（毫秒）
    pub time: i16,
}

impl GimbalAngleRotation {
    pub fn new(pitch: i16, yaw: i16, time: i16) -> Self {
        Self { pitch, yaw, time }
    }
}

/// 单个功能开关
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionEnableInfo {
    pub id: u8,
    pub enabled: bool,
}

/// 功能开关列表参数
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct FunctionEnable {
    pub list: Vec<FunctionEnableInfo>,
}

impl FunctionEnable {
    pub fn new() -> Self {
        Self::default()
    }

    /// 添加或更新一个功能开关
    pub fn set(mut self, id: u8, enabled: bool) -> Self {
        match self.list.iter_mut().find(|info| info.id == id) {
            Some(info) => info.enabled = enabled,
            None => self.list.push(FunctionEnableInfo { id, enabled }),
        }
        self
    }
}

// ============================================================================
// 虚拟摇杆
// ============================================================================

/// 摇杆中位值
pub const STICK_CENTER: u16 = 1024;
/// 摇杆单侧行程
pub const STICK_SPAN: f32 = 660.0;

/// 虚拟摇杆打包位布局
#[bitsize(64)]
#[derive(FromBits, DebugBits, Clone, Copy, PartialEq)]
struct VirtualStickBits {
    left_vertical: u11,    // Bit 0-10
    left_horizontal: u11,  // Bit 11-21
    right_vertical: u11,   // Bit 22-32
    right_horizontal: u11, // Bit 33-43
    left_enabled: bool,    // Bit 44
    right_enabled: bool,   // Bit 45
    control_mode: u2,      // Bit 46-47
    unused: u16,           // Bit 48-63
}

/// 虚拟摇杆指令
///
/// 轴输入范围 [-1.0, 1.0]，超出部分会被截断。
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct VirtualStick {
    pub left_vertical: f32,
    pub left_horizontal: f32,
    pub right_vertical: f32,
    pub right_horizontal: f32,
    pub left_enabled: bool,
    pub right_enabled: bool,
    /// 控制模式（0-3）
    pub control_mode: u8,
}

impl VirtualStick {
    /// 将 [-1, 1] 映射到 [364, 1684]
    pub fn axis_value(input: f32) -> u16 {
        let t = (input.clamp(-1.0, 1.0) + 1.0) * 0.5;
        let offset = -STICK_SPAN * (1.0 - t) + STICK_SPAN * t;
        (offset + f32::from(STICK_CENTER)) as u16
    }

    /// 打包为 DirectSend 数值
    pub fn pack(&self) -> u64 {
        let bits = VirtualStickBits::new(
            u11::new(Self::axis_value(self.left_vertical)),
            u11::new(Self::axis_value(self.left_horizontal)),
            u11::new(Self::axis_value(self.right_vertical)),
            u11::new(Self::axis_value(self.right_horizontal)),
            self.left_enabled,
            self.right_enabled,
            u2::new(self.control_mode & 0x03),
            0,
        );
        u64::from(bits)
    }
}
