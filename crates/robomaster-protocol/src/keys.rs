//! 能力（Key）目录
//!
//! 每个 Key 描述机器人的一个可读、可写或可触发的能力：
//! 线上 ID（`组件 << 24 | 序号`）、声明的值形状以及访问权限。
//! 目录在进程启动时加载，之后只读。

use crate::ProtocolError;
use std::collections::HashMap;
use std::fmt;
use std::ops::BitOr;
use std::sync::OnceLock;

// ============================================================================
// 访问权限
// ============================================================================

/// 访问权限位掩码
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct AccessType(u8);

impl AccessType {
    pub const NONE: AccessType = AccessType(0);
    pub const READ: AccessType = AccessType(1);
    pub const WRITE: AccessType = AccessType(2);
    pub const ACTION: AccessType = AccessType(4);

    pub const fn bits(self) -> u8 {
        self.0
    }

    pub const fn from_bits(bits: u8) -> Self {
        AccessType(bits & 0x07)
    }

    /// 是否包含 `other` 的全部权限位
    pub const fn contains(self, other: AccessType) -> bool {
        self.0 & other.0 == other.0
    }

    pub const fn union(self, other: AccessType) -> Self {
        AccessType(self.0 | other.0)
    }
}

impl BitOr for AccessType {
    type Output = AccessType;

    fn bitor(self, rhs: Self) -> Self::Output {
        self.union(rhs)
    }
}

impl fmt::Display for AccessType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut parts = Vec::with_capacity(3);
        if self.contains(AccessType::READ) {
            parts.push("Read");
        }
        if self.contains(AccessType::WRITE) {
            parts.push("Write");
        }
        if self.contains(AccessType::ACTION) {
            parts.push("Action");
        }
        if parts.is_empty() {
            f.write_str("None")
        } else {
            f.write_str(&parts.join("|"))
        }
    }
}

// ============================================================================
// 值形状
// ============================================================================

/// Key 声明的值形状
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueShape {
    /// 无值（纯动作）
    Void,
    Bool,
    Long,
    Float,
    String,
    /// JSON 对象
    Struct,
}

// ============================================================================
// Key
// ============================================================================

/// 能力描述
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Key {
    name: &'static str,
    wire_id: u32,
    shape: ValueShape,
    access: AccessType,
}

impl Key {
    pub const fn new(
        name: &'static str,
        wire_id: u32,
        shape: ValueShape,
        access: AccessType,
    ) -> Self {
        Self {
            name,
            wire_id,
            shape,
            access,
        }
    }

    pub const fn name(&self) -> &'static str {
        self.name
    }

    pub const fn wire_id(&self) -> u32 {
        self.wire_id
    }

    pub const fn shape(&self) -> ValueShape {
        self.shape
    }

    pub const fn access(&self) -> AccessType {
        self.access
    }

    /// 组件编号（wire id 高 8 位）
    pub const fn component(&self) -> u8 {
        (self.wire_id >> 24) as u8
    }

    /// 组件内序号（wire id 低 24 位）
    pub const fn index(&self) -> u32 {
        self.wire_id & 0x00FF_FFFF
    }

    pub const fn allows(&self, required: AccessType) -> bool {
        self.access.contains(required)
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}

/// 由组件编号和序号计算 wire id
pub const fn wire_id(component: u8, index: u32) -> u32 {
    ((component as u32) << 24) | (index & 0x00FF_FFFF)
}

// ============================================================================
// 内置目录
// ============================================================================

/// 组件编号
pub mod component {
    pub const CAMERA: u8 = 1;
    pub const MAIN_CONTROLLER: u8 = 2;
    pub const GIMBAL: u8 = 4;
    pub const ROBOMASTER_SYSTEM: u8 = 5;
    pub const WIFI_LINK: u8 = 6;
    pub const AIR_LINK: u8 = 7;
    pub const ARMOR: u8 = 8;
    pub const BATTERY: u8 = 11;
}

const R: AccessType = AccessType::READ;
const W: AccessType = AccessType::WRITE;
const A: AccessType = AccessType::ACTION;
const RW: AccessType = AccessType::READ.union(AccessType::WRITE);

macro_rules! define_keys {
    ($($ident:ident = ($name:literal, $component:expr, $index:literal, $shape:ident, $access:expr);)*) => {
        $(
            pub const $ident: Key = Key::new($name, wire_id($component, $index), ValueShape::$shape, $access);
        )*

        /// 内置目录中的全部 Key
        pub const BUILTIN_KEYS: &[Key] = &[$($ident),*];
    };
}

use component::*;

define_keys! {
    CAMERA_CONNECTION = ("CameraConnection", CAMERA, 1, Bool, R);
    CAMERA_FIRMWARE_VERSION = ("CameraFirmwareVersion", CAMERA, 2, String, R);
    CAMERA_START_SHOOT_PHOTO = ("CameraStartShootPhoto", CAMERA, 3, Void, A);
    CAMERA_IS_SHOOTING_PHOTO = ("CameraIsShootingPhoto", CAMERA, 4, Bool, R);
    CAMERA_START_RECORD_VIDEO = ("CameraStartRecordVideo", CAMERA, 6, Void, A);
    CAMERA_STOP_RECORD_VIDEO = ("CameraStopRecordVideo", CAMERA, 7, Void, A);
    CAMERA_IS_RECORDING = ("CameraIsRecording", CAMERA, 8, Bool, R);
    CAMERA_DIGITAL_ZOOM_FACTOR = ("CameraDigitalZoomFactor", CAMERA, 12, Float, RW);
    CAMERA_VIDEO_TRANS_RATE = ("CameraVideoTransRate", CAMERA, 29, Float, RW);

    MAIN_CONTROLLER_CONNECTION = ("MainControllerConnection", MAIN_CONTROLLER, 1, Bool, R);
    MAIN_CONTROLLER_FIRMWARE_VERSION = ("MainControllerFirmwareVersion", MAIN_CONTROLLER, 2, String, R);
    MAIN_CONTROLLER_VIRTUAL_STICK = ("MainControllerVirtualStick", MAIN_CONTROLLER, 4, Long, A);
    MAIN_CONTROLLER_VIRTUAL_STICK_ENABLED = ("MainControllerVirtualStickEnabled", MAIN_CONTROLLER, 5, Bool, RW);
    MAIN_CONTROLLER_CHASSIS_SPEED_MODE = ("MainControllerChassisSpeedMode", MAIN_CONTROLLER, 6, Long, RW);
    MAIN_CONTROLLER_CHASSIS_FOLLOW_MODE = ("MainControllerChassisFollowMode", MAIN_CONTROLLER, 7, Long, RW);
    MAIN_CONTROLLER_CHASSIS_CAR_CONTROL_MODE = ("MainControllerChassisCarControlMode", MAIN_CONTROLLER, 8, Long, RW);
    MAIN_CONTROLLER_CHASSIS_POSITION = ("MainControllerChassisPosition", MAIN_CONTROLLER, 30, Struct, R);
    MAIN_CONTROLLER_WHEEL_SPEED = ("MainControllerWheelSpeed", MAIN_CONTROLLER, 31, Struct, R);
    ROBOMASTER_CHASSIS_SPEED = ("RobomasterChassisSpeed", MAIN_CONTROLLER, 42, Struct, R);
    ROBOMASTER_OPEN_CHASSIS_SPEED_UPDATES = ("RobomasterOpenChassisSpeedUpdates", MAIN_CONTROLLER, 43, Void, A);
    ROBOMASTER_CLOSE_CHASSIS_SPEED_UPDATES = ("RobomasterCloseChassisSpeedUpdates", MAIN_CONTROLLER, 44, Void, A);

    GIMBAL_CONNECTION = ("GimbalConnection", GIMBAL, 1, Bool, R);
    GIMBAL_FIRMWARE_VERSION = ("GimbalFirmwareVersion", GIMBAL, 3, String, R);
    GIMBAL_WORK_MODE = ("GimbalWorkMode", GIMBAL, 4, Long, RW);
    GIMBAL_CONTROL_MODE = ("GimbalControlMode", GIMBAL, 5, Long, RW);
    GIMBAL_RESET_POSITION = ("GimbalResetPosition", GIMBAL, 6, Void, A);
    GIMBAL_ANGLE_INCREMENT_ROTATION = ("GimbalAngleIncrementRotation", GIMBAL, 11, Struct, A);
    GIMBAL_ANGLE_FRONT_YAW_ROTATION = ("GimbalAngleFrontYawRotation", GIMBAL, 12, Struct, A);
    GIMBAL_ANGLE_FRONT_PITCH_ROTATION = ("GimbalAngleFrontPitchRotation", GIMBAL, 13, Struct, A);
    GIMBAL_ATTITUDE = ("GimbalAttitude", GIMBAL, 14, Struct, R);
    GIMBAL_OPEN_ATTITUDE_UPDATES = ("GimbalOpenAttitudeUpdates", GIMBAL, 18, Void, A);
    GIMBAL_CLOSE_ATTITUDE_UPDATES = ("GimbalCloseAttitudeUpdates", GIMBAL, 19, Void, A);

    ROBOMASTER_SYSTEM_CONNECTION = ("RobomasterSystemConnection", ROBOMASTER_SYSTEM, 1, Bool, R);
    ROBOMASTER_SYSTEM_FIRMWARE_VERSION = ("RobomasterSystemFirmwareVersion", ROBOMASTER_SYSTEM, 2, String, R);
    ROBOMASTER_SYSTEM_SERIAL_NUMBER = ("RobomasterSystemSerialNumber", ROBOMASTER_SYSTEM, 5, String, R);
    ROBOMASTER_SYSTEM_SOUND_ENABLED = ("RobomasterSystemSoundEnabled", ROBOMASTER_SYSTEM, 19, Bool, RW);
    ROBOMASTER_SYSTEM_LED_COLOR = ("RobomasterSystemLEDColor", ROBOMASTER_SYSTEM, 22, Long, W);
    ROBOMASTER_SYSTEM_FUNCTION_ENABLE = ("RobomasterSystemFunctionEnable", ROBOMASTER_SYSTEM, 40, Struct, W);
    ROBOMASTER_SYSTEM_SPEAKER_VOLUME = ("RobomasterSystemSpeakerVolumn", ROBOMASTER_SYSTEM, 41, Long, RW);
    ROBOMASTER_SYSTEM_PLAY_SOUND = ("RobomasterSystemPlaySound", ROBOMASTER_SYSTEM, 42, Long, A);

    WIFI_LINK_SSID = ("WiFiLinkSSID", WIFI_LINK, 1, String, RW);
    WIFI_LINK_SNR = ("WiFiLinkSNR", WIFI_LINK, 2, Long, R);

    AIR_LINK_CONNECTION = ("AirLinkConnection", AIR_LINK, 1, Bool, R);
    AIR_LINK_SIGNAL_QUALITY = ("AirLinkSignalQuality", AIR_LINK, 2, Long, R);

    ARMOR_HIT_EVENT = ("ArmorHitEvent", ARMOR, 1, Struct, R);

    BATTERY_POWER_PERCENT = ("BatteryPowerPercent", BATTERY, 1, Long, R);
    BATTERY_VOLTAGE = ("BatteryVoltage", BATTERY, 2, Long, R);
    BATTERY_TEMPERATURE = ("BatteryTemperature", BATTERY, 3, Long, R);
}

// ============================================================================
// 注册表
// ============================================================================

/// Key 注册表（按 wire id 和名称双向查找）
#[derive(Debug, Clone, Default)]
pub struct KeyRegistry {
    by_wire_id: HashMap<u32, Key>,
    by_name: HashMap<&'static str, Key>,
}

impl KeyRegistry {
    /// 从 Key 列表构建注册表
    ///
    /// # 错误
    ///
    /// 两个 Key 使用相同的 wire id 或名称时返回 `ProtocolError::DuplicateKey`。
    pub fn new(keys: impl IntoIterator<Item = Key>) -> Result<Self, ProtocolError> {
        let mut registry = Self::default();
        for key in keys {
            if registry.by_wire_id.insert(key.wire_id, key).is_some()
                || registry.by_name.insert(key.name, key).is_some()
            {
                return Err(ProtocolError::DuplicateKey {
                    wire_id: key.wire_id,
                });
            }
        }
        Ok(registry)
    }

    /// 内置目录（进程内只构建一次）
    pub fn builtin() -> &'static KeyRegistry {
        static BUILTIN: OnceLock<KeyRegistry> = OnceLock::new();
        BUILTIN.get_or_init(|| {
            let mut registry = KeyRegistry::default();
            for key in BUILTIN_KEYS {
                registry.by_wire_id.insert(key.wire_id, *key);
                registry.by_name.insert(key.name, *key);
            }
            registry
        })
    }

    /// 按 wire id 查找
    pub fn by_wire_id(&self, wire_id: u32) -> Result<Key, ProtocolError> {
        self.by_wire_id
            .get(&wire_id)
            .copied()
            .ok_or_else(|| ProtocolError::UnknownKey(format!("0x{wire_id:08X}")))
    }

    /// 按名称查找（区分大小写）
    pub fn by_name(&self, name: &str) -> Result<Key, ProtocolError> {
        self.by_name
            .get(name)
            .copied()
            .ok_or_else(|| ProtocolError::UnknownKey(name.to_string()))
    }

    pub fn len(&self) -> usize {
        self.by_wire_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_wire_id.is_empty()
    }

    /// 按 wire id 升序遍历
    pub fn iter(&self) -> impl Iterator<Item = Key> + '_ {
        let mut keys: Vec<Key> = self.by_wire_id.values().copied().collect();
        keys.sort_by_key(|k| k.wire_id);
        keys.into_iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_access_type() {
        let rw = AccessType::READ | AccessType::WRITE;
        assert!(rw.contains(AccessType::READ));
        assert!(rw.contains(AccessType::WRITE));
        assert!(!rw.contains(AccessType::ACTION));
        assert_eq!(rw.bits(), 3);
        assert_eq!(format!("{}", rw), "Read|Write");
        assert_eq!(format!("{}", AccessType::NONE), "None");
        assert_eq!(AccessType::from_bits(0xFF).bits(), 7);
    }

    #[test]
    fn test_air_link_connection_wire_id() {
        assert_eq!(AIR_LINK_CONNECTION.wire_id(), 117440513);
        assert_eq!(AIR_LINK_CONNECTION.component(), component::AIR_LINK);
        assert_eq!(AIR_LINK_CONNECTION.index(), 1);
        assert!(AIR_LINK_CONNECTION.allows(AccessType::READ));
        assert!(!AIR_LINK_CONNECTION.allows(AccessType::WRITE));
    }

    #[test]
    fn test_builtin_registry_is_consistent() {
        let registry = KeyRegistry::builtin();
        assert_eq!(registry.len(), BUILTIN_KEYS.len());

        // 内置目录无重复
        assert!(KeyRegistry::new(BUILTIN_KEYS.iter().copied()).is_ok());

        for key in BUILTIN_KEYS {
            assert_eq!(registry.by_wire_id(key.wire_id()).unwrap(), *key);
            assert_eq!(registry.by_name(key.name()).unwrap(), *key);
        }
    }

    #[test]
    fn test_registry_lookup_miss() {
        let registry = KeyRegistry::builtin();
        assert_eq!(
            registry.by_name("NoSuchKey"),
            Err(ProtocolError::UnknownKey("NoSuchKey".to_string()))
        );
        assert!(registry.by_wire_id(0xDEAD_BEEF).is_err());
    }

    #[test]
    fn test_registry_rejects_duplicates() {
        let a = Key::new("A", 7, ValueShape::Bool, AccessType::READ);
        let b = Key::new("B", 7, ValueShape::Long, AccessType::WRITE);
        assert_eq!(
            KeyRegistry::new([a, b]).unwrap_err(),
            ProtocolError::DuplicateKey { wire_id: 7 }
        );
    }

    #[test]
    fn test_registry_iter_sorted() {
        let registry = KeyRegistry::new([
            Key::new("B", 9, ValueShape::Bool, AccessType::READ),
            Key::new("A", 7, ValueShape::Bool, AccessType::READ),
        ])
        .unwrap();
        let ids: Vec<u32> = registry.iter().map(|k| k.wire_id()).collect();
        assert_eq!(ids, vec![7, 9]);
    }
}
