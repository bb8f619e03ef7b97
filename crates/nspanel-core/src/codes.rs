//! Enumerated codes of the NS Panel protocol.
//!
//! Category and capability codes are open: panel firmware may report codes
//! this build does not know yet, so both carry an `Unknown(code)` variant and
//! round-trip the original string. Permissions and data types are closed.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

macro_rules! open_code {
    (
        $(#[$meta:meta])*
        $name:ident { $( $variant:ident => $code:literal ),+ $(,)? }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(from = "String", into = "String")]
        pub enum $name {
            $( $variant, )+
            /// Code reported by the panel but missing from the bundled taxonomy.
            Unknown(String),
        }

        impl $name {
            /// Every known code, in catalog order.
            pub const KNOWN: &'static [$name] = &[ $( $name::$variant, )+ ];

            /// Wire representation of the code.
            pub fn as_str(&self) -> &str {
                match self {
                    $( $name::$variant => $code, )+
                    $name::Unknown(code) => code.as_str(),
                }
            }

            pub fn is_unknown(&self) -> bool {
                matches!(self, $name::Unknown(_))
            }
        }

        impl From<&str> for $name {
            fn from(code: &str) -> Self {
                match code {
                    $( $code => $name::$variant, )+
                    other => $name::Unknown(other.to_string()),
                }
            }
        }

        impl From<String> for $name {
            fn from(code: String) -> Self {
                match $name::from(code.as_str()) {
                    $name::Unknown(_) => $name::Unknown(code),
                    known => known,
                }
            }
        }

        impl From<$name> for String {
            fn from(code: $name) -> Self {
                match code {
                    $name::Unknown(code) => code,
                    known => known.as_str().to_string(),
                }
            }
        }

        impl FromStr for $name {
            type Err = std::convert::Infallible;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Ok($name::from(s))
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

open_code! {
    /// Display category of a panel device.
    Category {
        Plug => "plug",
        Switch => "switch",
        Light => "light",
        Curtain => "curtain",
        ContactSensor => "contactSensor",
        MotionSensor => "motionSensor",
        TemperatureSensor => "temperatureSensor",
        HumiditySensor => "humiditySensor",
        TemperatureAndHumiditySensor => "temperatureAndHumiditySensor",
        WaterLeakDetector => "waterLeakDetector",
        SmokeDetector => "smokeDetector",
        Button => "button",
        Camera => "camera",
        Sensor => "sensor",
    }
}

open_code! {
    /// Capability code of a single device facet.
    Capability {
        Power => "power",
        Toggle => "toggle",
        Brightness => "brightness",
        ColorTemperature => "color-temperature",
        ColorRgb => "color-rgb",
        Percentage => "percentage",
        MotorControl => "motor-control",
        MotorReverse => "motor-reverse",
        MotorCalibration => "motor-clb",
        Startup => "startup",
        CameraStream => "camera-stream",
        Detect => "detect",
        Humidity => "humidity",
        Temperature => "temperature",
        Battery => "battery",
        Press => "press",
        Rssi => "rssi",
        Identify => "identify",
        IlluminationLevel => "illumination-level",
        ThermostatTargetSetpoint => "thermostat-target-setpoint",
        ThermostatModeDetect => "thermostat-mode-detect",
        Thermostat => "thermostat",
        Voltage => "voltage",
    }
}

/// Access permission of a capability.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Permission {
    #[serde(rename = "read")]
    Read,
    #[serde(rename = "write")]
    Write,
    #[serde(rename = "readWrite")]
    ReadWrite,
}

impl Permission {
    pub fn as_str(&self) -> &'static str {
        match self {
            Permission::Read => "read",
            Permission::Write => "write",
            Permission::ReadWrite => "readWrite",
        }
    }

    /// Whether the panel may query the value.
    pub fn is_readable(&self) -> bool {
        matches!(self, Permission::Read | Permission::ReadWrite)
    }

    /// Whether the panel may change the value.
    pub fn is_writable(&self) -> bool {
        matches!(self, Permission::Write | Permission::ReadWrite)
    }
}

impl FromStr for Permission {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "read" => Ok(Permission::Read),
            "write" => Ok(Permission::Write),
            "readWrite" => Ok(Permission::ReadWrite),
            other => Err(other.to_string()),
        }
    }
}

impl fmt::Display for Permission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Value data type of a taxonomy attribute or configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataType {
    Bool,
    Char,
    Uchar,
    Short,
    Ushort,
    Int,
    Uint,
    Float,
    String,
    Enum,
    Switch,
    Button,
}

impl DataType {
    pub fn is_numeric(&self) -> bool {
        matches!(
            self,
            DataType::Char
                | DataType::Uchar
                | DataType::Short
                | DataType::Ushort
                | DataType::Int
                | DataType::Uint
                | DataType::Float
        )
    }

    /// Inclusive bounds of integer types.
    pub fn integer_bounds(&self) -> Option<(i64, i64)> {
        match self {
            DataType::Char => Some((i8::MIN as i64, i8::MAX as i64)),
            DataType::Uchar => Some((0, u8::MAX as i64)),
            DataType::Short => Some((i16::MIN as i64, i16::MAX as i64)),
            DataType::Ushort => Some((0, u16::MAX as i64)),
            DataType::Int => Some((i32::MIN as i64, i32::MAX as i64)),
            DataType::Uint => Some((0, u32::MAX as i64)),
            _ => None,
        }
    }
}
