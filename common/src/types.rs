use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Power {
    Off,
    On,
}

impl Power {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Off => "OFF",
            Self::On => "ON",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_uppercase().as_str() {
            "ON" => Some(Self::On),
            "OFF" => Some(Self::Off),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Mode {
    Auto,
    Cool,
    Dry,
    Heat,
    Fan,
}

impl Mode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Auto => "AUTO",
            Self::Cool => "COOL",
            Self::Dry => "DRY",
            Self::Heat => "HEAT",
            Self::Fan => "FAN",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_uppercase().as_str() {
            "AUTO" => Some(Self::Auto),
            "COOL" => Some(Self::Cool),
            "DRY" => Some(Self::Dry),
            "HEAT" => Some(Self::Heat),
            "FAN" => Some(Self::Fan),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FanSpeed {
    #[serde(rename = "AUTO")]
    Auto,
    #[serde(rename = "QUIET")]
    Quiet,
    #[serde(rename = "1")]
    Speed1,
    #[serde(rename = "2")]
    Speed2,
    #[serde(rename = "3")]
    Speed3,
    #[serde(rename = "4")]
    Speed4,
}

impl FanSpeed {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Auto => "AUTO",
            Self::Quiet => "QUIET",
            Self::Speed1 => "1",
            Self::Speed2 => "2",
            Self::Speed3 => "3",
            Self::Speed4 => "4",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_uppercase().as_str() {
            "AUTO" => Some(Self::Auto),
            "QUIET" => Some(Self::Quiet),
            "1" => Some(Self::Speed1),
            "2" => Some(Self::Speed2),
            "3" => Some(Self::Speed3),
            "4" => Some(Self::Speed4),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Vane {
    #[serde(rename = "AUTO")]
    Auto,
    #[serde(rename = "1")]
    Position1,
    #[serde(rename = "2")]
    Position2,
    #[serde(rename = "3")]
    Position3,
    #[serde(rename = "4")]
    Position4,
    #[serde(rename = "5")]
    Position5,
    #[serde(rename = "SWING")]
    Swing,
}

impl Vane {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Auto => "AUTO",
            Self::Position1 => "1",
            Self::Position2 => "2",
            Self::Position3 => "3",
            Self::Position4 => "4",
            Self::Position5 => "5",
            Self::Swing => "SWING",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_uppercase().as_str() {
            "AUTO" => Some(Self::Auto),
            "1" => Some(Self::Position1),
            "2" => Some(Self::Position2),
            "3" => Some(Self::Position3),
            "4" => Some(Self::Position4),
            "5" => Some(Self::Position5),
            "SWING" => Some(Self::Swing),
            _ => None,
        }
    }
}

// Wire names mirror the unit's remote-control glyphs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WideVane {
    #[serde(rename = "<<")]
    FullLeft,
    #[serde(rename = "<")]
    Left,
    #[serde(rename = "|")]
    Center,
    #[serde(rename = ">")]
    Right,
    #[serde(rename = ">>")]
    FullRight,
    #[serde(rename = "<>")]
    Split,
    #[serde(rename = "SWING")]
    Swing,
}

impl WideVane {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::FullLeft => "<<",
            Self::Left => "<",
            Self::Center => "|",
            Self::Right => ">",
            Self::FullRight => ">>",
            Self::Split => "<>",
            Self::Swing => "SWING",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_uppercase().as_str() {
            "<<" => Some(Self::FullLeft),
            "<" => Some(Self::Left),
            "|" => Some(Self::Center),
            ">" => Some(Self::Right),
            ">>" => Some(Self::FullRight),
            "<>" => Some(Self::Split),
            "SWING" => Some(Self::Swing),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TemperatureUnit {
    Celsius,
    Fahrenheit,
}

impl TemperatureUnit {
    pub fn is_fahrenheit(self) -> bool {
        matches!(self, Self::Fahrenheit)
    }

    pub fn scale_str(self) -> &'static str {
        match self {
            Self::Celsius => "C",
            Self::Fahrenheit => "F",
        }
    }
}

/// Last-known settings mirrored from the unit. Temperature is always
/// Celsius internally; display conversion happens at the edges.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HeatPumpSettings {
    pub power: Power,
    pub mode: Mode,
    #[serde(rename = "temperature")]
    pub temperature_c: f32,
    pub fan: FanSpeed,
    pub vane: Vane,
    #[serde(rename = "wideVane")]
    pub wide_vane: WideVane,
}

impl Default for HeatPumpSettings {
    fn default() -> Self {
        Self {
            power: Power::Off,
            mode: Mode::Auto,
            temperature_c: 23.0,
            fan: FanSpeed::Auto,
            vane: Vane::Auto,
            wide_vane: WideVane::Center,
        }
    }
}

/// Operating status reported by the unit. A room temperature of zero means
/// the unit has not produced a reading yet.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct HeatPumpStatus {
    #[serde(rename = "roomTemperature")]
    pub room_temperature_c: f32,
    pub operating: bool,
    #[serde(rename = "compressorFrequency")]
    pub compressor_frequency: u8,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct SettingsSnapshot {
    pub temperature: f32,
    pub fan: &'static str,
    pub vane: &'static str,
    #[serde(rename = "wideVane")]
    pub wide_vane: &'static str,
    pub mode: &'static str,
    pub power: &'static str,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct StatusSnapshot {
    #[serde(rename = "roomTemperature")]
    pub room_temperature: f32,
    #[serde(rename = "compressorFrequency")]
    pub compressor_frequency: u8,
    pub action: bool,
}

/// One flat document sent as the whole body of a collector request.
#[derive(Debug, Clone, PartialEq)]
pub enum OutboundDocument {
    Settings(SettingsSnapshot),
    Status(StatusSnapshot),
    /// Raw packet trace keyed by direction, e.g. {"packetRecv": "fc 42 01 .."}.
    Trace { direction: String, bytes_hex: String },
}

impl OutboundDocument {
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Self::Settings(snapshot) => serde_json::json!(snapshot),
            Self::Status(snapshot) => serde_json::json!(snapshot),
            Self::Trace {
                direction,
                bytes_hex,
            } => {
                let mut map = serde_json::Map::new();
                map.insert(
                    direction.clone(),
                    serde_json::Value::String(bytes_hex.clone()),
                );
                serde_json::Value::Object(map)
            }
        }
    }
}

pub fn hex_byte_string(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 3);
    for (idx, byte) in bytes.iter().enumerate() {
        if idx > 0 {
            out.push(' ');
        }
        out.push_str(&format!("{byte:02x}"));
    }
    out
}
