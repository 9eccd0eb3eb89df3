/// 观测数据定义
///
/// 代理上报的原始消息在这里被解析成强类型的 [`Observation`]，
/// 遥测字段（电量、温度）放在独立的 [`Telemetry`] 中。

use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use chrono::DateTime;
use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::ObservationError;

static MAC_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[0-9A-Fa-f]{12}$").expect("MAC 正则表达式合法"));

/// Apple 公司 ID（iBeacon 帧所在的厂商数据）
pub const APPLE_COMPANY_ID: u16 = 0x004C;

// ============================================================================
// MAC 地址
// ============================================================================

/// 规范化的 6 字节 MAC 地址，显示为 AA:BB:CC:DD:EE:FF
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MacAddress([u8; 6]);

impl MacAddress {
    pub fn new(bytes: [u8; 6]) -> Self {
        MacAddress(bytes)
    }

    /// 解析 MAC 地址，接受冒号、短横线分隔或无分隔的 12 位十六进制，大小写不敏感
    pub fn parse(input: &str) -> Result<Self, ObservationError> {
        let compact: String = input.trim().chars().filter(|c| *c != ':' && *c != '-').collect();
        if !MAC_PATTERN.is_match(&compact) {
            return Err(ObservationError::InvalidMac(input.to_string()));
        }

        let mut bytes = [0u8; 6];
        for (i, byte) in bytes.iter_mut().enumerate() {
            *byte = u8::from_str_radix(&compact[i * 2..i * 2 + 2], 16)
                .map_err(|_| ObservationError::InvalidMac(input.to_string()))?;
        }
        Ok(MacAddress(bytes))
    }

    pub fn bytes(&self) -> [u8; 6] {
        self.0
    }

    /// 末 3 字节，用于生成默认名称（如 "Beacon DDEEFF"）
    pub fn short_suffix(&self) -> String {
        format!("{:02X}{:02X}{:02X}", self.0[3], self.0[4], self.0[5])
    }
}

impl fmt::Display for MacAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let b = self.0;
        write!(
            f,
            "{:02X}:{:02X}:{:02X}:{:02X}:{:02X}:{:02X}",
            b[0], b[1], b[2], b[3], b[4], b[5]
        )
    }
}

impl FromStr for MacAddress {
    type Err = ObservationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        MacAddress::parse(s)
    }
}

impl Serialize for MacAddress {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for MacAddress {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        MacAddress::parse(&s).map_err(serde::de::Error::custom)
    }
}

// ============================================================================
// 广播元数据与遥测
// ============================================================================

/// 广播元数据（用于信标类型识别和发现过滤）
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AdvertisementMetadata {
    /// iBeacon proximity UUID
    pub uuid: Option<String>,
    pub major: Option<u16>,
    pub minor: Option<u16>,
    /// 广播中携带的 1 米参考功率
    pub tx_power: Option<i16>,
    pub manufacturer_id: Option<u16>,
    pub service_uuids: Vec<String>,
    /// Eddystone-UID 命名空间
    pub namespace: Option<String>,
    pub local_name: Option<String>,
}

impl AdvertisementMetadata {
    /// 从厂商数据解析
    ///
    /// Apple iBeacon 帧格式：0x02 0x15 <UUID 16 字节> <major 2> <minor 2> <tx 1>
    pub fn from_manufacturer_data(manufacturer_id: u16, data: &[u8]) -> Self {
        let mut metadata = AdvertisementMetadata {
            manufacturer_id: Some(manufacturer_id),
            ..Default::default()
        };

        if manufacturer_id == APPLE_COMPANY_ID && data.len() >= 23 && data[0] == 0x02 && data[1] == 0x15 {
            metadata.uuid = Some(format_uuid(&data[2..18]));
            metadata.major = Some(u16::from_be_bytes([data[18], data[19]]));
            metadata.minor = Some(u16::from_be_bytes([data[20], data[21]]));
            metadata.tx_power = Some(data[22] as i8 as i16);
        }
        metadata
    }

    /// 用较新的元数据覆盖已设置的字段
    pub fn merge(&mut self, newer: &AdvertisementMetadata) {
        if newer.uuid.is_some() {
            self.uuid = newer.uuid.clone();
        }
        self.major = newer.major.or(self.major);
        self.minor = newer.minor.or(self.minor);
        self.tx_power = newer.tx_power.or(self.tx_power);
        self.manufacturer_id = newer.manufacturer_id.or(self.manufacturer_id);
        for uuid in &newer.service_uuids {
            if !self.service_uuids.contains(uuid) {
                self.service_uuids.push(uuid.clone());
            }
        }
        if newer.namespace.is_some() {
            self.namespace = newer.namespace.clone();
        }
        if newer.local_name.is_some() {
            self.local_name = newer.local_name.clone();
        }
    }

    /// 是否带有 Apple Find My 标识
    pub fn has_find_my_hint(&self) -> bool {
        self.local_name.as_deref().is_some_and(|n| n.contains("FindMy"))
            || self.service_uuids.iter().any(|u| u.contains("FindMy"))
    }
}

fn format_uuid(bytes: &[u8]) -> String {
    let hex: String = bytes.iter().map(|b| format!("{:02x}", b)).collect();
    format!(
        "{}-{}-{}-{}-{}",
        &hex[0..8],
        &hex[8..12],
        &hex[12..16],
        &hex[16..20],
        &hex[20..32]
    )
}

/// 可选遥测数据
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Telemetry {
    /// 电量百分比
    pub battery: Option<f64>,
    /// 温度（摄氏度）
    pub temperature: Option<f64>,
}

impl Telemetry {
    fn from_parts(battery: Option<f64>, temperature: Option<f64>) -> Option<Self> {
        if battery.is_none() && temperature.is_none() {
            None
        } else {
            Some(Telemetry { battery, temperature })
        }
    }
}

// ============================================================================
// 观测
// ============================================================================

/// 一次观测：某个代理在某时刻听到某信标的 RSSI
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    pub beacon_id: MacAddress,
    pub proxy_id: String,
    /// 信号强度 (dBm)
    pub rssi: i16,
    /// 时间戳（秒，单调时钟或 Unix 纪元）
    pub timestamp: f64,
    #[serde(default)]
    pub metadata: AdvertisementMetadata,
    #[serde(default)]
    pub telemetry: Option<Telemetry>,
}

impl Observation {
    pub fn new(beacon_id: MacAddress, proxy_id: impl Into<String>, rssi: i16, timestamp: f64) -> Self {
        Observation {
            beacon_id,
            proxy_id: proxy_id.into(),
            rssi,
            timestamp,
            metadata: AdvertisementMetadata::default(),
            telemetry: None,
        }
    }

    pub fn with_metadata(mut self, metadata: AdvertisementMetadata) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn with_telemetry(mut self, telemetry: Telemetry) -> Self {
        self.telemetry = Some(telemetry);
        self
    }

    /// 解析代理上报的 JSON 载荷
    ///
    /// 载荷中没有时间戳或时间戳无法解析时使用 `received_at`。
    pub fn from_json(proxy_id: &str, json: &str, received_at: f64) -> Result<Self, ObservationError> {
        let payload: ObservationPayload = serde_json::from_str(json)?;
        payload.into_observation(proxy_id, received_at)
    }
}

/// 代理上报的 JSON 载荷
#[derive(Clone, Debug, Default, Deserialize)]
pub struct ObservationPayload {
    pub beacon_mac: Option<String>,
    pub rssi: Option<i16>,
    pub timestamp: Option<String>,
    pub uuid: Option<String>,
    pub major: Option<u16>,
    pub minor: Option<u16>,
    pub tx_power: Option<i16>,
    pub manufacturer_id: Option<u16>,
    #[serde(default)]
    pub service_uuids: Vec<String>,
    pub namespace: Option<String>,
    pub name: Option<String>,
    pub battery: Option<f64>,
    pub temperature: Option<f64>,
}

impl ObservationPayload {
    pub fn into_observation(self, proxy_id: &str, received_at: f64) -> Result<Observation, ObservationError> {
        let mac = self
            .beacon_mac
            .filter(|m| !m.is_empty())
            .ok_or(ObservationError::MissingField("beacon_mac"))?;
        let rssi = self.rssi.ok_or(ObservationError::MissingField("rssi"))?;

        let timestamp = self
            .timestamp
            .as_deref()
            .and_then(parse_timestamp)
            .unwrap_or(received_at);

        Ok(Observation {
            beacon_id: MacAddress::parse(&mac)?,
            proxy_id: proxy_id.to_string(),
            rssi,
            timestamp,
            metadata: AdvertisementMetadata {
                uuid: self.uuid,
                major: self.major,
                minor: self.minor,
                tx_power: self.tx_power,
                manufacturer_id: self.manufacturer_id,
                service_uuids: self.service_uuids,
                namespace: self.namespace,
                local_name: self.name,
            },
            telemetry: Telemetry::from_parts(self.battery, self.temperature),
        })
    }
}

/// 解析 RFC 3339 时间戳为 Unix 秒（含小数部分）
pub fn parse_timestamp(value: &str) -> Option<f64> {
    let normalized = match value.strip_suffix('Z') {
        Some(stripped) => format!("{}+00:00", stripped),
        None => value.to_string(),
    };
    let dt = DateTime::parse_from_rfc3339(&normalized).ok()?;
    Some(dt.timestamp() as f64 + dt.timestamp_subsec_nanos() as f64 / 1e9)
}

/// 从主题中取代理 ID（最后一段），如 "ble-triangulation/living_room"
pub fn proxy_id_from_topic(topic: &str) -> Result<&str, ObservationError> {
    let mut parts = topic.rsplit('/');
    match (parts.next(), parts.next()) {
        (Some(last), Some(_)) if !last.is_empty() => Ok(last),
        _ => Err(ObservationError::InvalidTopic(topic.to_string())),
    }
}
