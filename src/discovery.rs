/// 信标发现
///
/// 在限时的发现会话中，为尚未纳管的信标累积候选信息，供运维人员审核后纳管。
/// 会话到期既可以由定时器主动触发（[`DiscoveryFilter::expire`]），
/// 也会在下一次访问时被动检查，两条路径重复触发不会产生副作用。

use std::collections::{BTreeSet, HashMap, HashSet};
use std::fmt;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::ConfigError;
use crate::observation::{APPLE_COMPANY_ID, AdvertisementMetadata, MacAddress, Observation};

/// RSSI 历史最多保留的样本数
pub const RSSI_HISTORY_LEN: usize = 10;
/// 候选信标需在此时间窗口（秒）内出现过才会被列出
pub const RECENTLY_SEEN_SECS: f64 = 10.0;

const RUUVI_COMPANY_ID: u16 = 0x0499;
const TILE_COMPANY_ID: u16 = 0x0099;
const ALTBEACON_COMPANY_ID: u16 = 0x0118;
const XIAOMI_SERVICE_UUID: &str = "0000fe95-0000-1000-8000-00805f9b34fb";

static IBEACON_UUID: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^[0-9a-f]{8}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{12}$")
        .expect("UUID 正则表达式合法")
});

/// 发现过滤条件
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DiscoveryFilters {
    /// 非空时只接受列表中的 UUID
    pub include_uuids: Vec<String>,
    pub exclude_uuids: Vec<String>,
    /// 距离门限：RSSI 低于该值（更弱）的观测被忽略
    pub min_rssi: i16,
    pub min_proxy_count: usize,
    pub min_detection_count: u32,
}

impl Default for DiscoveryFilters {
    fn default() -> Self {
        DiscoveryFilters {
            include_uuids: Vec::new(),
            exclude_uuids: Vec::new(),
            min_rssi: -70,
            min_proxy_count: 1,
            min_detection_count: 3,
        }
    }
}

impl DiscoveryFilters {
    fn accepts_uuid(&self, uuid: Option<&str>) -> bool {
        match uuid {
            Some(uuid) if !uuid.is_empty() => {
                let included = self.include_uuids.is_empty()
                    || self.include_uuids.iter().any(|u| u.eq_ignore_ascii_case(uuid));
                let excluded = self.exclude_uuids.iter().any(|u| u.eq_ignore_ascii_case(uuid));
                included && !excluded
            }
            _ => true,
        }
    }
}

/// 信标类型（根据广播元数据尽力识别）
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BeaconType {
    IBeacon,
    Eddystone,
    Ruuvi,
    Tile,
    AltBeacon,
    AirTag,
    Xiaomi,
    #[default]
    Unknown,
}

impl BeaconType {
    /// 识别顺序：iBeacon → Eddystone → 厂商 ID → 小米服务 UUID
    pub fn detect(metadata: &AdvertisementMetadata) -> Self {
        if let (Some(uuid), Some(_), Some(_)) = (&metadata.uuid, metadata.major, metadata.minor) {
            if IBEACON_UUID.is_match(uuid) {
                return BeaconType::IBeacon;
            }
        }

        if metadata.namespace.is_some() {
            return BeaconType::Eddystone;
        }

        match metadata.manufacturer_id {
            Some(RUUVI_COMPANY_ID) => return BeaconType::Ruuvi,
            Some(TILE_COMPANY_ID) => return BeaconType::Tile,
            Some(ALTBEACON_COMPANY_ID) => return BeaconType::AltBeacon,
            Some(APPLE_COMPANY_ID) if metadata.has_find_my_hint() => return BeaconType::AirTag,
            _ => {}
        }

        if metadata
            .service_uuids
            .iter()
            .any(|u| u.eq_ignore_ascii_case(XIAOMI_SERVICE_UUID))
        {
            return BeaconType::Xiaomi;
        }

        BeaconType::Unknown
    }
}

impl fmt::Display for BeaconType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            BeaconType::IBeacon => "ibeacon",
            BeaconType::Eddystone => "eddystone",
            BeaconType::Ruuvi => "ruuvi",
            BeaconType::Tile => "tile",
            BeaconType::AltBeacon => "altbeacon",
            BeaconType::AirTag => "airtag",
            BeaconType::Xiaomi => "xiaomi",
            BeaconType::Unknown => "unknown",
        };
        write!(f, "{}", name)
    }
}

#[derive(Clone, Debug)]
struct Candidate {
    first_seen: f64,
    last_seen: f64,
    count: u32,
    rssi_values: Vec<i16>,
    proxies: BTreeSet<String>,
    beacon_type: BeaconType,
    metadata: AdvertisementMetadata,
}

impl Candidate {
    fn average_rssi(&self) -> f64 {
        if self.rssi_values.is_empty() {
            return -100.0;
        }
        self.rssi_values.iter().map(|&r| r as f64).sum::<f64>() / self.rssi_values.len() as f64
    }
}

/// 发现列表中的一项
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DiscoveredBeacon {
    pub beacon_id: MacAddress,
    pub beacon_type: BeaconType,
    pub average_rssi: f64,
    pub count: u32,
    pub proxy_count: usize,
    pub proxies: Vec<String>,
    pub first_seen: f64,
    pub last_seen: f64,
    pub metadata: AdvertisementMetadata,
}

/// 发现过滤器
#[derive(Clone, Debug, Default)]
pub struct DiscoveryFilter {
    filters: DiscoveryFilters,
    onboarded: HashSet<MacAddress>,
    candidates: HashMap<MacAddress, Candidate>,
    session_end: Option<f64>,
}

impl DiscoveryFilter {
    pub fn new(filters: DiscoveryFilters) -> Self {
        DiscoveryFilter {
            filters,
            ..Default::default()
        }
    }

    pub fn filters(&self) -> &DiscoveryFilters {
        &self.filters
    }

    pub fn set_filters(&mut self, filters: DiscoveryFilters) {
        info!(
            min_rssi = filters.min_rssi,
            min_proxy_count = filters.min_proxy_count,
            min_detection_count = filters.min_detection_count,
            "发现过滤条件已更新"
        );
        self.filters = filters;
    }

    // ------------------------------------------------------------------
    // 纳管集合
    // ------------------------------------------------------------------

    pub fn onboard(&mut self, beacon_id: MacAddress) {
        self.candidates.remove(&beacon_id);
        self.onboarded.insert(beacon_id);
    }

    pub fn remove_onboarded(&mut self, beacon_id: &MacAddress) -> bool {
        self.onboarded.remove(beacon_id)
    }

    pub fn is_onboarded(&self, beacon_id: &MacAddress) -> bool {
        self.onboarded.contains(beacon_id)
    }

    pub fn onboarded(&self) -> impl Iterator<Item = &MacAddress> {
        self.onboarded.iter()
    }

    // ------------------------------------------------------------------
    // 会话控制
    // ------------------------------------------------------------------

    /// 开始一次发现会话，清空上一轮的候选
    pub fn start_session(&mut self, now: f64, duration_secs: u64) -> Result<(), ConfigError> {
        if duration_secs == 0 {
            return Err(ConfigError::ZeroDiscoveryDuration);
        }
        self.candidates.clear();
        self.session_end = Some(now + duration_secs as f64);
        info!(duration_secs, "发现会话开始");
        Ok(())
    }

    pub fn stop_session(&mut self) {
        if self.session_end.take().is_some() {
            info!(found = self.candidates.len(), "发现会话结束");
        }
    }

    /// 延长当前会话；没有进行中的会话（包括已过硬截止时间的会话）时返回 false
    pub fn extend_session(&mut self, now: f64, additional_secs: u64) -> bool {
        self.expire(now);
        match self.session_end.as_mut() {
            Some(end) => {
                *end += additional_secs as f64;
                info!(additional_secs, "发现会话已延长");
                true
            }
            None => false,
        }
    }

    /// 到期检查，会话在本次调用中结束时返回 true
    pub fn expire(&mut self, now: f64) -> bool {
        match self.session_end {
            Some(end) if now > end => {
                self.stop_session();
                true
            }
            _ => false,
        }
    }

    pub fn is_active(&mut self, now: f64) -> bool {
        self.expire(now);
        self.session_end.is_some()
    }

    /// 会话剩余秒数
    pub fn remaining(&mut self, now: f64) -> Option<f64> {
        self.expire(now);
        self.session_end.map(|end| (end - now).max(0.0))
    }

    // ------------------------------------------------------------------
    // 过滤与累积
    // ------------------------------------------------------------------

    /// 判断一次观测是否应当被处理
    ///
    /// 已纳管信标总是通过；其余信标只有在会话进行中、信号不弱于门限、
    /// 且 UUID 满足包含/排除列表时才通过。
    pub fn should_process(
        &mut self,
        beacon_id: &MacAddress,
        rssi: i16,
        metadata: &AdvertisementMetadata,
        now: f64,
    ) -> bool {
        if self.is_onboarded(beacon_id) {
            return true;
        }

        if !self.is_active(now) {
            debug!(beacon = %beacon_id, "未纳管且不在发现会话中，忽略");
            return false;
        }

        if rssi < self.filters.min_rssi {
            debug!(beacon = %beacon_id, rssi, min_rssi = self.filters.min_rssi, "信号弱于发现门限");
            return false;
        }

        if !self.filters.accepts_uuid(metadata.uuid.as_deref()) {
            debug!(beacon = %beacon_id, "UUID 未通过过滤");
            return false;
        }

        true
    }

    /// 将观测记入候选列表（仅在会话进行中生效）
    pub fn record(&mut self, observation: &Observation, now: f64) -> bool {
        if !self.is_active(now) {
            return false;
        }

        let candidate = self
            .candidates
            .entry(observation.beacon_id)
            .or_insert_with(|| Candidate {
                first_seen: now,
                last_seen: now,
                count: 0,
                rssi_values: Vec::with_capacity(RSSI_HISTORY_LEN),
                proxies: BTreeSet::new(),
                beacon_type: BeaconType::detect(&observation.metadata),
                metadata: observation.metadata.clone(),
            });

        candidate.last_seen = now;
        candidate.count += 1;
        candidate.rssi_values.push(observation.rssi);
        if candidate.rssi_values.len() > RSSI_HISTORY_LEN {
            let excess = candidate.rssi_values.len() - RSSI_HISTORY_LEN;
            candidate.rssi_values.drain(..excess);
        }
        candidate.proxies.insert(observation.proxy_id.clone());
        candidate.metadata.merge(&observation.metadata);
        if candidate.beacon_type == BeaconType::Unknown {
            candidate.beacon_type = BeaconType::detect(&candidate.metadata);
        }

        debug!(
            beacon = %observation.beacon_id,
            count = candidate.count,
            proxies = candidate.proxies.len(),
            "记录候选信标"
        );
        true
    }

    /// 满足条件的候选信标，按平均 RSSI 从强到弱排序
    pub fn discovered(&self, now: f64) -> Vec<DiscoveredBeacon> {
        let mut result: Vec<DiscoveredBeacon> = self
            .candidates
            .iter()
            .filter(|(_, c)| c.count >= self.filters.min_detection_count)
            .filter(|(_, c)| c.proxies.len() >= self.filters.min_proxy_count)
            .filter(|(_, c)| now - c.last_seen <= RECENTLY_SEEN_SECS)
            .map(|(beacon_id, c)| DiscoveredBeacon {
                beacon_id: *beacon_id,
                beacon_type: c.beacon_type,
                average_rssi: c.average_rssi(),
                count: c.count,
                proxy_count: c.proxies.len(),
                proxies: c.proxies.iter().cloned().collect(),
                first_seen: c.first_seen,
                last_seen: c.last_seen,
                metadata: c.metadata.clone(),
            })
            .collect();

        result.sort_by(|a, b| b.average_rssi.total_cmp(&a.average_rssi));
        result
    }

    pub fn candidate_count(&self) -> usize {
        self.candidates.len()
    }
}
