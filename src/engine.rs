/// 跟踪引擎
///
/// 持有全部跟踪状态的显式注册表：代理坐标、信标跟踪器、区域索引和发现过滤器。
/// 每次摄入观测都返回一个 [`IngestOutcome`]，由调用方决定如何向外发布，
/// 引擎本身不保存任何回调。

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::algorithms::{PositionEstimate, ProxyReference, ProxySet, Triangulator};
use crate::config::{BeaconConfig, BeaconParameters, TrackingConfig};
use crate::discovery::{DiscoveredBeacon, DiscoveryFilter, DiscoveryFilters};
use crate::error::{ConfigError, TrackingError};
use crate::observation::{MacAddress, Observation, Telemetry};
use crate::tracker::{BeaconPosition, BeaconTracker, ZoneChange};
use crate::zones::{Zone, ZoneIndex};

/// 一次摄入后信标的最新状态
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BeaconUpdate {
    pub beacon_id: MacAddress,
    pub proxy_id: String,
    pub rssi: i16,
    /// 本次原始 RSSI 对应的瞬时距离（米）
    pub distance: f64,
    /// 平滑后的位置，从未成功定位过时为 None
    pub position: Option<BeaconPosition>,
    /// 本轮的原始三角定位结果
    pub estimate: Option<PositionEstimate>,
    /// 本轮是否进行了三角定位
    pub triangulated: bool,
    /// 参与本轮定位的代理
    pub source_proxies: Vec<String>,
    pub zone: Option<String>,
    /// 区域归属发生变化时给出
    pub zone_change: Option<ZoneChange>,
    pub telemetry: Option<Telemetry>,
}

/// 摄入结果
#[derive(Clone, Debug, PartialEq)]
pub enum IngestOutcome {
    /// 已纳管信标，状态已更新
    Tracked(BeaconUpdate),
    /// 未纳管信标，已记入发现候选
    Buffered,
    /// 被过滤丢弃
    Dropped,
}

/// 设备状态变化，每次状态切换只报告一次
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum DeviceStatusEvent {
    ProxyOffline { proxy_id: String, last_seen: Option<f64> },
    ProxyOnline { proxy_id: String, last_seen: f64 },
    BeaconMissing { beacon_id: MacAddress, last_seen: Option<f64> },
    BeaconSeen { beacon_id: MacAddress, last_seen: f64 },
}

/// 跟踪引擎
#[derive(Debug)]
pub struct TrackingEngine {
    config: TrackingConfig,
    proxies: ProxySet,
    trackers: HashMap<MacAddress, BeaconTracker>,
    beacon_configs: HashMap<MacAddress, BeaconConfig>,
    zones: ZoneIndex,
    discovery: DiscoveryFilter,
    proxy_last_seen: HashMap<String, f64>,
    beacon_last_seen: HashMap<MacAddress, f64>,
    offline_proxies: HashSet<String>,
    missing_beacons: HashSet<MacAddress>,
}

impl TrackingEngine {
    /// 使用校验过的配置创建引擎
    pub fn new(config: TrackingConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let discovery = DiscoveryFilter::new(config.discovery.clone());
        Ok(TrackingEngine {
            config,
            proxies: ProxySet::new(),
            trackers: HashMap::new(),
            beacon_configs: HashMap::new(),
            zones: ZoneIndex::new(),
            discovery,
            proxy_last_seen: HashMap::new(),
            beacon_last_seen: HashMap::new(),
            offline_proxies: HashSet::new(),
            missing_beacons: HashSet::new(),
        })
    }

    pub fn config(&self) -> &TrackingConfig {
        &self.config
    }

    // ========================================================================
    // 摄入
    // ========================================================================

    /// 处理一次观测
    ///
    /// 已纳管信标：更新读数，可用代理数达到 `min_proxies` 时三角定位、平滑位置并判断区域。
    /// 未纳管信标：发现会话中且通过过滤时记入候选，否则丢弃。
    pub fn ingest_observation(&mut self, observation: &Observation) -> IngestOutcome {
        let now = observation.timestamp;
        let beacon_id = observation.beacon_id;
        if self.proxies.contains(&observation.proxy_id) {
            self.proxy_last_seen.insert(observation.proxy_id.clone(), now);
        }

        if !self
            .discovery
            .should_process(&beacon_id, observation.rssi, &observation.metadata, now)
        {
            return IngestOutcome::Dropped;
        }

        if !self.discovery.is_onboarded(&beacon_id) {
            return if self.discovery.record(observation, now) {
                IngestOutcome::Buffered
            } else {
                IngestOutcome::Dropped
            };
        }

        self.beacon_last_seen.insert(beacon_id, now);

        let params = self.params_for(&beacon_id);
        let tracker = self
            .trackers
            .entry(beacon_id)
            .or_insert_with(|| BeaconTracker::new(beacon_id, params));

        tracker.update_reading(&observation.proxy_id, observation.rssi, now);
        let distance = tracker.signal_model().distance(observation.rssi as f64);

        let distances = tracker.get_proxy_distances(&self.proxies, now);
        let source_proxies: Vec<String> = distances.iter().map(|d| d.proxy_id.clone()).collect();

        let mut estimate = None;
        let mut zone_change = None;

        if distances.len() >= self.config.min_proxies {
            let points: Vec<(f64, f64, f64)> = distances.iter().map(|d| d.point()).collect();
            if let Some(result) = Triangulator::trilaterate(&points) {
                tracker.update_position(result.latitude, result.longitude, result.accuracy, now);

                let zone_id = self
                    .zones
                    .find_containing(result.latitude, result.longitude)
                    .map(|z| z.zone_id.clone());
                zone_change = tracker.set_zone(zone_id);
                if let Some(change) = &zone_change {
                    info!(
                        beacon = %beacon_id,
                        from = change.previous.as_deref().unwrap_or("none"),
                        to = change.current.as_deref().unwrap_or("none"),
                        "信标区域变化"
                    );
                }
                estimate = Some(result);
            }
        } else {
            debug!(
                beacon = %beacon_id,
                available = distances.len(),
                required = self.config.min_proxies,
                "可用代理不足，跳过三角定位"
            );
        }

        IngestOutcome::Tracked(BeaconUpdate {
            beacon_id,
            proxy_id: observation.proxy_id.clone(),
            rssi: observation.rssi,
            distance,
            position: tracker.position(),
            triangulated: estimate.is_some(),
            estimate,
            source_proxies,
            zone: tracker.zone().map(str::to_string),
            zone_change,
            telemetry: observation.telemetry,
        })
    }

    // ========================================================================
    // 代理与区域
    // ========================================================================

    /// 设置或替换代理坐标
    pub fn set_proxy_reference(&mut self, proxy: ProxyReference) -> Result<Option<ProxyReference>, TrackingError> {
        check_coordinates(proxy.latitude, proxy.longitude)?;
        info!(proxy_id = %proxy.proxy_id, latitude = proxy.latitude, longitude = proxy.longitude, "代理坐标已设置");
        Ok(self.proxies.insert(proxy))
    }

    pub fn remove_proxy(&mut self, proxy_id: &str) -> Option<ProxyReference> {
        self.proxy_last_seen.remove(proxy_id);
        self.offline_proxies.remove(proxy_id);
        let removed = self.proxies.remove(proxy_id);
        if removed.is_some() {
            info!(proxy_id, "代理已删除");
        }
        removed
    }

    pub fn proxies(&self) -> &ProxySet {
        &self.proxies
    }

    /// 已注册代理最近一次上报的时间
    pub fn proxy_last_seen(&self, proxy_id: &str) -> Option<f64> {
        self.proxy_last_seen.get(proxy_id).copied()
    }

    pub fn add_zone(&mut self, zone: Zone) -> Result<Option<Zone>, TrackingError> {
        Ok(self.zones.add_zone(zone)?)
    }

    pub fn remove_zone(&mut self, zone_id: &str) -> Option<Zone> {
        self.zones.remove_zone(zone_id)
    }

    pub fn zones(&self) -> &ZoneIndex {
        &self.zones
    }

    // ========================================================================
    // 信标
    // ========================================================================

    /// 纳管信标并立即创建跟踪器
    pub fn onboard_beacon(&mut self, beacon_id: MacAddress, config: BeaconConfig) -> Result<(), TrackingError> {
        let params = BeaconParameters::resolve(&self.config, &config).inspect_err(|err| {
            warn!(beacon = %beacon_id, error = %err, "信标配置无效，拒绝纳管");
        })?;

        info!(
            beacon = %beacon_id,
            name = config.name.as_deref().unwrap_or("unnamed"),
            category = %config.category(),
            "信标已纳管"
        );

        self.discovery.onboard(beacon_id);
        self.beacon_configs.insert(beacon_id, config);
        match self.trackers.get_mut(&beacon_id) {
            Some(tracker) => tracker.set_params(params),
            None => {
                self.trackers.insert(beacon_id, BeaconTracker::new(beacon_id, params));
            }
        }
        Ok(())
    }

    /// 更新已纳管信标的配置覆盖项
    ///
    /// 新值与已有覆盖项合并后整体校验；校验失败时保持原配置不变。
    pub fn configure_beacon(&mut self, beacon_id: MacAddress, overrides: BeaconConfig) -> Result<(), TrackingError> {
        let current = self
            .beacon_configs
            .get(&beacon_id)
            .ok_or_else(|| TrackingError::UnknownBeacon(beacon_id.to_string()))?;

        let mut merged = current.clone();
        merged.merge(overrides);
        let params = BeaconParameters::resolve(&self.config, &merged).inspect_err(|err| {
            warn!(beacon = %beacon_id, error = %err, "信标配置无效，保持原配置");
        })?;

        info!(
            beacon = %beacon_id,
            tx_power = params.tx_power,
            path_loss_exponent = params.path_loss_exponent,
            "信标参数已更新"
        );

        if let Some(tracker) = self.trackers.get_mut(&beacon_id) {
            tracker.set_params(params);
        }
        self.beacon_configs.insert(beacon_id, merged);
        Ok(())
    }

    pub fn remove_beacon(&mut self, beacon_id: &MacAddress) -> bool {
        let tracked = self.trackers.remove(beacon_id).is_some();
        let configured = self.beacon_configs.remove(beacon_id).is_some();
        let onboarded = self.discovery.remove_onboarded(beacon_id);
        self.beacon_last_seen.remove(beacon_id);
        self.missing_beacons.remove(beacon_id);

        let removed = tracked || configured || onboarded;
        if removed {
            info!(beacon = %beacon_id, "信标已删除");
        }
        removed
    }

    /// 手动设置信标位置（测试或校准用），经过位置平滑后重新判断区域
    pub fn set_beacon_position(
        &mut self,
        beacon_id: &MacAddress,
        latitude: f64,
        longitude: f64,
        accuracy: f64,
        now: f64,
    ) -> Result<Option<ZoneChange>, TrackingError> {
        check_coordinates(latitude, longitude)?;
        if !(accuracy.is_finite() && accuracy > 0.0) {
            return Err(TrackingError::InvalidAccuracy(accuracy));
        }

        let tracker = self
            .trackers
            .get_mut(beacon_id)
            .ok_or_else(|| TrackingError::UnknownBeacon(beacon_id.to_string()))?;

        tracker.update_position(latitude, longitude, accuracy, now);
        let zone_id = self
            .zones
            .find_containing(latitude, longitude)
            .map(|z| z.zone_id.clone());
        let change = tracker.set_zone(zone_id);

        info!(beacon = %beacon_id, latitude, longitude, "手动设置信标位置");
        Ok(change)
    }

    pub fn beacon_config(&self, beacon_id: &MacAddress) -> Option<&BeaconConfig> {
        self.beacon_configs.get(beacon_id)
    }

    /// 信标显示名称，未配置时使用 MAC 末 3 字节
    pub fn beacon_name(&self, beacon_id: &MacAddress) -> String {
        self.beacon_configs
            .get(beacon_id)
            .and_then(|c| c.name.clone())
            .unwrap_or_else(|| format!("Beacon {}", beacon_id.short_suffix()))
    }

    pub fn tracker(&self, beacon_id: &MacAddress) -> Option<&BeaconTracker> {
        self.trackers.get(beacon_id)
    }

    pub fn trackers(&self) -> impl Iterator<Item = &BeaconTracker> {
        self.trackers.values()
    }

    pub fn get_position(&self, beacon_id: &MacAddress) -> Option<BeaconPosition> {
        self.trackers.get(beacon_id)?.position()
    }

    pub fn get_zone(&self, beacon_id: &MacAddress) -> Option<&str> {
        self.trackers.get(beacon_id)?.zone()
    }

    /// `now` 时刻的距离估计，超过 `max_reading_age` 的读数不参与
    pub fn get_distance_estimate(&self, beacon_id: &MacAddress, proxy_id: &str, now: f64) -> Option<f64> {
        self.trackers.get(beacon_id)?.distance_estimate(proxy_id, now)
    }

    // ========================================================================
    // 发现
    // ========================================================================

    pub fn start_discovery(&mut self, now: f64, duration_secs: u64) -> Result<(), ConfigError> {
        self.discovery.start_session(now, duration_secs)
    }

    pub fn stop_discovery(&mut self) {
        self.discovery.stop_session();
    }

    pub fn extend_discovery(&mut self, now: f64, additional_secs: u64) -> bool {
        self.discovery.extend_session(now, additional_secs)
    }

    /// 主动检查发现会话是否到期
    pub fn expire_discovery(&mut self, now: f64) -> bool {
        self.discovery.expire(now)
    }

    pub fn is_discovering(&mut self, now: f64) -> bool {
        self.discovery.is_active(now)
    }

    pub fn set_discovery_filters(&mut self, filters: DiscoveryFilters) {
        self.config.discovery = filters.clone();
        self.discovery.set_filters(filters);
    }

    pub fn discovered_beacons(&self, now: f64) -> Vec<DiscoveredBeacon> {
        self.discovery.discovered(now)
    }

    // ========================================================================
    // 维护
    // ========================================================================

    /// 清理所有跟踪器中的过期读数，返回丢弃的读数总数
    pub fn clean_old_readings(&mut self, now: f64) -> usize {
        let dropped: usize = self
            .trackers
            .values_mut()
            .map(|tracker| tracker.clean_old_readings(now))
            .sum();
        if dropped > 0 {
            debug!(dropped, "已清理过期读数");
        }
        dropped
    }

    /// 检查代理和信标的在线状态，返回状态切换事件
    ///
    /// 已注册但从未上报过的代理、已纳管但从未出现过的信标同样视为离线/丢失。
    pub fn check_device_status(&mut self, now: f64) -> Vec<DeviceStatusEvent> {
        let mut events = Vec::new();

        let offline_after = self.config.proxy_offline_after();
        let mut proxy_ids: Vec<String> = self.proxies.ids().cloned().collect();
        proxy_ids.sort_unstable();

        for proxy_id in proxy_ids {
            let last_seen = self.proxy_last_seen.get(&proxy_id).copied();
            let stale = last_seen.is_none_or(|seen| now - seen > offline_after);

            if stale {
                if self.offline_proxies.insert(proxy_id.clone()) {
                    warn!(proxy_id = %proxy_id, ?last_seen, "代理离线");
                    events.push(DeviceStatusEvent::ProxyOffline { proxy_id, last_seen });
                }
            } else if let Some(seen) = last_seen {
                if self.offline_proxies.remove(&proxy_id) {
                    info!(proxy_id = %proxy_id, "代理恢复在线");
                    events.push(DeviceStatusEvent::ProxyOnline {
                        proxy_id,
                        last_seen: seen,
                    });
                }
            }
        }

        let missing_after = self.config.beacon_missing_after();
        let mut beacon_ids: Vec<MacAddress> = self.trackers.keys().copied().collect();
        beacon_ids.sort_unstable();

        for beacon_id in beacon_ids {
            let last_seen = self.beacon_last_seen.get(&beacon_id).copied();
            let stale = last_seen.is_none_or(|seen| now - seen > missing_after);

            if stale {
                if self.missing_beacons.insert(beacon_id) {
                    warn!(beacon = %beacon_id, name = %self.beacon_name(&beacon_id), ?last_seen, "信标丢失");
                    events.push(DeviceStatusEvent::BeaconMissing { beacon_id, last_seen });
                }
            } else if let Some(seen) = last_seen {
                if self.missing_beacons.remove(&beacon_id) {
                    info!(beacon = %beacon_id, "信标重新出现");
                    events.push(DeviceStatusEvent::BeaconSeen {
                        beacon_id,
                        last_seen: seen,
                    });
                }
            }
        }

        events
    }

    fn params_for(&self, beacon_id: &MacAddress) -> BeaconParameters {
        match self.beacon_configs.get(beacon_id) {
            Some(overrides) => BeaconParameters::resolve(&self.config, overrides)
                .unwrap_or_else(|_| BeaconParameters::from_config(&self.config)),
            None => BeaconParameters::from_config(&self.config),
        }
    }
}

fn check_coordinates(latitude: f64, longitude: f64) -> Result<(), TrackingError> {
    if (-90.0..=90.0).contains(&latitude) && (-180.0..=180.0).contains(&longitude) {
        Ok(())
    } else {
        Err(TrackingError::InvalidCoordinates { latitude, longitude })
    }
}
