/// 单个信标的状态跟踪
///
/// 每个信标一个 [`BeaconTracker`]：持有各代理的 RSSI 缓冲区、
/// 平滑后的位置/精度，以及当前和上一次的区域归属。

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::algorithms::{ProxySet, ReadingBuffer, SignalModel};
use crate::config::BeaconParameters;
use crate::observation::MacAddress;

/// 一个代理对信标的距离估计（三角定位输入）
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ProxyDistance {
    pub proxy_id: String,
    pub latitude: f64,
    pub longitude: f64,
    /// 估计距离（米）
    pub distance: f64,
}

impl ProxyDistance {
    /// 转换为 (纬度, 经度, 距离)
    pub fn point(&self) -> (f64, f64, f64) {
        (self.latitude, self.longitude, self.distance)
    }
}

/// 信标当前位置
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct BeaconPosition {
    pub latitude: f64,
    pub longitude: f64,
    /// 精度（米）
    pub accuracy: f64,
    /// 最后一次更新的时间戳（秒）
    pub last_update: f64,
}

/// 区域归属变化
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ZoneChange {
    pub previous: Option<String>,
    pub current: Option<String>,
}

/// 信标跟踪器
#[derive(Clone, Debug)]
pub struct BeaconTracker {
    beacon_id: MacAddress,
    params: BeaconParameters,
    proxy_readings: HashMap<String, ReadingBuffer>,
    position: Option<BeaconPosition>,
    zone_id: Option<String>,
    prev_zone_id: Option<String>,
}

impl BeaconTracker {
    /// 创建跟踪器，参数应已通过校验
    pub fn new(beacon_id: MacAddress, params: BeaconParameters) -> Self {
        BeaconTracker {
            beacon_id,
            params,
            proxy_readings: HashMap::new(),
            position: None,
            zone_id: None,
            prev_zone_id: None,
        }
    }

    pub fn beacon_id(&self) -> MacAddress {
        self.beacon_id
    }

    pub fn params(&self) -> &BeaconParameters {
        &self.params
    }

    /// 信号模型（发射功率 + 路径损耗指数）
    pub fn signal_model(&self) -> SignalModel {
        SignalModel::new(self.params.tx_power, self.params.path_loss_exponent)
    }

    /// 替换参数，已有缓冲区同步更新平滑系数和保留时间
    pub fn set_params(&mut self, params: BeaconParameters) {
        for buffer in self.proxy_readings.values_mut() {
            buffer.set_parameters(params.max_reading_age, params.rssi_smoothing_alpha);
        }
        self.params = params;
    }

    /// 记录一个代理的读数，首次出现的代理懒创建缓冲区
    pub fn update_reading(&mut self, proxy_id: &str, rssi: i16, timestamp: f64) {
        let params = &self.params;
        self.proxy_readings
            .entry(proxy_id.to_string())
            .or_insert_with(|| ReadingBuffer::new(params.max_reading_age, params.rssi_smoothing_alpha))
            .add_reading(rssi, timestamp);
    }

    /// 清理所有缓冲区中的过期读数，返回丢弃数量
    pub fn clean_old_readings(&mut self, now: f64) -> usize {
        self.proxy_readings
            .values_mut()
            .map(|buffer| buffer.expire(now))
            .sum()
    }

    /// 计算所有可用代理的距离
    ///
    /// 只有存在未过期读数且坐标已知的代理才会被包含；其余代理静默跳过。
    /// 结果按代理 ID 排序，保证相同输入得到相同的三角定位结果。
    pub fn get_proxy_distances(&mut self, proxies: &ProxySet, now: f64) -> Vec<ProxyDistance> {
        let model = self.signal_model();

        let mut result: Vec<ProxyDistance> = self
            .proxy_readings
            .iter_mut()
            .filter_map(|(proxy_id, buffer)| {
                buffer.expire(now);
                let rssi = buffer.average()?;
                let proxy = proxies.get(proxy_id)?;
                Some(ProxyDistance {
                    proxy_id: proxy_id.clone(),
                    latitude: proxy.latitude,
                    longitude: proxy.longitude,
                    distance: model.distance(rssi),
                })
            })
            .collect();

        result.sort_by(|a, b| a.proxy_id.cmp(&b.proxy_id));
        result
    }

    /// 单个代理在 `now` 时刻的距离估计；读数均已过期时返回 None
    pub fn distance_estimate(&self, proxy_id: &str, now: f64) -> Option<f64> {
        let rssi = self.proxy_readings.get(proxy_id)?.average_at(now)?;
        Some(self.signal_model().distance(rssi))
    }

    /// 单个代理的平滑 RSSI
    pub fn smoothed_rssi(&self, proxy_id: &str) -> Option<f64> {
        self.proxy_readings.get(proxy_id)?.average()
    }

    /// 更新位置
    ///
    /// 首次直接采用；之后对纬度、经度、精度分别做指数平滑。
    pub fn update_position(&mut self, latitude: f64, longitude: f64, accuracy: f64, timestamp: f64) {
        let alpha = self.params.position_smoothing_alpha;

        self.position = Some(match self.position {
            None => BeaconPosition {
                latitude,
                longitude,
                accuracy,
                last_update: timestamp,
            },
            Some(prev) => BeaconPosition {
                latitude: alpha * latitude + (1.0 - alpha) * prev.latitude,
                longitude: alpha * longitude + (1.0 - alpha) * prev.longitude,
                accuracy: alpha * accuracy + (1.0 - alpha) * prev.accuracy,
                last_update: timestamp,
            },
        });
    }

    pub fn position(&self) -> Option<BeaconPosition> {
        self.position
    }

    pub fn zone(&self) -> Option<&str> {
        self.zone_id.as_deref()
    }

    pub fn previous_zone(&self) -> Option<&str> {
        self.prev_zone_id.as_deref()
    }

    /// 记录新的区域归属，归属发生变化时返回变化
    pub fn set_zone(&mut self, zone_id: Option<String>) -> Option<ZoneChange> {
        self.prev_zone_id = self.zone_id.take();
        self.zone_id = zone_id;

        if self.prev_zone_id == self.zone_id {
            None
        } else {
            Some(ZoneChange {
                previous: self.prev_zone_id.clone(),
                current: self.zone_id.clone(),
            })
        }
    }

    /// 当前有有效读数的代理
    pub fn active_proxies(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = self
            .proxy_readings
            .iter()
            .filter(|(_, buffer)| !buffer.is_empty())
            .map(|(id, _)| id.as_str())
            .collect();
        ids.sort_unstable();
        ids
    }

    /// 是否完全没有近期数据
    pub fn has_recent_data(&self) -> bool {
        self.proxy_readings.values().any(|buffer| !buffer.is_empty())
    }
}
