/// 定位结果数据结构

use std::fmt;

use serde::{Deserialize, Serialize};

/// 地球平均半径（米）
pub const EARTH_RADIUS_M: f64 = 6_371_000.0;

/// 三角定位输出
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PositionEstimate {
    /// 纬度
    pub latitude: f64,
    /// 经度
    pub longitude: f64,
    /// 精度估计（米）
    ///
    /// 这是输入圆之间的一致性度量（平均残差），不是相对真实位置的误差上界。
    pub accuracy: f64,
    /// 使用的算法名称
    pub method: String,
    /// 参与定位的代理数量
    pub proxy_count: usize,
}

impl PositionEstimate {
    pub fn new(
        latitude: f64,
        longitude: f64,
        accuracy: f64,
        method: impl Into<String>,
        proxy_count: usize,
    ) -> Self {
        PositionEstimate {
            latitude,
            longitude,
            accuracy,
            method: method.into(),
            proxy_count,
        }
    }

    /// 获取 (纬度, 经度)
    pub fn coordinates(&self) -> (f64, f64) {
        (self.latitude, self.longitude)
    }

    /// 到另一坐标的大圆距离（米）
    pub fn distance_to(&self, latitude: f64, longitude: f64) -> f64 {
        haversine_distance(self.latitude, self.longitude, latitude, longitude)
    }

    /// 是否走了加权质心回退路径
    pub fn is_fallback(&self) -> bool {
        self.method == "weighted_centroid"
    }
}

impl fmt::Display for PositionEstimate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "({:.7}, {:.7}) ±{:.2}m [{}, {} 个代理]",
            self.latitude, self.longitude, self.accuracy, self.method, self.proxy_count
        )
    }
}

/// 两点间的大圆距离（米）
pub fn haversine_distance(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let phi1 = lat1.to_radians();
    let phi2 = lat2.to_radians();
    let d_phi = (lat2 - lat1).to_radians();
    let d_lambda = (lon2 - lon1).to_radians();

    let a = (d_phi / 2.0).sin().powi(2) + phi1.cos() * phi2.cos() * (d_lambda / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_M * a.sqrt().atan2((1.0 - a).sqrt())
}
