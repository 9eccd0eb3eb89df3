/// 区域管理
///
/// 区域是由 (纬度, 经度) 顶点组成的多边形。包含判断直接把经纬度当作平面坐标，
/// 只适用于建筑物尺度的小区域。

use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::ZoneError;

/// 区域类型
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ZoneType {
    Home,
    Work,
    Room,
    #[default]
    Custom,
}

impl ZoneType {
    pub fn default_icon(&self) -> &'static str {
        match self {
            ZoneType::Home => "mdi:home",
            ZoneType::Work => "mdi:briefcase",
            ZoneType::Room => "mdi:door",
            ZoneType::Custom => "mdi:map-marker",
        }
    }
}

impl fmt::Display for ZoneType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ZoneType::Home => "home",
            ZoneType::Work => "work",
            ZoneType::Room => "room",
            ZoneType::Custom => "custom",
        };
        write!(f, "{}", name)
    }
}

/// 多边形区域
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Zone {
    pub zone_id: String,
    pub name: String,
    #[serde(default)]
    pub zone_type: ZoneType,
    /// 顶点 (纬度, 经度)，顺时针或逆时针均可
    pub polygon: Vec<(f64, f64)>,
    #[serde(default)]
    pub icon: Option<String>,
}

impl Zone {
    /// 创建区域并校验几何
    pub fn new(
        zone_id: impl Into<String>,
        name: impl Into<String>,
        zone_type: ZoneType,
        polygon: Vec<(f64, f64)>,
    ) -> Result<Self, ZoneError> {
        let zone = Zone {
            zone_id: zone_id.into(),
            name: name.into(),
            zone_type,
            polygon,
            icon: None,
        };
        zone.validate()?;
        Ok(zone)
    }

    pub fn with_icon(mut self, icon: impl Into<String>) -> Self {
        self.icon = Some(icon.into());
        self
    }

    pub fn validate(&self) -> Result<(), ZoneError> {
        if self.zone_id.trim().is_empty() {
            return Err(ZoneError::EmptyId);
        }
        if self.polygon.len() < 3 {
            return Err(ZoneError::TooFewVertices {
                zone_id: self.zone_id.clone(),
                vertices: self.polygon.len(),
            });
        }
        if let Some(index) = self
            .polygon
            .iter()
            .position(|(lat, lon)| !lat.is_finite() || !lon.is_finite())
        {
            return Err(ZoneError::InvalidVertex {
                zone_id: self.zone_id.clone(),
                index,
            });
        }
        Ok(())
    }

    pub fn contains_point(&self, latitude: f64, longitude: f64) -> bool {
        point_in_polygon((latitude, longitude), &self.polygon)
    }

    pub fn icon(&self) -> &str {
        self.icon.as_deref().unwrap_or_else(|| self.zone_type.default_icon())
    }
}

/// 射线法判断点是否在多边形内
///
/// 点和顶点都以 (纬度, 经度) 作为 (x, y)。恰好落在边或顶点上的点结果固定：
/// 以矩形 (0,0),(0,10),(10,10),(10,0) 为例，顶点 (0,0) 判为外部，顶点 (10,10) 判为内部。
pub fn point_in_polygon(point: (f64, f64), polygon: &[(f64, f64)]) -> bool {
    let n = polygon.len();
    if n < 3 {
        return false;
    }

    let (x, y) = point;
    let mut inside = false;
    let mut p1 = polygon[0];

    for i in 1..=n {
        let p2 = polygon[i % n];
        let (p1x, p1y) = p1;
        let (p2x, p2y) = p2;

        if y > p1y.min(p2y) && y <= p1y.max(p2y) && x <= p1x.max(p2x) {
            // 满足 y 区间条件时 p1y != p2y，水平边不会走到这里
            let crosses = if p1x == p2x {
                true
            } else {
                let x_intersection = (y - p1y) * (p2x - p1x) / (p2y - p1y) + p1x;
                x <= x_intersection
            };
            if crosses {
                inside = !inside;
            }
        }
        p1 = p2;
    }

    inside
}

/// 区域索引
///
/// 按插入顺序保存；重叠区域时返回第一个匹配的区域。替换已有区域保持其原有位置。
#[derive(Clone, Debug, Default)]
pub struct ZoneIndex {
    zones: Vec<Zone>,
}

impl ZoneIndex {
    pub fn new() -> Self {
        ZoneIndex { zones: Vec::new() }
    }

    /// 添加或替换区域，返回被替换的旧区域
    pub fn add_zone(&mut self, zone: Zone) -> Result<Option<Zone>, ZoneError> {
        zone.validate()?;

        match self.zones.iter_mut().find(|z| z.zone_id == zone.zone_id) {
            Some(existing) => {
                info!(zone_id = %zone.zone_id, "区域已替换");
                Ok(Some(std::mem::replace(existing, zone)))
            }
            None => {
                info!(zone_id = %zone.zone_id, name = %zone.name, vertices = zone.polygon.len(), "区域已添加");
                self.zones.push(zone);
                Ok(None)
            }
        }
    }

    pub fn remove_zone(&mut self, zone_id: &str) -> Option<Zone> {
        let index = self.zones.iter().position(|z| z.zone_id == zone_id)?;
        info!(zone_id, "区域已删除");
        Some(self.zones.remove(index))
    }

    pub fn get(&self, zone_id: &str) -> Option<&Zone> {
        self.zones.iter().find(|z| z.zone_id == zone_id)
    }

    /// 第一个包含该点的区域
    pub fn find_containing(&self, latitude: f64, longitude: f64) -> Option<&Zone> {
        self.zones.iter().find(|z| z.contains_point(latitude, longitude))
    }

    pub fn iter(&self) -> impl Iterator<Item = &Zone> {
        self.zones.iter()
    }

    pub fn len(&self) -> usize {
        self.zones.len()
    }

    pub fn is_empty(&self) -> bool {
        self.zones.is_empty()
    }
}
