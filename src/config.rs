/// 跟踪配置
///
/// 所有数值参数都有默认值；校验失败直接拒绝，不做截断修正，
/// 避免掩盖运维人员的配置错误。

use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::discovery::DiscoveryFilters;
use crate::error::ConfigError;

pub const DEFAULT_TX_POWER: f64 = -59.0;
pub const DEFAULT_PATH_LOSS_EXPONENT: f64 = 2.0;
pub const DEFAULT_RSSI_SMOOTHING: f64 = 0.3;
pub const DEFAULT_POSITION_SMOOTHING: f64 = 0.2;
pub const DEFAULT_MAX_READING_AGE: f64 = 30.0;
pub const DEFAULT_MIN_PROXIES: usize = 2;
pub const DEFAULT_MAINTENANCE_INTERVAL_SECS: u64 = 60;

/// 全局跟踪配置
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackingConfig {
    /// 1 米处参考功率 (dBm)
    pub tx_power: f64,
    /// 路径损耗指数
    pub path_loss_exponent: f64,
    /// RSSI 指数平滑系数
    pub rssi_smoothing_alpha: f64,
    /// 位置指数平滑系数
    pub position_smoothing_alpha: f64,
    /// 读数最长保留时间（秒）
    pub max_reading_age: f64,
    /// 触发三角定位所需的最少代理数
    pub min_proxies: usize,
    /// 维护任务（过期清理、设备状态检查）间隔（秒）
    pub maintenance_interval_secs: u64,
    /// 代理超过 max_reading_age 的多少倍未上报视为离线
    pub proxy_offline_factor: f64,
    /// 信标超过 max_reading_age 的多少倍未出现视为丢失
    pub beacon_missing_factor: f64,
    /// 发现模式过滤条件
    pub discovery: DiscoveryFilters,
}

impl Default for TrackingConfig {
    fn default() -> Self {
        TrackingConfig {
            tx_power: DEFAULT_TX_POWER,
            path_loss_exponent: DEFAULT_PATH_LOSS_EXPONENT,
            rssi_smoothing_alpha: DEFAULT_RSSI_SMOOTHING,
            position_smoothing_alpha: DEFAULT_POSITION_SMOOTHING,
            max_reading_age: DEFAULT_MAX_READING_AGE,
            min_proxies: DEFAULT_MIN_PROXIES,
            maintenance_interval_secs: DEFAULT_MAINTENANCE_INTERVAL_SECS,
            proxy_offline_factor: 2.0,
            beacon_missing_factor: 3.0,
            discovery: DiscoveryFilters::default(),
        }
    }
}

impl TrackingConfig {
    /// 从 JSON 字符串加载并校验
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: TrackingConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// 从 JSON 文件加载并校验
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_json_str(&content)
    }

    /// 校验所有参数
    pub fn validate(&self) -> Result<(), ConfigError> {
        BeaconParameters::from_config(self).validate()?;

        if self.min_proxies == 0 {
            return Err(ConfigError::ZeroMinProxies);
        }
        if self.maintenance_interval_secs == 0 {
            return Err(ConfigError::NonPositive {
                name: "maintenance_interval_secs",
                value: 0.0,
            });
        }
        check_positive("proxy_offline_factor", self.proxy_offline_factor)?;
        check_positive("beacon_missing_factor", self.beacon_missing_factor)?;
        Ok(())
    }

    /// 代理离线阈值（秒）
    pub fn proxy_offline_after(&self) -> f64 {
        self.max_reading_age * self.proxy_offline_factor
    }

    /// 信标丢失阈值（秒）
    pub fn beacon_missing_after(&self) -> f64 {
        self.max_reading_age * self.beacon_missing_factor
    }
}

/// 信标类别
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BeaconCategory {
    Person,
    #[default]
    Item,
    Pet,
    Vehicle,
    Other,
}

impl BeaconCategory {
    /// 类别默认图标
    pub fn default_icon(&self) -> &'static str {
        match self {
            BeaconCategory::Person => "mdi:account",
            BeaconCategory::Item => "mdi:package-variant-closed",
            BeaconCategory::Pet => "mdi:paw",
            BeaconCategory::Vehicle => "mdi:car",
            BeaconCategory::Other => "mdi:bluetooth",
        }
    }
}

impl fmt::Display for BeaconCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            BeaconCategory::Person => "person",
            BeaconCategory::Item => "item",
            BeaconCategory::Pet => "pet",
            BeaconCategory::Vehicle => "vehicle",
            BeaconCategory::Other => "other",
        };
        write!(f, "{}", name)
    }
}

/// 单个信标的配置覆盖项
///
/// 未设置的字段沿用 [`TrackingConfig`] 中的全局值。
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BeaconConfig {
    pub name: Option<String>,
    /// 未设置时按 [`BeaconCategory::Item`] 处理
    pub category: Option<BeaconCategory>,
    pub icon: Option<String>,
    pub tx_power: Option<f64>,
    pub path_loss_exponent: Option<f64>,
    pub rssi_smoothing_alpha: Option<f64>,
    pub position_smoothing_alpha: Option<f64>,
    pub max_reading_age: Option<f64>,
}

impl BeaconConfig {
    /// 合并另一份覆盖项，`other` 中已设置的字段优先
    pub fn merge(&mut self, other: BeaconConfig) {
        if other.name.is_some() {
            self.name = other.name;
        }
        if other.icon.is_some() {
            self.icon = other.icon;
        }
        self.category = other.category.or(self.category);
        self.tx_power = other.tx_power.or(self.tx_power);
        self.path_loss_exponent = other.path_loss_exponent.or(self.path_loss_exponent);
        self.rssi_smoothing_alpha = other.rssi_smoothing_alpha.or(self.rssi_smoothing_alpha);
        self.position_smoothing_alpha = other.position_smoothing_alpha.or(self.position_smoothing_alpha);
        self.max_reading_age = other.max_reading_age.or(self.max_reading_age);
    }

    pub fn category(&self) -> BeaconCategory {
        self.category.unwrap_or_default()
    }

    /// 显示用图标：显式图标优先，否则使用类别默认图标
    pub fn icon(&self) -> &str {
        self.icon.as_deref().unwrap_or_else(|| self.category().default_icon())
    }
}

/// 解析后的信标参数（全局默认值 + 覆盖项）
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BeaconParameters {
    pub tx_power: f64,
    pub path_loss_exponent: f64,
    pub rssi_smoothing_alpha: f64,
    pub position_smoothing_alpha: f64,
    pub max_reading_age: f64,
}

impl BeaconParameters {
    /// 只使用全局配置
    pub fn from_config(config: &TrackingConfig) -> Self {
        BeaconParameters {
            tx_power: config.tx_power,
            path_loss_exponent: config.path_loss_exponent,
            rssi_smoothing_alpha: config.rssi_smoothing_alpha,
            position_smoothing_alpha: config.position_smoothing_alpha,
            max_reading_age: config.max_reading_age,
        }
    }

    /// 合并信标覆盖项并校验
    pub fn resolve(config: &TrackingConfig, overrides: &BeaconConfig) -> Result<Self, ConfigError> {
        let params = BeaconParameters {
            tx_power: overrides.tx_power.unwrap_or(config.tx_power),
            path_loss_exponent: overrides.path_loss_exponent.unwrap_or(config.path_loss_exponent),
            rssi_smoothing_alpha: overrides.rssi_smoothing_alpha.unwrap_or(config.rssi_smoothing_alpha),
            position_smoothing_alpha: overrides
                .position_smoothing_alpha
                .unwrap_or(config.position_smoothing_alpha),
            max_reading_age: overrides.max_reading_age.unwrap_or(config.max_reading_age),
        };
        params.validate()?;
        Ok(params)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        check_alpha("rssi_smoothing_alpha", self.rssi_smoothing_alpha)?;
        check_alpha("position_smoothing_alpha", self.position_smoothing_alpha)?;

        if !(self.max_reading_age.is_finite() && self.max_reading_age > 0.0) {
            return Err(ConfigError::NonPositiveMaxAge(self.max_reading_age));
        }
        if !self.tx_power.is_finite() {
            return Err(ConfigError::InvalidTxPower(self.tx_power));
        }
        if !(self.path_loss_exponent.is_finite() && self.path_loss_exponent > 0.0) {
            return Err(ConfigError::NonPositivePathLoss(self.path_loss_exponent));
        }
        Ok(())
    }
}

fn check_alpha(name: &'static str, value: f64) -> Result<(), ConfigError> {
    if (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(ConfigError::SmoothingOutOfRange { name, value })
    }
}

fn check_positive(name: &'static str, value: f64) -> Result<(), ConfigError> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err(ConfigError::NonPositive { name, value })
    }
}
