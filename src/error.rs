/// 错误类型定义
///
/// 数据不足（代理数量不够、缓冲区为空等）不属于错误，统一以 `Option` 表达。
/// 这里只包含配置、几何和输入格式上的硬性错误。

use thiserror::Error;

/// 配置校验错误
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("平滑系数 {name} 必须位于 [0, 1] 区间，当前值: {value}")]
    SmoothingOutOfRange { name: &'static str, value: f64 },

    #[error("最大读数保留时间必须为正数，当前值: {0}")]
    NonPositiveMaxAge(f64),

    #[error("路径损耗指数必须为正数，当前值: {0}")]
    NonPositivePathLoss(f64),

    #[error("发射功率必须是有限值，当前值: {0}")]
    InvalidTxPower(f64),

    #[error("最少代理数量至少为 1")]
    ZeroMinProxies,

    #[error("参数 {name} 必须为正数，当前值: {value}")]
    NonPositive { name: &'static str, value: f64 },

    #[error("发现会话时长必须大于 0 秒")]
    ZeroDiscoveryDuration,

    #[error("配置 JSON 解析失败: {0}")]
    Json(#[from] serde_json::Error),

    #[error("读取配置文件失败: {0}")]
    Io(#[from] std::io::Error),
}

/// 区域几何错误
#[derive(Debug, Error)]
pub enum ZoneError {
    #[error("区域 ID 不能为空")]
    EmptyId,

    #[error("区域 {zone_id} 的多边形至少需要 3 个顶点，当前只有 {vertices} 个")]
    TooFewVertices { zone_id: String, vertices: usize },

    #[error("区域 {zone_id} 的第 {index} 个顶点坐标无效")]
    InvalidVertex { zone_id: String, index: usize },
}

/// 观测数据解析错误
#[derive(Debug, Error)]
pub enum ObservationError {
    #[error("无效的 MAC 地址: {0}")]
    InvalidMac(String),

    #[error("观测载荷 JSON 解析失败: {0}")]
    Json(#[from] serde_json::Error),

    #[error("观测载荷缺少字段: {0}")]
    MissingField(&'static str),

    #[error("无法从主题中解析代理 ID: {0}")]
    InvalidTopic(String),
}

/// 跟踪引擎操作错误
#[derive(Debug, Error)]
pub enum TrackingError {
    #[error("未知信标: {0}")]
    UnknownBeacon(String),

    #[error("精度必须为正的有限值，当前值: {0}")]
    InvalidAccuracy(f64),

    #[error("坐标超出范围: ({latitude}, {longitude})")]
    InvalidCoordinates { latitude: f64, longitude: f64 },

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Zone(#[from] ZoneError),
}

/// 本地蓝牙扫描错误
#[cfg(feature = "bluetooth")]
#[derive(Debug, Error)]
pub enum ScanError {
    #[error("蓝牙操作失败: {0}")]
    Bluetooth(#[from] btleplug::Error),

    #[error("未找到蓝牙适配器")]
    NoAdapter,

    #[error("设备名称过滤表达式无效: {0}")]
    InvalidNameFilter(#[from] regex::Error),
}
