/// 定位算法模块
///
/// 该模块提供信标定位所需的数值模型：
/// - RSSI 缓冲与指数平滑
/// - 对数距离路径损耗模型（RSSI → 距离）
/// - 二维三角定位（两点定位、多点定位、加权质心回退）
/// - 代理坐标与定位结果数据结构

pub mod proxy;
pub mod reading_buffer;
pub mod results;
pub mod rssi_model;
pub mod triangulation;

pub use proxy::*;
pub use reading_buffer::*;
pub use results::*;
pub use rssi_model::*;
pub use triangulation::*;
