/// RSSI 到距离转换模型
///
/// 对数距离路径损耗模型：RSSI(d) = TxPower - 10 * n * log10(d)
/// 反解得 d = 10^((TxPower - RSSI) / (10 * n))，单位为米。

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// RSSI 为 0 时返回的哨兵距离（米），表示"没有可用信号"
pub const NO_SIGNAL_DISTANCE: f64 = 100.0;

/// 对数距离路径损耗模型
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct SignalModel {
    /// 1 米处的参考功率 (dBm)
    pub tx_power: f64,
    /// 路径损耗指数 n
    pub path_loss_exponent: f64,
}

impl SignalModel {
    /// 创建模型（不做校验，参数应在配置阶段已校验）
    pub fn new(tx_power: f64, path_loss_exponent: f64) -> Self {
        SignalModel {
            tx_power,
            path_loss_exponent,
        }
    }

    /// 根据（平滑后的）RSSI 计算距离
    pub fn distance(&self, rssi: f64) -> f64 {
        rssi_to_distance(rssi, self.tx_power, self.path_loss_exponent)
    }

    /// 根据距离计算期望 RSSI
    pub fn distance_to_rssi(&self, distance: f64) -> f64 {
        if distance <= 0.0 {
            return f64::INFINITY;
        }
        self.tx_power - 10.0 * self.path_loss_exponent * distance.log10()
    }

    /// 验证模型参数
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.tx_power.is_finite() {
            return Err(ConfigError::InvalidTxPower(self.tx_power));
        }
        if !(self.path_loss_exponent.is_finite() && self.path_loss_exponent > 0.0) {
            return Err(ConfigError::NonPositivePathLoss(self.path_loss_exponent));
        }
        Ok(())
    }
}

impl Default for SignalModel {
    fn default() -> Self {
        SignalModel::new(-59.0, 2.0)
    }
}

impl fmt::Display for SignalModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "路径损耗模型 - TxPower={:.1} dBm, n={:.2}",
            self.tx_power, self.path_loss_exponent
        )
    }
}

/// RSSI 转距离
///
/// RSSI 恰好为 0 时不计算，直接返回 [`NO_SIGNAL_DISTANCE`]。
/// 结果是带噪声的估计值，不是真实距离。
pub fn rssi_to_distance(rssi: f64, tx_power: f64, path_loss_exponent: f64) -> f64 {
    if rssi == 0.0 {
        return NO_SIGNAL_DISTANCE;
    }
    let exponent = (tx_power - rssi) / (10.0 * path_loss_exponent);
    10_f64.powf(exponent)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_distance_at_reference_power() {
        let model = SignalModel::default();
        assert!((model.distance(-59.0) - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_known_distance() {
        // 10^((-59 + 65) / 20) = 10^0.3
        let d = rssi_to_distance(-65.0, -59.0, 2.0);
        assert!((d - 10_f64.powf(0.3)).abs() < 1e-12);
        assert!((d - 1.995).abs() < 0.001);
    }

    #[test]
    fn test_zero_rssi_sentinel() {
        assert_eq!(rssi_to_distance(0.0, -59.0, 2.0), NO_SIGNAL_DISTANCE);
    }

    #[test]
    fn test_distance_monotonic() {
        let model = SignalModel::new(-59.0, 2.5);
        let mut last = f64::INFINITY;
        for rssi in -100..-1 {
            let d = model.distance(rssi as f64);
            assert!(d < last, "RSSI {} 的距离应严格小于上一个", rssi);
            last = d;
        }
    }

    #[test]
    fn test_distance_to_rssi_inverse() {
        let model = SignalModel::new(-59.0, 2.0);
        let rssi = model.distance_to_rssi(4.0);
        assert!((model.distance(rssi) - 4.0).abs() < 1e-9);
    }

    #[test]
    fn test_validate() {
        assert!(SignalModel::default().validate().is_ok());
        assert!(SignalModel::new(-59.0, 0.0).validate().is_err());
        assert!(SignalModel::new(f64::NAN, 2.0).validate().is_err());
    }
}
