/// 单个 (信标, 代理) 对的 RSSI 滚动缓冲区

use std::collections::VecDeque;

/// RSSI 读数缓冲区
///
/// 保存最近的原始读数，并维护指数移动平均值。
/// 过期是惰性的：调用 [`ReadingBuffer::expire`] 之后 [`ReadingBuffer::average`] 才可信。
#[derive(Clone, Debug)]
pub struct ReadingBuffer {
    readings: VecDeque<(i16, f64)>,
    max_age: f64,
    alpha: f64,
    smoothed_rssi: Option<f64>,
}

impl ReadingBuffer {
    /// 创建缓冲区
    ///
    /// # 参数
    /// - `max_age`: 读数最长保留时间（秒）
    /// - `alpha`: RSSI 指数平滑系数，位于 [0, 1]
    pub fn new(max_age: f64, alpha: f64) -> Self {
        ReadingBuffer {
            readings: VecDeque::new(),
            max_age,
            alpha,
            smoothed_rssi: None,
        }
    }

    /// 添加读数并更新平滑值
    pub fn add_reading(&mut self, rssi: i16, timestamp: f64) {
        self.readings.push_back((rssi, timestamp));

        let rssi = rssi as f64;
        self.smoothed_rssi = Some(match self.smoothed_rssi {
            None => rssi,
            Some(prev) => self.alpha * rssi + (1.0 - self.alpha) * prev,
        });
    }

    /// 丢弃 `now - timestamp > max_age` 的读数，返回丢弃数量
    ///
    /// 全部过期后平滑值一并清空，之后的新读数从头开始平滑。
    pub fn expire(&mut self, now: f64) -> usize {
        let before = self.readings.len();
        let max_age = self.max_age;
        self.readings.retain(|&(_, ts)| now - ts <= max_age);

        if self.readings.is_empty() {
            self.smoothed_rssi = None;
        }
        before - self.readings.len()
    }

    /// 平滑后的 RSSI；没有任何有效读数时返回 None
    pub fn average(&self) -> Option<f64> {
        if self.readings.is_empty() {
            return None;
        }
        self.smoothed_rssi
    }

    /// 在 `now` 时刻仍然有效的平滑 RSSI，不修改缓冲区
    ///
    /// 所有读数都已超过 `max_age` 时返回 None，即使还没有调用过 [`ReadingBuffer::expire`]。
    pub fn average_at(&self, now: f64) -> Option<f64> {
        if !self.readings.iter().any(|&(_, ts)| now - ts <= self.max_age) {
            return None;
        }
        self.smoothed_rssi
    }

    /// 更新平滑系数和保留时间（已有读数与平滑值保留）
    pub fn set_parameters(&mut self, max_age: f64, alpha: f64) {
        self.max_age = max_age;
        self.alpha = alpha;
    }

    /// 最近一次读数的时间戳
    pub fn last_timestamp(&self) -> Option<f64> {
        self.readings.back().map(|&(_, ts)| ts)
    }

    /// 原始读数
    pub fn readings(&self) -> impl Iterator<Item = &(i16, f64)> {
        self.readings.iter()
    }

    pub fn len(&self) -> usize {
        self.readings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.readings.is_empty()
    }

    pub fn max_age(&self) -> f64 {
        self.max_age
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_reading_taken_verbatim() {
        let mut buffer = ReadingBuffer::new(30.0, 0.3);
        assert_eq!(buffer.average(), None);
        buffer.add_reading(-70, 0.0);
        assert_eq!(buffer.average(), Some(-70.0));
    }

    #[test]
    fn test_exponential_smoothing() {
        let mut buffer = ReadingBuffer::new(30.0, 0.3);
        buffer.add_reading(-70, 0.0);
        buffer.add_reading(-60, 1.0);
        // 0.3 * -60 + 0.7 * -70 = -67
        let avg = buffer.average().unwrap();
        assert!((avg - (-67.0)).abs() < 1e-9);
    }

    #[test]
    fn test_smoothing_converges() {
        let mut buffer = ReadingBuffer::new(1000.0, 0.3);
        buffer.add_reading(-90, 0.0);
        for i in 1..200 {
            buffer.add_reading(-55, i as f64);
        }
        assert!((buffer.average().unwrap() - (-55.0)).abs() < 1e-9);
    }

    #[test]
    fn test_expiry_boundary() {
        let eps = 1e-3;

        let mut buffer = ReadingBuffer::new(30.0, 0.3);
        buffer.add_reading(-65, 100.0);
        buffer.expire(100.0 + 30.0 - eps);
        assert_eq!(buffer.average(), Some(-65.0));

        buffer.expire(100.0 + 30.0 + eps);
        assert_eq!(buffer.average(), None);
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_average_at_ignores_dead_readings() {
        let eps = 1e-3;

        let mut buffer = ReadingBuffer::new(30.0, 0.3);
        buffer.add_reading(-65, 0.0);
        assert_eq!(buffer.average_at(30.0 - eps), Some(-65.0));
        assert_eq!(buffer.average_at(30.0 + eps), None);
        // 只读查询不丢弃读数
        assert_eq!(buffer.len(), 1);

        buffer.add_reading(-55, 25.0);
        assert!(buffer.average_at(30.0 + eps).is_some());
    }

    #[test]
    fn test_partial_expiry_keeps_smoothed_value() {
        let mut buffer = ReadingBuffer::new(10.0, 0.5);
        buffer.add_reading(-80, 0.0);
        buffer.add_reading(-60, 8.0);
        assert_eq!(buffer.expire(15.0), 1);
        assert_eq!(buffer.len(), 1);
        assert!((buffer.average().unwrap() - (-70.0)).abs() < 1e-9);
    }

    #[test]
    fn test_stale_average_not_reactivated() {
        let mut buffer = ReadingBuffer::new(10.0, 0.5);
        buffer.add_reading(-90, 0.0);
        buffer.expire(20.0);
        buffer.add_reading(-50, 21.0);
        assert_eq!(buffer.average(), Some(-50.0));
    }
}
