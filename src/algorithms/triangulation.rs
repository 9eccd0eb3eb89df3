/// 二维三角定位算法
///
/// 支持：
/// - 两点定位（两圆求交，含相离、内含、重合三种退化情况）
/// - 多点定位（两两求交后按置信度加权，全部无交点时回退到加权质心）
/// - 局部平面投影（以第一个点为原点的等距矩形近似）
///
/// 投影只在几公里以内的点群上有效（楼宇、园区级部署），这是适用范围的限制，不是缺陷。

use std::f64::consts::PI;

use tracing::debug;

use crate::algorithms::results::{EARTH_RADIUS_M, PositionEstimate};

/// 精度下限（米）
pub const MIN_ACCURACY: f64 = 1.0;

// ============================================================================
// 局部平面投影
// ============================================================================

/// 等距矩形局部投影
///
/// x = (lon - lon0) * π/180 * R * cos(lat0)
/// y = (lat - lat0) * π/180 * R
#[derive(Clone, Copy, Debug)]
pub struct LocalProjection {
    origin_lat: f64,
    origin_lon: f64,
    lat_scale: f64,
    lon_scale: f64,
}

impl LocalProjection {
    /// 以给定点为原点创建投影
    pub fn new(origin_lat: f64, origin_lon: f64) -> Self {
        let origin_lat_rad = origin_lat * (PI / 180.0);
        LocalProjection {
            origin_lat,
            origin_lon,
            lat_scale: EARTH_RADIUS_M,
            lon_scale: EARTH_RADIUS_M * origin_lat_rad.cos(),
        }
    }

    /// 经纬度转局部坐标（米）
    pub fn to_local(&self, lat: f64, lon: f64) -> (f64, f64) {
        let x = (lon - self.origin_lon) * (PI / 180.0) * self.lon_scale;
        let y = (lat - self.origin_lat) * (PI / 180.0) * self.lat_scale;
        (x, y)
    }

    /// 局部坐标转经纬度
    pub fn to_geo(&self, x: f64, y: f64) -> (f64, f64) {
        let lat = self.origin_lat + (y / self.lat_scale) * (180.0 / PI);
        let lon = self.origin_lon + (x / self.lon_scale) * (180.0 / PI);
        (lat, lon)
    }
}

// ============================================================================
// 定位算法
// ============================================================================

/// 三角定位求解器（无状态）
pub struct Triangulator;

impl Triangulator {
    /// 多点定位
    ///
    /// # 参数
    /// - `points`: [(纬度, 经度, 距离米), ...]
    ///
    /// # 返回
    /// - 少于 2 个点时返回 None；恰好 2 个点时交给 [`Triangulator::bilaterate`]
    pub fn trilaterate(points: &[(f64, f64, f64)]) -> Option<PositionEstimate> {
        match points.len() {
            0 | 1 => None,
            2 => Self::bilaterate(points[0], points[1]),
            _ => Some(Self::_trilaterate_impl(points)),
        }
    }

    /// 两点定位
    ///
    /// - 两点重合：返回该点，精度取两半径较大者
    /// - 两圆相离：沿圆心连线按半径比例插值，精度为间隙
    /// - 一圆内含另一圆：向小圆方向插值，精度为内含间隙
    /// - 正常相交：取两交点中点，精度为半弦长（下限 1 米）
    pub fn bilaterate(p1: (f64, f64, f64), p2: (f64, f64, f64)) -> Option<PositionEstimate> {
        let (lat1, lon1, r1) = p1;
        let (lat2, lon2, r2) = p2;

        let projection = LocalProjection::new(lat1, lon1);
        let (x1, y1) = (0.0, 0.0);
        let (x2, y2) = projection.to_local(lat2, lon2);

        let d = (x2 * x2 + y2 * y2).sqrt();

        if d == 0.0 {
            return Some(PositionEstimate::new(lat1, lon1, r1.max(r2), "bilateration", 2));
        }

        let (x, y, accuracy) = if d > r1 + r2 {
            // 两圆相离
            let ratio = if r1 + r2 > 0.0 { r1 / (r1 + r2) } else { 0.5 };
            let x = x1 + (x2 - x1) * ratio;
            let y = y1 + (y2 - y1) * ratio;
            (x, y, d - (r1 + r2))
        } else if d < (r1 - r2).abs() {
            // 内含
            let (x, y) = if r1 > r2 {
                let ratio = r2 / r1;
                (x1 + (x2 - x1) * ratio, y1 + (y2 - y1) * ratio)
            } else {
                let ratio = r1 / r2;
                (x2 + (x1 - x2) * ratio, y2 + (y1 - y2) * ratio)
            };
            (x, y, (r1 - r2).abs() - d)
        } else {
            let ((ax, ay), (bx, by), h) = Self::_circle_intersections((x1, y1, r1), (x2, y2, r2), d);
            ((ax + bx) / 2.0, (ay + by) / 2.0, h.max(MIN_ACCURACY))
        };

        let (lat, lon) = projection.to_geo(x, y);
        Some(PositionEstimate::new(lat, lon, accuracy, "bilateration", 2))
    }

    // ========================================================================
    // 私有实现函数
    // ========================================================================

    fn _trilaterate_impl(points: &[(f64, f64, f64)]) -> PositionEstimate {
        let (origin_lat, origin_lon, _) = points[0];
        let projection = LocalProjection::new(origin_lat, origin_lon);

        let xy_points: Vec<(f64, f64, f64)> = points
            .iter()
            .map(|&(lat, lon, distance)| {
                let (x, y) = projection.to_local(lat, lon);
                (x, y, distance)
            })
            .collect();

        let weights: Vec<f64> = xy_points.iter().map(|&(_, _, d)| Self::_weight(d)).collect();

        let mut x_sum = 0.0;
        let mut y_sum = 0.0;
        let mut pair_weight_sum = 0.0;
        let mut valid_pairs = 0usize;

        for (i, &(x1, y1, r1)) in xy_points.iter().enumerate() {
            for (j, &(x2, y2, r2)) in xy_points.iter().enumerate().skip(i + 1) {
                let d = ((x2 - x1).powi(2) + (y2 - y1).powi(2)).sqrt();

                // 相离、内含或圆心重合的点对没有可用交点
                if d > r1 + r2 || d < (r1 - r2).abs() || d == 0.0 {
                    continue;
                }

                let ((ax, ay), (bx, by), _) = Self::_circle_intersections((x1, y1, r1), (x2, y2, r2), d);

                let pair_weight = weights[i] * weights[j];
                x_sum += (ax + bx) * pair_weight / 2.0;
                y_sum += (ay + by) * pair_weight / 2.0;
                pair_weight_sum += pair_weight;
                valid_pairs += 1;
            }
        }

        let (x, y, method) = if valid_pairs > 0 && pair_weight_sum > 0.0 {
            (x_sum / pair_weight_sum, y_sum / pair_weight_sum, "trilateration")
        } else {
            debug!(points = points.len(), "所有圆两两无交点，回退到加权质心");
            let (x, y) = Self::_weighted_centroid(&xy_points, &weights);
            (x, y, "weighted_centroid")
        };

        let accuracy = Self::_mean_residual(&xy_points, x, y).max(MIN_ACCURACY);
        let (lat, lon) = projection.to_geo(x, y);

        PositionEstimate::new(lat, lon, accuracy, method, points.len())
    }

    /// 距离置信权重：1/d²，距离为 0 时取 1
    fn _weight(distance: f64) -> f64 {
        if distance > 0.0 {
            1.0 / (distance * distance)
        } else {
            1.0
        }
    }

    /// 两圆交点，调用方保证两圆相交且 d > 0
    ///
    /// 返回两个交点和半弦长 h
    fn _circle_intersections(
        c1: (f64, f64, f64),
        c2: (f64, f64, f64),
        d: f64,
    ) -> ((f64, f64), (f64, f64), f64) {
        let (x1, y1, r1) = c1;
        let (x2, y2, r2) = c2;

        let a = (r1 * r1 - r2 * r2 + d * d) / (2.0 * d);
        // 相切时浮点误差可能让被开方数略小于 0
        let h = (r1 * r1 - a * a).max(0.0).sqrt();

        let x3 = x1 + a * (x2 - x1) / d;
        let y3 = y1 + a * (y2 - y1) / d;

        let p1 = (x3 + h * (y2 - y1) / d, y3 - h * (x2 - x1) / d);
        let p2 = (x3 - h * (y2 - y1) / d, y3 + h * (x2 - x1) / d);
        (p1, p2, h)
    }

    fn _weighted_centroid(xy_points: &[(f64, f64, f64)], weights: &[f64]) -> (f64, f64) {
        let total_weight: f64 = weights.iter().sum();
        let x = xy_points.iter().zip(weights).map(|(&(x, _, _), w)| x * w).sum::<f64>() / total_weight;
        let y = xy_points.iter().zip(weights).map(|(&(_, y, _), w)| y * w).sum::<f64>() / total_weight;
        (x, y)
    }

    fn _mean_residual(xy_points: &[(f64, f64, f64)], x: f64, y: f64) -> f64 {
        if xy_points.is_empty() {
            return 0.0;
        }

        let total: f64 = xy_points
            .iter()
            .map(|&(px, py, r)| {
                let actual = ((x - px).powi(2) + (y - py).powi(2)).sqrt();
                (actual - r).abs()
            })
            .sum();
        total / xy_points.len() as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const LAT0: f64 = 52.0;
    const LON0: f64 = 4.0;

    fn geo(projection: &LocalProjection, x: f64, y: f64) -> (f64, f64) {
        projection.to_geo(x, y)
    }

    #[test]
    fn test_projection_round_trip() {
        let projection = LocalProjection::new(LAT0, LON0);
        let (lat, lon) = projection.to_geo(123.4, -56.7);
        let (x, y) = projection.to_local(lat, lon);
        assert!((x - 123.4).abs() < 1e-6);
        assert!((y + 56.7).abs() < 1e-6);
    }

    #[test]
    fn test_insufficient_points() {
        assert!(Triangulator::trilaterate(&[]).is_none());
        assert!(Triangulator::trilaterate(&[(LAT0, LON0, 3.0)]).is_none());
    }

    #[test]
    fn test_two_points_use_bilateration() {
        let result = Triangulator::trilaterate(&[(0.0, 0.0, 5.0), (0.0, 0.0001, 5.0)]).unwrap();
        assert_eq!(result.method, "bilateration");
        assert_eq!(result.proxy_count, 2);
    }

    #[test]
    fn test_noiseless_equilateral_recovery() {
        let projection = LocalProjection::new(LAT0, LON0);
        let corners = [(0.0, 0.0), (100.0, 0.0), (50.0, 86.602_540_378)];
        let truth = (50.0, 28.867_513_459);

        let points: Vec<(f64, f64, f64)> = corners
            .iter()
            .map(|&(x, y)| {
                let (lat, lon) = geo(&projection, x, y);
                let d = ((truth.0 - x).powi(2) + (truth.1 - y).powi(2)).sqrt();
                (lat, lon, d)
            })
            .collect();

        let result = Triangulator::trilaterate(&points).unwrap();
        let (x, y) = projection.to_local(result.latitude, result.longitude);

        assert_eq!(result.method, "trilateration");
        assert!(((x - truth.0).powi(2) + (y - truth.1).powi(2)).sqrt() < 0.5);
        assert_eq!(result.accuracy, MIN_ACCURACY);
    }

    #[test]
    fn test_disjoint_circles_fall_back_to_weighted_centroid() {
        let projection = LocalProjection::new(LAT0, LON0);
        let (lat1, lon1) = geo(&projection, 100.0, 0.0);
        let (lat2, lon2) = geo(&projection, 0.0, 100.0);

        // 权重 1/1, 1/4, 1/4
        let points = [(LAT0, LON0, 1.0), (lat1, lon1, 2.0), (lat2, lon2, 2.0)];
        let result = Triangulator::trilaterate(&points).unwrap();
        assert!(result.is_fallback());

        let (x, y) = projection.to_local(result.latitude, result.longitude);
        assert!((x - 100.0 / 6.0).abs() < 1e-6);
        assert!((y - 100.0 / 6.0).abs() < 1e-6);
        assert!(result.accuracy > MIN_ACCURACY);
    }

    #[test]
    fn test_bilaterate_coincident_points() {
        let result = Triangulator::bilaterate((LAT0, LON0, 3.0), (LAT0, LON0, 7.5)).unwrap();
        assert_eq!(result.coordinates(), (LAT0, LON0));
        assert_eq!(result.accuracy, 7.5);
    }

    #[test]
    fn test_bilaterate_tangent_circles() {
        let projection = LocalProjection::new(0.0, 0.0);
        let (lat2, lon2) = projection.to_geo(100.0, 0.0);

        let result = Triangulator::bilaterate((0.0, 0.0, 40.0), (lat2, lon2, 60.0)).unwrap();
        let (x, y) = projection.to_local(result.latitude, result.longitude);
        assert!((x - 40.0).abs() < 1e-3);
        assert!(y.abs() < 1e-3);
        assert!(result.accuracy <= MIN_ACCURACY);
    }

    #[test]
    fn test_bilaterate_disjoint() {
        let projection = LocalProjection::new(LAT0, LON0);
        let (lat2, lon2) = projection.to_geo(0.0, 100.0);

        let result = Triangulator::bilaterate((LAT0, LON0, 10.0), (lat2, lon2, 30.0)).unwrap();
        let (x, y) = projection.to_local(result.latitude, result.longitude);
        assert!(x.abs() < 1e-6);
        assert!((y - 25.0).abs() < 1e-6);
        assert!((result.accuracy - 60.0).abs() < 1e-6);
    }

    #[test]
    fn test_bilaterate_nested() {
        let projection = LocalProjection::new(LAT0, LON0);
        let (lat2, lon2) = projection.to_geo(10.0, 0.0);

        // 大圆在原点，小圆被包含：向小圆方向插值 ratio = 5/50
        let result = Triangulator::bilaterate((LAT0, LON0, 50.0), (lat2, lon2, 5.0)).unwrap();
        let (x, _) = projection.to_local(result.latitude, result.longitude);
        assert!((x - 1.0).abs() < 1e-6);
        assert!((result.accuracy - 35.0).abs() < 1e-6);
    }

    #[test]
    fn test_bilaterate_intersecting() {
        let projection = LocalProjection::new(LAT0, LON0);
        let (lat2, lon2) = projection.to_geo(8.0, 0.0);

        // 两个半径 5 的圆，圆心相距 8：交点 (4, ±3)
        let result = Triangulator::bilaterate((LAT0, LON0, 5.0), (lat2, lon2, 5.0)).unwrap();
        let (x, y) = projection.to_local(result.latitude, result.longitude);
        assert!((x - 4.0).abs() < 1e-6);
        assert!(y.abs() < 1e-6);
        assert!((result.accuracy - 3.0).abs() < 1e-6);
    }
}
