//! 附近活动查询用的球面几何工具
//!
//! 先用经纬度包围盒做粗过滤，再用 haversine 精确计算距离。

pub const EARTH_RADIUS_KM: f64 = 6371.0;

/// 1度纬度约111km
pub const KM_PER_DEGREE_LAT: f64 = 111.0;

/// Haversine 球面距离，单位公里
pub fn haversine_km(from_lat: f64, from_lon: f64, to_lat: f64, to_lon: f64) -> f64 {
    let from_lat_rad = from_lat.to_radians();
    let to_lat_rad = to_lat.to_radians();
    let delta_lat = (to_lat - from_lat).to_radians();
    let delta_lon = (to_lon - from_lon).to_radians();

    let a = (delta_lat / 2.0).sin().powi(2)
        + from_lat_rad.cos() * to_lat_rad.cos() * (delta_lon / 2.0).sin().powi(2);
    let c = 2.0 * a.sqrt().atan2((1.0 - a).sqrt());

    EARTH_RADIUS_KM * c
}

/// 经纬度包围盒，用于数据库粗过滤
#[derive(Debug, Clone, Copy)]
pub struct BoundingBox {
    pub min_lat: f64,
    pub max_lat: f64,
    pub min_lon: f64,
    pub max_lon: f64,
}

impl BoundingBox {
    /// 以 (lat, lon) 为中心、radius_km 为半径构建包围盒
    ///
    /// 经度方向的度宽按 cos(纬度) 缩放
    pub fn around(lat: f64, lon: f64, radius_km: f64) -> Self {
        let lat_range = radius_km / KM_PER_DEGREE_LAT;
        let lon_range = radius_km / (KM_PER_DEGREE_LAT * lat.to_radians().cos());

        Self {
            min_lat: lat - lat_range,
            max_lat: lat + lat_range,
            min_lon: lon - lon_range,
            max_lon: lon + lon_range,
        }
    }

    pub fn contains(&self, lat: f64, lon: f64) -> bool {
        lat >= self.min_lat && lat <= self.max_lat && lon >= self.min_lon && lon <= self.max_lon
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const COPENHAGEN: (f64, f64) = (55.6761, 12.5683);
    const AARHUS: (f64, f64) = (56.1629, 10.2039);

    #[test]
    fn distance_to_self_is_zero() {
        let d = haversine_km(COPENHAGEN.0, COPENHAGEN.1, COPENHAGEN.0, COPENHAGEN.1);
        assert_eq!(d, 0.0);
    }

    #[test]
    fn copenhagen_to_aarhus_is_roughly_157_km() {
        let d = haversine_km(COPENHAGEN.0, COPENHAGEN.1, AARHUS.0, AARHUS.1);
        assert!(d > 150.0 && d < 165.0, "got {}", d);
    }

    #[test]
    fn distance_is_symmetric() {
        let forward = haversine_km(COPENHAGEN.0, COPENHAGEN.1, AARHUS.0, AARHUS.1);
        let back = haversine_km(AARHUS.0, AARHUS.1, COPENHAGEN.0, COPENHAGEN.1);
        assert!((forward - back).abs() < 1e-9);
    }

    #[test]
    fn bounding_box_contains_points_within_radius() {
        let bbox = BoundingBox::around(COPENHAGEN.0, COPENHAGEN.1, 10.0);

        assert!(bbox.contains(COPENHAGEN.0, COPENHAGEN.1));
        // 约5公里以北
        assert!(bbox.contains(COPENHAGEN.0 + 0.045, COPENHAGEN.1));
        // 奥胡斯在10公里盒子外
        assert!(!bbox.contains(AARHUS.0, AARHUS.1));
    }

    #[test]
    fn bounding_box_widens_longitude_at_higher_latitude() {
        let equator = BoundingBox::around(0.0, 0.0, 10.0);
        let north = BoundingBox::around(60.0, 0.0, 10.0);

        let equator_width = equator.max_lon - equator.min_lon;
        let north_width = north.max_lon - north.min_lon;

        assert!(north_width > equator_width);
    }
}
