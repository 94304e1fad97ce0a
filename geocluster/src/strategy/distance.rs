//! Distance functions between coordinates.

/// Mean Earth radius in metres.
const EARTH_RADIUS_M: f64 = 6_371_008.8;

pub trait DistanceFn: Send + Sync {
    fn name(&self) -> &'static str;

    /// Distance between two coordinates of equal dimension.
    fn distance(&self, a: &[f64], b: &[f64]) -> f64;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct EuclideanDistance;

impl DistanceFn for EuclideanDistance {
    fn name(&self) -> &'static str {
        "euclidean"
    }

    fn distance(&self, a: &[f64], b: &[f64]) -> f64 {
        a.iter()
            .zip(b.iter())
            .map(|(x, y)| (x - y).powi(2))
            .sum::<f64>()
            .sqrt()
    }
}

/// Great-circle distance in metres; coordinates are `[lon, lat]` in degrees.
#[derive(Debug, Clone, Copy, Default)]
pub struct HaversineDistance;

impl DistanceFn for HaversineDistance {
    fn name(&self) -> &'static str {
        "haversine"
    }

    fn distance(&self, a: &[f64], b: &[f64]) -> f64 {
        let (lon1, lat1) = (a[0].to_radians(), a[1].to_radians());
        let (lon2, lat2) = (b[0].to_radians(), b[1].to_radians());
        let h = ((lat2 - lat1) / 2.0).sin().powi(2)
            + lat1.cos() * lat2.cos() * ((lon2 - lon1) / 2.0).sin().powi(2);
        2.0 * EARTH_RADIUS_M * h.sqrt().min(1.0).asin()
    }
}
