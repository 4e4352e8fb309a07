use serde::{Deserialize, Serialize};

/// Rectangular region coordinates must fall inside
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub min_latitude: f64,
    pub max_latitude: f64,
    pub min_longitude: f64,
    pub max_longitude: f64,
}

impl BoundingBox {
    pub fn contains(&self, latitude: f64, longitude: f64) -> bool {
        (self.min_latitude..=self.max_latitude).contains(&latitude)
            && (self.min_longitude..=self.max_longitude).contains(&longitude)
    }
}

/// A point providers are known to return as a placeholder (e.g. a city
/// centroid for an unresolvable street address)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SuspectCenter {
    pub label: String,
    pub latitude: f64,
    pub longitude: f64,
    /// Degrees around the point treated as the placeholder
    pub radius_deg: f64,
}

impl SuspectCenter {
    fn matches(&self, latitude: f64, longitude: f64) -> bool {
        (latitude - self.latitude).abs() <= self.radius_deg
            && (longitude - self.longitude).abs() <= self.radius_deg
    }
}

/// Sanity checks applied to every coordinate pair
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CoordinateValidator {
    bounding_box: Option<BoundingBox>,
    suspect_centers: Vec<SuspectCenter>,
}

impl CoordinateValidator {
    pub fn new(bounding_box: Option<BoundingBox>, suspect_centers: Vec<SuspectCenter>) -> Self {
        Self {
            bounding_box,
            suspect_centers,
        }
    }

    /// Finite, within Earth ranges, and not the (0, 0) null island
    pub fn in_earth_range(latitude: f64, longitude: f64) -> bool {
        latitude.is_finite()
            && longitude.is_finite()
            && (-90.0..=90.0).contains(&latitude)
            && (-180.0..=180.0).contains(&longitude)
            && !(latitude == 0.0 && longitude == 0.0)
    }

    /// Explain why a coordinate pair is rejected, if it is
    pub fn check(&self, latitude: f64, longitude: f64) -> Result<(), String> {
        if !Self::in_earth_range(latitude, longitude) {
            return Err(format!("coordinates ({}, {}) out of range", latitude, longitude));
        }
        if let Some(bbox) = &self.bounding_box {
            if !bbox.contains(latitude, longitude) {
                return Err(format!(
                    "coordinates ({}, {}) outside configured bounding box",
                    latitude, longitude
                ));
            }
        }
        if let Some(center) = self
            .suspect_centers
            .iter()
            .find(|c| c.matches(latitude, longitude))
        {
            return Err(format!("coordinates match placeholder center {}", center.label));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_earth_range() {
        assert!(CoordinateValidator::in_earth_range(30.2, -97.7));
        assert!(!CoordinateValidator::in_earth_range(0.0, 0.0));
        assert!(!CoordinateValidator::in_earth_range(91.0, 0.5));
        assert!(!CoordinateValidator::in_earth_range(10.0, -181.0));
        assert!(!CoordinateValidator::in_earth_range(f64::NAN, 1.0));
    }

    #[test]
    fn test_bounding_box_and_suspect_centers() {
        let validator = CoordinateValidator::new(
            Some(BoundingBox {
                min_latitude: 24.0,
                max_latitude: 50.0,
                min_longitude: -125.0,
                max_longitude: -66.0,
            }),
            vec![SuspectCenter {
                label: "austin-centroid".into(),
                latitude: 30.2672,
                longitude: -97.7431,
                radius_deg: 0.0005,
            }],
        );
        assert!(validator.check(32.77, -96.79).is_ok());
        assert!(validator.check(51.5, -0.12).is_err());
        let err = validator.check(30.2672, -97.7431).unwrap_err();
        assert!(err.contains("austin-centroid"));
    }
}
