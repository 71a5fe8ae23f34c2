//! Spots: point proxies for domain objects, and the factory that derives them.

use crate::types::Frame;
use nalgebra::Point3;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Name of the feature the [`GeometricSpotFactory`] stores the object size under.
pub const SIZE_FEATURE: &str = "size";

/// Coordinates taken into account by costs and the crossing-link test.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Dimensions {
    /// x, y
    Two,
    /// x, y, z
    #[default]
    Three,
}

impl Dimensions {
    pub fn count(self) -> usize {
        match self {
            Dimensions::Two => 2,
            Dimensions::Three => 3,
        }
    }
}

/// Vertex proxy for one domain object at one frame.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Spot {
    pub frame: Frame,
    pub position: Point3<f64>,
    pub radius: f64,
    pub quality: f64,
    /// Open map of named numeric features (ordered for deterministic output)
    pub features: BTreeMap<String, f64>,
}

impl Spot {
    /// Spot at `frame`/`position` with unit radius and quality and no features.
    pub fn new(frame: Frame, position: Point3<f64>) -> Self {
        Self {
            frame,
            position,
            radius: 1.0,
            quality: 1.0,
            features: BTreeMap::new(),
        }
    }

    pub fn at(frame: Frame, x: f64, y: f64, z: f64) -> Self {
        Self::new(frame, Point3::new(x, y, z))
    }

    pub fn with_feature(mut self, name: impl Into<String>, value: f64) -> Self {
        self.features.insert(name.into(), value);
        self
    }

    pub fn feature(&self, name: &str) -> Option<f64> {
        self.features.get(name).copied()
    }

    /// Coordinate `axis` (0 = x, 1 = y, 2 = z).
    #[inline]
    pub fn coord(&self, axis: usize) -> f64 {
        self.position[axis]
    }

    /// Squared Euclidean distance over the first `dims` coordinates.
    pub fn squared_distance(&self, other: &Spot, dims: Dimensions) -> f64 {
        let delta = other.position - self.position;
        delta.iter().take(dims.count()).map(|d| d * d).sum()
    }
}

/// A domain object that can be tracked: it exposes a geometric center and a size.
pub trait TrackableObject {
    /// Identity of the object within one tracking run
    type Key: Clone + Ord + fmt::Debug + Send + Sync + 'static;

    fn key(&self) -> Self::Key;
    fn center(&self) -> Point3<f64>;
    fn size(&self) -> f64;

    /// Extra numeric features copied onto the spot.
    fn features(&self) -> BTreeMap<String, f64> {
        BTreeMap::new()
    }
}

/// Turns a domain object observed at `frame` into a spot.
pub trait SpotFactory<O: TrackableObject>: Send + Sync {
    fn make_spot(&self, object: &O, frame: Frame) -> Spot;
}

/// Default factory: center → position, radius and quality 1 unless overridden,
/// object size stored as the [`SIZE_FEATURE`] feature.
#[derive(Clone, Debug, Default)]
pub struct GeometricSpotFactory {
    pub radius: Option<f64>,
    pub quality: Option<f64>,
}

impl<O: TrackableObject> SpotFactory<O> for GeometricSpotFactory {
    fn make_spot(&self, object: &O, frame: Frame) -> Spot {
        let mut features = object.features();
        features.insert(SIZE_FEATURE.to_string(), object.size());
        Spot {
            frame,
            position: object.center(),
            radius: self.radius.unwrap_or(1.0),
            quality: self.quality.unwrap_or(1.0),
            features,
        }
    }
}

#[cfg(test)]
pub(crate) mod test_objects {
    use super::*;

    /// Minimal trackable object used across the crate's tests.
    #[derive(Clone, Debug, PartialEq)]
    pub struct Blob {
        pub id: u32,
        pub x: f64,
        pub y: f64,
        pub size: f64,
    }

    pub fn blob(id: u32, x: f64, y: f64) -> Blob {
        Blob {
            id,
            x,
            y,
            size: 10.0,
        }
    }

    impl TrackableObject for Blob {
        type Key = u32;

        fn key(&self) -> u32 {
            self.id
        }

        fn center(&self) -> Point3<f64> {
            Point3::new(self.x, self.y, 0.0)
        }

        fn size(&self) -> f64 {
            self.size
        }
    }
}

#[cfg(test)]
mod tests {
    use super::test_objects::blob;
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn factory_defaults_radius_and_quality() {
        let spot = GeometricSpotFactory::default().make_spot(&blob(1, 2.0, 3.0), 4);
        assert_eq!(spot.frame, 4);
        assert_abs_diff_eq!(spot.radius, 1.0);
        assert_abs_diff_eq!(spot.quality, 1.0);
        assert_eq!(spot.feature(SIZE_FEATURE), Some(10.0));
        assert_abs_diff_eq!(spot.coord(0), 2.0);
        assert_abs_diff_eq!(spot.coord(1), 3.0);
    }

    #[test]
    fn factory_overrides() {
        let factory = GeometricSpotFactory {
            radius: Some(2.5),
            quality: Some(0.3),
        };
        let spot = factory.make_spot(&blob(1, 0.0, 0.0), 0);
        assert_abs_diff_eq!(spot.radius, 2.5);
        assert_abs_diff_eq!(spot.quality, 0.3);
    }

    #[test]
    fn squared_distance_ignores_z_in_2d() {
        let a = Spot::at(0, 0.0, 0.0, 0.0);
        let b = Spot::at(1, 3.0, 4.0, 12.0);
        assert_abs_diff_eq!(a.squared_distance(&b, Dimensions::Two), 25.0);
        assert_abs_diff_eq!(a.squared_distance(&b, Dimensions::Three), 169.0);
    }
}
