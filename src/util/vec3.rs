//! World-space positions and their projection onto the interest plane

use serde::{Deserialize, Serialize};
use std::ops::Sub;

use crate::util::vec2::Vec2;

/// World-space position as reported by the simulation
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
pub struct Vec3 {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Vec3 {
    pub const ZERO: Vec3 = Vec3 { x: 0.0, y: 0.0, z: 0.0 };

    #[inline]
    pub fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }

    #[inline]
    pub fn length_sq(&self) -> f32 {
        self.x * self.x + self.y * self.y + self.z * self.z
    }

    #[inline]
    pub fn distance_to(&self, other: Vec3) -> f32 {
        (*self - other).length_sq().sqrt()
    }

    #[inline]
    pub fn distance_sq_to(&self, other: Vec3) -> f32 {
        (*self - other).length_sq()
    }

    #[inline]
    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite() && self.z.is_finite()
    }
}

impl Sub for Vec3 {
    type Output = Self;
    fn sub(self, rhs: Self) -> Self {
        Self {
            x: self.x - rhs.x,
            y: self.y - rhs.y,
            z: self.z - rhs.z,
        }
    }
}

/// Which pair of world axes forms the 2D interest plane
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AxisMode {
    /// Ground plane of a Y-up world
    #[default]
    Xz,
    /// Screen plane of a 2D world
    Xy,
}

impl AxisMode {
    #[inline]
    pub fn project(self, position: Vec3) -> Vec2 {
        match self {
            AxisMode::Xz => Vec2::new(position.x, position.z),
            AxisMode::Xy => Vec2::new(position.x, position.y),
        }
    }
}

impl std::str::FromStr for AxisMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "xz" => Ok(AxisMode::Xz),
            "xy" => Ok(AxisMode::Xy),
            other => Err(format!("unknown axis mode '{}'", other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_project_xz() {
        let p = Vec3::new(1.0, 2.0, 3.0);
        assert_eq!(AxisMode::Xz.project(p), Vec2::new(1.0, 3.0));
    }

    #[test]
    fn test_project_xy() {
        let p = Vec3::new(1.0, 2.0, 3.0);
        assert_eq!(AxisMode::Xy.project(p), Vec2::new(1.0, 2.0));
    }

    #[test]
    fn test_distance_is_three_dimensional() {
        let a = Vec3::ZERO;
        let b = Vec3::new(2.0, 3.0, 6.0);
        assert!((a.distance_to(b) - 7.0).abs() < 1e-5);
        assert!((a.distance_sq_to(b) - 49.0).abs() < 1e-4);
    }

    #[test]
    fn test_axis_mode_parse() {
        assert_eq!("XZ".parse::<AxisMode>(), Ok(AxisMode::Xz));
        assert_eq!("xy".parse::<AxisMode>(), Ok(AxisMode::Xy));
        assert!("yz".parse::<AxisMode>().is_err());
    }

    #[test]
    fn test_axis_mode_serde() {
        let json = serde_json::to_string(&AxisMode::Xy).unwrap();
        assert_eq!(json, "\"xy\"");
        let parsed: AxisMode = serde_json::from_str("\"xz\"").unwrap();
        assert_eq!(parsed, AxisMode::Xz);
    }
}
