use std::ops::{Add, AddAssign, Mul, Neg, Sub};

use serde::{Deserialize, Serialize};

/// Width of the playfield in playfield pixels.
pub const PLAYFIELD_WIDTH: f64 = 512.0;
/// Height of the playfield in playfield pixels.
pub const PLAYFIELD_HEIGHT: f64 = 384.0;
/// Centre of the playfield; rotation and scaling pivot around it.
pub const PLAYFIELD_CENTRE: Vec2 = Vec2::new(PLAYFIELD_WIDTH / 2.0, PLAYFIELD_HEIGHT / 2.0);

/// Position on the playfield.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Vec2 {
    pub x: f64,
    pub y: f64,
}

impl Vec2 {
    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    pub const fn zero() -> Self {
        Self { x: 0.0, y: 0.0 }
    }

    pub fn length(self) -> f64 {
        self.x.hypot(self.y)
    }

    pub fn distance(self, other: Vec2) -> f64 {
        (self - other).length()
    }

    /// Component-wise minimum.
    pub fn min(self, other: Vec2) -> Vec2 {
        Vec2::new(self.x.min(other.x), self.y.min(other.y))
    }
}

impl Neg for Vec2 {
    type Output = Vec2;
    fn neg(self) -> Self::Output {
        Vec2::new(-self.x, -self.y)
    }
}

impl Add for Vec2 {
    type Output = Vec2;
    fn add(self, rhs: Vec2) -> Self::Output {
        Vec2::new(self.x + rhs.x, self.y + rhs.y)
    }
}

impl AddAssign for Vec2 {
    fn add_assign(&mut self, rhs: Vec2) {
        self.x += rhs.x;
        self.y += rhs.y;
    }
}

impl Sub for Vec2 {
    type Output = Vec2;
    fn sub(self, rhs: Vec2) -> Self::Output {
        self + -rhs
    }
}

impl Mul<f64> for Vec2 {
    type Output = Vec2;
    fn mul(self, rhs: f64) -> Self::Output {
        Vec2::new(self.x * rhs, self.y * rhs)
    }
}

impl From<(f64, f64)> for Vec2 {
    fn from((x, y): (f64, f64)) -> Self {
        Vec2::new(x, y)
    }
}

/// Row-major 2x2 matrix used for combined rotation and uniform scaling.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Mat2 {
    pub m11: f64,
    pub m12: f64,
    pub m21: f64,
    pub m22: f64,
}

impl Mat2 {
    pub const IDENTITY: Mat2 = Mat2 {
        m11: 1.0,
        m12: 0.0,
        m21: 0.0,
        m22: 1.0,
    };

    /// Rotation by `radians` followed by a uniform `scale`.
    pub fn rotate_scale(radians: f64, scale: f64) -> Self {
        let (sin, cos) = radians.sin_cos();
        Self {
            m11: cos * scale,
            m12: -sin * scale,
            m21: sin * scale,
            m22: cos * scale,
        }
    }

    pub fn apply(&self, v: Vec2) -> Vec2 {
        Vec2::new(
            self.m11 * v.x + self.m12 * v.y,
            self.m21 * v.x + self.m22 * v.y,
        )
    }
}
