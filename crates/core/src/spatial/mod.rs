//! Geometry transforms applied to pattern objects.

use tracing::debug;

use crate::{
    context::WorkItem,
    geometry::{Mat2, Vec2, PLAYFIELD_CENTRE},
};

/// Objects closer than this (in pixels) stack onto each other.
pub const STACK_DISTANCE: f64 = 3.0;

/// Rotation and uniform scale around the playfield centre.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SpatialTransform {
    pub scale: f64,
    /// Radians, counter-clockwise in playfield coordinates.
    pub rotate: f64,
}

impl SpatialTransform {
    pub fn new(scale: f64, rotate: f64) -> Self {
        Self { scale, rotate }
    }

    fn matrix(&self) -> Mat2 {
        Mat2::rotate_scale(self.rotate, self.scale)
    }

    pub fn is_identity(&self) -> bool {
        self.matrix() == Mat2::IDENTITY
    }

    /// Transforms every position and control point, scales path lengths and
    /// velocities by the same factor, then shifts all objects uniformly so
    /// none of them has a negative coordinate.
    pub fn apply(&self, items: &mut [WorkItem]) {
        if self.is_identity() || items.is_empty() {
            return;
        }
        let matrix = self.matrix();
        let map = |v: Vec2| PLAYFIELD_CENTRE + matrix.apply(v - PLAYFIELD_CENTRE);
        let factor = self.scale.abs();

        for item in items.iter_mut() {
            item.object.pos = map(item.object.pos);
            if let Some(path) = item.object.slider_path_mut() {
                for point in &mut path.control_points {
                    *point = map(*point);
                }
                path.pixel_length *= factor;
            }
            if item.is_path() {
                item.timing.sv *= factor;
            }
        }

        let shift = clamp_shift(items);
        if shift != Vec2::zero() {
            for item in items.iter_mut() {
                translate(item, shift);
            }
        }
        debug!(scale = self.scale, rotate = self.rotate, ?shift, "transformed pattern geometry");
    }
}

fn positions(item: &WorkItem) -> impl Iterator<Item = Vec2> + '_ {
    std::iter::once(item.object.pos).chain(
        item.object
            .slider_path()
            .into_iter()
            .flat_map(|path| path.control_points.iter().copied()),
    )
}

/// Translation moving the bounding box's minimum corner to non-negative
/// coordinates.
fn clamp_shift(items: &[WorkItem]) -> Vec2 {
    let corner = items
        .iter()
        .flat_map(positions)
        .reduce(Vec2::min)
        .unwrap_or_default();
    Vec2::new((-corner.x).max(0.0), (-corner.y).max(0.0))
}

fn translate(item: &mut WorkItem, delta: Vec2) {
    item.object.pos += delta;
    if let Some(path) = item.object.slider_path_mut() {
        for point in &mut path.control_points {
            *point += delta;
        }
    }
}

/// Stacks objects whose starts sit within [`STACK_DISTANCE`] pixels of each
/// other inside the stacking window, then bakes each stack level into an
/// explicit up-left offset of `offset` pixels.
///
/// `to_ms` converts item times to milliseconds for the window check.
pub fn bake_stacking<F>(items: &mut [WorkItem], leniency: f64, preempt: f64, offset: f64, to_ms: F)
where
    F: Fn(f64) -> f64,
{
    let window = preempt * leniency;
    let mut heights = vec![0u32; items.len()];

    for i in (0..items.len()).rev() {
        if heights[i] != 0 {
            continue;
        }
        let mut current = i;
        for j in (0..i).rev() {
            let gap = to_ms(items[current].times.start) - to_ms(items[j].times.end);
            if gap > window {
                break;
            }
            if items[j].object.pos.distance(items[current].object.pos) < STACK_DISTANCE {
                heights[j] = heights[current] + 1;
                current = j;
            }
        }
    }

    let mut stacked = 0;
    for (item, &height) in items.iter_mut().zip(&heights) {
        if height > 0 {
            let shift = -(height as f64) * offset;
            translate(item, Vec2::new(shift, shift));
            stacked += 1;
        }
    }
    debug!(stacked, window, "baked pattern stacking");
}
