//! Clearing destination content under the placed pattern and inserting the
//! pattern objects.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{
    chart::{Chart, GameMode, HitObject},
    context::capture_all,
    partition::Part,
    timing::{ChangeFields, ControlChange, TimingPoint},
};

/// Which destination content the pattern replaces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum PatternOverwriteMode {
    /// Remove nothing.
    NoOverwrite,
    /// Clear each part's time range, padded on both sides.
    #[default]
    PartitionedOverwrite,
    /// Clear one range spanning the whole pattern.
    CompleteOverwrite,
}

/// Closed time range `[start, end]` cleared in the destination.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Window {
    pub start: f64,
    pub end: f64,
}

impl Window {
    pub fn contains(&self, time: f64) -> bool {
        time >= self.start && time <= self.end
    }
}

fn in_any(windows: &[Window], time: f64) -> bool {
    windows.iter().any(|w| w.contains(time))
}

/// Ranges to clear for `parts` (in milliseconds) under `mode`.
pub fn removal_windows(mode: PatternOverwriteMode, parts: &[Part], padding: f64) -> Vec<Window> {
    match mode {
        PatternOverwriteMode::NoOverwrite => Vec::new(),
        PatternOverwriteMode::PartitionedOverwrite => parts
            .iter()
            .map(|part| Window {
                start: part.start_time - padding,
                end: part.end_time + padding,
            })
            .collect(),
        PatternOverwriteMode::CompleteOverwrite => {
            let start = parts.iter().map(|p| p.start_time).reduce(f64::min);
            let end = parts.iter().map(|p| p.end_time).reduce(f64::max);
            match (start, end) {
                (Some(start), Some(end)) => vec![Window {
                    start: start - padding,
                    end: end + padding,
                }],
                _ => Vec::new(),
            }
        }
    }
}

/// What [`remove`] left behind.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Removal {
    /// Changes restoring the audio and velocity of retained objects whose
    /// governing point was removed.
    pub boundary_changes: Vec<ControlChange>,
    /// Colour index each retained object had before removal, in order.
    pub retained_colours: Vec<u32>,
    pub removed_objects: usize,
    pub removed_points: usize,
}

/// Removes destination objects starting in any window and timing points
/// placed in any window.
pub fn remove(destination: &mut Chart, windows: &[Window]) -> Removal {
    let colours = destination.colour_indices();
    if windows.is_empty() {
        return Removal {
            retained_colours: colours,
            ..Removal::default()
        };
    }

    let contexts = capture_all(destination);
    let mode = destination.mode;
    let mut removal = Removal::default();
    let mut kept = Vec::with_capacity(destination.hit_objects.len());

    for ((object, colour), item) in destination
        .hit_objects
        .drain(..)
        .zip(colours)
        .zip(contexts)
    {
        if in_any(windows, object.time) {
            removal.removed_objects += 1;
            continue;
        }
        if in_any(windows, item.timing.hitsound_point.offset) {
            let start = TimingPoint {
                offset: object.time,
                ..item.timing.hitsound_point.clone()
            };
            removal
                .boundary_changes
                .push(ControlChange::new(start.clone(), ChangeFields::HITSOUNDS));
            if mode != GameMode::Standard || object.is_slider() {
                let velocity = TimingPoint {
                    sv: item.timing.sv,
                    uninherited: false,
                    ..start
                };
                removal
                    .boundary_changes
                    .push(ControlChange::new(velocity, ChangeFields::SV));
            }
        }
        removal.retained_colours.push(colour);
        kept.push(object);
    }
    destination.hit_objects = kept;
    removal.removed_points = destination
        .timeline
        .remove_all(|tp| in_any(windows, tp.offset));

    debug!(
        windows = windows.len(),
        objects = removal.removed_objects,
        points = removal.removed_points,
        boundary = removal.boundary_changes.len(),
        "cleared destination"
    );
    removal
}

/// Wanted colour of every retained and every pattern object.
#[derive(Debug, Clone, PartialEq)]
pub struct ColourPlan {
    pub retained: Vec<u32>,
    pub pattern: Vec<u32>,
}

/// Adds the pattern objects, restores time order and, given a plan, rewrites
/// combo skips so every object keeps its wanted colour.
pub fn insert(destination: &mut Chart, pattern: Vec<HitObject>, colours: Option<ColourPlan>) {
    let added = pattern.len();
    let Some(plan) = colours else {
        destination.hit_objects.extend(pattern);
        destination.sort_hit_objects();
        debug!(added, "inserted pattern objects");
        return;
    };

    let mut tagged: Vec<(HitObject, u32)> = destination
        .hit_objects
        .drain(..)
        .zip(plan.retained)
        .chain(pattern.into_iter().zip(plan.pattern))
        .collect();
    tagged.sort_by(|(a, _), (b, _)| HitObject::placement_order(a, b));
    let (objects, wanted): (Vec<HitObject>, Vec<u32>) = tagged.into_iter().unzip();

    destination.hit_objects = objects;
    destination.fix_combo_skip(&wanted);
    debug!(added, "inserted pattern objects with colour repair");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        geometry::Vec2,
        timing::{Timeline, TimingPoint},
    };

    fn destination() -> Chart {
        let mut sv = TimingPoint::greenline(950.0, 0.5);
        sv.volume = 40;
        Chart {
            timeline: Timeline::new(vec![
                TimingPoint::redline(0.0, 500.0, 4),
                sv,
                TimingPoint::greenline(3000.0, 1.2),
            ]),
            hit_objects: [0.0, 500.0, 1000.0, 1500.0, 2000.0, 2500.0]
                .into_iter()
                .map(|t| {
                    let mut ho = HitObject::circle(Vec2::zero(), t);
                    ho.new_combo = true;
                    ho
                })
                .collect(),
            ..Chart::default()
        }
    }

    fn part(start: f64, end: f64) -> Part {
        Part {
            start_time: start,
            end_time: end,
            objects: vec![],
            explicit: false,
        }
    }

    #[test]
    fn windows_per_mode() {
        let parts = [part(1000.0, 1200.0), part(3000.0, 3100.0)];
        assert!(removal_windows(PatternOverwriteMode::NoOverwrite, &parts, 5.0).is_empty());
        assert_eq!(
            removal_windows(PatternOverwriteMode::PartitionedOverwrite, &parts, 5.0),
            vec![
                Window { start: 995.0, end: 1205.0 },
                Window { start: 2995.0, end: 3105.0 }
            ]
        );
        assert_eq!(
            removal_windows(PatternOverwriteMode::CompleteOverwrite, &parts, 5.0),
            vec![Window { start: 995.0, end: 3105.0 }]
        );
    }

    #[test]
    fn no_windows_remove_nothing() {
        let mut chart = destination();
        let before = chart.clone();
        let removal = remove(&mut chart, &[]);
        assert_eq!(chart, before);
        assert_eq!(removal.retained_colours.len(), 6);
    }

    #[test]
    fn removes_objects_and_points_in_windows() {
        let mut chart = destination();
        let removal = remove(&mut chart, &[Window { start: 900.0, end: 1600.0 }]);

        let times: Vec<f64> = chart.hit_objects.iter().map(|ho| ho.time).collect();
        assert_eq!(times, vec![0.0, 500.0, 2000.0, 2500.0]);
        assert_eq!(removal.removed_objects, 2);
        assert_eq!(removal.removed_points, 1);
        assert_eq!(removal.retained_colours, vec![0, 1, 0, 1]);

        // objects at 2000 and 2500 were governed by the removed greenline
        assert_eq!(removal.boundary_changes.len(), 2);
        assert!(removal.boundary_changes.iter().all(|c| c.point.volume == 40));
    }

    #[test]
    fn colour_repair_keeps_destination_colours() {
        let mut chart = destination();
        let removal = remove(&mut chart, &[Window { start: 900.0, end: 1600.0 }]);
        let mut pattern = HitObject::circle(Vec2::zero(), 1000.0);
        pattern.new_combo = true;

        insert(
            &mut chart,
            vec![pattern],
            Some(ColourPlan {
                retained: removal.retained_colours.clone(),
                pattern: vec![3],
            }),
        );
        assert_eq!(chart.colour_indices(), vec![0, 1, 3, 0, 1]);
    }
}
