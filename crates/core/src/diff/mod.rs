//! Turns the placed pattern into [`ControlChange`]s for the destination
//! timeline.
//!
//! Every builder is coordinate-agnostic except where noted: the timelines,
//! parts and items passed in must share one time representation.

use tracing::debug;

use crate::{
    chart::GameMode,
    context::WorkItem,
    partition::Part,
    reconcile::MergedTiming,
    timing::{ChangeFields, ControlChange, Timeline, TimingPoint},
};

/// A kiai state that must hold from `offset` on.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct KiaiMarker {
    pub offset: f64,
    pub kiai: bool,
}

/// Greenline template carrying only the given offset and velocity.
fn greenline_from(source: &TimingPoint, offset: f64, sv: f64) -> TimingPoint {
    TimingPoint {
        offset,
        sv,
        uninherited: false,
        ..source.clone()
    }
}

/// A tempo write for every merged redline.
pub fn redline_changes(merged: &MergedTiming) -> Vec<ControlChange> {
    merged
        .redlines()
        .iter()
        .map(|r| ControlChange::redline(r.point.clone()))
        .collect()
}

/// Velocity greenlines at the start of every object whose speed depends on
/// it: path objects in standard mode, every object in scrolling modes.
pub fn velocity_changes(items: &[WorkItem], mode: GameMode) -> Vec<ControlChange> {
    items
        .iter()
        .filter(|item| mode != GameMode::Standard || item.is_path())
        .map(|item| {
            let point = greenline_from(&item.timing.hitsound_point, item.times.start, item.timing.sv);
            ControlChange::new(point, ChangeFields::SV)
        })
        .collect()
}

/// Sample settings at every object start and every in-body point.
pub fn hitsound_changes(items: &[WorkItem]) -> Vec<ControlChange> {
    let mut changes = Vec::new();
    for item in items {
        let start = TimingPoint {
            offset: item.times.start,
            ..item.timing.hitsound_point.clone()
        };
        changes.push(ControlChange::new(start, ChangeFields::HITSOUNDS));
        changes.extend(
            item.timing
                .body_points
                .iter()
                .map(|tp| ControlChange::new(tp.clone(), ChangeFields::HITSOUNDS)),
        );
    }
    changes
}

/// Kiai state at each part start and every toggle inside the part.
pub fn kiai_markers(pattern: &Timeline, parts: &[Part]) -> Vec<KiaiMarker> {
    let mut markers = Vec::new();
    for part in parts {
        let mut state = pattern
            .point_at(part.start_time)
            .map(|tp| tp.kiai)
            .unwrap_or(false);
        markers.push(KiaiMarker {
            offset: part.start_time,
            kiai: state,
        });
        for tp in pattern
            .points()
            .iter()
            .filter(|tp| tp.offset > part.start_time && tp.offset < part.end_time)
        {
            if tp.kiai != state {
                state = tp.kiai;
                markers.push(KiaiMarker {
                    offset: tp.offset,
                    kiai: state,
                });
            }
        }
    }
    markers
}

/// Where settings revert after `part`: its end, but strictly after its last
/// object start. Milliseconds.
fn revert_offset(part: &Part, items: &[WorkItem]) -> Option<f64> {
    let last_start = part
        .objects
        .iter()
        .map(|&index| items[index].times.start)
        .reduce(f64::max)?;
    Some(part.end_time.max(last_start + 1.0))
}

/// The destination's kiai state resuming after every part.
///
/// Works in milliseconds like [`part_end_reverts`].
pub fn kiai_end_markers(destination: &Timeline, parts: &[Part], items: &[WorkItem]) -> Vec<KiaiMarker> {
    parts
        .iter()
        .filter_map(|part| revert_offset(part, items))
        .map(|offset| KiaiMarker {
            offset,
            kiai: destination.point_at(offset).map(|tp| tp.kiai).unwrap_or(false),
        })
        .collect()
}

pub fn kiai_changes(markers: &[KiaiMarker]) -> Vec<ControlChange> {
    markers
        .iter()
        .map(|marker| {
            let mut point = TimingPoint::greenline(marker.offset, 1.0);
            point.kiai = marker.kiai;
            ControlChange::new(point, ChangeFields::KIAI)
        })
        .collect()
}

/// Restores the destination's velocity (and optionally sample settings) after
/// every part. The revert lands strictly after the part's last object start
/// so it never overrides that object's own settings.
///
/// Works in milliseconds: `destination` is the destination timeline as it was
/// before placement.
pub fn part_end_reverts(
    destination: &Timeline,
    parts: &[Part],
    items: &[WorkItem],
    include_hitsounds: bool,
) -> Vec<ControlChange> {
    let fields = if include_hitsounds {
        ChangeFields::SV.with(ChangeFields::HITSOUNDS)
    } else {
        ChangeFields::SV
    };
    let changes: Vec<ControlChange> = parts
        .iter()
        .filter_map(|part| {
            let offset = revert_offset(part, items)?;
            let governing = destination.point_at(offset)?;
            let point = greenline_from(governing, offset, destination.sv_at(offset));
            Some(ControlChange::new(point, fields))
        })
        .collect();
    debug!(reverts = changes.len(), "built part-end reverts");
    changes
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        chart::{Chart, CurveType, HitObject, SliderPath},
        context::capture_all,
        geometry::Vec2,
        timing::SampleSet,
    };

    fn kiai_at(offset: f64, kiai: bool) -> TimingPoint {
        let mut tp = TimingPoint::greenline(offset, 1.0);
        tp.kiai = kiai;
        tp
    }

    fn part(start: f64, end: f64, objects: Vec<usize>) -> Part {
        Part {
            start_time: start,
            end_time: end,
            objects,
            explicit: false,
        }
    }

    #[test]
    fn kiai_follows_pattern_inside_and_destination_after() {
        let pattern = Timeline::new(vec![
            TimingPoint::redline(0.0, 500.0, 4),
            kiai_at(0.0, true),
            kiai_at(500.0, false),
            kiai_at(700.0, false),
        ]);
        let destination = Timeline::new(vec![TimingPoint::redline(0.0, 400.0, 4), kiai_at(900.0, true)]);
        let chart = Chart {
            hit_objects: vec![HitObject::circle(Vec2::zero(), 0.0), HitObject::circle(Vec2::zero(), 600.0)],
            ..Chart::default()
        };
        let items = capture_all(&chart);
        let parts = [part(0.0, 1000.0, vec![0, 1])];

        let mut markers = kiai_markers(&pattern, &parts);
        markers.extend(kiai_end_markers(&destination, &parts, &items));
        assert_eq!(
            markers,
            vec![
                KiaiMarker { offset: 0.0, kiai: true },
                KiaiMarker { offset: 500.0, kiai: false },
                KiaiMarker { offset: 1000.0, kiai: true },
            ]
        );
    }

    #[test]
    fn kiai_end_keeps_the_last_object_in_the_pattern_state() {
        let destination = Timeline::new(vec![TimingPoint::redline(0.0, 400.0, 4)]);
        let chart = Chart {
            hit_objects: vec![HitObject::circle(Vec2::zero(), 1000.0), HitObject::circle(Vec2::zero(), 1500.0)],
            ..Chart::default()
        };
        let items = capture_all(&chart);

        let markers = kiai_end_markers(&destination, &[part(1000.0, 1500.0, vec![0, 1])], &items);
        assert_eq!(markers, vec![KiaiMarker { offset: 1501.0, kiai: false }]);
    }

    #[test]
    fn velocity_changes_only_for_paths_in_standard() {
        let mut slider = HitObject::slider(
            Vec2::zero(),
            100.0,
            SliderPath {
                curve_type: CurveType::Linear,
                control_points: vec![Vec2::new(50.0, 0.0)],
                spans: 1,
                pixel_length: 50.0,
                sv: 1.0,
                span_duration: 0.0,
                edge_sounds: vec![],
                edge_sets: vec![],
            },
        );
        slider.new_combo = true;
        let chart = Chart {
            timeline: Timeline::new(vec![TimingPoint::redline(0.0, 500.0, 4), TimingPoint::greenline(0.0, 1.5)]),
            hit_objects: vec![HitObject::circle(Vec2::zero(), 0.0), slider],
            ..Chart::default()
        };
        let items = capture_all(&chart);

        let standard = velocity_changes(&items, GameMode::Standard);
        assert_eq!(standard.len(), 1);
        assert_eq!(standard[0].point.offset, 100.0);
        assert_eq!(standard[0].point.sv, 1.5);
        assert_eq!(velocity_changes(&items, GameMode::Taiko).len(), 2);
    }

    #[test]
    fn reverts_land_after_the_last_object_start() {
        let mut soft = TimingPoint::greenline(0.0, 0.75);
        soft.sample_set = SampleSet::Soft;
        let destination = Timeline::new(vec![TimingPoint::redline(0.0, 500.0, 4), soft]);
        let chart = Chart {
            timeline: destination.clone(),
            hit_objects: vec![HitObject::circle(Vec2::zero(), 2000.0)],
            ..Chart::default()
        };
        let items = capture_all(&chart);

        let reverts = part_end_reverts(&destination, &[part(2000.0, 2000.0, vec![0])], &items, true);
        assert_eq!(reverts.len(), 1);
        assert_eq!(reverts[0].point.offset, 2001.0);
        assert_eq!(reverts[0].point.sv, 0.75);
        assert_eq!(reverts[0].point.sample_set, SampleSet::Soft);
        assert!(reverts[0].fields.sample_set && reverts[0].fields.sv);
    }
}
