//! Per-object working records threaded through the placement pipeline.
//!
//! The pipeline never attaches data to [`HitObject`] itself. Instead each
//! pattern object is wrapped in a [`WorkItem`] stored in an arena indexed by
//! the object's position in the (sorted) pattern; parts refer to objects by
//! that index. The arena is dropped when placement finishes.

use crate::{
    chart::{span_duration, Chart, HitObject},
    timing::{Timeline, TimingPoint, DEFAULT_MPB},
};

/// Timing state that governed an object in the chart it came from.
#[derive(Debug, Clone, PartialEq)]
pub struct TimingContext {
    /// Redline setting the tempo at the object's start.
    pub redline: TimingPoint,
    /// Point whose sample settings and kiai apply at the object's start.
    pub hitsound_point: TimingPoint,
    /// Effective slider velocity multiplier.
    pub sv: f64,
    /// Global slider velocity the multiplier is relative to.
    pub global_sv: f64,
    /// Points inside the body of a path object that change its audio.
    pub body_points: Vec<TimingPoint>,
}

/// An object's start and end in whichever representation the pipeline is
/// currently using: milliseconds, or beats since the pattern start.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TransformTimeContext {
    pub start: f64,
    pub end: f64,
}

/// Working record for one pattern object.
#[derive(Debug, Clone)]
pub struct WorkItem {
    pub object: HitObject,
    pub timing: TimingContext,
    pub times: TransformTimeContext,
}

impl WorkItem {
    /// Wraps `object`, resolving its timing against `timeline`.
    pub fn capture(mut object: HitObject, timeline: &Timeline, global_sv: f64) -> Self {
        let start = object.time;
        let redline = timeline
            .redline_at(start)
            .cloned()
            .unwrap_or_else(|| TimingPoint::redline(start, DEFAULT_MPB, 4));
        let hitsound_point = timeline
            .point_at(start)
            .cloned()
            .unwrap_or_else(|| redline.clone());
        let sv = timeline.sv_at(start);

        if let Some(path) = object.slider_path_mut() {
            path.sv = sv;
            path.span_duration = span_duration(path.pixel_length, global_sv, sv, redline.mpb);
        }
        let end = object.end_time();

        let body_points = if object.is_slider() {
            timeline
                .points()
                .iter()
                .filter(|tp| tp.offset > start && tp.offset <= end)
                .cloned()
                .collect()
        } else {
            Vec::new()
        };

        Self {
            object,
            timing: TimingContext {
                redline,
                hitsound_point,
                sv,
                global_sv,
                body_points,
            },
            times: TransformTimeContext { start, end },
        }
    }

    pub fn is_path(&self) -> bool {
        self.object.is_slider()
    }

    pub fn span_count(&self) -> u32 {
        self.object
            .slider_path()
            .map(|path| path.span_count())
            .unwrap_or(1)
    }

    /// Writes the working times and velocity back into the object.
    pub fn finalize(&mut self) -> HitObject {
        let sv = self.timing.sv;
        if let Some(path) = self.object.slider_path_mut() {
            path.sv = sv;
        }
        self.object.set_times(self.times.start, self.times.end);
        self.object.clone()
    }
}

/// Captures every object of `chart` in arena order.
pub fn capture_all(chart: &Chart) -> Vec<WorkItem> {
    let global_sv = chart.difficulty.slider_multiplier;
    chart
        .hit_objects
        .iter()
        .cloned()
        .map(|object| WorkItem::capture(object, &chart.timeline, global_sv))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        chart::{CurveType, Difficulty, SliderPath},
        geometry::Vec2,
        timing::SampleSet,
    };

    #[test]
    fn captures_governing_points_and_body() {
        let mut soft = TimingPoint::greenline(250.0, 1.0);
        soft.sample_set = SampleSet::Soft;
        let chart = Chart {
            difficulty: Difficulty {
                slider_multiplier: 1.0,
                ..Difficulty::default()
            },
            timeline: Timeline::new(vec![
                TimingPoint::redline(0.0, 500.0, 4),
                TimingPoint::greenline(0.0, 0.5),
                soft,
            ]),
            hit_objects: vec![HitObject::slider(
                Vec2::new(0.0, 0.0),
                0.0,
                SliderPath {
                    curve_type: CurveType::Linear,
                    control_points: vec![Vec2::new(100.0, 0.0)],
                    spans: 1,
                    pixel_length: 50.0,
                    sv: 1.0,
                    span_duration: 0.0,
                    edge_sounds: vec![],
                    edge_sets: vec![],
                },
            )],
            ..Chart::default()
        };

        let items = capture_all(&chart);
        let item = &items[0];
        assert_eq!(item.timing.sv, 0.5);
        assert_eq!(item.timing.redline.mpb, 500.0);
        assert!(!item.timing.hitsound_point.uninherited);
        assert_eq!(item.times.end, 500.0);
        assert_eq!(item.timing.body_points.len(), 1);
        assert_eq!(item.timing.body_points[0].sample_set, SampleSet::Soft);
    }
}
