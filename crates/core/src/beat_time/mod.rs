//! Beat-relative time representation used when a pattern is rescaled to the
//! destination's rhythm.
//!
//! Going forward every time value becomes "beats since the pattern start",
//! measured on the timeline the value came from (pattern values on the
//! untransformed pattern timeline, destination values on the destination
//! timeline). Reconciliation then happens in that shared beat coordinate
//! system, and going backward the merged timeline turns beats into
//! milliseconds again. That last step is what stretches the pattern onto the
//! destination's tempo.

use tracing::debug;

use crate::{
    context::WorkItem,
    diff::KiaiMarker,
    partition::Part,
    reconcile::{MergedTiming, RedlineOrigin},
    timing::Timeline,
};

/// Bias added before flooring so values a hair below an integer stay on it.
pub const FLOOR_EPSILON: f64 = 1e-6;
const NEAR_INTEGER: f64 = 1e-6;

/// Floors a millisecond value with a small epsilon bias.
pub fn floor_ms(value: f64) -> f64 {
    (value + FLOOR_EPSILON).floor()
}

fn near_integer(value: f64) -> f64 {
    let rounded = value.round();
    if (value - rounded).abs() < NEAR_INTEGER {
        rounded
    } else {
        value
    }
}

#[derive(Debug, Clone)]
pub struct BeatTimeTransformer {
    origin: f64,
    pattern: Timeline,
    destination: Timeline,
}

impl BeatTimeTransformer {
    /// `origin` is the pattern start in milliseconds; it becomes beat zero.
    pub fn new(origin: f64, pattern: &Timeline, destination: &Timeline) -> Self {
        Self {
            origin,
            pattern: pattern.clone(),
            destination: destination.clone(),
        }
    }

    pub fn pattern_to_beats(&self, ms: f64) -> f64 {
        self.pattern.ms_to_beat(self.origin, ms)
    }

    /// Inverse of [`BeatTimeTransformer::pattern_to_beats`].
    pub fn pattern_to_ms(&self, beats: f64) -> f64 {
        self.pattern.beat_to_ms(self.origin, beats)
    }

    pub fn destination_to_beats(&self, ms: f64) -> f64 {
        self.destination.ms_to_beat(self.origin, ms)
    }

    /// Inverse of [`BeatTimeTransformer::destination_to_beats`].
    pub fn destination_to_ms(&self, beats: f64) -> f64 {
        self.destination.beat_to_ms(self.origin, beats)
    }

    /// The pattern timeline with offsets in beats.
    pub fn pattern_timeline(&self) -> Timeline {
        self.pattern.map_offsets(|ms| self.pattern_to_beats(ms))
    }

    /// The destination timeline with offsets in beats.
    pub fn destination_timeline(&self) -> Timeline {
        self.destination.map_offsets(|ms| self.destination_to_beats(ms))
    }

    /// Maps a beat value to milliseconds through a merged beat-coordinate
    /// timeline.
    pub fn to_ms(&self, merged: &Timeline, beats: f64) -> f64 {
        self.origin + merged.beats_to_ms_span(0.0, beats)
    }

    /// Rewrites object bounds and in-body points as beats.
    pub fn forward(&self, items: &mut [WorkItem]) {
        for item in items.iter_mut() {
            item.times.start = self.pattern_to_beats(item.times.start);
            item.times.end = self.pattern_to_beats(item.times.end);
            for tp in &mut item.timing.body_points {
                tp.offset = self.pattern_to_beats(tp.offset);
            }
        }
        debug!(origin = self.origin, objects = items.len(), "moved pattern to beat time");
    }

    /// Maps everything back to milliseconds through `merged_beats`.
    ///
    /// Destination redlines kept outside every part are restored through the
    /// destination's own timeline so they land exactly where they were. Some
    /// may now fall inside a part; [`MergedTiming::close_parts`] settles those.
    pub fn backward(
        &self,
        merged_beats: &Timeline,
        items: &mut [WorkItem],
        parts: &mut [Part],
        merged: &mut MergedTiming,
        markers: &mut [KiaiMarker],
    ) {
        let to_ms = |beats: f64| floor_ms(self.to_ms(merged_beats, beats));

        for item in items.iter_mut() {
            item.times.start = to_ms(item.times.start);
            item.times.end = to_ms(item.times.end).max(item.times.start);
            for tp in &mut item.timing.body_points {
                tp.offset = to_ms(tp.offset);
            }
        }
        for part in parts.iter_mut() {
            part.start_time = to_ms(part.start_time);
            part.end_time = to_ms(part.end_time).max(part.start_time);
        }
        for redline in merged.redlines_mut() {
            let ms = if redline.origin == RedlineOrigin::Anchored {
                self.destination_to_ms(redline.point.offset)
            } else {
                self.to_ms(merged_beats, redline.point.offset)
            };
            redline.point.offset = near_integer(ms);
        }
        for marker in markers.iter_mut() {
            marker.offset = to_ms(marker.offset);
        }
        debug!(objects = items.len(), parts = parts.len(), "moved pattern back to milliseconds");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::timing::TimingPoint;

    #[test]
    fn floors_with_bias() {
        assert_eq!(floor_ms(1249.9999999), 1250.0);
        assert_eq!(floor_ms(1250.7), 1250.0);
    }

    #[test]
    fn destination_points_survive_the_round_trip() {
        let pattern = Timeline::new(vec![TimingPoint::redline(1000.0, 500.0, 4)]);
        let destination = Timeline::new(vec![
            TimingPoint::redline(0.0, 250.0, 4),
            TimingPoint::redline(3000.0, 400.0, 4),
        ]);
        let transformer = BeatTimeTransformer::new(1000.0, &pattern, &destination);

        let beats = transformer.destination_timeline();
        let offsets: Vec<f64> = beats.points().iter().map(|tp| tp.offset).collect();
        assert_eq!(offsets, vec![-4.0, 8.0]);
        for tp in beats.points() {
            let ms = transformer.to_ms(&beats, tp.offset);
            assert!((ms - transformer.destination_to_ms(tp.offset)).abs() < 1e-9);
        }
    }

    #[test]
    fn pattern_beats_stretch_onto_merged_tempo() {
        let pattern = Timeline::new(vec![TimingPoint::redline(1000.0, 500.0, 4)]);
        let destination = Timeline::new(vec![TimingPoint::redline(0.0, 250.0, 4)]);
        let transformer = BeatTimeTransformer::new(1000.0, &pattern, &destination);

        assert_eq!(transformer.pattern_to_beats(1500.0), 1.0);
        let merged = transformer.destination_timeline();
        assert_eq!(floor_ms(transformer.to_ms(&merged, 1.0)), 1250.0);
    }
}
