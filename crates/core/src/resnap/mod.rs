//! Quantization of times to beat subdivisions and of positions to lanes.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{
    context::WorkItem,
    geometry::PLAYFIELD_WIDTH,
    timing::Timeline,
};

/// Vertical position every lane-based object is forced to.
pub const MANIA_Y: f64 = 192.0;

/// A grid step of `numerator / denominator` beats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BeatDivisor {
    pub numerator: u32,
    pub denominator: u32,
}

impl BeatDivisor {
    pub const fn new(numerator: u32, denominator: u32) -> Self {
        Self {
            numerator,
            denominator,
        }
    }

    pub fn beats(&self) -> f64 {
        self.numerator as f64 / self.denominator.max(1) as f64
    }

    /// 1/16 and 1/12, which together cover the usual straight and triplet
    /// rhythms.
    pub fn defaults() -> Vec<BeatDivisor> {
        vec![BeatDivisor::new(1, 16), BeatDivisor::new(1, 12)]
    }
}

/// Unit of the timeline offsets and times being snapped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeDomain {
    Milliseconds,
    /// Offsets are beats; one beat is one unit whatever the tempo.
    Beats,
}

/// Snaps `time` to the nearest grid point of any divisor, measured from the
/// redline governing it. A result past the next redline lands on that
/// redline instead.
pub fn resnap(timeline: &Timeline, time: f64, divisors: &[BeatDivisor], domain: TimeDomain) -> f64 {
    let Some(redline) = timeline.redline_at(time) else {
        return time;
    };
    let beat = match domain {
        TimeDomain::Milliseconds => redline.mpb,
        TimeDomain::Beats => 1.0,
    };

    let snapped = divisors
        .iter()
        .map(|d| beat * d.beats())
        .filter(|step| step.is_finite() && *step > 0.0)
        .map(|step| redline.offset + ((time - redline.offset) / step).round() * step)
        .min_by(|a, b| (a - time).abs().total_cmp(&(b - time).abs()))
        .unwrap_or(time);

    match timeline
        .redlines()
        .find(|tp| tp.offset > redline.offset && tp.offset > time)
    {
        Some(next) if snapped > next.offset => next.offset,
        _ => snapped,
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Resnapper {
    pub divisors: Vec<BeatDivisor>,
    pub domain: TimeDomain,
}

impl Resnapper {
    pub fn new(divisors: Vec<BeatDivisor>, domain: TimeDomain) -> Self {
        Self { divisors, domain }
    }

    pub fn snap(&self, timeline: &Timeline, time: f64) -> f64 {
        resnap(timeline, time, &self.divisors, self.domain)
    }

    /// Snaps object bounds and in-body points. Path ends are snapped one
    /// traversal at a time so the duration stays a whole number of spans.
    pub fn apply(&self, timeline: &Timeline, items: &mut [WorkItem]) {
        let mut moved = 0;
        for item in items.iter_mut() {
            let before = item.times;
            let start = self.snap(timeline, item.times.start);

            let end = if item.is_path() {
                let spans = item.span_count() as f64;
                let old_span = (item.times.end - item.times.start) / spans;
                let new_span = self.snap(timeline, start + old_span) - start;
                let span = if new_span > 0.0 { new_span } else { old_span };
                start + span * spans
            } else if item.times.end > item.times.start {
                self.snap(timeline, item.times.end).max(start)
            } else {
                start
            };

            for tp in &mut item.timing.body_points {
                tp.offset = self.snap(timeline, tp.offset);
            }
            item.times.start = start;
            item.times.end = end;
            if item.times != before {
                moved += 1;
            }
        }
        debug!(moved, domain = ?self.domain, "resnapped pattern");
    }
}

/// Centre x of the lane `x` falls into, for a `keys`-lane playfield.
pub fn snap_to_column(x: f64, keys: u32) -> f64 {
    let keys = keys.max(1);
    let width = PLAYFIELD_WIDTH / keys as f64;
    let column = (x / width).floor().clamp(0.0, (keys - 1) as f64);
    ((column + 0.5) * width).floor()
}

/// Moves every object to its lane centre at [`MANIA_Y`].
pub fn snap_columns(items: &mut [WorkItem], keys: u32) {
    for item in items.iter_mut() {
        item.object.pos.x = snap_to_column(item.object.pos.x, keys);
        item.object.pos.y = MANIA_Y;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::timing::TimingPoint;

    fn timeline() -> Timeline {
        Timeline::new(vec![
            TimingPoint::redline(0.0, 480.0, 4),
            TimingPoint::redline(2000.0, 300.0, 4),
        ])
    }

    #[test]
    fn snaps_to_nearest_divisor() {
        let divisors = BeatDivisor::defaults();
        // 1/16 of 480 is 30, 1/12 is 40
        assert_eq!(resnap(&timeline(), 41.0, &divisors, TimeDomain::Milliseconds), 40.0);
        assert_eq!(resnap(&timeline(), 62.0, &divisors, TimeDomain::Milliseconds), 60.0);
        assert_eq!(resnap(&timeline(), 2076.0, &divisors, TimeDomain::Milliseconds), 2075.0);
    }

    #[test]
    fn never_snaps_past_the_next_redline() {
        // two and a half beats is 1200 ms, so 1990 would round up to 2400
        let divisors = [BeatDivisor::new(5, 2)];
        assert_eq!(resnap(&timeline(), 1990.0, &divisors, TimeDomain::Milliseconds), 2000.0);
    }

    #[test]
    fn resnapping_is_idempotent() {
        let divisors = BeatDivisor::defaults();
        let timeline = timeline();
        for t in [3.0, 17.0, 250.0, 777.0, 1999.0, 2003.5, 4567.0] {
            let once = resnap(&timeline, t, &divisors, TimeDomain::Milliseconds);
            let twice = resnap(&timeline, once, &divisors, TimeDomain::Milliseconds);
            assert!((once - twice).abs() < 1e-9, "{t}: {once} vs {twice}");
        }
    }

    #[test]
    fn beat_domain_uses_unit_beats() {
        let beats = Timeline::new(vec![TimingPoint::redline(0.0, 250.0, 4)]);
        let divisors = [BeatDivisor::new(1, 4)];
        assert_eq!(resnap(&beats, 1.3, &divisors, TimeDomain::Beats), 1.25);
    }

    #[test]
    fn columns_snap_to_lane_centres() {
        assert_eq!(snap_to_column(10.0, 4), 64.0);
        assert_eq!(snap_to_column(300.0, 4), 320.0);
        assert_eq!(snap_to_column(600.0, 4), 448.0);
        assert_eq!(snap_to_column(100.0, 7), 109.0);
    }
}
