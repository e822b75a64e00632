//! Timing points and the ordered timeline that answers tempo questions.
//!
//! A timeline mixes two kinds of points: redlines (uninherited) set an
//! absolute tempo and meter, greenlines (inherited) adjust slider velocity and
//! audio attributes until the next point. All relative time math integrates
//! over redline sections; the same timeline type is used with offsets in
//! milliseconds and, during beat-time transforms, with offsets in beats.

mod change;

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

use crate::{PlacementError, Result};

pub use change::{apply_changes, ChangeFields, ControlChange};

/// Tempo reported by a timeline that has no redline at all.
pub const DEFAULT_MPB: f64 = 1000.0;
/// Two tempos closer than this are considered equal.
pub const TEMPO_EPSILON: f64 = 1e-7;

/// Default sample bank selected by a timing point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SampleSet {
    #[default]
    Auto,
    Normal,
    Soft,
    Drum,
}

/// A single entry of a chart's timeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimingPoint {
    /// Start of the section, in milliseconds (or beats while beat-transformed).
    pub offset: f64,
    /// Milliseconds per beat. Only meaningful on redlines.
    #[serde(default = "default_mpb")]
    pub mpb: f64,
    /// Beats per bar. Only meaningful on redlines.
    #[serde(default = "default_meter")]
    pub meter: u32,
    #[serde(default)]
    pub sample_set: SampleSet,
    #[serde(default)]
    pub sample_index: u32,
    #[serde(default = "default_volume")]
    pub volume: u8,
    /// Slider velocity multiplier. Only meaningful on greenlines.
    #[serde(default = "default_sv")]
    pub sv: f64,
    pub uninherited: bool,
    #[serde(default)]
    pub kiai: bool,
    #[serde(default)]
    pub omit_first_bar_line: bool,
}

fn default_mpb() -> f64 {
    DEFAULT_MPB
}

fn default_meter() -> u32 {
    4
}

fn default_volume() -> u8 {
    100
}

fn default_sv() -> f64 {
    1.0
}

impl TimingPoint {
    /// Creates a redline with the given tempo and meter.
    pub fn redline(offset: f64, mpb: f64, meter: u32) -> Self {
        Self {
            offset,
            mpb,
            meter,
            sample_set: SampleSet::Normal,
            sample_index: 0,
            volume: 100,
            sv: 1.0,
            uninherited: true,
            kiai: false,
            omit_first_bar_line: false,
        }
    }

    /// Creates a greenline with the given slider velocity multiplier.
    pub fn greenline(offset: f64, sv: f64) -> Self {
        Self {
            uninherited: false,
            sv,
            ..Self::redline(offset, DEFAULT_MPB, 4)
        }
    }

    /// Whether both points produce the same audio, kiai and velocity state.
    pub fn same_effect(&self, other: &TimingPoint) -> bool {
        self.sample_set == other.sample_set
            && self.sample_index == other.sample_index
            && self.volume == other.volume
            && self.kiai == other.kiai
            && (self.effective_sv() - other.effective_sv()).abs() < TEMPO_EPSILON
    }

    /// Velocity this point leaves in effect: redlines reset it to `1.0`.
    pub fn effective_sv(&self) -> f64 {
        if self.uninherited {
            1.0
        } else {
            self.sv
        }
    }

    fn sort_key(&self, other: &TimingPoint) -> Ordering {
        self.offset
            .total_cmp(&other.offset)
            .then_with(|| other.uninherited.cmp(&self.uninherited))
    }
}

/// Offset-ordered sequence of timing points.
///
/// Points are kept sorted by offset with redlines ahead of greenlines at the
/// same offset; insertion order is only kept among otherwise equal points.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(from = "Vec<TimingPoint>", into = "Vec<TimingPoint>")]
pub struct Timeline {
    points: Vec<TimingPoint>,
}

impl From<Vec<TimingPoint>> for Timeline {
    fn from(points: Vec<TimingPoint>) -> Self {
        Self::new(points)
    }
}

impl From<Timeline> for Vec<TimingPoint> {
    fn from(timeline: Timeline) -> Self {
        timeline.points
    }
}

impl Timeline {
    pub fn new(mut points: Vec<TimingPoint>) -> Self {
        points.sort_by(TimingPoint::sort_key);
        Self { points }
    }

    pub fn points(&self) -> &[TimingPoint] {
        &self.points
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn redlines(&self) -> impl DoubleEndedIterator<Item = &TimingPoint> + '_ {
        self.points.iter().filter(|tp| tp.uninherited)
    }

    pub fn has_redlines(&self) -> bool {
        self.points.iter().any(|tp| tp.uninherited)
    }

    /// Inserts a point at its ordered position.
    pub fn add(&mut self, point: TimingPoint) {
        let index = self
            .points
            .partition_point(|tp| tp.sort_key(&point) != Ordering::Greater);
        self.points.insert(index, point);
    }

    pub fn add_range<I: IntoIterator<Item = TimingPoint>>(&mut self, points: I) {
        self.points.extend(points);
        self.points.sort_by(TimingPoint::sort_key);
    }

    /// Removes every point matching `predicate` and returns how many went.
    pub fn remove_all<F: FnMut(&TimingPoint) -> bool>(&mut self, mut predicate: F) -> usize {
        let before = self.points.len();
        self.points.retain(|tp| !predicate(tp));
        before - self.points.len()
    }

    pub(crate) fn points_mut(&mut self) -> &mut [TimingPoint] {
        &mut self.points
    }

    /// Shifts every point by `delta`.
    pub fn offset_all(&mut self, delta: f64) {
        for tp in &mut self.points {
            tp.offset += delta;
        }
    }

    /// Returns a copy whose offsets went through `map`, which must be monotonic.
    pub fn map_offsets<F: Fn(f64) -> f64>(&self, map: F) -> Timeline {
        Timeline::new(
            self.points
                .iter()
                .map(|tp| TimingPoint {
                    offset: map(tp.offset),
                    ..tp.clone()
                })
                .collect(),
        )
    }

    /// Rejects redlines whose tempo is not a positive finite number.
    pub fn validate_tempo(&self) -> Result<()> {
        match self
            .redlines()
            .find(|tp| !(tp.mpb.is_finite() && tp.mpb > 0.0))
        {
            Some(tp) => Err(PlacementError::InvalidTiming {
                offset: tp.offset,
                mpb: tp.mpb,
            }),
            None => Ok(()),
        }
    }

    /// The redline governing `time`. Before the first redline the first one
    /// applies.
    pub fn redline_at(&self, time: f64) -> Option<&TimingPoint> {
        self.redlines()
            .rev()
            .find(|tp| tp.offset <= time)
            .or_else(|| self.redlines().next())
    }

    /// Like [`Timeline::redline_at`] but ignores redlines placed exactly on
    /// `time`.
    pub fn redline_before(&self, time: f64) -> Option<&TimingPoint> {
        self.redlines()
            .rev()
            .find(|tp| tp.offset < time)
            .or_else(|| self.redlines().next())
    }

    /// The last point at or before `time`, which governs hitsounds and kiai.
    pub fn point_at(&self, time: f64) -> Option<&TimingPoint> {
        self.points
            .iter()
            .rev()
            .find(|tp| tp.offset <= time)
            .or_else(|| self.points.first())
    }

    /// Milliseconds per beat at `time`.
    pub fn mpb_at(&self, time: f64) -> f64 {
        self.redline_at(time).map(|tp| tp.mpb).unwrap_or(DEFAULT_MPB)
    }

    /// Slider velocity multiplier at `time`.
    pub fn sv_at(&self, time: f64) -> f64 {
        self.points
            .iter()
            .rev()
            .find(|tp| tp.offset <= time)
            .map(TimingPoint::effective_sv)
            .unwrap_or(1.0)
    }

    /// Redlines in `[start, end)`. A redline exactly on `start` is included
    /// even when the range is empty.
    pub fn redlines_in_range(&self, start: f64, end: f64) -> Vec<&TimingPoint> {
        self.redlines()
            .filter(|tp| {
                tp.offset >= start && (tp.offset < end || (tp.offset - start).abs() <= TEMPO_EPSILON)
            })
            .collect()
    }

    /// Number of beats between `from` and `to`, negative when `to` is earlier.
    pub fn beat_length(&self, from: f64, to: f64) -> f64 {
        self.integrate(from, to, |mpb| 1.0 / mpb)
    }

    /// Beats elapsed from `origin` to `time`.
    pub fn ms_to_beat(&self, origin: f64, time: f64) -> f64 {
        self.beat_length(origin, time)
    }

    /// Millisecond time lying `beats` beats after `origin`.
    pub fn beat_to_ms(&self, origin: f64, beats: f64) -> f64 {
        self.invert(origin, beats, |mpb| 1.0 / mpb)
    }

    /// Milliseconds spanned by the beat range `[from, to]` when this timeline's
    /// offsets are themselves expressed in beats.
    pub fn beats_to_ms_span(&self, from: f64, to: f64) -> f64 {
        self.integrate(from, to, |mpb| mpb)
    }

    /// Integral of `rate(mpb)` over the offset range, section by section.
    fn integrate<F: Fn(f64) -> f64>(&self, from: f64, to: f64, rate: F) -> f64 {
        if to < from {
            return -self.integrate(to, from, rate);
        }

        let mut total = 0.0;
        let mut cursor = from;
        let mut mpb = self.mpb_at(from);
        for tp in self.redlines().filter(|tp| tp.offset > from && tp.offset < to) {
            total += (tp.offset - cursor) * rate(mpb);
            cursor = tp.offset;
            mpb = tp.mpb;
        }

        total + (to - cursor) * rate(mpb)
    }

    /// Finds `x` such that `integrate(origin, x, rate) == amount`.
    fn invert<F: Fn(f64) -> f64>(&self, origin: f64, amount: f64, rate: F) -> f64 {
        if amount >= 0.0 {
            let mut remaining = amount;
            let mut cursor = origin;
            let mut mpb = self.mpb_at(origin);
            for tp in self.redlines().filter(|tp| tp.offset > origin) {
                let section = (tp.offset - cursor) * rate(mpb);
                if remaining <= section {
                    return cursor + remaining / rate(mpb);
                }
                remaining -= section;
                cursor = tp.offset;
                mpb = tp.mpb;
            }
            return cursor + remaining / rate(mpb);
        }

        let mut remaining = -amount;
        let mut cursor = origin;
        for tp in self.redlines().rev().filter(|tp| tp.offset < origin) {
            let section = (cursor - tp.offset) * rate(tp.mpb);
            if remaining <= section {
                return cursor - remaining / rate(tp.mpb);
            }
            remaining -= section;
            cursor = tp.offset;
        }

        cursor - remaining / rate(self.mpb_at(cursor))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn two_tempo() -> Timeline {
        Timeline::new(vec![
            TimingPoint::redline(1000.0, 250.0, 4),
            TimingPoint::greenline(500.0, 1.5),
            TimingPoint::redline(0.0, 500.0, 4),
        ])
    }

    #[test]
    fn keeps_points_sorted_with_redlines_first() {
        let mut timeline = two_tempo();
        timeline.add(TimingPoint::greenline(1000.0, 2.0));
        timeline.add(TimingPoint::redline(1000.0, 300.0, 3));

        let kinds: Vec<(f64, bool)> = timeline
            .points()
            .iter()
            .map(|tp| (tp.offset, tp.uninherited))
            .collect();
        assert_eq!(
            kinds,
            vec![
                (0.0, true),
                (500.0, false),
                (1000.0, true),
                (1000.0, true),
                (1000.0, false)
            ]
        );
    }

    #[test]
    fn tempo_and_velocity_queries() {
        let timeline = two_tempo();
        assert_eq!(timeline.mpb_at(-100.0), 500.0);
        assert_eq!(timeline.mpb_at(999.0), 500.0);
        assert_eq!(timeline.mpb_at(1000.0), 250.0);
        assert_eq!(timeline.sv_at(400.0), 1.0);
        assert_eq!(timeline.sv_at(600.0), 1.5);
        // the redline at 1000 resets velocity
        assert_eq!(timeline.sv_at(1200.0), 1.0);
        assert_eq!(timeline.redline_before(1000.0).unwrap().mpb, 500.0);
    }

    #[test]
    fn beat_length_spans_tempo_changes() {
        let timeline = two_tempo();
        assert!((timeline.beat_length(0.0, 1500.0) - 4.0).abs() < 1e-9);
        assert!((timeline.beat_length(1500.0, 0.0) + 4.0).abs() < 1e-9);
        assert!((timeline.beat_length(-500.0, 0.0) - 1.0).abs() < 1e-9);
    }

    #[test]
    fn beat_round_trip_is_exact_within_a_millisecond() {
        let timeline = two_tempo();
        for &time in &[-700.0, 0.0, 250.0, 999.0, 1000.0, 1733.0, 5000.0] {
            for &origin in &[0.0, 600.0, 1250.0] {
                let beats = timeline.ms_to_beat(origin, time);
                let back = timeline.beat_to_ms(origin, beats);
                assert!((back - time).abs() < 1.0, "{origin} -> {time} came back as {back}");
            }
        }
    }

    #[test]
    fn beat_coordinate_span_uses_tempo() {
        let beats = Timeline::new(vec![
            TimingPoint::redline(-4.0, 250.0, 4),
            TimingPoint::redline(2.0, 500.0, 4),
        ]);
        assert!((beats.beats_to_ms_span(0.0, 3.0) - 1000.0).abs() < 1e-9);
    }

    #[test]
    fn range_queries_are_half_open() {
        let mut timeline = two_tempo();
        timeline.add_range(vec![
            TimingPoint::redline(2000.0, 200.0, 4),
            TimingPoint::greenline(1500.0, 0.5),
        ]);
        let offsets = |start, end| -> Vec<f64> {
            timeline
                .redlines_in_range(start, end)
                .iter()
                .map(|tp| tp.offset)
                .collect()
        };
        assert_eq!(offsets(0.0, 2000.0), vec![0.0, 1000.0]);
        assert_eq!(offsets(1000.0, 1000.0), vec![1000.0]);
        assert_eq!(offsets(1001.0, 2001.0), vec![2000.0]);
        assert_eq!(timeline.len(), 5);
    }

    #[test]
    fn rejects_non_positive_tempo() {
        let timeline = Timeline::new(vec![TimingPoint::redline(120.0, -500.0, 4)]);
        let err = timeline.validate_tempo().unwrap_err();
        assert!(matches!(err, PlacementError::InvalidTiming { offset, .. } if offset == 120.0));
    }

    #[test]
    fn empty_timeline_uses_default_tempo() {
        let timeline = Timeline::default();
        assert_eq!(timeline.mpb_at(0.0), DEFAULT_MPB);
        assert!((timeline.beat_length(0.0, 2000.0) - 2.0).abs() < 1e-9);
    }
}
