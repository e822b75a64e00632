//! Builds the merged redline set for the destination from the pattern's and
//! the destination's timelines.
//!
//! Both timelines must be in the same coordinate system (milliseconds, or
//! beats since the pattern start) and the parts must be in that system too.

mod tempo;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::{
    partition::Part,
    timing::{Timeline, TimingPoint, DEFAULT_MPB, TEMPO_EPSILON},
};

pub use tempo::{sync_velocities, TempoFixup};

/// How pattern tempo and destination tempo are combined inside parts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum TimingOverwriteMode {
    /// Keep the destination's tempo; pattern redlines are ignored.
    #[default]
    DestinationOnly,
    /// Compose tempo changes: both tempos relative to the pattern default.
    RelativeMix,
    /// Pattern tempo changes win, default-tempo sections follow the
    /// destination.
    AbsoluteMix,
    /// Use the pattern's redlines verbatim.
    PatternOnly,
}

/// Where a merged redline comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RedlineOrigin {
    /// Destination redline outside every part; keeps its destination position.
    Anchored,
    /// Placed with a part.
    Placed,
    /// The tempo a part starts with, restated at its start. Dropped again by
    /// [`MergedTiming::close_parts`] when it changes nothing.
    Restated,
}

/// A redline of the merged timeline.
#[derive(Debug, Clone, PartialEq)]
pub struct MergedRedline {
    pub point: TimingPoint,
    pub origin: RedlineOrigin,
}

/// Merged redlines in placement order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MergedTiming {
    redlines: Vec<MergedRedline>,
}

impl MergedTiming {
    pub fn redlines(&self) -> &[MergedRedline] {
        &self.redlines
    }

    pub fn redlines_mut(&mut self) -> &mut [MergedRedline] {
        &mut self.redlines
    }

    pub fn push(&mut self, point: TimingPoint) {
        self.redlines.push(MergedRedline {
            point,
            origin: RedlineOrigin::Placed,
        });
    }

    fn push_anchored<I: IntoIterator<Item = TimingPoint>>(&mut self, points: I) {
        self.redlines.extend(points.into_iter().map(|point| MergedRedline {
            point,
            origin: RedlineOrigin::Anchored,
        }));
    }

    /// Queryable timeline of the merged redlines.
    pub fn timeline(&self) -> Timeline {
        Timeline::new(self.redlines.iter().map(|r| r.point.clone()).collect())
    }

    /// Like [`MergedTiming::timeline`] without restated start tempos, which
    /// may still be dropped. Snapping grids come from this one.
    pub fn grid_timeline(&self) -> Timeline {
        Timeline::new(
            self.redlines
                .iter()
                .filter(|r| r.origin != RedlineOrigin::Restated)
                .map(|r| r.point.clone())
                .collect(),
        )
    }

    fn timeline_without(&self, skip: usize) -> Timeline {
        Timeline::new(
            self.redlines
                .iter()
                .enumerate()
                .filter(|(index, _)| *index != skip)
                .map(|(_, r)| r.point.clone())
                .collect(),
        )
    }

    /// Settles part boundaries once every time is final, in milliseconds.
    ///
    /// Destination redlines that ended up inside a part are dropped, restated
    /// start tempos that change nothing are removed, and every part end whose
    /// merged tempo differs from `destination` gets a redline bridging back to
    /// it. `destination` is the destination timeline before placement.
    pub fn close_parts(&mut self, parts: &[Part], destination: &Timeline) {
        let inside = |offset: f64| {
            parts.iter().any(|part| {
                offset >= part.start_time - TEMPO_EPSILON && offset < part.end_time - TEMPO_EPSILON
            })
        };
        let before = self.redlines.len();
        self.redlines
            .retain(|r| r.origin != RedlineOrigin::Anchored || !inside(r.point.offset));
        let swallowed = before - self.redlines.len();

        for index in (0..self.redlines.len()).rev() {
            if self.redlines[index].origin != RedlineOrigin::Restated {
                continue;
            }
            let point = &self.redlines[index].point;
            let others = self.timeline_without(index);
            let shared = others.redlines().any(|tp| close(tp.offset, point.offset));
            let previous = others
                .redline_before(point.offset)
                .map(|tp| tp.mpb)
                .unwrap_or(DEFAULT_MPB);
            if shared || close(previous, point.mpb) {
                self.redlines.remove(index);
            }
        }

        for part in parts {
            let end = part.end_time;
            if self.redlines.iter().any(|r| close(r.point.offset, end)) {
                continue;
            }
            let reconciled = self.timeline().mpb_at(end);
            let resumed = redline_or_default(destination, end);
            if !close(reconciled, resumed.mpb) {
                debug!(end, mpb = resumed.mpb, "bridging back to destination tempo");
                self.push(moved(&resumed, end));
            }
        }
        debug!(swallowed, redlines = self.redlines.len(), "closed parts");
    }
}

/// Tempo of one part: the redline in effect at its start and the redlines
/// placed inside it.
#[derive(Debug, Clone, PartialEq)]
struct Section {
    start: TimingPoint,
    inside: Vec<TimingPoint>,
}

fn redline_or_default(timeline: &Timeline, time: f64) -> TimingPoint {
    timeline
        .redline_at(time)
        .cloned()
        .unwrap_or_else(|| TimingPoint::redline(time, DEFAULT_MPB, 4))
}

fn moved(point: &TimingPoint, offset: f64) -> TimingPoint {
    TimingPoint {
        offset,
        ..point.clone()
    }
}

fn close(a: f64, b: f64) -> bool {
    (a - b).abs() <= TEMPO_EPSILON
}

/// Merges pattern and destination tempo for a set of parts.
#[derive(Debug)]
pub struct Reconciler<'a> {
    mode: TimingOverwriteMode,
    pattern: &'a Timeline,
    destination: &'a Timeline,
    default_mpb: f64,
}

impl<'a> Reconciler<'a> {
    /// `window_start` is where the pattern begins; the tempo just before it is
    /// the pattern's default tempo.
    pub fn new(
        mode: TimingOverwriteMode,
        pattern: &'a Timeline,
        destination: &'a Timeline,
        window_start: f64,
    ) -> Self {
        let mode = if mode != TimingOverwriteMode::DestinationOnly && !pattern.has_redlines() {
            warn!(?mode, "pattern has no redlines, falling back to destination timing");
            TimingOverwriteMode::DestinationOnly
        } else {
            mode
        };
        let default_mpb = pattern
            .redline_before(window_start)
            .map(|tp| tp.mpb)
            .unwrap_or(DEFAULT_MPB);
        Self {
            mode,
            pattern,
            destination,
            default_mpb,
        }
    }

    pub fn mode(&self) -> TimingOverwriteMode {
        self.mode
    }

    /// Merges the redlines around and inside every part and adds the start
    /// bridges. End bridges come later from [`MergedTiming::close_parts`] once
    /// part ends are final.
    pub fn reconcile(&self, parts: &[Part]) -> MergedTiming {
        let mut merged = MergedTiming::default();
        let mut last_end = f64::NEG_INFINITY;

        for part in parts {
            let start = part.start_time;
            merged.push_anchored(
                self.destination
                    .redlines()
                    .filter(|tp| tp.offset >= last_end && tp.offset < start)
                    .cloned(),
            );

            let section = self.section(start, part.end_time);
            let starts_inside = section.inside.iter().any(|tp| close(tp.offset, start));
            let destination_mpb = self.destination.mpb_at(start);
            let bridge = !close(section.start.mpb, destination_mpb) && !starts_inside;
            for tp in section.inside {
                merged.push(tp);
            }
            if bridge {
                merged.push(moved(&section.start, start));
            } else if !starts_inside {
                merged.redlines.push(MergedRedline {
                    point: moved(&section.start, start),
                    origin: RedlineOrigin::Restated,
                });
            }

            last_end = last_end.max(part.end_time);
        }

        merged.push_anchored(
            self.destination
                .redlines()
                .filter(|tp| tp.offset >= last_end)
                .cloned(),
        );

        debug!(
            mode = ?self.mode,
            parts = parts.len(),
            redlines = merged.redlines.len(),
            "reconciled timing"
        );
        merged
    }

    fn section(&self, start: f64, end: f64) -> Section {
        match self.mode {
            TimingOverwriteMode::DestinationOnly => Section {
                start: redline_or_default(self.destination, start),
                inside: self
                    .destination
                    .redlines_in_range(start, end)
                    .into_iter()
                    .cloned()
                    .collect(),
            },
            TimingOverwriteMode::PatternOnly => Section {
                start: redline_or_default(self.pattern, start),
                inside: self
                    .pattern
                    .redlines_in_range(start, end)
                    .into_iter()
                    .cloned()
                    .collect(),
            },
            TimingOverwriteMode::AbsoluteMix => self.absolute_mix(start, end),
            TimingOverwriteMode::RelativeMix => self.relative_mix(start, end),
        }
    }

    fn is_default(&self, mpb: f64) -> bool {
        close(mpb, self.default_mpb)
    }

    fn absolute_mix(&self, start: f64, end: f64) -> Section {
        let pattern_inside = self.pattern.redlines_in_range(start, end);
        let mut redlines: Vec<TimingPoint> = pattern_inside
            .iter()
            .map(|tp| {
                if self.is_default(tp.mpb) {
                    moved(&redline_or_default(self.destination, tp.offset), tp.offset)
                } else {
                    (*tp).clone()
                }
            })
            .collect();

        // destination tempo changes survive where the pattern is at its default
        redlines.extend(
            self.destination
                .redlines_in_range(start, end)
                .into_iter()
                .filter(|tp| self.is_default(self.pattern.mpb_at(tp.offset)))
                .filter(|tp| !pattern_inside.iter().any(|p| close(p.offset, tp.offset)))
                .cloned(),
        );
        redlines.sort_by(|a, b| a.offset.total_cmp(&b.offset));

        let pattern_start = redline_or_default(self.pattern, start);
        let start_redline = if self.is_default(pattern_start.mpb) {
            redline_or_default(self.destination, start)
        } else {
            pattern_start
        };

        Section {
            start: start_redline,
            inside: redlines,
        }
    }

    fn relative_mix(&self, start: f64, end: f64) -> Section {
        let mut offsets: Vec<f64> = self
            .destination
            .redlines_in_range(start, end)
            .into_iter()
            .chain(self.pattern.redlines_in_range(start, end))
            .map(|tp| tp.offset)
            .collect();
        offsets.sort_by(f64::total_cmp);
        offsets.dedup_by(|a, b| close(*a, *b));

        let mixed = |offset: f64| {
            let base = self
                .pattern
                .redlines()
                .find(|tp| close(tp.offset, offset))
                .cloned()
                .unwrap_or_else(|| redline_or_default(self.destination, offset));
            TimingPoint {
                offset,
                mpb: self.destination.mpb_at(offset) * self.pattern.mpb_at(offset)
                    / self.default_mpb,
                ..base
            }
        };

        Section {
            start: mixed(start),
            inside: offsets.into_iter().map(mixed).collect(),
        }
    }
}
