use tracing::{debug, trace, warn};

use crate::{
    chart::{span_duration, BASE_SLIDER_VELOCITY},
    context::WorkItem,
    partition::Part,
    timing::{Timeline, TimingPoint, DEFAULT_MPB, TEMPO_EPSILON},
};

use super::MergedTiming;

/// Adjusts pattern objects to the reconciled tempo: velocity multipliers,
/// tick-rate redlines and path end times. Part ends follow the corrected
/// object ends.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TempoFixup {
    /// Scale velocity by `merged / pattern` tempo so visual speed survives.
    pub fix_tempo_velocity: bool,
    /// `destination / pattern` tick rate; `None` leaves ticks alone.
    pub tick_rate_ratio: Option<f64>,
    /// Global velocity of the chart the objects end up in.
    pub global_sv: f64,
    /// Item times are beats rather than milliseconds.
    pub using_beat_time: bool,
}

impl TempoFixup {
    pub fn apply(
        &self,
        merged: &mut MergedTiming,
        pattern: &Timeline,
        parts: &mut [Part],
        items: &mut [WorkItem],
    ) {
        let reconciled = merged.timeline();
        let tick_ratio = self
            .tick_rate_ratio
            .filter(|r| r.is_finite() && *r > 0.0 && (r - 1.0).abs() > TEMPO_EPSILON);

        for item in items.iter_mut() {
            let start = item.times.start;
            let redline = reconciled
                .redline_at(start)
                .cloned()
                .unwrap_or_else(|| TimingPoint::redline(start, DEFAULT_MPB, 4));

            if self.fix_tempo_velocity {
                let pattern_mpb = pattern.mpb_at(start);
                if pattern_mpb.abs() < TEMPO_EPSILON {
                    warn!(start, "pattern tempo is degenerate, velocity left unchanged");
                } else {
                    item.timing.sv *= redline.mpb / pattern_mpb;
                }
            }

            let mut mpb = redline.mpb;
            if let (Some(ratio), true) = (tick_ratio, item.is_path()) {
                let end = item.times.end;
                merged.push(TimingPoint {
                    offset: start,
                    mpb: redline.mpb * ratio,
                    omit_first_bar_line: true,
                    ..redline.clone()
                });
                if let Some(after) = reconciled.redline_at(end) {
                    merged.push(TimingPoint {
                        offset: end,
                        ..after.clone()
                    });
                }
                item.timing.sv *= ratio;
                mpb *= ratio;
                trace!(start, end, ratio, "tick-rate redlines around path");
            }

            if let Some(path) = item.object.slider_path() {
                let unit = if self.using_beat_time { 1.0 } else { mpb };
                let span = span_duration(path.pixel_length, self.global_sv, item.timing.sv, unit);
                item.times.end = start + span * path.span_count() as f64;
            }
            item.timing.redline = redline;
        }

        for part in parts.iter_mut() {
            part.refresh_end(items);
        }
        debug!(
            objects = items.len(),
            fix_tempo_velocity = self.fix_tempo_velocity,
            ?tick_ratio,
            "tempo fix-up done"
        );
    }
}

/// Recomputes each path's velocity so the duration it derives on `timeline`
/// matches its current bounds. Times are milliseconds.
pub fn sync_velocities(items: &mut [WorkItem], timeline: &Timeline, global_sv: f64) {
    if global_sv.abs() < TEMPO_EPSILON {
        warn!(global_sv, "degenerate global velocity, paths keep their velocity");
        return;
    }
    for item in items.iter_mut() {
        let Some(path) = item.object.slider_path() else {
            continue;
        };
        let span = (item.times.end - item.times.start) / item.span_count() as f64;
        if span <= TEMPO_EPSILON || path.pixel_length <= 0.0 {
            continue;
        }
        let mpb = timeline.mpb_at(item.times.start);
        item.timing.sv = path.pixel_length * mpb / (BASE_SLIDER_VELOCITY * global_sv * span);
        trace!(start = item.times.start, sv = item.timing.sv, "synced path velocity");
    }
}
