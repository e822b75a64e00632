//! The placement pipeline: fits a pattern into a destination chart.
//!
//! Stages run in a fixed order: offset, context capture, optional beat-time
//! transform, partitioning, timing reconciliation, tempo fix-up, spatial
//! transform, stack fix-up, resnapping, inverse beat-time transform, part
//! closing, control diffing, overwrite and insertion with colour repair.
//! Every precondition is checked before the destination is touched, so a
//! failed call changes nothing.

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::{
    beat_time::BeatTimeTransformer,
    chart::{colour_indices, Chart, GameMode, HitObject},
    context::{capture_all, WorkItem},
    diff,
    overwrite::{insert, remove, removal_windows, ColourPlan, PatternOverwriteMode},
    partition::{partition, Part},
    reconcile::{sync_velocities, Reconciler, TempoFixup, TimingOverwriteMode},
    resnap::{snap_columns, BeatDivisor, Resnapper, TimeDomain},
    spatial::{bake_stacking, SpatialTransform, STACK_DISTANCE},
    timing::{apply_changes, TEMPO_EPSILON},
    PlacementError, Result,
};

/// Placement options. Every field toggles independently.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PatternPlacer {
    /// Milliseconds cleared around each part.
    pub padding: f64,
    /// Gap in beats that separates two parts.
    pub parting_distance: f64,
    pub pattern_overwrite_mode: PatternOverwriteMode,
    pub timing_overwrite_mode: TimingOverwriteMode,
    pub include_hitsounds: bool,
    pub include_kiai: bool,
    /// Scale geometry by the ratio of destination to pattern object size.
    pub scale_to_new_object_size: bool,
    /// Keep beat spacing instead of millisecond spacing.
    pub scale_to_new_timing: bool,
    pub snap_to_new_timing: bool,
    pub beat_divisors: Vec<BeatDivisor>,
    pub fix_global_velocity: bool,
    pub fix_tempo_velocity: bool,
    pub fix_colour_skip: bool,
    pub fix_stacking: bool,
    pub fix_tick_rate: bool,
    pub custom_scale: f64,
    /// Radians.
    pub custom_rotate: f64,
}

impl Default for PatternPlacer {
    fn default() -> Self {
        Self {
            padding: 5.0,
            parting_distance: 4.0,
            pattern_overwrite_mode: PatternOverwriteMode::default(),
            timing_overwrite_mode: TimingOverwriteMode::default(),
            include_hitsounds: true,
            include_kiai: true,
            scale_to_new_object_size: false,
            scale_to_new_timing: false,
            snap_to_new_timing: false,
            beat_divisors: BeatDivisor::defaults(),
            fix_global_velocity: true,
            fix_tempo_velocity: false,
            fix_colour_skip: false,
            fix_stacking: false,
            fix_tick_rate: false,
            custom_scale: 1.0,
            custom_rotate: 0.0,
        }
    }
}

fn check_pattern(pattern: &Chart) -> Result<f64> {
    pattern
        .start_time()
        .ok_or(PlacementError::InvalidPattern("pattern has no hit objects"))
}

impl PatternPlacer {
    /// Places `pattern` so its first object lands on `time`.
    pub fn place_at_time(
        &self,
        pattern: &mut Chart,
        destination: &mut Chart,
        time: f64,
        protect_pattern: bool,
        overwrite_start: Option<f64>,
        overwrite_end: Option<f64>,
    ) -> Result<()> {
        let start = check_pattern(pattern)?;
        self.place(
            pattern,
            destination,
            time - start,
            protect_pattern,
            overwrite_start,
            overwrite_end,
        )
    }

    /// Places `pattern` shifted by `offset` milliseconds into `destination`.
    ///
    /// With `protect_pattern` the pattern is cloned first and left untouched;
    /// otherwise it ends up holding the placed objects and shifted timeline.
    /// `overwrite_start` and `overwrite_end` are destination times that replace
    /// automatic partitioning with a single part.
    pub fn place(
        &self,
        pattern: &mut Chart,
        destination: &mut Chart,
        offset: f64,
        protect_pattern: bool,
        overwrite_start: Option<f64>,
        overwrite_end: Option<f64>,
    ) -> Result<()> {
        check_pattern(pattern)?;
        pattern.timeline.validate_tempo()?;
        destination.timeline.validate_tempo()?;

        let mut protected;
        let pattern = if protect_pattern {
            protected = pattern.clone_deep();
            &mut protected
        } else {
            pattern
        };

        pattern.offset_time(offset);
        pattern.sort_hit_objects();
        if self.fix_colour_skip {
            if let Some(first) = pattern.hit_objects.first_mut() {
                first.new_combo = true;
            }
        }
        let pattern_colours = colour_indices(&pattern.hit_objects, pattern.combo_colour_count);

        let mut items = capture_all(pattern);
        self.match_global_velocity(pattern, destination, &mut items);
        if !self.include_hitsounds {
            for item in &mut items {
                item.object.clear_hitsounds();
            }
        }

        let transformer = self.beat_transformer(pattern, destination, &items);
        let using_beat_time = transformer.is_some();
        if let Some(transformer) = &transformer {
            transformer.forward(&mut items);
        }
        let (pattern_timeline, destination_timeline) = match &transformer {
            Some(t) => (t.pattern_timeline(), t.destination_timeline()),
            None => (pattern.timeline.clone(), destination.timeline.clone()),
        };

        let mut parts = if overwrite_start.is_some() || overwrite_end.is_some() {
            let to_local = |t: f64| match &transformer {
                Some(transformer) => transformer.destination_to_beats(t),
                None => t,
            };
            debug!(?overwrite_start, ?overwrite_end, "using explicit overwrite window");
            vec![Part::spanning(
                &items,
                overwrite_start.map(to_local),
                overwrite_end.map(to_local),
            )]
        } else {
            partition(&items, &pattern_timeline, self.parting_distance, using_beat_time)
        };

        let window_start = parts
            .iter()
            .map(|part| part.start_time)
            .reduce(f64::min)
            .unwrap_or_default();
        let reconciler = Reconciler::new(
            self.timing_overwrite_mode,
            &pattern_timeline,
            &destination_timeline,
            window_start,
        );
        let mut merged = reconciler.reconcile(&parts);
        TempoFixup {
            fix_tempo_velocity: self.fix_tempo_velocity,
            tick_rate_ratio: self.tick_rate_ratio(pattern, destination, using_beat_time),
            global_sv: destination.difficulty.slider_multiplier,
            using_beat_time,
        }
        .apply(&mut merged, &pattern_timeline, &mut parts, &mut items);

        if destination.mode != GameMode::Mania {
            self.spatial_transform(pattern, destination).apply(&mut items);
        }
        if self.fix_stacking && destination.mode == GameMode::Standard {
            let stack_offset = (destination.difficulty.object_radius() / 10.0).max(STACK_DISTANCE);
            let to_ms = |t: f64| match &transformer {
                Some(transformer) => transformer.pattern_to_ms(t),
                None => t,
            };
            bake_stacking(
                &mut items,
                pattern.difficulty.stack_leniency,
                pattern.difficulty.preempt(),
                stack_offset,
                to_ms,
            );
        }

        if self.snap_to_new_timing {
            let domain = if using_beat_time {
                TimeDomain::Beats
            } else {
                TimeDomain::Milliseconds
            };
            Resnapper::new(self.beat_divisors.clone(), domain).apply(&merged.grid_timeline(), &mut items);
            for part in &mut parts {
                part.refresh_end(&items);
            }
        }
        if destination.mode == GameMode::Mania {
            snap_columns(&mut items, destination.key_count());
        }

        let mut markers = if self.include_kiai {
            diff::kiai_markers(&pattern_timeline, &parts)
        } else {
            Vec::new()
        };

        if let Some(transformer) = &transformer {
            let merged_beats = merged.timeline();
            transformer.backward(&merged_beats, &mut items, &mut parts, &mut merged, &mut markers);
        }
        merged.close_parts(&parts, &destination.timeline);
        if self.include_kiai {
            markers.extend(diff::kiai_end_markers(&destination.timeline, &parts, &items));
        }
        if using_beat_time || self.snap_to_new_timing {
            sync_velocities(&mut items, &merged.timeline(), destination.difficulty.slider_multiplier);
        }

        let original_destination = destination.timeline.clone();
        let windows = removal_windows(self.pattern_overwrite_mode, &parts, self.padding);
        let removal = remove(destination, &windows);

        let mut changes = diff::redline_changes(&merged);
        changes.extend(removal.boundary_changes);
        changes.extend(diff::velocity_changes(&items, destination.mode));
        if self.include_hitsounds {
            changes.extend(diff::hitsound_changes(&items));
        }
        changes.extend(diff::kiai_changes(&markers));
        changes.extend(diff::part_end_reverts(
            &original_destination,
            &parts,
            &items,
            self.include_hitsounds,
        ));
        let change_count = changes.len();
        apply_changes(&mut destination.timeline, changes);

        let placed: Vec<HitObject> = items.iter_mut().map(WorkItem::finalize).collect();
        let plan = self.fix_colour_skip.then(|| ColourPlan {
            retained: removal.retained_colours,
            pattern: pattern_colours,
        });
        insert(destination, placed.clone(), plan);
        pattern.hit_objects = placed;

        debug!(
            offset,
            parts = parts.len(),
            objects = items.len(),
            changes = change_count,
            removed = removal.removed_objects,
            "placed pattern"
        );
        Ok(())
    }

    /// Brings path velocities onto the destination's global velocity.
    ///
    /// With the fix on, multipliers are rescaled so speed and duration stay as
    /// authored; with it off, durations follow the new global velocity.
    fn match_global_velocity(&self, pattern: &Chart, destination: &Chart, items: &mut [WorkItem]) {
        let from = pattern.difficulty.slider_multiplier;
        let to = destination.difficulty.slider_multiplier;
        if to.abs() < TEMPO_EPSILON {
            warn!(to, "destination global velocity is degenerate, left unchanged");
            return;
        }
        let ratio = from / to;
        for item in items.iter_mut() {
            if self.fix_global_velocity && item.is_path() {
                item.timing.sv *= ratio;
            }
            item.timing.global_sv = to;
        }
        debug!(ratio, fixed = self.fix_global_velocity, "global velocity");
    }

    fn beat_transformer(&self, pattern: &Chart, destination: &Chart, items: &[WorkItem]) -> Option<BeatTimeTransformer> {
        if !self.scale_to_new_timing {
            return None;
        }
        if !pattern.timeline.has_redlines() {
            debug!("pattern has no redlines, keeping millisecond spacing");
            return None;
        }
        let origin = items
            .iter()
            .map(|item| item.times.start)
            .reduce(f64::min)?;
        Some(BeatTimeTransformer::new(origin, &pattern.timeline, &destination.timeline))
    }

    fn tick_rate_ratio(&self, pattern: &Chart, destination: &Chart, using_beat_time: bool) -> Option<f64> {
        if !self.fix_tick_rate {
            return None;
        }
        if using_beat_time {
            debug!("tick-rate fix skipped while scaling to new timing");
            return None;
        }
        let from = pattern.difficulty.slider_tick_rate;
        if from.abs() < TEMPO_EPSILON {
            warn!(from, "pattern tick rate is degenerate, ticks left unchanged");
            return None;
        }
        Some(destination.difficulty.slider_tick_rate / from)
    }

    fn spatial_transform(&self, pattern: &Chart, destination: &Chart) -> SpatialTransform {
        let mut scale = self.custom_scale;
        if self.scale_to_new_object_size {
            let from = pattern.difficulty.object_radius();
            if from > 0.0 {
                scale *= destination.difficulty.object_radius() / from;
            } else {
                warn!(from, "pattern object radius is degenerate, size not matched");
            }
        }
        SpatialTransform::new(scale, self.custom_rotate)
    }
}

/// Parts the placer would find for `pattern` as it stands, in milliseconds.
pub fn preview_parts(placer: &PatternPlacer, pattern: &Chart) -> Result<Vec<Part>> {
    check_pattern(pattern)?;
    pattern.timeline.validate_tempo()?;
    let mut sorted = pattern.clone_deep();
    sorted.sort_hit_objects();
    let items = capture_all(&sorted);
    Ok(partition(&items, &sorted.timeline, placer.parting_distance, false))
}
