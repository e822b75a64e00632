//! In-memory chart model consumed and produced by the placement engine.

use std::{cmp::Ordering, path::Path};

use serde::{Deserialize, Serialize};

use crate::{
    geometry::Vec2,
    timing::{SampleSet, Timeline},
    Result,
};

/// Pixels travelled per beat by a slider at velocity `1.0` and global
/// multiplier `1.0`.
pub const BASE_SLIDER_VELOCITY: f64 = 100.0;
const VELOCITY_EPSILON: f64 = 1e-9;

/// Game mode a chart is authored for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum GameMode {
    #[default]
    Standard,
    Taiko,
    Catch,
    /// Lane-based mode; the key count comes from the circle size.
    Mania,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Difficulty {
    pub circle_size: f64,
    pub approach_rate: f64,
    /// Global slider velocity multiplier.
    pub slider_multiplier: f64,
    pub slider_tick_rate: f64,
    pub stack_leniency: f64,
}

impl Default for Difficulty {
    fn default() -> Self {
        Self {
            circle_size: 4.0,
            approach_rate: 9.0,
            slider_multiplier: 1.4,
            slider_tick_rate: 1.0,
            stack_leniency: 0.7,
        }
    }
}

impl Difficulty {
    /// Radius of a hit circle in playfield pixels.
    pub fn object_radius(&self) -> f64 {
        54.4 - 4.48 * self.circle_size
    }

    /// Milliseconds an object is visible before its hit time.
    pub fn preempt(&self) -> f64 {
        let ar = self.approach_rate;
        if ar < 5.0 {
            1200.0 + 600.0 * (5.0 - ar) / 5.0
        } else {
            1200.0 - 750.0 * (ar - 5.0) / 5.0
        }
    }
}

/// Per-object sample overrides.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct HitSample {
    pub normal_set: SampleSet,
    pub addition_set: SampleSet,
    /// Custom sample index, `0` defers to the timeline.
    pub index: u32,
    /// Volume override, `0` defers to the timeline.
    pub volume: u8,
    pub filename: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum CurveType {
    #[default]
    Bezier,
    Catmull,
    Linear,
    Perfect,
}

/// Geometry and timing of a hold-with-path object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SliderPath {
    #[serde(default)]
    pub curve_type: CurveType,
    /// Absolute positions of the control points after the head.
    #[serde(default)]
    pub control_points: Vec<Vec2>,
    /// Number of traversals; one plus the repeat count.
    pub spans: u32,
    pub pixel_length: f64,
    /// Slider velocity multiplier in effect for this object.
    #[serde(default = "unit_velocity")]
    pub sv: f64,
    /// Duration of one traversal in milliseconds. Derived from the timeline.
    #[serde(default)]
    pub span_duration: f64,
    #[serde(default)]
    pub edge_sounds: Vec<u8>,
    #[serde(default)]
    pub edge_sets: Vec<(SampleSet, SampleSet)>,
}

fn unit_velocity() -> f64 {
    1.0
}

impl SliderPath {
    pub fn span_count(&self) -> u32 {
        self.spans.max(1)
    }

    pub fn duration(&self) -> f64 {
        self.span_duration * self.span_count() as f64
    }
}

/// Duration of one traversal of a path of `pixel_length` pixels.
pub fn span_duration(pixel_length: f64, global_sv: f64, sv: f64, mpb: f64) -> f64 {
    let pixels_per_beat = BASE_SLIDER_VELOCITY * global_sv * sv;
    if pixels_per_beat.abs() < VELOCITY_EPSILON {
        return 0.0;
    }
    pixel_length / pixels_per_beat * mpb
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum HitObjectKind {
    Circle,
    Slider(SliderPath),
    Spinner { end_time: f64 },
    Hold { end_time: f64 },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HitObject {
    pub pos: Vec2,
    pub time: f64,
    pub kind: HitObjectKind,
    #[serde(default)]
    pub new_combo: bool,
    /// Extra palette entries skipped when this object starts a new combo.
    #[serde(default)]
    pub combo_skip: u32,
    /// Addition flags (whistle, finish, clap).
    #[serde(default)]
    pub hitsound: u8,
    #[serde(default)]
    pub sample: HitSample,
    #[serde(default)]
    pub selected: bool,
}

impl HitObject {
    pub fn circle(pos: Vec2, time: f64) -> Self {
        Self {
            pos,
            time,
            kind: HitObjectKind::Circle,
            new_combo: false,
            combo_skip: 0,
            hitsound: 0,
            sample: HitSample::default(),
            selected: false,
        }
    }

    pub fn slider(pos: Vec2, time: f64, path: SliderPath) -> Self {
        Self {
            kind: HitObjectKind::Slider(path),
            ..Self::circle(pos, time)
        }
    }

    /// Time order; at equal times objects starting a new combo go last.
    pub fn placement_order(a: &HitObject, b: &HitObject) -> Ordering {
        a.time
            .total_cmp(&b.time)
            .then_with(|| a.new_combo.cmp(&b.new_combo))
    }

    pub fn is_slider(&self) -> bool {
        matches!(self.kind, HitObjectKind::Slider(_))
    }

    pub fn slider_path(&self) -> Option<&SliderPath> {
        match &self.kind {
            HitObjectKind::Slider(path) => Some(path),
            _ => None,
        }
    }

    pub fn slider_path_mut(&mut self) -> Option<&mut SliderPath> {
        match &mut self.kind {
            HitObjectKind::Slider(path) => Some(path),
            _ => None,
        }
    }

    pub fn end_time(&self) -> f64 {
        match &self.kind {
            HitObjectKind::Circle => self.time,
            HitObjectKind::Slider(path) => self.time + path.duration(),
            HitObjectKind::Spinner { end_time } | HitObjectKind::Hold { end_time } => *end_time,
        }
    }

    /// Moves the object to `start` and makes it end at `end`.
    pub fn set_times(&mut self, start: f64, end: f64) {
        self.time = start;
        match &mut self.kind {
            HitObjectKind::Circle => {}
            HitObjectKind::Slider(path) => {
                path.span_duration = (end - start).max(0.0) / path.span_count() as f64;
            }
            HitObjectKind::Spinner { end_time } | HitObjectKind::Hold { end_time } => {
                *end_time = end.max(start);
            }
        }
    }

    pub fn shift(&mut self, delta: f64) {
        let end = self.end_time();
        self.set_times(self.time + delta, end + delta);
    }

    /// Drops additions and sample overrides so the timeline decides the sound.
    pub fn clear_hitsounds(&mut self) {
        self.hitsound = 0;
        self.sample = HitSample::default();
        if let Some(path) = self.slider_path_mut() {
            path.edge_sounds.iter_mut().for_each(|sound| *sound = 0);
            path.edge_sets
                .iter_mut()
                .for_each(|set| *set = (SampleSet::Auto, SampleSet::Auto));
        }
    }
}

/// A chart: objects plus the timeline and difficulty they are played with.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chart {
    #[serde(default)]
    pub mode: GameMode,
    #[serde(default)]
    pub difficulty: Difficulty,
    /// Number of combo colours in the palette.
    #[serde(default = "default_palette")]
    pub combo_colour_count: u32,
    #[serde(default)]
    pub timeline: Timeline,
    #[serde(default)]
    pub hit_objects: Vec<HitObject>,
}

fn default_palette() -> u32 {
    4
}

impl Default for Chart {
    fn default() -> Self {
        Self {
            mode: GameMode::default(),
            difficulty: Difficulty::default(),
            combo_colour_count: default_palette(),
            timeline: Timeline::default(),
            hit_objects: Vec::new(),
        }
    }
}

impl Chart {
    /// Decodes a chart and derives slider durations from its timeline.
    pub fn from_json(json: &str) -> Result<Self> {
        let mut chart: Chart = serde_json::from_str(json)?;
        chart.refresh_slider_timing();
        Ok(chart)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json(&json)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        std::fs::write(path, self.to_json()?)?;
        Ok(())
    }

    /// Independent copy of the whole chart.
    pub fn clone_deep(&self) -> Self {
        self.clone()
    }

    /// Time of the earliest hit object.
    pub fn start_time(&self) -> Option<f64> {
        self.hit_objects.iter().map(|ho| ho.time).reduce(f64::min)
    }

    /// Latest end time over all hit objects.
    pub fn end_time(&self) -> Option<f64> {
        self.hit_objects.iter().map(HitObject::end_time).reduce(f64::max)
    }

    /// Shifts objects and timing points by `delta` milliseconds.
    pub fn offset_time(&mut self, delta: f64) {
        if delta == 0.0 {
            return;
        }
        for ho in &mut self.hit_objects {
            ho.shift(delta);
        }
        self.timeline.offset_all(delta);
    }

    /// Re-reads every slider's velocity from the timeline and derives its
    /// traversal duration.
    pub fn refresh_slider_timing(&mut self) {
        let global_sv = self.difficulty.slider_multiplier;
        for ho in &mut self.hit_objects {
            let time = ho.time;
            let sv = self.timeline.sv_at(time);
            let mpb = self.timeline.mpb_at(time);
            if let Some(path) = ho.slider_path_mut() {
                path.sv = sv;
                path.span_duration = span_duration(path.pixel_length, global_sv, sv, mpb);
            }
        }
    }

    /// Sorts objects by time; at equal times objects starting a new combo go
    /// last.
    pub fn sort_hit_objects(&mut self) {
        self.hit_objects.sort_by(HitObject::placement_order);
    }

    pub fn key_count(&self) -> u32 {
        (self.difficulty.circle_size.round() as u32).clamp(1, 18)
    }

    pub fn colour_indices(&self) -> Vec<u32> {
        colour_indices(&self.hit_objects, self.combo_colour_count)
    }

    /// Rewrites the combo skips of new-combo objects so object `i` ends up on
    /// colour `wanted[i]`.
    pub fn fix_combo_skip(&mut self, wanted: &[u32]) {
        let palette = self.combo_colour_count.max(1);
        let mut current: Option<u32> = None;
        for (index, (ho, &target)) in self.hit_objects.iter_mut().zip(wanted).enumerate() {
            if index != 0 && !ho.new_combo {
                continue;
            }
            let base = current.map(|c| (c + 1) % palette).unwrap_or(0);
            let target = target % palette;
            ho.combo_skip = (target + palette - base) % palette;
            current = Some(target);
        }
    }
}

/// Colour index of every object in a palette of `palette` colours.
pub fn colour_indices(objects: &[HitObject], palette: u32) -> Vec<u32> {
    let palette = palette.max(1);
    let mut current: Option<u32> = None;
    objects
        .iter()
        .enumerate()
        .map(|(index, ho)| {
            if index == 0 || ho.new_combo {
                let base = current.map(|c| c + 1).unwrap_or(0);
                current = Some((base + ho.combo_skip) % palette);
            }
            current.unwrap_or(0)
        })
        .collect()
}
