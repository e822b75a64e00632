use tracing::trace;

use super::{Timeline, TimingPoint};

/// Offsets closer than this are the same redline.
pub const REDLINE_FUZZINESS: f64 = 1e-3;
/// Offsets closer than this share one greenline.
pub const GREENLINE_FUZZINESS: f64 = 0.5;

/// Which attributes of a [`ControlChange`]'s source point get written.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChangeFields {
    pub tempo: bool,
    pub meter: bool,
    pub sample_set: bool,
    pub sample_index: bool,
    pub volume: bool,
    pub kiai: bool,
    pub uninherited: bool,
    pub omit_first_bar_line: bool,
    pub sv: bool,
}

impl ChangeFields {
    pub const NONE: ChangeFields = ChangeFields {
        tempo: false,
        meter: false,
        sample_set: false,
        sample_index: false,
        volume: false,
        kiai: false,
        uninherited: false,
        omit_first_bar_line: false,
        sv: false,
    };

    pub const REDLINE: ChangeFields = ChangeFields {
        tempo: true,
        meter: true,
        uninherited: true,
        omit_first_bar_line: true,
        ..ChangeFields::NONE
    };

    pub const HITSOUNDS: ChangeFields = ChangeFields {
        sample_set: true,
        sample_index: true,
        volume: true,
        ..ChangeFields::NONE
    };

    pub const SV: ChangeFields = ChangeFields {
        sv: true,
        ..ChangeFields::NONE
    };

    pub const KIAI: ChangeFields = ChangeFields {
        kiai: true,
        ..ChangeFields::NONE
    };

    /// Union of both field sets.
    pub const fn with(self, other: ChangeFields) -> ChangeFields {
        ChangeFields {
            tempo: self.tempo || other.tempo,
            meter: self.meter || other.meter,
            sample_set: self.sample_set || other.sample_set,
            sample_index: self.sample_index || other.sample_index,
            volume: self.volume || other.volume,
            kiai: self.kiai || other.kiai,
            uninherited: self.uninherited || other.uninherited,
            omit_first_bar_line: self.omit_first_bar_line || other.omit_first_bar_line,
            sv: self.sv || other.sv,
        }
    }

    fn is_audio_only(&self) -> bool {
        !(self.uninherited || self.sv)
    }
}

/// Intent to write some attributes of `point` into a timeline at
/// `point.offset`.
///
/// Changes landing on the same offset coalesce into one physical point when
/// applied.
#[derive(Debug, Clone, PartialEq)]
pub struct ControlChange {
    pub point: TimingPoint,
    pub fields: ChangeFields,
    pub fuzziness: f64,
}

impl ControlChange {
    pub fn new(point: TimingPoint, fields: ChangeFields) -> Self {
        let fuzziness = if fields.uninherited {
            REDLINE_FUZZINESS
        } else {
            GREENLINE_FUZZINESS
        };
        Self {
            point,
            fields,
            fuzziness,
        }
    }

    /// Full tempo write of a redline.
    pub fn redline(point: TimingPoint) -> Self {
        Self::new(point, ChangeFields::REDLINE)
    }

    pub fn offset(&self) -> f64 {
        self.point.offset
    }

    /// Writes this change into `timeline`, reusing points at the same offset
    /// and only creating a new one when nothing there can carry the fields.
    pub fn apply(&self, timeline: &mut Timeline) {
        let offset = self.point.offset;
        let on: Vec<usize> = timeline
            .points()
            .iter()
            .enumerate()
            .filter(|(_, tp)| (tp.offset - offset).abs() <= self.fuzziness)
            .map(|(index, _)| index)
            .collect();
        let has_red = on.iter().any(|&i| timeline.points()[i].uninherited);
        let has_green = on.iter().any(|&i| !timeline.points()[i].uninherited);
        let prev = match on.last() {
            Some(&i) => Some(timeline.points()[i].clone()),
            None => timeline
                .points()
                .iter()
                .rev()
                .find(|tp| tp.offset < offset)
                .cloned(),
        };

        if self.fields.uninherited {
            self.write_to(timeline, &on, |_| true);
            if !has_red {
                let mut redline = match &prev {
                    Some(prev) => TimingPoint {
                        offset,
                        uninherited: true,
                        ..prev.clone()
                    },
                    None => self.point.clone(),
                };
                redline.mpb = self.point.mpb;
                redline.meter = self.point.meter;
                redline.omit_first_bar_line = self.point.omit_first_bar_line;
                self.write_fields(&mut redline);
                trace!(offset, mpb = redline.mpb, "adding redline");
                timeline.add(redline);
            }
            return;
        }

        if has_green {
            self.write_to(timeline, &on, |_| true);
            return;
        }

        if has_red && self.fields.is_audio_only() {
            self.write_to(timeline, &on, |tp| tp.uninherited);
            return;
        }

        let mut greenline = match &prev {
            Some(prev) => TimingPoint {
                offset,
                uninherited: false,
                sv: prev.effective_sv(),
                ..prev.clone()
            },
            None => TimingPoint {
                offset,
                ..self.point.clone()
            },
        };
        greenline.uninherited = false;
        self.write_fields(&mut greenline);

        let redundant = prev
            .as_ref()
            .map(|prev| greenline.same_effect(prev))
            .unwrap_or(false);
        if !redundant {
            trace!(offset, sv = greenline.sv, "adding greenline");
            timeline.add(greenline);
        }
    }

    fn write_to<F: Fn(&TimingPoint) -> bool>(&self, timeline: &mut Timeline, on: &[usize], filter: F) {
        let points = timeline.points_mut();
        for &index in on {
            if filter(&points[index]) {
                self.write_fields(&mut points[index]);
            }
        }
    }

    fn write_fields(&self, target: &mut TimingPoint) {
        let source = &self.point;
        let fields = self.fields;
        if target.uninherited {
            if fields.tempo {
                target.mpb = source.mpb;
            }
            if fields.meter {
                target.meter = source.meter;
            }
            if fields.omit_first_bar_line {
                target.omit_first_bar_line = source.omit_first_bar_line;
            }
        } else if fields.sv {
            target.sv = source.sv;
        }
        if fields.sample_set {
            target.sample_set = source.sample_set;
        }
        if fields.sample_index {
            target.sample_index = source.sample_index;
        }
        if fields.volume {
            target.volume = source.volume;
        }
        if fields.kiai {
            target.kiai = source.kiai;
        }
    }
}

/// Applies every change in offset order, redline writes first at equal
/// offsets.
pub fn apply_changes(timeline: &mut Timeline, mut changes: Vec<ControlChange>) {
    changes.sort_by(|a, b| {
        a.offset()
            .total_cmp(&b.offset())
            .then_with(|| b.fields.uninherited.cmp(&a.fields.uninherited))
    });
    for change in &changes {
        change.apply(timeline);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::timing::SampleSet;

    fn base() -> Timeline {
        Timeline::new(vec![
            TimingPoint::redline(0.0, 500.0, 4),
            TimingPoint::greenline(1000.0, 0.8),
        ])
    }

    #[test]
    fn coalesces_redline_writes_on_the_same_offset() {
        let mut timeline = base();
        let changes = vec![
            ControlChange::redline(TimingPoint::redline(2000.0, 400.0, 4)),
            ControlChange::redline(TimingPoint::redline(2000.0 + 1e-4, 300.0, 3)),
        ];
        apply_changes(&mut timeline, changes);

        let reds: Vec<&TimingPoint> = timeline.redlines().collect();
        assert_eq!(reds.len(), 2);
        assert_eq!(reds[1].mpb, 300.0);
        assert_eq!(reds[1].meter, 3);
    }

    #[test]
    fn velocity_change_creates_greenline_inheriting_audio() {
        let mut timeline = base();
        let mut soft = TimingPoint::greenline(0.0, 1.0);
        soft.sample_set = SampleSet::Soft;
        ControlChange::new(soft, ChangeFields::HITSOUNDS).apply(&mut timeline);
        assert_eq!(timeline.points()[0].sample_set, SampleSet::Soft);
        assert_eq!(timeline.len(), 2);

        ControlChange::new(TimingPoint::greenline(1500.0, 1.6), ChangeFields::SV)
            .apply(&mut timeline);
        let added = timeline.point_at(1500.0).unwrap();
        assert_eq!(added.offset, 1500.0);
        assert_eq!(added.sv, 1.6);
        assert_eq!(added.sample_set, SampleSet::Normal);
    }

    #[test]
    fn redundant_greenline_is_not_added() {
        let mut timeline = base();
        ControlChange::new(TimingPoint::greenline(1200.0, 0.8), ChangeFields::SV)
            .apply(&mut timeline);
        assert_eq!(timeline.len(), 2);
    }

    #[test]
    fn new_redline_keeps_audio_in_effect() {
        let mut timeline = base();
        let mut source = TimingPoint::redline(3000.0, 250.0, 4);
        source.sample_set = SampleSet::Drum;
        source.volume = 20;
        ControlChange::redline(source).apply(&mut timeline);

        let added = timeline.redline_at(3000.0).unwrap();
        assert_eq!(added.mpb, 250.0);
        assert_eq!(added.sample_set, SampleSet::Normal);
        assert_eq!(added.volume, 100);
    }
}
