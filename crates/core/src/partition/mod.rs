use tracing::debug;

use crate::{context::WorkItem, timing::Timeline};

/// Path objects shorter than this count as zero-length.
const DEGENERATE_LENGTH: f64 = 1.0;

/// A maximal run of pattern objects without a large internal gap.
#[derive(Debug, Clone, PartialEq)]
pub struct Part {
    pub start_time: f64,
    pub end_time: f64,
    /// Indices into the work-item arena, in time order.
    pub objects: Vec<usize>,
    /// Bounds were supplied by the caller rather than found by partitioning.
    pub explicit: bool,
}

impl Part {
    fn open(index: usize, start: f64, end: f64) -> Self {
        Self {
            start_time: start,
            end_time: end,
            objects: vec![index],
            explicit: false,
        }
    }

    /// One part holding every item; either bound may be overridden.
    pub fn spanning(items: &[WorkItem], start: Option<f64>, end: Option<f64>) -> Self {
        let first = items
            .iter()
            .map(|item| item.times.start)
            .reduce(f64::min)
            .unwrap_or(0.0);
        let last = items
            .iter()
            .map(|item| item.times.end.max(item.times.start))
            .reduce(f64::max)
            .unwrap_or(first);
        Self {
            start_time: start.unwrap_or(first),
            end_time: end.unwrap_or(last),
            objects: (0..items.len()).collect(),
            explicit: start.is_some() || end.is_some(),
        }
    }

    /// Re-derives the end from the objects' (possibly corrected) end times.
    pub fn refresh_end(&mut self, items: &[WorkItem]) {
        let latest = self
            .objects
            .iter()
            .map(|&index| items[index].times.end.max(items[index].times.start))
            .reduce(f64::max);
        if let Some(latest) = latest {
            self.end_time = if self.explicit {
                self.end_time.max(latest)
            } else {
                latest
            };
        }
    }
}

/// Splits `items` (sorted by start) into parts separated by gaps of at least
/// `parting_distance`.
///
/// With `using_beat_time` the item times are beats and the gap is their plain
/// difference. Otherwise times are milliseconds and the gap is the smaller of
/// the millisecond gap and the beat gap measured on `timeline`.
pub fn partition(
    items: &[WorkItem],
    timeline: &Timeline,
    parting_distance: f64,
    using_beat_time: bool,
) -> Vec<Part> {
    let mut parts: Vec<Part> = Vec::new();
    let mut current: Option<Part> = None;

    for (index, item) in items.iter().enumerate() {
        let start = item.times.start;
        let mut end = item.times.end.max(start);
        if item.is_path() && !using_beat_time && (end - start).abs() < DEGENERATE_LENGTH {
            end = start + DEGENERATE_LENGTH;
        }

        let Some(part) = current.as_mut() else {
            current = Some(Part::open(index, start, end));
            continue;
        };

        let ms_gap = start - part.end_time;
        let gap = if using_beat_time {
            ms_gap
        } else {
            ms_gap.min(timeline.beat_length(part.end_time, start))
        };

        if gap < parting_distance {
            part.objects.push(index);
            part.end_time = part.end_time.max(end);
            continue;
        }
        parts.extend(current.replace(Part::open(index, start, end)));
    }
    parts.extend(current);

    debug!(parts = parts.len(), objects = items.len(), "partitioned pattern");
    parts
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        chart::{Chart, HitObject},
        context::capture_all,
        geometry::Vec2,
        timing::TimingPoint,
    };

    fn items_at(times: &[f64]) -> (Vec<WorkItem>, Timeline) {
        let timeline = Timeline::new(vec![TimingPoint::redline(0.0, 500.0, 4)]);
        let chart = Chart {
            timeline: timeline.clone(),
            hit_objects: times
                .iter()
                .map(|&t| HitObject::circle(Vec2::zero(), t))
                .collect(),
            ..Chart::default()
        };
        (capture_all(&chart), timeline)
    }

    #[test]
    fn splits_on_large_gaps() {
        let (items, timeline) = items_at(&[0.0, 500.0, 1000.0, 4000.0, 4250.0]);
        let parts = partition(&items, &timeline, 4.0, false);

        assert_eq!(parts.len(), 2);
        assert_eq!(parts[0].objects, vec![0, 1, 2]);
        assert_eq!((parts[0].start_time, parts[0].end_time), (0.0, 1000.0));
        assert_eq!(parts[1].objects, vec![3, 4]);
        assert_eq!((parts[1].start_time, parts[1].end_time), (4000.0, 4250.0));
    }

    #[test]
    fn covers_every_object_once_in_order() {
        let (items, timeline) = items_at(&[0.0, 10.0, 20.0, 900.0, 5000.0, 5000.0, 9000.0]);
        for distance in [0.0, 0.5, 1.0, 4.0, 100.0] {
            let parts = partition(&items, &timeline, distance, false);
            let flattened: Vec<usize> = parts.iter().flat_map(|p| p.objects.clone()).collect();
            assert_eq!(flattened, (0..items.len()).collect::<Vec<_>>(), "distance {distance}");
        }
    }

    #[test]
    fn beat_time_gaps_are_plain_differences() {
        let (mut items, timeline) = items_at(&[0.0, 1.0, 2.0]);
        items[2].times = crate::context::TransformTimeContext { start: 6.0, end: 6.0 };
        let parts = partition(&items, &timeline, 4.0, true);
        assert_eq!(parts.len(), 2);
    }

    #[test]
    fn spanning_part_takes_overrides() {
        let (items, _) = items_at(&[100.0, 300.0]);
        let part = Part::spanning(&items, Some(50.0), None);
        assert!(part.explicit);
        assert_eq!((part.start_time, part.end_time), (50.0, 300.0));
        assert_eq!(part.objects, vec![0, 1]);
    }
}
