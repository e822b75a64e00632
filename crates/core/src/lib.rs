//! Core library of the pattern placer.
//!
//! Places a small chart fragment (a pattern) into a destination chart at a
//! target time. The two charts carry independent timelines, so placement
//! reconciles their tempo under a chosen policy, optionally rescales the
//! pattern to the destination's rhythm, and keeps the result snapped,
//! audible and colour-consistent. Each module owns one stage of that
//! pipeline; [`PatternPlacer`] runs them in order.

pub mod beat_time;
pub mod chart;
pub mod config;
pub mod context;
pub mod diff;
pub mod error;
pub mod geometry;
pub mod overwrite;
pub mod partition;
pub mod placer;
pub mod reconcile;
pub mod resnap;
pub mod spatial;
pub mod timing;

pub use beat_time::BeatTimeTransformer;
pub use chart::{Chart, Difficulty, GameMode, HitObject, HitObjectKind, SliderPath};
pub use config::AppConfig;
pub use context::{TimingContext, TransformTimeContext, WorkItem};
pub use error::{PlacementError, Result};
pub use geometry::Vec2;
pub use overwrite::PatternOverwriteMode;
pub use partition::Part;
pub use placer::{preview_parts, PatternPlacer};
pub use reconcile::TimingOverwriteMode;
pub use resnap::BeatDivisor;
pub use timing::{ControlChange, Timeline, TimingPoint};
