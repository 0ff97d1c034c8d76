//! Simulation timing.
//!
//! [`DynGlobals`] is the explicit timing context every step receives: frame
//! rate, oversampling and the frame at which simulation time is zero. Nothing
//! here reads a wall clock, so a scene replays identically.
//!
//! # Example
//!
//! ```ignore
//! let globals = DynGlobals::new(24.0).with_over_samples(2);
//!
//! assert_eq!(globals.step_dt(), 1.0 / 48.0);
//! assert_eq!(globals.frame_time(25), 1.0);
//! ```

use crate::error::{DynamicsError, Result};
use serde::{Deserialize, Serialize};

/// Timing parameters shared by all dynamics in a scene.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct DynGlobals {
    /// Frames per second.
    #[serde(default = "default_fps")]
    pub fps: f32,
    /// Integration steps per frame.
    #[serde(default = "default_over_samples")]
    pub over_samples: u32,
    /// Frame at which simulation time is zero.
    #[serde(default = "default_start_frame")]
    pub start_frame: i64,
    /// Multiplier on simulated time per frame (1.0 = real time).
    #[serde(default = "default_time_scale")]
    pub time_scale: f32,
}

fn default_fps() -> f32 {
    24.0
}

fn default_over_samples() -> u32 {
    1
}

fn default_start_frame() -> i64 {
    1
}

fn default_time_scale() -> f32 {
    1.0
}

impl Default for DynGlobals {
    fn default() -> Self {
        Self {
            fps: default_fps(),
            over_samples: default_over_samples(),
            start_frame: default_start_frame(),
            time_scale: default_time_scale(),
        }
    }
}

impl DynGlobals {
    /// Globals at `fps` with one step per frame.
    pub fn new(fps: f32) -> Self {
        Self {
            fps,
            ..Self::default()
        }
    }

    pub fn with_over_samples(mut self, over_samples: u32) -> Self {
        self.over_samples = over_samples.max(1);
        self
    }

    pub fn with_start_frame(mut self, frame: i64) -> Self {
        self.start_frame = frame;
        self
    }

    pub fn with_time_scale(mut self, scale: f32) -> Self {
        self.time_scale = scale;
        self
    }

    /// Reject settings that would produce a zero or non-finite step.
    pub fn validate(&self) -> Result<()> {
        if !self.fps.is_finite() || self.fps <= 0.0 {
            return Err(DynamicsError::invalid("fps", format!("{} is not a positive rate", self.fps)));
        }
        if self.over_samples == 0 {
            return Err(DynamicsError::invalid("over_samples", "must be at least 1"));
        }
        if !self.time_scale.is_finite() || self.time_scale <= 0.0 {
            return Err(DynamicsError::invalid(
                "time_scale",
                format!("{} is not positive", self.time_scale),
            ));
        }
        Ok(())
    }

    /// Simulated seconds per frame.
    #[inline]
    pub fn frame_dt(&self) -> f32 {
        self.time_scale / self.fps
    }

    /// Simulated seconds per integration step.
    #[inline]
    pub fn step_dt(&self) -> f32 {
        self.frame_dt() / self.over_samples.max(1) as f32
    }

    /// Simulation time at the start of `frame`.
    pub fn frame_time(&self, frame: i64) -> f32 {
        ((frame - self.start_frame) as f64 * f64::from(self.frame_dt())) as f32
    }

    /// Simulation time at the start of substep `substep` of `frame`.
    pub fn step_time(&self, frame: i64, substep: u32) -> f32 {
        self.frame_time(frame) + self.step_dt() * substep as f32
    }
}
