use bitflags::bitflags;

use crate::brain::SharedBrain;
use crate::error::HardwareError;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct Buttons: u16 {
        const A = 1 << 0;
        const B = 1 << 1;
        const X = 1 << 2;
        const Y = 1 << 3;
        const L1 = 1 << 4;
        const L2 = 1 << 5;
        const R1 = 1 << 6;
        const R2 = 1 << 7;
        const UP = 1 << 8;
        const DOWN = 1 << 9;
        const LEFT = 1 << 10;
        const RIGHT = 1 << 11;
    }
}

/// Full scale of a raw stick axis as the brain reports it.
pub const AXIS_FULL_SCALE: f64 = 127.0;

/// One sample of the operator controller, axes normalised to [-1, 1].
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ControllerState {
    axes: [f64; 4],
    pub buttons: Buttons,
}

impl ControllerState {
    /// Builds a sample from raw axis readings ordered
    /// `[left x, left y, right x, right y]`.
    pub fn from_raw(axes: [i8; 4], buttons: Buttons) -> Self {
        // -128 is never reported but would overshoot full scale
        let norm = |v: i8| (v as f64 / AXIS_FULL_SCALE).clamp(-1.0, 1.0);
        Self {
            axes: axes.map(norm),
            buttons,
        }
    }
    pub fn from_normalised(axes: [f64; 4], buttons: Buttons) -> Self {
        Self {
            axes: axes.map(|v| v.clamp(-1.0, 1.0)),
            buttons,
        }
    }
    pub fn lx(&self) -> f64 {
        self.axes[0]
    }
    pub fn ly(&self) -> f64 {
        self.axes[1]
    }
    pub fn rx(&self) -> f64 {
        self.axes[2]
    }
    pub fn ry(&self) -> f64 {
        self.axes[3]
    }
    pub fn held(&self, button: Buttons) -> bool {
        self.buttons.contains(button)
    }
}

/// Digital input lines for one control tick. `sample` reads the tick's
/// packet; `resample` reads the line again once a debounce wait is over.
pub trait ButtonSource {
    fn sample(&mut self, button: Buttons) -> Result<bool, HardwareError>;
    fn resample(&mut self, button: Buttons) -> Result<bool, HardwareError>;
}

/// The controller packet of one tick, backed by the brain for resamples.
pub struct TickInput {
    brain: SharedBrain,
    state: ControllerState,
    // false while a motion task owns the packet exchange
    exchange: bool,
}

impl TickInput {
    pub fn new(brain: SharedBrain, state: ControllerState, exchange: bool) -> Self {
        Self {
            brain,
            state,
            exchange,
        }
    }
}

impl ButtonSource for TickInput {
    fn sample(&mut self, button: Buttons) -> Result<bool, HardwareError> {
        Ok(self.state.held(button))
    }

    fn resample(&mut self, button: Buttons) -> Result<bool, HardwareError> {
        let mut brain = self.brain.lock();
        if self.exchange {
            brain.update()?;
        }
        Ok(brain.controller()?.held(button))
    }
}
