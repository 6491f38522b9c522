//! Device health tracking and substitution
//!
//! Each device lives in a [`DeviceSlot`] whose state is either `Real`
//! (talking to hardware) or `Substituted` (an inert stand-in). The first
//! device failure moves the slot to `Substituted` for the rest of the
//! session; the operation is then answered by the stand-in so the caller
//! still gets a value of the expected shape.

use crate::actuator::PositionActuator;
use crate::backend::IntegratorBackend;
use crate::error::{DeviceError, DeviceResult};
use crate::standin::{StandInActuator, StandInBackend, StandInFrontend, StandInHousekeeping};
use crate::{Device, Frontend, Housekeeping};
use serde::{Deserialize, Serialize};
use std::fmt::Debug;
use tracing::{info, warn};

/// Health of one device slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeviceHealth {
    Real,
    Substituted,
}

/// Builds the inert replacement for a failed device.
pub trait Substitutable {
    fn stand_in(&self) -> Box<Self>;
}

impl Substitutable for dyn IntegratorBackend {
    fn stand_in(&self) -> Box<Self> {
        Box::new(StandInBackend::new(self.descriptor()))
    }
}

impl Substitutable for dyn Housekeeping {
    fn stand_in(&self) -> Box<Self> {
        Box::new(StandInHousekeeping::new(
            self.label(),
            self.channel_names().to_vec(),
        ))
    }
}

impl Substitutable for dyn Frontend {
    fn stand_in(&self) -> Box<Self> {
        Box::new(StandInFrontend::new(self.label()))
    }
}

impl<P> Substitutable for dyn PositionActuator<P>
where
    P: Copy + Debug + Default + Send + 'static,
{
    fn stand_in(&self) -> Box<Self> {
        Box::new(StandInActuator::new(self.label(), self.last_target()))
    }
}

/// Result of one operation routed through a slot.
#[derive(Debug)]
pub enum Outcome<T> {
    /// Answered by the real device.
    Real(T),
    /// Answered by the stand-in (the device failed now or earlier).
    StandIn(T),
    /// Transient failure; the device stays real but this result is lost.
    Skipped(DeviceError),
}

impl<T> Outcome<T> {
    /// Value from the real device only.
    pub fn real(self) -> Option<T> {
        match self {
            Outcome::Real(v) => Some(v),
            _ => None,
        }
    }

    /// Value from either the device or its stand-in.
    pub fn value(self) -> Option<T> {
        match self {
            Outcome::Real(v) | Outcome::StandIn(v) => Some(v),
            Outcome::Skipped(_) => None,
        }
    }

    pub fn is_real(&self) -> bool {
        matches!(self, Outcome::Real(_))
    }
}

/// Current occupant of a slot.
pub enum SlotState<D: ?Sized> {
    Real(Box<D>),
    Substituted { stand_in: Box<D>, reason: String },
}

/// One device plus its health state.
pub struct DeviceSlot<D: ?Sized> {
    label: String,
    state: SlotState<D>,
}

impl<D> DeviceSlot<D>
where
    D: Device + Substitutable + ?Sized,
{
    pub fn new(device: Box<D>) -> Self {
        Self {
            label: device.label().to_string(),
            state: SlotState::Real(device),
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn health(&self) -> DeviceHealth {
        match self.state {
            SlotState::Real(_) => DeviceHealth::Real,
            SlotState::Substituted { .. } => DeviceHealth::Substituted,
        }
    }

    pub fn is_real(&self) -> bool {
        self.health() == DeviceHealth::Real
    }

    /// Why the device was substituted, if it was.
    pub fn failure(&self) -> Option<&str> {
        match &self.state {
            SlotState::Real(_) => None,
            SlotState::Substituted { reason, .. } => Some(reason),
        }
    }

    /// The current occupant, real or stand-in.
    pub fn device(&self) -> &D {
        match &self.state {
            SlotState::Real(d) => d.as_ref(),
            SlotState::Substituted { stand_in, .. } => stand_in.as_ref(),
        }
    }

    /// Real → Substituted. The real handle gets one close attempt before it
    /// is dropped; a slot that is already substituted keeps its first
    /// failure reason.
    pub fn substitute(&mut self, capability: &str, reason: String) {
        if let SlotState::Real(device) = &mut self.state {
            warn!(
                device = %self.label,
                capability,
                "device failed, substituting stand-in: {reason}"
            );
            if let Err(e) = device.close() {
                warn!(device = %self.label, "failed to close failed device: {e}");
            }
            let stand_in = device.stand_in();
            self.state = SlotState::Substituted { stand_in, reason };
        }
    }

    /// Runs `op` on the occupant and applies the failure policy.
    ///
    /// Transient errors leave the device real and yield [`Outcome::Skipped`].
    /// Caller errors (sequencing, out-of-range requests) are returned as
    /// `Err`. Every other failure substitutes the device and repeats `op`
    /// on the stand-in.
    pub fn operate<T, F>(&mut self, capability: &str, mut op: F) -> DeviceResult<Outcome<T>>
    where
        F: FnMut(&mut D) -> DeviceResult<T>,
    {
        let err = match &mut self.state {
            SlotState::Substituted { stand_in, .. } => {
                return Ok(match op(stand_in.as_mut()) {
                    Ok(v) => Outcome::StandIn(v),
                    Err(e) => Outcome::Skipped(e),
                });
            }
            SlotState::Real(device) => match op(device.as_mut()) {
                Ok(v) => return Ok(Outcome::Real(v)),
                Err(e) => e,
            },
        };

        if err.is_caller_error() {
            return Err(err);
        }
        if err.is_transient() {
            warn!(device = %self.label, capability, "transient failure: {err}");
            return Ok(Outcome::Skipped(err));
        }

        self.substitute(capability, err.to_string());
        self.operate(capability, op)
    }

    /// Initializes the device, substituting it on failure.
    pub fn init(&mut self) -> DeviceResult<DeviceHealth> {
        self.operate("init", |d| d.init())?;
        Ok(self.health())
    }

    /// Closes a real device. Returns true if a real device was closed.
    pub fn close(&mut self) -> bool {
        match &mut self.state {
            SlotState::Real(device) => match device.close() {
                Ok(()) => {
                    info!("Closed {}", self.label);
                    true
                }
                Err(e) => {
                    warn!("Failed to close {}: {}", self.label, e);
                    false
                }
            },
            SlotState::Substituted { .. } => false,
        }
    }
}
