//! Inert stand-ins for devices that failed
//!
//! A stand-in satisfies the same capability interface as the device it
//! replaces without touching hardware. It never fails and always returns a
//! value of the shape the real device would have produced, so buffers and
//! record layouts downstream stay intact.

use crate::actuator::PositionActuator;
use crate::backend::{BackendDescriptor, CopySlots, IntegratorBackend, RawSpectrum};
use crate::{Device, DeviceResult, Frontend, Housekeeping};
use std::fmt::Debug;
use std::time::Duration;
use tracing::{debug, warn};

fn unavailable(label: &str, capability: &str) {
    debug!("{capability} is not available on the substituted {label}");
}

/// Stand-in for a position actuator. Remembers the last commanded target.
pub struct StandInActuator<P> {
    label: String,
    position: Option<P>,
}

impl<P: Copy + Debug> StandInActuator<P> {
    pub fn new(label: &str, position: Option<P>) -> Self {
        warn!("{label}: switching to stand-in actuator");
        Self {
            label: label.to_string(),
            position,
        }
    }
}

impl<P: Copy + Debug + Send> Device for StandInActuator<P> {
    fn label(&self) -> &str {
        &self.label
    }

    fn init(&mut self) -> DeviceResult<()> {
        unavailable(&self.label, "init");
        Ok(())
    }

    fn close(&mut self) -> DeviceResult<()> {
        Ok(())
    }
}

impl<P: Copy + Debug + Default + Send> PositionActuator<P> for StandInActuator<P> {
    fn set_position(&mut self, target: P) -> DeviceResult<()> {
        unavailable(&self.label, "set_position");
        self.position = Some(target);
        Ok(())
    }

    fn get_position(&mut self) -> DeviceResult<P> {
        unavailable(&self.label, "get_position");
        Ok(self.position.unwrap_or_default())
    }

    fn wait_until_settled(&mut self, _timeout: Duration) -> DeviceResult<()> {
        Ok(())
    }

    fn last_target(&self) -> Option<P> {
        self.position
    }
}

/// Stand-in backend producing zero-valued data of the configured shape.
pub struct StandInBackend {
    descriptor: BackendDescriptor,
    slots: CopySlots,
}

impl StandInBackend {
    pub fn new(descriptor: &BackendDescriptor) -> Self {
        warn!(
            "{}: switching to stand-in backend ({} channels)",
            descriptor.name,
            descriptor.channel_count()
        );
        let mut descriptor = descriptor.clone();
        descriptor.mark_closed();
        Self {
            slots: CopySlots::new(descriptor.copy_slots),
            descriptor,
        }
    }
}

impl Device for StandInBackend {
    fn label(&self) -> &str {
        &self.descriptor.name
    }

    fn init(&mut self) -> DeviceResult<()> {
        unavailable(&self.descriptor.name, "init");
        Ok(())
    }

    fn close(&mut self) -> DeviceResult<()> {
        Ok(())
    }
}

impl IntegratorBackend for StandInBackend {
    fn descriptor(&self) -> &BackendDescriptor {
        &self.descriptor
    }

    fn start_integration(&mut self) -> DeviceResult<()> {
        unavailable(&self.descriptor.name, "start_integration");
        Ok(())
    }

    fn integration_complete(&mut self) -> DeviceResult<bool> {
        Ok(true)
    }

    fn fetch(&mut self, slot: usize) -> DeviceResult<RawSpectrum> {
        unavailable(&self.descriptor.name, "fetch");
        let data = RawSpectrum::placeholder(&self.descriptor.kind);
        self.slots.store(slot, data.clone());
        Ok(data)
    }

    fn slot_data(&self, slot: usize) -> Option<&RawSpectrum> {
        self.slots.get(slot)
    }
}

/// Stand-in housekeeping sensor returning zeros.
pub struct StandInHousekeeping {
    label: String,
    channel_names: Vec<String>,
}

impl StandInHousekeeping {
    pub fn new(label: &str, channel_names: Vec<String>) -> Self {
        warn!("{label}: switching to stand-in housekeeping");
        Self {
            label: label.to_string(),
            channel_names,
        }
    }
}

impl Device for StandInHousekeeping {
    fn label(&self) -> &str {
        &self.label
    }

    fn init(&mut self) -> DeviceResult<()> {
        unavailable(&self.label, "init");
        Ok(())
    }

    fn close(&mut self) -> DeviceResult<()> {
        Ok(())
    }
}

impl Housekeeping for StandInHousekeeping {
    fn channel_names(&self) -> &[String] {
        &self.channel_names
    }

    fn sample(&mut self) -> DeviceResult<Vec<f32>> {
        unavailable(&self.label, "sample");
        Ok(vec![0.0; self.channel_names.len()])
    }
}

/// Stand-in frontend that accepts every tuning request.
pub struct StandInFrontend {
    label: String,
}

impl StandInFrontend {
    pub fn new(label: &str) -> Self {
        warn!("{label}: switching to stand-in frontend");
        Self {
            label: label.to_string(),
        }
    }
}

impl Device for StandInFrontend {
    fn label(&self) -> &str {
        &self.label
    }

    fn init(&mut self) -> DeviceResult<()> {
        unavailable(&self.label, "init");
        Ok(())
    }

    fn close(&mut self) -> DeviceResult<()> {
        Ok(())
    }
}

impl Frontend for StandInFrontend {
    fn tune(&mut self, _sky_ghz: f64, _if_ghz: f64) -> DeviceResult<f64> {
        unavailable(&self.label, "tune");
        Ok(0.0)
    }
}
