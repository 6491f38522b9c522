use super::{not_initialized, DeviceEvent, FaultPlan, SimBench};
use crate::actuator::ChopperTarget;
use crate::error::{DeviceError, DeviceResult};
use crate::{Device, Frontend, Housekeeping};

/// Housekeeping channel names in record order.
pub const HOUSEKEEPING_CHANNELS: [&str; 16] = [
    "cold_load_k",
    "hot_load_k",
    "air_temp_k",
    "rel_humidity",
    "chopper_position",
    "integration_ms",
    "temp_b2_k",
    "temp_b3_k",
    "temp_77k_stage",
    "temp_15k_stage",
    "temp_4k_stage",
    "lo_b2_ghz",
    "lo_b3_ghz",
    "reference_lo_ghz",
    "sky_frequency_ghz",
    "if_frequency_ghz",
];

/// Simulated sensor board. Reports the bench load temperatures.
pub struct SimHousekeeping {
    label: String,
    bench: SimBench,
    faults: FaultPlan,
    names: Vec<String>,
    initialized: bool,
}

impl SimHousekeeping {
    pub fn new(bench: SimBench) -> Self {
        Self {
            label: "housekeeping".to_string(),
            bench,
            faults: FaultPlan::default(),
            names: HOUSEKEEPING_CHANNELS.iter().map(|s| s.to_string()).collect(),
            initialized: false,
        }
    }

    pub fn with_faults(mut self, faults: FaultPlan) -> Self {
        self.faults = faults;
        self
    }
}

impl Device for SimHousekeeping {
    fn label(&self) -> &str {
        &self.label
    }

    fn init(&mut self) -> DeviceResult<()> {
        self.faults.check_init(&self.label)?;
        self.initialized = true;
        Ok(())
    }

    fn close(&mut self) -> DeviceResult<()> {
        self.faults.check_close(&self.label)?;
        self.initialized = false;
        self.bench
            .events()
            .record(DeviceEvent::Closed(self.label.clone()));
        Ok(())
    }
}

impl Housekeeping for SimHousekeeping {
    fn channel_names(&self) -> &[String] {
        &self.names
    }

    fn sample(&mut self) -> DeviceResult<Vec<f32>> {
        if !self.initialized {
            return Err(not_initialized(&self.label, "sample"));
        }
        self.faults.check_operation(&self.label, "sample")?;

        let loads = self.bench.loads();
        let chopper = match self.bench.chopper() {
            ChopperTarget::Cold => 0.0,
            ChopperTarget::Hot => 1.0,
            ChopperTarget::Antenna => 2.0,
            ChopperTarget::Reference => 3.0,
        };
        let mut values = vec![0.0_f32; self.names.len()];
        values[0] = loads.cold_k as f32;
        values[1] = loads.hot_k as f32;
        values[2] = 293.0;
        values[3] = 40.0;
        values[4] = chopper;
        values[8] = 77.0;
        values[9] = 15.0;
        values[10] = 4.0;
        self.bench.events().record(DeviceEvent::HousekeepingSampled);
        Ok(values)
    }
}

/// Simulated tunable frontend with a fixed LO multiplication factor.
pub struct SimFrontend {
    label: String,
    bench: SimBench,
    faults: FaultPlan,
    multiplier: f64,
    reference_range: (f64, f64),
    initialized: bool,
}

impl SimFrontend {
    pub fn new(bench: SimBench) -> Self {
        Self {
            label: "frontend".to_string(),
            bench,
            faults: FaultPlan::default(),
            multiplier: 18.0,
            reference_range: (11.0, 15.5),
            initialized: false,
        }
    }

    pub fn with_faults(mut self, faults: FaultPlan) -> Self {
        self.faults = faults;
        self
    }
}

impl Device for SimFrontend {
    fn label(&self) -> &str {
        &self.label
    }

    fn init(&mut self) -> DeviceResult<()> {
        self.faults.check_init(&self.label)?;
        self.initialized = true;
        Ok(())
    }

    fn close(&mut self) -> DeviceResult<()> {
        self.faults.check_close(&self.label)?;
        self.initialized = false;
        self.bench
            .events()
            .record(DeviceEvent::Closed(self.label.clone()));
        Ok(())
    }
}

impl Frontend for SimFrontend {
    fn tune(&mut self, sky_ghz: f64, if_ghz: f64) -> DeviceResult<f64> {
        if !self.initialized {
            return Err(not_initialized(&self.label, "tune"));
        }
        let reference_ghz = (sky_ghz - if_ghz) / self.multiplier;
        let (min, max) = self.reference_range;
        if !(min..=max).contains(&reference_ghz) {
            return Err(DeviceError::OutOfRange {
                device: self.label.clone(),
                requested: reference_ghz,
                min,
                max,
            });
        }
        self.faults.check_operation(&self.label, "tune")?;
        self.bench.events().record(DeviceEvent::Tuned {
            sky_ghz,
            reference_ghz,
        });
        Ok(reference_ghz)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_housekeeping_reports_loads() {
        let bench = SimBench::default();
        let mut hk = SimHousekeeping::new(bench.clone());
        hk.init().unwrap();
        let values = hk.sample().unwrap();
        assert_eq!(values.len(), hk.channel_names().len());
        assert_eq!(values[0], 21.0);
        assert_eq!(values[1], 295.0);
        assert_eq!(bench.events().snapshot(), vec![DeviceEvent::HousekeepingSampled]);
    }

    #[test]
    fn test_frontend_reference_frequency() {
        let mut frontend = SimFrontend::new(SimBench::default());
        frontend.init().unwrap();
        let reference = frontend.tune(214.0, 6.0).unwrap();
        assert_relative_eq!(reference, 208.0 / 18.0, epsilon = 1e-12);
    }

    #[test]
    fn test_frontend_out_of_range() {
        let mut frontend = SimFrontend::new(SimBench::default());
        frontend.init().unwrap();
        let err = frontend.tune(400.0, 6.0).unwrap_err();
        assert!(err.is_caller_error());
    }
}
