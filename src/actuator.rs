use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;

use log::{debug, info};
use thiserror::Error;

const SYSFS_GPIO_ROOT: &str = "/sys/class/gpio";

#[derive(Error, Debug)]
pub enum ActuatorError {
    /// Pin could not be exported or configured as an output
    #[error("failed to set up gpio {pin}: {source}")]
    Setup {
        pin: u8,
        #[source]
        source: io::Error,
    },

    /// A level write did not reach the pin
    #[error("failed to write gpio {pin}: {source}")]
    Write {
        pin: u8,
        #[source]
        source: io::Error,
    },
}

impl ActuatorError {
    /// Setup failures mean the hardware is unusable; write failures may be
    /// transient and are survivable.
    pub fn is_fatal(&self) -> bool {
        matches!(self, ActuatorError::Setup { .. })
    }
}

/// A digital output. Writes take effect before `write` returns.
pub trait OutputPin {
    fn write(&mut self, high: bool) -> Result<(), ActuatorError>;

    fn is_high(&self) -> bool;

    fn toggle(&mut self) -> Result<(), ActuatorError> {
        let next = !self.is_high();
        self.write(next)
    }
}

/// Linux sysfs GPIO output.
#[derive(Debug)]
pub struct SysfsPin {
    pin: u8,
    value_path: PathBuf,
    active_low: bool,
    high: bool,
}

impl SysfsPin {
    pub fn open(pin: u8, active_low: bool) -> Result<Self, ActuatorError> {
        Self::open_at(Path::new(SYSFS_GPIO_ROOT), pin, active_low)
    }

    fn open_at(root: &Path, pin: u8, active_low: bool) -> Result<Self, ActuatorError> {
        let setup = |source: io::Error| ActuatorError::Setup { pin, source };
        let pin_dir = root.join(format!("gpio{pin}"));

        if !pin_dir.exists() {
            debug!("Exporting gpio {}", pin);
            fs::write(root.join("export"), pin.to_string()).map_err(setup)?;
            // udev needs a moment to hand over the new attribute files
            let mut attempts = 0;
            while fs::metadata(pin_dir.join("direction")).is_err() && attempts < 20 {
                thread::sleep(Duration::from_millis(10));
                attempts += 1;
            }
        }

        // "low" sets the direction and drives the pin inactive in one write
        fs::write(pin_dir.join("direction"), "low").map_err(setup)?;
        fs::write(
            pin_dir.join("active_low"),
            if active_low { "1" } else { "0" },
        )
        .map_err(setup)?;

        let mut gpio = SysfsPin {
            pin,
            value_path: pin_dir.join("value"),
            active_low,
            high: false,
        };
        gpio.write(false).map_err(|err| match err {
            ActuatorError::Write { source, .. } => setup(source),
            other => other,
        })?;

        info!(
            "Opened gpio {} as output{}",
            pin,
            if active_low { " (active low)" } else { "" }
        );
        Ok(gpio)
    }
}

impl OutputPin for SysfsPin {
    fn write(&mut self, high: bool) -> Result<(), ActuatorError> {
        fs::write(&self.value_path, if high { "1" } else { "0" })
            .map_err(|source| ActuatorError::Write { pin: self.pin, source })?;
        self.high = high;
        Ok(())
    }

    fn is_high(&self) -> bool {
        self.high
    }
}

impl Drop for SysfsPin {
    fn drop(&mut self) {
        if self.high {
            let _ = fs::write(&self.value_path, "0");
        }
        debug!("Released gpio {} (active_low: {})", self.pin, self.active_low);
    }
}

/// Output that only logs, for running without relay hardware.
#[derive(Debug)]
pub struct DryRunPin {
    label: &'static str,
    high: bool,
}

impl DryRunPin {
    pub fn new(label: &'static str) -> Self {
        DryRunPin { label, high: false }
    }
}

impl OutputPin for DryRunPin {
    fn write(&mut self, high: bool) -> Result<(), ActuatorError> {
        debug!("[dry-run] {} -> {}", self.label, if high { 1 } else { 0 });
        self.high = high;
        Ok(())
    }

    fn is_high(&self) -> bool {
        self.high
    }
}

impl<P: OutputPin + ?Sized> OutputPin for Box<P> {
    fn write(&mut self, high: bool) -> Result<(), ActuatorError> {
        (**self).write(high)
    }

    fn is_high(&self) -> bool {
        (**self).is_high()
    }
}

#[cfg(test)]
pub mod testing {
    use std::sync::{Arc, Mutex};

    use super::*;

    /// Records every level written so tests can inspect the pulse train.
    #[derive(Clone, Debug, Default)]
    pub struct RecordingPin {
        pub writes: Arc<Mutex<Vec<bool>>>,
        pub fail_writes: bool,
        high: bool,
    }

    impl RecordingPin {
        pub fn failing() -> Self {
            RecordingPin {
                fail_writes: true,
                ..Default::default()
            }
        }

        pub fn history(&self) -> Vec<bool> {
            self.writes.lock().unwrap().clone()
        }

        pub fn pulses(&self) -> usize {
            self.history().iter().filter(|high| **high).count()
        }
    }

    impl OutputPin for RecordingPin {
        fn write(&mut self, high: bool) -> Result<(), ActuatorError> {
            self.writes.lock().unwrap().push(high);
            if self.fail_writes {
                return Err(ActuatorError::Write {
                    pin: 0,
                    source: io::Error::new(io::ErrorKind::Other, "stuck"),
                });
            }
            self.high = high;
            Ok(())
        }

        fn is_high(&self) -> bool {
            self.high
        }
    }
}
