//! Peripheral binding boundary
//!
//! Hardware drivers implement [`Peripheral`] and are registered by name in a
//! [`PeripheralRegistry`] owned by the VM. The interface carries integer
//! scalars only, so a driver never sees VM values. Ruby classes such as
//! `GPIO` look their driver up by name on every call.

pub mod gpio;

pub use gpio::{GpioPins, LoopbackGpio, PinMode};

use hashbrown::HashMap;
use thiserror::Error;

/// Driver failure
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PeripheralError {
    #[error("no driver registered as '{0}'")]
    NoDriver(String),
    #[error("invalid channel {0}")]
    InvalidChannel(u32),
    #[error("channel {0} is not initialized")]
    NotInitialized(u32),
    #[error("device error: {0}")]
    Device(String),
}

/// A hardware driver
pub trait Peripheral {
    /// Configure `channel`; `config` is driver specific (GPIO: `[mode]`)
    fn init(
        &mut self,
        channel: u32,
        config: &[i64],
    ) -> Result<(), PeripheralError>;

    /// Read a scalar from `channel`
    fn read(
        &mut self,
        channel: u32,
    ) -> Result<i64, PeripheralError>;

    /// Write a scalar to `channel`
    fn write(
        &mut self,
        channel: u32,
        value: i64,
    ) -> Result<(), PeripheralError>;

    /// Driver-defined status word of `channel`
    fn status(
        &self,
        channel: u32,
    ) -> Result<i64, PeripheralError>;
}

/// Named driver table
#[derive(Default)]
pub struct PeripheralRegistry {
    drivers: HashMap<String, Box<dyn Peripheral>>,
}

impl std::fmt::Debug for PeripheralRegistry {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("PeripheralRegistry")
            .field("drivers", &self.drivers.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl PeripheralRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `driver` as `name`, returning the driver it replaces
    pub fn register(
        &mut self,
        name: impl Into<String>,
        driver: Box<dyn Peripheral>,
    ) -> Option<Box<dyn Peripheral>> {
        self.drivers.insert(name.into(), driver)
    }

    pub fn unregister(
        &mut self,
        name: &str,
    ) -> Option<Box<dyn Peripheral>> {
        self.drivers.remove(name)
    }

    pub fn contains(
        &self,
        name: &str,
    ) -> bool {
        self.drivers.contains_key(name)
    }

    pub fn get(
        &self,
        name: &str,
    ) -> Result<&dyn Peripheral, PeripheralError> {
        self.drivers
            .get(name)
            .map(|d| d.as_ref())
            .ok_or_else(|| PeripheralError::NoDriver(name.to_string()))
    }

    pub fn get_mut(
        &mut self,
        name: &str,
    ) -> Result<&mut (dyn Peripheral + 'static), PeripheralError> {
        self.drivers
            .get_mut(name)
            .map(|d| d.as_mut())
            .ok_or_else(|| PeripheralError::NoDriver(name.to_string()))
    }
}
