//! GPIO driver
//!
//! [`LoopbackGpio`] keeps pin levels in memory. The host side drives input
//! levels through a [`GpioPins`] handle, which makes it the test double for
//! real pin hardware.

use hashbrown::HashMap;
use parking_lot::Mutex;
use std::sync::Arc;

use super::{Peripheral, PeripheralError};

/// Highest pin number accepted
pub const MAX_PIN: u32 = 255;

/// Status word bits
pub const STATUS_INITIALIZED: i64 = 0b001;
pub const STATUS_OUTPUT: i64 = 0b010;
pub const STATUS_HIGH: i64 = 0b100;

/// Pin direction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PinMode {
    Input,
    Output,
    InputPullUp,
}

impl PinMode {
    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            0 => Some(PinMode::Input),
            1 => Some(PinMode::Output),
            2 => Some(PinMode::InputPullUp),
            _ => None,
        }
    }

    pub fn code(&self) -> i64 {
        match self {
            PinMode::Input => 0,
            PinMode::Output => 1,
            PinMode::InputPullUp => 2,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct PinState {
    mode: PinMode,
    level: bool,
}

/// Shared pin table
#[derive(Debug, Clone, Default)]
pub struct GpioPins {
    pins: Arc<Mutex<HashMap<u32, PinState>>>,
}

impl GpioPins {
    /// Drive the input level of `pin` from the host side
    pub fn set_level(
        &self,
        pin: u32,
        high: bool,
    ) {
        let mut pins = self.pins.lock();
        pins.entry(pin)
            .and_modify(|p| p.level = high)
            .or_insert(PinState {
                mode: PinMode::Input,
                level: high,
            });
    }

    /// Current level of `pin`
    pub fn level(
        &self,
        pin: u32,
    ) -> Option<bool> {
        self.pins.lock().get(&pin).map(|p| p.level)
    }

    pub fn mode(
        &self,
        pin: u32,
    ) -> Option<PinMode> {
        self.pins.lock().get(&pin).map(|p| p.mode)
    }
}

/// In-memory GPIO driver
#[derive(Debug, Clone, Default)]
pub struct LoopbackGpio {
    pins: GpioPins,
}

impl LoopbackGpio {
    pub fn new() -> Self {
        Self::default()
    }

    /// Handle for driving pins from the host
    pub fn pins(&self) -> GpioPins {
        self.pins.clone()
    }
}

fn check_pin(pin: u32) -> Result<(), PeripheralError> {
    if pin > MAX_PIN {
        Err(PeripheralError::InvalidChannel(pin))
    } else {
        Ok(())
    }
}

impl Peripheral for LoopbackGpio {
    fn init(
        &mut self,
        channel: u32,
        config: &[i64],
    ) -> Result<(), PeripheralError> {
        check_pin(channel)?;
        let code = config.first().copied().unwrap_or(0);
        let mode = PinMode::from_code(code)
            .ok_or_else(|| PeripheralError::Device(format!("unknown pin mode {}", code)))?;
        let mut pins = self.pins.pins.lock();
        let pin = pins.entry(channel).or_insert(PinState { mode, level: false });
        pin.mode = mode;
        if mode == PinMode::InputPullUp {
            pin.level = true;
        }
        Ok(())
    }

    fn read(
        &mut self,
        channel: u32,
    ) -> Result<i64, PeripheralError> {
        check_pin(channel)?;
        self.pins
            .level(channel)
            .map(i64::from)
            .ok_or(PeripheralError::NotInitialized(channel))
    }

    fn write(
        &mut self,
        channel: u32,
        value: i64,
    ) -> Result<(), PeripheralError> {
        check_pin(channel)?;
        let mut pins = self.pins.pins.lock();
        let pin = pins
            .get_mut(&channel)
            .ok_or(PeripheralError::NotInitialized(channel))?;
        if pin.mode != PinMode::Output {
            return Err(PeripheralError::Device(format!("pin {} is not an output", channel)));
        }
        pin.level = value != 0;
        Ok(())
    }

    fn status(
        &self,
        channel: u32,
    ) -> Result<i64, PeripheralError> {
        check_pin(channel)?;
        let pins = self.pins.pins.lock();
        Ok(match pins.get(&channel) {
            None => 0,
            Some(p) => {
                let mut s = STATUS_INITIALIZED;
                if p.mode == PinMode::Output {
                    s |= STATUS_OUTPUT;
                }
                if p.level {
                    s |= STATUS_HIGH;
                }
                s
            }
        })
    }
}
