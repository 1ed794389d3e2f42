use serde::Serialize;

use crate::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FanState {
    #[default]
    Off,
    On,
}

/// Hysteresis over CPU temperature.
///
/// Above the threshold the fan is forced on. Once the temperature drops, the fan keeps
/// running for `cooldown_ticks` more ticks and switches off on the tick after that.
#[derive(Debug, Clone)]
pub struct FanController {
    threshold_c: f32,
    cooldown_ticks: u32,
    state: FanState,
    cooldown: u32,
}

impl FanController {
    pub fn new(threshold_c: f32, cooldown_ticks: u32) -> Self {
        Self {
            threshold_c,
            cooldown_ticks,
            state: FanState::Off,
            cooldown: 0,
        }
    }

    pub fn state(&self) -> FanState {
        self.state
    }

    /// Ticks spent below the threshold since the last hot reading; 0 when not cooling.
    pub fn cooldown(&self) -> u32 {
        self.cooldown
    }

    /// Feeds one temperature reading and returns the resulting fan state.
    pub fn update(&mut self, temp_c: f32) -> FanState {
        if temp_c > self.threshold_c {
            self.cooldown = 0;
            self.state = FanState::On;
        } else if self.state == FanState::On && self.cooldown == 0 {
            self.cooldown = 1;
        }

        if self.cooldown > self.cooldown_ticks {
            self.cooldown = 0;
            self.state = FanState::Off;
        } else if self.cooldown > 0 {
            self.cooldown += 1;
        }
        self.state
    }
}

/// Binary fan actuator.
pub trait FanOutput {
    fn set(&mut self, state: FanState) -> Result<()>;
}

/// A missing fan is not an error; every command is dropped.
impl<T: FanOutput> FanOutput for Option<T> {
    fn set(&mut self, state: FanState) -> Result<()> {
        match self {
            Some(fan) => fan.set(state),
            None => Ok(()),
        }
    }
}

/// Fan transistor on a GPIO line; stubbed on non-Linux platforms.
#[cfg(target_os = "linux")]
pub struct GpioFan {
    pin: rppal::gpio::OutputPin,
}

#[cfg(target_os = "linux")]
impl GpioFan {
    pub fn new(pin: u8) -> Result<Self> {
        let gpio = rppal::gpio::Gpio::new().map_err(|e| Error::Io(std::io::Error::other(e)))?;
        let output = gpio
            .get(pin)
            .map_err(|e| Error::Io(std::io::Error::other(e)))?
            .into_output_low();
        Ok(Self { pin: output })
    }
}

#[cfg(target_os = "linux")]
impl FanOutput for GpioFan {
    fn set(&mut self, state: FanState) -> Result<()> {
        match state {
            FanState::On => self.pin.set_high(),
            FanState::Off => self.pin.set_low(),
        }
        Ok(())
    }
}

#[cfg(not(target_os = "linux"))]
pub struct GpioFan;

#[cfg(not(target_os = "linux"))]
impl GpioFan {
    pub fn new(_pin: u8) -> Result<Self> {
        Err(Error::Unavailable("gpio"))
    }
}

#[cfg(not(target_os = "linux"))]
impl FanOutput for GpioFan {
    fn set(&mut self, _state: FanState) -> Result<()> {
        Err(Error::Unavailable("gpio"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::control::fake::RecordingFan;

    #[test]
    fn hot_reading_turns_fan_on() {
        let mut fan = FanController::new(60.0, 12);
        assert_eq!(fan.update(55.0), FanState::Off);
        assert_eq!(fan.update(60.0), FanState::Off);
        assert_eq!(fan.update(60.5), FanState::On);
    }

    #[test]
    fn fan_turns_off_on_thirteenth_cool_tick() {
        let mut fan = FanController::new(60.0, 12);
        fan.update(65.0);
        fan.update(65.0);
        for tick in 1..=12 {
            assert_eq!(fan.update(55.0), FanState::On, "cool tick {tick}");
        }
        assert_eq!(fan.update(55.0), FanState::Off);
        assert_eq!(fan.cooldown(), 0);
        assert_eq!(fan.update(55.0), FanState::Off);
    }

    #[test]
    fn heat_during_cooldown_restarts_the_count() {
        let mut fan = FanController::new(60.0, 12);
        fan.update(65.0);
        for _ in 0..10 {
            fan.update(55.0);
        }
        assert_eq!(fan.update(70.0), FanState::On);
        assert_eq!(fan.cooldown(), 0);
        for _ in 0..12 {
            assert_eq!(fan.update(55.0), FanState::On);
        }
        assert_eq!(fan.update(55.0), FanState::Off);
    }

    #[test]
    fn optional_output_ignores_missing_fan() {
        let mut missing: Option<RecordingFan> = None;
        missing.set(FanState::On).unwrap();
        let mut present = Some(RecordingFan::default());
        present.set(FanState::On).unwrap();
        assert_eq!(present.unwrap().commands, vec![FanState::On]);
    }
}
