//! Scriptable stand-ins for the hardware seams, used by unit and integration tests.

use std::cell::RefCell;
use std::collections::{HashMap, VecDeque};

use crate::{
    command::{describe, CommandRunner},
    sensors::{charger::RegisterBus, Sensors},
    state::{ChargeDirection, ThrottleFlags},
    Error, Result,
};

/// Fixed readings per source, with optional per-tick scripts for voltage and temperature.
///
/// Each read hands back a copy of the stored result, so one fake can serve many ticks.
#[derive(Debug)]
pub struct FakeSensors {
    pub voltage: Result<f32>,
    pub charge: Result<ChargeDirection>,
    pub carrier: Result<bool>,
    pub link_mode: Result<bool>,
    pub signal_dbm: Result<f32>,
    pub bluetooth_up: Result<bool>,
    pub bluetooth_devices: Result<usize>,
    pub throttle: Result<ThrottleFlags>,
    pub cpu_temp: Result<f32>,
    voltage_script: VecDeque<f32>,
    temp_script: VecDeque<f32>,
}

impl FakeSensors {
    /// Discharging at 3.7 V, wifi connected at -55 dBm, bluetooth up, cool CPU.
    pub fn healthy() -> Self {
        Self {
            voltage: Ok(3.7),
            charge: Ok(ChargeDirection::Discharging),
            carrier: Ok(true),
            link_mode: Ok(true),
            signal_dbm: Ok(-55.0),
            bluetooth_up: Ok(true),
            bluetooth_devices: Ok(1),
            throttle: Ok(ThrottleFlags::default()),
            cpu_temp: Ok(45.0),
            voltage_script: VecDeque::new(),
            temp_script: VecDeque::new(),
        }
    }

    /// Voltages returned one per read before falling back to [`FakeSensors::voltage`].
    pub fn script_voltages(&mut self, volts: impl IntoIterator<Item = f32>) {
        self.voltage_script.extend(volts);
    }

    /// Temperatures returned one per read before falling back to [`FakeSensors::cpu_temp`].
    pub fn script_temperatures(&mut self, temps: impl IntoIterator<Item = f32>) {
        self.temp_script.extend(temps);
    }
}

fn replay<T: Copy>(stored: &Result<T>) -> Result<T> {
    match stored {
        Ok(value) => Ok(*value),
        Err(err) => Err(copy_error(err)),
    }
}

fn copy_error(err: &Error) -> Error {
    match err {
        Error::InvalidArgs(msg) => Error::InvalidArgs(msg.clone()),
        Error::Io(io) => Error::Io(std::io::Error::new(io.kind(), io.to_string())),
        Error::Parse(msg) => Error::Parse(msg.clone()),
        Error::Command(msg) => Error::Command(msg.clone()),
        Error::Hardware(msg) => Error::Hardware(msg.clone()),
        Error::Unavailable(what) => Error::Unavailable(what),
    }
}

impl Sensors for FakeSensors {
    fn battery_voltage(&mut self) -> Result<f32> {
        match self.voltage_script.pop_front() {
            Some(volts) => Ok(volts),
            None => replay(&self.voltage),
        }
    }

    fn charge_direction(&mut self) -> Result<ChargeDirection> {
        replay(&self.charge)
    }

    fn wifi_carrier(&mut self) -> Result<bool> {
        replay(&self.carrier)
    }

    fn wifi_link_mode(&mut self) -> Result<bool> {
        replay(&self.link_mode)
    }

    fn wifi_signal_dbm(&mut self) -> Result<f32> {
        replay(&self.signal_dbm)
    }

    fn bluetooth_up(&mut self) -> Result<bool> {
        replay(&self.bluetooth_up)
    }

    fn bluetooth_device_count(&mut self) -> Result<usize> {
        replay(&self.bluetooth_devices)
    }

    fn throttle_flags(&mut self) -> Result<ThrottleFlags> {
        replay(&self.throttle)
    }

    fn cpu_temperature(&mut self) -> Result<f32> {
        match self.temp_script.pop_front() {
            Some(temp) => Ok(temp),
            None => replay(&self.cpu_temp),
        }
    }
}

/// In-memory register file. Unset registers read as zero; every write is recorded.
#[derive(Debug, Default)]
pub struct FakeRegisters {
    pub values: HashMap<u8, u8>,
    pub writes: Vec<(u8, u8)>,
    pub fail_writes: bool,
}

impl RegisterBus for FakeRegisters {
    fn read_register(&mut self, addr: u8) -> Result<u8> {
        Ok(self.values.get(&addr).copied().unwrap_or(0))
    }

    fn write_register(&mut self, addr: u8, value: u8) -> Result<()> {
        if self.fail_writes {
            return Err(Error::Hardware(format!("i2c write to {addr:#04x} rejected")));
        }
        self.writes.push((addr, value));
        self.values.insert(addr, value);
        Ok(())
    }
}

/// Canned command outputs keyed by the full command line or by program name alone.
///
/// Commands without a response fail as if the program were not installed.
#[derive(Debug, Default)]
pub struct ScriptedRunner {
    responses: HashMap<String, std::result::Result<String, String>>,
    calls: RefCell<Vec<String>>,
}

impl ScriptedRunner {
    pub fn respond(
        mut self,
        command: &str,
        output: std::result::Result<&str, &str>,
    ) -> Self {
        let output = output.map(str::to_string).map_err(str::to_string);
        self.responses.insert(command.to_string(), output);
        self
    }

    /// Every command line run so far, in order.
    pub fn calls(&self) -> Vec<String> {
        self.calls.borrow().clone()
    }
}

impl CommandRunner for ScriptedRunner {
    fn run(&self, program: &str, args: &[&str]) -> Result<String> {
        let line = describe(program, args);
        self.calls.borrow_mut().push(line.clone());
        let response = self
            .responses
            .get(&line)
            .or_else(|| self.responses.get(program));
        match response {
            Some(Ok(out)) => Ok(out.clone()),
            Some(Err(msg)) => Err(Error::Command(msg.clone())),
            None => Err(Error::Command(format!("{program}: not found"))),
        }
    }
}
