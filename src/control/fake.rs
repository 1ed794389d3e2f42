use crate::{
    control::{
        fan::{FanOutput, FanState},
        power::PowerControl,
    },
    Result,
};

/// Fan double that records every command.
#[derive(Debug, Default)]
pub struct RecordingFan {
    pub commands: Vec<FanState>,
}

impl FanOutput for RecordingFan {
    fn set(&mut self, state: FanState) -> Result<()> {
        self.commands.push(state);
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PowerRequest {
    PowerOff,
    Reboot,
}

/// Power double that records requests instead of halting the host.
#[derive(Debug, Default)]
pub struct RecordingPower {
    pub requests: Vec<PowerRequest>,
}

impl PowerControl for RecordingPower {
    fn power_off(&mut self) -> Result<()> {
        self.requests.push(PowerRequest::PowerOff);
        Ok(())
    }

    fn reboot(&mut self) -> Result<()> {
        self.requests.push(PowerRequest::Reboot);
        Ok(())
    }
}
