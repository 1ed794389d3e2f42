use std::ffi::{OsStr, OsString};
use std::path::Path;

use sysinfo::{ProcessRefreshKind, ProcessesToUpdate, System, UpdateKind};

use crate::{
    command::CommandRunner,
    sensors::charger::{Charger, RegisterBus},
    Result,
};

/// Platform power actions.
pub trait PowerControl {
    /// Cuts battery power if unplugged, then halts.
    fn power_off(&mut self) -> Result<()>;
    fn reboot(&mut self) -> Result<()>;
}

/// Looks up running processes by executable name.
pub trait ProcessProbe {
    fn is_running(&self, name: &str) -> bool;
}

/// Linux keeps only this many bytes of a process name in `comm`.
const COMM_LEN: usize = 15;

/// Matches on the executable's file name, `argv[0]` or the kernel's truncated `comm`.
#[derive(Debug, Default, Clone, Copy)]
pub struct SysinfoProbe;

impl ProcessProbe for SysinfoProbe {
    fn is_running(&self, name: &str) -> bool {
        let mut system = System::new();
        system.refresh_processes_specifics(
            ProcessesToUpdate::All,
            true,
            ProcessRefreshKind::nothing()
                .with_exe(UpdateKind::OnlyIfNotSet)
                .with_cmd(UpdateKind::OnlyIfNotSet),
        );
        let found = system.processes().values().any(|process| {
            process_matches(
                name,
                process.name(),
                process.exe(),
                process.cmd().first().map(OsString::as_os_str),
            )
        });
        found
    }
}

fn process_matches(wanted: &str, comm: &OsStr, exe: Option<&Path>, argv0: Option<&OsStr>) -> bool {
    let wanted_os = OsStr::new(wanted);
    if exe.and_then(Path::file_name) == Some(wanted_os) {
        return true;
    }
    if argv0.and_then(|arg| Path::new(arg).file_name()) == Some(wanted_os) {
        return true;
    }
    let truncated = wanted.get(..COMM_LEN).unwrap_or(wanted);
    comm.to_str() == Some(truncated)
}

/// Front-end application that wants to own reboot and power-off while it runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrontEnd {
    pub process: String,
    pub helper: String,
}

/// What [`SystemPower`] did for the last request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PowerPath {
    FrontEnd,
    System,
}

/// Runs the real power sequence: optional battery cut, then the front end's helper or the
/// system `shutdown`/`reboot` commands.
pub struct SystemPower<R: CommandRunner, B: RegisterBus, P: ProcessProbe> {
    runner: R,
    charger: Option<Charger<B>>,
    probe: P,
    front_end: FrontEnd,
    last_path: Option<PowerPath>,
}

impl<R: CommandRunner, B: RegisterBus, P: ProcessProbe> SystemPower<R, B, P> {
    pub fn new(runner: R, charger: Option<Charger<B>>, probe: P, front_end: FrontEnd) -> Self {
        Self {
            runner,
            charger,
            probe,
            front_end,
            last_path: None,
        }
    }

    pub fn last_path(&self) -> Option<PowerPath> {
        self.last_path
    }

    /// Opens the battery FET when no external supply is present, so the pack is not drained
    /// after the OS halts.
    fn cut_battery_if_unplugged(&mut self) -> Result<()> {
        let Some(charger) = self.charger.as_mut() else {
            return Ok(());
        };
        if !charger.external_power()? {
            charger.cut_battery_power()?;
        }
        Ok(())
    }

    fn delegate(&mut self, front_end_flag: &str, program: &str, args: &[&str]) -> Result<()> {
        if self.probe.is_running(&self.front_end.process) {
            self.last_path = Some(PowerPath::FrontEnd);
            self.runner.run(&self.front_end.helper, &[front_end_flag])?;
        } else {
            self.last_path = Some(PowerPath::System);
            self.runner.run(program, args)?;
        }
        Ok(())
    }
}

impl<R: CommandRunner, B: RegisterBus, P: ProcessProbe> PowerControl for SystemPower<R, B, P> {
    fn power_off(&mut self) -> Result<()> {
        // A failed cut must not stop the halt.
        let cut = self.cut_battery_if_unplugged();
        self.delegate("--es-poweroff", "shutdown", &["-h", "now"])?;
        cut
    }

    fn reboot(&mut self) -> Result<()> {
        self.delegate("--es-reboot", "reboot", &[])
    }
}
