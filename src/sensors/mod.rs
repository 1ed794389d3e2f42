use std::{
    fs,
    path::{Path, PathBuf},
};

use serde::Serialize;

use crate::{
    command::CommandRunner,
    state::{ChargeDirection, ThrottleFlags},
    Error, Result,
};

pub mod charger;
pub mod fake;
pub mod parse;

use charger::{Charger, RegisterBus};

const THERMAL_ZONE: &str = "/sys/class/thermal/thermal_zone0/temp";
const FB_VIRTUAL_SIZE: &str = "/sys/class/graphics/fb0/virtual_size";
pub const FALLBACK_RESOLUTION: (u32, u32) = (800, 480);

/// Uniform read surface over every telemetry source the monitor polls.
///
/// Each call is one fresh read; implementations never cache between ticks.
pub trait Sensors {
    fn battery_voltage(&mut self) -> Result<f32>;
    fn charge_direction(&mut self) -> Result<ChargeDirection>;
    /// Associated to an access point.
    fn wifi_carrier(&mut self) -> Result<bool>;
    /// Interface administratively up.
    fn wifi_link_mode(&mut self) -> Result<bool>;
    fn wifi_signal_dbm(&mut self) -> Result<f32>;
    fn bluetooth_up(&mut self) -> Result<bool>;
    /// Entries under the bluetooth class directory, adapter included.
    fn bluetooth_device_count(&mut self) -> Result<usize>;
    fn throttle_flags(&mut self) -> Result<ThrottleFlags>;
    fn cpu_temperature(&mut self) -> Result<f32>;
}

/// Filesystem locations read by [`SystemSensors`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SensorPaths {
    pub wifi_carrier: PathBuf,
    pub wifi_link_mode: PathBuf,
    pub bluetooth_dir: PathBuf,
    pub thermal_zone: PathBuf,
}

impl SensorPaths {
    pub fn for_interface(interface: &str, bluetooth_dir: &str) -> Self {
        let net = Path::new("/sys/class/net").join(interface);
        Self {
            wifi_carrier: net.join("carrier"),
            wifi_link_mode: net.join("link_mode"),
            bluetooth_dir: PathBuf::from(bluetooth_dir),
            thermal_zone: PathBuf::from(THERMAL_ZONE),
        }
    }
}

/// Reads sysfs, the charger registers and the Pi firmware tools.
pub struct SystemSensors<R: CommandRunner, B: RegisterBus> {
    runner: R,
    charger: Option<Charger<B>>,
    interface: String,
    paths: SensorPaths,
}

impl<R: CommandRunner, B: RegisterBus> SystemSensors<R, B> {
    pub fn new(
        runner: R,
        charger: Option<Charger<B>>,
        interface: impl Into<String>,
        paths: SensorPaths,
    ) -> Self {
        Self {
            runner,
            charger,
            interface: interface.into(),
            paths,
        }
    }

    fn charger(&mut self) -> Result<&mut Charger<B>> {
        self.charger
            .as_mut()
            .ok_or(Error::Unavailable("battery charger"))
    }
}

impl<R: CommandRunner, B: RegisterBus> Sensors for SystemSensors<R, B> {
    fn battery_voltage(&mut self) -> Result<f32> {
        self.charger()?.battery_voltage()
    }

    fn charge_direction(&mut self) -> Result<ChargeDirection> {
        self.charger()?.charge_direction()
    }

    fn wifi_carrier(&mut self) -> Result<bool> {
        parse::parse_flag(&fs::read_to_string(&self.paths.wifi_carrier)?)
    }

    fn wifi_link_mode(&mut self) -> Result<bool> {
        parse::parse_flag(&fs::read_to_string(&self.paths.wifi_link_mode)?)
    }

    fn wifi_signal_dbm(&mut self) -> Result<f32> {
        let output = self.runner.run("iwconfig", &[self.interface.as_str()])?;
        parse::parse_signal_dbm(&output)
    }

    fn bluetooth_up(&mut self) -> Result<bool> {
        parse::parse_hciconfig_up(&self.runner.run("hciconfig", &[])?)
    }

    fn bluetooth_device_count(&mut self) -> Result<usize> {
        Ok(fs::read_dir(&self.paths.bluetooth_dir)?.count())
    }

    fn throttle_flags(&mut self) -> Result<ThrottleFlags> {
        parse::parse_throttled(&self.runner.run("vcgencmd", &["get_throttled"])?)
    }

    fn cpu_temperature(&mut self) -> Result<f32> {
        let primary = self
            .runner
            .run("vcgencmd", &["measure_temp"])
            .and_then(|out| parse::parse_measure_temp(&out));
        match primary {
            Ok(temp) => Ok(temp),
            Err(err) => fs::read_to_string(&self.paths.thermal_zone)
                .map_err(Error::from)
                .and_then(|raw| parse::parse_millidegrees(&raw))
                .map_err(|_| err),
        }
    }
}

/// Screen size in pixels: `tvservice -s`, then the framebuffer's virtual size.
pub fn display_resolution<R: CommandRunner>(runner: &R) -> Result<(u32, u32)> {
    display_resolution_from(runner, Path::new(FB_VIRTUAL_SIZE))
}

pub fn display_resolution_from<R: CommandRunner>(runner: &R, fb_size: &Path) -> Result<(u32, u32)> {
    let primary = runner
        .run("tvservice", &["-s"])
        .and_then(|out| parse::parse_resolution(&out));
    match primary {
        Ok(size) => Ok(size),
        Err(err) => fs::read_to_string(fb_size)
            .map_err(Error::from)
            .and_then(|raw| parse::parse_virtual_size(&raw))
            .map_err(|_| err),
    }
}

/// One raw read of every source, for `pistatus status`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SensorSnapshot {
    pub battery_voltage: Option<f32>,
    pub charge_direction: Option<ChargeDirection>,
    pub wifi_carrier: Option<bool>,
    pub wifi_link_mode: Option<bool>,
    pub wifi_signal_dbm: Option<f32>,
    pub bluetooth_up: Option<bool>,
    pub bluetooth_device_count: Option<usize>,
    pub throttle_bits: Option<u8>,
    pub cpu_temperature_c: Option<f32>,
}

impl SensorSnapshot {
    pub fn capture<S: Sensors + ?Sized>(sensors: &mut S) -> Self {
        Self {
            battery_voltage: sensors.battery_voltage().ok(),
            charge_direction: sensors.charge_direction().ok(),
            wifi_carrier: sensors.wifi_carrier().ok(),
            wifi_link_mode: sensors.wifi_link_mode().ok(),
            wifi_signal_dbm: sensors.wifi_signal_dbm().ok(),
            bluetooth_up: sensors.bluetooth_up().ok(),
            bluetooth_device_count: sensors.bluetooth_device_count().ok(),
            throttle_bits: sensors.throttle_flags().ok().map(ThrottleFlags::bits),
            cpu_temperature_c: sensors.cpu_temperature().ok(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sensors::fake::{FakeRegisters, FakeSensors, ScriptedRunner};

    fn sysfs(dir: &Path) -> SensorPaths {
        SensorPaths {
            wifi_carrier: dir.join("carrier"),
            wifi_link_mode: dir.join("link_mode"),
            bluetooth_dir: dir.join("bluetooth"),
            thermal_zone: dir.join("temp"),
        }
    }

    #[test]
    fn for_interface_builds_sysfs_paths() {
        let paths = SensorPaths::for_interface("wlan1", "/sys/class/bluetooth");
        assert_eq!(paths.wifi_carrier, PathBuf::from("/sys/class/net/wlan1/carrier"));
        assert_eq!(paths.wifi_link_mode, PathBuf::from("/sys/class/net/wlan1/link_mode"));
    }

    #[test]
    fn reads_sysfs_and_firmware_tools() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("carrier"), "1\n").unwrap();
        fs::write(dir.path().join("link_mode"), "1\n").unwrap();
        fs::create_dir_all(dir.path().join("bluetooth").join("hci0")).unwrap();
        fs::create_dir_all(dir.path().join("bluetooth").join("hci0:11")).unwrap();

        let runner = ScriptedRunner::default()
            .respond("iwconfig", Ok("Link Quality=60/70  Signal level=-61 dBm"))
            .respond("hciconfig", Ok("hci0:\n\tBD Address\n\tUP RUNNING\n"))
            .respond("vcgencmd get_throttled", Ok("throttled=0x4\n"))
            .respond("vcgencmd measure_temp", Ok("temp=62.1'C\n"));
        let mut regs = FakeRegisters::default();
        regs.values.insert(0x0E, 0x40);
        regs.values.insert(0x0B, 0x08);
        let mut sensors = SystemSensors::new(
            &runner,
            Some(Charger::new(regs)),
            "wlan0",
            sysfs(dir.path()),
        );

        assert!((sensors.battery_voltage().unwrap() - 3.584).abs() < 1e-6);
        assert_eq!(sensors.charge_direction().unwrap(), ChargeDirection::Charging);
        assert!(sensors.wifi_carrier().unwrap());
        assert!(sensors.wifi_link_mode().unwrap());
        assert_eq!(sensors.wifi_signal_dbm().unwrap(), -61.0);
        assert!(sensors.bluetooth_up().unwrap());
        assert_eq!(sensors.bluetooth_device_count().unwrap(), 2);
        assert!(sensors.throttle_flags().unwrap().throttled());
        assert_eq!(sensors.cpu_temperature().unwrap(), 62.1);
        assert!(runner.calls().contains(&"iwconfig wlan0".to_string()));
    }

    #[test]
    fn missing_charger_and_files_are_errors() {
        let dir = tempfile::tempdir().unwrap();
        let runner = ScriptedRunner::default();
        let mut sensors: SystemSensors<_, FakeRegisters> =
            SystemSensors::new(&runner, None, "wlan0", sysfs(dir.path()));
        assert!(matches!(
            sensors.battery_voltage(),
            Err(Error::Unavailable("battery charger"))
        ));
        assert!(sensors.wifi_carrier().is_err());
        assert!(sensors.bluetooth_device_count().is_err());
        assert!(sensors.throttle_flags().is_err());
    }

    #[test]
    fn temperature_falls_back_to_thermal_zone() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("temp"), "47250\n").unwrap();
        let runner =
            ScriptedRunner::default().respond("vcgencmd measure_temp", Err("vcgencmd: not found"));
        let mut sensors: SystemSensors<_, FakeRegisters> =
            SystemSensors::new(&runner, None, "wlan0", sysfs(dir.path()));
        assert_eq!(sensors.cpu_temperature().unwrap(), 47.25);
    }

    #[test]
    fn resolution_falls_back_to_framebuffer() {
        let dir = tempfile::tempdir().unwrap();
        let fb = dir.path().join("virtual_size");
        fs::write(&fb, "640,480\n").unwrap();
        let runner = ScriptedRunner::default()
            .respond("tvservice -s", Ok("state 0x40001 [NTSC 4:3], 720x480 @ 60.00Hz, interlaced"));
        assert_eq!(display_resolution_from(&runner, &fb).unwrap(), (720, 480));

        let failing = ScriptedRunner::default();
        assert_eq!(display_resolution_from(&failing, &fb).unwrap(), (640, 480));
        assert!(display_resolution_from(&failing, &dir.path().join("none")).is_err());
    }

    #[test]
    fn snapshot_turns_failures_into_none() {
        let mut sensors = FakeSensors::healthy();
        sensors.signal_dbm = Err(Error::Parse("unassociated".into()));
        let snapshot = SensorSnapshot::capture(&mut sensors);
        assert_eq!(snapshot.wifi_signal_dbm, None);
        assert_eq!(snapshot.wifi_carrier, Some(true));
        let json = serde_json::to_string(&snapshot).unwrap();
        assert!(json.contains("\"wifi_signal_dbm\":null"));
    }
}
