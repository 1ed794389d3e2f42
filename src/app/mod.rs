use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;

use crate::{
    cli::RunOptions,
    command::{CommandRunner, SystemRunner},
    config::Config,
    control::{
        fan::GpioFan,
        power::{FrontEnd, SysinfoProbe, SystemPower},
    },
    display::{
        icons::IconSet,
        overlays::{OverlayManager, PngviewRenderer},
        Screen,
    },
    sensors::{
        charger::{Charger, I2cRegisters},
        display_resolution, SensorPaths, SensorSnapshot, SystemSensors, FALLBACK_RESOLUTION,
    },
    state::VoltageBounds,
    Error, Result,
};

pub mod input;
mod lifecycle;
mod logger;
pub mod monitor;

use input::{ButtonActions, ButtonPanel, GpioButton, SystemInputActions};
pub use logger::{FailureLatch, LogLevel, Logger};
pub use monitor::{ExitReason, LoopSignal, Monitor, MonitorSettings};

/// Config file values with command-line overrides applied.
#[derive(Debug, Clone, PartialEq)]
pub struct AppConfig {
    pub config: Config,
    pub log_level: LogLevel,
    pub log_file: Option<String>,
    pub syslog: bool,
}

impl AppConfig {
    pub fn from_sources(mut config: Config, opts: RunOptions) -> Result<Self> {
        if let Some(dir) = opts.icon_dir {
            config.icon_dir = dir;
        }
        if let Some(interval) = opts.interval_ms {
            config.poll_interval_ms = interval;
        }
        let log_level = match opts.log_level.as_deref() {
            Some(raw) => LogLevel::from_str(raw)
                .map_err(|_| Error::InvalidArgs(format!("unknown log level '{raw}'")))?,
            None => LogLevel::default(),
        };
        Ok(Self {
            config,
            log_level,
            log_file: opts.log_file,
            syslog: opts.syslog,
        })
    }

    pub fn monitor_settings(&self) -> MonitorSettings {
        let cfg = &self.config;
        MonitorSettings {
            bounds: VoltageBounds {
                vmin: cfg.vmin,
                vmax: cfg.vmax,
            },
            fan_on_temp_c: cfg.fan_on_temp_c,
            fan_cooldown_ticks: cfg.fan_cooldown_ticks,
            shutdown_dwell_ticks: cfg.shutdown_dwell_ticks,
            interval: Duration::from_millis(cfg.poll_interval_ms),
        }
    }
}

fn load_config(opts: &RunOptions) -> Result<Config> {
    match opts.config_path.as_deref() {
        Some(path) => Config::load_from_path(Path::new(path)),
        None => Config::load_or_default(),
    }
}

pub struct App {
    config: AppConfig,
    logger: Arc<Logger>,
}

impl App {
    pub fn new(config: AppConfig) -> Result<Self> {
        let logger = Logger::new(config.log_level, config.log_file.clone(), config.syslog)?;
        Ok(Self {
            config,
            logger: Arc::new(logger),
        })
    }

    pub fn from_options(opts: RunOptions) -> Result<Self> {
        let cfg_file = load_config(&opts)?;
        let merged = AppConfig::from_sources(cfg_file, opts)?;
        Self::new(merged)
    }

    /// Entry point for the daemon: wire hardware, start the button thread, run the monitor.
    pub fn run(&self) -> Result<()> {
        let cfg = &self.config.config;
        self.logger.info(format!(
            "daemon start (interval={}ms, vmin={:.2}V, vmax={:.2}V, fan_on={}C)",
            cfg.poll_interval_ms, cfg.vmin, cfg.vmax, cfg.fan_on_temp_c
        ));

        let runner = SystemRunner;
        let mut charger = self.open_charger("battery charger");
        if let Some(charger) = charger.as_mut() {
            if let Err(err) = charger.initialise() {
                self.logger.warn(format!("charger setup failed: {err}"));
            }
        }
        let sensors = SystemSensors::new(
            runner,
            charger,
            cfg.wifi_interface.clone(),
            SensorPaths::for_interface(&cfg.wifi_interface, &cfg.bluetooth_dir),
        );

        let screen = self.screen(&runner);
        let overlays = OverlayManager::new(
            PngviewRenderer::new(&cfg.pngview_path, cfg.overlay_layer),
            IconSet::new(&cfg.icon_dir, cfg.icon_size, cfg.icon_color.clone()),
            screen,
        );

        let fan = match GpioFan::new(cfg.fan_gpio_pin) {
            Ok(fan) => Some(fan),
            Err(err) => {
                self.logger.warn(format!("fan disabled: {err}"));
                None
            }
        };

        let power = SystemPower::new(
            runner,
            self.open_charger("power-cut charger handle"),
            SysinfoProbe,
            FrontEnd {
                process: cfg.front_end_process.clone(),
                helper: cfg.front_end_helper.clone(),
            },
        );

        let (signals_tx, signals_rx) = crossbeam::channel::unbounded();
        lifecycle::install_quit_handler(signals_tx.clone())?;
        self.start_buttons(runner, signals_tx);

        let mut monitor = Monitor::new(
            self.config.monitor_settings(),
            sensors,
            overlays,
            fan,
            power,
            self.logger.clone(),
        );
        let exit = monitor.run(&signals_rx);
        self.logger.info(format!("daemon stopped ({exit:?})"));
        Ok(())
    }

    fn open_charger(&self, role: &str) -> Option<Charger<I2cRegisters>> {
        let cfg = &self.config.config;
        match I2cRegisters::open(cfg.i2c_bus, cfg.charger_addr) {
            Ok(bus) => Some(Charger::new(bus)),
            Err(err) => {
                self.logger.warn(format!(
                    "{role} unavailable on i2c-{} at {:#04x}: {err}",
                    cfg.i2c_bus, cfg.charger_addr
                ));
                None
            }
        }
    }

    fn screen<R: CommandRunner>(&self, runner: &R) -> Screen {
        match display_resolution(runner) {
            Ok(size) => {
                self.logger
                    .info(format!("display resolution {}x{}", size.0, size.1));
                Screen::from(size)
            }
            Err(err) => {
                self.logger.warn(format!(
                    "display resolution unknown ({err}), assuming {}x{}",
                    FALLBACK_RESOLUTION.0, FALLBACK_RESOLUTION.1
                ));
                Screen::from(FALLBACK_RESOLUTION)
            }
        }
    }

    fn start_buttons(
        &self,
        runner: SystemRunner,
        signals: crossbeam::channel::Sender<LoopSignal>,
    ) {
        let cfg = &self.config.config;
        let panel = GpioButton::new(cfg.button_up_pin).and_then(|up| {
            Ok(ButtonPanel::new(
                up,
                GpioButton::new(cfg.button_down_pin)?,
                GpioButton::new(cfg.button_misc_pin)?,
                GpioButton::new(cfg.button_power_pin)?,
            ))
        });
        let panel = match panel {
            Ok(panel) => panel,
            Err(err) => {
                self.logger.warn(format!("buttons disabled: {err}"));
                return;
            }
        };
        let actions = ButtonActions::new(
            SystemInputActions::new(runner, &cfg.backlight_path, cfg.wifi_interface.clone()),
            signals,
        );
        if let Err(err) = input::spawn_button_thread(panel, actions, self.logger.clone()) {
            self.logger.warn(format!("button thread failed to start: {err}"));
        }
    }
}

#[derive(Serialize)]
struct StatusReport {
    version: &'static str,
    resolution: Option<(u32, u32)>,
    sensors: SensorSnapshot,
}

/// Samples every sensor once and prints the raw readings as JSON.
pub fn run_status(opts: RunOptions) -> Result<()> {
    let cfg = load_config(&opts)?;
    let runner = SystemRunner;
    let charger = I2cRegisters::open(cfg.i2c_bus, cfg.charger_addr)
        .ok()
        .map(Charger::new);
    let mut sensors = SystemSensors::new(
        runner,
        charger,
        cfg.wifi_interface.clone(),
        SensorPaths::for_interface(&cfg.wifi_interface, &cfg.bluetooth_dir),
    );
    let report = StatusReport {
        version: env!("CARGO_PKG_VERSION"),
        resolution: display_resolution(&runner).ok(),
        sensors: SensorSnapshot::capture(&mut sensors),
    };
    let json = serde_json::to_string_pretty(&report).map_err(|e| Error::Parse(e.to_string()))?;
    println!("{json}");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn config_from_options() {
        let opts = RunOptions {
            icon_dir: Some("/tmp/icons".into()),
            interval_ms: Some(1_000),
            log_level: Some("debug".into()),
            syslog: true,
            ..RunOptions::default()
        };
        let cfg = AppConfig::from_sources(Config::default(), opts).unwrap();
        assert_eq!(cfg.config.icon_dir, "/tmp/icons");
        assert_eq!(cfg.config.poll_interval_ms, 1_000);
        assert_eq!(cfg.log_level, LogLevel::Debug);
        assert!(cfg.syslog);
        assert_eq!(cfg.monitor_settings().interval, Duration::from_secs(1));
    }

    #[test]
    fn config_prefers_file_values_when_cli_missing() {
        let file = Config {
            vmin: 3.4,
            poll_interval_ms: 7_500,
            ..Config::default()
        };
        let merged = AppConfig::from_sources(file.clone(), RunOptions::default()).unwrap();
        assert_eq!(merged.config, file);
        assert_eq!(merged.log_level, LogLevel::Info);
        assert_eq!(merged.monitor_settings().bounds.vmin, 3.4);
    }

    #[test]
    fn rejects_unknown_log_level() {
        let opts = RunOptions {
            log_level: Some("chatty".into()),
            ..RunOptions::default()
        };
        assert!(AppConfig::from_sources(Config::default(), opts).is_err());
    }

    #[test]
    fn app_reads_explicit_config_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "fan_on_temp_c = 70\n").unwrap();
        let opts = RunOptions {
            config_path: Some(path.display().to_string()),
            ..RunOptions::default()
        };
        let app = App::from_options(opts).unwrap();
        assert_eq!(app.config.config.fan_on_temp_c, 70.0);
    }
}
