use crate::{Error, Result};
use std::path::Path;

pub mod loader;

pub const DEFAULT_VMIN: f32 = 3.2;
pub const DEFAULT_VMAX: f32 = 3.9;
pub const DEFAULT_FAN_ON_TEMP_C: f32 = 60.0;
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 5_000;
pub const DEFAULT_SHUTDOWN_DWELL_TICKS: u32 = 12;
pub const DEFAULT_FAN_COOLDOWN_TICKS: u32 = 12;
pub const DEFAULT_ICON_DIR: &str = "/opt/pistatus/overlay_icons";
pub const DEFAULT_ICON_SIZE: u32 = 24;
pub const DEFAULT_ICON_COLOR: &str = "white";
pub const DEFAULT_PNGVIEW_PATH: &str = "/usr/local/bin/pngview";
pub const DEFAULT_OVERLAY_LAYER: u32 = 15_000;
pub const DEFAULT_WIFI_INTERFACE: &str = "wlan0";
pub const DEFAULT_BLUETOOTH_DIR: &str = "/sys/class/bluetooth";
pub const DEFAULT_BACKLIGHT_PATH: &str = "/sys/class/backlight/rpi_backlight/brightness";
pub const DEFAULT_FAN_GPIO_PIN: u8 = 12;
pub const DEFAULT_BUTTON_UP_PIN: u8 = 9;
pub const DEFAULT_BUTTON_DOWN_PIN: u8 = 10;
pub const DEFAULT_BUTTON_MISC_PIN: u8 = 8;
pub const DEFAULT_BUTTON_POWER_PIN: u8 = 7;
pub const DEFAULT_I2C_BUS: u8 = 1;
pub const DEFAULT_CHARGER_ADDR: u8 = 0x6a;
pub const DEFAULT_FRONT_END_PROCESS: &str = "emulationstation";
pub const DEFAULT_FRONT_END_HELPER: &str = "/usr/local/bin/multi_switch.sh";
const CONFIG_DIR_NAME: &str = ".pistatus";
const CONFIG_FILE_NAME: &str = "config.toml";

/// User-supplied settings loaded from the config file. Fixed for the life of the daemon.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub vmin: f32,
    pub vmax: f32,
    pub fan_on_temp_c: f32,
    pub poll_interval_ms: u64,
    pub shutdown_dwell_ticks: u32,
    pub fan_cooldown_ticks: u32,
    pub icon_dir: String,
    pub icon_size: u32,
    pub icon_color: String,
    pub pngview_path: String,
    pub overlay_layer: u32,
    pub wifi_interface: String,
    pub bluetooth_dir: String,
    pub backlight_path: String,
    pub fan_gpio_pin: u8,
    pub button_up_pin: u8,
    pub button_down_pin: u8,
    pub button_misc_pin: u8,
    pub button_power_pin: u8,
    pub i2c_bus: u8,
    pub charger_addr: u8,
    pub front_end_process: String,
    pub front_end_helper: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            vmin: DEFAULT_VMIN,
            vmax: DEFAULT_VMAX,
            fan_on_temp_c: DEFAULT_FAN_ON_TEMP_C,
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            shutdown_dwell_ticks: DEFAULT_SHUTDOWN_DWELL_TICKS,
            fan_cooldown_ticks: DEFAULT_FAN_COOLDOWN_TICKS,
            icon_dir: DEFAULT_ICON_DIR.to_string(),
            icon_size: DEFAULT_ICON_SIZE,
            icon_color: DEFAULT_ICON_COLOR.to_string(),
            pngview_path: DEFAULT_PNGVIEW_PATH.to_string(),
            overlay_layer: DEFAULT_OVERLAY_LAYER,
            wifi_interface: DEFAULT_WIFI_INTERFACE.to_string(),
            bluetooth_dir: DEFAULT_BLUETOOTH_DIR.to_string(),
            backlight_path: DEFAULT_BACKLIGHT_PATH.to_string(),
            fan_gpio_pin: DEFAULT_FAN_GPIO_PIN,
            button_up_pin: DEFAULT_BUTTON_UP_PIN,
            button_down_pin: DEFAULT_BUTTON_DOWN_PIN,
            button_misc_pin: DEFAULT_BUTTON_MISC_PIN,
            button_power_pin: DEFAULT_BUTTON_POWER_PIN,
            i2c_bus: DEFAULT_I2C_BUS,
            charger_addr: DEFAULT_CHARGER_ADDR,
            front_end_process: DEFAULT_FRONT_END_PROCESS.to_string(),
            front_end_helper: DEFAULT_FRONT_END_HELPER.to_string(),
        }
    }
}

impl Config {
    pub fn load_or_default() -> Result<Self> {
        loader::load_or_default()
    }

    pub fn load_from_path(path: &Path) -> Result<Self> {
        loader::load_from_path(path)
    }

    pub fn save_to_path(&self, path: &Path) -> Result<()> {
        loader::save_to_path(self, path)
    }
}

pub(crate) fn validate(cfg: &Config) -> Result<()> {
    if !(cfg.vmin > 0.0) {
        return Err(Error::InvalidArgs("vmin must be greater than 0".into()));
    }
    if cfg.vmin >= cfg.vmax {
        return Err(Error::InvalidArgs(format!(
            "vmin ({:.2}) must be below vmax ({:.2})",
            cfg.vmin, cfg.vmax
        )));
    }
    if cfg.poll_interval_ms == 0 {
        return Err(Error::InvalidArgs("poll_interval_ms must be non-zero".into()));
    }
    if cfg.icon_size == 0 {
        return Err(Error::InvalidArgs("icon_size must be non-zero".into()));
    }
    if cfg.shutdown_dwell_ticks == 0 || cfg.fan_cooldown_ticks == 0 {
        return Err(Error::InvalidArgs(
            "shutdown_dwell_ticks and fan_cooldown_ticks must be non-zero".into(),
        ));
    }
    let pins = [
        cfg.fan_gpio_pin,
        cfg.button_up_pin,
        cfg.button_down_pin,
        cfg.button_misc_pin,
        cfg.button_power_pin,
    ];
    for (idx, pin) in pins.iter().enumerate() {
        if pins[idx + 1..].contains(pin) {
            return Err(Error::InvalidArgs(format!(
                "gpio pin {pin} is assigned more than once"
            )));
        }
    }
    Ok(())
}

fn parse_hex_or_decimal(raw: &str) -> std::result::Result<u8, String> {
    let parsed = match raw.strip_prefix("0x").or_else(|| raw.strip_prefix("0X")) {
        Some(hex) => u8::from_str_radix(hex, 16),
        None => raw.parse::<u8>(),
    };
    parsed.map_err(|_| "expected a hex/decimal address (e.g., 0x6a)".to_string())
}
