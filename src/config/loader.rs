use std::{
    fs,
    path::{Path, PathBuf},
    str::FromStr,
};

use crate::{Error, Result};

use super::{Config, CONFIG_DIR_NAME, CONFIG_FILE_NAME};

pub fn load_or_default() -> Result<Config> {
    let path = config_path()?;
    if !path.exists() {
        let cfg = Config::default();
        cfg.save_to_path(&path)?;
        super::validate(&cfg)?;
        return Ok(cfg);
    }
    load_from_path(&path)
}

pub fn load_from_path(path: &Path) -> Result<Config> {
    if !path.exists() {
        let cfg = Config::default();
        super::validate(&cfg)?;
        return Ok(cfg);
    }

    let raw = fs::read_to_string(path)?;
    parse(&raw)
}

pub fn save_to_path(config: &Config, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    let contents = format!(
        "# pistatus config\n\
vmin = {}\n\
vmax = {}\n\
fan_on_temp_c = {}\n\
poll_interval_ms = {}\n\
shutdown_dwell_ticks = {}\n\
fan_cooldown_ticks = {}\n\
icon_dir = \"{}\"\n\
icon_size = {}\n\
icon_color = \"{}\"\n\
pngview_path = \"{}\"\n\
overlay_layer = {}\n\
wifi_interface = \"{}\"\n\
bluetooth_dir = \"{}\"\n\
backlight_path = \"{}\"\n\
fan_gpio_pin = {}\n\
button_up_pin = {}\n\
button_down_pin = {}\n\
button_misc_pin = {}\n\
button_power_pin = {}\n\
i2c_bus = {}\n\
charger_addr = \"{:#04x}\"\n\
front_end_process = \"{}\"\n\
front_end_helper = \"{}\"\n",
        config.vmin,
        config.vmax,
        config.fan_on_temp_c,
        config.poll_interval_ms,
        config.shutdown_dwell_ticks,
        config.fan_cooldown_ticks,
        config.icon_dir,
        config.icon_size,
        config.icon_color,
        config.pngview_path,
        config.overlay_layer,
        config.wifi_interface,
        config.bluetooth_dir,
        config.backlight_path,
        config.fan_gpio_pin,
        config.button_up_pin,
        config.button_down_pin,
        config.button_misc_pin,
        config.button_power_pin,
        config.i2c_bus,
        config.charger_addr,
        config.front_end_process,
        config.front_end_helper,
    );
    fs::write(path, contents)?;
    Ok(())
}

pub fn parse(raw: &str) -> Result<Config> {
    let mut cfg = Config::default();

    for (idx, line) in raw.lines().enumerate() {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }

        let (key, value) = trimmed.split_once('=').ok_or_else(|| {
            Error::InvalidArgs(format!("invalid config line {}: '{}'", idx + 1, line))
        })?;

        let key = key.trim();
        let value = value.trim().trim_matches('"');
        let line_no = idx + 1;
        match key {
            "vmin" => cfg.vmin = number(key, value, line_no)?,
            "vmax" => cfg.vmax = number(key, value, line_no)?,
            "fan_on_temp_c" => cfg.fan_on_temp_c = number(key, value, line_no)?,
            "poll_interval_ms" => cfg.poll_interval_ms = number(key, value, line_no)?,
            "shutdown_dwell_ticks" => cfg.shutdown_dwell_ticks = number(key, value, line_no)?,
            "fan_cooldown_ticks" => cfg.fan_cooldown_ticks = number(key, value, line_no)?,
            "icon_dir" => cfg.icon_dir = value.to_string(),
            "icon_size" => cfg.icon_size = number(key, value, line_no)?,
            "icon_color" => cfg.icon_color = value.to_string(),
            "pngview_path" => cfg.pngview_path = value.to_string(),
            "overlay_layer" => cfg.overlay_layer = number(key, value, line_no)?,
            "wifi_interface" => cfg.wifi_interface = value.to_string(),
            "bluetooth_dir" => cfg.bluetooth_dir = value.to_string(),
            "backlight_path" => cfg.backlight_path = value.to_string(),
            "fan_gpio_pin" => cfg.fan_gpio_pin = number(key, value, line_no)?,
            "button_up_pin" => cfg.button_up_pin = number(key, value, line_no)?,
            "button_down_pin" => cfg.button_down_pin = number(key, value, line_no)?,
            "button_misc_pin" => cfg.button_misc_pin = number(key, value, line_no)?,
            "button_power_pin" => cfg.button_power_pin = number(key, value, line_no)?,
            "i2c_bus" => cfg.i2c_bus = number(key, value, line_no)?,
            "charger_addr" => {
                cfg.charger_addr = super::parse_hex_or_decimal(value).map_err(|e| {
                    Error::InvalidArgs(format!("invalid charger_addr on line {line_no}: {e}"))
                })?;
            }
            "front_end_process" => cfg.front_end_process = value.to_string(),
            "front_end_helper" => cfg.front_end_helper = value.to_string(),
            other => {
                return Err(Error::InvalidArgs(format!(
                    "unknown config key '{}' on line {}",
                    other, line_no
                )));
            }
        }
    }

    super::validate(&cfg)?;
    Ok(cfg)
}

pub(super) fn config_path() -> Result<PathBuf> {
    let home = std::env::var_os("HOME")
        .map(PathBuf::from)
        .ok_or_else(|| Error::InvalidArgs("HOME not set; cannot locate config directory".into()))?;
    Ok(home.join(CONFIG_DIR_NAME).join(CONFIG_FILE_NAME))
}

fn number<T: FromStr>(key: &str, value: &str, line_no: usize) -> Result<T> {
    value
        .parse()
        .map_err(|_| Error::InvalidArgs(format!("invalid {key} value on line {line_no}")))
}
