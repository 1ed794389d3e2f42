//! Parsers for the text that kernel files and Pi firmware tools print.

use crate::{state::ThrottleFlags, Error, Result};

/// `throttled=0x50005`
pub fn parse_throttled(output: &str) -> Result<ThrottleFlags> {
    let value = field_after(output, "throttled=")
        .ok_or_else(|| Error::Parse(format!("no throttled= field in '{}'", output.trim())))?;
    let hex = value
        .strip_prefix("0x")
        .or_else(|| value.strip_prefix("0X"))
        .unwrap_or(value);
    let raw = u32::from_str_radix(hex, 16)
        .map_err(|_| Error::Parse(format!("bad throttle bitmask '{value}'")))?;
    Ok(ThrottleFlags::from_bits(raw))
}

/// `temp=48.3'C`
pub fn parse_measure_temp(output: &str) -> Result<f32> {
    let value = field_after(output, "temp=")
        .ok_or_else(|| Error::Parse(format!("no temp= field in '{}'", output.trim())))?;
    let number = value.trim_end_matches("'C");
    number
        .parse()
        .map_err(|_| Error::Parse(format!("bad temperature '{value}'")))
}

/// Thermal-zone files report millidegrees Celsius.
pub fn parse_millidegrees(raw: &str) -> Result<f32> {
    let milli: i64 = raw
        .trim()
        .parse()
        .map_err(|_| Error::Parse(format!("bad thermal zone value '{}'", raw.trim())))?;
    Ok(milli as f32 / 1000.0)
}

/// `Signal level=-48 dBm` from `iwconfig`.
pub fn parse_signal_dbm(output: &str) -> Result<f32> {
    let value = field_after(output, "Signal level=")
        .ok_or_else(|| Error::Parse("no 'Signal level=' in iwconfig output".into()))?;
    let number = value.trim_end_matches("dBm");
    number
        .parse()
        .map_err(|_| Error::Parse(format!("signal level '{value}' is not in dBm")))
}

/// The adapter state is the first word of the third `hciconfig` line. No adapter means down.
pub fn parse_hciconfig_up(output: &str) -> Result<bool> {
    let Some(line) = output.lines().nth(2) else {
        return Ok(false);
    };
    Ok(line
        .split_whitespace()
        .next()
        .is_some_and(|word| word.eq_ignore_ascii_case("up")))
}

/// `0`/`1` sysfs indicators such as `carrier` and `link_mode`.
pub fn parse_flag(raw: &str) -> Result<bool> {
    match raw.trim() {
        "1" => Ok(true),
        "0" => Ok(false),
        other => Err(Error::Parse(format!("expected 0 or 1, got '{other}'"))),
    }
}

/// First `WIDTHxHEIGHT` token where both sides have at least three digits (`tvservice -s`).
pub fn parse_resolution(output: &str) -> Result<(u32, u32)> {
    output
        .split(|c: char| c.is_whitespace() || matches!(c, ',' | '[' | ']' | '@'))
        .find_map(|token| {
            let (w, h) = token.split_once('x')?;
            Some((dimension(w)?, dimension(h)?))
        })
        .ok_or_else(|| Error::Parse(format!("no resolution in '{}'", output.trim())))
}

/// `800,480` from `/sys/class/graphics/fb0/virtual_size`.
pub fn parse_virtual_size(raw: &str) -> Result<(u32, u32)> {
    let (w, h) = raw
        .trim()
        .split_once(',')
        .ok_or_else(|| Error::Parse(format!("bad virtual_size '{}'", raw.trim())))?;
    match (w.parse(), h.parse()) {
        (Ok(w), Ok(h)) => Ok((w, h)),
        _ => Err(Error::Parse(format!("bad virtual_size '{}'", raw.trim()))),
    }
}

fn dimension(raw: &str) -> Option<u32> {
    if raw.len() < 3 || !raw.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    raw.parse().ok()
}

fn field_after<'a>(output: &'a str, key: &str) -> Option<&'a str> {
    let start = output.find(key)? + key.len();
    let rest = &output[start..];
    let value = rest.split_whitespace().next()?;
    Some(value)
}
