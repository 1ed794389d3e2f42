use std::path::PathBuf;

use crate::state::{BatteryLevel, SignalLevel};

const DISCHARGING_NAMES: [&str; 12] = [
    "alert_red", "alert", "20", "30", "30", "50", "60", "60", "80", "90", "full", "full",
];
const CHARGING_NAMES: [&str; 7] = [
    "charging_20",
    "charging_30",
    "charging_50",
    "charging_60",
    "charging_80",
    "charging_90",
    "charging_full",
];

/// Every distinct image the daemon can put on screen.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IconId {
    Battery(BatteryLevel),
    WifiBars(SignalLevel),
    WifiOff,
    BluetoothConnected,
    BluetoothIdle,
    UnderVoltage,
    FrequencyCapped,
    Throttled,
    CriticalBattery,
}

/// Resolves [`IconId`]s to PNG files in one themed icon directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IconSet {
    dir: PathBuf,
    size: u32,
    color: String,
}

impl IconSet {
    pub fn new(dir: impl Into<PathBuf>, size: u32, color: impl Into<String>) -> Self {
        Self {
            dir: dir.into(),
            size,
            color: color.into(),
        }
    }

    pub fn size(&self) -> u32 {
        self.size
    }

    pub fn asset(&self, icon: IconId) -> PathBuf {
        self.dir.join(self.file_name(icon))
    }

    pub fn file_name(&self, icon: IconId) -> String {
        let (size, color) = (self.size, self.color.as_str());
        match icon {
            IconId::Battery(level) => {
                format!("twotone_battery_{}_{color}_{size}dp.png", battery_name(level))
            }
            IconId::WifiBars(level) => {
                format!("twotone_signal_wifi_{}_bar_{color}_{size}dp.png", level.bars())
            }
            IconId::WifiOff => format!("twotone_signal_wifi_off_{color}_{size}dp.png"),
            IconId::BluetoothConnected => format!("twotone_bluetooth_{color}_{size}dp.png"),
            IconId::BluetoothIdle => format!("twotone_bluetooth_disabled_{color}_{size}dp.png"),
            IconId::UnderVoltage => format!("flash_{size}dp.png"),
            IconId::FrequencyCapped => format!("thermometer_{size}dp.png"),
            IconId::Throttled => format!("thermometer-lines_{size}dp.png"),
            IconId::CriticalBattery => "alert-outline-red.png".to_string(),
        }
    }
}

fn battery_name(level: BatteryLevel) -> &'static str {
    match level {
        BatteryLevel::Discharging(idx) => {
            DISCHARGING_NAMES[usize::from(idx).min(DISCHARGING_NAMES.len() - 1)]
        }
        BatteryLevel::Charging(idx) => {
            CHARGING_NAMES[usize::from(idx).min(CHARGING_NAMES.len() - 1)]
        }
    }
}
