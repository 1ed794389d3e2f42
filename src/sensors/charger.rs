use crate::{state::ChargeDirection, Error, Result};

const REG_ADC_CONTROL: u8 = 0x02;
const REG_MIN_SYS_VOLTAGE: u8 = 0x03;
const REG_CHARGE_CURRENT: u8 = 0x04;
const REG_TIMER_CONTROL: u8 = 0x07;
const REG_BATFET_CONTROL: u8 = 0x09;
const REG_SYSTEM_STATUS: u8 = 0x0B;
const REG_BATTERY_VOLTAGE: u8 = 0x0E;

const ADC_CONTINUOUS: u8 = 0x7D;
const MIN_SYS_3V5: u8 = 0x30;
const CHARGE_CURRENT_1536MA: u8 = 0x18;
const WATCHDOG_DISABLED: u8 = 0x8D;
const BATFET_OFF: u8 = 0x6C;

const VOLTAGE_OFFSET_MV: u32 = 2_304;
const VOLTAGE_STEP_MV: u32 = 20;

/// Raw register access to the battery-management chip.
pub trait RegisterBus {
    fn read_register(&mut self, addr: u8) -> Result<u8>;
    fn write_register(&mut self, addr: u8, value: u8) -> Result<()>;
}

/// Battery charger (BQ25895-style register map) on top of a [`RegisterBus`].
pub struct Charger<B: RegisterBus> {
    bus: B,
}

impl<B: RegisterBus> Charger<B> {
    pub fn new(bus: B) -> Self {
        Self { bus }
    }

    /// Disables the watchdog, enables continuous ADC and sets the charge limits.
    pub fn initialise(&mut self) -> Result<()> {
        self.bus.write_register(REG_TIMER_CONTROL, WATCHDOG_DISABLED)?;
        self.bus.write_register(REG_ADC_CONTROL, ADC_CONTINUOUS)?;
        self.bus.write_register(REG_CHARGE_CURRENT, CHARGE_CURRENT_1536MA)?;
        self.bus.write_register(REG_MIN_SYS_VOLTAGE, MIN_SYS_3V5)?;
        Ok(())
    }

    pub fn battery_voltage(&mut self) -> Result<f32> {
        let raw = self.bus.read_register(REG_BATTERY_VOLTAGE)?;
        Ok(decode_battery_voltage(raw))
    }

    pub fn charge_direction(&mut self) -> Result<ChargeDirection> {
        let status = self.bus.read_register(REG_SYSTEM_STATUS)?;
        Ok(decode_charge_direction(status))
    }

    /// True when VBUS reports any input source.
    pub fn external_power(&mut self) -> Result<bool> {
        let status = self.bus.read_register(REG_SYSTEM_STATUS)?;
        Ok(status >> 5 != 0)
    }

    /// Opens the battery FET. Irreversible until external power returns.
    pub fn cut_battery_power(&mut self) -> Result<()> {
        self.bus.write_register(REG_BATFET_CONTROL, BATFET_OFF)
    }

    #[cfg(test)]
    pub(crate) fn bus(&self) -> &B {
        &self.bus
    }
}

/// Bits 0..=6 of the voltage register in 20 mV steps above 2.304 V.
pub fn decode_battery_voltage(raw: u8) -> f32 {
    let millivolts = VOLTAGE_OFFSET_MV + u32::from(raw & 0x7f) * VOLTAGE_STEP_MV;
    millivolts as f32 / 1000.0
}

/// Charge state lives in bits 3..=4; zero means not charging.
pub fn decode_charge_direction(status: u8) -> ChargeDirection {
    if (status >> 3) & 0b11 == 0 {
        ChargeDirection::Discharging
    } else {
        ChargeDirection::Charging
    }
}

#[cfg(target_os = "linux")]
pub struct I2cRegisters {
    bus: rppal::i2c::I2c,
}

#[cfg(target_os = "linux")]
impl I2cRegisters {
    pub fn open(bus: u8, addr: u8) -> Result<Self> {
        let mut inner = rppal::i2c::I2c::with_bus(bus).map_err(map_i2c_err)?;
        inner
            .set_slave_address(u16::from(addr))
            .map_err(map_i2c_err)?;
        Ok(Self { bus: inner })
    }
}

#[cfg(target_os = "linux")]
impl RegisterBus for I2cRegisters {
    fn read_register(&mut self, addr: u8) -> Result<u8> {
        self.bus.smbus_read_byte(addr).map_err(map_i2c_err)
    }

    fn write_register(&mut self, addr: u8, value: u8) -> Result<()> {
        self.bus.smbus_write_byte(addr, value).map_err(map_i2c_err)
    }
}

#[cfg(target_os = "linux")]
fn map_i2c_err(err: rppal::i2c::Error) -> Error {
    Error::Hardware(format!("i2c: {err}"))
}

#[cfg(not(target_os = "linux"))]
pub struct I2cRegisters;

#[cfg(not(target_os = "linux"))]
impl I2cRegisters {
    pub fn open(_bus: u8, _addr: u8) -> Result<Self> {
        Err(Error::Unavailable("i2c bus"))
    }
}

#[cfg(not(target_os = "linux"))]
impl RegisterBus for I2cRegisters {
    fn read_register(&mut self, _addr: u8) -> Result<u8> {
        Err(Error::Unavailable("i2c bus"))
    }

    fn write_register(&mut self, _addr: u8, _value: u8) -> Result<()> {
        Err(Error::Unavailable("i2c bus"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sensors::fake::FakeRegisters;

    #[test]
    fn decodes_voltage_register() {
        assert!((decode_battery_voltage(0x00) - 2.304).abs() < 1e-6);
        // 0b0111_0000 -> 1280 + 640 + 320 mV above the offset
        assert!((decode_battery_voltage(0x70) - 4.544).abs() < 1e-6);
        // bit 7 is the thermal-regulation flag, not part of the reading
        assert_eq!(decode_battery_voltage(0xC0), decode_battery_voltage(0x40));
    }

    #[test]
    fn decodes_charge_direction() {
        assert_eq!(decode_charge_direction(0b0000_0000), ChargeDirection::Discharging);
        assert_eq!(decode_charge_direction(0b1110_0100), ChargeDirection::Discharging);
        assert_eq!(decode_charge_direction(0b0000_1000), ChargeDirection::Charging);
        assert_eq!(decode_charge_direction(0b0001_1000), ChargeDirection::Charging);
    }

    #[test]
    fn initialise_writes_charger_limits_in_order() {
        let mut charger = Charger::new(FakeRegisters::default());
        charger.initialise().unwrap();
        assert_eq!(
            charger.bus().writes,
            vec![(0x07, 0x8D), (0x02, 0x7D), (0x04, 0x18), (0x03, 0x30)]
        );
    }

    #[test]
    fn reads_external_power_from_vbus_bits() {
        let mut regs = FakeRegisters::default();
        regs.values.insert(REG_SYSTEM_STATUS, 0b0010_0000);
        let mut charger = Charger::new(regs);
        assert!(charger.external_power().unwrap());

        let mut regs = FakeRegisters::default();
        regs.values.insert(REG_SYSTEM_STATUS, 0b0001_1000);
        let mut charger = Charger::new(regs);
        assert!(!charger.external_power().unwrap());
    }

    #[test]
    fn cut_power_writes_batfet_register() {
        let mut charger = Charger::new(FakeRegisters::default());
        charger.cut_battery_power().unwrap();
        assert_eq!(charger.bus().writes, vec![(0x09, 0x6C)]);
    }
}
