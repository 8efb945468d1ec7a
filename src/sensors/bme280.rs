//! Bosch BME280 temperature / pressure / humidity sensor over I²C.
//!
//! Runs the chip in normal mode with ×1 oversampling on all three
//! channels.  Raw ADC values are converted with the integer compensation
//! formulas from the datasheet (section 4.2.3) using the factory trim
//! stored in NVM.  No user calibration or offsets are applied.
//!
//! Generic over [`embedded_hal::i2c::I2c`] so the ESP-IDF `I2cDriver` and
//! host-side fakes both plug in.

use embedded_hal::delay::DelayNs;
use embedded_hal::i2c::I2c;
use log::{info, warn};

use super::{Reading, SensorError};
use crate::app::ports::SensorPort;

/// SDO tied to GND.
pub const DEFAULT_ADDRESS: u8 = 0x76;

const CHIP_ID: u8 = 0x60;

const REG_CALIB_00: u8 = 0x88;
const REG_CHIP_ID: u8 = 0xD0;
const REG_RESET: u8 = 0xE0;
const REG_CALIB_26: u8 = 0xE1;
const REG_CTRL_HUM: u8 = 0xF2;
const REG_CTRL_MEAS: u8 = 0xF4;
const REG_CONFIG: u8 = 0xF5;
const REG_DATA: u8 = 0xF7;

const RESET_WORD: u8 = 0xB6;
/// osrs_h = ×1
const CTRL_HUM_X1: u8 = 0b001;
/// osrs_t = ×1, osrs_p = ×1, mode = normal
const CTRL_MEAS_X1_NORMAL: u8 = (0b001 << 5) | (0b001 << 2) | 0b11;
/// t_sb = 0.5 ms, IIR filter off
const CONFIG_DEFAULT: u8 = 0x00;

/// Start-up time after soft reset (datasheet: 2 ms).
const RESET_DELAY_MS: u32 = 2;

/// Factory trim words.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Calibration {
    pub t1: u16,
    pub t2: i16,
    pub t3: i16,
    pub p1: u16,
    pub p2: i16,
    pub p3: i16,
    pub p4: i16,
    pub p5: i16,
    pub p6: i16,
    pub p7: i16,
    pub p8: i16,
    pub p9: i16,
    pub h1: u8,
    pub h2: i16,
    pub h3: u8,
    pub h4: i16,
    pub h5: i16,
    pub h6: i8,
}

impl Calibration {
    /// Parse the two NVM blocks: `tp` = 0x88..=0xA1 (26 bytes),
    /// `hum` = 0xE1..=0xE7 (7 bytes).
    pub fn from_registers(tp: &[u8; 26], hum: &[u8; 7]) -> Self {
        let u16_at = |i: usize| u16::from_le_bytes([tp[i], tp[i + 1]]);
        let i16_at = |i: usize| i16::from_le_bytes([tp[i], tp[i + 1]]);

        Self {
            t1: u16_at(0),
            t2: i16_at(2),
            t3: i16_at(4),
            p1: u16_at(6),
            p2: i16_at(8),
            p3: i16_at(10),
            p4: i16_at(12),
            p5: i16_at(14),
            p6: i16_at(16),
            p7: i16_at(18),
            p8: i16_at(20),
            p9: i16_at(22),
            // tp[24] (0xA0) is unused.
            h1: tp[25],
            h2: i16::from_le_bytes([hum[0], hum[1]]),
            h3: hum[2],
            // H4 and H5 are 12-bit signed values sharing the nibbles of 0xE5.
            h4: (i16::from(hum[3] as i8) << 4) | i16::from(hum[4] & 0x0F),
            h5: (i16::from(hum[5] as i8) << 4) | i16::from(hum[4] >> 4),
            h6: hum[6] as i8,
        }
    }

    /// Returns `(temperature in 0.01 °C, t_fine)`.
    pub fn compensate_temperature(&self, adc_t: i32) -> (i32, i32) {
        let t1 = i64::from(self.t1);
        let t2 = i64::from(self.t2);
        let t3 = i64::from(self.t3);
        let adc_t = i64::from(adc_t);

        let var1 = (((adc_t >> 3) - (t1 << 1)) * t2) >> 11;
        let var2 = (((((adc_t >> 4) - t1) * ((adc_t >> 4) - t1)) >> 12) * t3) >> 14;
        let t_fine = (var1 + var2) as i32;
        ((t_fine * 5 + 128) >> 8, t_fine)
    }

    /// Pressure in Pa as Q24.8.  Returns 0 when the trim would divide by zero.
    pub fn compensate_pressure(&self, adc_p: i32, t_fine: i32) -> u32 {
        let mut var1 = i64::from(t_fine) - 128_000;
        let mut var2 = var1 * var1 * i64::from(self.p6);
        var2 += (var1 * i64::from(self.p5)) << 17;
        var2 += i64::from(self.p4) << 35;
        var1 = ((var1 * var1 * i64::from(self.p3)) >> 8) + ((var1 * i64::from(self.p2)) << 12);
        var1 = (((1_i64 << 47) + var1) * i64::from(self.p1)) >> 33;
        if var1 == 0 {
            return 0;
        }

        let mut p = 1_048_576 - i64::from(adc_p);
        p = (((p << 31) - var2) * 3125) / var1;
        let var1 = (i64::from(self.p9) * (p >> 13) * (p >> 13)) >> 25;
        let var2 = (i64::from(self.p8) * p) >> 19;
        p = ((p + var1 + var2) >> 8) + (i64::from(self.p7) << 4);
        p as u32
    }

    /// Relative humidity in % as Q22.10, clamped to 0..=100 %.
    pub fn compensate_humidity(&self, adc_h: i32, t_fine: i32) -> u32 {
        let h1 = i64::from(self.h1);
        let h2 = i64::from(self.h2);
        let h3 = i64::from(self.h3);
        let h4 = i64::from(self.h4);
        let h5 = i64::from(self.h5);
        let h6 = i64::from(self.h6);
        let adc_h = i64::from(adc_h);

        let mut v = i64::from(t_fine) - 76_800;
        let lhs = ((adc_h << 14) - (h4 << 20) - (h5 * v) + 16_384) >> 15;
        let rhs = ((((((v * h6) >> 10) * (((v * h3) >> 11) + 32_768)) >> 10) + 2_097_152) * h2
            + 8192)
            >> 14;
        v = lhs * rhs;
        v -= ((((v >> 15) * (v >> 15)) >> 7) * h1) >> 4;
        v = v.clamp(0, 419_430_400);
        (v >> 12) as u32
    }

    /// Convert one raw burst into engineering units.
    pub fn compensate(&self, raw: RawSample) -> Reading {
        let (temp_centi, t_fine) = self.compensate_temperature(raw.adc_t);
        let pressure_q24_8 = self.compensate_pressure(raw.adc_p, t_fine);
        let humidity_q22_10 = self.compensate_humidity(raw.adc_h, t_fine);

        Reading {
            temperature_c: temp_centi as f32 / 100.0,
            pressure_pa: pressure_q24_8 as f32 / 256.0,
            humidity_pct: humidity_q22_10 as f32 / 1024.0,
        }
    }
}

/// Uncompensated ADC words from one burst read of 0xF7..=0xFE.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawSample {
    pub adc_p: i32,
    pub adc_t: i32,
    pub adc_h: i32,
}

impl RawSample {
    pub fn from_registers(data: &[u8; 8]) -> Self {
        let twenty_bit =
            |msb: u8, lsb: u8, xlsb: u8| (i32::from(msb) << 12) | (i32::from(lsb) << 4) | (i32::from(xlsb) >> 4);
        Self {
            adc_p: twenty_bit(data[0], data[1], data[2]),
            adc_t: twenty_bit(data[3], data[4], data[5]),
            adc_h: (i32::from(data[6]) << 8) | i32::from(data[7]),
        }
    }
}

// ───────────────────────────────────────────────────────────────
// Driver
// ───────────────────────────────────────────────────────────────

pub struct Bme280<I2C> {
    bus: I2C,
    address: u8,
    calibration: Option<Calibration>,
}

impl<I2C: I2c> Bme280<I2C> {
    pub fn new(bus: I2C, address: u8) -> Self {
        Self {
            bus,
            address,
            calibration: None,
        }
    }

    /// Probe, reset, load trim and start continuous conversion.
    pub fn init(&mut self, delay: &mut impl DelayNs) -> Result<(), SensorError> {
        self.probe()?;
        self.write_reg(REG_RESET, RESET_WORD)?;
        delay.delay_ms(RESET_DELAY_MS);
        self.configure()?;
        info!("BME280: ready at 0x{:02x}", self.address);
        Ok(())
    }

    pub fn calibration(&self) -> Option<&Calibration> {
        self.calibration.as_ref()
    }

    /// Give the bus back (e.g. to share it with another device).
    pub fn release(self) -> I2C {
        self.bus
    }

    fn probe(&mut self) -> Result<(), SensorError> {
        let mut id = [0u8; 1];
        self.read_regs(REG_CHIP_ID, &mut id)?;
        if id[0] != CHIP_ID {
            warn!("BME280: unexpected chip id 0x{:02x}", id[0]);
            return Err(SensorError::UnknownChip(id[0]));
        }
        Ok(())
    }

    /// Load trim and start continuous conversion.  The driver only counts
    /// as ready once every step has succeeded.
    fn configure(&mut self) -> Result<(), SensorError> {
        let mut tp = [0u8; 26];
        let mut hum = [0u8; 7];
        self.read_regs(REG_CALIB_00, &mut tp)?;
        self.read_regs(REG_CALIB_26, &mut hum)?;

        // ctrl_hum only latches after a write to ctrl_meas.
        self.write_reg(REG_CTRL_HUM, CTRL_HUM_X1)?;
        self.write_reg(REG_CONFIG, CONFIG_DEFAULT)?;
        self.write_reg(REG_CTRL_MEAS, CTRL_MEAS_X1_NORMAL)?;

        self.calibration = Some(Calibration::from_registers(&tp, &hum));
        Ok(())
    }

    fn read_regs(&mut self, start: u8, buf: &mut [u8]) -> Result<(), SensorError> {
        self.bus
            .write_read(self.address, &[start], buf)
            .map_err(|_| SensorError::Bus)
    }

    fn write_reg(&mut self, reg: u8, value: u8) -> Result<(), SensorError> {
        self.bus
            .write(self.address, &[reg, value])
            .map_err(|_| SensorError::Bus)
    }
}

impl<I2C: I2c> SensorPort for Bme280<I2C> {
    fn read(&mut self) -> Result<Reading, SensorError> {
        // A failed boot-time init is retried here, without the soft reset.
        let calibration = match self.calibration {
            Some(c) => c,
            None => {
                self.probe()?;
                self.configure()?;
                info!("BME280: recovered at 0x{:02x}", self.address);
                self.calibration.ok_or(SensorError::NotReady)?
            }
        };
        let mut data = [0u8; 8];
        self.read_regs(REG_DATA, &mut data)?;
        Ok(calibration.compensate(RawSample::from_registers(&data)))
    }
}
