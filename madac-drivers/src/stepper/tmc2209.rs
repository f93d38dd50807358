//! TMC2209 stepper driver (UART mode)
//!
//! The TMC2209 is configured once over its single-wire UART and then
//! stepped through STEP/DIR (see [`super::step_dir`]). StallGuard4 drives
//! the DIAG output, which serves as the blind's end-stop.
//!
//! # UART Protocol
//!
//! 115200 baud, 8N1:
//! - Sync byte: 0x05
//! - Slave address: 0-3 (MS1/MS2 pins)
//! - Register address, bit 7 set for writes
//! - Data (4 bytes, big-endian)
//! - CRC8
//!
//! On boards where TX and RX share the PDN_UART line every byte sent is
//! also received; [`Tmc2209Bus`] discards that echo.

use embedded_hal_async::delay::DelayNs;
use embedded_io_async::{Read, Write};
use madac_core::config::Tmc2209Settings;

/// TMC2209 Register addresses
pub mod reg {
    /// General configuration
    pub const GCONF: u8 = 0x00;
    /// Global status flags
    pub const GSTAT: u8 = 0x01;
    /// Interface transmission counter
    pub const IFCNT: u8 = 0x02;
    /// Hold/run current settings
    pub const IHOLD_IRUN: u8 = 0x10;
    /// Power down delay
    pub const TPOWERDOWN: u8 = 0x11;
    /// Measured time between steps
    pub const TSTEP: u8 = 0x12;
    /// Lower velocity for CoolStep/StallGuard
    pub const TCOOLTHRS: u8 = 0x14;
    /// StallGuard threshold
    pub const SGTHRS: u8 = 0x40;
    /// StallGuard result
    pub const SG_RESULT: u8 = 0x41;
    /// CoolStep configuration
    pub const COOLCONF: u8 = 0x42;
    /// Chopper configuration
    pub const CHOPCONF: u8 = 0x6C;
    /// Driver status
    pub const DRV_STATUS: u8 = 0x6F;
    /// StealthChop PWM configuration
    pub const PWMCONF: u8 = 0x70;
}

/// UART sync byte for TMC2209
const SYNC_BYTE: u8 = 0x05;

/// Address the TMC2209 uses in replies
const MASTER_ADDRESS: u8 = 0xFF;

/// Number of datagrams sent by [`Tmc2209Driver::init_datagrams`]
pub const INIT_DATAGRAM_COUNT: usize = 8;

/// Largest TCOOLTHRS value (20 bits)
const TCOOLTHRS_MAX: u32 = 0xFFFFF;

/// CRC8 calculation for TMC2209 UART
///
/// Polynomial 0x07, bits fed LSB first as the datasheet specifies.
pub fn crc8(data: &[u8]) -> u8 {
    let mut crc = 0u8;
    for &byte in data {
        let mut current = byte;
        for _ in 0..8 {
            if ((crc >> 7) ^ (current & 0x01)) != 0 {
                crc = (crc << 1) ^ 0x07;
            } else {
                crc <<= 1;
            }
            current >>= 1;
        }
    }
    crc
}

/// Build a write datagram for TMC2209
pub fn build_write_datagram(addr: u8, reg: u8, data: u32) -> [u8; 8] {
    let mut datagram = [0u8; 8];
    datagram[0] = SYNC_BYTE;
    datagram[1] = addr;
    datagram[2] = reg | 0x80;
    datagram[3..7].copy_from_slice(&data.to_be_bytes());
    datagram[7] = crc8(&datagram[..7]);
    datagram
}

/// Build a read request datagram for TMC2209
pub fn build_read_request(addr: u8, reg: u8) -> [u8; 4] {
    let mut datagram = [SYNC_BYTE, addr, reg & 0x7F, 0];
    datagram[3] = crc8(&datagram[..3]);
    datagram
}

/// Parse a read reply for register `reg`
///
/// The reply is sync, master address (0xFF), register, 4 data bytes, CRC8.
pub fn parse_read_response(response: &[u8; 8], reg: u8) -> Result<u32, Tmc2209Error> {
    if response[0] != SYNC_BYTE || response[1] != MASTER_ADDRESS {
        return Err(Tmc2209Error::InvalidSync);
    }
    if response[7] != crc8(&response[..7]) {
        return Err(Tmc2209Error::CrcMismatch);
    }
    if response[2] != reg {
        return Err(Tmc2209Error::UnexpectedRegister);
    }

    Ok(u32::from_be_bytes([
        response[3],
        response[4],
        response[5],
        response[6],
    ]))
}

/// TMC2209 communication errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Tmc2209Error {
    /// Invalid sync byte or address in a reply
    InvalidSync,
    /// CRC mismatch
    CrcMismatch,
    /// Reply for a different register
    UnexpectedRegister,
    /// Communication timeout
    Timeout,
    /// The UART failed or ran out of data
    Uart,
    /// IFCNT did not advance by the number of writes sent
    NotAcknowledged,
}

/// Parsed DRV_STATUS register
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct DrvStatus {
    /// Overtemperature pre-warning (120°C)
    pub ot_prewarning: bool,
    /// Overtemperature shutdown (150°C)
    pub ot_shutdown: bool,
    /// Short to ground on phase A
    pub s2ga: bool,
    /// Short to ground on phase B
    pub s2gb: bool,
    /// Low side short on phase A
    pub s2vsa: bool,
    /// Low side short on phase B
    pub s2vsb: bool,
    /// Open load on phase A
    pub ola: bool,
    /// Open load on phase B
    pub olb: bool,
    /// Current scaling (0-31)
    pub cs_actual: u8,
    /// StealthChop active
    pub stealth: bool,
    /// Motor standstill indicator
    pub standstill: bool,
}

impl DrvStatus {
    /// Parse from raw DRV_STATUS register value
    pub fn from_register(value: u32) -> Self {
        let bit = |n: u32| (value & (1 << n)) != 0;
        Self {
            ot_prewarning: bit(0),
            ot_shutdown: bit(1),
            s2ga: bit(2),
            s2gb: bit(3),
            s2vsa: bit(4),
            s2vsb: bit(5),
            ola: bit(6),
            olb: bit(7),
            cs_actual: ((value >> 16) & 0x1F) as u8,
            stealth: bit(30),
            standstill: bit(31),
        }
    }

    /// Check if any condition that stops the driver stage is present
    pub fn has_fault(&self) -> bool {
        self.ot_shutdown || self.s2ga || self.s2gb || self.s2vsa || self.s2vsb
    }

    /// Check if driver is in warning state
    pub fn has_warning(&self) -> bool {
        self.ot_prewarning || self.ola || self.olb
    }
}

/// Convert current in mA RMS to an IRUN/IHOLD value (0-31)
///
/// Assumes Rsense = 0.11 ohm and VSENSE = 0 (Vfs = 0.325 V):
/// CS ≈ I_rms * 15.34 - 1.
pub fn current_to_cs(current_ma: u16) -> u8 {
    let cs = ((current_ma as u32) * 1534 / 100_000).saturating_sub(1);
    cs.min(31) as u8
}

/// Register image of one TMC2209
#[derive(Debug, Clone)]
pub struct Tmc2209Driver {
    settings: Tmc2209Settings,
    microsteps: u16,
}

impl Tmc2209Driver {
    /// Create a register image from settings and the microstep resolution
    pub fn new(settings: Tmc2209Settings, microsteps: u16) -> Self {
        Self {
            settings,
            microsteps,
        }
    }

    /// Get the settings
    pub fn settings(&self) -> &Tmc2209Settings {
        &self.settings
    }

    /// UART address of this driver
    pub fn address(&self) -> u8 {
        self.settings.uart_address
    }

    /// Microsteps to MRES field value
    pub fn mres(&self) -> u8 {
        match self.microsteps {
            256 => 0,
            128 => 1,
            64 => 2,
            32 => 3,
            16 => 4,
            8 => 5,
            4 => 6,
            2 => 7,
            1 => 8,
            _ => 4,
        }
    }

    /// GCONF: UART-controlled microsteps, PDN pin released for UART
    fn build_gconf(&self) -> u32 {
        let mut gconf = 0u32;
        // en_spreadcycle; StallGuard4 needs StealthChop
        if !self.settings.stealthchop {
            gconf |= 1 << 2;
        }
        // pdn_disable
        gconf |= 1 << 6;
        // mstep_reg_select
        gconf |= 1 << 7;
        // multistep_filt
        gconf |= 1 << 8;
        gconf
    }

    fn build_chopconf(&self) -> u32 {
        let toff = (self.settings.toff & 0x0F) as u32;
        let mut chopconf = toff;
        // HSTRT = 4, HEND = 0, TBL = 2
        chopconf |= 4 << 4;
        chopconf |= 2 << 15;
        chopconf |= (self.mres() as u32) << 24;
        // intpol
        chopconf |= 1 << 28;
        chopconf
    }

    fn build_ihold_irun(&self, run_ma: u16, hold_ma: u16) -> u32 {
        let ihold = current_to_cs(hold_ma) as u32;
        let irun = current_to_cs(run_ma) as u32;
        let iholddelay = 6u32;
        (iholddelay << 16) | (irun << 8) | ihold
    }

    fn build_pwmconf(&self) -> u32 {
        // PWM_OFS = 36, PWM_GRAD = 14, PWM_FREQ = 1, autoscale, autograd,
        // PWM_REG = 4, PWM_LIM = 12
        36 | (14 << 8) | (1 << 16) | (1 << 18) | (1 << 19) | (4 << 24) | (12 << 28)
    }

    fn build_coolconf(&self) -> u32 {
        let semin = (self.settings.semin & 0x0F) as u32;
        let semax = (self.settings.semax & 0x0F) as u32;
        let sedn = (self.settings.sedn & 0x03) as u32;
        semin | (semax << 8) | (sedn << 13)
    }

    /// Register writes that bring the driver into its operating state
    pub fn init_datagrams(&self) -> [[u8; 8]; INIT_DATAGRAM_COUNT] {
        let addr = self.settings.uart_address;
        let s = &self.settings;

        [
            build_write_datagram(addr, reg::GCONF, self.build_gconf()),
            build_write_datagram(addr, reg::CHOPCONF, self.build_chopconf()),
            build_write_datagram(
                addr,
                reg::IHOLD_IRUN,
                self.build_ihold_irun(s.run_current_ma, s.hold_current_ma),
            ),
            build_write_datagram(addr, reg::TPOWERDOWN, 20),
            build_write_datagram(addr, reg::PWMCONF, self.build_pwmconf()),
            build_write_datagram(addr, reg::TCOOLTHRS, s.tcoolthrs.min(TCOOLTHRS_MAX)),
            build_write_datagram(addr, reg::COOLCONF, self.build_coolconf()),
            build_write_datagram(addr, reg::SGTHRS, s.stall_threshold as u32),
        ]
    }
}

/// Register access over a UART
pub struct Tmc2209Bus<U> {
    uart: U,
    /// TX and RX share one wire; every byte sent is read back
    echo: bool,
}

impl<U: Read + Write> Tmc2209Bus<U> {
    /// Create a bus over `uart`
    pub fn new(uart: U, echo: bool) -> Self {
        Self { uart, echo }
    }

    /// Release the UART
    pub fn into_inner(self) -> U {
        self.uart
    }

    async fn send(&mut self, bytes: &[u8]) -> Result<(), Tmc2209Error> {
        self.uart
            .write_all(bytes)
            .await
            .map_err(|_| Tmc2209Error::Uart)?;
        self.uart.flush().await.map_err(|_| Tmc2209Error::Uart)?;

        if self.echo {
            let mut echo = [0u8; 8];
            let echo = &mut echo[..bytes.len()];
            self.uart
                .read_exact(echo)
                .await
                .map_err(|_| Tmc2209Error::Uart)?;
        }
        Ok(())
    }

    /// Write one datagram
    pub async fn write_datagram(&mut self, datagram: &[u8; 8]) -> Result<(), Tmc2209Error> {
        self.send(datagram).await
    }

    /// Read a register
    pub async fn read_register(&mut self, addr: u8, reg: u8) -> Result<u32, Tmc2209Error> {
        self.send(&build_read_request(addr, reg)).await?;

        let mut response = [0u8; 8];
        self.uart
            .read_exact(&mut response)
            .await
            .map_err(|_| Tmc2209Error::Uart)?;
        parse_read_response(&response, reg)
    }

    /// Write the initial register set and verify it was received
    ///
    /// The interface counter must advance by exactly the number of writes.
    pub async fn configure<D: DelayNs>(
        &mut self,
        driver: &Tmc2209Driver,
        delay: &mut D,
    ) -> Result<(), Tmc2209Error> {
        let addr = driver.address();
        let before = self.read_register(addr, reg::IFCNT).await? as u8;

        for datagram in driver.init_datagrams().iter() {
            delay.delay_ms(2).await;
            self.write_datagram(datagram).await?;
        }

        let after = self.read_register(addr, reg::IFCNT).await? as u8;
        if after.wrapping_sub(before) as usize != INIT_DATAGRAM_COUNT {
            return Err(Tmc2209Error::NotAcknowledged);
        }
        Ok(())
    }

    /// Read and parse DRV_STATUS
    pub async fn drv_status(&mut self, driver: &Tmc2209Driver) -> Result<DrvStatus, Tmc2209Error> {
        let raw = self.read_register(driver.address(), reg::DRV_STATUS).await?;
        Ok(DrvStatus::from_register(raw))
    }

    /// Read the latest StallGuard result (0-510)
    pub async fn stallguard_result(&mut self, driver: &Tmc2209Driver) -> Result<u16, Tmc2209Error> {
        let raw = self.read_register(driver.address(), reg::SG_RESULT).await?;
        Ok((raw & 0x3FF) as u16)
    }
}
