use std::fmt;

use super::frame::RawFrame;

/// One decoded measurement set, produced fresh per validated frame.
#[derive(Debug, Clone, PartialEq)]
pub struct Telemetry {
    /// Solar input voltage, string 1 [V]
    pub solar_voltage_1: f32,
    /// Solar input current [A]
    pub solar_current: f32,
    /// Solar input voltage, string 2 [V]
    pub solar_voltage_2: f32,
    /// Grid voltage [V]
    pub line_voltage: f32,
    /// Grid current [A]
    pub line_current: f32,
    /// Heatsink temperature [°C]
    pub temperature: f32,
    /// Energy produced today [kWh]
    pub energy_today: f32,
    /// Lifetime energy counter [kWh]
    pub energy_total: u32,
    pub fault_code: FaultCode,
    pub run_status: RunStatus,
    /// Grid frequency [Hz]
    pub frequency: f32,
    /// Elapsed operation time [min]
    pub operation_time: u16,
    pub power_factor: f32,
    pub dsp_version: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    Stop,
    Run,
    Unknown(u8),
}

impl RunStatus {
    fn from_raw(byte: u8) -> Self {
        match byte {
            0 => RunStatus::Stop,
            1 => RunStatus::Run,
            other => RunStatus::Unknown(other),
        }
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunStatus::Stop => write!(f, "stop"),
            RunStatus::Run => write!(f, "run"),
            RunStatus::Unknown(raw) => write!(f, "unknown({})", raw),
        }
    }
}

/// Fault conditions documented for the device family, by bit position.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Fault {
    SolarOverCurrent = 0,
    SolarOverVoltage = 1,
    SolarLowVoltage = 2,
    DcLinkOverVoltage = 3,
    DcLinkLowVoltage = 4,
    InverterOverCurrent = 5,
    LineOverVoltage = 6,
    LineLowVoltage = 7,
    OverTemperature = 8,
    LineHighFrequency = 9,
    LineLowFrequency = 10,
    SolarOverPower = 11,
    DcFault = 12,
    DcLeakage = 13,
    DriveAlone = 16,
    InverterOverCurrentHw = 17,
}

impl Fault {
    pub const ALL: [Fault; 16] = [
        Fault::SolarOverCurrent,
        Fault::SolarOverVoltage,
        Fault::SolarLowVoltage,
        Fault::DcLinkOverVoltage,
        Fault::DcLinkLowVoltage,
        Fault::InverterOverCurrent,
        Fault::LineOverVoltage,
        Fault::LineLowVoltage,
        Fault::OverTemperature,
        Fault::LineHighFrequency,
        Fault::LineLowFrequency,
        Fault::SolarOverPower,
        Fault::DcFault,
        Fault::DcLeakage,
        Fault::DriveAlone,
        Fault::InverterOverCurrentHw,
    ];

    pub fn bit(self) -> u8 {
        self as u8
    }

    pub fn mask(self) -> u32 {
        1 << self.bit()
    }

    pub fn label(self) -> &'static str {
        match self {
            Fault::SolarOverCurrent => "solar overcurrent",
            Fault::SolarOverVoltage => "solar overvoltage",
            Fault::SolarLowVoltage => "solar low voltage",
            Fault::DcLinkOverVoltage => "dc-link overvoltage",
            Fault::DcLinkLowVoltage => "dc-link low voltage",
            Fault::InverterOverCurrent => "inverter overcurrent",
            Fault::LineOverVoltage => "line overvoltage",
            Fault::LineLowVoltage => "line low voltage",
            Fault::OverTemperature => "overtemperature",
            Fault::LineHighFrequency => "line high frequency",
            Fault::LineLowFrequency => "line low frequency",
            Fault::SolarOverPower => "solar overpower",
            Fault::DcFault => "dc fault",
            Fault::DcLeakage => "dc leakage",
            Fault::DriveAlone => "drive alone",
            Fault::InverterOverCurrentHw => "inverter overcurrent (hardware)",
        }
    }

    fn known_mask() -> u32 {
        Fault::ALL.iter().fold(0, |mask, fault| mask | fault.mask())
    }
}

/// 32-bit fault bitmask. Undocumented bits are kept verbatim: firmware
/// revisions define new ones, so nothing is masked away.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FaultCode(u32);

impl FaultCode {
    pub fn from_raw(raw: u32) -> Self {
        FaultCode(raw)
    }

    pub fn raw(&self) -> u32 {
        self.0
    }

    pub fn is_clear(&self) -> bool {
        self.0 == 0
    }

    pub fn is_set(&self, fault: Fault) -> bool {
        self.0 & fault.mask() != 0
    }

    /// Documented faults currently set, in bit order.
    pub fn faults(&self) -> impl Iterator<Item = Fault> + '_ {
        Fault::ALL.iter().copied().filter(|fault| self.is_set(*fault))
    }

    /// Set bits with no documented meaning.
    pub fn unknown_bits(&self) -> u32 {
        self.0 & !Fault::known_mask()
    }
}

impl fmt::Display for FaultCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_clear() {
            return write!(f, "none");
        }

        let known: Vec<&str> = self.faults().map(Fault::label).collect();
        if known.is_empty() {
            write!(f, "0x{:08X}", self.0)
        } else if self.unknown_bits() != 0 {
            write!(f, "{} (+0x{:08X})", known.join(", "), self.unknown_bits())
        } else {
            write!(f, "{}", known.join(", "))
        }
    }
}

fn u16le(lsb: u8, msb: u8) -> u16 {
    ((msb as u16) << 8) + lsb as u16
}

/// Decode a validated frame into a telemetry record.
///
/// Total: every frame that passed the checksum gate decodes, with no
/// further error cases.
pub fn decode(frame: &RawFrame) -> Telemetry {
    let b = frame.as_bytes();

    let energy_total = ((b[19] as u32) << 16) + ((b[18] as u32) << 8) + b[17] as u32;
    let fault_raw =
        ((b[23] as u32) << 24) + ((b[22] as u32) << 16) + ((b[21] as u32) << 8) + b[20] as u32;

    Telemetry {
        solar_voltage_1: u16le(b[3], b[4]) as f32 / 10.0,
        solar_current: u16le(b[5], b[6]) as f32 / 10.0,
        solar_voltage_2: u16le(b[7], b[8]) as f32 / 10.0,
        line_voltage: u16le(b[9], b[10]) as f32 / 10.0,
        line_current: u16le(b[11], b[12]) as f32 / 10.0,
        temperature: u16le(b[13], b[14]) as f32 / 10.0,
        energy_today: u16le(b[15], b[16]) as f32 / 100.0,
        energy_total,
        fault_code: FaultCode(fault_raw),
        run_status: RunStatus::from_raw(b[24]),
        frequency: u16le(b[25], b[26]) as f32 / 10.0,
        operation_time: u16le(b[27], b[28]),
        power_factor: b[29] as f32 / 100.0,
        dsp_version: b[30] as f32 / 100.0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::response_checksum;

    const TEST_FRAME: [u8; 32] = [
        0xB1, 0xB7, 0x01, 0x15, 0x0E, 0x05, 0x01, 0x01, 0x0E, 0x9A, 0x08, 0xC8, 0x01, 0x60, 0x01,
        0xFF, 0x00, 0x9F, 0x86, 0x01, 0x00, 0x00, 0x00, 0x00, 0x01, 0x59, 0x02, 0x01, 0x01, 0x63,
        0x6E, 0x9D,
    ];

    fn test_frame() -> RawFrame {
        RawFrame::try_from(&TEST_FRAME[..]).unwrap()
    }

    fn frame_with(patch: impl Fn(&mut [u8; 32])) -> RawFrame {
        let mut bytes = TEST_FRAME;
        patch(&mut bytes);
        bytes[31] = response_checksum(&bytes);
        RawFrame::try_from(&bytes[..]).unwrap()
    }

    #[test]
    fn decode_reference_frame() {
        let t = decode(&test_frame());

        assert_eq!(t.solar_voltage_1, 360.5);
        assert_eq!(t.solar_current, 26.1);
        assert_eq!(t.solar_voltage_2, 358.5);
        assert_eq!(t.line_voltage, 220.2);
        assert_eq!(t.line_current, 45.6);
        assert_eq!(t.temperature, 35.2);
        assert_eq!(t.energy_today, 2.55);
        assert_eq!(t.energy_total, 99_999);
        assert!(t.fault_code.is_clear());
        assert_eq!(t.run_status, RunStatus::Run);
        assert_eq!(t.frequency, 60.1);
        assert_eq!(t.operation_time, 257);
        assert_eq!(t.power_factor, 0.99);
        assert_eq!(t.dsp_version, 1.1);
    }

    #[test]
    fn decode_is_idempotent() {
        let frame = test_frame();
        assert_eq!(decode(&frame), decode(&frame));
    }

    #[test]
    fn fault_bits_reported_exactly() {
        let t = decode(&frame_with(|b| b[20] = 0x21));

        assert_eq!(t.fault_code.raw(), 0x0000_0021);
        let set: Vec<Fault> = t.fault_code.faults().collect();
        assert_eq!(set, [Fault::SolarOverCurrent, Fault::InverterOverCurrent]);
        assert!(t.fault_code.is_set(Fault::SolarOverCurrent));
        assert!(!t.fault_code.is_set(Fault::SolarOverVoltage));
    }

    #[test]
    fn reserved_fault_bits_survive() {
        let t = decode(&frame_with(|b| {
            b[20] = 0x01;
            b[23] = 0x80;
        }));

        assert_eq!(t.fault_code.raw(), 0x8000_0001);
        assert_eq!(t.fault_code.unknown_bits(), 0x8000_0000);
        assert_eq!(
            t.fault_code.to_string(),
            "solar overcurrent (+0x80000000)"
        );
    }

    #[test]
    fn fault_display() {
        assert_eq!(FaultCode::from_raw(0).to_string(), "none");
        assert_eq!(FaultCode::from_raw(0x0100).to_string(), "overtemperature");
        assert_eq!(FaultCode::from_raw(0x0000_4000).to_string(), "0x00004000");
    }

    #[test]
    fn run_status_is_total() {
        assert_eq!(decode(&frame_with(|b| b[24] = 0)).run_status, RunStatus::Stop);
        assert_eq!(decode(&frame_with(|b| b[24] = 1)).run_status, RunStatus::Run);
        assert_eq!(
            decode(&frame_with(|b| b[24] = 7)).run_status,
            RunStatus::Unknown(7)
        );
    }

    #[test]
    fn hardware_fault_bits() {
        let t = decode(&frame_with(|b| b[22] = 0x03));

        let set: Vec<Fault> = t.fault_code.faults().collect();
        assert_eq!(set, [Fault::DriveAlone, Fault::InverterOverCurrentHw]);
    }
}
