//! Defines data structures, constants, and protocol logic for the SunSpec
//! "Multiple MPPT" model (model id 160).
//!
//! A model 160 block is a fixed 10 word header followed by one 20 word record
//! per tracked power point ("module"). All module records in one block share
//! the four scale factors carried by the header.
//!
//! The decoder in this module is a pure function of the register array. Scale
//! factors are never applied here; [`ModuleRecord`] keeps the raw integers and
//! [`ScaleFactor::apply`] is used at publication time.

use std::fmt;

/// The SunSpec model id of the "Multiple MPPT" model.
pub const MODEL_ID: u16 = 160;

/// Number of registers in the fixed block header.
pub const HEADER_LEN: usize = 10;

/// Number of registers of one repeated module record.
pub const MODULE_STRIDE: usize = 20;

/// Number of registers of the packed module identifier string.
pub const ID_STRING_LEN: usize = 8;

/// Number of registers preceding the block body (model id and length).
pub const MODEL_HEADER_LEN: u16 = 2;

/// Not implemented marker of `uint16` and `enum16` fields.
pub const UINT16_NOT_IMPLEMENTED: u16 = 0xFFFF;
/// Not implemented marker of `int16` and `sunssf` fields.
pub const INT16_NOT_IMPLEMENTED: i16 = i16::MIN;
/// Not implemented marker of `acc32` and timestamp fields.
pub const ACC32_NOT_IMPLEMENTED: u32 = 0;
/// Not implemented marker of `bitfield32` fields.
pub const BITFIELD32_NOT_IMPLEMENTED: u32 = 0xFFFF_FFFF;

// Header word offsets.
const OFFSET_MODEL_ID: usize = 0;
const OFFSET_LENGTH: usize = 1;
const OFFSET_CURRENT_SF: usize = 2;
const OFFSET_VOLTAGE_SF: usize = 3;
const OFFSET_POWER_SF: usize = 4;
const OFFSET_ENERGY_SF: usize = 5;
const OFFSET_EVENTS: usize = 6;
const OFFSET_MODULE_COUNT: usize = 8;
const OFFSET_TIMESTAMP_PERIOD: usize = 9;

// Module record word offsets, relative to the start of the record.
const MODULE_OFFSET_ID: usize = 0;
const MODULE_OFFSET_ID_STRING: usize = 1;
const MODULE_OFFSET_CURRENT: usize = 9;
const MODULE_OFFSET_VOLTAGE: usize = 10;
const MODULE_OFFSET_POWER: usize = 11;
const MODULE_OFFSET_ENERGY: usize = 12;
const MODULE_OFFSET_TIMESTAMP: usize = 14;
const MODULE_OFFSET_TEMPERATURE: usize = 16;
const MODULE_OFFSET_STATE: usize = 17;
const MODULE_OFFSET_EVENTS: usize = 18;

/// The precondition a register block violated while being decoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum MalformedBlock {
    /// The array cannot even hold the fixed header.
    #[error("block has {actual} registers, the header alone needs {}", HEADER_LEN)]
    BlockTooShort { actual: usize },

    /// Word 0 does not carry the "Multiple MPPT" model id.
    #[error("unexpected model id {actual}, expected {}", MODEL_ID)]
    UnexpectedModelId { actual: u16 },

    /// The declared module count implies records past the end of the array.
    #[error("{module_count} modules need {required} registers, block has {actual}")]
    ModulesOverrun {
        module_count: u16,
        required: usize,
        actual: usize,
    },
}

/// Represents errors that can occur within the SunSpec MPPT protocol logic.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    /// The register block could not be decoded. No partial block is produced.
    #[error("malformed MPPT block: {0}")]
    MalformedBlock(#[from] MalformedBlock),

    /// The provided value is outside the range a protocol type accepts.
    #[error("{name} {value} is out of range {min}..={max}")]
    OutOfRange {
        name: &'static str,
        value: u32,
        min: u32,
        max: u32,
    },
}

/// Assembles a 32-bit value from two registers, most significant word first.
fn u32_from_registers(high: u16, low: u16) -> u32 {
    (u32::from(high) << 16) | u32::from(low)
}

fn implemented_u16(value: u16) -> Option<u16> {
    (value != UINT16_NOT_IMPLEMENTED).then_some(value)
}

fn implemented_i16(value: i16) -> Option<i16> {
    (value != INT16_NOT_IMPLEMENTED).then_some(value)
}

fn implemented_acc32(value: u32) -> Option<u32> {
    (value != ACC32_NOT_IMPLEMENTED).then_some(value)
}

fn implemented_bitfield32(value: u32) -> Option<u32> {
    (value != BITFIELD32_NOT_IMPLEMENTED).then_some(value)
}

/// Decodes packed characters, two per register, high byte first.
///
/// The text ends at the first NUL byte; trailing whitespace is padding.
fn string_from_registers(words: &[u16]) -> String {
    let bytes: Vec<u8> = words.iter().flat_map(|word| word.to_be_bytes()).collect();
    let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
    String::from_utf8_lossy(&bytes[..end]).trim_end().to_string()
}

/// A SunSpec scale factor: a signed base-10 exponent.
///
/// The physical value of a raw register is `raw * 10^exponent`.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScaleFactor(i16);

impl ScaleFactor {
    /// Creates a scale factor from its exponent.
    pub const fn new(exponent: i16) -> Self {
        Self(exponent)
    }

    /// Decodes a raw `sunssf` register.
    ///
    /// Returns `None` if the device marks the scale factor as not implemented.
    pub fn decode(value: u16) -> Option<Self> {
        implemented_i16(value as i16).map(Self)
    }

    /// The base-10 exponent.
    pub const fn exponent(&self) -> i16 {
        self.0
    }

    /// Scales a raw integer into its physical value.
    ///
    /// Negative exponents divide by the matching power of ten, which keeps
    /// values such as `150 * 10^-2` exact.
    pub fn apply(&self, raw: impl Into<f64>) -> f64 {
        let raw = raw.into();
        let magnitude = 10f64.powi(i32::from(self.0).abs());
        if self.0 < 0 {
            raw / magnitude
        } else {
            raw * magnitude
        }
    }
}

impl fmt::Display for ScaleFactor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "10^{}", self.0)
    }
}

/// The four scale factors of a block, shared by all of its module records.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScaleFactors {
    pub current: Option<ScaleFactor>,
    pub voltage: Option<ScaleFactor>,
    pub power: Option<ScaleFactor>,
    pub energy: Option<ScaleFactor>,
}

/// Operating state of a single MPPT module.
///
/// Codes without a known meaning are kept in [`OperatingState::Unknown`].
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperatingState {
    Off,
    Sleeping,
    Starting,
    On,
    Throttled,
    ShuttingDown,
    Fault,
    Standby,
    Test,
    Unknown(u16),
}

impl OperatingState {
    /// Maps a raw `enum16` code. Unrecognized codes are not an error.
    pub fn decode(code: u16) -> Self {
        match code {
            1 => Self::Off,
            2 => Self::Sleeping,
            3 => Self::Starting,
            4 => Self::On,
            5 => Self::Throttled,
            6 => Self::ShuttingDown,
            7 => Self::Fault,
            8 => Self::Standby,
            10 => Self::Test,
            other => Self::Unknown(other),
        }
    }

    /// The wire code of this state.
    pub fn code(&self) -> u16 {
        match self {
            Self::Off => 1,
            Self::Sleeping => 2,
            Self::Starting => 3,
            Self::On => 4,
            Self::Throttled => 5,
            Self::ShuttingDown => 6,
            Self::Fault => 7,
            Self::Standby => 8,
            Self::Test => 10,
            Self::Unknown(code) => *code,
        }
    }

    /// The published enumeration name.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Off => "OFF",
            Self::Sleeping => "SLEEPING",
            Self::Starting => "STARTING",
            Self::On => "ON",
            Self::Throttled => "THROTTLED",
            Self::ShuttingDown => "SHUTTING_DOWN",
            Self::Fault => "FAULT",
            Self::Standby => "STANDBY",
            Self::Test => "TEST",
            Self::Unknown(_) => "UNKNOWN",
        }
    }
}

impl fmt::Display for OperatingState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Fixed header of a model 160 block.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MpptHeader {
    /// Always [`MODEL_ID`] for a decoded block.
    pub model_id: u16,
    /// Declared block length in registers, excluding model id and length.
    pub length: u16,
    /// Global event bitmask.
    pub events: Option<u32>,
    /// Number of module records following the header.
    pub module_count: u16,
    /// Timestamp period in seconds.
    pub timestamp_period: Option<u16>,
}

/// One repeated module record. Values are raw and unscaled.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleRecord {
    pub module_id: Option<u16>,
    pub id_string: String,
    pub current: Option<u16>,
    pub voltage: Option<u16>,
    pub power: Option<u16>,
    pub lifetime_energy: Option<u32>,
    /// Seconds since 2000-01-01 00:00:00 UTC.
    pub timestamp: Option<u32>,
    /// Degrees Celsius, unscaled.
    pub temperature: Option<i16>,
    pub operating_state: Option<OperatingState>,
    pub events: Option<u32>,
}

impl ModuleRecord {
    /// Decodes exactly one record of [`MODULE_STRIDE`] registers.
    fn decode(words: &[u16]) -> Self {
        debug_assert_eq!(words.len(), MODULE_STRIDE);
        let u32_at = |offset: usize| u32_from_registers(words[offset], words[offset + 1]);
        Self {
            module_id: implemented_u16(words[MODULE_OFFSET_ID]),
            id_string: string_from_registers(
                &words[MODULE_OFFSET_ID_STRING..MODULE_OFFSET_ID_STRING + ID_STRING_LEN],
            ),
            current: implemented_u16(words[MODULE_OFFSET_CURRENT]),
            voltage: implemented_u16(words[MODULE_OFFSET_VOLTAGE]),
            power: implemented_u16(words[MODULE_OFFSET_POWER]),
            lifetime_energy: implemented_acc32(u32_at(MODULE_OFFSET_ENERGY)),
            timestamp: implemented_acc32(u32_at(MODULE_OFFSET_TIMESTAMP)),
            temperature: implemented_i16(words[MODULE_OFFSET_TEMPERATURE] as i16),
            operating_state: implemented_u16(words[MODULE_OFFSET_STATE])
                .map(OperatingState::decode),
            events: implemented_bitfield32(u32_at(MODULE_OFFSET_EVENTS)),
        }
    }
}

/// A fully decoded model 160 block.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MpptBlock {
    pub header: MpptHeader,
    pub scale_factors: ScaleFactors,
    pub modules: Vec<ModuleRecord>,
}

impl MpptBlock {
    /// Number of registers a block with `module_count` modules occupies.
    pub const fn required_len(module_count: u16) -> usize {
        HEADER_LEN + MODULE_STRIDE * module_count as usize
    }

    /// Checks the model id register read ahead of the full block.
    pub fn check_model_id(model_id: u16) -> Result<(), Error> {
        if model_id == MODEL_ID {
            Ok(())
        } else {
            Err(MalformedBlock::UnexpectedModelId { actual: model_id }.into())
        }
    }

    /// Decodes a raw register array, starting at the model id register.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MalformedBlock`] if the array is shorter than the
    /// header, carries another model id, or is too short for the declared
    /// number of module records.
    pub fn decode_from_holding_registers(words: &[u16]) -> Result<Self, Error> {
        log::trace!("Model block received, size: {}", words.len());
        Self::decode(words).inspect_err(|err| log::warn!("Cannot decode MPPT block: {err}"))
    }

    fn decode(words: &[u16]) -> Result<Self, Error> {
        if words.len() < HEADER_LEN {
            return Err(MalformedBlock::BlockTooShort {
                actual: words.len(),
            }
            .into());
        }
        Self::check_model_id(words[OFFSET_MODEL_ID])?;

        let module_count = words[OFFSET_MODULE_COUNT];
        let required = Self::required_len(module_count);
        if required > words.len() {
            return Err(MalformedBlock::ModulesOverrun {
                module_count,
                required,
                actual: words.len(),
            }
            .into());
        }

        let length = words[OFFSET_LENGTH];
        if usize::from(length) + usize::from(MODEL_HEADER_LEN) != words.len() {
            log::debug!(
                "Declared block length {length} does not match {} received registers",
                words.len()
            );
        }

        let header = MpptHeader {
            model_id: MODEL_ID,
            length,
            events: implemented_bitfield32(u32_from_registers(
                words[OFFSET_EVENTS],
                words[OFFSET_EVENTS + 1],
            )),
            module_count,
            timestamp_period: implemented_u16(words[OFFSET_TIMESTAMP_PERIOD]),
        };
        let scale_factors = ScaleFactors {
            current: ScaleFactor::decode(words[OFFSET_CURRENT_SF]),
            voltage: ScaleFactor::decode(words[OFFSET_VOLTAGE_SF]),
            power: ScaleFactor::decode(words[OFFSET_POWER_SF]),
            energy: ScaleFactor::decode(words[OFFSET_ENERGY_SF]),
        };
        let modules = words[HEADER_LEN..required]
            .chunks_exact(MODULE_STRIDE)
            .map(ModuleRecord::decode)
            .collect();

        Ok(Self {
            header,
            scale_factors,
            modules,
        })
    }
}

impl fmt::Display for MpptBlock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "model {} with {} module(s)",
            self.header.model_id, self.header.module_count
        )
    }
}

/// Supported serial baud rates.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u32)]
pub enum BaudRate {
    B1200 = 1200,
    B2400 = 2400,
    B4800 = 4800,
    #[default]
    B9600 = 9600,
    B19200 = 19200,
    B38400 = 38400,
    B57600 = 57600,
    B115200 = 115200,
}

impl TryFrom<u32> for BaudRate {
    type Error = Error;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        match value {
            1200 => Ok(Self::B1200),
            2400 => Ok(Self::B2400),
            4800 => Ok(Self::B4800),
            9600 => Ok(Self::B9600),
            19200 => Ok(Self::B19200),
            38400 => Ok(Self::B38400),
            57600 => Ok(Self::B57600),
            115200 => Ok(Self::B115200),
            _ => Err(Error::OutOfRange {
                name: "baud rate",
                value,
                min: 1200,
                max: 115200,
            }),
        }
    }
}

impl From<BaudRate> for u32 {
    fn from(baud_rate: BaudRate) -> u32 {
        baud_rate as u32
    }
}

impl fmt::Display for BaudRate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", *self as u32)
    }
}

/// A Modbus RTU slave id.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlaveId(u8);

impl SlaveId {
    pub const MIN: u8 = 1;
    pub const MAX: u8 = 247;
}

impl Default for SlaveId {
    fn default() -> Self {
        Self(1)
    }
}

impl std::ops::Deref for SlaveId {
    type Target = u8;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl TryFrom<u8> for SlaveId {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        if (Self::MIN..=Self::MAX).contains(&value) {
            Ok(Self(value))
        } else {
            Err(Error::OutOfRange {
                name: "slave id",
                value: value.into(),
                min: Self::MIN.into(),
                max: Self::MAX.into(),
            })
        }
    }
}

impl fmt::Display for SlaveId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#04x}", self.0)
    }
}
