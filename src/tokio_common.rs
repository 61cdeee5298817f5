//! This module provides common data structures and error types for the `tokio`
//! based clients.
//!
//! It defines the `Error` enum, which encapsulates all possible communication errors,
//! and the chunking used to read a model block larger than one Modbus request.
use crate::protocol as proto;

/// Represents all possible errors that can occur during Modbus communication.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// Wraps `proto::Error`.
    #[error(transparent)]
    ProtocolError(#[from] proto::Error),

    /// Wraps `tokio_modbus::ExceptionCode`.
    #[error(transparent)]
    TokioExceptionError(#[from] tokio_modbus::ExceptionCode),

    /// Wraps `tokio_modbus::Error`.
    #[error(transparent)]
    TokioError(#[from] tokio_modbus::Error),
}

/// The result type for tokio operations.
pub(crate) type Result<T> = std::result::Result<T, crate::tokio_common::Error>;

/// Maximum number of holding registers a single Modbus read may request.
pub const MAX_READ_QUANTITY: u16 = 125;

/// The parity used for serial communication.
pub const PARITY: &tokio_serial::Parity = &tokio_serial::Parity::None;
/// The number of stop bits used for serial communication.
pub const STOP_BITS: &tokio_serial::StopBits = &tokio_serial::StopBits::One;
/// The number of data bits used for serial communication.
pub const DATA_BITS: &tokio_serial::DataBits = &tokio_serial::DataBits::Eight;

/// Creates a `tokio_serial::SerialPortBuilder` with the specified settings.
///
/// # Arguments
///
/// * `device` - The path to the serial port device (e.g., `/dev/ttyUSB0`).
/// * `baud_rate` - The baud rate for the serial communication.
pub fn serial_port_builder(
    device: &str,
    baud_rate: &proto::BaudRate,
) -> tokio_serial::SerialPortBuilder {
    tokio_serial::new(device, u32::from(*baud_rate))
        .parity(*PARITY)
        .stop_bits(*STOP_BITS)
        .data_bits(*DATA_BITS)
        .flow_control(tokio_serial::FlowControl::None)
}

/// Splits `quantity` registers starting at `address` into read requests of at
/// most [`MAX_READ_QUANTITY`] registers.
pub(crate) fn read_chunks(address: u16, quantity: u16) -> impl Iterator<Item = (u16, u16)> {
    (0..quantity)
        .step_by(MAX_READ_QUANTITY as usize)
        .map(move |offset| {
            (
                address.wrapping_add(offset),
                (quantity - offset).min(MAX_READ_QUANTITY),
            )
        })
}

/// Number of registers of the whole model block, given its model id and
/// length registers.
pub(crate) fn model_block_quantity(header: &[u16]) -> std::result::Result<u16, proto::Error> {
    match *header {
        [model_id, length] => {
            proto::MpptBlock::check_model_id(model_id)?;
            Ok(length.saturating_add(proto::MODEL_HEADER_LEN))
        }
        _ => Err(proto::MalformedBlock::BlockTooShort {
            actual: header.len(),
        }
        .into()),
    }
}
