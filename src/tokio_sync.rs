//! Synchronous `tokio-modbus` functions for SunSpec MPPT devices.
//!
//! This module provides a stateless API (`SunSpecMppt` struct) that reads the
//! "Multiple MPPT" model block over Modbus RTU or TCP and decodes it into the
//! types of the `crate::protocol` module.
//!
//! # Examples
//!
//! ## TCP Client Example
//!
//! ```no_run
//! use sunspec_mppt_lib::tokio_sync::SunSpecMppt;
//! use std::net::SocketAddr;
//! use std::time::Duration;
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let socket_addr: SocketAddr = "192.168.1.100:502".parse()?;
//!
//!     // Connect to the Modbus TCP device
//!     let mut modbus_ctx = tokio_modbus::client::sync::tcp::connect(socket_addr)?;
//!     modbus_ctx.set_timeout(Some(Duration::from_secs(1)));
//!
//!     // The model 160 block of this device starts at register 40070
//!     let block = SunSpecMppt::read_block(&mut modbus_ctx, 40070)?;
//!     println!("Decoded {}", block);
//!
//!     Ok(())
//! }
//! ```
//!
//! ## RTU Client Example
//!
//! ```no_run
//! use sunspec_mppt_lib::tokio_sync::SunSpecMppt;
//! use sunspec_mppt_lib::protocol::BaudRate;
//! use std::time::Duration;
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let builder = sunspec_mppt_lib::tokio_common::serial_port_builder(
//!         "/dev/ttyUSB0", // Or "COM3" on Windows, etc.
//!         &BaudRate::B9600,
//!     );
//!     let slave = tokio_modbus::Slave(1);
//!     let mut modbus_ctx = tokio_modbus::client::sync::rtu::connect_slave(&builder, slave)?;
//!     modbus_ctx.set_timeout(Some(Duration::from_secs(1)));
//!
//!     let block = SunSpecMppt::read_block(&mut modbus_ctx, 40070)?;
//!     for module in &block.modules {
//!         println!("{:?}", module);
//!     }
//!
//!     Ok(())
//! }
//! ```

use crate::{
    protocol as proto,
    tokio_common::{model_block_quantity, read_chunks, Result},
};
use tokio_modbus::prelude::SyncReader;

/// Stateless synchronous access to the SunSpec "Multiple MPPT" model block.
///
/// All methods that interact with the Modbus device will block the current thread.
#[derive(Debug)]
pub struct SunSpecMppt;

impl SunSpecMppt {
    /// Helper function to map tokio result to our result.
    fn map_tokio_result<T>(result: tokio_modbus::Result<T>) -> Result<T> {
        match result {
            Ok(Ok(result)) => Ok(result),
            Ok(Err(err)) => Err(err.into()), // Modbus exception
            Err(err) => Err(err.into()),     // IO error
        }
    }

    /// Reads `quantity` holding registers, split into requests the protocol allows.
    ///
    /// # Errors
    ///
    /// * `tokio_modbus::Error` if a Modbus communication error occurs.
    /// * `tokio_modbus::ExceptionCode` if the device answers with an exception.
    pub fn read_registers(
        ctx: &mut tokio_modbus::client::sync::Context,
        address: u16,
        quantity: u16,
    ) -> Result<Vec<u16>> {
        let mut registers = Vec::with_capacity(quantity.into());
        for (chunk_address, chunk_quantity) in read_chunks(address, quantity) {
            registers.extend(Self::map_tokio_result(
                ctx.read_holding_registers(chunk_address, chunk_quantity),
            )?);
        }
        Ok(registers)
    }

    /// Reads and decodes the model 160 block starting at `base_address`.
    ///
    /// The model id and length registers are read first; the model id must be
    /// [`proto::MODEL_ID`]. The whole block is then read and decoded.
    ///
    /// # Errors
    ///
    /// * `proto::Error::MalformedBlock` if the device holds another model at
    ///   `base_address` or the block cannot be decoded.
    /// * `tokio_modbus::Error` / `tokio_modbus::ExceptionCode` for Modbus failures.
    pub fn read_block(
        ctx: &mut tokio_modbus::client::sync::Context,
        base_address: u16,
    ) -> Result<proto::MpptBlock> {
        let registers = Self::read_block_registers(ctx, base_address)?;
        Ok(proto::MpptBlock::decode_from_holding_registers(&registers)?)
    }

    /// Reads the raw registers of the model 160 block starting at `base_address`.
    ///
    /// Used by callers that decode and reconcile themselves, e.g.
    /// [`crate::handler::MpptHandler`].
    pub fn read_block_registers(
        ctx: &mut tokio_modbus::client::sync::Context,
        base_address: u16,
    ) -> Result<Vec<u16>> {
        let header = Self::read_registers(ctx, base_address, proto::MODEL_HEADER_LEN)?;
        let quantity = model_block_quantity(&header)?;
        Self::read_registers(ctx, base_address, quantity)
    }
}
