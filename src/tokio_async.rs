//! Asynchronous `tokio-modbus` functions for SunSpec MPPT devices.
//!
//! This module provides a stateless API (`SunSpecMppt` struct) that reads the
//! "Multiple MPPT" model block over Modbus RTU or TCP and decodes it into the
//! types of the `crate::protocol` module.
//!
//! All functions are `async` and must be `.await`ed.
//!
//! # Examples
//!
//! ## TCP Client Example
//!
//! ```no_run
//! use sunspec_mppt_lib::tokio_async::SunSpecMppt;
//! use std::net::SocketAddr;
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let socket_addr: SocketAddr = "192.168.1.100:502".parse()?;
//!
//!     // Connect to the Modbus TCP device
//!     let mut modbus_ctx = tokio_modbus::client::tcp::connect(socket_addr).await?;
//!
//!     // Read the model 160 block with a timeout
//!     let result = tokio::time::timeout(
//!         Duration::from_secs(1),
//!         SunSpecMppt::read_block(&mut modbus_ctx, 40070),
//!     )
//!     .await;
//!
//!     match result {
//!         Ok(Ok(block)) => println!("Decoded {}", block),
//!         Ok(Err(e)) => eprintln!("Modbus error: {}", e),
//!         Err(e) => eprintln!("Timeout error: {}", e),
//!     }
//!
//!     Ok(())
//! }
//! ```
//!
//! ## RTU Client Example
//!
//! ```no_run
//! use sunspec_mppt_lib::tokio_async::SunSpecMppt;
//! use sunspec_mppt_lib::protocol::BaudRate;
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let builder = sunspec_mppt_lib::tokio_common::serial_port_builder(
//!         "/dev/ttyUSB0", // Or "COM3" on Windows, etc.
//!         &BaudRate::B9600,
//!     );
//!     let port = tokio_serial::SerialStream::open(&builder)?;
//!     let slave = tokio_modbus::Slave(1);
//!     let mut modbus_ctx = tokio_modbus::client::rtu::attach_slave(port, slave);
//!
//!     let result = tokio::time::timeout(
//!         Duration::from_secs(1),
//!         SunSpecMppt::read_block(&mut modbus_ctx, 40070),
//!     )
//!     .await;
//!
//!     match result {
//!         Ok(Ok(block)) => println!("{} module(s)", block.modules.len()),
//!         Ok(Err(e)) => eprintln!("Modbus error: {}", e),
//!         Err(e) => eprintln!("Timeout error: {}", e),
//!     }
//!
//!     Ok(())
//! }
//! ```

use crate::{
    protocol as proto,
    tokio_common::{model_block_quantity, read_chunks, Result},
};
use tokio_modbus::prelude::Reader;

/// Stateless asynchronous access to the SunSpec "Multiple MPPT" model block.
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
    pub async fn read_registers(
        ctx: &mut tokio_modbus::client::Context,
        address: u16,
        quantity: u16,
    ) -> Result<Vec<u16>> {
        let mut registers = Vec::with_capacity(quantity.into());
        for (chunk_address, chunk_quantity) in read_chunks(address, quantity) {
            registers.extend(Self::map_tokio_result(
                ctx.read_holding_registers(chunk_address, chunk_quantity)
                    .await,
            )?);
        }
        Ok(registers)
    }

    /// Reads the raw registers of the model 160 block starting at `base_address`.
    pub async fn read_block_registers(
        ctx: &mut tokio_modbus::client::Context,
        base_address: u16,
    ) -> Result<Vec<u16>> {
        let header = Self::read_registers(ctx, base_address, proto::MODEL_HEADER_LEN).await?;
        let quantity = model_block_quantity(&header)?;
        Self::read_registers(ctx, base_address, quantity).await
    }

    /// Reads and decodes the model 160 block starting at `base_address`.
    ///
    /// # Errors
    ///
    /// * `proto::Error::MalformedBlock` if the device holds another model at
    ///   `base_address` or the block cannot be decoded.
    /// * `tokio_modbus::Error` / `tokio_modbus::ExceptionCode` for Modbus failures.
    pub async fn read_block(
        ctx: &mut tokio_modbus::client::Context,
        base_address: u16,
    ) -> Result<proto::MpptBlock> {
        let registers = Self::read_block_registers(ctx, base_address).await?;
        Ok(proto::MpptBlock::decode_from_holding_registers(&registers)?)
    }
}
