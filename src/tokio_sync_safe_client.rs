//! Synchronous, thread-safe `tokio-modbus` client for SunSpec MPPT devices.
//!
//! `SafeClient` shares one Modbus context between threads and remembers the
//! register address of the model 160 block.
//!
//! ## Example
//!
//! ```no_run
//! use sunspec_mppt_lib::tokio_sync_safe_client::SafeClient;
//! use tokio_modbus::client::sync::tcp;
//! use tokio_modbus::Slave;
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let socket_addr = "192.168.1.100:502".parse()?;
//!     let ctx = tcp::connect_slave(socket_addr, Slave(1))?;
//!     let client = SafeClient::new(ctx, 40070);
//!
//!     let block = client.read_block()?;
//!     println!("Successfully read {}", block);
//!
//!     Ok(())
//! }
//! ```

use crate::{protocol as proto, tokio_common::Result, tokio_sync};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio_modbus::client::sync::Context;

/// Synchronous client for reading the model 160 block of one device.
#[derive(Debug, Clone)]
pub struct SafeClient {
    ctx: Arc<Mutex<Context>>,
    base_address: u16,
}

impl SafeClient {
    /// Creates a new `SafeClient` with a given `tokio-modbus` synchronous context.
    pub fn new(ctx: Context, base_address: u16) -> Self {
        Self {
            ctx: Arc::new(Mutex::new(ctx)),
            base_address,
        }
    }

    /// Creates a new `SafeClient` from a shared `tokio-modbus` synchronous context.
    pub fn from_shared(ctx: Arc<Mutex<Context>>, base_address: u16) -> Self {
        Self { ctx, base_address }
    }

    /// Clones the shared `tokio-modbus` synchronous context.
    pub fn clone_shared(&self) -> Arc<Mutex<Context>> {
        self.ctx.clone()
    }

    /// The register address of the model id register of the block.
    pub fn base_address(&self) -> u16 {
        self.base_address
    }

    fn lock(&self) -> MutexGuard<'_, Context> {
        match self.ctx.lock() {
            Ok(ctx) => ctx,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Sets the timeout for Modbus communication.
    pub fn set_timeout(&self, timeout: Duration) {
        self.lock().set_timeout(timeout);
    }

    /// Reads and decodes the model 160 block.
    pub fn read_block(&self) -> Result<proto::MpptBlock> {
        tokio_sync::SunSpecMppt::read_block(&mut self.lock(), self.base_address)
    }

    /// Reads the raw registers of the model 160 block.
    pub fn read_block_registers(&self) -> Result<Vec<u16>> {
        tokio_sync::SunSpecMppt::read_block_registers(&mut self.lock(), self.base_address)
    }
}
