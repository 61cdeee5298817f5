//! Asynchronous, thread-safe `tokio-modbus` client for SunSpec MPPT devices.
//!
//! All client methods are `async` and must be `.await`ed.

use crate::{protocol as proto, tokio_async, tokio_common::Result};
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio_modbus::client::Context;

/// Asynchronous client for reading the model 160 block of one device.
#[derive(Debug, Clone)]
pub struct SafeClient {
    ctx: Arc<Mutex<Context>>,
    base_address: u16,
}

impl SafeClient {
    /// Creates a new `SafeClient` with a given `tokio-modbus` asynchronous context.
    pub fn new(ctx: Context, base_address: u16) -> Self {
        Self {
            ctx: Arc::new(Mutex::new(ctx)),
            base_address,
        }
    }

    /// Creates a new `SafeClient` from a shared `tokio-modbus` asynchronous context.
    pub fn from_shared(ctx: Arc<Mutex<Context>>, base_address: u16) -> Self {
        Self { ctx, base_address }
    }

    /// Clones the shared `tokio-modbus` asynchronous context.
    pub fn clone_shared(&self) -> Arc<Mutex<Context>> {
        self.ctx.clone()
    }

    pub fn base_address(&self) -> u16 {
        self.base_address
    }

    /// Reads and decodes the model 160 block.
    pub async fn read_block(&self) -> Result<proto::MpptBlock> {
        let mut ctx = self.ctx.lock().await;
        tokio_async::SunSpecMppt::read_block(&mut ctx, self.base_address).await
    }

    /// Reads the raw registers of the model 160 block.
    pub async fn read_block_registers(&self) -> Result<Vec<u16>> {
        let mut ctx = self.ctx.lock().await;
        tokio_async::SunSpecMppt::read_block_registers(&mut ctx, self.base_address).await
    }
}
