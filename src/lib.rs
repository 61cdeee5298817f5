//! A library for reading SunSpec "Multiple MPPT" (model 160) blocks via Modbus.
//!
//! A model 160 block carries one 20 register record per tracked power point
//! ("module"), and the number of modules a device reports can change between
//! polls. This crate decodes the block and keeps a set of channel groups, one
//! per module, in line with the reported module count.
//!
//! ## Layers
//!
//! 1.  **Protocol and channels**: the pure decoder ([`protocol`]), the channel
//!     group reconciler ([`channel`]), value publication ([`publish`]) and the
//!     per-poll glue tying them together ([`handler`]). These never perform I/O.
//!
//! 2.  **High-Level, Safe Clients**: Stateful, thread-safe clients that are easy to share and use in concurrent applications. See [`tokio_sync_safe_client::SafeClient`] (blocking) and [`tokio_async_safe_client::SafeClient`] (`async`).
//!
//! 3.  **Low-Level, Stateless Functions**: Functions that read the block with
//!     a caller managed Modbus context. See the [`tokio_sync`] and
//!     [`tokio_async`] modules.
//!
//! ## Quick Start
//!
//! ```no_run
//! use sunspec_mppt_lib::{
//!     channel::{ChannelRegistry, ModuleTemplate},
//!     handler::MpptHandler,
//!     tokio_sync_safe_client::SafeClient,
//! };
//! use tokio_modbus::client::sync::tcp;
//! use tokio_modbus::Slave;
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let socket_addr = "192.168.1.100:502".parse()?;
//!     let ctx = tcp::connect_slave(socket_addr, Slave(1))?;
//!     let client = SafeClient::new(ctx, 40070);
//!     let mut handler = MpptHandler::new(ModuleTemplate, ChannelRegistry::new());
//!
//!     let outcome = handler.handle_polled_data(&client.read_block_registers()?)?;
//!     for (channel, value) in outcome.values {
//!         println!("{channel}: {value}");
//!     }
//!
//!     Ok(())
//! }
//! ```

pub mod channel;
pub mod handler;
pub mod protocol;
pub mod publish;

#[cfg(any(
    feature = "tokio-rtu-sync",
    feature = "tokio-tcp-sync",
    feature = "tokio-rtu",
    feature = "tokio-tcp"
))]
pub mod tokio_common;

#[cfg_attr(
    docsrs,
    doc(cfg(any(feature = "tokio-rtu-sync", feature = "tokio-tcp-sync")))
)]
#[cfg(any(feature = "tokio-rtu-sync", feature = "tokio-tcp-sync"))]
pub mod tokio_sync;

#[cfg_attr(docsrs, doc(cfg(any(feature = "tokio-rtu", feature = "tokio-tcp"))))]
#[cfg(any(feature = "tokio-rtu", feature = "tokio-tcp"))]
pub mod tokio_async;

#[cfg_attr(
    docsrs,
    doc(cfg(all(
        feature = "safe-client-sync",
        any(feature = "tokio-rtu-sync", feature = "tokio-tcp-sync")
    )))
)]
#[cfg(all(
    feature = "safe-client-sync",
    any(feature = "tokio-rtu-sync", feature = "tokio-tcp-sync")
))]
pub mod tokio_sync_safe_client;

#[cfg_attr(
    docsrs,
    doc(cfg(all(
        feature = "safe-client-async",
        any(feature = "tokio-rtu", feature = "tokio-tcp")
    )))
)]
#[cfg(all(
    feature = "safe-client-async",
    any(feature = "tokio-rtu", feature = "tokio-tcp")
))]
pub mod tokio_async_safe_client;
