//! SunSpec MPPT Collector CLI
//!
//! A command-line interface (CLI) application for reading the SunSpec
//! "Multiple MPPT" model (model 160) from inverters and charge controllers
//! using Modbus RTU (serial) or Modbus TCP.
//!
//! This tool allows users to:
//! - Read and display the decoded model block once.
//! - Read and display the scaled value of every module channel once.
//! - Run in a continuous daemon mode to poll the block, keep one channel group
//!   per reported module, and either print the channel values to the console
//!   or publish them to an MQTT broker.
//!
//! The CLI leverages the `sunspec_mppt_lib` crate for protocol definitions and client operations.

use anyhow::{Context, Result};
use clap::Parser;
use flexi_logger::{Logger, LoggerHandle};
use log::*;
use std::{panic, time::Duration};
use sunspec_mppt_lib::{
    channel::{ChannelRegistry, ModuleTemplate},
    handler::{MpptHandler, PollOutcome},
    protocol as proto,
    tokio_sync_safe_client::SafeClient,
};

mod commandline;
mod mqtt;

fn logging_init(loglevel: LevelFilter) -> LoggerHandle {
    let log_handle = Logger::try_with_env_or_str(loglevel.as_str())
        .expect("Cannot init logging")
        .start()
        .expect("Cannot start logging");

    panic::set_hook(Box::new(|panic_info| {
        let (filename, line, column) = panic_info
            .location()
            .map(|loc| (loc.file(), loc.line(), loc.column()))
            .unwrap_or(("<unknown_file>", 0, 0));

        let cause_str = if let Some(s) = panic_info.payload().downcast_ref::<&str>() {
            *s
        } else if let Some(s) = panic_info.payload().downcast_ref::<String>() {
            s.as_str()
        } else {
            "<unknown_panic_cause>"
        };

        error!(
            target: "panic",
            "Thread '{}' panicked at '{}': {}:{} - Cause: {}",
            std::thread::current().name().unwrap_or("<unnamed>"),
            filename,
            line,
            column,
            cause_str
        );
    }));
    log_handle
}

/// Calculates the minimum recommended delay for Modbus RTU based on baud rate.
/// This is typically 3.5 character times.
fn minimum_rtu_delay(baud_rate: &proto::BaudRate) -> Duration {
    // Modbus assumes 11 bits per character (start + 8 data + parity/stop + stop).
    let bits_per_char = 11.0;
    let rate = u32::from(*baud_rate) as f64;

    let char_time_secs = bits_per_char / rate;
    let inter_frame_delay_secs = 3.5 * char_time_secs;
    let delay_micros = (inter_frame_delay_secs * 1_000_000.0) as u64;

    // Rates above 19200 baud, up to the 115200 of `BaudRate::B115200`, use
    // the fixed 1.75ms silent interval.
    const PRACTICAL_MIN_INTER_FRAME_DELAY_MICROS: u64 = 1_750;
    Duration::from_micros(delay_micros.max(PRACTICAL_MIN_INTER_FRAME_DELAY_MICROS))
}

/// Checks if the user-provided RTU delay is sufficient; if not, uses the calculated minimum.
fn check_rtu_delay(user_delay: Duration, baud_rate: &proto::BaudRate) -> Duration {
    let min_rtu_delay = minimum_rtu_delay(baud_rate);
    if user_delay < min_rtu_delay {
        warn!(
            "User-defined RTU delay of {user_delay:?} is below the recommended minimum of {min_rtu_delay:?} for {baud_rate} baud. Using minimum."
        );
        min_rtu_delay
    } else {
        user_delay
    }
}

/// Creates a new client based on the provided command-line arguments.
fn create_client<'a>(
    connection: &'a commandline::CliConnection,
    delay: &mut Duration,
) -> Result<(SafeClient, &'a commandline::CliCommands)> {
    let (client, command_to_execute) = match connection {
        commandline::CliConnection::Tcp {
            address: tcp_address_str,
            unit,
            base_address,
            command,
        } => {
            let socket_addr = tcp_address_str
                .parse()
                .with_context(|| format!("Invalid TCP address format: '{tcp_address_str}'"))?;
            info!("Attempting to connect via TCP to {socket_addr} (Unit: {unit})...");
            let modbus_ctx = tokio_modbus::client::sync::tcp::connect_slave(
                socket_addr,
                tokio_modbus::Slave(**unit),
            )
            .with_context(|| format!("Failed to connect to Modbus TCP device at {socket_addr}"))?;
            (SafeClient::new(modbus_ctx, *base_address), command)
        }
        commandline::CliConnection::Rtu {
            device,
            baud_rate,
            address,
            base_address,
            command,
        } => {
            info!(
                "Attempting to connect via RTU to device {device} (Address: {address}, Baud: {baud_rate})..."
            );
            *delay = check_rtu_delay(*delay, baud_rate);
            let modbus_ctx = tokio_modbus::client::sync::rtu::connect_slave(
                &sunspec_mppt_lib::tokio_common::serial_port_builder(device, baud_rate),
                tokio_modbus::Slave(**address),
            )
            .with_context(|| format!("Cannot open serial port {device} at baud {baud_rate}"))?;
            (SafeClient::new(modbus_ctx, *base_address), command)
        }
    };
    Ok((client, command_to_execute))
}

/// Creates the handler that keeps the channel groups of one device.
pub(crate) fn new_handler() -> MpptHandler<ModuleTemplate, ChannelRegistry> {
    MpptHandler::new(ModuleTemplate, ChannelRegistry::new())
}

/// Runs one poll cycle: read the raw block, then decode and reconcile it.
pub(crate) fn poll(
    client: &SafeClient,
    handler: &mut MpptHandler<ModuleTemplate, ChannelRegistry>,
) -> Result<PollOutcome> {
    let registers = client
        .read_block_registers()
        .with_context(|| format!("Cannot read MPPT block at {}", client.base_address()))?;
    Ok(handler.handle_polled_data(&registers)?)
}

fn print_block(block: &proto::MpptBlock) {
    let header = &block.header;
    println!("Model: {} (length {})", header.model_id, header.length);
    println!("Modules: {}", header.module_count);
    match header.events {
        Some(events) => println!("Events: {events:#010x}"),
        None => println!("Events: not implemented"),
    }
    match header.timestamp_period {
        Some(period) => println!("Timestamp period: {period} s"),
        None => println!("Timestamp period: not implemented"),
    }
    println!("Scale factors: {:?}", block.scale_factors);
    for (index, module) in block.modules.iter().enumerate() {
        println!("module{index}: {module:?}");
    }
}

fn print_outcome(outcome: &PollOutcome) {
    if !outcome.delta.to_add.is_empty() {
        let added: Vec<String> = outcome.delta.to_add.iter().map(|g| g.to_string()).collect();
        println!("Added channel groups: {}", added.join(", "));
    }
    if !outcome.delta.to_remove.is_empty() {
        let removed: Vec<String> = outcome.delta.to_remove.iter().map(|g| g.to_string()).collect();
        println!("Removed channel groups: {}", removed.join(", "));
    }
    for (channel, value) in &outcome.values {
        println!("{channel}: {value}");
    }
}

fn main() -> Result<()> {
    let args = commandline::CliArgs::parse();

    // 1. Initialize logging as early as possible
    let _log_handle = logging_init(args.verbose.log_level_filter());
    info!(
        "SunSpec MPPT CLI started. Log level: {}",
        args.verbose.log_level_filter()
    );

    // 2. Setup the client
    let mut delay = args.delay;
    let (client, command_to_execute) = create_client(&args.connection, &mut delay)?;
    client.set_timeout(args.timeout);

    // 3. Execute the command
    match command_to_execute {
        commandline::CliCommands::Daemon {
            poll_interval,
            output,
        } => {
            info!("Starting daemon mode: output={output:?}, interval={poll_interval:?}");
            match output {
                commandline::DaemonOutput::Console => {
                    let mut handler = new_handler();
                    loop {
                        debug!("Daemon: Polling MPPT block for stdout...");
                        match poll(&client, &mut handler) {
                            Ok(outcome) => print_outcome(&outcome),
                            Err(error) => warn!("Poll failed, retrying next cycle: {error:#}"),
                        }
                        std::thread::sleep(delay.max(*poll_interval));
                    }
                }
                commandline::DaemonOutput::Mqtt { config_file } => {
                    mqtt::run_daemon(&client, &delay, poll_interval, config_file)?;
                }
            }
        }
        commandline::CliCommands::Read => {
            info!("Executing: Read MPPT block");
            let block = client.read_block().with_context(|| "Cannot read MPPT block")?;
            print_block(&block);
        }
        commandline::CliCommands::ReadChannels => {
            info!("Executing: Read MPPT channels");
            let outcome = poll(&client, &mut new_handler())?;
            for (channel, value) in &outcome.values {
                println!("{channel}: {value}");
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minimum_rtu_delay_calculation() {
        // 3.5 char times of 11 bits = 38.5 / baud seconds
        assert_eq!(
            minimum_rtu_delay(&proto::BaudRate::B1200).as_micros(),
            32083
        );
        assert_eq!(minimum_rtu_delay(&proto::BaudRate::B9600).as_micros(), 4010);
        assert_eq!(
            minimum_rtu_delay(&proto::BaudRate::B19200).as_micros(),
            2005
        );
        // Clamped to 1.75ms
        assert_eq!(
            minimum_rtu_delay(&proto::BaudRate::B57600).as_micros(),
            1750
        );
        assert_eq!(
            minimum_rtu_delay(&proto::BaudRate::B115200).as_micros(),
            1750
        );
    }

    #[test]
    fn test_check_rtu_delay() {
        let br_9600 = proto::BaudRate::B9600;
        let min_delay_9600 = minimum_rtu_delay(&br_9600);

        assert_eq!(
            check_rtu_delay(Duration::from_millis(3), &br_9600),
            min_delay_9600
        );
        assert_eq!(
            check_rtu_delay(Duration::from_millis(5), &br_9600),
            Duration::from_millis(5)
        );
        assert_eq!(check_rtu_delay(min_delay_9600, &br_9600), min_delay_9600);
    }
}
