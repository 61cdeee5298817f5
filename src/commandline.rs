use crate::mqtt::MqttConfig;
use clap::{Parser, Subcommand};
use clap_verbosity_flag::{Verbosity, WarnLevel};
use std::time::Duration;
use sunspec_mppt_lib::protocol as proto;

fn default_device_name() -> String {
    if cfg!(target_os = "windows") {
        String::from("COM1")
    } else {
        String::from("/dev/ttyUSB0")
    }
}

fn parse_slave_id(s: &str) -> Result<proto::SlaveId, String> {
    let id = clap_num::maybe_hex::<u8>(s).map_err(|e| format!("Invalid slave id format: {e}"))?;
    proto::SlaveId::try_from(id).map_err(|e| e.to_string())
}

fn parse_register_address(s: &str) -> Result<u16, String> {
    clap_num::maybe_hex::<u16>(s).map_err(|e| format!("Invalid register address format: {e}"))
}

fn parse_baud_rate(s: &str) -> Result<proto::BaudRate, String> {
    let rate_val = s
        .parse::<u32>()
        .map_err(|e| format!("Invalid baud rate number format: {e}"))?;
    proto::BaudRate::try_from(rate_val).map_err(|e| e.to_string())
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum CliConnection {
    /// Connect to a SunSpec device via Modbus TCP.
    Tcp {
        /// The IP address or hostname and port of the Modbus TCP device.
        /// Example: "192.168.1.100:502".
        #[clap(verbatim_doc_comment)]
        address: String,

        /// Modbus unit id of the device.
        #[arg(short, long, default_value_t = proto::SlaveId::default(), value_parser = parse_slave_id)]
        unit: proto::SlaveId,

        /// Register address of the model id register of the MPPT (160) block.
        /// Can be specified in decimal or hexadecimal (e.g., "40070" or "0x9C86").
        #[arg(short, long, value_parser = parse_register_address, verbatim_doc_comment)]
        base_address: u16,

        /// Commands for the connected device.
        #[command(subcommand)]
        command: CliCommands,
    },
    /// Connect to a SunSpec device via Modbus RTU (Serial).
    Rtu {
        /// Serial port device name.
        /// Examples: "/dev/ttyUSB0" (Linux), "COM3" (Windows).
        #[arg(short, long, default_value_t = default_device_name(), verbatim_doc_comment)]
        device: String,

        /// Baud rate for serial communication.
        /// Supported values: 1200, 2400, 4800, 9600, 19200, 38400, 57600, 115200.
        #[arg(long, default_value_t = proto::BaudRate::default(), value_parser = parse_baud_rate, verbatim_doc_comment)]
        baud_rate: proto::BaudRate,

        /// The Modbus RTU device address (1 to 247).
        #[arg(short, long, default_value_t = proto::SlaveId::default(), value_parser = parse_slave_id)]
        address: proto::SlaveId,

        /// Register address of the model id register of the MPPT (160) block.
        /// Can be specified in decimal or hexadecimal (e.g., "40070" or "0x9C86").
        #[arg(short, long, value_parser = parse_register_address, verbatim_doc_comment)]
        base_address: u16,

        /// Commands for the connected device.
        #[command(subcommand)]
        command: CliCommands,
    },
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum DaemonOutput {
    /// Continuously read the MPPT block and print all channel values to the console.
    Console,
    /// Continuously read the MPPT block and publish all channel values to an MQTT broker.
    Mqtt {
        /// The configuration file for the MQTT broker
        #[arg(long, default_value_t = MqttConfig::DEFAULT_CONFIG_FILE.to_string())]
        config_file: String,
    },
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum CliCommands {
    /// Run in daemon mode: continuously poll the MPPT block at a specified interval.
    /// Channel groups follow the number of modules reported by the device.
    /// Output can be directed to stdout or an MQTT broker.
    #[clap(verbatim_doc_comment)]
    Daemon {
        /// Interval for polling the device (e.g., "10s", "1m")
        #[arg(value_parser = humantime::parse_duration, short, long, default_value = "10sec", verbatim_doc_comment)]
        poll_interval: Duration,

        /// Specifies the output.
        #[command(subcommand)]
        output: DaemonOutput,
    },

    /// Read the MPPT block once and display its header and raw module records.
    Read,

    /// Read the MPPT block once and display the scaled value of every module channel.
    ReadChannels,
}

const fn about_text() -> &'static str {
    "SunSpec MPPT collector - Read SunSpec Multiple MPPT (model 160) blocks via Modbus RTU/TCP."
}

#[derive(Parser, Debug)]
#[command(name="mpptcol", author, version, about=about_text(), long_about = None, propagate_version = true)]
pub struct CliArgs {
    /// Configure verbosity of logging output.
    /// -v for info, -vv for debug, -vvv for trace. Default is warnings only.
    #[command(flatten)]
    pub verbose: Verbosity<WarnLevel>,

    /// Specifies the connection method and device-specific commands.
    #[command(subcommand)]
    pub connection: CliConnection,

    /// Modbus I/O timeout for read operations.
    /// Examples: "1s", "500ms".
    #[arg(global = true, long, default_value = "1s", value_parser = humantime::parse_duration, verbatim_doc_comment)]
    pub timeout: Duration,

    /// Minimum delay between multiple Modbus commands sent to the same device.
    /// Important for Modbus RTU, especially with USB-to-RS485 converters that need time
    /// to switch between transmitting (TX) and receiving (RX) modes.
    /// Examples: "50ms", "100ms".
    #[arg(global = true, long, default_value = "50ms", value_parser = humantime::parse_duration, verbatim_doc_comment)]
    pub delay: Duration,
}
