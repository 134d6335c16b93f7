use clap::{Parser, Subcommand};
use std::ops::Deref;
use std::str::FromStr;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum HexFrameError {
    #[error("invalid hex frame: {0}")]
    BadHex(#[from] hex::FromHexError),
}

/// A byte string given on the command line as hex, with optional
/// whitespace or ':' separators.
#[derive(Debug, Clone)]
pub struct HexBytes(Vec<u8>);

impl Deref for HexBytes {
    type Target = Vec<u8>;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl FromStr for HexBytes {
    type Err = HexFrameError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let compact: String = input
            .chars()
            .filter(|c| !c.is_whitespace() && *c != ':')
            .collect();
        Ok(HexBytes(hex::decode(compact)?))
    }
}

fn parse_with_radix<T>(input: &str) -> Result<T, T::FromStrRadixErr>
where
    T: num::Num,
    <T as num::Num>::FromStrRadixErr: std::error::Error + Send + Sync,
{
    if input.starts_with("0x") {
        T::from_str_radix(input.trim_start_matches("0x"), 16)
    } else if input.starts_with("0b") {
        T::from_str_radix(input.trim_start_matches("0b"), 2)
    } else {
        T::from_str_radix(input, 10)
    }
}

#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
pub struct Cli {
    /// Skip sanity checks
    #[clap(long, short)]
    pub force: bool,

    /// Enable debug output
    #[clap(long, short)]
    pub debug: bool,

    /// UART device or 'auto'
    #[clap(long, short, default_value = "auto")]
    pub port: String,

    /// UART baud rate
    #[clap(long, short, default_value_t = 9600)]
    pub baudrate: u32,

    /// Station ID (last two digits of the device serial)
    #[clap(long, short = 's', default_value = "0x61", parse(try_from_str=parse_with_radix))]
    pub station_id: u8,

    /// Response deadline per poll cycle, milliseconds
    #[clap(long, short = 't', default_value_t = 500)]
    pub timeout_ms: u64,

    /// Use json-formatted output
    #[clap(long, short)]
    pub json: bool,

    #[clap(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Poll the inverter once and print one record
    Read,

    /// Poll the inverter on a fixed interval
    Watch {
        /// Poll interval, milliseconds
        #[clap(long, short, default_value_t = 10000)]
        interval_ms: u64,

        /// Number of cycles, 0 for no limit
        #[clap(long, short, default_value_t = 0)]
        count: u64,
    },

    /// Decode a 32-byte response frame given as hex
    Decode { frame: HexBytes },

    /// List documented fault bits
    ListFaults,
}
