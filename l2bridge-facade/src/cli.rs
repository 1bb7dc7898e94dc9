//! CLI configuration for the `l2bridge-facade` loopback demo.
//!
//! Usage:
//!   l2bridge-facade [--psm 4097] [--peer AA:BB:CC:DD:EE:FF] [--mode basic] [--payload 010203]

use std::str::FromStr;
use std::time::Duration;

use clap::{Parser, ValueEnum};

use l2bridge_domain::{PeerAddress, Psm, RetransmissionMode};
use l2bridge_facade::FacadeConfig;

// ---------------------------------------------------------------------------
// Cli
// ---------------------------------------------------------------------------

#[derive(Debug, Parser)]
#[command(
    name = "l2bridge-facade",
    about = "Run one register / open / send / close loopback against the channel simulator"
)]
pub struct Cli {
    // ---
    /// Psm to register the dynamic channel service on.
    #[arg(long, default_value_t = 0x1001)]
    pub psm: u16,

    /// Remote device address.
    #[arg(long, default_value = "AA:BB:CC:DD:EE:FF")]
    pub peer: PeerAddress,

    #[arg(long, value_enum, default_value_t = ModeArg::Basic)]
    pub mode: ModeArg,

    /// Payload to send, as hex.
    #[arg(long, default_value = "010203")]
    pub payload: HexPayload,

    /// Bound on waiting for a channel, in milliseconds.
    #[arg(long, default_value_t = 2_000)]
    pub channel_wait_ms: u64,

    /// Bound on a single send hand-off, in milliseconds.
    #[arg(long, default_value_t = 500)]
    pub send_wait_ms: u64,

    /// Report open/close timeouts as errors instead of only logging them.
    #[arg(long)]
    pub strict_timeouts: bool,
}

// ---

impl Cli {
    // ---
    pub fn psm(&self) -> Psm {
        Psm::new(self.psm)
    }

    /// Retransmission mode as carried in a set-dynamic-channel request.
    pub fn mode_wire(&self) -> i32 {
        RetransmissionMode::from(self.mode).as_i32()
    }

    pub fn facade_config(&self) -> FacadeConfig {
        FacadeConfig::default()
            .with_channel_wait(Duration::from_millis(self.channel_wait_ms))
            .with_send_wait(Duration::from_millis(self.send_wait_ms))
            .with_strict_timeouts(self.strict_timeouts)
    }
}

// ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ModeArg {
    // ---
    Basic,
    /// Enhanced retransmission mode.
    Ertm,
}

impl From<ModeArg> for RetransmissionMode {
    fn from(mode: ModeArg) -> Self {
        match mode {
            ModeArg::Basic => RetransmissionMode::Basic,
            ModeArg::Ertm => RetransmissionMode::EnhancedRetransmission,
        }
    }
}

// ---

/// Byte string given on the command line as hex digits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HexPayload(pub Vec<u8>);

impl FromStr for HexPayload {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_hex(s).map(Self)
    }
}

fn parse_hex(s: &str) -> Result<Vec<u8>, String> {
    // ---
    if s.len() % 2 != 0 {
        return Err(format!("hex payload {s:?} has an odd number of digits"));
    }
    (0..s.len())
        .step_by(2)
        .map(|i| {
            s.get(i..i + 2)
                .and_then(|pair| u8::from_str_radix(pair, 16).ok())
                .ok_or_else(|| format!("hex payload {s:?} has an invalid byte at offset {i}"))
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
