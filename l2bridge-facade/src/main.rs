//! l2bridge facade demo.
//!
//! Drives one loopback scenario through the remote-call surface against the
//! in-process channel simulator and prints every observed event to stdout as
//! a JSON line. Logs go to stderr.
//!
//! Usage:
//!   l2bridge-facade --psm 42 --peer AA:BB:CC:DD:EE:FF --payload 010203

use std::sync::Arc;
use std::time::Duration;

// ---

use anyhow::Context;
use clap::Parser;
use serde::Serialize;
use tokio::runtime::Handle;
use tracing::info;
use tracing_subscriber::EnvFilter;

// ---

use l2bridge_domain::{
    // ---
    ChannelManager,
    ConnectionClosed,
    ConnectionOpened,
    Dispatcher,
    InboundPacket,
    Psm,
};
use l2bridge_facade::{
    // ---
    CancellationToken,
    ClassicFacade,
    ClassicFacadeSyncHandler,
    CloseChannelRequest,
    DynamicChannelPacket,
    OpenChannelRequest,
    SetEnableDynamicChannelRequest,
};
use l2bridge_sim::{SimChannelManager, SimConfig};

// ---

mod cli;

use cli::Cli;

// ---------------------------------------------------------------------------
// Output
// ---------------------------------------------------------------------------

/// One stdout line per observed event.
#[derive(Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
enum Line<'a> {
    // ---
    Opened(&'a ConnectionOpened),
    Sent { psm: Psm, payload: &'a [u8] },
    Data(&'a InboundPacket),
    Closed(&'a ConnectionClosed),
}

fn emit(line: &Line<'_>) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string(line)?);
    Ok(())
}

// ---------------------------------------------------------------------------
// main
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // ---

    let cli = Cli::parse();

    let no_color = std::env::var("EMACS").is_ok()
        || std::env::var("NO_COLOR").is_ok()
        || !std::io::IsTerminal::is_terminal(&std::io::stderr());

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .with_ansi(!no_color)
        .with_writer(std::io::stderr)
        .init();

    info!(
        version = env!("CARGO_PKG_VERSION"),
        psm = %cli.psm(),
        peer = %cli.peer,
        "l2bridge-facade starting",
    );

    let dispatcher = Dispatcher::spawn("l2bridge-dispatch")?;
    let sim = SimChannelManager::new(SimConfig::responsive());
    let manager: Arc<dyn ChannelManager> = sim.clone();
    let facade = ClassicFacade::new(manager, dispatcher, Handle::current(), cli.facade_config());

    // The facade blocks; keep it off the async workers.
    tokio::task::spawn_blocking(move || run_loopback(&facade, &sim, &cli)).await??;

    info!("loopback complete");
    Ok(())
}

// ---------------------------------------------------------------------------
// Scenario
// ---------------------------------------------------------------------------

fn run_loopback(facade: &ClassicFacade, sim: &SimChannelManager, cli: &Cli) -> anyhow::Result<()> {
    // ---
    let psm = cli.psm();
    let wire_psm = u32::from(psm.value());
    let wait = facade.config().channel_wait + Duration::from_millis(500);

    let cancel = CancellationToken::new();
    let mut opened = facade.handle_fetch_connection_complete(cancel.clone())?;
    let mut closed = facade.handle_fetch_connection_close(cancel.clone())?;
    let mut data = facade.handle_fetch_l2cap_data(cancel.clone())?;

    facade.handle_set_dynamic_channel(SetEnableDynamicChannelRequest {
        psm: wire_psm,
        retransmission_mode: cli.mode_wire(),
    })?;

    facade.handle_open_channel(OpenChannelRequest {
        psm: wire_psm,
        remote: cli.peer.to_string(),
    })?;
    let event = opened
        .next_timeout(wait)
        .context("no connection-complete event")?;
    emit(&Line::Opened(&event))?;

    // --- outbound, then loop the emitted frame back as inbound data

    facade.handle_send_dynamic_channel_packet(DynamicChannelPacket {
        psm: wire_psm,
        payload: cli.payload.0.clone(),
    })?;

    let control = sim.channel(psm).context("simulator holds no channel")?;
    let frame = control
        .recv_sent(wait)
        .context("simulator saw no outbound frame")?;
    emit(&Line::Sent {
        psm,
        payload: &frame,
    })?;

    control.deliver(frame);
    let event = data.next_timeout(wait).context("no l2cap-data event")?;
    emit(&Line::Data(&event))?;

    // --- close

    facade.handle_close_channel(CloseChannelRequest { psm: wire_psm })?;
    let event = closed
        .next_timeout(wait)
        .context("no connection-close event")?;
    emit(&Line::Closed(&event))?;

    cancel.cancel();
    Ok(())
}
