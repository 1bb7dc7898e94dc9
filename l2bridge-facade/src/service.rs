//! Remote-call surface for the classic dynamic channel facade.
//!
//! Transports call these methods synchronously on their own threads. Each
//! handler converts the wire request to domain types, delegates to
//! [`ClassicFacade`] and maps failures to a wire [`Status`].

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use l2bridge_domain::{
    // ---
    ConnectionClosed,
    ConnectionOpened,
    InboundPacket,
    PeerAddress,
    Psm,
    RetransmissionMode,
};

// ---

use crate::event_relay::RelayStream;
use crate::{ClassicFacade, FacadeError, Status};

// ---------------------------------------------------------------------------
// Wire requests
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SetEnableDynamicChannelRequest {
    // ---
    pub psm: u32,
    /// 0 = basic, 1 = enhanced retransmission.
    pub retransmission_mode: i32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpenChannelRequest {
    // ---
    pub psm: u32,
    /// `AA:BB:CC:DD:EE:FF`
    pub remote: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CloseChannelRequest {
    // ---
    pub psm: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DynamicChannelPacket {
    // ---
    pub psm: u32,
    pub payload: Vec<u8>,
}

// ---

fn psm_from_wire(psm: u32) -> Result<Psm, FacadeError> {
    u16::try_from(psm)
        .map(Psm::new)
        .map_err(|_| FacadeError::InvalidPsm(psm))
}

// ---------------------------------------------------------------------------
// ClassicFacadeSyncHandler
// ---------------------------------------------------------------------------

/// Synchronous service contract. Every call returns an ack or a [`Status`].
pub trait ClassicFacadeSyncHandler {
    // ---
    fn handle_set_dynamic_channel(&self, req: SetEnableDynamicChannelRequest) -> Result<(), Status>;

    fn handle_open_channel(&self, req: OpenChannelRequest) -> Result<(), Status>;

    fn handle_close_channel(&self, req: CloseChannelRequest) -> Result<(), Status>;

    fn handle_send_dynamic_channel_packet(&self, req: DynamicChannelPacket) -> Result<(), Status>;

    fn handle_fetch_connection_complete(
        &self,
        cancel: CancellationToken,
    ) -> Result<RelayStream<ConnectionOpened>, Status>;

    fn handle_fetch_connection_close(
        &self,
        cancel: CancellationToken,
    ) -> Result<RelayStream<ConnectionClosed>, Status>;

    fn handle_fetch_l2cap_data(
        &self,
        cancel: CancellationToken,
    ) -> Result<RelayStream<InboundPacket>, Status>;
}

// ---------------------------------------------------------------------------
// ClassicFacadeSyncHandler impl
// ---------------------------------------------------------------------------

impl ClassicFacadeSyncHandler for ClassicFacade {
    // ---

    fn handle_set_dynamic_channel(&self, req: SetEnableDynamicChannelRequest) -> Result<(), Status> {
        // ---
        tracing::debug!(psm = req.psm, mode = req.retransmission_mode, "set_dynamic_channel");

        let psm = psm_from_wire(req.psm)?;
        let mode = RetransmissionMode::from_i32(req.retransmission_mode).map_err(FacadeError::from)?;
        Ok(self.register_service(psm, mode)?)
    }

    // ---

    fn handle_open_channel(&self, req: OpenChannelRequest) -> Result<(), Status> {
        // ---
        tracing::debug!(psm = req.psm, remote = %req.remote, "open_channel");

        let psm = psm_from_wire(req.psm)?;
        if !self.is_registered(psm) {
            return Err(FacadeError::NotRegistered(psm).into());
        }
        let address: PeerAddress = req.remote.parse().map_err(FacadeError::from)?;
        Ok(self.open_channel(psm, address)?)
    }

    // ---

    fn handle_close_channel(&self, req: CloseChannelRequest) -> Result<(), Status> {
        // ---
        tracing::debug!(psm = req.psm, "close_channel");

        let psm = psm_from_wire(req.psm)?;
        Ok(self.close_channel(psm)?)
    }

    // ---

    fn handle_send_dynamic_channel_packet(&self, req: DynamicChannelPacket) -> Result<(), Status> {
        // ---
        tracing::debug!(psm = req.psm, bytes = req.payload.len(), "send_dynamic_channel_packet");

        let psm = psm_from_wire(req.psm)?;
        Ok(self.send_packet(psm, req.payload)?)
    }

    // ---

    fn handle_fetch_connection_complete(
        &self,
        cancel: CancellationToken,
    ) -> Result<RelayStream<ConnectionOpened>, Status> {
        tracing::debug!("fetch_connection_complete");
        Ok(self.fetch_connection_opened(cancel)?)
    }

    fn handle_fetch_connection_close(
        &self,
        cancel: CancellationToken,
    ) -> Result<RelayStream<ConnectionClosed>, Status> {
        tracing::debug!("fetch_connection_close");
        Ok(self.fetch_connection_closed(cancel)?)
    }

    fn handle_fetch_l2cap_data(
        &self,
        cancel: CancellationToken,
    ) -> Result<RelayStream<InboundPacket>, Status> {
        tracing::debug!("fetch_l2cap_data");
        Ok(self.fetch_inbound_data(cancel)?)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
