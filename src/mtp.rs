//! The MTP3 transport contract (§6.1).
//!
//! This crate does not implement MTP layers 1-3. SCCP is handed an
//! [`Mtp3Transport`] to send MSUs through and registers an [`Mtp3User`]
//! callback to receive them; both sides of the contract are abstract so any
//! MTP3 provider (M3UA-over-SCTP, a native SS7 link, a test double) can sit
//! underneath without this crate knowing about it.

use crate::types::{NetworkIndicator, PointCode, RouteState};
use async_trait::async_trait;
use bytes::Bytes;

/// Outcome of handing an MSU to the transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MtpDeliveryResult {
    /// Accepted for transmission.
    Accepted,
    /// Rejected because the destination is currently prohibited.
    Prohibited,
    /// Rejected because the destination route is congested.
    Congested,
}

/// What SCCP asks of the layer underneath it.
#[async_trait]
pub trait Mtp3Transport: Send + Sync {
    /// Hand an MSU payload to MTP3 for transmission toward `dpc`.
    async fn transmit_msu(
        &self,
        ni: NetworkIndicator,
        opc: PointCode,
        dpc: PointCode,
        sls: u8,
        payload: Bytes,
    ) -> MtpDeliveryResult;

    /// Current reachability of a destination point code, as MTP3 sees it.
    fn route_state(&self, dpc: PointCode) -> RouteState;

    /// Maximum MSU payload length MTP3 can carry toward `dpc`, used by
    /// segmentation's `getMaxDataLen` arithmetic (§4.3).
    fn route_max_length(&self, dpc: PointCode) -> usize;
}

/// What MTP3 calls into when it has something for SCCP.
#[async_trait]
pub trait Mtp3User: Send + Sync {
    /// An MSU addressed to the SCCP service indicator arrived.
    async fn received_msu(
        &self,
        ni: NetworkIndicator,
        opc: PointCode,
        dpc: PointCode,
        sls: u8,
        payload: Bytes,
    );

    /// MTP3 signalled that `dpc` became unreachable (User Part
    /// Unavailable), carrying the unavailable user's identity.
    async fn received_upu(&self, dpc: PointCode, user: u8, cause: u8);

    /// MTP3 signalled a route-set state change toward `dpc`.
    async fn route_state_changed(&self, dpc: PointCode, state: RouteState);
}
