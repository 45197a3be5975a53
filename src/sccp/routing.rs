//! `SccpCore`: the send/receive/routing core tying the codec, GTT,
//! segmentation, and management sub-modules to an [`Mtp3Transport`] (§4.4,
//! §6.1, §6.5).
//!
//! Grounded in the teacher's `SccpEndpoint::send_udt`/`recv` shape: a single
//! entry point resolves a destination, picks a wire shape, and hands bytes
//! to the layer underneath; `receive` mirrors it on the way back up.

use super::address::SccpAddress;
use super::codec;
use super::gtt::{GlobalTitleTranslator, GttRoute};
use super::management::{
    ManagementMessage, ManagementNotification, ManagementTransmitter, ManagementUser,
    SccpManagement,
};
use super::messages::{MessageType, ReturnCause, SccpMessage};
use super::segmentation::{self, max_data_len, ReassemblyKey, ReassemblyOutcome, ReassemblyTable};
use crate::config::{ManagementConfig, SccpConfig};
use crate::errors::SccpError;
use crate::mtp::{Mtp3Transport, Mtp3User};
use crate::types::{NetworkIndicator, PointCode, PointCodeType, ProtocolClass, RouteState};
use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use rand::Rng;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, instrument, warn};

/// Result of handing connectionless data to the registered [`SccpUser`]
/// (§6.2: `receivedData(payload, params) -> {Accepted, Rejected,
/// Unequipped, Failure}`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryOutcome {
    Accepted,
    Rejected,
    Unequipped,
    Failure,
}

/// Upper-layer callback for inbound user data and returned-service notices
/// (§6.2's `sccpNotify`/data-indication shape).
#[async_trait]
pub trait SccpUser: Send + Sync {
    async fn received_data(
        &self,
        msg_type: MessageType,
        called: SccpAddress,
        calling: SccpAddress,
        data: Bytes,
    ) -> DeliveryOutcome;

    async fn received_notice(&self, cause: ReturnCause, original_data: Bytes);
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct SccpCounters {
    pub sent: u64,
    pub received: u64,
    pub dropped: u64,
    pub returned: u64,
    pub reassembly_pending: usize,
}

/// The SCCP protocol instance for one local point code/SSN pair.
pub struct SccpCore {
    variant: PointCodeType,
    local_pc: PointCode,
    config: SccpConfig,
    mtp: Arc<dyn Mtp3Transport>,
    gtt: Arc<dyn GlobalTitleTranslator>,
    pub management: Arc<SccpManagement>,
    reassembly: ReassemblyTable,
    user: RwLock<Option<Arc<dyn SccpUser>>>,
    /// Other local SCCP instances in the host engine, keyed by the name a
    /// [`GttRoute::local_sccp`] may carry (§4.4 local hand-off).
    peers: DashMap<String, Arc<SccpCore>>,
    sent: AtomicU64,
    received: AtomicU64,
    dropped: AtomicU64,
    returned: AtomicU64,
    gtt_attempts: AtomicU64,
    gtt_failures: AtomicU64,
    errors: AtomicU64,
    print_messages: std::sync::atomic::AtomicBool,
    /// Return counts archived by message type name, e.g. `"Udts"` (§6.5
    /// `full-status`'s per-message-type dump).
    return_by_type: DashMap<String, u64>,
    /// Return counts archived by `ReturnCause`.
    return_by_cause: DashMap<ReturnCause, u64>,
    /// Set by [`SccpCore::set_exiting`]; new dispatch is dropped once set
    /// (§5 "Cancellation": "The SCCP exits by setting `m_exiting` ...
    /// or to drop the message").
    exiting: std::sync::atomic::AtomicBool,
}

/// What a GTT lookup resolved the called party to: either another point
/// code reachable over MTP, or a sibling SCCP instance to hand the message
/// to directly (§4.4).
enum RouteDecision {
    Remote(PointCode),
    LocalHandoff(Arc<SccpCore>, GttRoute),
}

impl SccpCore {
    pub fn new(
        variant: PointCodeType,
        local_pc: PointCode,
        config: SccpConfig,
        management_config: &ManagementConfig,
        mtp: Arc<dyn Mtp3Transport>,
        gtt: Arc<dyn GlobalTitleTranslator>,
    ) -> Self {
        let management = Arc::new(SccpManagement::with_extended_monitoring(
            variant,
            local_pc,
            management_config.sst_initial_interval(),
            management_config.sst_max_interval(),
            std::time::Duration::from_millis(management_config.coordination_timer_ms),
            std::time::Duration::from_millis(management_config.ignore_tests_interval_ms),
            management_config.extended_monitoring,
        ));
        Self {
            variant,
            local_pc,
            reassembly: ReassemblyTable::new(config.reassembly_timeout()),
            config,
            mtp,
            gtt,
            management,
            user: RwLock::new(None),
            peers: DashMap::new(),
            sent: AtomicU64::new(0),
            received: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
            returned: AtomicU64::new(0),
            gtt_attempts: AtomicU64::new(0),
            gtt_failures: AtomicU64::new(0),
            errors: AtomicU64::new(0),
            print_messages: std::sync::atomic::AtomicBool::new(false),
            return_by_type: DashMap::new(),
            return_by_cause: DashMap::new(),
            exiting: std::sync::atomic::AtomicBool::new(false),
        }
    }

    /// Begin shutdown: new sends are refused and inbound traffic is
    /// dropped (§5). Outstanding reassembly state is left to expire on
    /// its own; nothing here tears down the MTP transport.
    pub fn set_exiting(&self) {
        self.exiting.store(true, Ordering::Relaxed);
    }

    pub fn exiting(&self) -> bool {
        self.exiting.load(Ordering::Relaxed)
    }

    pub async fn register_user(&self, user: Arc<dyn SccpUser>) {
        *self.user.write().await = Some(user);
    }

    /// Register another local SCCP instance under `name` so that a GTT
    /// route naming it in [`GttRoute::local_sccp`] can be handed the
    /// message directly, bypassing MTP entirely (§4.4).
    pub fn register_peer(&self, name: impl Into<String>, peer: Arc<SccpCore>) {
        self.peers.insert(name.into(), peer);
    }

    /// The address this instance presents as the calling party, built per
    /// `SccpConfig` (GT-addressed if a global title is configured, PC+SSN
    /// otherwise).
    pub fn local_address(&self) -> SccpAddress {
        if let Some(_gt_digits) = &self.config.global_title {
            let gt = super::address::GlobalTitle::e164(
                self.config.global_title.as_deref().unwrap_or(""),
            );
            super::address::SccpAddress::from_gt(gt, self.variant, Some(self.config.local_ssn))
        } else {
            super::address::SccpAddress::from_ssn_pc(self.config.local_ssn, self.local_pc)
        }
    }

    pub fn counters(&self) -> SccpCounters {
        SccpCounters {
            sent: self.sent.load(Ordering::Relaxed),
            received: self.received.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            returned: self.returned.load(Ordering::Relaxed),
            reassembly_pending: self.reassembly.len(),
        }
    }

    fn resolve_route(&self, called: &SccpAddress, calling: &SccpAddress) -> Result<RouteDecision, SccpError> {
        if let Some(pc) = called.point_code {
            return Ok(RouteDecision::Remote(pc));
        }
        self.gtt_attempts.fetch_add(1, Ordering::Relaxed);
        let route = match self.gtt.route_gt(called, Some(calling)) {
            Some(route) => route,
            None => {
                self.gtt_failures.fetch_add(1, Ordering::Relaxed);
                return Err(SccpError::NoTranslation);
            }
        };
        if let Some(name) = route.local_sccp.clone() {
            let peer = self
                .peers
                .get(&name)
                .map(|entry| entry.value().clone())
                .ok_or(SccpError::NoTranslation)?;
            return Ok(RouteDecision::LocalHandoff(peer, route));
        }
        match route.point_code {
            Some(pc) => Ok(RouteDecision::Remote(pc)),
            None => {
                self.gtt_failures.fetch_add(1, Ordering::Relaxed);
                Err(SccpError::NoTranslation)
            }
        }
    }

    /// Rewrite the called/calling addresses for a local hand-off and
    /// re-enter the target instance's own `send` (§4.4: "handed off ...
    /// without touching MTP"). The destination point code, if the GTT
    /// route carried one, and any rewritten GT/SSN apply to the called
    /// party; the calling party's point code is cleared, since it no
    /// longer denotes a real MTP-reachable origin once the hop is local.
    async fn hand_off(
        &self,
        peer: Arc<SccpCore>,
        route: GttRoute,
        called: &SccpAddress,
        calling: &SccpAddress,
        data: Bytes,
        protocol_class: ProtocolClass,
    ) -> Result<(), SccpError> {
        let mut handed_called = called.clone();
        if let Some(pc) = route.point_code {
            handed_called.point_code = Some(pc);
        }
        if let Some(gt) = route.rewritten_global_title {
            handed_called.global_title = Some(gt);
        }
        if let Some(ssn) = route.rewritten_ssn {
            handed_called.subsystem_number = Some(ssn);
        }
        let mut handed_calling = calling.clone();
        handed_calling.point_code = None;

        metrics::counter!("sccp_local_handoff_total", 1);
        Box::pin(peer.send(&handed_called, &handed_calling, data, protocol_class)).await
    }

    /// Send user data, choosing UDT/XUDT/LUDT (and segmenting if needed)
    /// per the route's MTU (§4.3, §4.4).
    #[instrument(skip(self, data), fields(len = data.len()))]
    pub async fn send(
        &self,
        called: &SccpAddress,
        calling: &SccpAddress,
        data: Bytes,
        protocol_class: ProtocolClass,
    ) -> Result<(), SccpError> {
        if self.exiting() {
            return Err(SccpError::Mtp("SCCP instance is exiting".into()));
        }
        let dpc = match self.resolve_route(called, calling)? {
            RouteDecision::LocalHandoff(peer, route) => {
                return self.hand_off(peer, route, called, calling, data, protocol_class).await;
            }
            RouteDecision::Remote(pc) => pc,
        };

        match self.mtp.route_state(dpc) {
            RouteState::Prohibited => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                return Err(SccpError::NetworkCongestion);
            }
            RouteState::Congestion => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                return Err(SccpError::NetworkCongestion);
            }
            _ => {}
        }

        let mtu = self.mtp.route_max_length(dpc);
        let limits = max_data_len(mtu, called, calling);

        if data.len() <= limits.udt_max {
            let msg = SccpMessage::Udt {
                protocol_class,
                called_party: called.clone(),
                calling_party: calling.clone(),
                data,
            };
            return self.transmit(dpc, msg).await;
        }

        let chosen = segmentation::select_message_type(data.len(), limits);
        let per_segment = match chosen {
            MessageType::Xudt => limits.xudt_max,
            MessageType::Ludt => limits.ludt_max,
            _ => limits.xudt_max,
        };

        let build = |data: Bytes, protocol_class: ProtocolClass, segmentation: Option<crate::types::Segmentation>| {
            if chosen == MessageType::Ludt {
                SccpMessage::Ludt {
                    protocol_class,
                    hop_counter: self.config.hop_counter,
                    called_party: called.clone(),
                    calling_party: calling.clone(),
                    data,
                    segmentation,
                }
            } else {
                SccpMessage::Xudt {
                    protocol_class,
                    hop_counter: self.config.hop_counter,
                    called_party: called.clone(),
                    calling_party: calling.clone(),
                    data,
                    segmentation,
                }
            }
        };

        if data.len() <= per_segment {
            let msg = build(data, protocol_class, None);
            return self.transmit(dpc, msg).await;
        }

        for (chunk, seg) in segmentation::segment_payload(&data, per_segment, protocol_class)? {
            let pc = ProtocolClass { class: seg.class, return_on_error: protocol_class.return_on_error };
            let msg = build(chunk, pc, Some(seg));
            self.transmit(dpc, msg).await?;
        }
        Ok(())
    }

    async fn transmit(&self, dpc: PointCode, msg: SccpMessage) -> Result<(), SccpError> {
        if self.print_messages.load(Ordering::Relaxed) {
            tracing::info!(?msg, dpc = dpc.value(), "sending message");
        }
        let encoded = codec::encode(&msg, self.variant)?.freeze();
        let sls = rand::thread_rng().gen_range(0..=0x0F);
        let result = self
            .mtp
            .transmit_msu(NetworkIndicator::National, self.local_pc, dpc, sls, encoded)
            .await;
        match result {
            crate::mtp::MtpDeliveryResult::Accepted => {
                self.sent.fetch_add(1, Ordering::Relaxed);
                metrics::counter!("sccp_msu_sent_total", 1);
                Ok(())
            }
            crate::mtp::MtpDeliveryResult::Prohibited => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                metrics::counter!("sccp_msu_dropped_total", 1, "reason" => "prohibited");
                Err(SccpError::Mtp("destination prohibited".into()))
            }
            crate::mtp::MtpDeliveryResult::Congested => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                metrics::counter!("sccp_msu_dropped_total", 1, "reason" => "congested");
                Err(SccpError::NetworkCongestion)
            }
        }
    }

    /// Send a pre-built return-service message directly (used by the
    /// receive path and by management replies).
    async fn send_raw(&self, dpc: PointCode, msg: SccpMessage) {
        if let Err(err) = self.transmit(dpc, msg).await {
            warn!(?err, "failed to send return message");
        }
    }

    async fn reject_with_cause(
        &self,
        msg: SccpMessage,
        opc: PointCode,
        cause: ReturnCause,
    ) {
        self.returned.fetch_add(1, Ordering::Relaxed);
        match msg.into_service(cause, self.config.hop_counter) {
            Ok(service_msg) => {
                self.archive_return(&service_msg, cause);
                self.send_raw(opc, service_msg).await
            }
            Err(err) => debug!(?err, "no service variant for this message type, dropping"),
        }
    }

    /// Record a sent service message's type and cause for `full-status`
    /// (§6.5), mirroring `SS7SCCP::archiveMessage`.
    fn archive_return(&self, service_msg: &SccpMessage, cause: ReturnCause) {
        let type_name = format!("{:?}", service_msg.message_type());
        *self.return_by_type.entry(type_name).or_insert(0) += 1;
        *self.return_by_cause.entry(cause).or_insert(0) += 1;
    }

    /// Process one inbound MSU addressed to SCCP (§6.1's `receivedMSU`
    /// shape): management messages are handled in place, connectionless
    /// user data is reassembled if segmented and handed to the registered
    /// [`SccpUser`], anything else is rejected with a return-cause UDTS.
    #[instrument(skip(self, payload), fields(opc = opc.value(), dpc = dpc.value()))]
    pub async fn receive(&self, opc: PointCode, dpc: PointCode, payload: Bytes) {
        if self.exiting() {
            debug!("SCCP instance is exiting, dropping inbound MSU");
            return;
        }
        self.received.fetch_add(1, Ordering::Relaxed);

        let msg = match codec::decode(self.variant, &payload) {
            Ok(m) => m,
            Err(err) => {
                debug!(?err, "failed to decode inbound SCCP message");
                self.dropped.fetch_add(1, Ordering::Relaxed);
                self.errors.fetch_add(1, Ordering::Relaxed);
                return;
            }
        };
        if self.print_messages.load(Ordering::Relaxed) {
            tracing::info!(?msg, opc = opc.value(), "received message");
        }

        if let Some(called) = msg.called_party() {
            if called.subsystem_number == Some(crate::SSN_MANAGEMENT) {
                if let Some(data) = msg.data() {
                    match ManagementMessage::decode(self.variant, data.clone()) {
                        Ok(mgmt_msg) => {
                            if let Err(err) =
                                self.management.handle_message(mgmt_msg, self, self).await
                            {
                                debug!(?err, "management message rejected");
                            }
                        }
                        Err(err) => debug!(?err, "malformed management message"),
                    }
                }
                return;
            }
        }

        match msg {
            SccpMessage::Cr { .. } => {
                // Connection-oriented SCCP is out of scope; refuse it.
                self.send_raw(opc, SccpMessage::Cref { destination_local_reference: 0, refusal_cause: 0 })
                    .await;
            }
            SccpMessage::Udt { protocol_class, called_party, calling_party, data } => {
                self.deliver(opc, MessageType::Udt, protocol_class, called_party, calling_party, data).await;
            }
            SccpMessage::Udts { return_cause, data, .. } => {
                if let Some(user) = self.user.read().await.clone() {
                    user.received_notice(return_cause, data).await;
                }
            }
            SccpMessage::Xudt { protocol_class, called_party, calling_party, data, segmentation, hop_counter } => {
                if hop_counter == 0 {
                    self.dropped.fetch_add(1, Ordering::Relaxed);
                    self.errors.fetch_add(1, Ordering::Relaxed);
                    if protocol_class.return_on_error {
                        let msg = SccpMessage::Xudt {
                            protocol_class,
                            hop_counter,
                            called_party,
                            calling_party,
                            data,
                            segmentation,
                        };
                        self.reject_with_cause(msg, opc, ReturnCause::HopCounterViolation).await;
                    }
                    return;
                }
                self.handle_possibly_segmented(
                    opc,
                    MessageType::Xudt,
                    protocol_class,
                    called_party,
                    calling_party,
                    data,
                    segmentation,
                )
                .await;
            }
            SccpMessage::Ludt { protocol_class, called_party, calling_party, data, segmentation, hop_counter } => {
                if hop_counter == 0 {
                    self.dropped.fetch_add(1, Ordering::Relaxed);
                    self.errors.fetch_add(1, Ordering::Relaxed);
                    if protocol_class.return_on_error {
                        let msg = SccpMessage::Ludt {
                            protocol_class,
                            hop_counter,
                            called_party,
                            calling_party,
                            data,
                            segmentation,
                        };
                        self.reject_with_cause(msg, opc, ReturnCause::HopCounterViolation).await;
                    }
                    return;
                }
                self.handle_possibly_segmented(
                    opc,
                    MessageType::Ludt,
                    protocol_class,
                    called_party,
                    calling_party,
                    data,
                    segmentation,
                )
                .await;
            }
            SccpMessage::Xudts { return_cause, data, .. } | SccpMessage::Ludts { return_cause, data, .. } => {
                if let Some(user) = self.user.read().await.clone() {
                    user.received_notice(return_cause, data).await;
                }
            }
            SccpMessage::Cref { .. } => {}
        }
    }

    async fn handle_possibly_segmented(
        &self,
        opc: PointCode,
        msg_type: MessageType,
        protocol_class: ProtocolClass,
        called: SccpAddress,
        calling: SccpAddress,
        data: Bytes,
        segmentation: Option<crate::types::Segmentation>,
    ) {
        let Some(seg) = segmentation else {
            self.deliver(opc, msg_type, protocol_class, called, calling, data).await;
            return;
        };

        let key = ReassemblyKey {
            opc: opc.value(),
            dpc: self.local_pc.value(),
            calling_party_key: format!("{:?}-{:?}", calling.point_code, calling.subsystem_number),
            reference: seg.reference,
        };

        match self.reassembly.feed(key, seg, &data, protocol_class.return_on_error) {
            ReassemblyOutcome::Pending => {}
            ReassemblyOutcome::Complete { payload, message_return } => {
                let mut pc = protocol_class;
                pc.return_on_error = message_return;
                self.deliver(opc, msg_type, pc, called, calling, payload).await;
            }
            ReassemblyOutcome::Rejected { message_return, partial } => {
                warn!("reassembly rejected an out-of-order segment");
                self.dropped.fetch_add(1, Ordering::Relaxed);
                self.errors.fetch_add(1, Ordering::Relaxed);
                if !message_return {
                    return;
                }
                let msg = match msg_type {
                    MessageType::Xudt => SccpMessage::Xudt {
                        protocol_class,
                        hop_counter: self.config.hop_counter,
                        called_party: called,
                        calling_party: calling,
                        data: partial,
                        segmentation: None,
                    },
                    MessageType::Ludt => SccpMessage::Ludt {
                        protocol_class,
                        hop_counter: self.config.hop_counter,
                        called_party: called,
                        calling_party: calling,
                        data: partial,
                        segmentation: None,
                    },
                    _ => return,
                };
                self.reject_with_cause(msg, opc, ReturnCause::SegmentationFailure).await;
            }
        }
    }

    /// Hand connectionless data to the registered [`SccpUser`] and act on
    /// its verdict (§4.4 "subsystem failure" action, §8 scenario S6): a
    /// non-`Accepted` outcome always notifies management, and additionally
    /// returns a service message when the original carried `MessageReturn`
    /// (tracked as `protocol_class.return_on_error`).
    async fn deliver(
        &self,
        opc: PointCode,
        msg_type: MessageType,
        protocol_class: ProtocolClass,
        called: SccpAddress,
        calling: SccpAddress,
        data: Bytes,
    ) {
        let Some(user) = self.user.read().await.clone() else {
            debug!("no registered SccpUser, dropping inbound user data");
            return;
        };

        let ssn = called.subsystem_number.unwrap_or(0);
        let outcome = user
            .received_data(msg_type, called.clone(), calling.clone(), data.clone())
            .await;
        if outcome == DeliveryOutcome::Accepted {
            return;
        }

        self.management.on_subsystem_failure(ssn, self).await;

        if !protocol_class.return_on_error {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            return;
        }

        let cause = if outcome == DeliveryOutcome::Unequipped {
            ReturnCause::UnequippedUser
        } else {
            ReturnCause::SubsystemFailure
        };
        let msg = match msg_type {
            MessageType::Udt => {
                SccpMessage::Udt { protocol_class, called_party: called, calling_party: calling, data }
            }
            MessageType::Xudt => SccpMessage::Xudt {
                protocol_class,
                hop_counter: self.config.hop_counter,
                called_party: called,
                calling_party: calling,
                data,
                segmentation: None,
            },
            MessageType::Ludt => SccpMessage::Ludt {
                protocol_class,
                hop_counter: self.config.hop_counter,
                called_party: called,
                calling_party: calling,
                data,
                segmentation: None,
            },
            _ => return,
        };
        self.reject_with_cause(msg, opc, cause).await;
    }

    /// Driven by the single timer-tick thread (§5): sweeps reassembly
    /// entries past their deadline and advances management's SST/
    /// coordination backoff.
    pub async fn timer_tick(&self) {
        let expired = self.reassembly.expire();
        if expired > 0 {
            debug!(expired, "reassembly sweep dropped stale entries");
        }
        self.management.timer_tick(self).await;
    }

    /// Runs the single timer-tick loop for this instance until the
    /// process shuts down (§5: "a single timer tick thread invokes
    /// timerTick on the SCCP").
    pub async fn run_timer_tick_loop(self: Arc<Self>) {
        let interval = std::time::Duration::from_secs(1);
        loop {
            if self.exiting() {
                break;
            }
            tokio::time::sleep(interval).await;
            self.timer_tick().await;
        }
    }

    /// Management / diagnostics entry point (§6.5): `"status"` returns
    /// counters, `"reassembly"` the pending-stream count.
    pub fn control(&self, command: &str) -> serde_json::Value {
        match command {
            "status" => serde_json::json!({
                "local_pc": self.local_pc.value(),
                "variant": format!("{:?}", self.variant),
                "counters": self.counters(),
                "sst_active": self.management.sst_count(),
            }),
            "full-status" => {
                if !self.management.extended_monitoring() {
                    return serde_json::json!({
                        "error": "extended monitoring disabled, full-status unavailable",
                    });
                }
                serde_json::json!({
                    "local_pc": self.local_pc.value(),
                    "variant": format!("{:?}", self.variant),
                    "counters": self.counters(),
                    "sst_active": self.management.sst_count(),
                    "errors": self.errors.load(Ordering::Relaxed),
                    "gtt_attempts": self.gtt_attempts.load(Ordering::Relaxed),
                    "gtt_failures": self.gtt_failures.load(Ordering::Relaxed),
                    "subsystem_failures": self.management.subsystem_failure_count(),
                    "unknown_subsystems": self.management.unknown_subsystems(),
                    "return_by_type": self.return_by_type.iter().map(|e| (e.key().clone(), *e.value())).collect::<std::collections::BTreeMap<_, _>>(),
                    "return_by_cause": self.return_by_cause.iter().map(|e| (format!("{:?}", e.key()), *e.value())).collect::<std::collections::BTreeMap<_, _>>(),
                })
            }
            "enable-extended-monitoring" => {
                self.management.set_extended_monitoring(true);
                serde_json::json!({ "ok": true })
            }
            "disable-extended-monitoring" => {
                self.management.set_extended_monitoring(false);
                serde_json::json!({ "ok": true })
            }
            "enable-print-messages" => {
                self.print_messages.store(true, Ordering::Relaxed);
                serde_json::json!({ "ok": true })
            }
            "disable-print-messages" => {
                self.print_messages.store(false, Ordering::Relaxed);
                serde_json::json!({ "ok": true })
            }
            other => serde_json::json!({ "error": format!("unknown command {other}") }),
        }
    }
}

#[async_trait]
impl Mtp3User for SccpCore {
    async fn received_msu(
        &self,
        _ni: NetworkIndicator,
        opc: PointCode,
        dpc: PointCode,
        _sls: u8,
        payload: Bytes,
    ) {
        self.receive(opc, dpc, payload).await;
    }

    async fn received_upu(&self, dpc: PointCode, _user: u8, _cause: u8) {
        self.management.on_route_state_changed(dpc, RouteState::Prohibited, self).await;
    }

    async fn route_state_changed(&self, dpc: PointCode, state: RouteState) {
        self.management.on_route_state_changed(dpc, state, self).await;
    }
}

#[async_trait]
impl ManagementUser for SccpCore {
    async fn management_notify(&self, notification: ManagementNotification) {
        debug!(?notification, "management notification");
    }
}

#[async_trait]
impl ManagementTransmitter for SccpCore {
    async fn send_management(&self, dpc: PointCode, msg: ManagementMessage) {
        let called = SccpAddress::from_ssn_pc(crate::SSN_MANAGEMENT, dpc);
        let calling = SccpAddress::from_ssn_pc(crate::SSN_MANAGEMENT, self.local_pc);
        let sccp_msg = SccpMessage::Udt {
            protocol_class: ProtocolClass::CLASS_0,
            called_party: called,
            calling_party: calling,
            data: msg.encode().freeze(),
        };
        self.send_raw(dpc, sccp_msg).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sccp::gtt::PrefixGtt;
    use crate::types::PointCode;
    use tokio::sync::Mutex;

    struct FakeMtp {
        sent: Mutex<Vec<Bytes>>,
        state: RouteState,
        mtu: usize,
    }

    #[async_trait]
    impl Mtp3Transport for FakeMtp {
        async fn transmit_msu(
            &self,
            _ni: NetworkIndicator,
            _opc: PointCode,
            _dpc: PointCode,
            _sls: u8,
            payload: Bytes,
        ) -> crate::mtp::MtpDeliveryResult {
            self.sent.lock().await.push(payload);
            crate::mtp::MtpDeliveryResult::Accepted
        }

        fn route_state(&self, _dpc: PointCode) -> RouteState {
            self.state
        }

        fn route_max_length(&self, _dpc: PointCode) -> usize {
            self.mtu
        }
    }

    fn core(mtp: Arc<FakeMtp>) -> SccpCore {
        SccpCore::new(
            PointCodeType::Itu,
            PointCode::itu(1, 0, 1),
            SccpConfig::default(),
            &ManagementConfig::default(),
            mtp,
            Arc::new(PrefixGtt::new()),
        )
    }

    #[tokio::test]
    async fn small_payload_goes_out_as_a_single_udt() {
        let mtp = Arc::new(FakeMtp { sent: Mutex::new(Vec::new()), state: RouteState::Allowed, mtu: 272 });
        let sccp = core(mtp.clone());
        let called = SccpAddress::from_ssn_pc(8, PointCode::itu(1, 0, 2));
        let calling = sccp.local_address();
        sccp.send(&called, &calling, Bytes::from_static(b"hi"), ProtocolClass::CLASS_0).await.unwrap();
        assert_eq!(mtp.sent.lock().await.len(), 1);
        assert_eq!(sccp.counters().sent, 1);
    }

    #[tokio::test]
    async fn prohibited_route_is_rejected_without_transmitting() {
        let mtp = Arc::new(FakeMtp { sent: Mutex::new(Vec::new()), state: RouteState::Prohibited, mtu: 272 });
        let sccp = core(mtp.clone());
        let called = SccpAddress::from_ssn_pc(8, PointCode::itu(1, 0, 2));
        let calling = sccp.local_address();
        let err = sccp.send(&called, &calling, Bytes::from_static(b"hi"), ProtocolClass::CLASS_0).await.unwrap_err();
        assert!(matches!(err, SccpError::NetworkCongestion));
        assert!(mtp.sent.lock().await.is_empty());
    }

    #[tokio::test]
    async fn gtt_route_naming_a_local_peer_hands_off_without_touching_mtp() {
        let mtp_a = Arc::new(FakeMtp { sent: Mutex::new(Vec::new()), state: RouteState::Allowed, mtu: 272 });
        let mtp_b = Arc::new(FakeMtp { sent: Mutex::new(Vec::new()), state: RouteState::Allowed, mtu: 272 });

        let gtt_a = Arc::new(PrefixGtt::new());
        let remote_pc = PointCode::itu(7, 7, 7);
        gtt_a.add_rule(
            "123",
            GttRoute { point_code: Some(remote_pc), local_sccp: Some("b".into()), ..Default::default() },
        );

        let sccp_a = Arc::new(SccpCore::new(
            PointCodeType::Itu,
            PointCode::itu(1, 0, 1),
            SccpConfig::default(),
            &ManagementConfig::default(),
            mtp_a.clone(),
            gtt_a,
        ));
        let sccp_b = Arc::new(SccpCore::new(
            PointCodeType::Itu,
            PointCode::itu(2, 0, 2),
            SccpConfig::default(),
            &ManagementConfig::default(),
            mtp_b.clone(),
            Arc::new(PrefixGtt::new()),
        ));
        sccp_a.register_peer("b", sccp_b.clone());

        let called = SccpAddress::from_gt(
            crate::sccp::address::GlobalTitle::e164("123"),
            PointCodeType::Itu,
            Some(6),
        );
        let calling = sccp_a.local_address();

        sccp_a.send(&called, &calling, Bytes::from_static(b"hi"), ProtocolClass::CLASS_0).await.unwrap();

        // A never touches MTP; the hand-off re-enters B's own send, which
        // resolves the rewritten point code and transmits over B's MTP.
        assert!(mtp_a.sent.lock().await.is_empty());
        assert_eq!(mtp_b.sent.lock().await.len(), 1);
        assert_eq!(sccp_b.counters().sent, 1);
    }

    struct RejectingUser {
        outcome: DeliveryOutcome,
    }

    #[async_trait]
    impl SccpUser for RejectingUser {
        async fn received_data(
            &self,
            _msg_type: MessageType,
            _called: SccpAddress,
            _calling: SccpAddress,
            _data: Bytes,
        ) -> DeliveryOutcome {
            self.outcome
        }

        async fn received_notice(&self, _cause: ReturnCause, _original_data: Bytes) {}
    }

    #[tokio::test]
    async fn subsystem_rejection_with_message_return_produces_a_swapped_udts() {
        let mtp = Arc::new(FakeMtp { sent: Mutex::new(Vec::new()), state: RouteState::Allowed, mtu: 272 });
        let mut mgmt_cfg = ManagementConfig::default();
        mgmt_cfg.extended_monitoring = true;
        let sccp = SccpCore::new(
            PointCodeType::Itu,
            PointCode::itu(1, 0, 1),
            SccpConfig::default(),
            &mgmt_cfg,
            mtp.clone(),
            Arc::new(PrefixGtt::new()),
        );
        sccp.register_user(Arc::new(RejectingUser { outcome: DeliveryOutcome::Unequipped })).await;

        let originator = SccpAddress::from_ssn_pc(8, PointCode::itu(2, 0, 2));
        let local = sccp.local_address();
        let inbound = SccpMessage::Udt {
            protocol_class: ProtocolClass::CLASS_0.with_return_on_error(),
            called_party: local.clone(),
            calling_party: originator.clone(),
            data: Bytes::from_static(b"hi"),
        };
        let encoded = codec::encode(&inbound, PointCodeType::Itu).unwrap().freeze();

        sccp.receive(originator.point_code.unwrap(), local.point_code.unwrap(), encoded).await;

        let sent = mtp.sent.lock().await;
        assert_eq!(sent.len(), 1);
        let reply = codec::decode(PointCodeType::Itu, &sent[0]).unwrap();
        match reply {
            SccpMessage::Udts { return_cause, called_party, calling_party, .. } => {
                assert_eq!(return_cause, ReturnCause::UnequippedUser);
                assert_eq!(called_party.point_code, originator.point_code);
                assert_eq!(calling_party.point_code, local.point_code);
            }
            other => panic!("expected a UDTS reply, got {other:?}"),
        }

        assert_eq!(sccp.management.unknown_subsystems(), vec![(8, 1)]);
        assert_eq!(sccp.management.subsystem_failure_count(), 1);
    }

    #[tokio::test]
    async fn subsystem_rejection_without_message_return_is_dropped_silently() {
        let mtp = Arc::new(FakeMtp { sent: Mutex::new(Vec::new()), state: RouteState::Allowed, mtu: 272 });
        let sccp = core(mtp.clone());
        sccp.register_user(Arc::new(RejectingUser { outcome: DeliveryOutcome::Failure })).await;

        let originator = SccpAddress::from_ssn_pc(8, PointCode::itu(2, 0, 2));
        let local = sccp.local_address();
        let inbound = SccpMessage::Udt {
            protocol_class: ProtocolClass::CLASS_0,
            called_party: local.clone(),
            calling_party: originator.clone(),
            data: Bytes::from_static(b"hi"),
        };
        let encoded = codec::encode(&inbound, PointCodeType::Itu).unwrap().freeze();

        sccp.receive(originator.point_code.unwrap(), local.point_code.unwrap(), encoded).await;

        assert!(mtp.sent.lock().await.is_empty());
        assert_eq!(sccp.counters().dropped, 1);
    }

    #[tokio::test]
    async fn oversized_payload_is_segmented_into_multiple_msus() {
        let mtp = Arc::new(FakeMtp { sent: Mutex::new(Vec::new()), state: RouteState::Allowed, mtu: 120 });
        let sccp = core(mtp.clone());
        let called = SccpAddress::from_ssn_pc(8, PointCode::itu(1, 0, 2));
        let calling = sccp.local_address();
        let data = Bytes::from(vec![0x5A; 400]);
        sccp.send(&called, &calling, data, ProtocolClass::CLASS_0).await.unwrap();
        assert!(mtp.sent.lock().await.len() > 1);
    }

    #[tokio::test]
    async fn payload_past_the_xudt_pointer_ceiling_goes_out_as_a_single_ludt() {
        let mtp = Arc::new(FakeMtp { sent: Mutex::new(Vec::new()), state: RouteState::Allowed, mtu: 600 });
        let sccp = core(mtp.clone());
        let called = SccpAddress::from_ssn_pc(8, PointCode::itu(1, 0, 2));
        let calling = sccp.local_address();
        let data = Bytes::from(vec![0x5A; 300]);
        sccp.send(&called, &calling, data, ProtocolClass::CLASS_0).await.unwrap();

        let sent = mtp.sent.lock().await;
        assert_eq!(sent.len(), 1);
        let decoded = codec::decode(PointCodeType::Itu, &sent[0]).unwrap();
        assert!(matches!(decoded, SccpMessage::Ludt { .. }));
    }

    #[tokio::test]
    async fn full_status_requires_extended_monitoring_and_toggle_commands_flip_it() {
        let mtp = Arc::new(FakeMtp { sent: Mutex::new(Vec::new()), state: RouteState::Allowed, mtu: 272 });
        let sccp = core(mtp.clone());

        let unavailable = sccp.control("full-status");
        assert!(unavailable.get("error").is_some());

        assert_eq!(sccp.control("enable-extended-monitoring")["ok"], true);
        let status = sccp.control("full-status");
        assert!(status.get("gtt_attempts").is_some());
        assert!(status.get("return_by_type").is_some());

        assert_eq!(sccp.control("disable-extended-monitoring")["ok"], true);
        assert!(sccp.control("full-status").get("error").is_some());
    }

    #[tokio::test]
    async fn gtt_failure_to_find_a_route_increments_gtt_counters() {
        let mtp = Arc::new(FakeMtp { sent: Mutex::new(Vec::new()), state: RouteState::Allowed, mtu: 272 });
        let sccp = core(mtp.clone());
        let called = SccpAddress::from_gt(
            crate::sccp::address::GlobalTitle::e164("999"),
            PointCodeType::Itu,
            Some(8),
        );
        let calling = sccp.local_address();
        let err = sccp
            .send(&called, &calling, Bytes::from_static(b"hi"), ProtocolClass::CLASS_0)
            .await
            .unwrap_err();
        assert!(matches!(err, SccpError::NoTranslation));

        sccp.control("enable-extended-monitoring");
        let status = sccp.control("full-status");
        assert_eq!(status["gtt_attempts"], 1);
        assert_eq!(status["gtt_failures"], 1);
    }

    #[tokio::test]
    async fn timer_tick_sweeps_stale_reassembly_entries() {
        let mtp = Arc::new(FakeMtp { sent: Mutex::new(Vec::new()), state: RouteState::Allowed, mtu: 272 });
        let mut cfg = SccpConfig::default();
        cfg.reassembly_timeout_ms = 1;
        let sccp = SccpCore::new(
            PointCodeType::Itu,
            PointCode::itu(1, 0, 1),
            cfg,
            &ManagementConfig::default(),
            mtp.clone(),
            Arc::new(PrefixGtt::new()),
        );

        let called = SccpAddress::from_ssn_pc(8, PointCode::itu(1, 0, 1));
        let calling = SccpAddress::from_ssn_pc(8, PointCode::itu(2, 0, 2));
        let first = SccpMessage::Xudt {
            protocol_class: ProtocolClass::CLASS_0,
            hop_counter: 15,
            called_party: called.clone(),
            calling_party: calling.clone(),
            data: Bytes::from_static(b"part1"),
            segmentation: Some(crate::types::Segmentation {
                first: true,
                class: 0,
                remaining_segments: 1,
                reference: 42,
            }),
        };
        let encoded = codec::encode(&first, PointCodeType::Itu).unwrap().freeze();
        sccp.receive(calling.point_code.unwrap(), called.point_code.unwrap(), encoded).await;
        assert_eq!(sccp.counters().reassembly_pending, 1);

        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        sccp.timer_tick().await;
        assert_eq!(sccp.counters().reassembly_pending, 0);
    }

    #[tokio::test]
    async fn exiting_refuses_new_sends_and_drops_inbound_traffic() {
        let mtp = Arc::new(FakeMtp { sent: Mutex::new(Vec::new()), state: RouteState::Allowed, mtu: 272 });
        let sccp = core(mtp.clone());
        let called = SccpAddress::from_ssn_pc(8, PointCode::itu(1, 0, 2));
        let calling = sccp.local_address();

        sccp.set_exiting();
        assert!(sccp.exiting());

        let err = sccp
            .send(&called, &calling, Bytes::from_static(b"hi"), ProtocolClass::CLASS_0)
            .await
            .unwrap_err();
        assert!(matches!(err, SccpError::Mtp(_)));
        assert!(mtp.sent.lock().await.is_empty());

        let inbound = SccpMessage::Udt {
            protocol_class: ProtocolClass::CLASS_0,
            called_party: calling.clone(),
            calling_party: called.clone(),
            data: Bytes::from_static(b"hi"),
        };
        let encoded = codec::encode(&inbound, PointCodeType::Itu).unwrap().freeze();
        sccp.receive(called.point_code.unwrap(), calling.point_code.unwrap(), encoded).await;
        assert_eq!(sccp.counters().received, 0);
    }

    #[tokio::test]
    async fn exhausted_hop_counter_with_message_return_yields_hop_counter_violation() {
        let mtp = Arc::new(FakeMtp { sent: Mutex::new(Vec::new()), state: RouteState::Allowed, mtu: 272 });
        let sccp = core(mtp.clone());
        let local = sccp.local_address();
        let originator = SccpAddress::from_ssn_pc(8, PointCode::itu(2, 0, 2));

        let inbound = SccpMessage::Xudt {
            protocol_class: ProtocolClass::CLASS_0.with_return_on_error(),
            hop_counter: 0,
            called_party: local.clone(),
            calling_party: originator.clone(),
            data: Bytes::from_static(b"hi"),
            segmentation: None,
        };
        let encoded = codec::encode(&inbound, PointCodeType::Itu).unwrap().freeze();
        sccp.receive(originator.point_code.unwrap(), local.point_code.unwrap(), encoded).await;

        let sent = mtp.sent.lock().await;
        assert_eq!(sent.len(), 1);
        let reply = codec::decode(PointCodeType::Itu, &sent[0]).unwrap();
        match reply {
            SccpMessage::Xudts { return_cause, .. } => {
                assert_eq!(return_cause, ReturnCause::HopCounterViolation);
            }
            other => panic!("expected an XUDTS reply, got {other:?}"),
        }
        assert_eq!(sccp.counters().dropped, 1);
    }
}
