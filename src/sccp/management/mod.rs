//! SCCP Management (§4.5): subsystem/route reachability state machines,
//! the Subsystem Status Test, and coordinated withdrawal.

pub mod ansi;
pub mod itu;

use crate::errors::ManagementError;
use crate::types::{PointCode, PointCodeType, RouteState, SubsystemState};
use async_trait::async_trait;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use dashmap::DashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::{debug, instrument};

/// Management message type codes carried inside a UDT with ProtocolClass 0
/// between SSN=1 peers (§4.5).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ManagementMessageType {
    Ssa = 1,
    Ssp = 2,
    Sst = 3,
    Sor = 4,
    Sog = 5,
    /// ITU-only: congestion.
    Ssc = 6,
    /// ANSI backup-routing trio — decoded, never acted on (§9 Open
    /// Questions: "preserve the stub, do not invent behavior").
    Sbr = 7,
    Snr = 8,
    Srt = 9,
}

impl ManagementMessageType {
    pub fn from_u8(v: u8) -> Option<Self> {
        Some(match v {
            1 => Self::Ssa,
            2 => Self::Ssp,
            3 => Self::Sst,
            4 => Self::Sor,
            5 => Self::Sog,
            6 => Self::Ssc,
            7 => Self::Sbr,
            8 => Self::Snr,
            9 => Self::Srt,
            _ => return None,
        })
    }
}

/// A decoded management message (§4.5 wire format).
#[derive(Debug, Clone)]
pub struct ManagementMessage {
    pub msg_type: ManagementMessageType,
    pub affected_ssn: u8,
    pub affected_pc: PointCode,
    pub smi: u8,
    pub congestion_level: Option<u8>,
}

impl ManagementMessage {
    pub fn encode(&self) -> BytesMut {
        let mut buf = BytesMut::with_capacity(8);
        buf.put_u8(self.msg_type as u8);
        buf.put_u8(self.affected_ssn);
        buf.put_slice(&self.affected_pc.encode_le());
        buf.put_u8(self.smi & 0x03);
        if self.msg_type == ManagementMessageType::Ssc {
            buf.put_u8(self.congestion_level.unwrap_or(0) & 0x0F);
        }
        buf
    }

    pub fn decode(variant: PointCodeType, mut data: Bytes) -> Result<Self, ManagementError> {
        if data.remaining() < 2 {
            return Err(ManagementError::InvalidMessage("truncated header".into()));
        }
        let msg_type = ManagementMessageType::from_u8(data.get_u8())
            .ok_or_else(|| ManagementError::InvalidMessage("unknown management type".into()))?;
        let affected_ssn = data.get_u8();

        let pc_len = match variant {
            PointCodeType::Itu => 2,
            PointCodeType::Ansi => 3,
        };
        if data.remaining() < pc_len + 1 {
            return Err(ManagementError::InvalidMessage("truncated PC/SMI".into()));
        }
        let affected_pc = PointCode::decode_le(&data, variant)
            .ok_or_else(|| ManagementError::InvalidMessage("bad point code".into()))?;
        data.advance(pc_len);
        let smi = data.get_u8() & 0x03;

        let congestion_level = if msg_type == ManagementMessageType::Ssc && data.remaining() >= 1
        {
            Some(data.get_u8() & 0x0F)
        } else {
            None
        };

        Ok(Self { msg_type, affected_ssn, affected_pc, smi, congestion_level })
    }
}

/// A known remote SCCP node: its point code, monitored subsystems, and
/// overall reachability.
pub struct SccpRemote {
    pub point_code: PointCode,
    pub state: RouteState,
    pub subsystems: DashMap<u8, SubsystemState>,
}

impl SccpRemote {
    pub fn new(point_code: PointCode) -> Self {
        Self { point_code, state: RouteState::Unknown, subsystems: DashMap::new() }
    }
}

/// A local subsystem under coordination control.
pub struct SccpLocalSubsystem {
    pub ssn: u8,
    pub state: RwLock<SubsystemState>,
    pub backups: Vec<u8>,
    pub granted: DashMap<u8, bool>,
}

impl SccpLocalSubsystem {
    pub fn new(ssn: u8, backups: Vec<u8>) -> Self {
        Self { ssn, state: RwLock::new(SubsystemState::Allowed), backups, granted: DashMap::new() }
    }
}

/// An active Subsystem Status Test probe, with exponential back-off capped
/// at 20 minutes (§4.5, §8 property 8).
#[derive(Debug, Clone)]
pub struct SubsystemStatusTest {
    pub remote_pc: u32,
    pub ssn: u8,
    pub interval: Duration,
    pub max_interval: Duration,
    /// When this probe should next fire; `timer_tick` only fires probes
    /// whose deadline has elapsed, rather than every tick (§4.5: the SST
    /// interval doubles on each expiry, it isn't driven by the tick rate).
    deadline: Instant,
}

impl SubsystemStatusTest {
    pub fn new(remote_pc: u32, ssn: u8, initial: Duration, max_interval: Duration) -> Self {
        Self { remote_pc, ssn, interval: initial, max_interval, deadline: Instant::now() + initial }
    }

    /// Double the interval, capped at `max_interval`.
    pub fn backoff(&mut self) {
        self.interval = (self.interval * 2).min(self.max_interval);
    }

    fn is_due(&self, now: Instant) -> bool {
        now >= self.deadline
    }

    /// Back off and re-arm the deadline from `now`, called once a probe
    /// fires.
    fn rearm(&mut self, now: Instant) {
        self.backoff();
        self.deadline = now + self.interval;
    }
}

/// Notifications the management state machine raises toward the upper
/// layer user (§6.2 `managementNotify`).
#[derive(Debug, Clone)]
pub enum ManagementNotification {
    PointCodeStatusIndication { pc: PointCode, accessible: bool },
    SubsystemStatus { pc: PointCode, ssn: u8, allowed: bool },
    SccpRemoteInaccessible { pc: PointCode },
    CoordinateIndication { ssn: u8 },
    CoordinateConfirm { ssn: u8, granted: bool },
}

#[async_trait]
pub trait ManagementUser: Send + Sync {
    async fn management_notify(&self, notification: ManagementNotification);
}

/// Outbound management traffic the core asks its SCCP to send — kept
/// decoupled from `SccpCore` so management never calls back into SCCP
/// while holding its own lock (§5 locking discipline).
#[async_trait]
pub trait ManagementTransmitter: Send + Sync {
    async fn send_management(&self, dpc: PointCode, msg: ManagementMessage);
}

/// Per-SCCP management singleton (§4.5).
pub struct SccpManagement {
    variant: PointCodeType,
    local_pc: PointCode,
    remotes: DashMap<u32, SccpRemote>,
    locals: DashMap<u8, SccpLocalSubsystem>,
    concerned: RwLock<Vec<PointCode>>,
    sst_list: DashMap<(u32, u8), SubsystemStatusTest>,
    sst_initial: Duration,
    sst_max: Duration,
    coordination_timer: Duration,
    ignore_tests_interval: Duration,
    sent: AtomicU32,
    received: AtomicU32,
    extended_monitoring: AtomicBool,
    subsystem_failures: AtomicU32,
    /// Packet counts per SSN seen as "Missing Local Subsystem" (§8 scenario
    /// S6), recorded only when `extended_monitoring` is set.
    unknown_subsystems: DashMap<u8, u32>,
}

impl SccpManagement {
    pub fn new(
        variant: PointCodeType,
        local_pc: PointCode,
        sst_initial: Duration,
        sst_max: Duration,
        coordination_timer: Duration,
        ignore_tests_interval: Duration,
    ) -> Self {
        Self::with_extended_monitoring(
            variant,
            local_pc,
            sst_initial,
            sst_max,
            coordination_timer,
            ignore_tests_interval,
            false,
        )
    }

    #[allow(clippy::too_many_arguments)]
    pub fn with_extended_monitoring(
        variant: PointCodeType,
        local_pc: PointCode,
        sst_initial: Duration,
        sst_max: Duration,
        coordination_timer: Duration,
        ignore_tests_interval: Duration,
        extended_monitoring: bool,
    ) -> Self {
        Self {
            variant,
            local_pc,
            remotes: DashMap::new(),
            locals: DashMap::new(),
            concerned: RwLock::new(Vec::new()),
            sst_list: DashMap::new(),
            sst_initial,
            sst_max,
            coordination_timer,
            ignore_tests_interval,
            sent: AtomicU32::new(0),
            received: AtomicU32::new(0),
            extended_monitoring: AtomicBool::new(extended_monitoring),
            subsystem_failures: AtomicU32::new(0),
            unknown_subsystems: DashMap::new(),
        }
    }

    /// Toggle extended monitoring at runtime (§6.5 `enable-extended-
    /// monitoring`/`disable-extended-monitoring` control commands).
    pub fn set_extended_monitoring(&self, enabled: bool) {
        self.extended_monitoring.store(enabled, Ordering::Relaxed);
    }

    pub fn extended_monitoring(&self) -> bool {
        self.extended_monitoring.load(Ordering::Relaxed)
    }

    pub fn register_local_subsystem(&self, ssn: u8, backups: Vec<u8>) {
        self.locals.insert(ssn, SccpLocalSubsystem::new(ssn, backups));
    }

    pub async fn add_concerned(&self, pc: PointCode) {
        self.concerned.write().await.push(pc);
    }

    fn remote_entry(&self, pc: PointCode) -> dashmap::mapref::one::RefMut<'_, u32, SccpRemote> {
        self.remotes.entry(pc.value()).or_insert_with(|| SccpRemote::new(pc))
    }

    /// Dispatch an inbound management message (§4.5's `handleMessage`
    /// shape): SSA/SSP mutate remote subsystem state; SST either answers
    /// directly (local ssn) or is otherwise ignored; SOR/SOG drive
    /// coordinated withdrawal; SSC/SBR/SNR/SRT are ITU/ANSI-specific and
    /// handled by the thin wrappers in `itu`/`ansi`.
    #[instrument(skip(self, user, tx))]
    pub async fn handle_message(
        &self,
        msg: ManagementMessage,
        user: &dyn ManagementUser,
        tx: &dyn ManagementTransmitter,
    ) -> Result<(), ManagementError> {
        self.received.fetch_add(1, Ordering::Relaxed);
        match msg.msg_type {
            ManagementMessageType::Ssa => self.handle_subsystem_status(msg, true, user, tx).await,
            ManagementMessageType::Ssp => self.handle_subsystem_status(msg, false, user, tx).await,
            ManagementMessageType::Sst => self.handle_subsystem_status_test(msg, tx).await,
            ManagementMessageType::Sor => self.handle_sor(msg, user).await,
            ManagementMessageType::Sog => self.handle_sog(msg, user).await,
            ManagementMessageType::Ssc => {
                debug!(level = ?msg.congestion_level, "SSC received, no-op by design (§4.5 reserved)");
                Ok(())
            }
            ManagementMessageType::Sbr | ManagementMessageType::Snr | ManagementMessageType::Srt => {
                debug!(msg_type = ?msg.msg_type, "ANSI backup-routing trio: stub, no state effect");
                Ok(())
            }
        }
    }

    /// (§4.5: SSA/SSP both update the remote's subsystem map and are then
    /// propagated on to every concerned point code.)
    async fn handle_subsystem_status(
        &self,
        msg: ManagementMessage,
        allowed: bool,
        user: &dyn ManagementUser,
        tx: &dyn ManagementTransmitter,
    ) -> Result<(), ManagementError> {
        let remote = self.remote_entry(msg.affected_pc);
        remote.subsystems.insert(
            msg.affected_ssn,
            if allowed { SubsystemState::Allowed } else { SubsystemState::Prohibited },
        );
        drop(remote);

        if allowed {
            self.sst_list.remove(&(msg.affected_pc.value(), msg.affected_ssn));
        } else {
            let test = SubsystemStatusTest::new(
                msg.affected_pc.value(),
                msg.affected_ssn,
                self.sst_initial,
                self.sst_max,
            );
            self.sst_list.insert((msg.affected_pc.value(), msg.affected_ssn), test);
        }

        user.management_notify(ManagementNotification::SubsystemStatus {
            pc: msg.affected_pc,
            ssn: msg.affected_ssn,
            allowed,
        })
        .await;

        let concerned = self.concerned.read().await.clone();
        for pc in concerned {
            let propagated = ManagementMessage {
                msg_type: if allowed { ManagementMessageType::Ssa } else { ManagementMessageType::Ssp },
                affected_ssn: msg.affected_ssn,
                affected_pc: msg.affected_pc,
                smi: msg.smi,
                congestion_level: None,
            };
            self.sent.fetch_add(1, Ordering::Relaxed);
            tx.send_management(pc, propagated).await;
        }
        Ok(())
    }

    async fn handle_subsystem_status_test(
        &self,
        msg: ManagementMessage,
        tx: &dyn ManagementTransmitter,
    ) -> Result<(), ManagementError> {
        if msg.affected_ssn == crate::SSN_MANAGEMENT {
            let reply = ManagementMessage {
                msg_type: ManagementMessageType::Ssa,
                affected_ssn: msg.affected_ssn,
                affected_pc: self.local_pc,
                smi: msg.smi,
                congestion_level: None,
            };
            self.sent.fetch_add(1, Ordering::Relaxed);
            tx.send_management(msg.affected_pc, reply).await;
            return Ok(());
        }

        let Some(local) = self.locals.get(&msg.affected_ssn) else {
            return Err(ManagementError::UnknownLocalSubsystem(msg.affected_ssn));
        };
        let state = *local.state.read().await;
        if matches!(state, SubsystemState::Allowed) {
            let reply = ManagementMessage {
                msg_type: ManagementMessageType::Ssa,
                affected_ssn: msg.affected_ssn,
                affected_pc: self.local_pc,
                smi: msg.smi,
                congestion_level: None,
            };
            self.sent.fetch_add(1, Ordering::Relaxed);
            tx.send_management(msg.affected_pc, reply).await;
        } else {
            debug!(ssn = msg.affected_ssn, ?state, "SST dropped: not Allowed");
        }
        Ok(())
    }

    async fn handle_sor(
        &self,
        msg: ManagementMessage,
        user: &dyn ManagementUser,
    ) -> Result<(), ManagementError> {
        user.management_notify(ManagementNotification::CoordinateIndication { ssn: msg.affected_ssn })
            .await;
        Ok(())
    }

    async fn handle_sog(
        &self,
        msg: ManagementMessage,
        _user: &dyn ManagementUser,
    ) -> Result<(), ManagementError> {
        for local in self.locals.iter() {
            if local.backups.contains(&msg.affected_ssn) {
                local.granted.insert(msg.affected_ssn, true);
            }
        }
        Ok(())
    }

    /// User-initiated coordinated withdrawal (§4.5 "coordinated
    /// withdrawal"): send SOR to each backup, arm the coord timer.
    pub async fn coordinate_request(
        &self,
        ssn: u8,
        tx: &dyn ManagementTransmitter,
    ) -> Result<(), ManagementError> {
        let local = self.locals.get(&ssn).ok_or(ManagementError::UnknownLocalSubsystem(ssn))?;
        *local.state.write().await = SubsystemState::WaitForGrant;
        for &backup in &local.backups {
            let sor = ManagementMessage {
                msg_type: ManagementMessageType::Sor,
                affected_ssn: ssn,
                affected_pc: self.local_pc,
                smi: 0,
                congestion_level: None,
            };
            tx.send_management(PointCode::from_packed(backup as u32, self.variant), sor).await;
        }
        Ok(())
    }

    /// Coordination timer expiry: if every backup granted, confirm and
    /// broadcast SSP, entering `IgnoreTests` before finally `Prohibited`;
    /// otherwise revert to `Allowed` (§4.5).
    pub async fn coordination_timer_expired(
        &self,
        ssn: u8,
        user: &dyn ManagementUser,
        tx: &dyn ManagementTransmitter,
    ) -> Result<(), ManagementError> {
        let local = self.locals.get(&ssn).ok_or(ManagementError::UnknownLocalSubsystem(ssn))?;
        let all_granted = local.backups.iter().all(|b| local.granted.get(b).map(|v| *v).unwrap_or(false));

        if all_granted {
            *local.state.write().await = SubsystemState::IgnoreTests;
            let concerned = self.concerned.read().await.clone();
            for pc in concerned {
                let ssp = ManagementMessage {
                    msg_type: ManagementMessageType::Ssp,
                    affected_ssn: ssn,
                    affected_pc: self.local_pc,
                    smi: 0,
                    congestion_level: None,
                };
                tx.send_management(pc, ssp).await;
            }
            user.management_notify(ManagementNotification::CoordinateConfirm { ssn, granted: true })
                .await;
        } else {
            *local.state.write().await = SubsystemState::Allowed;
            user.management_notify(ManagementNotification::CoordinateConfirm { ssn, granted: false })
                .await;
        }
        Ok(())
    }

    /// Ignore-tests window elapsed: finally transition to `Prohibited`.
    pub async fn ignore_tests_expired(&self, ssn: u8) -> Result<(), ManagementError> {
        let local = self.locals.get(&ssn).ok_or(ManagementError::UnknownLocalSubsystem(ssn))?;
        *local.state.write().await = SubsystemState::Prohibited;
        Ok(())
    }

    /// The registered `SccpUser` rejected connectionless delivery with
    /// `Unequipped`/`Failure` (§4.4 "subsystem failure" action, §8 scenario
    /// S6): mark the local subsystem `Prohibited` if known, optionally
    /// record the SSN in the unknown-subsystem map when extended
    /// monitoring is enabled, then broadcast SSP to concerned point codes.
    pub async fn on_subsystem_failure(&self, ssn: u8, tx: &dyn ManagementTransmitter) {
        if ssn <= 1 {
            return;
        }
        if let Some(local) = self.locals.get(&ssn) {
            *local.state.write().await = SubsystemState::Prohibited;
        }
        if self.extended_monitoring() {
            self.subsystem_failures.fetch_add(1, Ordering::Relaxed);
            *self.unknown_subsystems.entry(ssn).or_insert(0) += 1;
        }

        let concerned = self.concerned.read().await.clone();
        for pc in concerned {
            let ssp = ManagementMessage {
                msg_type: ManagementMessageType::Ssp,
                affected_ssn: ssn,
                affected_pc: self.local_pc,
                smi: 0,
                congestion_level: None,
            };
            self.sent.fetch_add(1, Ordering::Relaxed);
            tx.send_management(pc, ssp).await;
        }
    }

    /// Snapshot of the unknown-subsystem map for diagnostics/`control()`.
    pub fn unknown_subsystems(&self) -> Vec<(u8, u32)> {
        self.unknown_subsystems.iter().map(|e| (*e.key(), *e.value())).collect()
    }

    pub fn subsystem_failure_count(&self) -> u32 {
        self.subsystem_failures.load(Ordering::Relaxed)
    }

    /// MTP route-state change for a remote point code (§4.5 remote point
    /// code state machine).
    pub async fn on_route_state_changed(
        &self,
        pc: PointCode,
        state: RouteState,
        user: &dyn ManagementUser,
    ) {
        {
            let mut remote = self.remote_entry(pc);
            remote.state = state;
        }
        match state {
            RouteState::Allowed => {
                self.sst_list.remove(&(pc.value(), crate::SSN_MANAGEMENT));
                user.management_notify(ManagementNotification::PointCodeStatusIndication {
                    pc,
                    accessible: true,
                })
                .await;
            }
            RouteState::Prohibited => {
                self.sst_list.retain(|(rpc, ssn), _| *rpc != pc.value() || *ssn == crate::SSN_MANAGEMENT);
                user.management_notify(ManagementNotification::PointCodeStatusIndication {
                    pc,
                    accessible: false,
                })
                .await;
                user.management_notify(ManagementNotification::SccpRemoteInaccessible { pc }).await;
            }
            RouteState::Congestion => {
                debug!(pc = pc.value(), "route congestion: reserved, no-op");
            }
            RouteState::Unknown => {}
        }
    }

    /// Called by the timer tick (§5): fires SST only for probes whose
    /// deadline has elapsed, then doubles that probe's interval and
    /// re-arms it from now (§8 property 8: 5s, 10s, 20s, ... capped at
    /// 20 min — not once per tick).
    pub async fn timer_tick(&self, tx: &dyn ManagementTransmitter) {
        let now = Instant::now();
        let mut due = Vec::new();
        for mut entry in self.sst_list.iter_mut() {
            if entry.is_due(now) {
                entry.rearm(now);
                due.push((entry.key().0, entry.key().1));
            }
        }
        for (pc_value, ssn) in due {
            let sst = ManagementMessage {
                msg_type: ManagementMessageType::Sst,
                affected_ssn: ssn,
                affected_pc: self.local_pc,
                smi: 0,
                congestion_level: None,
            };
            self.sent.fetch_add(1, Ordering::Relaxed);
            tx.send_management(PointCode::from_packed(pc_value, self.variant), sst).await;
        }
    }

    pub fn sst_count(&self) -> usize {
        self.sst_list.len()
    }

    pub fn counters(&self) -> (u32, u32) {
        (self.sent.load(Ordering::Relaxed), self.received.load(Ordering::Relaxed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn itu_message_round_trips() {
        let pc = PointCode::itu(1, 2, 3);
        let msg = ManagementMessage {
            msg_type: ManagementMessageType::Ssp,
            affected_ssn: 8,
            affected_pc: pc,
            smi: 2,
            congestion_level: None,
        };
        let wire = msg.encode();
        let decoded = ManagementMessage::decode(PointCodeType::Itu, wire.freeze()).unwrap();
        assert_eq!(decoded.msg_type, ManagementMessageType::Ssp);
        assert_eq!(decoded.affected_ssn, 8);
        assert!(decoded.affected_pc.same_type_eq(&pc));
        assert_eq!(decoded.smi, 2);
    }

    #[test]
    fn ansi_message_round_trips_with_three_octet_pc() {
        let pc = PointCode::ansi(1, 2, 3);
        let msg = ManagementMessage {
            msg_type: ManagementMessageType::Sbr,
            affected_ssn: 9,
            affected_pc: pc,
            smi: 0,
            congestion_level: None,
        };
        let wire = msg.encode();
        assert_eq!(wire.len(), 2 + 3 + 1);
        let decoded = ManagementMessage::decode(PointCodeType::Ansi, wire.freeze()).unwrap();
        assert!(decoded.affected_pc.same_type_eq(&pc));
        assert!(ansi::is_backup_routing_stub(&decoded));
    }

    #[test]
    fn ssc_carries_a_congestion_octet() {
        let pc = PointCode::itu(1, 2, 3);
        let msg = itu::build_ssc(pc, 8, 1, 3);
        let wire = msg.encode();
        assert_eq!(wire.len(), 2 + 2 + 1 + 1);
        let decoded = ManagementMessage::decode(PointCodeType::Itu, wire.freeze()).unwrap();
        assert_eq!(decoded.congestion_level, Some(3));
    }

    #[test]
    fn sst_backoff_doubles_and_caps() {
        let mut sst = SubsystemStatusTest::new(
            PointCode::itu(1, 2, 3).value(),
            8,
            Duration::from_secs(5),
            Duration::from_secs(20 * 60),
        );
        for _ in 0..20 {
            sst.backoff();
        }
        assert_eq!(sst.interval, Duration::from_secs(20 * 60));
    }

    #[tokio::test]
    async fn subsystem_prohibited_arms_an_sst_probe() {
        struct NullUser;
        #[async_trait]
        impl ManagementUser for NullUser {
            async fn management_notify(&self, _n: ManagementNotification) {}
        }

        let mgmt = SccpManagement::new(
            PointCodeType::Itu,
            PointCode::itu(1, 0, 1),
            Duration::from_secs(5),
            Duration::from_secs(20 * 60),
            Duration::from_secs(1),
            Duration::from_secs(1),
        );
        let remote_pc = PointCode::itu(1, 0, 2);
        let msg = ManagementMessage {
            msg_type: ManagementMessageType::Ssp,
            affected_ssn: 8,
            affected_pc: remote_pc,
            smi: 0,
            congestion_level: None,
        };
        struct NullTx;
        #[async_trait]
        impl ManagementTransmitter for NullTx {
            async fn send_management(&self, _dpc: PointCode, _msg: ManagementMessage) {}
        }

        mgmt.handle_message(msg, &NullUser, &NullTx).await.unwrap();
        assert_eq!(mgmt.sst_count(), 1);
    }

    #[tokio::test]
    async fn timer_tick_only_fires_sst_once_its_deadline_elapses() {
        use std::sync::atomic::AtomicUsize;

        struct CountingTx(AtomicUsize);
        #[async_trait]
        impl ManagementTransmitter for CountingTx {
            async fn send_management(&self, _dpc: PointCode, _msg: ManagementMessage) {
                self.0.fetch_add(1, Ordering::Relaxed);
            }
        }

        let mgmt = SccpManagement::new(
            PointCodeType::Itu,
            PointCode::itu(1, 0, 1),
            Duration::from_millis(20),
            Duration::from_secs(20 * 60),
            Duration::from_secs(1),
            Duration::from_secs(1),
        );
        mgmt.sst_list.insert(
            (PointCode::itu(1, 0, 2).value(), 8),
            SubsystemStatusTest::new(PointCode::itu(1, 0, 2).value(), 8, Duration::from_millis(20), Duration::from_secs(20 * 60)),
        );

        let tx = CountingTx(AtomicUsize::new(0));
        mgmt.timer_tick(&tx).await;
        assert_eq!(tx.0.load(Ordering::Relaxed), 0, "probe armed for 20ms shouldn't fire immediately");

        tokio::time::sleep(Duration::from_millis(30)).await;
        mgmt.timer_tick(&tx).await;
        assert_eq!(tx.0.load(Ordering::Relaxed), 1);

        mgmt.timer_tick(&tx).await;
        assert_eq!(tx.0.load(Ordering::Relaxed), 1, "re-armed probe shouldn't fire again immediately");
    }

    #[tokio::test]
    async fn extended_monitoring_toggle_gates_unknown_subsystem_recording() {
        struct NullTx;
        #[async_trait]
        impl ManagementTransmitter for NullTx {
            async fn send_management(&self, _dpc: PointCode, _msg: ManagementMessage) {}
        }

        let mgmt = SccpManagement::new(
            PointCodeType::Itu,
            PointCode::itu(1, 0, 1),
            Duration::from_secs(5),
            Duration::from_secs(20 * 60),
            Duration::from_secs(1),
            Duration::from_secs(1),
        );
        assert!(!mgmt.extended_monitoring());

        mgmt.on_subsystem_failure(8, &NullTx).await;
        assert!(mgmt.unknown_subsystems().is_empty());

        mgmt.set_extended_monitoring(true);
        mgmt.on_subsystem_failure(8, &NullTx).await;
        assert_eq!(mgmt.unknown_subsystems(), vec![(8, 1)]);

        mgmt.set_extended_monitoring(false);
        mgmt.on_subsystem_failure(8, &NullTx).await;
        assert_eq!(mgmt.unknown_subsystems(), vec![(8, 1)]);
    }
}
