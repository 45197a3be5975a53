//! `IaxEngine`: UDP endpoint, bucketed transaction table, call-number
//! allocator, call-token gatekeeper, and event pump (§4.7).
//!
//! Grounded in `engine.cpp`'s `IAXEngine` almost directly: the bucket
//! count, the `generateCallNo`/`releaseCallNo` wraparound allocator, and
//! the `addFrame` dispatch ladder are a line-for-line port of its logic,
//! rebuilt on `tokio`/`dashmap` instead of `ObjList`+mutex.

use super::calltoken::{self, CallTokenOutcome};
use super::frame::{FrameType, FullFrame, IaxControl, IaxFrame, IeType};
use super::trunk::{MetaTrunkFrame, TrunkInfo, TrunkTable};
use super::transaction::{IaxTransaction, TransactionType};
use crate::config::IaxConfig;
use crate::errors::{CallTokenError, IaxError};
use crate::{IAX2_CALLTOKEN_CALLNO, IAX2_CALLTOKEN_REJ_CALLNO, IAX2_MAX_CALLNO, IAX2_MIN_CALLNO};
use bytes::Bytes;
use dashmap::DashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Output of the engine's dispatch, handed to whatever drains
/// [`IaxEngine::next_event`] (§4.7 "event pump").
///
/// The original pumps transaction-internal `IAXEvent`s by round-robin
/// polling each bucket; since transaction internals are opaque to this
/// spec (§2), there is nothing for the engine to poll. Dispatch instead
/// pushes one event per frame it resolves onto an mpsc channel, which is
/// the natural Rust shape for "a separate thread drains queued events."
#[derive(Debug)]
pub enum IaxEvent {
    /// A brand-new inbound transaction was created for a New/RegReq/
    /// RegRel/Poke frame.
    NewTransaction(Arc<IaxTransaction>),
    /// A frame was matched to an existing transaction.
    Frame {
        transaction: Arc<IaxTransaction>,
        frame: FullFrame,
    },
    /// A transaction reached `Terminated`; its call number has been
    /// released.
    Terminated(u16),
}

fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// Bounded bitmap allocator for local call numbers, `[IAX2_MIN_CALLNO,
/// IAX2_MAX_CALLNO]`, advancing a rotating start offset on every
/// allocation to spread reuse (`generateCallNo`/`releaseCallNo`).
struct CallNoAllocator {
    used: Mutex<Vec<bool>>,
    start: AtomicU32,
}

impl CallNoAllocator {
    fn new() -> Self {
        let mut rng_seed = rand::random::<u32>() % IAX2_MAX_CALLNO as u32;
        if (rng_seed as u16) < IAX2_MIN_CALLNO {
            rng_seed = IAX2_MIN_CALLNO as u32;
        }
        Self {
            used: Mutex::new(vec![false; IAX2_MAX_CALLNO as usize + 1]),
            start: AtomicU32::new(rng_seed),
        }
    }

    fn generate(&self) -> Option<u16> {
        let mut used = self.used.lock().unwrap();
        let mut start = self.start.load(Ordering::SeqCst) as u16;
        start = start.wrapping_add(1);
        if start > IAX2_MAX_CALLNO {
            start = IAX2_MIN_CALLNO;
        }
        self.start.store(start as u32, Ordering::SeqCst);
        for i in start..=IAX2_MAX_CALLNO {
            if !used[i as usize] {
                used[i as usize] = true;
                return Some(i);
            }
        }
        for i in IAX2_MIN_CALLNO..start {
            if !used[i as usize] {
                used[i as usize] = true;
                return Some(i);
            }
        }
        None
    }

    fn release(&self, call_no: u16) {
        if (call_no as usize) < self.used.lock().unwrap().len() {
            self.used.lock().unwrap()[call_no as usize] = false;
        }
    }

    fn in_use_count(&self) -> usize {
        self.used.lock().unwrap().iter().filter(|b| **b).count()
    }
}

/// One entry of the bucketed main transaction table: every complete
/// transaction whose `remote_call_no % bucket_count` lands here.
type Bucket = DashMap<u16, Vec<Arc<IaxTransaction>>>;

/// The IAX2 UDP endpoint (§4.7 `IAXEngine`).
pub struct IaxEngine {
    config: IaxConfig,
    socket: Arc<UdpSocket>,
    buckets: Vec<Bucket>,
    /// Outgoing transactions awaiting their first reply, keyed by local
    /// call number (`m_incompleteTransList`).
    incomplete: DashMap<u16, Arc<IaxTransaction>>,
    call_numbers: CallNoAllocator,
    call_token_secret: String,
    trunk: TrunkTable,
    trunk_info: TrunkInfo,
    events_tx: mpsc::Sender<IaxEvent>,
    events_rx: tokio::sync::Mutex<mpsc::Receiver<IaxEvent>>,
    exiting: AtomicBool,
    received: AtomicU64,
    dropped: AtomicU64,
}

impl IaxEngine {
    /// Bind the UDP socket and construct an empty engine.
    pub async fn bind(config: IaxConfig) -> crate::Result<Arc<Self>> {
        let bind_addr = format!("{}:{}", config.bind_address, config.port);
        let socket = UdpSocket::bind(&bind_addr)
            .await
            .map_err(|e| crate::Error::Io(e))?;
        let bucket_count = config.bucket_count.max(1);
        let buckets = (0..bucket_count).map(|_| DashMap::new()).collect();
        let (events_tx, events_rx) = mpsc::channel(1024);
        let secret = calltoken::synthesize_secret();
        Ok(Arc::new(Self {
            config,
            socket: Arc::new(socket),
            buckets,
            incomplete: DashMap::new(),
            call_numbers: CallNoAllocator::new(),
            call_token_secret: secret,
            trunk: TrunkTable::new(),
            trunk_info: TrunkInfo::default(),
            events_tx,
            events_rx: tokio::sync::Mutex::new(events_rx),
            exiting: AtomicBool::new(false),
            received: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
        }))
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    pub fn set_exiting(&self) {
        self.exiting.store(true, Ordering::SeqCst);
    }

    pub fn exiting(&self) -> bool {
        self.exiting.load(Ordering::SeqCst)
    }

    pub fn active_transaction_count(&self) -> usize {
        self.call_numbers.in_use_count()
    }

    fn bucket_index(&self, remote_call_no: u16) -> usize {
        remote_call_no as usize % self.buckets.len()
    }

    async fn send_frame(&self, addr: SocketAddr, frame: &FullFrame) {
        let bytes = frame.encode().freeze();
        if let Err(e) = self.socket.send_to(&bytes, addr).await {
            warn!("IAX socket send to {addr} failed (treated as sent): {e}");
        }
    }

    async fn send_inval(&self, addr: SocketAddr, frame: &FullFrame) {
        if matches!(frame.frame_type, FrameType::Iax) && frame.control() == IaxControl::Inval {
            return;
        }
        let reply = FullFrame::iax_control(
            IaxControl::Inval,
            frame.source_call_no,
            frame.dest_call_no,
            frame.oseq,
            frame.iseq,
            frame.timestamp,
        );
        self.send_frame(addr, &reply).await;
    }

    /// Mirrors `checkCallToken`, issuing the CallToken mint / Reject
    /// frame itself when that's the outcome.
    async fn check_call_token(&self, addr: SocketAddr, frame: &FullFrame) -> bool {
        if !self.config.require_call_token {
            return true;
        }
        let token = frame
            .ies
            .get(IeType::CallToken)
            .map(|v| v.as_bytes().to_vec());
        let outcome = calltoken::check_call_token(
            true,
            true,
            self.config.call_token_max_age_secs,
            token.as_deref(),
            &self.call_token_secret,
            addr,
            now_secs(),
        );
        match outcome {
            CallTokenOutcome::Accepted => true,
            CallTokenOutcome::Mint(secret) => {
                let mut reply = FullFrame::iax_control(
                    IaxControl::CallToken,
                    IAX2_CALLTOKEN_CALLNO,
                    frame.source_call_no,
                    0,
                    1,
                    0,
                );
                reply
                    .ies
                    .append_binary(IeType::CallToken, Bytes::from(secret.into_bytes()));
                self.send_frame(addr, &reply).await;
                false
            }
            CallTokenOutcome::Rejected(Some(CallTokenError::Missing)) => {
                let mut reply = FullFrame::iax_control(
                    IaxControl::Reject,
                    IAX2_CALLTOKEN_REJ_CALLNO,
                    frame.source_call_no,
                    0,
                    1,
                    2,
                );
                reply
                    .ies
                    .append_string(IeType::Cause, "CALLTOKEN support required");
                self.send_frame(addr, &reply).await;
                false
            }
            CallTokenOutcome::Rejected(_) => false,
        }
    }

    /// Dispatch one parsed datagram (`IAXEngine::addFrame`).
    pub async fn add_frame(self: &Arc<Self>, addr: SocketAddr, frame: IaxFrame) {
        self.received.fetch_add(1, Ordering::Relaxed);
        match frame {
            IaxFrame::Full(full) if full.dest_call_no != 0 => {
                self.dispatch_incomplete_or_bucket(addr, full).await;
            }
            IaxFrame::Full(full) => self.dispatch_bucket_or_new(addr, full).await,
            IaxFrame::Mini(mini) => self.dispatch_mini(addr, mini).await,
        }
    }

    async fn dispatch_incomplete_or_bucket(&self, addr: SocketAddr, full: FullFrame) {
        if let Some(entry) = self.incomplete.get(&full.dest_call_no) {
            let tr = entry.clone();
            drop(entry);
            if tr.remote_addr == addr {
                if matches!(full.frame_type, FrameType::Iax) && full.control() == IaxControl::CallToken {
                    // Outgoing transaction received its minted token; the
                    // transaction (opaque) is responsible for resending
                    // New with it attached.
                    let _ = self
                        .events_tx
                        .send(IaxEvent::Frame {
                            transaction: tr,
                            frame: full,
                        })
                        .await;
                    return;
                }
                self.incomplete.remove(&full.dest_call_no);
                tr.set_remote_call_no(full.source_call_no);
                let idx = self.bucket_index(full.source_call_no);
                self.buckets[idx]
                    .entry(full.source_call_no)
                    .or_insert_with(Vec::new)
                    .push(tr.clone());
                let _ = self
                    .events_tx
                    .send(IaxEvent::Frame {
                        transaction: tr,
                        frame: full,
                    })
                    .await;
                return;
            }
        }
        self.dispatch_bucket_or_new(addr, full).await;
    }

    async fn dispatch_bucket_or_new(&self, addr: SocketAddr, full: FullFrame) {
        let idx = self.bucket_index(full.source_call_no);
        if let Some(bucket_entry) = self.buckets[idx].get(&full.source_call_no) {
            for tr in bucket_entry.iter() {
                if full.dest_call_no != 0 || tr.remote_addr == addr {
                    let tr = tr.clone();
                    let _ = self
                        .events_tx
                        .send(IaxEvent::Frame {
                            transaction: tr,
                            frame: full,
                        })
                        .await;
                    return;
                }
            }
        }
        // No matching transaction.
        if self.exiting() {
            self.send_inval(addr, &full).await;
            return;
        }
        if !matches!(full.frame_type, FrameType::Iax) {
            self.send_inval(addr, &full).await;
            return;
        }
        match full.control() {
            IaxControl::New => {
                if !self.check_call_token(addr, &full).await {
                    return;
                }
                self.start_inbound(addr, full, TransactionType::New).await;
            }
            IaxControl::RegReq => self.start_inbound(addr, full, TransactionType::RegReq).await,
            IaxControl::RegRel => self.start_inbound(addr, full, TransactionType::RegRel).await,
            IaxControl::Poke => self.start_inbound(addr, full, TransactionType::Poke).await,
            IaxControl::Inval | IaxControl::FwDownl | IaxControl::TxCnt | IaxControl::TxAcc => {
                // Often used as keepalives; swallow without reply (§9).
                self.dropped.fetch_add(1, Ordering::Relaxed);
            }
            _ => {
                debug!(
                    "Unmatched IAX frame type={:?} subclass={} for ({}, {})",
                    full.frame_type, full.subclass, full.dest_call_no, full.source_call_no
                );
                self.send_inval(addr, &full).await;
            }
        }
    }

    async fn dispatch_mini(&self, addr: SocketAddr, mini: super::frame::MiniFrame) {
        let idx = self.bucket_index(mini.source_call_no);
        if let Some(bucket_entry) = self.buckets[idx].get(&mini.source_call_no) {
            for tr in bucket_entry.iter() {
                if tr.remote_addr == addr {
                    // Mini frames carry only media payload; expose them
                    // to the same event stream wrapped as a synthetic
                    // full frame isn't appropriate, so transactions would
                    // consume these directly in a full implementation.
                    debug!(
                        "Mini frame for transaction ({}, {}) ts={}",
                        tr.local_call_no, mini.source_call_no, mini.timestamp
                    );
                    return;
                }
            }
        }
        // Mini frames on miss are silently dropped (§4.7).
        self.dropped.fetch_add(1, Ordering::Relaxed);
    }

    async fn start_inbound(&self, addr: SocketAddr, full: FullFrame, ttype: TransactionType) {
        let Some(local_call_no) = self.call_numbers.generate() else {
            warn!(
                "Unable to generate call number, active transactions: {}",
                self.call_numbers.in_use_count()
            );
            return;
        };
        let tr = Arc::new(IaxTransaction::new(
            local_call_no,
            Some(full.source_call_no),
            addr,
            ttype,
            false,
        ));
        let idx = self.bucket_index(full.source_call_no);
        self.buckets[idx]
            .entry(full.source_call_no)
            .or_insert_with(Vec::new)
            .push(tr.clone());
        let _ = self.events_tx.send(IaxEvent::NewTransaction(tr.clone())).await;
        let _ = self
            .events_tx
            .send(IaxEvent::Frame {
                transaction: tr,
                frame: full,
            })
            .await;
    }

    /// Begin an outbound transaction; placed on the incomplete list until
    /// the peer's first reply supplies its remote call number.
    pub fn start_local_transaction(
        self: &Arc<Self>,
        ttype: TransactionType,
        addr: SocketAddr,
    ) -> crate::Result<Arc<IaxTransaction>> {
        let local_call_no = self
            .call_numbers
            .generate()
            .ok_or_else(|| crate::Error::Iax(IaxError::CallNoExhausted(self.call_numbers.in_use_count())))?;
        let tr = Arc::new(IaxTransaction::new(local_call_no, None, addr, ttype, true));
        self.incomplete.insert(local_call_no, tr.clone());
        Ok(tr)
    }

    /// Release a transaction's call number and remove it from whichever
    /// table holds it; called once a transaction reaches `Terminated`.
    pub async fn release_transaction(&self, tr: &Arc<IaxTransaction>) {
        self.incomplete.remove(&tr.local_call_no);
        if let Some(remote) = tr.remote_call_no() {
            let idx = self.bucket_index(remote);
            if let Some(mut entry) = self.buckets[idx].get_mut(&remote) {
                entry.retain(|t| !Arc::ptr_eq(t, tr));
            }
        }
        self.call_numbers.release(tr.local_call_no);
        let _ = self
            .events_tx
            .send(IaxEvent::Terminated(tr.local_call_no))
            .await;
    }

    /// Drain the next queued event (§4.7 event pump).
    pub async fn next_event(&self) -> Option<IaxEvent> {
        self.events_rx.lock().await.recv().await
    }

    /// One read off the UDP socket plus dispatch; intended to run in a
    /// loop on a dedicated task (§5 "receive thread blocks on the UDP
    /// socket").
    pub async fn recv_once(self: &Arc<Self>) -> crate::Result<()> {
        let mut buf = [0u8; 1500];
        let (len, addr) = self.socket.recv_from(&mut buf).await.map_err(crate::Error::Io)?;
        match IaxFrame::parse(&buf[..len]) {
            Ok(frame) => {
                self.add_frame(addr, frame).await;
                Ok(())
            }
            Err(e) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                Err(crate::Error::Iax(e))
            }
        }
    }

    /// Attach a transaction's outgoing mini-frames to its peer's
    /// aggregator (§4.7 trunk pump, `enableTrunking`).
    pub fn enable_trunking(&self, addr: SocketAddr) -> Arc<MetaTrunkFrame> {
        self.trunk.get_or_create(addr, &self.trunk_info)
    }

    /// One `processTrunkFrames` sweep: flush every aggregator whose
    /// interval elapsed and drop those no longer referenced.
    pub async fn process_trunk_frames(&self) {
        let now = std::time::Instant::now();
        for (addr, datagram) in self.trunk.tick_all(now) {
            if let Err(e) = self.socket.send_to(&datagram, addr).await {
                warn!("IAX trunk send to {addr} failed (treated as sent): {e}");
            }
        }
    }

    /// Runs the 2 ms trunk pump until `exiting()` is set (§5).
    pub async fn run_trunk_pump(self: Arc<Self>) {
        let interval = Duration::from_millis(2);
        loop {
            if self.exiting() {
                break;
            }
            self.process_trunk_frames().await;
            tokio::time::sleep(interval).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> IaxConfig {
        IaxConfig {
            bind_address: "127.0.0.1".to_string(),
            port: 0,
            ..IaxConfig::default()
        }
    }

    #[tokio::test]
    async fn unmatched_new_frame_creates_an_inbound_transaction() {
        let engine = IaxEngine::bind(IaxConfig {
            require_call_token: false,
            ..config()
        })
        .await
        .unwrap();
        let addr: SocketAddr = "203.0.113.1:4569".parse().unwrap();
        let frame = FullFrame::iax_control(IaxControl::New, 0, 99, 0, 0, 0);
        engine.add_frame(addr, IaxFrame::Full(frame)).await;
        let event = engine.next_event().await.unwrap();
        assert!(matches!(event, IaxEvent::NewTransaction(_)));
        assert_eq!(engine.active_transaction_count(), 1);
    }

    #[tokio::test]
    async fn unknown_full_frame_gets_an_inval_reply() {
        let engine = IaxEngine::bind(config()).await.unwrap();
        let addr: SocketAddr = "203.0.113.2:4569".parse().unwrap();
        let frame = FullFrame::iax_control(IaxControl::Ack, 0, 7, 0, 0, 0);
        engine.add_frame(addr, IaxFrame::Full(frame)).await;
        assert_eq!(engine.active_transaction_count(), 0);
    }

    #[tokio::test]
    async fn keepalive_like_subclasses_are_swallowed_without_reply() {
        let engine = IaxEngine::bind(config()).await.unwrap();
        let addr: SocketAddr = "203.0.113.3:4569".parse().unwrap();
        let frame = FullFrame::iax_control(IaxControl::TxCnt, 0, 1, 0, 0, 0);
        engine.add_frame(addr, IaxFrame::Full(frame)).await;
        assert_eq!(engine.active_transaction_count(), 0);
    }

    #[tokio::test]
    async fn new_without_call_token_is_rejected_when_required() {
        let engine = IaxEngine::bind(config()).await.unwrap();
        let addr: SocketAddr = "203.0.113.4:4569".parse().unwrap();
        let frame = FullFrame::iax_control(IaxControl::New, 0, 1, 0, 0, 0);
        engine.add_frame(addr, IaxFrame::Full(frame)).await;
        assert_eq!(engine.active_transaction_count(), 0);
    }

    #[tokio::test]
    async fn new_with_empty_call_token_mints_then_accepts_on_resend() {
        let engine = IaxEngine::bind(config()).await.unwrap();
        let peer = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let peer_addr = peer.local_addr().unwrap();

        let mut first = FullFrame::iax_control(IaxControl::New, 0, 1, 0, 0, 0);
        first.ies.append_binary(IeType::CallToken, Bytes::new());
        engine.add_frame(peer_addr, IaxFrame::Full(first)).await;
        assert_eq!(engine.active_transaction_count(), 0);

        let mut buf = [0u8; 1500];
        let (len, _) = peer.recv_from(&mut buf).await.unwrap();
        let reply = match IaxFrame::parse(&buf[..len]).unwrap() {
            IaxFrame::Full(full) => full,
            other => panic!("expected a full frame, got {other:?}"),
        };
        assert_eq!(reply.control(), IaxControl::CallToken);
        let secret = reply
            .ies
            .get(IeType::CallToken)
            .expect("minted CallToken IE")
            .as_bytes();

        let mut second = FullFrame::iax_control(IaxControl::New, 0, 1, 0, 0, 0);
        second.ies.append_binary(IeType::CallToken, secret);
        engine.add_frame(peer_addr, IaxFrame::Full(second)).await;

        let event = engine.next_event().await.unwrap();
        assert!(matches!(event, IaxEvent::NewTransaction(_)));
        assert_eq!(engine.active_transaction_count(), 1);
    }

    #[test]
    fn call_number_allocator_never_hands_out_call_numbers_below_min() {
        let alloc = CallNoAllocator::new();
        for _ in 0..1000 {
            let no = alloc.generate().unwrap();
            assert!(no >= IAX2_MIN_CALLNO && no <= IAX2_MAX_CALLNO);
            alloc.release(no);
        }
    }

    #[test]
    fn call_number_allocator_does_not_double_allocate() {
        let alloc = CallNoAllocator::new();
        let mut allocated = std::collections::HashSet::new();
        for _ in 0..100 {
            let no = alloc.generate().unwrap();
            assert!(allocated.insert(no), "call number {no} allocated twice while outstanding");
        }
        for no in allocated {
            alloc.release(no);
        }
    }

    #[test]
    fn released_call_numbers_are_eventually_reused() {
        let alloc = CallNoAllocator::new();
        let first = alloc.generate().unwrap();
        alloc.release(first);
        let mut seen_again = false;
        for _ in 0..(IAX2_MAX_CALLNO as usize) {
            let no = alloc.generate().unwrap();
            if no == first {
                seen_again = true;
                break;
            }
            alloc.release(no);
        }
        assert!(seen_again);
    }
}
