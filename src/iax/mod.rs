//! IAX2 (Inter-Asterisk eXchange v2) transport engine: call-number
//! allocation, full/mini frame demultiplexing, call-token anti-spoofing,
//! trunk aggregation, format negotiation, and outbound-timestamp adjust
//! (§3.2, §4.7-§4.10).

mod calltoken;
mod engine;
mod format;
mod frame;
mod timestamp;
mod transaction;
mod trunk;

pub use calltoken::{addr_secret_age, build_addr_secret, check_call_token, CallTokenOutcome};
pub use engine::{IaxEngine, IaxEvent};
pub use format::{negotiate, IaxFormat, MediaType, Negotiated};
pub use frame::{
    FrameType, FullFrame, IaxControl, IaxFrame, IeList, IeType, IeValue, MiniFrame,
};
pub use timestamp::AdjustTsOut;
pub use transaction::{IaxTransaction, PendingRetransmission, TransactionState, TransactionType};
pub use trunk::{MetaTrunkFrame, TrunkInfo, TrunkTable};
