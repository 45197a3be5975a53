//! # SS7 SCCP and IAX2 signalling stacks
//!
//! Two independent signalling cores:
//!
//! - **SCCP** - Signalling Connection Control Part (ITU Q.713 / ANSI
//!   T1.112), with Global Title Translation and the SCCP Management
//!   subsystem.
//! - **IAX2** - Inter-Asterisk eXchange v2 transport engine: call-number
//!   allocation, frame dispatch, call-token anti-spoofing, trunking.
//!
//! Connection-oriented SS7 (SCOC) message processing is out of scope beyond
//! rejecting unexpected CR with a CREF. MTP layers 1-3 are an external
//! collaborator reached through [`mtp::Mtp3Transport`]; this crate does not
//! implement MTP.

pub mod config;
pub mod errors;
pub mod iax;
pub mod mtp;
pub mod sccp;
pub mod types;

pub use config::{IaxConfig, ManagementConfig, SccpConfig};
pub use errors::{Error, Result};
pub use types::*;

// Protocol layer exports
pub use iax::IaxEngine;
pub use sccp::{GlobalTitle, SccpAddress, SccpCore};

/// Crate version, re-exported for diagnostics/status dumps.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Reserved Subsystem Number for SCCP management peers (SSN=1).
pub const SSN_MANAGEMENT: u8 = 1;

/// Well-known subsystem numbers used in examples and tests.
pub mod ssn {
    pub const HLR: u8 = 6;
    pub const VLR: u8 = 7;
    pub const MSC: u8 = 8;
    pub const GSMSCF: u8 = 147;
}

/// Default IAX2 UDP port (§6.3).
pub const DEFAULT_IAX_PORT: u16 = 4569;

/// The protocol's 4-bit remaining-segments counter caps a message at 16
/// segments (§4.3).
pub const MAX_SCCP_SEGMENTS: u8 = 16;

/// Reserved local call numbers (§3.2, §4.8).
pub const IAX2_MIN_CALLNO: u16 = 2;
pub const IAX2_MAX_CALLNO: u16 = 32767;
pub const IAX2_CALLTOKEN_CALLNO: u16 = 1;
pub const IAX2_CALLTOKEN_REJ_CALLNO: u16 = 1;
