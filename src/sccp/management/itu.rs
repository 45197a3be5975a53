//! ITU-T variant specifics: 2-octet point codes, SSC congestion reporting.

use super::{ManagementMessage, ManagementMessageType, SccpManagement};
use crate::types::PointCode;

/// Build an SSC (subsystem congestion) message, the one message type with
/// no ANSI counterpart.
pub fn build_ssc(local_pc: PointCode, ssn: u8, smi: u8, congestion_level: u8) -> ManagementMessage {
    ManagementMessage {
        msg_type: ManagementMessageType::Ssc,
        affected_ssn: ssn,
        affected_pc: local_pc,
        smi,
        congestion_level: Some(congestion_level),
    }
}

/// Thin ITU-facing handle over the shared state machine; exists so callers
/// building an ITU stack never have to think about the ANSI PC width.
pub struct ItuManagement(pub SccpManagement);

impl std::ops::Deref for ItuManagement {
    type Target = SccpManagement;
    fn deref(&self) -> &Self::Target {
        &self.0
    }
}
