//! SCCP (Signalling Connection Control Part), ITU-T Q.711-Q.716 / ANSI
//! T1.112, connectionless services plus Global Title Translation and the
//! SCCP Management subsystem.

mod address;
mod codec;
mod gtt;
pub mod management;
mod messages;
mod routing;
mod segmentation;

pub use address::{AddressIndicator, DigitTable, GlobalTitle, SccpAddress};
pub use gtt::{GlobalTitleTranslator, GttRoute, PrefixGtt};
pub use messages::{MessageType, ReturnCause, SccpMessage};
pub use routing::{SccpCore, SccpCounters, SccpUser};
pub use segmentation::{max_data_len, select_message_type, MtuLimits, ReassemblyOutcome};
