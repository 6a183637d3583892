// tkv-common - Shared record types and codec for the TabletKV proxy client
//
// This crate turns text-or-binary caller input into canonical wire bytes and
// decodes scan records back into dual views. It performs no I/O.

pub mod codec;
pub mod error;
pub mod range;
pub mod types;
pub mod whole_row;

// Re-export for convenience
pub use codec::*;
pub use error::*;
pub use range::*;
pub use types::*;
pub use whole_row::*;
