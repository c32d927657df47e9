//! Bare-metal harness for running externally generated machine code.
//!
//! The harness prints a readiness marker on a memory-mapped UART and then,
//! depending on the variant selected at build time, either parks or jumps into
//! an instruction buffer that was linked at a fixed address. Nothing here
//! allocates, formats, or reports errors: a bad buffer is a hardware fault and
//! an unexpected return is turned into a parked core.
#![cfg_attr(not(test), no_std)]

pub mod buffer;
pub mod channel;
pub mod dispatch;
pub mod variant;


pub use buffer::{CodeBuffer, EntryFn};
pub use channel::{DiagnosticChannel, Mmio, TxRegister};
pub use dispatch::{park, transfer};
pub use variant::{PrintAndHalt, PrintThenTransfer, Selected, Variant};

/// Marker printed when no other marker is configured.
pub const DEFAULT_MARKER: &[u8] = b"OK\n";

/// Argument handed to the instruction buffer when none is configured.
pub const DEFAULT_ARGUMENT: i32 = 1;
