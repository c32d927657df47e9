#![no_std]
#![no_main]

use cortex_m_rt::entry;
use panic_halt as _;
use springboard_core::{CodeBuffer, DiagnosticChannel, Mmio, Selected, Variant};

mod config {
    include!(concat!(env!("OUT_DIR"), "/harness_config.rs"));
}

// The symbols below are read back by `springboard inspect`.

/// Generated instructions, pinned to `BUFFER_ADDRESS` by the `.codebuf`
/// section in `memory.x`.
#[no_mangle]
#[used]
#[link_section = ".codebuf"]
pub static CODE_BUFFER: [u8; config::CODE_BUFFER_LEN] =
    *include_bytes!(concat!(env!("OUT_DIR"), "/codebuf.bin"));

#[no_mangle]
#[used]
#[link_section = ".harness_meta"]
pub static READY_MARKER: [u8; config::READY_MARKER_LEN] = config::READY_MARKER_BYTES;

#[no_mangle]
#[used]
#[link_section = ".harness_meta"]
pub static HARNESS_VARIANT: u8 = <Selected as Variant>::ID;

#[no_mangle]
#[used]
#[link_section = ".harness_meta"]
pub static BUFFER_ARGUMENT: i32 = config::BUFFER_ARGUMENT;

// SAFETY: the buffer is linked at this address and its contents are the
// code generator's contract.
const BUFFER: CodeBuffer = unsafe { CodeBuffer::from_addr(config::BUFFER_ADDRESS) };

#[entry]
fn main() -> ! {
    // SAFETY: UART data register of the board; nothing else writes it.
    let mut channel = DiagnosticChannel::new(unsafe { Mmio::new(config::UART_TX) });

    unsafe { Selected::run(&mut channel, &READY_MARKER, BUFFER, BUFFER_ARGUMENT) }
}
