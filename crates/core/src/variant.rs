use crate::buffer::CodeBuffer;
use crate::channel::{DiagnosticChannel, TxRegister};
use crate::dispatch;

/// A harness behavior fixed at build time.
///
/// The set is closed: [`PrintAndHalt`] and [`PrintThenTransfer`]. Which one the
/// firmware runs is decided by the `transfer` cargo feature through
/// [`Selected`], so there is no runtime branch between them.
pub trait Variant {
    const NAME: &'static str;
    /// Value exported in the image so host tooling can tell variants apart.
    const ID: u8;
    const TRANSFERS: bool;

    /// # Safety
    /// For transferring variants, `buffer` carries the [`dispatch::transfer`]
    /// contract.
    unsafe fn run<R: TxRegister>(
        channel: &mut DiagnosticChannel<R>,
        marker: &[u8],
        buffer: CodeBuffer,
        argument: i32,
    ) -> !;
}

/// Print the readiness marker and park. The buffer is never entered.
#[derive(Debug)]
pub enum PrintAndHalt {}

impl Variant for PrintAndHalt {
    const NAME: &'static str = "print-and-halt";
    const ID: u8 = 0;
    const TRANSFERS: bool = false;

    unsafe fn run<R: TxRegister>(
        channel: &mut DiagnosticChannel<R>,
        marker: &[u8],
        _buffer: CodeBuffer,
        _argument: i32,
    ) -> ! {
        channel.emit(marker);
        dispatch::park()
    }
}

/// Print the readiness marker and jump into the buffer.
#[derive(Debug)]
pub enum PrintThenTransfer {}

impl Variant for PrintThenTransfer {
    const NAME: &'static str = "print-then-transfer";
    const ID: u8 = 1;
    const TRANSFERS: bool = true;

    unsafe fn run<R: TxRegister>(
        channel: &mut DiagnosticChannel<R>,
        marker: &[u8],
        buffer: CodeBuffer,
        argument: i32,
    ) -> ! {
        dispatch::transfer(channel, marker, buffer, argument)
    }
}

#[cfg(feature = "transfer")]
pub type Selected = PrintThenTransfer;

#[cfg(not(feature = "transfer"))]
pub type Selected = PrintAndHalt;

/// Name of a variant from its exported id, if it is one of ours.
pub fn name_of(id: u8) -> Option<&'static str> {
    match id {
        PrintAndHalt::ID => Some(PrintAndHalt::NAME),
        PrintThenTransfer::ID => Some(PrintThenTransfer::NAME),
        _ => None,
    }
}
