use crate::buffer::{CodeBuffer, EntryFn};
use crate::channel::{DiagnosticChannel, TxRegister};

/// Print `marker`, then hand control to `buffer` with `argument`.
///
/// The marker always goes out before the jump so an observer can tell "the
/// harness reached the handoff" apart from "the buffer started running". If
/// the buffer returns, the core is parked; the register is not written again.
///
/// # Safety
/// `buffer` must point at code that honors [`EntryFn`] on this target. This is
/// the only place the harness turns an address into a call.
pub unsafe fn transfer<R: TxRegister>(
    channel: &mut DiagnosticChannel<R>,
    marker: &[u8],
    buffer: CodeBuffer,
    argument: i32,
) -> ! {
    let entry: EntryFn = core::mem::transmute::<usize, EntryFn>(buffer.entry_point());

    channel.emit(marker);
    entry(argument);

    park()
}

/// Park the core forever.
///
/// This is the harness' only terminal state. It never touches memory, so a
/// parked target is indistinguishable from one whose buffer loops in place
/// except through a debugger.
#[inline(never)]
pub fn park() -> ! {
    loop {
        core::hint::spin_loop();
    }
}
