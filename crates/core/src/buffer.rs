/// Calling convention of the instruction buffer: one integer argument, no
/// result consumed.
pub type EntryFn = extern "C" fn(i32);

/// Address-only view of an externally supplied instruction buffer.
///
/// The harness never owns the bytes. Length, alignment and contents are fixed
/// when the image is linked and are not checked here.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CodeBuffer {
    addr: usize,
}

impl CodeBuffer {
    /// # Safety
    /// `addr` must hold a valid entry point for the target instruction set
    /// and [`EntryFn`], and must stay executable until control is transferred.
    pub const unsafe fn from_addr(addr: usize) -> Self {
        Self { addr }
    }

    pub const fn addr(&self) -> usize {
        self.addr
    }

    /// Address a branch-with-link must target to enter the buffer.
    ///
    /// On Thumb-only cores the low bit selects the instruction set and has to
    /// be set, otherwise the core faults on the first fetch.
    pub const fn entry_point(&self) -> usize {
        #[cfg(thumb)]
        {
            self.addr | 1
        }
        #[cfg(not(thumb))]
        {
            self.addr
        }
    }
}
