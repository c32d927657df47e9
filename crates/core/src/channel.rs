use core::ptr;

/// A write-only transmit cell.
///
/// Every call is one externally observable transmit event. Implementations
/// must not buffer, batch, or reorder writes.
pub trait TxRegister {
    fn write(&mut self, value: u32);
}

/// Memory-mapped 32-bit transmit register at a fixed physical address.
#[derive(Debug)]
pub struct Mmio {
    addr: *mut u32,
}

impl Mmio {
    /// # Safety
    /// `addr` must be a mapped, 4-byte aligned device register for the whole
    /// run, and this must be its only writer.
    pub const unsafe fn new(addr: usize) -> Self {
        Self {
            addr: addr as *mut u32,
        }
    }
}

impl TxRegister for Mmio {
    #[inline(always)]
    fn write(&mut self, value: u32) {
        // SAFETY: upheld by `Mmio::new`. A bus fault here is not recoverable.
        unsafe { ptr::write_volatile(self.addr, value) }
    }
}

/// Character-at-a-time output over a [`TxRegister`].
///
/// Usable straight out of reset: no heap, no formatting, no state besides the
/// register itself.
#[derive(Debug)]
pub struct DiagnosticChannel<R: TxRegister> {
    reg: R,
}

impl<R: TxRegister> DiagnosticChannel<R> {
    pub const fn new(reg: R) -> Self {
        Self { reg }
    }

    /// Write each byte of `message` to the register, in order, stopping at the
    /// first NUL. The NUL itself is never written.
    pub fn emit(&mut self, message: &[u8]) {
        for &byte in message {
            if byte == 0 {
                break;
            }
            self.reg.write(byte as u32);
        }
    }

    pub fn emit_str(&mut self, message: &str) {
        self.emit(message.as_bytes());
    }

    pub fn register(&self) -> &R {
        &self.reg
    }

    pub fn into_inner(self) -> R {
        self.reg
    }
}
