use thiserror::Error;

/// Errors surfaced by the engine, either synchronously from the accessor
/// surface or asynchronously from the emulation worker (in which case they
/// travel through the exception chain and, if unrecovered, come back out of
/// [`Engine::wait_until_finished`](crate::engine::Engine::wait_until_finished)).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EngineError {
    /// The emulator refused to come up, typically because the requested
    /// memory size cannot be mapped.
    #[error("emulator initialization failed: {0}")]
    Init(String),

    #[error("cannot read {size} bytes at {address:#07X}: out of mapped memory")]
    OutOfBoundsRead { address: u64, size: usize },

    #[error("cannot write {size} bytes at {address:#07X}: out of mapped memory")]
    OutOfBoundsWrite { address: u64, size: usize },

    /// An `INT n` was raised and no registered handler claimed it.
    #[error("unhandled interrupt {vector:#04X} (AX={ax:#06X})")]
    UnhandledInterrupt { vector: u8, ax: u16 },

    /// The instruction stream could not be decoded, or decoded to something
    /// outside the supported real-mode subset.
    #[error("invalid instruction at {address:#07X} (first byte {byte:#04X})")]
    InvalidInstruction { address: u64, byte: u8 },

    /// The emulation loop stopped for a reason other than a clean halt.
    #[error("emulation halted: {0}")]
    Halted(String),
}

#[cfg(test)]
mod tests {
    use super::EngineError;

    #[test]
    fn messages_carry_context() {
        let e = EngineError::UnhandledInterrupt {
            vector: 0x99,
            ax: 0x4C00,
        };
        assert_eq!(e.to_string(), "unhandled interrupt 0x99 (AX=0x4C00)");

        let e = EngineError::OutOfBoundsRead {
            address: 0x1FFFFF,
            size: 2,
        };
        assert!(e.to_string().contains("0x1FFFFF"));
    }
}
