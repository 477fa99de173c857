//! Real-mode x86 emulation engine for bootloupe.
//!
//! The crate is split the way the debugger consumes it: [`Engine`] is the
//! thread-safe facade (lifecycle, hooks, register/memory accessors), while
//! [`cpu`] and [`memory`] hold the interpreter it drives. Instruction
//! decoding is delegated to `iced-x86`; execution covers the 8086/80186
//! subset boot sectors use.

pub mod cpu;
pub mod engine;
pub mod error;
pub mod memory;
pub mod registers;

pub use cpu::{Cpu, Step};
pub use engine::Engine;
pub use error::EngineError;
pub use memory::Memory;
pub use registers::{Eflags, Registers};
