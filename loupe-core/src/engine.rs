use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread;

use crate::cpu::{Cpu, Step};
use crate::error::EngineError;
use crate::memory::Memory;
use crate::registers::Registers;

type StartHook = Arc<dyn Fn() + Send + Sync>;
type StopHook = Arc<dyn Fn() + Send + Sync>;
type InterruptHook = Arc<dyn Fn(u8, &Engine) -> bool + Send + Sync>;
type ExceptionHook = Arc<dyn Fn(&EngineError) -> bool + Send + Sync>;
type BeforeInstructionHook = Arc<dyn Fn(u64, &[u8]) + Send + Sync>;
type AfterInstructionHook = Arc<dyn Fn(u64, &Registers, &[u8]) + Send + Sync>;
type MemoryAccessHook = Arc<dyn Fn(u64, usize) + Send + Sync>;

struct Core {
    cpu: Cpu,
    mem: Memory,
}

#[derive(Default)]
struct Hooks {
    on_start: Vec<StartHook>,
    on_stop: Vec<StopHook>,
    on_interrupt: Vec<InterruptHook>,
    on_exception: Vec<ExceptionHook>,
    before_instruction: Vec<BeforeInstructionHook>,
    after_instruction: Vec<AfterInstructionHook>,
    on_valid_memory_access: Vec<MemoryAccessHook>,
    on_invalid_memory_access: Vec<MemoryAccessHook>,
}

struct Shared {
    core: Mutex<Core>,
    hooks: Mutex<Hooks>,
    running: Mutex<bool>,
    finished: Condvar,
    stop_requested: AtomicBool,
    fault: Mutex<Option<EngineError>>,
    // serializes the start/stop transitions so the onStart/onStop bursts of
    // consecutive runs cannot interleave
    transition: Mutex<()>,
}

/// The emulation engine facade. Owns the CPU and guest RAM, runs the
/// emulation on a worker thread, and fans events out to the registered
/// hooks.
///
/// `Engine` is a cheap cloneable handle; hooks receive one and may freely
/// call back into the accessor surface. No lock is ever held across a hook
/// invocation: the CPU/RAM core sits behind one short-critical-section
/// mutex, the hook registries behind another, and the lifecycle flag is its
/// own mutex+condvar pair. A worker blocked inside a hook therefore owns
/// nothing, and everything another thread observes through the accessors is
/// the state frozen at that hook's instruction boundary.
#[derive(Clone)]
pub struct Engine {
    shared: Arc<Shared>,
}

macro_rules! accessors {
    ($($get:ident/$set:ident: $ty:ty),+ $(,)?) => {$(
        pub fn $get(&self) -> $ty {
            self.shared.core.lock().unwrap().cpu.regs.$get()
        }

        pub fn $set(&self, value: $ty) {
            self.shared.core.lock().unwrap().cpu.regs.$set(value);
        }
    )+};
}

impl Engine {
    /// Builds an engine with `memory` bytes of RAM mapped read+write+execute
    /// at `[0, memory)`.
    pub fn new(memory: usize) -> Result<Self, EngineError> {
        let mem = Memory::new(memory)?;

        Ok(Self {
            shared: Arc::new(Shared {
                core: Mutex::new(Core {
                    cpu: Cpu::new(),
                    mem,
                }),
                hooks: Mutex::new(Hooks::default()),
                running: Mutex::new(false),
                finished: Condvar::new(),
                stop_requested: AtomicBool::new(false),
                fault: Mutex::new(None),
                transition: Mutex::new(()),
            }),
        })
    }

    /// Real-mode linear address: `segment * 16 + offset`.
    pub fn get_address(segment: u16, offset: u16) -> u64 {
        Cpu::linear(segment, offset)
    }

    pub fn memory_size(&self) -> usize {
        self.shared.core.lock().unwrap().mem.size()
    }

    pub fn read(&self, address: u64, size: usize) -> Result<Vec<u8>, EngineError> {
        self.shared.core.lock().unwrap().mem.read(address, size)
    }

    pub fn write(&self, address: u64, bytes: &[u8]) -> Result<(), EngineError> {
        self.shared.core.lock().unwrap().mem.write(address, bytes)
    }

    /// Snapshot of the whole register file.
    pub fn registers(&self) -> Registers {
        self.shared.core.lock().unwrap().cpu.regs
    }

    accessors! {
        al/set_al: u8, ah/set_ah: u8, bl/set_bl: u8, bh/set_bh: u8,
        cl/set_cl: u8, ch/set_ch: u8, dl/set_dl: u8, dh/set_dh: u8,
        ax/set_ax: u16, bx/set_bx: u16, cx/set_cx: u16, dx/set_dx: u16,
        si/set_si: u16, di/set_di: u16, sp/set_sp: u16, bp/set_bp: u16,
        cs/set_cs: u16, ds/set_ds: u16, ss/set_ss: u16, es/set_es: u16,
        fs/set_fs: u16, gs/set_gs: u16, ip/set_ip: u16,
        eax/set_eax: u32, ebx/set_ebx: u32, ecx/set_ecx: u32, edx/set_edx: u32,
        esi/set_esi: u32, edi/set_edi: u32, esp/set_esp: u32, ebp/set_ebp: u32,
        eip/set_eip: u32,
    }

    pub fn eflags(&self) -> u32 {
        self.shared.core.lock().unwrap().cpu.regs.eflags()
    }

    pub fn set_eflags(&self, value: u32) {
        self.shared.core.lock().unwrap().cpu.regs.set_eflags(value);
    }

    /// EFLAGS bit 0.
    pub fn cf(&self) -> bool {
        self.shared.core.lock().unwrap().cpu.regs.cf()
    }

    /// Read-modify-write of EFLAGS bit 0 under a single lock acquisition.
    pub fn set_cf(&self, value: bool) {
        self.shared.core.lock().unwrap().cpu.regs.set_cf(value);
    }

    // ---- hook registration ------------------------------------------------

    pub fn on_start(&self, hook: impl Fn() + Send + Sync + 'static) {
        self.shared.hooks.lock().unwrap().on_start.push(Arc::new(hook));
    }

    pub fn on_stop(&self, hook: impl Fn() + Send + Sync + 'static) {
        self.shared.hooks.lock().unwrap().on_stop.push(Arc::new(hook));
    }

    /// Interrupt handlers run in registration order; the first to return
    /// `true` claims the interrupt. If none does, the worker faults with
    /// [`EngineError::UnhandledInterrupt`].
    pub fn on_interrupt(&self, hook: impl Fn(u8, &Engine) -> bool + Send + Sync + 'static) {
        self.shared
            .hooks
            .lock()
            .unwrap()
            .on_interrupt
            .push(Arc::new(hook));
    }

    /// Exception handlers observe worker faults; any returning `true`
    /// swallows the fault and the run ends cleanly.
    pub fn on_exception(&self, hook: impl Fn(&EngineError) -> bool + Send + Sync + 'static) {
        self.shared
            .hooks
            .lock()
            .unwrap()
            .on_exception
            .push(Arc::new(hook));
    }

    pub fn before_instruction(&self, hook: impl Fn(u64, &[u8]) + Send + Sync + 'static) {
        self.shared
            .hooks
            .lock()
            .unwrap()
            .before_instruction
            .push(Arc::new(hook));
    }

    pub fn after_instruction(
        &self,
        hook: impl Fn(u64, &Registers, &[u8]) + Send + Sync + 'static,
    ) {
        self.shared
            .hooks
            .lock()
            .unwrap()
            .after_instruction
            .push(Arc::new(hook));
    }

    pub fn on_valid_memory_access(&self, hook: impl Fn(u64, usize) + Send + Sync + 'static) {
        self.shared
            .hooks
            .lock()
            .unwrap()
            .on_valid_memory_access
            .push(Arc::new(hook));
        self.shared.core.lock().unwrap().mem.set_watch(true);
    }

    pub fn on_invalid_memory_access(&self, hook: impl Fn(u64, usize) + Send + Sync + 'static) {
        self.shared
            .hooks
            .lock()
            .unwrap()
            .on_invalid_memory_access
            .push(Arc::new(hook));
        self.shared.core.lock().unwrap().mem.set_watch(true);
    }

    // ---- lifecycle --------------------------------------------------------

    pub fn running(&self) -> bool {
        *self.shared.running.lock().unwrap()
    }

    /// Starts emulation at `address` (CS stays as-is; the boot contract is
    /// CS=0, IP=0x7C00). Returns `false` without side effects when a run is
    /// already in progress.
    pub fn start(&self, address: u64) -> bool {
        let _burst = self.shared.transition.lock().unwrap();

        {
            let mut running = self.shared.running.lock().unwrap();
            if *running {
                return false;
            }
            *running = true;
        }

        self.shared.stop_requested.store(false, Ordering::SeqCst);
        *self.shared.fault.lock().unwrap() = None;
        self.shared.core.lock().unwrap().cpu.regs.set_eip(address as u32);

        tracing::debug!(target: "loupe_core::engine", "starting emulation at {:06X}", address);

        let on_start = self.shared.hooks.lock().unwrap().on_start.clone();
        for hook in &on_start {
            hook();
        }

        let engine = self.clone();
        thread::spawn(move || engine.run_worker());

        true
    }

    /// Requests a halt at the next instruction boundary. No-op when stopped.
    pub fn stop(&self) {
        if !self.running() {
            return;
        }

        tracing::debug!(target: "loupe_core::engine", "stop requested");
        self.shared.stop_requested.store(true, Ordering::SeqCst);
    }

    /// Blocks until the worker has transitioned to stopped. Returns the
    /// fault that ended the run, if the exception chain left it unrecovered.
    pub fn wait_until_finished(&self) -> Result<(), EngineError> {
        let mut running = self.shared.running.lock().unwrap();
        while *running {
            running = self.shared.finished.wait(running).unwrap();
        }
        drop(running);

        match self.shared.fault.lock().unwrap().clone() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    // ---- worker -----------------------------------------------------------

    fn run_worker(&self) {
        let error = match self.run_loop() {
            Ok(()) => None,
            Err(error) => {
                tracing::error!(target: "loupe_core::engine", "emulation fault: {error}");

                let handlers = self.shared.hooks.lock().unwrap().on_exception.clone();
                let mut handled = false;
                for handler in &handlers {
                    if handler(&error) {
                        handled = true;
                    }
                }

                if handled {
                    None
                } else {
                    Some(error)
                }
            }
        };

        let _burst = self.shared.transition.lock().unwrap();
        *self.shared.fault.lock().unwrap() = error;
        *self.shared.running.lock().unwrap() = false;

        let on_stop = self.shared.hooks.lock().unwrap().on_stop.clone();
        for hook in &on_stop {
            hook();
        }

        self.shared.finished.notify_all();
        tracing::debug!(target: "loupe_core::engine", "emulation worker finished");
    }

    fn run_loop(&self) -> Result<(), EngineError> {
        loop {
            if self.shared.stop_requested.load(Ordering::SeqCst) {
                return Ok(());
            }

            let (address, bytes) = {
                let core = self.shared.core.lock().unwrap();
                core.cpu.peek(&core.mem)?
            };

            let before = self.shared.hooks.lock().unwrap().before_instruction.clone();
            for hook in &before {
                // a hook may block the worker here (breakpoints); it owns no
                // lock, so other threads can inspect the frozen state
                hook(address, &bytes);
            }

            if self.shared.stop_requested.load(Ordering::SeqCst) {
                return Ok(());
            }

            let (step, accesses, regs) = {
                let mut guard = self.shared.core.lock().unwrap();
                let core = &mut *guard;
                let step = core.cpu.step(&mut core.mem);
                let accesses = core.mem.take_accesses();
                let regs = core.cpu.regs;
                (step, accesses, regs)
            };

            if !accesses.is_empty() {
                let (valid, invalid) = {
                    let hooks = self.shared.hooks.lock().unwrap();
                    (
                        hooks.on_valid_memory_access.clone(),
                        hooks.on_invalid_memory_access.clone(),
                    )
                };
                for access in &accesses {
                    let hooks = if access.valid { &valid } else { &invalid };
                    for hook in hooks {
                        hook(access.address, access.size);
                    }
                }
            }

            let step = step?;

            let after = self.shared.hooks.lock().unwrap().after_instruction.clone();
            for hook in &after {
                hook(address, &regs, &bytes);
            }

            match step {
                Step::Retired => {}
                Step::Halted => {
                    tracing::debug!(target: "loupe_core::engine", "HLT at {:06X}", address);
                    return Ok(());
                }
                Step::Interrupt(vector) => self.dispatch_interrupt(vector)?,
            }

            // EFLAGS.TF raises the single-step trap once the instruction has
            // retired, as the hardware would
            if regs.eflags.trap() {
                self.dispatch_interrupt(1)?;
            }
        }
    }

    /// The interrupt trampoline: snapshots the handler registry, then walks
    /// it in registration order outside any lock until a handler claims the
    /// vector.
    fn dispatch_interrupt(&self, vector: u8) -> Result<(), EngineError> {
        let handlers = self.shared.hooks.lock().unwrap().on_interrupt.clone();

        for handler in &handlers {
            if handler(vector, self) {
                return Ok(());
            }
        }

        Err(EngineError::UnhandledInterrupt {
            vector,
            ax: self.ax(),
        })
    }
}
