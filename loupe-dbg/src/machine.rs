use std::collections::HashSet;
use std::fs;
use std::sync::{Arc, Mutex};

use anyhow::Context;
use loupe_core::Engine;

use crate::args::Args;
use crate::bios::Bios;
use crate::streams::Stream;
use crate::ui::{Mode, Ui};

const BOOT_ADDRESS: u64 = 0x7C00;
const TRAP_FLAG: u32 = 0x100;

struct DebugFlags {
    breakpoints: HashSet<u64>,
    single_step: bool,
    trap: bool,
    break_on_interrupt: bool,
    break_on_iret: bool,
    prior_iret: bool,
}

/// The debugger coordinator: wires the engine hooks to the UI, owns the
/// breakpoint set and the break-mode switches, and arbitrates the pause
/// barrier between the emulation worker and the operator.
pub struct Machine {
    engine: Engine,
    ui: Ui,
    flags: Arc<Mutex<DebugFlags>>,
    mode: Mode,
}

impl Machine {
    pub fn new(args: &Args) -> anyhow::Result<Self> {
        let image = fs::read(&args.boot_img)
            .with_context(|| format!("cannot read boot image '{}'", args.boot_img.display()))?;
        Self::with_image(args, image)
    }

    /// Builds the machine around an already-loaded boot image.
    pub fn with_image(args: &Args, image: Vec<u8>) -> anyhow::Result<Self> {
        let memory = args.memory as usize * 1024 * 1024;
        let engine = Engine::new(memory)?;

        let loaded = image.len().min(memory - BOOT_ADDRESS as usize);
        engine.write(BOOT_ADDRESS, &image[..loaded])?;
        tracing::info!(
            target: "loupe_dbg::machine",
            "loaded {} byte(s) of boot image at {:#06X}", loaded, BOOT_ADDRESS
        );

        let mode = if args.no_ui {
            Mode::Standard
        } else {
            Mode::Interactive
        };
        let (output, debug) = match mode {
            Mode::Standard => (Stream::echoing_stdout(), Stream::echoing_stderr()),
            Mode::Interactive => (Stream::buffered(), Stream::buffered()),
        };

        let ui = Ui::new(
            mode,
            !args.no_colors,
            engine.clone(),
            output.clone(),
            debug.clone(),
        );
        ui.attach();

        let flags = Arc::new(Mutex::new(DebugFlags {
            breakpoints: args.breakpoints.iter().copied().collect(),
            single_step: args.single_step,
            trap: args.trap,
            break_on_interrupt: args.break_int,
            break_on_iret: args.break_iret,
            prior_iret: false,
        }));

        let bios = Arc::new(Bios::new(
            ui.clone(),
            output.clone(),
            debug.clone(),
            Arc::new(image),
            args.debug_video,
        ));

        // instruction gate: breakpoints, single-step, and the
        // instruction-after-IRET break
        {
            let flags = flags.clone();
            let ui = ui.clone();
            let handle = engine.clone();
            engine.before_instruction(move |address, bytes| {
                let hit = {
                    let mut state = flags.lock().unwrap();
                    let hit = state.breakpoints.contains(&address)
                        || state.single_step
                        || (state.prior_iret && state.break_on_iret);
                    state.prior_iret = bytes.first() == Some(&0xCF);
                    hit
                };
                if hit {
                    enter_pause(&flags, &ui, &handle);
                }
            });
        }

        // interrupt path: debug traps pause, everything else goes to the
        // BIOS registry, bracketed by the break-int/break-iret gates
        {
            let flags = flags.clone();
            let ui = ui.clone();
            let bios = bios.clone();
            let debug = debug.clone();
            engine.on_interrupt(move |vector, engine| {
                if vector == 0x01 || vector == 0x03 {
                    debug.push_line(format!("debug trap (INT {vector:02X}h)"));
                    enter_pause(&flags, &ui, engine);
                    return true;
                }

                if flags.lock().unwrap().break_on_interrupt {
                    enter_pause(&flags, &ui, engine);
                }

                let claimed = bios.dispatch(vector, engine);

                if claimed && flags.lock().unwrap().break_on_iret {
                    enter_pause(&flags, &ui, engine);
                }

                claimed
            });
        }

        // worker faults land in the debug stream; in interactive mode they
        // are swallowed so the screen survives for inspection, in standard
        // mode they propagate to the wait_until_finished caller
        {
            let debug = debug.clone();
            let interactive = mode == Mode::Interactive;
            engine.on_exception(move |error| {
                debug.push_line(format!("Error: {error}"));
                interactive
            });
        }

        {
            let debug = debug.clone();
            engine.on_invalid_memory_access(move |address, size| {
                debug.push_line(format!(
                    "invalid memory access: {size} byte(s) at {address:06X}"
                ));
            });
        }

        Ok(Self {
            engine,
            ui,
            flags,
            mode,
        })
    }

    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    pub fn ui(&self) -> &Ui {
        &self.ui
    }

    pub fn add_breakpoint(&self, address: u64) {
        self.flags.lock().unwrap().breakpoints.insert(address);
    }

    pub fn remove_breakpoint(&self, address: u64) {
        self.flags.lock().unwrap().breakpoints.remove(&address);
    }

    pub fn set_single_step(&self, enabled: bool) {
        self.flags.lock().unwrap().single_step = enabled;
    }

    pub fn set_trap(&self, enabled: bool) {
        self.flags.lock().unwrap().trap = enabled;
    }

    /// Boots the image and runs until the UI is closed (interactive) or the
    /// emulation ends (standard).
    pub fn run(&self) -> anyhow::Result<()> {
        anyhow::ensure!(self.engine.start(BOOT_ADDRESS), "emulation already running");

        match self.mode {
            Mode::Standard => {
                self.ui.run_standard()?;
                self.engine.wait_until_finished()?;
            }
            Mode::Interactive => {
                let result = self.ui.run_interactive();
                self.shutdown();
                result?;
            }
        }

        Ok(())
    }

    /// Stops the engine and releases any barrier the worker is parked on.
    pub fn shutdown(&self) {
        self.engine.stop();
        self.ui.release_waiters();
        let _ = self.engine.wait_until_finished();
    }
}

fn enter_pause(flags: &Arc<Mutex<DebugFlags>>, ui: &Ui, engine: &Engine) {
    tracing::debug!(
        target: "loupe_dbg::machine",
        "paused at {:04X}:{:04X}", engine.cs(), engine.ip()
    );

    let _key = ui.wait_for_user_resume();

    if flags.lock().unwrap().trap {
        engine.set_eflags(engine.eflags() | TRAP_FLAG);
    }
}

#[cfg(test)]
mod tests {
    use super::Machine;
    use crate::args::Args;
    use crate::ui::Tone;
    use clap::Parser;
    use std::time::{Duration, Instant};

    const BOOT: u64 = 0x7C00;

    fn build(extra: &[&str], image: &[u8]) -> Machine {
        let mut argv = vec!["bootloupe"];
        argv.extend_from_slice(extra);
        argv.push("boot.img");
        let args = Args::parse_from(argv);
        Machine::with_image(&args, image.to_vec()).unwrap()
    }

    fn wait_for(what: &str, condition: impl Fn() -> bool) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while !condition() {
            assert!(Instant::now() < deadline, "timed out waiting for {what}");
            std::thread::sleep(Duration::from_millis(1));
        }
    }

    #[test]
    fn breakpoint_pauses_and_enter_resumes() {
        // nop / nop / nop / hlt with a breakpoint on the hlt
        let machine = build(&["-b", "7C03"], &[0x90, 0x90, 0x90, 0xF4]);

        assert!(machine.engine().start(BOOT));
        wait_for("the pause barrier", || {
            let status = machine.ui().inner.status.lock().unwrap();
            status.tone == Tone::Paused
        });

        // the worker is parked before the breakpoint instruction; the state
        // it exposes is frozen there
        assert_eq!(machine.engine().ip(), 0x7C03);

        machine.ui().press_key(b'\n');
        machine.engine().wait_until_finished().unwrap();
        assert_eq!(machine.engine().ip(), 0x7C04);
    }

    #[test]
    fn teletype_output_lands_in_the_output_stream() {
        // mov ah,0x0E / mov al,'H' / int 0x10 / hlt
        let machine = build(&[], &[0xB4, 0x0E, 0xB0, 0x48, 0xCD, 0x10, 0xF4]);

        assert!(machine.engine().start(BOOT));
        machine.engine().wait_until_finished().unwrap();

        assert_eq!(machine.ui().inner.output.contents(), "H");
    }

    #[test]
    fn dos_exit_stops_the_emulation() {
        // mov ah,0x4C / int 0x21 / jmp $
        let machine = build(&[], &[0xB4, 0x4C, 0xCD, 0x21, 0xEB, 0xFE]);

        assert!(machine.engine().start(BOOT));
        machine.engine().wait_until_finished().unwrap();
        assert!(!machine.engine().running());
    }

    #[test]
    fn unknown_interrupt_is_reported_through_the_debug_stream() {
        // int 0x99 / hlt — interactive mode swallows the fault and logs it
        let machine = build(&[], &[0xCD, 0x99, 0xF4]);

        assert!(machine.engine().start(BOOT));
        machine.engine().wait_until_finished().unwrap();

        let debug = machine.ui().inner.debug.contents();
        assert!(debug.contains("unhandled interrupt 0x99"), "got: {debug}");
    }

    #[test]
    fn single_step_pauses_on_every_instruction() {
        let machine = build(&["--single-step"], &[0x90, 0xF4]);

        assert!(machine.engine().start(BOOT));

        for expected_ip in [0x7C00u16, 0x7C01] {
            wait_for("a pause", || {
                machine.engine().ip() == expected_ip
                    && machine.ui().inner.status.lock().unwrap().tone == Tone::Paused
            });
            machine.ui().press_key(b' ');
        }

        machine.engine().wait_until_finished().unwrap();
        assert_eq!(machine.engine().ip(), 0x7C02);
    }

    #[test]
    fn break_on_interrupt_pauses_before_dispatch() {
        // mov ah,0x0E / mov al,'x' / int 0x10 / hlt
        let machine = build(
            &["--break-int"],
            &[0xB4, 0x0E, 0xB0, 0x78, 0xCD, 0x10, 0xF4],
        );

        assert!(machine.engine().start(BOOT));
        wait_for("the pre-dispatch pause", || {
            machine.ui().inner.status.lock().unwrap().tone == Tone::Paused
        });

        // nothing has been written yet while paused
        assert_eq!(machine.ui().inner.output.contents(), "");

        machine.ui().press_key(b'\n');
        machine.engine().wait_until_finished().unwrap();
        assert_eq!(machine.ui().inner.output.contents(), "x");
    }

    #[test]
    fn shutdown_releases_a_parked_worker() {
        let machine = build(&["-b", "7C00"], &[0x90, 0xEB, 0xFD]);

        assert!(machine.engine().start(BOOT));
        wait_for("the pause barrier", || {
            machine.ui().inner.status.lock().unwrap().tone == Tone::Paused
        });

        machine.shutdown();
        assert!(!machine.engine().running());
    }
}
