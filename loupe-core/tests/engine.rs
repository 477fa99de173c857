//! Engine facade lifecycle, hook dispatch and bounds contracts, exercised
//! with real worker threads.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use loupe_core::{Engine, EngineError};

const MEMORY: usize = 2 * 1024 * 1024;
const BOOT: u64 = 0x7C00;

fn engine_with(program: &[u8]) -> Engine {
    let engine = Engine::new(MEMORY).unwrap();
    engine.write(BOOT, program).unwrap();
    engine
}

fn wait_for(what: &str, condition: impl Fn() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !condition() {
        assert!(Instant::now() < deadline, "timed out waiting for {what}");
        std::thread::sleep(Duration::from_millis(1));
    }
}

#[test]
fn boot_sector_halt_fires_one_start_and_one_stop() {
    let engine = engine_with(&[0xF4]);

    let starts = Arc::new(AtomicUsize::new(0));
    let stops = Arc::new(AtomicUsize::new(0));
    {
        let starts = starts.clone();
        engine.on_start(move || {
            starts.fetch_add(1, Ordering::SeqCst);
        });
        let stops = stops.clone();
        engine.on_stop(move || {
            stops.fetch_add(1, Ordering::SeqCst);
        });
    }

    assert!(engine.start(BOOT));
    engine.wait_until_finished().unwrap();
    wait_for("onStop burst", || stops.load(Ordering::SeqCst) == 1);

    assert_eq!(starts.load(Ordering::SeqCst), 1);
    assert_eq!(engine.ip(), 0x7C01);
    assert!(!engine.running());
}

#[test]
fn teletype_interrupt_reaches_the_handler() {
    // mov ah,0x0E / mov al,'A' / int 0x10 / hlt
    let engine = engine_with(&[0xB4, 0x0E, 0xB0, 0x41, 0xCD, 0x10, 0xF4]);

    let output = Arc::new(Mutex::new(String::new()));
    {
        let output = output.clone();
        engine.on_interrupt(move |vector, engine| {
            if vector == 0x10 && engine.ah() == 0x0E {
                output.lock().unwrap().push(engine.al() as char);
                return true;
            }
            false
        });
    }

    assert!(engine.start(BOOT));
    engine.wait_until_finished().unwrap();

    assert_eq!(*output.lock().unwrap(), "A");
}

#[test]
fn interrupt_handlers_run_in_registration_order_until_claimed() {
    let engine = engine_with(&[0xCD, 0x21, 0xF4]);

    let order = Arc::new(Mutex::new(Vec::new()));
    for (id, claims) in [(1, false), (2, true), (3, false)] {
        let order = order.clone();
        engine.on_interrupt(move |_, _| {
            order.lock().unwrap().push(id);
            claims
        });
    }

    assert!(engine.start(BOOT));
    engine.wait_until_finished().unwrap();

    assert_eq!(*order.lock().unwrap(), vec![1, 2]);
}

#[test]
fn unhandled_interrupt_reaches_the_exception_chain_and_the_waiter() {
    let engine = engine_with(&[0xB8, 0x00, 0x4C, 0xCD, 0x99, 0xF4]);

    let seen = Arc::new(Mutex::new(None));
    {
        let seen = seen.clone();
        engine.on_exception(move |error| {
            *seen.lock().unwrap() = Some(error.clone());
            false
        });
    }

    assert!(engine.start(BOOT));
    let fault = engine.wait_until_finished().unwrap_err();

    let expected = EngineError::UnhandledInterrupt {
        vector: 0x99,
        ax: 0x4C00,
    };
    assert_eq!(fault, expected);
    assert_eq!(seen.lock().unwrap().clone(), Some(expected));
}

#[test]
fn exception_handler_returning_true_recovers_the_run() {
    let engine = engine_with(&[0xCD, 0x99, 0xF4]);
    engine.on_exception(|_| true);

    assert!(engine.start(BOOT));
    engine.wait_until_finished().unwrap();
    assert!(!engine.running());
}

#[test]
fn double_start_returns_false_without_side_effects() {
    // jmp $ spins until stopped
    let engine = engine_with(&[0xEB, 0xFE]);

    let starts = Arc::new(AtomicUsize::new(0));
    {
        let starts = starts.clone();
        engine.on_start(move || {
            starts.fetch_add(1, Ordering::SeqCst);
        });
    }

    assert!(engine.start(BOOT));
    wait_for("worker to run", || engine.running());
    assert!(!engine.start(BOOT));
    assert_eq!(starts.load(Ordering::SeqCst), 1);

    engine.stop();
    engine.wait_until_finished().unwrap();
    assert!(!engine.running());
}

#[test]
fn stop_is_idempotent_when_stopped() {
    let engine = engine_with(&[0xF4]);
    engine.stop();
    assert!(!engine.running());
}

#[test]
fn memory_roundtrip_and_strict_bounds() {
    let engine = Engine::new(MEMORY).unwrap();

    let payload = vec![0x13, 0x37, 0xC0, 0xDE];
    engine.write(0x1000, &payload).unwrap();
    assert_eq!(engine.read(0x1000, 4).unwrap(), payload);

    assert_eq!(
        engine.read(0x1FFFFF, 2),
        Err(EngineError::OutOfBoundsRead {
            address: 0x1FFFFF,
            size: 2
        })
    );
    assert_eq!(
        engine.write(0x1FFFFF, &[1, 2]),
        Err(EngineError::OutOfBoundsWrite {
            address: 0x1FFFFF,
            size: 2
        })
    );
    assert_eq!(engine.memory_size(), MEMORY);
}

#[test]
fn carry_accessor_touches_only_bit_zero() {
    let engine = Engine::new(MEMORY).unwrap();
    engine.set_eflags(0x0246);

    engine.set_cf(true);
    assert!(engine.cf());
    assert_eq!(engine.eflags(), 0x0247);

    engine.set_cf(false);
    assert!(!engine.cf());
    assert_eq!(engine.eflags(), 0x0246);
}

#[test]
fn instruction_hooks_observe_every_address_in_order() {
    let engine = engine_with(&[0x90, 0x90, 0xF4]);

    let before = Arc::new(Mutex::new(Vec::new()));
    let after = Arc::new(Mutex::new(Vec::new()));
    {
        let before = before.clone();
        engine.before_instruction(move |address, bytes| {
            before.lock().unwrap().push((address, bytes.to_vec()));
        });
        let after = after.clone();
        engine.after_instruction(move |address, regs, _| {
            after.lock().unwrap().push((address, regs.ip()));
        });
    }

    assert!(engine.start(BOOT));
    engine.wait_until_finished().unwrap();

    assert_eq!(
        *before.lock().unwrap(),
        vec![
            (0x7C00, vec![0x90]),
            (0x7C01, vec![0x90]),
            (0x7C02, vec![0xF4]),
        ]
    );
    // the after hook sees IP already advanced past each instruction
    assert_eq!(
        *after.lock().unwrap(),
        vec![(0x7C00, 0x7C01), (0x7C01, 0x7C02), (0x7C02, 0x7C03)]
    );
}

#[test]
fn memory_access_hooks_see_data_writes() {
    // mov ax,0x1234 / mov [0x9000],ax / hlt
    let engine = engine_with(&[0xB8, 0x34, 0x12, 0xA3, 0x00, 0x90, 0xF4]);

    let accesses = Arc::new(Mutex::new(Vec::new()));
    let invalid = Arc::new(AtomicBool::new(false));
    {
        let accesses = accesses.clone();
        engine.on_valid_memory_access(move |address, size| {
            accesses.lock().unwrap().push((address, size));
        });
        let invalid = invalid.clone();
        engine.on_invalid_memory_access(move |_, _| {
            invalid.store(true, Ordering::SeqCst);
        });
    }

    assert!(engine.start(BOOT));
    engine.wait_until_finished().unwrap();

    assert!(accesses.lock().unwrap().contains(&(0x9000, 2)));
    assert!(!invalid.load(Ordering::SeqCst));
    assert_eq!(engine.read(0x9000, 2).unwrap(), vec![0x34, 0x12]);
}

#[test]
fn get_address_is_segment_times_sixteen_plus_offset() {
    assert_eq!(Engine::get_address(0, 0x7C00), 0x7C00);
    assert_eq!(Engine::get_address(0x07C0, 0), 0x7C00);
    assert_eq!(Engine::get_address(0xB800, 0x0010), 0xB8010);
}

#[test]
fn handlers_may_reenter_the_engine_surface() {
    // int 0x13 / hlt — the handler reads and writes registers and memory
    let engine = engine_with(&[0xCD, 0x13, 0xF4]);

    engine.on_interrupt(|vector, engine| {
        if vector != 0x13 {
            return false;
        }
        let sector = vec![0xAB; 16];
        engine.write(0x0500, &sector).unwrap();
        engine.set_ax(0x0001);
        engine.set_cf(false);
        true
    });

    assert!(engine.start(BOOT));
    engine.wait_until_finished().unwrap();

    assert_eq!(engine.ax(), 0x0001);
    assert_eq!(engine.read(0x0500, 16).unwrap(), vec![0xAB; 16]);
}
