//! Interpreter conformance: hand-assembled real-mode programs loaded at
//! 0x7C00, executed to completion or stepped one instruction at a time.

use loupe_core::{Cpu, Memory, Step};

const LOAD: u16 = 0x7C00;

fn machine(program: &[u8]) -> (Cpu, Memory) {
    let mut mem = Memory::new(0x20000).unwrap();
    mem.write(LOAD.into(), program).unwrap();

    let mut cpu = Cpu::new();
    cpu.regs.set_ip(LOAD);
    cpu.regs.set_sp(0x7000);

    (cpu, mem)
}

/// Runs until HLT; interrupts are ignored (execution continues after them).
fn run(program: &[u8]) -> (Cpu, Memory) {
    let (mut cpu, mut mem) = machine(program);
    for _ in 0..10_000 {
        match cpu.step(&mut mem).unwrap() {
            Step::Halted => return (cpu, mem),
            _ => {}
        }
    }
    panic!("program did not halt");
}

#[test]
fn hlt_leaves_ip_past_the_instruction() {
    let (cpu, _) = run(&[0xF4]);
    assert_eq!(cpu.regs.ip(), LOAD + 1);
}

#[test]
fn mov_imm_and_overflowing_add() {
    // mov ax,5 / add ax,0xFFFB / hlt
    let (cpu, _) = run(&[0xB8, 0x05, 0x00, 0x05, 0xFB, 0xFF, 0xF4]);
    assert_eq!(cpu.regs.ax(), 0);
    assert!(cpu.regs.eflags.carry());
    assert!(cpu.regs.eflags.zero());
    assert!(!cpu.regs.eflags.overflow());
}

#[test]
fn mov_to_high_and_low_halves() {
    // mov ah,0x0E / mov al,0x41 / hlt
    let (cpu, _) = run(&[0xB4, 0x0E, 0xB0, 0x41, 0xF4]);
    assert_eq!(cpu.regs.ax(), 0x0E41);
}

#[test]
fn push_pop_roundtrip() {
    // mov ax,0x1234 / push ax / pop bx / hlt
    let (cpu, _) = run(&[0xB8, 0x34, 0x12, 0x50, 0x5B, 0xF4]);
    assert_eq!(cpu.regs.bx(), 0x1234);
    assert_eq!(cpu.regs.sp(), 0x7000);
}

#[test]
fn short_jump_skips_over() {
    // jmp +1 / inc ax / hlt
    let (cpu, _) = run(&[0xEB, 0x01, 0x40, 0xF4]);
    assert_eq!(cpu.regs.ax(), 0);
    assert_eq!(cpu.regs.ip(), LOAD + 4);
}

#[test]
fn conditional_jump_not_taken_falls_through() {
    // mov ax,1 / dec ax / jnz +1 / inc ax / hlt
    let (cpu, _) = run(&[0xB8, 0x01, 0x00, 0x48, 0x75, 0x01, 0x40, 0xF4]);
    assert_eq!(cpu.regs.ax(), 1);
}

#[test]
fn conditional_jump_taken() {
    // mov ax,2 / dec ax / jnz +1 / inc ax / hlt
    let (cpu, _) = run(&[0xB8, 0x02, 0x00, 0x48, 0x75, 0x01, 0x40, 0xF4]);
    assert_eq!(cpu.regs.ax(), 1);
}

#[test]
fn loop_counts_cx_down() {
    // mov cx,3 / inc ax / loop -3 / hlt
    let (cpu, _) = run(&[0xB9, 0x03, 0x00, 0x40, 0xE2, 0xFD, 0xF4]);
    assert_eq!(cpu.regs.ax(), 3);
    assert_eq!(cpu.regs.cx(), 0);
}

#[test]
fn call_and_ret_balance_the_stack() {
    // call +2 / hlt / <pad> / ret
    let (cpu, _) = run(&[0xE8, 0x02, 0x00, 0xF4, 0x00, 0xC3]);
    assert_eq!(cpu.regs.sp(), 0x7000);
    assert_eq!(cpu.regs.ip(), LOAD + 4);
}

#[test]
fn rep_stosb_fills_memory() {
    // mov al,0xAB / mov cx,4 / mov di,0x8000 / cld / rep stosb / hlt
    let (cpu, mem) = run(&[
        0xB0, 0xAB, 0xB9, 0x04, 0x00, 0xBF, 0x00, 0x80, 0xFC, 0xF3, 0xAA, 0xF4,
    ]);
    assert_eq!(mem.read(0x8000, 4).unwrap(), vec![0xAB; 4]);
    assert_eq!(cpu.regs.cx(), 0);
    assert_eq!(cpu.regs.di(), 0x8004);
}

#[test]
fn rep_movsb_copies_code_bytes() {
    // mov si,0x7C00 / mov di,0x9000 / mov cx,2 / cld / rep movsb / hlt
    let (cpu, mem) = run(&[
        0xBE, 0x00, 0x7C, 0xBF, 0x00, 0x90, 0xB9, 0x02, 0x00, 0xFC, 0xF3, 0xA4, 0xF4,
    ]);
    assert_eq!(mem.read(0x9000, 2).unwrap(), vec![0xBE, 0x00]);
    assert_eq!(cpu.regs.si(), 0x7C02);
    assert_eq!(cpu.regs.di(), 0x9002);
}

#[test]
fn int_reports_vector_with_ip_past_it() {
    // mov ah,0x0E / int 0x10 / hlt
    let (mut cpu, mut mem) = machine(&[0xB4, 0x0E, 0xCD, 0x10, 0xF4]);

    assert_eq!(cpu.step(&mut mem).unwrap(), Step::Retired);
    assert_eq!(cpu.step(&mut mem).unwrap(), Step::Interrupt(0x10));
    assert_eq!(cpu.regs.ip(), LOAD + 4);
    assert_eq!(cpu.step(&mut mem).unwrap(), Step::Halted);
}

#[test]
fn divide_by_zero_raises_vector_zero() {
    // mov bl,0 / div bl
    let (mut cpu, mut mem) = machine(&[0xB3, 0x00, 0xF6, 0xF3]);

    assert_eq!(cpu.step(&mut mem).unwrap(), Step::Retired);
    assert_eq!(cpu.step(&mut mem).unwrap(), Step::Interrupt(0));
}

#[test]
fn word_division_splits_quotient_and_remainder() {
    // mov ax,100 / mov bx,7 / xor dx,dx / div bx / hlt
    let (cpu, _) = run(&[
        0xB8, 0x64, 0x00, 0xBB, 0x07, 0x00, 0x31, 0xD2, 0xF7, 0xF3, 0xF4,
    ]);
    assert_eq!(cpu.regs.ax(), 14);
    assert_eq!(cpu.regs.dx(), 2);
}

#[test]
fn iret_restores_ip_cs_and_flags() {
    // stack holds IP=LOAD+1 (the hlt), CS=0, FLAGS with CF set
    let (mut cpu, mut mem) = machine(&[0xCF, 0xF4]);
    cpu.regs.set_sp(0x6FFA);
    mem.write(0x6FFA, &[0x01, 0x7C, 0x00, 0x00, 0x03, 0x02]).unwrap();

    assert_eq!(cpu.step(&mut mem).unwrap(), Step::Retired);
    assert_eq!(cpu.regs.ip(), LOAD + 1);
    assert_eq!(cpu.regs.cs(), 0);
    assert!(cpu.regs.eflags.carry());
    assert_eq!(cpu.regs.sp(), 0x7000);
}

#[test]
fn segmented_store_goes_through_es() {
    // mov ax,0x1000 / mov es,ax / xor di,di / mov al,0x5A / stosb / hlt
    let (_, mem) = run(&[
        0xB8, 0x00, 0x10, 0x8E, 0xC0, 0x31, 0xFF, 0xB0, 0x5A, 0xAA, 0xF4,
    ]);
    assert_eq!(mem.read(0x10000, 1).unwrap(), vec![0x5A]);
}

#[test]
fn shifts_set_carry_from_the_last_bit_out() {
    // mov al,0x81 / shl al,1 / hlt
    let (cpu, _) = run(&[0xB0, 0x81, 0xD0, 0xE0, 0xF4]);
    assert_eq!(cpu.regs.al(), 0x02);
    assert!(cpu.regs.eflags.carry());

    // mov al,0x01 / shr al,1 / hlt
    let (cpu, _) = run(&[0xB0, 0x01, 0xD0, 0xE8, 0xF4]);
    assert_eq!(cpu.regs.al(), 0);
    assert!(cpu.regs.eflags.carry());
    assert!(cpu.regs.eflags.zero());
}

#[test]
fn xchg_swaps_register_halves() {
    // mov ax,0x1234 / mov bx,0x5678 / xchg ax,bx / hlt
    let (cpu, _) = run(&[0xB8, 0x34, 0x12, 0xBB, 0x78, 0x56, 0x93, 0xF4]);
    assert_eq!(cpu.regs.ax(), 0x5678);
    assert_eq!(cpu.regs.bx(), 0x1234);
}

#[test]
fn lodsb_advances_si_and_respects_direction_flag() {
    // mov si,0x7C00 / std / lodsb / hlt
    let (cpu, _) = run(&[0xBE, 0x00, 0x7C, 0xFD, 0xAC, 0xF4]);
    assert_eq!(cpu.regs.al(), 0xBE);
    assert_eq!(cpu.regs.si(), 0x7BFF);
}

#[test]
fn memory_operand_with_base_and_displacement() {
    // mov bx,0x8000 / mov word [bx+2],0x4142 / mov ax,[bx+2] / hlt
    let (cpu, mem) = run(&[
        0xBB, 0x00, 0x80, 0xC7, 0x47, 0x02, 0x42, 0x41, 0x8B, 0x47, 0x02, 0xF4,
    ]);
    assert_eq!(cpu.regs.ax(), 0x4142);
    assert_eq!(mem.read(0x8002, 2).unwrap(), vec![0x42, 0x41]);
}

#[test]
fn undecodable_bytes_are_an_invalid_instruction() {
    // 0xFF 0xFF is a degenerate ModRM for group 5 (inc m16 with mod=3 reg=7)
    // which iced rejects in 16-bit mode
    let (mut cpu, mut mem) = machine(&[0xFF, 0xFF]);
    assert!(cpu.step(&mut mem).is_err());
}
