use iced_x86::{Code, Instruction, Mnemonic, OpKind, Register};

use crate::cpu::flags::{self, Width};
use crate::cpu::{Cpu, Step};
use crate::error::EngineError;
use crate::memory::Memory;

#[derive(Clone, Copy)]
enum StringKind {
    Movs,
    Stos,
    Lods,
    Scas,
    Cmps,
}

fn sign_extend(value: u32, width: Width) -> u32 {
    match width {
        Width::Byte => value as u8 as i8 as i32 as u32,
        Width::Word => value as u16 as i16 as i32 as u32,
        Width::Dword => value,
    }
}

impl Cpu {
    pub(crate) fn execute(
        &mut self,
        instr: &Instruction,
        mem: &mut Memory,
        address: u64,
    ) -> Result<Step, EngineError> {
        use Mnemonic as M;

        match instr.mnemonic() {
            M::Nop | M::Wait => {}
            M::Hlt => return Ok(Step::Halted),
            M::Int => return Ok(Step::Interrupt(instr.immediate8())),
            M::Int3 => return Ok(Step::Interrupt(3)),
            M::Into => {
                if self.regs.eflags.overflow() {
                    return Ok(Step::Interrupt(4));
                }
            }

            M::Mov | M::Movzx | M::Movsx => self.mov(instr, mem)?,
            M::Xchg => {
                let a = self.read_op(instr, mem, 0)?;
                let b = self.read_op(instr, mem, 1)?;
                self.write_op(instr, mem, 0, b)?;
                self.write_op(instr, mem, 1, a)?;
            }
            M::Lea => {
                let ea = self.effective_address(instr)?;
                self.write_op(instr, mem, 0, ea.into())?;
            }
            M::Lds | M::Les => self.load_far_pointer(instr, mem)?,
            M::Xlatb => {
                let segment = match instr.segment_prefix() {
                    Register::None => self.regs.ds(),
                    seg => self.reg_read(seg)? as u16,
                };
                let offset = self.regs.bx().wrapping_add(self.regs.al().into());
                let value = mem.data_read(Self::linear(segment, offset), 1)?;
                self.regs.set_al(value as u8);
            }

            M::Push => {
                let width = self.op_width(instr, 0);
                let value = self.read_op(instr, mem, 0)?;
                self.push(mem, value, width)?;
            }
            M::Pop => {
                let width = self.op_width(instr, 0);
                let value = self.pop(mem, width)?;
                self.write_op(instr, mem, 0, value)?;
            }
            M::Pusha => {
                let sp = self.regs.sp();
                for value in [
                    self.regs.ax(),
                    self.regs.cx(),
                    self.regs.dx(),
                    self.regs.bx(),
                    sp,
                    self.regs.bp(),
                    self.regs.si(),
                    self.regs.di(),
                ] {
                    self.push(mem, value.into(), Width::Word)?;
                }
            }
            M::Popa => {
                let di = self.pop(mem, Width::Word)?;
                let si = self.pop(mem, Width::Word)?;
                let bp = self.pop(mem, Width::Word)?;
                let _sp = self.pop(mem, Width::Word)?;
                let bx = self.pop(mem, Width::Word)?;
                let dx = self.pop(mem, Width::Word)?;
                let cx = self.pop(mem, Width::Word)?;
                let ax = self.pop(mem, Width::Word)?;
                self.regs.set_di(di as u16);
                self.regs.set_si(si as u16);
                self.regs.set_bp(bp as u16);
                self.regs.set_bx(bx as u16);
                self.regs.set_dx(dx as u16);
                self.regs.set_cx(cx as u16);
                self.regs.set_ax(ax as u16);
            }
            M::Pushf => {
                let value = self.regs.eflags() & 0xFFFF;
                self.push(mem, value, Width::Word)?;
            }
            M::Pushfd => {
                let value = self.regs.eflags();
                self.push(mem, value, Width::Dword)?;
            }
            M::Popf => {
                let value = self.pop(mem, Width::Word)?;
                let high = self.regs.eflags() & 0xFFFF_0000;
                self.regs.set_eflags(high | value);
            }
            M::Popfd => {
                let value = self.pop(mem, Width::Dword)?;
                self.regs.set_eflags(value);
            }
            M::Lahf => {
                let low = (self.regs.eflags() & 0xFF) as u8;
                self.regs.set_ah(low | 0x02);
            }
            M::Sahf => {
                let keep = self.regs.eflags() & !0xD5;
                self.regs
                    .set_eflags(keep | (u32::from(self.regs.ah()) & 0xD5));
            }

            M::Cbw => {
                let value = self.regs.al() as i8 as i16 as u16;
                self.regs.set_ax(value);
            }
            M::Cwde => {
                let value = self.regs.ax() as i16 as i32 as u32;
                self.regs.set_eax(value);
            }
            M::Cwd => {
                let high = if self.regs.ax() & 0x8000 != 0 {
                    0xFFFF
                } else {
                    0
                };
                self.regs.set_dx(high);
            }
            M::Cdq => {
                let high = if self.regs.eax() & 0x8000_0000 != 0 {
                    0xFFFF_FFFF
                } else {
                    0
                };
                self.regs.set_edx(high);
            }

            M::Add | M::Adc | M::Sub | M::Sbb | M::Cmp | M::And | M::Or | M::Xor | M::Test => {
                self.alu(instr, mem)?
            }
            M::Inc | M::Dec => {
                let width = self.op_width(instr, 0);
                let value = self.read_op(instr, mem, 0)?;
                let carry = self.regs.eflags.carry();
                let result = if instr.mnemonic() == M::Inc {
                    flags::add(&mut self.regs.eflags, value, 1, false, width)
                } else {
                    flags::sub(&mut self.regs.eflags, value, 1, false, width)
                };
                self.regs.eflags.set_carry(carry);
                self.write_op(instr, mem, 0, result)?;
            }
            M::Not => {
                let width = self.op_width(instr, 0);
                let value = self.read_op(instr, mem, 0)?;
                self.write_op(instr, mem, 0, !value & width.mask())?;
            }
            M::Neg => {
                let width = self.op_width(instr, 0);
                let value = self.read_op(instr, mem, 0)?;
                let result = flags::sub(&mut self.regs.eflags, 0, value, false, width);
                self.write_op(instr, mem, 0, result)?;
            }
            M::Mul | M::Imul => self.multiply(instr, mem)?,
            M::Div | M::Idiv => return self.divide(instr, mem),
            M::Aam => return self.aam(instr),
            M::Aad => self.aad(instr),
            M::Daa | M::Das | M::Aaa | M::Aas => self.bcd_adjust(instr.mnemonic()),

            M::Shl | M::Shr | M::Sar | M::Rol | M::Ror | M::Rcl | M::Rcr => {
                self.shift_rotate(instr, mem)?
            }

            M::Jmp => self.jump(instr, mem)?,
            M::Jo | M::Jno | M::Jb | M::Jae | M::Je | M::Jne | M::Jbe | M::Ja | M::Js
            | M::Jns | M::Jp | M::Jnp | M::Jl | M::Jge | M::Jle | M::Jg => {
                if self.condition(instr.mnemonic()) {
                    self.regs.set_ip(instr.near_branch16());
                }
            }
            M::Jcxz | M::Jecxz => {
                let zero = if instr.mnemonic() == M::Jcxz {
                    self.regs.cx() == 0
                } else {
                    self.regs.ecx() == 0
                };
                if zero {
                    self.regs.set_ip(instr.near_branch16());
                }
            }
            M::Loop | M::Loope | M::Loopne => {
                let count = self.regs.cx().wrapping_sub(1);
                self.regs.set_cx(count);
                let taken = count != 0
                    && match instr.mnemonic() {
                        M::Loope => self.regs.eflags.zero(),
                        M::Loopne => !self.regs.eflags.zero(),
                        _ => true,
                    };
                if taken {
                    self.regs.set_ip(instr.near_branch16());
                }
            }
            M::Call => self.call(instr, mem)?,
            M::Ret => {
                let ip = self.pop(mem, Width::Word)?;
                self.regs.set_ip(ip as u16);
                if instr.op_count() == 1 {
                    let release = instr.immediate16();
                    self.regs.set_sp(self.regs.sp().wrapping_add(release));
                }
            }
            M::Retf => {
                let ip = self.pop(mem, Width::Word)?;
                let cs = self.pop(mem, Width::Word)?;
                self.regs.set_ip(ip as u16);
                self.regs.set_cs(cs as u16);
                if instr.op_count() == 1 {
                    let release = instr.immediate16();
                    self.regs.set_sp(self.regs.sp().wrapping_add(release));
                }
            }
            M::Iret => {
                let ip = self.pop(mem, Width::Word)?;
                let cs = self.pop(mem, Width::Word)?;
                let fl = self.pop(mem, Width::Word)?;
                self.regs.set_ip(ip as u16);
                self.regs.set_cs(cs as u16);
                let high = self.regs.eflags() & 0xFFFF_0000;
                self.regs.set_eflags(high | fl);
            }

            M::Clc => self.regs.eflags.set_carry(false),
            M::Stc => self.regs.eflags.set_carry(true),
            M::Cmc => {
                let carry = self.regs.eflags.carry();
                self.regs.eflags.set_carry(!carry);
            }
            M::Cld => self.regs.eflags.set_direction(false),
            M::Std => self.regs.eflags.set_direction(true),
            M::Cli => self.regs.eflags.set_interrupt(false),
            M::Sti => self.regs.eflags.set_interrupt(true),
            M::Salc => {
                let value = if self.regs.eflags.carry() { 0xFF } else { 0 };
                self.regs.set_al(value);
            }

            M::Movsb => self.string_op(instr, mem, StringKind::Movs, Width::Byte)?,
            M::Movsw => self.string_op(instr, mem, StringKind::Movs, Width::Word)?,
            M::Movsd => self.string_op(instr, mem, StringKind::Movs, Width::Dword)?,
            M::Stosb => self.string_op(instr, mem, StringKind::Stos, Width::Byte)?,
            M::Stosw => self.string_op(instr, mem, StringKind::Stos, Width::Word)?,
            M::Stosd => self.string_op(instr, mem, StringKind::Stos, Width::Dword)?,
            M::Lodsb => self.string_op(instr, mem, StringKind::Lods, Width::Byte)?,
            M::Lodsw => self.string_op(instr, mem, StringKind::Lods, Width::Word)?,
            M::Lodsd => self.string_op(instr, mem, StringKind::Lods, Width::Dword)?,
            M::Scasb => self.string_op(instr, mem, StringKind::Scas, Width::Byte)?,
            M::Scasw => self.string_op(instr, mem, StringKind::Scas, Width::Word)?,
            M::Scasd => self.string_op(instr, mem, StringKind::Scas, Width::Dword)?,
            M::Cmpsb => self.string_op(instr, mem, StringKind::Cmps, Width::Byte)?,
            M::Cmpsw => self.string_op(instr, mem, StringKind::Cmps, Width::Word)?,
            M::Cmpsd => self.string_op(instr, mem, StringKind::Cmps, Width::Dword)?,

            // no port devices are modelled: IN reads all-ones, OUT is dropped
            M::In => {
                let width = self.op_width(instr, 0);
                let port = self.read_op(instr, mem, 1)?;
                tracing::debug!(target: "loupe_core::cpu", "IN from port {:04X}", port);
                self.write_op(instr, mem, 0, width.mask())?;
            }
            M::Out => {
                let port = self.read_op(instr, mem, 0)?;
                let value = self.read_op(instr, mem, 1)?;
                tracing::debug!(target: "loupe_core::cpu", "OUT {:04X} to port {:04X}", value, port);
            }

            _ => {
                let byte = mem.fetch(address).first().copied().unwrap_or(0);
                return Err(EngineError::InvalidInstruction { address, byte });
            }
        }

        Ok(Step::Retired)
    }

    fn condition(&self, mnemonic: Mnemonic) -> bool {
        use Mnemonic as M;

        let fl = &self.regs.eflags;
        match mnemonic {
            M::Jo => fl.overflow(),
            M::Jno => !fl.overflow(),
            M::Jb => fl.carry(),
            M::Jae => !fl.carry(),
            M::Je => fl.zero(),
            M::Jne => !fl.zero(),
            M::Jbe => fl.carry() || fl.zero(),
            M::Ja => !fl.carry() && !fl.zero(),
            M::Js => fl.sign(),
            M::Jns => !fl.sign(),
            M::Jp => fl.parity(),
            M::Jnp => !fl.parity(),
            M::Jl => fl.sign() != fl.overflow(),
            M::Jge => fl.sign() == fl.overflow(),
            M::Jle => fl.zero() || fl.sign() != fl.overflow(),
            M::Jg => !fl.zero() && fl.sign() == fl.overflow(),
            _ => false,
        }
    }

    fn mov(&mut self, instr: &Instruction, mem: &mut Memory) -> Result<(), EngineError> {
        let value = self.read_op(instr, mem, 1)?;
        let value = match instr.mnemonic() {
            Mnemonic::Movsx => sign_extend(value, self.op_width(instr, 1)),
            _ => value,
        };
        self.write_op(instr, mem, 0, value)
    }

    fn load_far_pointer(&mut self, instr: &Instruction, mem: &mut Memory) -> Result<(), EngineError> {
        let ea = self.mem_operand_addr(instr)?;
        let offset = mem.data_read(ea, 2)?;
        let selector = mem.data_read(ea + 2, 2)? as u16;

        self.write_op(instr, mem, 0, offset)?;
        match instr.mnemonic() {
            Mnemonic::Lds => self.regs.set_ds(selector),
            Mnemonic::Les => self.regs.set_es(selector),
            _ => unreachable!(),
        }

        Ok(())
    }

    fn alu(&mut self, instr: &Instruction, mem: &mut Memory) -> Result<(), EngineError> {
        use Mnemonic as M;

        let width = self.op_width(instr, 0);
        let a = self.read_op(instr, mem, 0)?;
        let b = self.read_op(instr, mem, 1)?;
        let carry = self.regs.eflags.carry();

        let (result, write_back) = {
            let fl = &mut self.regs.eflags;
            match instr.mnemonic() {
                M::Add => (flags::add(fl, a, b, false, width), true),
                M::Adc => (flags::add(fl, a, b, carry, width), true),
                M::Sub => (flags::sub(fl, a, b, false, width), true),
                M::Sbb => (flags::sub(fl, a, b, carry, width), true),
                M::Cmp => (flags::sub(fl, a, b, false, width), false),
                M::And => (flags::logic(fl, a & b, width), true),
                M::Or => (flags::logic(fl, a | b, width), true),
                M::Xor => (flags::logic(fl, a ^ b, width), true),
                M::Test => (flags::logic(fl, a & b, width), false),
                _ => unreachable!(),
            }
        };

        if write_back {
            self.write_op(instr, mem, 0, result)?;
        }
        Ok(())
    }

    fn multiply(&mut self, instr: &Instruction, mem: &mut Memory) -> Result<(), EngineError> {
        if instr.op_count() > 1 {
            // IMUL r, r/m[, imm]: signed, truncated to the operand width
            let width = self.op_width(instr, 0);
            let (a, b) = if instr.op_count() == 3 {
                (self.read_op(instr, mem, 1)?, self.read_op(instr, mem, 2)?)
            } else {
                (self.read_op(instr, mem, 0)?, self.read_op(instr, mem, 1)?)
            };
            let full = i64::from(sign_extend(a, width) as i32)
                * i64::from(sign_extend(b, width) as i32);
            let result = (full as u32) & width.mask();
            let truncated = full != i64::from(sign_extend(result, width) as i32);
            self.regs.eflags.set_carry(truncated);
            self.regs.eflags.set_overflow(truncated);
            return self.write_op(instr, mem, 0, result);
        }

        let width = self.op_width(instr, 0);
        let value = self.read_op(instr, mem, 0)?;
        let signed = instr.mnemonic() == Mnemonic::Imul;

        let overflow = match width {
            Width::Byte => {
                let full = if signed {
                    (i32::from(self.regs.al() as i8) * i32::from(value as u8 as i8)) as u32
                } else {
                    u32::from(self.regs.al()) * (value & 0xFF)
                };
                self.regs.set_ax(full as u16);
                if signed {
                    full as u16 as i16 != i16::from(full as u8 as i8)
                } else {
                    full > 0xFF
                }
            }
            Width::Word => {
                let full = if signed {
                    (i32::from(self.regs.ax() as i16) * i32::from(value as u16 as i16)) as u32
                } else {
                    u32::from(self.regs.ax()) * (value & 0xFFFF)
                };
                self.regs.set_ax(full as u16);
                self.regs.set_dx((full >> 16) as u16);
                if signed {
                    full as i32 != i32::from(full as u16 as i16)
                } else {
                    full > 0xFFFF
                }
            }
            Width::Dword => {
                let full = if signed {
                    (i64::from(self.regs.eax() as i32) * i64::from(value as i32)) as u64
                } else {
                    u64::from(self.regs.eax()) * u64::from(value)
                };
                self.regs.set_eax(full as u32);
                self.regs.set_edx((full >> 32) as u32);
                if signed {
                    full as i64 != i64::from(full as u32 as i32)
                } else {
                    full > 0xFFFF_FFFF
                }
            }
        };

        self.regs.eflags.set_carry(overflow);
        self.regs.eflags.set_overflow(overflow);
        Ok(())
    }

    fn divide(&mut self, instr: &Instruction, mem: &mut Memory) -> Result<Step, EngineError> {
        let width = self.op_width(instr, 0);
        let divisor = self.read_op(instr, mem, 0)? & width.mask();
        if divisor == 0 {
            return Ok(Step::Interrupt(0));
        }

        let signed = instr.mnemonic() == Mnemonic::Idiv;
        match width {
            Width::Byte => {
                if signed {
                    let dividend = i32::from(self.regs.ax() as i16);
                    let divisor = i32::from(divisor as u8 as i8);
                    let quotient = dividend / divisor;
                    if quotient < i32::from(i8::MIN) || quotient > i32::from(i8::MAX) {
                        return Ok(Step::Interrupt(0));
                    }
                    self.regs.set_al(quotient as u8);
                    self.regs.set_ah((dividend % divisor) as u8);
                } else {
                    let dividend = u32::from(self.regs.ax());
                    let quotient = dividend / divisor;
                    if quotient > 0xFF {
                        return Ok(Step::Interrupt(0));
                    }
                    self.regs.set_al(quotient as u8);
                    self.regs.set_ah((dividend % divisor) as u8);
                }
            }
            Width::Word => {
                if signed {
                    let dividend =
                        ((u32::from(self.regs.dx()) << 16) | u32::from(self.regs.ax())) as i32;
                    let divisor = i32::from(divisor as u16 as i16);
                    let quotient = dividend / divisor;
                    if quotient < i32::from(i16::MIN) || quotient > i32::from(i16::MAX) {
                        return Ok(Step::Interrupt(0));
                    }
                    self.regs.set_ax(quotient as u16);
                    self.regs.set_dx((dividend % divisor) as u16);
                } else {
                    let dividend = (u32::from(self.regs.dx()) << 16) | u32::from(self.regs.ax());
                    let quotient = dividend / divisor;
                    if quotient > 0xFFFF {
                        return Ok(Step::Interrupt(0));
                    }
                    self.regs.set_ax(quotient as u16);
                    self.regs.set_dx((dividend % divisor) as u16);
                }
            }
            Width::Dword => {
                if signed {
                    let dividend =
                        ((u64::from(self.regs.edx()) << 32) | u64::from(self.regs.eax())) as i64;
                    let divisor = i64::from(divisor as i32);
                    let quotient = dividend / divisor;
                    if quotient < i64::from(i32::MIN) || quotient > i64::from(i32::MAX) {
                        return Ok(Step::Interrupt(0));
                    }
                    self.regs.set_eax(quotient as u32);
                    self.regs.set_edx((dividend % divisor) as u32);
                } else {
                    let dividend = (u64::from(self.regs.edx()) << 32) | u64::from(self.regs.eax());
                    let quotient = dividend / u64::from(divisor);
                    if quotient > 0xFFFF_FFFF {
                        return Ok(Step::Interrupt(0));
                    }
                    self.regs.set_eax(quotient as u32);
                    self.regs.set_edx((dividend % u64::from(divisor)) as u32);
                }
            }
        }

        Ok(Step::Retired)
    }

    fn aam(&mut self, instr: &Instruction) -> Result<Step, EngineError> {
        let base = instr.immediate8();
        if base == 0 {
            return Ok(Step::Interrupt(0));
        }

        let al = self.regs.al();
        self.regs.set_ah(al / base);
        self.regs.set_al(al % base);
        flags::set_szp(&mut self.regs.eflags, (al % base).into(), Width::Byte);
        Ok(Step::Retired)
    }

    fn aad(&mut self, instr: &Instruction) {
        let base = instr.immediate8();
        let result = self
            .regs
            .al()
            .wrapping_add(self.regs.ah().wrapping_mul(base));
        self.regs.set_al(result);
        self.regs.set_ah(0);
        flags::set_szp(&mut self.regs.eflags, result.into(), Width::Byte);
    }

    fn bcd_adjust(&mut self, mnemonic: Mnemonic) {
        use Mnemonic as M;

        match mnemonic {
            M::Daa | M::Das => {
                let old_al = self.regs.al();
                let old_cf = self.regs.eflags.carry();
                let mut al = old_al;
                let mut cf = false;

                if (al & 0xF) > 9 || self.regs.eflags.adjust() {
                    al = if mnemonic == M::Daa {
                        al.wrapping_add(6)
                    } else {
                        al.wrapping_sub(6)
                    };
                    self.regs.eflags.set_adjust(true);
                } else {
                    self.regs.eflags.set_adjust(false);
                }

                if old_al > 0x99 || old_cf {
                    al = if mnemonic == M::Daa {
                        al.wrapping_add(0x60)
                    } else {
                        al.wrapping_sub(0x60)
                    };
                    cf = true;
                }

                self.regs.set_al(al);
                self.regs.eflags.set_carry(cf);
                flags::set_szp(&mut self.regs.eflags, al.into(), Width::Byte);
            }
            M::Aaa | M::Aas => {
                let adjust = (self.regs.al() & 0xF) > 9 || self.regs.eflags.adjust();
                if adjust {
                    if mnemonic == M::Aaa {
                        self.regs.set_ax(self.regs.ax().wrapping_add(0x106));
                    } else {
                        self.regs.set_al(self.regs.al().wrapping_sub(6));
                        self.regs.set_ah(self.regs.ah().wrapping_sub(1));
                    }
                }
                self.regs.set_al(self.regs.al() & 0xF);
                self.regs.eflags.set_adjust(adjust);
                self.regs.eflags.set_carry(adjust);
            }
            _ => unreachable!(),
        }
    }

    fn shift_rotate(&mut self, instr: &Instruction, mem: &mut Memory) -> Result<(), EngineError> {
        use Mnemonic as M;

        let width = self.op_width(instr, 0);
        let count = self.read_op(instr, mem, 1)? & 0x1F;
        if count == 0 {
            return Ok(());
        }

        let value = self.read_op(instr, mem, 0)? & width.mask();
        let bits = width.bits();
        let mnemonic = instr.mnemonic();
        let mut carry = self.regs.eflags.carry();

        let result = match mnemonic {
            M::Shl => {
                let wide = u64::from(value) << count;
                carry = (wide >> bits) & 1 == 1;
                (wide as u32) & width.mask()
            }
            M::Shr => {
                carry = (u64::from(value) >> (count - 1)) & 1 == 1;
                ((u64::from(value) >> count) as u32) & width.mask()
            }
            M::Sar => {
                let wide = i64::from(sign_extend(value, width) as i32);
                carry = (wide >> (count - 1).min(63)) & 1 == 1;
                ((wide >> count.min(63)) as u32) & width.mask()
            }
            M::Rol => {
                let c = count % bits;
                let rotated = if c == 0 {
                    value
                } else {
                    ((value << c) | (value >> (bits - c))) & width.mask()
                };
                carry = rotated & 1 == 1;
                rotated
            }
            M::Ror => {
                let c = count % bits;
                let rotated = if c == 0 {
                    value
                } else {
                    ((value >> c) | (value << (bits - c))) & width.mask()
                };
                carry = rotated & width.sign_bit() != 0;
                rotated
            }
            M::Rcl => {
                let mut rotated = value;
                for _ in 0..count {
                    let out = rotated & width.sign_bit() != 0;
                    rotated = ((rotated << 1) | u32::from(carry)) & width.mask();
                    carry = out;
                }
                rotated
            }
            M::Rcr => {
                let mut rotated = value;
                for _ in 0..count {
                    let out = rotated & 1 == 1;
                    rotated = (rotated >> 1) | (u32::from(carry) << (bits - 1));
                    carry = out;
                }
                rotated
            }
            _ => unreachable!(),
        };

        if count == 1 {
            let msb = result & width.sign_bit() != 0;
            let overflow = match mnemonic {
                M::Shl | M::Rol | M::Rcl => msb != carry,
                M::Shr => value & width.sign_bit() != 0,
                M::Sar => false,
                // MSB against the bit below it
                _ => msb != (result & (width.sign_bit() >> 1) != 0),
            };
            self.regs.eflags.set_overflow(overflow);
        }

        self.regs.eflags.set_carry(carry);
        if matches!(mnemonic, M::Shl | M::Shr | M::Sar) {
            flags::set_szp(&mut self.regs.eflags, result, width);
        }

        self.write_op(instr, mem, 0, result)
    }

    fn jump(&mut self, instr: &Instruction, mem: &mut Memory) -> Result<(), EngineError> {
        match instr.op0_kind() {
            OpKind::NearBranch16 => self.regs.set_ip(instr.near_branch16()),
            OpKind::NearBranch32 => self.regs.set_ip(instr.near_branch32() as u16),
            OpKind::FarBranch16 => {
                self.regs.set_cs(instr.far_branch_selector());
                self.regs.set_ip(instr.far_branch16());
            }
            OpKind::Memory if instr.code() == Code::Jmp_m1616 => {
                let ea = self.mem_operand_addr(instr)?;
                let offset = mem.data_read(ea, 2)?;
                let selector = mem.data_read(ea + 2, 2)?;
                self.regs.set_cs(selector as u16);
                self.regs.set_ip(offset as u16);
            }
            OpKind::Register | OpKind::Memory => {
                let target = self.read_op(instr, mem, 0)?;
                self.regs.set_ip(target as u16);
            }
            other => {
                return Err(EngineError::Halted(format!(
                    "unsupported jump operand {other:?}"
                )))
            }
        }

        Ok(())
    }

    fn call(&mut self, instr: &Instruction, mem: &mut Memory) -> Result<(), EngineError> {
        match instr.op0_kind() {
            OpKind::NearBranch16 => {
                let ip = self.regs.ip();
                self.push(mem, ip.into(), Width::Word)?;
                self.regs.set_ip(instr.near_branch16());
            }
            OpKind::FarBranch16 => {
                let (cs, ip) = (self.regs.cs(), self.regs.ip());
                self.push(mem, cs.into(), Width::Word)?;
                self.push(mem, ip.into(), Width::Word)?;
                self.regs.set_cs(instr.far_branch_selector());
                self.regs.set_ip(instr.far_branch16());
            }
            OpKind::Memory if instr.code() == Code::Call_m1616 => {
                let ea = self.mem_operand_addr(instr)?;
                let offset = mem.data_read(ea, 2)?;
                let selector = mem.data_read(ea + 2, 2)?;
                let (cs, ip) = (self.regs.cs(), self.regs.ip());
                self.push(mem, cs.into(), Width::Word)?;
                self.push(mem, ip.into(), Width::Word)?;
                self.regs.set_cs(selector as u16);
                self.regs.set_ip(offset as u16);
            }
            OpKind::Register | OpKind::Memory => {
                let target = self.read_op(instr, mem, 0)?;
                let ip = self.regs.ip();
                self.push(mem, ip.into(), Width::Word)?;
                self.regs.set_ip(target as u16);
            }
            other => {
                return Err(EngineError::Halted(format!(
                    "unsupported call operand {other:?}"
                )))
            }
        }

        Ok(())
    }

    fn string_op(
        &mut self,
        instr: &Instruction,
        mem: &mut Memory,
        kind: StringKind,
        width: Width,
    ) -> Result<(), EngineError> {
        let repeat =
            instr.has_rep_prefix() || instr.has_repe_prefix() || instr.has_repne_prefix();
        let step = width.bytes() as u16;
        let source_segment = match instr.segment_prefix() {
            Register::None => self.regs.ds(),
            seg => self.reg_read(seg)? as u16,
        };

        loop {
            if repeat && self.regs.cx() == 0 {
                break;
            }

            let si = self.regs.si();
            let di = self.regs.di();
            let accumulator = match width {
                Width::Byte => self.regs.al().into(),
                Width::Word => self.regs.ax().into(),
                Width::Dword => self.regs.eax(),
            };

            match kind {
                StringKind::Movs => {
                    let value =
                        mem.data_read(Self::linear(source_segment, si), width.bytes())?;
                    mem.data_write(Self::linear(self.regs.es(), di), width.bytes(), value)?;
                    self.advance_index(true, step);
                    self.advance_index(false, step);
                }
                StringKind::Stos => {
                    mem.data_write(
                        Self::linear(self.regs.es(), di),
                        width.bytes(),
                        accumulator,
                    )?;
                    self.advance_index(false, step);
                }
                StringKind::Lods => {
                    let value =
                        mem.data_read(Self::linear(source_segment, si), width.bytes())?;
                    match width {
                        Width::Byte => self.regs.set_al(value as u8),
                        Width::Word => self.regs.set_ax(value as u16),
                        Width::Dword => self.regs.set_eax(value),
                    }
                    self.advance_index(true, step);
                }
                StringKind::Scas => {
                    let value =
                        mem.data_read(Self::linear(self.regs.es(), di), width.bytes())?;
                    flags::sub(&mut self.regs.eflags, accumulator, value, false, width);
                    self.advance_index(false, step);
                }
                StringKind::Cmps => {
                    let a = mem.data_read(Self::linear(source_segment, si), width.bytes())?;
                    let b = mem.data_read(Self::linear(self.regs.es(), di), width.bytes())?;
                    flags::sub(&mut self.regs.eflags, a, b, false, width);
                    self.advance_index(true, step);
                    self.advance_index(false, step);
                }
            }

            if !repeat {
                break;
            }

            self.regs.set_cx(self.regs.cx().wrapping_sub(1));
            if matches!(kind, StringKind::Scas | StringKind::Cmps) {
                if instr.has_repe_prefix() && !self.regs.eflags.zero() {
                    break;
                }
                if instr.has_repne_prefix() && self.regs.eflags.zero() {
                    break;
                }
            }
        }

        Ok(())
    }

    fn advance_index(&mut self, source: bool, step: u16) {
        let down = self.regs.eflags.direction();
        let apply = |value: u16| {
            if down {
                value.wrapping_sub(step)
            } else {
                value.wrapping_add(step)
            }
        };

        if source {
            self.regs.set_si(apply(self.regs.si()));
        } else {
            self.regs.set_di(apply(self.regs.di()));
        }
    }
}
