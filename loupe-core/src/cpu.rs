pub(crate) mod exec;
pub(crate) mod flags;

use iced_x86::{Code, Decoder, DecoderOptions, Instruction, OpKind, Register};

use crate::cpu::flags::Width;
use crate::error::EngineError;
use crate::memory::Memory;
use crate::registers::Registers;

/// Outcome of executing one instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// The instruction retired normally.
    Retired,
    /// A `HLT` was executed; the run loop should finish.
    Halted,
    /// An `INT n` (or a CPU-generated trap) wants the interrupt trampoline.
    /// IP already points at the following instruction.
    Interrupt(u8),
}

/// 16-bit real-mode interpreter. Decoding is delegated to `iced-x86`; this
/// type owns the register file and executes the decoded instructions against
/// a [`Memory`].
pub struct Cpu {
    pub regs: Registers,
}

impl Default for Cpu {
    fn default() -> Self {
        Self::new()
    }
}

impl Cpu {
    pub fn new() -> Self {
        Self {
            regs: Registers::default(),
        }
    }

    /// Real-mode linear address: `segment * 16 + offset`.
    pub fn linear(segment: u16, offset: u16) -> u64 {
        (u64::from(segment) << 4) + u64::from(offset)
    }

    fn decode(&self, mem: &Memory) -> Result<(u64, Instruction), EngineError> {
        let address = Self::linear(self.regs.cs(), self.regs.ip());
        let window = mem.fetch(address);
        if window.is_empty() {
            return Err(EngineError::InvalidInstruction { address, byte: 0 });
        }

        let mut decoder = Decoder::with_ip(
            16,
            window,
            u64::from(self.regs.ip()),
            DecoderOptions::NONE,
        );
        let instr = decoder.decode();
        if instr.code() == Code::INVALID {
            return Err(EngineError::InvalidInstruction {
                address,
                byte: window[0],
            });
        }

        Ok((address, instr))
    }

    /// Looks at the instruction about to execute without executing it.
    /// Returns its linear address and raw bytes (what the instruction hooks
    /// receive).
    pub fn peek(&self, mem: &Memory) -> Result<(u64, Vec<u8>), EngineError> {
        let (address, instr) = self.decode(mem)?;
        let bytes = mem.fetch(address)[..instr.len()].to_vec();
        Ok((address, bytes))
    }

    /// Fetches, decodes and executes a single instruction.
    pub fn step(&mut self, mem: &mut Memory) -> Result<Step, EngineError> {
        let (address, instr) = self.decode(mem)?;

        // IP points past the instruction before execution so that branches
        // are relative to the right base and INT reports the resume point.
        self.regs.set_ip(instr.next_ip() as u16);

        self.execute(&instr, mem, address)
    }

    // ---- operand plumbing -------------------------------------------------

    pub(crate) fn reg_read(&self, reg: Register) -> Result<u32, EngineError> {
        use Register as R;

        Ok(match reg {
            R::None => 0,
            R::AL => self.regs.al().into(),
            R::CL => self.regs.cl().into(),
            R::DL => self.regs.dl().into(),
            R::BL => self.regs.bl().into(),
            R::AH => self.regs.ah().into(),
            R::CH => self.regs.ch().into(),
            R::DH => self.regs.dh().into(),
            R::BH => self.regs.bh().into(),
            R::AX => self.regs.ax().into(),
            R::CX => self.regs.cx().into(),
            R::DX => self.regs.dx().into(),
            R::BX => self.regs.bx().into(),
            R::SP => self.regs.sp().into(),
            R::BP => self.regs.bp().into(),
            R::SI => self.regs.si().into(),
            R::DI => self.regs.di().into(),
            R::EAX => self.regs.eax(),
            R::ECX => self.regs.ecx(),
            R::EDX => self.regs.edx(),
            R::EBX => self.regs.ebx(),
            R::ESP => self.regs.esp(),
            R::EBP => self.regs.ebp(),
            R::ESI => self.regs.esi(),
            R::EDI => self.regs.edi(),
            R::ES => self.regs.es().into(),
            R::CS => self.regs.cs().into(),
            R::SS => self.regs.ss().into(),
            R::DS => self.regs.ds().into(),
            R::FS => self.regs.fs().into(),
            R::GS => self.regs.gs().into(),
            other => {
                return Err(EngineError::Halted(format!(
                    "unsupported register {other:?}"
                )))
            }
        })
    }

    pub(crate) fn reg_write(&mut self, reg: Register, value: u32) -> Result<(), EngineError> {
        use Register as R;

        match reg {
            R::AL => self.regs.set_al(value as u8),
            R::CL => self.regs.set_cl(value as u8),
            R::DL => self.regs.set_dl(value as u8),
            R::BL => self.regs.set_bl(value as u8),
            R::AH => self.regs.set_ah(value as u8),
            R::CH => self.regs.set_ch(value as u8),
            R::DH => self.regs.set_dh(value as u8),
            R::BH => self.regs.set_bh(value as u8),
            R::AX => self.regs.set_ax(value as u16),
            R::CX => self.regs.set_cx(value as u16),
            R::DX => self.regs.set_dx(value as u16),
            R::BX => self.regs.set_bx(value as u16),
            R::SP => self.regs.set_sp(value as u16),
            R::BP => self.regs.set_bp(value as u16),
            R::SI => self.regs.set_si(value as u16),
            R::DI => self.regs.set_di(value as u16),
            R::EAX => self.regs.set_eax(value),
            R::ECX => self.regs.set_ecx(value),
            R::EDX => self.regs.set_edx(value),
            R::EBX => self.regs.set_ebx(value),
            R::ESP => self.regs.set_esp(value),
            R::EBP => self.regs.set_ebp(value),
            R::ESI => self.regs.set_esi(value),
            R::EDI => self.regs.set_edi(value),
            R::ES => self.regs.set_es(value as u16),
            R::CS => self.regs.set_cs(value as u16),
            R::SS => self.regs.set_ss(value as u16),
            R::DS => self.regs.set_ds(value as u16),
            R::FS => self.regs.set_fs(value as u16),
            R::GS => self.regs.set_gs(value as u16),
            other => {
                return Err(EngineError::Halted(format!(
                    "unsupported register {other:?}"
                )))
            }
        }

        Ok(())
    }

    fn segment_value(&self, seg: Register) -> u16 {
        match seg {
            Register::ES => self.regs.es(),
            Register::CS => self.regs.cs(),
            Register::SS => self.regs.ss(),
            Register::FS => self.regs.fs(),
            Register::GS => self.regs.gs(),
            _ => self.regs.ds(),
        }
    }

    /// 16-bit effective address of the instruction's memory operand.
    pub(crate) fn effective_address(&self, instr: &Instruction) -> Result<u16, EngineError> {
        let base = match instr.memory_base() {
            Register::None => 0,
            reg => self.reg_read(reg)? as u16,
        };
        let index = match instr.memory_index() {
            Register::None => 0,
            reg => self.reg_read(reg)? as u16,
        };

        Ok(base
            .wrapping_add(index)
            .wrapping_add(instr.memory_displacement32() as u16))
    }

    /// Linear address of the instruction's memory operand, segment override
    /// and default segment (SS for BP-based addressing) already applied.
    pub(crate) fn mem_operand_addr(&self, instr: &Instruction) -> Result<u64, EngineError> {
        let segment = self.segment_value(instr.memory_segment());
        Ok(Self::linear(segment, self.effective_address(instr)?))
    }

    pub(crate) fn op_width(&self, instr: &Instruction, op: u32) -> Width {
        match instr.op_kind(op) {
            OpKind::Register => Width::from_bytes(instr.op_register(op).size()),
            OpKind::Memory => Width::from_bytes(instr.memory_size().size()),
            OpKind::Immediate8 | OpKind::Immediate8_2nd => Width::Byte,
            OpKind::Immediate16 | OpKind::Immediate8to16 => Width::Word,
            OpKind::Immediate32 | OpKind::Immediate8to32 => Width::Dword,
            _ => Width::Word,
        }
    }

    pub(crate) fn read_op(
        &mut self,
        instr: &Instruction,
        mem: &mut Memory,
        op: u32,
    ) -> Result<u32, EngineError> {
        match instr.op_kind(op) {
            OpKind::Register => self.reg_read(instr.op_register(op)),
            OpKind::Memory => {
                let address = self.mem_operand_addr(instr)?;
                mem.data_read(address, instr.memory_size().size())
            }
            OpKind::Immediate8 => Ok(instr.immediate8().into()),
            OpKind::Immediate8_2nd => Ok(instr.immediate8_2nd().into()),
            OpKind::Immediate16 => Ok(instr.immediate16().into()),
            OpKind::Immediate32 => Ok(instr.immediate32()),
            OpKind::Immediate8to16 => Ok(instr.immediate8to16() as u16 as u32),
            OpKind::Immediate8to32 => Ok(instr.immediate8to32() as u32),
            OpKind::NearBranch16 => Ok(instr.near_branch16().into()),
            other => Err(EngineError::Halted(format!(
                "unsupported operand kind {other:?}"
            ))),
        }
    }

    pub(crate) fn write_op(
        &mut self,
        instr: &Instruction,
        mem: &mut Memory,
        op: u32,
        value: u32,
    ) -> Result<(), EngineError> {
        match instr.op_kind(op) {
            OpKind::Register => self.reg_write(instr.op_register(op), value),
            OpKind::Memory => {
                let address = self.mem_operand_addr(instr)?;
                mem.data_write(address, instr.memory_size().size(), value)
            }
            other => Err(EngineError::Halted(format!(
                "unsupported destination kind {other:?}"
            ))),
        }
    }

    pub(crate) fn push(
        &mut self,
        mem: &mut Memory,
        value: u32,
        width: Width,
    ) -> Result<(), EngineError> {
        let sp = self.regs.sp().wrapping_sub(width.bytes() as u16);
        self.regs.set_sp(sp);
        mem.data_write(Self::linear(self.regs.ss(), sp), width.bytes(), value)
    }

    pub(crate) fn pop(&mut self, mem: &mut Memory, width: Width) -> Result<u32, EngineError> {
        let sp = self.regs.sp();
        let value = mem.data_read(Self::linear(self.regs.ss(), sp), width.bytes())?;
        self.regs.set_sp(sp.wrapping_add(width.bytes() as u16));
        Ok(value)
    }
}
