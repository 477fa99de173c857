use iced_x86::{Code, Decoder, DecoderOptions, Formatter, Instruction, IntelFormatter};

pub struct DisasmLine {
    pub address: String,
    pub bytes: String,
    pub text: String,
}

/// Disassembles 16-bit code. `base` is the linear address of `bytes[0]` and
/// becomes the printed address of the first line.
pub fn disassemble(bytes: &[u8], base: u64) -> Vec<DisasmLine> {
    let mut decoder = Decoder::with_ip(16, bytes, base, DecoderOptions::NONE);
    let mut formatter = IntelFormatter::new();
    formatter.options_mut().set_space_after_operand_separator(true);

    let mut lines = Vec::new();
    let mut instr = Instruction::default();

    while decoder.can_decode() {
        decoder.decode_out(&mut instr);

        let start = (instr.ip() - base) as usize;
        let raw = &bytes[start..start + instr.len()];
        let hex = raw
            .iter()
            .map(|b| format!("{b:02X}"))
            .collect::<Vec<_>>()
            .join(" ");

        let mut text = String::new();
        if instr.code() == Code::INVALID {
            text.push_str("(bad)");
        } else {
            formatter.format(&instr, &mut text);
        }

        lines.push(DisasmLine {
            address: format!("{:06X}", instr.ip()),
            bytes: hex,
            text,
        });
    }

    lines
}
