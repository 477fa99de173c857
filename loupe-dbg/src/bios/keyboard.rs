use loupe_core::Engine;

use super::Bios;

const ZERO_FLAG: u32 = 0x40;

/// INT 16h keyboard services. The blocking read routes through the UI and
/// parks the emulation worker until the operator types a key.
pub(super) fn dispatch(bios: &Bios, engine: &Engine) -> bool {
    match engine.ah() {
        0x00 => {
            let key = bios.ui.read_guest_key();
            engine.set_al(key);
            engine.set_ah(scan_code(key));
        }
        0x01 => {
            // there is no host-side key queue; report nothing pending
            engine.set_ax(0);
            engine.set_eflags(engine.eflags() | ZERO_FLAG);
        }
        0x02 => engine.set_al(0),
        function => {
            bios.debug
                .push_line(format!("keyboard: unhandled function {function:02X}"));
        }
    }

    true
}

/// Set-1 make code for the key most likely to have produced `ascii`.
fn scan_code(ascii: u8) -> u8 {
    const ROWS: [&[u8]; 3] = [b"qwertyuiop", b"asdfghjkl", b"zxcvbnm"];
    const ROW_BASE: [u8; 3] = [0x10, 0x1E, 0x2C];

    match ascii.to_ascii_lowercase() {
        b'\r' | b'\n' => 0x1C,
        0x08 | 0x7F => 0x0E,
        b'\t' => 0x0F,
        0x1B => 0x01,
        b' ' => 0x39,
        b'0' => 0x0B,
        digit @ b'1'..=b'9' => 0x02 + (digit - b'1'),
        letter @ b'a'..=b'z' => {
            for (row, base) in ROWS.iter().zip(ROW_BASE) {
                if let Some(column) = row.iter().position(|&key| key == letter) {
                    return base + column as u8;
                }
            }
            0
        }
        _ => 0,
    }
}
