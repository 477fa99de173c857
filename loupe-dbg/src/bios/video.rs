use loupe_core::Engine;

use super::Bios;

/// INT 10h video services. Teletype output feeds the output stream; mode
/// and cursor calls are acknowledged without a video buffer behind them.
pub(super) fn dispatch(bios: &Bios, engine: &Engine) -> bool {
    let function = engine.ah();

    if bios.debug_video {
        bios.debug.push_line(format!(
            "video: AH={function:02X} AL={:02X} BX={:04X}",
            engine.al(),
            engine.bx()
        ));
    }

    match function {
        0x00 => {
            tracing::debug!(target: "loupe_dbg::bios", "set video mode {:02X}", engine.al());
        }
        // cursor shape / position; accepted, nothing to move
        0x01 | 0x02 => {}
        0x03 => {
            // cursor at top-left, default scanline shape
            engine.set_cx(0x0607);
            engine.set_dx(0);
        }
        0x0E => {
            bios.output.push_char(engine.al() as char);
        }
        0x0F => {
            // 80x25 color text
            engine.set_al(0x03);
            engine.set_ah(80);
            engine.set_bh(0);
        }
        other => {
            bios.debug
                .push_line(format!("video: unhandled function {other:02X}"));
        }
    }

    true
}
