use loupe_core::Engine;

use super::Bios;

/// INT 11h: equipment word — one floppy, 80x25 color video.
pub(super) fn equipment_word(_bios: &Bios, engine: &Engine) -> bool {
    engine.set_ax(0x0021);
    true
}

/// INT 12h: conventional memory in KiB.
pub(super) fn memory_size(_bios: &Bios, engine: &Engine) -> bool {
    engine.set_ax(640);
    true
}

/// INT 18h: the boot image gave up; end the run.
pub(super) fn boot_failure(bios: &Bios, engine: &Engine) -> bool {
    bios.debug.push_line("boot failure (INT 18h), stopping");
    engine.stop();
    true
}

/// INT 19h: bootstrap request; treated as the end of the run.
pub(super) fn bootstrap(bios: &Bios, engine: &Engine) -> bool {
    bios.debug.push_line("bootstrap request (INT 19h), stopping");
    engine.stop();
    true
}

/// INT 20h: program terminate.
pub(super) fn terminate(bios: &Bios, engine: &Engine) -> bool {
    bios.debug.push_line("program terminated (INT 20h)");
    engine.stop();
    true
}

/// INT 21h: the DOS-style calls boot payloads actually make.
pub(super) fn dos_services(bios: &Bios, engine: &Engine) -> bool {
    match engine.ah() {
        0x00 => {
            bios.debug.push_line("program terminated (INT 21h AH=00h)");
            engine.stop();
        }
        0x02 => {
            let character = engine.dl();
            bios.output.push_char(character as char);
            engine.set_al(character);
        }
        0x09 => print_string(bios, engine),
        0x4C => {
            bios.debug
                .push_line(format!("exit with code {:02X}", engine.al()));
            engine.stop();
        }
        function => {
            bios.debug
                .push_line(format!("dos: unhandled function {function:02X}"));
        }
    }

    true
}

/// AH=09h: `$`-terminated string at DS:DX.
fn print_string(bios: &Bios, engine: &Engine) {
    let mut address = Engine::get_address(engine.ds(), engine.dx());

    // runaway guard for strings missing their terminator
    for _ in 0..4096 {
        let Ok(byte) = engine.read(address, 1) else {
            break;
        };
        if byte[0] == b'$' {
            break;
        }
        bios.output.push_char(byte[0] as char);
        address += 1;
    }

    engine.set_al(b'$');
}
