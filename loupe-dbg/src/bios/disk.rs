use loupe_core::Engine;

use super::Bios;

const SECTOR_SIZE: usize = 512;
// 1.44M floppy geometry
const SECTORS_PER_TRACK: u32 = 18;
const HEADS: u32 = 2;

/// INT 13h disk services, backed by the boot image.
pub(super) fn dispatch(bios: &Bios, engine: &Engine) -> bool {
    match engine.ah() {
        0x00 => {
            engine.set_ah(0);
            engine.set_cf(false);
        }
        0x02 => read_sectors(bios, engine),
        0x08 => drive_parameters(engine),
        0x15 => {
            // floppy with change-line support
            engine.set_ah(0x02);
            engine.set_cf(false);
        }
        0x41 => {
            // no EDD extensions
            engine.set_ah(0x01);
            engine.set_cf(true);
        }
        function => {
            bios.debug
                .push_line(format!("disk: unhandled function {function:02X}"));
            engine.set_ah(0x01);
            engine.set_cf(true);
        }
    }

    true
}

fn read_sectors(bios: &Bios, engine: &Engine) {
    let count = usize::from(engine.al());
    let sector = u32::from(engine.cl() & 0x3F);
    let cylinder = u32::from(engine.ch()) | (u32::from(engine.cl() & 0xC0) << 2);
    let head = u32::from(engine.dh());

    if count == 0 || sector == 0 {
        fail(engine, 0x01);
        return;
    }

    let lba = (cylinder * HEADS + head) * SECTORS_PER_TRACK + (sector - 1);
    let start = lba as usize * SECTOR_SIZE;
    if start >= bios.image.len() {
        bios.debug
            .push_line(format!("disk: read past end of image (LBA {lba})"));
        fail(engine, 0x04);
        return;
    }

    // requested sectors beyond the image read back as zeroes
    let mut buffer = vec![0u8; count * SECTOR_SIZE];
    let available = (bios.image.len() - start).min(buffer.len());
    buffer[..available].copy_from_slice(&bios.image[start..start + available]);

    let target = Engine::get_address(engine.es(), engine.bx());
    if let Err(error) = engine.write(target, &buffer) {
        bios.debug.push_line(format!("disk: {error}"));
        fail(engine, 0x04);
        return;
    }

    tracing::debug!(
        target: "loupe_dbg::bios",
        "read {} sector(s) from LBA {} to {:06X}", count, lba, target
    );
    engine.set_al(count as u8);
    engine.set_ah(0);
    engine.set_cf(false);
}

fn fail(engine: &Engine, status: u8) {
    engine.set_al(0);
    engine.set_ah(status);
    engine.set_cf(true);
}

fn drive_parameters(engine: &Engine) {
    engine.set_ah(0);
    engine.set_bl(0x04); // 1.44M drive type
    engine.set_ch(79); // maximum cylinder
    engine.set_cl(SECTORS_PER_TRACK as u8);
    engine.set_dh((HEADS - 1) as u8);
    engine.set_dl(1); // one drive attached
    engine.set_es(0);
    engine.set_di(0);
    engine.set_cf(false);
}
