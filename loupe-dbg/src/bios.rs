pub(crate) mod clock;
pub(crate) mod disk;
pub(crate) mod keyboard;
pub(crate) mod system;
pub(crate) mod video;

use std::collections::HashMap;
use std::sync::Arc;

use loupe_core::Engine;

use crate::streams::Stream;
use crate::ui::Ui;

type Handler = fn(&Bios, &Engine) -> bool;

/// The BIOS service registry: maps an interrupt vector to its handler and
/// carries the state the handlers need (streams, the boot image for disk
/// reads, the UI for blocking keyboard input).
///
/// Registered with the engine as a single interrupt subscriber; vectors with
/// no entry are reported unclaimed so the engine raises the unhandled-
/// interrupt fault.
pub struct Bios {
    handlers: HashMap<u8, Handler>,
    pub(crate) output: Stream,
    pub(crate) debug: Stream,
    pub(crate) ui: Ui,
    pub(crate) image: Arc<Vec<u8>>,
    pub(crate) debug_video: bool,
}

impl Bios {
    pub fn new(
        ui: Ui,
        output: Stream,
        debug: Stream,
        image: Arc<Vec<u8>>,
        debug_video: bool,
    ) -> Self {
        let mut handlers: HashMap<u8, Handler> = HashMap::new();
        handlers.insert(0x10, video::dispatch);
        handlers.insert(0x11, system::equipment_word);
        handlers.insert(0x12, system::memory_size);
        handlers.insert(0x13, disk::dispatch);
        handlers.insert(0x16, keyboard::dispatch);
        handlers.insert(0x18, system::boot_failure);
        handlers.insert(0x19, system::bootstrap);
        handlers.insert(0x1A, clock::dispatch);
        handlers.insert(0x20, system::terminate);
        handlers.insert(0x21, system::dos_services);

        Self {
            handlers,
            output,
            debug,
            ui,
            image,
            debug_video,
        }
    }

    pub fn dispatch(&self, vector: u8, engine: &Engine) -> bool {
        match self.handlers.get(&vector) {
            Some(handler) => handler(self, engine),
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::Bios;
    use crate::streams::Stream;
    use crate::ui::{Mode, Ui};
    use loupe_core::Engine;
    use std::sync::Arc;

    fn fixture(image: Vec<u8>) -> (Bios, Engine) {
        let engine = Engine::new(2 * 1024 * 1024).unwrap();
        let output = Stream::buffered();
        let debug = Stream::buffered();
        let ui = Ui::new(
            Mode::Interactive,
            false,
            engine.clone(),
            output.clone(),
            debug.clone(),
        );
        let bios = Bios::new(ui, output, debug, Arc::new(image), false);
        (bios, engine)
    }

    #[test]
    fn unknown_vectors_are_not_claimed() {
        let (bios, engine) = fixture(Vec::new());
        assert!(!bios.dispatch(0x99, &engine));
    }

    #[test]
    fn teletype_appends_to_the_output_stream() {
        let (bios, engine) = fixture(Vec::new());
        engine.set_ah(0x0E);
        engine.set_al(b'A');

        assert!(bios.dispatch(0x10, &engine));
        assert_eq!(bios.output.contents(), "A");
    }

    #[test]
    fn conventional_memory_reports_640k() {
        let (bios, engine) = fixture(Vec::new());
        assert!(bios.dispatch(0x12, &engine));
        assert_eq!(engine.ax(), 640);
    }

    #[test]
    fn disk_read_copies_a_sector_to_es_bx() {
        // image: two sectors, the second filled with 0x5A
        let mut image = vec![0u8; 1024];
        image[512..].fill(0x5A);
        let (bios, engine) = fixture(image);

        engine.set_ah(0x02);
        engine.set_al(1); // one sector
        engine.set_ch(0); // cylinder 0
        engine.set_cl(2); // sector 2
        engine.set_dh(0); // head 0
        engine.set_es(0);
        engine.set_bx(0x0600);

        assert!(bios.dispatch(0x13, &engine));
        assert!(!engine.cf());
        assert_eq!(engine.ah(), 0);
        assert_eq!(engine.al(), 1);
        assert_eq!(engine.read(0x0600, 512).unwrap(), vec![0x5A; 512]);
    }

    #[test]
    fn disk_read_past_the_image_sets_sector_not_found() {
        let (bios, engine) = fixture(vec![0u8; 512]);

        engine.set_ah(0x02);
        engine.set_al(1);
        engine.set_ch(40); // way past a one-sector image
        engine.set_cl(1);
        engine.set_dh(0);

        assert!(bios.dispatch(0x13, &engine));
        assert!(engine.cf());
        assert_eq!(engine.ah(), 0x04);
        assert_eq!(engine.al(), 0);
    }

    #[test]
    fn keyboard_check_reports_no_key_pending() {
        let (bios, engine) = fixture(Vec::new());
        engine.set_ah(0x01);

        assert!(bios.dispatch(0x16, &engine));
        assert_eq!(engine.ax(), 0);
        assert_ne!(engine.eflags() & 0x40, 0, "ZF must be set");
    }

    #[test]
    fn dos_string_output_stops_at_the_dollar() {
        let (bios, engine) = fixture(Vec::new());
        engine.write(0x2000, b"hello$world").unwrap();
        engine.set_ds(0x0200);
        engine.set_dx(0);
        engine.set_ah(0x09);

        assert!(bios.dispatch(0x21, &engine));
        assert_eq!(bios.output.contents(), "hello");
    }

    #[test]
    fn dos_exit_stops_the_engine_without_faulting() {
        let (bios, engine) = fixture(Vec::new());
        engine.set_ah(0x4C);
        engine.set_al(3);

        assert!(bios.dispatch(0x21, &engine));
        assert!(bios.debug.contents().contains("exit"));
    }

    #[test]
    fn clock_services_return_bcd_fields() {
        let (bios, engine) = fixture(Vec::new());
        engine.set_ah(0x02);

        assert!(bios.dispatch(0x1A, &engine));
        assert!(!engine.cf());
        // both nibbles of every field stay in BCD range
        for value in [engine.ch(), engine.cl(), engine.dh()] {
            assert!(value >> 4 <= 9 && value & 0xF <= 9, "not BCD: {value:02X}");
        }
    }
}
