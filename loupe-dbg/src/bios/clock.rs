use chrono::{Datelike, Local, Timelike};
use loupe_core::Engine;

use super::Bios;

// PIT channel 0 tick rate used by the BIOS day counter
const TICKS_PER_SECOND: f64 = 18.2065;

/// INT 1Ah time-of-day services, answered from the host clock.
pub(super) fn dispatch(bios: &Bios, engine: &Engine) -> bool {
    let now = Local::now();

    match engine.ah() {
        0x00 => {
            let ticks = (f64::from(now.num_seconds_from_midnight()) * TICKS_PER_SECOND) as u32;
            engine.set_cx((ticks >> 16) as u16);
            engine.set_dx(ticks as u16);
            engine.set_al(0); // midnight has not rolled over since the last read
        }
        0x02 => {
            engine.set_ch(bcd(now.hour() as u8));
            engine.set_cl(bcd(now.minute() as u8));
            engine.set_dh(bcd(now.second() as u8));
            engine.set_dl(0); // no daylight saving flag
            engine.set_cf(false);
        }
        0x04 => {
            let year = now.year();
            engine.set_ch(bcd((year / 100) as u8));
            engine.set_cl(bcd((year % 100) as u8));
            engine.set_dh(bcd(now.month() as u8));
            engine.set_dl(bcd(now.day() as u8));
            engine.set_cf(false);
        }
        function => {
            bios.debug
                .push_line(format!("clock: unhandled function {function:02X}"));
            engine.set_cf(true);
        }
    }

    true
}

fn bcd(value: u8) -> u8 {
    ((value / 10) << 4) | (value % 10)
}

#[cfg(test)]
mod tests {
    use super::bcd;

    #[test]
    fn bcd_packs_decimal_digits() {
        assert_eq!(bcd(0), 0x00);
        assert_eq!(bcd(9), 0x09);
        assert_eq!(bcd(42), 0x42);
        assert_eq!(bcd(59), 0x59);
    }
}
