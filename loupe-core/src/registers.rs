use proc_bitfield::bitfield;

bitfield! {
    /// EFLAGS with the status bits boot code actually toggles. Bit 1 is the
    /// fixed reserved bit and is always set.
    #[derive(Clone, Copy, PartialEq, Eq)]
    pub struct Eflags(pub u32): Debug, FromStorage, IntoStorage, DerefStorage {
        pub carry: bool @ 0,
        pub parity: bool @ 2,
        pub adjust: bool @ 4,
        pub zero: bool @ 6,
        pub sign: bool @ 7,
        pub trap: bool @ 8,
        pub interrupt: bool @ 9,
        pub direction: bool @ 10,
        pub overflow: bool @ 11,
    }
}

impl Default for Eflags {
    fn default() -> Self {
        // reserved bit 1 + IF, the state real firmware hands over with
        Eflags(0x0202)
    }
}

macro_rules! gpr32 {
    ($($get:ident/$set:ident => $field:ident),+ $(,)?) => {$(
        pub fn $get(&self) -> u32 {
            self.$field
        }

        pub fn $set(&mut self, value: u32) {
            self.$field = value;
        }
    )+};
}

macro_rules! gpr16 {
    ($($get:ident/$set:ident => $field:ident),+ $(,)?) => {$(
        pub fn $get(&self) -> u16 {
            self.$field as u16
        }

        pub fn $set(&mut self, value: u16) {
            self.$field = (self.$field & 0xFFFF_0000) | u32::from(value);
        }
    )+};
}

macro_rules! gpr8l {
    ($($get:ident/$set:ident => $field:ident),+ $(,)?) => {$(
        pub fn $get(&self) -> u8 {
            self.$field as u8
        }

        pub fn $set(&mut self, value: u8) {
            self.$field = (self.$field & 0xFFFF_FF00) | u32::from(value);
        }
    )+};
}

macro_rules! gpr8h {
    ($($get:ident/$set:ident => $field:ident),+ $(,)?) => {$(
        pub fn $get(&self) -> u8 {
            (self.$field >> 8) as u8
        }

        pub fn $set(&mut self, value: u8) {
            self.$field = (self.$field & 0xFFFF_00FF) | (u32::from(value) << 8);
        }
    )+};
}

macro_rules! sreg {
    ($($get:ident/$set:ident => $field:ident),+ $(,)?) => {$(
        pub fn $get(&self) -> u16 {
            self.$field
        }

        pub fn $set(&mut self, value: u16) {
            self.$field = value;
        }
    )+};
}

/// The x86 register file. The 8- and 16-bit registers are overlays of the
/// 32-bit ones, so only the wide registers are stored; the narrow views are
/// derived, which keeps every alias consistent by construction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Registers {
    pub eax: u32,
    pub ebx: u32,
    pub ecx: u32,
    pub edx: u32,
    pub esi: u32,
    pub edi: u32,
    pub esp: u32,
    pub ebp: u32,
    pub eip: u32,
    pub cs: u16,
    pub ds: u16,
    pub ss: u16,
    pub es: u16,
    pub fs: u16,
    pub gs: u16,
    pub eflags: Eflags,
}

impl Registers {
    gpr32! {
        eax/set_eax => eax, ebx/set_ebx => ebx, ecx/set_ecx => ecx, edx/set_edx => edx,
        esi/set_esi => esi, edi/set_edi => edi, esp/set_esp => esp, ebp/set_ebp => ebp,
        eip/set_eip => eip,
    }

    gpr16! {
        ax/set_ax => eax, bx/set_bx => ebx, cx/set_cx => ecx, dx/set_dx => edx,
        si/set_si => esi, di/set_di => edi, sp/set_sp => esp, bp/set_bp => ebp,
        ip/set_ip => eip,
    }

    gpr8l! {
        al/set_al => eax, bl/set_bl => ebx, cl/set_cl => ecx, dl/set_dl => edx,
    }

    gpr8h! {
        ah/set_ah => eax, bh/set_bh => ebx, ch/set_ch => ecx, dh/set_dh => edx,
    }

    sreg! {
        cs/set_cs => cs, ds/set_ds => ds, ss/set_ss => ss,
        es/set_es => es, fs/set_fs => fs, gs/set_gs => gs,
    }

    pub fn eflags(&self) -> u32 {
        self.eflags.0
    }

    pub fn set_eflags(&mut self, value: u32) {
        self.eflags = Eflags(value | 0x2);
    }

    pub fn cf(&self) -> bool {
        self.eflags.carry()
    }

    pub fn set_cf(&mut self, value: bool) {
        self.eflags.set_carry(value);
    }
}

#[cfg(test)]
mod tests {
    use super::{Eflags, Registers};

    #[test]
    fn narrow_views_alias_the_wide_register() {
        let mut regs = Registers::default();

        regs.set_eax(0xDEAD_BEEF);
        assert_eq!(regs.ax(), 0xBEEF);
        assert_eq!(regs.ah(), 0xBE);
        assert_eq!(regs.al(), 0xEF);

        regs.set_ah(0x12);
        assert_eq!(regs.eax(), 0xDEAD_12EF);

        regs.set_al(0x34);
        assert_eq!(regs.eax(), 0xDEAD_1234);

        regs.set_ax(0x5678);
        assert_eq!(regs.eax(), 0xDEAD_5678);
    }

    #[test]
    fn carry_toggles_only_bit_zero() {
        let mut regs = Registers::default();
        regs.set_eflags(0x0246);

        regs.set_cf(true);
        assert!(regs.cf());
        assert_eq!(regs.eflags(), 0x0247);

        regs.set_cf(false);
        assert!(!regs.cf());
        assert_eq!(regs.eflags(), 0x0246);
    }

    #[test]
    fn reserved_bit_is_always_set() {
        assert_eq!(Eflags::default().0 & 0x2, 0x2);

        let mut regs = Registers::default();
        regs.set_eflags(0);
        assert_eq!(regs.eflags(), 0x2);
    }
}
