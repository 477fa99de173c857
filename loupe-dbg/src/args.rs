use std::path::PathBuf;

use clap::Parser;

/// Command line surface. Everything the debugger core needs is carried in
/// this one value.
#[derive(Parser, Debug, Clone)]
#[command(name = "bootloupe")]
#[command(about = "an interactive BIOS-level debugger for real-mode boot images", long_about = None)]
pub struct Args {
    /// Raw boot image, loaded at linear address 0x7C00
    #[arg(value_name = "BOOT_IMG")]
    pub boot_img: PathBuf,

    /// Amount of RAM for the virtual machine, in megabytes
    #[arg(short, long, default_value_t = 64, value_parser = clap::value_parser!(u64).range(2..))]
    pub memory: u64,

    /// Break at a linear address (hex, may be repeated)
    #[arg(short = 'b', long = "break", value_name = "HEX", value_parser = parse_hex)]
    pub breakpoints: Vec<u64>,

    /// Break before each interrupt dispatch
    #[arg(long)]
    pub break_int: bool,

    /// Break after each interrupt returns
    #[arg(long)]
    pub break_iret: bool,

    /// Set EFLAGS.TF when resuming from a break
    #[arg(long)]
    pub trap: bool,

    /// Verbose logging of video BIOS calls
    #[arg(long)]
    pub debug_video: bool,

    /// Break before every instruction
    #[arg(long)]
    pub single_step: bool,

    /// Don't start the user interface (output goes to stdout, debug to stderr)
    #[arg(long)]
    pub no_ui: bool,

    /// Don't use colors
    #[arg(long)]
    pub no_colors: bool,
}

pub fn parse_hex(value: &str) -> Result<u64, String> {
    let digits = value
        .trim_start_matches("0x")
        .trim_start_matches("0X");
    u64::from_str_radix(digits, 16).map_err(|_| format!("invalid hex address '{value}'"))
}
