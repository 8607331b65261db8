//! Command-line front end for `stm8_bsl_core`: parses CLI args with `bpaf`,
//! wires up logging, and drives one programming session.

use std::path::PathBuf;

use anyhow::{Context, Result};
use bpaf::{Bpaf, Parser};

use stm8_bsl_core::session::{DeviceProfile, SessionConfig};
use stm8_bsl_core::{parse_ihex, parse_s19, Image, PortConfig, WriteOptions};

fn parse_hex_u32(s: &str) -> Result<u32, String> {
    let s = s.trim();
    let s = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")).unwrap_or(s);
    u32::from_str_radix(s, 16).map_err(|e| format!("invalid hex value: {e}"))
}

fn option_byte_addr() -> impl Parser<Option<u32>> {
    bpaf::long("option-byte-addr")
        .help("Override the option-byte address (hex, e.g. 0x487E)")
        .argument::<String>("ADDR")
        .parse(|s| parse_hex_u32(&s))
        .optional()
}

fn app_entry() -> impl Parser<Option<u32>> {
    bpaf::long("app-entry")
        .help("Override the application entry address (hex, e.g. 0x8000)")
        .argument::<String>("ADDR")
        .parse(|s| parse_hex_u32(&s))
        .optional()
}

fn erase_flag() -> impl Parser<bool> {
    let erase = bpaf::long("erase")
        .help("Mass-erase P-flash and D-flash before programming (default)")
        .req_flag(true);
    let no_erase = bpaf::long("no-erase")
        .help("Skip mass erase")
        .req_flag(false);
    bpaf::construct!([erase, no_erase]).fallback(true)
}

fn verbosity() -> impl Parser<usize> {
    bpaf::short('v')
        .long("verbose")
        .help("Increase log verbosity; repeatable")
        .req_flag(())
        .many()
        .map(|flags| flags.len())
}

#[derive(Debug, Clone, Bpaf)]
#[bpaf(options, version)]
struct Args {
    /// Serial port device, e.g. /dev/ttyUSB0 or COM6
    #[bpaf(short('p'), long("port"))]
    port: String,

    /// Session baud rate after the bootstrap handshake
    #[bpaf(short('b'), long("baud"), fallback(230_400))]
    baud: u32,

    /// Firmware image to flash (S19 or Intel HEX, detected by extension)
    #[bpaf(short('i'), long("input"))]
    input: Option<PathBuf>,

    #[bpaf(external(erase_flag))]
    erase: bool,

    /// Read back the written image and compare byte-for-byte
    #[bpaf(long("verify"), switch)]
    verify: bool,

    /// Skip the final jump to the application entry point
    #[bpaf(long("no-run"), switch)]
    no_run: bool,

    #[bpaf(external(option_byte_addr))]
    option_byte_addr: Option<u32>,

    #[bpaf(external(app_entry))]
    app_entry: Option<u32>,

    #[bpaf(external(verbosity))]
    verbose: usize,
}

fn init_logging(verbose: usize) {
    let default_level = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
        .init();
}

fn load_image(path: &PathBuf) -> Result<Image> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("reading firmware image {}", path.display()))?;

    let is_ihex = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.eq_ignore_ascii_case("hex") || e.eq_ignore_ascii_case("ihx"))
        .unwrap_or(false)
        || text.trim_start().starts_with(':');

    if is_ihex {
        parse_ihex(&text).with_context(|| format!("parsing Intel HEX image {}", path.display()))
    } else {
        parse_s19(&text).with_context(|| format!("parsing S19 image {}", path.display()))
    }
}

fn run() -> Result<()> {
    let args = args().run();
    init_logging(args.verbose);

    let image = match &args.input {
        Some(path) => Some(load_image(path)?),
        None => None,
    };

    let mut profile = DeviceProfile::default();
    if let Some(addr) = args.option_byte_addr {
        profile.option_byte_addr = addr;
    }
    if let Some(addr) = args.app_entry {
        profile.app_entry = addr;
    }

    let config = SessionConfig {
        session_baud: args.baud,
        erase: args.erase,
        verify: args.verify,
        run: !args.no_run,
        write_opts: WriteOptions::default(),
        profile,
    };

    let port_config = PortConfig::bootstrap(&args.port);
    log::info!("opening {} at bootstrap baud", args.port);
    let mut transport = stm8_bsl_core::SerialTransport::open(&port_config, true)
        .with_context(|| format!("opening serial port {}", args.port))?;

    let report = stm8_bsl_core::session::run(&mut transport, image.as_ref(), &config)
        .context("programming session failed")?;

    log::info!(
        "session complete: ram_routine={}B erased={} image={}B verified={} jumped={}",
        report.ram_routine_bytes,
        report.erased,
        report.image_bytes_written,
        report.verified,
        report.jumped
    );

    Ok(())
}

fn main() {
    if let Err(err) = run() {
        eprintln!("error: {err:#}");
        std::process::exit(1);
    }
}
