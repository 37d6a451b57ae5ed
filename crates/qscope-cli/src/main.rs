#![forbid(unsafe_code)]

//! Offline driver for the qscope introspection library.
//!
//! Loads a flat dump of a monitor process (a raw byte image plus a text
//! symbol map) and runs the same walkers and commands a live debugger
//! would, printing one record per line.

use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tracing::debug;

use qscope::module::{Command, CommandOutput, Module, WalkRecord};
use qscope::ram::RamBlockWalker;
use qscope_remote::FlatImage;

#[derive(Debug, Parser)]
#[command(name = "qscope", about = "Walk monitor data structures in a flat memory dump")]
struct Args {
    /// Raw memory image of the monitor process.
    #[arg(long)]
    image: PathBuf,

    /// Virtual address the image was captured from (hex accepted).
    #[arg(long, value_parser = parse_addr)]
    base: u64,

    /// Symbol map: one `name address` pair per line (`nm` output also works).
    #[arg(long)]
    symbols: PathBuf,

    #[command(subcommand)]
    cmd: Cmd,
}

#[derive(Debug, Subcommand)]
enum Cmd {
    /// List the walkers the module registered against this image.
    Walkers,
    /// Run a walker and print every record it yields.
    Walk {
        name: String,
        /// Start from this address instead of the walker's global anchor.
        #[arg(long, value_parser = parse_addr)]
        start: Option<u64>,
    },
    /// List the registered guest-RAM blocks.
    RamBlocks,
    /// Project a PCI device onto its virtio device state.
    Pcidev2virtio {
        #[arg(value_parser = parse_addr)]
        addr: u64,
    },
    /// Translate a guest physical address to a host virtual address.
    Tpa2qva {
        #[arg(value_parser = parse_addr)]
        addr: u64,
    },
    /// Read the used ring's event slot for a VRing.
    Vrused {
        #[arg(value_parser = parse_addr)]
        addr: u64,
    },
    /// Read the available ring's event slot for a VRing.
    Vravail {
        #[arg(value_parser = parse_addr)]
        addr: u64,
    },
}

fn parse_addr(s: &str) -> Result<u64, String> {
    let (digits, radix) = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(rest) => (rest, 16),
        None => (s, 10),
    };
    u64::from_str_radix(digits, radix).map_err(|e| format!("bad address {s:?}: {e}"))
}

/// Parse `name address` or nm-style `address type name` lines. Blank lines
/// and `#` comments are skipped.
fn parse_symbol_map(text: &str) -> Result<HashMap<String, u64>> {
    let mut map = HashMap::new();
    for (lineno, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let fields: Vec<&str> = line.split_whitespace().collect();
        let (name, addr) = match fields.as_slice() {
            [name, addr] => (
                *name,
                parse_addr(addr)
                    .map_err(|e| anyhow::anyhow!("symbol map line {}: {e}", lineno + 1))?,
            ),
            // nm prints `<value> <type> <name>`, value in bare hex.
            [addr, ty, name] if ty.len() == 1 => (
                *name,
                u64::from_str_radix(addr, 16).with_context(|| {
                    format!("symbol map line {}: bad nm value {addr:?}", lineno + 1)
                })?,
            ),
            _ => bail!("symbol map line {}: expected `name address`", lineno + 1),
        };
        map.insert(name.to_owned(), addr);
    }
    Ok(map)
}

fn print_record(addr: u64, record: &WalkRecord) {
    match record {
        WalkRecord::HostBus(bus) => {
            println!("{addr:#018x} domain {} bus {:#x}", bus.domain, bus.bus);
        }
        WalkRecord::Device(dev) => {
            println!("{addr:#018x} {:<24} devfn {:#04x}", dev.name, dev.devfn);
        }
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = Args::parse();

    let bytes = fs::read(&args.image)
        .with_context(|| format!("reading image {}", args.image.display()))?;
    let text = fs::read_to_string(&args.symbols)
        .with_context(|| format!("reading symbol map {}", args.symbols.display()))?;
    let symbols = parse_symbol_map(&text)?;
    debug!(
        image_len = bytes.len(),
        base = format_args!("{:#x}", args.base),
        symbols = symbols.len(),
        "image loaded"
    );

    let mut image = FlatImage::from_bytes(args.base, bytes);
    for (name, addr) in symbols {
        image.define_symbol(&name, addr);
    }

    let module = Module::load(&image).context("loading module against image")?;

    match args.cmd {
        Cmd::Walkers => {
            for spec in module.registry().iter() {
                println!("{:<24} {}", spec.name, spec.description);
            }
        }
        Cmd::Walk { name, start } => {
            let mut walker = module
                .registry()
                .spawn(&image, &name, start)
                .with_context(|| format!("spawning walker {name:?}"))?;
            while let Some((addr, record)) = walker.next(&image)? {
                print_record(addr, &record);
            }
        }
        Cmd::RamBlocks => {
            let mut walker = RamBlockWalker::from_global(&image)?;
            while let Some((addr, block)) = walker.next(&image)? {
                println!(
                    "{addr:#018x} {:<16} offset {:#012x} length {:#012x} host {:#018x}",
                    block.idstr, block.offset, block.length, block.host
                );
            }
        }
        Cmd::Pcidev2virtio { addr } => run_command(&image, Command::PciDevToVirtio, addr)?,
        Cmd::Tpa2qva { addr } => run_command(&image, Command::TranslateAddress, addr)?,
        Cmd::Vrused { addr } => run_command(&image, Command::VringUsed, addr)?,
        Cmd::Vravail { addr } => run_command(&image, Command::VringAvail, addr)?,
    }

    Ok(())
}

fn run_command(image: &FlatImage, cmd: Command, addr: u64) -> Result<()> {
    match cmd.run(image, Some(addr), &[]) {
        Ok(CommandOutput::Pointer(p)) => println!("{p:#018x}"),
        Ok(CommandOutput::Index(i)) => println!("{i}"),
        Ok(CommandOutput::IoSpace) => println!("{addr:#x} maps to I/O space"),
        Err(e) if e.is_usage() => bail!("usage error: {e}"),
        Err(e) => return Err(anyhow::Error::new(e).context(format!("{} failed", cmd.name()))),
    }
    Ok(())
}
