//! mr32-emu: an MRISC32 CPU simulator

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;

use mr32_emu::cpu::{Cpu, CpuSimple};
use mr32_emu::{loader, mmio, GfxConfig, Ram, SimConfig};

#[derive(Parser, Debug)]
#[command(name = "mr32-emu", about = "An MRISC32 CPU simulator", version)]
struct Args {
    /// Program binary image to load
    bin_file: PathBuf,

    /// RAM size in bytes
    #[arg(short = 'R', long = "ram-size", default_value_t = 0x0100_0000)]
    ram_size: u64,

    /// Program (ROM) start address; default is the image's first word
    #[arg(short = 'A', long = "addr", value_parser = parse_u32)]
    addr: Option<u32>,

    /// Maximum number of CPU cycles to simulate (-1 = unbounded)
    #[arg(short = 'c', long = "cycles", default_value_t = -1, allow_hyphen_values = true)]
    cycles: i64,

    /// Enable debug trace output to FILE
    #[arg(short = 't', long = "trace", value_name = "FILE")]
    trace: Option<PathBuf>,

    /// Print stats
    #[arg(short = 'v', long = "verbose")]
    verbose: bool,

    /// Enable graphics (handled by an external presentation front-end)
    #[arg(short = 'g', long = "gfx")]
    gfx: bool,

    /// Framebuffer address
    #[arg(long = "gfx-addr", value_parser = parse_u32, default_value = "0x8000")]
    gfx_addr: u32,

    /// Palette address
    #[arg(long = "gfx-palette", value_parser = parse_u32, default_value = "0")]
    gfx_palette: u32,

    /// Framebuffer width
    #[arg(long = "gfx-width", default_value_t = 256)]
    gfx_width: u32,

    /// Framebuffer height
    #[arg(long = "gfx-height", default_value_t = 256)]
    gfx_height: u32,

    /// Framebuffer depth in bits per pixel
    #[arg(long = "gfx-depth", default_value_t = 8)]
    gfx_depth: u32,
}

/// Accept decimal or 0x-prefixed hexadecimal values.
fn parse_u32(s: &str) -> Result<u32, String> {
    let result = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => u32::from_str_radix(hex, 16),
        None => s.parse(),
    };
    result.map_err(|e| e.to_string())
}

fn main() -> anyhow::Result<ExitCode> {
    env_logger::init();
    let args = Args::parse();

    let config = SimConfig {
        ram_size: args.ram_size,
        max_cycles: args.cycles,
        trace_path: args.trace.clone(),
        load_addr: args.addr,
        verbose: args.verbose,
        gfx: GfxConfig {
            enabled: args.gfx,
            addr: args.gfx_addr,
            pal_addr: args.gfx_palette,
            width: args.gfx_width,
            height: args.gfx_height,
            depth: args.gfx_depth,
        },
    };

    if config.gfx.enabled {
        log::warn!("graphics presentation is not part of this build; MMIO fields are still live");
    }

    // Initialize the RAM and load the program image.
    let ram = Arc::new(Ram::new(config.ram_size));
    loader::load_image(&args.bin_file, &ram, config.load_addr)
        .with_context(|| format!("loading {}", args.bin_file.display()))?;

    // Populate the machine-info MMIO fields when the RAM covers them.
    mmio::seed_fields(&ram)?;

    let mut cpu = CpuSimple::new(ram, &config).context("initializing the CPU")?;

    if config.verbose {
        println!("------------------------------------------------------------------------");
    }

    let exit_code = match cpu.run() {
        Ok(code) => code,
        Err(fault) => {
            eprintln!("Error: {}", fault);
            1
        }
    };

    if config.verbose {
        println!("------------------------------------------------------------------------");
        println!("Exit code: {}", exit_code as i32);
        cpu.dump_stats();
    }

    Ok(ExitCode::from(exit_code as u8))
}
