//! CHIP-8 dynamic-recompiler CLI.
//!
//! This binary provides the process-level plumbing around the engine:
//! 1. **Run:** Load a ROM and execute it, rendering the display to the
//!    terminal and feeding keys from stdin (x86 hosts only).
//! 2. **Translate:** Load a ROM and translate its entry block without
//!    executing, then dump the cache and table state — works on any host.

use std::io::BufRead;
use std::{fs, process};

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use c8jit_core::common::GuestPc;
use c8jit_core::{Config, JitEngine, RunEvent};

#[derive(Parser, Debug)]
#[command(
    name = "c8jit",
    author,
    version,
    about = "Dynamic-recompiling CHIP-8 emulator",
    long_about = "Translates CHIP-8 bytecode to IA-32 machine code at run time.\n\nExamples:\n  c8jit run --file roms/pong.ch8\n  c8jit translate --file roms/pong.ch8\n  c8jit run --file roms/pong.ch8 --config config.json"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Load a ROM and execute it (requires an x86 host).
    Run {
        /// ROM image to execute.
        #[arg(short, long)]
        file: String,

        /// JSON configuration file (defaults apply to absent fields).
        #[arg(long)]
        config: Option<String>,

        /// Stop after this many dispatch iterations.
        #[arg(long)]
        max_steps: Option<u64>,
    },

    /// Load a ROM and translate its entry block without executing.
    Translate {
        /// ROM image to translate.
        #[arg(short, long)]
        file: String,

        /// JSON configuration file (defaults apply to absent fields).
        #[arg(long)]
        config: Option<String>,
    },
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Run {
            file,
            config,
            max_steps,
        } => cmd_run(&file, config.as_deref(), max_steps),
        Commands::Translate { file, config } => cmd_translate(&file, config.as_deref()),
    }
}

/// Reads the engine configuration, exiting on malformed JSON.
fn load_config(path: Option<&str>) -> Config {
    let Some(path) = path else {
        return Config::default();
    };
    let text = read_file(path);
    Config::from_json(&text).unwrap_or_else(|e| {
        eprintln!("[!] FATAL: Bad config '{path}': {e}");
        process::exit(1);
    })
}

/// Reads a file, exiting with a message on failure.
fn read_file(path: &str) -> String {
    fs::read_to_string(path).unwrap_or_else(|e| {
        eprintln!("[!] FATAL: Could not read file '{path}': {e}");
        process::exit(1);
    })
}

/// Builds an engine with the given ROM loaded.
fn boot(file: &str, config: Config) -> JitEngine {
    let rom = fs::read(file).unwrap_or_else(|e| {
        eprintln!("[!] FATAL: Could not read ROM '{file}': {e}");
        process::exit(1);
    });
    let mut engine = JitEngine::new(config).unwrap_or_else(|e| {
        eprintln!("[!] FATAL: {e}");
        process::exit(1);
    });
    engine.load_rom(&rom).unwrap_or_else(|e| {
        eprintln!("[!] FATAL: {e}");
        process::exit(1);
    });
    println!("[*] Loaded {} ({} bytes)", file, rom.len());
    engine
}

/// Runs the dispatch loop until the guest halts or the step limit trips.
fn cmd_run(file: &str, config: Option<&str>, max_steps: Option<u64>) {
    let mut engine = boot(file, load_config(config));
    let stdin = std::io::stdin();

    loop {
        match engine.step() {
            Ok(RunEvent::Continue) => {}
            Ok(RunEvent::Draw) => render(&engine),
            Ok(RunEvent::WaitingForKey) => {
                println!("[?] Waiting for key (0-F then enter):");
                let mut line = String::new();
                if stdin.lock().read_line(&mut line).is_err() {
                    break;
                }
                if let Some(key) = line.chars().next().and_then(|c| c.to_digit(16)) {
                    engine.press_key(key as u8);
                    engine.release_key(key as u8);
                }
            }
            Ok(RunEvent::Halted(reason)) => {
                println!("[*] Guest halted: {reason}");
                break;
            }
            Err(e) => {
                eprintln!("[!] FATAL: {e}");
                process::exit(1);
            }
        }
        if let Some(limit) = max_steps {
            if engine.stats().dispatch_iterations >= limit {
                println!("[*] Step limit reached");
                break;
            }
        }
    }

    println!();
    println!("{}", engine.stats());
    engine.shutdown();
}

/// Translates the entry block and dumps the resulting core state.
fn cmd_translate(file: &str, config: Option<&str>) {
    let mut engine = boot(file, load_config(config));
    let entry = engine.guest().rom_base();

    if let Err(e) = engine.translate_at(entry) {
        eprintln!("[!] FATAL: {e}");
        process::exit(1);
    }

    println!();
    dump_cache(&engine, entry);
    println!();
    println!("{}", engine.stats());
    engine.shutdown();
}

/// Prints one line per cache region and jump entry.
fn dump_cache(engine: &JitEngine, entry: GuestPc) {
    println!("[*] Cache after translating {entry}:");
    let cache = engine.cache();
    for index in 0..cache.len() {
        if let Some(region) = cache.region(index) {
            println!(
                "    region[{index}] guest {}..{} host {:#010x}+{:#x}{}",
                region.start(),
                region.end(),
                region.host_base(),
                region.cursor(),
                if region.stop_write() { " (closed)" } else { "" },
            );
        }
    }
    let jumps = engine.jumps();
    for index in 0..jumps.len() {
        if let Some(jump) = jumps.entry(index) {
            match jumps.host_target(index) {
                Some(target) => println!(
                    "    jump[{index}] -> {} resolved {target:#010x}",
                    jump.guest_target
                ),
                None => println!("    jump[{index}] -> {} pending", jump.guest_target),
            }
        }
    }
}

/// Renders the framebuffer as ASCII art.
fn render(engine: &JitEngine) {
    let guest = engine.guest();
    let (w, h) = (guest.width(), guest.height());
    let fb = guest.display();
    let mut out = String::with_capacity((w + 1) * h);
    for y in 0..h {
        for x in 0..w {
            out.push(if fb[y * w + x] { '#' } else { ' ' });
        }
        out.push('\n');
    }
    print!("\x1B[2J\x1B[H{out}");
}
