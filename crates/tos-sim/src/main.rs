use std::fs::{self, File};
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use ktrace::{decode_frame, split_frames, TraceConfig, Tracer, WriterBackend};
use log::{info, warn};
use tos::{Kernel, KernelConfig, TIMER_IRQ};

mod demo;
mod format;
mod logger;

#[derive(Parser, Debug)]
#[command(author, version, about = "Host simulator for the TOS kernel")]
struct Opts {
    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Boot the kernel, run the demo workload and drive timer ticks
    Run(RunArgs),
    /// Pretty-print a binary trace file written by `run --trace`
    Decode {
        #[arg(value_name = "FILE")]
        path: PathBuf,
    },
}

#[derive(Args, Debug)]
struct RunArgs {
    /// Number of timer ticks to simulate
    #[arg(long, default_value_t = 50)]
    ticks: u32,

    /// Wall-clock milliseconds between ticks
    #[arg(long = "tick-ms", default_value_t = 10)]
    tick_ms: u64,

    /// Number of sleeper processes
    #[arg(long, default_value_t = 3)]
    sleepers: usize,

    /// Bytes fed into COM1, one per tick; enables the serial driver
    #[arg(long, value_name = "TEXT")]
    serial: Option<String>,

    /// Write binary trace frames to this file
    #[arg(long, value_name = "PATH")]
    trace: Option<PathBuf>,

    /// Limits the process table
    #[arg(long = "max-processes", default_value_t = tos::config::DEFAULT_MAX_PROCESSES)]
    max_processes: usize,
}

fn main() -> Result<()> {
    let opts = Opts::parse();
    logger::init(opts.verbose).context("installing logger")?;

    match opts.command {
        Command::Run(args) => run(args),
        Command::Decode { path } => decode(&path),
    }
}

fn run(args: RunArgs) -> Result<()> {
    let running = Arc::new(AtomicBool::new(true));
    let flag = running.clone();
    ctrlc::set_handler(move || flag.store(false, Ordering::SeqCst))
        .context("installing Ctrl-C handler")?;

    let mut builder = KernelConfig::builder()
        .name("tos-sim")
        .max_processes(args.max_processes)
        .max_ports(args.max_processes * 2)
        .serial(args.serial.is_some());
    if let Some(path) = &args.trace {
        let file = File::create(path)
            .with_context(|| format!("creating trace file {}", path.display()))?;
        let tracer = Tracer::new(TraceConfig::default(), WriterBackend::new(BufWriter::new(file)));
        builder = builder.trace_hook(tracer.into_handle().hook());
    }

    let kernel = Kernel::boot(builder.build()).context("booting kernel")?;

    let workload = demo::Workload {
        sleepers: args.sleepers,
        serial_text: args.serial.clone(),
    };
    kernel
        .create_process(demo::launcher, demo::LAUNCHER_PRIORITY, workload, "launcher")
        .context("starting demo workload")?;
    kernel.wait_idle()?;

    let mut input = args.serial.unwrap_or_default().into_bytes().into_iter();
    let tick_len = Duration::from_millis(args.tick_ms);
    for tick in 1..=args.ticks {
        if !running.load(Ordering::SeqCst) {
            info!("interrupted after {} ticks", tick - 1);
            break;
        }
        if let Some(byte) = input.next() {
            kernel.serial_input(byte);
        }
        kernel.raise_interrupt(TIMER_IRQ);
        thread::sleep(tick_len);
        if !kernel.wait_idle_for(Duration::from_secs(1))? {
            warn!("tick {tick}: system still busy");
        }
    }

    println!("{}", kernel.process_dump());
    let output = kernel.serial_output();
    if !output.is_empty() {
        println!("COM1 output: {:?}", String::from_utf8_lossy(&output));
    }
    kernel.shutdown();
    Ok(())
}

fn decode(path: &Path) -> Result<()> {
    let bytes = fs::read(path).with_context(|| format!("reading {}", path.display()))?;
    let (frames, tail) = split_frames(&bytes);
    for frame in frames {
        match decode_frame(frame) {
            Ok(record) => println!("{}", format::describe(&record)),
            Err(err) => warn!("skipping frame: {err}"),
        }
    }
    if !tail.is_empty() {
        warn!("{} trailing bytes without a frame end", tail.len());
    }
    Ok(())
}
