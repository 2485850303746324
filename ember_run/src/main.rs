use std::{
    fs,
    path::{Path, PathBuf},
    process::ExitCode,
};

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use ember_core::{disassemble, EmberVM, Program, RunResult, VmConfig};

#[derive(Clone, Copy, Debug, ValueEnum)]
enum Format {
    Json,
    Msgpack,
}

/// Run a linked Ember program
#[derive(Parser)]
struct Opts {
    /// Program artifact to load
    program: PathBuf,

    /// Encoding of the program artifact
    #[arg(short, long, value_enum, default_value = "json")]
    format: Format,

    /// Heap size in cells, split across both semi-spaces
    #[arg(long)]
    heap_size: Option<usize>,

    /// Verify collector invariants and log at debug level
    #[arg(short, long)]
    debug: bool,

    /// VM configuration file (JSON)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Print the disassembled bytecode before running
    #[arg(long)]
    disassemble: bool,

    /// Print collector cycle reports and totals after the run
    #[arg(long)]
    gc_report: bool,
}

fn load_config(opts: &Opts) -> Result<VmConfig> {
    let mut config = match &opts.config {
        Some(path) => {
            let text = fs::read_to_string(path)
                .with_context(|| format!("reading config {}", path.display()))?;
            serde_json::from_str(&text)
                .with_context(|| format!("parsing config {}", path.display()))?
        }
        None => VmConfig::default(),
    };
    if let Some(heap_size) = opts.heap_size {
        config.gc.heap_size = heap_size;
    }
    if opts.debug {
        config.gc.debug = true;
    }
    Ok(config)
}

fn load_program(path: &Path, format: Format) -> Result<Program> {
    let bytes = fs::read(path).with_context(|| format!("reading program {}", path.display()))?;
    let program = match format {
        Format::Json => serde_json::from_slice(&bytes)
            .with_context(|| format!("decoding JSON program {}", path.display()))?,
        Format::Msgpack => rmp_serde::from_slice(&bytes)
            .with_context(|| format!("decoding MessagePack program {}", path.display()))?,
    };
    Ok(program)
}

fn run(opts: &Opts) -> Result<RunResult> {
    let config = load_config(opts)?;
    let program = load_program(&opts.program, opts.format)?;
    log::debug!(
        "loaded {} words, {} constants, heap {} cells",
        program.bytecode.len(),
        program.constant_pool.len(),
        config.gc.heap_size
    );

    if opts.disassemble {
        print!("{}", disassemble(&program));
    }

    let mut vm = EmberVM::with_config(program, &config);
    vm.gc_mut().set_report_sink(|report| {
        log::info!(
            "cycle {}: {} live, {} copied, {} rescanned",
            report.cycle,
            report.live_cells,
            report.cells_copied,
            report.rescanned
        );
    });

    let result = vm.run();

    for line in vm.output().drain() {
        println!("{}", line);
    }
    println!("{}", result);

    if opts.gc_report {
        println!("{}", serde_json::to_string_pretty(vm.gc().reports())?);
        println!("{}", serde_json::to_string_pretty(vm.gc().stats())?);
    }
    Ok(result)
}

fn main() -> ExitCode {
    let opts = Opts::parse();

    let default_filter = if opts.debug { "debug" } else { "warn" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter))
        .init();

    match run(&opts) {
        Ok(result) if result.is_success() => ExitCode::SUCCESS,
        Ok(_) => ExitCode::from(1),
        Err(err) => {
            eprintln!("ember_run: {:#}", err);
            ExitCode::from(1)
        }
    }
}
