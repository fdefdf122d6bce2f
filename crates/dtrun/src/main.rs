mod cli;
mod config;
mod runner;

use crate::runner::Runner;
use arm::Arm;
use clap::Parser;
use dyntrans::{Arch, Config, Machine, Ram};
use eyre_pretty::{Context, Result, bail};
use std::{io::Write, path::Path, time::Duration};

fn setup_tracing(log_file: Option<&Path>) -> Result<tracing_appender::non_blocking::WorkerGuard> {
    use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

    let (writer, guard) = match log_file {
        Some(path) => {
            let file = std::fs::File::options()
                .truncate(true)
                .create(true)
                .write(true)
                .open(path)
                .with_context(|| format!("opening log file {}", path.display()))?;

            tracing_appender::non_blocking(file)
        }
        None => tracing_appender::non_blocking(std::io::stderr()),
    };

    let layer = fmt::layer()
        .with_writer(writer)
        .with_ansi(log_file.is_none());
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or(EnvFilter::new("dtrun=info,dyntrans=info,arm=info"));

    tracing_subscriber::registry()
        .with(layer)
        .with(env_filter)
        .init();

    Ok(guard)
}

fn build(args: &cli::Args) -> Result<runner::ArmMachine> {
    let config = match &args.config {
        Some(path) => config::load(path)?,
        None => Config::default(),
    };
    let config = config::merge(config, &args.engine);
    tracing::debug!(?config, "engine configuration");

    let image = std::fs::read(&args.image)
        .with_context(|| format!("reading image {}", args.image.display()))?;

    let ram_size = usize::try_from(args.ram_size).context("ram size does not fit in memory")?;
    if args.console < args.ram_size {
        bail!("console at {:#x} lies inside of RAM", args.console);
    }

    let mut ram = Ram::new(0, ram_size, Arm::GEOMETRY.page_shift).with_console(args.console);
    if !ram.load(args.load_addr, &image) {
        bail!(
            "image of {} bytes does not fit in RAM at {:#x}",
            image.len(),
            args.load_addr
        );
    }

    tracing::info!(
        bytes = image.len(),
        load_addr = format_args!("{:#x}", args.load_addr),
        "loaded image"
    );

    let mut machine = Machine::<Arm, _>::new(ram, args.cpus.max(1), &config);
    let entry = args.entry.unwrap_or(args.load_addr);
    for cpu in &mut machine.cpus {
        cpu.pc = entry;
        cpu.debug.trace = args.debug.trace;
        cpu.debug.single_step = args.debug.step;
        for &addr in &args.debug.breakpoints {
            cpu.set_breakpoint(addr);
        }
    }

    Ok(machine)
}

fn main() -> Result<()> {
    eyre_pretty::install()?;

    let args = cli::Args::parse();
    let _tracing_guard = setup_tracing(args.log_file.as_deref())?;

    let machine = build(&args)?;
    let limit = args.limit.unwrap_or(u64::MAX);
    let runner = Runner::spawn(machine, limit, args.debug.step).context("spawning worker")?;
    let outcome = runner.wait(args.timeout.map(Duration::from_secs));

    let mut stdout = std::io::stdout().lock();
    stdout.write_all(outcome.machine.system.console_output())?;
    stdout.flush()?;

    for cpu in &outcome.machine.cpus {
        let cache = cpu.cache();
        let tlb = cpu.tlb();
        eprintln!(
            "cpu {} at {:#010x}: {} instructions in {} batches, {} decoded, {} combined, {} reverted",
            cpu.id(),
            cpu.pc,
            cpu.stats.instructions,
            cpu.stats.batches,
            cpu.stats.decoded,
            cpu.stats.combined,
            cpu.stats.reverted,
        );
        eprintln!(
            "  cache: {} pages, {} allocated, {} resets, {} invalidated; tlb: {} hits, {} misses, {} evictions",
            cache.len(),
            cache.stats.allocated,
            cache.stats.resets,
            cache.stats.invalidated,
            tlb.stats.hits,
            tlb.stats.misses,
            tlb.stats.evictions,
        );
        eprintln!("{}", Arm::dump_registers(&cpu.regs));
    }

    eprintln!("{} instructions executed", outcome.executed);
    outcome.result?;

    Ok(())
}
