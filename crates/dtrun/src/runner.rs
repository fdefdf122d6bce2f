use arm::Arm;
use dyntrans::{Arch, Cpu, Machine, Ram, machine::MachineError};
use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    thread::JoinHandle,
    time::{Duration, Instant},
};

pub type ArmMachine = Machine<Arm, Ram>;

/// How a run ended.
pub struct Outcome {
    pub machine: ArmMachine,
    pub executed: u64,
    pub result: Result<(), MachineError>,
}

/// Runs a machine on its own thread.
pub struct Runner {
    stop: Arc<AtomicBool>,
    handle: JoinHandle<Outcome>,
}

/// Logs CPUs that just stopped at a breakpoint and lets them continue in the
/// mode they were started in.
fn report_breakpoints(cpus: &mut [Cpu<Arm>], step: bool) {
    for cpu in cpus {
        if cpu.debug.at_breakpoint() {
            tracing::info!(
                cpu = cpu.id(),
                pc = format_args!("{:#010x}", cpu.pc),
                "breakpoint\n{}",
                Arm::dump_registers(&cpu.regs)
            );

            cpu.debug.single_step = step;
        }
    }
}

impl Runner {
    pub fn spawn(mut machine: ArmMachine, limit: u64, step: bool) -> std::io::Result<Self> {
        let stop = Arc::new(AtomicBool::new(false));
        let worker_stop = stop.clone();

        let handle = std::thread::Builder::new()
            .name("dyntrans".into())
            .spawn(move || {
                let result = machine.run(limit, |cpus| {
                    report_breakpoints(cpus, step);
                    !worker_stop.load(Ordering::Relaxed)
                });

                let executed = machine
                    .cpus
                    .iter()
                    .map(|cpu| cpu.stats.instructions)
                    .sum();

                Outcome {
                    machine,
                    executed,
                    result: result.map(|_| ()),
                }
            })?;

        Ok(Self { stop, handle })
    }

    /// Waits for the machine to halt, stopping it once `timeout` elapsed.
    pub fn wait(self, timeout: Option<Duration>) -> Outcome {
        let start = Instant::now();
        while !self.handle.is_finished() {
            if timeout.is_some_and(|t| start.elapsed() >= t) {
                tracing::warn!("timeout reached, stopping");
                self.stop.store(true, Ordering::Relaxed);
                break;
            }

            std::thread::sleep(Duration::from_millis(10));
        }

        match self.handle.join() {
            Ok(outcome) => outcome,
            Err(panic) => std::panic::resume_unwind(panic),
        }
    }
}
