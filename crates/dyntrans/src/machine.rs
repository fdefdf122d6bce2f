//! A group of CPUs sharing one system.

use crate::{Arch, Config, Cpu, ExecError, System};
use easyerr::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MachineError {
    #[error("cpu {cpu} stopped: {error}")]
    Cpu { cpu: usize, error: ExecError },
}

/// Several CPUs of the same architecture scheduled round-robin, one batch at
/// a time, over a shared [`System`].
pub struct Machine<A: Arch, S> {
    pub cpus: Vec<Cpu<A>>,
    pub system: S,
}

impl<A: Arch, S: System> Machine<A, S> {
    pub fn new(system: S, cpus: usize, config: &Config) -> Self {
        let shared = cpus > 1;
        let cpus = (0..cpus)
            .map(|id| {
                let mut cpu = Cpu::new(id, config.clone());
                cpu.sharing.enabled = shared;
                cpu
            })
            .collect();

        Self { cpus, system }
    }

    /// Whether every CPU is halted.
    pub fn is_halted(&self) -> bool {
        self.cpus.iter().all(|cpu| !cpu.is_running())
    }

    /// Runs one batch on every running CPU. Returns the number of
    /// instructions executed.
    ///
    /// A faulting CPU is halted and its fault reported once every CPU had
    /// its turn.
    pub fn run_round(&mut self) -> Result<u64, MachineError> {
        let mut executed = 0;
        let mut fault = None;

        for index in 0..self.cpus.len() {
            let result = self.cpus[index].run(&mut self.system);
            self.share_code(index);

            match result {
                Ok(count) => executed += count,
                Err(error) => {
                    tracing::warn!(cpu = index, "{error}");
                    fault.get_or_insert(MachineError::Cpu { cpu: index, error });
                }
            }
        }

        match fault {
            Some(error) => Err(error),
            None => Ok(executed),
        }
    }

    /// Tells every other CPU about the code CPU `index` translated and wrote
    /// to during its last batch: newly translated pages lose host write
    /// access everywhere, and written ones are invalidated.
    fn share_code(&mut self, index: usize) {
        let sharing = &mut self.cpus[index].sharing;
        if sharing.translated.is_empty() && sharing.written.is_empty() {
            return;
        }

        let mut translated = std::mem::take(&mut sharing.translated);
        let mut written = std::mem::take(&mut sharing.written);
        let page_shift = A::GEOMETRY.page_shift;

        for cpu in self.cpus.iter_mut().filter(|cpu| cpu.id() != index) {
            for &ppn in &translated {
                if cpu.sharing.foreign.insert(ppn) {
                    cpu.tlb.protect_code(ppn);
                }
            }

            for &ppn in &written {
                tracing::debug!(
                    cpu = cpu.id(),
                    by = index,
                    paddr = ppn << page_shift,
                    "code written by another cpu"
                );
                cpu.invalidate_paddr(ppn << page_shift);
            }
        }

        translated.clear();
        written.clear();

        let sharing = &mut self.cpus[index].sharing;
        sharing.translated = translated;
        sharing.written = written;
    }

    /// Runs rounds until every CPU is halted, `limit` instructions were
    /// executed or `keep_going` returns false. `keep_going` sees the CPUs
    /// between rounds. Returns the number of instructions executed.
    pub fn run(
        &mut self,
        limit: u64,
        mut keep_going: impl FnMut(&mut [Cpu<A>]) -> bool,
    ) -> Result<u64, MachineError> {
        let _span = tracing::debug_span!("machine", cpus = self.cpus.len()).entered();

        let mut executed = 0;
        while executed < limit && !self.is_halted() && keep_going(&mut self.cpus) {
            executed += self.run_round()?;
        }

        Ok(executed)
    }

    /// Invalidates a physical page on every CPU. Used when memory is written
    /// behind the CPUs' backs.
    pub fn invalidate_paddr(&mut self, paddr: u64) {
        for cpu in &mut self.cpus {
            cpu.invalidate_paddr(paddr);
        }
    }

    /// Invalidates a virtual page on every CPU. Used when a mapping changes.
    pub fn invalidate_vaddr(&mut self, vaddr: u64) {
        for cpu in &mut self.cpus {
            cpu.invalidate_vaddr(vaddr);
        }
    }
}
