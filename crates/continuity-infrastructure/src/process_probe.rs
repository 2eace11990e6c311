//! OS process liveness checks.

use continuity_core::lock::ProcessProbe;
use sysinfo::{Pid, ProcessesToUpdate, System};

/// Probes the process table through `sysinfo`.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemProcessProbe;

impl ProcessProbe for SystemProcessProbe {
    fn is_alive(&self, process_id: u32) -> bool {
        let pid = Pid::from_u32(process_id);
        let mut sys = System::new();
        sys.refresh_processes(ProcessesToUpdate::Some(&[pid]), true);
        sys.process(pid).is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_current_process_is_alive() {
        assert!(SystemProcessProbe.is_alive(std::process::id()));
    }

    #[test]
    fn test_unused_pid_is_dead() {
        // Above the default Linux pid_max and any realistic Windows pid.
        assert!(!SystemProcessProbe.is_alive(u32::MAX - 7));
    }
}
