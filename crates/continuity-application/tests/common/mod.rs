#![allow(dead_code)]

use continuity_application::{Orchestrator, RuntimeOptions};
use continuity_core::lock::ProcessProbe;
use continuity_infrastructure::ContinuityPaths;
use std::collections::HashSet;
use std::path::Path;
use std::sync::{Arc, Mutex};

/// Process probe whose answers are set by the test.
#[derive(Default)]
pub struct ScriptedProbe {
    alive: Mutex<HashSet<u32>>,
}

impl ScriptedProbe {
    pub fn set_alive(&self, pid: u32, alive: bool) {
        let mut pids = self.alive.lock().unwrap();
        if alive {
            pids.insert(pid);
        } else {
            pids.remove(&pid);
        }
    }
}

impl ProcessProbe for ScriptedProbe {
    fn is_alive(&self, process_id: u32) -> bool {
        self.alive.lock().unwrap().contains(&process_id)
    }
}

/// Opens `root` as process `pid`, which the probe reports alive.
pub fn open_as(root: &Path, pid: u32, probe: &Arc<ScriptedProbe>) -> Orchestrator {
    probe.set_alive(pid, true);
    Orchestrator::open_with(
        ContinuityPaths::at(root),
        RuntimeOptions {
            process_id: pid,
            probe: probe.clone(),
        },
    )
    .unwrap()
}

/// Simulates the abrupt death of a process.
pub fn kill(orchestrator: Orchestrator, probe: &ScriptedProbe) {
    let pid = orchestrator.process_id();
    drop(orchestrator);
    probe.set_alive(pid, false);
}
