use parking_lot::Mutex;
use sysinfo::{Pid, ProcessesToUpdate, System};

/// Stable identifier for this process instance: the OS hostname, or
/// `default-<uuid>` when the OS will not tell us.
pub fn resolve_hostname() -> String {
    System::host_name()
        .filter(|h| !h.is_empty())
        .unwrap_or_else(|| format!("default-{}", uuid::Uuid::new_v4()))
}

/// Samples this process's resident memory.
pub struct MemoryProbe {
    pid: Pid,
    sys: Mutex<System>,
}

impl MemoryProbe {
    pub fn new() -> Self {
        Self {
            pid: Pid::from_u32(std::process::id()),
            sys: Mutex::new(System::new()),
        }
    }

    /// Resident set size in bytes, or 0 if the OS refuses to report it.
    pub fn resident_bytes(&self) -> u64 {
        let mut sys = self.sys.lock();
        sys.refresh_processes(ProcessesToUpdate::Some(&[self.pid]), true);
        sys.process(self.pid).map(|p| p.memory()).unwrap_or(0)
    }

    /// Keep the probe busy; any sample taken meanwhile blocks.
    #[cfg(test)]
    pub(crate) fn hold(&self) -> parking_lot::MutexGuard<'_, System> {
        self.sys.lock()
    }
}

impl Default for MemoryProbe {
    fn default() -> Self {
        Self::new()
    }
}
