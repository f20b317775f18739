//! Linux-specific shared memory and scheduling operations

use crate::error::{ShmError, ShmResult};
use memmap2::{MmapMut, MmapOptions};
use nix::unistd::getpid;
use std::fs::OpenOptions;
use std::io::ErrorKind;
use std::os::unix::fs::OpenOptionsExt;
use std::path::Path;

/// Linux-specific memory mapping configuration
#[derive(Debug, Clone, Copy)]
pub struct LinuxMemoryConfig {
    /// Prefault pages (MAP_POPULATE) so RT code never takes a page fault
    pub populate: bool,
}

impl Default for LinuxMemoryConfig {
    fn default() -> Self {
        Self { populate: true }
    }
}

/// Create a new segment file of `size` bytes and map it.
///
/// Fails with `AlreadyExists` if the file is present; creation is exclusive so
/// two processes racing to create the same segment cannot both succeed.
pub fn create_segment_mmap(
    path: &Path,
    size: usize,
    config: &LinuxMemoryConfig,
) -> ShmResult<MmapMut> {
    let file = OpenOptions::new()
        .create_new(true)
        .read(true)
        .write(true)
        .mode(0o600) // Owner read/write only
        .open(path)
        .map_err(|e| map_open_error(e, path))?;

    // Fresh file pages read as zero
    file.set_len(size as u64)?;

    let mut mmap_options = MmapOptions::new();
    if config.populate {
        mmap_options.populate();
    }

    let mmap = unsafe { mmap_options.map_mut(&file)? };
    Ok(mmap)
}

/// Attach to an existing segment file.
pub fn attach_segment_mmap(path: &Path) -> ShmResult<MmapMut> {
    let file = OpenOptions::new()
        .read(true)
        .write(true)
        .open(path)
        .map_err(|e| map_open_error(e, path))?;

    let mmap = unsafe { MmapOptions::new().map_mut(&file)? };
    Ok(mmap)
}

fn map_open_error(e: std::io::Error, path: &Path) -> ShmError {
    let name = path.display().to_string();
    match e.kind() {
        ErrorKind::NotFound => ShmError::NotFound { name },
        ErrorKind::AlreadyExists => ShmError::AlreadyExists { name },
        ErrorKind::PermissionDenied => ShmError::PermissionDenied { name },
        _ => ShmError::Io { source: e },
    }
}

/// Check if process is alive using kill(pid, 0)
pub fn is_process_alive(pid: u32) -> bool {
    use nix::sys::signal::kill;
    use nix::unistd::Pid;

    // Use a null signal (None) to test for process existence without sending a signal
    match kill(Pid::from_raw(pid as i32), None) {
        Ok(_) => true,
        Err(nix::Error::ESRCH) => false, // No such process
        Err(nix::Error::EPERM) => true,  // Process exists but no permission to signal
        Err(_) => false,
    }
}

/// Get current process ID
pub fn get_current_pid() -> u32 {
    getpid().as_raw() as u32
}

/// Monotonic clock in nanoseconds (CLOCK_MONOTONIC).
///
/// Comparable across processes on the same machine, which is what cycle start
/// timestamps handed to thread functions require.
pub fn monotonic_now_ns() -> i64 {
    use nix::time::{ClockId, clock_gettime};

    match clock_gettime(ClockId::CLOCK_MONOTONIC) {
        Ok(ts) => ts.tv_sec() as i64 * 1_000_000_000 + ts.tv_nsec() as i64,
        Err(_) => 0,
    }
}

/// Yield the CPU while spinning on a contended lock.
pub fn yield_now() {
    if nix::sched::sched_yield().is_err() {
        std::thread::yield_now();
    }
}

/// Pin the calling thread to a single CPU.
pub fn pin_current_thread(cpu: usize) -> ShmResult<()> {
    use nix::sched::{CpuSet, sched_setaffinity};
    use nix::unistd::Pid;

    let mut set = CpuSet::new();
    set.set(cpu)?;
    // Pid 0 addresses the calling thread
    sched_setaffinity(Pid::from_raw(0), &set)?;
    Ok(())
}

/// Switch the calling thread to SCHED_FIFO with the given priority.
///
/// Needs CAP_SYS_NICE or an rtprio rlimit; callers treat failure as "run
/// without RT scheduling".
pub fn set_current_thread_fifo(priority: i32) -> ShmResult<()> {
    let param = libc::sched_param {
        sched_priority: priority,
    };
    let rc = unsafe { libc::pthread_setschedparam(libc::pthread_self(), libc::SCHED_FIFO, &param) };
    if rc == 0 {
        Ok(())
    } else {
        Err(ShmError::Io {
            source: std::io::Error::from_raw_os_error(rc),
        })
    }
}

/// Detect if the calling thread runs under a real-time scheduling policy.
pub fn detect_rt_mode() -> bool {
    use libc::{SCHED_FIFO, SCHED_RR, sched_getscheduler};
    unsafe {
        let policy = sched_getscheduler(0);
        policy == SCHED_FIFO || policy == SCHED_RR
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn current_process_is_alive() {
        assert!(is_process_alive(get_current_pid()));
    }

    #[test]
    fn monotonic_clock_advances() {
        let a = monotonic_now_ns();
        std::thread::sleep(std::time::Duration::from_millis(1));
        let b = monotonic_now_ns();
        assert!(a > 0);
        assert!(b > a);
    }

    #[test]
    fn create_is_exclusive() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("seg");
        let config = LinuxMemoryConfig::default();
        let _first = create_segment_mmap(&path, 4096, &config).unwrap();
        let second = create_segment_mmap(&path, 4096, &config);
        assert!(matches!(second, Err(ShmError::AlreadyExists { .. })));
    }

    #[test]
    fn attach_missing_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let result = attach_segment_mmap(&dir.path().join("absent"));
        assert!(matches!(result, Err(ShmError::NotFound { .. })));
    }
}
