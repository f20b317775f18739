//! Periodic execution of thread function lists.
//!
//! Function lists are frozen while threads run, so each worker takes a plan
//! of its list once at start and never touches the lock again. A cycle runs
//! the planned functions back to back and records per-function and
//! per-thread timing in the arena.

use hal::consts::MAX_FUNCTS_PER_THREAD;
use hal_shared_memory::platform::{monotonic_now_ns, pin_current_thread, set_current_thread_fifo};
use hal_shared_memory::{ShmOff, ShmSegment};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::core::Hal;
use crate::error::{HalError, HalResult};
use crate::funct::{FunctArgs, FunctCallback};
use crate::guard::HalGuard;
use crate::master::LockLevel;
use crate::object::{FunctRecord, NAME_BUF, ThreadHandle, ThreadRecord};

type Name = heapless::String<NAME_BUF>;

fn name(s: &str) -> HalResult<Name> {
    let mut out = Name::new();
    out.push_str(s).map_err(|_| HalError::Exhausted {
        resource: "name buffer",
        limit: NAME_BUF,
    })?;
    Ok(out)
}

struct PlannedFunct {
    off: ShmOff,
    name: Name,
    callback: FunctCallback,
}

/// One thread's function list, resolved to callables.
struct ThreadPlan {
    thread: ThreadHandle,
    name: Name,
    period: i64,
    priority: i32,
    cpu: Option<usize>,
    functs: heapless::Vec<PlannedFunct, MAX_FUNCTS_PER_THREAD>,
}

impl ThreadPlan {
    /// Run every function once. Returns the cycle runtime in ns.
    fn run_cycle(&self, seg: &ShmSegment) -> i64 {
        let thread_start = monotonic_now_ns();
        let mut now = thread_start;
        for f in self.functs.iter() {
            let args = FunctArgs {
                thread_start_time: thread_start,
                start_time: now,
                thread: Some(self.thread),
                thread_name: &self.name,
                funct: &f.name,
                argv: &[],
            };
            f.callback.invoke(self.period, &args);
            let end = monotonic_now_ns();
            // SAFETY: functions cannot be deleted while scheduled and running.
            unsafe { seg.get::<FunctRecord>(f.off) }.record_runtime(end - now);
            now = end;
        }
        now - thread_start
    }

    fn record(&self, seg: &ShmSegment, runtime: i64, overran: bool) {
        // SAFETY: threads cannot be deleted while running.
        unsafe { seg.get::<ThreadRecord>(self.thread.off) }.record_cycle(runtime, overran);
    }

    /// Worker loop: run a cycle, then sleep to the next period boundary.
    fn run(self, seg: Arc<ShmSegment>, stop: Arc<AtomicBool>) {
        if let Err(e) = set_current_thread_fifo(self.priority) {
            debug!("Thread {} runs without SCHED_FIFO: {}", self.name, e);
        }
        if let Some(cpu) = self.cpu {
            if let Err(e) = pin_current_thread(cpu) {
                debug!("Thread {} not pinned to cpu {}: {}", self.name, cpu, e);
            }
        }

        let mut next = monotonic_now_ns();
        let mut warned = false;
        while !stop.load(Ordering::Acquire) {
            let runtime = self.run_cycle(&seg);
            next += self.period;
            let now = monotonic_now_ns();
            let overran = now > next;
            self.record(&seg, runtime, overran);
            if overran {
                if !warned {
                    warn!(
                        "Thread {} overran its period ({} ns > {} ns)",
                        self.name, runtime, self.period
                    );
                    warned = true;
                }
                next = now;
            } else {
                std::thread::sleep(Duration::from_nanos((next - now) as u64));
            }
        }
    }
}

/// Worker threads started by this process.
pub(crate) struct Runner {
    stop: Arc<AtomicBool>,
    workers: Vec<JoinHandle<()>>,
}

impl HalGuard<'_> {
    /// Resolve a thread's list to this process's callables.
    ///
    /// Functions exported by another process cannot run here and are left
    /// out with a warning.
    fn plan(&self, thread: ThreadHandle) -> HalResult<ThreadPlan> {
        let t = self.resolve(thread)?;
        let mut functs = heapless::Vec::new();
        let local = self.hal.local.functs.read();
        for f in self.thread_functs(thread)? {
            let rec = self.funct_record(f.off);
            let Some(callback) = local.get(&f.id()) else {
                warn!(
                    "Function {} is not exported by this process; skipped in {}",
                    rec.hdr.name(),
                    t.hdr.name()
                );
                continue;
            };
            let planned = PlannedFunct {
                off: f.off,
                name: name(rec.hdr.name())?,
                callback: callback.clone(),
            };
            if functs.push(planned).is_err() {
                return Err(HalError::Exhausted {
                    resource: "functions per thread",
                    limit: MAX_FUNCTS_PER_THREAD,
                });
            }
        }
        Ok(ThreadPlan {
            thread,
            name: name(t.hdr.name())?,
            period: t.period,
            priority: t.priority,
            cpu: usize::try_from(t.cpu_id).ok(),
            functs,
        })
    }
}

impl Hal {
    /// Run one period of a thread synchronously on the calling thread.
    ///
    /// The lock is held only while the function list is read, never while
    /// functions run.
    pub fn run_thread_cycle(&self, thread: ThreadHandle) -> HalResult<()> {
        let plan = {
            let g = self.lock();
            if g.master().threads_running() {
                return Err(HalError::SchedulerRunning);
            }
            g.plan(thread)?
        };
        let runtime = plan.run_cycle(&self.seg);
        plan.record(&self.seg, runtime, runtime > plan.period);
        Ok(())
    }

    /// Start one worker per HAL thread.
    ///
    /// Workers get their thread's name, a best-effort `SCHED_FIFO` priority
    /// and CPU affinity.
    pub fn start_threads(&self) -> HalResult<()> {
        let mut runner = self.runner.lock();
        let plans = {
            let g = self.lock();
            g.master().check_unlocked(LockLevel::RUN, "run")?;
            if runner.is_some() || g.master().threads_running() {
                return Err(HalError::SchedulerRunning);
            }
            let plans = g
                .threads()
                .into_iter()
                .map(|t| g.plan(t))
                .collect::<HalResult<Vec<_>>>()?;
            g.master().threads_running.store(1, Ordering::Release);
            plans
        };

        let stop = Arc::new(AtomicBool::new(false));
        let mut workers = Vec::with_capacity(plans.len());
        for plan in plans {
            let seg = self.seg.clone();
            let stop_flag = stop.clone();
            let spawned = std::thread::Builder::new()
                .name(plan.name.to_string())
                .spawn(move || plan.run(seg, stop_flag));
            match spawned {
                Ok(handle) => workers.push(handle),
                Err(e) => {
                    stop.store(true, Ordering::Release);
                    join_all(workers);
                    self.master_ref().threads_running.store(0, Ordering::Release);
                    return Err(HalError::Shm(e.into()));
                }
            }
        }
        info!("Started {} HAL threads", workers.len());
        *runner = Some(Runner { stop, workers });
        Ok(())
    }

    /// Stop and join the workers started by this process.
    pub fn stop_threads(&self) -> HalResult<()> {
        self.lock().master().check_unlocked(LockLevel::RUN, "run")?;
        self.halt_runner();
        Ok(())
    }

    pub(crate) fn halt_runner(&self) {
        let Some(runner) = self.runner.lock().take() else {
            return;
        };
        runner.stop.store(true, Ordering::Release);
        let count = runner.workers.len();
        join_all(runner.workers);
        self.master_ref().threads_running.store(0, Ordering::Release);
        info!("Stopped {} HAL threads", count);
    }

    /// Whether any process has threads running on this arena.
    pub fn threads_running(&self) -> bool {
        self.master_ref().threads_running()
    }

    /// Call an extended or userland function out of band.
    ///
    /// The function must have been exported by this process. Legacy
    /// functions only run from threads.
    pub fn call_funct(&self, funct_name: &str, argv: &[&str]) -> HalResult<i32> {
        let (funct, callback) = {
            let g = self.lock();
            let funct = g
                .find::<FunctRecord>(funct_name)
                .ok_or_else(|| HalError::NotFound(funct_name.to_string()))?;
            let callback = self
                .local
                .functs
                .read()
                .get(&funct.id())
                .cloned()
                .ok_or_else(|| HalError::NotFound(format!("{funct_name} in this process")))?;
            (funct, callback)
        };

        let start = monotonic_now_ns();
        let status = match &callback {
            FunctCallback::Legacy(_) => return Err(HalError::NotCallable(funct_name.to_string())),
            FunctCallback::Userland(f) => f(argv),
            FunctCallback::Extended(f) => f(&FunctArgs {
                thread_start_time: start,
                start_time: start,
                thread: None,
                thread_name: "",
                funct: funct_name,
                argv,
            }),
        };
        let g = self.lock();
        if let Ok(rec) = g.resolve(funct) {
            rec.record_runtime(monotonic_now_ns() - start);
        }
        debug!(
            "Called {} ({:?}) -> {}",
            funct_name,
            callback.signature(),
            status
        );
        Ok(status)
    }
}

fn join_all(workers: Vec<JoinHandle<()>>) {
    for worker in workers {
        let name = worker.thread().name().unwrap_or("?").to_string();
        if worker.join().is_err() {
            warn!("HAL thread {} panicked", name);
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::funct::FunctCallback;
    use crate::test_support::new_hal;
    use crate::{HalError, LockLevel};
    use hal::types::CompType;
    use parking_lot::Mutex;
    use std::sync::Arc;

    #[test]
    fn cycle_runs_in_list_order_with_accumulated_start_times() {
        let (_dir, hal) = new_hal();
        let log = Arc::new(Mutex::new(Vec::new()));
        let t = {
            let mut g = hal.lock();
            let c = g.register_component("seq", CompType::Realtime).unwrap();
            let t = g.create_thread("servo", 1_000_000, 1, None).unwrap();
            for n in ["seq.read", "seq.calc", "seq.write"] {
                let log = log.clone();
                let f = g
                    .export_funct(
                        c,
                        n,
                        FunctCallback::extended(move |a| {
                            log.lock().push((a.funct.to_string(), a.thread_start_time, a.start_time));
                            0
                        }),
                        false,
                        false,
                    )
                    .unwrap();
                g.add_funct_to_thread(f, t, -1).unwrap();
            }
            t
        };

        hal.run_thread_cycle(t).unwrap();
        let log = log.lock();
        let names: Vec<&str> = log.iter().map(|(n, _, _)| n.as_str()).collect();
        assert_eq!(names, ["seq.read", "seq.calc", "seq.write"]);
        let cycle_start = log[0].1;
        assert_eq!(log[0].2, cycle_start);
        assert!(log.iter().all(|(_, ts, _)| *ts == cycle_start));
        assert!(log.windows(2).all(|w| w[0].2 <= w[1].2));
        assert_eq!(hal.lock().thread_info(t).unwrap().cycles, 1);
    }

    #[test]
    fn legacy_functions_receive_the_period() {
        let (_dir, hal) = new_hal();
        let seen = Arc::new(Mutex::new(0));
        let t = {
            let mut g = hal.lock();
            let c = g.register_component("leg", CompType::Realtime).unwrap();
            let t = g.create_thread("base", 250_000, 1, None).unwrap();
            let s = seen.clone();
            let f = g
                .export_funct(c, "leg.tick", FunctCallback::legacy(move |p| *s.lock() = p), false, true)
                .unwrap();
            g.add_funct_to_thread(f, t, 1).unwrap();
            t
        };
        hal.run_thread_cycle(t).unwrap();
        assert_eq!(*seen.lock(), 250_000);
    }

    #[test]
    fn out_of_band_calls() {
        let (_dir, hal) = new_hal();
        {
            let mut g = hal.lock();
            let c = g.register_component("cmd", CompType::User).unwrap();
            g.export_funct(c, "cmd.count", FunctCallback::userland(|argv| argv.len() as i32), false, true)
                .unwrap();
            g.export_funct(
                c,
                "cmd.ext",
                FunctCallback::extended(|a| if a.thread.is_none() { a.argv.len() as i32 } else { -1 }),
                false,
                true,
            )
            .unwrap();
            g.export_funct(c, "cmd.legacy", FunctCallback::legacy(|_| {}), false, true)
                .unwrap();
        }
        assert_eq!(hal.call_funct("cmd.count", &["a", "b", "c"]).unwrap(), 3);
        assert_eq!(hal.call_funct("cmd.ext", &["x"]).unwrap(), 1);
        assert!(matches!(hal.call_funct("cmd.legacy", &[]), Err(HalError::NotCallable(_))));
        assert!(matches!(hal.call_funct("cmd.none", &[]), Err(HalError::NotFound(_))));
    }

    #[test]
    fn running_threads_freeze_configuration() {
        let (_dir, hal) = new_hal();
        let counter = Arc::new(Mutex::new(0u64));
        let (f, t) = {
            let mut g = hal.lock();
            let c = g.register_component("run", CompType::Realtime).unwrap();
            let t = g.create_thread("fast", 1_000_000, 1, None).unwrap();
            let n = counter.clone();
            let f = g
                .export_funct(c, "run.inc", FunctCallback::legacy(move |_| *n.lock() += 1), false, false)
                .unwrap();
            g.add_funct_to_thread(f, t, 1).unwrap();
            (f, t)
        };

        hal.start_threads().unwrap();
        assert!(hal.threads_running());
        assert!(matches!(hal.start_threads(), Err(HalError::SchedulerRunning)));
        assert!(matches!(
            hal.lock().remove_funct_from_thread(f, t),
            Err(HalError::SchedulerRunning)
        ));
        assert!(matches!(hal.lock().delete_funct(f), Err(HalError::SchedulerRunning)));
        assert!(matches!(hal.run_thread_cycle(t), Err(HalError::SchedulerRunning)));

        std::thread::sleep(std::time::Duration::from_millis(30));
        hal.stop_threads().unwrap();
        assert!(!hal.threads_running());
        assert!(*counter.lock() > 0);
        assert!(hal.lock().thread_info(t).unwrap().cycles > 0);
    }

    #[test]
    fn run_lock_blocks_start() {
        let (_dir, hal) = new_hal();
        hal.lock().set_lock_level(LockLevel::RUN);
        assert!(matches!(hal.start_threads(), Err(HalError::Locked("run"))));
    }
}
