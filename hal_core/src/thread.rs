//! Periodic threads and their ordered function lists.
//!
//! Each thread owns a list of [`FunctEntry`] nodes, run front to back every
//! period. Entries are small fixed-size nodes recycled through a free list in
//! the master region.

use hal::consts::MAX_FUNCTS_PER_THREAD;
use hal::types::ObjectKind;
use hal_shared_memory::{ListIter, ShmOff, list_add_before, list_init, list_remove};
use serde::Serialize;
use std::mem::offset_of;
use std::sync::atomic::Ordering;
use tracing::{debug, info, warn};

use crate::error::{HalError, HalResult};
use crate::guard::HalGuard;
use crate::master::LockLevel;
use crate::object::{FunctEntry, FunctHandle, FunctRecord, Handle, ThreadHandle, ThreadRecord};

/// Snapshot of a thread.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ThreadInfo {
    /// Thread name
    pub name: String,
    /// Unique id
    pub id: i32,
    /// Period in ns
    pub period: i64,
    /// Requested scheduling priority
    pub priority: i32,
    /// CPU affinity
    pub cpu: Option<u32>,
    /// Any function in the list uses floating point
    pub uses_fp: bool,
    /// Last cycle runtime, ns
    pub runtime: i64,
    /// Longest cycle runtime, ns
    pub maxtime: i64,
    /// Cycles that ran past the period
    pub overruns: u64,
    /// Cycles run
    pub cycles: u64,
    /// Scheduled function names, in execution order
    pub functs: Vec<String>,
}

/// Offset of a thread's function-list sentinel.
pub(crate) fn funct_list_off(thread: ShmOff) -> ShmOff {
    thread.add(offset_of!(ThreadRecord, funct_list))
}

impl ThreadRecord {
    pub(crate) fn record_cycle(&self, runtime: i64, overran: bool) {
        self.runtime.store(runtime, Ordering::Relaxed);
        self.maxtime.fetch_max(runtime, Ordering::Relaxed);
        self.cycles.fetch_add(1, Ordering::Relaxed);
        if overran {
            self.overruns.fetch_add(1, Ordering::Relaxed);
        }
    }
}

impl<'a> HalGuard<'a> {
    /// Create a thread with an empty function list.
    ///
    /// The first thread fixes the base period unless the configuration set
    /// one. Later periods are rounded to a multiple of it, unless the arena
    /// was formatted with `exact_base_period`.
    pub fn create_thread(
        &mut self,
        name: &str,
        period_ns: i64,
        priority: i32,
        cpu: Option<u32>,
    ) -> HalResult<ThreadHandle> {
        self.master().check_unlocked(LockLevel::LOAD, "load")?;
        if self.master().threads_running() {
            return Err(HalError::SchedulerRunning);
        }
        let period = self.effective_period(period_ns)?;
        let cpu_id = match cpu {
            Some(cpu) => i32::try_from(cpu)
                .map_err(|_| HalError::InvalidArgument(format!("cpu {cpu} out of range")))?,
            None => -1,
        };

        let (h, rec) = self.create_object::<ThreadRecord>(name, 0)?;
        rec.period = period;
        rec.priority = priority;
        rec.cpu_id = cpu_id;
        // SAFETY: sentinel embedded in the record we just created.
        unsafe { list_init(self.seg(), funct_list_off(h.off)) };

        let m = self.master();
        if m.base_period == 0 {
            m.base_period = period;
        }
        info!(
            "Created thread {} (period {} ns, priority {}, cpu {:?})",
            name, period, priority, cpu
        );
        Ok(h)
    }

    fn effective_period(&self, period_ns: i64) -> HalResult<i64> {
        if period_ns <= 0 {
            return Err(HalError::InvalidArgument(format!("period {period_ns} ns")));
        }
        let m = self.master();
        let base = m.base_period;
        if base == 0 || m.exact_base_period != 0 {
            return Ok(period_ns);
        }
        if period_ns < base {
            return Err(HalError::InvalidArgument(format!(
                "period {period_ns} ns shorter than base period {base} ns"
            )));
        }
        period_ns
            .checked_add(base / 2)
            .map(|rounded| rounded / base * base)
            .ok_or_else(|| HalError::InvalidArgument(format!("period {period_ns} ns out of range")))
    }

    /// Delete a thread and release its function entries.
    pub fn delete_thread(&mut self, thread: ThreadHandle) -> HalResult<()> {
        if self.master().threads_running() {
            return Err(HalError::SchedulerRunning);
        }
        let name = self.resolve(thread)?.hdr.name().to_string();
        for entry in self.entries(thread) {
            self.release_entry(entry);
        }
        self.destroy_object(thread)?;
        info!("Deleted thread {}", name);
        Ok(())
    }

    /// Entry offsets of a thread's list, in order.
    fn entries(&self, thread: ThreadHandle) -> Vec<ShmOff> {
        // SAFETY: resolved thread, list stable under the lock.
        unsafe { ListIter::new(self.seg(), funct_list_off(thread.off)) }.collect()
    }

    /// Place a function in a thread's list.
    ///
    /// `position` counts from the front when positive (1 is first) and from
    /// the back when negative (-1 is last).
    pub fn add_funct_to_thread(
        &mut self,
        funct: FunctHandle,
        thread: ThreadHandle,
        position: i32,
    ) -> HalResult<()> {
        self.master().check_unlocked(LockLevel::CONFIG, "config")?;
        if self.master().threads_running() {
            return Err(HalError::SchedulerRunning);
        }
        let f = self.resolve(funct)?;
        let t = self.resolve(thread)?;
        if !f.signature().is_schedulable() {
            return Err(HalError::NotSchedulable(f.hdr.name().to_string()));
        }

        let entries = self.entries(thread);
        if entries.len() >= MAX_FUNCTS_PER_THREAD {
            return Err(HalError::Exhausted {
                resource: "functions per thread",
                limit: MAX_FUNCTS_PER_THREAD,
            });
        }
        let len = entries.len() as i64;
        let index = match position {
            0 => return Err(HalError::InvalidArgument("position 0".to_string())),
            p if p > 0 => i64::from(p) - 1,
            p => len + 1 + i64::from(p),
        };
        if !(0..=len).contains(&index) {
            return Err(HalError::InvalidArgument(format!(
                "position {position} with {len} functions in {}",
                t.hdr.name()
            )));
        }

        if f.reentrant == 0 && f.users > 0 {
            warn!(
                "Non-reentrant function {} added to {} while already scheduled",
                f.hdr.name(),
                t.hdr.name()
            );
        }

        let entry_off = self.alloc_entry()?;
        // SAFETY: freshly allocated entry.
        let entry = unsafe { self.at::<FunctEntry>(entry_off) };
        entry.funct = funct.off;
        entry.funct_gen = funct.generation;
        let before = entries
            .get(index as usize)
            .copied()
            .unwrap_or_else(|| funct_list_off(thread.off));
        // SAFETY: `before` is an element or the sentinel of this list.
        unsafe { list_add_before(self.seg(), before, entry_off) };

        f.users += 1;
        if f.uses_fp != 0 {
            t.uses_fp = 1;
        }
        debug!(
            "Added {} to thread {} at {}",
            f.hdr.name(),
            t.hdr.name(),
            index + 1
        );
        Ok(())
    }

    /// Remove the first entry of `funct` from a thread's list.
    pub fn remove_funct_from_thread(&mut self, funct: FunctHandle, thread: ThreadHandle) -> HalResult<()> {
        self.master().check_unlocked(LockLevel::CONFIG, "config")?;
        if self.master().threads_running() {
            return Err(HalError::SchedulerRunning);
        }
        let f = self.resolve(funct)?;
        let t = self.resolve(thread)?;
        if !self.remove_entry_of(thread, funct)? {
            return Err(HalError::NotFound(format!(
                "{} in thread {}",
                f.hdr.name(),
                t.hdr.name()
            )));
        }
        debug!("Removed {} from thread {}", f.hdr.name(), t.hdr.name());
        Ok(())
    }

    /// Remove the first entry pointing at `funct`. Returns whether one was found.
    pub(crate) fn remove_entry_of(&mut self, thread: ThreadHandle, funct: FunctHandle) -> HalResult<bool> {
        self.resolve(thread)?;
        let found = self.entries(thread).into_iter().find(|off| {
            // SAFETY: element of a thread list.
            let e = unsafe { self.at::<FunctEntry>(*off) };
            e.funct == funct.off && e.funct_gen == funct.generation
        });
        match found {
            Some(off) => {
                self.release_entry(off);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn alloc_entry(&mut self) -> HalResult<ShmOff> {
        let seg = self.seg();
        let m = self.master();
        if m.free_entries.is_null() {
            return Ok(m.heap.alloc(seg, std::mem::size_of::<FunctEntry>())?);
        }
        let off = m.free_entries;
        // SAFETY: free entries are chained through `links.next`.
        let entry = unsafe { self.at::<FunctEntry>(off) };
        m.free_entries = entry.links.next;
        entry.funct = ShmOff::NULL;
        entry.funct_gen = 0;
        Ok(off)
    }

    /// Unlink an entry, drop the function's use count and recycle the node.
    fn release_entry(&mut self, off: ShmOff) {
        let seg = self.seg();
        // SAFETY: `off` is an element of a thread list.
        unsafe { list_remove(seg, off) };
        let entry = unsafe { self.at::<FunctEntry>(off) };
        let funct: FunctHandle = Handle::new(entry.funct, entry.funct_gen, self.header(entry.funct).id);
        if let Ok(f) = self.resolve(funct) {
            f.users = f.users.saturating_sub(1);
        }
        let m = self.master();
        entry.links.next = m.free_entries;
        m.free_entries = off;
    }

    /// Functions scheduled in a thread, in execution order.
    pub fn thread_functs(&self, thread: ThreadHandle) -> HalResult<Vec<FunctHandle>> {
        self.resolve(thread)?;
        Ok(self
            .entries(thread)
            .into_iter()
            .map(|off| {
                // SAFETY: element of a thread list.
                let e = unsafe { self.at::<FunctEntry>(off) };
                Handle::new(e.funct, e.funct_gen, self.header(e.funct).id)
            })
            .collect())
    }

    /// Snapshot of a thread.
    pub fn thread_info(&self, thread: ThreadHandle) -> HalResult<ThreadInfo> {
        let t = self.resolve(thread)?;
        let functs = self
            .thread_functs(thread)?
            .into_iter()
            .map(|f| self.name_at(f.off))
            .collect();
        Ok(ThreadInfo {
            name: t.hdr.name().to_string(),
            id: t.hdr.id,
            period: t.period,
            priority: t.priority,
            cpu: u32::try_from(t.cpu_id).ok(),
            uses_fp: t.uses_fp != 0,
            runtime: t.runtime.load(Ordering::Relaxed),
            maxtime: t.maxtime.load(Ordering::Relaxed),
            overruns: t.overruns.load(Ordering::Relaxed),
            cycles: t.cycles.load(Ordering::Relaxed),
            functs,
        })
    }

    /// All threads, in creation order.
    pub fn threads(&self) -> Vec<ThreadHandle> {
        self.objects(Some(ObjectKind::Thread))
            .into_iter()
            .filter_map(|o| o.downcast::<ThreadRecord>())
            .collect()
    }

    pub(crate) fn funct_record(&self, off: ShmOff) -> &'a FunctRecord {
        // SAFETY: entries only point at function records; deleting a
        // function removes its entries first.
        unsafe { self.at::<FunctRecord>(off) }
    }
}
