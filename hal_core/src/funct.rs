//! Exported functions and their call signatures.
//!
//! A function's record lives in the arena so every process can see and
//! schedule it, but the callable itself can only live in the exporting
//! process. It is kept in that process's local table under the function id.

use hal::types::{FunctSignature, ObjectKind};
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::Ordering;
use tracing::{debug, info};

use crate::error::{HalError, HalResult};
use crate::guard::HalGuard;
use crate::master::LockLevel;
use crate::object::{FunctHandle, FunctRecord, ObjectRef, ThreadHandle, ThreadRecord};

/// Invocation context passed to extended functions.
#[derive(Debug, Clone, Copy)]
pub struct FunctArgs<'a> {
    /// Start of the current thread cycle, monotonic ns
    pub thread_start_time: i64,
    /// Start of this invocation: cycle start plus the runtime of the
    /// functions before it
    pub start_time: i64,
    /// Owning thread, `None` for an out-of-band call
    pub thread: Option<ThreadHandle>,
    /// Thread name, empty for an out-of-band call
    pub thread_name: &'a str,
    /// Function name
    pub funct: &'a str,
    /// Arguments of an out-of-band call, empty when scheduled
    pub argv: &'a [&'a str],
}

/// Callable behind an exported function, one variant per call signature.
///
/// State the function works on is captured by the closure.
#[derive(Clone)]
pub enum FunctCallback {
    /// Called with the thread period in ns
    Legacy(Arc<dyn Fn(i64) + Send + Sync>),
    /// Called with a full invocation context; returns a status code
    Extended(Arc<dyn Fn(&FunctArgs<'_>) -> i32 + Send + Sync>),
    /// Called out of band with an argument vector; never scheduled
    Userland(Arc<dyn Fn(&[&str]) -> i32 + Send + Sync>),
}

impl FunctCallback {
    /// Wrap a legacy callback.
    pub fn legacy(f: impl Fn(i64) + Send + Sync + 'static) -> Self {
        Self::Legacy(Arc::new(f))
    }

    /// Wrap an extended callback.
    pub fn extended(f: impl Fn(&FunctArgs<'_>) -> i32 + Send + Sync + 'static) -> Self {
        Self::Extended(Arc::new(f))
    }

    /// Wrap a userland callback.
    pub fn userland(f: impl Fn(&[&str]) -> i32 + Send + Sync + 'static) -> Self {
        Self::Userland(Arc::new(f))
    }

    /// Signature tag stored in the arena.
    pub fn signature(&self) -> FunctSignature {
        match self {
            Self::Legacy(_) => FunctSignature::Legacy,
            Self::Extended(_) => FunctSignature::Extended,
            Self::Userland(_) => FunctSignature::Userland,
        }
    }

    /// Run from a thread cycle. Userland callbacks are never scheduled and
    /// return 0 here.
    pub(crate) fn invoke(&self, period: i64, args: &FunctArgs<'_>) -> i32 {
        match self {
            Self::Legacy(f) => {
                f(period);
                0
            }
            Self::Extended(f) => f(args),
            Self::Userland(_) => 0,
        }
    }
}

impl fmt::Debug for FunctCallback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FunctCallback::{:?}", self.signature())
    }
}

/// Snapshot of a function.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FunctInfo {
    /// Function name
    pub name: String,
    /// Unique id
    pub id: i32,
    /// Owning component or instance id
    pub owner_id: i32,
    /// Call signature
    pub signature: FunctSignature,
    /// Uses floating point
    pub uses_fp: bool,
    /// Safe to run from several threads at once
    pub reentrant: bool,
    /// Number of thread entries referring to it
    pub users: u32,
    /// Last measured runtime, ns
    pub runtime: i64,
    /// Longest measured runtime, ns
    pub maxtime: i64,
    /// Longest runtime grew since the flag was last taken
    pub maxtime_increased: bool,
}

impl FunctRecord {
    pub(crate) fn signature(&self) -> FunctSignature {
        FunctSignature::from_u8(self.signature).unwrap_or(FunctSignature::Legacy)
    }

    /// Record one invocation's runtime.
    pub(crate) fn record_runtime(&self, ns: i64) {
        self.runtime.store(ns, Ordering::Relaxed);
        if self.maxtime.fetch_max(ns, Ordering::Relaxed) < ns {
            self.maxtime_increased.store(1, Ordering::Relaxed);
        }
    }
}

impl HalGuard<'_> {
    /// Export a function owned by a component or instance.
    ///
    /// Only this process can run it.
    pub fn export_funct(
        &mut self,
        owner: impl Into<ObjectRef>,
        name: &str,
        callback: FunctCallback,
        uses_fp: bool,
        reentrant: bool,
    ) -> HalResult<FunctHandle> {
        self.master().check_unlocked(LockLevel::LOAD, "load")?;
        let owner_id = self.owner_id(owner.into())?;
        let signature = callback.signature();
        let (h, rec) = self.create_object::<FunctRecord>(name, owner_id)?;
        rec.signature = signature as u8;
        rec.uses_fp = uses_fp as u8;
        rec.reentrant = reentrant as u8;
        self.hal.local.functs.write().insert(h.id(), callback);
        debug!("Exported function {} ({:?})", name, signature);
        Ok(h)
    }

    /// Delete a function, dropping it from every thread that runs it.
    ///
    /// Refused with `SchedulerRunning` while threads run and the function is
    /// in use.
    pub fn delete_funct(&mut self, funct: FunctHandle) -> HalResult<()> {
        let rec = self.resolve(funct)?;
        if rec.users > 0 && self.master().threads_running() {
            return Err(HalError::SchedulerRunning);
        }
        let name = rec.hdr.name().to_string();
        let threads: Vec<ThreadHandle> = self
            .objects(Some(ObjectKind::Thread))
            .into_iter()
            .filter_map(|o| o.downcast::<ThreadRecord>())
            .collect();
        for thread in threads {
            while self.remove_entry_of(thread, funct)? {}
        }
        self.destroy_object(funct)?;
        self.hal.local.functs.write().remove(&funct.id());
        info!("Deleted function {}", name);
        Ok(())
    }

    /// Snapshot of a function.
    pub fn funct_info(&self, funct: FunctHandle) -> HalResult<FunctInfo> {
        let f = self.resolve(funct)?;
        Ok(FunctInfo {
            name: f.hdr.name().to_string(),
            id: f.hdr.id,
            owner_id: f.hdr.owner_id,
            signature: f.signature(),
            uses_fp: f.uses_fp != 0,
            reentrant: f.reentrant != 0,
            users: f.users,
            runtime: f.runtime.load(Ordering::Relaxed),
            maxtime: f.maxtime.load(Ordering::Relaxed),
            maxtime_increased: f.maxtime_increased.load(Ordering::Relaxed) != 0,
        })
    }

    /// Read and clear the "longest runtime grew" flag.
    pub fn take_maxtime_increased(&mut self, funct: FunctHandle) -> HalResult<bool> {
        Ok(self.resolve(funct)?.maxtime_increased.swap(0, Ordering::Relaxed) != 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::new_hal;
    use hal::types::CompType;

    #[test]
    fn callbacks_report_their_signature() {
        assert_eq!(FunctCallback::legacy(|_| {}).signature(), FunctSignature::Legacy);
        assert_eq!(FunctCallback::extended(|_| 0).signature(), FunctSignature::Extended);
        assert_eq!(FunctCallback::userland(|_| 0).signature(), FunctSignature::Userland);
        assert!(!FunctSignature::Userland.is_schedulable());
    }

    #[test]
    fn export_and_delete() {
        let (_dir, hal) = new_hal();
        let mut g = hal.lock();
        let c = g.register_component("pid", CompType::Realtime).unwrap();
        let f = g
            .export_funct(c, "pid.update", FunctCallback::legacy(|_| {}), true, false)
            .unwrap();
        let info = g.funct_info(f).unwrap();
        assert_eq!(info.signature, FunctSignature::Legacy);
        assert!(info.uses_fp && !info.reentrant);
        assert_eq!(info.users, 0);
        assert!(hal.local.functs.read().contains_key(&f.id()));

        g.delete_funct(f).unwrap();
        assert!(g.find_by_name(None, "pid.update").is_none());
        assert!(!hal.local.functs.read().contains_key(&f.id()));
    }

    #[test]
    fn maxtime_flag_is_sticky_until_taken() {
        let (_dir, hal) = new_hal();
        let mut g = hal.lock();
        let c = g.register_component("m", CompType::Realtime).unwrap();
        let f = g
            .export_funct(c, "m.f", FunctCallback::extended(|_| 0), false, true)
            .unwrap();
        let rec = g.resolve(f).unwrap();
        rec.record_runtime(500);
        rec.record_runtime(200);
        let info = g.funct_info(f).unwrap();
        assert_eq!((info.runtime, info.maxtime), (200, 500));
        assert!(g.take_maxtime_increased(f).unwrap());
        assert!(!g.take_maxtime_increased(f).unwrap());
        g.resolve(f).unwrap().record_runtime(400);
        assert!(!g.take_maxtime_increased(f).unwrap());
    }
}
