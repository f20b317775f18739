//! The `Hal` handle: one process's attachment to a HAL arena.
//!
//! `Hal::create` formats a new arena, `Hal::attach` maps an existing one and
//! refuses it on a magic or version mismatch. Dropping the creating handle
//! removes the arena file and every ring segment still registered.

use hal::config::HalConfig;
use hal::types::ObjectKind;
use hal_shared_memory::ShmSegment;
use hal_shared_memory::platform::get_current_pid;
use parking_lot::{Mutex, RwLock};
use std::any::Any;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::error::HalResult;
use crate::executor::Runner;
use crate::funct::FunctCallback;
use crate::instance::InstanceHooks;
use crate::master::MasterRegion;

/// Callables registered by this process, keyed by object id.
///
/// Code cannot live in shared memory, so only the exporting process can run
/// a function, construct an instance or hand out a vtable.
#[derive(Default)]
pub(crate) struct LocalTables {
    pub(crate) functs: RwLock<HashMap<i32, FunctCallback>>,
    pub(crate) hooks: RwLock<HashMap<i32, InstanceHooks>>,
    pub(crate) vtables: RwLock<HashMap<i32, Arc<dyn Any + Send + Sync>>>,
}

impl LocalTables {
    pub(crate) fn forget(&self, id: i32) {
        self.functs.write().remove(&id);
        self.hooks.write().remove(&id);
        self.vtables.write().remove(&id);
    }
}

/// A mapped HAL arena.
pub struct Hal {
    pub(crate) seg: Arc<ShmSegment>,
    pub(crate) config: HalConfig,
    pub(crate) pid: u32,
    pub(crate) owner: bool,
    pub(crate) local: LocalTables,
    pub(crate) runner: Mutex<Option<Runner>>,
}

/// Path of the arena file for a configuration.
pub fn arena_path(config: &HalConfig) -> PathBuf {
    config
        .arena
        .shm_dir
        .join(format!("hal_{}", config.arena.name))
}

impl Hal {
    /// Create and format a new arena.
    ///
    /// Fails with `AlreadyExists` if the arena file is present.
    pub fn create(config: &HalConfig) -> HalResult<Self> {
        config.validate()?;
        let path = arena_path(config);
        let seg = ShmSegment::create(&path, config.arena.size)?;
        let pid = get_current_pid();
        // SAFETY: the segment was just created exclusively.
        unsafe { MasterRegion::format(&seg, &config.scheduler, pid)? };

        info!(
            "Created HAL arena {} ({} bytes, version {:#x})",
            path.display(),
            config.arena.size,
            hal::consts::HAL_VER
        );
        Ok(Self::from_parts(seg, config, pid, true))
    }

    /// Attach to an existing arena.
    ///
    /// A version or magic mismatch drops the mapping and fails; nothing of
    /// the arena is used.
    pub fn attach(config: &HalConfig) -> HalResult<Self> {
        config.validate()?;
        let path = arena_path(config);
        let seg = ShmSegment::attach(&path)?;
        MasterRegion::validate(&seg)?;

        info!("Attached HAL arena {} ({} bytes)", path.display(), seg.size());
        Ok(Self::from_parts(seg, config, get_current_pid(), false))
    }

    fn from_parts(seg: ShmSegment, config: &HalConfig, pid: u32, owner: bool) -> Self {
        Self {
            seg: Arc::new(seg),
            config: config.clone(),
            pid,
            owner,
            local: LocalTables::default(),
            runner: Mutex::new(None),
        }
    }

    /// Configuration this handle was opened with.
    pub fn config(&self) -> &HalConfig {
        &self.config
    }

    /// Arena file path.
    pub fn path(&self) -> &Path {
        self.seg.path()
    }

    /// The arena mapping.
    pub fn segment(&self) -> &Arc<ShmSegment> {
        &self.seg
    }

    /// Whether this handle created the arena.
    pub fn is_owner(&self) -> bool {
        self.owner
    }

    /// Free heap bytes.
    pub fn heap_available(&self) -> usize {
        self.lock().master().heap.avail()
    }

    /// Used heap bytes.
    pub fn heap_used(&self) -> usize {
        self.lock().master().heap.used()
    }

    /// Base period in nanoseconds, 0 until the first thread exists.
    pub fn base_period(&self) -> i64 {
        self.lock().master().base_period
    }

    /// Read-only view of the master for lock-free fields (atomics).
    pub(crate) fn master_ref(&self) -> &MasterRegion {
        // SAFETY: validated at create/attach; only atomics are read through
        // this reference without the lock.
        unsafe { self.seg.get::<MasterRegion>(hal_shared_memory::ShmOff::NULL) }
    }
}

impl Drop for Hal {
    fn drop(&mut self) {
        self.halt_runner();
        if !self.owner {
            debug!("Detached from HAL arena {}", self.seg.path().display());
            return;
        }

        let rings: Vec<PathBuf> = {
            let g = self.lock();
            g.objects(Some(ObjectKind::Ring))
                .into_iter()
                .filter_map(|r| r.downcast().and_then(|h| g.ring_path(h).ok()))
                .collect()
        };
        for path in rings {
            if let Err(e) = ShmSegment::unlink(&path) {
                warn!("Failed to remove ring segment {}: {}", path.display(), e);
            }
        }
        info!("Destroying HAL arena {}", self.seg.path().display());
    }
}

impl std::fmt::Debug for Hal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Hal")
            .field("path", &self.seg.path())
            .field("pid", &self.pid)
            .field("owner", &self.owner)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::HalError;
    use hal_shared_memory::ShmError;

    #[test]
    fn create_then_attach() {
        let dir = tempfile::tempdir().unwrap();
        let config = HalConfig::in_dir(dir.path());
        let owner = Hal::create(&config).unwrap();
        assert!(owner.is_owner());
        assert!(arena_path(&config).exists());

        let other = Hal::attach(&config).unwrap();
        assert!(!other.is_owner());
        assert_eq!(other.heap_available(), owner.heap_available());
        drop(other);
        assert!(arena_path(&config).exists());
        drop(owner);
        assert!(!arena_path(&config).exists());
    }

    #[test]
    fn second_create_fails() {
        let dir = tempfile::tempdir().unwrap();
        let config = HalConfig::in_dir(dir.path());
        let _owner = Hal::create(&config).unwrap();
        assert!(matches!(
            Hal::create(&config),
            Err(HalError::Shm(ShmError::AlreadyExists { .. }))
        ));
    }

    #[test]
    fn attach_without_arena_fails() {
        let dir = tempfile::tempdir().unwrap();
        let config = HalConfig::in_dir(dir.path());
        assert!(matches!(
            Hal::attach(&config),
            Err(HalError::Shm(ShmError::NotFound { .. }))
        ));
    }

    #[test]
    fn invalid_config_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = HalConfig::in_dir(dir.path());
        config.arena.size = 1000;
        assert!(matches!(Hal::create(&config), Err(HalError::Config(_))));
    }
}
