use hal::config::HalConfig;

use crate::core::Hal;

/// A freshly created arena in its own temporary directory.
pub(crate) fn new_hal() -> (tempfile::TempDir, Hal) {
    let dir = tempfile::tempdir().unwrap();
    let hal = Hal::create(&HalConfig::in_dir(dir.path())).unwrap();
    (dir, hal)
}
