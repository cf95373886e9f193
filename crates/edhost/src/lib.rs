pub mod resources;
pub mod settings;
pub mod status;
pub mod timeouts;
pub mod views;

pub use resources::{split_package_path, DiskResources, MemoryResources, ResourceHost};
pub use settings::{
    load_list_setting, save_list_setting, DiskSettings, MemorySettings, Settings, SettingsHost,
};
pub use status::{ConsoleStatus, MessageKind, QueuedStatus, StatusMessage, StatusSink};
pub use timeouts::{ManualTimeouts, TimeoutCallback, Timeouts, TokioTimeouts};
pub use views::{MemoryViews, View, ViewHost, ViewId, Window};

use std::sync::{Mutex, MutexGuard};

// A poisoned map is still a valid map; internal locks guard single
// insert/remove sections only.
pub(crate) fn locked<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
