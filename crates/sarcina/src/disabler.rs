//! パッケージ無効化の中核サービス
//!
//! 無視リストと処理中リストを管理し、外観設定の退避・復元と
//! ライフサイクルイベントの記録を調停する。

use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use anyhow::Result;

use edhost::{
    load_list_setting, save_list_setting, ResourceHost, SettingsHost, StatusSink, Timeouts,
    ViewHost, ViewId,
};

use crate::appearance::AppearanceEngine;
use crate::events::{EventKind, EventLog};
use crate::metadata;
use crate::operation::Operation;

/// Settings document holding the user preferences, including the
/// ignored-packages list and the appearance keys.
pub const PREFERENCES: &str = "Preferences.sublime-settings";

/// Settings document private to the package manager.
pub const MANAGER_SETTINGS: &str = "Sarcina.sublime-settings";

/// Key in [`PREFERENCES`] listing the packages the host must not load.
pub const IGNORED_PACKAGES_KEY: &str = "ignored_packages";

/// Key in [`MANAGER_SETTINGS`] listing packages mid-operation, so a
/// crashed run can be recovered on the next start.
pub const IN_PROCESS_KEY: &str = "in_process_packages";

/// Delay before a deferred restore runs, giving the host time to load
/// the re-enabled packages first.
pub const RESTORE_DELAY: Duration = Duration::from_millis(1000);

/// Mutable state shared by every clone of [`PackageDisabler`].
#[derive(Default)]
pub(crate) struct DisablerState {
    /// Factory defaults for the theme keys, cached for the process lifetime.
    pub(crate) default_themes: HashMap<String, String>,
    /// Factory defaults for the color scheme keys.
    pub(crate) default_color_schemes: HashMap<String, String>,
    /// Theme name to every package recorded as supplying it. Entries
    /// accumulate across disables until a restore clears them.
    pub(crate) theme_packages: HashMap<String, BTreeSet<String>>,
    /// Color scheme name to every package recorded as supplying it.
    pub(crate) color_scheme_packages: HashMap<String, BTreeSet<String>>,
    /// Global theme values replaced by their defaults, by settings key.
    pub(crate) global_themes: HashMap<String, String>,
    /// Global color scheme values replaced by their defaults, by settings key.
    pub(crate) global_color_schemes: HashMap<String, String>,
    /// Per-view color scheme overrides that were erased.
    pub(crate) view_color_schemes: HashMap<ViewId, HashMap<String, String>>,
    /// Per-view syntax assignments replaced by plain text.
    pub(crate) view_syntaxes: HashMap<ViewId, String>,
    /// Matches a scheduled restore to the state it was scheduled for.
    /// Zero never matches a schedule.
    pub(crate) restore_token: u64,
}

impl DisablerState {
    /// Drops every backup. The cached defaults survive; they describe the
    /// host, not the operation.
    pub(crate) fn clear_backups(&mut self) {
        self.theme_packages.clear();
        self.color_scheme_packages.clear();
        self.global_themes.clear();
        self.global_color_schemes.clear();
        self.view_color_schemes.clear();
        self.view_syntaxes.clear();
    }
}

/// Disables and re-enables packages through the host's settings documents.
///
/// Cloning is cheap and every clone operates on the same shared state, so
/// a clone can be handed to a deferred task or another thread.
#[derive(Clone)]
pub struct PackageDisabler {
    settings: Arc<dyn SettingsHost>,
    timeouts: Arc<dyn Timeouts>,
    resources: Arc<dyn ResourceHost>,
    engine: AppearanceEngine,
    events: Arc<EventLog>,
    state: Arc<Mutex<DisablerState>>,
}

impl PackageDisabler {
    pub fn new(
        settings: Arc<dyn SettingsHost>,
        resources: Arc<dyn ResourceHost>,
        views: Arc<dyn ViewHost>,
        status: Arc<dyn StatusSink>,
        timeouts: Arc<dyn Timeouts>,
    ) -> Self {
        let engine = AppearanceEngine::new(
            settings.clone(),
            resources.clone(),
            views,
            status,
        );
        Self {
            settings,
            timeouts,
            resources,
            engine,
            events: Arc::new(EventLog::new()),
            state: Arc::new(Mutex::new(DisablerState::default())),
        }
    }

    /// Lifecycle events recorded by disables and re-enables.
    pub fn events(&self) -> &EventLog {
        &self.events
    }

    fn lock_state(&self) -> Result<MutexGuard<'_, DisablerState>> {
        self.state
            .lock()
            .map_err(|_| anyhow::anyhow!("前回の操作が異常終了したため、状態を利用できません"))
    }

    /// Adds `packages` to the ignored list so the host unloads them, and
    /// resets any appearance settings they solely supply.
    ///
    /// Returns the packages actually disabled now. Packages the user had
    /// already ignored by hand are excluded, so a later re-enable will not
    /// turn on anything the user wanted off.
    pub fn disable_packages(
        &self,
        packages: impl IntoIterator<Item = impl Into<String>>,
        operation: Operation,
    ) -> Result<BTreeSet<String>> {
        let packages: BTreeSet<String> = packages.into_iter().map(Into::into).collect();
        let mut state = self.lock_state()?;

        let settings = self.settings.load_settings(PREFERENCES);
        let ignored_at_start = load_list_setting(&settings, IGNORED_PACKAGES_KEY);

        let manager_settings = self.settings.load_settings(MANAGER_SETTINGS);
        let in_process_at_start = load_list_setting(&manager_settings, IN_PROCESS_KEY);

        // Ignored entries not tracked as in-process were disabled by the
        // user, not by an operation, and are left out entirely
        let user_ignored: BTreeSet<String> = ignored_at_start
            .difference(&in_process_at_start)
            .cloned()
            .collect();
        let disabled: BTreeSet<String> = packages.difference(&user_ignored).cloned().collect();

        let mut ignored = ignored_at_start.clone();
        ignored.extend(disabled.iter().cloned());

        // An explicit disable must stick across restarts; operations stay
        // in-process so a crashed run re-enables them on the next start
        let in_process: BTreeSet<String> = if operation == Operation::Disable {
            in_process_at_start.difference(&packages).cloned().collect()
        } else {
            in_process_at_start.union(&disabled).cloned().collect()
        };

        // A new operation supersedes any pending restore
        state.restore_token = 0;

        self.engine
            .backup_and_reset(&mut state, &disabled, operation.backs_up_appearance())?;

        match operation {
            Operation::Upgrade => {
                for package in &disabled {
                    let version = self.get_version(package);
                    self.events.add(EventKind::PreUpgrade, package, &version);
                }
            }
            Operation::Remove => {
                for package in &disabled {
                    let version = self.get_version(package);
                    self.events.add(EventKind::Remove, package, &version);
                }
            }
            _ => {}
        }

        save_list_setting(
            self.settings.as_ref(),
            &manager_settings,
            MANAGER_SETTINGS,
            IN_PROCESS_KEY,
            &in_process,
            Some(&in_process_at_start),
        )?;
        save_list_setting(
            self.settings.as_ref(),
            &settings,
            PREFERENCES,
            IGNORED_PACKAGES_KEY,
            &ignored,
            Some(&ignored_at_start),
        )?;

        Ok(disabled)
    }

    /// Removes `packages` from the ignored list so the host loads them
    /// again, and schedules the deferred appearance restore when the
    /// operation backed settings up.
    ///
    /// Returns the packages actually re-enabled, which is the intersection
    /// of `packages` with the current ignored list.
    pub fn reenable_packages(
        &self,
        packages: impl IntoIterator<Item = impl Into<String>>,
        operation: Operation,
    ) -> Result<BTreeSet<String>> {
        let requested: BTreeSet<String> = packages.into_iter().map(Into::into).collect();
        let mut state = self.lock_state()?;

        let settings = self.settings.load_settings(PREFERENCES);
        let mut ignored = load_list_setting(&settings, IGNORED_PACKAGES_KEY);

        let manager_settings = self.settings.load_settings(MANAGER_SETTINGS);
        let mut in_process = load_list_setting(&manager_settings, IN_PROCESS_KEY);

        let packages: BTreeSet<String> = requested.intersection(&ignored).cloned().collect();

        match operation {
            Operation::Install => {
                for package in &packages {
                    let version = self.get_version(package);
                    self.events.add(EventKind::Install, package, &version);
                    self.events.clear(EventKind::Install, package, true);
                }
            }
            Operation::Upgrade => {
                for package in &packages {
                    let version = self.get_version(package);
                    self.events.add(EventKind::PostUpgrade, package, &version);
                    self.events.clear(EventKind::PostUpgrade, package, true);
                    self.events.clear(EventKind::PreUpgrade, package, false);
                }
            }
            Operation::Remove => {
                for package in &packages {
                    self.events.clear(EventKind::Remove, package, false);
                }
            }
            _ => {}
        }

        ignored.retain(|package| !packages.contains(package));
        save_list_setting(
            self.settings.as_ref(),
            &settings,
            PREFERENCES,
            IGNORED_PACKAGES_KEY,
            &ignored,
            None,
        )?;

        in_process.retain(|package| !packages.contains(package));
        save_list_setting(
            self.settings.as_ref(),
            &manager_settings,
            MANAGER_SETTINGS,
            IN_PROCESS_KEY,
            &in_process,
            None,
        )?;

        if operation.backs_up_appearance() {
            self.schedule_restore(&mut state);
        }

        Ok(packages)
    }

    /// Re-enables packages a crashed run left in the in-process list, then
    /// clears the list. Intended to run once on host startup.
    pub fn reenable_in_process(&self) -> Result<BTreeSet<String>> {
        let leftover = {
            let _state = self.lock_state()?;
            let manager_settings = self.settings.load_settings(MANAGER_SETTINGS);
            load_list_setting(&manager_settings, IN_PROCESS_KEY)
        };
        if leftover.is_empty() {
            return Ok(leftover);
        }

        log::info!(
            "Re-enabling {} package(s) left in process by the previous run",
            leftover.len()
        );
        let recovered = self.reenable_packages(leftover, Operation::Enable)?;

        // Entries that were not in the ignored list are stale; drop them
        let _state = self.lock_state()?;
        let manager_settings = self.settings.load_settings(MANAGER_SETTINGS);
        let remaining = load_list_setting(&manager_settings, IN_PROCESS_KEY);
        if !remaining.is_empty() {
            save_list_setting(
                self.settings.as_ref(),
                &manager_settings,
                MANAGER_SETTINGS,
                IN_PROCESS_KEY,
                &BTreeSet::new(),
                None,
            )?;
        }
        Ok(recovered)
    }

    /// Current ignored-packages list.
    pub fn get_ignored_packages(&self) -> Result<BTreeSet<String>> {
        let _state = self.lock_state()?;
        let settings = self.settings.load_settings(PREFERENCES);
        Ok(load_list_setting(&settings, IGNORED_PACKAGES_KEY))
    }

    /// Packages currently tracked as mid-operation.
    pub fn get_in_process_packages(&self) -> Result<BTreeSet<String>> {
        let _state = self.lock_state()?;
        let manager_settings = self.settings.load_settings(MANAGER_SETTINGS);
        Ok(load_list_setting(&manager_settings, IN_PROCESS_KEY))
    }

    /// Replaces the ignored-packages list wholesale.
    pub fn set_ignored_packages(&self, ignored: &BTreeSet<String>) -> Result<()> {
        let _state = self.lock_state()?;
        let settings = self.settings.load_settings(PREFERENCES);
        save_list_setting(
            self.settings.as_ref(),
            &settings,
            PREFERENCES,
            IGNORED_PACKAGES_KEY,
            ignored,
            None,
        )?;
        Ok(())
    }

    /// Version string from the package's metadata, or a placeholder when
    /// the metadata is missing or unreadable.
    pub fn get_version(&self, package: &str) -> String {
        metadata::package_version(self.resources.as_ref(), package)
    }

    /// Applies the backed-up appearance settings once the packages that
    /// supply them are loadable again, then drops every backup.
    ///
    /// Meant to run from the deferred schedule. A `token` that no longer
    /// matches means a newer operation superseded this restore, so the
    /// call does nothing.
    pub fn restore_settings(&self, token: u64) -> Result<()> {
        let mut state = self.lock_state()?;
        if token != state.restore_token {
            return Ok(());
        }

        let save_needed = self.engine.restore(&state);
        if save_needed {
            if let Err(e) = self.settings.save_settings(PREFERENCES) {
                log::error!("Failed to persist restored appearance settings: {}", e);
            }
        }

        // One-shot: backups are dropped whether or not everything came back
        state.clear_backups();
        state.restore_token = 0;
        Ok(())
    }

    fn schedule_restore(&self, state: &mut DisablerState) {
        state.restore_token += 1;
        let token = state.restore_token;
        let disabler = self.clone();
        self.timeouts.set_timeout(
            RESTORE_DELAY,
            Box::new(move || {
                if let Err(e) = disabler.restore_settings(token) {
                    log::error!("Deferred settings restore failed: {}", e);
                }
            }),
        );
    }

    #[cfg(test)]
    pub(crate) fn recorded_scheme_owners(&self, name: &str) -> BTreeSet<String> {
        let state = self.state.lock().unwrap();
        state
            .color_scheme_packages
            .get(name)
            .cloned()
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::appearance::DEFAULT_PREFERENCES;
    use edhost::{ManualTimeouts, MemoryResources, MemorySettings, MemoryViews, QueuedStatus};

    fn disabler_with_settings() -> (PackageDisabler, Arc<MemorySettings>) {
        let settings = Arc::new(MemorySettings::new());
        let resources = Arc::new(MemoryResources::new());
        resources.add_file(DEFAULT_PREFERENCES, r#"{"color_scheme": "Monokai.sublime-color-scheme", "theme": "Default.sublime-theme"}"#);
        let disabler = PackageDisabler::new(
            settings.clone(),
            resources,
            Arc::new(MemoryViews::new()),
            Arc::new(QueuedStatus::new()),
            Arc::new(ManualTimeouts::new()),
        );
        (disabler, settings)
    }

    fn set_list(settings: &Arc<MemorySettings>, name: &str, key: &str, values: &[&str]) {
        let doc = settings.load_settings(name);
        doc.set(key, serde_json::json!(values));
    }

    #[test]
    fn test_disable_skips_user_ignored_packages() {
        let (disabler, settings) = disabler_with_settings();
        set_list(&settings, PREFERENCES, IGNORED_PACKAGES_KEY, &["UserOff"]);

        let disabled = disabler
            .disable_packages(["Alpha", "UserOff"], Operation::Upgrade)
            .unwrap();

        let expected: BTreeSet<String> = ["Alpha".to_string()].into_iter().collect();
        assert_eq!(disabled, expected);
        let ignored = disabler.get_ignored_packages().unwrap();
        assert!(ignored.contains("Alpha"));
        assert!(ignored.contains("UserOff"));
    }

    #[test]
    fn test_disable_twice_returns_nothing_new() {
        let (disabler, _settings) = disabler_with_settings();

        let first = disabler
            .disable_packages(["Alpha"], Operation::Disable)
            .unwrap();
        assert_eq!(first.len(), 1);

        let second = disabler
            .disable_packages(["Alpha"], Operation::Disable)
            .unwrap();
        assert!(second.is_empty());
    }

    #[test]
    fn test_in_process_package_is_disabled_again() {
        let (disabler, settings) = disabler_with_settings();
        set_list(&settings, PREFERENCES, IGNORED_PACKAGES_KEY, &["Alpha"]);
        set_list(&settings, MANAGER_SETTINGS, IN_PROCESS_KEY, &["Alpha"]);

        // Ignored by an operation, not by the user, so it is fair game
        let disabled = disabler
            .disable_packages(["Alpha"], Operation::Upgrade)
            .unwrap();
        assert!(disabled.contains("Alpha"));
    }

    #[test]
    fn test_explicit_disable_clears_in_process_entry() {
        let (disabler, settings) = disabler_with_settings();

        disabler
            .disable_packages(["Alpha"], Operation::Upgrade)
            .unwrap();
        let manager = settings.load_settings(MANAGER_SETTINGS);
        assert_eq!(
            load_list_setting(&manager, IN_PROCESS_KEY).len(),
            1
        );

        disabler
            .disable_packages(["Alpha"], Operation::Disable)
            .unwrap();
        assert!(load_list_setting(&manager, IN_PROCESS_KEY).is_empty());
        assert!(disabler.get_ignored_packages().unwrap().contains("Alpha"));
    }

    #[test]
    fn test_reenable_intersects_with_ignored() {
        let (disabler, _settings) = disabler_with_settings();
        disabler
            .disable_packages(["Alpha"], Operation::Disable)
            .unwrap();

        let reenabled = disabler
            .reenable_packages(["Alpha", "NeverOff"], Operation::Enable)
            .unwrap();
        let expected: BTreeSet<String> = ["Alpha".to_string()].into_iter().collect();
        assert_eq!(reenabled, expected);
        assert!(disabler.get_ignored_packages().unwrap().is_empty());
    }

    #[test]
    fn test_set_ignored_packages_sorts_case_insensitively() {
        let (disabler, settings) = disabler_with_settings();
        let ignored: BTreeSet<String> = ["zeta", "Alpha", "beta"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        disabler.set_ignored_packages(&ignored).unwrap();

        let doc = settings.load_settings(PREFERENCES);
        let stored = doc.get(IGNORED_PACKAGES_KEY).unwrap();
        let stored: Vec<String> = serde_json::from_value(stored).unwrap();
        assert_eq!(stored, vec!["Alpha", "beta", "zeta"]);
    }

    #[test]
    fn test_get_version_without_metadata() {
        let (disabler, _settings) = disabler_with_settings();
        assert_eq!(disabler.get_version("Ghost"), "unknown version");
    }
}
