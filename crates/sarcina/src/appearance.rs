//! 外観設定の退避と復元
//!
//! パッケージ無効化の前にテーマ・カラースキーム・シンタックスを既定値へ
//! 戻し、再有効化後に退避した値を書き戻すエンジン。

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use anyhow::Result;
use serde_json::Value;

use edhost::resources::PACKAGES_PREFIX;
use edhost::{ResourceHost, SettingsHost, StatusSink, ViewHost};

use crate::disabler::{DisablerState, PREFERENCES};
use crate::locator;

/// Global settings keys that may hold a color scheme.
pub const COLOR_SCHEME_KEYS: [&str; 3] = ["color_scheme", "dark_color_scheme", "light_color_scheme"];

/// Global settings keys that may hold a theme.
pub const THEME_KEYS: [&str; 3] = ["theme", "dark_theme", "light_theme"];

/// Per-view settings key holding the assigned syntax resource path.
pub const SYNTAX_KEY: &str = "syntax";

/// Resource holding the factory defaults for the appearance keys.
pub const DEFAULT_PREFERENCES: &str = "Packages/Default/Preferences.sublime-settings";

/// Syntax applied to views whose own syntax is being taken away.
pub const PLAIN_TEXT_SYNTAX: &str = "Packages/Text/Plain text.tmLanguage";

/// A value is only reset when at least one package supplies it and every
/// one of those packages is in the affected set. A surviving supplier
/// keeps the resource resolvable, so the value can stay.
fn fully_owned_by(owners: &BTreeSet<String>, affected: &BTreeSet<String>) -> bool {
    !owners.is_empty() && owners.is_subset(affected)
}

fn join_sorted(packages: &BTreeSet<String>) -> String {
    let mut sorted: Vec<&str> = packages.iter().map(String::as_str).collect();
    sorted.sort_by_key(|name| name.to_lowercase());
    sorted.join("\n   - ")
}

/// Backs up and restores appearance settings around package state changes.
#[derive(Clone)]
pub(crate) struct AppearanceEngine {
    settings: Arc<dyn SettingsHost>,
    resources: Arc<dyn ResourceHost>,
    views: Arc<dyn ViewHost>,
    status: Arc<dyn StatusSink>,
}

impl AppearanceEngine {
    pub(crate) fn new(
        settings: Arc<dyn SettingsHost>,
        resources: Arc<dyn ResourceHost>,
        views: Arc<dyn ViewHost>,
        status: Arc<dyn StatusSink>,
    ) -> Self {
        Self {
            settings,
            resources,
            views,
            status,
        }
    }

    /// Caches the factory defaults for the appearance keys. Runs once per
    /// process; later calls are no-ops.
    fn init_defaults(&self, state: &mut DisablerState) -> Result<()> {
        if !state.default_themes.is_empty() {
            return Ok(());
        }

        let raw = self
            .resources
            .load_resource(DEFAULT_PREFERENCES)
            .map_err(|e| anyhow::anyhow!("既定の設定を読み込めませんでした: {}", e))?;
        let defaults: Value = serde_json::from_str(&raw)
            .map_err(|e| anyhow::anyhow!("既定の設定を解析できませんでした: {} - {}", DEFAULT_PREFERENCES, e))?;

        // Only keys the host actually ships defaults for are handled later
        for key in COLOR_SCHEME_KEYS {
            if let Some(value) = defaults.get(key).and_then(Value::as_str) {
                if !value.is_empty() {
                    state
                        .default_color_schemes
                        .insert(key.to_string(), value.to_string());
                }
            }
        }
        for key in THEME_KEYS {
            if let Some(value) = defaults.get(key).and_then(Value::as_str) {
                if !value.is_empty() {
                    state.default_themes.insert(key.to_string(), value.to_string());
                }
            }
        }
        Ok(())
    }

    /// Resets every appearance value supplied solely by `affected` back to
    /// its factory default, recording the previous values in `state` when
    /// `do_backup` is set.
    pub(crate) fn backup_and_reset(
        &self,
        state: &mut DisablerState,
        affected: &BTreeSet<String>,
        do_backup: bool,
    ) -> Result<()> {
        self.init_defaults(state)?;

        let settings = self.settings.load_settings(PREFERENCES);
        let mut cached_globals: HashMap<String, Option<String>> = HashMap::new();

        for (key, default_file) in state.default_themes.clone() {
            let theme_file = match settings.get_str(&key) {
                Some(theme_file) => theme_file,
                None => continue,
            };
            if theme_file.is_empty() || theme_file == "auto" || theme_file == default_file {
                continue;
            }
            let (name, owners) = locator::find_theme_packages(self.resources.as_ref(), &theme_file);
            if !fully_owned_by(&owners, affected) {
                continue;
            }
            if do_backup {
                state.theme_packages.entry(name).or_default().extend(owners);
                state.global_themes.insert(key.clone(), theme_file);
            }
            settings.set(&key, Value::String(default_file));
        }

        // The pre-reset global value is remembered so the view pass below
        // can tell a genuine override from one merely restating the global
        for (key, default_file) in state.default_color_schemes.clone() {
            let scheme_value = settings.get_str(&key);
            cached_globals.insert(key.clone(), scheme_value.clone());

            let scheme_file = match scheme_value {
                Some(scheme_file) => scheme_file,
                None => continue,
            };
            if scheme_file.is_empty() || scheme_file == "auto" || scheme_file == default_file {
                continue;
            }
            let (name, owners) =
                locator::find_color_scheme_packages(self.resources.as_ref(), &scheme_file);
            if !fully_owned_by(&owners, affected) {
                continue;
            }
            if do_backup {
                state
                    .color_scheme_packages
                    .entry(name)
                    .or_default()
                    .extend(owners);
                state.global_color_schemes.insert(key.clone(), scheme_file);
            }
            settings.set(&key, Value::String(default_file));
        }

        for window in self.views.windows() {
            for view in window.views() {
                let view_settings = view.settings();

                // Per-view overrides fall back to the global value, so a
                // reset here erases the key instead of writing a default
                for (key, default_file) in state.default_color_schemes.clone() {
                    let scheme_file = match view_settings.get_str(&key) {
                        Some(scheme_file) => scheme_file,
                        None => continue,
                    };
                    if scheme_file.is_empty() || scheme_file == "auto" || scheme_file == default_file
                    {
                        continue;
                    }
                    if cached_globals.get(&key).and_then(|cached| cached.as_deref())
                        == Some(scheme_file.as_str())
                    {
                        continue;
                    }
                    let (name, owners) =
                        locator::find_color_scheme_packages(self.resources.as_ref(), &scheme_file);
                    if !fully_owned_by(&owners, affected) {
                        continue;
                    }
                    if do_backup {
                        state
                            .color_scheme_packages
                            .entry(name)
                            .or_default()
                            .extend(owners);
                        state
                            .view_color_schemes
                            .entry(view.id())
                            .or_default()
                            .insert(key.clone(), scheme_file);
                    }
                    view_settings.erase(&key);
                }

                if let Some(syntax) = view_settings.get_str(SYNTAX_KEY) {
                    let owned = affected
                        .iter()
                        .any(|package| syntax.starts_with(&format!("{}{}/", PACKAGES_PREFIX, package)));
                    if owned {
                        if do_backup {
                            state.view_syntaxes.insert(view.id(), syntax);
                        }
                        view_settings
                            .set(SYNTAX_KEY, Value::String(PLAIN_TEXT_SYNTAX.to_string()));
                    }
                }
            }
        }

        Ok(())
    }

    /// Writes every backed-up appearance value whose packages all resolve
    /// again. Returns whether any global setting changed and therefore
    /// needs persisting. Failures never abort the pass; whole resources
    /// that stay missing are reported once each.
    pub(crate) fn restore(&self, state: &DisablerState) -> bool {
        let settings = self.settings.load_settings(PREFERENCES);
        let mut save_settings = false;

        let mut missing_theme_packages = BTreeSet::new();
        for (key, theme_file) in &state.global_themes {
            let (name, owners) = locator::find_theme_packages(self.resources.as_ref(), theme_file);
            let recorded = match state.theme_packages.get(&name) {
                Some(recorded) => recorded,
                None => continue,
            };
            let missing: BTreeSet<String> = recorded.difference(&owners).cloned().collect();
            if missing.is_empty() {
                settings.set(key, Value::String(theme_file.clone()));
                save_settings = true;
            } else {
                missing_theme_packages.extend(missing);
            }
        }
        if !missing_theme_packages.is_empty() {
            self.status.show_error(&format!(
                "The following packages involved in the active theme are no \
                 longer present:\n\n   - {}\n\nAs one of them may contain the \
                 primary theme, the default theme has been left in place.",
                join_sorted(&missing_theme_packages)
            ));
        }

        // Color schemes are handled even when a theme could not come back
        let mut missing_scheme_packages = BTreeSet::new();
        for (key, scheme_file) in &state.global_color_schemes {
            let (name, owners) =
                locator::find_color_scheme_packages(self.resources.as_ref(), scheme_file);
            let recorded = match state.color_scheme_packages.get(&name) {
                Some(recorded) => recorded,
                None => continue,
            };
            let missing: BTreeSet<String> = recorded.difference(&owners).cloned().collect();
            if missing.is_empty() {
                settings.set(key, Value::String(scheme_file.clone()));
                save_settings = true;
            } else {
                missing_scheme_packages.extend(missing);
            }
        }
        if !missing_scheme_packages.is_empty() {
            self.status.show_error(&format!(
                "The following packages involved in the active color scheme \
                 are no longer present:\n\n   - {}\n\nAs one of them may \
                 contain the primary color scheme, the default color scheme \
                 has been left in place.",
                join_sorted(&missing_scheme_packages)
            ));
        }

        let mut scheme_errors: BTreeSet<String> = BTreeSet::new();
        for (view_id, view_schemes) in &state.view_color_schemes {
            let view = match self.views.view_by_id(*view_id) {
                Some(view) => view,
                // The view closed in the meantime; nothing left to restore
                None => continue,
            };
            for (key, scheme_file) in view_schemes {
                if scheme_errors.contains(scheme_file) {
                    continue;
                }
                let (name, owners) =
                    locator::find_color_scheme_packages(self.resources.as_ref(), scheme_file);
                let recorded = match state.color_scheme_packages.get(&name) {
                    Some(recorded) => recorded,
                    None => continue,
                };
                if recorded.difference(&owners).next().is_some() {
                    log::warn!("The color scheme \"{}\" no longer exists", scheme_file);
                    scheme_errors.insert(scheme_file.clone());
                    continue;
                }
                view.settings().set(key, Value::String(scheme_file.clone()));
            }
        }

        let mut syntax_errors: BTreeSet<String> = BTreeSet::new();
        for (view_id, syntax) in &state.view_syntaxes {
            let view = match self.views.view_by_id(*view_id) {
                Some(view) => view,
                None => continue,
            };
            if syntax_errors.contains(syntax) {
                continue;
            }
            if !locator::resource_exists(self.resources.as_ref(), syntax) {
                log::warn!("The syntax \"{}\" no longer exists", syntax);
                syntax_errors.insert(syntax.clone());
                continue;
            }
            view.settings().set(SYNTAX_KEY, Value::String(syntax.clone()));
        }

        save_settings
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use edhost::{MemoryResources, MemorySettings, MemoryViews, QueuedStatus};

    fn engine_with_hosts() -> (
        AppearanceEngine,
        Arc<MemorySettings>,
        Arc<MemoryResources>,
        Arc<MemoryViews>,
    ) {
        let settings = Arc::new(MemorySettings::new());
        let resources = Arc::new(MemoryResources::new());
        let views = Arc::new(MemoryViews::new());
        let status = Arc::new(QueuedStatus::new());
        resources.add_file(
            DEFAULT_PREFERENCES,
            r#"{"color_scheme": "Monokai.sublime-color-scheme", "theme": "Default.sublime-theme"}"#,
        );
        let engine = AppearanceEngine::new(
            settings.clone(),
            resources.clone(),
            views.clone(),
            status,
        );
        (engine, settings, resources, views)
    }

    #[test]
    fn test_init_defaults_runs_once() {
        let (engine, _settings, resources, _views) = engine_with_hosts();
        let mut state = DisablerState::default();

        engine.init_defaults(&mut state).unwrap();
        assert_eq!(
            state.default_color_schemes.get("color_scheme").map(String::as_str),
            Some("Monokai.sublime-color-scheme")
        );
        assert_eq!(
            state.default_themes.get("theme").map(String::as_str),
            Some("Default.sublime-theme")
        );

        // A changed resource must not refresh the cache
        resources.add_file(DEFAULT_PREFERENCES, r#"{"theme": "Other.sublime-theme"}"#);
        engine.init_defaults(&mut state).unwrap();
        assert_eq!(
            state.default_themes.get("theme").map(String::as_str),
            Some("Default.sublime-theme")
        );
    }

    #[test]
    fn test_init_defaults_missing_resource_is_an_error() {
        let (engine, _settings, resources, _views) = engine_with_hosts();
        resources.remove_file(DEFAULT_PREFERENCES);
        let mut state = DisablerState::default();
        assert!(engine.init_defaults(&mut state).is_err());
    }

    #[test]
    fn test_auto_and_default_values_are_left_alone() {
        let (engine, settings, _resources, _views) = engine_with_hosts();
        let prefs = settings.load_settings(PREFERENCES);
        prefs.set("color_scheme", Value::String("auto".to_string()));
        prefs.set("theme", Value::String("Default.sublime-theme".to_string()));

        let mut state = DisablerState::default();
        let affected: BTreeSet<String> = ["Any"].iter().map(|s| s.to_string()).collect();
        engine.backup_and_reset(&mut state, &affected, true).unwrap();

        assert_eq!(prefs.get_str("color_scheme").as_deref(), Some("auto"));
        assert!(state.global_color_schemes.is_empty());
        assert!(state.global_themes.is_empty());
    }

    #[test]
    fn test_surviving_supplier_keeps_value_active() {
        let (engine, settings, resources, _views) = engine_with_hosts();
        resources.add_file("Packages/A/Mariana.sublime-color-scheme", "{}");
        resources.add_file("Packages/B/Mariana.tmTheme", "<plist/>");
        let prefs = settings.load_settings(PREFERENCES);
        prefs.set(
            "color_scheme",
            Value::String("Mariana.sublime-color-scheme".to_string()),
        );

        let mut state = DisablerState::default();
        let affected: BTreeSet<String> = ["A"].iter().map(|s| s.to_string()).collect();
        engine.backup_and_reset(&mut state, &affected, true).unwrap();

        assert_eq!(
            prefs.get_str("color_scheme").as_deref(),
            Some("Mariana.sublime-color-scheme")
        );
        assert!(state.global_color_schemes.is_empty());
    }

    #[test]
    fn test_reset_without_backup_records_nothing() {
        let (engine, settings, resources, _views) = engine_with_hosts();
        resources.add_file("Packages/A/Mariana.sublime-color-scheme", "{}");
        let prefs = settings.load_settings(PREFERENCES);
        prefs.set(
            "color_scheme",
            Value::String("Mariana.sublime-color-scheme".to_string()),
        );

        let mut state = DisablerState::default();
        let affected: BTreeSet<String> = ["A"].iter().map(|s| s.to_string()).collect();
        engine.backup_and_reset(&mut state, &affected, false).unwrap();

        assert_eq!(
            prefs.get_str("color_scheme").as_deref(),
            Some("Monokai.sublime-color-scheme")
        );
        assert!(state.global_color_schemes.is_empty());
        assert!(state.color_scheme_packages.is_empty());
    }

    #[test]
    fn test_view_value_matching_old_global_is_skipped() {
        let (engine, settings, resources, views) = engine_with_hosts();
        resources.add_file("Packages/A/Mariana.sublime-color-scheme", "{}");
        let prefs = settings.load_settings(PREFERENCES);
        prefs.set(
            "color_scheme",
            Value::String("Mariana.sublime-color-scheme".to_string()),
        );

        let window = views.add_window();
        let view = views.add_view(window);
        view.settings().set(
            "color_scheme",
            Value::String("Mariana.sublime-color-scheme".to_string()),
        );

        let mut state = DisablerState::default();
        let affected: BTreeSet<String> = ["A"].iter().map(|s| s.to_string()).collect();
        engine.backup_and_reset(&mut state, &affected, true).unwrap();

        // The global was reset and recorded; the view override restating it
        // is left to fall through to the global value
        assert_eq!(
            prefs.get_str("color_scheme").as_deref(),
            Some("Monokai.sublime-color-scheme")
        );
        assert!(state.global_color_schemes.contains_key("color_scheme"));
        assert!(state.view_color_schemes.is_empty());
        assert_eq!(
            view.settings().get_str("color_scheme").as_deref(),
            Some("Mariana.sublime-color-scheme")
        );
    }
}
