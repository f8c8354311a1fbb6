use std::sync::Arc;

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::store::{self, KeyValueStore, SETTINGS_KEY};

#[derive(Debug, Clone, Copy, Eq, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationStyle {
    System,
    #[default]
    App,
    Both,
}

impl NotificationStyle {
    pub fn includes_system(self) -> bool {
        matches!(self, Self::System | Self::Both)
    }

    pub fn includes_app(self) -> bool {
        matches!(self, Self::App | Self::Both)
    }
}

#[derive(Debug, Clone, Copy, Eq, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PopupPosition {
    TopRight,
    TopLeft,
    BottomLeft,
    #[default]
    BottomRight,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Settings {
    pub prevent_suspend: bool,
    pub auto_launch: bool,
    pub notification_type: NotificationStyle,
    pub notification_position: PopupPosition,
    pub minimize_to_tray: bool,
    pub show_timer_in_tray: bool,
    /// Seconds before an in-app popup closes itself; 0 keeps it open.
    pub notification_duration: u32,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            prevent_suspend: false,
            auto_launch: true,
            notification_type: NotificationStyle::App,
            notification_position: PopupPosition::BottomRight,
            minimize_to_tray: true,
            show_timer_in_tray: false,
            notification_duration: 30,
        }
    }
}

pub trait SettingsStore: Send + Sync {
    fn get(&self) -> Settings;
    fn set(&self, key: &str, value: Value) -> Result<Settings>;
}

/// Settings kept as a single JSON object in a [`KeyValueStore`].
pub struct StoredSettings {
    store: Arc<dyn KeyValueStore>,
}

impl StoredSettings {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }
}

impl SettingsStore for StoredSettings {
    fn get(&self) -> Settings {
        store::load_or_default(self.store.as_ref(), SETTINGS_KEY)
    }

    fn set(&self, key: &str, value: Value) -> Result<Settings> {
        let current = serde_json::to_value(self.get()).context("unable to encode settings")?;
        let Value::Object(mut fields) = current else {
            bail!("settings did not encode as an object");
        };
        if !fields.contains_key(key) {
            bail!("unknown setting '{key}'");
        }
        fields.insert(key.to_string(), value);
        let updated = serde_json::from_value::<Settings>(Value::Object(fields))
            .with_context(|| format!("invalid value for setting '{key}'"))?;
        let text = serde_json::to_string(&updated)?;
        self.store.put(SETTINGS_KEY, &text)?;
        log::debug!("setting '{key}' updated");
        Ok(updated)
    }
}
