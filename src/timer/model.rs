use serde::{Deserialize, Serialize};

use crate::alarm::model::DEFAULT_SOUND;

pub const MAX_RECENTS: usize = 20;
/// Persist the countdown whenever the remaining seconds hit a multiple of
/// this, instead of on every tick.
pub const PERSIST_EVERY_SECONDS: u64 = 5;

#[derive(Debug, Clone, Copy, Eq, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TimerPhase {
    Idle,
    Running,
    Paused,
    Finished,
}

impl TimerPhase {
    /// Paused counts as running; it is a sub-state of a live countdown.
    pub fn is_running(self) -> bool {
        matches!(self, Self::Running | Self::Paused)
    }

    pub fn is_paused(self) -> bool {
        self == Self::Paused
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TimerSnapshot {
    pub phase: TimerPhase,
    pub total_seconds: u64,
    pub remaining_seconds: u64,
    pub label: String,
    pub sound: String,
    pub initial_hours: u32,
    pub initial_minutes: u32,
    pub initial_seconds: u32,
}

impl Default for TimerSnapshot {
    fn default() -> Self {
        Self {
            phase: TimerPhase::Idle,
            total_seconds: 0,
            remaining_seconds: 0,
            label: String::new(),
            sound: DEFAULT_SOUND.to_string(),
            initial_hours: 0,
            initial_minutes: 0,
            initial_seconds: 0,
        }
    }
}

/// What the ring path needs once a countdown completes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FinishedTimer {
    pub label: String,
    pub sound: String,
}

/// On-disk shape of the countdown, written under `timer-state`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TimerRecord {
    pub total_seconds: u64,
    pub remaining_seconds: u64,
    pub is_running: bool,
    pub is_paused: bool,
    pub label: String,
    #[serde(rename = "soundId", alias = "soundRef")]
    pub sound: String,
    pub initial_hours: u32,
    pub initial_minutes: u32,
    pub initial_seconds: u32,
    /// Unix milliseconds of the write; drift on reload is measured from it.
    pub last_saved: i64,
}

impl Default for TimerRecord {
    fn default() -> Self {
        Self {
            total_seconds: 0,
            remaining_seconds: 0,
            is_running: false,
            is_paused: false,
            label: String::new(),
            sound: DEFAULT_SOUND.to_string(),
            initial_hours: 0,
            initial_minutes: 0,
            initial_seconds: 0,
            last_saved: 0,
        }
    }
}

impl TimerRecord {
    pub fn capture(snapshot: &TimerSnapshot, saved_at_ms: i64) -> Self {
        Self {
            total_seconds: snapshot.total_seconds,
            remaining_seconds: snapshot.remaining_seconds,
            is_running: snapshot.phase.is_running(),
            is_paused: snapshot.phase.is_paused(),
            label: snapshot.label.clone(),
            sound: snapshot.sound.clone(),
            initial_hours: snapshot.initial_hours,
            initial_minutes: snapshot.initial_minutes,
            initial_seconds: snapshot.initial_seconds,
            last_saved: saved_at_ms,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecentTimer {
    pub id: String,
    pub hours: u32,
    pub minutes: u32,
    pub seconds: u32,
    #[serde(default)]
    pub label: String,
    #[serde(rename = "soundId", alias = "soundRef", default = "default_sound")]
    pub sound: String,
    #[serde(default)]
    pub timestamp: i64,
}

impl RecentTimer {
    fn same_config(&self, draft: &RecentDraft) -> bool {
        self.hours == draft.hours
            && self.minutes == draft.minutes
            && self.seconds == draft.seconds
            && self.label == draft.label
            && self.sound == draft.sound
    }

    pub fn total_seconds(&self) -> u64 {
        duration_seconds(self.hours, self.minutes, self.seconds)
    }
}

/// A timer configuration to remember.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecentDraft {
    pub hours: u32,
    pub minutes: u32,
    pub seconds: u32,
    pub label: String,
    pub sound: String,
}

#[derive(Debug, Clone, Default)]
pub struct RecentPatch {
    pub hours: Option<u32>,
    pub minutes: Option<u32>,
    pub seconds: Option<u32>,
    pub label: Option<String>,
    pub sound: Option<String>,
}

impl RecentPatch {
    pub(crate) fn apply_to(self, recent: &mut RecentTimer) {
        if let Some(hours) = self.hours {
            recent.hours = hours;
        }
        if let Some(minutes) = self.minutes {
            recent.minutes = minutes;
        }
        if let Some(seconds) = self.seconds {
            recent.seconds = seconds;
        }
        if let Some(label) = self.label {
            recent.label = label;
        }
        if let Some(sound) = self.sound {
            recent.sound = sound;
        }
    }
}

/// Puts `draft` at the front of `recents`, replacing an entry with the same
/// configuration, and evicts the oldest entries beyond [`MAX_RECENTS`].
pub fn push_recent(
    recents: &mut Vec<RecentTimer>,
    draft: RecentDraft,
    id: String,
    timestamp: i64,
) -> RecentTimer {
    recents.retain(|existing| !existing.same_config(&draft));
    let entry = RecentTimer {
        id,
        hours: draft.hours,
        minutes: draft.minutes,
        seconds: draft.seconds,
        label: draft.label,
        sound: draft.sound,
        timestamp,
    };
    recents.insert(0, entry.clone());
    recents.truncate(MAX_RECENTS);
    entry
}

pub fn duration_seconds(hours: u32, minutes: u32, seconds: u32) -> u64 {
    u64::from(hours) * 3_600 + u64::from(minutes) * 60 + u64::from(seconds)
}

pub fn format_countdown(total_seconds: u64) -> String {
    let hours = total_seconds / 3_600;
    let minutes = (total_seconds % 3_600) / 60;
    let seconds = total_seconds % 60;
    format!("{hours:02}:{minutes:02}:{seconds:02}")
}

fn default_sound() -> String {
    DEFAULT_SOUND.to_string()
}
