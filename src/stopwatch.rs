use std::sync::Arc;

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};

use crate::store::{self, KeyValueStore, STOPWATCH_KEY};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Lap {
    pub lap_time: i64,
    pub total_time: i64,
}

/// All times in milliseconds. The start instant is wall-clock so a running
/// stopwatch keeps counting across restarts.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct StopwatchRecord {
    start_time: i64,
    elapsed_so_far: i64,
    is_running: bool,
    laps: Vec<Lap>,
    previous_lap_time: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StopwatchSnapshot {
    pub elapsed_ms: i64,
    pub is_running: bool,
    pub laps: Vec<Lap>,
}

pub struct Stopwatch {
    store: Arc<dyn KeyValueStore>,
    state: StopwatchRecord,
}

impl Stopwatch {
    pub fn load(store: Arc<dyn KeyValueStore>) -> Self {
        let state = store::load_or_default(store.as_ref(), STOPWATCH_KEY);
        Self { store, state }
    }

    pub fn elapsed_ms(&self, now: DateTime<Local>) -> i64 {
        if !self.state.is_running {
            return self.state.elapsed_so_far;
        }
        let running_for = now
            .timestamp_millis()
            .saturating_sub(self.state.start_time)
            .max(0);
        self.state.elapsed_so_far.saturating_add(running_for)
    }

    pub fn is_running(&self) -> bool {
        self.state.is_running
    }

    /// Newest lap first.
    pub fn laps(&self) -> &[Lap] {
        &self.state.laps
    }

    pub fn start(&mut self, now: DateTime<Local>) -> bool {
        if self.state.is_running {
            return false;
        }
        self.state.start_time = now.timestamp_millis();
        self.state.is_running = true;
        self.persist();
        true
    }

    pub fn stop(&mut self, now: DateTime<Local>) -> bool {
        if !self.state.is_running {
            return false;
        }
        self.state.elapsed_so_far = self.elapsed_ms(now);
        self.state.is_running = false;
        self.persist();
        true
    }

    pub fn lap(&mut self, now: DateTime<Local>) -> Lap {
        let total_time = self.elapsed_ms(now);
        let lap = Lap {
            lap_time: total_time - self.state.previous_lap_time,
            total_time,
        };
        self.state.laps.insert(0, lap);
        self.state.previous_lap_time = total_time;
        self.persist();
        lap
    }

    pub fn reset(&mut self) {
        self.state = StopwatchRecord::default();
        self.persist();
    }

    pub fn snapshot(&self, now: DateTime<Local>) -> StopwatchSnapshot {
        StopwatchSnapshot {
            elapsed_ms: self.elapsed_ms(now),
            is_running: self.state.is_running,
            laps: self.state.laps.clone(),
        }
    }

    fn persist(&self) {
        store::save(self.store.as_ref(), STOPWATCH_KEY, &self.state);
    }
}

pub fn format_elapsed(elapsed_ms: i64) -> String {
    let elapsed_ms = elapsed_ms.max(0);
    let centis = (elapsed_ms % 1_000) / 10;
    let total_seconds = elapsed_ms / 1_000;
    let minutes = total_seconds / 60;
    let seconds = total_seconds % 60;
    format!("{minutes:02}:{seconds:02}.{centis:02}")
}
