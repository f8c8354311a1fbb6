use std::sync::Arc;
use std::sync::mpsc::Receiver;

use chrono::{DateTime, Local};

use crate::error::{ClockError, ClockResult};
use crate::events::EventHub;
use crate::ids::MonotonicIds;
use crate::platform::PowerBlocker;
use crate::store::{self, KeyValueStore, TIMER_RECENTS_KEY, TIMER_STATE_KEY};
use crate::timer::model::{
    FinishedTimer, MAX_RECENTS, PERSIST_EVERY_SECONDS, RecentDraft, RecentPatch, RecentTimer,
    TimerPhase, TimerRecord, TimerSnapshot, duration_seconds, push_recent,
};

#[derive(Debug, Clone, PartialEq)]
pub enum TimerEvent {
    Updated(TimerSnapshot),
    Finished(TimerSnapshot),
    RecentsUpdated,
}

/// The single countdown timer.
///
/// `Idle -> Running -> {Paused <-> Running} -> Finished -> Idle`, with
/// `cancel` returning any live countdown to `Idle`.
pub struct TimerEngine {
    store: Arc<dyn KeyValueStore>,
    power: Option<Box<dyn PowerBlocker>>,
    prevent_suspend: bool,
    state: TimerSnapshot,
    pending_finish: Option<FinishedTimer>,
    recents: Vec<RecentTimer>,
    ids: MonotonicIds,
    events: EventHub<TimerEvent>,
}

impl TimerEngine {
    /// Restores the countdown and recents, accounting for the wall-clock
    /// time that passed since the last write when the timer was running.
    pub fn load(
        store: Arc<dyn KeyValueStore>,
        power: Option<Box<dyn PowerBlocker>>,
        prevent_suspend: bool,
        now: DateTime<Local>,
    ) -> Self {
        let record = store::load_optional::<TimerRecord>(store.as_ref(), TIMER_STATE_KEY);
        let (state, pending_finish) = match record {
            Some(record) => restore(record, now),
            None => (TimerSnapshot::default(), None),
        };

        let mut recents: Vec<RecentTimer> =
            store::load_or_default(store.as_ref(), TIMER_RECENTS_KEY);
        recents.truncate(MAX_RECENTS);
        let last_id = recents
            .iter()
            .filter_map(|recent| recent.id.parse::<i64>().ok())
            .max()
            .unwrap_or(0);

        let mut engine = Self {
            store,
            power,
            prevent_suspend,
            state,
            pending_finish,
            recents,
            ids: MonotonicIds::starting_after(last_id),
            events: EventHub::default(),
        };
        if engine.state.phase == TimerPhase::Running {
            engine.update_power();
        }
        engine
    }

    pub fn subscribe(&mut self) -> Receiver<TimerEvent> {
        self.events.subscribe()
    }

    pub fn snapshot(&self) -> TimerSnapshot {
        self.state.clone()
    }

    pub fn phase(&self) -> TimerPhase {
        self.state.phase
    }

    pub fn remaining_seconds(&self) -> u64 {
        self.state.remaining_seconds
    }

    /// A countdown that ran out while the process was down; delivered by the
    /// next [`tick`](Self::tick).
    pub fn has_pending_finish(&self) -> bool {
        self.pending_finish.is_some()
    }

    pub fn start(
        &mut self,
        hours: u32,
        minutes: u32,
        seconds: u32,
        label: &str,
        sound: &str,
        now: DateTime<Local>,
    ) -> ClockResult<TimerSnapshot> {
        let total_seconds = duration_seconds(hours, minutes, seconds);
        if total_seconds == 0 {
            return Err(ClockError::EmptyDuration);
        }

        self.state = TimerSnapshot {
            phase: TimerPhase::Running,
            total_seconds,
            remaining_seconds: total_seconds,
            label: label.to_string(),
            sound: sound.to_string(),
            initial_hours: hours,
            initial_minutes: minutes,
            initial_seconds: seconds,
        };
        log::info!("timer started for {total_seconds}s");

        self.add_recent(
            RecentDraft {
                hours,
                minutes,
                seconds,
                label: label.to_string(),
                sound: sound.to_string(),
            },
            now,
        );
        self.persist(now);
        self.events.emit(TimerEvent::Updated(self.snapshot()));
        self.update_power();
        Ok(self.snapshot())
    }

    /// Restarts the last countdown from its original picker values.
    pub fn repeat(&mut self, now: DateTime<Local>) -> ClockResult<TimerSnapshot> {
        let TimerSnapshot {
            initial_hours,
            initial_minutes,
            initial_seconds,
            label,
            sound,
            ..
        } = self.snapshot();
        self.start(
            initial_hours,
            initial_minutes,
            initial_seconds,
            &label,
            &sound,
            now,
        )
    }

    /// One second of countdown. Returns the finished timer on the tick that
    /// completes it.
    pub fn tick(&mut self, now: DateTime<Local>) -> Option<FinishedTimer> {
        if let Some(finished) = self.pending_finish.take() {
            log::info!("delivering timer that expired while closed");
            self.persist(now);
            self.update_power();
            self.events.emit(TimerEvent::Finished(self.snapshot()));
            return Some(finished);
        }

        if self.state.phase != TimerPhase::Running {
            return None;
        }
        if self.state.remaining_seconds == 0 {
            return Some(self.finish(now));
        }

        self.state.remaining_seconds -= 1;
        if self.state.remaining_seconds % PERSIST_EVERY_SECONDS == 0 {
            self.persist(now);
        }
        self.events.emit(TimerEvent::Updated(self.snapshot()));
        None
    }

    pub fn pause(&mut self, now: DateTime<Local>) -> bool {
        if self.state.phase != TimerPhase::Running {
            return false;
        }
        self.state.phase = TimerPhase::Paused;
        self.persist(now);
        self.events.emit(TimerEvent::Updated(self.snapshot()));
        self.update_power();
        true
    }

    pub fn resume(&mut self, now: DateTime<Local>) -> bool {
        if self.state.phase != TimerPhase::Paused {
            return false;
        }
        self.state.phase = TimerPhase::Running;
        self.persist(now);
        self.events.emit(TimerEvent::Updated(self.snapshot()));
        self.update_power();
        true
    }

    pub fn cancel(&mut self, now: DateTime<Local>) {
        self.state.phase = TimerPhase::Idle;
        self.state.remaining_seconds = 0;
        self.pending_finish = None;
        log::debug!("timer cancelled");
        self.persist(now);
        self.events.emit(TimerEvent::Updated(self.snapshot()));
        self.update_power();
    }

    /// Applies a change of the keep-awake preference immediately.
    pub fn set_prevent_suspend(&mut self, enabled: bool) {
        self.prevent_suspend = enabled;
        self.update_power();
    }

    pub fn recents(&self) -> &[RecentTimer] {
        &self.recents
    }

    pub fn add_recent(&mut self, draft: RecentDraft, now: DateTime<Local>) -> RecentTimer {
        let id = self.ids.next(now);
        let entry = push_recent(&mut self.recents, draft, id.to_string(), now.timestamp_millis());
        self.persist_recents();
        entry
    }

    pub fn update_recent(&mut self, id: &str, patch: RecentPatch) -> ClockResult<RecentTimer> {
        let recent = self
            .recents
            .iter_mut()
            .find(|recent| recent.id == id)
            .ok_or_else(|| ClockError::UnknownRecent(id.to_string()))?;
        patch.apply_to(recent);
        let updated = recent.clone();
        self.persist_recents();
        Ok(updated)
    }

    pub fn delete_recent(&mut self, id: &str) -> ClockResult<RecentTimer> {
        let index = self
            .recents
            .iter()
            .position(|recent| recent.id == id)
            .ok_or_else(|| ClockError::UnknownRecent(id.to_string()))?;
        let removed = self.recents.remove(index);
        self.persist_recents();
        Ok(removed)
    }

    fn finish(&mut self, now: DateTime<Local>) -> FinishedTimer {
        self.state.phase = TimerPhase::Finished;
        self.state.remaining_seconds = 0;
        log::info!("timer finished ({})", self.state.label);
        self.persist(now);
        self.update_power();
        self.events.emit(TimerEvent::Finished(self.snapshot()));
        FinishedTimer {
            label: self.state.label.clone(),
            sound: self.state.sound.clone(),
        }
    }

    fn update_power(&mut self) {
        let keep_awake = self.prevent_suspend && self.state.phase == TimerPhase::Running;
        if let Some(power) = self.power.as_mut() {
            power.request(keep_awake);
        }
    }

    fn persist(&self, now: DateTime<Local>) {
        let record = TimerRecord::capture(&self.state, now.timestamp_millis());
        store::save(self.store.as_ref(), TIMER_STATE_KEY, &record);
    }

    fn persist_recents(&mut self) {
        store::save(self.store.as_ref(), TIMER_RECENTS_KEY, &self.recents);
        self.events.emit(TimerEvent::RecentsUpdated);
    }
}

fn restore(record: TimerRecord, now: DateTime<Local>) -> (TimerSnapshot, Option<FinishedTimer>) {
    let mut state = TimerSnapshot {
        phase: TimerPhase::Idle,
        total_seconds: record.total_seconds,
        remaining_seconds: 0,
        label: record.label,
        sound: record.sound,
        initial_hours: record.initial_hours,
        initial_minutes: record.initial_minutes,
        initial_seconds: record.initial_seconds,
    };
    if !record.is_running {
        return (state, None);
    }

    if record.is_paused {
        state.phase = TimerPhase::Paused;
        state.remaining_seconds = record.remaining_seconds;
        return (state, None);
    }

    let elapsed_ms = now.timestamp_millis().saturating_sub(record.last_saved).max(0);
    let elapsed = u64::try_from(elapsed_ms / 1_000).unwrap_or(u64::MAX);
    state.remaining_seconds = record.remaining_seconds.saturating_sub(elapsed);
    if state.remaining_seconds > 0 {
        log::debug!(
            "timer resumed after {elapsed}s away, {}s left",
            state.remaining_seconds
        );
        state.phase = TimerPhase::Running;
        return (state, None);
    }

    state.phase = TimerPhase::Finished;
    let finished = FinishedTimer {
        label: state.label.clone(),
        sound: state.sound.clone(),
    };
    (state, Some(finished))
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use chrono::TimeZone;

    use super::*;
    use crate::store::MemoryStore;

    fn t0() -> DateTime<Local> {
        Local
            .timestamp_opt(1_780_000_000, 0)
            .single()
            .expect("valid epoch")
    }

    fn after(seconds: i64) -> DateTime<Local> {
        t0() + chrono::Duration::seconds(seconds)
    }

    #[derive(Clone, Default)]
    struct RecordingPower {
        requests: Arc<Mutex<Vec<bool>>>,
    }

    impl PowerBlocker for RecordingPower {
        fn request(&mut self, enabled: bool) {
            self.requests.lock().expect("lock").push(enabled);
        }
    }

    fn engine(store: Arc<MemoryStore>) -> TimerEngine {
        TimerEngine::load(store, None, false, t0())
    }

    #[test]
    fn ten_second_timer_finishes_on_eleventh_tick() {
        let mut engine = engine(Arc::new(MemoryStore::new()));
        let events = engine.subscribe();
        engine
            .start(0, 0, 10, "tea", "default", t0())
            .expect("non-zero duration");

        let mut finished = Vec::new();
        for second in 1..=11 {
            if let Some(done) = engine.tick(after(second)) {
                finished.push(done);
            }
        }
        assert_eq!(engine.phase(), TimerPhase::Finished);
        assert_eq!(engine.remaining_seconds(), 0);
        assert_eq!(finished.len(), 1);
        assert_eq!(finished[0].label, "tea");

        assert!(engine.tick(after(12)).is_none());
        let finish_events = events
            .try_iter()
            .filter(|event| matches!(event, TimerEvent::Finished(_)))
            .count();
        assert_eq!(finish_events, 1);
    }

    #[test]
    fn zero_duration_is_rejected() {
        let store = Arc::new(MemoryStore::new());
        let mut engine = engine(store.clone());
        let err = engine.start(0, 0, 0, "", "default", t0()).expect_err("empty");
        assert!(matches!(err, ClockError::EmptyDuration));
        assert_eq!(engine.phase(), TimerPhase::Idle);
        assert!(engine.recents().is_empty());
        assert_eq!(store.get(TIMER_STATE_KEY).expect("get"), None);
    }

    #[test]
    fn paused_timer_does_not_count_down() {
        let mut engine = engine(Arc::new(MemoryStore::new()));
        engine.start(0, 1, 0, "", "default", t0()).expect("valid");
        engine.tick(after(1));
        assert!(engine.pause(after(1)));
        engine.tick(after(2));
        engine.tick(after(3));
        assert_eq!(engine.remaining_seconds(), 59);
        assert_eq!(engine.phase(), TimerPhase::Paused);
        assert!(!engine.pause(after(3)));

        assert!(engine.resume(after(4)));
        engine.tick(after(5));
        assert_eq!(engine.remaining_seconds(), 58);
    }

    #[test]
    fn cancel_returns_to_idle() {
        let mut engine = engine(Arc::new(MemoryStore::new()));
        engine.start(0, 1, 0, "", "default", t0()).expect("valid");
        engine.cancel(after(1));
        assert_eq!(engine.phase(), TimerPhase::Idle);
        assert_eq!(engine.remaining_seconds(), 0);
        assert!(engine.tick(after(2)).is_none());
    }

    #[test]
    fn persists_every_fifth_second() {
        let store = Arc::new(MemoryStore::new());
        let mut engine = engine(store.clone());
        engine.start(0, 0, 12, "", "default", t0()).expect("valid");
        engine.tick(after(1));
        let saved: TimerRecord = store::load_or_default(&*store, TIMER_STATE_KEY);
        assert_eq!(saved.remaining_seconds, 12);

        engine.tick(after(2));
        let saved: TimerRecord = store::load_or_default(&*store, TIMER_STATE_KEY);
        assert_eq!(saved.remaining_seconds, 10);
        assert_eq!(saved.last_saved, after(2).timestamp_millis());
    }

    #[test]
    fn running_timer_recovers_drift_on_reload() {
        let store = Arc::new(MemoryStore::new());
        let record = TimerRecord {
            total_seconds: 120,
            remaining_seconds: 100,
            is_running: true,
            last_saved: t0().timestamp_millis() - 30_000,
            ..TimerRecord::default()
        };
        store::save(&*store, TIMER_STATE_KEY, &record);
        let engine = engine(store);
        assert_eq!(engine.phase(), TimerPhase::Running);
        assert_eq!(engine.remaining_seconds(), 70);
    }

    #[test]
    fn paused_timer_reloads_without_drift() {
        let store = Arc::new(MemoryStore::new());
        let record = TimerRecord {
            total_seconds: 120,
            remaining_seconds: 100,
            is_running: true,
            is_paused: true,
            last_saved: t0().timestamp_millis() - 30_000,
            ..TimerRecord::default()
        };
        store::save(&*store, TIMER_STATE_KEY, &record);
        let engine = engine(store);
        assert_eq!(engine.phase(), TimerPhase::Paused);
        assert_eq!(engine.remaining_seconds(), 100);
    }

    #[test]
    fn expired_timer_finishes_on_first_tick_after_reload() {
        let store = Arc::new(MemoryStore::new());
        let record = TimerRecord {
            total_seconds: 60,
            remaining_seconds: 20,
            is_running: true,
            label: "laundry".to_string(),
            last_saved: t0().timestamp_millis() - 90_000,
            ..TimerRecord::default()
        };
        store::save(&*store, TIMER_STATE_KEY, &record);
        let mut engine = engine(store);
        assert_eq!(engine.phase(), TimerPhase::Finished);
        assert!(engine.has_pending_finish());

        let finished = engine.tick(after(1)).expect("pending finish delivered");
        assert_eq!(finished.label, "laundry");
        assert!(engine.tick(after(2)).is_none());
    }

    #[test]
    fn corrupt_state_loads_idle() {
        let store = Arc::new(MemoryStore::new());
        store.put(TIMER_STATE_KEY, "{\"isRunning\": \"yes\"").expect("put");
        store.put(TIMER_RECENTS_KEY, "42").expect("put");
        let engine = engine(store);
        assert_eq!(engine.phase(), TimerPhase::Idle);
        assert!(engine.recents().is_empty());
    }

    #[test]
    fn starting_same_config_twice_keeps_one_recent() {
        let store = Arc::new(MemoryStore::new());
        let mut engine = engine(store.clone());
        engine.start(0, 5, 0, "eggs", "default", t0()).expect("valid");
        engine.start(0, 3, 0, "tea", "default", after(1)).expect("valid");
        engine.start(0, 5, 0, "eggs", "default", after(2)).expect("valid");

        assert_eq!(engine.recents().len(), 2);
        assert_eq!(engine.recents()[0].label, "eggs");
        assert_eq!(engine.recents()[1].label, "tea");

        let reloaded = TimerEngine::load(store, None, false, after(3));
        assert_eq!(reloaded.recents(), engine.recents());
    }

    #[test]
    fn recents_can_be_edited_and_removed() {
        let mut engine = engine(Arc::new(MemoryStore::new()));
        let events = engine.subscribe();
        engine.start(0, 5, 0, "eggs", "default", t0()).expect("valid");
        let id = engine.recents()[0].id.clone();

        let updated = engine
            .update_recent(
                &id,
                RecentPatch {
                    label: Some("soft eggs".to_string()),
                    minutes: Some(6),
                    ..RecentPatch::default()
                },
            )
            .expect("known recent");
        assert_eq!(updated.label, "soft eggs");
        assert_eq!(updated.total_seconds(), 360);

        engine.delete_recent(&id).expect("known recent");
        assert!(engine.recents().is_empty());
        assert!(matches!(
            engine.delete_recent(&id),
            Err(ClockError::UnknownRecent(_))
        ));

        let recents_events = events
            .try_iter()
            .filter(|event| *event == TimerEvent::RecentsUpdated)
            .count();
        assert_eq!(recents_events, 3);
    }

    #[test]
    fn repeat_restarts_initial_duration() {
        let mut engine = engine(Arc::new(MemoryStore::new()));
        engine.start(0, 0, 3, "plank", "default", t0()).expect("valid");
        for second in 1..=4 {
            engine.tick(after(second));
        }
        assert_eq!(engine.phase(), TimerPhase::Finished);

        let snapshot = engine.repeat(after(5)).expect("repeatable");
        assert_eq!(snapshot.phase, TimerPhase::Running);
        assert_eq!(snapshot.remaining_seconds, 3);
        assert_eq!(snapshot.label, "plank");
    }

    #[test]
    fn keep_awake_follows_running_state() {
        let power = RecordingPower::default();
        let requests = power.requests.clone();
        let mut engine = TimerEngine::load(
            Arc::new(MemoryStore::new()),
            Some(Box::new(power)),
            true,
            t0(),
        );
        engine.start(0, 0, 2, "", "default", t0()).expect("valid");
        engine.pause(after(1));
        engine.resume(after(2));
        engine.set_prevent_suspend(false);
        engine.cancel(after(3));

        let requests = requests.lock().expect("lock").clone();
        assert_eq!(requests, vec![true, false, true, false, false]);
    }
}
