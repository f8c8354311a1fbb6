use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::sync::mpsc::Receiver;

use chrono::{DateTime, Local, Timelike};

use crate::alarm::model::{Alarm, AlarmDraft, AlarmId, AlarmPatch, AlarmTime, validate_alarms};
use crate::error::{ClockError, ClockResult};
use crate::events::EventHub;
use crate::ids::MonotonicIds;
use crate::store::{self, ALARMS_KEY, KeyValueStore, SNOOZES_KEY};

#[derive(Debug, Clone, PartialEq)]
pub enum AlarmEvent {
    Changed,
    Ringing { alarm: Alarm, is_snooze: bool },
    Stopped { id: AlarmId },
}

/// An alarm that started ringing during a tick.
#[derive(Debug, Clone, PartialEq)]
pub struct AlarmRing {
    pub alarm: Alarm,
    pub is_snooze: bool,
}

#[derive(Debug, Clone, Copy, Default, Eq, PartialEq)]
pub struct StopOutcome {
    pub was_ringing: bool,
    /// Nothing is ringing any more; the shared audio channel and any popup
    /// should be shut down.
    pub channel_idle: bool,
}

pub struct AlarmScheduler {
    store: Arc<dyn KeyValueStore>,
    alarms: Vec<Alarm>,
    snoozed: BTreeMap<AlarmId, AlarmTime>,
    ringing: BTreeSet<AlarmId>,
    last_evaluated_slot: Option<i64>,
    ids: MonotonicIds,
    events: EventHub<AlarmEvent>,
}

impl AlarmScheduler {
    /// Loads alarms and pending snoozes. Corrupt blobs are replaced with
    /// empty collections.
    pub fn load(store: Arc<dyn KeyValueStore>) -> Self {
        let alarms = match store::load_optional::<Vec<Alarm>>(store.as_ref(), ALARMS_KEY) {
            Some(alarms) => match validate_alarms(&alarms) {
                Ok(()) => alarms,
                Err(reason) => {
                    log::warn!("discarding stored alarms: {reason}");
                    Vec::new()
                }
            },
            None => Vec::new(),
        };

        let mut snoozed: BTreeMap<AlarmId, AlarmTime> =
            store::load_or_default(store.as_ref(), SNOOZES_KEY);
        let before = snoozed.len();
        snoozed.retain(|id, _| alarms.iter().any(|alarm| alarm.id == *id));
        if snoozed.len() != before {
            log::warn!(
                "dropped {} snooze(s) for alarms that no longer exist",
                before - snoozed.len()
            );
        }

        let last_id = alarms.iter().map(|alarm| alarm.id).max().unwrap_or(0);
        log::debug!(
            "loaded {} alarm(s), {} pending snooze(s)",
            alarms.len(),
            snoozed.len()
        );
        Self {
            store,
            alarms,
            snoozed,
            ringing: BTreeSet::new(),
            last_evaluated_slot: None,
            ids: MonotonicIds::starting_after(last_id),
            events: EventHub::default(),
        }
    }

    pub fn subscribe(&mut self) -> Receiver<AlarmEvent> {
        self.events.subscribe()
    }

    pub fn alarms(&self) -> &[Alarm] {
        &self.alarms
    }

    pub fn get(&self, id: AlarmId) -> Option<&Alarm> {
        self.alarms.iter().find(|alarm| alarm.id == id)
    }

    pub fn snoozed(&self) -> &BTreeMap<AlarmId, AlarmTime> {
        &self.snoozed
    }

    pub fn ringing(&self) -> &BTreeSet<AlarmId> {
        &self.ringing
    }

    pub fn is_ringing(&self, id: AlarmId) -> bool {
        self.ringing.contains(&id)
    }

    pub fn len(&self) -> usize {
        self.alarms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.alarms.is_empty()
    }

    pub fn add_alarm(&mut self, draft: AlarmDraft, now: DateTime<Local>) -> ClockResult<Alarm> {
        let alarm = draft.into_alarm(self.ids.next(now))?;
        log::debug!("alarm {} added for {}", alarm.id, alarm.time);
        self.alarms.push(alarm.clone());
        self.persist_alarms();
        self.events.emit(AlarmEvent::Changed);
        Ok(alarm)
    }

    pub fn update_alarm(&mut self, id: AlarmId, patch: AlarmPatch) -> ClockResult<Alarm> {
        let alarm = self
            .alarms
            .iter_mut()
            .find(|alarm| alarm.id == id)
            .ok_or(ClockError::UnknownAlarm(id))?;
        alarm.apply(patch)?;
        let updated = alarm.clone();
        if !updated.enabled {
            self.clear_snooze(id);
        }
        self.persist_alarms();
        self.events.emit(AlarmEvent::Changed);
        Ok(updated)
    }

    /// Flips `enabled` and returns the new value. Disabling drops any
    /// pending snooze so the alarm cannot re-fire.
    pub fn toggle_alarm(&mut self, id: AlarmId) -> ClockResult<bool> {
        let alarm = self
            .alarms
            .iter_mut()
            .find(|alarm| alarm.id == id)
            .ok_or(ClockError::UnknownAlarm(id))?;
        alarm.enabled = !alarm.enabled;
        let enabled = alarm.enabled;
        if !enabled {
            self.clear_snooze(id);
        }
        self.persist_alarms();
        self.events.emit(AlarmEvent::Changed);
        Ok(enabled)
    }

    /// Removes the alarm and its pending snooze. A ring already in progress
    /// keeps sounding until it is stopped by id.
    pub fn delete_alarm(&mut self, id: AlarmId) -> ClockResult<Alarm> {
        let index = self
            .alarms
            .iter()
            .position(|alarm| alarm.id == id)
            .ok_or(ClockError::UnknownAlarm(id))?;
        let removed = self.alarms.remove(index);
        self.clear_snooze(id);
        self.persist_alarms();
        self.events.emit(AlarmEvent::Changed);
        Ok(removed)
    }

    /// Due-alarm evaluation, called once per second. Work only happens on
    /// second zero and at most once per minute, so alarms whose minute was
    /// slept through are not caught up.
    pub fn tick(&mut self, now: DateTime<Local>) -> Vec<AlarmRing> {
        if now.second() != 0 {
            return Vec::new();
        }
        let slot = now.timestamp().div_euclid(60);
        if self.last_evaluated_slot == Some(slot) {
            return Vec::new();
        }
        self.last_evaluated_slot = Some(slot);

        let mut rings = Vec::new();
        let mut auto_disabled = false;
        for index in 0..self.alarms.len() {
            if !self.alarms[index].is_due(&now) {
                continue;
            }
            let alarm = self.alarms[index].clone();
            if let Some(ring) = self.trigger(alarm, false) {
                rings.push(ring);
            }
            if self.alarms[index].is_one_shot() {
                self.alarms[index].enabled = false;
                auto_disabled = true;
            }
        }

        let current = AlarmTime::of(&now);
        let due_snoozes = self
            .snoozed
            .iter()
            .filter(|(_, until)| **until == current)
            .map(|(id, _)| *id)
            .collect::<Vec<_>>();
        for id in &due_snoozes {
            self.snoozed.remove(id);
            match self.get(*id).cloned() {
                Some(alarm) => {
                    if let Some(ring) = self.trigger(alarm, true) {
                        rings.push(ring);
                    }
                }
                None => log::warn!("snooze for missing alarm {id} dropped"),
            }
        }

        if auto_disabled {
            self.persist_alarms();
        }
        if !due_snoozes.is_empty() {
            self.persist_snoozes();
        }
        if auto_disabled || !due_snoozes.is_empty() {
            self.events.emit(AlarmEvent::Changed);
        }
        rings
    }

    /// Stops the ring for `id` and schedules a re-fire `snooze_minutes`
    /// after the current minute.
    pub fn snooze_alarm(&mut self, id: AlarmId, now: DateTime<Local>) -> ClockResult<AlarmTime> {
        let minutes = self
            .get(id)
            .map(Alarm::snooze_minutes)
            .ok_or(ClockError::UnknownAlarm(id))?;
        self.stop_alarm(id);
        let until = AlarmTime::of(&now).plus_minutes(minutes);
        self.snoozed.insert(id, until);
        log::info!("alarm {id} snoozed for {minutes} min, next ring at {until}");
        self.persist_snoozes();
        self.events.emit(AlarmEvent::Changed);
        Ok(until)
    }

    pub fn stop_alarm(&mut self, id: AlarmId) -> StopOutcome {
        let was_ringing = self.ringing.remove(&id);
        if was_ringing {
            log::debug!("alarm {id} stopped");
            self.events.emit(AlarmEvent::Stopped { id });
        }
        StopOutcome {
            was_ringing,
            channel_idle: self.ringing.is_empty(),
        }
    }

    fn trigger(&mut self, alarm: Alarm, is_snooze: bool) -> Option<AlarmRing> {
        if !self.ringing.insert(alarm.id) {
            log::debug!("alarm {} already ringing, not re-triggered", alarm.id);
            return None;
        }
        log::info!(
            "alarm {} ringing ({}){}",
            alarm.id,
            alarm.label,
            if is_snooze { " after snooze" } else { "" }
        );
        self.events.emit(AlarmEvent::Ringing {
            alarm: alarm.clone(),
            is_snooze,
        });
        Some(AlarmRing { alarm, is_snooze })
    }

    fn clear_snooze(&mut self, id: AlarmId) {
        if self.snoozed.remove(&id).is_some() {
            self.persist_snoozes();
        }
    }

    fn persist_alarms(&self) {
        store::save(self.store.as_ref(), ALARMS_KEY, &self.alarms);
    }

    fn persist_snoozes(&self) {
        store::save(self.store.as_ref(), SNOOZES_KEY, &self.snoozed);
    }
}
