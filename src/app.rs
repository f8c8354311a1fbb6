use std::sync::Arc;
use std::sync::mpsc::Sender;

use anyhow::Result;
use chrono::{DateTime, Local};
use serde_json::Value;

use crate::alarm::model::{AlarmId, AlarmTime};
use crate::alarm::scheduler::{AlarmRing, AlarmScheduler, StopOutcome};
use crate::error::ClockResult;
use crate::notify::{NotificationBridge, PopupAction, PopupActionKind, RingId, RingNotice};
use crate::platform::{
    AudioOutput, PlatformCapabilities, PopupHost, PowerBlocker, SoundFileStore, SystemNotifier,
};
use crate::settings::{Settings, SettingsStore};
use crate::sound::SoundLibrary;
use crate::stopwatch::Stopwatch;
use crate::store::KeyValueStore;
use crate::timer::engine::TimerEngine;
use crate::timer::model::{FinishedTimer, TimerPhase, TimerSnapshot};
use crate::world_clock::WorldClocks;

pub const ALARM_TITLE: &str = "Alarm";
pub const TIMER_TITLE: &str = "Timer Finished";
pub const TIMER_FALLBACK_BODY: &str = "Time is up!";

/// Everything the engine needs from its host.
pub struct Collaborators {
    pub store: Arc<dyn KeyValueStore>,
    pub settings: Arc<dyn SettingsStore>,
    pub capabilities: PlatformCapabilities,
    pub audio: Box<dyn AudioOutput>,
    pub system_notifier: Box<dyn SystemNotifier>,
    pub popup: Box<dyn PopupHost>,
    pub power: Option<Box<dyn PowerBlocker>>,
    pub sound_files: Option<Box<dyn SoundFileStore>>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct TickReport {
    pub alarm_rings: Vec<AlarmRing>,
    pub timer_finished: Option<FinishedTimer>,
    pub actions: Vec<PopupAction>,
}

impl TickReport {
    pub fn is_quiet(&self) -> bool {
        self.alarm_rings.is_empty() && self.timer_finished.is_none() && self.actions.is_empty()
    }
}

pub struct ClockApp {
    settings: Arc<dyn SettingsStore>,
    alarms: AlarmScheduler,
    timer: TimerEngine,
    sounds: SoundLibrary,
    stopwatch: Stopwatch,
    world_clocks: WorldClocks,
    bridge: NotificationBridge,
    timer_ringing: bool,
    /// Ring whose sound was last started on the shared channel.
    channel_owner: Option<RingId>,
}

impl ClockApp {
    pub fn new(collab: Collaborators, now: DateTime<Local>) -> Self {
        let Collaborators {
            store,
            settings,
            capabilities,
            audio,
            system_notifier,
            popup,
            power,
            sound_files,
        } = collab;

        let power = if capabilities.power_blocker {
            power
        } else {
            None
        };
        let current = settings.get();
        log::info!(
            "clock engine starting ({:?} tier, {:?} notifications)",
            capabilities.tier,
            current.notification_type
        );

        Self {
            alarms: AlarmScheduler::load(store.clone()),
            timer: TimerEngine::load(store.clone(), power, current.prevent_suspend, now),
            sounds: SoundLibrary::load(store.clone(), capabilities, sound_files, audio),
            stopwatch: Stopwatch::load(store.clone()),
            world_clocks: WorldClocks::load(store),
            bridge: NotificationBridge::new(settings.clone(), system_notifier, popup),
            settings,
            timer_ringing: false,
            channel_owner: None,
        }
    }

    /// One pass of the 1 Hz loop: pending popup actions first, then the
    /// alarm due-check, then the countdown.
    pub fn tick(&mut self, now: DateTime<Local>) -> TickReport {
        if self.timer_ringing && self.timer.phase() != TimerPhase::Finished {
            log::debug!("timer left the finished state, ending its ring");
            self.stop_timer_ring();
        }

        let actions = self.bridge.drain_actions();
        for action in &actions {
            if let Err(err) = self.handle_action(*action, now) {
                log::warn!("popup action {:?} for {} failed: {err}", action.kind, action.id);
            }
        }

        let alarm_rings = self.alarms.tick(now);
        for ring in &alarm_rings {
            self.bridge.notify(RingNotice {
                id: RingId::Alarm(ring.alarm.id),
                title: ALARM_TITLE.to_string(),
                body: ring.alarm.label.clone(),
                snooze_enabled: ring.alarm.snooze_enabled,
            });
            self.sounds.play(&ring.alarm.sound);
            self.channel_owner = Some(RingId::Alarm(ring.alarm.id));
        }

        let timer_finished = self.timer.tick(now);
        if let Some(finished) = &timer_finished {
            let body = if finished.label.is_empty() {
                TIMER_FALLBACK_BODY.to_string()
            } else {
                finished.label.clone()
            };
            self.bridge.notify(RingNotice {
                id: RingId::Timer,
                title: TIMER_TITLE.to_string(),
                body,
                snooze_enabled: false,
            });
            self.sounds.play(&finished.sound);
            self.channel_owner = Some(RingId::Timer);
            self.timer_ringing = true;
        }

        TickReport {
            alarm_rings,
            timer_finished,
            actions,
        }
    }

    /// Applies a popup button press. Returns false when the action names a
    /// ring that is no longer sounding; such actions change nothing.
    pub fn handle_action(&mut self, action: PopupAction, now: DateTime<Local>) -> ClockResult<bool> {
        match (action.id, action.kind) {
            (RingId::Alarm(id), PopupActionKind::Stop) => {
                if !self.alarms.is_ringing(id) {
                    log::warn!("stop action for alarm {id} which is not ringing");
                    return Ok(false);
                }
                Ok(self.stop_alarm(id).was_ringing)
            }
            (RingId::Alarm(id), PopupActionKind::Snooze) => {
                self.snooze_alarm(id, now)?;
                Ok(true)
            }
            (RingId::Timer, kind) => {
                if !self.timer_ringing {
                    log::warn!("{kind:?} action for a timer that is not ringing");
                    return Ok(false);
                }
                if kind == PopupActionKind::Snooze {
                    log::debug!("timer rings cannot be snoozed, stopping instead");
                }
                self.stop_timer_ring();
                Ok(true)
            }
        }
    }

    pub fn stop_alarm(&mut self, id: AlarmId) -> StopOutcome {
        let outcome = self.alarms.stop_alarm(id);
        self.bridge.dismiss(RingId::Alarm(id));
        if outcome.channel_idle {
            self.settle_channel();
        }
        outcome
    }

    pub fn snooze_alarm(&mut self, id: AlarmId, now: DateTime<Local>) -> ClockResult<AlarmTime> {
        let until = self.alarms.snooze_alarm(id, now)?;
        self.bridge.dismiss(RingId::Alarm(id));
        if self.alarms.ringing().is_empty() {
            self.settle_channel();
        }
        Ok(until)
    }

    pub fn stop_timer_ring(&mut self) {
        if !self.timer_ringing {
            return;
        }
        self.timer_ringing = false;
        self.bridge.dismiss(RingId::Timer);
        self.settle_channel();
    }

    /// Starts a countdown, ending any finished timer's ring first.
    pub fn start_timer(
        &mut self,
        hours: u32,
        minutes: u32,
        seconds: u32,
        label: &str,
        sound: &str,
        now: DateTime<Local>,
    ) -> ClockResult<TimerSnapshot> {
        let snapshot = self.timer.start(hours, minutes, seconds, label, sound, now)?;
        self.stop_timer_ring();
        Ok(snapshot)
    }

    pub fn repeat_timer(&mut self, now: DateTime<Local>) -> ClockResult<TimerSnapshot> {
        let snapshot = self.timer.repeat(now)?;
        self.stop_timer_ring();
        Ok(snapshot)
    }

    pub fn cancel_timer(&mut self, now: DateTime<Local>) {
        self.timer.cancel(now);
        self.stop_timer_ring();
    }

    pub fn is_timer_ringing(&self) -> bool {
        self.timer_ringing
    }

    /// Updates one setting. Changing `preventSuspend` re-evaluates the
    /// keep-awake grant straight away.
    pub fn set_setting(&mut self, key: &str, value: Value) -> Result<Settings> {
        let updated = self.settings.set(key, value)?;
        if key == "preventSuspend" {
            self.timer.set_prevent_suspend(updated.prevent_suspend);
        }
        Ok(updated)
    }

    pub fn settings(&self) -> Settings {
        self.settings.get()
    }

    pub fn alarms(&self) -> &AlarmScheduler {
        &self.alarms
    }

    pub fn alarms_mut(&mut self) -> &mut AlarmScheduler {
        &mut self.alarms
    }

    pub fn timer(&self) -> &TimerEngine {
        &self.timer
    }

    pub fn timer_mut(&mut self) -> &mut TimerEngine {
        &mut self.timer
    }

    pub fn sounds(&self) -> &SoundLibrary {
        &self.sounds
    }

    pub fn sounds_mut(&mut self) -> &mut SoundLibrary {
        &mut self.sounds
    }

    pub fn stopwatch(&self) -> &Stopwatch {
        &self.stopwatch
    }

    pub fn stopwatch_mut(&mut self) -> &mut Stopwatch {
        &mut self.stopwatch
    }

    pub fn world_clocks(&self) -> &WorldClocks {
        &self.world_clocks
    }

    pub fn world_clocks_mut(&mut self) -> &mut WorldClocks {
        &mut self.world_clocks
    }

    pub fn bridge(&self) -> &NotificationBridge {
        &self.bridge
    }

    pub fn action_sender(&self) -> Sender<PopupAction> {
        self.bridge.action_sender()
    }

    /// Stops the shared audio channel unless the ring that last wrote it
    /// is still active, and closes the popup once nothing rings.
    fn settle_channel(&mut self) {
        let alarm_active = !self.alarms.ringing().is_empty();
        let owner_active = match self.channel_owner {
            Some(RingId::Timer) => self.timer_ringing,
            Some(RingId::Alarm(_)) => alarm_active,
            None => false,
        };
        if !owner_active {
            self.sounds.stop_playback();
            self.channel_owner = None;
        }
        if !alarm_active && !self.timer_ringing {
            self.bridge.dismiss_all();
        }
    }
}
