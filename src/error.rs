use thiserror::Error;

use crate::alarm::model::AlarmId;

#[derive(Debug, Error)]
pub enum ClockError {
    #[error("invalid time '{0}', expected HH:MM")]
    InvalidTime(String),
    #[error("invalid weekday index {0}, expected 0 (Sunday) through 6 (Saturday)")]
    InvalidWeekday(u8),
    #[error("snooze interval must be at least one minute")]
    InvalidSnoozeInterval,
    #[error("unknown alarm id {0}")]
    UnknownAlarm(AlarmId),
    #[error("unknown recent timer id '{0}'")]
    UnknownRecent(String),
    #[error("unknown sound id '{0}'")]
    UnknownSound(String),
    #[error("invalid time zone '{0}'")]
    InvalidTimeZone(String),
    #[error("no world clock at index {0}")]
    UnknownWorldClock(usize),
    #[error("timer duration must be greater than zero")]
    EmptyDuration,
    #[error("Maximum of {limit} custom sounds allowed.")]
    SoundLimitReached { limit: usize },
    #[error("sound storage failed: {0:#}")]
    SoundStorage(anyhow::Error),
}

pub type ClockResult<T> = std::result::Result<T, ClockError>;
