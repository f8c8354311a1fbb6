use std::collections::{BTreeSet, HashSet};
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Datelike, Local, NaiveTime, Timelike, Weekday};
use serde::{Deserialize, Serialize};

use crate::error::{ClockError, ClockResult};

pub type AlarmId = i64;

pub const DEFAULT_SOUND: &str = "default";
pub const DEFAULT_LABEL: &str = "Alarm";
pub const DEFAULT_SNOOZE_MINUTES: u32 = 9;

/// Wall-clock time of day with minute precision, written `HH:MM`.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct AlarmTime(NaiveTime);

impl AlarmTime {
    pub fn new(hour: u32, minute: u32) -> Option<Self> {
        NaiveTime::from_hms_opt(hour, minute, 0).map(Self)
    }

    /// The minute `now` falls in; seconds are dropped.
    pub fn of(now: &DateTime<Local>) -> Self {
        Self(NaiveTime::from_hms_opt(now.hour(), now.minute(), 0).unwrap_or(NaiveTime::MIN))
    }

    /// Adds whole minutes, wrapping past midnight.
    pub fn plus_minutes(self, minutes: u32) -> Self {
        let (time, _) = self
            .0
            .overflowing_add_signed(chrono::Duration::minutes(i64::from(minutes)));
        Self(time)
    }

    pub fn hour(self) -> u32 {
        self.0.hour()
    }

    pub fn minute(self) -> u32 {
        self.0.minute()
    }
}

impl FromStr for AlarmTime {
    type Err = ClockError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let bytes = input.as_bytes();
        let well_formed = bytes.len() == 5
            && bytes[2] == b':'
            && bytes
                .iter()
                .enumerate()
                .all(|(index, byte)| index == 2 || byte.is_ascii_digit());
        if !well_formed {
            return Err(ClockError::InvalidTime(input.to_string()));
        }
        NaiveTime::parse_from_str(input, "%H:%M")
            .map(Self)
            .map_err(|_| ClockError::InvalidTime(input.to_string()))
    }
}

impl fmt::Display for AlarmTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}:{:02}", self.hour(), self.minute())
    }
}

impl TryFrom<String> for AlarmTime {
    type Error = ClockError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<AlarmTime> for String {
    fn from(value: AlarmTime) -> Self {
        value.to_string()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Alarm {
    pub id: AlarmId,
    pub time: AlarmTime,
    #[serde(default = "default_label")]
    pub label: String,
    /// Weekday indices, 0 = Sunday. Empty means the alarm fires once.
    #[serde(default)]
    pub repeat: BTreeSet<u8>,
    #[serde(default = "default_sound", alias = "soundRef")]
    pub sound: String,
    #[serde(default = "default_true")]
    pub snooze_enabled: bool,
    #[serde(default = "default_snooze_interval", alias = "snoozeIntervalMinutes")]
    pub snooze_interval: u32,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

impl Alarm {
    pub fn is_one_shot(&self) -> bool {
        self.repeat.is_empty()
    }

    pub fn repeats_on(&self, weekday: Weekday) -> bool {
        self.repeat.contains(&weekday_index(weekday))
    }

    /// Due when enabled, the minute matches and today is a repeat day (or
    /// the alarm is one-shot).
    pub fn is_due(&self, now: &DateTime<Local>) -> bool {
        self.enabled
            && self.time == AlarmTime::of(now)
            && (self.is_one_shot() || self.repeats_on(now.weekday()))
    }

    /// Stored intervals of zero come from older data and mean "default".
    pub fn snooze_minutes(&self) -> u32 {
        if self.snooze_interval == 0 {
            DEFAULT_SNOOZE_MINUTES
        } else {
            self.snooze_interval
        }
    }

    pub(crate) fn apply(&mut self, patch: AlarmPatch) -> ClockResult<()> {
        let time = patch.time.as_deref().map(str::parse::<AlarmTime>).transpose()?;
        let repeat = patch.repeat.as_deref().map(parse_repeat).transpose()?;
        if patch.snooze_interval == Some(0) {
            return Err(ClockError::InvalidSnoozeInterval);
        }

        if let Some(time) = time {
            self.time = time;
        }
        if let Some(repeat) = repeat {
            self.repeat = repeat;
        }
        if let Some(label) = patch.label {
            self.label = label;
        }
        if let Some(sound) = patch.sound {
            self.sound = sound;
        }
        if let Some(snooze_enabled) = patch.snooze_enabled {
            self.snooze_enabled = snooze_enabled;
        }
        if let Some(snooze_interval) = patch.snooze_interval {
            self.snooze_interval = snooze_interval;
        }
        if let Some(enabled) = patch.enabled {
            self.enabled = enabled;
        }
        Ok(())
    }
}

/// Input for a new alarm. Only `time` is required.
#[derive(Debug, Clone, Default)]
pub struct AlarmDraft {
    pub time: String,
    pub label: Option<String>,
    pub repeat: Vec<u8>,
    pub sound: Option<String>,
    pub snooze_enabled: Option<bool>,
    pub snooze_interval: Option<u32>,
}

impl AlarmDraft {
    pub fn at(time: impl Into<String>) -> Self {
        Self {
            time: time.into(),
            ..Self::default()
        }
    }

    pub(crate) fn into_alarm(self, id: AlarmId) -> ClockResult<Alarm> {
        let time = self.time.parse::<AlarmTime>()?;
        let repeat = parse_repeat(&self.repeat)?;
        let snooze_interval = self.snooze_interval.unwrap_or(DEFAULT_SNOOZE_MINUTES);
        if snooze_interval == 0 {
            return Err(ClockError::InvalidSnoozeInterval);
        }
        Ok(Alarm {
            id,
            time,
            label: self
                .label
                .filter(|label| !label.is_empty())
                .unwrap_or_else(default_label),
            repeat,
            sound: self.sound.unwrap_or_else(default_sound),
            snooze_enabled: self.snooze_enabled.unwrap_or(true),
            snooze_interval,
            enabled: true,
        })
    }
}

/// Partial update; `None` leaves a field untouched.
#[derive(Debug, Clone, Default)]
pub struct AlarmPatch {
    pub time: Option<String>,
    pub label: Option<String>,
    pub repeat: Option<Vec<u8>>,
    pub sound: Option<String>,
    pub snooze_enabled: Option<bool>,
    pub snooze_interval: Option<u32>,
    pub enabled: Option<bool>,
}

pub fn parse_repeat(days: &[u8]) -> ClockResult<BTreeSet<u8>> {
    days.iter()
        .map(|&day| {
            if day <= 6 {
                Ok(day)
            } else {
                Err(ClockError::InvalidWeekday(day))
            }
        })
        .collect()
}

/// Checks a freshly decoded alarm list. Any bad entry rejects the list.
pub fn validate_alarms(alarms: &[Alarm]) -> Result<(), String> {
    let mut ids = HashSet::new();
    for alarm in alarms {
        if !ids.insert(alarm.id) {
            return Err(format!("duplicate alarm id found: {}", alarm.id));
        }
        if let Some(day) = alarm.repeat.iter().find(|day| **day > 6) {
            return Err(format!("alarm {} repeats on invalid weekday {day}", alarm.id));
        }
    }
    Ok(())
}

pub fn weekday_index(day: Weekday) -> u8 {
    // num_days_from_sunday is always < 7
    day.num_days_from_sunday() as u8
}

pub fn weekday_to_token(index: u8) -> &'static str {
    match index {
        0 => "Sun",
        1 => "Mon",
        2 => "Tue",
        3 => "Wed",
        4 => "Thu",
        5 => "Fri",
        6 => "Sat",
        _ => "?",
    }
}

pub fn format_repeat(repeat: &BTreeSet<u8>) -> String {
    match repeat.len() {
        0 => "once".to_string(),
        7 => "every day".to_string(),
        _ => repeat
            .iter()
            .map(|day| weekday_to_token(*day))
            .collect::<Vec<_>>()
            .join(", "),
    }
}

fn default_label() -> String {
    DEFAULT_LABEL.to_string()
}

fn default_sound() -> String {
    DEFAULT_SOUND.to_string()
}

fn default_true() -> bool {
    true
}

fn default_snooze_interval() -> u32 {
    DEFAULT_SNOOZE_MINUTES
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    #[test]
    fn parses_stored_alarm_list() {
        let json = r#"
[
  {
    "id": 1738900000000,
    "time": "07:30",
    "label": "Wake up",
    "repeat": [1, 2, 3, 4, 5],
    "sound": "custom_1738900000001",
    "snoozeEnabled": true,
    "snoozeInterval": 5,
    "enabled": true
  },
  {
    "id": 1738900000002,
    "time": "22:15",
    "enabled": false
  }
]
"#;
        let alarms: Vec<Alarm> = serde_json::from_str(json).expect("valid alarms");
        validate_alarms(&alarms).expect("consistent alarms");
        assert_eq!(alarms.len(), 2);
        assert_eq!(alarms[0].time, AlarmTime::new(7, 30).expect("time"));
        assert_eq!(alarms[0].snooze_interval, 5);
        assert_eq!(alarms[0].repeat.len(), 5);
        assert_eq!(alarms[1].label, "Alarm");
        assert_eq!(alarms[1].sound, "default");
        assert!(alarms[1].snooze_enabled);
        assert_eq!(alarms[1].snooze_interval, 9);
        assert!(alarms[1].is_one_shot());
    }

    #[test]
    fn rejects_malformed_times() {
        for input in ["7:30", "07:3", "24:00", "07:60", "07-30", "07:30:00", "ab:cd", ""] {
            let err = input.parse::<AlarmTime>().expect_err(input);
            assert!(err.to_string().contains("invalid time"), "{input}");
        }
        assert_eq!(
            "00:00".parse::<AlarmTime>().expect("midnight"),
            AlarmTime::new(0, 0).expect("time")
        );
    }

    #[test]
    fn rejects_duplicate_ids() {
        let json = r#"[{"id": 1, "time": "07:30"}, {"id": 1, "time": "08:30"}]"#;
        let alarms: Vec<Alarm> = serde_json::from_str(json).expect("decodes");
        let err = validate_alarms(&alarms).expect_err("duplicate ids should fail");
        assert!(err.contains("duplicate alarm id"));
    }

    #[test]
    fn rejects_invalid_weekday() {
        let err = parse_repeat(&[1, 7]).expect_err("7 is not a weekday");
        assert!(matches!(err, ClockError::InvalidWeekday(7)));

        let json = r#"[{"id": 1, "time": "07:30", "repeat": [9]}]"#;
        let alarms: Vec<Alarm> = serde_json::from_str(json).expect("decodes");
        assert!(validate_alarms(&alarms).is_err());
    }

    #[test]
    fn snooze_target_wraps_past_midnight() {
        let late = AlarmTime::new(23, 55).expect("time");
        assert_eq!(late.plus_minutes(9).to_string(), "00:04");
    }

    #[test]
    fn due_check_honours_repeat_days() {
        // 2026-06-10 is a Wednesday.
        let wednesday = Local
            .with_ymd_and_hms(2026, 6, 10, 7, 30, 0)
            .single()
            .expect("valid");
        let mut alarm = AlarmDraft {
            repeat: vec![1, 2],
            ..AlarmDraft::at("07:30")
        }
        .into_alarm(1)
        .expect("valid draft");
        assert!(!alarm.is_due(&wednesday));

        alarm.repeat.insert(3);
        assert!(alarm.is_due(&wednesday));

        alarm.enabled = false;
        assert!(!alarm.is_due(&wednesday));
    }

    #[test]
    fn draft_defaults_and_validation() {
        let alarm = AlarmDraft::at("06:45").into_alarm(42).expect("valid");
        assert_eq!(alarm.label, DEFAULT_LABEL);
        assert_eq!(alarm.sound, DEFAULT_SOUND);
        assert!(alarm.snooze_enabled);
        assert_eq!(alarm.snooze_interval, DEFAULT_SNOOZE_MINUTES);
        assert!(alarm.enabled);

        let err = AlarmDraft {
            snooze_interval: Some(0),
            ..AlarmDraft::at("06:45")
        }
        .into_alarm(43)
        .expect_err("zero snooze");
        assert!(matches!(err, ClockError::InvalidSnoozeInterval));
    }

    #[test]
    fn patch_is_all_or_nothing() {
        let mut alarm = AlarmDraft::at("06:45").into_alarm(1).expect("valid");
        let err = alarm
            .apply(AlarmPatch {
                label: Some("Gym".to_string()),
                time: Some("6:45".to_string()),
                ..AlarmPatch::default()
            })
            .expect_err("bad time");
        assert!(matches!(err, ClockError::InvalidTime(_)));
        assert_eq!(alarm.label, DEFAULT_LABEL);
    }

    #[test]
    fn formats_repeat_sets() {
        assert_eq!(format_repeat(&BTreeSet::new()), "once");
        assert_eq!(format_repeat(&parse_repeat(&[5, 1]).expect("days")), "Mon, Fri");
        assert_eq!(
            format_repeat(&parse_repeat(&[0, 1, 2, 3, 4, 5, 6]).expect("days")),
            "every day"
        );
    }
}
