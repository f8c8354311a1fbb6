use std::sync::Arc;

use chrono::{DateTime, Local};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

use crate::error::{ClockError, ClockResult};
use crate::store::{self, KeyValueStore, WORLD_CLOCKS_KEY};

/// Zone name standing for the machine's own time zone.
pub const LOCAL_ZONE: &str = "Local";
pub const LOCAL_LABEL: &str = "Local Time";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorldClock {
    pub timezone: String,
    pub label: String,
}

impl WorldClock {
    fn local() -> Self {
        Self {
            timezone: LOCAL_ZONE.to_string(),
            label: LOCAL_LABEL.to_string(),
        }
    }

    /// `HH:MM` in this clock's zone.
    pub fn current_time(&self, now: DateTime<Local>) -> ClockResult<String> {
        current_time(&self.timezone, now)
    }
}

enum Zone {
    Local,
    Named(Tz),
}

fn resolve(timezone: &str) -> ClockResult<Zone> {
    if timezone == LOCAL_ZONE {
        return Ok(Zone::Local);
    }
    timezone
        .parse::<Tz>()
        .map(Zone::Named)
        .map_err(|_| ClockError::InvalidTimeZone(timezone.to_string()))
}

pub fn current_time(timezone: &str, now: DateTime<Local>) -> ClockResult<String> {
    let text = match resolve(timezone)? {
        Zone::Local => now.format("%H:%M").to_string(),
        Zone::Named(tz) => now.with_timezone(&tz).format("%H:%M").to_string(),
    };
    Ok(text)
}

/// `Europe/London` is labelled `London`; names without a region keep
/// their full text.
pub fn default_label(timezone: &str) -> &str {
    timezone
        .split('/')
        .nth(1)
        .filter(|part| !part.is_empty())
        .unwrap_or(timezone)
}

/// Persisted list of zones shown next to the local clock.
pub struct WorldClocks {
    store: Arc<dyn KeyValueStore>,
    clocks: Vec<WorldClock>,
}

impl WorldClocks {
    pub fn load(store: Arc<dyn KeyValueStore>) -> Self {
        let stored = store::load_optional::<Vec<WorldClock>>(store.as_ref(), WORLD_CLOCKS_KEY);
        let clocks = match stored {
            Some(mut clocks) => {
                clocks.retain(|clock| match resolve(&clock.timezone) {
                    Ok(_) => true,
                    Err(err) => {
                        log::warn!("dropping stored world clock: {err}");
                        false
                    }
                });
                clocks
            }
            None => vec![WorldClock::local()],
        };
        Self { store, clocks }
    }

    pub fn clocks(&self) -> &[WorldClock] {
        &self.clocks
    }

    pub fn add(&mut self, timezone: &str, label: Option<&str>) -> ClockResult<WorldClock> {
        resolve(timezone)?;
        let clock = WorldClock {
            timezone: timezone.to_string(),
            label: label
                .filter(|label| !label.is_empty())
                .unwrap_or_else(|| default_label(timezone))
                .to_string(),
        };
        log::debug!("world clock {} added", clock.timezone);
        self.clocks.push(clock.clone());
        self.persist();
        Ok(clock)
    }

    pub fn remove(&mut self, index: usize) -> ClockResult<WorldClock> {
        if index >= self.clocks.len() {
            return Err(ClockError::UnknownWorldClock(index));
        }
        let removed = self.clocks.remove(index);
        self.persist();
        Ok(removed)
    }

    fn persist(&self) {
        store::save(self.store.as_ref(), WORLD_CLOCKS_KEY, &self.clocks);
    }
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};

    use super::*;
    use crate::store::MemoryStore;

    fn noon_utc() -> DateTime<Local> {
        Utc.with_ymd_and_hms(2026, 1, 15, 12, 0, 0)
            .single()
            .expect("valid instant")
            .with_timezone(&Local)
    }

    #[test]
    fn starts_with_the_local_zone() {
        let clocks = WorldClocks::load(Arc::new(MemoryStore::new()));
        assert_eq!(clocks.clocks(), &[WorldClock::local()]);
    }

    #[test]
    fn added_zones_are_labelled_and_persisted() {
        let store = Arc::new(MemoryStore::new());
        let mut clocks = WorldClocks::load(store.clone());
        let tokyo = clocks.add("Asia/Tokyo", None).expect("known zone");
        assert_eq!(tokyo.label, "Tokyo");
        let utc = clocks.add("UTC", None).expect("known zone");
        assert_eq!(utc.label, "UTC");
        clocks.add("America/New_York", Some("Office")).expect("known zone");

        let reloaded = WorldClocks::load(store);
        let labels = reloaded
            .clocks()
            .iter()
            .map(|clock| clock.label.as_str())
            .collect::<Vec<_>>();
        assert_eq!(labels, vec!["Local Time", "Tokyo", "UTC", "Office"]);
    }

    #[test]
    fn unknown_zone_is_rejected() {
        let mut clocks = WorldClocks::load(Arc::new(MemoryStore::new()));
        let err = clocks.add("Mars/Olympus_Mons", None).expect_err("not a zone");
        assert!(matches!(err, ClockError::InvalidTimeZone(_)));
        assert_eq!(clocks.clocks().len(), 1);
    }

    #[test]
    fn remove_checks_the_position() {
        let mut clocks = WorldClocks::load(Arc::new(MemoryStore::new()));
        clocks.add("Europe/Paris", None).expect("known zone");
        assert!(matches!(clocks.remove(5), Err(ClockError::UnknownWorldClock(5))));
        assert_eq!(clocks.remove(1).expect("present").label, "Paris");
        assert_eq!(clocks.clocks().len(), 1);
    }

    #[test]
    fn formats_time_in_each_zone() {
        assert_eq!(current_time("UTC", noon_utc()).expect("utc"), "12:00");
        assert_eq!(current_time("Asia/Tokyo", noon_utc()).expect("tokyo"), "21:00");
        assert_eq!(
            current_time("America/New_York", noon_utc()).expect("new york"),
            "07:00"
        );
        assert!(current_time("Nowhere/Land", noon_utc()).is_err());
    }

    #[test]
    fn stored_invalid_zones_are_dropped() {
        let store = Arc::new(MemoryStore::new());
        store
            .put(
                WORLD_CLOCKS_KEY,
                r#"[{"timezone":"Europe/Berlin","label":"Berlin"},{"timezone":"Bad/Zone","label":"x"}]"#,
            )
            .expect("put");
        let clocks = WorldClocks::load(store);
        assert_eq!(clocks.clocks().len(), 1);
        assert_eq!(clocks.clocks()[0].timezone, "Europe/Berlin");
    }
}
