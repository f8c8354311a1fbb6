use chrono::{DateTime, Local};

/// Hands out millisecond timestamps that strictly increase, even when two
/// ids are requested within the same millisecond or the wall clock steps
/// backwards.
#[derive(Debug, Clone, Copy, Default)]
pub struct MonotonicIds {
    last: i64,
}

impl MonotonicIds {
    pub fn starting_after(last: i64) -> Self {
        Self { last }
    }

    pub fn next(&mut self, now: DateTime<Local>) -> i64 {
        let candidate = now.timestamp_millis();
        self.last = if candidate > self.last {
            candidate
        } else {
            self.last.saturating_add(1)
        };
        self.last
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Local, TimeZone};

    use super::*;

    #[test]
    fn ids_stay_ordered_within_one_millisecond() {
        let now = Local
            .timestamp_opt(1_700_000_000, 0)
            .single()
            .expect("valid epoch");
        let mut ids = MonotonicIds::default();
        let first = ids.next(now);
        let second = ids.next(now);
        assert_eq!(first, 1_700_000_000_000);
        assert_eq!(second, first + 1);
    }

    #[test]
    fn ids_skip_past_existing_maximum() {
        let now = Local
            .timestamp_opt(1_700_000_000, 0)
            .single()
            .expect("valid epoch");
        let mut ids = MonotonicIds::starting_after(1_800_000_000_000);
        assert_eq!(ids.next(now), 1_800_000_000_001);
    }
}
