use chrono::{SecondsFormat, Utc};

/// Source of "now" as a sortable timestamp string.
pub trait Clock: Send + Sync {
    fn now(&self) -> String;
}

/// Source of fresh, collision-resistant identifiers.
pub trait IdGenerator: Send + Sync {
    fn next_id(&self) -> String;
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> String {
        Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
    }
}

pub struct UuidGenerator;

impl IdGenerator for UuidGenerator {
    fn next_id(&self) -> String {
        uuid::Uuid::new_v4().to_string()
    }
}

/// Returns `now`, or `previous` if the clock has stepped backwards.
/// Timestamps share one fixed-width format, so string order is time order.
pub fn stamp_after(now: String, previous: &str) -> String {
    if now.as_str() < previous {
        previous.to_string()
    } else {
        now
    }
}


#[cfg(test)]
mod tests {
    use super::testing::{SequentialIds, SteppingClock};
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_system_clock_format_is_sortable() {
        let now = SystemClock.now();
        assert_eq!(now.len(), "2026-10-18T09:30:00.000Z".len());
        assert!(now.ends_with('Z'));
    }

    #[test]
    fn test_stamp_after_never_goes_backwards() {
        let earlier = "2026-01-01T00:00:00.000Z".to_string();
        let later = "2026-01-02T00:00:00.000Z";
        assert_eq!(stamp_after(earlier, later), later);
        assert_eq!(
            stamp_after("2026-03-01T00:00:00.000Z".to_string(), later),
            "2026-03-01T00:00:00.000Z"
        );
    }

    #[test]
    fn test_stepping_clock_advances() {
        let clock = SteppingClock::new(Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap());
        assert_eq!(clock.now(), "2026-01-01T00:00:00.000Z");
        assert_eq!(clock.now(), "2026-01-01T00:00:01.000Z");
    }

    #[test]
    fn test_uuid_ids_are_unique() {
        let ids = UuidGenerator;
        assert_ne!(ids.next_id(), ids.next_id());
    }

    #[test]
    fn test_sequential_ids() {
        let ids = SequentialIds::new("company");
        assert_eq!(ids.next_id(), "company-1");
        assert_eq!(ids.next_id(), "company-2");
    }
}
