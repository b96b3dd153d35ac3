use chrono::{DateTime, Timelike, Utc};
use chrono_tz::US::Eastern;

use crate::config::Config;
use crate::models::SessionInfo;

/// Resolves the current trading session label from the ET clock.
pub struct SessionManager {
    pub current_session: String,
    pub session_weight: f64,
}

impl SessionManager {
    pub fn new(cfg: &Config) -> Self {
        Self {
            current_session: "off_session".to_string(),
            session_weight: *cfg.session_weights.get("off_session").unwrap_or(&0.5),
        }
    }

    pub fn update(&mut self, cfg: &Config, utc_now: Option<DateTime<Utc>>) {
        let utc_now = utc_now.unwrap_or_else(Utc::now);
        let et_now = utc_now.with_timezone(&Eastern);
        let current_time = et_now.hour() * 60 + et_now.minute();

        self.current_session = "off_session".to_string();
        self.session_weight = *cfg.session_weights.get("off_session").unwrap_or(&0.5);

        for (name, times) in &cfg.sessions {
            let start_min = times.start.0 * 60 + times.start.1;
            let end_min = times.end.0 * 60 + times.end.1;

            let in_session = if start_min < end_min {
                current_time >= start_min && current_time < end_min
            } else {
                // Wraps midnight (e.g. Asian session 20:00 - 00:00)
                current_time >= start_min || current_time < end_min
            };

            if in_session {
                self.current_session = name.clone();
                self.session_weight = *cfg.session_weights.get(name).unwrap_or(&0.5);
                break;
            }
        }
    }

    /// Asian and off-session hours are low-liquidity; the London/NY
    /// killzones are not.
    pub fn is_low_liquidity(&self) -> bool {
        !matches!(
            self.current_session.as_str(),
            "london" | "ny_forex" | "ny_indices"
        )
    }

    pub fn info(&self) -> SessionInfo {
        SessionInfo {
            name: self.current_session.clone(),
            weight: self.session_weight,
            low_liquidity: self.is_low_liquidity(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::default_test_config;
    use chrono::TimeZone;

    fn make_utc_for_et_hour(et_hour: u32, et_minute: u32) -> DateTime<Utc> {
        // ET is UTC-5 (standard time) in January.
        use chrono::NaiveDate;
        let utc_hour = et_hour + 5;
        let (day_offset, hour) = if utc_hour >= 24 {
            (1, utc_hour - 24)
        } else {
            (0, utc_hour)
        };
        let date = NaiveDate::from_ymd_opt(2024, 1, 15 + day_offset).unwrap();
        let naive = date.and_hms_opt(hour, et_minute, 0).unwrap();
        Utc.from_utc_datetime(&naive)
    }

    #[test]
    fn london_is_liquid() {
        let cfg = default_test_config();
        let mut sm = SessionManager::new(&cfg);
        sm.update(&cfg, Some(make_utc_for_et_hour(3, 0)));
        assert_eq!(sm.current_session, "london");
        assert!(!sm.is_low_liquidity());
    }

    #[test]
    fn asian_is_low_liquidity() {
        let cfg = default_test_config();
        let mut sm = SessionManager::new(&cfg);
        sm.update(&cfg, Some(make_utc_for_et_hour(21, 0)));
        assert_eq!(sm.current_session, "asian");
        assert!(sm.is_low_liquidity());
    }

    #[test]
    fn afternoon_is_off_session() {
        let cfg = default_test_config();
        let mut sm = SessionManager::new(&cfg);
        sm.update(&cfg, Some(make_utc_for_et_hour(14, 0)));
        assert_eq!(sm.current_session, "off_session");
        assert!(sm.is_low_liquidity());
    }
}
