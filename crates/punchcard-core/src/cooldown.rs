//! Minimum interval between two accepted punches for the same worker.

use std::time::Duration;

use chrono::{DateTime, Utc};

/// Default cooldown between accepted punches.
pub const DEFAULT_COOLDOWN: Duration = Duration::from_secs(60);

/// Result of checking a worker's last accepted punch against the window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CooldownCheck {
    Clear,
    Active { remaining: Duration },
}

impl CooldownCheck {
    /// Remaining time rounded up to whole seconds (0 when clear).
    pub fn remaining_seconds(&self) -> u64 {
        match self {
            CooldownCheck::Clear => 0,
            CooldownCheck::Active { remaining } => ceil_secs(*remaining),
        }
    }
}

/// Cooldown arithmetic over wall-clock timestamps.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CooldownWindow {
    window: Duration,
}

impl Default for CooldownWindow {
    fn default() -> Self {
        Self::new(DEFAULT_COOLDOWN)
    }
}

impl CooldownWindow {
    pub fn new(window: Duration) -> Self {
        Self { window }
    }

    pub fn duration(&self) -> Duration {
        self.window
    }

    /// A punch at `now` is allowed iff there was no previous accepted punch
    /// or at least one full window has elapsed since it.
    ///
    /// A `last` in the future (clock step on the host) counts as a punch at
    /// `now`, so the remaining time never exceeds the window.
    pub fn check(&self, last: Option<DateTime<Utc>>, now: DateTime<Utc>) -> CooldownCheck {
        let Some(last) = last else {
            return CooldownCheck::Clear;
        };
        let elapsed = (now - last).to_std().unwrap_or(Duration::ZERO);
        if elapsed >= self.window {
            CooldownCheck::Clear
        } else {
            CooldownCheck::Active {
                remaining: self.window - elapsed,
            }
        }
    }

    /// Wall-clock instant at which a punch accepted at `at` stops blocking.
    pub fn expires_at(&self, at: DateTime<Utc>) -> DateTime<Utc> {
        at + chrono::Duration::from_std(self.window).unwrap_or(chrono::Duration::zero())
    }
}

fn ceil_secs(d: Duration) -> u64 {
    let secs = d.as_secs();
    if d.subsec_nanos() > 0 {
        secs + 1
    } else {
        secs
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn t0() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2026-10-19T09:00:00Z")
            .unwrap()
            .with_timezone(&Utc)
    }

    fn secs(s: i64) -> chrono::Duration {
        chrono::Duration::seconds(s)
    }

    #[test]
    fn test_no_previous_punch_is_clear() {
        assert_eq!(CooldownWindow::default().check(None, t0()), CooldownCheck::Clear);
    }

    #[test]
    fn test_half_window_leaves_thirty_seconds() {
        let check = CooldownWindow::default().check(Some(t0()), t0() + secs(30));
        assert_eq!(
            check,
            CooldownCheck::Active {
                remaining: Duration::from_secs(30)
            }
        );
        assert_eq!(check.remaining_seconds(), 30);
    }

    #[test]
    fn test_window_boundary_is_clear() {
        let window = CooldownWindow::default();
        assert_eq!(window.check(Some(t0()), t0() + secs(60)), CooldownCheck::Clear);
        assert_eq!(window.check(Some(t0()), t0() + secs(61)), CooldownCheck::Clear);
        assert_eq!(
            window
                .check(Some(t0()), t0() + secs(59))
                .remaining_seconds(),
            1
        );
    }

    #[test]
    fn test_remaining_rounds_up() {
        let check = CooldownWindow::default()
            .check(Some(t0()), t0() + chrono::Duration::milliseconds(30_500));
        assert_eq!(check.remaining_seconds(), 30);
        let check = CooldownWindow::default()
            .check(Some(t0()), t0() + chrono::Duration::milliseconds(29_500));
        assert_eq!(check.remaining_seconds(), 31);
    }

    #[test]
    fn test_future_last_punch_caps_at_window() {
        let check = CooldownWindow::default().check(Some(t0() + secs(10)), t0());
        assert_eq!(check.remaining_seconds(), 60);
    }

    #[test]
    fn test_expires_at() {
        assert_eq!(CooldownWindow::default().expires_at(t0()), t0() + secs(60));
    }
}
