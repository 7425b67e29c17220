//! Duplicate suppression and heartbeat gating for the scan stage.

use std::time::{Duration, Instant};

use crate::ScanConfig;

/// What the scan stage should do with one decode result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// New text, or the same text after the backoff window: push it.
    Accept,
    /// Nothing new to report, but the result queue has gone quiet: push the
    /// frame as a preview.
    Heartbeat,
    /// Same text inside the backoff window: drop it.
    Suppressed,
    /// Nothing found and no heartbeat due.
    Idle,
}

#[derive(Debug)]
pub struct ScanPolicy {
    backoff: Duration,
    heartbeat: Duration,
    heartbeat_watermark: usize,
    last_text: String,
    last_accepted: Option<Instant>,
    last_push: Instant,
}

impl ScanPolicy {
    /// `now` starts the heartbeat clock.
    pub fn new(config: &ScanConfig, now: Instant) -> Self {
        Self {
            backoff: Duration::from_millis(config.backoff_ms),
            heartbeat: Duration::from_millis(config.heartbeat_ms),
            heartbeat_watermark: config.heartbeat_watermark,
            last_text: String::new(),
            last_accepted: None,
            last_push: now,
        }
    }

    /// Judge the decoded `text` seen at `now` while the result queue holds
    /// `queued` items. Any verdict that pushes also restarts the heartbeat clock.
    pub fn judge(&mut self, text: &str, now: Instant, queued: usize) -> Verdict {
        let mut suppressed = false;

        if !text.is_empty() {
            let expired = self
                .last_accepted
                .map_or(true, |at| now.saturating_duration_since(at) > self.backoff);

            if text != self.last_text || expired {
                self.last_text.clear();
                self.last_text.push_str(text);
                self.last_accepted = Some(now);
                self.last_push = now;
                return Verdict::Accept;
            }
            suppressed = true;
        }

        if now.saturating_duration_since(self.last_push) > self.heartbeat
            && queued < self.heartbeat_watermark
        {
            self.last_push = now;
            return Verdict::Heartbeat;
        }

        if suppressed {
            Verdict::Suppressed
        } else {
            Verdict::Idle
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    fn policy(t0: Instant) -> ScanPolicy {
        ScanPolicy::new(&ScanConfig::default(), t0)
    }

    #[test]
    fn duplicate_inside_backoff_is_suppressed() {
        let t0 = Instant::now();
        let mut p = policy(t0);
        assert_eq!(p.judge("ABC", t0, 0), Verdict::Accept);
        assert_eq!(p.judge("ABC", t0 + ms(500), 0), Verdict::Suppressed);
        assert_eq!(p.judge("ABC", t0 + ms(2100), 0), Verdict::Accept);
    }

    #[test]
    fn different_text_bypasses_backoff() {
        let t0 = Instant::now();
        let mut p = policy(t0);
        assert_eq!(p.judge("ABC", t0, 0), Verdict::Accept);
        assert_eq!(p.judge("XYZ", t0 + ms(100), 0), Verdict::Accept);
    }

    #[test]
    fn accepted_sequence_for_a_b_a_stream() {
        let t0 = Instant::now();
        let mut p = policy(t0);
        let accepted: Vec<_> = [("A", 0), ("A", 300), ("B", 600), ("A", 2500)]
            .into_iter()
            .filter(|(text, at)| p.judge(text, t0 + ms(*at), 0) == Verdict::Accept)
            .collect();
        assert_eq!(accepted, vec![("A", 0), ("B", 600), ("A", 2500)]);
    }

    #[test]
    fn heartbeat_fires_after_a_quiet_second() {
        let t0 = Instant::now();
        let mut p = policy(t0);
        assert_eq!(p.judge("", t0 + ms(900), 0), Verdict::Idle);
        assert_eq!(p.judge("", t0 + ms(1100), 0), Verdict::Heartbeat);
        assert_eq!(p.judge("", t0 + ms(1500), 0), Verdict::Idle);
        assert_eq!(p.judge("", t0 + ms(2200), 4), Verdict::Heartbeat);
    }

    #[test]
    fn heartbeat_is_gated_by_queue_depth() {
        let t0 = Instant::now();
        let mut p = policy(t0);
        assert_eq!(p.judge("", t0 + ms(1500), 5), Verdict::Idle);
        assert_eq!(p.judge("", t0 + ms(1600), 9), Verdict::Idle);
        assert_eq!(p.judge("", t0 + ms(1700), 2), Verdict::Heartbeat);
    }

    #[test]
    fn suppressed_duplicate_can_still_carry_a_heartbeat() {
        let t0 = Instant::now();
        let mut p = policy(t0);
        assert_eq!(p.judge("A", t0, 0), Verdict::Accept);
        assert_eq!(p.judge("A", t0 + ms(1200), 0), Verdict::Heartbeat);
        assert_eq!(p.judge("A", t0 + ms(1300), 0), Verdict::Suppressed);
    }
}
