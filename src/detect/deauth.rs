//! Deauth Detector.

use std::time::{Duration, Instant};

use crate::config::DeauthThresholds;
use crate::error::Result;
use crate::model::{Alert, AlertKind, Log, Severity};
use crate::notify::{notify_all, Notifier};
use crate::store::Store;

/// `("deauth_flood", total, sorted(offenders))`.
type Signature = (i64, Vec<String>);

/// Runs the windowed deauth-flood check on a fixed 2s tick.
pub struct DeauthDetector {
    last_signature: Option<Signature>,
    last_fire: Option<Instant>,
    last_log: Option<(Signature, Instant)>,
}

impl Default for DeauthDetector {
    fn default() -> Self {
        Self::new()
    }
}

const LOG_THROTTLE: Duration = Duration::from_secs(15);

impl DeauthDetector {
    pub fn new() -> Self {
        Self { last_signature: None, last_fire: None, last_log: None }
    }

    /// One detection tick: counts deauth events in the trailing
    /// `thresholds.window_sec`, fires an alert on threshold breach subject
    /// to signature-cooldown suppression, and notifies best-effort.
    ///
    /// `now_ts` is the caller-supplied current time (milliseconds), kept as
    /// a parameter rather than read internally so ticks are deterministic
    /// to test.
    pub fn tick(
        &mut self,
        store: &Store,
        thresholds: &DeauthThresholds,
        notifiers: &[Box<dyn Notifier>],
        now_ts: i64,
    ) -> Result<Option<Alert>> {
        let since_ts = now_ts - thresholds.window_sec * 1000;
        let (counts, total) = store.count_deauths_by_src(since_ts)?;

        self.log_smart(total, &counts, thresholds);

        if total < thresholds.global_limit {
            return Ok(None);
        }

        let mut offenders: Vec<String> =
            counts.iter().filter(|(_, &c)| c > thresholds.per_src_limit).map(|(src, _)| src.clone()).collect();
        offenders.sort();

        let signature: Signature = (total, offenders.clone());
        let now = Instant::now();
        if self.last_signature.as_ref() == Some(&signature) {
            if let Some(last_fire) = self.last_fire {
                if now.duration_since(last_fire) < Duration::from_secs(thresholds.cooldown_sec as u64) {
                    return Ok(None);
                }
            }
        }

        let severity = if total >= 2 * thresholds.global_limit { Severity::Critical } else { Severity::Warn };
        let summary = format!("Deauth burst: total={total}, offenders={}", offenders.len());

        let alert =
            Alert { id: None, ts: now_ts, severity, kind: AlertKind::DeauthFlood, summary, acknowledged: false };
        let id = store.append_alert(&alert)?;
        let mut persisted = alert.clone();
        persisted.id = Some(id);
        log::warn!("deauth: {}", persisted.summary);
        if let Err(e) = store.append_log(&Log {
            id: None,
            ts: now_ts,
            source: "detect".into(),
            level: "warn".into(),
            message: persisted.summary.clone(),
        }) {
            log::warn!("deauth: failed to persist log row: {e}");
        }
        notify_all(notifiers, &persisted);

        self.last_signature = Some(signature);
        self.last_fire = Some(now);
        Ok(Some(persisted))
    }

    /// Logs a summary line only when state changed or `LOG_THROTTLE` has
    /// elapsed, to avoid flooding logs during a sustained burst.
    fn log_smart(&mut self, total: i64, counts: &std::collections::BTreeMap<String, i64>, thresholds: &DeauthThresholds) {
        let mut offenders: Vec<String> =
            counts.iter().filter(|(_, &c)| c > thresholds.per_src_limit).map(|(src, _)| src.clone()).collect();
        offenders.sort();
        let signature = (total, offenders);
        let now = Instant::now();

        let should_log = match &self.last_log {
            None => true,
            Some((prev_sig, prev_time)) => *prev_sig != signature || now.duration_since(*prev_time) >= LOG_THROTTLE,
        };
        if should_log {
            log::debug!("deauth: {total} events across {} sources in window", counts.len());
            self.last_log = Some((signature, now));
        }
    }
}
