//! Rogue / RSN / PWR Detector.

use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};
use std::time::{Duration, Instant};

use crate::config::{DefenseConfig, RogueThresholds};
use crate::error::Result;
use crate::model::{Alert, AlertKind, Band, Event, EventType, Log, Severity};
use crate::notify::{notify_all, Notifier};
use crate::store::Store;

const REMEMBERED_IDS_CAP: usize = 10_000;

struct BoundedIdSet {
    order: VecDeque<i64>,
    set: HashSet<i64>,
}

impl BoundedIdSet {
    fn new() -> Self {
        Self { order: VecDeque::new(), set: HashSet::new() }
    }

    /// Returns `true` if `id` was newly inserted (i.e. not seen before).
    fn insert_if_new(&mut self, id: i64) -> bool {
        if !self.set.insert(id) {
            return false;
        }
        self.order.push_back(id);
        if self.order.len() > REMEMBERED_IDS_CAP {
            if let Some(oldest) = self.order.pop_front() {
                self.set.remove(&oldest);
            }
        }
        true
    }
}

#[derive(Clone, Debug, Default)]
struct RsnBaseline {
    akms: BTreeSet<String>,
    ciphers: BTreeSet<String>,
}

fn parse_joined(s: &str) -> BTreeSet<String> {
    if s.is_empty() {
        BTreeSet::new()
    } else {
        s.split(',').map(str::to_string).collect()
    }
}

fn population_variance(samples: &[i32]) -> f64 {
    let n = samples.len() as f64;
    let mean = samples.iter().map(|&v| v as f64).sum::<f64>() / n;
    samples.iter().map(|&v| (v as f64 - mean).powi(2)).sum::<f64>() / n
}

/// Runs the per-beacon policy/RSN/RSSI checks on the same 2s tick as the
/// deauth detector.
pub struct RogueDetector {
    rsn_baselines: HashMap<String, RsnBaseline>,
    rssi_windows: HashMap<String, VecDeque<i32>>,
    last_pwr_alert: HashMap<String, Instant>,
    remembered_ids: BoundedIdSet,
    unarmed_notice_logged: bool,
}

impl Default for RogueDetector {
    fn default() -> Self {
        Self::new()
    }
}

impl RogueDetector {
    pub fn new() -> Self {
        Self {
            rsn_baselines: HashMap::new(),
            rssi_windows: HashMap::new(),
            last_pwr_alert: HashMap::new(),
            remembered_ids: BoundedIdSet::new(),
            unarmed_notice_logged: false,
        }
    }

    /// Resizes every tracked RSSI deque to `new_window`, trimming from the
    /// front so the most recent samples survive a hot-reload shrink.
    pub fn resize_pwr_window(&mut self, new_window: usize) {
        for deque in self.rssi_windows.values_mut() {
            while deque.len() > new_window {
                deque.pop_front();
            }
        }
    }

    pub fn tick(
        &mut self,
        store: &Store,
        defense: &DefenseConfig,
        thresholds: &RogueThresholds,
        window_sec: i64,
        notifiers: &[Box<dyn Notifier>],
        now_ts: i64,
    ) -> Result<Vec<Alert>> {
        let Some(ssid) = defense.ssid.as_deref() else {
            if !self.unarmed_notice_logged {
                let message = "no defended SSID configured, deauth detection remains active but rogue/RSN/PWR checks are unarmed".to_string();
                log::info!("rogue: {message}");
                if let Err(e) = store.append_log(&Log {
                    id: None,
                    ts: now_ts,
                    source: "detect".into(),
                    level: "info".into(),
                    message,
                }) {
                    log::warn!("rogue: failed to persist log row: {e}");
                }
                self.unarmed_notice_logged = true;
            }
            return Ok(Vec::new());
        };
        self.unarmed_notice_logged = false;

        let since_ts = now_ts - window_sec * 1000;
        let beacons = store.query_events(since_ts, Some(EventType::Beacon), Some(ssid), usize::MAX)?;

        let allowed_bssids: HashSet<String> = defense.allowed_bssids.iter().map(|s| s.to_lowercase()).collect();
        let allowed_bands = defense.allowed_bands();

        let mut alerts = Vec::new();
        for beacon in beacons {
            let Some(id) = beacon.id else { continue };
            if !self.remembered_ids.insert_if_new(id) {
                continue;
            }
            if let Some(alert) = self.process_beacon(&beacon, defense, &allowed_bssids, &allowed_bands, thresholds, now_ts) {
                let stored_id = store.append_alert(&alert)?;
                let mut persisted = alert.clone();
                persisted.id = Some(stored_id);
                log::warn!("rogue: {}", persisted.summary);
                if let Err(e) = store.append_log(&Log {
                    id: None,
                    ts: now_ts,
                    source: "detect".into(),
                    level: "warn".into(),
                    message: persisted.summary.clone(),
                }) {
                    log::warn!("rogue: failed to persist log row: {e}");
                }
                notify_all(notifiers, &persisted);
                alerts.push(persisted);
            }
        }
        Ok(alerts)
    }

    fn process_beacon(
        &mut self,
        beacon: &Event,
        defense: &DefenseConfig,
        allowed_bssids: &HashSet<String>,
        allowed_bands: &[Band],
        thresholds: &RogueThresholds,
        now_ts: i64,
    ) -> Option<Alert> {
        let bssid = beacon.bssid.as_deref()?;

        if let Some(reason) = policy_violation(beacon, defense, allowed_bssids, allowed_bands) {
            return Some(self.rogue_alert(now_ts, &reason));
        }

        let is_allowlisted = allowed_bssids.is_empty() || allowed_bssids.contains(bssid);

        if is_allowlisted {
            if let (Some(akms_str), Some(ciphers_str)) = (&beacon.rsn_akms, &beacon.rsn_ciphers) {
                if !akms_str.is_empty() || !ciphers_str.is_empty() {
                    let akms = parse_joined(akms_str);
                    let ciphers = parse_joined(ciphers_str);
                    match self.rsn_baselines.get(bssid) {
                        None => {
                            self.rsn_baselines.insert(bssid.to_string(), RsnBaseline { akms, ciphers });
                        }
                        Some(baseline) => {
                            if baseline.akms != akms || baseline.ciphers != ciphers {
                                return Some(self.rogue_alert(
                                    now_ts,
                                    &format!("RSN mismatch for BSSID {bssid}: drifted from learned baseline"),
                                ));
                            }
                        }
                    }
                }
            }
        }

        if let Some(rssi) = beacon.rssi {
            let tracked = is_allowlisted;
            if tracked {
                let deque = self.rssi_windows.entry(bssid.to_string()).or_default();
                deque.push_back(rssi);
                while deque.len() > thresholds.pwr_window {
                    deque.pop_front();
                }
                if deque.len() >= (thresholds.pwr_window / 2).max(1) {
                    let samples: Vec<i32> = deque.iter().copied().collect();
                    let variance = population_variance(&samples);
                    if variance > thresholds.pwr_var_threshold {
                        let cooldown_ok = match self.last_pwr_alert.get(bssid) {
                            None => true,
                            Some(last) => {
                                Instant::now().duration_since(*last)
                                    >= Duration::from_secs(thresholds.pwr_cooldown_sec as u64)
                            }
                        };
                        if cooldown_ok {
                            self.last_pwr_alert.insert(bssid.to_string(), Instant::now());
                            return Some(self.rogue_alert(
                                now_ts,
                                &format!("RSSI variance {variance:.1} exceeds threshold for BSSID {bssid}"),
                            ));
                        }
                    }
                }
            }
        }

        None
    }

    fn rogue_alert(&self, ts: i64, summary: &str) -> Alert {
        Alert { id: None, ts, severity: Severity::Warn, kind: AlertKind::RogueAp, summary: summary.to_string(), acknowledged: false }
    }
}

fn policy_violation(
    beacon: &Event,
    defense: &DefenseConfig,
    allowed_bssids: &HashSet<String>,
    allowed_bands: &[Band],
) -> Option<String> {
    if !allowed_bssids.is_empty() {
        if let Some(bssid) = &beacon.bssid {
            if !allowed_bssids.contains(bssid) {
                let ssid = beacon.ssid.as_deref().unwrap_or("");
                return Some(format!("SSID {ssid} from unknown BSSID {bssid}"));
            }
        }
    }
    if !defense.allowed_channels.is_empty() && !defense.allowed_channels.contains(&beacon.chan) {
        return Some(format!("unapproved channel {}", beacon.chan));
    }
    if !allowed_bands.is_empty() && !allowed_bands.contains(&beacon.band) {
        return Some(format!("unapproved band {}", beacon.band));
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn beacon(bssid: &str, chan: i32, rssi: Option<i32>, akms: Option<&str>, ciphers: Option<&str>) -> Event {
        Event {
            id: None,
            ts: 1000,
            r#type: EventType::Beacon,
            band: Band::TwoPointFour,
            chan,
            src: None,
            dst: None,
            bssid: Some(bssid.to_string()),
            ssid: Some("home".to_string()),
            rssi,
            rsn_akms: akms.map(str::to_string),
            rsn_ciphers: ciphers.map(str::to_string),
        }
    }

    fn defense_with(allowed_bssids: Vec<&str>, allowed_channels: Vec<i32>) -> DefenseConfig {
        DefenseConfig {
            ssid: Some("home".to_string()),
            allowed_bssids: allowed_bssids.into_iter().map(str::to_string).collect(),
            allowed_channels,
            allowed_bands: vec![],
        }
    }

    #[test]
    fn bssid_check_wins_over_channel_check() {
        let dir = tempdir().unwrap();
        let store = Store::open(dir.path().join("db.sqlite3")).unwrap();
        // allowed=[A], allowed_channels=[36]; beacon from B on 36 -> unknown BSSID.
        store.append_events(&[beacon("bb:bb:bb:bb:bb:bb", 36, None, None, None)]).unwrap();

        let defense = defense_with(vec!["aa:aa:aa:aa:aa:aa"], vec![36]);
        let mut detector = RogueDetector::new();
        let alerts = detector.tick(&store, &defense, &RogueThresholds::default(), 10, &[], 2000).unwrap();
        assert_eq!(alerts.len(), 1);
        assert!(alerts[0].summary.contains("unknown BSSID"));
    }

    #[test]
    fn allowlisted_bssid_on_wrong_channel_is_unapproved_channel() {
        let dir = tempdir().unwrap();
        let store = Store::open(dir.path().join("db.sqlite3")).unwrap();
        store.append_events(&[beacon("aa:aa:aa:aa:aa:aa", 40, None, None, None)]).unwrap();

        let defense = defense_with(vec!["aa:aa:aa:aa:aa:aa"], vec![36]);
        let mut detector = RogueDetector::new();
        let alerts = detector.tick(&store, &defense, &RogueThresholds::default(), 10, &[], 2000).unwrap();
        assert_eq!(alerts.len(), 1);
        assert!(alerts[0].summary.contains("unapproved channel"));
    }

    #[test]
    fn rsn_drift_from_learned_baseline_fires_once() {
        let dir = tempdir().unwrap();
        let store = Store::open(dir.path().join("db.sqlite3")).unwrap();
        store
            .append_events(&[beacon("aa:aa:aa:aa:aa:aa", 36, None, Some("00:0f:ac:2"), Some("00:0f:ac:4"))])
            .unwrap();

        let defense = defense_with(vec!["aa:aa:aa:aa:aa:aa"], vec![36]);
        let mut detector = RogueDetector::new();
        let first = detector.tick(&store, &defense, &RogueThresholds::default(), 10, &[], 2000).unwrap();
        assert!(first.is_empty(), "first RSN observation establishes the baseline, no alert");

        store
            .append_events(&[beacon("aa:aa:aa:aa:aa:aa", 36, None, Some("00:0f:ac:1"), Some("00:0f:ac:4"))])
            .unwrap();
        let second = detector.tick(&store, &defense, &RogueThresholds::default(), 10, &[], 2100).unwrap();
        assert_eq!(second.len(), 1);
        assert!(second[0].summary.contains("RSN mismatch"));
    }

    #[test]
    fn pwr_variance_fires_once_then_cools_down() {
        let dir = tempdir().unwrap();
        let store = Store::open(dir.path().join("db.sqlite3")).unwrap();
        let mut events = Vec::new();
        for _ in 0..10 {
            events.push(beacon("aa:aa:aa:aa:aa:aa", 36, Some(-40), None, None));
        }
        for _ in 0..10 {
            events.push(beacon("aa:aa:aa:aa:aa:aa", 36, Some(-80), None, None));
        }
        store.append_events(&events).unwrap();

        let defense = defense_with(vec!["aa:aa:aa:aa:aa:aa"], vec![]);
        let thresholds = RogueThresholds { pwr_window: 20, pwr_var_threshold: 150.0, pwr_cooldown_sec: 60 };
        let mut detector = RogueDetector::new();
        let alerts = detector.tick(&store, &defense, &thresholds, 10, &[], 2000).unwrap();
        assert_eq!(alerts.len(), 1);
        assert!(alerts[0].summary.contains("RSSI variance"));
    }

    #[test]
    fn unarmed_when_no_defended_ssid() {
        let dir = tempdir().unwrap();
        let store = Store::open(dir.path().join("db.sqlite3")).unwrap();
        let defense = DefenseConfig { ssid: None, ..Default::default() };
        let mut detector = RogueDetector::new();
        let alerts = detector.tick(&store, &defense, &RogueThresholds::default(), 10, &[], 2000).unwrap();
        assert!(alerts.is_empty());
    }
}
