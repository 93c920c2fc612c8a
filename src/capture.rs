//! Capture Pipeline.
//!
//! Sniffs a monitor-mode interface with `pcap`, filters to management
//! beacon/deauth/disassoc at the BPF layer, decodes with [`crate::frame`],
//! and batches Events into the store. Runs as a blocking worker thread —
//! `pcap::Capture::next_packet` blocks on the kernel, so this keeps the
//! "blocks on radio" capture-worker shape rather than fighting the async
//! runtime for an inherently blocking FFI resource.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::config::ConfigWatcher;
use crate::error::{Error, ErrorKind, Result};
use crate::frame::decode_frame;
use crate::model::{Event, Log};
use crate::radio::{LinkState, RadioControl};
use crate::store::Store;

const FLUSH_MAX_EVENTS: usize = 400;
const FLUSH_MAX_INTERVAL: Duration = Duration::from_millis(800);
const BACKOFF_INITIAL: Duration = Duration::from_millis(500);
const BACKOFF_MAX: Duration = Duration::from_secs(5);
const DOWN_SKIP: Duration = Duration::from_secs(1);
const CAPTURE_TIMEOUT_MS: i32 = 5_000;
const CONFIG_POLL_INTERVAL: Duration = Duration::from_secs(1);
const ESSID_FLIP_RATE_LIMIT: Duration = Duration::from_secs(5);
const PWR_LOG_RATE_LIMIT: Duration = Duration::from_secs(5);
const PWR_WINDOW_DEFAULT: usize = 20;
const PWR_WINDOW_MIN: usize = 3;
const PWR_VAR_THRESHOLD_DEFAULT: f64 = 150.0;

const BPF_FILTER: &str =
    "wlan type mgt subtype beacon or wlan type mgt subtype deauth or wlan type mgt subtype disassoc";

/// Supplies raw radiotap-prefixed frames. Abstracted so the pipeline's
/// batching/backoff/in-line-watcher logic can be exercised with a
/// synthetic source in tests, without opening a real interface.
pub trait FrameSource {
    /// Returns the next frame, `Ok(None)` on a read timeout (not an error),
    /// or `Err` on a capture-level failure.
    fn next_frame(&mut self) -> Result<Option<Vec<u8>>>;
}

/// `FrameSource` backed by `pcap` against a live monitor-mode interface.
pub struct PcapFrameSource {
    cap: pcap::Capture<pcap::Active>,
}

impl PcapFrameSource {
    pub fn open(iface: &str) -> Result<Self> {
        let mut cap = pcap::Capture::from_device(iface)
            .map_err(|e| Error::with_message(ErrorKind::Capture, e.to_string()))?
            .promisc(true)
            .timeout(CAPTURE_TIMEOUT_MS)
            .open()
            .map_err(|e| Error::with_message(ErrorKind::Capture, e.to_string()))?;
        cap.filter(BPF_FILTER, true).map_err(|e| Error::with_message(ErrorKind::Capture, e.to_string()))?;
        Ok(Self { cap })
    }
}

impl FrameSource for PcapFrameSource {
    fn next_frame(&mut self) -> Result<Option<Vec<u8>>> {
        match self.cap.next_packet() {
            Ok(packet) => Ok(Some(packet.data.to_vec())),
            Err(pcap::Error::TimeoutExpired) => Ok(None),
            Err(e) => Err(Error::with_message(ErrorKind::Capture, e.to_string())),
        }
    }
}

/// Running frame counters. Cheaply cloned for a collaborator (e.g. the
/// out-of-scope HTTP facade) to poll.
#[derive(Clone, Default)]
pub struct CaptureStats(Arc<CaptureStatsInner>);

#[derive(Default)]
struct CaptureStatsInner {
    frames_seen: AtomicU64,
    beacons: AtomicU64,
    deauths: AtomicU64,
    disassocs: AtomicU64,
}

impl CaptureStats {
    pub fn snapshot(&self) -> (u64, u64, u64, u64) {
        (
            self.0.frames_seen.load(Ordering::Relaxed),
            self.0.beacons.load(Ordering::Relaxed),
            self.0.deauths.load(Ordering::Relaxed),
            self.0.disassocs.load(Ordering::Relaxed),
        )
    }

    fn record(&self, event: &Event) {
        self.0.frames_seen.fetch_add(1, Ordering::Relaxed);
        match event.r#type {
            crate::model::EventType::Beacon => self.0.beacons.fetch_add(1, Ordering::Relaxed),
            crate::model::EventType::Deauth => self.0.deauths.fetch_add(1, Ordering::Relaxed),
            crate::model::EventType::Disassoc => self.0.disassocs.fetch_add(1, Ordering::Relaxed),
        };
    }
}

/// In-line ESSID-flip and PWR-variance log watchers. These
/// only ever *log*; turning a PWR anomaly into an *alert* is the rolling
/// RSSI-variance check inside [`crate::detect::rogue::RogueDetector`],
/// which runs independently on the 2s detector tick.
struct InlineWatchers {
    essid_seen: HashMap<String, HashSet<String>>,
    essid_last_log: HashMap<String, Instant>,
    rssi_windows: HashMap<String, VecDeque<i32>>,
    pwr_last_log: HashMap<String, Instant>,
}

impl InlineWatchers {
    fn new() -> Self {
        Self {
            essid_seen: HashMap::new(),
            essid_last_log: HashMap::new(),
            rssi_windows: HashMap::new(),
            pwr_last_log: HashMap::new(),
        }
    }

    fn observe(&mut self, bssid: &str, ssid: Option<&str>, rssi: Option<i32>) {
        if let Some(ssid) = ssid {
            let seen = self.essid_seen.entry(bssid.to_string()).or_default();
            let was_single_or_empty = seen.len() <= 1;
            seen.insert(ssid.to_string());
            if was_single_or_empty && seen.len() >= 2 {
                let now = Instant::now();
                let should_log = match self.essid_last_log.get(bssid) {
                    None => true,
                    Some(last) => now.duration_since(*last) >= ESSID_FLIP_RATE_LIMIT,
                };
                if should_log {
                    log::warn!("capture: ESSID flip observed for BSSID {bssid}: {:?}", seen);
                    self.essid_last_log.insert(bssid.to_string(), now);
                }
            }
        }

        if let Some(rssi) = rssi {
            let deque = self.rssi_windows.entry(bssid.to_string()).or_default();
            deque.push_back(rssi);
            while deque.len() > PWR_WINDOW_DEFAULT {
                deque.pop_front();
            }
            if deque.len() >= PWR_WINDOW_MIN.max(PWR_WINDOW_DEFAULT / 2) {
                let samples: Vec<i32> = deque.iter().copied().collect();
                let mean = samples.iter().map(|&v| v as f64).sum::<f64>() / samples.len() as f64;
                let variance = samples.iter().map(|&v| (v as f64 - mean).powi(2)).sum::<f64>() / samples.len() as f64;
                if variance > PWR_VAR_THRESHOLD_DEFAULT {
                    let now = Instant::now();
                    let should_log = match self.pwr_last_log.get(bssid) {
                        None => true,
                        Some(last) => now.duration_since(*last) >= PWR_LOG_RATE_LIMIT,
                    };
                    if should_log {
                        log::warn!("capture: RSSI variance {variance:.1} observed for BSSID {bssid}");
                        self.pwr_last_log.insert(bssid.to_string(), now);
                    }
                }
            }
        }
    }
}

/// Drives the sniff → filter → decode → batched-ingest loop.
pub struct CapturePipeline<R: RadioControl> {
    store: Arc<Store>,
    radio: R,
    stats: CaptureStats,
    watchers: InlineWatchers,
    buffer: Vec<Event>,
    last_flush: Instant,
    backoff: Duration,
    last_stats_log: Instant,
}

impl<R: RadioControl> CapturePipeline<R> {
    pub fn new(store: Arc<Store>, radio: R) -> Self {
        Self {
            store,
            radio,
            stats: CaptureStats::default(),
            watchers: InlineWatchers::new(),
            buffer: Vec::new(),
            last_flush: Instant::now(),
            backoff: BACKOFF_INITIAL,
            last_stats_log: Instant::now(),
        }
    }

    pub fn stats(&self) -> CaptureStats {
        self.stats.clone()
    }

    /// Logs `message` at `level` via the `log` facade and, best-effort,
    /// persists it to the `log` table so a UI built on this crate can show
    /// sniffer start/stop and config-reload events without tailing stdout.
    fn log_op(&self, level: &str, message: String) {
        match level {
            "warn" => log::warn!("capture: {message}"),
            "error" => log::error!("capture: {message}"),
            _ => log::info!("capture: {message}"),
        }
        if let Err(e) = self.store.append_log(&Log {
            id: None,
            ts: now_ms(),
            source: "capture".into(),
            level: level.into(),
            message,
        }) {
            log::warn!("capture: failed to persist log row: {e}");
        }
    }

    /// Runs the blocking capture loop until `shutdown` is set. A final
    /// flush is guaranteed on exit.
    ///
    /// `config` is polled for on-disk changes at its own ≤2s cadence
    /// rather than once per call, so `defense.ssid`,
    /// `defense.allowed_bssids` and `capture.debug_print` take effect
    /// without restarting capture. `link_state_rt` is a small Tokio
    /// runtime handle used only to drive the async
    /// `RadioControl::link_state` call from this blocking thread; the
    /// capture worker itself does no other async work.
    pub fn run<S: FrameSource>(
        &mut self,
        source: &mut S,
        iface: &str,
        config: &mut ConfigWatcher,
        link_state_rt: &tokio::runtime::Handle,
        shutdown: &AtomicBool,
    ) {
        let mut last_config_poll = Instant::now().checked_sub(CONFIG_POLL_INTERVAL).unwrap_or_else(Instant::now);
        self.log_op("info", format!("sniffer started on {iface}"));

        while !shutdown.load(Ordering::Relaxed) {
            if last_config_poll.elapsed() >= CONFIG_POLL_INTERVAL {
                match config.poll() {
                    Ok(Some(_)) => self.log_op("info", "config reloaded".to_string()),
                    Ok(None) => {}
                    Err(e) => log::warn!("capture: config poll failed: {e}"),
                }
                last_config_poll = Instant::now();
            }
            let capture_cfg = config.current().capture.clone();
            let defense = config.current().defense.clone();
            let tracked_bssids: HashSet<String> = defense.allowed_bssids.iter().map(|s| s.to_lowercase()).collect();
            let armed = defense.ssid.is_some();

            let link_state = link_state_rt.block_on(self.radio.link_state(iface));
            match link_state {
                Ok(state) if !state.is_usable() => {
                    std::thread::sleep(DOWN_SKIP);
                    continue;
                }
                Err(e) => {
                    log::warn!("capture: link state check failed for {iface}: {e}");
                }
                _ => {}
            }

            match source.next_frame() {
                Ok(Some(raw)) => {
                    self.backoff = BACKOFF_INITIAL;
                    if let Some(event) = decode_frame(&raw, now_ms()) {
                        self.stats.record(&event);
                        if capture_cfg.debug_print {
                            log::trace!(
                                "capture: frame type={:?} band={} chan={} rssi={:?} ssid={:?} bssid={:?}",
                                event.r#type,
                                event.band,
                                event.chan,
                                event.rssi,
                                event.ssid,
                                event.bssid
                            );
                        }
                        if armed {
                            if let Some(bssid) = &event.bssid {
                                let is_defended_beacon = matches!(event.r#type, crate::model::EventType::Beacon)
                                    && event.ssid.as_deref() == defense.ssid.as_deref();
                                let tracked = tracked_bssids.is_empty() || tracked_bssids.contains(bssid);
                                if is_defended_beacon && tracked {
                                    self.watchers.observe(bssid, event.ssid.as_deref(), event.rssi);
                                }
                            }
                        }
                        self.buffer.push(event);
                    }
                }
                Ok(None) => {}
                Err(e) => {
                    log::warn!("capture: read error on {iface}: {e}");
                    std::thread::sleep(self.backoff);
                    self.backoff = (self.backoff * 2).min(BACKOFF_MAX);
                }
            }

            if capture_cfg.log_stats
                && self.last_stats_log.elapsed() >= Duration::from_secs(capture_cfg.stats_period_sec.max(1))
            {
                let (frames, beacons, deauths, disassocs) = self.stats.snapshot();
                log::info!(
                    "capture: {frames} frames seen ({beacons} beacon, {deauths} deauth, {disassocs} disassoc)"
                );
                self.last_stats_log = Instant::now();
            }

            self.maybe_flush(false);
        }

        self.maybe_flush(true);
        self.log_op("info", format!("sniffer stopped on {iface}"));
    }

    fn maybe_flush(&mut self, force: bool) {
        let elapsed = self.last_flush.elapsed();
        if !force && self.buffer.len() < FLUSH_MAX_EVENTS && elapsed < FLUSH_MAX_INTERVAL {
            return;
        }
        if self.buffer.is_empty() {
            self.last_flush = Instant::now();
            return;
        }

        let batch = std::mem::take(&mut self.buffer);
        if let Err(e) = self.store.append_events(&batch) {
            log::warn!("capture: bulk insert of {} events failed ({e}), retrying individually", batch.len());
            let mut dropped = 0u64;
            for event in &batch {
                if let Err(e2) = self.store.append_events(std::slice::from_ref(event)) {
                    log::error!("capture: dropped event after individual insert failure: {e2}");
                    dropped += 1;
                }
            }
            if dropped > 0 {
                log::error!("capture: dropped {dropped} events this flush");
            }
        }
        self.last_flush = Instant::now();
    }
}

fn now_ms() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}
