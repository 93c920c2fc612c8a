//! Channel Hopper.
//!
//! Derives a channel plan from capture configuration, shuffles it once per
//! distinct channel set, and drives a `RadioControl` across it on a dwell
//! timer with logged backoff on failure.

use std::sync::Arc;
use std::time::Duration;

use rand::seq::SliceRandom;
use rand::thread_rng;
use tokio::time::sleep;

use crate::channel::frequency_from_band_channel;
use crate::model::{Band, Log};
use crate::radio::RadioControl;
use crate::store::Store;

const DEFAULT_24GHZ: &[i32] = &[1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12, 13];
const DEFAULT_5GHZ: &[i32] = &[36, 40, 44, 48, 149, 153, 157, 161];
const DEFAULT_6GHZ: &[i32] = &[];
const MIN_DWELL: Duration = Duration::from_millis(20);
const BACKOFF_INITIAL: Duration = Duration::from_millis(500);
const BACKOFF_MAX: Duration = Duration::from_secs(5);

/// Hop mode, mirroring `capture.hop.mode`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum HopMode {
    Lock(i32),
    List(Vec<i32>),
    All,
}

/// The subset of `capture.hop.*` the hopper needs, decoupled from the
/// `serde`-shaped `Config` so the plan-derivation logic can be unit tested
/// without constructing a full config document.
#[derive(Clone, Debug, PartialEq)]
pub struct HopConfig {
    pub enabled: bool,
    pub mode: HopMode,
    pub bands: Vec<Band>,
    pub channels_24: Option<Vec<i32>>,
    pub channels_5: Option<Vec<i32>>,
    pub channels_6: Option<Vec<i32>>,
    pub dwell_ms: u64,
}

impl Default for HopConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            mode: HopMode::All,
            bands: vec![Band::TwoPointFour, Band::Five],
            channels_24: None,
            channels_5: None,
            channels_6: None,
            dwell_ms: 100,
        }
    }
}

/// A single step of the derived plan: a band/channel pair and its frequency.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct HopStep {
    pub band: Band,
    pub channel: i32,
    pub freq_mhz: u32,
}

/// Derives the unshuffled channel set for `cfg`.
pub fn derive_channel_set(cfg: &HopConfig) -> Vec<HopStep> {
    let mut steps = match &cfg.mode {
        HopMode::Lock(chan) => {
            let band = band_for_channel(cfg, *chan);
            vec![HopStep { band, channel: *chan, freq_mhz: frequency_from_band_channel(band, *chan) }]
        }
        HopMode::List(channels) => channels
            .iter()
            .map(|&chan| {
                let band = band_for_channel(cfg, chan);
                HopStep { band, channel: chan, freq_mhz: frequency_from_band_channel(band, chan) }
            })
            .collect(),
        HopMode::All => {
            let mut out = Vec::new();
            for &band in &cfg.bands {
                let channels = default_channels_for(cfg, band);
                for chan in channels {
                    out.push(HopStep { band, channel: chan, freq_mhz: frequency_from_band_channel(band, chan) });
                }
            }
            out
        }
    };
    steps.dedup();
    steps
}

fn default_channels_for(cfg: &HopConfig, band: Band) -> Vec<i32> {
    match band {
        Band::TwoPointFour => cfg.channels_24.clone().unwrap_or_else(|| DEFAULT_24GHZ.to_vec()),
        Band::Five => cfg.channels_5.clone().unwrap_or_else(|| DEFAULT_5GHZ.to_vec()),
        Band::Six => cfg.channels_6.clone().unwrap_or_else(|| DEFAULT_6GHZ.to_vec()),
        Band::Unknown => Vec::new(),
    }
}

/// Best-effort band classification for a bare channel number named under
/// `lock`/`list` mode, where the config carries no band tag of its own.
fn band_for_channel(cfg: &HopConfig, chan: i32) -> Band {
    if (1..=14).contains(&chan) {
        Band::TwoPointFour
    } else if (36..=177).contains(&chan) {
        Band::Five
    } else if cfg.bands.contains(&Band::Six) {
        Band::Six
    } else {
        Band::Five
    }
}

fn dwell_duration(dwell_ms: u64) -> Duration {
    Duration::from_millis(dwell_ms).max(MIN_DWELL)
}

/// Drives a `RadioControl` across a channel plan with cooperative shutdown.
///
/// Reshuffles the plan only when the channel *set* (ignoring order) changes
/// between calls to [`ChannelHopper::retune`]; otherwise the previously
/// shuffled order is reused, satisfying the "shuffled once... re-shuffled
/// only when the channel set changes" rule.
pub struct ChannelHopper<R: RadioControl> {
    radio: R,
    iface: String,
    plan: Vec<HopStep>,
    cursor: usize,
    backoff: Duration,
    store: Option<Arc<Store>>,
}

impl<R: RadioControl> ChannelHopper<R> {
    pub fn new(radio: R, iface: impl Into<String>) -> Self {
        Self { radio, iface: iface.into(), plan: Vec::new(), cursor: 0, backoff: BACKOFF_INITIAL, store: None }
    }

    /// Attaches a store so hop-plan changes are persisted to the `log`
    /// table in addition to being logged via `log::info!`. Optional: a
    /// hopper with no store still runs, it just doesn't persist this trace.
    pub fn with_store(mut self, store: Arc<Store>) -> Self {
        self.store = Some(store);
        self
    }

    /// Adopts `cfg`, reshuffling the plan only if its channel set differs
    /// from the one currently in effect.
    pub fn retune(&mut self, cfg: &HopConfig) {
        let mut steps = derive_channel_set(cfg);
        if steps.is_empty() {
            self.plan = steps;
            self.cursor = 0;
            return;
        }

        let set_changed = !same_channel_set(&self.plan, &steps);
        if set_changed {
            steps.shuffle(&mut thread_rng());
            let message = format!("channel set changed, reshuffled plan ({} steps)", steps.len());
            log::info!("hopper: {message}");
            if let Some(store) = &self.store {
                if let Err(e) = store.append_log(&Log {
                    id: None,
                    ts: now_ms(),
                    source: "hopper".into(),
                    level: "info".into(),
                    message,
                }) {
                    log::warn!("hopper: failed to persist log row: {e}");
                }
            }
            self.plan = steps;
            self.cursor = 0;
        }
    }

    /// Runs the hop loop until `shutdown` resolves. Joins within one dwell
    /// period of the shutdown signal firing.
    pub async fn run(&mut self, cfg: &HopConfig, mut shutdown: tokio::sync::watch::Receiver<bool>) {
        self.retune(cfg);
        let dwell = dwell_duration(cfg.dwell_ms);

        loop {
            if *shutdown.borrow() {
                return;
            }
            if self.plan.is_empty() {
                if wait_or_shutdown(dwell, &mut shutdown).await {
                    return;
                }
                continue;
            }

            let step = self.plan[self.cursor % self.plan.len()];
            self.cursor = (self.cursor + 1) % self.plan.len();

            match self.radio.set_frequency(&self.iface, step.freq_mhz).await {
                Ok(()) => {
                    self.backoff = BACKOFF_INITIAL;
                    if wait_or_shutdown(dwell, &mut shutdown).await {
                        return;
                    }
                }
                Err(e) => {
                    log::warn!("hopper: failed to tune {} to {} MHz: {}", self.iface, step.freq_mhz, e);
                    if wait_or_shutdown(self.backoff, &mut shutdown).await {
                        return;
                    }
                    self.backoff = (self.backoff * 2).min(BACKOFF_MAX);
                }
            }
        }
    }
}

async fn wait_or_shutdown(dur: Duration, shutdown: &mut tokio::sync::watch::Receiver<bool>) -> bool {
    tokio::select! {
        _ = sleep(dur) => false,
        _ = shutdown.changed() => true,
    }
}

fn now_ms() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

fn same_channel_set(a: &[HopStep], b: &[HopStep]) -> bool {
    let mut a_sorted: Vec<_> = a.iter().map(|s| (s.band, s.channel)).collect();
    let mut b_sorted: Vec<_> = b.iter().map(|s| (s.band, s.channel)).collect();
    a_sorted.sort();
    b_sorted.sort();
    a_sorted == b_sorted
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lock_mode_yields_single_step() {
        let cfg = HopConfig { mode: HopMode::Lock(6), ..Default::default() };
        let plan = derive_channel_set(&cfg);
        assert_eq!(plan.len(), 1);
        assert_eq!(plan[0].channel, 6);
        assert_eq!(plan[0].band, Band::TwoPointFour);
    }

    #[test]
    fn list_mode_preserves_given_channels() {
        let cfg = HopConfig { mode: HopMode::List(vec![1, 6, 11]), ..Default::default() };
        let plan = derive_channel_set(&cfg);
        assert_eq!(plan.iter().map(|s| s.channel).collect::<Vec<_>>(), vec![1, 6, 11]);
    }

    #[test]
    fn all_mode_uses_band_defaults_filtered_by_enabled_bands() {
        let cfg = HopConfig { mode: HopMode::All, bands: vec![Band::Five], ..Default::default() };
        let plan = derive_channel_set(&cfg);
        assert!(plan.iter().all(|s| s.band == Band::Five));
        assert_eq!(plan.len(), DEFAULT_5GHZ.len());
    }

    #[test]
    fn dwell_floors_at_20ms() {
        assert_eq!(dwell_duration(5), MIN_DWELL);
        assert_eq!(dwell_duration(100), Duration::from_millis(100));
    }

    #[test]
    fn same_channel_set_ignores_order() {
        let a = vec![
            HopStep { band: Band::TwoPointFour, channel: 1, freq_mhz: 2412 },
            HopStep { band: Band::TwoPointFour, channel: 6, freq_mhz: 2437 },
        ];
        let b = vec![
            HopStep { band: Band::TwoPointFour, channel: 6, freq_mhz: 2437 },
            HopStep { band: Band::TwoPointFour, channel: 1, freq_mhz: 2412 },
        ];
        assert!(same_channel_set(&a, &b));
    }

    struct NoopRadio;
    impl RadioControl for NoopRadio {
        async fn set_frequency(&self, _iface: &str, _freq_mhz: u32) -> crate::error::Result<()> {
            Ok(())
        }
        async fn link_state(&self, _iface: &str) -> crate::error::Result<crate::radio::LinkState> {
            Ok(crate::radio::LinkState::Up)
        }
    }

    #[test]
    fn retune_reshuffles_only_on_set_change() {
        let mut hopper = ChannelHopper::new(NoopRadio, "wlan0mon");
        let cfg_a = HopConfig { mode: HopMode::List(vec![1, 6, 11]), ..Default::default() };
        hopper.retune(&cfg_a);
        let first_order: Vec<_> = hopper.plan.clone();

        hopper.retune(&cfg_a);
        assert_eq!(hopper.plan, first_order, "identical set must not reshuffle");

        let cfg_b = HopConfig { mode: HopMode::List(vec![1, 6, 11, 36]), ..Default::default() };
        hopper.retune(&cfg_b);
        assert_eq!(hopper.plan.len(), 4);
    }
}
