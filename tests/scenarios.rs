//! End-to-end scenarios spanning the store, the detectors, the frame
//! decoder, and the channel hopper together, rather than any one module in
//! isolation.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use piguard::config::{DeauthThresholds, DefenseConfig, RogueThresholds};
use piguard::detect::{DeauthDetector, RogueDetector};
use piguard::hopper::{ChannelHopper, HopConfig, HopMode};
use piguard::model::{Band, Event, EventType, Severity};
use piguard::radio::{LinkState, RadioControl};
use piguard::store::Store;

fn beacon_event(ts: i64, bssid: &str, ssid: &str, band: Band, chan: i32) -> Event {
    Event {
        id: None,
        ts,
        r#type: EventType::Beacon,
        band,
        chan,
        src: None,
        dst: None,
        bssid: Some(bssid.to_string()),
        ssid: Some(ssid.to_string()),
        rssi: Some(-50),
        rsn_akms: None,
        rsn_ciphers: None,
    }
}

fn deauth_event(ts: i64, src: &str, bssid: &str) -> Event {
    Event {
        id: None,
        ts,
        r#type: EventType::Deauth,
        band: Band::TwoPointFour,
        chan: 6,
        src: Some(src.to_string()),
        dst: None,
        bssid: Some(bssid.to_string()),
        ssid: None,
        rssi: None,
        rsn_akms: None,
        rsn_ciphers: None,
    }
}

/// S1: ten beacons for an undefended SSID produce no alerts and are all
/// visible through `query_events`.
#[test]
fn s1_plain_beacons_produce_no_alerts() {
    let dir = tempfile::tempdir().unwrap();
    let store = Store::open(dir.path().join("db.sqlite3")).unwrap();

    let events: Vec<Event> =
        (0..10).map(|i| beacon_event(1_000 + i, "aa:bb:cc:dd:ee:01", "home", Band::TwoPointFour, 6)).collect();
    store.append_events(&events).unwrap();

    let mut deauth = DeauthDetector::new();
    let alert = deauth.tick(&store, &DeauthThresholds::default(), &[], 60_000).unwrap();
    assert!(alert.is_none());

    let rows = store.query_events(0, Some(EventType::Beacon), None, 100).unwrap();
    assert_eq!(rows.len(), 10);
}

/// S2: a flat 80-event deauth burst from 10 distinct sources fires exactly
/// one `deauth_flood` alert at `warn` severity with zero named offenders.
#[test]
fn s2_deauth_burst_fires_one_warn_alert() {
    let dir = tempfile::tempdir().unwrap();
    let store = Store::open(dir.path().join("db.sqlite3")).unwrap();

    let events: Vec<Event> =
        (0..80).map(|i| deauth_event(1_000, &format!("src-{}", i % 10), "aa:bb:cc:dd:ee:01")).collect();
    store.append_events(&events).unwrap();

    let mut deauth = DeauthDetector::new();
    let alert = deauth.tick(&store, &DeauthThresholds::default(), &[], 2_000).unwrap().expect("must fire");
    assert_eq!(alert.severity, Severity::Warn);
    assert_eq!(alert.summary, "Deauth burst: total=80, offenders=0");
}

/// S3: with `ssid=home` defended and only one BSSID allowlisted, a beacon
/// for that SSID from an unknown BSSID fires one `rogue_ap` alert naming
/// both the SSID and the offending BSSID.
#[test]
fn s3_unknown_bssid_for_defended_ssid_fires_rogue_alert() {
    let dir = tempfile::tempdir().unwrap();
    let store = Store::open(dir.path().join("db.sqlite3")).unwrap();
    store.append_events(&[beacon_event(1_000, "de:ad:be:ef:00:01", "home", Band::TwoPointFour, 6)]).unwrap();

    let defense = DefenseConfig {
        ssid: Some("home".to_string()),
        allowed_bssids: vec!["aa:bb:cc:dd:ee:01".to_string()],
        allowed_channels: vec![],
        allowed_bands: vec![],
    };

    let mut rogue = RogueDetector::new();
    let alerts = rogue.tick(&store, &defense, &RogueThresholds::default(), 60, &[], 2_000).unwrap();
    assert_eq!(alerts.len(), 1);
    assert_eq!(alerts[0].summary, "SSID home from unknown BSSID de:ad:be:ef:00:01");
}

struct RecordingRadio {
    tuned: Arc<Mutex<Vec<u32>>>,
}

impl RadioControl for RecordingRadio {
    async fn set_frequency(&self, _iface: &str, freq_mhz: u32) -> piguard::error::Result<()> {
        self.tuned.lock().unwrap().push(freq_mhz);
        Ok(())
    }

    async fn link_state(&self, _iface: &str) -> piguard::error::Result<LinkState> {
        Ok(LinkState::Up)
    }
}

/// S4: a `list` hopper over channels `[1, 6, 11]` with a 50ms dwell visits
/// all three within 200ms of wall-clock time.
#[tokio::test(flavor = "multi_thread")]
async fn s4_list_mode_hopper_visits_all_channels_quickly() {
    let tuned = Arc::new(Mutex::new(Vec::new()));
    let radio = RecordingRadio { tuned: tuned.clone() };
    let mut hopper = ChannelHopper::new(radio, "wlan0mon");
    let cfg = HopConfig {
        enabled: true,
        mode: HopMode::List(vec![1, 6, 11]),
        bands: vec![Band::TwoPointFour],
        channels_24: None,
        channels_5: None,
        channels_6: None,
        dwell_ms: 50,
    };

    let (tx, rx) = tokio::sync::watch::channel(false);
    let run = tokio::spawn(async move {
        let mut hopper = hopper;
        hopper.run(&cfg, rx).await;
    });

    tokio::time::sleep(Duration::from_millis(200)).await;
    tx.send(true).unwrap();
    tokio::time::timeout(Duration::from_secs(1), run).await.unwrap().unwrap();

    let seen = tuned.lock().unwrap();
    let channels: HashSet<u32> = seen.iter().copied().collect();
    // 2437 MHz = ch 6, 2412 MHz = ch 1, 2462 MHz = ch 11 (2.4 GHz mapping).
    assert!(channels.contains(&2412));
    assert!(channels.contains(&2437));
    assert!(channels.contains(&2462));
}

/// S5: a non-management frame decodes to no event and does not error.
#[test]
fn s5_non_management_frame_yields_no_event() {
    // Minimal radiotap header (8 bytes, version 0, no present fields) followed
    // by a data-frame header (type=2 in the frame-control field).
    let mut raw = vec![0u8; 8];
    raw[2] = 8; // it_len = 8
    raw.extend_from_slice(&[0x08, 0x00]); // frame control: type=2 (data), subtype=0
    raw.extend_from_slice(&[0u8; 22]); // rest of a would-be header, irrelevant
    let event = piguard::frame::decode_frame(&raw, 1_000);
    assert!(event.is_none());
}

/// S6: opening a store against a path whose parent cannot be created fails
/// with a fatal error naming the path.
#[test]
fn s6_store_open_against_unwritable_path_is_fatal() {
    // `/proc` is a read-only pseudo-filesystem on Linux; creating a
    // subdirectory under it always fails with a permissions error.
    let result = Store::open("/proc/piguard-test-unwritable/db.sqlite3");
    let err = result.expect_err("store open must fail");
    assert!(err.to_string().contains("piguard-test-unwritable"));
}
