//! # PiGuard — a wireless intrusion detection sensor for 802.11 networks
//!
//! This crate provides the sensor core of PiGuard: the pieces that run on a
//! monitor-mode Wi-Fi interface and turn raw management frames into stored
//! events, alerts, and log lines. It does not provide a command-line entry
//! point, a web dashboard, or a notification transport — those are built on
//! top of the types exported here.
//!
//! The following building blocks are provided:
//!
//! * frame decoding
//!     * 802.11 management frame parsing (beacon, deauth, disassoc)
//!     * radiotap header and RSSI extraction
//!     * RSN information element parsing
//! * channel hopping
//!     * lock/list/all hop-plan derivation per radio band
//!     * cooperative shutdown and backoff on radio-control failure
//! * event storage
//!     * a SQLite-backed, WAL-mode event/alert/log store
//!     * additive schema migration
//! * capture
//!     * a blocking capture worker built on the `pcap` crate
//!     * in-line ESSID-flip and PWR-variance log watchers
//! * detection
//!     * a windowed deauth-flood detector
//!     * a rogue-AP / RSN-downgrade / PWR-anomaly detector
//! * configuration
//!     * a `serde`-backed config document with hot reload
//!
//! ## Basic usage
//! Load a [`Config`] with [`Config::load_from_file`], open a [`Store`] at
//! its configured path, and drive a [`CapturePipeline`] on a dedicated
//! thread fed by a [`capture::PcapFrameSource`] opened on the monitor-mode
//! interface. Run [`DeauthDetector`] and [`RogueDetector`] on their own
//! tick against the same store. A [`ChannelHopper`] retunes the radio
//! through an [`IwRadioControl`] in the background.

pub mod capture;
pub mod channel;
pub mod config;
pub mod detect;
pub mod error;
pub mod frame;
pub mod hopper;
pub mod model;
pub mod notify;
pub mod radio;
pub mod rsn;
pub mod store;

pub use capture::CapturePipeline;
pub use config::{Config, ConfigWatcher};
pub use detect::{DeauthDetector, RogueDetector};
pub use error::{Error, ErrorKind, Result};
pub use hopper::{ChannelHopper, HopConfig, HopMode};
pub use model::{Alert, AlertKind, Band, Event, EventType, Log, Severity};
pub use notify::{notify_all, Notifier};
pub use radio::{IwRadioControl, LinkState, RadioControl};
pub use store::Store;
