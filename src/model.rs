//! Event, Alert and Log records, and the small enums that classify them.

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// Radio band tag, as persisted on every event.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Display, EnumString, Serialize, Deserialize)]
pub enum Band {
    /// 2.4 GHz.
    #[strum(serialize = "2.4")]
    #[serde(rename = "2.4")]
    TwoPointFour,
    /// 5 GHz.
    #[strum(serialize = "5")]
    #[serde(rename = "5")]
    Five,
    /// 6 GHz.
    #[strum(serialize = "6")]
    #[serde(rename = "6")]
    Six,
    /// Unknown band.
    #[strum(serialize = "?")]
    #[serde(rename = "?")]
    Unknown,
}

impl Band {
    /// Returns the canonical persisted tag for this band.
    pub fn as_str(&self) -> &'static str {
        match self {
            Band::TwoPointFour => "2.4",
            Band::Five => "5",
            Band::Six => "6",
            Band::Unknown => "?",
        }
    }
}

/// Management-frame subtype persisted as an event.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize)]
pub enum EventType {
    /// Beacon frame.
    #[strum(serialize = "mgmt.beacon")]
    #[serde(rename = "mgmt.beacon")]
    Beacon,
    /// Deauthentication frame.
    #[strum(serialize = "mgmt.deauth")]
    #[serde(rename = "mgmt.deauth")]
    Deauth,
    /// Disassociation frame.
    #[strum(serialize = "mgmt.disassoc")]
    #[serde(rename = "mgmt.disassoc")]
    Disassoc,
}

impl EventType {
    /// Returns the canonical persisted tag for this event type.
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::Beacon => "mgmt.beacon",
            EventType::Deauth => "mgmt.deauth",
            EventType::Disassoc => "mgmt.disassoc",
        }
    }
}

/// Alert severity.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Display, EnumString, Serialize, Deserialize)]
pub enum Severity {
    /// Informational.
    #[strum(serialize = "info")]
    #[serde(rename = "info")]
    Info,
    /// Warning.
    #[strum(serialize = "warn")]
    #[serde(rename = "warn")]
    Warn,
    /// Critical.
    #[strum(serialize = "critical")]
    #[serde(rename = "critical")]
    Critical,
}

/// Alert kind.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Display, EnumString, Serialize, Deserialize)]
pub enum AlertKind {
    /// Deauthentication/disassociation flood.
    #[strum(serialize = "deauth_flood")]
    #[serde(rename = "deauth_flood")]
    DeauthFlood,
    /// Rogue access point / RSN mismatch / power-variance anomaly.
    #[strum(serialize = "rogue_ap")]
    #[serde(rename = "rogue_ap")]
    RogueAp,
    /// Synthetic alert raised for connectivity testing.
    #[strum(serialize = "test")]
    #[serde(rename = "test")]
    Test,
}

/// One observed 802.11 management frame.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Assigned on persist; `None` before `Store::append_events` returns.
    pub id: Option<i64>,
    /// UTC timestamp, millisecond resolution or finer.
    pub ts: i64,
    /// Management subtype.
    pub r#type: EventType,
    /// Radio band.
    pub band: Band,
    /// Channel number; 0 only permitted when `band == Band::Unknown`.
    pub chan: i32,
    /// Source MAC (`addr2`), canonical lowercase.
    pub src: Option<String>,
    /// Destination MAC (`addr1`), canonical lowercase.
    pub dst: Option<String>,
    /// BSSID (`addr3`), canonical lowercase.
    pub bssid: Option<String>,
    /// SSID, for beacons only.
    pub ssid: Option<String>,
    /// RSSI in dBm, when radiotap carried it.
    pub rssi: Option<i32>,
    /// Sorted, comma-joined RSN AKM selectors (beacons with an RSN IE only).
    pub rsn_akms: Option<String>,
    /// Sorted, comma-joined RSN cipher selectors (beacons with an RSN IE only).
    pub rsn_ciphers: Option<String>,
}

impl Event {
    /// Checks the invariants that are representable without a store.
    pub fn check_invariants(&self) -> bool {
        if self.chan < 0 {
            return false;
        }
        if !matches!(self.r#type, EventType::Beacon) {
            return self.rsn_akms.is_none() && self.rsn_ciphers.is_none();
        }
        true
    }
}

/// A detector finding.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    /// Assigned on persist.
    pub id: Option<i64>,
    /// UTC timestamp, millisecond resolution or finer.
    pub ts: i64,
    /// Severity.
    pub severity: Severity,
    /// Kind.
    pub kind: AlertKind,
    /// Human-readable single line.
    pub summary: String,
    /// Acknowledgement flag; mutated in place, never set on insert.
    pub acknowledged: bool,
}

/// An operational trace line produced by capture/detection/API.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Log {
    /// Assigned on persist.
    pub id: Option<i64>,
    /// UTC timestamp, millisecond resolution or finer.
    pub ts: i64,
    /// Emitting component, e.g. `"capture"`, `"detect"`, `"hopper"`.
    pub source: String,
    /// Severity tag, e.g. `"info"`, `"warn"`, `"error"`.
    pub level: String,
    /// Free-form message.
    pub message: String,
}

/// Formats a raw 6-byte MAC address as a canonical lowercase colon-hex string.
pub fn format_mac(addr: [u8; 6]) -> String {
    format!(
        "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}",
        addr[0], addr[1], addr[2], addr[3], addr[4], addr[5]
    )
}
