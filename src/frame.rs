//! Decodes 802.11 management frames captured off the air.
//!
//! The radiotap prefix is parsed with the `radiotap` crate; the 802.11
//! header and information elements that follow it are walked by hand with
//! explicit bounds checks, in the same best-effort cursor style as
//! [`crate::rsn`] — truncated or malformed input yields `None`, never an
//! error: parse errors are silently tolerated.

use radiotap::{field, Radiotap, RadiotapIterator};

use crate::channel::{band_channel_from_frequency, band_from_ds_value};
use crate::model::{format_mac, Band, Event, EventType};
use crate::rsn::parse_rsn_ie;

const IE_SSID: u8 = 0;
const IE_DS_PARAMETER_SET: u8 = 3;
const IE_RSN: u8 = 48;

const MGMT_FRAME_TYPE: u8 = 0;
const SUBTYPE_BEACON: u8 = 8;
const SUBTYPE_DISASSOC: u8 = 10;
const SUBTYPE_DEAUTH: u8 = 12;

const HEADER_LEN: usize = 24;
const BEACON_FIXED_LEN: usize = 12; // timestamp(8) + interval(2) + capabilities(2)

struct InformationElements<'a> {
    ssid: Option<&'a [u8]>,
    ds_channel: Option<u8>,
    rsn: Option<&'a [u8]>,
}

fn walk_information_elements(mut data: &[u8]) -> InformationElements<'_> {
    let mut out = InformationElements { ssid: None, ds_channel: None, rsn: None };
    while data.len() >= 2 {
        let id = data[0];
        let len = data[1] as usize;
        if data.len() < 2 + len {
            break;
        }
        let body = &data[2..2 + len];
        match id {
            IE_SSID if out.ssid.is_none() => out.ssid = Some(body),
            IE_DS_PARAMETER_SET if out.ds_channel.is_none() && !body.is_empty() => {
                out.ds_channel = Some(body[0]);
            }
            IE_RSN if out.rsn.is_none() => out.rsn = Some(body),
            _ => {}
        }
        data = &data[2 + len..];
    }
    out
}

fn radiotap_rssi(raw: &[u8]) -> Option<i32> {
    let iter = RadiotapIterator::from_bytes(raw).ok()?;
    for field in iter {
        let (kind, data) = field.ok()?;
        if kind == field::Kind::AntennaSignal {
            if let Ok(signal) = field::AntennaSignal::from_bytes(&data) {
                return Some(signal.value as i32);
            }
        }
    }
    None
}

/// Decodes one radiotap-prefixed 802.11 frame into an [`Event`], stamping it
/// with `ts`. Returns `None` if the frame is not a beacon/deauth/disassoc
/// management frame, or if it is too short to parse.
///
/// Equivalent to `decode_with_hint(raw, ts, None)`; use that directly when a
/// fallback band/channel is available from elsewhere (a pre-captured file
/// replayed without radiotap, for instance).
pub fn decode_frame(raw: &[u8], ts: i64) -> Option<Event> {
    decode_with_hint(raw, ts, None)
}

/// Decodes one radiotap-prefixed 802.11 frame into an [`Event`], stamping it
/// with `ts`. Returns `None` if the frame is not a beacon/deauth/disassoc
/// management frame, or if it is too short to parse.
///
/// `band_hint` is used only when neither the DS Parameter Set element nor a
/// radiotap channel-frequency field are present — the replay path for
/// pre-captured frames supplies it, since radiotap is optional there.
pub fn decode_with_hint(raw: &[u8], ts: i64, band_hint: Option<(Band, i32)>) -> Option<Event> {
    let rt = Radiotap::from_bytes(raw).ok()?;
    let rssi = radiotap_rssi(raw);
    let radiotap_len = rt.header.length;
    if raw.len() < radiotap_len {
        return None;
    }
    let payload = &raw[radiotap_len..];
    if payload.len() < HEADER_LEN {
        return None;
    }

    let frame_ctrl0 = payload[0];
    let ftype = (frame_ctrl0 >> 2) & 0b11;
    let fsubtype = (frame_ctrl0 >> 4) & 0b1111;
    if ftype != MGMT_FRAME_TYPE {
        return None;
    }

    let event_type = match fsubtype {
        SUBTYPE_BEACON => EventType::Beacon,
        SUBTYPE_DEAUTH => EventType::Deauth,
        SUBTYPE_DISASSOC => EventType::Disassoc,
        _ => return None,
    };

    let dst: [u8; 6] = payload[4..10].try_into().ok()?;
    let src: [u8; 6] = payload[10..16].try_into().ok()?;
    let bssid: [u8; 6] = payload[16..22].try_into().ok()?;

    let body = &payload[HEADER_LEN..];

    let (ssid, ds_channel, rsn) = if matches!(event_type, EventType::Beacon) {
        if body.len() < BEACON_FIXED_LEN {
            (None, None, None)
        } else {
            let ies = walk_information_elements(&body[BEACON_FIXED_LEN..]);
            (
                ies.ssid.map(|b| String::from_utf8_lossy(b).into_owned()),
                ies.ds_channel,
                ies.rsn.map(parse_rsn_ie),
            )
        }
    } else {
        (None, None, None)
    };

    let (band, chan) = if let Some(ds_value) = ds_channel {
        (band_from_ds_value(ds_value), ds_value as i32)
    } else if let Some(freq) = rt.channel.map(|c| c.freq as u32) {
        band_channel_from_frequency(freq)
    } else if let Some(hint) = band_hint {
        hint
    } else {
        (Band::Unknown, 0)
    };

    let (rsn_akms, rsn_ciphers) = match rsn {
        Some(info) => (Some(joined_or_empty(&info.akms)), Some(joined_or_empty(&info.ciphers))),
        None => (None, None),
    };

    Some(Event {
        id: None,
        ts,
        r#type: event_type,
        band,
        chan,
        src: Some(format_mac(src)),
        dst: Some(format_mac(dst)),
        bssid: Some(format_mac(bssid)),
        ssid,
        rssi,
        rsn_akms,
        rsn_ciphers,
    })
}

fn joined_or_empty(set: &std::collections::BTreeSet<String>) -> String {
    set.iter().cloned().collect::<Vec<_>>().join(",")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal_radiotap(freq_mhz: u16) -> Vec<u8> {
        // Radiotap header: version(1)=0, pad(1)=0, length(2 LE), present(4 LE).
        // Present bit 3 (Channel) set; fields: freq(u16) + flags(u16).
        let present: u32 = 1 << 3;
        let mut header = vec![0u8, 0u8];
        let length: u16 = 8 + 4; // header(8) + channel field(4)
        header.extend_from_slice(&length.to_le_bytes());
        header.extend_from_slice(&present.to_le_bytes());
        header.extend_from_slice(&freq_mhz.to_le_bytes());
        header.extend_from_slice(&0u16.to_le_bytes()); // channel flags
        header
    }

    fn mgmt_header(ftype: u8, subtype: u8, dst: [u8; 6], src: [u8; 6], bssid: [u8; 6]) -> Vec<u8> {
        let fc0 = (ftype << 2) | (subtype << 4);
        let mut h = vec![fc0, 0u8]; // frame control
        h.extend_from_slice(&0u16.to_le_bytes()); // duration
        h.extend_from_slice(&dst);
        h.extend_from_slice(&src);
        h.extend_from_slice(&bssid);
        h.extend_from_slice(&0u16.to_le_bytes()); // seq ctrl
        h
    }

    fn ie(id: u8, data: &[u8]) -> Vec<u8> {
        let mut v = vec![id, data.len() as u8];
        v.extend_from_slice(data);
        v
    }

    #[test]
    fn decodes_beacon_with_ssid_and_channel_from_ds() {
        let mut raw = minimal_radiotap(2437);
        raw.extend(mgmt_header(0, 8, [0xff; 6], [0x11; 6], [0x22; 6]));
        raw.extend_from_slice(&0u64.to_le_bytes()); // timestamp
        raw.extend_from_slice(&0u16.to_le_bytes()); // interval
        raw.extend_from_slice(&0u16.to_le_bytes()); // capabilities
        raw.extend(ie(IE_SSID, b"home"));
        raw.extend(ie(IE_DS_PARAMETER_SET, &[6]));

        let e = decode_frame(&raw, 1234).expect("beacon decoded");
        assert_eq!(e.r#type, EventType::Beacon);
        assert_eq!(e.ssid.as_deref(), Some("home"));
        assert_eq!(e.band, Band::TwoPointFour);
        assert_eq!(e.chan, 6);
        assert_eq!(e.src.as_deref(), Some("11:11:11:11:11:11"));
        assert_eq!(e.bssid.as_deref(), Some("22:22:22:22:22:22"));
    }

    #[test]
    fn beacon_without_rsn_ie_leaves_rsn_fields_null() {
        let mut raw = minimal_radiotap(2412);
        raw.extend(mgmt_header(0, 8, [0xff; 6], [0x11; 6], [0x22; 6]));
        raw.extend_from_slice(&[0u8; 12]);
        raw.extend(ie(IE_SSID, b"x"));

        let e = decode_frame(&raw, 0).unwrap();
        assert!(e.rsn_akms.is_none());
        assert!(e.rsn_ciphers.is_none());
    }

    #[test]
    fn deauth_frame_decodes_without_ssid() {
        let mut raw = minimal_radiotap(2412);
        raw.extend(mgmt_header(0, SUBTYPE_DEAUTH, [0xff; 6], [0x11; 6], [0x22; 6]));
        raw.extend_from_slice(&0u16.to_le_bytes()); // reason code

        let e = decode_frame(&raw, 0).unwrap();
        assert_eq!(e.r#type, EventType::Deauth);
        assert!(e.ssid.is_none());
    }

    #[test]
    fn non_management_frame_is_not_interesting() {
        let mut raw = minimal_radiotap(2412);
        raw.extend(mgmt_header(2, 0, [0xff; 6], [0x11; 6], [0x22; 6])); // data frame
        assert!(decode_frame(&raw, 0).is_none());
    }

    #[test]
    fn truncated_frame_returns_none() {
        let raw = minimal_radiotap(2412);
        assert!(decode_frame(&raw, 0).is_none());
    }

    #[test]
    fn replay_without_radiotap_channel_falls_back_to_hint() {
        // Bare 8-byte radiotap header, no present fields at all: no DS
        // element in the beacon body either, so only the hint can supply
        // band/channel — as when replaying a pre-captured frame.
        let mut raw = vec![0u8, 0u8, 8, 0, 0, 0, 0, 0];
        raw.extend(mgmt_header(0, SUBTYPE_BEACON, [0xff; 6], [0x11; 6], [0x22; 6]));
        raw.extend_from_slice(&[0u8; 12]);
        raw.extend(ie(IE_SSID, b"home"));

        let e = decode_with_hint(&raw, 0, Some((Band::Five, 40))).unwrap();
        assert_eq!(e.band, Band::Five);
        assert_eq!(e.chan, 40);
    }
}
