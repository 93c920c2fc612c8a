//! RSN (Robust Security Network) information element parsing.
//!
//! Best-effort, cursor-style reader: a selector list that runs out of bytes
//! mid-count simply stops, rather than erroring out the whole beacon.

use std::collections::BTreeSet;

/// A 4-byte AKM or cipher suite selector, formatted `oo:oo:oo:s`.
pub type Selector = String;

/// Parsed contents of an RSN information element (element id 48).
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RsnInfo {
    /// AKM (authentication key management) selectors.
    pub akms: BTreeSet<Selector>,
    /// Cipher suite selectors (group cipher plus any pairwise ciphers).
    pub ciphers: BTreeSet<Selector>,
}

impl RsnInfo {
    /// Formats `akms` as a sorted comma-joined string, or `None` if empty.
    pub fn akms_joined(&self) -> Option<String> {
        join_or_none(&self.akms)
    }

    /// Formats `ciphers` as a sorted comma-joined string, or `None` if empty.
    pub fn ciphers_joined(&self) -> Option<String> {
        join_or_none(&self.ciphers)
    }
}

fn join_or_none(set: &BTreeSet<Selector>) -> Option<String> {
    if set.is_empty() {
        None
    } else {
        Some(set.iter().cloned().collect::<Vec<_>>().join(","))
    }
}

fn format_selector(bytes: &[u8; 4]) -> Selector {
    format!("{:02x}:{:02x}:{:02x}:{}", bytes[0], bytes[1], bytes[2], bytes[3])
}

struct Cursor<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    fn take(&mut self, n: usize) -> Option<&'a [u8]> {
        if self.pos + n > self.data.len() {
            return None;
        }
        let slice = &self.data[self.pos..self.pos + n];
        self.pos += n;
        Some(slice)
    }

    fn take_u16_le(&mut self) -> Option<u16> {
        let b = self.take(2)?;
        Some(u16::from_le_bytes([b[0], b[1]]))
    }

    fn take_selector(&mut self) -> Option<[u8; 4]> {
        let b = self.take(4)?;
        Some([b[0], b[1], b[2], b[3]])
    }
}

/// Parses the payload of an RSN information element (element id 48).
///
/// Layout (all counts little-endian): version (2 bytes, discarded), group
/// cipher suite (4 bytes), pairwise cipher count (2 bytes) + that many
/// 4-byte selectors, AKM count (2 bytes) + that many 4-byte selectors. Any
/// truncation returns what was parsed so far rather than an error.
pub fn parse_rsn_ie(payload: &[u8]) -> RsnInfo {
    let mut info = RsnInfo::default();
    let mut cur = Cursor::new(payload);

    // version
    if cur.take(2).is_none() {
        return info;
    }

    let group = match cur.take_selector() {
        Some(s) => s,
        None => return info,
    };
    info.ciphers.insert(format_selector(&group));

    let pairwise_count = match cur.take_u16_le() {
        Some(c) => c,
        None => return info,
    };
    for _ in 0..pairwise_count {
        match cur.take_selector() {
            Some(s) => {
                info.ciphers.insert(format_selector(&s));
            }
            None => return info,
        }
    }

    let akm_count = match cur.take_u16_le() {
        Some(c) => c,
        None => return info,
    };
    for _ in 0..akm_count {
        match cur.take_selector() {
            Some(s) => {
                info.akms.insert(format_selector(&s));
            }
            None => return info,
        }
    }

    info
}
