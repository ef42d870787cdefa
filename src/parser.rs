//! 802.11 frame and Radiotap header parsing.
//!
//! Decodes one captured buffer (Radiotap capture header + 802.11 MAC header +
//! management body) into a [`ManagementFrame`].  Everything here works on
//! borrowed slices and never indexes past the captured length: truncated
//! headers and overrunning information elements simply end the decode, and
//! whatever was extracted up to that point is returned.

use std::time::Duration;

use crate::mac::MacAddr;

/// Reported when the capture header carries no antenna-signal field.
pub const RSSI_UNKNOWN: i8 = -100;

/// version + pad + length + first presence word.
pub const RADIOTAP_MIN_LEN: usize = 8;

/// FC + Dur + Addr1 + Addr2 + Addr3 + SeqCtl.
pub const DOT11_HEADER_LEN: usize = 24;

/// Beacon timestamp (8) + beacon interval (2) + capability info (2).
const BEACON_FIXED_LEN: usize = 12;

const MAX_SSID_LEN: usize = 32;

// ---------------------------------------------------------------------------
// Raw frame
// ---------------------------------------------------------------------------

/// One buffer as handed over by the capture callback.
#[derive(Debug, Clone, Copy)]
pub struct RawFrame<'a> {
    pub data: &'a [u8],
    /// Number of bytes libpcap actually captured.
    pub captured_len: u32,
    /// Capture timestamp (since the Unix epoch).
    pub timestamp: Duration,
}

impl<'a> RawFrame<'a> {
    pub fn new(data: &'a [u8], captured_len: u32, timestamp: Duration) -> Self {
        Self {
            data,
            captured_len,
            timestamp,
        }
    }

    /// The bytes that may be read: never more than `captured_len`.
    pub fn bytes(&self) -> &'a [u8] {
        let len = self.data.len().min(self.captured_len as usize);
        &self.data[..len]
    }
}

// ---------------------------------------------------------------------------
// Radiotap header parsing
// ---------------------------------------------------------------------------

const RADIOTAP_PRESENT_SIGNAL: u32 = 1 << 5;
const RADIOTAP_PRESENT_EXT: u32 = 1 << 31;

/// Field metadata up to and including the antenna-signal field:
/// (bit index, size in bytes, alignment).
const RADIOTAP_FIELDS: &[(u8, usize, usize)] = &[
    (0, 8, 8), // TSFT
    (1, 1, 1), // Flags
    (2, 1, 1), // Rate
    (3, 4, 2), // Channel (freq u16 + flags u16)
    (4, 2, 1), // FHSS
    (5, 1, 1), // Antenna Signal dBm
];

fn align_up(offset: usize, align: usize) -> usize {
    (offset + align - 1) & !(align - 1)
}

/// Decoded Radiotap capture header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureHeader {
    pub version: u8,
    /// Total header length (offset where the 802.11 frame begins).
    pub header_len: usize,
    /// First presence bitmask word.
    pub present: u32,
    /// Antenna signal in dBm, or [`RSSI_UNKNOWN`].
    pub rssi: i8,
}

impl CaptureHeader {
    pub fn has_signal(&self) -> bool {
        self.present & RADIOTAP_PRESENT_SIGNAL != 0
    }
}

/// Parse the Radiotap header.  `data` must already be limited to the
/// captured length.
pub fn parse_capture_header(data: &[u8]) -> Option<CaptureHeader> {
    if data.len() < RADIOTAP_MIN_LEN {
        return None;
    }
    let version = data[0];
    if version != 0 {
        return None;
    }
    let header_len = u16::from_le_bytes([data[2], data[3]]) as usize;
    if header_len < RADIOTAP_MIN_LEN || header_len > data.len() {
        return None;
    }
    let present = u32::from_le_bytes([data[4], data[5], data[6], data[7]]);

    // Skip any extended presence words (bit 31 chains another u32).
    let mut word_offset = 4;
    let mut word = present;
    while word & RADIOTAP_PRESENT_EXT != 0 {
        word_offset += 4;
        if word_offset + 4 > header_len {
            return None;
        }
        word = u32::from_le_bytes([
            data[word_offset],
            data[word_offset + 1],
            data[word_offset + 2],
            data[word_offset + 3],
        ]);
    }

    let mut header = CaptureHeader {
        version,
        header_len,
        present,
        rssi: RSSI_UNKNOWN,
    };
    if header.has_signal() {
        let mut offset = word_offset + 4;
        for &(bit, size, align) in RADIOTAP_FIELDS {
            if present & (1 << bit) == 0 {
                continue;
            }
            offset = align_up(offset, align);
            if offset + size > header_len {
                break;
            }
            if bit == 5 {
                header.rssi = data[offset] as i8;
                break;
            }
            offset += size;
        }
    }

    Some(header)
}

// ---------------------------------------------------------------------------
// 802.11 MAC header
// ---------------------------------------------------------------------------

pub const FRAME_TYPE_MGMT: u8 = 0;
pub const FRAME_TYPE_DATA: u8 = 2;

pub const SUBTYPE_ASSOC_REQ: u8 = 0x0;
pub const SUBTYPE_REASSOC_REQ: u8 = 0x2;
pub const SUBTYPE_PROBE_REQ: u8 = 0x4;
pub const SUBTYPE_BEACON: u8 = 0x8;
pub const SUBTYPE_DISASSOC: u8 = 0xA;
pub const SUBTYPE_DEAUTH: u8 = 0xC;

/// Fixed 24-byte MAC header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dot11Header {
    pub version: u8,
    pub frame_type: u8,
    pub subtype: u8,
    pub duration: u16,
    /// Receiver / destination.
    pub addr1: MacAddr,
    /// Transmitter / source.
    pub addr2: MacAddr,
    /// BSSID for management frames.
    pub addr3: MacAddr,
    pub seq_ctrl: u16,
}

impl Dot11Header {
    pub fn parse(data: &[u8]) -> Option<Self> {
        if data.len() < DOT11_HEADER_LEN {
            return None;
        }
        // Frame Control, first octet: version 0-1, type 2-3, subtype 4-7.
        let fc0 = data[0];
        Some(Self {
            version: fc0 & 0x03,
            frame_type: (fc0 >> 2) & 0x03,
            subtype: (fc0 >> 4) & 0x0F,
            duration: u16::from_le_bytes([data[2], data[3]]),
            addr1: MacAddr::from_slice(&data[4..10])?,
            addr2: MacAddr::from_slice(&data[10..16])?,
            addr3: MacAddr::from_slice(&data[16..22])?,
            seq_ctrl: u16::from_le_bytes([data[22], data[23]]),
        })
    }
}

// ---------------------------------------------------------------------------
// Information elements
// ---------------------------------------------------------------------------

pub const IE_SSID: u8 = 0;
pub const IE_DS_PARAMETER: u8 = 3;
pub const IE_RSN: u8 = 48;
pub const IE_VENDOR_SPECIFIC: u8 = 221;

/// Microsoft WPA vendor IE: OUI 00:50:f2, type 1.
const WPA_VENDOR_PREFIX: [u8; 4] = [0x00, 0x50, 0xF2, 0x01];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InformationElement<'a> {
    pub id: u8,
    pub value: &'a [u8],
}

/// Tag-length-value walk over a management body.  Stops (without error) at
/// the first element whose declared length overruns the remaining bytes.
#[derive(Debug, Clone)]
pub struct InformationElements<'a> {
    rest: &'a [u8],
}

impl<'a> InformationElements<'a> {
    pub fn new(body: &'a [u8]) -> Self {
        Self { rest: body }
    }
}

impl<'a> Iterator for InformationElements<'a> {
    type Item = InformationElement<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.rest.len() < 2 {
            return None;
        }
        let id = self.rest[0];
        let len = self.rest[1] as usize;
        if 2 + len > self.rest.len() {
            self.rest = &[];
            return None;
        }
        let value = &self.rest[2..2 + len];
        self.rest = &self.rest[2 + len..];
        Some(InformationElement { id, value })
    }
}

fn decode_ssid(value: &[u8]) -> String {
    let len = value.len().min(MAX_SSID_LEN);
    String::from_utf8_lossy(&value[..len]).into_owned()
}

// ---------------------------------------------------------------------------
// Management frame bodies
// ---------------------------------------------------------------------------

/// Coarse security classification advertised by a beacon.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Security {
    Open,
    Wep,
    Wpa,
    Wpa2,
}

impl Security {
    pub fn as_str(&self) -> &'static str {
        match self {
            Security::Open => "Open",
            Security::Wep => "WEP",
            Security::Wpa => "WPA",
            Security::Wpa2 => "WPA2",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Beacon {
    /// Empty for hidden networks.
    pub ssid: String,
    /// 0 when no DS Parameter Set element was found.
    pub channel: u8,
    pub security: Security,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeRequest {
    /// `None`: no SSID element present.  `Some("")`: wildcard probe.
    pub ssid: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ManagementBody {
    Beacon(Beacon),
    ProbeRequest(ProbeRequest),
    AssociationRequest,
    ReassociationRequest,
    Disassociation,
    Deauthentication,
}

/// A decoded management frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManagementFrame {
    pub header: Dot11Header,
    pub rssi: i8,
    pub body: ManagementBody,
}

fn parse_beacon(body: &[u8]) -> Beacon {
    let mut beacon = Beacon {
        ssid: String::new(),
        channel: 0,
        security: Security::Open,
    };
    if body.len() < BEACON_FIXED_LEN {
        return beacon;
    }

    let capability = u16::from_le_bytes([body[10], body[11]]);
    let privacy = capability & 0x0010 != 0;
    let mut ssid_seen = false;
    let mut rsn = false;
    let mut wpa = false;

    for ie in InformationElements::new(&body[BEACON_FIXED_LEN..]) {
        match ie.id {
            IE_SSID if !ssid_seen => {
                beacon.ssid = decode_ssid(ie.value);
                ssid_seen = true;
            }
            IE_DS_PARAMETER if ie.value.len() == 1 => beacon.channel = ie.value[0],
            IE_RSN => rsn = true,
            IE_VENDOR_SPECIFIC if ie.value.starts_with(&WPA_VENDOR_PREFIX) => wpa = true,
            _ => {}
        }
    }

    beacon.security = match (privacy, rsn, wpa) {
        (false, _, _) => Security::Open,
        (true, true, _) => Security::Wpa2,
        (true, false, true) => Security::Wpa,
        (true, false, false) => Security::Wep,
    };
    beacon
}

fn parse_probe_request(body: &[u8]) -> ProbeRequest {
    let ssid = InformationElements::new(body)
        .find(|ie| ie.id == IE_SSID)
        .map(|ie| decode_ssid(ie.value));
    ProbeRequest { ssid }
}

/// Locate the 802.11 header behind a valid capture header.
fn split_frame<'a>(frame: &RawFrame<'a>) -> Option<(CaptureHeader, Dot11Header, &'a [u8])> {
    let data = frame.bytes();
    let capture = parse_capture_header(data)?;
    if data.len() < capture.header_len + DOT11_HEADER_LEN {
        return None;
    }
    let dot11 = &data[capture.header_len..];
    let header = Dot11Header::parse(dot11)?;
    Some((capture, header, &dot11[DOT11_HEADER_LEN..]))
}

/// Decode one captured buffer.  Returns `None` for non-management frames,
/// unhandled management subtypes, and buffers too short for the headers.
pub fn parse_management(frame: &RawFrame<'_>) -> Option<ManagementFrame> {
    let (capture, header, body) = split_frame(frame)?;
    if header.frame_type != FRAME_TYPE_MGMT {
        return None;
    }

    let body = match header.subtype {
        SUBTYPE_BEACON => ManagementBody::Beacon(parse_beacon(body)),
        SUBTYPE_PROBE_REQ => ManagementBody::ProbeRequest(parse_probe_request(body)),
        SUBTYPE_ASSOC_REQ => ManagementBody::AssociationRequest,
        SUBTYPE_REASSOC_REQ => ManagementBody::ReassociationRequest,
        SUBTYPE_DISASSOC => ManagementBody::Disassociation,
        SUBTYPE_DEAUTH => ManagementBody::Deauthentication,
        _ => return None,
    };

    Some(ManagementFrame {
        header,
        rssi: capture.rssi,
        body,
    })
}

/// Header-only view of a data frame, used for volume accounting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DataFrameInfo {
    pub transmitter: MacAddr,
    /// Captured bytes of the 802.11 frame (capture header excluded).
    pub frame_len: usize,
}

/// Decode only the MAC header of a data frame.  The body is never read.
pub fn parse_data_header(frame: &RawFrame<'_>) -> Option<DataFrameInfo> {
    let (capture, header, _) = split_frame(frame)?;
    if header.frame_type != FRAME_TYPE_DATA {
        return None;
    }
    Some(DataFrameInfo {
        transmitter: header.addr2,
        frame_len: frame.bytes().len() - capture.header_len,
    })
}
