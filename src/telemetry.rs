//! Telemetry forwarding to the ingestion API.
//!
//! Each [`OutboundEvent`] is serialised to a compact JSON object and POSTed to
//! an event-kind-specific path under the configured base URL.  Nothing is
//! kept locally: a failed POST is not retried, and only the first
//! [`FAILURE_LOG_BUDGET`] failures per event kind are logged.

use std::fmt;
use std::time::Duration;

use reqwest::blocking::Client;
use reqwest::header::CONTENT_TYPE;
use serde::Serialize;

use crate::error::Result;
use crate::mac::MacAddr;
use crate::vendor::VendorLookup;

/// Fixed per-request timeout for ingestion POSTs.
pub const INGEST_TIMEOUT: Duration = Duration::from_secs(2);

/// Failure log entries per event kind per process lifetime.
pub const FAILURE_LOG_BUDGET: u32 = 5;

// ---------------------------------------------------------------------------
// Events
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Device,
    AccessPoint,
    Connection,
    Disconnection,
    Data,
}

impl EventKind {
    const COUNT: usize = 5;

    pub fn path(&self) -> &'static str {
        match self {
            EventKind::Device => "/ingest/device",
            EventKind::AccessPoint => "/ingest/access-point",
            EventKind::Connection => "/ingest/connection",
            EventKind::Disconnection => "/ingest/disconnection",
            EventKind::Data => "/ingest/data",
        }
    }

    fn index(self) -> usize {
        self as usize
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            EventKind::Device => "Device",
            EventKind::AccessPoint => "AP",
            EventKind::Connection => "Connection",
            EventKind::Disconnection => "Disconnection",
            EventKind::Data => "Data",
        };
        f.write_str(label)
    }
}

/// Something worth telling the ingestion service about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutboundEvent {
    Device {
        mac: MacAddr,
        rssi: i8,
        /// Omitted from the payload when `None` or empty.
        probe_ssid: Option<String>,
    },
    AccessPoint {
        bssid: MacAddr,
        ssid: String,
        channel: u8,
        rssi: i8,
        encryption: Option<&'static str>,
    },
    Connection {
        mac: MacAddr,
        bssid: Option<MacAddr>,
    },
    Disconnection {
        mac: MacAddr,
    },
    Data {
        mac: MacAddr,
        frame_count: u64,
        byte_count: u64,
    },
}

#[derive(Serialize)]
struct DevicePayload<'a> {
    mac_address: MacAddr,
    rssi: i8,
    #[serde(skip_serializing_if = "Option::is_none")]
    probe_ssid: Option<&'a str>,
    vendor: String,
}

#[derive(Serialize)]
struct AccessPointPayload<'a> {
    bssid: MacAddr,
    ssid: &'a str,
    channel: u8,
    rssi: i8,
    #[serde(skip_serializing_if = "Option::is_none")]
    encryption: Option<&'static str>,
}

#[derive(Serialize)]
struct ConnectionPayload {
    mac_address: MacAddr,
    #[serde(skip_serializing_if = "Option::is_none")]
    bssid: Option<MacAddr>,
}

#[derive(Serialize)]
struct DisconnectionPayload {
    mac_address: MacAddr,
}

#[derive(Serialize)]
struct DataPayload {
    mac_address: MacAddr,
    frame_count: u64,
    byte_count: u64,
}

impl OutboundEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            OutboundEvent::Device { .. } => EventKind::Device,
            OutboundEvent::AccessPoint { .. } => EventKind::AccessPoint,
            OutboundEvent::Connection { .. } => EventKind::Connection,
            OutboundEvent::Disconnection { .. } => EventKind::Disconnection,
            OutboundEvent::Data { .. } => EventKind::Data,
        }
    }

    /// The hardware address the event is about.
    pub fn address(&self) -> MacAddr {
        match self {
            OutboundEvent::Device { mac, .. }
            | OutboundEvent::Connection { mac, .. }
            | OutboundEvent::Disconnection { mac }
            | OutboundEvent::Data { mac, .. } => *mac,
            OutboundEvent::AccessPoint { bssid, .. } => *bssid,
        }
    }

    /// Compact JSON body.  Device events are enriched with the vendor name.
    pub fn to_json(&self, vendors: &dyn VendorLookup) -> Result<String> {
        let body = match self {
            OutboundEvent::Device {
                mac,
                rssi,
                probe_ssid,
            } => serde_json::to_string(&DevicePayload {
                mac_address: *mac,
                rssi: *rssi,
                probe_ssid: probe_ssid.as_deref().filter(|s| !s.is_empty()),
                vendor: vendors.vendor_name(mac),
            })?,
            OutboundEvent::AccessPoint {
                bssid,
                ssid,
                channel,
                rssi,
                encryption,
            } => serde_json::to_string(&AccessPointPayload {
                bssid: *bssid,
                ssid,
                channel: *channel,
                rssi: *rssi,
                encryption: *encryption,
            })?,
            OutboundEvent::Connection { mac, bssid } => serde_json::to_string(&ConnectionPayload {
                mac_address: *mac,
                bssid: *bssid,
            })?,
            OutboundEvent::Disconnection { mac } => {
                serde_json::to_string(&DisconnectionPayload { mac_address: *mac })?
            }
            OutboundEvent::Data {
                mac,
                frame_count,
                byte_count,
            } => serde_json::to_string(&DataPayload {
                mac_address: *mac,
                frame_count: *frame_count,
                byte_count: *byte_count,
            })?,
        };
        Ok(body)
    }
}

// ---------------------------------------------------------------------------
// Transport
// ---------------------------------------------------------------------------

/// Delivers one JSON body to `{base}{path}`.
pub trait Transport: Send {
    fn post_json(&self, path: &str, body: String) -> Result<()>;
}

/// Blocking HTTP transport with the fixed ingestion timeout.
pub struct HttpTransport {
    client: Client,
    base_url: String,
}

impl HttpTransport {
    pub fn new(base_url: &str) -> Result<Self> {
        let client = Client::builder().timeout(INGEST_TIMEOUT).build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }
}

impl Transport for HttpTransport {
    fn post_json(&self, path: &str, body: String) -> Result<()> {
        self.client
            .post(format!("{}{}", self.base_url, path))
            .header(CONTENT_TYPE, "application/json")
            .body(body)
            .send()?
            .error_for_status()?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Forwarder
// ---------------------------------------------------------------------------

pub struct Forwarder {
    transport: Box<dyn Transport>,
    vendors: Box<dyn VendorLookup>,
    failures_logged: [u32; EventKind::COUNT],
}

impl Forwarder {
    pub fn new(transport: Box<dyn Transport>, vendors: Box<dyn VendorLookup>) -> Self {
        Self {
            transport,
            vendors,
            failures_logged: [0; EventKind::COUNT],
        }
    }

    /// Serialise and send one event.  Never fails from the caller's point of
    /// view; errors only show up in the (bounded) log.
    pub fn forward(&mut self, event: &OutboundEvent) {
        let kind = event.kind();
        let result = event
            .to_json(self.vendors.as_ref())
            .and_then(|body| self.transport.post_json(kind.path(), body));
        if let Err(e) = result {
            if let Some(line) = self.note_failure(kind, &e) {
                log::warn!("{line}");
            }
        }
    }

    /// Number of failure entries logged so far for `kind`.
    pub fn failures_logged(&self, kind: EventKind) -> u32 {
        self.failures_logged[kind.index()]
    }

    /// Count a failure and return the log line for it, if the budget for
    /// `kind` still allows one.
    fn note_failure(&mut self, kind: EventKind, err: &dyn fmt::Display) -> Option<String> {
        let logged = &mut self.failures_logged[kind.index()];
        if *logged >= FAILURE_LOG_BUDGET {
            return None;
        }
        *logged += 1;
        if *logged == FAILURE_LOG_BUDGET {
            Some(format!("{kind} POST failed: {err} (further {kind} failures suppressed)"))
        } else {
            Some(format!("{kind} POST failed: {err}"))
        }
    }
}
