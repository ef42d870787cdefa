//! Capture loop.
//!
//! Opens the monitor-mode interface with libpcap, checks that frames arrive
//! Radiotap-wrapped, starts the channel hopper, and then parses every frame
//! and forwards the resulting events until the running flag is cleared.
//! Shutdown order: leave the loop, stop and join the hopper, release the
//! capture handle, then flush whatever telemetry is still pending.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use colored::Colorize;
use pcap::{Active, Capture, Device, Linktype, PacketHeader};

use crate::error::{Result, SnifferError};
use crate::hopper::{ChannelHopper, ChannelPolicy, HttpPolicySource};
use crate::parser::{self, ManagementBody, ManagementFrame, RawFrame};
use crate::platform;
use crate::sender::Dispatcher;
use crate::telemetry::{Forwarder, HttpTransport, OutboundEvent};
use crate::traffic::TrafficTally;
use crate::vendor::MacOuiVendors;

/// DLT_IEEE802_11_RADIO: 802.11 frames behind a Radiotap header.
const DLT_RADIOTAP: i32 = 127;

/// Emit a liveness line every this-many frames.
pub const LIVENESS_EVERY: u64 = 100;

/// Data-volume accounting settings.
#[derive(Debug, Clone)]
pub struct TrafficConfig {
    pub flush_after: Duration,
    pub max_stations: usize,
}

/// Configuration for the capture loop.
#[derive(Debug, Clone)]
pub struct CaptureConfig {
    /// Interface name to capture on.
    pub interface: String,
    /// Base URL of the ingestion service (also serves the hop policy).
    pub api_url: String,
    /// Ask libpcap to put the interface into monitor mode.
    pub rfmon: bool,
    /// 0 = forward inside the capture callback; otherwise queue depth.
    pub queue_depth: usize,
    /// `Some` enables data-frame volume accounting.
    pub traffic: Option<TrafficConfig>,
}

/// Open the interface and make sure it delivers Radiotap frames.
fn open_capture(cfg: &CaptureConfig) -> Result<Capture<Active>> {
    let device = Device::from(cfg.interface.as_str());

    let mut inactive = Capture::from_device(device)?
        .promisc(true)
        .snaplen(65535)
        .timeout(1000) // 1-second read timeout so we can check `running`
        .immediate_mode(true);

    if cfg.rfmon {
        log::info!("Requesting monitor mode (rfmon) via libpcap.");
        inactive = inactive.rfmon(true);
    }

    let mut cap = inactive.open()?;

    if cap.get_datalink().0 != DLT_RADIOTAP {
        if let Err(e) = cap.set_datalink(Linktype(DLT_RADIOTAP)) {
            log::debug!("Could not set DLT_IEEE802_11_RADIO ({DLT_RADIOTAP}): {e}");
        }
    }

    let dlt = cap.get_datalink().0;
    log::info!("Active datalink type: {} ({})", dlt, dlt_name(dlt));
    if dlt != DLT_RADIOTAP {
        return Err(SnifferError::WrongLinkType {
            expected: DLT_RADIOTAP,
            actual: dlt,
            name: dlt_name(dlt),
        });
    }

    Ok(cap)
}

/// Run the capture loop until `running` is cleared.
///
/// Errors before the loop starts are fatal startup errors.  A capture error
/// inside the loop ends it and still goes through the normal shutdown.
pub fn run(cfg: CaptureConfig, running: Arc<AtomicBool>) -> Result<()> {
    let mut cap = open_capture(&cfg)?;

    let forwarder = Forwarder::new(
        Box::new(HttpTransport::new(&cfg.api_url)?),
        Box::new(MacOuiVendors),
    );
    let dispatcher = if cfg.queue_depth > 0 {
        Dispatcher::queued(forwarder, cfg.queue_depth)?
    } else {
        Dispatcher::inline(forwarder)
    };
    let traffic = cfg
        .traffic
        .as_ref()
        .map(|t| TrafficTally::new(t.max_stations, t.flush_after));
    let mut processor = FrameProcessor::new(dispatcher, traffic);

    let policy_source = HttpPolicySource::new(&cfg.api_url)?;
    let policy = ChannelPolicy::initial(&policy_source);
    let hopper = ChannelHopper::new(
        &cfg.interface,
        platform::create_radio(),
        Box::new(policy_source),
        policy,
        Arc::clone(&running),
    )
    .spawn()?;

    println!(
        "\n{}",
        format!(
            "  Sniffing on {} — reporting to {} — channel hopping {} ({} ms)",
            cfg.interface,
            cfg.api_url,
            if policy.enabled { "on" } else { "off" },
            policy.hop_interval_ms
        )
        .bold()
    );
    println!("  {}", "Press Ctrl-C to stop.\n".dimmed());

    let result = loop {
        if !running.load(Ordering::Relaxed) {
            break Ok(());
        }
        match cap.next_packet() {
            Ok(packet) => {
                let raw = RawFrame::new(packet.data, packet.header.caplen, capture_time(packet.header));
                processor.process(&raw);
            }
            Err(pcap::Error::TimeoutExpired) => {
                // Expected; flush idle tallies and re-check the running flag.
                processor.idle(wall_clock());
            }
            Err(e) => {
                log::error!("Capture error: {e}");
                break Err(SnifferError::from(e));
            }
        }
    };

    // ── Teardown ────────────────────────────────────────────────────────
    hopper.stop();
    drop(cap);
    let processed = processor.processed();
    let dispatcher = processor.finish();
    let dropped = dispatcher.dropped();
    dispatcher.shutdown();
    if dropped > 0 {
        log::info!("Capture stopped after {processed} frames ({dropped} events dropped)");
    } else {
        log::info!("Capture stopped after {processed} frames");
    }

    result
}

fn wall_clock() -> Duration {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::ZERO)
}

fn capture_time(header: &PacketHeader) -> Duration {
    let secs = u64::try_from(header.ts.tv_sec).unwrap_or(0);
    let micros = u32::try_from(header.ts.tv_usec).unwrap_or(0).min(999_999);
    Duration::new(secs, micros * 1000)
}

// ---------------------------------------------------------------------------
// Per-frame processing
// ---------------------------------------------------------------------------

/// Parses frames and dispatches the events they yield.  Owned by the
/// capture thread.
pub struct FrameProcessor {
    dispatcher: Dispatcher,
    traffic: Option<TrafficTally>,
    processed: u64,
}

impl FrameProcessor {
    pub fn new(dispatcher: Dispatcher, traffic: Option<TrafficTally>) -> Self {
        Self {
            dispatcher,
            traffic,
            processed: 0,
        }
    }

    pub fn processed(&self) -> u64 {
        self.processed
    }

    pub fn process(&mut self, raw: &RawFrame<'_>) {
        self.processed += 1;
        if liveness_due(self.processed) {
            log::info!("Processed {} frames", self.processed);
        }

        if let Some(frame) = parser::parse_management(raw) {
            for event in events_for(&frame) {
                log::debug!("{} {} (rssi {})", event.kind(), event.address(), frame.rssi);
                self.dispatcher.dispatch(event);
            }
            return;
        }

        if let Some(tally) = self.traffic.as_mut() {
            if let Some(info) = parser::parse_data_header(raw) {
                if info.transmitter.is_broadcast() {
                    return;
                }
                let flushed = tally.record(info.transmitter, info.frame_len, raw.timestamp);
                for event in flushed {
                    self.dispatcher.dispatch(event);
                }
            }
        }
    }

    /// Called when the capture read times out: report tallies whose window
    /// has passed even though no further data frame arrived.
    pub fn idle(&mut self, now: Duration) {
        if let Some(tally) = self.traffic.as_mut() {
            for event in tally.flush_expired(now) {
                self.dispatcher.dispatch(event);
            }
        }
    }

    /// Flush pending data tallies and hand back the dispatcher.
    pub fn finish(mut self) -> Dispatcher {
        if let Some(mut tally) = self.traffic.take() {
            for event in tally.drain() {
                self.dispatcher.dispatch(event);
            }
        }
        self.dispatcher
    }
}

fn liveness_due(processed: u64) -> bool {
    processed > 0 && processed % LIVENESS_EVERY == 0
}

/// Map one decoded management frame to the events it represents.
pub fn events_for(frame: &ManagementFrame) -> Vec<OutboundEvent> {
    let header = &frame.header;
    match &frame.body {
        ManagementBody::Beacon(beacon) => {
            if header.addr3.is_broadcast() {
                return Vec::new();
            }
            vec![OutboundEvent::AccessPoint {
                bssid: header.addr3,
                ssid: beacon.ssid.clone(),
                channel: beacon.channel,
                rssi: frame.rssi,
                encryption: Some(beacon.security.as_str()),
            }]
        }
        ManagementBody::ProbeRequest(probe) => {
            if header.addr2.is_broadcast() {
                return Vec::new();
            }
            vec![OutboundEvent::Device {
                mac: header.addr2,
                rssi: frame.rssi,
                probe_ssid: probe.ssid.clone(),
            }]
        }
        ManagementBody::AssociationRequest | ManagementBody::ReassociationRequest => {
            if header.addr2.is_broadcast() {
                return Vec::new();
            }
            let bssid = Some(header.addr1).filter(|a| !a.is_broadcast());
            vec![
                OutboundEvent::Device {
                    mac: header.addr2,
                    rssi: frame.rssi,
                    probe_ssid: None,
                },
                OutboundEvent::Connection {
                    mac: header.addr2,
                    bssid,
                },
            ]
        }
        ManagementBody::Disassociation | ManagementBody::Deauthentication => {
            // Either side may send these; report the station, not the AP.
            let station = if header.addr2 == header.addr3 {
                header.addr1
            } else {
                header.addr2
            };
            if station.is_broadcast() {
                return Vec::new();
            }
            vec![OutboundEvent::Disconnection { mac: station }]
        }
    }
}

/// Human-readable name for common DLT values.
fn dlt_name(dlt: i32) -> &'static str {
    match dlt {
        0 => "NULL/Loopback",
        1 => "Ethernet (EN10MB)",
        105 => "IEEE 802.11 (raw)",
        119 => "IEEE 802.11 PrismHeader",
        127 => "IEEE 802.11 Radiotap",
        163 => "IEEE 802.11 AVS",
        _ => "Unknown",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mac::MacAddr;
    use crate::parser::tests::{beacon_frame, dot11, ie, probe_frame, radiotap, AP, STA};
    use crate::parser::{FRAME_TYPE_DATA, FRAME_TYPE_MGMT, IE_SSID, SUBTYPE_ASSOC_REQ, SUBTYPE_DEAUTH};
    use crate::telemetry::tests::{vendors, RecordingTransport};

    fn processor(traffic: Option<TrafficTally>) -> (FrameProcessor, RecordingTransport) {
        let transport = RecordingTransport::default();
        let forwarder = Forwarder::new(Box::new(transport.clone()), vendors());
        (
            FrameProcessor::new(Dispatcher::inline(forwarder), traffic),
            transport,
        )
    }

    fn raw_at(data: &[u8], secs: u64) -> RawFrame<'_> {
        RawFrame::new(data, data.len() as u32, Duration::from_secs(secs))
    }

    fn parse(data: &[u8]) -> ManagementFrame {
        parser::parse_management(&raw_at(data, 0)).unwrap()
    }

    #[test]
    fn test_beacon_becomes_access_point() {
        let frame = parse(&beacon_frame("TestNet", 6, 0x0011, &ie(48, &[1, 0])));
        assert_eq!(
            events_for(&frame),
            vec![OutboundEvent::AccessPoint {
                bssid: MacAddr(AP),
                ssid: "TestNet".to_string(),
                channel: 6,
                rssi: -50,
                encryption: Some("WPA2"),
            }]
        );
    }

    #[test]
    fn test_probe_becomes_device() {
        let frame = parse(&probe_frame(&ie(IE_SSID, b"Home")));
        assert_eq!(
            events_for(&frame),
            vec![OutboundEvent::Device {
                mac: MacAddr(STA),
                rssi: -50,
                probe_ssid: Some("Home".to_string()),
            }]
        );
    }

    #[test]
    fn test_association_becomes_device_and_connection() {
        let mut data = radiotap(None);
        data.extend(dot11(SUBTYPE_ASSOC_REQ, FRAME_TYPE_MGMT, AP, STA, AP));
        let events = events_for(&parse(&data));
        assert_eq!(
            events,
            vec![
                OutboundEvent::Device {
                    mac: MacAddr(STA),
                    rssi: -100,
                    probe_ssid: None,
                },
                OutboundEvent::Connection {
                    mac: MacAddr(STA),
                    bssid: Some(MacAddr(AP)),
                },
            ]
        );
    }

    #[test]
    fn test_deauth_reports_station() {
        // Station → AP.
        let mut data = radiotap(None);
        data.extend(dot11(SUBTYPE_DEAUTH, FRAME_TYPE_MGMT, AP, STA, AP));
        assert_eq!(
            events_for(&parse(&data)),
            vec![OutboundEvent::Disconnection { mac: MacAddr(STA) }]
        );

        // AP → station.
        let mut data = radiotap(None);
        data.extend(dot11(SUBTYPE_DEAUTH, FRAME_TYPE_MGMT, STA, AP, AP));
        assert_eq!(
            events_for(&parse(&data)),
            vec![OutboundEvent::Disconnection { mac: MacAddr(STA) }]
        );

        // AP → everyone.
        let mut data = radiotap(None);
        data.extend(dot11(SUBTYPE_DEAUTH, FRAME_TYPE_MGMT, [0xFF; 6], AP, AP));
        assert!(events_for(&parse(&data)).is_empty());
    }

    #[test]
    fn test_process_forwards_and_counts() {
        let (mut processor, transport) = processor(None);
        let beacon = beacon_frame("TestNet", 6, 0, &[]);
        let probe = probe_frame(&ie(IE_SSID, b""));
        let mut data_frame = radiotap(None);
        data_frame.extend(dot11(0, FRAME_TYPE_DATA, AP, STA, AP));

        processor.process(&raw_at(&beacon, 1));
        processor.process(&raw_at(&probe, 1));
        processor.process(&raw_at(&data_frame, 1));
        processor.process(&raw_at(&beacon[..10], 1));
        assert_eq!(processor.processed(), 4);

        let sent = transport.sent.lock().unwrap();
        let paths: Vec<&str> = sent.iter().map(|(p, _)| p.as_str()).collect();
        assert_eq!(paths, vec!["/ingest/access-point", "/ingest/device"]);
        assert_eq!(
            sent[1].1,
            r#"{"mac_address":"00:11:22:33:44:55","rssi":-50,"vendor":"Acme Radios"}"#
        );
    }

    #[test]
    fn test_liveness_every_hundred_frames() {
        let (mut processor, _transport) = processor(None);
        let beacon = beacon_frame("TestNet", 6, 0, &[]);
        let mut due = Vec::new();
        for _ in 0..250 {
            processor.process(&raw_at(&beacon[..10], 1));
            if liveness_due(processor.processed()) {
                due.push(processor.processed());
            }
        }
        assert_eq!(processor.processed(), 250);
        assert_eq!(due, vec![100, 200]);
        assert!(!liveness_due(0));
    }

    #[test]
    fn test_idle_flushes_expired_tallies() {
        let tally = TrafficTally::new(16, Duration::from_secs(30));
        let (mut processor, transport) = processor(Some(tally));
        let mut data_frame = radiotap(None);
        data_frame.extend(dot11(0, FRAME_TYPE_DATA, AP, STA, AP));

        processor.process(&raw_at(&data_frame, 100));
        processor.idle(Duration::from_secs(120));
        assert!(transport.sent.lock().unwrap().is_empty());

        processor.idle(Duration::from_secs(130));
        let sent = transport.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, "/ingest/data");
    }

    #[test]
    fn test_process_tallies_data_when_enabled() {
        let tally = TrafficTally::new(16, Duration::from_secs(30));
        let (mut processor, transport) = processor(Some(tally));
        let mut data_frame = radiotap(None);
        data_frame.extend(dot11(0, FRAME_TYPE_DATA, AP, STA, AP));
        data_frame.extend_from_slice(&[0; 76]);

        processor.process(&raw_at(&data_frame, 100));
        processor.process(&raw_at(&data_frame, 110));
        assert!(transport.sent.lock().unwrap().is_empty());

        // Past the flush window: the first tally is reported.
        processor.process(&raw_at(&data_frame, 131));
        {
            let sent = transport.sent.lock().unwrap();
            assert_eq!(sent.len(), 1);
            assert_eq!(sent[0].0, "/ingest/data");
            assert_eq!(
                sent[0].1,
                r#"{"mac_address":"00:11:22:33:44:55","frame_count":2,"byte_count":200}"#
            );
        }

        processor.finish().shutdown();
        let sent = transport.sent.lock().unwrap();
        assert_eq!(sent.len(), 2);
        assert_eq!(
            sent[1].1,
            r#"{"mac_address":"00:11:22:33:44:55","frame_count":1,"byte_count":100}"#
        );
    }
}
