//! # flux-sniffer
//!
//! Passive 802.11 telemetry sensor.  Captures Radiotap-wrapped frames from a
//! monitor-mode interface, decodes beacons, probe requests and association
//! traffic, and forwards one JSON event per sighting to an ingestion API.
//! A background thread hops the radio across the 2.4 GHz channels under a
//! policy that the same API serves and that is re-read every few seconds.
//!
//! Layout:
//! - [`parser`]: Radiotap + 802.11 header + information-element decoding
//! - [`hopper`]: channel hopping coordinator and its policy
//! - [`telemetry`]: event payloads and the HTTP forwarder
//! - [`sender`]: inline or queued dispatch of events
//! - [`traffic`]: optional per-station data-volume tally
//! - [`capture`]: the capture loop tying it all together

pub mod capture;
pub mod error;
pub mod hopper;
pub mod mac;
pub mod parser;
pub mod platform;
pub mod sender;
pub mod telemetry;
pub mod traffic;
pub mod vendor;
