//! Channel hopping coordinator.
//!
//! A background thread that walks the radio through [`CHANNELS`] at the
//! cadence given by a [`ChannelPolicy`], re-fetching that policy from the
//! ingestion service every [`POLICY_REFRESH`].  A failed refresh keeps the
//! current policy; only the very first fetch at startup falls back to
//! [`ChannelPolicy::FALLBACK`].
//!
//! The policy is owned by the hopper thread alone.  The only state shared
//! with the capture thread is the `running` flag.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use reqwest::blocking::Client;
use serde::Deserialize;
use serde_json::Value;

use crate::error::{Result, SnifferError};
use crate::platform::RadioControl;

/// 2.4 GHz hop order: non-overlapping 1/6/11 first, the rest interleaved.
pub const CHANNELS: [u8; 11] = [1, 6, 11, 2, 7, 3, 8, 4, 9, 5, 10];

pub const MIN_HOP_INTERVAL_MS: u64 = 50;
pub const MAX_HOP_INTERVAL_MS: u64 = 10_000;

/// How often the policy is re-fetched.
pub const POLICY_REFRESH: Duration = Duration::from_secs(5);

const POLICY_TIMEOUT: Duration = Duration::from_secs(2);

/// Longest single sleep, so a stop request is noticed promptly.
const TICK: Duration = Duration::from_millis(50);

// ---------------------------------------------------------------------------
// Policy
// ---------------------------------------------------------------------------

/// Clamp a requested hop interval into the supported range.
pub fn clamp_interval_ms(ms: i64) -> u64 {
    ms.clamp(MIN_HOP_INTERVAL_MS as i64, MAX_HOP_INTERVAL_MS as i64) as u64
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelPolicy {
    pub enabled: bool,
    /// Always within [`MIN_HOP_INTERVAL_MS`, `MAX_HOP_INTERVAL_MS`].
    pub hop_interval_ms: u64,
}

impl ChannelPolicy {
    /// Used when the startup fetch fails, and as the base for missing fields.
    pub const FALLBACK: ChannelPolicy = ChannelPolicy {
        enabled: true,
        hop_interval_ms: 300,
    };

    pub fn hop_interval(&self) -> Duration {
        Duration::from_millis(self.hop_interval_ms)
    }

    /// Overlay the fields present in `update`; absent ones keep their value.
    pub fn apply(&self, update: &PolicyUpdate) -> ChannelPolicy {
        ChannelPolicy {
            enabled: update.enabled.unwrap_or(self.enabled),
            hop_interval_ms: update
                .hop_interval_ms
                .map(|ms| ms.clamp(MIN_HOP_INTERVAL_MS, MAX_HOP_INTERVAL_MS))
                .unwrap_or(self.hop_interval_ms),
        }
    }

    /// Startup fetch: any failure falls back to [`Self::FALLBACK`].
    pub fn initial(source: &dyn PolicySource) -> ChannelPolicy {
        match source.fetch() {
            Ok(update) => Self::FALLBACK.apply(&update),
            Err(e) => {
                log::warn!(
                    "Channel policy fetch failed ({e}); using default (enabled, {} ms)",
                    Self::FALLBACK.hop_interval_ms
                );
                Self::FALLBACK
            }
        }
    }
}

/// The fields a policy document actually carried, after validation.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct PolicyUpdate {
    pub enabled: Option<bool>,
    pub hop_interval_ms: Option<u64>,
}

/// Wire shape of `GET /config/channel-hopping`.  Values are kept loose so
/// one badly typed field does not discard the other.
#[derive(Debug, Deserialize)]
struct PolicyDocument {
    #[serde(default)]
    enabled: Option<Value>,
    #[serde(default, alias = "hop_interval_ms")]
    timeout_ms: Option<Value>,
}

impl PolicyUpdate {
    /// Parse a policy document.  Unknown fields are ignored; a field of the
    /// wrong JSON type is treated as missing.  The body must be an object.
    pub fn from_json(body: &str) -> Result<Self> {
        let value: Value = serde_json::from_str(body)?;
        if !value.is_object() {
            return Err(SnifferError::Policy(format!(
                "expected a JSON object, got {}",
                json_kind(&value)
            )));
        }
        let doc: PolicyDocument = serde_json::from_value(value)?;
        let enabled = doc.enabled.as_ref().and_then(Value::as_bool);
        let hop_interval_ms = doc.timeout_ms.as_ref().and_then(|v| {
            v.as_i64()
                .map(clamp_interval_ms)
                .or_else(|| v.as_u64().map(|_| MAX_HOP_INTERVAL_MS))
        });
        Ok(Self {
            enabled,
            hop_interval_ms,
        })
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

pub trait PolicySource: Send {
    fn fetch(&self) -> Result<PolicyUpdate>;
}

/// Fetches the policy from `{base}/config/channel-hopping`.
pub struct HttpPolicySource {
    client: Client,
    url: String,
}

impl HttpPolicySource {
    pub fn new(base_url: &str) -> Result<Self> {
        let client = Client::builder().timeout(POLICY_TIMEOUT).build()?;
        Ok(Self {
            client,
            url: format!("{}/config/channel-hopping", base_url.trim_end_matches('/')),
        })
    }
}

impl PolicySource for HttpPolicySource {
    fn fetch(&self) -> Result<PolicyUpdate> {
        let body = self.client.get(&self.url).send()?.error_for_status()?.text()?;
        PolicyUpdate::from_json(&body)
    }
}

// ---------------------------------------------------------------------------
// Coordinator
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HopState {
    Hopping,
    Disabled,
    Stopped,
}

pub struct ChannelHopper {
    iface: String,
    radio: Box<dyn RadioControl>,
    source: Box<dyn PolicySource>,
    policy: ChannelPolicy,
    refresh_every: Duration,
    running: Arc<AtomicBool>,
    next_channel: usize,
}

impl ChannelHopper {
    pub fn new(
        iface: &str,
        radio: Box<dyn RadioControl>,
        source: Box<dyn PolicySource>,
        policy: ChannelPolicy,
        running: Arc<AtomicBool>,
    ) -> Self {
        Self {
            iface: iface.to_string(),
            radio,
            source,
            policy,
            refresh_every: POLICY_REFRESH,
            running,
            next_channel: 0,
        }
    }

    pub fn with_refresh_period(mut self, period: Duration) -> Self {
        self.refresh_every = period;
        self
    }

    pub fn state(&self) -> HopState {
        if !self.running.load(Ordering::Relaxed) {
            HopState::Stopped
        } else if self.policy.enabled {
            HopState::Hopping
        } else {
            HopState::Disabled
        }
    }

    /// Start the hopper thread.
    pub fn spawn(self) -> Result<HopperHandle> {
        let running = Arc::clone(&self.running);
        let thread = thread::Builder::new()
            .name("channel-hopper".into())
            .spawn(move || self.run())?;
        Ok(HopperHandle { running, thread })
    }

    fn run(mut self) {
        log::info!(
            "Channel hopper started on {} ({:?}, {} ms)",
            self.iface,
            self.state(),
            self.policy.hop_interval_ms
        );

        let mut next_refresh = Instant::now() + self.refresh_every;
        let mut next_hop = Instant::now();

        while self.running.load(Ordering::Relaxed) {
            let now = Instant::now();
            if now >= next_refresh {
                self.refresh();
                next_refresh = Instant::now() + self.refresh_every;
            }

            let wake = if self.policy.enabled {
                if now >= next_hop {
                    self.hop();
                    next_hop = now + self.policy.hop_interval();
                }
                next_hop.min(next_refresh)
            } else {
                // Resume immediately once re-enabled.
                next_hop = now;
                next_refresh
            };

            thread::sleep(wake.saturating_duration_since(Instant::now()).min(TICK));
        }

        log::debug!("Channel hopper stopped");
    }

    fn refresh(&mut self) {
        match self.source.fetch() {
            Ok(update) => {
                let next = self.policy.apply(&update);
                if next.enabled != self.policy.enabled {
                    log::info!(
                        "Channel hopping {}",
                        if next.enabled { "enabled" } else { "disabled" }
                    );
                }
                if next.hop_interval_ms != self.policy.hop_interval_ms {
                    log::info!("Channel hop interval set to {} ms", next.hop_interval_ms);
                }
                self.policy = next;
            }
            Err(e) => log::debug!("Channel policy refresh failed, keeping current policy: {e}"),
        }
    }

    fn hop(&mut self) {
        let channel = CHANNELS[self.next_channel];
        self.next_channel = (self.next_channel + 1) % CHANNELS.len();
        if let Err(e) = self.radio.set_channel(&self.iface, channel) {
            log::debug!("Failed to set channel {channel} on {}: {e}", self.iface);
        }
    }
}

/// Owner-side handle of a running hopper thread.
pub struct HopperHandle {
    running: Arc<AtomicBool>,
    thread: JoinHandle<()>,
}

impl HopperHandle {
    /// Clear the running flag and wait for the thread to exit.
    pub fn stop(self) {
        self.running.store(false, Ordering::Relaxed);
        if self.thread.join().is_err() {
            log::error!("Channel hopper thread panicked");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io;
    use std::sync::Mutex;

    use super::*;

    #[derive(Clone, Default)]
    struct RecordingRadio {
        calls: Arc<Mutex<Vec<(Instant, u8)>>>,
    }

    impl RecordingRadio {
        fn channels(&self) -> Vec<u8> {
            self.calls.lock().unwrap().iter().map(|(_, ch)| *ch).collect()
        }
    }

    impl RadioControl for RecordingRadio {
        fn set_channel(&self, iface: &str, channel: u8) -> io::Result<()> {
            assert_eq!(iface, "wlan0");
            self.calls.lock().unwrap().push((Instant::now(), channel));
            Ok(())
        }
    }

    struct FnSource<F>(F);

    impl<F> PolicySource for FnSource<F>
    where
        F: Fn() -> Result<PolicyUpdate> + Send,
    {
        fn fetch(&self) -> Result<PolicyUpdate> {
            (self.0)()
        }
    }

    fn unreachable_source() -> Box<dyn PolicySource> {
        Box::new(FnSource(|| -> Result<PolicyUpdate> {
            Err(SnifferError::Io(io::Error::new(
                io::ErrorKind::ConnectionRefused,
                "connection refused",
            )))
        }))
    }

    fn run_for(
        policy: ChannelPolicy,
        source: Box<dyn PolicySource>,
        refresh: Duration,
        duration: Duration,
    ) -> RecordingRadio {
        let radio = RecordingRadio::default();
        let running = Arc::new(AtomicBool::new(true));
        let hopper = ChannelHopper::new("wlan0", Box::new(radio.clone()), source, policy, running)
            .with_refresh_period(refresh);
        let handle = hopper.spawn().unwrap();
        thread::sleep(duration);
        handle.stop();
        radio
    }

    #[test]
    fn test_policy_document_parsing() {
        let update =
            PolicyUpdate::from_json(r#"{"enabled":false,"timeout_ms":750,"channels":[1,6],"extra":"x"}"#)
                .unwrap();
        assert_eq!(
            update,
            PolicyUpdate {
                enabled: Some(false),
                hop_interval_ms: Some(750)
            }
        );
    }

    #[test]
    fn test_policy_interval_clamped() {
        let low = PolicyUpdate::from_json(r#"{"timeout_ms":10}"#).unwrap();
        assert_eq!(low.hop_interval_ms, Some(50));
        let negative = PolicyUpdate::from_json(r#"{"timeout_ms":-5}"#).unwrap();
        assert_eq!(negative.hop_interval_ms, Some(50));
        let high = PolicyUpdate::from_json(r#"{"timeout_ms":99999}"#).unwrap();
        assert_eq!(high.hop_interval_ms, Some(10_000));
        let huge = PolicyUpdate::from_json(r#"{"timeout_ms":18446744073709551615}"#).unwrap();
        assert_eq!(huge.hop_interval_ms, Some(10_000));
    }

    #[test]
    fn test_policy_malformed_fields_are_missing() {
        let update = PolicyUpdate::from_json(r#"{"enabled":"yes","timeout_ms":"fast"}"#).unwrap();
        assert_eq!(update, PolicyUpdate::default());
        let current = ChannelPolicy {
            enabled: false,
            hop_interval_ms: 900,
        };
        assert_eq!(current.apply(&update), current);
    }

    #[test]
    fn test_policy_interval_alias() {
        assert_eq!(
            PolicyUpdate::from_json(r#"{"enabled":true,"hop_interval_ms":700}"#).unwrap(),
            PolicyUpdate {
                enabled: Some(true),
                hop_interval_ms: Some(700),
            }
        );
        let clamped = PolicyUpdate::from_json(r#"{"hop_interval_ms":20}"#).unwrap();
        assert_eq!(clamped.hop_interval_ms, Some(MIN_HOP_INTERVAL_MS));
    }

    #[test]
    fn test_policy_not_an_object() {
        assert!(matches!(
            PolicyUpdate::from_json("[true,300]"),
            Err(SnifferError::Policy(_))
        ));
        assert!(matches!(
            PolicyUpdate::from_json("42"),
            Err(SnifferError::Policy(_))
        ));
        assert!(matches!(
            PolicyUpdate::from_json("enabled=true"),
            Err(SnifferError::Json(_))
        ));
    }

    #[test]
    fn test_initial_policy() {
        assert_eq!(
            ChannelPolicy::initial(unreachable_source().as_ref()),
            ChannelPolicy::FALLBACK
        );
        let partial = FnSource(|| -> Result<PolicyUpdate> {
            Ok(PolicyUpdate {
                enabled: Some(false),
                hop_interval_ms: None,
            })
        });
        assert_eq!(
            ChannelPolicy::initial(&partial),
            ChannelPolicy {
                enabled: false,
                hop_interval_ms: 300
            }
        );
    }

    #[test]
    fn test_hops_through_full_list_in_order() {
        let policy = ChannelPolicy {
            enabled: true,
            hop_interval_ms: 50,
        };
        let radio = run_for(
            policy,
            unreachable_source(),
            POLICY_REFRESH,
            Duration::from_millis(800),
        );
        let channels = radio.channels();
        assert!(channels.len() >= 12, "only {} directives", channels.len());
        assert_eq!(&channels[..11], &CHANNELS);
        assert_eq!(channels[11], CHANNELS[0]);
    }

    #[test]
    fn test_hop_cadence() {
        let radio = run_for(
            ChannelPolicy::FALLBACK,
            unreachable_source(),
            POLICY_REFRESH,
            Duration::from_millis(1000),
        );
        let calls = radio.calls.lock().unwrap().clone();
        // Scheduling jitter on a busy machine only ever delays hops.
        assert!((2..=4).contains(&calls.len()), "{} directives", calls.len());
        for pair in calls.windows(2) {
            let gap = pair[1].0 - pair[0].0;
            assert!(gap >= Duration::from_millis(280), "gap {gap:?}");
            assert!(gap < Duration::from_millis(700), "gap {gap:?}");
        }
    }

    #[test]
    fn test_disabled_issues_no_directives() {
        let policy = ChannelPolicy {
            enabled: false,
            hop_interval_ms: 50,
        };
        let radio = run_for(
            policy,
            unreachable_source(),
            Duration::from_millis(100),
            Duration::from_millis(350),
        );
        assert!(radio.channels().is_empty());
    }

    #[test]
    fn test_refresh_disables_hopping() {
        let policy = ChannelPolicy {
            enabled: true,
            hop_interval_ms: 50,
        };
        let source = Box::new(FnSource(|| -> Result<PolicyUpdate> {
            Ok(PolicyUpdate {
                enabled: Some(false),
                hop_interval_ms: None,
            })
        }));
        let radio = RecordingRadio::default();
        let running = Arc::new(AtomicBool::new(true));
        let handle = ChannelHopper::new("wlan0", Box::new(radio.clone()), source, policy, running)
            .with_refresh_period(Duration::from_millis(120))
            .spawn()
            .unwrap();
        thread::sleep(Duration::from_millis(250));
        let after_refresh = radio.channels().len();
        thread::sleep(Duration::from_millis(250));
        handle.stop();
        assert!(after_refresh >= 1);
        assert_eq!(radio.channels().len(), after_refresh);
    }

    #[test]
    fn test_refresh_failure_keeps_hopping() {
        let policy = ChannelPolicy {
            enabled: true,
            hop_interval_ms: 50,
        };
        let radio = run_for(
            policy,
            unreachable_source(),
            Duration::from_millis(60),
            Duration::from_millis(500),
        );
        assert!(radio.channels().len() >= 6);
    }

    #[test]
    fn test_stop_is_prompt() {
        let policy = ChannelPolicy {
            enabled: true,
            hop_interval_ms: MAX_HOP_INTERVAL_MS,
        };
        let running = Arc::new(AtomicBool::new(true));
        let hopper = ChannelHopper::new(
            "wlan0",
            Box::new(RecordingRadio::default()),
            unreachable_source(),
            policy,
            Arc::clone(&running),
        );
        assert_eq!(hopper.state(), HopState::Hopping);
        let handle = hopper.spawn().unwrap();
        thread::sleep(Duration::from_millis(20));
        let started = Instant::now();
        handle.stop();
        assert!(started.elapsed() < Duration::from_millis(500));
        assert!(!running.load(Ordering::Relaxed));
    }

    #[test]
    fn test_state_reflects_policy_and_flag() {
        let running = Arc::new(AtomicBool::new(true));
        let hopper = ChannelHopper::new(
            "wlan0",
            Box::new(RecordingRadio::default()),
            unreachable_source(),
            ChannelPolicy {
                enabled: false,
                hop_interval_ms: 300,
            },
            Arc::clone(&running),
        );
        assert_eq!(hopper.state(), HopState::Disabled);
        running.store(false, Ordering::Relaxed);
        assert_eq!(hopper.state(), HopState::Stopped);
    }
}
