//! macOS channel control through `ifconfig` (the `airport` CLI is gone).
//!
//! The interface is expected to be in monitor mode already (libpcap rfmon or
//! `ifconfig <iface> monitor`); the channel is then set with
//! `ifconfig <iface> channel <N>`.  Requires **root** (`sudo`).

use std::io;

use super::{run, RadioControl};

#[derive(Default)]
pub struct MacOsRadio;

impl MacOsRadio {
    pub fn new() -> Self {
        Self
    }
}

impl RadioControl for MacOsRadio {
    fn set_channel(&self, iface: &str, channel: u8) -> io::Result<()> {
        let ch = channel.to_string();
        run("ifconfig", &[iface, "channel", &ch]).map(|_| ())
    }
}
