//! Linux channel control through nl80211, via the `iw` utility.
//!
//! `iw dev <iface> set channel <N>` requires `CAP_NET_ADMIN` (run as root).
//! The interface must already be in monitor mode; managed-mode interfaces
//! reject channel changes while associated.

use std::io;

use super::{run, RadioControl};

#[derive(Default)]
pub struct IwRadio;

impl IwRadio {
    pub fn new() -> Self {
        Self
    }
}

impl RadioControl for IwRadio {
    fn set_channel(&self, iface: &str, channel: u8) -> io::Result<()> {
        let ch = channel.to_string();
        run("iw", &["dev", iface, "set", "channel", &ch]).map(|_| ())
    }
}
