//! Platform-specific radio control.
//!
//! The channel hopper only needs one capability from the OS: "tune interface
//! I to channel N".  Each platform module provides it behind [`RadioControl`]
//! so the hopper can be driven by an in-memory fake in tests.

#[cfg(target_os = "linux")]
pub mod linux;

#[cfg(target_os = "macos")]
pub mod macos;

use std::io;
use std::process::Command;

/// Trait that each platform module implements.
pub trait RadioControl: Send {
    /// Tune the (monitor-mode) interface to a channel.  Idempotent and
    /// best-effort: callers ignore failures beyond debug logging.
    fn set_channel(&self, iface: &str, channel: u8) -> io::Result<()>;
}

/// Return the platform-appropriate [`RadioControl`].
pub fn create_radio() -> Box<dyn RadioControl> {
    #[cfg(target_os = "linux")]
    {
        Box::new(linux::IwRadio::new())
    }
    #[cfg(target_os = "macos")]
    {
        Box::new(macos::MacOsRadio::new())
    }
    #[cfg(not(any(target_os = "linux", target_os = "macos")))]
    {
        compile_error!("Unsupported platform — only Linux and macOS are supported");
    }
}

/// Run a command, returning an `io::Error` on non-zero exit.
fn run(cmd: &str, args: &[&str]) -> io::Result<String> {
    let output = Command::new(cmd).args(args).output()?;
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(io::Error::other(format!(
            "`{cmd} {}` failed: {}",
            args.join(" "),
            stderr.trim()
        )));
    }
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}
