//! Radio control over an external `iw`/`ip` toolchain.
//!
//! There is no netlink/nl80211 binding in the dependency stack, so control
//! is done the same way the sensor this crate replaces did it: shell out to
//! the standard Linux wireless tools and parse their plain-text output.

use tokio::process::Command;

use crate::error::{Error, ErrorKind, Result};

/// Whether a monitor-mode interface is currently usable.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LinkState {
    Up,
    Down,
    /// `ip` reported neither UP nor DOWN; treated as usable.
    Unknown,
}

impl LinkState {
    pub fn is_usable(&self) -> bool {
        !matches!(self, LinkState::Down)
    }
}

/// Sets the operating channel/frequency on a monitor-mode interface and
/// reports interface link state, via `iw` and `ip`.
///
/// Implemented with native `async fn` rather than `#[async_trait]`: every
/// call site in this crate holds a concrete `RadioControl` behind a generic
/// parameter, never a `dyn RadioControl`, so no boxed-future adapter is
/// needed.
pub trait RadioControl: Send + Sync {
    /// Tunes `iface` to `freq_mhz`. Returns `Err(ErrorKind::RadioControl)` on
    /// any non-zero exit or spawn failure.
    fn set_frequency(&self, iface: &str, freq_mhz: u32) -> impl std::future::Future<Output = Result<()>> + Send;

    /// Reports whether `iface` currently has link.
    fn link_state(&self, iface: &str) -> impl std::future::Future<Output = Result<LinkState>> + Send;
}

/// `RadioControl` backed by the `iw` and `ip` command-line tools.
#[derive(Clone, Copy, Debug, Default)]
pub struct IwRadioControl;

impl RadioControl for IwRadioControl {
    async fn set_frequency(&self, iface: &str, freq_mhz: u32) -> Result<()> {
        let output = Command::new("iw")
            .args(["dev", iface, "set", "freq", &freq_mhz.to_string()])
            .output()
            .await
            .map_err(|e| Error::with_message(ErrorKind::RadioControl(iface.to_string()), e.to_string()))?;

        if output.status.success() {
            Ok(())
        } else {
            Err(Error::with_message(
                ErrorKind::RadioControl(iface.to_string()),
                String::from_utf8_lossy(&output.stderr).trim().to_string(),
            ))
        }
    }

    async fn link_state(&self, iface: &str) -> Result<LinkState> {
        let output = Command::new("ip")
            .args(["-br", "link", "show", iface])
            .output()
            .await
            .map_err(|e| Error::with_message(ErrorKind::RadioControl(iface.to_string()), e.to_string()))?;

        if !output.status.success() {
            return Err(Error::with_message(
                ErrorKind::RadioControl(iface.to_string()),
                String::from_utf8_lossy(&output.stderr).trim().to_string(),
            ));
        }

        let text = String::from_utf8_lossy(&output.stdout);
        let state = text.split_whitespace().nth(1).unwrap_or("");
        Ok(match state {
            "UP" => LinkState::Up,
            "DOWN" => LinkState::Down,
            _ => LinkState::Unknown,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn down_is_not_usable_unknown_is() {
        assert!(!LinkState::Down.is_usable());
        assert!(LinkState::Unknown.is_usable());
        assert!(LinkState::Up.is_usable());
    }
}
