use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::errors::TapClawResult;

/// Navigation keys the automation loops press.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceKey {
    Home,
    Back,
    AppSwitch,
}

impl DeviceKey {
    /// Android `input keyevent` name.
    pub fn keycode(&self) -> &'static str {
        match self {
            DeviceKey::Home => "KEYCODE_HOME",
            DeviceKey::Back => "KEYCODE_BACK",
            DeviceKey::AppSwitch => "KEYCODE_APP_SWITCH",
        }
    }
}

/// Screen capture and input injection for one device.
///
/// Implementations report a missing or offline device as
/// [`TapClawError::DeviceUnavailable`](crate::errors::TapClawError::DeviceUnavailable)
/// so callers can stop retrying.
#[async_trait]
pub trait DeviceTransport: Send + Sync {
    /// Encoded screenshot (PNG from adb).
    async fn capture_screen(&self) -> TapClawResult<Vec<u8>>;
    async fn tap(&self, x: i32, y: i32) -> TapClawResult<()>;
    async fn press_key(&self, key: DeviceKey) -> TapClawResult<()>;
}
