//! Helmet connection core for the Headware workplace-safety client.
//!
//! Discovers Headware smart helmets over BLE, pairs with one, and relays
//! characteristic traffic, publishing a typed [`HelmetEvent`] for every
//! observable change. The platform radio sits behind the [`HelmetRadio`]
//! seam injected at construction, so the whole state machine runs against a
//! scripted radio in tests and against btleplug in the binary.

pub mod domain;
pub mod error;
pub mod infrastructure;

pub use domain::models::{
    CharacteristicMessage, DiscoveredDevice, HelmetCommand, HelmetEvent, MessageDirection,
    MessageSeverity, ServiceHandle, SessionState, StatusMessage,
};
pub use domain::session::ConnectionSession;
pub use domain::settings::{LogSettings, Settings, SettingsService};
pub use error::LinkError;
pub use infrastructure::bluetooth::manager::{HelmetManager, LinkConfig};
pub use infrastructure::bluetooth::radio::{
    HelmetRadio, RadioEvent, RadioEventReceiver, RadioEventSender, SystemRadio,
};
