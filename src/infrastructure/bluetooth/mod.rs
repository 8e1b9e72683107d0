//! Bluetooth Module
//!
//! BLE communication with Headware smart helmets.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │                     HelmetManager                        │
//! │   (worker loop - public API, owns all session state)     │
//! └─────────────────────┬───────────────────────────────────┘
//!                       │
//!         ┌─────────────┼─────────────┐
//!         │             │             │
//!         ▼             ▼             ▼
//! ┌───────────┐  ┌────────────┐  ┌──────────┐
//! │  Scanner  │  │  Session   │  │  Radio   │
//! │           │  │            │  │          │
//! │ - dedup   │  │ - state    │  │ - seam   │
//! │ - prefix  │  │   machine  │  │ - btleplug│
//! │   filter  │  │ - handle   │  │   backend │
//! └───────────┘  └────────────┘  └──────────┘
//! ```
//!
//! ## Modules
//!
//! - [`protocol`] - Helmet UUIDs, name prefix, and message conventions
//! - [`radio`] - Platform radio seam and its btleplug implementation
//! - [`scanner`] - Discovered-device set for one scan session
//! - [`manager`] - The connection manager worker

pub mod manager;
pub mod protocol;
pub mod radio;
pub mod scanner;

// Re-export the manager for convenience
pub use manager::{HelmetManager, LinkConfig};
