#![deny(missing_docs)]
#![deny(unsafe_code)]
#![deny(rust_2018_idioms)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

//! # isuper-bike
//!
//! A Rust client for iSuper exercise-bike consoles that speak the vendor's
//! text protocol over a local TCP connection.
//!
//! The console's Wi-Fi module listens on port 1971 (link-local address
//! `169.254.1.1` out of the box). Every message is a short ASCII frame:
//!
//! - **Framing**: `<CODE_DATA>`, several frames may share one read and a frame
//!   may be split across reads
//! - **Initialization**: a fixed handshake (`EQ`, `EP`, `ER`, `EA`, `ED`, `EM`,
//!   `Ez`) where every announcement must be acknowledged, with pacing delays
//! - **Sport data**: `W6` frames polled with `<WB_6>`, carrying distance,
//!   cadence, pulse, level, calories and power
//! - **Control**: resistance (`CR`), run/pause (`CP`), clear (`CC`) and
//!   access point setup (`AS`, `AK`, `AP`)
//!
//! A sleeping console is woken by a UDP broadcast of its password on the same
//! port before the TCP connection is retried.
//!
//! The [`program`] module maps a timed workout (segments plus level
//! breakpoints) onto the resistance level to send.
//!
//! ## Quick Start
//!
//! ```no_run
//! use isuper_bike::{BikeDevice, ConnectionParams, TimeoutConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut bike = BikeDevice::new(ConnectionParams::default(), TimeoutConfig::default());
//!     bike.connect_and_initialize().await?;
//!
//!     bike.start_sport().await?;
//!     bike.set_level(5).await?;
//!
//!     for _ in 0..50 {
//!         bike.update_data().await?;
//!         tokio::time::sleep(std::time::Duration::from_millis(200)).await;
//!     }
//!
//!     bike.pause_sport().await?;
//!     bike.disconnect().await;
//!     Ok(())
//! }
//! ```

/// Frame splitting over a byte stream
pub mod codec;
/// Main device control interface
pub mod device;
/// Error types and handling
pub mod error;
/// Initialization handshake state machine
pub mod handshake;
/// Workout program scheduling
pub mod program;
/// Protocol commands and frame parsing
pub mod protocol;
/// Sport data decoding
pub mod telemetry;
/// TCP link to the console
pub mod transport;
/// Type definitions and data structures
pub mod types;

// Re-export the main types for convenient usage
pub use device::{BikeDevice, StatusHandle};
pub use error::{BikeError, Result};
pub use handshake::{HandshakeOutcome, HandshakeState};
pub use program::{Breakpoint, LevelGovernor, ProgramProgress, SegmentInfo, SportProgram};
pub use protocol::{Command, ParsedCommand};
pub use transport::{FrameLink, ReceiveOutcome, Transport};
pub use types::{
    BikeStatus, ConnectionParams, DeviceInfo, LinkStats, MemoryMarker, Telemetry, TimeoutConfig,
    UnitType,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Factory address of the console's Wi-Fi module
pub const DEFAULT_ADDRESS: &str = "169.254.1.1";

/// TCP port of the console, also used for the UDP wake broadcast
pub const DEFAULT_PORT: u16 = 1971;

/// Payload of the UDP wake broadcast
///
/// Same token the console announces as its password during initialization.
pub const WAKE_TOKEN: &str = protocol::CONSOLE_PASSWORD;
