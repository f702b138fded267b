#![allow(
    clippy::missing_errors_doc,
    clippy::missing_panics_doc,
    clippy::doc_markdown,
    clippy::too_long_first_doc_paragraph
)]

//! modbus_regmap
//!
//! A client for devices that describe their own Modbus holding registers. The
//! device streams a CSV-like register map through a fixed register window;
//! the client parses it into typed registers, decodes and encodes values
//! through per-register packing specs, and keeps them fresh with a background
//! poll loop.
//!
//! Main parts:
//! - map download with a UUID-keyed local cache (`map_source`, `cache`)
//! - map parsing and the packing codec (`map_parser`, `codec`)
//! - the live register set and its poll loop (`store`, `poller`)
//! - a blocking Modbus TCP/RTU transport over `tokio-modbus` (`mb_client`)
//!   and a mock device for tests (separate crate `modbus_regmap_mock`)
//!
//! ```no_run
//! use modbus_regmap::{ClientOptions, ConnectionTarget, RegMapClient};
//!
//! let target = ConnectionTarget::direct("192.168.0.20", 502, 1);
//! let client = RegMapClient::open(target, None, &ClientOptions::new())?;
//! let watcher = client.clone();
//! client.start_polling(move || {
//!     if let Ok(text) = watcher.portray("TEMP") {
//!         println!("TEMP = {text}");
//!     }
//! })?;
//! # Ok::<(), modbus_regmap::RegMapError>(())
//! ```

pub mod cache;
pub mod client;
pub mod client_config;
pub mod codec;
pub mod config;
pub mod display;
pub mod endpoint;
pub mod error;
pub mod map_parser;
pub mod map_source;
pub mod mb_client;
pub mod mb_define;
pub mod poller;
pub mod register;
pub mod store;
pub mod transport;

pub use client::RegMapClient;
pub use client_config::{ClientConfig, ClientOptions};
pub use codec::{FormatCodec, SemanticType, Value};
pub use endpoint::{ConnectionTarget, Link};
pub use error::RegMapError;
pub use map_parser::DeviceLegend;
pub use poller::{PollState, SweepReport};
pub use register::{Register, RegisterDescriptor};
pub use store::{RegisterKey, RegisterStore, SortOrder};
pub use transport::RegisterTransport;
