//! # PACE SCPI
//!
//! Client library for GE Druck PACE 5000/6000 pressure controllers, which
//! speak a SCPI-style line protocol over TCP.
//!
//! ## Crate Structure
//!
//! - **`attribute`**: `Attribute<T>` descriptors (command template plus
//!   decoder/encoder) and the `Request<T>` they render to.
//! - **`batch`**: packs many requests into as few protocol lines as possible
//!   and splits the replies back into per-request results.
//! - **`cache`**: result cache for attributes that never change at runtime.
//! - **`codec`**: payload decoders and encoders.
//! - **`device`**: the `Pace` device, its modules and the attribute tables.
//! - **`engine`**: blocking and future-based execution of requests.
//! - **`transport`**: TCP transports and the `MockTransport` used in tests.
//! - **`simulator`**: in-process controller answering the same protocol.
//! - **`frontend`**: named-attribute server with device state tracking.
//! - **`config`** / **`logging`**: Figment configuration and tracing setup.
//!
//! ## Example
//!
//! ```
//! use pace_scpi::device::{Controller, Pace};
//! use pace_scpi::simulator::PaceSimulator;
//!
//! let pace = Pace::blocking(PaceSimulator::default());
//! let module = pace.module(1).unwrap();
//! module.set_src_pressure_setpoint(1500.0).unwrap();
//! assert_eq!(module.src_pressure_setpoint().unwrap(), 1500.0);
//! ```

pub mod attribute;
pub mod batch;
pub mod cache;
pub mod codec;
pub mod config;
pub mod device;
pub mod engine;
pub mod error;
pub mod frontend;
pub mod logging;
pub mod simulator;
pub mod transport;
pub mod value;

pub use attribute::{Attribute, Request};
pub use batch::{Batch, Replies, Slot};
pub use device::{Controller, Module, Pace};
pub use engine::{BlockingEngine, Engine, FutureEngine, TransportKind};
pub use error::{PaceError, PaceResult};
pub use value::{AttrValue, Value};
