//! mcu-uds - UDS diagnostic core of the MCU node
//!
//! The MCU sits on a CAN bus with peripheral units and an external API. It
//! serves a subset of UDS (session control, security access, tester present,
//! data identifiers and the download/transfer services used for OTA firmware
//! updates) and relays traffic between the API and the peripheral units.
//!
//! # Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────┐
//! │                         Dispatcher                            │
//! │   ingress task(s) ──> FrameQueue ──> processing task          │
//! │                                          │                    │
//! │                                   ┌──────┴──────┐             │
//! │                                   │ServiceRouter│ reassembly, │
//! │                                   │             │ routing     │
//! │                                   └──────┬──────┘             │
//! │                                          │                    │
//! │  ┌──────────────────────── McuContext ───┴─────────────────┐  │
//! │  │ SecurityAccess  Session/S3  RequestDownload  TransferData│  │
//! │  │ ReadDataById    DidStore (OTA state)     MemoryStore     │  │
//! │  └──────────────────────────────────────────────────────────┘  │
//! │                                                               │
//! │   timer task ──> S3 keep-alive + security lockout             │
//! └───────────────────────────────────────────────────────────────┘
//! ```

pub mod config;
pub mod context;
pub mod did;
pub mod dispatcher;
pub mod error;
pub mod frame;
pub mod isotp;
pub mod memory;
pub mod queue;
pub mod router;
pub mod timer;
pub mod transport;
pub mod uds;

pub use config::{ConfigError, McuConfig};
pub use context::McuContext;
pub use did::{DidStore, OtaTransferState};
pub use dispatcher::{Dispatcher, DispatcherHandle};
pub use error::McuError;
pub use frame::{Frame, FrameError, FrameId};
pub use memory::{MemoryError, MemoryStore};
pub use queue::FrameQueue;
pub use router::{Outbound, ServiceRouter};
pub use timer::{Clock, ManualClock, ScheduledTimer, SystemClock};
pub use transport::{open_transport, FrameTransport, MockTransport, TransportError};
pub use uds::NegativeResponseCode;
