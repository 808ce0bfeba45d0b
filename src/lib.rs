//! # AMI Client Library
//!
//! An asynchronous, stream-oriented client engine for the Asterisk Manager
//! Interface (AMI).
//!
//! - **Ordered records**: wire blocks become ordered key/value [`Record`]s,
//!   repeated field names preserved.
//! - **FIFO response correlation**: replies are matched to requests purely
//!   by send order on the single connection; `EventList` bursts are folded
//!   into one [`LogicalResponse`] before delivery.
//! - **Event fan-out**: callback subscriptions by event name (or `"*"`),
//!   each delivery on its own task, plus a broadcast-backed event stream.
//! - **Asynchronous operations**: fully based on Tokio.
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use ami_client::{Manager, ManagerOptions};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), ami_client::AmiError> {
//!     let options = ManagerOptions {
//!         port: 5038,
//!         host: "127.0.0.1".to_string(),
//!         username: "hello".to_string(),
//!         password: "world".to_string(),
//!         events: true,
//!     };
//!     let manager = Manager::new();
//!     manager.connect(options).await?;
//!
//!     manager
//!         .subscribe("Newchannel", |event| async move {
//!             println!("new channel: {:?}", event.get("Channel"));
//!         })
//!         .await;
//!
//!     let channels = manager.channels().await?;
//!     for record in channels.records() {
//!         println!("{record:?}");
//!     }
//!
//!     manager.close().await;
//!     Ok(())
//! }
//! ```
//!
//! ## Custom transports
//!
//! [`Manager::attach`] accepts any pair of tokio read/write halves, so the
//! engine runs unchanged over TCP, a TLS stream, or an in-memory duplex
//! pipe in tests. Reconnection policy is deliberately left to the caller:
//! [`Manager::closed`] resolves when the connection is gone and every
//! pending request has been failed.
//!
//! ## Requirements
//!
//! - Rust 1.70+
//! - Tokio (asynchronous runtime)

pub mod actions;

mod error;
mod events;
mod ledger;
mod manager;
mod protocol;
mod record;

pub use actions::{ActionFields, OriginateRequest, RedirectRequest};
pub use error::AmiError;
pub use events::{SubscriptionId, WILDCARD};
pub use manager::{EngineState, Manager, ManagerOptions};
pub use protocol::{LogicalResponse, RecordKind};
pub use record::Record;
