//! Patchbay Engine
//!
//! The router engine: a supervisor task owning UDP and TCP workers, a
//! read-only routing index, and the dispatch logic that rewrites and
//! forwards each inbound packet.
//!
//! ```no_run
//! use patchbay_core::{Route, StatusTable};
//! use patchbay_engine::Engine;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut engine = Engine::new();
//!     engine.start(Vec::<Route>::new(), Vec::new(), StatusTable::new(), 5000)?;
//!
//!     let mut log = Vec::new();
//!     let mut status = StatusTable::new();
//!     engine.flush(&mut log, &mut status);
//!
//!     engine.stop().await;
//!     Ok(())
//! }
//! ```

mod dispatch;
mod index;
mod psn_bridge;
mod supervisor;

pub mod error;
pub mod nic;
pub mod script;
pub mod workers;

pub use error::{EngineError, Result};
pub use nic::{local_ipv4_nics, Nic};
pub use script::ScriptEngine;
pub use supervisor::Engine;
