//! # nakime
//!
//! Worker pool supervisor for long-running processes.
//!
//! Keeps a fixed number of workers running from one start script: crashed
//! workers are replaced in the same slot, workers past their maximum age are
//! rotated, and shutdown drains the pool with SIGTERM before escalating to
//! SIGKILL.
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use nakime::{PoolConfig, Supervisor};
//!
//! # #[tokio::main]
//! # async fn main() {
//! let mut config = PoolConfig::new("server.sh");
//! config.workers = 4;
//! config.timeouts.max_age = 60 * 60 * 1000;
//!
//! let supervisor = Supervisor::new(config)
//!     .unwrap()
//!     .with_signal_handling(true);
//! supervisor.run().await.unwrap();
//! # }
//! ```

pub mod config;
pub mod error;
pub mod event;
pub mod policy;
pub mod process;
pub mod types;

mod router;
mod scheduler;
mod shutdown;
mod supervisor;
mod worker;

pub use config::{PoolConfig, Timeouts};
pub use error::{ConfigError, SupervisorError};
pub use event::{PoolEvent, WorkerExit};
pub use policy::RestartPolicy;
pub use supervisor::{Supervisor, SupervisorHandle};
pub use types::*;
