//! # spanner-pool
//!
//! Session pooling for Spanner.
//!
//! Creating a session is a server round-trip, so sessions are kept and
//! reused across operations. A [`SessionPool`] holds the sessions of one
//! database; a [`SessionPoolManager`] shares pools between every connection
//! with the same database, transport and options.
//!
//! ## Features
//!
//! - Most-recently-used reuse of idle sessions
//! - Fair, cancellable waiting when the pool is at capacity
//! - Batched warm-up to a configurable minimum
//! - Idle eviction and periodic health checks in the background
//! - Retry with backoff for transient session-creation failures
//! - Graceful shutdown that waits for checked-out sessions
//! - Per-pool statistics and metrics for observability
//!
//! ## Example
//!
//! ```rust,ignore
//! use spanner_pool::{SessionPoolKey, SessionPoolManager, SessionPoolOptions};
//! use spanner_protocol::{CancellationToken, TransactionMode, TransportOptions};
//!
//! let manager = SessionPoolManager::new(factory);
//! let key = SessionPoolKey::new(
//!     database,
//!     TransportOptions::default(),
//!     SessionPoolOptions::new().min_sessions(10).max_sessions(100),
//! );
//!
//! let cancel = CancellationToken::new();
//! let pool = manager.acquire_pool(&key, &cancel).await?;
//!
//! let session = pool.acquire(TransactionMode::None, &cancel).await?;
//! // Use session...
//! drop(session); // returned to the pool
//!
//! let stats = pool.statistics();
//! println!("Pool utilization: {:.1}%", stats.utilization());
//!
//! manager.release_pool(&pool);
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod config;
pub mod error;
mod maintenance;
pub mod manager;
pub mod pool;
pub mod retry;
pub mod session;

pub use config::SessionPoolOptions;
pub use error::PoolError;
pub use manager::{SessionPoolKey, SessionPoolManager};
pub use pool::{DatabaseStatistics, PoolMetrics, SessionPool, SessionPoolBuilder};
pub use retry::{Backoff, RetrySettings};
pub use session::PooledSession;
