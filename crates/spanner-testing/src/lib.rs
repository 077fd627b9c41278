//! # spanner-testing
//!
//! Test infrastructure for the Spanner driver.
//!
//! - [`MockSpanner`]: an in-memory service implementing the transport
//!   contract, with scripted failures, aborts and query results
//! - [`MockTransportFactory`]: hands the mock to session pools
//! - [`RecordingClock`]: records retry and maintenance delays
//!
//! ## Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use spanner_testing::{MockSpanner, MockTransportFactory};
//! use spanner_pool::SessionPoolManager;
//!
//! let spanner = Arc::new(MockSpanner::new());
//! let factory = Arc::new(MockTransportFactory::new(spanner.clone()));
//! let manager = SessionPoolManager::new(factory);
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod clock;
pub mod mock;
pub mod transport;

pub use clock::RecordingClock;
pub use mock::{Method, MockSpanner};
pub use transport::MockTransportFactory;
