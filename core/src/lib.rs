//! outcall-breaker - circuit breaker for outbound service calls
//!
//! Each breaker protects one kind of outbound call (a payment processor SDK
//! call, an HTTP call to a sibling service) and provides:
//! - Rate-based tripping over a sliding window (Closed → Open)
//! - Lazy, probe-based recovery (Open → HalfOpen → Closed/Open)
//! - A per-call deadline enforced with Tokio timers
//! - An optional concurrency cap while closed (bulkhead)
//! - Error classification and a caller-supplied fallback for every
//!   non-success path
//!
//! # Example
//!
//! ```rust
//! use outcall_breaker::{BreakerRegistry, CircuitError};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let registry = BreakerRegistry::new();
//!
//! let get_customer = registry.register(
//!     registry
//!         .builder("usersGetCustomer")
//!         .request(|id: String| async move { Ok::<_, String>(format!("customer {}", id)) })
//!         .fallback(|err: CircuitError<String>, _id| match err {
//!             CircuitError::Execution(e) => Err(e),
//!             _ => Err("503 service unavailable".to_string()),
//!         })
//!         .on_open(|name| eprintln!("circuit {} opened", name)),
//! )?;
//!
//! let customer = get_customer.execute("cus_123".to_string()).await?;
//! assert_eq!(customer, "customer cus_123");
//! assert!(get_customer.is_closed());
//! # Ok(())
//! # }
//! ```

pub mod breaker;
pub mod builder;
pub mod bulkhead;
pub mod callbacks;
pub mod circuit;
pub mod classifier;
pub mod config;
pub mod errors;
pub mod registry;
pub mod storage;

pub use breaker::{CircuitBreaker, FallbackFn, RequestFn};
pub use builder::CircuitBuilder;
pub use bulkhead::{Bulkhead, BulkheadGuard};
pub use callbacks::{Callbacks, StateChange};
pub use circuit::{BreakerState, BreakerStatus};
pub use classifier::{
    DefaultClassifier, ErrorHandler, FailureClassifier, FailureContext, PredicateClassifier,
};
pub use config::{Config, ConfigOverrides, Settings};
pub use errors::{CircuitError, CircuitErrorKind, ConfigError};
pub use registry::BreakerRegistry;
pub use storage::{Event, EventKind, MemoryStorage, StorageBackend};
