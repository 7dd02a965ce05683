//! Warden Authorization - policy store, evaluation, routing and caching
//!
//! This crate answers "may this subject perform this action on this
//! resource" using Rego policies evaluated by the embedded `regorus` engine.
//!
//! # Architecture
//!
//! ```text
//!   policies/*.rego ──┐
//!   data/**/*.json ───┼──► PolicyStore ──► SharedPolicyStore (hot swap)
//!                     │                          │ snapshot
//!                     │                          ▼
//!     PolicyInput ────┴──► PolicyRouter ──► CachedEvaluator ──► Decision
//!                          (package)        │        ▲
//!                                           ▼        │
//!                                    PolicyEvaluator  DecisionCache
//! ```
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use warden_authz::{
//!     CacheConfig, CachedEvaluator, DecisionCache, EvalOptions, Evaluator, PolicyEvaluator,
//!     PolicyRouter, PolicySource, SharedPolicyStore, StoreOptions,
//! };
//!
//! let store = SharedPolicyStore::load(PolicySource::new("policies"), StoreOptions::default())?;
//! let cache = Arc::new(DecisionCache::new(CacheConfig::default()));
//! let evaluator = CachedEvaluator::new(PolicyEvaluator::default(), cache);
//! let router = PolicyRouter::default();
//!
//! let snapshot = store.current();
//! let package = router.resolve(&snapshot, &input.resource.resource_type)?;
//! let evaluation = evaluator.evaluate(&snapshot, &package, &input, &EvalOptions::default())?;
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod cache;
pub mod config;
pub mod error;
pub mod evaluator;
pub mod router;
pub mod shared;
pub mod store;

// Re-exports for convenience
pub use cache::{cache_key, CacheConfig, CacheStats, DecisionCache};
pub use config::{EvaluatorConfig, RouterConfig, StoreOptions};
pub use error::{AuthzError, AuthzResult};
pub use evaluator::{CachedEvaluator, EvalOptions, Evaluation, Evaluator, PolicyEvaluator, RuleLookup};
pub use router::PolicyRouter;
pub use shared::{PolicySource, ReloadSummary, SharedPolicyStore};
pub use store::{PolicyStore, PolicyStoreBuilder};
