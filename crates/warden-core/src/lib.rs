//! # Warden Core
//!
//! Domain types shared by every Warden crate.
//!
//! - [`Subject`] - the caller an authorization question is asked about
//! - [`Claims`] - verified token claims with narrow accessors
//! - [`Resource`] / [`ResourceType`] / [`Action`] - what is being accessed and how
//! - [`PolicyInput`] - the document handed to the policy engine
//! - [`Decision`] / [`FilterPredicate`] - the engine's answer
//! - [`AuditRecord`] - one audited decision
//! - [`RequestId`] / [`Deadline`] - per-request plumbing

#![doc(html_root_url = "https://docs.rs/warden-core/0.1.0")]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

mod audit;
mod deadline;
mod decision;
mod input;
mod request;
mod resource;
mod subject;

pub use audit::AuditRecord;
pub use deadline::{Deadline, DeadlineExceeded};
pub use decision::{Decision, FilterPredicate};
pub use input::{PolicyInput, VOLATILE_ENVIRONMENT_KEYS};
pub use request::RequestId;
pub use resource::{Action, Resource, ResourceType};
pub use subject::{Claims, Subject, SubjectKind};
