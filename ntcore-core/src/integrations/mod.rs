//! Framework integrations.
//!
//! Each integration defines the capability traits a model type implements and
//! the entry points training code calls instead of the model's own methods.
//! Entry points install their wrappers into the process-wide registry on
//! first use.

pub mod sklearn;
pub mod tensorflow;
pub mod torch;
