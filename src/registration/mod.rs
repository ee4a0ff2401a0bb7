// src/registration/mod.rs

//! Endpoint registration with the remote control service.
//!
//! - [`retry`] holds the policy-driven retry combinator.
//! - [`client`] holds the [`ControlService`] seam, its HTTP implementation and
//!   the [`RegistrationClient`] the interchange owns.

pub mod client;
pub mod retry;

pub use client::{ControlService, HttpControlService, RegistrationClient};
pub use retry::{Backoff, RetryExhausted, RetryPolicy, register_with_retry};
