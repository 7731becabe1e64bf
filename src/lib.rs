//! Supervisor daemon core for QMI cellular modems.
//!
//! The crate mediates between local clients speaking the framed RMF IPC and a
//! cellular modem exposing the QMI control protocol. It carries the IPC codec,
//! the request dispatcher, the per-command QMI orchestration, the registration
//! supervisor, the SMS assembly engine, the connection statistics pipeline and
//! the data-link coordinator.
//!
//! The QMI transport itself is the integrator's seam: everything here is
//! generic over the typed client traits in [`qmi`], so the daemon can be
//! driven against a real device binding or against mocks. The event loop is
//! strictly single-threaded cooperative; run the [`server::Server`] inside a
//! current-thread tokio runtime and a `LocalSet`.
#![allow(async_fn_in_trait)]

pub mod charsets;
pub mod error;
pub mod message;
pub mod processor;
pub mod protocol;
pub mod qmi;
pub mod registration;
pub mod server;
pub mod sms;
pub mod stats;
pub mod wwan;

#[cfg(test)]
pub(crate) mod test_helpers;
