#![deny(
    rustdoc::broken_intra_doc_links,
    rustdoc::bare_urls,
    rust_2018_idioms,
    unsafe_code
)]
#![warn(
    missing_copy_implementations,
    missing_debug_implementations,
    clippy::explicit_iter_loop,
    clippy::future_not_send,
    clippy::use_self,
    clippy::clone_on_ref_ptr
)]
//! Bounded, concurrent inspection of Kafka clusters.
//!
//! The entry point is [`Inspector`](client::Inspector), built from a [`Connector`](cluster::Connector) that
//! knows how to reach a cluster. [`backend`] ships one connector backed by librdkafka and one in-memory
//! cluster for tests.
pub mod backend;
pub mod client;
pub mod cluster;
pub mod config;
pub mod error;
pub mod metadata;
pub mod outcome;
pub mod record;
pub mod validation;

#[cfg(feature = "unstable-fuzzing")]
pub mod protocol;
#[cfg(not(feature = "unstable-fuzzing"))]
mod protocol;
