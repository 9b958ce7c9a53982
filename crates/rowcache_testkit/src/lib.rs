//! # rowcache testkit
//!
//! Test utilities for rowcache:
//! - [`MemoryRecordStore`]: instrumented record store with an on/off
//!   switch and read counter
//! - [`FlakyBackend`]: cache backend with injectable outages
//! - [`PetFixture`]: the wired-up Pet/Breed/Color schema the
//!   integration suite runs against

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod fixtures;
mod flaky;
mod store;

pub use fixtures::PetFixture;
pub use flaky::FlakyBackend;
pub use store::MemoryRecordStore;

use std::sync::Once;

static INIT_LOGGING: Once = Once::new();

/// Initializes tracing output for a test run, honoring `RUST_LOG`.
///
/// Safe to call from every test; only the first call installs the
/// subscriber.
pub fn init_logging() {
    INIT_LOGGING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}
