//! # Audit Chain Testkit
//!
//! Testing utilities for the audit chain.
//!
//! ## Overview
//!
//! This crate provides:
//!
//! - **Golden vectors**: Known events with their expected canonical bytes
//! - **Generators**: Proptest strategies for events and details
//! - **Fixtures**: An in-memory audit log with fault injection at hand
//!
//! ## Golden Vectors
//!
//! Golden vectors pin the canonical encoding. Any change to them means every
//! stored hash would change too:
//!
//! ```rust
//! use audit_chain_testkit::vectors::verify_all_vectors;
//!
//! for (name, matches, hex) in verify_all_vectors() {
//!     assert!(matches, "{}: {}", name, hex);
//! }
//! ```
//!
//! ## Property Testing
//!
//! ```rust,ignore
//! use proptest::prelude::*;
//! use audit_chain_testkit::generators::EventParams;
//! use audit_chain_core::canonicalize;
//!
//! proptest! {
//!     #[test]
//!     fn canonical_bytes_are_stable(params: EventParams) {
//!         let a = canonicalize(&params.to_event()).unwrap();
//!         let b = canonicalize(&params.to_event()).unwrap();
//!         prop_assert_eq!(a.bytes(), b.bytes());
//!     }
//! }
//! ```
//!
//! ## Test Fixtures
//!
//! ```rust
//! use audit_chain_testkit::fixtures::TestFixture;
//!
//! # async fn example() {
//! let fixture = TestFixture::new();
//! let tenant = fixture.tenant("acme");
//! let entries = fixture.append_mixed(&tenant, 3).await;
//! assert_eq!(entries.len(), 3);
//! # }
//! ```

pub mod fixtures;
pub mod generators;
pub mod vectors;

pub use fixtures::{data_event, event_in, fast_config, TestFixture};
pub use generators::EventParams;
pub use vectors::{all_vectors, verify_all_vectors, GoldenVector};
