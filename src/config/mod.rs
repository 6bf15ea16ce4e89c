//! Configuration sources
//!
//! This module handles:
//! * The RC file schema (`chimedb:` YAML mapping)
//! * The ordered resolution chain over environment variables, RC files and
//!   registered providers
//! * Test-safe mode, which swaps the production sources for test-only ones

mod resolver;
mod schema;

pub use resolver::{test_enable, CandidateProvider};

pub(crate) use resolver::{
    env_nonempty, resolve, test_mode, Resolved, CONNECT_TIMEOUT_VAR, TEST_ENABLE_VAR,
};
