//! Integration and property tests for the tcplab workspace live in the
//! `tests/` directory of this crate.
