//! Property-based tests for key sets and results.
