//! Example programs for the molgraph crates. See `examples/`.
