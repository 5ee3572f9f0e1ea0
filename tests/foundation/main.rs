//! Integration tests for Layer 0: Foundation
//!
//! Tests for entity handles, values, spatial math, and errors.

mod spatial;
mod values;
