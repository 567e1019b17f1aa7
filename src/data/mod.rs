//! Trace processing and storage modules.
pub mod iir_filter;
pub mod integrator;
pub mod storage;
pub mod trace;
