//! Offline decode and correlation of AI-accelerator PMU counter streams.
//!
//! Raw capture files are decoded into context and block samples
//! ([`pmu`]), given stream ids and merged into one sample per scheduled
//! context ([`correlate`]), turned into metric values ([`metrics`]) and
//! written as schema-ordered rows ([`row`]) to per-device sinks ([`sink`]).
//! [`pipeline`] wires the stages together per device.

pub mod config;
pub mod correlate;
pub mod metrics;
pub mod pipeline;
pub mod pmu;
pub mod row;
pub mod sink;
