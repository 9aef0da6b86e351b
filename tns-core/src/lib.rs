#![warn(missing_docs)]
//! Models and ports shared by transactive network nodes.
//!
//! A transactive node describes its neighbors and local assets as
//! piecewise-linear supply/demand curves built from [`models::Vertex`] points,
//! clears a rolling horizon of [`models::TimeInterval`]s, and exchanges
//! [`models::TransactiveRecord`]s with neighboring nodes until their prices
//! agree. This crate holds the data model and the capability traits; the
//! balancing engine itself lives in `tns-market`.

/// Core domain models for transactive market clearing.
///
/// The models in this module are primarily data structures with minimal
/// business logic. Everything here is owned by a market or an entity and is
/// referenced elsewhere by [`models::IntervalId`], never by pointer.
pub mod models;

/// Capability traits for the outside world.
///
/// These are the "ports" through which a node reads the time, forecasts and
/// externally computed curves, and ships its signals to neighbors. Keeping
/// them as traits lets simulations substitute deterministic implementations.
pub mod ports;
