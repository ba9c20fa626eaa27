//! Position ledger.
//!
//! Merges locally observed fills with the remote position endpoint so the
//! hedger always sees `max(local, remote)` per leg.

mod position;
mod reconcile;

pub use position::{
    ApiPosition, FillNotice, LocalPosition, Position, PositionSource, RemotePosition,
};
pub use reconcile::{Exposure, LedgerSnapshot, PositionLedger};
