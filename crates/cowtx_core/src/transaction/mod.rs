//! Transactions: declared holds, assignment to a group, commit and abort.
//!
//! A transaction first declares what it will modify through holds
//! ([`Transaction::hold_write`], [`Transaction::hold_free`], ...). Each hold
//! is turned into a worst-case [`SpaceEstimate`] up front. Assignment then
//! pins the open transaction group, serializes on every held object and
//! reserves the estimated space. Once assigned the caller modifies the
//! objects and commits.

mod estimate;
mod hold;
mod manager;
mod state;

pub use hold::{Hold, HoldKind, SpaceEstimate, ENTIRE_OBJECT};
pub use manager::TransactionManager;
pub use state::{AssignMode, DirtyBlock, Transaction, TxState};
