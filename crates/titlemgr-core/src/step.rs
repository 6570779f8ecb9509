//! Per-item states of the data-operation engine.

use serde::{Deserialize, Serialize};
use strum::Display;

/// The state an item is in while the engine processes it.
///
/// Copy items walk `CheckingSource → OpeningSource → Sizing →
/// OpeningDestination → Transferring → ClosingDestination → ClosingSource →
/// Done`. Directory items go through `MakingDirectory`, delete items through
/// `Deleting`. Any step may fall into `ErrorHandling`; `Aborted` is terminal
/// for the whole operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display)]
#[strum(serialize_all = "lowercase")]
pub enum ItemStep {
    #[strum(serialize = "checking source")]
    CheckingSource,
    #[strum(serialize = "making directory")]
    MakingDirectory,
    #[strum(serialize = "opening source")]
    OpeningSource,
    Sizing,
    #[strum(serialize = "opening destination")]
    OpeningDestination,
    Transferring,
    #[strum(serialize = "closing destination")]
    ClosingDestination,
    #[strum(serialize = "closing source")]
    ClosingSource,
    Deleting,
    Done,
    #[strum(serialize = "error handling")]
    ErrorHandling,
    Aborted,
}
