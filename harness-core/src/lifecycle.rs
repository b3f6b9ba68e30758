//! Cost/budget lifecycle events — a shared vocabulary, not a trait.
//!
//! The pipeline emits these after each turn's cost becomes known; the
//! scheduler and event bus are free consumers. There is no "budget
//! service" — reacting to a `BudgetWarning` is a caller concern.

use crate::id::{ProviderId, RunId};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// A cost- or budget-related occurrence during a run.
#[non_exhaustive]
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CostEvent {
    /// Emitted after each provider call whose response carries cost info.
    CostIncurred {
        /// The run that incurred the cost.
        run_id: RunId,
        /// The provider that was called.
        provider_id: ProviderId,
        /// Cost of this individual call.
        cost: Decimal,
        /// Cumulative cost for the run so far.
        cumulative: Decimal,
    },
    /// Emitted when a run's cumulative cost approaches a configured limit.
    /// Informational — nothing in this crate halts a run on its own in
    /// response; a caller-supplied hook decides.
    BudgetWarning {
        /// The run approaching its limit.
        run_id: RunId,
        /// Amount spent so far.
        spent: Decimal,
        /// The configured limit.
        limit: Decimal,
    },
}
