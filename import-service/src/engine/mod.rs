//! Reconciliation engine. Pure logic only; all I/O lives in `services`.

pub mod billing_cycle;
pub mod dedup;
pub mod grouping;
pub mod matching;
pub mod planning;
pub mod statements;

pub use billing_cycle::{compute_cycle, Cycle, CycleConfig, OverrideWindow};
pub use dedup::{drop_duplicates, external_ids, DedupOutcome};
pub use grouping::{group_installments, ConflictPolicy, GroupKey, GroupingOutcome, InstallmentGroup};
pub use matching::{select_candidate, BatchScope, ExistingPurchase, KnownInstallment, PurchaseCandidate};
pub use planning::{
    AmountUpdate, ImportPlan, IncomePlan, NewPurchase, PlannedEntry, Planner, PurchaseExtension,
    PurchasePlan,
};
pub use statements::{
    plan_following_realignment, plan_statement_windows, Realignment, StatementWindow,
    StoredBoundary,
};
