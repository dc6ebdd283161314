// ============================================================================
// Payments - money entering and leaving the ledger through the chain
// ============================================================================

pub mod deposit;
pub mod withdraw;

pub use deposit::{confirm_deposit, init_deposit, verify_transfer, DepositInstructions, VerifyFailure};
pub use withdraw::withdraw;
