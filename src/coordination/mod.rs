//! Exchange orchestration
//!
//! The orchestrator:
//! 1. Validates a signed order and fills it on the source chain
//! 2. Reads the source escrow deployment and derives the destination escrow
//! 3. Deploys the destination escrow
//! 4. On secret reveal, waits for finality and withdraws both escrows
//!
//! Every phase boundary is persisted; failures record the phase they hit.

pub mod engine;
pub mod payload;

pub use engine::ExchangeOrchestrator;
pub use payload::{FillOutcome, FillRequest, RevealOutcome, RevealRequest, SrcEscrowEvent, SwapState};
