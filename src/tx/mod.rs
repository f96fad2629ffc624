//! Transaction submission module with nonce management and gas optimization

mod gas;
mod nonce;
mod sender;

pub use gas::GasEstimator;
pub use nonce::NonceManager;
pub use sender::TransactionSender;
