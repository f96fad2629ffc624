//! Timelock ladder packed into a single 256-bit word
//!
//! Layout (little end first): seven 32-bit stage offsets at bit `32 * stage`,
//! followed by the 32-bit deployment timestamp at bits 224..256.

use crate::error::{ExchangeError, ExchangeResult};

use alloy_primitives::U256;
use serde::{Deserialize, Serialize};

const DEPLOYED_AT_OFFSET: usize = 224;

/// Timelock stages in packed order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimeLockStage {
    SrcWithdrawal = 0,
    SrcPublicWithdrawal = 1,
    SrcCancellation = 2,
    SrcPublicCancellation = 3,
    DstWithdrawal = 4,
    DstPublicWithdrawal = 5,
    DstCancellation = 6,
}

impl TimeLockStage {
    pub const ALL: [TimeLockStage; 7] = [
        TimeLockStage::SrcWithdrawal,
        TimeLockStage::SrcPublicWithdrawal,
        TimeLockStage::SrcCancellation,
        TimeLockStage::SrcPublicCancellation,
        TimeLockStage::DstWithdrawal,
        TimeLockStage::DstPublicWithdrawal,
        TimeLockStage::DstCancellation,
    ];

    fn bit_offset(self) -> usize {
        self as usize * 32
    }
}

/// Relative offsets (seconds) of every stage plus the deployment timestamp
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimeLocks {
    pub src_withdrawal: u32,
    pub src_public_withdrawal: u32,
    pub src_cancellation: u32,
    pub src_public_cancellation: u32,
    pub dst_withdrawal: u32,
    pub dst_public_withdrawal: u32,
    pub dst_cancellation: u32,
    #[serde(default)]
    pub deployed_at: u32,
}

/// Absolute source-chain timestamps derived from the ladder
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SrcTimeLocks {
    pub private_withdrawal: u64,
    pub public_withdrawal: u64,
    pub private_cancellation: u64,
    pub public_cancellation: u64,
}

/// Absolute destination-chain timestamps derived from the ladder
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DstTimeLocks {
    pub private_withdrawal: u64,
    pub public_withdrawal: u64,
    pub private_cancellation: u64,
}

impl Default for TimeLocks {
    /// Development-grade ladder with ten second finality locks.
    ///
    /// Production deployments must size these to each chain's finality.
    fn default() -> Self {
        Self {
            src_withdrawal: 10,
            src_public_withdrawal: 120,
            src_cancellation: 121,
            src_public_cancellation: 122,
            dst_withdrawal: 10,
            dst_public_withdrawal: 100,
            dst_cancellation: 101,
            deployed_at: 0,
        }
    }
}

impl TimeLocks {
    /// Check the ladder is strictly increasing on both sides
    pub fn validate(&self) -> ExchangeResult<()> {
        let src = [
            self.src_withdrawal,
            self.src_public_withdrawal,
            self.src_cancellation,
            self.src_public_cancellation,
        ];
        let dst = [
            self.dst_withdrawal,
            self.dst_public_withdrawal,
            self.dst_cancellation,
        ];

        if !src.windows(2).all(|w| w[0] < w[1]) {
            return Err(ExchangeError::InvalidOrderPolicy(format!(
                "source timelocks must be strictly increasing, got {:?}",
                src
            )));
        }
        if !dst.windows(2).all(|w| w[0] < w[1]) {
            return Err(ExchangeError::InvalidOrderPolicy(format!(
                "destination timelocks must be strictly increasing, got {:?}",
                dst
            )));
        }
        Ok(())
    }

    /// Relative offset of a stage
    pub fn offset(&self, stage: TimeLockStage) -> u32 {
        match stage {
            TimeLockStage::SrcWithdrawal => self.src_withdrawal,
            TimeLockStage::SrcPublicWithdrawal => self.src_public_withdrawal,
            TimeLockStage::SrcCancellation => self.src_cancellation,
            TimeLockStage::SrcPublicCancellation => self.src_public_cancellation,
            TimeLockStage::DstWithdrawal => self.dst_withdrawal,
            TimeLockStage::DstPublicWithdrawal => self.dst_public_withdrawal,
            TimeLockStage::DstCancellation => self.dst_cancellation,
        }
    }

    fn set_offset(&mut self, stage: TimeLockStage, value: u32) {
        let slot = match stage {
            TimeLockStage::SrcWithdrawal => &mut self.src_withdrawal,
            TimeLockStage::SrcPublicWithdrawal => &mut self.src_public_withdrawal,
            TimeLockStage::SrcCancellation => &mut self.src_cancellation,
            TimeLockStage::SrcPublicCancellation => &mut self.src_public_cancellation,
            TimeLockStage::DstWithdrawal => &mut self.dst_withdrawal,
            TimeLockStage::DstPublicWithdrawal => &mut self.dst_public_withdrawal,
            TimeLockStage::DstCancellation => &mut self.dst_cancellation,
        };
        *slot = value;
    }

    /// Absolute timestamp at which a stage opens
    pub fn stage_time(&self, stage: TimeLockStage) -> u64 {
        self.deployed_at as u64 + self.offset(stage) as u64
    }

    /// Copy with the deployment timestamp stamped in
    pub fn with_deployed_at(mut self, deployed_at: u64) -> Self {
        self.deployed_at = deployed_at as u32;
        self
    }

    pub fn src_view(&self) -> SrcTimeLocks {
        SrcTimeLocks {
            private_withdrawal: self.stage_time(TimeLockStage::SrcWithdrawal),
            public_withdrawal: self.stage_time(TimeLockStage::SrcPublicWithdrawal),
            private_cancellation: self.stage_time(TimeLockStage::SrcCancellation),
            public_cancellation: self.stage_time(TimeLockStage::SrcPublicCancellation),
        }
    }

    pub fn dst_view(&self) -> DstTimeLocks {
        DstTimeLocks {
            private_withdrawal: self.stage_time(TimeLockStage::DstWithdrawal),
            public_withdrawal: self.stage_time(TimeLockStage::DstPublicWithdrawal),
            private_cancellation: self.stage_time(TimeLockStage::DstCancellation),
        }
    }

    /// Pack into the on-chain word
    pub fn encode(&self) -> U256 {
        let mask = U256::from(u32::MAX);
        let mut packed = U256::from(self.deployed_at) << DEPLOYED_AT_OFFSET;
        for stage in TimeLockStage::ALL {
            packed |= (U256::from(self.offset(stage)) & mask) << stage.bit_offset();
        }
        packed
    }

    /// Unpack from the on-chain word
    pub fn decode(packed: U256) -> Self {
        let mask = U256::from(u32::MAX);
        let mut locks = TimeLocks {
            src_withdrawal: 0,
            src_public_withdrawal: 0,
            src_cancellation: 0,
            src_public_cancellation: 0,
            dst_withdrawal: 0,
            dst_public_withdrawal: 0,
            dst_cancellation: 0,
            deployed_at: ((packed >> DEPLOYED_AT_OFFSET) & mask).to::<u32>(),
        };
        for stage in TimeLockStage::ALL {
            locks.set_offset(stage, ((packed >> stage.bit_offset()) & mask).to::<u32>());
        }
        locks
    }
}
