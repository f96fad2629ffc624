//! Contract interfaces for the escrow factory and the resolver.
//!
//! Address-typed protocol fields are user-defined `uint256` values on chain, so
//! they are declared as `uint256` here to keep function selectors and event
//! topics identical to the deployed contracts. Any change to the deployed
//! contracts must be mirrored here.

use alloy_sol_types::sol;

sol! {
    /// Escrow parameter tuple (`IBaseEscrow.Immutables`)
    #[derive(Debug, PartialEq, Eq)]
    struct EscrowImmutables {
        bytes32 orderHash;
        bytes32 hashlock;
        uint256 maker;
        uint256 taker;
        uint256 token;
        uint256 amount;
        uint256 safetyDeposit;
        uint256 timelocks;
    }

    /// Destination-side fields emitted alongside the source immutables
    #[derive(Debug, PartialEq, Eq)]
    struct DstImmutablesComplement {
        uint256 maker;
        uint256 amount;
        uint256 token;
        uint256 safetyDeposit;
        uint256 chainId;
    }

    /// Built limit order (`IOrderMixin.Order`)
    #[derive(Debug, PartialEq, Eq)]
    struct LimitOrderBuild {
        uint256 salt;
        uint256 maker;
        uint256 receiver;
        uint256 makerAsset;
        uint256 takerAsset;
        uint256 makingAmount;
        uint256 takingAmount;
        uint256 makerTraits;
    }

    interface IResolver {
        function deploySrc(
            EscrowImmutables immutables,
            LimitOrderBuild order,
            bytes32 r,
            bytes32 vs,
            uint256 amount,
            uint256 takerTraits,
            bytes args
        ) external payable;

        function deployDst(EscrowImmutables dstImmutables, uint256 srcCancellationTimestamp) external payable;

        function withdraw(address escrow, bytes32 secret, EscrowImmutables immutables) external;

        function cancel(address escrow, EscrowImmutables immutables) external;
    }

    interface IEscrowFactory {
        event SrcEscrowCreated(EscrowImmutables srcImmutables, DstImmutablesComplement dstImmutablesComplement);

        event DstEscrowCreated(address escrow, bytes32 hashlock, uint256 taker);

        function ESCROW_SRC_IMPLEMENTATION() external view returns (address);

        function ESCROW_DST_IMPLEMENTATION() external view returns (address);

        function addressOfEscrowSrc(EscrowImmutables immutables) external view returns (address);

        function addressOfEscrowDst(EscrowImmutables immutables) external view returns (address);
    }
}
