//! Hub pool and spoke pool call bindings used for proposal, dispute and leaf
//! execution.

use alloy::sol;

sol! {
    /// Hub pool entry points used by the dataworker.
    interface IHubPool {
        function proposeRootBundle(
            uint64[] bundleEvaluationBlockNumbers,
            uint32 poolRebalanceLeafCount,
            bytes32 poolRebalanceRoot,
            bytes32 relayerRefundRoot,
            bytes32 slowRelayRoot
        ) external;

        function executeRootBundle(
            uint64 chainId,
            uint32 leafId,
            address[] tokens,
            int256[] netSendAmounts,
            int256[] runningBalances,
            bytes32[] proof
        ) external;

        function disputeRootBundle() external;
    }

    /// Spoke pool entry points used by the dataworker.
    interface ISpokePool {
        function executeRelayerRefundLeaf(
            uint64 chainId,
            address token,
            uint32 leafId,
            uint256 slowRelayAmount,
            address[] refundAddresses,
            uint256[] refundAmounts,
            bytes32[] proof
        ) external;

        function executeSlowRelayLeaf(
            uint64 originChainId,
            uint64 depositId,
            uint64 destinationChainId,
            address depositor,
            address token,
            uint256 amount,
            bytes32[] proof
        ) external;
    }
}
