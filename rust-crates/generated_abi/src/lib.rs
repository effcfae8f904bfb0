use alloy::{
    primitives::{
        Address,
        Bytes,
        U256,
        address,
    },
    sol_types::SolCall,
};

pub mod pot_types {
    alloy::sol! {
        #[sol(rpc, all_derives)]
        interface TimeTomb {
            function totalDeposited() external view returns (uint256);
            function getRemainingTime() external view returns (uint256);
            function gameEndTime() external view returns (uint256);
            function currentLeader() external view returns (address);
            function deposit() external;
            function withdraw() external;
        }
    }
}

pub mod erc20_types {
    alloy::sol! {
        #[sol(rpc, all_derives)]
        interface Erc20 {
            function balanceOf(address owner) external view returns (uint256);
            function allowance(address owner, address spender) external view returns (uint256);
            function approve(address spender, uint256 amount) external returns (bool);
            function decimals() external view returns (uint8);
            function symbol() external view returns (string);
        }
    }
}

pub mod multicall_types {
    alloy::sol! {
        #[sol(rpc, all_derives)]
        interface Multicall3 {
            struct Call3 {
                address target;
                bool allowFailure;
                bytes callData;
            }

            struct Call3Result {
                bool success;
                bytes returnData;
            }

            function aggregate3(Call3[] calldata calls) external payable returns (Call3Result[] memory returnData);
        }
    }
}

/// Multicall3 is deployed at the same address on every chain we target.
pub const MULTICALL3_ADDRESS: Address =
    address!("0xcA11bde05977b3631167028862bE2a173976CA11");

pub const DEFAULT_TOKEN_DECIMALS: u8 = 6;
pub const DEFAULT_TOKEN_SYMBOL: &str = "USDC";

/// Whole tokens moved by a single `deposit()`.
pub const DEPOSIT_UNITS: u64 = 1;

/// Whole tokens granted to the pot by the approval transaction.
pub const APPROVAL_CEILING_UNITS: u64 = 1_000_000_000;

/// Raw amount of one whole token.
pub fn one_unit(decimals: u8) -> U256 {
    U256::from(10u64).pow(U256::from(decimals))
}

pub fn approval_ceiling(decimals: u8) -> U256 {
    U256::from(APPROVAL_CEILING_UNITS).saturating_mul(one_unit(decimals))
}

pub fn approve_calldata(spender: Address, amount: U256) -> Bytes {
    erc20_types::Erc20::approveCall { spender, amount }
        .abi_encode()
        .into()
}

pub fn deposit_calldata() -> Bytes {
    pot_types::TimeTomb::depositCall {}.abi_encode().into()
}

pub fn withdraw_calldata() -> Bytes {
    pot_types::TimeTomb::withdrawCall {}.abi_encode().into()
}
