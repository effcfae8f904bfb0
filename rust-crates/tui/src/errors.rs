use crate::transactions::TxKind;
use alloy::primitives::TxHash;
use thiserror::Error;

/// Failure of a batched contract read.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ReadError {
    #[error("rpc request failed: {0}")]
    Rpc(String),
    #[error("multicall returned {actual} results for {expected} calls")]
    Malformed { expected: usize, actual: usize },
    #[error("contract calls failed: {}", fields.join(", "))]
    Partial { fields: Vec<&'static str> },
}

/// Failure of a submitted (or attempted) transaction.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum TransactionError {
    #[error("no wallet connected")]
    NoWallet,
    #[error("{0} already in progress")]
    AlreadyInProgress(TxKind),
    #[error("{requested} blocked while {active} is in progress")]
    Conflicting { requested: TxKind, active: TxKind },
    #[error("request rejected by wallet: {0}")]
    Rejected(String),
    #[error("broadcast failed: {0}")]
    Broadcast(String),
    #[error("transaction {0} reverted")]
    Reverted(TxHash),
    #[error("lost track of transaction {hash}: {reason}")]
    Watch { hash: TxHash, reason: String },
}
