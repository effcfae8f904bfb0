use crate::{
    errors::TransactionError,
    transactions::PreparedCall,
};
use alloy::{
    network::TransactionBuilder,
    primitives::{
        Address,
        TxHash,
    },
    providers::{
        DynProvider,
        PendingTransactionBuilder,
        Provider,
    },
    rpc::types::TransactionRequest,
    transports::{
        RpcError,
        TransportErrorKind,
    },
};
use std::future::Future;
use tracing::debug;

/// EIP-1193 "user rejected request".
const USER_REJECTED_CODE: i64 = 4001;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct WalletContext {
    pub address: Option<Address>,
    pub chain_id: u64,
}

/// Signs, broadcasts and watches transactions on behalf of the user.
pub trait WalletConnector: Send + Sync + 'static {
    fn context(&self) -> WalletContext;

    /// Resolves once the wallet has broadcast the call.
    fn send(
        &self,
        call: PreparedCall,
    ) -> impl Future<Output = Result<TxHash, TransactionError>> + Send;

    /// Resolves once the transaction has a receipt.
    fn confirm(
        &self,
        hash: TxHash,
    ) -> impl Future<Output = Result<(), TransactionError>> + Send;
}

/// Wallet backed by an alloy provider. Without a signer it is read-only and
/// refuses to send.
#[derive(Clone)]
pub struct RpcWallet {
    provider: DynProvider,
    context: WalletContext,
}

impl RpcWallet {
    pub fn new(provider: DynProvider, address: Option<Address>, chain_id: u64) -> Self {
        Self {
            provider,
            context: WalletContext { address, chain_id },
        }
    }
}

impl WalletConnector for RpcWallet {
    fn context(&self) -> WalletContext {
        self.context
    }

    async fn send(&self, call: PreparedCall) -> Result<TxHash, TransactionError> {
        let from = self.context.address.ok_or(TransactionError::NoWallet)?;
        let request = TransactionRequest::default()
            .with_from(from)
            .with_to(call.to)
            .with_input(call.input)
            .with_value(call.value);
        let pending = self
            .provider
            .send_transaction(request)
            .await
            .map_err(classify_send_error)?;
        let hash = *pending.tx_hash();
        debug!(%hash, "wallet returned transaction hash");
        Ok(hash)
    }

    async fn confirm(&self, hash: TxHash) -> Result<(), TransactionError> {
        let receipt = PendingTransactionBuilder::new(self.provider.root().clone(), hash)
            .get_receipt()
            .await
            .map_err(|err| TransactionError::Watch {
                hash,
                reason: err.to_string(),
            })?;
        if receipt.status() {
            Ok(())
        } else {
            Err(TransactionError::Reverted(hash))
        }
    }
}

fn classify_send_error(err: RpcError<TransportErrorKind>) -> TransactionError {
    match err.as_error_resp() {
        Some(payload) if payload.code == USER_REJECTED_CODE => {
            TransactionError::Rejected(payload.message.to_string())
        }
        _ => TransactionError::Broadcast(err.to_string()),
    }
}
