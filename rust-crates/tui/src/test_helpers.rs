use crate::{
    connector::{
        WalletConnector,
        WalletContext,
    },
    errors::{
        ReadError,
        TransactionError,
    },
    reader::ContractStateReader,
    snapshot::PartialRead,
    transactions::{
        PreparedCall,
        TxTargets,
    },
};
use alloy::primitives::{
    Address,
    TxHash,
    U256,
};
use std::{
    collections::VecDeque,
    future::Future,
    sync::{
        Arc,
        Mutex,
    },
    time::Duration,
};

pub const LOCAL_CHAIN_ID: u64 = 31337;
pub const TOKEN_DECIMALS: u8 = 6;

pub fn user() -> Address {
    Address::repeat_byte(0x01)
}

pub fn other_player() -> Address {
    Address::repeat_byte(0xaa)
}

pub fn arb_targets() -> TxTargets {
    TxTargets {
        pot: Address::repeat_byte(0x50),
        token: Address::repeat_byte(0x70),
        token_decimals: TOKEN_DECIMALS,
    }
}

/// Whole tokens in raw units.
pub fn units(whole: u64) -> U256 {
    U256::from(whole) * U256::from(10u64.pow(TOKEN_DECIMALS as u32))
}

/// A fully successful read of an open round led by someone else.
pub fn arb_read(account: Option<Address>, end_timestamp: u64) -> PartialRead {
    PartialRead {
        account,
        total_deposited: Some(units(3)),
        remaining_time_secs: Some(3_600),
        game_end_timestamp: Some(end_timestamp),
        current_leader: Some(other_player()),
        contract_balance: Some(units(3)),
        user_allowance: account.map(|_| U256::ZERO),
        user_balance: account.map(|_| units(5)),
    }
}

#[derive(Default)]
struct FakeReaderState {
    scripted: VecDeque<(Duration, Result<PartialRead, ReadError>)>,
    fallback: Option<PartialRead>,
    calls: Vec<Option<Address>>,
}

/// Reader that replays scripted responses, then a fixed fallback.
#[derive(Clone, Default)]
pub struct FakeReader {
    state: Arc<Mutex<FakeReaderState>>,
}

impl FakeReader {
    pub fn returning(read: PartialRead) -> Self {
        let reader = Self::default();
        reader.state.lock().unwrap().fallback = Some(read);
        reader
    }

    pub fn set_fallback(&self, read: PartialRead) {
        self.state.lock().unwrap().fallback = Some(read);
    }

    pub fn push_response(&self, delay: Duration, result: Result<PartialRead, ReadError>) {
        self.state
            .lock()
            .unwrap()
            .scripted
            .push_back((delay, result));
    }

    pub fn calls(&self) -> Vec<Option<Address>> {
        self.state.lock().unwrap().calls.clone()
    }
}

impl ContractStateReader for FakeReader {
    fn read(
        &self,
        account: Option<Address>,
    ) -> impl Future<Output = Result<PartialRead, ReadError>> + Send {
        let (delay, result) = {
            let mut state = self.state.lock().unwrap();
            state.calls.push(account);
            match state.scripted.pop_front() {
                Some(scripted) => scripted,
                None => (
                    Duration::ZERO,
                    state
                        .fallback
                        .clone()
                        .ok_or_else(|| ReadError::Rpc("no scripted response".to_string())),
                ),
            }
        };
        async move {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            result.map(|read| PartialRead { account, ..read })
        }
    }
}

#[derive(Default)]
struct FakeWalletState {
    sent: Vec<PreparedCall>,
    send_failures: VecDeque<TransactionError>,
    revert_next: bool,
    nonce: u8,
}

/// Wallet that hands out sequential hashes and settles after a delay.
#[derive(Clone)]
pub struct FakeWallet {
    context: WalletContext,
    confirm_delay: Duration,
    state: Arc<Mutex<FakeWalletState>>,
}

impl FakeWallet {
    pub fn connected() -> Self {
        Self::with_address(Some(user()))
    }

    pub fn disconnected() -> Self {
        Self::with_address(None)
    }

    fn with_address(address: Option<Address>) -> Self {
        Self {
            context: WalletContext {
                address,
                chain_id: LOCAL_CHAIN_ID,
            },
            confirm_delay: Duration::ZERO,
            state: Arc::default(),
        }
    }

    pub fn with_confirm_delay(mut self, delay: Duration) -> Self {
        self.confirm_delay = delay;
        self
    }

    pub fn fail_next_send(&self, error: TransactionError) {
        self.state.lock().unwrap().send_failures.push_back(error);
    }

    pub fn revert_next_confirm(&self) {
        self.state.lock().unwrap().revert_next = true;
    }

    pub fn sent(&self) -> Vec<PreparedCall> {
        self.state.lock().unwrap().sent.clone()
    }
}

impl WalletConnector for FakeWallet {
    fn context(&self) -> WalletContext {
        self.context
    }

    fn send(
        &self,
        call: PreparedCall,
    ) -> impl Future<Output = Result<TxHash, TransactionError>> + Send {
        let result = {
            let mut state = self.state.lock().unwrap();
            state.sent.push(call);
            match state.send_failures.pop_front() {
                Some(error) => Err(error),
                None => {
                    state.nonce += 1;
                    Ok(TxHash::with_last_byte(state.nonce))
                }
            }
        };
        async move { result }
    }

    fn confirm(
        &self,
        hash: TxHash,
    ) -> impl Future<Output = Result<(), TransactionError>> + Send {
        let delay = self.confirm_delay;
        let state = Arc::clone(&self.state);
        async move {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            let reverted = std::mem::take(&mut state.lock().unwrap().revert_next);
            if reverted {
                Err(TransactionError::Reverted(hash))
            } else {
                Ok(())
            }
        }
    }
}
