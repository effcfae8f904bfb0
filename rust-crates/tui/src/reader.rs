use crate::{
    errors::ReadError,
    snapshot::PartialRead,
};
use alloy::{
    primitives::{
        Address,
        U256,
    },
    providers::Provider,
    sol_types::SolCall,
};
use generated_abi::{
    erc20_types::Erc20,
    multicall_types::Multicall3::{
        self,
        Call3,
        Call3Result,
    },
    pot_types::TimeTomb,
};
use std::{
    future::Future,
    time::Duration,
};
use tracing::{
    debug,
    warn,
};

/// Source of contract state. Implementations must tolerate overlapping
/// calls; ordering is handled by the caller with [`SnapshotSequencer`].
pub trait ContractStateReader: Send + Sync + 'static {
    fn read(
        &self,
        account: Option<Address>,
    ) -> impl Future<Output = Result<PartialRead, ReadError>> + Send;
}

/// Numbers read requests and rejects responses older than the newest one
/// already applied.
#[derive(Debug, Default)]
pub struct SnapshotSequencer {
    issued: u64,
    applied: Option<u64>,
}

impl SnapshotSequencer {
    pub fn issue(&mut self) -> u64 {
        self.issued += 1;
        self.issued
    }

    /// Marks `seq` as applied if it is newer than anything applied so far.
    pub fn accept(&mut self, seq: u64) -> bool {
        if self.applied.is_some_and(|applied| seq <= applied) {
            return false;
        }
        self.applied = Some(seq);
        true
    }

    pub fn latest_applied(&self) -> Option<u64> {
        self.applied
    }

    /// Sequence number of the most recently issued request, 0 before any.
    pub fn issued(&self) -> u64 {
        self.issued
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Field {
    TotalDeposited,
    RemainingTime,
    GameEnd,
    Leader,
    ContractBalance,
    Allowance,
    UserBalance,
}

/// The ordered list of calls making up one read, and how to decode them.
#[derive(Clone, Debug)]
pub struct BatchPlan {
    account: Option<Address>,
    calls: Vec<(Field, Call3)>,
}

impl BatchPlan {
    pub fn new(pot: Address, token: Address, account: Option<Address>) -> Self {
        let call = |target: Address, data: Vec<u8>| Call3 {
            target,
            allowFailure: true,
            callData: data.into(),
        };
        let mut calls = vec![
            (
                Field::TotalDeposited,
                call(pot, TimeTomb::totalDepositedCall {}.abi_encode()),
            ),
            (
                Field::RemainingTime,
                call(pot, TimeTomb::getRemainingTimeCall {}.abi_encode()),
            ),
            (
                Field::GameEnd,
                call(pot, TimeTomb::gameEndTimeCall {}.abi_encode()),
            ),
            (
                Field::Leader,
                call(pot, TimeTomb::currentLeaderCall {}.abi_encode()),
            ),
            (
                Field::ContractBalance,
                call(token, Erc20::balanceOfCall { owner: pot }.abi_encode()),
            ),
        ];
        if let Some(owner) = account {
            calls.push((
                Field::Allowance,
                call(
                    token,
                    Erc20::allowanceCall {
                        owner,
                        spender: pot,
                    }
                    .abi_encode(),
                ),
            ));
            calls.push((
                Field::UserBalance,
                call(token, Erc20::balanceOfCall { owner }.abi_encode()),
            ));
        }
        Self { account, calls }
    }

    pub fn len(&self) -> usize {
        self.calls.len()
    }

    pub fn is_empty(&self) -> bool {
        self.calls.is_empty()
    }

    pub fn calls(&self) -> Vec<Call3> {
        self.calls.iter().map(|(_, call)| call.clone()).collect()
    }

    pub fn decode(&self, results: &[Call3Result]) -> Result<PartialRead, ReadError> {
        if results.len() != self.calls.len() {
            return Err(ReadError::Malformed {
                expected: self.calls.len(),
                actual: results.len(),
            });
        }
        let mut read = PartialRead {
            account: self.account,
            ..PartialRead::default()
        };
        for ((field, _), result) in self.calls.iter().zip(results) {
            match field {
                Field::TotalDeposited => {
                    read.total_deposited =
                        decode_return::<TimeTomb::totalDepositedCall>(*field, result);
                }
                Field::RemainingTime => {
                    read.remaining_time_secs =
                        decode_return::<TimeTomb::getRemainingTimeCall>(*field, result)
                            .map(|secs: U256| secs.saturating_to::<u64>());
                }
                Field::GameEnd => {
                    read.game_end_timestamp =
                        decode_return::<TimeTomb::gameEndTimeCall>(*field, result)
                            .map(|ts: U256| ts.saturating_to::<u64>());
                }
                Field::Leader => {
                    read.current_leader =
                        decode_return::<TimeTomb::currentLeaderCall>(*field, result);
                }
                Field::ContractBalance => {
                    read.contract_balance =
                        decode_return::<Erc20::balanceOfCall>(*field, result);
                }
                Field::Allowance => {
                    read.user_allowance =
                        decode_return::<Erc20::allowanceCall>(*field, result);
                }
                Field::UserBalance => {
                    read.user_balance =
                        decode_return::<Erc20::balanceOfCall>(*field, result);
                }
            }
        }
        Ok(read)
    }
}

fn decode_return<C: SolCall>(field: Field, result: &Call3Result) -> Option<C::Return> {
    if !result.success {
        debug!(?field, "contract call reverted");
        return None;
    }
    match C::abi_decode_returns(&result.returnData) {
        Ok(value) => Some(value),
        Err(err) => {
            warn!(?field, %err, "undecodable contract return data");
            None
        }
    }
}

/// Upper bound on one batched read, so a stalled endpoint cannot hold the
/// single read slot forever.
pub const READ_TIMEOUT: Duration = Duration::from_secs(15);

/// Reads the pot through a single Multicall3 `aggregate3` round trip.
#[derive(Clone, Debug)]
pub struct RpcStateReader<P> {
    provider: P,
    pot: Address,
    token: Address,
    multicall: Address,
    timeout: Duration,
}

impl<P> RpcStateReader<P> {
    pub fn new(provider: P, pot: Address, token: Address, multicall: Address) -> Self {
        Self {
            provider,
            pot,
            token,
            multicall,
            timeout: READ_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

async fn within<F: IntoFuture>(limit: Duration, fut: F) -> Result<F::Output, ReadError> {
    tokio::time::timeout(limit, fut)
        .await
        .map_err(|_| ReadError::Rpc(format!("no response within {}s", limit.as_secs())))
}

impl<P> ContractStateReader for RpcStateReader<P>
where
    P: Provider + Clone + 'static,
{
    async fn read(&self, account: Option<Address>) -> Result<PartialRead, ReadError> {
        let plan = BatchPlan::new(self.pot, self.token, account);
        let multicall = Multicall3::new(self.multicall, &self.provider);
        let batch = multicall.aggregate3(plan.calls());
        let results = within(self.timeout, batch.call())
            .await?
            .map_err(|err| ReadError::Rpc(err.to_string()))?;
        debug!(calls = plan.len(), "multicall batch returned");
        plan.decode(&results)
    }
}

#[cfg(test)]
mod tests {
    #![allow(non_snake_case)]
    use super::*;
    use alloy::sol_types::SolValue;

    fn pot() -> Address {
        Address::repeat_byte(0x50)
    }

    fn token() -> Address {
        Address::repeat_byte(0x70)
    }

    fn ok(data: Vec<u8>) -> Call3Result {
        Call3Result {
            success: true,
            returnData: data.into(),
        }
    }

    fn failed() -> Call3Result {
        Call3Result {
            success: false,
            returnData: Vec::new().into(),
        }
    }

    fn base_results() -> Vec<Call3Result> {
        vec![
            ok(U256::from(3_000_000u64).abi_encode()),
            ok(U256::from(90u64).abi_encode()),
            ok(U256::from(1_700_000_090u64).abi_encode()),
            ok(Address::repeat_byte(0xaa).abi_encode()),
            ok(U256::from(3_000_000u64).abi_encode()),
        ]
    }

    #[test]
    fn sequencer__stale_response__is_rejected() {
        // given
        let mut sequencer = SnapshotSequencer::default();
        let older = sequencer.issue();
        let newer = sequencer.issue();

        // when
        let newer_applied = sequencer.accept(newer);
        let older_applied = sequencer.accept(older);

        // then
        assert!(newer_applied);
        assert!(!older_applied);
        assert_eq!(sequencer.latest_applied(), Some(newer));
    }

    #[test]
    fn sequencer__in_order_responses__are_all_accepted() {
        // given
        let mut sequencer = SnapshotSequencer::default();
        let first = sequencer.issue();
        let second = sequencer.issue();

        // then
        assert!(sequencer.accept(first));
        assert!(sequencer.accept(second));
        assert!(!sequencer.accept(second));
    }

    #[test]
    fn plan__without_account__skips_user_calls() {
        // when
        let plan = BatchPlan::new(pot(), token(), None);

        // then
        assert_eq!(plan.len(), 5);
        assert!(plan.calls().iter().all(|call| call.allowFailure));
    }

    #[test]
    fn plan__with_account__adds_allowance_and_balance() {
        // given
        let owner = Address::repeat_byte(0x01);

        // when
        let plan = BatchPlan::new(pot(), token(), Some(owner));

        // then
        let calls = plan.calls();
        assert_eq!(calls.len(), 7);
        let allowance = Erc20::allowanceCall::abi_decode(&calls[5].callData).unwrap();
        assert_eq!(allowance.owner, owner);
        assert_eq!(allowance.spender, pot());
        assert_eq!(calls[6].target, token());
    }

    #[test]
    fn decode__all_calls_succeed__fills_every_field() {
        // given
        let owner = Address::repeat_byte(0x01);
        let plan = BatchPlan::new(pot(), token(), Some(owner));
        let mut results = base_results();
        results.push(ok(U256::from(0u64).abi_encode()));
        results.push(ok(U256::from(5_000_000u64).abi_encode()));

        // when
        let read = plan.decode(&results).unwrap();

        // then
        assert_eq!(read.account, Some(owner));
        assert_eq!(read.total_deposited, Some(U256::from(3_000_000u64)));
        assert_eq!(read.remaining_time_secs, Some(90));
        assert_eq!(read.game_end_timestamp, Some(1_700_000_090));
        assert_eq!(read.current_leader, Some(Address::repeat_byte(0xaa)));
        assert_eq!(read.user_allowance, Some(U256::ZERO));
        assert_eq!(read.user_balance, Some(U256::from(5_000_000u64)));
        assert!(read.failed_fields().is_empty());
    }

    #[test]
    fn decode__failed_and_garbled_calls__are_reported_per_field() {
        // given
        let plan = BatchPlan::new(pot(), token(), None);
        let mut results = base_results();
        results[0] = failed();
        results[3] = ok(vec![0x01, 0x02]);

        // when
        let read = plan.decode(&results).unwrap();

        // then
        assert_eq!(read.total_deposited, None);
        assert_eq!(read.current_leader, None);
        assert_eq!(read.failed_fields(), vec!["totalDeposited", "currentLeader"]);
    }

    #[test]
    fn decode__result_count_mismatch__is_malformed() {
        // given
        let plan = BatchPlan::new(pot(), token(), Some(Address::repeat_byte(0x01)));

        // when
        let err = plan.decode(&base_results()).unwrap_err();

        // then
        assert_eq!(
            err,
            ReadError::Malformed {
                expected: 7,
                actual: 5
            }
        );
    }

    #[test]
    fn decode__huge_remaining_time__saturates() {
        // given
        let plan = BatchPlan::new(pot(), token(), None);
        let mut results = base_results();
        results[1] = ok(U256::MAX.abi_encode());

        // when
        let read = plan.decode(&results).unwrap();

        // then
        assert_eq!(read.remaining_time_secs, Some(u64::MAX));
    }

    #[tokio::test(start_paused = true)]
    async fn within__stalled_call__fails_after_limit() {
        // given
        let start = tokio::time::Instant::now();

        // when
        let err = within(READ_TIMEOUT, std::future::pending::<()>())
            .await
            .unwrap_err();

        // then
        assert_eq!(err, ReadError::Rpc("no response within 15s".to_string()));
        assert_eq!(start.elapsed(), READ_TIMEOUT);
    }

    #[tokio::test(start_paused = true)]
    async fn within__prompt_call__passes_output_through() {
        let value = within(Duration::from_secs(1), async { 7 }).await;
        assert_eq!(value, Ok(7));
    }

    #[test]
    fn batch_plan__debug__names_each_field() {
        // given
        let plan = BatchPlan::new(pot(), token(), Some(Address::repeat_byte(0x01)));

        // when
        let rendered = format!("{plan:?}");

        // then
        assert!(rendered.contains("TotalDeposited"), "{rendered}");
        assert!(rendered.contains("allowFailure: true"), "{rendered}");
    }

    #[test]
    fn sequencer__issued__tracks_latest_request() {
        let mut sequencer = SnapshotSequencer::default();
        assert_eq!(sequencer.issued(), 0);
        let first = sequencer.issue();
        let second = sequencer.issue();
        assert_eq!(sequencer.issued(), second);
        assert!(sequencer.accept(second));
        assert!(!sequencer.accept(first));
    }
}
