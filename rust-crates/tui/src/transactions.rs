use crate::{
    connector::WalletConnector,
    errors::TransactionError,
};
use alloy::primitives::{
    Address,
    Bytes,
    TxHash,
    U256,
};
use generated_abi::{
    approval_ceiling,
    approve_calldata,
    deposit_calldata,
    withdraw_calldata,
};
use std::{
    fmt,
    sync::Arc,
};
use tokio::{
    sync::mpsc,
    task::JoinSet,
};
use tracing::{
    info,
    warn,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TxKind {
    Approve,
    Deposit,
    Withdraw,
}

impl TxKind {
    pub const ALL: [TxKind; 3] = [TxKind::Approve, TxKind::Deposit, TxKind::Withdraw];

    pub(crate) fn index(self) -> usize {
        match self {
            TxKind::Approve => 0,
            TxKind::Deposit => 1,
            TxKind::Withdraw => 2,
        }
    }

    /// The kind that may not be in flight while this one is submitted.
    fn conflicts_with(self) -> Option<TxKind> {
        match self {
            TxKind::Approve => Some(TxKind::Deposit),
            TxKind::Deposit => Some(TxKind::Approve),
            TxKind::Withdraw => None,
        }
    }
}

impl fmt::Display for TxKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TxKind::Approve => "Approve",
            TxKind::Deposit => "Deposit",
            TxKind::Withdraw => "Withdraw",
        };
        write!(f, "{name}")
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum TxStatus {
    #[default]
    Idle,
    /// Handed to the wallet, no hash yet.
    Submitted,
    /// Hash known, waiting for the receipt.
    Confirming,
    Confirmed,
    Failed,
}

impl TxStatus {
    pub fn is_pending(self) -> bool {
        matches!(self, TxStatus::Submitted | TxStatus::Confirming)
    }

    /// Pending, or confirmed but not yet reset. Blocks resubmitting the
    /// same kind.
    pub fn is_active(self) -> bool {
        self.is_pending() || self == TxStatus::Confirmed
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TransactionRecord {
    pub kind: TxKind,
    pub status: TxStatus,
    pub hash: Option<TxHash>,
    pub error: Option<TransactionError>,
}

impl TransactionRecord {
    pub fn idle(kind: TxKind) -> Self {
        Self {
            kind,
            status: TxStatus::Idle,
            hash: None,
            error: None,
        }
    }
}

/// Which kinds currently have an active record.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct InFlight([bool; 3]);

impl InFlight {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn with(mut self, kind: TxKind) -> Self {
        self.0[kind.index()] = true;
        self
    }

    pub fn contains(&self, kind: TxKind) -> bool {
        self.0[kind.index()]
    }
}

/// A contract call ready to hand to the wallet.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PreparedCall {
    pub to: Address,
    pub input: Bytes,
    pub value: U256,
}

/// Where transactions are sent.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TxTargets {
    pub pot: Address,
    pub token: Address,
    pub token_decimals: u8,
}

impl TxTargets {
    pub fn prepare(&self, kind: TxKind) -> PreparedCall {
        let (to, input) = match kind {
            TxKind::Approve => (
                self.token,
                approve_calldata(self.pot, approval_ceiling(self.token_decimals)),
            ),
            TxKind::Deposit => (self.pot, deposit_calldata()),
            TxKind::Withdraw => (self.pot, withdraw_calldata()),
        };
        PreparedCall {
            to,
            input,
            value: U256::ZERO,
        }
    }
}

/// Progress reports from submission tasks.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TxEvent {
    Broadcast {
        kind: TxKind,
        hash: TxHash,
    },
    Settled {
        kind: TxKind,
        hash: TxHash,
    },
    Failed {
        kind: TxKind,
        error: TransactionError,
    },
}

/// What applying a [`TxEvent`] changed.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TxOutcome {
    Ignored,
    Confirming(TxKind),
    Confirmed(TxKind),
    Failed(TxKind, TransactionError),
}

pub struct TransactionLifecycleController<W> {
    wallet: Arc<W>,
    targets: TxTargets,
    records: [TransactionRecord; 3],
    events_tx: mpsc::UnboundedSender<TxEvent>,
    tasks: JoinSet<()>,
}

impl<W: WalletConnector> TransactionLifecycleController<W> {
    pub fn new(
        wallet: Arc<W>,
        targets: TxTargets,
    ) -> (Self, mpsc::UnboundedReceiver<TxEvent>) {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let controller = Self {
            wallet,
            targets,
            records: TxKind::ALL.map(TransactionRecord::idle),
            events_tx,
            tasks: JoinSet::new(),
        };
        (controller, events_rx)
    }

    pub fn wallet(&self) -> &W {
        &self.wallet
    }

    pub fn submit_approval(&mut self) -> Result<(), TransactionError> {
        self.submit(TxKind::Approve)
    }

    pub fn submit_deposit(&mut self) -> Result<(), TransactionError> {
        self.submit(TxKind::Deposit)
    }

    pub fn submit_withdraw(&mut self) -> Result<(), TransactionError> {
        self.submit(TxKind::Withdraw)
    }

    pub fn submit(&mut self, kind: TxKind) -> Result<(), TransactionError> {
        if self.wallet.context().address.is_none() {
            return Err(TransactionError::NoWallet);
        }
        if self.record(kind).status.is_active() {
            return Err(TransactionError::AlreadyInProgress(kind));
        }
        if let Some(active) = kind
            .conflicts_with()
            .filter(|other| self.record(*other).status.is_pending())
        {
            return Err(TransactionError::Conflicting {
                requested: kind,
                active,
            });
        }

        let call = self.targets.prepare(kind);
        self.records[kind.index()] = TransactionRecord {
            status: TxStatus::Submitted,
            ..TransactionRecord::idle(kind)
        };
        info!(%kind, to = %call.to, "submitting transaction");

        let wallet = Arc::clone(&self.wallet);
        let events_tx = self.events_tx.clone();
        self.tasks.spawn(async move {
            let hash = match wallet.send(call).await {
                Ok(hash) => hash,
                Err(error) => {
                    let _ = events_tx.send(TxEvent::Failed { kind, error });
                    return;
                }
            };
            let _ = events_tx.send(TxEvent::Broadcast { kind, hash });
            let event = match wallet.confirm(hash).await {
                Ok(()) => TxEvent::Settled { kind, hash },
                Err(error) => TxEvent::Failed { kind, error },
            };
            let _ = events_tx.send(event);
        });
        Ok(())
    }

    pub fn apply(&mut self, event: TxEvent) -> TxOutcome {
        while self.tasks.try_join_next().is_some() {}

        match event {
            TxEvent::Broadcast { kind, hash } => {
                let record = &mut self.records[kind.index()];
                if record.status != TxStatus::Submitted {
                    return TxOutcome::Ignored;
                }
                info!(%kind, %hash, "transaction broadcast");
                record.status = TxStatus::Confirming;
                record.hash = Some(hash);
                TxOutcome::Confirming(kind)
            }
            TxEvent::Settled { kind, hash } => {
                let record = &mut self.records[kind.index()];
                if !record.status.is_pending() {
                    return TxOutcome::Ignored;
                }
                info!(%kind, %hash, "transaction confirmed");
                record.status = TxStatus::Confirmed;
                record.hash = Some(hash);
                TxOutcome::Confirmed(kind)
            }
            TxEvent::Failed { kind, error } => {
                let record = &mut self.records[kind.index()];
                if !record.status.is_pending() {
                    return TxOutcome::Ignored;
                }
                warn!(%kind, %error, "transaction failed");
                record.status = TxStatus::Failed;
                record.error = Some(error.clone());
                TxOutcome::Failed(kind, error)
            }
        }
    }

    /// Returns a settled record to idle. Pending records are left alone.
    pub fn reset(&mut self, kind: TxKind) {
        let record = &mut self.records[kind.index()];
        if !record.status.is_pending() {
            *record = TransactionRecord::idle(kind);
        }
    }

    /// Clears every failed record; returns whether anything changed.
    pub fn acknowledge(&mut self) -> bool {
        let mut cleared = false;
        for record in &mut self.records {
            if record.status == TxStatus::Failed {
                *record = TransactionRecord::idle(record.kind);
                cleared = true;
            }
        }
        cleared
    }

    pub fn record(&self, kind: TxKind) -> &TransactionRecord {
        &self.records[kind.index()]
    }

    pub fn records(&self) -> &[TransactionRecord; 3] {
        &self.records
    }

    pub fn in_flight(&self) -> InFlight {
        self.records
            .iter()
            .filter(|record| record.status.is_active())
            .fold(InFlight::none(), |acc, record| acc.with(record.kind))
    }

    /// Stops tracking submitted transactions. Nothing already broadcast is
    /// cancelled on chain.
    pub fn shutdown(&mut self) {
        self.tasks.abort_all();
    }
}
