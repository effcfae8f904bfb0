use crate::{
    action::ResolvedAction,
    connector::WalletContext,
    countdown::CountdownDisplay,
    snapshot::ContractSnapshot,
    transactions::{
        TransactionRecord,
        TxKind,
    },
};
use std::{
    collections::VecDeque,
    time::Duration,
};
use tokio::{
    sync::watch,
    time::Instant,
};

pub const NOTIFICATION_LIFETIME: Duration = Duration::from_secs(4);
const MAX_NOTIFICATIONS: usize = 5;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NoticeLevel {
    Info,
    Success,
    Error,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Notification {
    pub level: NoticeLevel,
    pub message: String,
    pub expires_at: Instant,
}

/// Short-lived toasts, oldest first.
#[derive(Debug)]
pub struct Notifications {
    items: VecDeque<Notification>,
    lifetime: Duration,
}

impl Notifications {
    pub fn new(lifetime: Duration) -> Self {
        Self {
            items: VecDeque::new(),
            lifetime,
        }
    }

    pub fn push(&mut self, level: NoticeLevel, message: impl Into<String>, now: Instant) {
        if self.items.len() == MAX_NOTIFICATIONS {
            self.items.pop_front();
        }
        self.items.push_back(Notification {
            level,
            message: message.into(),
            expires_at: now + self.lifetime,
        });
    }

    /// Drops expired entries; returns whether any were dropped.
    pub fn prune(&mut self, now: Instant) -> bool {
        let before = self.items.len();
        self.items.retain(|item| item.expires_at > now);
        before != self.items.len()
    }

    pub fn next_expiry(&self) -> Option<Instant> {
        self.items.iter().map(|item| item.expires_at).min()
    }

    pub fn active(&self) -> Vec<Notification> {
        self.items.iter().cloned().collect()
    }
}

impl Default for Notifications {
    fn default() -> Self {
        Self::new(NOTIFICATION_LIFETIME)
    }
}

/// Everything the presentation layer needs for one frame.
#[derive(Clone, Debug)]
pub struct ViewState {
    pub network: String,
    pub chain_id: u64,
    pub token_symbol: String,
    pub snapshot: Option<ContractSnapshot>,
    /// `None` until the first snapshot lands.
    pub action: Option<ResolvedAction>,
    pub countdown: CountdownDisplay,
    pub wallet: WalletContext,
    pub transactions: [TransactionRecord; 3],
    pub read_notice: Option<String>,
    pub notifications: Vec<Notification>,
    pub celebrating: bool,
    pub refreshing: bool,
}

impl ViewState {
    pub fn initial(
        network: impl Into<String>,
        token_symbol: impl Into<String>,
        wallet: WalletContext,
    ) -> Self {
        Self {
            network: network.into(),
            chain_id: wallet.chain_id,
            token_symbol: token_symbol.into(),
            snapshot: None,
            action: None,
            countdown: CountdownDisplay::closed(),
            wallet,
            transactions: TxKind::ALL.map(TransactionRecord::idle),
            read_notice: None,
            notifications: Vec::new(),
            celebrating: false,
            refreshing: false,
        }
    }

    pub fn transaction(&self, kind: TxKind) -> &TransactionRecord {
        &self.transactions[kind.index()]
    }

    pub fn is_leader(&self) -> bool {
        match (&self.snapshot, self.wallet.address) {
            (Some(snapshot), Some(address)) => snapshot.is_leader(address),
            _ => false,
        }
    }
}

/// Observer store: the controller publishes, any number of views subscribe.
#[derive(Debug)]
pub struct ViewStore {
    tx: watch::Sender<ViewState>,
}

impl ViewStore {
    pub fn new(initial: ViewState) -> Self {
        let (tx, _rx) = watch::channel(initial);
        Self { tx }
    }

    pub fn subscribe(&self) -> watch::Receiver<ViewState> {
        self.tx.subscribe()
    }

    pub fn publish(&self, state: ViewState) {
        self.tx.send_replace(state);
    }

    pub fn current(&self) -> ViewState {
        self.tx.borrow().clone()
    }
}
