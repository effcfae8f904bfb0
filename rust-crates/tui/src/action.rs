use crate::{
    connector::WalletContext,
    snapshot::ContractSnapshot,
    transactions::{
        InFlight,
        TxKind,
    },
};

/// The single action offered to the user for the current state.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UserAction {
    ConnectWallet,
    InsufficientBalance,
    Approve,
    Deposit,
    Withdraw,
    GameClosed,
}

impl UserAction {
    /// The transaction this action submits, if it submits one.
    pub fn tx_kind(self) -> Option<TxKind> {
        match self {
            UserAction::Approve => Some(TxKind::Approve),
            UserAction::Deposit => Some(TxKind::Deposit),
            UserAction::Withdraw => Some(TxKind::Withdraw),
            UserAction::ConnectWallet
            | UserAction::InsufficientBalance
            | UserAction::GameClosed => None,
        }
    }

    pub fn is_actionable(self) -> bool {
        self.tx_kind().is_some()
    }

    pub fn label(self, symbol: &str) -> String {
        match self {
            UserAction::ConnectWallet => "Connect Wallet".to_string(),
            UserAction::InsufficientBalance => format!("Insufficient {symbol}"),
            UserAction::Approve => format!("Approve {symbol}"),
            UserAction::Deposit => format!("Deposit 1 {symbol}"),
            UserAction::Withdraw => "Withdraw Pot".to_string(),
            UserAction::GameClosed => "Game Closed".to_string(),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ResolvedAction {
    pub action: UserAction,
    pub in_progress: bool,
}

impl ResolvedAction {
    pub fn is_enabled(&self) -> bool {
        self.action.is_actionable() && !self.in_progress
    }

    pub fn label(&self, symbol: &str) -> String {
        match (self.in_progress, self.action.tx_kind()) {
            (true, Some(kind)) => format!("Confirming {kind}..."),
            _ => self.action.label(symbol),
        }
    }
}

/// First match wins; unknown balance or allowance counts as zero.
pub fn resolve(
    snapshot: &ContractSnapshot,
    wallet: &WalletContext,
    in_flight: &InFlight,
) -> ResolvedAction {
    let action = match wallet.address {
        None => UserAction::ConnectWallet,
        Some(address) if snapshot.is_closed() && snapshot.is_leader(address) => {
            UserAction::Withdraw
        }
        Some(_) if snapshot.is_closed() => UserAction::GameClosed,
        Some(_)
            if !snapshot
                .user_balance
                .is_some_and(|balance| balance.covers_deposit()) =>
        {
            UserAction::InsufficientBalance
        }
        Some(_)
            if !snapshot
                .user_allowance
                .is_some_and(|allowance| allowance.covers_deposit()) =>
        {
            UserAction::Approve
        }
        Some(_) => UserAction::Deposit,
    };
    let in_progress = action
        .tx_kind()
        .is_some_and(|kind| in_flight.contains(kind));
    ResolvedAction {
        action,
        in_progress,
    }
}
