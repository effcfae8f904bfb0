use crate::{
    action::{
        ResolvedAction,
        UserAction,
        resolve,
    },
    config::AppConfig,
    connector::{
        RpcWallet,
        WalletConnector,
    },
    countdown::{
        CountdownClock,
        CountdownDisplay,
        TICK_INTERVAL,
    },
    errors::ReadError,
    reader::{
        ContractStateReader,
        RpcStateReader,
        SnapshotSequencer,
    },
    scheduler::{
        RefreshDecision,
        RefreshReason,
        RefreshScheduler,
    },
    snapshot::{
        ContractSnapshot,
        PartialRead,
    },
    store::{
        NoticeLevel,
        Notifications,
        ViewState,
        ViewStore,
    },
    transactions::{
        TransactionLifecycleController,
        TxEvent,
        TxKind,
        TxOutcome,
        TxTargets,
    },
    ui,
    wallets,
};
use alloy::{
    network::EthereumWallet,
    primitives::Address,
    providers::{
        DynProvider,
        Provider,
        ProviderBuilder,
    },
    signers::Signer,
};
use chrono::Utc;
use color_eyre::eyre::{
    Result,
    WrapErr,
    bail,
};
use futures::StreamExt;
use std::{
    ops::ControlFlow,
    sync::Arc,
    time::Duration,
};
use tokio::{
    sync::{
        mpsc,
        watch,
    },
    task::JoinSet,
    time::{
        self,
        Instant,
        Interval,
        MissedTickBehavior,
    },
};
use tracing::{
    debug,
    info,
    warn,
};

#[cfg(test)]
mod tests;

/// How long the deposit celebration stays up before the record resets.
pub const CELEBRATION_DURATION: Duration = Duration::from_secs(3);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UserCommand {
    /// Trigger whatever the primary action currently is.
    Activate,
    Refresh,
    Acknowledge,
    Quit,
}

#[derive(Clone, Debug)]
pub struct ControllerSettings {
    pub network_label: String,
    pub token_symbol: String,
    pub token_decimals: u8,
    pub poll_interval: Duration,
    pub round_window: Duration,
}

#[derive(Debug)]
pub(crate) struct ReadCompletion {
    pub seq: u64,
    pub result: Result<PartialRead, ReadError>,
}

#[derive(Debug)]
pub(crate) enum LoopEvent {
    Poll,
    CountdownTick,
    Deadline,
    Read(ReadCompletion),
    Transaction(TxEvent),
    Command(UserCommand),
}

/// Owns the snapshot and transaction records. Every state change happens on
/// the loop in [`AppController::run`]; reads and submissions run as tasks
/// and report back over channels.
pub struct AppController<R, W> {
    reader: Arc<R>,
    transactions: TransactionLifecycleController<W>,
    scheduler: RefreshScheduler,
    sequencer: SnapshotSequencer,
    clock: CountdownClock,
    countdown: CountdownDisplay,
    snapshot: Option<ContractSnapshot>,
    read_notice: Option<String>,
    notifications: Notifications,
    celebration_until: Option<Instant>,
    /// Confirmed kinds waiting for a read issued after this sequence number.
    settling: [Option<u64>; 3],
    settings: ControllerSettings,
    store: ViewStore,
    reads: JoinSet<()>,
    read_tx: mpsc::UnboundedSender<ReadCompletion>,
    read_rx: mpsc::UnboundedReceiver<ReadCompletion>,
    tx_events: mpsc::UnboundedReceiver<TxEvent>,
    command_tx: mpsc::UnboundedSender<UserCommand>,
    command_rx: mpsc::UnboundedReceiver<UserCommand>,
    poll_ticker: Interval,
    countdown_ticker: Interval,
}

impl<R, W> AppController<R, W>
where
    R: ContractStateReader,
    W: WalletConnector,
{
    /// Must be called inside a tokio runtime; the timers start here.
    pub fn new(reader: R, wallet: W, targets: TxTargets, settings: ControllerSettings) -> Self {
        let wallet_context = wallet.context();
        let (transactions, tx_events) =
            TransactionLifecycleController::new(Arc::new(wallet), targets);
        let scheduler = RefreshScheduler::new(settings.poll_interval);
        let poll_ticker = scheduler.ticker();
        let mut countdown_ticker = time::interval(TICK_INTERVAL);
        countdown_ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let (read_tx, read_rx) = mpsc::unbounded_channel();
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let store = ViewStore::new(ViewState::initial(
            settings.network_label.clone(),
            settings.token_symbol.clone(),
            wallet_context,
        ));

        Self {
            reader: Arc::new(reader),
            transactions,
            scheduler,
            sequencer: SnapshotSequencer::default(),
            clock: CountdownClock::new(settings.round_window),
            countdown: CountdownDisplay::from_remaining(0, settings.round_window),
            snapshot: None,
            read_notice: None,
            notifications: Notifications::default(),
            celebration_until: None,
            settling: [None; 3],
            settings,
            store,
            reads: JoinSet::new(),
            read_tx,
            read_rx,
            tx_events,
            command_tx,
            command_rx,
            poll_ticker,
            countdown_ticker,
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<ViewState> {
        self.store.subscribe()
    }

    pub fn commands(&self) -> mpsc::UnboundedSender<UserCommand> {
        self.command_tx.clone()
    }

    pub async fn run(mut self) {
        info!(network = %self.settings.network_label, "controller loop started");
        self.start();
        loop {
            let event = self.next_event().await;
            if self.handle(event).is_break() {
                break;
            }
        }
        self.shutdown();
        info!("controller loop stopped");
    }

    pub(crate) fn start(&mut self) {
        self.request_refresh(RefreshReason::Startup);
        self.publish();
    }

    pub(crate) async fn next_event(&mut self) -> LoopEvent {
        let countdown_running = self.clock.is_running();
        let deadline = self.next_deadline();
        tokio::select! {
            Some(completion) = self.read_rx.recv() => LoopEvent::Read(completion),
            Some(event) = self.tx_events.recv() => LoopEvent::Transaction(event),
            Some(command) = self.command_rx.recv() => LoopEvent::Command(command),
            _ = time::sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                LoopEvent::Deadline
            }
            _ = self.countdown_ticker.tick(), if countdown_running => LoopEvent::CountdownTick,
            _ = self.poll_ticker.tick() => LoopEvent::Poll,
        }
    }

    pub(crate) fn handle(&mut self, event: LoopEvent) -> ControlFlow<()> {
        match event {
            LoopEvent::Poll => self.request_refresh(RefreshReason::Interval),
            LoopEvent::CountdownTick => {
                if let Some(display) = self.clock.tick(Utc::now()) {
                    if !display.is_open {
                        info!("countdown reached zero");
                    }
                    self.countdown = display;
                }
            }
            LoopEvent::Deadline => self.expire(Instant::now()),
            LoopEvent::Read(completion) => self.apply_read(completion),
            LoopEvent::Transaction(event) => self.apply_tx_event(event),
            LoopEvent::Command(UserCommand::Activate) => self.activate(),
            LoopEvent::Command(UserCommand::Refresh) => {
                self.request_refresh(RefreshReason::Manual)
            }
            LoopEvent::Command(UserCommand::Acknowledge) => {
                if self.transactions.acknowledge() {
                    debug!("failed transactions acknowledged");
                }
            }
            LoopEvent::Command(UserCommand::Quit) => return ControlFlow::Break(()),
        }
        self.publish();
        ControlFlow::Continue(())
    }

    fn request_refresh(&mut self, reason: RefreshReason) {
        if let RefreshDecision::Dispatch(reason) = self.scheduler.request(reason) {
            self.dispatch_read(reason);
        }
    }

    fn dispatch_read(&mut self, reason: RefreshReason) {
        while self.reads.try_join_next().is_some() {}

        let seq = self.sequencer.issue();
        self.scheduler.begin(seq);
        let account = self.transactions.wallet().context().address;
        debug!(seq, ?reason, ?account, "dispatching contract read");

        let reader = Arc::clone(&self.reader);
        let read_tx = self.read_tx.clone();
        self.reads.spawn(async move {
            let result = reader.read(account).await;
            let _ = read_tx.send(ReadCompletion { seq, result });
        });
    }

    pub(crate) fn apply_read(&mut self, completion: ReadCompletion) {
        let ReadCompletion { seq, result } = completion;
        let deferred = self.scheduler.complete(seq);

        if !self.sequencer.accept(seq) {
            debug!(seq, "discarding stale contract read");
        } else {
            match result {
                Ok(read) => {
                    if self.apply_snapshot(seq, &read) {
                        self.finish_settlement(seq);
                    }
                }
                Err(err) => {
                    warn!(seq, %err, "contract read failed");
                    self.read_notice = Some(err.to_string());
                }
            }
        }

        if let Some(reason) = deferred {
            self.dispatch_read(reason);
        }
    }

    /// Returns whether the read produced a snapshot.
    fn apply_snapshot(&mut self, seq: u64, read: &PartialRead) -> bool {
        let now = Utc::now();
        self.read_notice = match read.partial_error() {
            Some(err) => {
                warn!(seq, %err, "partial contract read");
                Some(err.to_string())
            }
            None => None,
        };
        let Some(next) = ContractSnapshot::merge(
            self.snapshot.as_ref(),
            read,
            self.settings.token_decimals,
            now,
        ) else {
            warn!(seq, "pot state incomplete, keeping the view unloaded");
            return false;
        };
        if self.clock.set_end(next.game_end_timestamp) {
            debug!(end = next.game_end_timestamp, "countdown restarted");
        }
        self.countdown = self.clock.display_at(now);
        debug!(
            seq,
            total = %next.total_deposited,
            remaining_ms = next.remaining_time_ms,
            leader = %next.current_leader,
            "snapshot applied"
        );
        self.snapshot = Some(next);
        true
    }

    fn apply_tx_event(&mut self, event: TxEvent) {
        let now = Instant::now();
        let symbol = self.settings.token_symbol.clone();
        match self.transactions.apply(event) {
            TxOutcome::Ignored | TxOutcome::Confirming(_) => {}
            TxOutcome::Confirmed(kind) => {
                if kind != TxKind::Deposit {
                    self.settling[kind.index()] = Some(self.sequencer.issued());
                }
                self.request_refresh(RefreshReason::Settlement(kind));
                match kind {
                    TxKind::Approve => {
                        self.notifications.push(
                            NoticeLevel::Success,
                            format!("{symbol} approved. You can deposit now."),
                            now,
                        );
                    }
                    TxKind::Deposit => {
                        self.celebration_until = Some(now + CELEBRATION_DURATION);
                        self.notifications.push(
                            NoticeLevel::Success,
                            format!("1 {symbol} deposited"),
                            now,
                        );
                    }
                    TxKind::Withdraw => {
                        self.notifications
                            .push(NoticeLevel::Success, "Pot withdrawn!", now);
                    }
                }
            }
            TxOutcome::Failed(kind, error) => {
                self.notifications.push(
                    NoticeLevel::Error,
                    format!("{kind} failed: {error}. Please try again"),
                    now,
                );
            }
        }
    }

    /// Resets confirmed records once a read issued after their confirmation
    /// has been applied.
    fn finish_settlement(&mut self, seq: u64) {
        for kind in TxKind::ALL {
            let slot = &mut self.settling[kind.index()];
            if slot.is_some_and(|after| seq > after) {
                *slot = None;
                self.transactions.reset(kind);
                debug!(%kind, seq, "settlement reflected in snapshot");
            }
        }
    }

    fn activate(&mut self) {
        let now = Instant::now();
        let Some(resolved) = self.resolved_action() else {
            self.notifications
                .push(NoticeLevel::Info, "Still loading contract state", now);
            return;
        };
        let Some(kind) = resolved.action.tx_kind() else {
            let message = blocked_message(resolved.action, &self.settings.token_symbol);
            self.notifications.push(NoticeLevel::Info, message, now);
            return;
        };
        match self.transactions.submit(kind) {
            Ok(()) => self.notifications.push(
                NoticeLevel::Info,
                format!("{kind} sent to wallet"),
                now,
            ),
            Err(err) => {
                warn!(%kind, %err, "submission rejected");
                self.notifications.push(NoticeLevel::Error, err.to_string(), now);
            }
        }
    }

    fn expire(&mut self, now: Instant) {
        if self.celebration_until.is_some_and(|until| until <= now) {
            self.celebration_until = None;
            self.transactions.reset(TxKind::Deposit);
            debug!("deposit celebration cleared");
        }
        self.notifications.prune(now);
    }

    fn next_deadline(&self) -> Option<Instant> {
        match (self.celebration_until, self.notifications.next_expiry()) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    fn resolved_action(&self) -> Option<ResolvedAction> {
        let snapshot = self.snapshot.as_ref()?;
        let wallet = self.transactions.wallet().context();
        Some(resolve(snapshot, &wallet, &self.transactions.in_flight()))
    }

    fn build_view(&self) -> ViewState {
        ViewState {
            network: self.settings.network_label.clone(),
            chain_id: self.transactions.wallet().context().chain_id,
            token_symbol: self.settings.token_symbol.clone(),
            snapshot: self.snapshot.clone(),
            action: self.resolved_action(),
            countdown: self.countdown,
            wallet: self.transactions.wallet().context(),
            transactions: self.transactions.records().clone(),
            read_notice: self.read_notice.clone(),
            notifications: self.notifications.active(),
            celebrating: self.celebration_until.is_some(),
            refreshing: self.scheduler.outstanding().is_some(),
        }
    }

    fn publish(&self) {
        self.store.publish(self.build_view());
    }

    pub(crate) fn view(&self) -> ViewState {
        self.store.current()
    }

    fn shutdown(&mut self) {
        self.reads.abort_all();
        self.transactions.shutdown();
    }
}

fn blocked_message(action: UserAction, symbol: &str) -> String {
    match action {
        UserAction::ConnectWallet => {
            "Read-only session: restart with --wallet to play".to_string()
        }
        UserAction::InsufficientBalance => {
            format!("You need at least 1 {symbol} to deposit")
        }
        UserAction::GameClosed => "The round has closed".to_string(),
        UserAction::Approve | UserAction::Deposit | UserAction::Withdraw => {
            format!("{} is not available right now", action.label(symbol))
        }
    }
}

/// Connects to the configured network, checking the chain id. Returns the
/// provider and, when a wallet was selected, its address.
async fn connect(config: &AppConfig) -> Result<(DynProvider, Option<Address>)> {
    let (provider, address) = match &config.wallet {
        Some(selection) => {
            let descriptor = wallets::find_wallet(&selection.dir, &selection.name)?;
            let signer = wallets::unlock_wallet(&descriptor)?
                .with_chain_id(Some(config.env.chain_id()));
            let address = signer.address();
            let provider = ProviderBuilder::new()
                .wallet(EthereumWallet::from(signer))
                .connect(&config.rpc_url)
                .await
                .wrap_err_with(|| format!("Failed to connect to {}", config.rpc_url))?
                .erased();
            (provider, Some(address))
        }
        None => {
            let provider = ProviderBuilder::new()
                .connect(&config.rpc_url)
                .await
                .wrap_err_with(|| format!("Failed to connect to {}", config.rpc_url))?
                .erased();
            (provider, None)
        }
    };

    let chain_id = provider
        .get_chain_id()
        .await
        .wrap_err("Failed to query chain id")?;
    if chain_id != config.env.chain_id() {
        bail!(
            "RPC endpoint {} reports chain id {chain_id}, but {} is chain id {}",
            config.rpc_url,
            config.env,
            config.env.chain_id()
        );
    }
    Ok((provider, address))
}

pub async fn run_app(config: AppConfig) -> Result<()> {
    let (provider, address) = connect(&config).await?;
    info!(
        network = %config.env,
        pot = %config.pot_address,
        token = %config.token_address,
        multicall = %config.multicall_address,
        wallet = ?address,
        "connected"
    );

    let reader = RpcStateReader::new(
        provider.clone(),
        config.pot_address,
        config.token_address,
        config.multicall_address,
    );
    let wallet = RpcWallet::new(provider, address, config.env.chain_id());
    let targets = TxTargets {
        pot: config.pot_address,
        token: config.token_address,
        token_decimals: config.token_decimals,
    };
    let settings = ControllerSettings {
        network_label: config.env.to_string(),
        token_symbol: config.token_symbol.clone(),
        token_decimals: config.token_decimals,
        poll_interval: config.poll_interval,
        round_window: config.round_window,
    };
    let controller = AppController::new(reader, wallet, targets, settings);
    let commands = controller.commands();
    let mut view_rx = controller.subscribe();
    let controller_handle = tokio::spawn(controller.run());

    let mut ui_state = ui::UiState::default();
    ui::terminal_enter(&mut ui_state)?;
    info!("UI ready");
    let res = ui_loop(&mut ui_state, &mut view_rx, &commands).await;
    let _ = commands.send(UserCommand::Quit);
    if let Err(err) = controller_handle.await {
        warn!(%err, "controller task ended abnormally");
    }
    ui::terminal_exit()?;
    res
}

async fn ui_loop(
    ui_state: &mut ui::UiState,
    view_rx: &mut watch::Receiver<ViewState>,
    commands: &mpsc::UnboundedSender<UserCommand>,
) -> Result<()> {
    let mut input_events = ui::input_event_stream();
    let mut view = view_rx.borrow_and_update().clone();
    ui::draw(ui_state, &view).wrap_err("initial draw failed")?;

    loop {
        tokio::select! {
            changed = view_rx.changed() => {
                if changed.is_err() {
                    warn!("controller stopped publishing");
                    break;
                }
                view = view_rx.borrow_and_update().clone();
                ui::draw(ui_state, &view).wrap_err("draw after state change failed")?;
            }
            raw = input_events.next() => {
                let Some(raw) = raw else {
                    break;
                };
                let event = raw.wrap_err("failed to read terminal input")?;
                match ui::interpret_event(ui_state, event) {
                    Some(ui::UiEvent::Command(UserCommand::Quit)) => break,
                    Some(ui::UiEvent::Command(command)) => {
                        if commands.send(command).is_err() {
                            break;
                        }
                    }
                    Some(ui::UiEvent::Redraw) => {
                        ui::draw(ui_state, &view).wrap_err("redraw failed")?;
                    }
                    None => {}
                }
            }
            _ = tokio::signal::ctrl_c() => break,
        }
    }
    Ok(())
}
