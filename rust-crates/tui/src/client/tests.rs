#![allow(non_snake_case)]

use super::*;
use crate::{
    errors::TransactionError,
    test_helpers::{
        FakeReader,
        FakeWallet,
        TOKEN_DECIMALS,
        arb_read,
        arb_targets,
        units,
        user,
    },
    transactions::TxStatus,
};
use alloy::primitives::U256;

type TestController = AppController<FakeReader, FakeWallet>;

fn settings() -> ControllerSettings {
    ControllerSettings {
        network_label: "Local".to_string(),
        token_symbol: "USDC".to_string(),
        token_decimals: TOKEN_DECIMALS,
        poll_interval: Duration::from_secs(10),
        round_window: Duration::from_secs(24 * 60 * 60),
    }
}

fn controller(reader: FakeReader, wallet: FakeWallet) -> TestController {
    AppController::new(reader, wallet, arb_targets(), settings())
}

fn round_end() -> u64 {
    (Utc::now().timestamp() + 3_600) as u64
}

fn approved_read() -> PartialRead {
    PartialRead {
        user_allowance: Some(units(5)),
        ..arb_read(Some(user()), round_end())
    }
}

/// Handles loop events until one matches `pred`, including the match.
async fn drive_until<F>(controller: &mut TestController, mut pred: F)
where
    F: FnMut(&LoopEvent) -> bool,
{
    for _ in 0..1_000 {
        let event = controller.next_event().await;
        let matched = pred(&event);
        let _ = controller.handle(event);
        if matched {
            return;
        }
    }
    panic!("expected loop event never arrived");
}

/// Handles loop events until the published view satisfies `pred`.
async fn drive_until_view<F>(controller: &mut TestController, mut pred: F)
where
    F: FnMut(&ViewState) -> bool,
{
    for _ in 0..1_000 {
        let event = controller.next_event().await;
        let _ = controller.handle(event);
        if pred(&controller.view()) {
            return;
        }
    }
    panic!("expected view state never published");
}

fn is_read(event: &LoopEvent) -> bool {
    matches!(event, LoopEvent::Read(_))
}

fn is_settled(event: &LoopEvent) -> bool {
    matches!(event, LoopEvent::Transaction(TxEvent::Settled { .. }))
}

fn last_notice(view: &ViewState) -> String {
    view.notifications
        .last()
        .map(|note| note.message.clone())
        .unwrap_or_default()
}

async fn started(reader: &FakeReader, wallet: FakeWallet) -> TestController {
    let mut controller = controller(reader.clone(), wallet);
    controller.start();
    drive_until(&mut controller, is_read).await;
    controller
}

#[tokio::test(start_paused = true)]
async fn start__first_read__publishes_snapshot_and_action() {
    // given
    let reader = FakeReader::returning(approved_read());
    let mut controller = controller(reader.clone(), FakeWallet::connected());

    // when
    controller.start();
    let loading = controller.view();
    drive_until(&mut controller, is_read).await;

    // then
    assert!(loading.action.is_none());
    assert!(loading.refreshing);
    let view = controller.view();
    assert_eq!(view.action.unwrap().action, UserAction::Deposit);
    assert_eq!(view.snapshot.unwrap().total_deposited.to_string(), "3");
    assert!(view.countdown.is_open);
    assert!(!view.refreshing);
    assert_eq!(reader.calls(), vec![Some(user())]);
}

#[tokio::test(start_paused = true)]
async fn deposit__confirmed__refreshes_once_and_clears_celebration_after_delay() {
    // given
    let reader = FakeReader::returning(approved_read());
    let wallet = FakeWallet::connected();
    let mut controller = started(&reader, wallet.clone()).await;

    // when
    let _ = controller.handle(LoopEvent::Command(UserCommand::Activate));
    let submitted = controller.view();
    drive_until(&mut controller, is_settled).await;
    let settled_at = Instant::now();
    let celebrating = controller.view();
    drive_until_view(&mut controller, |view| !view.celebrating).await;

    // then
    assert_eq!(
        submitted.transaction(TxKind::Deposit).status,
        TxStatus::Submitted
    );
    assert!(submitted.action.unwrap().in_progress);
    assert!(celebrating.celebrating);
    assert_eq!(
        celebrating.transaction(TxKind::Deposit).status,
        TxStatus::Confirmed
    );

    let view = controller.view();
    assert_eq!(view.transaction(TxKind::Deposit).status, TxStatus::Idle);
    assert_eq!(Instant::now() - settled_at, CELEBRATION_DURATION);
    assert_eq!(reader.calls().len(), 2);
    assert_eq!(wallet.sent(), vec![arb_targets().prepare(TxKind::Deposit)]);
}

#[tokio::test(start_paused = true)]
async fn approval__confirmed__stays_in_progress_until_refresh_lands() {
    // given
    let reader = FakeReader::returning(arb_read(Some(user()), round_end()));
    let mut controller = started(&reader, FakeWallet::connected()).await;
    assert_eq!(
        controller.view().action.unwrap().action,
        UserAction::Approve
    );

    // when
    let _ = controller.handle(LoopEvent::Command(UserCommand::Activate));
    reader.set_fallback(approved_read());
    drive_until(&mut controller, is_settled).await;
    let settled = controller.view();
    drive_until(&mut controller, is_read).await;

    // then
    assert_eq!(
        settled.transaction(TxKind::Approve).status,
        TxStatus::Confirmed
    );
    let pending = settled.action.unwrap();
    assert_eq!(pending.action, UserAction::Approve);
    assert!(pending.in_progress);
    assert!(settled.refreshing);
    assert!(last_notice(&settled).contains("approved"));
    assert_eq!(reader.calls().len(), 2);
    let view = controller.view();
    assert_eq!(view.transaction(TxKind::Approve).status, TxStatus::Idle);
    assert_eq!(view.action.unwrap().action, UserAction::Deposit);
}

#[tokio::test(start_paused = true)]
async fn approval__activated_again_before_refresh__sends_nothing() {
    // given
    let reader = FakeReader::default();
    reader.push_response(Duration::ZERO, Ok(arb_read(Some(user()), round_end())));
    reader.push_response(Duration::from_secs(5), Ok(approved_read()));
    let wallet = FakeWallet::connected();
    let mut controller = started(&reader, wallet.clone()).await;
    let _ = controller.handle(LoopEvent::Command(UserCommand::Activate));
    drive_until(&mut controller, is_settled).await;

    // when
    let _ = controller.handle(LoopEvent::Command(UserCommand::Activate));
    let repeated = controller.view();
    drive_until(&mut controller, is_read).await;

    // then
    assert_eq!(wallet.sent(), vec![arb_targets().prepare(TxKind::Approve)]);
    assert_eq!(
        repeated.transaction(TxKind::Approve).status,
        TxStatus::Confirmed
    );
    assert!(last_notice(&repeated).contains("already in progress"));
    let view = controller.view();
    assert_eq!(view.transaction(TxKind::Approve).status, TxStatus::Idle);
    assert_eq!(view.action.unwrap().action, UserAction::Deposit);
}

#[tokio::test(start_paused = true)]
async fn withdraw__confirmed__record_outlives_read_issued_before_confirmation() {
    // given
    let closed = PartialRead {
        remaining_time_secs: Some(0),
        game_end_timestamp: Some((Utc::now().timestamp() - 60) as u64),
        current_leader: Some(user()),
        ..approved_read()
    };
    let reader = FakeReader::returning(closed.clone());
    reader.push_response(Duration::ZERO, Ok(closed.clone()));
    reader.push_response(Duration::from_secs(5), Ok(closed));
    let wallet = FakeWallet::connected().with_confirm_delay(Duration::from_secs(3));
    let mut controller = started(&reader, wallet).await;

    // when
    let _ = controller.handle(LoopEvent::Command(UserCommand::Activate));
    let _ = controller.handle(LoopEvent::Command(UserCommand::Refresh));
    drive_until(&mut controller, is_settled).await;
    drive_until(&mut controller, is_read).await;
    let early_read = controller.view();
    drive_until(&mut controller, is_read).await;

    // then
    assert_eq!(
        early_read.transaction(TxKind::Withdraw).status,
        TxStatus::Confirmed
    );
    assert!(early_read.action.unwrap().in_progress);
    assert_eq!(
        controller.view().transaction(TxKind::Withdraw).status,
        TxStatus::Idle
    );
    assert_eq!(reader.calls().len(), 3);
}

#[tokio::test(start_paused = true)]
async fn read__stale_response__never_overwrites_newer_snapshot() {
    // given
    let mut controller = controller(FakeReader::default(), FakeWallet::connected());
    let newer = PartialRead {
        total_deposited: Some(units(5)),
        ..approved_read()
    };
    let older = PartialRead {
        total_deposited: Some(units(3)),
        ..approved_read()
    };

    // when
    let _ = controller.handle(LoopEvent::Read(ReadCompletion {
        seq: 2,
        result: Ok(newer),
    }));
    let _ = controller.handle(LoopEvent::Read(ReadCompletion {
        seq: 1,
        result: Ok(older),
    }));

    // then
    let snapshot = controller.view().snapshot.unwrap();
    assert_eq!(snapshot.total_deposited.to_string(), "5");
}

#[tokio::test(start_paused = true)]
async fn read__partial_failure__keeps_previous_fields_and_surfaces_notice() {
    // given
    let reader = FakeReader::default();
    reader.push_response(Duration::ZERO, Ok(approved_read()));
    reader.push_response(
        Duration::ZERO,
        Ok(PartialRead {
            total_deposited: None,
            remaining_time_secs: Some(1_200),
            ..approved_read()
        }),
    );
    let mut controller = started(&reader, FakeWallet::connected()).await;

    // when
    let _ = controller.handle(LoopEvent::Command(UserCommand::Refresh));
    drive_until(&mut controller, is_read).await;

    // then
    let view = controller.view();
    let snapshot = view.snapshot.unwrap();
    assert_eq!(snapshot.total_deposited.to_string(), "3");
    assert_eq!(snapshot.remaining_time_ms, 1_200_000);
    assert!(view.read_notice.unwrap().contains("totalDeposited"));
    assert_eq!(view.action.unwrap().action, UserAction::Deposit);
}

#[tokio::test(start_paused = true)]
async fn read__rpc_failure__keeps_snapshot_and_resolver() {
    // given
    let reader = FakeReader::default();
    reader.push_response(Duration::ZERO, Ok(approved_read()));
    reader.push_response(
        Duration::ZERO,
        Err(ReadError::Rpc("connection refused".to_string())),
    );
    let mut controller = started(&reader, FakeWallet::connected()).await;

    // when
    let _ = controller.handle(LoopEvent::Command(UserCommand::Refresh));
    drive_until(&mut controller, is_read).await;

    // then
    let view = controller.view();
    assert!(view.snapshot.is_some());
    assert_eq!(
        view.read_notice.as_deref(),
        Some("rpc request failed: connection refused")
    );
    assert_eq!(view.action.unwrap().action, UserAction::Deposit);
}

#[tokio::test(start_paused = true)]
async fn refresh__while_read_outstanding__is_deferred_until_completion() {
    // given
    let reader = FakeReader::returning(approved_read());
    reader.push_response(Duration::from_secs(2), Ok(approved_read()));
    let mut controller = controller(reader.clone(), FakeWallet::connected());
    controller.start();

    // when
    let _ = controller.handle(LoopEvent::Command(UserCommand::Refresh));
    let _ = controller.handle(LoopEvent::Command(UserCommand::Refresh));
    let issued_while_outstanding = controller.sequencer.issued();
    let deferred = controller.scheduler.has_deferred();
    drive_until(&mut controller, is_read).await;
    let issued_after_first = controller.sequencer.issued();
    drive_until(&mut controller, is_read).await;

    // then
    assert_eq!(issued_while_outstanding, 1);
    assert!(deferred);
    assert_eq!(issued_after_first, 2);
    assert_eq!(reader.calls().len(), 2);
    assert!(!controller.scheduler.has_deferred());
    assert!(!controller.view().refreshing);
}

#[tokio::test(start_paused = true)]
async fn poll__interval_elapsed__triggers_refresh() {
    // given
    let reader = FakeReader::returning(approved_read());
    let mut controller = started(&reader, FakeWallet::connected()).await;
    let start = Instant::now();

    // when
    drive_until(&mut controller, |event| matches!(event, LoopEvent::Poll)).await;
    let polled_after = Instant::now() - start;
    let issued = controller.sequencer.issued();
    drive_until(&mut controller, is_read).await;

    // then
    assert_eq!(polled_after, Duration::from_secs(10));
    assert_eq!(issued, 2);
    assert_eq!(reader.calls().len(), 2);
}

#[tokio::test(start_paused = true)]
async fn poll__successive_reads__remaining_time_never_increases() {
    // given
    let reader = FakeReader::default();
    let end = round_end();
    for remaining in [3_600, 3_590, 3_580, 3_580] {
        reader.push_response(
            Duration::ZERO,
            Ok(PartialRead {
                remaining_time_secs: Some(remaining),
                game_end_timestamp: Some(end),
                ..approved_read()
            }),
        );
    }
    let mut controller = started(&reader, FakeWallet::connected()).await;
    let mut observed = vec![controller.view().snapshot.unwrap().remaining_time_ms];

    // when
    for _ in 0..3 {
        drive_until(&mut controller, |event| matches!(event, LoopEvent::Poll)).await;
        drive_until(&mut controller, is_read).await;
        observed.push(controller.view().snapshot.unwrap().remaining_time_ms);
    }

    // then
    assert_eq!(observed, vec![3_600_000, 3_590_000, 3_580_000, 3_580_000]);
    assert!(observed.windows(2).all(|pair| pair[1] <= pair[0]));
}

#[tokio::test(start_paused = true)]
async fn read__raised_round_end__restarts_countdown() {
    // given
    let end = round_end();
    let reader = FakeReader::default();
    reader.push_response(Duration::ZERO, Ok(approved_read()));
    reader.push_response(
        Duration::ZERO,
        Ok(PartialRead {
            remaining_time_secs: Some(4_200),
            game_end_timestamp: Some(end + 600),
            ..approved_read()
        }),
    );
    let mut controller = started(&reader, FakeWallet::connected()).await;
    let before = controller.view().countdown;

    // when
    let _ = controller.handle(LoopEvent::Command(UserCommand::Refresh));
    drive_until(&mut controller, is_read).await;

    // then
    let after = controller.view().countdown;
    assert!(after.is_open);
    assert!(after.total_ms > before.total_ms + 500_000);
    assert_eq!(
        controller.view().snapshot.unwrap().game_end_timestamp,
        end + 600
    );
}

#[tokio::test(start_paused = true)]
async fn start__first_read_missing_pot_field__offers_no_action() {
    // given
    let reader = FakeReader::returning(PartialRead {
        remaining_time_secs: None,
        current_leader: Some(user()),
        ..approved_read()
    });
    let wallet = FakeWallet::connected();
    let mut controller = started(&reader, wallet.clone()).await;

    // when
    let _ = controller.handle(LoopEvent::Command(UserCommand::Activate));

    // then
    let view = controller.view();
    assert!(view.snapshot.is_none());
    assert!(view.action.is_none());
    assert!(view.read_notice.as_ref().unwrap().contains("getRemainingTime"));
    assert!(last_notice(&view).contains("loading"));
    assert!(wallet.sent().is_empty());
}

#[tokio::test(start_paused = true)]
async fn activate__read_only_session__submits_nothing() {
    // given
    let reader = FakeReader::returning(arb_read(None, round_end()));
    let wallet = FakeWallet::disconnected();
    let mut controller = started(&reader, wallet.clone()).await;

    // when
    let _ = controller.handle(LoopEvent::Command(UserCommand::Activate));

    // then
    let view = controller.view();
    assert_eq!(view.action.unwrap().action, UserAction::ConnectWallet);
    assert!(last_notice(&view).contains("--wallet"));
    assert!(wallet.sent().is_empty());
    assert_eq!(reader.calls(), vec![None]);
}

#[tokio::test(start_paused = true)]
async fn activate__before_first_snapshot__reports_loading() {
    // given
    let reader = FakeReader::returning(approved_read());
    let wallet = FakeWallet::connected();
    let mut controller = controller(reader, wallet.clone());

    // when
    let _ = controller.handle(LoopEvent::Command(UserCommand::Activate));

    // then
    assert!(last_notice(&controller.view()).contains("loading"));
    assert!(wallet.sent().is_empty());
}

#[tokio::test(start_paused = true)]
async fn transaction__rejected__fails_until_acknowledged() {
    // given
    let reader = FakeReader::returning(approved_read());
    let wallet = FakeWallet::connected();
    wallet.fail_next_send(TransactionError::Rejected("user denied".to_string()));
    let mut controller = started(&reader, wallet).await;

    // when
    let _ = controller.handle(LoopEvent::Command(UserCommand::Activate));
    drive_until(&mut controller, |event| {
        matches!(event, LoopEvent::Transaction(TxEvent::Failed { .. }))
    })
    .await;
    let failed = controller.view();
    let _ = controller.handle(LoopEvent::Command(UserCommand::Acknowledge));

    // then
    assert_eq!(failed.transaction(TxKind::Deposit).status, TxStatus::Failed);
    assert!(last_notice(&failed).contains("user denied"));
    assert!(failed.action.unwrap().is_enabled());
    assert_eq!(
        controller.view().transaction(TxKind::Deposit).status,
        TxStatus::Idle
    );
    assert_eq!(reader.calls().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn round_closed__leader__is_offered_withdraw() {
    // given
    let closed = PartialRead {
        remaining_time_secs: Some(0),
        game_end_timestamp: Some((Utc::now().timestamp() - 60) as u64),
        current_leader: Some(user()),
        user_balance: Some(U256::ZERO),
        ..approved_read()
    };
    let reader = FakeReader::returning(closed);

    // when
    let controller = started(&reader, FakeWallet::connected()).await;

    // then
    let view = controller.view();
    assert_eq!(view.action.unwrap().action, UserAction::Withdraw);
    assert!(view.is_leader());
    assert!(!view.countdown.is_open);
}

#[tokio::test(start_paused = true)]
async fn notifications__expire_after_lifetime() {
    // given
    let reader = FakeReader::returning(arb_read(None, round_end()));
    let mut controller = started(&reader, FakeWallet::disconnected()).await;
    let _ = controller.handle(LoopEvent::Command(UserCommand::Activate));
    let start = Instant::now();

    // when
    drive_until_view(&mut controller, |view| view.notifications.is_empty()).await;

    // then
    assert_eq!(Instant::now() - start, crate::store::NOTIFICATION_LIFETIME);
}

#[tokio::test(start_paused = true)]
async fn run__quit_command__stops_loop() {
    // given
    let reader = FakeReader::returning(approved_read());
    let controller = controller(reader, FakeWallet::connected());
    let commands = controller.commands();
    let mut view_rx = controller.subscribe();
    let handle = tokio::spawn(controller.run());

    // when
    view_rx.changed().await.unwrap();
    commands.send(UserCommand::Quit).unwrap();

    // then
    handle.await.unwrap();
}
