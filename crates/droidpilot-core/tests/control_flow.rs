//! Tests for `first_success_of`, `no_error`, and `repeat_while`.

mod common;

use std::sync::Arc;

use droidpilot_core::error::{DriverError, Error, ExitSignal, ScriptError};
use droidpilot_core::query::by;
use droidpilot_core::scroll::Direction;
use droidpilot_core::action;

use common::{calls, context, entries, flat_screen, list_screen, ok, record, MockDriver};

// ---------------------------------------------------------------------------
// 1. first_success_of
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_first_success_of_stops_at_first_success() {
    let driver = Arc::new(MockDriver::with_screens(vec![flat_screen(&["Allow"])]));
    let mut ctx = context(&driver);
    let calls = calls();
    let (second, third) = (calls.clone(), calls.clone());

    ctx.first_success_of(vec![
        action(|ctx| Box::pin(async move { ctx.click_first(by::text("Accept")).await.map(drop) })),
        action(move |ctx| {
            record(&second, "allow");
            Box::pin(async move { ctx.click_first(by::text("Allow")).await.map(drop) })
        }),
        action(move |_ctx| {
            record(&third, "third");
            Box::pin(async { ok() })
        }),
    ])
    .await
    .unwrap();

    assert_eq!(entries(&calls), vec!["allow"]);
    assert_eq!(driver.count("input tap"), 1);
}

#[tokio::test]
async fn test_first_success_of_all_failing() {
    let driver = Arc::new(MockDriver::with_screens(vec![flat_screen(&["Nothing"])]));
    let mut ctx = context(&driver);

    let err = ctx
        .first_success_of(vec![
            action(|ctx| Box::pin(async move { ctx.click_first(by::text("Accept")).await.map(drop) })),
            action(|ctx| Box::pin(async move { ctx.scroll_on_first(Direction::Down, 5).await.map(drop) })),
        ])
        .await
        .unwrap_err();

    assert_eq!(
        err.as_script(),
        Some(&ScriptError::NoneCallbackWorked { attempts: 2 })
    );
}

#[tokio::test]
async fn test_first_success_of_empty_list_fails() {
    let driver = Arc::new(MockDriver::new());
    let mut ctx = context(&driver);

    let err = ctx.first_success_of(Vec::new()).await.unwrap_err();

    assert_eq!(
        err.as_script(),
        Some(&ScriptError::NoneCallbackWorked { attempts: 0 })
    );
}

#[tokio::test]
async fn test_first_success_of_propagates_unexpected_error() {
    let driver = Arc::new(MockDriver::new());
    driver.lose_connection_on("input tap");
    let mut ctx = context(&driver);
    let calls = calls();
    let second = calls.clone();

    let err = ctx
        .first_success_of(vec![
            action(|ctx| Box::pin(async move { ctx.tap(5, 5).await })),
            action(move |_ctx| {
                record(&second, "second");
                Box::pin(async { ok() })
            }),
        ])
        .await
        .unwrap_err();

    assert!(matches!(err, Error::Driver(DriverError::ConnectionLost(_))));
    assert!(entries(&calls).is_empty());
}

#[tokio::test]
async fn test_first_success_of_moves_past_exit_failure() {
    let driver = Arc::new(MockDriver::new());
    let mut ctx = context(&driver);
    let calls = calls();
    let second = calls.clone();

    ctx.first_success_of(vec![
        action(|ctx| Box::pin(async move { ctx.exit_failure("try next") })),
        action(move |_ctx| {
            record(&second, "second");
            Box::pin(async { ok() })
        }),
    ])
    .await
    .unwrap();

    assert_eq!(entries(&calls), vec!["second"]);
}

#[tokio::test]
async fn test_first_success_of_passes_exit_success_through() {
    let driver = Arc::new(MockDriver::new());
    let mut ctx = context(&driver);
    let calls = calls();
    let second = calls.clone();

    let err = ctx
        .first_success_of(vec![
            action(|ctx| Box::pin(async move { ctx.exit_success() })),
            action(move |_ctx| {
                record(&second, "second");
                Box::pin(async { ok() })
            }),
        ])
        .await
        .unwrap_err();

    assert!(matches!(err, Error::Exit(ExitSignal::Success)));
    assert!(entries(&calls).is_empty());
}

// ---------------------------------------------------------------------------
// 2. no_error
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_no_error_swallows_scripted_failure() {
    let driver = Arc::new(MockDriver::with_screens(vec![flat_screen(&["Home"])]));
    let mut ctx = context(&driver);

    ctx.no_error(|ctx| Box::pin(async move { ctx.click_first(by::text("Dismiss")).await.map(drop) }))
        .await
        .unwrap();
}

#[tokio::test]
async fn test_no_error_swallows_exit_failure() {
    let driver = Arc::new(MockDriver::new());
    let mut ctx = context(&driver);

    ctx.no_error(|ctx| Box::pin(async move { ctx.exit_failure("optional") }))
        .await
        .unwrap();
}

#[tokio::test]
async fn test_no_error_keeps_driver_error() {
    let driver = Arc::new(MockDriver::new());
    driver.respond("input keyevent", 255, "");
    let mut ctx = context(&driver);

    let err = ctx
        .no_error(|ctx| {
            Box::pin(async move { ctx.key(droidpilot_core::driver::AndroidKey::Back).await })
        })
        .await
        .unwrap_err();

    assert!(matches!(err, Error::Driver(DriverError::CommandFailed(_))));
}

#[tokio::test]
async fn test_no_error_may_mutate_variables() {
    let driver = Arc::new(MockDriver::new());
    let mut ctx = context(&driver);

    ctx.no_error(|ctx| {
        ctx.set_variable("dismissed", true);
        Box::pin(async { Err::<(), Error>(ScriptError::PredicateNotFound.into()) })
    })
    .await
    .unwrap();

    assert!(ctx.get_variable::<bool>("dismissed").unwrap());
}

// ---------------------------------------------------------------------------
// 3. repeat_while
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_repeat_while_without_match_does_nothing() {
    let driver = Arc::new(MockDriver::with_screens(vec![list_screen(&["Done"])]));
    let mut ctx = context(&driver);

    let iterations = ctx
        .repeat_while(by::text("Next"), |ctx, element| {
            Box::pin(async move { ctx.click(&element).await })
        })
        .await
        .unwrap();

    assert_eq!(iterations, 0);
    assert_eq!(driver.count("input tap"), 0);
}

#[tokio::test]
async fn test_repeat_while_resnapshots_each_iteration() {
    let driver = Arc::new(MockDriver::with_screens(vec![
        list_screen(&["Next"]),
        list_screen(&["Step two", "Next"]),
        list_screen(&["Finish"]),
    ]));
    driver.advance_on("input tap");
    let mut ctx = context(&driver);

    let iterations = ctx
        .repeat_while(by::text("Next"), |ctx, element| {
            Box::pin(async move { ctx.click(&element).await })
        })
        .await
        .unwrap();

    assert_eq!(iterations, 2);
    // the second "Next" sits one row lower than the first
    assert_eq!(
        driver.commands().iter().filter(|c| c.starts_with("input tap")).cloned().collect::<Vec<_>>(),
        vec!["input tap 540 250", "input tap 540 350"]
    );
}

#[tokio::test]
async fn test_repeat_while_stops_on_action_error() {
    let driver = Arc::new(MockDriver::with_screens(vec![list_screen(&["Next"])]));
    let mut ctx = context(&driver);

    let err = ctx
        .repeat_while(by::text("Next"), |ctx, element| {
            Box::pin(async move { ctx.check(&element).await })
        })
        .await
        .unwrap_err();

    assert!(matches!(err.as_script(), Some(ScriptError::ItemNotCheckable(_))));
}
