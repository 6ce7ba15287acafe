//! 端到端流程：会话 + 工具 + 提醒投递 + 重启恢复

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use mockito::Matcher;
use souschef::config::AppConfig;
use souschef::core::{OrchestratorError, Runtime, RuntimeBuilder};
use souschef::llm::ScriptedLlmClient;
use souschef::reminders::{
    DeliveryOutcome, NotifyError, RecordingNotifier, ReminderStatus, Transition,
};
use souschef::session::Role;
use tokio_util::sync::CancellationToken;

fn test_config() -> AppConfig {
    let mut cfg = AppConfig::default();
    cfg.storage.db_path = None;
    cfg.llm.provider = "mock".to_string();
    cfg.recipes.base_url = None;
    cfg.recipes.api_key = None;
    cfg.tools.search.api_key = None;
    cfg.scheduler.poll_interval_ms = 50;
    cfg.dispatcher.base_delay_ms = 10;
    cfg.dispatcher.max_delay_ms = 40;
    cfg
}

async fn build(
    cfg: AppConfig,
    llm: Arc<ScriptedLlmClient>,
    notifier: Arc<RecordingNotifier>,
) -> Runtime {
    RuntimeBuilder::new(cfg)
        .with_llm(llm)
        .with_notifier(notifier)
        .with_system_prompt("You are a test chef.")
        .build()
        .await
        .unwrap()
}

#[tokio::test]
async fn soup_search_adds_three_turns_and_mentions_recipe() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("GET", "/api/recipes")
        .match_query(Matcher::UrlEncoded("search".into(), "soup".into()))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"{"items":[{"name":"Tomato Soup","slug":"tomato-soup"}]}"#)
        .create_async()
        .await;

    let mut cfg = test_config();
    cfg.recipes.base_url = Some(server.url());
    cfg.recipes.api_key = Some("secret".to_string());

    let llm = Arc::new(ScriptedLlmClient::new([
        r#"{"tool": "recipe_search", "args": {"query": "soup"}}"#,
        "You could make Tomato Soup tonight.",
    ]));
    let runtime = build(cfg, llm, Arc::new(RecordingNotifier::new())).await;

    let mut prefs = std::collections::BTreeMap::new();
    prefs.insert("skill".to_string(), "beginner".to_string());
    runtime.sessions.create("u1", prefs).await.unwrap();
    let before = runtime.sessions.load("u1").await.unwrap().unwrap().turns.len();

    let out = runtime
        .orchestrator
        .handle("u1", "find me a soup recipe")
        .await
        .unwrap();
    mock.assert_async().await;
    assert!(out.reply.contains("Tomato Soup"));
    assert_eq!(out.tool_calls_made, vec!["recipe_search".to_string()]);

    let session = runtime.sessions.load("u1").await.unwrap().unwrap();
    assert_eq!(session.turns.len(), before + 3);
    assert_eq!(session.turns[before + 1].role, Role::Tool);
    assert!(session.turns[before + 1].content.contains("tomato-soup"));
}

#[tokio::test]
async fn reminder_set_in_conversation_is_delivered_once() {
    let llm = Arc::new(ScriptedLlmClient::new([
        r#"{"tool": "reminder_create", "args": {"message": "take the bread out", "due_in_seconds": 1}}"#,
        "I'll remind you in a second.",
    ]));
    let notifier = Arc::new(RecordingNotifier::new());
    let runtime = build(test_config(), llm, Arc::clone(&notifier)).await;
    let mut events = runtime.dispatcher.subscribe();

    let cancel = CancellationToken::new();
    let scheduler = tokio::spawn(Arc::clone(&runtime.scheduler).run(cancel.clone()));

    runtime.orchestrator.handle("u1", "remind me").await.unwrap();

    let event = tokio::time::timeout(Duration::from_secs(5), events.recv())
        .await
        .expect("delivery within window")
        .unwrap();
    assert!(matches!(event.outcome, DeliveryOutcome::Delivered { attempts: 1 }));
    assert_eq!(event.session_id, "u1");

    let reminder = runtime.reminders.get(&event.reminder_id).await.unwrap().unwrap();
    assert_eq!(reminder.status, ReminderStatus::Delivered);

    tokio::time::sleep(Duration::from_millis(200)).await;
    cancel.cancel();
    scheduler.await.unwrap();
    assert_eq!(
        notifier.delivered(),
        vec![("souschef".to_string(), "take the bread out".to_string())]
    );
}

#[tokio::test]
async fn reminder_due_in_two_seconds_is_delivered_after_three() {
    let mut cfg = test_config();
    cfg.scheduler.poll_interval_ms = 200;
    let notifier = Arc::new(RecordingNotifier::new());
    let runtime = build(cfg, Arc::new(ScriptedLlmClient::default()), Arc::clone(&notifier)).await;

    runtime.sessions.create("u1", Default::default()).await.unwrap();
    let reminder = runtime
        .scheduler
        .create("u1", Utc::now() + chrono::Duration::seconds(2), "baste the chicken")
        .await
        .unwrap();

    let cancel = CancellationToken::new();
    let scheduler = tokio::spawn(Arc::clone(&runtime.scheduler).run(cancel.clone()));
    tokio::time::sleep(Duration::from_secs(3)).await;

    let stored = runtime.reminders.get(&reminder.id).await.unwrap().unwrap();
    assert_eq!(stored.status, ReminderStatus::Delivered);
    assert_eq!(notifier.attempts(), 1);
    cancel.cancel();
    scheduler.await.unwrap();
}

#[tokio::test]
async fn failing_delivery_stops_after_retry_cap() {
    let notifier = Arc::new(RecordingNotifier::always_failing(NotifyError::Transient(
        "connection refused".to_string(),
    )));
    let runtime = build(
        test_config(),
        Arc::new(ScriptedLlmClient::default()),
        Arc::clone(&notifier),
    )
    .await;
    let mut events = runtime.dispatcher.subscribe();

    runtime.sessions.create("u1", Default::default()).await.unwrap();
    let reminder = runtime
        .scheduler
        .create("u1", Utc::now(), "stir the risotto")
        .await
        .unwrap();

    let cancel = CancellationToken::new();
    let scheduler = tokio::spawn(Arc::clone(&runtime.scheduler).run(cancel.clone()));

    let event = tokio::time::timeout(Duration::from_secs(5), events.recv())
        .await
        .expect("delivery outcome")
        .unwrap();
    assert!(matches!(event.outcome, DeliveryOutcome::Failed { attempts: 3, .. }));

    tokio::time::sleep(Duration::from_millis(300)).await;
    cancel.cancel();
    scheduler.await.unwrap();

    assert_eq!(notifier.attempts(), 3);
    let stored = runtime.reminders.get(&reminder.id).await.unwrap().unwrap();
    assert_eq!(stored.status, ReminderStatus::Failed);
    assert_eq!(stored.attempts, 3);
    assert!(stored.last_error.is_some());
}

#[tokio::test]
async fn restart_requeues_pending_and_never_redelivers_fired() {
    let dir = tempfile::tempdir().unwrap();
    let mut cfg = test_config();
    cfg.storage.db_path = Some(dir.path().join("souschef.db"));

    let (pending_id, fired_id) = {
        let runtime = build(
            cfg.clone(),
            Arc::new(ScriptedLlmClient::default()),
            Arc::new(RecordingNotifier::new()),
        )
        .await;
        runtime.sessions.create("u1", Default::default()).await.unwrap();
        let pending = runtime
            .scheduler
            .create("u1", Utc::now() + chrono::Duration::milliseconds(300), "simmer check")
            .await
            .unwrap();
        let fired = runtime
            .scheduler
            .create("u1", Utc::now(), "oven timer")
            .await
            .unwrap();
        // 模拟：已触发、投递前进程退出
        runtime
            .reminders
            .transition(
                &fired.id,
                Transition::new(ReminderStatus::Pending, ReminderStatus::Fired),
            )
            .await
            .unwrap()
            .unwrap();
        if let Some(pool) = &runtime.pool {
            pool.close().await;
        }
        (pending.id, fired.id)
    };

    let notifier = Arc::new(RecordingNotifier::new());
    let runtime = build(cfg, Arc::new(ScriptedLlmClient::default()), Arc::clone(&notifier)).await;
    let report = runtime.scheduler.recover().await.unwrap();
    assert_eq!(report.requeued, 1);
    assert_eq!(report.abandoned, 1);

    let mut events = runtime.dispatcher.subscribe();
    let cancel = CancellationToken::new();
    let scheduler = tokio::spawn(Arc::clone(&runtime.scheduler).run(cancel.clone()));
    let event = tokio::time::timeout(Duration::from_secs(5), events.recv())
        .await
        .expect("pending reminder delivered after restart")
        .unwrap();
    assert_eq!(event.reminder_id, pending_id);
    cancel.cancel();
    scheduler.await.unwrap();

    let fired = runtime.reminders.get(&fired_id).await.unwrap().unwrap();
    assert_eq!(fired.status, ReminderStatus::Failed);
    assert_eq!(notifier.delivered().len(), 1);
    assert_eq!(notifier.delivered()[0].1, "simmer check");
}

#[tokio::test]
async fn tool_loop_exceeded_leaves_session_unchanged() {
    let call = r#"{"tool": "preference_set", "args": {"key": "diet", "value": "vegan"}}"#;
    let mut cfg = test_config();
    cfg.orchestrator.max_tool_hops = 2;
    let llm = Arc::new(ScriptedLlmClient::new([call, call, call]));
    let runtime = build(cfg, llm, Arc::new(RecordingNotifier::new())).await;

    runtime.sessions.create("u1", Default::default()).await.unwrap();
    runtime
        .sessions
        .append_turn("u1", souschef::session::Turn::user("earlier message"))
        .await
        .unwrap();
    let before = runtime.sessions.load("u1").await.unwrap().unwrap().turns.len();

    let err = runtime.orchestrator.handle("u1", "go").await.unwrap_err();
    assert!(matches!(err, OrchestratorError::ToolLoopExceeded { hops: 2 }));
    let after = runtime.sessions.load("u1").await.unwrap().unwrap().turns.len();
    assert_eq!(before, after);
}

#[tokio::test]
async fn preference_tool_feeds_next_system_prompt() {
    let llm = Arc::new(ScriptedLlmClient::new([
        r#"{"tool": "preference_set", "args": {"key": "Diet", "value": "vegetarian"}}"#,
        "Noted, vegetarian it is.",
        "How about a mushroom stroganoff?",
    ]));
    let runtime = build(test_config(), Arc::clone(&llm), Arc::new(RecordingNotifier::new())).await;

    runtime.orchestrator.handle("u1", "I'm vegetarian").await.unwrap();
    runtime.orchestrator.handle("u1", "dinner idea?").await.unwrap();

    let session = runtime.sessions.load("u1").await.unwrap().unwrap();
    assert_eq!(session.preference("diet"), Some("vegetarian"));
    let last_request = llm.requests().pop().unwrap();
    assert!(last_request[0].content.contains("- diet: vegetarian"));
}

#[tokio::test]
async fn cancelled_message_commits_nothing() {
    let runtime = build(
        test_config(),
        Arc::new(ScriptedLlmClient::new(["unused"])),
        Arc::new(RecordingNotifier::new()),
    )
    .await;
    runtime.sessions.create("u1", Default::default()).await.unwrap();

    let cancel = CancellationToken::new();
    cancel.cancel();
    let err = runtime
        .orchestrator
        .handle_with_cancel("u1", "hi", cancel)
        .await
        .unwrap_err();
    assert!(matches!(err, OrchestratorError::Cancelled));
    let session = runtime.sessions.load("u1").await.unwrap().unwrap();
    assert!(session.turns.is_empty());
}
