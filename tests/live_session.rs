mod common;

use std::{collections::HashSet, time::Duration};

use classroom_live_back::{
    config::AppConfig,
    dao::session_store::SessionStore,
    error::ServiceError,
    services::{
        answer_service::{self, AnswerSubmission},
        lifecycle_service,
        room_events::{EVENT_LEADERBOARD_UPDATE, EVENT_SESSION_ENDED, EVENT_SESSION_STARTED, EVENT_TIMER_TICK},
        session_service::{self, Recovery},
        timer_service,
    },
    state::state_machine::SessionStatus,
};
use tokio::{sync::broadcast::error::RecvError, time::sleep};
use uuid::Uuid;

use common::{attach, live_state};

fn answer(session_id: Uuid, student_id: &str, question_id: &str, answer: &str) -> AnswerSubmission {
    AnswerSubmission {
        session_id,
        student_id: student_id.into(),
        question_id: question_id.into(),
        answer: answer.into(),
        client_ts: None,
    }
}

#[tokio::test(start_paused = true)]
async fn class_answers_then_time_runs_out() {
    let (state, store) = live_state(AppConfig::default()).await;
    let session = session_service::create(&state, "demo", "teacher-1").await.unwrap();
    lifecycle_service::start(&state, session.id, Some(60), None)
        .await
        .unwrap();
    session_service::join(&state, session.id, "s1", "Ada").await.unwrap();
    session_service::join(&state, session.id, "s2", "Grace").await.unwrap();

    for (question_id, s1, s2) in [("q1", "42", "42"), ("q2", "Lyon", "paris"), ("q3", "h2o", "CO2")] {
        answer_service::submit_answer(&state, answer(session.id, "s1", question_id, s1))
            .await
            .unwrap();
        answer_service::submit_answer(&state, answer(session.id, "s2", question_id, s2))
            .await
            .unwrap();
    }

    let rows = answer_service::leaderboard(&state, session.id).await.unwrap();
    let ranked: Vec<(&str, f64)> = rows
        .iter()
        .map(|row| (row.student_id.as_str(), row.percent))
        .collect();
    assert_eq!(ranked, [("s1", 66.7), ("s2", 66.7)]);

    let mut room = state.rooms().subscribe(session.id);
    sleep(Duration::from_secs(61)).await;

    let stored = SessionStore::get_session(store.as_ref(), session.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.status, SessionStatus::Ended);
    assert!(!state.timers().is_armed(session.id));

    let mut events = Vec::new();
    loop {
        match room.recv().await {
            Ok(event) => events.push(event),
            Err(RecvError::Closed) => break,
            Err(RecvError::Lagged(skipped)) => panic!("room lagged by {skipped}"),
        }
    }
    let ticks: Vec<u64> = events
        .iter()
        .filter(|event| event.event == EVENT_TIMER_TICK)
        .filter_map(|event| event.data["remaining"].as_u64())
        .collect();
    assert_eq!(ticks.len(), 59);
    assert_eq!(ticks.first(), Some(&59));
    assert_eq!(ticks.last(), Some(&1));
    let names: Vec<&str> = events.iter().map(|event| event.event.as_str()).collect();
    assert_eq!(
        &names[names.len() - 2..],
        &[EVENT_SESSION_ENDED, EVENT_LEADERBOARD_UPDATE]
    );
    assert_eq!(events[events.len() - 1].data["rows"][0]["percent"], 66.7);

    let late = answer_service::submit_answer(&state, answer(session.id, "s1", "q2", "paris"))
        .await
        .unwrap_err();
    assert!(matches!(late, ServiceError::Expired(_)));
}

#[tokio::test(start_paused = true)]
async fn reconnect_mid_countdown_reports_what_is_left() {
    let (state, store) = live_state(AppConfig::default()).await;
    let session = session_service::create(&state, "demo", "teacher-1").await.unwrap();
    lifecycle_service::start(&state, session.id, Some(120), None)
        .await
        .unwrap();

    sleep(Duration::from_secs(50)).await;
    let Recovery::Running { remaining, .. } = session_service::recover(&state, session.id).await.unwrap() else {
        panic!("expected a running session");
    };
    assert_eq!(remaining, 70);

    // A restarted process only has the store to go on.
    let clock = state.clock().clone();
    drop(state);
    let restarted = attach(AppConfig::default(), store.clone(), clock).await;
    assert!(!restarted.timers().is_armed(session.id));
    let Recovery::Running { remaining, .. } = session_service::recover(&restarted, session.id).await.unwrap() else {
        panic!("expected a running session after restart");
    };
    assert_eq!(remaining, 70);
    assert!(restarted.timers().is_armed(session.id));

    sleep(Duration::from_secs(71)).await;
    assert_eq!(
        session_service::recover(&restarted, session.id).await.unwrap(),
        Recovery::Expired
    );
}

#[tokio::test(start_paused = true)]
async fn restart_restores_and_expires_overdue_sessions() {
    let (state, store) = live_state(AppConfig::default()).await;
    let session = session_service::create(&state, "demo", "teacher-1").await.unwrap();
    lifecycle_service::start(&state, session.id, Some(10), None)
        .await
        .unwrap();
    let clock = state.clock().clone();
    drop(state);

    sleep(Duration::from_secs(30)).await;
    let restarted = attach(AppConfig::default(), store.clone(), clock).await;
    assert_eq!(timer_service::restore_timers(&restarted).await.unwrap(), 1);
    sleep(Duration::from_millis(10)).await;

    let stored = SessionStore::get_session(store.as_ref(), session.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.status, SessionStatus::Ended);
}

#[tokio::test(start_paused = true)]
async fn pause_then_resume_keeps_remaining_time() {
    let (state, _store) = live_state(AppConfig::default()).await;
    let session = session_service::create(&state, "demo", "teacher-1").await.unwrap();
    lifecycle_service::start(&state, session.id, Some(60), None)
        .await
        .unwrap();

    sleep(Duration::from_secs(20)).await;
    lifecycle_service::pause(&state, session.id).await.unwrap();
    assert_eq!(
        session_service::recover(&state, session.id).await.unwrap(),
        Recovery::Paused { remaining: 40 }
    );

    sleep(Duration::from_secs(30)).await;
    let resumed = lifecycle_service::resume(&state, session.id).await.unwrap();
    assert_eq!(resumed.status, SessionStatus::Running);
    assert_eq!(timer_service::snapshot_remaining(&state, session.id), Some(40));

    sleep(Duration::from_secs(39)).await;
    assert_eq!(
        session_service::get(&state, session.id).await.unwrap().status,
        SessionStatus::Running
    );
    sleep(Duration::from_secs(2)).await;
    assert_eq!(
        session_service::get(&state, session.id).await.unwrap().status,
        SessionStatus::Ended
    );
}

#[tokio::test(start_paused = true)]
async fn zero_duration_ends_right_away() {
    let (state, _store) = live_state(AppConfig::default()).await;
    let session = session_service::create(&state, "demo", "teacher-1").await.unwrap();
    let mut room = state.rooms().subscribe(session.id);

    lifecycle_service::start(&state, session.id, Some(0), None)
        .await
        .unwrap();
    sleep(Duration::from_millis(10)).await;

    assert_eq!(room.recv().await.unwrap().event, EVENT_SESSION_STARTED);
    assert_eq!(room.recv().await.unwrap().event, EVENT_SESSION_ENDED);
    assert_eq!(
        session_service::get(&state, session.id).await.unwrap().status,
        SessionStatus::Ended
    );
}

#[tokio::test(start_paused = true)]
async fn illegal_commands_leave_the_session_alone() {
    let (state, _store) = live_state(AppConfig::default()).await;
    let session = session_service::create(&state, "demo", "teacher-1").await.unwrap();

    for result in [
        lifecycle_service::pause(&state, session.id).await,
        lifecycle_service::resume(&state, session.id).await,
        lifecycle_service::stop(&state, session.id).await,
    ] {
        assert!(matches!(result, Err(ServiceError::InvalidTransition(_))));
    }
    assert_eq!(
        session_service::get(&state, session.id).await.unwrap().status,
        SessionStatus::Ready
    );
    assert!(!state.timers().is_armed(session.id));

    lifecycle_service::start(&state, session.id, Some(30), None)
        .await
        .unwrap();
    let again = lifecycle_service::start(&state, session.id, Some(30), None).await;
    assert!(matches!(again, Err(ServiceError::InvalidTransition(_))));
    assert_eq!(state.timers().armed_count(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_creates_get_distinct_join_codes() {
    let (state, _store) = live_state(AppConfig::default()).await;

    let tasks: Vec<_> = (0..100)
        .map(|i| {
            let state = state.clone();
            tokio::spawn(async move {
                session_service::create(&state, "demo", &format!("teacher-{i}"))
                    .await
                    .map(|session| session.join_code)
            })
        })
        .collect();

    let mut codes = HashSet::new();
    for task in tasks {
        let code = task.await.unwrap().unwrap();
        assert!(codes.insert(code));
    }
    assert_eq!(codes.len(), 100);
}

#[tokio::test]
async fn degraded_mode_refuses_store_work() {
    let (state, store) = live_state(AppConfig::default()).await;
    let session = session_service::create(&state, "demo", "teacher-1").await.unwrap();

    state.update_degraded(true);
    let err = session_service::create(&state, "demo", "teacher-1").await.unwrap_err();
    assert!(matches!(err, ServiceError::Degraded));

    state.update_degraded(false);
    store.set_offline(true);
    let err = lifecycle_service::start(&state, session.id, Some(30), None)
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::Unavailable(_)));
    assert!(!state.timers().is_armed(session.id));
}
