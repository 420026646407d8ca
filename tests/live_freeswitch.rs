//! Integration tests against a live FreeSWITCH instance.
//!
//! These tests require FreeSWITCH ESL on 127.0.0.1:8022 with password ClueCon.
//! Run with: cargo test --test live_freeswitch -- --ignored

use freeswitch_esl_engine::constants::MAX_EVENT_QUEUE_SIZE;
use freeswitch_esl_engine::{
    EslClient, EslError, EslEventStream, EslEventType, EventFormat, LoggingLevel, ReplyStatus,
};
use std::time::Duration;
use tokio::time::Instant;

const ESL_HOST: &str = "127.0.0.1";
const ESL_PORT: u16 = 8022;
const ESL_PASSWORD: &str = "ClueCon";

async fn connect() -> (EslClient, EslEventStream) {
    let client = EslClient::connect(ESL_HOST, ESL_PORT, ESL_PASSWORD)
        .await
        .expect("failed to connect to FreeSWITCH");
    let events = client.event_stream(MAX_EVENT_QUEUE_SIZE);
    (client, events)
}

#[tokio::test]
#[ignore]
async fn live_connect_and_status() {
    let (client, _events) = connect().await;
    assert!(client.is_ready());

    let resp = client
        .api("status", None)
        .await
        .unwrap();
    let body = resp
        .body()
        .expect("status should have body");
    assert!(body.contains("UP"), "expected UP in status: {}", body);
    assert!(
        client
            .is_alive(Duration::from_secs(2))
            .await
    );
}

#[tokio::test]
#[ignore]
async fn live_subscribe_and_recv_heartbeat() {
    let (client, mut events) = connect().await;

    client
        .subscribe_events(EventFormat::Plain, &[EslEventType::Heartbeat])
        .await
        .unwrap();

    let event = tokio::time::timeout(Duration::from_secs(25), events.recv())
        .await
        .expect("timeout waiting for heartbeat")
        .expect("channel closed")
        .expect("event error");

    assert_eq!(event.event_type(), Some(EslEventType::Heartbeat));
    assert!(event
        .header("Core-UUID")
        .is_some());
}

#[tokio::test]
#[ignore]
async fn live_heartbeat_in_every_format() {
    for format in EventFormat::ALL {
        let (client, mut events) = connect().await;
        client
            .subscribe_events(*format, &[EslEventType::Heartbeat])
            .await
            .unwrap();

        let event = tokio::time::timeout(Duration::from_secs(25), events.recv())
            .await
            .expect("timeout waiting for heartbeat")
            .expect("channel closed")
            .expect("event error");
        assert_eq!(
            event.event_type(),
            Some(EslEventType::Heartbeat),
            "format {}",
            format
        );
        assert!(event
            .header("Core-UUID")
            .is_some());
        client
            .close()
            .await;
    }
}

#[tokio::test]
#[ignore]
async fn live_api_pipelined_from_many_tasks() {
    let (client, _events) = connect().await;

    let mut calls = Vec::new();
    for cmd in ["version", "hostname", "global_getvar", "status"] {
        let client = client.clone();
        calls.push(tokio::spawn(async move {
            client
                .api(cmd, None)
                .await
        }));
    }
    for call in calls {
        let resp = call
            .await
            .unwrap()
            .unwrap();
        assert!(resp
            .body()
            .is_some());
    }
    assert_eq!(client.pending_command_count(), 0);
}

#[tokio::test]
#[ignore]
async fn live_bgapi_completes_with_background_job() {
    let (client, _events) = connect().await;

    let job = client
        .bgapi("status", None, None)
        .await
        .unwrap();
    assert!(
        job.reply()
            .is_success(),
        "bgapi refused: {:?}",
        job.reply()
            .reply_text()
    );
    let job_uuid = job
        .job_uuid()
        .to_string();

    let event = job
        .into_completion()
        .wait_timeout(Duration::from_secs(5))
        .await
        .unwrap();
    assert_eq!(event.event_type(), Some(EslEventType::BackgroundJob));
    assert_eq!(event.job_uuid(), Some(job_uuid.as_str()));
    assert!(event
        .body()
        .unwrap_or("")
        .contains("UP"));
}

#[tokio::test]
#[ignore]
async fn live_bgapi_with_caller_job_id() {
    let (client, _events) = connect().await;
    let job_uuid = format!("esl-test-{}", std::process::id());

    let job = client
        .bgapi("version", None, Some(&job_uuid))
        .await
        .unwrap();
    assert_eq!(job.job_uuid(), job_uuid);

    let event = tokio::time::timeout(Duration::from_secs(5), job)
        .await
        .expect("timeout waiting for job")
        .unwrap();
    assert_eq!(event.job_uuid(), Some(job_uuid.as_str()));
}

#[tokio::test]
#[ignore]
async fn live_reply_status_err() {
    let (client, _events) = connect().await;

    // Filter deletion of a header with no filters yields -ERR.
    let resp = client
        .delete_filter("X-Nonexistent-Header-12345", Some("nothing"))
        .await
        .expect("send_command should not fail at transport level");

    if resp.reply_status() != ReplyStatus::Err {
        eprintln!(
            "server accepted the filter delete ({:?}), skipping",
            resp.reply_text()
        );
        return;
    }
    let err = resp
        .into_result()
        .unwrap_err();
    assert!(
        matches!(err, EslError::CommandFailed { .. }),
        "expected CommandFailed, got: {:?}",
        err
    );
}

#[tokio::test]
#[ignore]
async fn live_logging_toggle() {
    let (client, _events) = connect().await;
    let resp = client
        .set_logging(LoggingLevel::Debug)
        .await
        .unwrap();
    assert!(resp.is_success(), "log: {:?}", resp.reply_text());
    let resp = client
        .cancel_logging()
        .await
        .unwrap();
    assert!(resp.is_success(), "nolog: {:?}", resp.reply_text());
}

#[tokio::test]
#[ignore]
async fn live_noevents_stops_delivery() {
    let (client, mut events) = connect().await;

    client
        .subscribe_events(EventFormat::Plain, &[EslEventType::ReloadXml])
        .await
        .unwrap();
    client
        .bgapi("reloadxml", None, None)
        .await
        .unwrap();

    let deadline = Instant::now() + Duration::from_secs(5);
    loop {
        match tokio::time::timeout_at(deadline, events.recv()).await {
            Ok(Some(Ok(evt))) if evt.is_event_type(EslEventType::ReloadXml) => break,
            Ok(Some(Ok(_))) => continue,
            other => panic!("expected RELOADXML before noevents: {:?}", other),
        }
    }

    client
        .cancel_event_subscriptions()
        .await
        .unwrap();
    client
        .bgapi("reloadxml", None, None)
        .await
        .unwrap();

    match tokio::time::timeout(Duration::from_secs(2), events.recv()).await {
        Err(_) => {}
        Ok(Some(Ok(evt))) => panic!(
            "received event after noevents: {:?}",
            evt.event_type()
        ),
        Ok(Some(Err(e))) => panic!("event error: {}", e),
        Ok(None) => {}
    }
}

#[tokio::test]
#[ignore]
async fn live_api_err_body() {
    let (client, _events) = connect().await;

    let resp = client
        .api("nonexistent_command_xyz", None)
        .await
        .unwrap();
    let body = resp
        .body()
        .expect("api error should have body");
    assert!(
        body.contains("-ERR") || body.contains("-USAGE"),
        "expected error in body: {}",
        body
    );
}

#[tokio::test]
#[ignore]
async fn live_channel_events_for_parked_call() {
    let (client, mut events) = connect().await;

    client
        .subscribe_events(
            EventFormat::Plain,
            &[EslEventType::ChannelCreate, EslEventType::ChannelDestroy],
        )
        .await
        .unwrap();

    let resp = client
        .api("originate", Some("null/test &park()"))
        .await
        .unwrap();
    let body = resp
        .body()
        .unwrap_or("");
    if !body.starts_with("+OK") {
        eprintln!("originate failed ({}), skipping", body.trim());
        return;
    }
    let uuid = body
        .trim()
        .strip_prefix("+OK ")
        .expect("expected UUID after +OK")
        .to_string();

    let deadline = Instant::now() + Duration::from_secs(5);
    let mut created = false;
    while Instant::now() < deadline {
        match tokio::time::timeout_at(deadline, events.recv()).await {
            Ok(Some(Ok(evt))) => {
                if evt.is_event_type(EslEventType::ChannelCreate)
                    && evt.unique_id() == Some(uuid.as_str())
                {
                    assert!(evt
                        .channel_name()
                        .is_some());
                    created = true;
                    break;
                }
            }
            Ok(Some(Err(e))) => panic!("event error: {}", e),
            Ok(None) => panic!("event stream closed"),
            Err(_) => break,
        }
    }

    let _ = client
        .api("uuid_kill", Some(&uuid))
        .await;

    assert!(created, "did not receive CHANNEL_CREATE for {}", uuid);
}
