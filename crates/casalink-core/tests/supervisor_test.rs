//! End-to-end supervision scenarios over the channel-backed mock
//! transport: lifecycle, telemetry fan-out, keepalive cadence, and
//! reconnection after failures.

use std::sync::Arc;
use std::time::Duration;

use pretty_assertions::assert_eq;
use secrecy::SecretString;
use tokio::sync::mpsc;
use url::Url;

use casalink_core::{
    AuthMethod, ConnectionState, Miniserver, MiniserverConfig, StateRecord, StateValue,
};
use casalink_proto::ObjectId;
use casalink_proto::mock::{MockRemote, mock_transport};

const STRUCTURE_DOC: &str = r#"{
    "controls": {
        "10000000-0000-0000-0000000000000001": {
            "name": "Living Room Temp",
            "type": "InfoOnlyAnalog",
            "states": { "value": "20000000-0000-0000-0000000000000001" }
        },
        "10000000-0000-0000-0000000000000002": {
            "name": "Hallway Temp Mirror",
            "type": "InfoOnlyAnalog",
            "states": { "value": "20000000-0000-0000-0000000000000001" }
        },
        "10000000-0000-0000-0000000000000003": {
            "name": "Kitchen Light",
            "type": "Switch",
            "states": { "active": "20000000-0000-0000-0000000000000002" }
        }
    }
}"#;

fn shared_temp_id() -> ObjectId {
    ObjectId::parse("20000000-0000-0000-0000000000000001").expect("id")
}

fn test_config(auth: AuthMethod) -> MiniserverConfig {
    let url = Url::parse("http://192.168.1.77").expect("url");
    let mut config = MiniserverConfig::new(url, auth);
    config.secure_override = Some(false);
    config.response_timeout = Duration::from_secs(2);
    config
}

/// Serve the post-auth phase of one session: structure request, document
/// delivery, subscription acknowledgment.
async fn serve_configuration(remote: &mut MockRemote) {
    assert_eq!(remote.expect_text().await, "data/structure.json");
    remote.send_text(STRUCTURE_DOC).await;
    assert_eq!(
        remote.expect_text().await,
        "jdev/sps/enablebinstatusupdate"
    );
    remote.reply_ok("jdev/sps/enablebinstatusupdate", "1").await;
}

async fn wait_value(record: &Arc<StateRecord>) -> StateValue {
    for _ in 0..500 {
        if let Some(value) = record.value() {
            return value;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("no value arrived for state {}", record.id);
}

async fn next_remote(remotes: &mut mpsc::UnboundedReceiver<MockRemote>) -> MockRemote {
    remotes.recv().await.expect("transport open")
}

#[tokio::test(start_paused = true)]
async fn lifecycle_reaches_active_and_fans_out_shared_state() {
    let (transport, mut remotes) = mock_transport();
    let client = Miniserver::new(test_config(AuthMethod::None));
    client.start_with_transport(transport).await.expect("start");
    let mut state = client.connection_state();

    let mut remote = next_remote(&mut remotes).await;
    serve_configuration(&mut remote).await;

    state
        .wait_for(|s| *s == ConnectionState::Active)
        .await
        .expect("active");
    assert_eq!(client.controls().len(), 3);

    // One record on the wire, two controls listening to its identifier.
    remote.send_value_states(&[(shared_temp_id(), 21.5)]).await;

    let living = client.control_by_name("Living Room Temp").expect("control");
    let mirror = client
        .control_by_name("Hallway Temp Mirror")
        .expect("control");
    let living_state = living.state("value").expect("state");
    let mirror_state = mirror.state("value").expect("state");

    assert_eq!(wait_value(living_state).await, StateValue::Number(21.5));
    assert_eq!(wait_value(mirror_state).await, StateValue::Number(21.5));
    assert_eq!(
        client.state_value(&shared_temp_id()),
        Some(StateValue::Number(21.5))
    );

    client.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn password_handshake_runs_before_configuration() {
    let (transport, mut remotes) = mock_transport();
    let auth = AuthMethod::Password {
        user: "admin".into(),
        password: SecretString::from("hunter2".to_string()),
    };
    let client = Miniserver::new(test_config(auth));
    client.start_with_transport(transport).await.expect("start");
    let mut state = client.connection_state();

    let mut remote = next_remote(&mut remotes).await;

    assert_eq!(remote.expect_text().await, "jdev/sys/getkey");
    remote.reply_ok("jdev/sys/getkey", "41424344").await;

    let login = remote.expect_text().await;
    let token = login
        .strip_prefix("authenticate/admin/")
        .expect("login command shape");
    assert_eq!(token.len(), 64);
    remote.reply_ok(&login, "1").await;

    serve_configuration(&mut remote).await;
    state
        .wait_for(|s| *s == ConnectionState::Active)
        .await
        .expect("active");

    client.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn keepalive_flows_while_idle() {
    let (transport, mut remotes) = mock_transport();
    let mut config = test_config(AuthMethod::None);
    config.keepalive_interval = Duration::from_secs(240);
    let client = Miniserver::new(config);
    client.start_with_transport(transport).await.expect("start");
    let mut state = client.connection_state();

    let mut remote = next_remote(&mut remotes).await;
    serve_configuration(&mut remote).await;
    state
        .wait_for(|s| *s == ConnectionState::Active)
        .await
        .expect("active");

    // Idle: paused time advances straight to the keepalive deadline.
    assert_eq!(remote.expect_text().await, "keepalive");
    assert_eq!(remote.expect_text().await, "keepalive");

    client.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn reconnects_after_peer_close() {
    let (transport, mut remotes) = mock_transport();
    let client = Miniserver::new(test_config(AuthMethod::None));
    client.start_with_transport(transport).await.expect("start");
    let mut state = client.connection_state();

    let mut remote = next_remote(&mut remotes).await;
    serve_configuration(&mut remote).await;
    state
        .wait_for(|s| *s == ConnectionState::Active)
        .await
        .expect("active");

    remote.close(1006, "link lost").await;
    state
        .wait_for(|s| *s == ConnectionState::Disconnected)
        .await
        .expect("disconnected");

    // The supervisor sleeps the communication delay, then opens again.
    let mut second = next_remote(&mut remotes).await;
    serve_configuration(&mut second).await;
    state
        .wait_for(|s| *s == ConnectionState::Active)
        .await
        .expect("active again");

    client.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn rejected_credentials_retry_on_the_credential_cadence() {
    let (transport, mut remotes) = mock_transport();
    let auth = AuthMethod::Password {
        user: "admin".into(),
        password: SecretString::from("wrong".to_string()),
    };
    let client = Miniserver::new(test_config(auth));
    client.start_with_transport(transport).await.expect("start");

    let mut remote = next_remote(&mut remotes).await;
    assert_eq!(remote.expect_text().await, "jdev/sys/getkey");
    remote.reply_ok("jdev/sys/getkey", "41424344").await;
    let login = remote.expect_text().await;
    remote.reply(&login, serde_json::Value::Null, 401).await;

    // A second attempt follows once the credential delay elapses.
    let mut second = next_remote(&mut remotes).await;
    assert_eq!(second.expect_text().await, "jdev/sys/getkey");

    client.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn bad_structure_document_is_a_configuration_failure() {
    let (transport, mut remotes) = mock_transport();
    let client = Miniserver::new(test_config(AuthMethod::None));
    client.start_with_transport(transport).await.expect("start");
    let mut state = client.connection_state();

    let mut remote = next_remote(&mut remotes).await;
    assert_eq!(remote.expect_text().await, "data/structure.json");
    remote.send_text("<html>definitely not a structure</html>").await;

    // The attempt ends without ever reaching Active.
    state
        .wait_for(|s| *s == ConnectionState::Disconnected)
        .await
        .expect("disconnected");
    assert!(client.controls().is_empty());

    client.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn second_start_is_rejected() {
    let (transport, _remotes) = mock_transport();
    let client = Miniserver::new(test_config(AuthMethod::None));
    client
        .start_with_transport(Arc::clone(&transport) as Arc<dyn casalink_proto::Transport>)
        .await
        .expect("start");
    assert!(client.start_with_transport(transport).await.is_err());
    client.shutdown().await;
}
