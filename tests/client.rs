use std::time::Duration;

use hypertoken_bridge::client::RpcClient;
use hypertoken_bridge::error::BridgeError;
use hypertoken_bridge::protocol::SpaceDescriptor;
use hypertoken_bridge::server::{measure_latency, wait_for_server};
use hypertoken_bridge::spaces::Space;
use hypertoken_bridge::transport::WsTransport;

use crate::fake_server::{FakeServer, GameSpec};


fn client(server: &FakeServer) -> RpcClient {
    let mut client = RpcClient::new(WsTransport::new(
        server.address.clone(),
        Duration::from_secs(5),
    ));
    client.connect().unwrap();
    client
}

#[test]
fn server_spaces_survive_conversion() {
    let server = FakeServer::spawn(GameSpec::new(2, 3));
    let mut client = client(&server);

    for agent in client.possible_agents().unwrap() {
        for desc in [
            client.observation_space(&agent).unwrap(),
            client.action_space(&agent).unwrap(),
        ] {
            let space = Space::try_from(desc.clone()).unwrap();
            assert_eq!(SpaceDescriptor::from(&space), desc);
        }
    }
}

#[test]
fn one_reply_per_command_in_order() {
    let server = FakeServer::spawn(GameSpec::new(2, 3));
    let mut client = client(&server);

    client.reset(Some(5)).unwrap();
    assert_eq!(client.agent_selection().unwrap(), "player_0");
    client.step(2).unwrap();
    assert_eq!(client.agent_selection().unwrap(), "player_1");
    let last = client.last().unwrap();
    assert_eq!(last.reward, 0.0);
    assert_eq!(client.observe("player_0").unwrap(), vec![1.0, 1.0, 0.0]);
    assert_eq!(
        server.command_names(),
        vec![
            "reset",
            "agent_selection",
            "step",
            "agent_selection",
            "last",
            "observe"
        ]
    );
}

#[test]
fn server_errors_keep_the_connection() {
    let server = FakeServer::spawn(GameSpec::new(2, 3));
    let mut client = client(&server);
    client.reset(None).unwrap();

    match client.step(1) {
        Err(BridgeError::Server(msg)) => assert_eq!(msg, "invalid action"),
        other => panic!("expected a server error, got {other:?}"),
    }
    assert!(client.is_connected());
    client.ping().unwrap();
}

#[test]
fn wait_and_measure() {
    let server = FakeServer::spawn(GameSpec::new(1, 1));
    assert!(wait_for_server(
        &server.address,
        Duration::from_secs(2),
        Duration::from_millis(50)
    ));

    let stats = measure_latency(&server.address, 20).unwrap();
    assert_eq!(stats.samples, 20);
    assert!(stats.min <= stats.median && stats.median <= stats.max);
    assert!(stats.min <= stats.mean && stats.mean <= stats.max);
    assert_eq!(server.count("ping"), 20);
}
