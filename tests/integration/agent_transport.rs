//! HTTP agent transport against a mock agent.

use fleet_control::transport::{AgentEndpoint, AgentTransport, HttpAgentTransport, TransportError};
use serde_json::json;
use wiremock::matchers::{body_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn endpoint_of(server: &MockServer) -> AgentEndpoint {
    let address = server.address();
    AgentEndpoint {
        host: address.ip().to_string(),
        port: address.port(),
        ssh_user: "root".into(),
    }
}

#[tokio::test]
async fn command_round_trip() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/execute"))
        .and(header("X-FLEET-SECRET", "sekret"))
        .and(body_json(json!({
            "command": "uptime",
            "ssh_user": "root"
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "exit_code": 0,
            "stdout": "up 12 days",
            "stderr": ""
        })))
        .expect(1)
        .mount(&server)
        .await;

    let transport = HttpAgentTransport::new();
    let output = transport
        .execute(&endpoint_of(&server), "sekret", "uptime")
        .await
        .unwrap();

    assert!(output.succeeded());
    assert_eq!(output.stdout, "up 12 days");
}

#[tokio::test]
async fn http_error_is_a_rejection() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/execute"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;

    let transport = HttpAgentTransport::new();
    let result = transport
        .execute(&endpoint_of(&server), "wrong", "uptime")
        .await;

    assert!(matches!(result, Err(TransportError::Rejected(_))));
}

#[tokio::test]
async fn garbage_body_is_a_bad_response() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/execute"))
        .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
        .mount(&server)
        .await;

    let transport = HttpAgentTransport::new();
    let result = transport
        .execute(&endpoint_of(&server), "sekret", "uptime")
        .await;

    assert!(matches!(result, Err(TransportError::BadResponse(_))));
}

#[tokio::test]
async fn refused_connection_is_unreachable() {
    let transport = HttpAgentTransport::new();
    let endpoint = AgentEndpoint {
        host: "127.0.0.1".into(),
        // Port 1 is essentially never listening.
        port: 1,
        ssh_user: "root".into(),
    };

    let result = transport.execute(&endpoint, "sekret", "uptime").await;
    assert!(matches!(result, Err(TransportError::Unreachable(_))));
}
