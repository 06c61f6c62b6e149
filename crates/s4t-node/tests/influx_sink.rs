use chrono::{TimeZone, Utc};
use s4t_node::{InfluxSink, Point, Sink};
use wiremock::matchers::{body_string, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn point() -> Point {
    Point {
        series: "value".into(),
        board: "Board_2".into(),
        value: 7.0,
        timestamp: Utc.timestamp_opt(1_700_000_000, 0).unwrap(),
    }
}

#[tokio::test]
async fn test_writes_line_protocol() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/v2/write"))
        .and(query_param("org", "S4T"))
        .and(query_param("bucket", "secure_communication"))
        .and(query_param("precision", "ns"))
        .and(header("Authorization", "Token s3cr3t"))
        .and(body_string("value,board=Board_2 value=7 1700000000000000000"))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;

    let sink = InfluxSink::new(&format!("{}/", server.uri()), "S4T", "s3cr3t").unwrap();
    sink.store_point("secure_communication", &point())
        .await
        .unwrap();
}

#[tokio::test]
async fn test_rejected_write_is_sink_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/v2/write"))
        .respond_with(ResponseTemplate::new(401).set_body_string("unauthorized access"))
        .mount(&server)
        .await;

    let sink = InfluxSink::new(&server.uri(), "S4T", "wrong").unwrap();
    match sink.store_point("clear_communication", &point()).await {
        Err(s4t_common::Error::Sink(detail)) => {
            assert!(detail.contains("401"));
            assert!(detail.contains("unauthorized access"));
        }
        other => panic!("unexpected {other:?}"),
    }
}
