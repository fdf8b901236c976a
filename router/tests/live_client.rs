mod support;

use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

use query_router::query::Parameter;
use query_router::source::live::ErddapClient;
use query_router::source::{SourceAdapter, SourceError};

use support::*;

/// Serves `response` verbatim to every connection. `None` accepts and then
/// never answers. Returns the base URL.
async fn stub(response: Option<String>) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        loop {
            let Ok((mut sock, _)) = listener.accept().await else {
                break;
            };
            let response = response.clone();

            tokio::spawn(async move {
                let mut buf = vec![0u8; 8192];
                let mut seen = Vec::new();
                while !seen.windows(4).any(|w| w == b"\r\n\r\n") {
                    match sock.read(&mut buf).await {
                        Ok(0) | Err(_) => return,
                        Ok(n) => seen.extend_from_slice(&buf[..n]),
                    }
                }

                match response {
                    Some(r) => {
                        let _ = sock.write_all(r.as_bytes()).await;
                        let _ = sock.shutdown().await;
                    }
                    None => tokio::time::sleep(Duration::from_secs(3600)).await,
                }
            });
        }
    });

    format!("http://{addr}/erddap")
}

fn http(status: &str, body: &str) -> String {
    format!(
        "HTTP/1.1 {status}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
        body.len()
    )
}

const TABLE: &str = r#"{
  "table": {
    "columnNames": ["platform_number", "time", "latitude", "longitude", "pres", "temp"],
    "columnTypes": ["String", "String", "double", "double", "float", "float"],
    "columnUnits": [null, "UTC", "degrees_north", "degrees_east", "decibar", "degree_Celsius"],
    "rows": [
      ["5904321", "2023-01-10T06:00:00Z", 1.5, -140.0, 5.0, 27.4],
      ["5904400", "2023-01-12T00:00:00Z", -3.0, -150.5, 5.0, 26.1]
    ]
  }
}"#;

fn client(base: String) -> ErddapClient {
    ErddapClient::new(base, "ArgoFloats", Some("token".into())).unwrap()
}

#[tokio::test]
async fn decodes_a_table() {
    let base = stub(Some(http("200 OK", TABLE))).await;
    let c = client(base);
    let q = pacific_query();

    let raw = c.fetch(&q, Duration::from_secs(2)).await.unwrap();
    let ms = c.normalize(raw, &q).unwrap();

    assert_eq!(ms.len(), 2);
    assert_eq!(ms[1].platform_id(), "5904400");
    assert_eq!(ms[1].value(Parameter::Temperature), Some(26.1));
}

#[tokio::test]
async fn empty_selection_is_an_empty_table() {
    let body = "Error {\n    code=404;\n    message=\"Not Found: Your query produced no matching results. (nRows = 0)\";\n}\n";
    let base = stub(Some(http("404 Not Found", body))).await;
    let c = client(base);
    let q = pacific_query();

    let raw = c.fetch(&q, Duration::from_secs(2)).await.unwrap();
    assert!(c.normalize(raw, &q).unwrap().is_empty());
}

#[tokio::test]
async fn server_error_is_transport() {
    let base = stub(Some(http("503 Service Unavailable", "busy"))).await;

    let err = client(base)
        .fetch(&pacific_query(), Duration::from_secs(2))
        .await
        .unwrap_err();

    assert!(matches!(err, SourceError::Transport(_)));
}

#[tokio::test]
async fn invalid_json_is_malformed() {
    let base = stub(Some(http("200 OK", "{\"table\": {\"columnNames\": 3"))).await;

    let err = client(base)
        .fetch(&pacific_query(), Duration::from_secs(2))
        .await
        .unwrap_err();

    assert!(matches!(err, SourceError::MalformedResponse(_)));
}

#[tokio::test]
async fn silent_server_times_out_within_budget() {
    let base = stub(None).await;
    let budget = Duration::from_millis(300);

    let started = std::time::Instant::now();
    let err = client(base).fetch(&pacific_query(), budget).await.unwrap_err();

    assert_eq!(err, SourceError::Timeout(budget));
    assert!(started.elapsed() < Duration::from_secs(2));
}

#[tokio::test]
async fn refused_connection_is_transport() {
    // Bind then drop to get a port nothing listens on.
    let addr = TcpListener::bind("127.0.0.1:0")
        .await
        .unwrap()
        .local_addr()
        .unwrap();

    let err = client(format!("http://{addr}/erddap"))
        .fetch(&pacific_query(), Duration::from_secs(2))
        .await
        .unwrap_err();

    assert!(matches!(err, SourceError::Transport(_)));
}
