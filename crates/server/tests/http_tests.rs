//! End-to-end tests of the HTTP boundary
//!
//! Serves the router on an ephemeral port and talks plain HTTP/1.1 to it.
//! The tool is replaced by a shell script printing canned output.

#![cfg(unix)]

use common::test_utils::{DEFAULT_TEST_TIMEOUT, SAMPLE_LIST_OUTPUT, ST_VENDOR_ID, mock_event, with_timeout};
use server::dfu::DfuUtil;
use server::dfu::exec::ExecOptions;
use server::http::{AppState, router};
use server::images::ImageStore;
use server::usb::{Broadcaster, BroadcasterConfig};
use std::net::SocketAddr;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

struct TestServer {
    addr: SocketAddr,
    broadcaster: Broadcaster,
    _dir: tempfile::TempDir,
}

fn write_script(path: &Path, body: &str) {
    std::fs::write(path, format!("#!/bin/sh\n{}\n", body)).unwrap();
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o755)).unwrap();
}

/// Start a server whose tool prints the sample listing for `--list` and
/// echoes its arguments otherwise
async fn start_server() -> TestServer {
    let dir = tempfile::tempdir().unwrap();
    let listing = dir.path().join("list.txt");
    // Serials are free-form; one with punctuation beside the two sample boards
    let extra = "Found DFU: [0483:df11] ver=2200, devnum=9, cfg=1, intf=0, path=\"1-3\", alt=0, name=\"@Internal Flash  /0x08000000/04*016Kg\", serial=\"ABC-123\"\n";
    std::fs::write(&listing, format!("{}{}", SAMPLE_LIST_OUTPUT, extra)).unwrap();

    let images = dir.path().join("images");
    std::fs::create_dir(&images).unwrap();
    std::fs::write(images.join("fw.bin"), [0u8; 32]).unwrap();

    let tool = dir.path().join("fake-dfu-util");
    write_script(
        &tool,
        &format!(
            "if [ \"$1\" = \"-l\" ]; then cat '{}'; exit 0; fi\nfor i in 1 2 3 4 5 6 7; do echo banner; done\necho \"args: $*\"\necho 'Download done.'",
            listing.display()
        ),
    );

    let broadcaster = Broadcaster::new(BroadcasterConfig::default());
    let state = AppState {
        dfu: DfuUtil::new(tool.display().to_string(), 0, ExecOptions::default()),
        images: ImageStore::new(&images),
        broadcaster: broadcaster.clone(),
    };

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router(state)).await.unwrap();
    });

    TestServer {
        addr,
        broadcaster,
        _dir: dir,
    }
}

/// Send one request and return the raw response text
async fn request(addr: SocketAddr, method: &str, path: &str, body: Option<&str>) -> String {
    let mut stream = TcpStream::connect(addr).await.unwrap();
    let body = body.unwrap_or("");
    let head = format!(
        "{} {} HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\nContent-Type: application/json\r\nContent-Length: {}\r\n\r\n",
        method,
        path,
        body.len()
    );
    stream.write_all(head.as_bytes()).await.unwrap();
    stream.write_all(body.as_bytes()).await.unwrap();

    let mut response = Vec::new();
    with_timeout(DEFAULT_TEST_TIMEOUT, stream.read_to_end(&mut response))
        .await
        .unwrap()
        .unwrap();
    String::from_utf8_lossy(&response).into_owned()
}

fn status(response: &str) -> u16 {
    response
        .split_whitespace()
        .nth(1)
        .and_then(|code| code.parse().ok())
        .unwrap_or(0)
}

#[tokio::test]
async fn test_list_and_get_devices() {
    let server = start_server().await;

    let response = request(server.addr, "GET", "/devices/", None).await;
    assert_eq!(status(&response), 200);
    assert!(response.contains("\"serial\":\"319235713237\""));
    assert!(response.contains("\"serial\":\"3262355B3231\""));

    let response = request(server.addr, "GET", "/devices/3262355B3231", None).await;
    assert_eq!(status(&response), 200);
    assert!(response.contains("Not contiguous layout"));

    let response = request(server.addr, "GET", "/devices/000000000000", None).await;
    assert_eq!(status(&response), 404);
    assert!(response.contains("\"error\""));

    let response = request(server.addr, "GET", "/devices/ABC-123", None).await;
    assert_eq!(status(&response), 200);
    assert!(response.contains("\"serial\":\"ABC-123\""));

    // Lookup only matches listed serials, so any other text is just absent
    let response = request(server.addr, "GET", "/devices/bad%20serial", None).await;
    assert_eq!(status(&response), 404);
}

#[tokio::test]
async fn test_root_redirects() {
    let server = start_server().await;
    let response = request(server.addr, "GET", "/", None).await;
    assert!((300..400).contains(&status(&response)));
    assert!(response.to_lowercase().contains("location: /devices/"));
}

#[tokio::test]
async fn test_list_images() {
    let server = start_server().await;
    let response = request(server.addr, "GET", "/images/", None).await;
    assert_eq!(status(&response), 200);
    assert!(response.contains("{\"filename\":\"fw.bin\",\"size\":32}"));
}

#[tokio::test]
async fn test_download_streams_tool_output() {
    let server = start_server().await;
    let body = r#"{"filename":"fw.bin","alt":0,"address":"0x08000000"}"#;

    let response = request(server.addr, "POST", "/devices/319235713237/download", Some(body)).await;
    assert_eq!(status(&response), 200);
    assert!(response.contains("args: -D"));
    assert!(response.contains("-S 319235713237 -a 0 -s 0x08000000"));
    assert!(response.contains("Download done."));
    assert!(!response.contains("banner"));
}

#[tokio::test]
async fn test_transfer_validation() {
    let server = start_server().await;

    // Download needs an existing image
    let body = r#"{"filename":"missing.bin","alt":0,"address":"0x08000000"}"#;
    let response = request(server.addr, "POST", "/devices/319235713237/download", Some(body)).await;
    assert_eq!(status(&response), 400);

    // Upload must not overwrite
    let body = r#"{"filename":"fw.bin","alt":0,"address":"0x08000000"}"#;
    let response = request(server.addr, "POST", "/devices/319235713237/upload", Some(body)).await;
    assert_eq!(status(&response), 400);

    // Address must be a hex literal
    let body = r#"{"filename":"dump.bin","alt":0,"address":"08000000"}"#;
    let response = request(server.addr, "POST", "/devices/319235713237/upload", Some(body)).await;
    assert_eq!(status(&response), 400);

    let body = r#"{"filename":"../escape.bin","alt":0,"address":"0x08000000"}"#;
    let response = request(server.addr, "POST", "/devices/319235713237/upload", Some(body)).await;
    assert_eq!(status(&response), 400);
}

#[tokio::test]
async fn test_event_stream() {
    let server = start_server().await;

    let mut stream = TcpStream::connect(server.addr).await.unwrap();
    stream
        .write_all(b"GET /events HTTP/1.1\r\nHost: localhost\r\nAccept: text/event-stream\r\n\r\n")
        .await
        .unwrap();

    // Subscription is registered once the handler ran
    with_timeout(DEFAULT_TEST_TIMEOUT, async {
        while server.broadcaster.subscriber_count() == 0 {
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap();

    assert_eq!(server.broadcaster.publish(&mock_event("add", ST_VENDOR_ID)), 1);

    let mut received = String::new();
    let mut buf = [0u8; 1024];
    with_timeout(DEFAULT_TEST_TIMEOUT, async {
        while !received.contains("data:") || !received.contains("\"deviceAddress\"") {
            let n = stream.read(&mut buf).await.unwrap();
            assert!(n > 0, "stream closed early");
            received.push_str(&String::from_utf8_lossy(&buf[..n]));
        }
    })
    .await
    .unwrap();

    assert!(received.contains("text/event-stream"));
    assert!(received.contains("\"action\":\"add\""));

    // Client disconnect releases the subscription
    drop(stream);
    with_timeout(DEFAULT_TEST_TIMEOUT, async {
        while server.broadcaster.subscriber_count() > 0 {
            // Publishing lets the server notice the closed connection
            server.broadcaster.publish(&mock_event("change", ST_VENDOR_ID));
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        }
    })
    .await
    .unwrap();
}
