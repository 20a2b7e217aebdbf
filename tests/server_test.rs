use std::path::PathBuf;
use std::time::Duration;

use rand::Rng;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;

use grid_ingest::common::reading::RawReading;
use grid_ingest::crypto::{derive_key, encrypt_block};
use grid_ingest::server::{Server, ServerConfig};

fn test_config(sum_interval: usize) -> ServerConfig {
    ServerConfig {
        host: "127.0.0.1".to_string(),
        port: 0,
        devices: 4,
        sum_interval,
        threads: 4,
        quiet: true,
        idle_poll_ms: 50,
        ..ServerConfig::default()
    }
}

/// Header + ciphertext exactly as a device sends it.
fn device_frame(device_id: &str, device_num: u16, power: u16, voltage_dv: u16) -> Vec<u8> {
    let key = derive_key(device_id).unwrap();
    let raw = RawReading {
        timestamp: 1_700_000_000,
        device_num,
        voltage: voltage_dv,
        current: 150,
        power,
        frequency: 88,
    };
    let ciphertext = encrypt_block(&key, device_id, &raw.to_bytes()).unwrap();

    let mut frame = format!("{}:{}\n", device_id, ciphertext.len()).into_bytes();
    frame.extend_from_slice(&ciphertext);
    frame
}

async fn send(addr: std::net::SocketAddr, bytes: &[u8]) {
    let mut stream = TcpStream::connect(addr).await.unwrap();
    stream.write_all(bytes).await.unwrap();
    stream.shutdown().await.unwrap();
}

fn metrics_rows(path: &PathBuf) -> Vec<String> {
    std::fs::read_to_string(path)
        .unwrap()
        .lines()
        .map(str::to_string)
        .collect()
}

#[tokio::test]
async fn test_sum_benchmark_over_tcp() {
    let dir = tempfile::tempdir().unwrap();
    let metrics = dir.path().join("metrics.csv");

    let server = Server::bind(ServerConfig {
        benchmark_sums: 5,
        metrics_file: Some(metrics.clone()),
        ..test_config(2)
    })
    .await
    .unwrap();
    let addr = server.local_addr();
    let core = server.core();
    let run = tokio::spawn(server.run());

    // Ten devices, one short-lived connection each.
    let mut rng = rand::thread_rng();
    let frames: Vec<Vec<u8>> = (1..=10u16)
        .map(|n| device_frame(&format!("meter_{:06}", n), n, rng.gen_range(500..3000), 1200))
        .collect();
    for frame in &frames {
        send(addr, frame).await;
    }

    let summary = tokio::time::timeout(Duration::from_secs(60), run)
        .await
        .expect("server did not finish the benchmark")
        .unwrap()
        .unwrap();

    assert!(core.is_finalized());
    assert_eq!(summary.total_sums, 5);
    assert_eq!(summary.total_readings, 10);
    assert_eq!(summary.connected_devices, 0);

    let rows = metrics_rows(&metrics);
    assert_eq!(rows.len(), 2);
    assert_eq!(
        rows[0],
        "device_count,thread_count,benchmark_target,benchmark_sum_target,total_readings,total_sums,seconds,throughput_rps,timestamp"
    );
    assert!(rows[1].starts_with("4,4,0,5,10,5,"));
}

#[tokio::test]
async fn test_bad_frames_do_not_break_connection() {
    let server = Server::bind(test_config(3)).await.unwrap();
    let addr = server.local_addr();
    let core = server.core();
    let shutdown = server.shutdown_handle();
    let run = tokio::spawn(server.run());

    let device = "meter_000001";
    let mut wire = device_frame(device, 1, 10, 1200);
    wire.extend_from_slice(format!("{}:15\n", device).as_bytes());
    wire.extend_from_slice(&[0u8; 15]);
    wire.extend(device_frame(device, 1, 20, 1200));
    wire.extend_from_slice(format!("{}:17\n", device).as_bytes());
    wire.extend_from_slice(&[0u8; 17]);
    // 150.0 V is anomalous but still counted.
    wire.extend(device_frame(device, 1, 30, 1500));
    send(addr, &wire).await;

    tokio::time::timeout(Duration::from_secs(30), async {
        while core.counters().total_readings() < 3 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("readings were not processed");

    shutdown.trigger();
    let summary = tokio::time::timeout(Duration::from_secs(10), run)
        .await
        .expect("server did not stop")
        .unwrap()
        .unwrap();

    assert_eq!(summary.total_readings, 3);
    assert_eq!(summary.failed_readings, 2);
    assert_eq!(summary.anomalies, 1);
    assert_eq!(summary.total_sums, 1);
    assert!((core.processor().last_sum().unwrap().sum - 60.0).abs() < 1e-9);
    assert!(!core.is_finalized());
}

#[tokio::test]
async fn test_idle_connection_does_not_block_shutdown() {
    let server = Server::bind(test_config(2)).await.unwrap();
    let addr = server.local_addr();
    let core = server.core();
    let shutdown = server.shutdown_handle();
    let run = tokio::spawn(server.run());

    // Connected but silent.
    let _idle = TcpStream::connect(addr).await.unwrap();
    tokio::time::timeout(Duration::from_secs(5), async {
        while core.counters().connected_devices() == 0 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("connection was not accepted");

    shutdown.trigger();
    let summary = tokio::time::timeout(Duration::from_secs(5), run)
        .await
        .expect("idle connection held the server open")
        .unwrap()
        .unwrap();
    assert_eq!(summary.connected_devices, 0);
    assert_eq!(summary.total_readings, 0);
}

#[tokio::test]
async fn test_bind_failure_is_reported() {
    let first = Server::bind(test_config(2)).await.unwrap();
    let taken = first.local_addr();

    let result = Server::bind(ServerConfig {
        port: taken.port(),
        ..test_config(2)
    })
    .await;

    // SO_REUSEADDR does not let a second listener share a bound port.
    assert!(result.is_err());
}

#[tokio::test]
async fn test_invalid_config_is_rejected() {
    let result = Server::bind(ServerConfig {
        current_divisor: -1.0,
        ..test_config(2)
    })
    .await;
    assert!(result.is_err());
}
