//! Dispatcher end to end over mock transports

use std::sync::Arc;
use std::time::Duration;

use mcu_uds::config::McuConfig;
use mcu_uds::{Dispatcher, Frame, FrameId, McuContext, MockTransport, SystemClock};
use pretty_assertions::assert_eq;
use tempfile::NamedTempFile;

const WAIT: Duration = Duration::from_secs(2);

fn context(backing: &NamedTempFile) -> Arc<McuContext> {
    backing.as_file().set_len(256).unwrap();
    let mut config = McuConfig::default();
    config.memory.backing_path = backing.path().to_path_buf();
    config.memory.size = 256;
    config.transport.receive_timeout_ms = 10;
    config.session.timer_poll_ms = 10;

    let memory = mcu_uds::MemoryStore::open(&config.memory).unwrap();
    Arc::new(McuContext::new(config, memory, Arc::new(SystemClock)))
}

fn frame(id: FrameId, data: &[u8]) -> Frame {
    Frame::new(id.to_raw(), data).unwrap()
}

#[tokio::test(flavor = "multi_thread")]
async fn test_request_answered_on_bus() {
    let backing = NamedTempFile::new().unwrap();
    let bus = Arc::new(MockTransport::new("vcan-test"));
    let handle = Dispatcher::new(context(&backing), bus.clone()).start();

    bus.inject(frame(FrameId::new(0x00, 0x10, 0xFA), &[0x02, 0x3E, 0x00]));
    bus.inject(frame(FrameId::new(0x00, 0xFF, 0x01), &[0x55]));

    let waiter = bus.clone();
    let sent = tokio::task::spawn_blocking(move || waiter.wait_for_sent(2, WAIT))
        .await
        .unwrap();

    assert!(handle.is_running());
    handle.shutdown().await;

    assert_eq!(sent.len(), 2);
    assert_eq!(sent[0].raw_id(), 0x0000_FA10);
    assert_eq!(sent[0].data(), &[0x02, 0x7E, 0x00]);
    assert_eq!(sent[1].raw_id(), 0x0000_FF01);
    assert_eq!(sent[1].data(), &[0x55]);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_api_channel_gets_api_traffic() {
    let backing = NamedTempFile::new().unwrap();
    let bus = Arc::new(MockTransport::new("bus"));
    let api = Arc::new(MockTransport::new("api"));
    let handle = Dispatcher::new(context(&backing), bus.clone())
        .with_api(api.clone())
        .start();

    // Request arriving on the API channel, reply from a peer on the bus
    api.inject(frame(FrameId::new(0x00, 0x10, 0xFA), &[0x03, 0x22, 0xE0, 0x01]));
    bus.inject(frame(FrameId::new(0x21, 0x10, 0x7A), &[0x02, 0x7E, 0x00]));

    let waiter = api.clone();
    let to_api = tokio::task::spawn_blocking(move || waiter.wait_for_sent(2, WAIT))
        .await
        .unwrap();
    handle.shutdown().await;

    assert_eq!(to_api.len(), 2);
    assert!(to_api
        .iter()
        .any(|f| f.raw_id() == 0x0000_FA10 && f.data() == [0x04, 0x62, 0xE0, 0x01, 0x00]));
    assert!(to_api.iter().any(|f| f.raw_id() == 0x0021_107A));
    assert!(bus.sent_frames().is_empty());
}

#[tokio::test(flavor = "multi_thread")]
async fn test_shutdown_with_idle_transports() {
    let backing = NamedTempFile::new().unwrap();
    let bus = Arc::new(MockTransport::new("bus"));
    let context = context(&backing);
    let handle = Dispatcher::new(context.clone(), bus.clone()).start();

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(handle.pending_frames(), 0);
    assert!(context.session().keepalive_armed());

    tokio::time::timeout(Duration::from_secs(5), handle.shutdown())
        .await
        .expect("dispatcher did not stop");
    assert!(bus.sent_frames().is_empty());
    assert!(!context.session().keepalive_armed());
}
