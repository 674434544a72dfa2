mod common;

use common::{harness, pattern, DeviceScript, ObserverEvent};
use nxdt_host::protocol::{CommandId, FileProperties, Status, MAX_SAFE_FILE_SIZE};
use nxdt_host::{SessionError, TransportError};

#[tokio::test]
async fn test_single_file_is_stored() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let body = pattern(5000);
    let script = DeviceScript::default()
        .start_session()
        .file_transfer("gamecard/dump/game.xci", body.len() as u64)
        .data(body.clone())
        .end_session();
    let h = harness(script, dir.path());

    let report = h.session.run().await?;

    assert_eq!(std::fs::read(dir.path().join("gamecard/dump/game.xci"))?, body);
    assert_eq!(report.files_received, 1);
    assert_eq!(report.bytes_received, 5000);
    assert_eq!(h.log.lock().unwrap().statuses(), vec![Status::Success; 4]);

    let events = h.observer.events.lock().unwrap().clone();
    assert!(events.contains(&ObserverEvent::Begin("gamecard/dump/game.xci".into(), 5000)));
    assert!(events.contains(&ObserverEvent::End));
    assert_eq!(h.observer.progress_total(), 5000);
    assert!(h.observer.notifications().contains(&"Transfer finished".to_string()));
    Ok(())
}

#[tokio::test]
async fn test_existing_file_is_truncated() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    std::fs::write(dir.path().join("save.bin"), vec![0xFFu8; 64])?;

    let script = DeviceScript::default()
        .start_session()
        .file_transfer("save.bin", 3)
        .data(vec![1, 2, 3])
        .end_session();
    let h = harness(script, dir.path());

    h.session.run().await?;
    assert_eq!(std::fs::read(dir.path().join("save.bin"))?, vec![1, 2, 3]);
    Ok(())
}

#[tokio::test]
async fn test_path_uses_declared_length() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let mut properties = FileProperties::new("short.binGARBAGE", 2, 0);
    properties.path_length = "short.bin".len() as u32;

    let script = DeviceScript::default()
        .start_session()
        .command(CommandId::FileTransfer, properties.encode()?)
        .data(vec![9, 9])
        .end_session();
    let h = harness(script, dir.path());

    h.session.run().await?;
    assert!(dir.path().join("short.bin").exists());
    Ok(())
}

#[tokio::test]
async fn test_invalid_properties_are_rejected() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let mut empty_path = FileProperties::new("x", 10, 0);
    empty_path.path_length = 0;

    let script = DeviceScript::default()
        .start_session()
        .command(CommandId::FileTransfer, vec![0u8; 100])
        .archive_transfer("bad.nsp", 10, 10)
        .command(CommandId::FileTransfer, empty_path.encode()?)
        .file_transfer("huge.bin", MAX_SAFE_FILE_SIZE + 1)
        .end_session();
    let h = harness(script, dir.path());

    h.session.run().await?;
    assert_eq!(
        h.log.lock().unwrap().statuses(),
        vec![
            Status::Success,
            Status::MalformedCmd,
            Status::MalformedCmd,
            Status::MalformedCmd,
            Status::HostIoError,
            Status::Success,
        ]
    );
    assert_eq!(std::fs::read_dir(dir.path())?.count(), 0);
    Ok(())
}

#[tokio::test]
async fn test_escaping_path_is_a_host_io_error() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let script = DeviceScript::default()
        .start_session()
        .file_transfer("../outside.bin", 4)
        .file_transfer("inside.bin", 4)
        .data(vec![4, 3, 2, 1])
        .end_session();
    let h = harness(script, dir.path());

    let report = h.session.run().await?;
    assert_eq!(
        h.log.lock().unwrap().statuses(),
        vec![
            Status::Success,
            Status::HostIoError,
            Status::Success,
            Status::Success,
            Status::Success,
        ]
    );
    assert_eq!(report.files_received, 1);
    assert_eq!(report.transfers_failed, 1);
    assert!(!dir.path().parent().unwrap().join("outside.bin").exists());
    Ok(())
}

#[tokio::test]
async fn test_unwritable_root_is_a_host_io_error() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    // A regular file where a directory is needed.
    std::fs::write(dir.path().join("blocker"), b"")?;

    let script = DeviceScript::default()
        .start_session()
        .file_transfer("blocker/file.bin", 4)
        .end_session();
    let h = harness(script, dir.path());

    h.session.run().await?;
    assert_eq!(
        h.log.lock().unwrap().statuses(),
        vec![Status::Success, Status::HostIoError, Status::Success]
    );
    Ok(())
}

#[tokio::test]
async fn test_transport_failure_removes_partial_file() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let body = pattern(100);
    let script = DeviceScript::default()
        .start_session()
        .file_transfer("partial.bin", 1000)
        .raw(body);
    let h = harness(script, dir.path());

    let result = h.session.run().await;
    assert!(matches!(result, Err(SessionError::Transport(TransportError::Closed))));
    assert!(!dir.path().join("partial.bin").exists());

    let log = h.log.lock().unwrap();
    assert!(log.closed);
    assert_eq!(log.statuses(), vec![Status::Success, Status::Success]);
    Ok(())
}

#[tokio::test]
async fn test_empty_chunk_mid_transfer_cancels() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let script = DeviceScript::default()
        .start_session()
        .file_transfer("cut.bin", 100)
        .raw(pattern(40))
        .zlt()
        .end_session();
    let h = harness(script, dir.path());

    let report = h.session.run().await?;
    assert_eq!(report.transfers_cancelled, 1);
    assert_eq!(report.files_received, 0);
    assert!(!dir.path().join("cut.bin").exists());
    assert_eq!(
        h.log.lock().unwrap().statuses(),
        vec![Status::Success, Status::Success, Status::Success, Status::Success]
    );
    assert!(h.observer.notifications().contains(&"Operation cancelled".to_string()));
    Ok(())
}

#[tokio::test]
async fn test_oversized_chunk_is_fatal() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let script = DeviceScript::default()
        .start_session()
        .file_transfer("small.bin", 10)
        .raw(pattern(20));
    let h = harness(script, dir.path());

    let result = h.session.run().await;
    assert!(matches!(
        result,
        Err(SessionError::Transport(TransportError::Overrun { max: 10, received: 20 }))
    ));
    Ok(())
}
