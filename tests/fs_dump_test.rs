mod common;

use common::{harness, pattern, DeviceScript, ObserverEvent};
use nxdt_host::protocol::{CommandId, Status, MAX_SAFE_FILE_SIZE};

#[tokio::test]
async fn test_fs_dump_stores_each_entry() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let save = pattern(700);
    let icon = pattern(50);

    let script = DeviceScript::default()
        .start_session()
        .start_fs_transfer("sdmc:/dump", 750)
        .file_transfer("saves/0100/save.dat", 700)
        .data(save.clone())
        .file_transfer("icon.jpg", 50)
        .data(icon.clone())
        .end_fs_transfer()
        .end_session();
    let h = harness(script, dir.path());

    let report = h.session.run().await?;

    assert_eq!(std::fs::read(dir.path().join("saves/0100/save.dat"))?, save);
    assert_eq!(std::fs::read(dir.path().join("icon.jpg"))?, icon);
    assert_eq!(report.files_received, 2);
    assert_eq!(report.bytes_received, 750);

    // START, START_FS, 2 x (entry, body), END_FS, END
    assert_eq!(h.log.lock().unwrap().statuses(), vec![Status::Success; 8]);

    let events = h.observer.events.lock().unwrap().clone();
    assert_eq!(events.iter().filter(|e| matches!(e, ObserverEvent::Begin(..))).count(), 1);
    assert!(events.contains(&ObserverEvent::Begin("sdmc:/dump".into(), 750)));
    Ok(())
}

#[tokio::test]
async fn test_empty_fs_dump_goes_straight_to_end() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let script = DeviceScript::default()
        .start_session()
        .start_fs_transfer("empty", 0)
        .end_fs_transfer()
        .end_session();
    let h = harness(script, dir.path());

    h.session.run().await?;
    assert_eq!(h.log.lock().unwrap().statuses(), vec![Status::Success; 4]);
    Ok(())
}

#[tokio::test]
async fn test_fs_dump_header_validation() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let script = DeviceScript::default()
        .start_session()
        .command(CommandId::StartFsTransfer, vec![0u8; 16])
        .start_fs_transfer("huge", MAX_SAFE_FILE_SIZE + 1)
        .end_session();
    let h = harness(script, dir.path());

    h.session.run().await?;
    assert_eq!(
        h.log.lock().unwrap().statuses(),
        vec![Status::Success, Status::MalformedCmd, Status::HostIoError, Status::Success]
    );
    Ok(())
}

#[tokio::test]
async fn test_end_fs_with_payload_is_malformed() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let script = DeviceScript::default()
        .start_session()
        .start_fs_transfer("root", 3)
        .file_transfer("a.bin", 3)
        .data(vec![1, 2, 3])
        .command(CommandId::EndFsTransfer, vec![0u8])
        .end_session();
    let h = harness(script, dir.path());

    let report = h.session.run().await?;
    assert_eq!(
        h.log.lock().unwrap().statuses(),
        vec![
            Status::Success,
            Status::Success,
            Status::Success,
            Status::Success,
            Status::MalformedCmd,
            Status::Success,
        ]
    );
    // Completed entries are kept even though the dump failed.
    assert!(dir.path().join("a.bin").exists());
    assert_eq!(report.transfers_failed, 1);
    Ok(())
}

#[tokio::test]
async fn test_archive_entry_inside_dump_is_malformed() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let script = DeviceScript::default()
        .start_session()
        .start_fs_transfer("root", 100)
        .archive_transfer("nested.nsp", 100, 10)
        .end_session();
    let h = harness(script, dir.path());

    h.session.run().await?;
    assert_eq!(
        h.log.lock().unwrap().statuses(),
        vec![Status::Success, Status::Success, Status::MalformedCmd, Status::Success]
    );
    assert!(!dir.path().join("nested.nsp").exists());
    Ok(())
}
