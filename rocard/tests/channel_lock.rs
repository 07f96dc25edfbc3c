//! Channel ownership arbitration across lock handles.

use rocard::{ChannelLock, Error};

#[test]
fn second_owner_is_rejected_until_release() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("serial1041_ch0.lock");

    let first = ChannelLock::acquire(&path).unwrap();
    match ChannelLock::acquire(&path) {
        Err(Error::ChannelBusy { lock_path }) => assert!(lock_path.ends_with(".lock")),
        other => panic!("expected ChannelBusy, got {other:?}"),
    }

    drop(first);
    let _second = ChannelLock::acquire(&path).unwrap();
    // The lock file is left behind for other tools to find.
    assert!(path.exists());
}

#[test]
fn locks_are_keyed_per_channel() {
    let dir = tempfile::tempdir().unwrap();
    let _ch0 = ChannelLock::acquire(&dir.path().join("card_ch0.lock")).unwrap();
    let _ch1 = ChannelLock::acquire(&dir.path().join("card_ch1.lock")).unwrap();
}
