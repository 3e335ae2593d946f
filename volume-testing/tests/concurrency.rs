// SPDX-License-Identifier: GPL-3.0-only

use std::slice;
use std::time::Duration;

use volume_core::VolumeError;
use volume_testing::{Behavior, Call, FakeDriver, Op, block_spec, manager};
use volume_types::{CreateOptions, Filesystem, VolumeLocator, VolumeState};

#[tokio::test(start_paused = true)]
async fn racing_attaches_let_exactly_one_through() {
    let driver = FakeDriver::new();
    let manager = manager(&driver);
    let id = manager
        .create(VolumeLocator::named("db1"), CreateOptions::default(), block_spec(1 << 30, Filesystem::Ext4))
        .await
        .unwrap();
    driver.set_result(Op::Attach, Behavior::Delay(Duration::from_millis(50)));

    let (a, b) = tokio::join!(manager.attach(&id), manager.attach(&id));
    let (winner, loser) = match (a, b) {
        (Ok(device), Err(err)) | (Err(err), Ok(device)) => (device, err),
        other => panic!("expected one success and one failure, got {other:?}"),
    };
    assert_eq!(winner, "/dev/xvdb");
    assert!(matches!(loser, VolumeError::AlreadyAttached(_)));
    assert_eq!(driver.count(|c| matches!(c, Call::Attach(_))), 1);
}

#[tokio::test(start_paused = true)]
async fn racing_equal_creates_provision_once() {
    let driver = FakeDriver::new();
    let manager = manager(&driver);
    driver.set_result(Op::Create, Behavior::Delay(Duration::from_millis(50)));

    let spec = block_spec(1 << 30, Filesystem::Ext4);
    let (a, b) = tokio::join!(
        manager.create(VolumeLocator::named("db1"), CreateOptions::default(), spec.clone()),
        manager.create(VolumeLocator::named("db1"), CreateOptions::default(), spec),
    );
    assert_eq!(a.unwrap(), b.unwrap());
    assert_eq!(driver.count(|c| matches!(c, Call::Create(..))), 1);
}

#[tokio::test(start_paused = true)]
async fn abandoned_callers_do_not_strand_the_volume() {
    let driver = FakeDriver::new();
    let manager = manager(&driver);
    let id = manager
        .create(VolumeLocator::named("db1"), CreateOptions::default(), block_spec(1 << 30, Filesystem::Ext4))
        .await
        .unwrap();
    driver.set_result(Op::Attach, Behavior::Delay(Duration::from_millis(100)));

    let gave_up = tokio::time::timeout(Duration::from_millis(10), manager.attach(&id)).await;
    assert!(gave_up.is_err());

    // Detach queues behind the abandoned attach, which still commits.
    manager.detach(&id).await.unwrap();
    let volume = manager.inspect(slice::from_ref(&id)).unwrap().remove(0);
    assert_eq!(volume.state, VolumeState::Available);
    assert_eq!(driver.count(|c| matches!(c, Call::Attach(_))), 1);
    assert_eq!(driver.count(|c| matches!(c, Call::Detach(_))), 1);
}

#[tokio::test(start_paused = true)]
async fn operations_on_different_volumes_overlap() {
    let driver = FakeDriver::new();
    let manager = manager(&driver);
    let spec = block_spec(1 << 30, Filesystem::Ext4);
    let first = manager
        .create(VolumeLocator::named("db1"), CreateOptions::default(), spec.clone())
        .await
        .unwrap();
    let second = manager
        .create(VolumeLocator::named("db2"), CreateOptions::default(), spec)
        .await
        .unwrap();
    driver.set_result(Op::Attach, Behavior::Delay(Duration::from_millis(100)));

    let started = tokio::time::Instant::now();
    let (a, b) = tokio::join!(manager.attach(&first), manager.attach(&second));
    a.unwrap();
    b.unwrap();
    assert!(started.elapsed() < Duration::from_millis(200));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn many_threads_racing_on_one_volume_agree() {
    let driver = FakeDriver::new();
    let manager = manager(&driver);
    let id = manager
        .create(VolumeLocator::named("db1"), CreateOptions::default(), block_spec(1 << 30, Filesystem::Ext4))
        .await
        .unwrap();

    let tasks: Vec<_> = (0..16)
        .map(|_| {
            let manager = manager.clone();
            let id = id.clone();
            tokio::spawn(async move { manager.attach(&id).await })
        })
        .collect();

    let mut attached = 0;
    for task in tasks {
        match task.await.unwrap() {
            Ok(_) => attached += 1,
            Err(VolumeError::AlreadyAttached(_)) => {}
            Err(other) => panic!("unexpected error {other}"),
        }
    }
    assert_eq!(attached, 1);
    assert_eq!(driver.count(|c| matches!(c, Call::Attach(_))), 1);
}
