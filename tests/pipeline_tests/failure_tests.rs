//! Device failure tests: log and data errors, header allocation failures

use std::time::Duration;

use walblock::{WalDevice, WalError};

use crate::common::{sectors, small_config, wait_idle, wait_until, FlakyAllocator, TestDevice};
use crate::{open_default, DATA_SECTORS, LOG_SECTORS};

// =============================================================================
// Log Device Failures
// =============================================================================

#[test]
fn test_log_failure_fails_write_and_sets_read_only() {
    let (log, data, device) = open_default();
    log.fail_writes(true);

    let err = device.write(0, &sectors(8, 1)).unwrap_err();
    assert!(matches!(err, WalError::LogIo { lsid: 0, .. }), "got {err:?}");
    assert!(device.is_read_only());

    // Later writes are refused up front.
    assert!(matches!(device.write(8, &sectors(8, 2)), Err(WalError::ReadOnly)));
    assert!(matches!(device.discard(8, 8), Err(WalError::ReadOnly)));

    // Reads keep working and never see the failed write.
    assert_eq!(&device.read(0, 8).unwrap()[..], &sectors(8, 0)[..]);

    wait_idle(&device);
    let stats = device.stats();
    assert_eq!(stats.pipeline.writes_failed, 1);
    assert_eq!(stats.pipeline.writes_acked, 0);
    assert_eq!(stats.pending.len, 0);
    assert_eq!(stats.overlap_len, 0);
    assert!(data.writes().is_empty());
    assert!(matches!(device.close(), Err(WalError::ReadOnly)));
}

#[test]
fn test_log_failure_fails_queued_writes() {
    let (log, _data, device) = open_default();
    log.fail_writes(true);

    let pending: Vec<_> = (0..8u64)
        .map(|i| device.submit_write(i * 8, sectors(8, i as u8).into(), Default::default()))
        .filter_map(Result::ok)
        .collect();
    for done in pending {
        assert!(done.wait().is_err());
    }
    wait_idle(&device);
    assert!(device.is_read_only());
    assert_eq!(device.stats().pipeline.writes_acked, 0);
}

#[test]
fn test_pack_queued_behind_failed_log_write_is_not_logged() {
    let (log, _data, device) = open_default();

    // Park A's header write, then queue B as a second pack behind it.
    log.hold(0..1);
    let a = device
        .submit_write(0, sectors(8, 1).into(), Default::default())
        .unwrap();
    assert!(wait_until(Duration::from_secs(5), || log.blocked() == 1));
    let b = device
        .submit_write(100, sectors(8, 2).into(), Default::default())
        .unwrap();
    assert!(wait_until(Duration::from_secs(5), || {
        device.stats().pipeline.packs_created == 2
    }));

    // Only A's header write fails; the log device is healthy afterwards.
    log.fail_next_writes(1);
    log.release();

    assert!(matches!(a.wait(), Err(WalError::LogIo { lsid: 0, .. })));
    assert!(matches!(b.wait(), Err(WalError::ReadOnly)));
    assert!(device.is_read_only());

    wait_idle(&device);
    // Nothing reached the ring after the hole left by A.
    assert!(log.writes().is_empty());
    let stats = device.stats().pipeline;
    assert_eq!(stats.writes_acked, 0);
    assert_eq!(stats.writes_failed, 2);
    assert_eq!(stats.packs_created, stats.packs_freed);
}

// =============================================================================
// Data Device Failures
// =============================================================================

#[test]
fn test_data_failure_after_ack_sets_read_only() {
    let (_log, data, device) = open_default();
    data.fail_writes(true);

    // Durable in the log, so the client sees success.
    device.write(0, &sectors(8, 1)).unwrap();
    assert!(wait_until(Duration::from_secs(5), || device.is_read_only()));
    wait_idle(&device);

    let stats = device.stats();
    assert_eq!(stats.pipeline.writes_acked, 1);
    assert_eq!(stats.pipeline.writes_applied, 0);
    assert_eq!(stats.pending.len, 0);
    assert_eq!(stats.overlap_len, 0);
    assert_eq!(stats.pipeline.packs_created, stats.pipeline.packs_freed);

    assert!(matches!(device.write(8, &sectors(8, 2)), Err(WalError::ReadOnly)));
    assert!(matches!(device.close(), Err(WalError::ReadOnly)));
}

#[test]
fn test_data_failure_still_releases_overlapping_writes() {
    let (_log, data, device) = open_default();

    data.hold(0..8);
    data.fail_writes(true);
    device.write(0, &sectors(8, 1)).unwrap();
    device.write(4, &sectors(8, 2)).unwrap();
    assert_eq!(device.stats().pipeline.writes_delayed, 1);

    data.release();
    wait_idle(&device);
    let stats = device.stats();
    assert!(stats.read_only);
    assert_eq!(stats.overlap_len, 0);
    assert_eq!(stats.pending.len, 0);
}

// =============================================================================
// Header Allocation Failures
// =============================================================================

#[test]
fn test_header_allocation_failure_fails_only_that_pack() {
    let log = TestDevice::new(LOG_SECTORS);
    let data = TestDevice::new(DATA_SECTORS);
    let device =
        WalDevice::open_with_allocator(small_config(), log.clone(), data.clone(), FlakyAllocator::new(1))
            .unwrap();

    let err = device.write(0, &sectors(8, 1)).unwrap_err();
    assert!(matches!(err, WalError::LogIo { lsid: 0, .. }), "got {err:?}");
    assert!(!device.is_read_only());
    assert!(log.writes().is_empty());

    // The failed pack consumed no LSIDs.
    device.write(0, &sectors(8, 2)).unwrap();
    wait_idle(&device);
    assert_eq!(device.stats().pipeline.latest_lsid, 9);
    assert_eq!(log.writes()[0].0, 0);
    assert_eq!(&device.read(0, 8).unwrap()[..], &sectors(8, 2)[..]);
    device.close().unwrap();
}

// =============================================================================
// Shutdown
// =============================================================================

#[test]
fn test_close_drains_unapplied_writes() {
    let (_log, data, device) = open_default();

    for i in 0..16u64 {
        device.write(i * 8, &sectors(8, i as u8 + 1)).unwrap();
    }
    device.close().unwrap();

    for i in 0..16u64 {
        assert_eq!(data.inner().snapshot(i * 8, 8), sectors(8, i as u8 + 1));
    }
}

#[test]
fn test_drop_without_close_drains() {
    let (_log, data, device) = open_default();
    let done = device
        .submit_write(0, sectors(8, 4).into(), Default::default())
        .unwrap();
    drop(device);

    done.wait().unwrap();
    assert_eq!(data.inner().snapshot(0, 8), sectors(8, 4));
}
