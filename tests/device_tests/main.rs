//! Tests for file-backed devices and device configuration
//!
//! These tests verify:
//! - A WalDevice over log and data files persists both
//! - The log file holds verifiable logpack headers and payloads in the ring
//! - Open-time validation of config against device geometry

use std::sync::Arc;

use tempfile::TempDir;
use walblock::device::{BlockDevice, FileDevice, MemoryDevice};
use walblock::io::checksum;
use walblock::logpack::LogpackHeader;
use walblock::{Config, ReadStrategyKind, WalDevice, WalError, SECTOR_SIZE};

// =============================================================================
// Helper Functions
// =============================================================================

fn file_devices(temp: &TempDir, log_sectors: u64, data_sectors: u64) -> (Arc<FileDevice>, Arc<FileDevice>) {
    let log = FileDevice::create(&temp.path().join("log.img"), log_sectors).unwrap();
    let data = FileDevice::create(&temp.path().join("data.img"), data_sectors).unwrap();
    (Arc::new(log), Arc::new(data))
}

fn file_config() -> Config {
    Config::builder()
        .physical_block_size(512)
        .ring_buffer_offset(8)
        .log_checksum_salt(0xfeed)
        .build()
}

// =============================================================================
// File Devices
// =============================================================================

#[test]
fn test_file_backed_device_persists_data() {
    let temp = TempDir::new().unwrap();
    let (log, data) = file_devices(&temp, 1024, 2048);

    let device = WalDevice::open(file_config(), log, data).unwrap();
    device.write(16, &vec![0x42; 8 * SECTOR_SIZE]).unwrap();
    device.write(1000, &vec![0x43; 4 * SECTOR_SIZE]).unwrap();
    device.close().unwrap();

    let data = FileDevice::open(&temp.path().join("data.img")).unwrap();
    assert_eq!(data.capacity_sectors(), 2048);
    let mut buf = vec![0u8; 8 * SECTOR_SIZE];
    data.read_at(16, &mut buf).unwrap();
    assert!(buf.iter().all(|&b| b == 0x42));
    let mut buf = vec![0u8; 4 * SECTOR_SIZE];
    data.read_at(1000, &mut buf).unwrap();
    assert!(buf.iter().all(|&b| b == 0x43));
}

#[test]
fn test_log_file_holds_verifiable_logpacks() {
    let temp = TempDir::new().unwrap();
    let (log, data) = file_devices(&temp, 1024, 2048);
    let payload = vec![0x5C; 4 * SECTOR_SIZE];

    let device = WalDevice::open(file_config(), log, data).unwrap();
    device.write(100, &payload).unwrap();
    device.write(200, &vec![0x5D; 2 * SECTOR_SIZE]).unwrap();
    device.close().unwrap();

    let log = FileDevice::open(&temp.path().join("log.img")).unwrap();
    let mut block = vec![0u8; SECTOR_SIZE];

    // First pack: header at the ring start, LSID 0.
    log.read_at(8, &mut block).unwrap();
    let first = LogpackHeader::decode(&block, 0xfeed, 1).unwrap();
    assert_eq!(first.logpack_lsid(), 0);
    assert_eq!(first.n_records(), 1);
    let record = &first.records()[0];
    assert_eq!((record.offset, record.io_size), (100, 4));
    assert_eq!(record.checksum, checksum(&payload, 0xfeed));

    let mut logged = vec![0u8; 4 * SECTOR_SIZE];
    log.read_at(8 + record.lsid(0), &mut logged).unwrap();
    assert_eq!(logged, payload);

    // Second pack follows directly behind the first.
    log.read_at(8 + first.next_lsid(), &mut block).unwrap();
    let second = LogpackHeader::decode(&block, 0xfeed, 1).unwrap();
    assert_eq!(second.logpack_lsid(), first.next_lsid());
    assert_eq!(second.records()[0].offset, 200);
}

#[test]
fn test_device_through_over_files() {
    let temp = TempDir::new().unwrap();
    let (log, data) = file_devices(&temp, 1024, 256);
    let mut config = file_config();
    config.read_strategy = ReadStrategyKind::DeviceThrough;

    let device = WalDevice::open(config, log, data).unwrap();
    for i in 0..16u64 {
        device.write(i * 4, &vec![i as u8; 8 * SECTOR_SIZE]).unwrap();
    }
    let got = device.read(0, 68).unwrap();
    for i in 0..16usize {
        // Each write's first half was overwritten by the next one.
        assert_eq!(got[i * 4 * SECTOR_SIZE], i as u8);
    }
    assert_eq!(got[64 * SECTOR_SIZE], 15);
    device.close().unwrap();
}

// =============================================================================
// Open-time Validation
// =============================================================================

#[test]
fn test_open_rejects_ring_outside_log_device() {
    let log = Arc::new(MemoryDevice::new(64));
    let data = Arc::new(MemoryDevice::new(64));
    let config = Config::builder()
        .physical_block_size(512)
        .ring_buffer_offset(32)
        .ring_buffer_size(64)
        .build();

    assert!(matches!(
        WalDevice::open(config, log, data),
        Err(WalError::Config(_))
    ));
}

#[test]
fn test_open_rejects_bad_block_size() {
    let log = Arc::new(MemoryDevice::new(64));
    let data = Arc::new(MemoryDevice::new(64));
    let config = Config::builder().physical_block_size(1000).build();

    assert!(matches!(
        WalDevice::open(config, log, data),
        Err(WalError::Config(_))
    ));
}

#[test]
fn test_open_rejects_inverted_watermarks() {
    let log = Arc::new(MemoryDevice::new(64));
    let data = Arc::new(MemoryDevice::new(64));
    let config = Config::builder()
        .physical_block_size(512)
        .pending_watermarks(8, 16)
        .build();

    assert!(matches!(
        WalDevice::open(config, log, data),
        Err(WalError::Config(_))
    ));
}

#[test]
fn test_ring_geometry_follows_config() {
    let log = Arc::new(MemoryDevice::new(4096));
    let data = Arc::new(MemoryDevice::new(64));
    let config = Config::builder()
        .physical_block_size(4096)
        .ring_buffer_offset(2)
        .build();

    let device = WalDevice::open(config, log, data).unwrap();
    let geometry = *device.geometry();
    // 4096 sectors = 512 blocks of 4 KiB, minus the two reserved blocks.
    assert_eq!(geometry.ring_buffer_size(), 510);
    assert_eq!(geometry.lsid_to_sector(0), 16);
    assert_eq!(device.max_write_sectors(), 255 * 8);
    assert_eq!(device.capacity_sectors(), 64);
    device.close().unwrap();
}
