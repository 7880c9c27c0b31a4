//! Tests for logpack layout
//!
//! These tests verify:
//! - Header blocks produced by the builder decode and verify
//! - Payload placement in the ring, including wrap padding
//! - Log fragment splitting and block padding
//! - LSID continuity across packs

use std::sync::Arc;

use bytes::Bytes;
use proptest::prelude::*;
use walblock::io::{checksum, HeapAllocator, IoFragment, WriteFlags, WriteIo, WriteKind};
use walblock::logpack::{LogpackBuilder, LogpackHeader, Pack, RingGeometry};
use walblock::{WalError, SECTOR_SIZE};

// =============================================================================
// Helper Functions
// =============================================================================

fn write(id: u64, pos: u64, sectors: usize, fill: u8) -> Arc<WriteIo> {
    let data = Bytes::from(vec![fill; sectors * SECTOR_SIZE]);
    Arc::new(WriteIo::new(id, pos, WriteKind::Data(data), WriteFlags::default(), None).unwrap())
}

fn discard(id: u64, pos: u64, sectors: u32) -> Arc<WriteIo> {
    Arc::new(
        WriteIo::new(id, pos, WriteKind::Discard { sectors }, WriteFlags::default(), None).unwrap(),
    )
}

/// Run `ios` through a builder and return every frozen pack.
fn build(geometry: RingGeometry, budget: u32, lsid: u64, ios: Vec<Arc<WriteIo>>) -> Vec<Pack> {
    let mut builder = LogpackBuilder::new(geometry, budget, lsid, Arc::new(HeapAllocator));
    for io in ios {
        builder.add(io);
    }
    builder.freeze();
    builder.take_ready()
}

fn decode_header(geometry: &RingGeometry, frag: &IoFragment<Bytes>) -> LogpackHeader {
    LogpackHeader::decode(frag.bytes(), geometry.salt(), geometry.sectors_per_block()).unwrap()
}

// =============================================================================
// Header Encoding
// =============================================================================

#[test]
fn test_header_block_decodes_with_record_checksums() {
    let geometry = RingGeometry::new(512, 4, 64, 0x1234);
    let a = write(1, 100, 8, 0xAA);
    let b = write(2, 7, 3, 0xBB);
    let packs = build(geometry, 0, 0, vec![a.clone(), b.clone()]);
    assert_eq!(packs.len(), 1);

    let frags = packs[0].log_fragments(&geometry, 0);
    assert_eq!(frags.len(), 3);
    // The header sits at the pack LSID, offset by the ring start.
    assert_eq!(frags[0].sector(), 4);

    let header = decode_header(&geometry, &frags[0]);
    assert_eq!(header, *packs[0].header());
    assert_eq!(header.logpack_lsid(), 0);
    assert_eq!(header.n_records(), 2);
    assert_eq!(header.total_io_size(), 11);
    assert_eq!(header.next_lsid(), 12);

    let records = header.records();
    assert_eq!((records[0].offset, records[0].io_size, records[0].lsid_local), (100, 8, 1));
    assert_eq!((records[1].offset, records[1].io_size, records[1].lsid_local), (7, 3, 9));
    assert_eq!(records[0].checksum, checksum(a.payload().unwrap(), 0x1234));
    assert_eq!(records[1].checksum, checksum(b.payload().unwrap(), 0x1234));
    assert_eq!(a.checksum(), records[0].checksum);

    assert_eq!((frags[1].sector(), frags[1].sectors()), (5, 8));
    assert_eq!((frags[2].sector(), frags[2].sectors()), (13, 3));
    assert_eq!(a.lsid(), Some(1));
    assert_eq!(b.lsid(), Some(9));
}

#[test]
fn test_header_rejects_corruption_and_wrong_salt() {
    let geometry = RingGeometry::new(512, 0, 64, 7);
    let packs = build(geometry, 0, 0, vec![write(1, 0, 2, 1)]);
    let frags = packs[0].log_fragments(&geometry, 0);
    let block = frags[0].bytes().to_vec();

    assert!(LogpackHeader::verify_block(&block, 7));
    assert!(matches!(
        LogpackHeader::decode(&block, 8, 1),
        Err(WalError::Corruption(_))
    ));

    let mut flipped = block.clone();
    flipped[40] ^= 0x01;
    assert!(!LogpackHeader::verify_block(&flipped, 7));
    assert!(matches!(
        LogpackHeader::decode(&flipped, 7, 1),
        Err(WalError::Corruption(_))
    ));

    let mut wrong_type = block;
    wrong_type[4] = 0;
    assert!(LogpackHeader::decode(&wrong_type, 7, 1).is_err());
}

#[test]
fn test_discard_record_has_no_payload() {
    let geometry = RingGeometry::new(512, 0, 64, 0);
    let d = discard(1, 40, 128);
    let packs = build(geometry, 0, 3, vec![d.clone()]);

    let frags = packs[0].log_fragments(&geometry, 0);
    assert_eq!(frags.len(), 1);
    let header = decode_header(&geometry, &frags[0]);
    let record = &header.records()[0];
    assert!(record.is_discard);
    assert_eq!((record.offset, record.io_size), (40, 128));
    assert_eq!(header.total_io_size(), 0);
    assert_eq!(header.next_lsid(), 4);
    assert_eq!(d.lsid(), Some(4));
}

// =============================================================================
// Ring Placement
// =============================================================================

#[test]
fn test_record_wraps_to_ring_start_with_padding() {
    let geometry = RingGeometry::new(512, 0, 16, 0);
    let io = write(1, 0, 8, 0x5A);
    let packs = build(geometry, 0, 10, vec![io.clone()]);

    let header = packs[0].header();
    assert_eq!(header.n_records(), 2);
    assert_eq!(header.n_padding(), 1);
    assert!(header.records()[0].is_padding);
    assert_eq!(header.records()[1].lsid(10), 16);
    assert_eq!(header.next_lsid(), 24);
    assert_eq!(io.lsid(), Some(16));

    let frags = packs[0].log_fragments(&geometry, 0);
    assert_eq!(frags.len(), 2);
    assert_eq!(frags[0].sector(), 10);
    // Payload starts over at ring block 0; padding writes nothing.
    assert_eq!((frags[1].sector(), frags[1].sectors()), (0, 8));
}

#[test]
fn test_large_blocks_pad_payload() {
    let geometry = RingGeometry::new(4096, 0, 32, 0);
    let packs = build(geometry, 0, 0, vec![write(1, 0, 3, 0x33)]);

    let header = packs[0].header();
    assert_eq!(header.total_io_size(), 1);
    assert_eq!(header.next_lsid(), 2);

    let frags = packs[0].log_fragments(&geometry, 0);
    assert_eq!(frags.len(), 2);
    assert_eq!((frags[0].sector(), frags[0].sectors()), (0, 8));
    assert_eq!((frags[1].sector(), frags[1].sectors()), (8, 8));
    let payload = frags[1].bytes();
    assert!(payload[..3 * SECTOR_SIZE].iter().all(|&b| b == 0x33));
    assert!(payload[3 * SECTOR_SIZE..].iter().all(|&b| b == 0));
}

#[test]
fn test_log_fragments_split_by_chunk() {
    let geometry = RingGeometry::new(512, 0, 64, 0);
    let packs = build(geometry, 0, 0, vec![write(1, 0, 8, 1)]);

    let frags = packs[0].log_fragments(&geometry, 2);
    let spans: Vec<(u64, u64)> = frags.iter().map(|f| (f.sector(), f.sectors())).collect();
    // Pieces never cross a chunk boundary in device sector space.
    assert_eq!(spans, vec![(0, 1), (1, 1), (2, 2), (4, 2), (6, 2), (8, 1)]);
}

// =============================================================================
// Property Tests
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn test_packs_chain_lsids_and_never_wrap_records(
        start in 0u64..200,
        budget in 0u32..24,
        sizes in prop::collection::vec(1usize..=16, 1..40),
    ) {
        let ring = 32u64;
        let geometry = RingGeometry::new(512, 0, ring, 0);
        let ios: Vec<_> = sizes
            .iter()
            .enumerate()
            .map(|(i, &s)| write(i as u64 + 1, 0, s, 1))
            .collect();
        let packs = build(geometry, budget, start, ios.clone());

        let mut lsid = start;
        let mut members = 0;
        for pack in &packs {
            prop_assert_eq!(pack.lsid(), lsid);
            let header = pack.header();
            header.check_consistency(1).unwrap();
            prop_assert!(1 + u64::from(header.total_io_size()) <= ring);
            for record in header.records().iter().filter(|r| !r.is_padding) {
                let pos = record.lsid(pack.lsid()) % ring;
                prop_assert!(pos + u64::from(record.io_size) <= ring);
            }
            members += pack.members().len();
            lsid = pack.next_lsid();
        }
        prop_assert_eq!(members, ios.len());

        // Record LSIDs follow submission order.
        let lsids: Vec<u64> = ios.iter().map(|io| io.lsid().unwrap()).collect();
        prop_assert!(lsids.windows(2).all(|w| w[0] < w[1]));
    }
}
