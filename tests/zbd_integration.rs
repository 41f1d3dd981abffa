//! End-to-end exercises of the zoned block device adaptation core, wiring
//! together the builder, validator, adjuster, and completion hook the way a
//! real caller would (`init` / `file_reset` / `adjust_block`), rather than
//! unit-testing each component in isolation.

use std::path::Path;
use zbd_core::zbd::backend::FakeZoneBackend;
use zbd_core::zbd::{AdjustOutcome, Direction, FileZoneCtx, IoUnit, Job, JobConfig, NoopQuiesce, Workload};

#[test]
fn two_files_on_the_same_device_share_one_zone_table() {
    let job = Job::new();
    let backend = FakeZoneBackend::new_zoned(1024, 8);
    let config = JobConfig {
        odirect: true,
        ..JobConfig::default()
    };
    let path = Path::new("/dev/fake-shared");

    let table_a = job.open_device(path, &backend, &config, true).unwrap();
    let table_b = job.open_device(path, &backend, &config, true).unwrap();
    assert!(std::sync::Arc::ptr_eq(&table_a, &table_b));

    let zone_size_bytes = 1024u64 << 9;
    let ctx_a = FileZoneCtx::new(table_a, (0, zone_size_bytes * 8), false);

    let mut write = IoUnit::new(Direction::Write, 0, 4096, Workload::Sequential, 512);
    match ctx_a.adjust_block(&backend, &NoopQuiesce, &mut write).unwrap() {
        AdjustOutcome::SequentialReservation(r) => r.complete(Direction::Write, write.offset, write.buflen, true),
        _ => panic!("expected reservation"),
    }

    // Written through ctx_a's table; visible via table_b since it's the same Arc.
    assert_eq!(table_b.zone(0).lock().wp, 8);
}

#[test]
fn filling_a_zone_then_writing_again_advances_to_the_next_zone_boundary() {
    let job = Job::new();
    let backend = FakeZoneBackend::new_zoned(16, 4); // small zones: 16 sectors = 8 KiB
    let config = JobConfig {
        odirect: true,
        ..JobConfig::default()
    };
    let table = job.open_device(Path::new("/dev/fake-fill"), &backend, &config, true).unwrap();
    let zone_size_bytes = 16u64 << 9;
    let ctx = FileZoneCtx::new(table.clone(), (0, zone_size_bytes * 4), false);

    // Fill zone 0 exactly: 16 sectors = 8192 bytes.
    let mut write = IoUnit::new(Direction::Write, 0, 8192, Workload::Sequential, 512);
    match ctx.adjust_block(&backend, &NoopQuiesce, &mut write).unwrap() {
        AdjustOutcome::SequentialReservation(r) => r.complete(Direction::Write, write.offset, write.buflen, true),
        _ => panic!("expected reservation"),
    }
    assert_eq!(table.zone(0).lock().wp, 16);

    // The caller's next candidate still targets zone 0 (it doesn't know about
    // zones); the Adjuster must reset it before accepting the write, because
    // it's already full.
    let mut next_write = IoUnit::new(Direction::Write, 0, 4096, Workload::Sequential, 512);
    match ctx.adjust_block(&backend, &NoopQuiesce, &mut next_write).unwrap() {
        AdjustOutcome::SequentialReservation(r) => {
            assert_eq!(next_write.offset, 0); // zone was reset to empty, wp == start
            r.complete(Direction::Write, next_write.offset, next_write.buflen, true);
        }
        _ => panic!("expected reservation after reset"),
    }
    assert_eq!(table.zone(0).lock().wp, 8);
}

#[test]
fn file_reset_then_verify_replay_reads_back_in_write_order() {
    let job = Job::new();
    let backend = FakeZoneBackend::new_zoned(1024, 2);
    let config = JobConfig {
        odirect: true,
        verify: true,
        block_sizes: zbd_core::zbd::BlockSizeRange {
            read: 4096,
            write: 4096,
            trim: 4096,
        },
        ..JobConfig::default()
    };
    let table = job.open_device(Path::new("/dev/fake-verify"), &backend, &config, true).unwrap();
    let zone_size_bytes = 1024u64 << 9;
    let ctx = FileZoneCtx::new(table.clone(), (0, zone_size_bytes * 2), false);

    // Dirty zone 0 so the up-front reset has something to do.
    table.zone(0).lock().wp = 500;
    ctx.reset_for_start(&backend, true, true, false, 8).unwrap();
    assert_eq!(table.zone(0).lock().wp, 0);

    // Write three 4 KiB blocks to zone 0.
    for _ in 0..3 {
        let mut write = IoUnit::new(Direction::Write, 0, 4096, Workload::Sequential, 4096);
        match ctx.adjust_block(&backend, &NoopQuiesce, &mut write).unwrap() {
            AdjustOutcome::SequentialReservation(r) => r.complete(Direction::Write, write.offset, write.buflen, true),
            _ => panic!("expected reservation"),
        }
    }
    assert_eq!(table.zone(0).lock().wp, 24); // 3 * 8 sectors

    // Replaying in verify mode must read back sectors 0, 8, 16 in order.
    let mut expected_sector = 0u64;
    for _ in 0..3 {
        let mut read = IoUnit::new(Direction::Read, 0, 4096, Workload::Sequential, 4096).verifying();
        match ctx.adjust_block(&backend, &NoopQuiesce, &mut read).unwrap() {
            AdjustOutcome::SequentialReservation(r) => {
                assert_eq!(read.offset, expected_sector << 9);
                r.complete(Direction::Read, read.offset, read.buflen, true);
            }
            _ => panic!("expected reservation"),
        }
        expected_sector += 8;
    }
}

#[test]
fn offline_zone_triggers_find_zone_fallback_across_the_whole_stack() {
    let backend = FakeZoneBackend::new_zoned(1024, 4);
    let job = Job::new();
    let config = JobConfig {
        odirect: true,
        ..JobConfig::default()
    };
    let table = job.open_device(Path::new("/dev/fake-offline"), &backend, &config, true).unwrap();

    // Write into zones 0 and 2 so they have data below their write pointers;
    // mark zone 1 OFFLINE directly (no device operation produces this in the
    // fake backend, so set it on the in-memory state).
    table.zone(0).lock().wp = 1024; // full
    table.zone(1).lock().cond = zbd_core::zbd::ZoneCondition::Offline;
    table.zone(2).lock().wp = 1024 + 100;

    let ctx = FileZoneCtx::new(table.clone(), (0, (1024u64 << 9) * 4), false);
    let zone1_start_bytes = 1024u64 << 9;
    let mut read = IoUnit::new(Direction::Read, zone1_start_bytes, 4096, Workload::Random, 4096);
    match ctx.adjust_block(&backend, &NoopQuiesce, &mut read).unwrap() {
        AdjustOutcome::SequentialReservation(r) => {
            // Should have fallen through to zone 2, the next zone with data
            // below its write pointer.
            assert_eq!(read.offset, 2048 << 9);
            r.complete(Direction::Read, read.offset, read.buflen, true);
        }
        AdjustOutcome::Eof => panic!("expected fallback reservation, got EOF"),
        AdjustOutcome::ConventionalAccept => panic!("expected fallback reservation, got ConventionalAccept"),
    };
}

#[test]
fn host_managed_writer_without_odirect_is_rejected_before_any_io() {
    let job = Job::new();
    let backend = FakeZoneBackend::new_zoned(1024, 4);
    let config = JobConfig::default(); // odirect: false
    let err = job.open_device(Path::new("/dev/fake-rejected"), &backend, &config, true).unwrap_err();
    assert!(matches!(err, zbd_core::zbd::Error::Config(_)));
}

#[test]
fn trim_on_a_sequential_zone_returns_it_to_empty() {
    let job = Job::new();
    let backend = FakeZoneBackend::new_zoned(1024, 2);
    let config = JobConfig {
        odirect: true,
        ..JobConfig::default()
    };
    let table = job.open_device(Path::new("/dev/fake-trim"), &backend, &config, true).unwrap();
    let zone_size_bytes = 1024u64 << 9;
    let ctx = FileZoneCtx::new(table.clone(), (0, zone_size_bytes * 2), false);

    table.zone(0).lock().wp = 1024; // device already reset the zone as part of trim semantics

    let mut trim = IoUnit::new(Direction::Trim, 0, zone_size_bytes, Workload::Sequential, 512);
    match ctx.adjust_block(&backend, &NoopQuiesce, &mut trim).unwrap() {
        AdjustOutcome::SequentialReservation(r) => {
            table.zone(0).lock().wp = 0; // simulate the device-level trim completing
            r.complete(Direction::Trim, trim.offset, trim.buflen, true);
        }
        _ => panic!("expected reservation"),
    }
    assert_eq!(table.zone(0).lock().wp, 0);
}
