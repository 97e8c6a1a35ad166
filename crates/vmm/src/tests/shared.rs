use super::*;
use crate::{PolicyKind, VmError};

#[test]
fn test_shared_frames_are_never_evicted() {
    for policy in [PolicyKind::Random, PolicyKind::ClockLru, PolicyKind::ExactLru] {
        let mut h = Harness::new(small_config(policy));
        h.add_program("prog", standard_program());
        h.vmm.create(1, "prog").expect("create");
        let start = h.vmm.attach_shared(1, 200).expect("attach");
        assert_eq!(start, 12 * 128);
        let shared = [h.frame_of(1, 12), h.frame_of(1, 13)];
        h.vmm.fork(1, 2).expect("fork");

        // 只剩两个帧可以换页，两个进程交替写满所有私有页
        for vpn in 0..12 {
            h.vmm.write_virtual(1, vpn * 128, &[1; 16]).expect("write");
            h.vmm.write_virtual(2, vpn * 128, &[2; 16]).expect("write");
            assert_eq!([h.frame_of(1, 12), h.frame_of(1, 13)], shared, "{:?}", policy);
            assert_eq!([h.frame_of(2, 12), h.frame_of(2, 13)], shared);
        }
        assert!(shared.iter().flatten().all(|&f| h.vmm.frames().get(f).is_some_and(|r| r.shared)));

        h.vmm.write_virtual(2, start + 130, b"hello").expect("write");
        assert_eq!(h.read(1, start + 130, 5), b"hello".to_vec());
        h.vmm.verify_frame_table().expect("consistent");
    }
}

#[test]
fn test_attach_capacity_depends_on_policy() {
    let mut h = Harness::new(small_config(PolicyKind::NoReplacement));
    h.add_program("prog", standard_program());
    h.vmm.create(1, "prog").expect("create");
    h.read(1, 0, 1);
    h.read(1, 128, 1);

    assert_eq!(h.vmm.attach_shared(1, 3 * 128), Err(VmError::OutOfPhysicalMemory));
    assert_eq!(h.vmm.space(1).map(|s| s.page_count()), Some(12));
    assert_eq!(h.vmm.attach_shared(1, 129), Ok(12 * 128));
    assert_eq!(h.vmm.frames().free_count(), 0);
    drop(h);

    let mut h = Harness::new(small_config(PolicyKind::ClockLru));
    h.add_program("prog", standard_program());
    h.vmm.create(1, "prog").expect("create");
    // 必须至少留下一个非共享帧
    assert_eq!(h.vmm.attach_shared(1, 4 * 128), Err(VmError::OutOfPhysicalMemory));
    assert_eq!(h.vmm.attach_shared(1, 3 * 128), Ok(12 * 128));
    assert_eq!(h.vmm.attach_shared(1, 1), Err(VmError::OutOfPhysicalMemory));
    assert_eq!(h.vmm.space(1).map(|s| s.page_count()), Some(15));
    assert_eq!(h.vmm.attach_shared(9, 1), Err(VmError::NoSuchProcess(9)));
}

#[test]
fn test_attached_pages_are_zeroed() {
    let mut h = Harness::new(VmConfig::with_policy(PolicyKind::ExactLru));
    h.add_program("prog", standard_program());
    h.vmm.create(1, "prog").expect("create");
    h.vmm.write_virtual(1, 0, &[0xaa; 128]).expect("write");
    let dirty_frame = h.frame_of(1, 0);
    h.vmm.exit(1).expect("exit");

    h.vmm.create(2, "prog").expect("create");
    let start = h.vmm.attach_shared(2, 128).expect("attach");
    assert_eq!(h.frame_of(2, 12), dirty_frame);
    assert_eq!(h.read(2, start, 128), alloc::vec![0; 128]);
}

#[test]
fn test_attach_refreshes_active_translation() {
    let mut h = Harness::new(VmConfig::default());
    h.add_program("prog", standard_program());
    h.vmm.create(1, "prog").expect("create");
    h.vmm.activate(1).expect("activate");
    let installs = h.vmm.machine().install_count();

    h.vmm.attach_shared(1, 64).expect("attach");
    assert!(h.vmm.machine().install_count() > installs);
    let installed = h.vmm.machine().installed_frames().to_vec();
    assert_eq!(installed.len(), 13);
    assert_eq!(installed[12], h.frame_of(1, 12));
}

#[test]
fn test_shared_frame_released_with_last_mapper() {
    let mut h = Harness::new(VmConfig::default());
    h.add_program("prog", standard_program());
    h.vmm.create(1, "prog").expect("create");
    h.vmm.attach_shared(1, 128).expect("attach");
    let frame = h.frame_of(1, 12).unwrap_or(usize::MAX);
    h.vmm.fork(1, 2).expect("fork");

    h.vmm.exit(1).expect("exit");
    assert!(h.vmm.frames().get(frame).is_some_and(|f| f.shared));
    h.vmm.verify_frame_table().expect("consistent");

    h.vmm.exit(2).expect("exit");
    assert!(h.vmm.frames().get(frame).is_some_and(|f| f.is_free()));
    assert_eq!(h.vmm.frames().free_count(), 32);
}
