use std::sync::Arc;

use graphrt::memory::{MemoryGroup, TensorLifetime};
use graphrt::tensor::{SharedTensorHandle, TensorHandle};
use graphrt::TensorId;
use graphrt_backend_ref_cpu::{CpuMemoryGroup, CpuTensorHandle};

fn handle(elements: usize) -> SharedTensorHandle {
    Arc::new(CpuTensorHandle::new(elements))
}

fn lifetime(tensor: u32, start: usize, end: usize) -> TensorLifetime {
    TensorLifetime {
        tensor: TensorId(tensor),
        start,
        end,
    }
}

#[test]
fn disjoint_lifetimes_share_a_slot() {
    let group = CpuMemoryGroup::new();
    group.manage(handle(4), lifetime(1, 0, 1)).unwrap();
    group.manage(handle(8), lifetime(2, 1, 2)).unwrap();
    group.manage(handle(2), lifetime(3, 2, 3)).unwrap();
    group.finalize_plan().unwrap();

    // t1 and t3 never overlap, t2 overlaps both.
    assert_eq!(group.num_managed(), 3);
    assert_eq!(group.num_slots(), 2);
    assert_eq!(group.pool_size_in_bytes(), (4 + 8) * 4);
}

#[test]
fn acquire_binds_and_release_frees_managed_handles() {
    let group = CpuMemoryGroup::new();
    let first = handle(3);
    let second = handle(3);
    group.manage(first.clone(), lifetime(1, 0, 0)).unwrap();
    group.manage(second.clone(), lifetime(2, 1, 1)).unwrap();
    group.finalize_plan().unwrap();
    assert_eq!(group.num_slots(), 1);

    group.acquire().unwrap();
    assert!(first.is_allocated() && second.is_allocated());

    first.copy_from_host(&[1.0, 2.0, 3.0]).unwrap();
    // Both tensors were planned into the same slot.
    assert_eq!(second.copy_to_host().unwrap(), [1.0, 2.0, 3.0]);

    group.release().unwrap();
    assert!(!first.is_allocated() && !second.is_allocated());
    assert!(first.copy_to_host().is_err());
}

#[test]
fn acquire_before_planning_fails() {
    let group = CpuMemoryGroup::new();
    group.manage(handle(1), lifetime(1, 0, 0)).unwrap();
    assert!(group.acquire().is_err());
}

#[test]
fn managing_more_tensors_reopens_the_plan() {
    let group = CpuMemoryGroup::new();
    group.manage(handle(2), lifetime(1, 0, 1)).unwrap();
    group.finalize_plan().unwrap();
    assert_eq!(group.num_slots(), 1);

    group.manage(handle(6), lifetime(2, 0, 1)).unwrap();
    assert!(group.acquire().is_err());
    group.finalize_plan().unwrap();
    assert_eq!(group.num_slots(), 2);
    assert_eq!(group.pool_size_in_bytes(), (2 + 6) * 4);
}

#[test]
fn handles_from_other_backends_are_rejected() {
    struct Foreign;

    impl TensorHandle for Foreign {
        fn target(&self) -> graphrt::Target {
            graphrt::Target::Gpu
        }
        fn allocate(&self) -> graphrt::BackendResult<()> {
            Ok(())
        }
        fn free(&self) {}
        fn is_allocated(&self) -> bool {
            false
        }
        fn is_used(&self) -> bool {
            true
        }
        fn mark_as_unused(&self) {}
        fn size_in_bytes(&self) -> usize {
            0
        }
        fn as_any(&self) -> &dyn std::any::Any {
            self
        }
    }

    let group = CpuMemoryGroup::new();
    assert!(group.manage(Arc::new(Foreign), lifetime(1, 0, 0)).is_err());
}
