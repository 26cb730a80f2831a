use ndbuf_core::{
    BufferError, ElementKind, MemoryConfig, MemoryLocation, MemorySystem, ReleaseStatus, Selector,
};
use pretty_assertions::assert_eq;

#[test]
fn test_scalar_buffer_lifecycle() {
    let system = MemorySystem::default();
    let mut scalar = system
        .create_buffer(&[], ElementKind::Float64, false, MemoryLocation::Device)
        .unwrap();

    assert_eq!(scalar.rank(), 0);
    assert_eq!(scalar.length(), 1);
    assert_eq!(scalar.buffer_size(), scalar.element_size());
    assert!(scalar.strides().is_empty());
    assert_eq!(system.usage(MemoryLocation::Device).live_bytes, 8);

    assert_eq!(system.release(&mut scalar), ReleaseStatus::Released);
    assert_eq!(system.usage(MemoryLocation::Device).live_bytes, 0);
}

#[test]
fn test_every_kind_and_location() {
    let system = MemorySystem::default();

    for location in MemoryLocation::ALL {
        for kind in ElementKind::ALL {
            let mut desc = system.create_buffer(&[3, 5], kind, false, location).unwrap();
            assert_eq!(desc.element_size(), kind.size());
            assert_eq!(desc.buffer_size(), 15 * kind.size());
            assert_eq!(desc.location(), location);
            assert_eq!(system.release(&mut desc), ReleaseStatus::Released);
        }
        let usage = system.usage(location);
        assert_eq!(usage.live_allocations, 0);
        assert_eq!(usage.total_allocations, ElementKind::ALL.len() as u64);
    }
}

#[test]
fn test_storage_is_zeroed() {
    let system = MemorySystem::default();
    let mut desc = system
        .create_buffer(&[4, 4], ElementKind::Int32, false, MemoryLocation::Managed)
        .unwrap();

    assert_eq!(desc.read_elements::<i32>().unwrap(), vec![0; 16]);
    system.release(&mut desc);
}

#[test]
fn test_view_release_leaves_source_usable() {
    let system = MemorySystem::default();
    let mut source = system
        .create_buffer(&[2, 3], ElementKind::Int64, false, MemoryLocation::Host)
        .unwrap();
    source.write_elements(&[1i64, 2, 3, 4, 5, 6]).unwrap();

    let mut row = source.slice(&[Selector::index(1)]).unwrap();
    assert_eq!(row.read_elements::<i64>().unwrap(), vec![4, 5, 6]);
    assert_eq!(system.release(&mut row), ReleaseStatus::Released);
    assert_eq!(system.release(&mut row), ReleaseStatus::NothingToRelease);

    assert_eq!(source.read_elements::<i64>().unwrap(), vec![1, 2, 3, 4, 5, 6]);
    assert_eq!(system.release(&mut source), ReleaseStatus::Released);
    assert_eq!(system.usage(MemoryLocation::Host).live_allocations, 0);
}

#[test]
fn test_writes_through_view_reach_source() {
    let system = MemorySystem::default();
    let mut source = system
        .create_buffer(&[3, 4], ElementKind::Int32, false, MemoryLocation::PinnedHost)
        .unwrap();

    let mut column = source
        .slice(&[Selector::full(3), Selector::index(2)])
        .unwrap();
    column.write_elements(&[7, 8, 9]).unwrap();

    assert_eq!(
        source.read_elements::<i32>().unwrap(),
        vec![0, 0, 7, 0, 0, 0, 8, 0, 0, 0, 9, 0]
    );

    system.release(&mut column);
    system.release(&mut source);
}

#[test]
fn test_device_storage_not_host_readable() {
    let system = MemorySystem::default();
    let mut desc = system
        .create_buffer(&[4], ElementKind::Float32, false, MemoryLocation::Device)
        .unwrap();

    assert_eq!(
        desc.read_elements::<f32>(),
        Err(BufferError::NotHostAccessible {
            location: MemoryLocation::Device
        })
    );
    system.release(&mut desc);
}

#[test]
fn test_shared_capacity_bound() {
    let system = MemorySystem::new(MemoryConfig::new().with_capacity(MemoryLocation::Shared, 1024));

    let mut first = system
        .create_buffer(&[128], ElementKind::Int32, false, MemoryLocation::Shared)
        .unwrap();
    let err = system
        .create_buffer(&[256], ElementKind::Int32, false, MemoryLocation::Shared)
        .unwrap_err();
    assert!(!err.is_caller_defect());

    system.release(&mut first);
    let mut second = system
        .create_buffer(&[256], ElementKind::Int32, false, MemoryLocation::Shared)
        .unwrap();
    assert_eq!(system.usage(MemoryLocation::Shared).live_bytes, 1024);
    system.release(&mut second);
}

#[test]
fn test_release_after_view_of_released_source_metadata() {
    let system = MemorySystem::default();
    let mut source = system
        .create_buffer(&[6], ElementKind::Int8, false, MemoryLocation::Host)
        .unwrap();
    let mut view = source.slice(&[Selector::range(0, 3)]).unwrap();
    view.release_metadata();

    assert_eq!(view.slice(&[]).unwrap_err(), BufferError::Released);
    system.release(&mut source);
}

#[test]
fn test_alias_of_stepped_view() {
    let system = MemorySystem::default();
    let mut source = system
        .create_buffer(&[4, 6], ElementKind::Int32, false, MemoryLocation::Host)
        .unwrap();
    let values: Vec<i32> = (0..24).collect();
    source.write_elements(&values).unwrap();

    // Rows 3 and 1, every third column
    let mut view = source
        .slice(&[Selector::range_step(3, 0, -2), Selector::range_step(0, 6, 3)])
        .unwrap();
    let mut alias = system
        .create_buffer(&[2, 2], ElementKind::Int32, true, MemoryLocation::Device)
        .unwrap();
    alias.bind_alias(&view).unwrap();

    assert_eq!(alias.shape(), view.shape());
    assert_eq!(alias.strides(), &[-12, 3]);
    assert_eq!(alias.raw_data(), view.raw_data());
    assert_eq!(alias.location(), MemoryLocation::Host);
    assert_eq!(alias.read_elements::<i32>().unwrap(), vec![18, 21, 6, 9]);

    alias.write_elements(&[-1, -2, -3, -4]).unwrap();
    assert_eq!(view.read_elements::<i32>().unwrap(), vec![-1, -2, -3, -4]);

    assert_eq!(system.release(&mut alias), ReleaseStatus::Released);
    assert_eq!(system.release(&mut view), ReleaseStatus::Released);
    assert_eq!(system.usage(MemoryLocation::Host).live_allocations, 1);
    assert_eq!(system.release(&mut source), ReleaseStatus::Released);
}

#[test]
fn test_alias_with_larger_placeholder_stays_in_bounds() {
    let system = MemorySystem::default();
    let mut source = system
        .create_buffer(&[6], ElementKind::Int64, false, MemoryLocation::Host)
        .unwrap();
    let mut alias = system
        .create_buffer(&[100], ElementKind::Int64, true, MemoryLocation::Host)
        .unwrap();

    alias.bind_alias(&source).unwrap();
    assert_eq!(alias.shape(), &[6]);
    assert_eq!(alias.read_elements::<i64>().unwrap().len(), 6);
    assert_eq!(
        alias.write_elements(&[0i64; 100]),
        Err(BufferError::LengthMismatch {
            expected: 6,
            actual: 100
        })
    );

    system.release(&mut alias);
    system.release(&mut source);
}

#[test]
fn test_invalid_tags() {
    assert_eq!(ElementKind::from_tag(2), Err(BufferError::InvalidElementKind(2)));
    assert_eq!(
        MemoryLocation::from_tag(9),
        Err(BufferError::InvalidMemoryLocation(9))
    );
}
