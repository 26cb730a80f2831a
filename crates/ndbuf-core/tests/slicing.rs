use ndbuf_core::{ArrayDescriptor, BufferError, ElementKind, MemoryLocation, MemorySystem, Selector};
use pretty_assertions::assert_eq;
use proptest::prelude::*;

fn filled_host_buffer(system: &MemorySystem, shape: &[usize]) -> ArrayDescriptor {
    let desc = system
        .create_buffer(shape, ElementKind::Int32, false, MemoryLocation::Host)
        .unwrap();
    let values: Vec<i32> = (0..desc.length() as i32).collect();
    desc.write_elements(&values).unwrap();
    desc
}

#[test]
fn test_strided_view_of_matrix() {
    let system = MemorySystem::default();
    let mut source = system
        .create_buffer(&[4, 6], ElementKind::Float32, false, MemoryLocation::Device)
        .unwrap();
    assert_eq!(source.strides(), &[6, 1]);
    assert_eq!(source.length(), 24);
    assert_eq!(source.buffer_size(), 96);

    let mut view = source
        .slice(&[Selector::range(1, 3), Selector::range_step(0, 6, 2)])
        .unwrap();

    assert_eq!(view.shape(), &[2, 3]);
    assert_eq!(view.strides(), &[6, 2]);
    assert_eq!(view.raw_data() as usize - source.raw_data() as usize, 24);
    assert_eq!(view.location(), MemoryLocation::Device);

    system.release(&mut view);
    system.release(&mut source);
}

#[test]
fn test_view_elements() {
    let system = MemorySystem::default();
    let mut source = filled_host_buffer(&system, &[4, 6]);

    let mut view = source
        .slice(&[Selector::range(1, 3), Selector::range_step(0, 6, 2)])
        .unwrap();
    assert_eq!(view.read_elements::<i32>().unwrap(), vec![6, 8, 10, 12, 14, 16]);

    system.release(&mut view);
    system.release(&mut source);
}

#[test]
fn test_view_of_view_composes() {
    let system = MemorySystem::default();
    let mut source = filled_host_buffer(&system, &[6, 8]);

    let mut outer = source
        .slice(&[Selector::range_step(1, 6, 2), Selector::range(2, 8)])
        .unwrap();
    assert_eq!(outer.shape(), &[3, 6]);
    assert_eq!(outer.strides(), &[16, 1]);

    let mut inner = outer
        .slice(&[Selector::range(1, 3), Selector::range_step(0, 6, 3)])
        .unwrap();
    assert_eq!(inner.shape(), &[2, 2]);
    assert_eq!(inner.strides(), &[16, 3]);

    // Rows 3 and 5, columns 2 and 5 of the source
    assert_eq!(inner.read_elements::<i32>().unwrap(), vec![26, 29, 42, 45]);

    let mut direct = source
        .slice(&[Selector::range_step(3, 6, 2), Selector::range_step(2, 8, 3)])
        .unwrap();
    assert_eq!(direct.raw_data(), inner.raw_data());
    assert_eq!(direct.strides(), inner.strides());

    system.release(&mut direct);
    system.release(&mut inner);
    system.release(&mut outer);
    system.release(&mut source);
}

#[test]
fn test_index_selectors_reduce_rank() {
    let system = MemorySystem::default();
    let mut source = filled_host_buffer(&system, &[2, 3, 4]);

    let mut view = source
        .slice_with_rank(1, &[Selector::index(1), Selector::full(3), Selector::index(2)])
        .unwrap();
    assert_eq!(view.rank(), 1);
    assert_eq!(view.shape(), &[3]);
    assert_eq!(view.strides(), &[4]);
    assert_eq!(view.read_elements::<i32>().unwrap(), vec![14, 18, 22]);

    let mut element = source
        .slice(&[Selector::index(1), Selector::index(2), Selector::index(3)])
        .unwrap();
    assert_eq!(element.rank(), 0);
    assert_eq!(element.length(), 1);
    assert_eq!(element.read_elements::<i32>().unwrap(), vec![23]);

    system.release(&mut element);
    system.release(&mut view);
    system.release(&mut source);
}

#[test]
fn test_reversed_view() {
    let system = MemorySystem::default();
    let mut source = filled_host_buffer(&system, &[5]);

    let mut reversed = source.slice(&[Selector::range_step(4, -1, -1)]).unwrap();
    assert_eq!(reversed.read_elements::<i32>().unwrap(), vec![4, 3, 2, 1, 0]);

    system.release(&mut reversed);
    system.release(&mut source);
}

#[test]
fn test_empty_range_view() {
    let system = MemorySystem::default();
    let mut source = filled_host_buffer(&system, &[4]);

    let mut empty = source.slice(&[Selector::range(2, 2)]).unwrap();
    assert_eq!(empty.shape(), &[0]);
    assert_eq!(empty.length(), 0);
    assert_eq!(empty.buffer_size(), 0);
    assert_eq!(empty.read_elements::<i32>().unwrap(), Vec::<i32>::new());

    system.release(&mut empty);
    system.release(&mut source);
}

#[test]
fn test_out_of_range_view_is_rejected() {
    let system = MemorySystem::default();
    let mut source = filled_host_buffer(&system, &[4]);

    let mut past_end = source.slice(&[Selector::range(0, 64)]).unwrap();
    assert_eq!(past_end.length(), 64);
    assert_eq!(
        past_end.read_elements::<i32>(),
        Err(BufferError::OutOfBounds { allocation_size: 16 })
    );
    assert_eq!(
        past_end.write_elements(&[0; 64]),
        Err(BufferError::OutOfBounds { allocation_size: 16 })
    );

    let mut before_start = source.slice(&[Selector::range_step(2, -3, -1)]).unwrap();
    assert_eq!(before_start.check_bounds(), Err(BufferError::OutOfBounds { allocation_size: 16 }));

    let mut last = source.slice(&[Selector::index(3)]).unwrap();
    assert_eq!(last.check_bounds(), Ok(()));
    assert_eq!(last.read_elements::<i32>().unwrap(), vec![3]);

    let mut beyond = source.slice(&[Selector::index(4)]).unwrap();
    assert!(beyond.read_elements::<i32>().is_err());

    // The source itself is untouched
    assert_eq!(source.read_elements::<i32>().unwrap(), vec![0, 1, 2, 3]);

    for view in [&mut past_end, &mut before_start, &mut last, &mut beyond] {
        system.release(view);
    }
    system.release(&mut source);
}

#[test]
fn test_view_of_view_bounded_by_owning_allocation() {
    let system = MemorySystem::default();
    let mut source = filled_host_buffer(&system, &[10]);

    let mut tail = source.slice(&[Selector::range(6, 10)]).unwrap();
    // Reaches back into the source, which is still inside the allocation
    let mut back = tail.slice(&[Selector::range_step(0, -6, -2)]).unwrap();
    assert_eq!(back.read_elements::<i32>().unwrap(), vec![6, 4, 2]);

    let mut too_far = tail.slice(&[Selector::range(0, 5)]).unwrap();
    assert!(matches!(too_far.read_elements::<i32>(), Err(BufferError::OutOfBounds { .. })));

    system.release(&mut too_far);
    system.release(&mut back);
    system.release(&mut tail);
    system.release(&mut source);
}

/// Shape together with an in-bounds range selector for every dimension.
fn shape_and_ranges() -> impl Strategy<Value = (Vec<usize>, Vec<(usize, usize, usize)>)> {
    prop::collection::vec(1usize..6, 1..4).prop_flat_map(|shape| {
        let ranges: Vec<_> = shape
            .iter()
            .map(|&dim| {
                (0..dim).prop_flat_map(move |start| {
                    (Just(start), start + 1..=dim, 1usize..4)
                })
            })
            .collect();
        (Just(shape), ranges)
    })
}

proptest! {
    #[test]
    fn prop_view_matches_gather((shape, ranges) in shape_and_ranges()) {
        let system = MemorySystem::default();
        let mut source = filled_host_buffer(&system, &shape);
        let selectors: Vec<Selector> = ranges
            .iter()
            .map(|&(start, end, step)| Selector::range_step(start as isize, end as isize, step as isize))
            .collect();
        let mut view = source.slice(&selectors).unwrap();

        let values = source.read_elements::<i32>().unwrap();
        let source_strides = source.strides().to_vec();
        let view_shape = view.shape().to_vec();

        let mut expected = Vec::new();
        let mut index = vec![0usize; view_shape.len()];
        for _ in 0..view.length() {
            let flat: isize = index
                .iter()
                .zip(&ranges)
                .zip(&source_strides)
                .map(|((&i, &(start, _, step)), &stride)| (start + i * step) as isize * stride)
                .sum();
            expected.push(values[flat as usize]);
            for dim in (0..index.len()).rev() {
                index[dim] += 1;
                if index[dim] < view_shape[dim] {
                    break;
                }
                index[dim] = 0;
            }
        }

        prop_assert_eq!(view.read_elements::<i32>().unwrap(), expected);
        prop_assert_eq!(view.buffer_size(), view.length() * 4);

        system.release(&mut view);
        system.release(&mut source);
    }
}
