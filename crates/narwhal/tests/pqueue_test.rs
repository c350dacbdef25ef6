use narwhal::pqueue::PriorityQueue;

#[test]
fn heap_sorts_its_input() {
    let input = [5.0, 3.0, 8.0, 1.0, 9.0, 2.0, 7.0, 3.0, 0.5];
    let mut q = PriorityQueue::new(|a: &f64, b: &f64| a <= b);
    for v in input {
        q.push(v);
    }
    assert_eq!(q.len(), input.len());
    assert_eq!(q.top(), Some(&0.5));

    let mut out = Vec::new();
    while let Some(v) = q.pop() {
        out.push(v);
    }
    let mut expected = input.to_vec();
    expected.sort_by(f64::total_cmp);
    assert_eq!(out, expected);
    assert!(q.is_empty());
}

#[test]
fn handles_track_elements_until_popped() {
    let mut q = PriorityQueue::new(|a: &(u32, f64), b: &(u32, f64)| a.1 <= b.1);
    let a = q.push((1, 10.0));
    let b = q.push((2, 20.0));
    let c = q.push((3, 30.0));

    q.reduce_key(c, (3, 5.0));
    assert_eq!(q.top(), Some(&(3, 5.0)));
    assert_eq!(q.pop(), Some((3, 5.0)));
    assert_eq!(q.get(c), None);
    assert_eq!(q.get(b), Some(&(2, 20.0)));

    // reducing a popped handle is a no-op
    q.reduce_key(c, (3, 0.0));
    assert_eq!(q.pop(), Some((1, 10.0)));
    assert_eq!(q.get(a), None);
    assert_eq!(q.pop(), Some((2, 20.0)));
    assert_eq!(q.pop(), None);
}
