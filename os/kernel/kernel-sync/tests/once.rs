use kernel_sync::SyncOnceCell;

#[test]
fn empty_until_set() {
    let cell = SyncOnceCell::<u32>::new();
    assert!(cell.get().is_none());
    assert_eq!(cell.set(3).copied(), Ok(3));
    assert_eq!(cell.get(), Some(&3));
}

#[test]
fn second_set_hands_the_value_back() {
    let cell = SyncOnceCell::new();
    assert!(cell.set(String::from("first")).is_ok());
    assert_eq!(cell.set(String::from("second")), Err(String::from("second")));
    assert_eq!(cell.get().map(String::as_str), Some("first"));
}

#[test]
fn get_or_init_runs_once() {
    let cell = SyncOnceCell::new();
    let mut calls = 0;
    let a = *cell.get_or_init(|| {
        calls += 1;
        10
    });
    let b = *cell.get_or_init(|| 20);
    assert_eq!((a, b, calls), (10, 10, 1));
}
