use lockstep_crypto::counter::{counter_hash, init_counter, next_counter, CTR_DATA_LENGTH};

#[test]
fn init_is_random() {
    let a = init_counter();
    let b = init_counter();
    assert_eq!(a.len(), CTR_DATA_LENGTH);
    assert_ne!(a, b);
}

#[test]
fn advance_is_deterministic() {
    let ctr = init_counter();
    assert_eq!(next_counter(&ctr), next_counter(&ctr));
}

#[test]
fn advance_changes_state() {
    let ctr = init_counter();
    let next = next_counter(&ctr);
    assert_ne!(ctr, next);
    assert_ne!(next, next_counter(&next));
}

#[test]
fn chain_has_no_short_cycles() {
    let mut seen = std::collections::HashSet::new();
    let mut ctr = init_counter();
    for _ in 0..1000 {
        assert!(seen.insert(ctr));
        ctr = next_counter(&ctr);
    }
}

#[test]
fn counter_hash_is_keyed() {
    let ctr = init_counter();
    let h1 = counter_hash(&[1u8; 16], &ctr);
    let h2 = counter_hash(&[2u8; 16], &ctr);
    assert_eq!(h1.len(), 16);
    assert_ne!(h1, h2);
}

#[test]
fn counter_hash_tracks_state() {
    let key = [3u8; 16];
    let ctr = init_counter();
    let advanced = next_counter(&ctr);
    assert_ne!(counter_hash(&key, &ctr), counter_hash(&key, &advanced));
}
