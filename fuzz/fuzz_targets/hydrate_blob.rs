#![no_main]

use libfuzzer_sys::fuzz_target;
use recall_core::ShadowStore;

// Arbitrary bytes split into two blobs must hydrate without panicking and
// leave the two sets disjoint.
fuzz_target!(|data: &[u8]| {
    let Ok(text) = std::str::from_utf8(data) else {
        return;
    };
    let (active, retained) = text.split_once('\u{0}').unwrap_or((text, ""));
    let (store, _) = ShadowStore::hydrate(Some(active), Some(retained), None);
    for record in store.retained_iter() {
        assert!(!store.contains_active(&record.message_id));
    }
});
