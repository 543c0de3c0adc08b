#![no_main]

use libfuzzer_sys::fuzz_target;
use recall_core::LifecycleEvent;

fuzz_target!(|data: &[u8]| {
    if let Ok(event) = serde_json::from_slice::<LifecycleEvent>(data) {
        let encoded = serde_json::to_vec(&event).expect("event serializes");
        let again: LifecycleEvent = serde_json::from_slice(&encoded).expect("event re-parses");
        assert_eq!(event, again);
    }
});
