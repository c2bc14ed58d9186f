#![no_main]

use fc_coord::find_prefix_range;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|input: (String, String)| {
    let (prefix, tail) = input;
    let (start, end) = find_prefix_range(&prefix);
    assert!(start < end, "empty range for {prefix:?}");
    assert!(end.starts_with(&prefix));

    // Only lowercase candidates are ordered by the alphabet bounds.
    let lowercase = |s: &str| s.chars().all(|c| c.is_ascii_lowercase());
    if lowercase(&prefix) && lowercase(&tail) {
        let candidate = format!("{prefix}{tail}");
        assert!(start < candidate, "{candidate:?} below {start:?}");
        assert!(candidate < end, "{candidate:?} above {end:?}");
    }
});
