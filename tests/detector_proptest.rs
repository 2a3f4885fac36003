//! Property tests for the display-locale detector: total and deterministic
//! over arbitrary input, and case folding never changes the verdict.

use proptest::prelude::*;

use twin_chat::lang::{detect, Locale};

proptest! {
    #[test]
    fn detect_is_total_and_deterministic(input in ".*") {
        let first = detect(&input);
        prop_assert!(matches!(first, Locale::English | Locale::Italian));
        prop_assert_eq!(first, detect(&input));
    }

    #[test]
    fn detect_is_case_insensitive(input in "[a-zA-Zàèéìòù ]{0,40}") {
        prop_assert_eq!(detect(&input), detect(&input.to_uppercase()));
    }

    #[test]
    fn appending_a_marker_forces_italian(input in ".{0,40}") {
        let text = format!("{input} raccontami");
        prop_assert_eq!(detect(&text), Locale::Italian);
    }
}
