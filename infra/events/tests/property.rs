use proptest::prelude::*;
use relay_event_bus::{Pattern, PatternSyntax, matches};

fn segments() -> impl Strategy<Value = Vec<String>> {
    proptest::collection::vec("[a-z][a-z0-9_]{0,7}", 1..6)
}

fn parse(raw: &str) -> Pattern {
    Pattern::parse(raw, &PatternSyntax::default()).unwrap()
}

proptest! {
    #[test]
    fn literal_namespace_matches_itself(parts in segments()) {
        let namespace = parts.join(".");
        let pattern = parse(&namespace);

        prop_assert!(pattern.is_literal());
        prop_assert!(matches(&pattern, &namespace));
        prop_assert_eq!(matches(&pattern, &namespace), pattern.matches(&namespace));
    }

    #[test]
    fn literal_pattern_rejects_longer_namespaces(parts in segments(), extra in "[a-z]{1,6}") {
        let namespace = parts.join(".");
        let pattern = parse(&namespace);

        let longer = format!("{namespace}.{extra}");
        prop_assert!(!matches(&pattern, &longer));
    }

    #[test]
    fn single_wildcard_replaces_any_one_segment(parts in segments(), index in any::<prop::sample::Index>()) {
        let i = index.index(parts.len());
        let mut raw: Vec<&str> = parts.iter().map(String::as_str).collect();
        raw[i] = "*";
        let pattern = parse(&raw.join("."));
        let namespace = parts.join(".");

        prop_assert!(matches(&pattern, &namespace));
        let longer = format!("{namespace}.tail");
        prop_assert!(!matches(&pattern, &longer));
    }

    #[test]
    fn deep_wildcard_matches_every_suffix(prefix in segments(), suffix in proptest::collection::vec("[a-z]{1,5}", 0..4)) {
        let pattern = parse(&format!("{}.**", prefix.join(".")));
        let namespace = prefix.iter().chain(suffix.iter()).cloned().collect::<Vec<_>>().join(".");

        prop_assert!(matches(&pattern, &namespace));
    }

    #[test]
    fn matching_is_deterministic(parts in segments(), other in segments()) {
        let pattern = parse(&format!("{}.*", parts.join(".")));
        let namespace = other.join(".");

        prop_assert_eq!(matches(&pattern, &namespace), matches(&pattern, &namespace));
    }
}
