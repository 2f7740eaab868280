//! Property-based tests for the escape codec and the service-message parser.

use phpunit_protocol::escape::{escape, unescape};
use phpunit_protocol::{TestResult, parser};
use proptest::prelude::*;

proptest! {
    /// Property: unescape(escape(s)) == s for any string
    #[test]
    fn escape_round_trips(value in any::<String>()) {
        prop_assert_eq!(unescape(&escape(&value)), value);
    }

    /// Property: escaped values never contain a bare quote, bracket or line break
    #[test]
    fn escaped_values_are_wire_safe(value in any::<String>()) {
        let escaped = escape(&value);
        let mut chars = escaped.chars();
        while let Some(c) = chars.next() {
            if c == '|' {
                prop_assert!(chars.next().is_some());
                continue;
            }
            prop_assert!(!matches!(c, '\'' | '[' | ']' | '\n' | '\r'));
        }
    }

    /// Property: any message value survives an escape → wire → parse trip
    #[test]
    fn failure_message_survives_the_wire(message in "[ -~\n\r]{0,64}") {
        let line = format!(
            "##teamcity[testFailed name='t' message='{}' details='' flowId='1']",
            escape(&message)
        );
        let parsed = parser::parse(&line);
        let Some(TestResult::TestFailed(problem)) = parsed else {
            return Err(TestCaseError::fail("expected testFailed"));
        };
        prop_assert_eq!(problem.message, message);
    }

    /// Property: the parser never panics on arbitrary input
    #[test]
    fn parse_is_total(line in any::<String>()) {
        let _ = parser::parse(&line);
    }
}
