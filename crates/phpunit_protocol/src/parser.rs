//! Line classifier and service-message decoder.
//!
//! [`parse`] tries, in order:
//!
//! 1. a TeamCity service message (`##teamcity[name key='value' ...]`),
//! 2. the `Time: <duration>, Memory: <size>` summary line,
//! 3. PHPUnit's plain-text banner lines (version, runtime, configuration, result summary).
//!
//! Anything else yields `None`; the caller still sees the raw line.
//!
//! Service-message attributes are tokenized with the shell tokenizer, rewritten into a synthetic argv of the form
//! `--event=<name> --key=value ...`, and handed to the generic option parser. Values are unescaped afterwards.

use crate::argv::{self, OptionValue};
use crate::errors::ProtocolError;
use crate::escape;
use crate::events::{
    ConfigurationInfo, Detail, LOCATION_SCHEME, Location, ResultSummary, RuntimeInfo, TestCount, TestNode, TestProblem,
    TestResult, TimeAndMemory, UnknownMessage, VersionInfo,
};

/// Marker following the leading `#` run of a service message.
const SERVICE_MARKER: &str = "teamcity";

/// Scheme composer-installed binaries appear under in stack traces.
const VFS_SCHEME: &str = "phpvfscomposer://";

/// Classify and decode one complete output line.
pub fn parse(line: &str) -> Option<TestResult> {
    if let Some(body) = service_message_body(line) {
        return Some(parse_service_message(body));
    }
    if let Some(summary) = parse_time_and_memory(line) {
        return Some(TestResult::TimeAndMemory(summary));
    }
    parse_banner(line)
}

fn service_message_body(line: &str) -> Option<&str> {
    let trimmed = line.trim();
    let unhashed = trimmed.trim_start_matches('#');
    if unhashed.len() == trimmed.len() {
        return None;
    }
    let body = unhashed.strip_prefix(SERVICE_MARKER)?;
    let body = body.strip_prefix('[').unwrap_or(body);
    Some(body.strip_suffix(']').unwrap_or(body))
}

// ============================================================================
// Service messages
// ============================================================================

/// Unescaped attributes of one message plus the decode failures seen so far.
struct Attributes {
    entries: Vec<(String, String)>,
    errors: Vec<ProtocolError>,
}

impl Attributes {
    fn take(&mut self, key: &str) -> Option<String> {
        let index = self.entries.iter().position(|(k, _)| k == key)?;
        Some(self.entries.remove(index).1)
    }

    /// Integer attribute. Fractional values are rounded; anything else is recorded as an error.
    fn number(&mut self, key: &str) -> Option<u64> {
        let value = self.take(key)?;
        let trimmed = value.trim();
        if let Ok(n) = trimmed.parse::<u64>() {
            return Some(n);
        }
        match trimmed.parse::<f64>() {
            Ok(f) if f.is_finite() && f >= 0.0 => Some(f.round() as u64),
            _ => {
                self.errors.push(ProtocolError::InvalidNumber {
                    key: key.to_string(),
                    value,
                });
                None
            }
        }
    }

    fn location(&mut self) -> Location {
        let Some(hint) = self.take("locationHint") else {
            return Location::default();
        };
        match parse_location_hint(&hint) {
            Ok((file, id)) => Location {
                hint: Some(hint),
                id: Some(id),
                file: Some(file),
            },
            Err(err) => {
                self.errors.push(err);
                Location {
                    hint: Some(hint),
                    ..Location::default()
                }
            }
        }
    }

    fn node(&mut self) -> TestNode {
        let name = self.take("name").unwrap_or_default();
        let location = self.location();
        let duration = self.number("duration");
        let flow_id = self.take("flowId");
        TestNode {
            name,
            location,
            duration,
            flow_id,
            decode_errors: Vec::new(),
        }
    }

    fn finish(mut self, mut node: TestNode) -> TestNode {
        node.decode_errors.append(&mut self.errors);
        node
    }
}

fn parse_service_message(body: &str) -> TestResult {
    let mut tokens = argv::split_escaped(body, '|').into_iter();
    let name = tokens.next().unwrap_or_default();
    let synthetic = std::iter::once(format!("--event={name}")).chain(
        tokens
            .filter(|token| !token.is_empty())
            .map(|token| format!("--{token}")),
    );
    let mut parsed = argv::parse_tokens(synthetic, &[]);
    parsed.remove("event");

    let entries = parsed
        .options
        .into_iter()
        .map(|(key, value)| {
            let raw = match value {
                OptionValue::Flag => String::new(),
                other => other.last().unwrap_or_default().to_string(),
            };
            (key, escape::unescape(&raw))
        })
        .collect();
    let mut attributes = Attributes {
        entries,
        errors: Vec::new(),
    };

    let result = match name.as_str() {
        "testCount" => {
            let count = attributes.number("count").unwrap_or_default();
            let flow_id = attributes.take("flowId");
            TestResult::TestCount(TestCount {
                count,
                flow_id,
                decode_errors: attributes.errors,
            })
        }
        "testSuiteStarted" => node_event(attributes, TestResult::TestSuiteStarted),
        "testSuiteFinished" => node_event(attributes, TestResult::TestSuiteFinished),
        "testStarted" => node_event(attributes, TestResult::TestStarted),
        "testFinished" => node_event(attributes, TestResult::TestFinished),
        "testFailed" => TestResult::TestFailed(problem(attributes)),
        "testIgnored" => TestResult::TestIgnored(problem(attributes)),
        _ => TestResult::Unknown(UnknownMessage {
            name,
            attributes: attributes.entries,
        }),
    };

    for err in decode_errors(&result) {
        tracing::debug!(event = %result.kind(), error = %err, "service message field failed to decode");
    }
    result
}

fn decode_errors(result: &TestResult) -> &[ProtocolError] {
    if let TestResult::TestCount(count) = result {
        return &count.decode_errors;
    }
    match result.node() {
        Some(node) => &node.decode_errors,
        None => &[],
    }
}

fn node_event(mut attributes: Attributes, wrap: fn(TestNode) -> TestResult) -> TestResult {
    let node = attributes.node();
    wrap(attributes.finish(node))
}

fn problem(mut attributes: Attributes) -> TestProblem {
    let node = attributes.node();
    let (message, mut details) = split_message(&attributes.take("message").unwrap_or_default());
    if let Some(raw) = attributes.take("details") {
        let (frames, mut errors) = parse_details(&raw);
        attributes.errors.append(&mut errors);
        let from_message = details.len();
        for frame in frames {
            if !details[..from_message].contains(&frame) {
                details.push(frame);
            }
        }
    }
    let actual = attributes.take("actual");
    let expected = attributes.take("expected");
    TestProblem {
        node: attributes.finish(node),
        message,
        details,
        actual,
        expected,
    }
}

/// Move the `file:line` frames PHPUnit appends to a failure message out of it.
///
/// Only trailing lines are considered, and only when they name a path. The remaining text is trimmed.
pub fn split_message(message: &str) -> (String, Vec<Detail>) {
    let mut lines: Vec<&str> = message.lines().collect();
    let mut frames = Vec::new();
    while let Some(last) = lines.last().copied().map(str::trim) {
        if last.is_empty() {
            lines.pop();
            continue;
        }
        match parse_detail(last).filter(|detail| detail.file.contains(['/', '\\'])) {
            Some(detail) => {
                frames.push(detail);
                lines.pop();
            }
            None => break,
        }
    }
    frames.reverse();
    (lines.join("\n").trim().to_string(), frames)
}

/// Split `php_qn://<file>::\<class>::<method>` into `(file, id)`.
///
/// The id is everything after the first `::`, re-joined with `::`; it is empty for a bare file hint.
pub fn parse_location_hint(hint: &str) -> Result<(String, String), ProtocolError> {
    let stripped = hint.strip_prefix(LOCATION_SCHEME).unwrap_or(hint).replace("::\\", "::");
    let mut parts = stripped.split("::");
    let file = parts.next().unwrap_or_default();
    if file.trim().is_empty() {
        return Err(ProtocolError::MalformedLocationHint { hint: hint.to_string() });
    }
    let id = parts.collect::<Vec<_>>().join("::");
    Ok((file.to_string(), id))
}

/// Parse a `details` block into `file:line` frames, skipping blank lines.
///
/// A line without a trailing `:<number>` is reported and skipped; the other frames are kept.
pub fn parse_details(raw: &str) -> (Vec<Detail>, Vec<ProtocolError>) {
    let mut details = Vec::new();
    let mut errors = Vec::new();
    for line in raw.trim().lines().map(str::trim).filter(|line| !line.is_empty()) {
        match parse_detail(line) {
            Some(detail) => details.push(detail),
            None => errors.push(ProtocolError::MalformedDetail { line: line.to_string() }),
        }
    }
    (details, errors)
}

fn parse_detail(line: &str) -> Option<Detail> {
    let (file, number) = line.rsplit_once(':')?;
    if number.is_empty() || !number.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    let line = number.parse().ok()?;
    let file = file.strip_prefix(VFS_SCHEME).unwrap_or(file);
    if file.is_empty() {
        return None;
    }
    Some(Detail {
        file: file.to_string(),
        line,
    })
}

// ============================================================================
// Plain-text lines
// ============================================================================

/// `Time: 00:00.049, Memory: 6.00 MB` anywhere in the line.
fn parse_time_and_memory(line: &str) -> Option<TimeAndMemory> {
    let start = line.find("Time: ")? + "Time: ".len();
    let rest = &line[start..];
    let time_len = leading_len(rest, |c| c.is_ascii_digit() || matches!(c, '+' | ':' | '.'));
    if time_len == 0 {
        return None;
    }
    let time = &rest[..time_len];

    let rest = rest[time_len..].strip_prefix(", Memory: ")?;
    let amount_len = leading_len(rest, |c| c.is_ascii_digit() || c == '.');
    if amount_len == 0 {
        return None;
    }
    let mut after = rest[amount_len..].chars();
    let space = after.next().filter(|c| c.is_whitespace())?;
    let unit_len = leading_len(after.as_str(), |c| c.is_alphanumeric() || c == '_');
    if unit_len == 0 {
        return None;
    }
    let memory = &rest[..amount_len + space.len_utf8() + unit_len];

    Some(TimeAndMemory {
        time: time.to_string(),
        memory: memory.to_string(),
    })
}

fn leading_len(input: &str, accept: impl Fn(char) -> bool) -> usize {
    input.find(|c: char| !accept(c)).unwrap_or(input.len())
}

fn parse_banner(line: &str) -> Option<TestResult> {
    let text = line.trim();

    if let Some(rest) = text.strip_prefix("PHPUnit ") {
        let version_len = leading_len(rest, |c| c.is_ascii_digit() || c == '.');
        if version_len > 0 {
            return Some(TestResult::TestVersion(VersionInfo {
                phpunit: rest[..version_len].to_string(),
                text: text.to_string(),
            }));
        }
    }
    if let Some(runtime) = non_empty(text.strip_prefix("Runtime:")) {
        return Some(TestResult::TestRuntime(RuntimeInfo {
            runtime: runtime.to_string(),
            text: text.to_string(),
        }));
    }
    if let Some(path) = non_empty(text.strip_prefix("Configuration:")) {
        return Some(TestResult::TestConfiguration(ConfigurationInfo {
            path: path.to_string(),
            text: text.to_string(),
        }));
    }
    parse_result_summary(text).map(TestResult::TestResultSummary)
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

/// `OK (3 tests, 5 assertions)` or `Tests: 3, Assertions: 5, Failures: 1.`
fn parse_result_summary(text: &str) -> Option<ResultSummary> {
    let counters = if let Some(inner) = text.strip_prefix("OK (") {
        inner.strip_suffix(')')?
    } else if text.starts_with("Tests: ") {
        text.trim_end_matches('.')
    } else {
        return None;
    };

    let mut summary = ResultSummary {
        text: text.to_string(),
        ..ResultSummary::default()
    };
    for part in counters.split(',').map(str::trim) {
        let (word, count) = match part.split_once(':') {
            Some((word, count)) => (word.trim(), count.trim()),
            None => match part.split_once(' ') {
                Some((count, word)) => (word.trim(), count.trim()),
                None => continue,
            },
        };
        let Ok(count) = count.parse::<u64>() else {
            continue;
        };
        let slot = match word.to_ascii_lowercase().as_str() {
            "test" | "tests" => &mut summary.tests,
            "assertion" | "assertions" => &mut summary.assertions,
            "error" | "errors" => &mut summary.errors,
            "failure" | "failures" => &mut summary.failures,
            "warning" | "warnings" => &mut summary.warnings,
            "skipped" => &mut summary.skipped,
            "incomplete" => &mut summary.incomplete,
            "risky" => &mut summary.risky,
            _ => continue,
        };
        *slot = Some(count);
    }
    Some(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventKind;

    const HINT: &str = r"php_qn:///app/tests/AssertionsTest.php::\Recca0120\VSCode\Tests\AssertionsTest";

    #[test]
    fn test_parses_test_count() {
        let result = parse("##teamcity[testCount count='1' flowId='8024']").unwrap();
        assert_eq!(
            result,
            TestResult::TestCount(TestCount {
                count: 1,
                flow_id: Some("8024".into()),
                decode_errors: vec![],
            })
        );
    }

    #[test]
    fn test_parses_suite_started_with_location() {
        let line = format!(
            r"##teamcity[testSuiteStarted name='Recca0120\VSCode\Tests\AssertionsTest' locationHint='{HINT}' flowId='8024']"
        );
        let result = parse(&line).unwrap();
        assert_eq!(result.kind(), EventKind::TestSuiteStarted);
        assert_eq!(result.id(), Some(r"Recca0120\VSCode\Tests\AssertionsTest"));
        assert_eq!(result.file(), Some("/app/tests/AssertionsTest.php"));
        assert_eq!(result.flow_id(), Some("8024"));
    }

    #[test]
    fn test_parses_test_started_id_with_method() {
        let line = format!("##teamcity[testStarted name='test_passed' locationHint='{HINT}::test_passed' flowId='1']");
        let result = parse(&line).unwrap();
        assert_eq!(result.kind(), EventKind::TestStarted);
        assert_eq!(result.id(), Some(r"Recca0120\VSCode\Tests\AssertionsTest::test_passed"));
        assert_eq!(result.node().unwrap().name, "test_passed");
    }

    #[test]
    fn test_parses_test_failed_message_and_details() {
        let line = "##teamcity[testFailed name='test_failed' message='Failed asserting that false is true.|n|n/app/tests/T.php:5|n' details=' /app/tests/T.php:22|n phpvfscomposer:///app/vendor/phpunit/phpunit/phpunit:60 ' duration='0' flowId='8024']";
        let TestResult::TestFailed(problem) = parse(line).unwrap() else {
            panic!("expected testFailed");
        };
        assert_eq!(problem.message, "Failed asserting that false is true.");
        assert_eq!(
            problem.details,
            vec![
                Detail { file: "/app/tests/T.php".into(), line: 5 },
                Detail { file: "/app/tests/T.php".into(), line: 22 },
                Detail { file: "/app/vendor/phpunit/phpunit/phpunit".into(), line: 60 },
            ]
        );
        assert_eq!(problem.node.duration, Some(0));
        assert!(problem.node.decode_errors.is_empty());
    }

    #[test]
    fn test_comparison_failure_keeps_actual_and_expected() {
        let line = "##teamcity[testFailed type='comparisonFailure' name='t' message='m' details='' actual='|'foo|'' expected='|'bar|'' flowId='1']";
        let TestResult::TestFailed(problem) = parse(line).unwrap() else {
            panic!("expected testFailed");
        };
        assert_eq!(problem.actual.as_deref(), Some("'foo'"));
        assert_eq!(problem.expected.as_deref(), Some("'bar'"));
        assert!(problem.details.is_empty());
    }

    #[test]
    fn test_parses_test_ignored() {
        let line = "##teamcity[testIgnored name='test_skipped' message='The MySQLi extension is not available.' details='' duration='0' flowId='1']";
        let result = parse(line).unwrap();
        assert_eq!(result.kind(), EventKind::TestIgnored);
    }

    #[test]
    fn test_malformed_detail_is_field_local() {
        let line = "##teamcity[testFailed name='t' message='boom' details='no line number here|n/app/T.php:7' flowId='1']";
        let TestResult::TestFailed(problem) = parse(line).unwrap() else {
            panic!("expected testFailed");
        };
        assert_eq!(problem.message, "boom");
        assert_eq!(problem.details, vec![Detail { file: "/app/T.php".into(), line: 7 }]);
        assert_eq!(
            problem.node.decode_errors,
            vec![ProtocolError::MalformedDetail {
                line: "no line number here".into()
            }]
        );
    }

    #[test]
    fn test_malformed_location_hint_is_field_local() {
        let result = parse("##teamcity[testStarted name='t' locationHint='php_qn://::\\Foo' flowId='1']").unwrap();
        assert_eq!(result.kind(), EventKind::TestStarted);
        assert_eq!(result.id(), None);
        assert_eq!(result.file(), None);
        assert_eq!(result.node().unwrap().decode_errors.len(), 1);
    }

    #[test]
    fn test_invalid_number_is_recorded() {
        let result = parse("##teamcity[testFinished name='t' duration='soon' flowId='1']").unwrap();
        let node = result.node().unwrap();
        assert_eq!(node.duration, None);
        assert_eq!(
            node.decode_errors,
            vec![ProtocolError::InvalidNumber {
                key: "duration".into(),
                value: "soon".into()
            }]
        );
    }

    #[test]
    fn test_unknown_message_keeps_attributes() {
        let result = parse("##teamcity[customEvent foo='a|]b']").unwrap();
        assert_eq!(
            result,
            TestResult::Unknown(UnknownMessage {
                name: "customEvent".into(),
                attributes: vec![("foo".into(), "a]b".into())],
            })
        );
    }

    #[test]
    fn test_escaped_quotes_do_not_end_values() {
        let result = parse("##teamcity[testFailed name='t' message='it|'s |[broken|]' flowId='1']").unwrap();
        let TestResult::TestFailed(problem) = result else {
            panic!("expected testFailed");
        };
        assert_eq!(problem.message, "it's [broken]");
    }

    #[test]
    fn test_message_frames_move_to_details() {
        let line = "##teamcity[testFailed name='test_failed' message='Failed asserting that false is true.|n|n/app/tests/T.php:5|n' details=' /app/tests/T.php:22|n ' duration='0' flowId='8024']";
        let TestResult::TestFailed(problem) = parse(line).unwrap() else {
            panic!("expected testFailed");
        };
        assert_eq!(problem.message, "Failed asserting that false is true.");
        assert_eq!(
            problem.details,
            vec![
                Detail { file: "/app/tests/T.php".into(), line: 5 },
                Detail { file: "/app/tests/T.php".into(), line: 22 },
            ]
        );
    }

    #[test]
    fn test_message_frame_already_in_details_is_not_repeated() {
        let line = "##teamcity[testFailed name='t' message='boom|n/app/T.php:7' details='/app/T.php:7|n/app/T.php:30' flowId='1']";
        let TestResult::TestFailed(problem) = parse(line).unwrap() else {
            panic!("expected testFailed");
        };
        assert_eq!(problem.message, "boom");
        assert_eq!(
            problem.details,
            vec![
                Detail { file: "/app/T.php".into(), line: 7 },
                Detail { file: "/app/T.php".into(), line: 30 },
            ]
        );
    }

    #[test]
    fn test_split_message_keeps_text_that_is_not_a_frame() {
        assert_eq!(split_message("Timeout: 5"), ("Timeout: 5".to_string(), vec![]));
        assert_eq!(split_message("retries:3"), ("retries:3".to_string(), vec![]));
        let (message, frames) = split_message("/app/T.php:4 failed here\n/app/T.php:9");
        assert_eq!(message, "/app/T.php:4 failed here");
        assert_eq!(frames, vec![Detail { file: "/app/T.php".into(), line: 9 }]);
    }

    #[test]
    fn test_empty_attribute_token_does_not_swallow_later_attributes() {
        let result = parse("##teamcity[testStarted '' name='x' flowId='1']").unwrap();
        let node = result.node().unwrap();
        assert_eq!(node.name, "x");
        assert_eq!(node.flow_id.as_deref(), Some("1"));
    }

    #[test]
    fn test_leading_whitespace_and_extra_hashes_are_accepted() {
        assert_eq!(parse("   ###teamcity[testCount count='2']").map(|r| r.kind()), Some(EventKind::TestCount));
        assert_eq!(parse("teamcity[testCount count='2']"), None);
    }

    #[test]
    fn test_parses_time_and_memory() {
        assert_eq!(
            parse("Time: 00:00.049, Memory: 6.00 MB"),
            Some(TestResult::TimeAndMemory(TimeAndMemory {
                time: "00:00.049".into(),
                memory: "6.00 MB".into(),
            }))
        );
    }

    #[test]
    fn test_parses_banner_lines() {
        let TestResult::TestVersion(version) = parse("PHPUnit 9.5.26 by Sebastian Bergmann and contributors.").unwrap()
        else {
            panic!("expected testVersion");
        };
        assert_eq!(version.phpunit, "9.5.26");

        let TestResult::TestRuntime(runtime) = parse("Runtime:       PHP 8.1.12").unwrap() else {
            panic!("expected testRuntime");
        };
        assert_eq!(runtime.runtime, "PHP 8.1.12");

        let TestResult::TestConfiguration(config) = parse("Configuration: /app/phpunit.xml").unwrap() else {
            panic!("expected testConfiguration");
        };
        assert_eq!(config.path, "/app/phpunit.xml");
    }

    #[test]
    fn test_parses_result_summaries() {
        let TestResult::TestResultSummary(ok) = parse("OK (1 test, 1 assertion)").unwrap() else {
            panic!("expected summary");
        };
        assert_eq!((ok.tests, ok.assertions, ok.failures), (Some(1), Some(1), None));

        let TestResult::TestResultSummary(failed) = parse("Tests: 3, Assertions: 4, Failures: 1, Skipped: 1.").unwrap()
        else {
            panic!("expected summary");
        };
        assert_eq!(failed.tests, Some(3));
        assert_eq!(failed.assertions, Some(4));
        assert_eq!(failed.failures, Some(1));
        assert_eq!(failed.skipped, Some(1));
    }

    #[test]
    fn test_noise_is_unrecognized() {
        assert_eq!(parse(""), None);
        assert_eq!(parse("...F.  5 / 5 (100%)"), None);
        assert_eq!(parse("Time: soon"), None);
    }
}
