//! Typed events decoded from PHPUnit output.
//!
//! [`TestResult`] is the single tagged union handed to callers. It serializes with an `event` tag whose values match
//! the TeamCity message names (`testStarted`, `testFailed`, ...), plus the extra plain-text kinds (`timeAndMemory`,
//! `testVersion`, ...).

use std::fmt;

use serde::{Serialize, Serializer};

use crate::errors::ProtocolError;

/// Scheme prefix PHPUnit puts on location hints.
pub const LOCATION_SCHEME: &str = "php_qn://";

/// Kind tag of a [`TestResult`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    TestVersion,
    TestRuntime,
    TestConfiguration,
    TestCount,
    TestSuiteStarted,
    TestSuiteFinished,
    TestStarted,
    TestFailed,
    TestIgnored,
    TestFinished,
    TimeAndMemory,
    TestResultSummary,
    Unknown,
}

impl EventKind {
    pub fn as_str(self) -> &'static str {
        match self {
            EventKind::TestVersion => "testVersion",
            EventKind::TestRuntime => "testRuntime",
            EventKind::TestConfiguration => "testConfiguration",
            EventKind::TestCount => "testCount",
            EventKind::TestSuiteStarted => "testSuiteStarted",
            EventKind::TestSuiteFinished => "testSuiteFinished",
            EventKind::TestStarted => "testStarted",
            EventKind::TestFailed => "testFailed",
            EventKind::TestIgnored => "testIgnored",
            EventKind::TestFinished => "testFinished",
            EventKind::TimeAndMemory => "timeAndMemory",
            EventKind::TestResultSummary => "testResultSummary",
            EventKind::Unknown => "unknown",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A decoded output line.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "camelCase")]
pub enum TestResult {
    TestVersion(VersionInfo),
    TestRuntime(RuntimeInfo),
    TestConfiguration(ConfigurationInfo),
    TestCount(TestCount),
    TestSuiteStarted(TestNode),
    TestSuiteFinished(TestNode),
    TestStarted(TestNode),
    TestFailed(TestProblem),
    TestIgnored(TestProblem),
    TestFinished(TestNode),
    TimeAndMemory(TimeAndMemory),
    TestResultSummary(ResultSummary),
    Unknown(UnknownMessage),
}

impl TestResult {
    pub fn kind(&self) -> EventKind {
        match self {
            TestResult::TestVersion(_) => EventKind::TestVersion,
            TestResult::TestRuntime(_) => EventKind::TestRuntime,
            TestResult::TestConfiguration(_) => EventKind::TestConfiguration,
            TestResult::TestCount(_) => EventKind::TestCount,
            TestResult::TestSuiteStarted(_) => EventKind::TestSuiteStarted,
            TestResult::TestSuiteFinished(_) => EventKind::TestSuiteFinished,
            TestResult::TestStarted(_) => EventKind::TestStarted,
            TestResult::TestFailed(_) => EventKind::TestFailed,
            TestResult::TestIgnored(_) => EventKind::TestIgnored,
            TestResult::TestFinished(_) => EventKind::TestFinished,
            TestResult::TimeAndMemory(_) => EventKind::TimeAndMemory,
            TestResult::TestResultSummary(_) => EventKind::TestResultSummary,
            TestResult::Unknown(_) => EventKind::Unknown,
        }
    }

    /// The test node for lifecycle messages.
    pub fn node(&self) -> Option<&TestNode> {
        match self {
            TestResult::TestSuiteStarted(node)
            | TestResult::TestSuiteFinished(node)
            | TestResult::TestStarted(node)
            | TestResult::TestFinished(node) => Some(node),
            TestResult::TestFailed(problem) | TestResult::TestIgnored(problem) => Some(&problem.node),
            _ => None,
        }
    }

    fn node_mut(&mut self) -> Option<&mut TestNode> {
        match self {
            TestResult::TestSuiteStarted(node)
            | TestResult::TestSuiteFinished(node)
            | TestResult::TestStarted(node)
            | TestResult::TestFinished(node) => Some(node),
            TestResult::TestFailed(problem) | TestResult::TestIgnored(problem) => Some(&mut problem.node),
            _ => None,
        }
    }

    /// Fully-qualified test identifier derived from the location hint.
    pub fn id(&self) -> Option<&str> {
        self.node().and_then(|node| node.location.id.as_deref())
    }

    /// Source file derived from the location hint.
    pub fn file(&self) -> Option<&str> {
        self.node().and_then(|node| node.location.file.as_deref())
    }

    pub fn flow_id(&self) -> Option<&str> {
        match self {
            TestResult::TestCount(count) => count.flow_id.as_deref(),
            _ => self.node().and_then(|node| node.flow_id.as_deref()),
        }
    }

    /// Rewrite every location-bearing field with `map`.
    ///
    /// Covers the location hint (scheme preserved), the derived file, each detail file (lines untouched), and the
    /// configuration path.
    pub fn map_paths<F>(mut self, map: F) -> Self
    where
        F: Fn(&str) -> String,
    {
        if let TestResult::TestConfiguration(info) = &mut self {
            info.path = map(&info.path);
        }
        if let TestResult::TestFailed(problem) | TestResult::TestIgnored(problem) = &mut self {
            for detail in &mut problem.details {
                detail.file = map(&detail.file);
            }
        }
        if let Some(node) = self.node_mut() {
            let location = &mut node.location;
            if let Some(hint) = location.hint.as_mut() {
                *hint = match hint.strip_prefix(LOCATION_SCHEME) {
                    Some(rest) => format!("{LOCATION_SCHEME}{}", map(rest)),
                    None => map(hint),
                };
            }
            if let Some(file) = location.file.as_mut() {
                *file = map(file);
            }
        }
        self
    }
}

/// Location hint and the fields derived from it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Location {
    #[serde(rename = "locationHint", skip_serializing_if = "Option::is_none")]
    pub hint: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
}

/// Common shape of suite/test lifecycle messages.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TestNode {
    pub name: String,
    #[serde(flatten)]
    pub location: Location,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none", serialize_with = "serialize_flow_id")]
    pub flow_id: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub decode_errors: Vec<ProtocolError>,
}

/// `testFailed` / `testIgnored` payload.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TestProblem {
    #[serde(flatten)]
    pub node: TestNode,
    pub message: String,
    pub details: Vec<Detail>,
    /// Set for comparison failures (`type='comparisonFailure'`).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub actual: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expected: Option<String>,
}

/// One stack frame of a failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Detail {
    pub file: String,
    pub line: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TestCount {
    pub count: u64,
    #[serde(skip_serializing_if = "Option::is_none", serialize_with = "serialize_flow_id")]
    pub flow_id: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub decode_errors: Vec<ProtocolError>,
}

/// Flow ids are PHPUnit process ids, written as JSON numbers when they parse as one. Other ids stay strings.
fn serialize_flow_id<S: Serializer>(flow_id: &Option<String>, serializer: S) -> Result<S::Ok, S::Error> {
    match flow_id.as_deref() {
        Some(id) => match id.parse::<u64>() {
            Ok(number) => serializer.serialize_u64(number),
            Err(_) => serializer.serialize_str(id),
        },
        None => serializer.serialize_none(),
    }
}

/// Service message with an event name this crate does not model.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct UnknownMessage {
    pub name: String,
    pub attributes: Vec<(String, String)>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TimeAndMemory {
    pub time: String,
    pub memory: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VersionInfo {
    pub phpunit: String,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RuntimeInfo {
    pub runtime: String,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConfigurationInfo {
    pub path: String,
    pub text: String,
}

/// Final `OK (...)` / `Tests: ...` line. Counters absent from the line stay `None`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResultSummary {
    pub text: String,
    pub tests: Option<u64>,
    pub assertions: Option<u64>,
    pub errors: Option<u64>,
    pub failures: Option<u64>,
    pub warnings: Option<u64>,
    pub skipped: Option<u64>,
    pub incomplete: Option<u64>,
    pub risky: Option<u64>,
}
