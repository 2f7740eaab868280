//! Invocation builder
//!
//! Builds the exact `{ command, arguments, options }` handed to the process spawner:
//!
//! ```text
//! [wrapper tokens...] <php> <phpunit> [positionals...] [--option=value...] --colors=never --teamcity [-f]
//! ```
//!
//! - Wrapper tokens come from the configured `command`, shell-tokenized, with placeholders expanded.
//! - The interpreter, the PHPUnit path and every derived argument except `--filter...` are translated to remote paths.
//! - User copies of reserved options (`--teamcity`, `--colors`, `--testdox`, `-c`) are dropped; the canonical flags are
//!   always appended last.
//! - ParaTest cannot apply a method filter in its default mode, so `-f` (functional mode) is appended when the runner
//!   is ParaTest and a filter is present.
//!
//! The [`Strategy::Remote`] variant flattens everything after the wrapper into a single argument, quoting flag tokens,
//! because the wrapper hands it to an intermediate shell.

use std::fmt;
use std::path::PathBuf;

use phpunit_protocol::TestResult;
use phpunit_protocol::argv;
use serde::Serialize;

use crate::config::{ConfigValue, Configuration, ConfigurationSource, PathMapping};
use crate::paths::PathReplacer;

/// Always appended, in this order.
pub const TRAILING_FLAGS: [&str; 2] = ["--colors=never", "--teamcity"];

/// Filter expressions are regular expressions, never paths.
const FILTER_PREFIX: &str = "--filter";

const PARATEST_PATTERN: &str = "paratest";
const PARATEST_FUNCTIONAL_FLAG: &str = "-f";

/// How the invocation reaches PHPUnit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum Strategy {
    /// Spawn PHPUnit directly; every token is its own argument.
    #[default]
    Local,
    /// Spawn a wrapper (e.g. `docker exec`) that receives the PHPUnit command line as one argument.
    Remote,
}

/// Process options passed through to the spawner.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SpawnOptions {
    pub cwd: PathBuf,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub env: Vec<(String, String)>,
}

impl SpawnOptions {
    pub fn new(cwd: impl Into<PathBuf>) -> Self {
        Self {
            cwd: cwd.into(),
            env: Vec::new(),
        }
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }
}

/// A fully built process invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Invocation {
    pub command: String,
    pub arguments: Vec<String>,
    pub options: SpawnOptions,
}

impl fmt::Display for Invocation {
    /// Shell-style rendering; tokens with whitespace or quotes are single-quoted.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", shell_quote(&self.command))?;
        for argument in &self.arguments {
            write!(f, " {}", shell_quote(argument))?;
        }
        Ok(())
    }
}

/// Builds invocations for one run request and maps results back to local paths.
#[derive(Debug, Clone)]
pub struct Command {
    configuration: Configuration,
    options: SpawnOptions,
    arguments: String,
    replacer: PathReplacer,
    strategy: Strategy,
}

impl Command {
    pub fn new(strategy: Strategy, configuration: Configuration, options: SpawnOptions) -> Self {
        let workspace_folder = match configuration.get("workspaceFolder") {
            Some(ConfigValue::Text(folder)) => Some(folder.to_string()),
            _ => None,
        };
        let paths: &[PathMapping] = match configuration.get("paths") {
            Some(ConfigValue::Paths(paths)) => paths,
            _ => &[],
        };
        let replacer = PathReplacer::new(options.cwd.to_string_lossy(), workspace_folder, paths);
        Self {
            configuration,
            options,
            arguments: String::new(),
            replacer,
            strategy,
        }
    }

    pub fn local(configuration: Configuration, options: SpawnOptions) -> Self {
        Self::new(Strategy::Local, configuration, options)
    }

    pub fn remote(configuration: Configuration, options: SpawnOptions) -> Self {
        Self::new(Strategy::Remote, configuration, options)
    }

    /// Set the caller's argument string (files, `--filter`, other PHPUnit options).
    pub fn with_arguments(mut self, arguments: impl AsRef<str>) -> Self {
        self.set_arguments(arguments);
        self
    }

    pub fn set_arguments(&mut self, arguments: impl AsRef<str>) {
        self.arguments = arguments.as_ref().trim().to_string();
    }

    pub fn strategy(&self) -> Strategy {
        self.strategy
    }

    /// Build the invocation.
    #[tracing::instrument(skip_all, fields(strategy = ?self.strategy))]
    pub fn apply(&self) -> Invocation {
        let mut tokens = self
            .prefix()
            .into_iter()
            .chain(self.executable())
            .map(|token| self.replacer.replace_path_variables(&token).trim().to_string())
            .filter(|token| !token.is_empty());

        let command = tokens.next().unwrap_or_default();
        let invocation = Invocation {
            command,
            arguments: tokens.collect(),
            options: self.options.clone(),
        };
        tracing::debug!(invocation = %invocation, "built invocation");
        invocation
    }

    /// Rewrite a result's location-bearing fields from remote to local paths.
    pub fn replace_path(&self, result: TestResult) -> TestResult {
        result.map_paths(|path| self.replacer.to_local(path))
    }

    fn setting(&self, key: &str) -> &str {
        match self.configuration.get(key) {
            Some(ConfigValue::Text(value)) => value,
            _ => "",
        }
    }

    fn setting_list(&self, key: &str) -> &[String] {
        match self.configuration.get(key) {
            Some(ConfigValue::List(values)) => values,
            _ => &[],
        }
    }

    fn prefix(&self) -> Vec<String> {
        argv::split(self.setting("command"))
    }

    fn php(&self) -> String {
        self.replacer.to_remote(self.setting("php"))
    }

    fn phpunit(&self) -> String {
        self.replacer.to_remote(self.setting("phpunit"))
    }

    fn executable(&self) -> Vec<String> {
        let mut tokens = vec![self.php(), self.phpunit()];
        tokens.extend(self.arguments());
        if self.is_paratest_functional(&tokens) {
            tokens.push(PARATEST_FUNCTIONAL_FLAG.to_string());
        }

        match self.strategy {
            Strategy::Local => tokens,
            Strategy::Remote => vec![flatten_for_shell(&tokens)],
        }
    }

    fn arguments(&self) -> Vec<String> {
        let mut parsed = self.configuration.arguments(&self.arguments);
        for reserved in self.setting_list("reservedOptions") {
            parsed.remove(reserved);
        }

        let positionals = parsed.positionals.iter().map(|positional| decode_positional(positional));
        let options = parsed.options.iter().flat_map(|(key, value)| value.to_tokens(key));

        positionals
            .chain(options)
            .map(|token| {
                if token.starts_with(FILTER_PREFIX) {
                    token
                } else {
                    self.translate_token(&token)
                }
            })
            .chain(TRAILING_FLAGS.iter().map(|flag| flag.to_string()))
            .collect()
    }

    /// Translate a path token, or the value of an `--option=value` token.
    fn translate_token(&self, token: &str) -> String {
        if !token.starts_with('-') {
            return self.replacer.to_remote(token);
        }
        match token.split_once('=') {
            Some((key, value)) => format!("{key}={}", self.replacer.to_remote(value)),
            None => token.to_string(),
        }
    }

    fn is_paratest_functional(&self, tokens: &[String]) -> bool {
        self.phpunit().contains(PARATEST_PATTERN) && tokens.iter().any(|token| token.contains(FILTER_PREFIX))
    }
}

/// Positionals may arrive percent-encoded; undecodable input is kept verbatim.
fn decode_positional(value: &str) -> String {
    urlencoding::decode(value).map_or_else(|_| value.to_string(), |decoded| decoded.into_owned())
}

/// Join tokens into one shell command line, quoting flags and anything with whitespace.
fn flatten_for_shell(tokens: &[String]) -> String {
    tokens
        .iter()
        .map(|token| token.trim())
        .filter(|token| !token.is_empty())
        .map(|token| {
            if token.starts_with('-') || token.contains(char::is_whitespace) {
                single_quote(token)
            } else {
                token.to_string()
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

fn single_quote(token: &str) -> String {
    format!("'{}'", token.replace('\'', r"'\''"))
}

fn shell_quote(token: &str) -> String {
    if token.is_empty() || token.contains(|c: char| c.is_whitespace() || c == '\'' || c == '"') {
        single_quote(token)
    } else {
        token.to_string()
    }
}
