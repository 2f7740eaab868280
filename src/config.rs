//! Run configuration
//!
//! Read-only settings consumed when building an invocation: interpreter and PHPUnit paths, an optional wrapper command
//! (e.g. `docker run ...`), the ordered local → remote path map, and extra arguments appended after the caller's.
//!
//! Loaded from JSON. Every key is optional:
//!
//! ```json
//! {
//!   "php": "php",
//!   "phpunit": "vendor/bin/phpunit",
//!   "command": "docker run -i --rm -v ${PWD}:/app -w /app project-stub-phpunit",
//!   "paths": { "${PWD}": "/app" },
//!   "args": ["-c", "${PWD}/phpunit.xml"]
//! }
//! ```

use std::fs;
use std::path::Path;

use phpunit_protocol::ParsedArguments;
use phpunit_protocol::argv;
use serde::de::Error as _;
use serde::{Deserialize, Deserializer};
use thiserror::Error;

/// Options the command builder always supplies itself; user copies are dropped.
pub const DEFAULT_RESERVED_OPTIONS: [&str; 4] = ["teamcity", "colors", "testdox", "c"];

/// Short option → canonical long option. `-c` is PHPUnit's `--configuration`.
pub const OPTION_ALIASES: &[(&str, &str)] = &[("c", "configuration")];

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read configuration file '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid configuration: {0}")]
    Json(#[from] serde_json::Error),
}

/// One `local prefix → remote prefix` entry. Order in [`Configuration::paths`] decides precedence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathMapping {
    pub local: String,
    pub remote: String,
}

impl PathMapping {
    pub fn new(local: impl Into<String>, remote: impl Into<String>) -> Self {
        Self {
            local: local.into(),
            remote: remote.into(),
        }
    }
}

/// A configuration value as seen through [`Configuration::get`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigValue<'a> {
    Text(&'a str),
    List(&'a [String]),
    Paths(&'a [PathMapping]),
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Configuration {
    /// Interpreter path
    pub php: String,
    /// PHPUnit (or ParaTest) executable path
    pub phpunit: String,
    /// Wrapper command spliced in front of the interpreter
    pub command: String,
    #[serde(deserialize_with = "deserialize_paths")]
    pub paths: Vec<PathMapping>,
    /// Extra argument tokens appended after the caller's arguments
    pub args: Vec<String>,
    pub reserved_options: Vec<String>,
    /// Value of `${workspaceFolder}`; defaults to the working directory
    pub workspace_folder: Option<String>,
}

impl Default for Configuration {
    fn default() -> Self {
        Self {
            php: "php".to_string(),
            phpunit: "vendor/bin/phpunit".to_string(),
            command: String::new(),
            paths: Vec::new(),
            args: Vec::new(),
            reserved_options: DEFAULT_RESERVED_OPTIONS.iter().map(|s| s.to_string()).collect(),
            workspace_folder: None,
        }
    }
}

impl Configuration {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_json_str(source: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(source)?)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let source = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let configuration = Self::from_json_str(&source)?;
        tracing::debug!(path = %path.display(), mappings = configuration.paths.len(), "loaded configuration");
        Ok(configuration)
    }

    pub fn with_php(mut self, php: impl Into<String>) -> Self {
        self.php = php.into();
        self
    }

    pub fn with_phpunit(mut self, phpunit: impl Into<String>) -> Self {
        self.phpunit = phpunit.into();
        self
    }

    pub fn with_command(mut self, command: impl Into<String>) -> Self {
        self.command = command.into();
        self
    }

    /// Append a path mapping (lower precedence than existing ones).
    pub fn with_path(mut self, local: impl Into<String>, remote: impl Into<String>) -> Self {
        self.paths.push(PathMapping::new(local, remote));
        self
    }

    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }
}

/// Read-only view of the settings the command builder consumes.
pub trait ConfigurationSource {
    /// Look up a setting by its configuration key.
    fn get(&self, key: &str) -> Option<ConfigValue<'_>>;

    /// Parse the caller's argument string followed by any configured extra arguments.
    fn arguments(&self, raw: &str) -> ParsedArguments;
}

impl ConfigurationSource for Configuration {
    fn get(&self, key: &str) -> Option<ConfigValue<'_>> {
        match key {
            "php" => Some(ConfigValue::Text(&self.php)),
            "phpunit" => Some(ConfigValue::Text(&self.phpunit)),
            "command" => Some(ConfigValue::Text(&self.command)),
            "paths" => Some(ConfigValue::Paths(&self.paths)),
            "args" => Some(ConfigValue::List(&self.args)),
            "reservedOptions" => Some(ConfigValue::List(&self.reserved_options)),
            "workspaceFolder" => self.workspace_folder.as_deref().map(ConfigValue::Text),
            _ => None,
        }
    }

    fn arguments(&self, raw: &str) -> ParsedArguments {
        let tokens = argv::split(raw).into_iter().chain(self.args.iter().cloned());
        argv::parse_tokens(tokens, OPTION_ALIASES)
    }
}

/// `paths` is a JSON object; keep declaration order.
fn deserialize_paths<'de, D>(deserializer: D) -> Result<Vec<PathMapping>, D::Error>
where
    D: Deserializer<'de>,
{
    let map = serde_json::Map::<String, serde_json::Value>::deserialize(deserializer)?;
    map.into_iter()
        .map(|(local, remote)| match remote {
            serde_json::Value::String(remote) => Ok(PathMapping { local, remote }),
            other => Err(D::Error::custom(format!(
                "path mapping for '{local}' must be a string, found {other}"
            ))),
        })
        .collect()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use phpunit_protocol::OptionValue;

    #[test]
    fn test_defaults_point_at_vendor_phpunit() {
        let config = Configuration::default();
        assert_eq!(config.php, "php");
        assert_eq!(config.phpunit, "vendor/bin/phpunit");
        assert_eq!(config.reserved_options, vec!["teamcity", "colors", "testdox", "c"]);
    }

    #[test]
    fn test_json_keeps_path_order_and_fills_defaults() {
        let config = Configuration::from_json_str(
            r#"{ "command": "docker compose exec app", "paths": { "/z/project": "/app", "/a/shared": "/shared" } }"#,
        )
        .unwrap();
        assert_eq!(config.php, "php");
        assert_eq!(config.command, "docker compose exec app");
        assert_eq!(
            config.paths,
            vec![PathMapping::new("/z/project", "/app"), PathMapping::new("/a/shared", "/shared")]
        );
    }

    #[test]
    fn test_json_rejects_non_string_mappings() {
        let err = Configuration::from_json_str(r#"{ "paths": { "/p": 1 } }"#).unwrap_err();
        assert!(err.to_string().contains("must be a string"));
    }

    #[test]
    fn test_get_exposes_known_keys() {
        let config = Configuration::new().with_php("/usr/bin/php8.2").with_path("/p", "/app");
        assert_eq!(config.get("php"), Some(ConfigValue::Text("/usr/bin/php8.2")));
        assert!(matches!(config.get("paths"), Some(ConfigValue::Paths(paths)) if paths.len() == 1));
        assert_eq!(config.get("workspaceFolder"), None);
        assert_eq!(config.get("nope"), None);
    }

    #[test]
    fn test_arguments_append_configured_args_and_resolve_aliases() {
        let config = Configuration::new().with_args(["-c", "${PWD}/phpunit.xml"]);
        let parsed = config.arguments("tests/FooTest.php --filter 'a b'");
        assert_eq!(parsed.positionals, vec!["tests/FooTest.php"]);
        assert_eq!(parsed.get("filter"), Some(&OptionValue::One("a b".into())));
        assert_eq!(
            parsed.get("configuration"),
            Some(&OptionValue::One("${PWD}/phpunit.xml".into()))
        );
    }
}
