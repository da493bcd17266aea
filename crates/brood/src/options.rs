//! Launch options.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Options applied to every launch mode.
///
/// The child's environment is exactly [`environment`](Self::environment).
/// The supervisor's own environment is only passed on when the caller asks
/// for it with [`inherit_environment`](Self::inherit_environment).
///
/// ```rust
/// use brood::LaunchOptions;
///
/// let options = LaunchOptions::default()
///     .inherit_environment()
///     .env("NODE_ENV", "production")
///     .working_directory("/srv/app")
///     .show_echo(true);
///
/// assert_eq!(options.environment.get("NODE_ENV").map(String::as_str), Some("production"));
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchOptions {
    /// Working directory of the child. `None` keeps the supervisor's.
    pub working_directory: Option<PathBuf>,

    /// Complete environment of the child.
    pub environment: BTreeMap<String, String>,

    /// Mirror every output chunk to the supervisor's own stdout/stderr.
    pub show_echo: bool,

    /// Capture stdout/stderr through pipes.
    ///
    /// Only channel launches honour `false`, in which case the child shares
    /// the supervisor's stdio. Buffered and streamed launches always capture.
    pub capture_output: bool,
}

impl Default for LaunchOptions {
    fn default() -> Self {
        Self {
            working_directory: None,
            environment: BTreeMap::new(),
            show_echo: false,
            capture_output: true,
        }
    }
}

impl LaunchOptions {
    /// Set the working directory.
    pub fn working_directory(mut self, dir: impl AsRef<Path>) -> Self {
        self.working_directory = Some(dir.as_ref().to_path_buf());
        self
    }

    /// Set one environment variable.
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.environment.insert(key.into(), value.into());
        self
    }

    /// Set several environment variables.
    pub fn envs<I, K, V>(mut self, vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.environment
            .extend(vars.into_iter().map(|(k, v)| (k.into(), v.into())));
        self
    }

    /// Merge the supervisor's own environment in. Variables already set on
    /// these options win over inherited ones.
    pub fn inherit_environment(mut self) -> Self {
        for (key, value) in std::env::vars() {
            self.environment.entry(key).or_insert(value);
        }
        self
    }

    /// Enable or disable echoing output to the supervisor's stdio.
    pub fn show_echo(mut self, show: bool) -> Self {
        self.show_echo = show;
        self
    }

    /// Enable or disable output capture (channel launches only).
    pub fn capture_output(mut self, capture: bool) -> Self {
        self.capture_output = capture;
        self
    }
}
