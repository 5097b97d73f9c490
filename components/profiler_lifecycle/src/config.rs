//! Configuration for a profiling session

use profile_sinks::{OutputPaths, DEFAULT_LOG_FILTER};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// What the background signal listener does when SIGINT or SIGTERM arrives
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ShutdownMode {
    /// Publish the signal to the session's listeners; the application stops
    /// the session and returns from `main` on its own
    ///
    /// If no [`ShutdownListener`](crate::ShutdownListener) is alive, or a
    /// shutdown was already requested, the signal is handled as in
    /// [`ShutdownMode::Exit`].
    #[default]
    Cooperative,

    /// Stop the session from the listener task, then exit the process
    /// (code 0, or 1 if stopping failed)
    Exit,
}

/// Configuration for a profiling session
///
/// Sampling frequency and output file names are fixed; only where the files
/// go and how the session reacts to termination signals can be chosen.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfilingConfig {
    /// Directory receiving `cpu.pprof`, `trace.out` and `mem.pprof`
    output_dir: PathBuf,

    /// `EnvFilter` directives for log output, overridden by `RUST_LOG`
    log_filter: String,

    /// Reaction to SIGINT/SIGTERM
    shutdown_mode: ShutdownMode,

    /// Whether to spawn the signal listener at all
    listen_for_signals: bool,
}

impl ProfilingConfig {
    /// Create a new builder for ProfilingConfig
    ///
    /// # Example
    ///
    /// ```
    /// use profiler_lifecycle::{ProfilingConfig, ShutdownMode};
    ///
    /// let config = ProfilingConfig::builder()
    ///     .output_dir("/tmp/profiles")
    ///     .shutdown_mode(ShutdownMode::Exit)
    ///     .build();
    /// ```
    pub fn builder() -> ProfilingConfigBuilder {
        ProfilingConfigBuilder::default()
    }

    /// Get the output directory
    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// Get the log filter directives
    pub fn log_filter(&self) -> &str {
        &self.log_filter
    }

    /// Get the shutdown mode
    pub fn shutdown_mode(&self) -> ShutdownMode {
        self.shutdown_mode
    }

    /// Get whether the signal listener is spawned
    pub fn listen_for_signals(&self) -> bool {
        self.listen_for_signals
    }

    /// Resolve the three output files under the output directory
    pub fn output_paths(&self) -> OutputPaths {
        OutputPaths::in_dir(&self.output_dir)
    }
}

impl Default for ProfilingConfig {
    /// Create a default configuration
    ///
    /// Default values:
    /// - output_dir: "." (the working directory)
    /// - log_filter: "info"
    /// - shutdown_mode: Cooperative
    /// - listen_for_signals: true
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("."),
            log_filter: DEFAULT_LOG_FILTER.to_string(),
            shutdown_mode: ShutdownMode::Cooperative,
            listen_for_signals: true,
        }
    }
}

/// Builder for ProfilingConfig
#[derive(Debug, Clone, Default)]
pub struct ProfilingConfigBuilder {
    output_dir: Option<PathBuf>,
    log_filter: Option<String>,
    shutdown_mode: Option<ShutdownMode>,
    listen_for_signals: Option<bool>,
}

impl ProfilingConfigBuilder {
    /// Set the output directory
    ///
    /// # Arguments
    ///
    /// * `dir` - Directory for the profile files; created on start if missing
    pub fn output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.output_dir = Some(dir.into());
        self
    }

    /// Set the log filter
    ///
    /// # Arguments
    ///
    /// * `filter` - `EnvFilter` directives, e.g. `"info,my_app=debug"`
    pub fn log_filter(mut self, filter: impl Into<String>) -> Self {
        self.log_filter = Some(filter.into());
        self
    }

    /// Set the shutdown mode
    pub fn shutdown_mode(mut self, mode: ShutdownMode) -> Self {
        self.shutdown_mode = Some(mode);
        self
    }

    /// Enable or disable the signal listener
    ///
    /// # Arguments
    ///
    /// * `enabled` - Whether SIGINT/SIGTERM are handled by the session
    pub fn listen_for_signals(mut self, enabled: bool) -> Self {
        self.listen_for_signals = Some(enabled);
        self
    }

    /// Build the ProfilingConfig
    ///
    /// Uses default values for any unset fields.
    pub fn build(self) -> ProfilingConfig {
        let default = ProfilingConfig::default();

        ProfilingConfig {
            output_dir: self.output_dir.unwrap_or(default.output_dir),
            log_filter: self.log_filter.unwrap_or(default.log_filter),
            shutdown_mode: self.shutdown_mode.unwrap_or(default.shutdown_mode),
            listen_for_signals: self.listen_for_signals.unwrap_or(default.listen_for_signals),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ProfilingConfig::default();

        assert_eq!(config.output_dir(), Path::new("."));
        assert_eq!(config.log_filter(), "info");
        assert_eq!(config.shutdown_mode(), ShutdownMode::Cooperative);
        assert!(config.listen_for_signals());
    }

    #[test]
    fn test_builder_overrides() {
        let config = ProfilingConfig::builder()
            .output_dir("/tmp/run-42")
            .log_filter("debug")
            .shutdown_mode(ShutdownMode::Exit)
            .listen_for_signals(false)
            .build();

        assert_eq!(config.output_dir(), Path::new("/tmp/run-42"));
        assert_eq!(config.log_filter(), "debug");
        assert_eq!(config.shutdown_mode(), ShutdownMode::Exit);
        assert!(!config.listen_for_signals());
    }

    #[test]
    fn test_builder_partial() {
        let config = ProfilingConfig::builder().log_filter("warn").build();

        assert_eq!(config.log_filter(), "warn");
        assert_eq!(config.output_dir(), Path::new("."));
        assert_eq!(config.shutdown_mode(), ShutdownMode::Cooperative);
    }

    #[test]
    fn test_output_paths() {
        let config = ProfilingConfig::builder().output_dir("/srv/prof").build();
        let paths = config.output_paths();

        assert_eq!(paths.cpu, PathBuf::from("/srv/prof/cpu.pprof"));
        assert_eq!(paths.trace, PathBuf::from("/srv/prof/trace.out"));
        assert_eq!(paths.heap, PathBuf::from("/srv/prof/mem.pprof"));
    }

    #[test]
    fn test_config_serialization() {
        let config = ProfilingConfig::builder()
            .shutdown_mode(ShutdownMode::Exit)
            .build();

        let json = serde_json::to_value(&config).unwrap();
        assert_eq!(json["shutdownMode"], "exit");
        assert_eq!(json["listenForSignals"], true);

        let parsed: ProfilingConfig = serde_json::from_value(json).unwrap();
        assert_eq!(parsed, config);
    }
}
