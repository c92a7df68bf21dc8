/// Engine-wide settings.
///
/// ```
/// use minidust::{Config, Engine};
///
/// let engine = Engine::new();
/// engine.set_config(Config {
///     whitespace: true,
///     ..Config::default()
/// });
/// assert!(engine.config().whitespace);
/// ```
#[cfg_attr(
    feature = "serde",
    derive(serde::Serialize, serde::Deserialize),
    serde(default)
)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Config {
    /// Keep line breaks and indentation from the template source. When off,
    /// a newline and the whitespace after it are dropped.
    pub whitespace: bool,
    /// Store compiled and loaded templates in the registry for reuse.
    pub cache: bool,
    /// Capture log records for [`crate::Engine::drain_log`].
    pub debug: bool,
    /// How deeply partials may nest before rendering fails.
    pub max_partial_depth: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            whitespace: false,
            cache: true,
            debug: false,
            max_partial_depth: 100,
        }
    }
}
