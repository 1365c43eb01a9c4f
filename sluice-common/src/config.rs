//! RON configuration loading.
//!
//! ```ron
//! (
//!     min_large_message_size: 102400,
//!     flush_timeout_ms: 10000,
//! )
//! ```

use std::path::Path;

use serde::de::DeserializeOwned;

use crate::ConfigError;

/// Parse a configuration value from RON text.
///
/// # Errors
///
/// Returns [`ConfigError::Parse`] if the text is not valid RON for `T`.
pub fn from_str<T: DeserializeOwned>(source: &str) -> Result<T, ConfigError> {
    Ok(ron::from_str(source)?)
}

/// Read and parse a RON configuration file.
///
/// # Errors
///
/// Returns [`ConfigError::Read`] if the file cannot be read, or
/// [`ConfigError::Parse`] if its contents do not describe a `T`.
pub fn from_file<T: DeserializeOwned>(path: impl AsRef<Path>) -> Result<T, ConfigError> {
    let path = path.as_ref();
    let source = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;

    from_str(&source)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use std::io::Write;

    use pretty_assertions::assert_eq;
    use serde::Deserialize;

    use super::*;

    #[derive(Debug, Deserialize, PartialEq, Eq)]
    struct Window {
        size: u32,
        #[serde(default)]
        label: Option<String>,
    }

    #[test]
    fn test_from_str_with_defaults() {
        let window: Window = from_str("(size: 42)").expect("valid RON");
        assert_eq!(
            window,
            Window {
                size: 42,
                label: None
            }
        );
    }

    #[test]
    fn test_from_str_rejects_unknown_shape() {
        let result: Result<Window, _> = from_str("(label: \"x\")");
        assert!(matches!(result, Err(ConfigError::Parse(_))));
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "(size: 7, label: Some(\"seven\"))").unwrap();

        let window: Window = from_file(file.path()).expect("valid file");
        assert_eq!(window.label.as_deref(), Some("seven"));
    }

    #[test]
    fn test_from_file_missing() {
        let result: Result<Window, _> = from_file("/nonexistent/sluice.ron");
        assert!(matches!(result, Err(ConfigError::Read { .. })));
    }
}
