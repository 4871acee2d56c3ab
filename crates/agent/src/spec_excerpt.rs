use std::fs;

use tracing::warn;

use pricely_core::config::AgentConfig;

use crate::prompts::truncate_chars;

/// Size-bounded excerpt of the Pricing2Yaml specification, loaded once at
/// startup. A missing or unreadable file degrades to an empty excerpt so a
/// request is never failed over reference material.
#[derive(Clone, Debug, Default)]
pub struct SpecExcerpt {
    text: String,
}

impl SpecExcerpt {
    pub fn load(config: &AgentConfig) -> Self {
        let Some(path) = &config.spec_excerpt_path else {
            return Self::default();
        };

        match fs::read_to_string(path) {
            Ok(content) => Self { text: truncate_chars(&content, config.spec_excerpt_max_chars) },
            Err(error) => {
                warn!(path = %path.display(), error = %error, "pricing spec excerpt unavailable");
                Self::default()
            }
        }
    }

    pub fn get(&self) -> Option<&str> {
        if self.text.is_empty() {
            None
        } else {
            Some(&self.text)
        }
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use tempfile::TempDir;

    use pricely_core::config::AgentConfig;

    use super::SpecExcerpt;

    #[test]
    fn missing_path_yields_empty_excerpt() {
        let config = AgentConfig { spec_excerpt_path: None, spec_excerpt_max_chars: 6000 };

        assert_eq!(SpecExcerpt::load(&config).get(), None);
    }

    #[test]
    fn unreadable_file_degrades_to_empty_excerpt() {
        let config = AgentConfig {
            spec_excerpt_path: Some("does/not/exist.md".into()),
            spec_excerpt_max_chars: 6000,
        };

        assert_eq!(SpecExcerpt::load(&config).get(), None);
    }

    #[test]
    fn excerpt_is_truncated_to_configured_bound() {
        let dir = TempDir::new().expect("temp dir");
        let path = dir.path().join("pricing2yaml.md");
        fs::write(&path, "a".repeat(100)).expect("write spec file");

        let config = AgentConfig { spec_excerpt_path: Some(path), spec_excerpt_max_chars: 10 };

        assert_eq!(SpecExcerpt::load(&config).get(), Some("aaaaaaaaaa"));
    }
}
