//! Per-node reflection-mode resolution.
//!
//! A carrier's mode comes from the first `@reflection` doc tag found walking
//! from the node through its ancestors, then from the transformer's
//! configured override, then from the nearest ancestor project configuration
//! file that sets the `reflection` key, and finally defaults to `never`.
//! `default` at any stage defers to the next one.

use std::cell::RefCell;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use ahash::AHashMap;

/// File name probed in each ancestor directory.
pub const CONFIG_FILE: &str = "tsconfig.json";

/// Reflection mode of a declaration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::EnumString, strum::Display)]
#[strum(serialize_all = "lowercase")]
pub enum ReflectionMode {
    Always,
    /// Defers to the surrounding configuration.
    Default,
    Never,
}

impl ReflectionMode {
    /// Parses a tag or configuration token, accepting the boolean spellings.
    fn from_token(token: &str) -> Option<Self> {
        match token {
            "true" => Some(ReflectionMode::Always),
            "false" => Some(ReflectionMode::Never),
            other => ReflectionMode::from_str(other).ok(),
        }
    }
}

/// Extracts the mode from a doc comment, if it carries a `@reflection` tag.
pub fn mode_from_doc(doc: &str) -> Option<ReflectionMode> {
    let at = doc.find("@reflection")?;
    let rest = &doc[at + "@reflection".len()..];
    let token = rest.split_whitespace().next()?;
    let token = token.trim_end_matches(['.', ',', ';']);
    ReflectionMode::from_token(token)
}

/// The `reflection` key of a project configuration file. Both the mode
/// spellings and plain booleans are accepted.
#[derive(Debug, serde::Deserialize)]
struct ProjectConfig {
    reflection: Option<serde_json::Value>,
}

/// Resolves reflection modes, caching configuration files by absolute path.
#[derive(Debug, Default)]
pub struct ModeProbe {
    override_mode: Option<ReflectionMode>,
    cache: RefCell<AHashMap<PathBuf, Option<ReflectionMode>>>,
}

impl ModeProbe {
    #[must_use]
    pub fn new(override_mode: Option<ReflectionMode>) -> Self {
        ModeProbe {
            override_mode,
            cache: RefCell::new(AHashMap::new()),
        }
    }

    pub fn set_override(&mut self, mode: ReflectionMode) {
        self.override_mode = Some(mode);
    }

    /// Resolves the mode for a node given its doc comment chain (own doc
    /// first, then ancestors) and the path of the containing file.
    pub fn resolve<'a>(
        &self,
        docs: impl IntoIterator<Item = &'a str>,
        file_path: &Path,
    ) -> ReflectionMode {
        // The first tag wins; `default` defers to the rest of the chain.
        let tagged = docs.into_iter().find_map(mode_from_doc);
        match tagged {
            Some(ReflectionMode::Default) | None => {}
            Some(decided) => return decided,
        }

        match self.override_mode {
            Some(ReflectionMode::Default) | None => {}
            Some(decided) => return decided,
        }

        let mut dir = file_path.parent();
        while let Some(current) = dir {
            match self.load(&current.join(CONFIG_FILE)) {
                Some(ReflectionMode::Default) | None => {}
                Some(decided) => return decided,
            }
            dir = current.parent();
        }
        ReflectionMode::Never
    }

    /// Reads and caches one configuration file. Missing files, malformed
    /// files and files without the key all resolve to `None`; only the
    /// malformed case warrants a warning.
    fn load(&self, path: &Path) -> Option<ReflectionMode> {
        if let Some(cached) = self.cache.borrow().get(path) {
            return *cached;
        }
        let mode = match std::fs::read_to_string(path) {
            Ok(contents) => match serde_json::from_str::<ProjectConfig>(&contents) {
                Ok(config) => config.reflection.as_ref().and_then(|value| {
                    let mode = match value {
                        serde_json::Value::Bool(true) => Some(ReflectionMode::Always),
                        serde_json::Value::Bool(false) => Some(ReflectionMode::Never),
                        serde_json::Value::String(s) => ReflectionMode::from_token(s),
                        _ => None,
                    };
                    if mode.is_none() {
                        tracing::warn!(path = %path.display(), "ignoring invalid reflection setting");
                    }
                    mode
                }),
                Err(error) => {
                    tracing::warn!(path = %path.display(), %error, "ignoring malformed project configuration");
                    None
                }
            },
            Err(_) => None,
        };
        self.cache.borrow_mut().insert(path.to_path_buf(), mode);
        mode
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn parses_tags_from_doc_comments() {
        assert_eq!(mode_from_doc("/** @reflection never */"), Some(ReflectionMode::Never));
        assert_eq!(mode_from_doc("@reflection always"), Some(ReflectionMode::Always));
        assert_eq!(mode_from_doc("@reflection default"), Some(ReflectionMode::Default));
        assert_eq!(mode_from_doc("@reflection true"), Some(ReflectionMode::Always));
        assert_eq!(mode_from_doc("@reflection false"), Some(ReflectionMode::Never));
        assert_eq!(mode_from_doc("no tag here"), None);
        assert_eq!(mode_from_doc("@reflection sometimes"), None);
    }

    #[test]
    fn first_tag_in_the_ancestor_chain_wins() {
        let probe = ModeProbe::new(None);
        let mode = probe.resolve(
            ["@reflection always", "@reflection never"],
            Path::new("/nonexistent/file.ts"),
        );
        assert_eq!(mode, ReflectionMode::Always);
    }

    #[test]
    fn default_tag_defers_to_the_override() {
        let probe = ModeProbe::new(Some(ReflectionMode::Always));
        let mode = probe.resolve(["@reflection default"], Path::new("/nonexistent/file.ts"));
        assert_eq!(mode, ReflectionMode::Always);
    }

    #[test]
    fn missing_configuration_means_never() {
        let probe = ModeProbe::new(None);
        assert_eq!(
            probe.resolve([], Path::new("/nonexistent/deeply/nested/file.ts")),
            ReflectionMode::Never
        );
    }

    #[test]
    fn override_beats_the_filesystem() {
        let probe = ModeProbe::new(Some(ReflectionMode::Never));
        assert_eq!(
            probe.resolve([], Path::new("/nonexistent/file.ts")),
            ReflectionMode::Never
        );
    }

    mod filesystem {
        use std::fs;

        use pretty_assertions::assert_eq;

        use super::*;

        /// Creates a scratch project tree and runs `f` against its root.
        fn with_project(name: &str, f: impl FnOnce(&Path)) {
            let root = std::env::temp_dir().join(format!("runtype-config-{}-{name}", std::process::id()));
            let _ = fs::remove_dir_all(&root);
            fs::create_dir_all(root.join("src/nested")).unwrap();
            f(&root);
            let _ = fs::remove_dir_all(&root);
        }

        #[test]
        fn reads_the_nearest_configuration() {
            with_project("nearest", |root| {
                fs::write(root.join(CONFIG_FILE), r#"{"reflection": "always"}"#).unwrap();
                let probe = ModeProbe::new(None);
                let mode = probe.resolve([], &root.join("src/nested/file.ts"));
                assert_eq!(mode, ReflectionMode::Always);
            });
        }

        #[test]
        fn inner_configuration_shadows_outer() {
            with_project("shadow", |root| {
                fs::write(root.join(CONFIG_FILE), r#"{"reflection": "always"}"#).unwrap();
                fs::write(root.join("src").join(CONFIG_FILE), r#"{"reflection": "never"}"#).unwrap();
                let probe = ModeProbe::new(None);
                let mode = probe.resolve([], &root.join("src/nested/file.ts"));
                assert_eq!(mode, ReflectionMode::Never);
            });
        }

        #[test]
        fn boolean_setting_is_accepted() {
            with_project("boolean", |root| {
                fs::write(root.join(CONFIG_FILE), r#"{"reflection": true}"#).unwrap();
                let probe = ModeProbe::new(None);
                assert_eq!(
                    probe.resolve([], &root.join("src/file.ts")),
                    ReflectionMode::Always
                );
            });
        }

        #[test]
        fn malformed_configuration_is_skipped() {
            with_project("malformed", |root| {
                fs::write(root.join("src").join(CONFIG_FILE), "{not json").unwrap();
                fs::write(root.join(CONFIG_FILE), r#"{"reflection": "always"}"#).unwrap();
                let probe = ModeProbe::new(None);
                // The malformed inner file is ignored; the walk continues up.
                assert_eq!(
                    probe.resolve([], &root.join("src/nested/file.ts")),
                    ReflectionMode::Always
                );
            });
        }

        #[test]
        fn unset_key_continues_the_walk() {
            with_project("unset", |root| {
                fs::write(root.join("src").join(CONFIG_FILE), r#"{"strict": true}"#).unwrap();
                fs::write(root.join(CONFIG_FILE), r#"{"reflection": "always"}"#).unwrap();
                let probe = ModeProbe::new(None);
                assert_eq!(
                    probe.resolve([], &root.join("src/nested/file.ts")),
                    ReflectionMode::Always
                );
            });
        }

        #[test]
        fn doc_tag_beats_the_configuration() {
            with_project("tag-wins", |root| {
                fs::write(root.join(CONFIG_FILE), r#"{"reflection": "always"}"#).unwrap();
                let probe = ModeProbe::new(None);
                let mode = probe.resolve(["@reflection never"], &root.join("src/file.ts"));
                assert_eq!(mode, ReflectionMode::Never);
            });
        }
    }
}
