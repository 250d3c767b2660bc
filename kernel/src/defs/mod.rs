// Benchmark Definitions
//
// The input contract for a run: named benchmarks, each an ordered list of
// shell-style command strings. Malformed definitions are fatal before any
// process execution or ledger access.

use std::path::{Path, PathBuf};

use indexmap::IndexMap;
use serde::Deserialize;

/// Benchmark definitions loaded from JSON.
///
/// Definition order is preserved; it is the order benchmarks run in and the
/// order their measurements appear in the record payload.
#[derive(Debug, Clone, Deserialize)]
pub struct BenchDefs {
    commands: IndexMap<String, Vec<String>>,
}

impl BenchDefs {
    pub fn load(path: &Path) -> Result<Self, DefsError> {
        let content = std::fs::read(path).map_err(|source| DefsError::Io {
            path: path.to_owned(),
            source,
        })?;

        let defs: Self = serde_json::from_slice(&content)?;
        defs.validate()?;

        Ok(defs)
    }

    /// Build definitions directly, applying the same validation as [`load`].
    ///
    /// [`load`]: BenchDefs::load
    pub fn from_commands(commands: IndexMap<String, Vec<String>>) -> Result<Self, DefsError> {
        let defs = Self { commands };
        defs.validate()?;
        Ok(defs)
    }

    fn validate(&self) -> Result<(), DefsError> {
        if self.commands.is_empty() {
            return Err(DefsError::Empty);
        }

        for (name, commands) in &self.commands {
            if commands.is_empty() {
                return Err(DefsError::NoCommands(name.clone()));
            }
            if commands.iter().any(|cmd| cmd.trim().is_empty()) {
                return Err(DefsError::BlankCommand(name.clone()));
            }
        }

        Ok(())
    }

    pub fn benchmarks(&self) -> impl Iterator<Item = (&str, &[String])> {
        self.commands
            .iter()
            .map(|(name, commands)| (name.as_str(), commands.as_slice()))
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum DefsError {
    #[error("failed to read benchmark definitions {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("malformed benchmark definitions: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("no benchmarks defined")]
    Empty,

    #[error("benchmark {0:?} has an empty command list")]
    NoCommands(String),

    #[error("benchmark {0:?} contains a blank command")]
    BlankCommand(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_and_preserves_definition_order() {
        let json = r#"
        {
            "commands": {
                "compress": ["target/release/compress 1 silesia", "target/release/compress 9 silesia"],
                "decompress": ["target/release/decompress silesia.gz"]
            }
        }
        "#;

        let defs: BenchDefs = serde_json::from_str(json).unwrap();
        defs.validate().unwrap();

        let names: Vec<_> = defs.benchmarks().map(|(name, _)| name).collect();
        assert_eq!(names, ["compress", "decompress"]);
    }

    #[test]
    fn empty_command_list_is_rejected() {
        let defs = BenchDefs::from_commands(IndexMap::from_iter([(
            "compress".to_owned(),
            Vec::new(),
        )]));

        assert!(matches!(defs.unwrap_err(), DefsError::NoCommands(name) if name == "compress"));
    }

    #[test]
    fn blank_command_is_rejected() {
        let defs = BenchDefs::from_commands(IndexMap::from_iter([(
            "compress".to_owned(),
            vec!["  ".to_owned()],
        )]));

        assert!(matches!(defs.unwrap_err(), DefsError::BlankCommand(_)));
    }

    #[test]
    fn no_benchmarks_is_rejected() {
        let defs = BenchDefs::from_commands(IndexMap::new());
        assert!(matches!(defs.unwrap_err(), DefsError::Empty));
    }

    #[test]
    fn load_surfaces_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = BenchDefs::load(&dir.path().join("defs.json")).unwrap_err();
        assert!(matches!(err, DefsError::Io { .. }));
    }
}
