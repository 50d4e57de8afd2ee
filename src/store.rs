// MIT License - Copyright (c) 2019 Kevin Cooper
// Rust translation

use std::fs;
use std::io;
use std::path::PathBuf;

use crate::error::{Result, TexecomError};

/// Capability for persisting the site's 6-character UDL code across runs.
pub trait CodeStore {
    /// Load the stored code, if any.
    fn load(&mut self) -> Result<Option<String>>;
    /// Persist a new code.
    fn save(&mut self, code: &str) -> Result<()>;
}

/// Plain-text file store: the code on a single line.
#[derive(Debug)]
pub struct FileCodeStore {
    path: PathBuf,
}

impl FileCodeStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        FileCodeStore { path: path.into() }
    }
}

impl CodeStore for FileCodeStore {
    fn load(&mut self) -> Result<Option<String>> {
        match fs::read_to_string(&self.path) {
            Ok(contents) => {
                let code = contents.trim().to_string();
                Ok(if code.is_empty() { None } else { Some(code) })
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(TexecomError::CodeStore(e)),
        }
    }

    fn save(&mut self, code: &str) -> Result<()> {
        fs::write(&self.path, format!("{code}\n")).map_err(TexecomError::CodeStore)
    }
}

/// In-memory store for tests and ephemeral runs.
#[derive(Debug, Default)]
pub struct MemoryCodeStore {
    code: Option<String>,
}

impl MemoryCodeStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CodeStore for MemoryCodeStore {
    fn load(&mut self) -> Result<Option<String>> {
        Ok(self.code.clone())
    }

    fn save(&mut self, code: &str) -> Result<()> {
        self.code = Some(code.to_string());
        Ok(())
    }
}
