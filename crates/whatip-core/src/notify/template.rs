//! Template sources

use async_trait::async_trait;
use std::collections::HashMap;
use std::path::PathBuf;

use crate::error::Error;
use crate::traits::TemplateSource;

/// Loads `<dir>/<name>.html`
#[derive(Debug, Clone)]
pub struct FileTemplateSource {
    dir: PathBuf,
}

impl FileTemplateSource {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

#[async_trait]
impl TemplateSource for FileTemplateSource {
    async fn load(&self, name: &str) -> Result<String, Error> {
        let path = self.dir.join(format!("{}.html", name));
        tokio::fs::read_to_string(&path)
            .await
            .map_err(|e| Error::template(format!("{}: {}", path.display(), e)))
    }
}

/// Fixed set of templates held in memory
#[derive(Debug, Clone, Default)]
pub struct MemoryTemplateSource {
    templates: HashMap<String, String>,
}

impl MemoryTemplateSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_template(mut self, name: impl Into<String>, body: impl Into<String>) -> Self {
        self.templates.insert(name.into(), body.into());
        self
    }
}

#[async_trait]
impl TemplateSource for MemoryTemplateSource {
    async fn load(&self, name: &str) -> Result<String, Error> {
        self.templates
            .get(name)
            .cloned()
            .ok_or_else(|| Error::template(format!("no template named {}", name)))
    }
}
