//! Series open options.
//!
//! Options group the layout and parsing configuration of a series into
//! one bundle, built either with setter methods or from a JSON document.

use rustypmd_io::Access;
use serde::Deserialize;

use crate::error::{Error, Result};

/// Placeholder for the iteration index in the base path.
pub const ITERATION_PLACEHOLDER: &str = "%T";

/// Options for opening or creating a series.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeriesOptions {
    /// Access mode, fixed for the lifetime of the series.
    pub access: Access,
    /// Location of the iterations, containing `%T`.
    pub base_path: String,
    /// Location of the mesh records, relative to an iteration.
    pub meshes_path: String,
    /// Location of the particle records, relative to an iteration.
    pub particles_path: String,
    /// Parse iterations on first access instead of when they are discovered.
    pub defer_iteration_parsing: bool,
}

impl SeriesOptions {
    /// Default options for `access`. Parsing is deferred for read-only access.
    pub fn new(access: Access) -> Self {
        Self {
            access,
            base_path: "/data/%T/".to_string(),
            meshes_path: "meshes/".to_string(),
            particles_path: "particles/".to_string(),
            defer_iteration_parsing: access.is_read_only(),
        }
    }

    /// Set the base path. Must contain `%T`.
    pub fn base_path(mut self, path: &str) -> Self {
        self.base_path = path.to_string();
        self
    }

    pub fn meshes_path(mut self, path: &str) -> Self {
        self.meshes_path = path.to_string();
        self
    }

    pub fn particles_path(mut self, path: &str) -> Self {
        self.particles_path = path.to_string();
        self
    }

    pub fn defer_iteration_parsing(mut self, defer: bool) -> Self {
        self.defer_iteration_parsing = defer;
        self
    }

    /// Build options from a JSON document.
    ///
    /// ```
    /// use rustypmd::{Access, SeriesOptions};
    ///
    /// let opts = SeriesOptions::from_json(
    ///     Access::ReadOnly,
    ///     r#"{ "defer_iteration_parsing": false, "meshes_path": "fields/" }"#,
    /// )
    /// .unwrap();
    /// assert!(!opts.defer_iteration_parsing);
    /// assert_eq!(opts.meshes_path, "fields/");
    /// ```
    pub fn from_json(access: Access, json: &str) -> Result<Self> {
        let doc: JsonOptions = serde_json::from_str(json)?;
        let mut opts = Self::new(access);
        if let Some(defer) = doc.defer_iteration_parsing {
            opts.defer_iteration_parsing = defer;
        }
        if let Some(path) = doc.base_path {
            opts.base_path = path;
        }
        if let Some(path) = doc.meshes_path {
            opts.meshes_path = path;
        }
        if let Some(path) = doc.particles_path {
            opts.particles_path = path;
        }
        opts.validate()?;
        Ok(opts)
    }

    /// Check path consistency.
    pub fn validate(&self) -> Result<()> {
        if !self.base_path.contains(ITERATION_PLACEHOLDER) {
            return Err(Error::InvalidOptions(format!(
                "base path '{}' lacks {ITERATION_PLACEHOLDER}",
                self.base_path
            )));
        }
        if self.iterations_group().is_empty() {
            return Err(Error::InvalidOptions(format!(
                "base path '{}' places iterations at the root",
                self.base_path
            )));
        }
        for (what, path) in [("meshes", &self.meshes_path), ("particles", &self.particles_path)] {
            if path.trim_matches('/').is_empty() {
                return Err(Error::InvalidOptions(format!("{what} path is empty")));
            }
        }
        if self.meshes_group() == self.particles_group() {
            return Err(Error::InvalidOptions(
                "meshes and particles share one path".to_string(),
            ));
        }
        Ok(())
    }

    /// Group holding the iterations, e.g. `data` for `/data/%T/`.
    pub(crate) fn iterations_group(&self) -> &str {
        let prefix = match self.base_path.find(ITERATION_PLACEHOLDER) {
            Some(at) => &self.base_path[..at],
            None => &self.base_path,
        };
        prefix.trim_matches('/')
    }

    pub(crate) fn meshes_group(&self) -> &str {
        self.meshes_path.trim_matches('/')
    }

    pub(crate) fn particles_group(&self) -> &str {
        self.particles_path.trim_matches('/')
    }
}

impl Default for SeriesOptions {
    fn default() -> Self {
        Self::new(Access::Create)
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct JsonOptions {
    defer_iteration_parsing: Option<bool>,
    base_path: Option<String>,
    meshes_path: Option<String>,
    particles_path: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let opts = SeriesOptions::new(Access::ReadOnly);
        assert!(opts.defer_iteration_parsing);
        assert_eq!(opts.iterations_group(), "data");
        assert_eq!(opts.meshes_group(), "meshes");
        assert_eq!(opts.particles_group(), "particles");
        assert!(!SeriesOptions::new(Access::Create).defer_iteration_parsing);
        opts.validate().unwrap();
    }

    #[test]
    fn builder_chain() {
        let opts = SeriesOptions::new(Access::Create)
            .base_path("/sim/%T")
            .meshes_path("fields")
            .defer_iteration_parsing(true);
        assert_eq!(opts.iterations_group(), "sim");
        assert_eq!(opts.meshes_group(), "fields");
        assert!(opts.defer_iteration_parsing);
    }

    #[test]
    fn json_rejects_unknown_keys() {
        let err = SeriesOptions::from_json(Access::ReadOnly, r#"{ "backend": "hdf5" }"#).unwrap_err();
        assert!(matches!(err, Error::Json(_)));
    }

    #[test]
    fn json_validates_paths() {
        let err =
            SeriesOptions::from_json(Access::Create, r#"{ "base_path": "/data/" }"#).unwrap_err();
        assert!(matches!(err, Error::InvalidOptions(_)));

        let err = SeriesOptions::from_json(
            Access::Create,
            r#"{ "meshes_path": "x/", "particles_path": "/x" }"#,
        )
        .unwrap_err();
        assert!(matches!(err, Error::InvalidOptions(_)));
    }

    #[test]
    fn empty_json_gives_defaults() {
        let opts = SeriesOptions::from_json(Access::Append, "{}").unwrap();
        assert_eq!(opts, SeriesOptions::new(Access::Append));
    }
}
