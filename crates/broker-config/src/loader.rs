//! Multi-file configuration loading.
//!
//! The root file may list other files under `include`, as one path or an
//! array of paths relative to the loader's base directory. Included files
//! contribute whole top-level sections; a section may come from one file
//! only.

use crate::{resolve_env_vars, Config, ConfigError};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

pub struct ConfigLoader {
	base_dir: PathBuf,
	/// Canonical paths read so far.
	visited: HashSet<PathBuf>,
	/// File each top-level section was read from.
	owners: HashMap<String, PathBuf>,
}

impl ConfigLoader {
	pub fn new(base_dir: impl AsRef<Path>) -> Self {
		Self {
			base_dir: base_dir.as_ref().to_path_buf(),
			visited: HashSet::new(),
			owners: HashMap::new(),
		}
	}

	/// Reads the root file, merges its includes and validates the result.
	pub async fn load_config(&mut self, path: impl AsRef<Path>) -> Result<Config, ConfigError> {
		let root_path = self.locate(path.as_ref())?;
		let mut root = self.read_table(&root_path).await?;
		let includes = match root.remove("include") {
			Some(value) => include_paths(value)?,
			None => Vec::new(),
		};
		self.claim_sections(&root, &root_path)?;

		for include in includes {
			let path = self.locate(&include)?;
			let fragment = self.read_table(&path).await?;
			self.claim_sections(&fragment, &path)?;
			for (section, value) in fragment {
				root.insert(section, value);
			}
		}

		Config::from_value(toml::Value::Table(root))
	}

	fn locate(&self, path: &Path) -> Result<PathBuf, ConfigError> {
		let candidate = if path.is_absolute() {
			path.to_path_buf()
		} else {
			self.base_dir.join(path)
		};
		if candidate.exists() {
			Ok(candidate)
		} else {
			Err(ConfigError::Io(std::io::Error::new(
				std::io::ErrorKind::NotFound,
				format!("Configuration file not found: {}", candidate.display()),
			)))
		}
	}

	/// Reads one file with environment variables substituted.
	async fn read_table(&mut self, path: &Path) -> Result<toml::Table, ConfigError> {
		let canonical = tokio::fs::canonicalize(path).await?;
		if !self.visited.insert(canonical.clone()) {
			return Err(ConfigError::Validation(format!(
				"Circular include: {} was already loaded",
				canonical.display()
			)));
		}

		let raw = tokio::fs::read_to_string(&canonical).await?;
		Ok(toml::from_str(&resolve_env_vars(&raw)?)?)
	}

	fn claim_sections(&mut self, table: &toml::Table, source: &Path) -> Result<(), ConfigError> {
		for section in table.keys() {
			if let Some(owner) = self.owners.get(section) {
				return Err(ConfigError::Validation(format!(
					"Duplicate section '{}' in {} and {}",
					section,
					owner.display(),
					source.display()
				)));
			}
			self.owners.insert(section.clone(), source.to_path_buf());
		}
		Ok(())
	}
}

fn include_paths(value: toml::Value) -> Result<Vec<PathBuf>, ConfigError> {
	match value {
		toml::Value::String(path) => Ok(vec![PathBuf::from(path)]),
		toml::Value::Array(items) => items
			.into_iter()
			.map(|item| match item {
				toml::Value::String(path) => Ok(PathBuf::from(path)),
				other => Err(ConfigError::Validation(format!(
					"Include entries must be strings, found {}",
					other.type_str()
				))),
			})
			.collect(),
		other => Err(ConfigError::Validation(format!(
			"Include must be a string or an array of strings, found {}",
			other.type_str()
		))),
	}
}
