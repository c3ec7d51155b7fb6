//! Schemas for the raw TOML tables handed to storage backends and cloud
//! plugins.
//!
//! A [`Schema`] lists required and optional [`Field`]s. Validation walks
//! the table once, threading a dotted path (`quota.vcpu`, `images[1].id`)
//! so an error names the exact offending entry.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ValidationError {
	#[error("Missing required field: {0}")]
	MissingField(String),
	#[error("Invalid value for field '{field}': {message}")]
	InvalidValue { field: String, message: String },
	#[error("Type mismatch for field '{field}': expected {expected}, got {actual}")]
	TypeMismatch {
		field: String,
		expected: String,
		actual: String,
	},
}

#[derive(Debug)]
pub enum FieldType {
	String,
	/// Inclusive bounds; `None` leaves a side open.
	Integer {
		min: Option<i64>,
		max: Option<i64>,
	},
	Boolean,
	Array(Box<FieldType>),
	Table(Schema),
}

impl FieldType {
	fn expected(&self) -> &'static str {
		match self {
			FieldType::String => "string",
			FieldType::Integer { .. } => "integer",
			FieldType::Boolean => "boolean",
			FieldType::Array(_) => "array",
			FieldType::Table(_) => "table",
		}
	}

	fn check(&self, path: &str, value: &toml::Value) -> Result<(), ValidationError> {
		let mismatch = || ValidationError::TypeMismatch {
			field: path.to_string(),
			expected: self.expected().to_string(),
			actual: value.type_str().to_string(),
		};
		match (self, value) {
			(FieldType::String, toml::Value::String(_))
			| (FieldType::Boolean, toml::Value::Boolean(_)) => Ok(()),
			(FieldType::Integer { min, max }, toml::Value::Integer(n)) => {
				let out_of_range = |message: String| ValidationError::InvalidValue {
					field: path.to_string(),
					message,
				};
				match (min, max) {
					(Some(lo), _) if n < lo => {
						Err(out_of_range(format!("Value {} is less than minimum {}", n, lo)))
					},
					(_, Some(hi)) if n > hi => {
						Err(out_of_range(format!("Value {} is greater than maximum {}", n, hi)))
					},
					_ => Ok(()),
				}
			},
			(FieldType::Array(item), toml::Value::Array(items)) => items
				.iter()
				.enumerate()
				.try_for_each(|(i, v)| item.check(&format!("{}[{}]", path, i), v)),
			(FieldType::Table(schema), toml::Value::Table(table)) => schema.check_table(path, table),
			_ => Err(mismatch()),
		}
	}
}

/// Extra check run once the value has the declared type.
pub type FieldValidator = Box<dyn Fn(&toml::Value) -> Result<(), String> + Send + Sync>;

pub struct Field {
	pub name: String,
	pub field_type: FieldType,
	pub validator: Option<FieldValidator>,
}

impl std::fmt::Debug for Field {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		write!(f, "Field({}: {:?}", self.name, self.field_type)?;
		if self.validator.is_some() {
			f.write_str(" + validator")?;
		}
		f.write_str(")")
	}
}

impl Field {
	pub fn new(name: impl Into<String>, field_type: FieldType) -> Self {
		Self {
			name: name.into(),
			field_type,
			validator: None,
		}
	}

	pub fn with_validator<F>(self, validator: F) -> Self
	where
		F: Fn(&toml::Value) -> Result<(), String> + Send + Sync + 'static,
	{
		Self {
			validator: Some(Box::new(validator)),
			..self
		}
	}
}

#[derive(Debug)]
pub struct Schema {
	pub required: Vec<Field>,
	pub optional: Vec<Field>,
}

impl Schema {
	pub fn new(required: Vec<Field>, optional: Vec<Field>) -> Self {
		Self { required, optional }
	}

	/// Unknown keys are ignored.
	pub fn validate(&self, config: &toml::Value) -> Result<(), ValidationError> {
		match config.as_table() {
			Some(table) => self.check_table("", table),
			None => Err(ValidationError::TypeMismatch {
				field: "root".to_string(),
				expected: "table".to_string(),
				actual: config.type_str().to_string(),
			}),
		}
	}

	fn check_table(&self, prefix: &str, table: &toml::Table) -> Result<(), ValidationError> {
		let required = self.required.iter().map(|f| (f, true));
		let optional = self.optional.iter().map(|f| (f, false));
		for (field, is_required) in required.chain(optional) {
			let path = if prefix.is_empty() {
				field.name.clone()
			} else {
				format!("{}.{}", prefix, field.name)
			};
			let Some(value) = table.get(&field.name) else {
				if is_required {
					return Err(ValidationError::MissingField(path));
				}
				continue;
			};
			field.field_type.check(&path, value)?;
			if let Some(validator) = &field.validator {
				validator(value)
					.map_err(|message| ValidationError::InvalidValue { field: path, message })?;
			}
		}
		Ok(())
	}
}

/// Implemented by every pluggable backend for its own options table.
pub trait ConfigSchema: Send + Sync {
	fn validate(&self, config: &toml::Value) -> Result<(), ValidationError>;
}

#[cfg(test)]
mod tests {
	use super::*;

	fn plugin_schema() -> Schema {
		let image = Schema::new(vec![Field::new("id", FieldType::String)], vec![]);
		Schema::new(
			vec![Field::new("plugin", FieldType::String)],
			vec![
				Field::new(
					"ssh_port",
					FieldType::Integer {
						min: Some(1),
						max: Some(65535),
					},
				),
				Field::new(
					"quota",
					FieldType::Table(Schema::new(
						vec![Field::new("vcpu", FieldType::Integer { min: Some(0), max: None })],
						vec![],
					)),
				),
				Field::new("images", FieldType::Array(Box::new(FieldType::Table(image)))),
			],
		)
	}

	fn parse(text: &str) -> toml::Value {
		toml::from_str(text).unwrap()
	}

	#[test]
	fn test_accepts_complete_plugin_table() {
		let value = parse(
			"plugin = \"simulated\"\nssh_port = 22\nextra = true\n[quota]\nvcpu = 8\n[[images]]\nid = \"img-1\"",
		);
		plugin_schema().validate(&value).unwrap();
	}

	#[test]
	fn test_missing_required_field() {
		let err = plugin_schema().validate(&parse("ssh_port = 22")).unwrap_err();
		assert!(matches!(err, ValidationError::MissingField(f) if f == "plugin"));
	}

	#[test]
	fn test_integer_bounds() {
		let err = plugin_schema()
			.validate(&parse("plugin = \"s\"\nssh_port = 70000"))
			.unwrap_err();
		assert!(err.to_string().contains("greater than maximum 65535"));
	}

	#[test]
	fn test_nested_errors_carry_path() {
		let err = plugin_schema()
			.validate(&parse("plugin = \"s\"\n[quota]\nvcpu = -1"))
			.unwrap_err();
		assert!(matches!(err, ValidationError::InvalidValue { ref field, .. } if field == "quota.vcpu"));

		let err = plugin_schema()
			.validate(&parse("plugin = \"s\"\n[[images]]\nid = \"a\"\n[[images]]\nid = 7"))
			.unwrap_err();
		assert!(matches!(
			err,
			ValidationError::TypeMismatch { ref field, ref expected, .. }
				if field == "images[1].id" && expected == "string"
		));
	}

	#[test]
	fn test_custom_validator() {
		let schema = Schema::new(
			vec![Field::new("path", FieldType::String).with_validator(|v| {
				match v.as_str() {
					Some("") => Err("must not be empty".into()),
					_ => Ok(()),
				}
			})],
			vec![],
		);
		let err = schema.validate(&parse("path = \"\"")).unwrap_err();
		assert!(matches!(err, ValidationError::InvalidValue { ref field, .. } if field == "path"));
	}
}
