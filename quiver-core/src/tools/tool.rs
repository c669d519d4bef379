//! Tool definitions
//!
//! A [`ToolDefinition`] is the immutable descriptor behind every handle: name,
//! description, schemas, tags, metadata and the knobs the engine reads at call
//! time. Build one with [`ToolDefinition::builder`].

use super::digest::DigestOptions;
use super::limiter::ConcurrencyLimiter;
use super::policy::PolicyHook;
use super::schema::{JsonSchema, Schema};
use crate::error::{QuiverError, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::Arc;
use std::time::Duration;

/// Metadata keys with engine-level meaning
pub const RESERVED_METADATA_KEYS: &[&str] = &["mutates", "readOnly", "dangerous", "concurrency"];

/// What to do when a handler's output fails the output schema
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputValidationMode {
    /// Skip output validation
    Off,
    /// Attach a report, keep the outcome
    #[default]
    Annotate,
    /// Turn an invalid output into a validation error
    Strict,
}

/// Trim, lowercase and deduplicate tags, keeping first-seen order
pub fn normalize_tags<I, S>(tags: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut out: Vec<String> = Vec::new();
    for tag in tags {
        let tag = tag.as_ref().trim().to_lowercase();
        if !tag.is_empty() && !out.contains(&tag) {
            out.push(tag);
        }
    }
    out
}

/// Immutable tool descriptor
#[derive(Clone)]
pub struct ToolDefinition {
    name: String,
    description: String,
    input_schema: Arc<dyn Schema>,
    output_schema: Option<Arc<dyn Schema>>,
    tags: Vec<String>,
    metadata: Map<String, Value>,
    policy: Option<Arc<dyn PolicyHook>>,
    digest: DigestOptions,
    concurrency: Option<usize>,
    output_validation: Option<OutputValidationMode>,
    timeout: Option<Duration>,
}

impl std::fmt::Debug for ToolDefinition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolDefinition")
            .field("name", &self.name)
            .field("description", &self.description)
            .field("tags", &self.tags)
            .field("metadata", &self.metadata)
            .field("concurrency", &self.concurrency)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl ToolDefinition {
    /// Start building a definition
    pub fn builder(name: impl Into<String>) -> ToolDefinitionBuilder {
        ToolDefinitionBuilder::new(name)
    }

    /// Shorthand for a definition with a JSON input schema
    pub fn new(name: impl Into<String>, description: impl Into<String>, schema: Value) -> Result<Self> {
        Self::builder(name)
            .description(description)
            .input_schema(schema)
            .build()
    }

    /// A builder pre-filled with this definition
    pub fn to_builder(&self) -> ToolDefinitionBuilder {
        ToolDefinitionBuilder {
            name: self.name.clone(),
            description: self.description.clone(),
            input_schema: Some(SchemaSource::Compiled(self.input_schema.clone())),
            output_schema: self.output_schema.clone().map(SchemaSource::Compiled),
            tags: self.tags.clone(),
            metadata: self.metadata.clone(),
            policy: self.policy.clone(),
            digest: self.digest,
            concurrency: self.concurrency,
            output_validation: self.output_validation,
            timeout: self.timeout,
        }
    }

    /// Tool name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Human-readable description
    pub fn description(&self) -> &str {
        &self.description
    }

    /// Input schema
    pub fn input_schema(&self) -> &Arc<dyn Schema> {
        &self.input_schema
    }

    /// Output schema, if any
    pub fn output_schema(&self) -> Option<&Arc<dyn Schema>> {
        self.output_schema.as_ref()
    }

    /// Normalized tags
    pub fn tags(&self) -> &[String] {
        &self.tags
    }

    /// Check for a tag, case-insensitively
    pub fn has_tag(&self, tag: &str) -> bool {
        let tag = tag.trim().to_lowercase();
        self.tags.contains(&tag)
    }

    /// Free-form metadata
    pub fn metadata(&self) -> &Map<String, Value> {
        &self.metadata
    }

    /// Tool-level policy hook
    pub fn policy(&self) -> Option<&Arc<dyn PolicyHook>> {
        self.policy.as_ref()
    }

    /// Digest options
    pub fn digest(&self) -> DigestOptions {
        self.digest
    }

    /// Tool-level timeout
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// Output validation mode, if the tool chose one
    pub fn output_validation(&self) -> Option<OutputValidationMode> {
        self.output_validation
    }

    /// Concurrency limit from the definition, falling back to metadata
    pub fn concurrency(&self) -> Option<usize> {
        self.concurrency
            .or_else(|| self.metadata.get("concurrency").and_then(|v| ConcurrencyLimiter::from_value(v).limit()))
    }

    /// Serializable form (policy hooks are not serialized)
    pub fn to_record(&self) -> ToolRecord {
        ToolRecord {
            name: self.name.clone(),
            description: self.description.clone(),
            input_schema: self.input_schema.to_json(),
            output_schema: self.output_schema.as_ref().map(|schema| schema.to_json()),
            tags: self.tags.clone(),
            metadata: self.metadata.clone(),
            digest: self.digest,
            concurrency: self.concurrency,
            output_validation: self.output_validation,
            timeout: self.timeout,
        }
    }

    /// Rebuild a definition from its serialized form
    pub fn from_record(record: ToolRecord) -> Result<Self> {
        let mut builder = Self::builder(record.name)
            .description(record.description)
            .input_schema(record.input_schema)
            .tags(record.tags)
            .digest(record.digest);
        if let Some(schema) = record.output_schema {
            builder = builder.output_schema(schema);
        }
        if let Some(limit) = record.concurrency {
            builder = builder.concurrency(limit);
        }
        if let Some(mode) = record.output_validation {
            builder = builder.output_validation(mode);
        }
        if let Some(timeout) = record.timeout {
            builder = builder.timeout(timeout);
        }
        for (key, value) in record.metadata {
            builder = builder.metadata(key, value);
        }
        builder.build()
    }
}

/// Serializable form of a [`ToolDefinition`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolRecord {
    /// Tool name
    pub name: String,

    /// Description
    #[serde(default)]
    pub description: String,

    /// JSON input schema
    pub input_schema: Value,

    /// JSON output schema
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_schema: Option<Value>,

    /// Tags
    #[serde(default)]
    pub tags: Vec<String>,

    /// Metadata
    #[serde(default)]
    pub metadata: Map<String, Value>,

    /// Digest options
    #[serde(default)]
    pub digest: DigestOptions,

    /// Concurrency limit
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub concurrency: Option<usize>,

    /// Output validation mode
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_validation: Option<OutputValidationMode>,

    /// Timeout
    #[serde(default, skip_serializing_if = "Option::is_none", with = "humantime_serde")]
    pub timeout: Option<Duration>,
}

#[derive(Clone)]
enum SchemaSource {
    Json(Value),
    Compiled(Arc<dyn Schema>),
}

/// Builder for [`ToolDefinition`]
#[derive(Clone)]
pub struct ToolDefinitionBuilder {
    name: String,
    description: String,
    input_schema: Option<SchemaSource>,
    output_schema: Option<SchemaSource>,
    tags: Vec<String>,
    metadata: Map<String, Value>,
    policy: Option<Arc<dyn PolicyHook>>,
    digest: DigestOptions,
    concurrency: Option<usize>,
    output_validation: Option<OutputValidationMode>,
    timeout: Option<Duration>,
}

impl ToolDefinitionBuilder {
    /// Create a builder
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            input_schema: None,
            output_schema: None,
            tags: Vec::new(),
            metadata: Map::new(),
            policy: None,
            digest: DigestOptions::default(),
            concurrency: None,
            output_validation: None,
            timeout: None,
        }
    }

    /// Rename
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Set description
    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Set a JSON input schema
    pub fn input_schema(mut self, schema: Value) -> Self {
        self.input_schema = Some(SchemaSource::Json(schema));
        self
    }

    /// Set a custom schema implementation
    pub fn schema(mut self, schema: Arc<dyn Schema>) -> Self {
        self.input_schema = Some(SchemaSource::Compiled(schema));
        self
    }

    /// Set a JSON output schema
    pub fn output_schema(mut self, schema: Value) -> Self {
        self.output_schema = Some(SchemaSource::Json(schema));
        self
    }

    /// Set a custom output schema implementation
    pub fn output(mut self, schema: Arc<dyn Schema>) -> Self {
        self.output_schema = Some(SchemaSource::Compiled(schema));
        self
    }

    /// Add a tag
    pub fn tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }

    /// Add several tags
    pub fn tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags.extend(tags.into_iter().map(Into::into));
        self
    }

    /// Set a metadata entry
    pub fn metadata(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    /// Mark the tool as mutating
    pub fn mutates(self, mutates: bool) -> Self {
        self.metadata("mutates", Value::Bool(mutates))
    }

    /// Mark the tool as dangerous
    pub fn dangerous(self, dangerous: bool) -> Self {
        self.metadata("dangerous", Value::Bool(dangerous))
    }

    /// Attach a tool-level policy hook
    pub fn policy(mut self, hook: Arc<dyn PolicyHook>) -> Self {
        self.policy = Some(hook);
        self
    }

    /// Set digest options
    pub fn digest(mut self, digest: DigestOptions) -> Self {
        self.digest = digest;
        self
    }

    /// Limit concurrent executions of this tool
    pub fn concurrency(mut self, limit: usize) -> Self {
        self.concurrency = Some(limit);
        self
    }

    /// Set output validation mode
    pub fn output_validation(mut self, mode: OutputValidationMode) -> Self {
        self.output_validation = Some(mode);
        self
    }

    /// Set a tool-level timeout
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Build the definition
    ///
    /// # Errors
    ///
    /// Returns an error if the name is empty or a schema is not usable.
    pub fn build(self) -> Result<ToolDefinition> {
        let name = self.name.trim().to_string();
        if name.is_empty() {
            return Err(QuiverError::InvalidDefinition(
                "tool name must not be empty".to_string(),
            ));
        }

        let input_schema: Arc<dyn Schema> = match self.input_schema {
            Some(SchemaSource::Json(value)) => Arc::new(JsonSchema::new(value).map_err(|e| {
                QuiverError::InvalidDefinition(format!("tool '{}': {}", name, e))
            })?),
            Some(SchemaSource::Compiled(schema)) => schema,
            None => Arc::new(JsonSchema::any_object()?),
        };

        let output_schema: Option<Arc<dyn Schema>> = match self.output_schema {
            Some(SchemaSource::Json(value)) => Some(Arc::new(JsonSchema::for_output(value).map_err(|e| {
                QuiverError::InvalidDefinition(format!("tool '{}': {}", name, e))
            })?)),
            Some(SchemaSource::Compiled(schema)) => Some(schema),
            None => None,
        };

        let concurrency = self.concurrency.filter(|limit| *limit > 0);

        Ok(ToolDefinition {
            name,
            description: self.description,
            input_schema,
            output_schema,
            tags: normalize_tags(&self.tags),
            metadata: self.metadata,
            policy: self.policy,
            digest: self.digest,
            concurrency,
            output_validation: self.output_validation,
            timeout: self.timeout,
        })
    }
}
