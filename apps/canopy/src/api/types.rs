//! # API Request/Response Types
//!
//! This module defines the JSON structures for the HTTP API and the CLI:
//! - The LionWeb-shaped chunk codec (`ChunkJson` and its parts)
//! - The `BulkResponse` envelope shared by every bulk, inspection and admin route
//! - Request bodies and query parameters

use canopy_core::{
    CanopyError, Chunk, ClassifierInstance, ClassifierKey, ClassifierResult, ContainmentValue,
    FormatVersion, HistorySupport, LanguageVersion, MetaPointer, PropertyValue, ReferenceEntry,
    ReferenceValue, RepositoryConfiguration, primitives::DEFAULT_REPOSITORY,
};
use serde::{Deserialize, Serialize};

// =============================================================================
// HEALTH RESPONSE
// =============================================================================

/// Health check response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

impl Default for HealthResponse {
    fn default() -> Self {
        Self {
            status: "ok".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

// =============================================================================
// CHUNK CODEC
// =============================================================================

/// `{language, version, key}` as it appears on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetaPointerJson {
    pub language: Option<String>,
    pub version: Option<String>,
    pub key: Option<String>,
}

impl From<&MetaPointer> for MetaPointerJson {
    fn from(mp: &MetaPointer) -> Self {
        Self {
            language: mp.language.clone(),
            version: mp.version.clone(),
            key: mp.key.clone(),
        }
    }
}

impl From<MetaPointerJson> for MetaPointer {
    fn from(json: MetaPointerJson) -> Self {
        Self {
            language: json.language,
            version: json.version,
            key: json.key,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LanguageJson {
    pub key: String,
    pub version: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PropertyJson {
    pub property: MetaPointerJson,
    pub value: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainmentJson {
    pub containment: MetaPointerJson,
    #[serde(default)]
    pub children: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReferenceTargetJson {
    pub resolve_info: Option<String>,
    pub reference: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReferenceJson {
    pub reference: MetaPointerJson,
    #[serde(default)]
    pub targets: Vec<ReferenceTargetJson>,
}

/// One node of a serialized chunk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeJson {
    pub id: String,
    pub classifier: MetaPointerJson,
    #[serde(default)]
    pub properties: Vec<PropertyJson>,
    #[serde(default)]
    pub containments: Vec<ContainmentJson>,
    #[serde(default)]
    pub references: Vec<ReferenceJson>,
    #[serde(default)]
    pub annotations: Vec<String>,
    #[serde(default)]
    pub parent: Option<String>,
}

impl From<&ClassifierInstance> for NodeJson {
    fn from(instance: &ClassifierInstance) -> Self {
        Self {
            id: instance.id.clone(),
            classifier: (&instance.classifier).into(),
            properties: instance
                .properties
                .iter()
                .map(|p| PropertyJson {
                    property: (&p.meta_pointer).into(),
                    value: p.value.clone(),
                })
                .collect(),
            containments: instance
                .containments
                .iter()
                .map(|c| ContainmentJson {
                    containment: (&c.meta_pointer).into(),
                    children: c.children.clone(),
                })
                .collect(),
            references: instance
                .references
                .iter()
                .map(|r| ReferenceJson {
                    reference: (&r.meta_pointer).into(),
                    targets: r
                        .entries
                        .iter()
                        .map(|e| ReferenceTargetJson {
                            resolve_info: e.resolve_info.clone(),
                            reference: e.target.clone(),
                        })
                        .collect(),
                })
                .collect(),
            annotations: instance.annotations.clone(),
            parent: instance.parent.clone(),
        }
    }
}

impl From<NodeJson> for ClassifierInstance {
    fn from(node: NodeJson) -> Self {
        let mut instance = ClassifierInstance::new(node.id, node.classifier.into());
        instance.parent = node.parent;
        instance.properties = node
            .properties
            .into_iter()
            .map(|p| PropertyValue::new(p.property.into(), p.value))
            .collect();
        instance.containments = node
            .containments
            .into_iter()
            .map(|c| ContainmentValue::new(c.containment.into(), c.children))
            .collect();
        instance.references = node
            .references
            .into_iter()
            .map(|r| {
                let entries = r
                    .targets
                    .into_iter()
                    .map(|t| ReferenceEntry::new(t.reference, t.resolve_info))
                    .collect();
                ReferenceValue::new(r.reference.into(), entries)
            })
            .collect();
        instance.annotations = node.annotations;
        instance
    }
}

/// A chunk in the LionWeb JSON serialization shape.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkJson {
    pub serialization_format_version: String,
    #[serde(default)]
    pub languages: Vec<LanguageJson>,
    #[serde(default)]
    pub nodes: Vec<NodeJson>,
}

impl From<&Chunk> for ChunkJson {
    fn from(chunk: &Chunk) -> Self {
        Self {
            serialization_format_version: chunk.format_version.as_str().to_string(),
            languages: chunk
                .languages
                .iter()
                .map(|l| LanguageJson {
                    key: l.key.clone(),
                    version: l.version.clone(),
                })
                .collect(),
            nodes: chunk.instances.iter().map(NodeJson::from).collect(),
        }
    }
}

impl TryFrom<ChunkJson> for Chunk {
    type Error = CanopyError;

    /// Decode a wire chunk. An empty `languages` list is derived from the nodes.
    fn try_from(json: ChunkJson) -> Result<Self, Self::Error> {
        let format_version: FormatVersion = json.serialization_format_version.parse()?;
        let instances: Vec<ClassifierInstance> =
            json.nodes.into_iter().map(ClassifierInstance::from).collect();

        if json.languages.is_empty() {
            return Ok(Chunk::from_instances(format_version, instances));
        }
        Ok(Chunk {
            format_version,
            languages: json
                .languages
                .into_iter()
                .map(|l| LanguageVersion::new(l.key, l.version))
                .collect(),
            instances,
        })
    }
}

impl ChunkJson {
    /// Parse a chunk from JSON bytes.
    pub fn parse(bytes: &[u8]) -> Result<Chunk, CanopyError> {
        let json: ChunkJson = serde_json::from_slice(bytes)
            .map_err(|e| CanopyError::DeserializationError(format!("Invalid chunk JSON: {}", e)))?;
        Chunk::try_from(json)
    }
}

// =============================================================================
// RESPONSE ENVELOPE
// =============================================================================

/// Envelope returned by every bulk, inspection and admin route.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(bound(deserialize = "T: Deserialize<'de>"))]
pub struct BulkResponse<T> {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Requested IDs that were not found (retrieve only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unknown: Option<Vec<String>>,
}

impl<T> BulkResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
            unknown: None,
        }
    }

    pub fn error(msg: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(msg.into()),
            unknown: None,
        }
    }

    /// Attach unknown IDs; an empty list is omitted.
    #[must_use]
    pub fn with_unknown(mut self, unknown: Vec<String>) -> Self {
        if !unknown.is_empty() {
            self.unknown = Some(unknown);
        }
        self
    }
}

/// Result of a successful mutation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionJson {
    pub version: String,
}

// =============================================================================
// INSPECTION RESPONSES
// =============================================================================

/// One row of `nodesByClassifier`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassifierCountJson {
    pub language: String,
    pub classifier: String,
    pub ids: Vec<String>,
    pub size: usize,
}

impl From<(ClassifierKey, ClassifierResult)> for ClassifierCountJson {
    fn from((key, result): (ClassifierKey, ClassifierResult)) -> Self {
        Self {
            language: key.language,
            classifier: key.key,
            ids: result.ids,
            size: result.size,
        }
    }
}

/// One row of `nodesByLanguage`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LanguageCountJson {
    pub language: String,
    pub ids: Vec<String>,
    pub size: usize,
}

impl From<(String, ClassifierResult)> for LanguageCountJson {
    fn from((language, result): (String, ClassifierResult)) -> Self {
        Self {
            language,
            ids: result.ids,
            size: result.size,
        }
    }
}

// =============================================================================
// ADMIN REQUESTS/RESPONSES
// =============================================================================

/// A repository as listed by `/admin/repositories`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RepositoryJson {
    pub name: String,
    pub format_version: String,
    pub history: HistorySupport,
}

impl From<&RepositoryConfiguration> for RepositoryJson {
    fn from(configuration: &RepositoryConfiguration) -> Self {
        Self {
            name: configuration.name.clone(),
            format_version: configuration.format_version.as_str().to_string(),
            history: configuration.history,
        }
    }
}

/// Body of `/admin/createRepository`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateRepositoryRequest {
    pub name: String,
    #[serde(default)]
    pub format_version: FormatVersion,
    #[serde(default)]
    pub history: HistorySupport,
}

impl From<CreateRepositoryRequest> for RepositoryConfiguration {
    fn from(request: CreateRepositoryRequest) -> Self {
        RepositoryConfiguration::new(request.name)
            .with_format_version(request.format_version)
            .with_history(request.history)
    }
}

/// Snapshot export.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportJson {
    /// Base64-encoded snapshot bytes.
    pub data: String,
    /// Canonical checksum of the repository content.
    pub checksum: u64,
    /// BLAKE3 hash of the canonical content.
    pub hash: String,
}

impl ExportJson {
    #[must_use]
    pub fn new(data: &[u8], checksum: u64, hash: String) -> Self {
        Self {
            data: base64::Engine::encode(&base64::engine::general_purpose::STANDARD, data),
            checksum,
            hash,
        }
    }
}

// =============================================================================
// REQUEST BODIES AND QUERY PARAMETERS
// =============================================================================

/// Body of `/bulk/retrieve`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrieveRequest {
    pub ids: Vec<String>,
}

fn default_repository() -> String {
    DEFAULT_REPOSITORY.to_string()
}

/// `?repository=R`, defaulting to the default repository.
#[derive(Debug, Clone, Deserialize)]
pub struct RepositoryParams {
    #[serde(default = "default_repository")]
    pub repository: String,
}

/// `?repository=R&depthLimit=N`. An absent depth limit is unbounded.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetrieveParams {
    #[serde(default = "default_repository")]
    pub repository: String,
    pub depth_limit: Option<i64>,
}

/// `?repository=R&count=N`.
#[derive(Debug, Clone, Deserialize)]
pub struct IdsParams {
    #[serde(default = "default_repository")]
    pub repository: String,
    pub count: i64,
}

/// `?repository=R&limit=N`.
#[derive(Debug, Clone, Deserialize)]
pub struct LimitParams {
    #[serde(default = "default_repository")]
    pub repository: String,
    pub limit: Option<usize>,
}
