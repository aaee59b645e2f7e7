//! Resource descriptor construction.
//!
//! Sources are merged in increasing precedence:
//! 1. SDK defaults (`telemetry.sdk.*`, `service.name=unknown_service`)
//! 2. Service identity and configured attributes
//! 3. `OTEL_RESOURCE_ATTRIBUTES`, then `OTEL_SERVICE_NAME`
//! 4. Host, OS and Rust runtime detectors

use crate::config::ResourceConfig;
use crate::error::TelemetryError;
use opentelemetry::KeyValue;
use opentelemetry_resource_detectors::{HostResourceDetector, OsResourceDetector};
use opentelemetry_sdk::Resource;
use opentelemetry_sdk::resource::{
    ResourceDetector, SdkProvidedResourceDetector, TelemetryResourceDetector,
};
use opentelemetry_semantic_conventions::SCHEMA_URL;
use opentelemetry_semantic_conventions::resource::{
    PROCESS_RUNTIME_NAME, SERVICE_NAME, SERVICE_VERSION,
};
use percent_encoding::percent_decode_str;

/// Environment variable holding `key=value` resource attributes.
pub const OTEL_RESOURCE_ATTRIBUTES: &str = "OTEL_RESOURCE_ATTRIBUTES";
/// Environment variable overriding the service name.
pub const OTEL_SERVICE_NAME: &str = "OTEL_SERVICE_NAME";

/// Semantic conventions 1.26 name of the environment attribute.
const DEPLOYMENT_ENVIRONMENT: &str = "deployment.environment";

/// Builds the resource attached to every span and metric.
///
/// Each source is built as its own [`Resource`] and merged over the previous
/// ones, so a later source overrides an attribute set by an earlier one.
///
/// # Errors
///
/// Returns [`TelemetryError::ResourceAttributes`] when
/// `OTEL_RESOURCE_ATTRIBUTES` is malformed.
pub fn build_resource(config: &ResourceConfig) -> Result<Resource, TelemetryError> {
    let defaults = Resource::builder_empty()
        .with_detector(Box::new(SdkProvidedResourceDetector))
        .with_detector(Box::new(TelemetryResourceDetector))
        .build();

    let mut identity = vec![
        KeyValue::new(SERVICE_NAME, config.service_name.clone()),
        KeyValue::new(SERVICE_VERSION, config.service_version.clone()),
        KeyValue::new(DEPLOYMENT_ENVIRONMENT, config.deployment_environment.clone()),
    ];
    identity.extend(
        config
            .attributes
            .iter()
            .map(|(k, v)| KeyValue::new(k.clone(), v.clone())),
    );
    let identity = Resource::builder_empty()
        .with_schema_url(identity, SCHEMA_URL)
        .build();

    let mut from_env = Vec::new();
    if let Ok(raw) = std::env::var(OTEL_RESOURCE_ATTRIBUTES) {
        from_env.extend(parse_resource_attributes(&raw)?);
    }
    if let Ok(name) = std::env::var(OTEL_SERVICE_NAME)
        && !name.trim().is_empty()
    {
        from_env.push(KeyValue::new(SERVICE_NAME, name.trim().to_string()));
    }
    let from_env = Resource::builder_empty().with_attributes(from_env).build();

    let mut resource = merge(&merge(&defaults, &identity), &from_env);

    if config.detect_host {
        let host = Resource::builder_empty()
            .with_detector(Box::new(HostResourceDetector::default()))
            .with_detector(Box::new(OsResourceDetector))
            .with_detector(Box::new(RustResourceDetector))
            .build();
        resource = merge(&resource, &host);
    }

    Ok(resource)
}

/// Combines two resources with `other` taking precedence.
///
/// Same semantics as the SDK's `Resource::merge`, which is `pub(crate)` in
/// opentelemetry_sdk 0.31.
fn merge(this: &Resource, other: &Resource) -> Resource {
    if this.is_empty() && this.schema_url().is_none() {
        return other.clone();
    }
    if other.is_empty() && other.schema_url().is_none() {
        return this.clone();
    }
    let attributes: Vec<KeyValue> = this
        .iter()
        .chain(other.iter())
        .map(|(k, v)| KeyValue::new(k.clone(), v.clone()))
        .collect();
    let schema_url = match (this.schema_url(), other.schema_url()) {
        (Some(a), Some(b)) if a == b => Some(a.to_string()),
        (Some(_), Some(_)) => None,
        (None, Some(url)) | (Some(url), None) => Some(url.to_string()),
        (None, None) => None,
    };
    match schema_url {
        Some(url) => Resource::builder_empty()
            .with_schema_url(attributes, url)
            .build(),
        None => Resource::builder_empty().with_attributes(attributes).build(),
    }
}

/// Parses the `key1=value1,key2=value2` format of `OTEL_RESOURCE_ATTRIBUTES`.
///
/// Values are percent-decoded. Empty entries are skipped.
///
/// # Errors
///
/// Returns [`TelemetryError::ResourceAttributes`] for an entry without `=`,
/// with an empty key, or whose decoded value is not UTF-8.
pub fn parse_resource_attributes(raw: &str) -> Result<Vec<KeyValue>, TelemetryError> {
    let mut attributes = Vec::new();

    for entry in raw.split(',') {
        if entry.trim().is_empty() {
            continue;
        }
        let malformed = || TelemetryError::ResourceAttributes {
            entry: entry.to_string(),
        };

        let (key, value) = entry.split_once('=').ok_or_else(malformed)?;
        let key = key.trim();
        if key.is_empty() {
            return Err(malformed());
        }
        let value = percent_decode_str(value.trim())
            .decode_utf8()
            .map_err(|_| malformed())?;

        attributes.push(KeyValue::new(key.to_string(), value.into_owned()));
    }

    Ok(attributes)
}

/// Detects Rust runtime resource attributes.
///
/// - `process.runtime.name` = "rust"
/// - `rust.target_os`, `rust.target_arch`, `rust.target_family`
/// - `rust.debug` (true for debug builds)
/// - `process.executable.size` (binary size in bytes)
pub struct RustResourceDetector;

impl ResourceDetector for RustResourceDetector {
    fn detect(&self) -> Resource {
        let mut attrs = vec![
            KeyValue::new(PROCESS_RUNTIME_NAME, "rust"),
            KeyValue::new("rust.target_os", std::env::consts::OS),
            KeyValue::new("rust.target_arch", std::env::consts::ARCH),
            KeyValue::new("rust.target_family", std::env::consts::FAMILY),
            KeyValue::new("rust.debug", cfg!(debug_assertions)),
        ];

        if let Ok(exe_path) = std::env::current_exe()
            && let Ok(metadata) = std::fs::metadata(&exe_path)
        {
            attrs.push(KeyValue::new(
                "process.executable.size",
                metadata.len() as i64,
            ));
        }

        Resource::builder_empty().with_attributes(attrs).build()
    }
}
