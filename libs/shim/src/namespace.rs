//! Namespace quota resolver.
//!
//! Before an application is registered, annotations on its namespace are
//! folded into the request tags: a resource quota, a guaranteed resource
//! share, and an optional parent-queue override. Malformed annotations
//! are reported and skipped; they never block application creation.

use std::collections::BTreeMap;

use tracing::{debug, error, warn};

use gantry_model::{constants, Resource};

use crate::metadata::ApplicationMetadata;
use crate::orchestrator::Orchestrator;

/// Enrich application metadata from its namespace annotations, if the
/// request names a namespace.
pub(crate) async fn enrich_from_namespace(
    orchestrator: &dyn Orchestrator,
    metadata: &mut ApplicationMetadata,
) {
    let Some(namespace) = metadata
        .tags
        .get(constants::APP_TAG_NAMESPACE)
        .filter(|ns| !ns.is_empty())
        .cloned()
    else {
        return;
    };

    let ns = match orchestrator.get_namespace(&namespace).await {
        Ok(Some(ns)) => ns,
        Ok(None) => {
            debug!(namespace = %namespace, "Namespace not found, skipping enrichment");
            return;
        }
        Err(e) => {
            warn!(namespace = %namespace, error = %e, "Namespace lookup failed, skipping enrichment");
            return;
        }
    };
    let annotations = &ns.meta.annotations;

    // Quota: the structured annotation wins over the legacy per-resource
    // ones.
    if let Some(json) = annotations.get(constants::ANNOTATION_NAMESPACE_QUOTA) {
        match parse_resource_json(json) {
            Ok(quota) => {
                insert_resource_tag(
                    metadata,
                    constants::APP_TAG_NAMESPACE_RESOURCE_QUOTA,
                    &quota,
                );
            }
            Err(e) => {
                error!(namespace = %namespace, error = %e, "Unparseable namespace quota annotation");
            }
        }
    } else {
        let legacy: BTreeMap<String, String> = annotations
            .iter()
            .filter_map(|(key, value)| {
                key.strip_prefix(constants::ANNOTATION_NAMESPACE_MAX_PREFIX)
                    .map(|resource_name| (resource_name.to_string(), value.clone()))
            })
            .collect();
        if !legacy.is_empty() {
            match Resource::from_resource_list(&legacy) {
                Ok(quota) => {
                    insert_resource_tag(
                        metadata,
                        constants::APP_TAG_NAMESPACE_RESOURCE_QUOTA,
                        &quota,
                    );
                }
                Err(e) => {
                    error!(namespace = %namespace, error = %e, "Unparseable legacy quota annotation");
                }
            }
        }
    }

    if let Some(json) = annotations.get(constants::ANNOTATION_NAMESPACE_GUARANTEED) {
        match parse_resource_json(json) {
            Ok(guaranteed) => {
                insert_resource_tag(
                    metadata,
                    constants::APP_TAG_NAMESPACE_RESOURCE_GUARANTEED,
                    &guaranteed,
                );
            }
            Err(e) => {
                error!(namespace = %namespace, error = %e, "Unparseable guaranteed resource annotation");
            }
        }
    }

    if let Some(parent_queue) = annotations.get(constants::ANNOTATION_PARENT_QUEUE) {
        metadata.tags.insert(
            constants::APP_TAG_NAMESPACE_PARENT_QUEUE.to_string(),
            parent_queue.clone(),
        );
    }
}

fn parse_resource_json(json: &str) -> anyhow::Result<Resource> {
    let list: BTreeMap<String, String> = serde_json::from_str(json)?;
    Ok(Resource::from_resource_list(&list)?)
}

fn insert_resource_tag(metadata: &mut ApplicationMetadata, tag: &str, resource: &Resource) {
    match serde_json::to_string(resource) {
        Ok(serialized) => {
            metadata.tags.insert(tag.to_string(), serialized);
        }
        Err(e) => error!(tag, error = %e, "Failed to serialize resource tag"),
    }
}
