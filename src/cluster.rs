//! # Variant Cluster Merging
//!
//! Merges variant clusters that share an external identifier under the
//! configured namespace. Source clusters carrying several identifiers are first
//! pooled into every group they belong to, then each group drops the namespace
//! aliases that do not match its own identifier. Clusters without an identifier
//! in the namespace pass through untouched.

use crate::config::{ClusterConfig, FindingPolicy};
use crate::error::{ReconcileError, Result};
use crate::model::{Variant, VariantId};
use rayon::prelude::*;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, instrument, warn};

/// What the merger did, per output cluster
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ClusterMergeReport {
    /// Source clusters carrying at least one identifier in the namespace
    pub source_clusters: usize,
    /// Output clusters derived from an identifier
    pub merged_clusters: usize,
    /// Clusters passed through unchanged
    pub passthrough: usize,
    /// Source clusters carrying more than one identifier in the namespace
    pub ambiguous_sources: Vec<VariantId>,
    /// Source cluster ids pooled into each merged cluster
    pub membership: BTreeMap<VariantId, Vec<VariantId>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterMergeOutcome {
    /// Merged and passthrough clusters, sorted by id
    pub variants: Vec<Variant>,
    pub report: ClusterMergeReport,
}

/// Merge variant clusters by external identifier.
#[instrument(skip_all, fields(records = variants.len(), namespace = %config.namespace))]
pub fn merge_clusters(variants: Vec<Variant>, config: &ClusterConfig) -> Result<ClusterMergeOutcome> {
    let namespace = config.namespace.as_str();
    let (keyed, passthrough): (Vec<Variant>, Vec<Variant>) = variants
        .into_iter()
        .partition(|variant| variant.has_identifier(namespace));

    let mut groups: BTreeMap<String, Vec<usize>> = BTreeMap::new();
    let mut ambiguous_sources = Vec::new();
    for (index, variant) in keyed.iter().enumerate() {
        let names: BTreeSet<&str> = variant.identifiers(namespace).collect();
        if names.len() > 1 {
            ambiguous_sources.push(variant.id.clone());
        }
        for name in names {
            groups.entry(name.to_string()).or_default().push(index);
        }
    }
    ambiguous_sources.sort();

    if !ambiguous_sources.is_empty() {
        warn!(
            count = ambiguous_sources.len(),
            example = %ambiguous_sources[0],
            "variant clusters carry more than one identifier in the merge namespace"
        );
        if config.over_merge == FindingPolicy::Abort {
            return Err(ReconcileError::OverMerge {
                namespace: namespace.to_string(),
                count: ambiguous_sources.len(),
                example: ambiguous_sources[0].to_string(),
            });
        }
    }

    let passthrough_ids: BTreeSet<&VariantId> = passthrough.iter().map(|v| &v.id).collect();
    if let Some(name) = groups
        .keys()
        .find(|name| passthrough_ids.contains(&VariantId::for_identifier(namespace, name)))
    {
        return Err(ReconcileError::IdCollision {
            id: VariantId::for_identifier(namespace, name).0,
        });
    }

    let merged: Vec<(Variant, Vec<VariantId>)> = groups
        .into_par_iter()
        .map(|(name, members)| merge_group(namespace, &name, &members, &keyed))
        .collect();

    let mut membership = BTreeMap::new();
    let mut output = Vec::with_capacity(merged.len() + passthrough.len());
    for (variant, sources) in merged {
        membership.insert(variant.id.clone(), sources);
        output.push(variant);
    }

    let report = ClusterMergeReport {
        source_clusters: keyed.len(),
        merged_clusters: output.len(),
        passthrough: passthrough.len(),
        ambiguous_sources,
        membership,
    };

    output.extend(passthrough);
    output.sort_by(|a, b| a.id.cmp(&b.id));

    debug!(
        source_clusters = report.source_clusters,
        merged_clusters = report.merged_clusters,
        passthrough = report.passthrough,
        "merged variant clusters"
    );

    Ok(ClusterMergeOutcome {
        variants: output,
        report,
    })
}

/// Pool every source cluster of one identifier and keep only that identifier
/// among the namespace aliases.
fn merge_group(
    namespace: &str,
    name: &str,
    members: &[usize],
    sources: &[Variant],
) -> (Variant, Vec<VariantId>) {
    let mut merged = Variant::new(VariantId::for_identifier(namespace, name).0);
    let mut member_ids = Vec::with_capacity(members.len());
    for &index in members {
        merged.absorb(&sources[index]);
        member_ids.push(sources[index].id.clone());
    }
    merged
        .aliases
        .retain(|alias| !alias.in_namespace(namespace) || alias.name == name);
    member_ids.sort();
    (merged, member_ids)
}
