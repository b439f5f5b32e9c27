use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};

use varkb_rs::model::{
    Alias, Characterization, Effect, EffectId, Evidence, ProteinRegion, Structure, Variant,
};
use varkb_rs::KnowledgeBaseDump;

const KINDS: [&str; 4] = ["infectivity", "binding affinity", "severity", "immune escape"];
const LEVELS: [&str; 3] = ["higher", "lower", "unchanged"];
const METHODS: [&str; 2] = ["experimental", "computational"];
const PUBLISHERS: [&str; 3] = ["nature", "cell", "biorxiv"];
const PROTEINS: [&str; 4] = ["Spike (surface glycoprotein)", "NSP3", "N", "ORF8"];

/// Knobs of the generated knowledge base
#[derive(Debug, Clone, Copy)]
pub struct GeneratorConfig {
    /// Distinct effect identity keys
    pub effect_groups: usize,
    /// Probability that an identity key is ingested more than once
    pub duplicate_probability: f64,
    pub evidence: usize,
    pub variants: usize,
    /// Distinct lineage names shared by the variants
    pub lineages: usize,
    /// Probability that a variant carries a second lineage name
    pub ambiguous_probability: f64,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            effect_groups: 200,
            duplicate_probability: 0.3,
            evidence: 300,
            variants: 120,
            lineages: 40,
            ambiguous_probability: 0.05,
        }
    }
}

pub fn generate_knowledge_base(config: GeneratorConfig, seed: u64) -> KnowledgeBaseDump {
    let mut rng = StdRng::seed_from_u64(seed);

    let mut effects = Vec::new();
    let mut next_id = 0u32;
    for group in 0..config.effect_groups {
        let copies = if rng.random_bool(config.duplicate_probability) {
            rng.random_range(2..=4)
        } else {
            1
        };
        let kind = KINDS[group % KINDS.len()];
        let level = LEVELS[rng.random_range(0..LEVELS.len())];
        let method = METHODS[rng.random_range(0..METHODS.len())];
        let changes = vec![format!("S:X{}Y", group)];
        for _ in 0..copies {
            next_id += 1;
            effects.push(Effect::new(
                format!("E{:06}", next_id),
                Some(kind),
                Some(level),
                Some(method),
                changes.clone(),
            ));
        }
    }
    effects.shuffle(&mut rng);
    let effect_ids: Vec<EffectId> = effects.iter().map(|e| e.id.clone()).collect();

    let citations = (config.evidence / 2).max(1);
    let mut evidence = Vec::with_capacity(config.evidence);
    for i in 0..config.evidence {
        let citation = format!("author {} et al.", rng.random_range(0..citations));
        let publisher = PUBLISHERS[rng.random_range(0..PUBLISHERS.len())];
        let referenced: Vec<EffectId> = (0..rng.random_range(0..=3))
            .map(|_| effect_ids[rng.random_range(0..effect_ids.len())].clone())
            .collect();
        evidence.push(
            Evidence::new(Some(&citation), Some("article"), None, Some(publisher), referenced)
                .with_id(format!("ev{:06}", i)),
        );
    }

    let mut variants = Vec::with_capacity(config.variants);
    for i in 0..config.variants {
        let mut variant = Variant::new(format!("{}", i + 1));
        if rng.random_bool(0.85) {
            let lineage = rng.random_range(0..config.lineages);
            variant = variant.with_alias(Alias::new("pango", format!("B.1.{}", lineage)));
            if rng.random_bool(config.ambiguous_probability) {
                let other = rng.random_range(0..config.lineages);
                variant = variant.with_alias(Alias::new("pango", format!("B.1.{}", other)));
            }
        }
        if rng.random_bool(0.5) {
            variant = variant.with_alias(
                Alias::new("who", format!("Greek{}", rng.random_range(0..10))).with_class("VOI"),
            );
        }
        variant = variant
            .with_aa_changes(Characterization::new(
                "phe",
                vec![format!("S:N{}Y", rng.random_range(0..50))],
            ))
            .with_nuc_changes(Characterization::new(
                "covariants",
                vec![format!("C{}T", rng.random_range(0..3000))],
            ));
        for _ in 0..rng.random_range(0..=3) {
            let id = &effect_ids[rng.random_range(0..effect_ids.len())];
            variant = variant.with_effect(id.as_str());
        }
        variants.push(variant);
    }

    KnowledgeBaseDump {
        effects,
        evidence,
        variants,
        ..KnowledgeBaseDump::default()
    }
}

/// Structures describing a subset of the known proteins, and regions over all of them
#[allow(dead_code)]
pub fn generate_protein_annotations(seed: u64) -> (Vec<Structure>, Vec<ProteinRegion>) {
    let mut rng = StdRng::seed_from_u64(seed);
    let described = &PROTEINS[..2];
    let structures = described
        .iter()
        .enumerate()
        .map(|(i, protein)| Structure::new(format!("s{}", i), "NC_045512").with_protein(*protein))
        .collect();
    let regions = (0..20)
        .map(|i| {
            let protein = PROTEINS[rng.random_range(0..PROTEINS.len())];
            ProteinRegion::new(format!("r{:03}", i), protein)
        })
        .collect();
    (structures, regions)
}
