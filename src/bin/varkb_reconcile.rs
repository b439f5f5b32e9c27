use std::fs;
use std::path::Path;

use tracing_subscriber::EnvFilter;
use varkb_rs::config::{
    ClusterOverrides, ConfigOverrides, FindingPolicy, ReconcileConfig, StorageOverrides,
};
use varkb_rs::{KnowledgeBaseDump, Reconciler};

fn parse_arg(flag: &str) -> Option<String> {
    let mut args = std::env::args();
    while let Some(arg) = args.next() {
        if arg == flag {
            return args.next();
        }
    }
    None
}

fn has_flag(flag: &str) -> bool {
    std::env::args().any(|arg| arg == flag)
}

fn print_help() {
    eprintln!(
        r#"varkb_reconcile - deduplicate and reconcile a variant knowledge base

USAGE:
    varkb_reconcile [OPTIONS]

OPTIONS:
    -c, --config <FILE>       Path to config file (TOML)
    -d, --data-dir <DIR>      RocksDB data directory (in-memory store when absent)
        --repair              Repair the data directory before opening
    -n, --namespace <NAME>    Alias namespace used as merge key [default: pango]
        --over-merge <P>      report | abort
        --load <FILE>         Ingest a JSON dump before the pass
        --dump <FILE>         Write the reconciled collections as a JSON dump
        --plan                Compute the pass and print its report without committing
        --report <FILE>       Write the pass report as JSON
    -h, --help                Print help

ENVIRONMENT:
    VARKB_CONFIG                  Path to config file
    VARKB_CLUSTERS__NAMESPACE     Alias namespace
    VARKB_REFERENCES__DANGLING    report | abort
    VARKB_STORAGE__DATA_DIR       RocksDB data directory
    RUST_LOG                      Log filter [default: info]

CONFIG FILE (varkb.toml):
    [clusters]
    namespace = "pango"
    over_merge = "report"

    [housekeeping]
    dedupe_aa_changes = true
"#
    );
}

fn parse_policy(value: &str) -> anyhow::Result<FindingPolicy> {
    match value {
        "report" => Ok(FindingPolicy::Report),
        "abort" => Ok(FindingPolicy::Abort),
        other => Err(anyhow::anyhow!("unknown policy {other}, expected report or abort")),
    }
}

fn load_dump(path: &Path) -> anyhow::Result<KnowledgeBaseDump> {
    let raw = fs::read_to_string(path)?;
    let dump = serde_json::from_str(&raw)?;
    Ok(dump)
}

fn main() -> anyhow::Result<()> {
    if has_flag("-h") || has_flag("--help") {
        print_help();
        return Ok(());
    }

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // Build CLI overrides
    let mut overrides = ConfigOverrides::default();
    let mut cluster_overrides = ClusterOverrides::default();
    let mut storage_overrides = StorageOverrides::default();

    if let Some(namespace) = parse_arg("--namespace").or_else(|| parse_arg("-n")) {
        cluster_overrides.namespace = Some(namespace);
    }
    if let Some(policy) = parse_arg("--over-merge") {
        cluster_overrides.over_merge = Some(parse_policy(&policy)?);
    }
    if let Some(data_dir) = parse_arg("--data-dir").or_else(|| parse_arg("-d")) {
        storage_overrides.data_dir = Some(data_dir.into());
    }
    if has_flag("--repair") {
        storage_overrides.repair = Some(true);
    }

    if cluster_overrides.namespace.is_some() || cluster_overrides.over_merge.is_some() {
        overrides.clusters = Some(cluster_overrides);
    }
    if storage_overrides.data_dir.is_some() || storage_overrides.repair.is_some() {
        overrides.storage = Some(storage_overrides);
    }

    // Load config: CLI > Env > File > Defaults
    let config_path = parse_arg("--config")
        .or_else(|| parse_arg("-c"))
        .or_else(|| std::env::var("VARKB_CONFIG").ok());
    let config = ReconcileConfig::load(config_path.as_deref(), overrides)?;

    let mut reconciler = Reconciler::open(config)?;

    if let Some(path) = parse_arg("--load") {
        let dump = load_dump(Path::new(&path))?;
        let documents = dump.document_count();
        reconciler.import(dump)?;
        tracing::info!(path = %path, documents, "loaded knowledge base dump");
    }

    let report = if has_flag("--plan") {
        reconciler.plan_pass()?.report().clone()
    } else {
        reconciler.run_pass()?
    };

    let rendered = serde_json::to_string_pretty(&report)?;
    match parse_arg("--report") {
        Some(path) => fs::write(path, rendered)?,
        None => println!("{rendered}"),
    }

    if let Some(path) = parse_arg("--dump") {
        let dump = reconciler.export()?;
        fs::write(&path, serde_json::to_vec_pretty(&dump)?)?;
        tracing::info!(path = %path, documents = dump.document_count(), "wrote knowledge base dump");
    }

    Ok(())
}
