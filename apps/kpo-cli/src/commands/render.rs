// render.rs - Print the engine exceptions a manifest directory produces.

use std::path::Path;
use std::sync::Arc;

use kpo_exceptions::kyverno::PolicyException;
use kpo_exceptions::{MemoryStore, OperatorConfig};

use super::driver;
use super::manifests;

pub async fn execute(config: &OperatorConfig, manifest_dir: &Path) -> anyhow::Result<()> {
    let sources = manifests::load_dir(manifest_dir)?;
    if sources.is_empty() {
        println!("No manifests found in {}", manifest_dir.display());
        return Ok(());
    }

    let store = Arc::new(MemoryStore::new());
    let report = driver::run(store.clone(), config, sources).await?;

    let exceptions: Vec<PolicyException> = store.list();
    print!("{}", to_yaml_stream(&exceptions)?);

    for (key, policies) in &report.waiting {
        eprintln!("{} is waiting for policies: {}", key, policies.join(", "));
    }
    let failures = report.metrics.total_failures();
    if failures > 0 {
        anyhow::bail!("{} reconciliation(s) failed", failures);
    }
    Ok(())
}

/// Multi-document YAML, one document per exception.
fn to_yaml_stream(exceptions: &[PolicyException]) -> anyhow::Result<String> {
    let mut out = String::new();
    for exception in exceptions {
        out.push_str("---\n");
        out.push_str(&serde_yaml::to_string(exception)?);
    }
    Ok(out)
}
