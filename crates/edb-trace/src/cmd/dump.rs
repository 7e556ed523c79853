// EDB - Ethereum Debugger
// Copyright (C) 2024 Zhuo Zhang and Wuqi Zhang
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

use std::{
    collections::BTreeMap,
    fs,
    path::{Path, PathBuf},
    time::Duration,
};

use alloy_primitives::TxHash;
use edb_trace_common::types::TraceInfo;
use edb_trace_engine::{
    DirectoryResolver, Engine, EngineConfig, ImportResolver, RpcDataSource, SolcOutput,
};
use eyre::{Result, WrapErr};
use serde_json::Value;

use crate::{Cli, DumpArgs};

/// Extract the trace of `args.tx_hash` and write it as JSON, or substituted into a template
pub async fn dump(cli: &Cli, args: &DumpArgs) -> Result<()> {
    let tx_hash: TxHash = args.tx_hash.parse().wrap_err("invalid transaction hash")?;

    // Step 1: compiler output and sources
    let solc = SolcOutput::from_path(&args.solc_output)?;
    let provided = provided_sources(args)?;
    let resolver = args.sources.as_ref().map(DirectoryResolver::new);

    let config = engine_config(cli, args);
    let engine = Engine::from_solc_output(
        &config,
        &solc,
        provided,
        resolver.as_ref().map(|r| r as &dyn ImportResolver),
    );

    // Step 2: correlate against the node
    let source = RpcDataSource::connect(&config).await?;
    let info = engine.extract_tx_info(&source, tx_hash).await?;

    // Step 3: render
    let template = args
        .template
        .as_ref()
        .map(|path| {
            fs::read_to_string(path)
                .wrap_err_with(|| format!("failed to read template {}", path.display()))
        })
        .transpose()?;
    let rendered = render(&info, template.as_deref(), tx_hash)?;

    let output = args.output.clone().unwrap_or_else(|| default_output(tx_hash, template.is_some()));
    fs::write(&output, rendered)
        .wrap_err_with(|| format!("failed to write {}", output.display()))?;

    tracing::info!(
        "Wrote trace of {} steps ({} matched) to {}",
        info.trace.len(),
        info.matched_step_count(),
        output.display()
    );
    Ok(())
}

fn engine_config(cli: &Cli, args: &DumpArgs) -> EngineConfig {
    let mut config = EngineConfig::default()
        .with_rpc_url(cli.rpc_url.clone())
        .with_cache_disabled(cli.disable_cache);
    if let Some(dir) = &cli.cache_dir {
        config = config.with_cache_dir(dir);
    }
    if let Some(ttl) = args.code_cache_ttl {
        config = config.with_code_cache_ttl((ttl > 0).then(|| Duration::from_secs(ttl)));
    }
    if let Some(deadline) = args.deadline {
        config = config.with_deadline(Duration::from_secs(deadline));
    }
    config
}

/// Sources given on the command line: standard-JSON input contents, then explicit files
fn provided_sources(args: &DumpArgs) -> Result<BTreeMap<String, String>> {
    let mut sources = BTreeMap::new();

    if let Some(input) = &args.solc_input {
        sources.extend(standard_input_sources(input)?);
    }

    for path in &args.source_files {
        let content = fs::read_to_string(path)
            .wrap_err_with(|| format!("failed to read source {}", path.display()))?;
        sources.insert(path.to_string_lossy().into_owned(), content);
    }

    Ok(sources)
}

/// `sources[path].content` of a standard-JSON compiler input
pub fn standard_input_sources(path: &Path) -> Result<BTreeMap<String, String>> {
    let content = fs::read_to_string(path)
        .wrap_err_with(|| format!("failed to read compiler input {}", path.display()))?;
    let input: Value = serde_json::from_str(&content)?;

    Ok(input
        .get("sources")
        .and_then(Value::as_object)
        .map(|sources| {
            sources
                .iter()
                .filter_map(|(path, source)| {
                    let content = source.get("content")?.as_str()?;
                    Some((path.clone(), content.to_string()))
                })
                .collect()
        })
        .unwrap_or_default())
}

/// Pretty JSON, or the template with its first `$DEBUGDATA` and `$TXHASH` substituted
pub fn render(info: &TraceInfo, template: Option<&str>, tx_hash: TxHash) -> Result<String> {
    let data = serde_json::to_string_pretty(info)?;
    Ok(match template {
        Some(template) => template
            .replacen("$DEBUGDATA", &data, 1)
            .replacen("$TXHASH", &tx_hash.to_string(), 1),
        None => data,
    })
}

fn default_output(tx_hash: TxHash, templated: bool) -> PathBuf {
    let extension = if templated { "html" } else { "json" };
    PathBuf::from(format!("{tx_hash}.{extension}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_template() {
        let info = TraceInfo { gas: 7, ..Default::default() };
        let tx_hash = TxHash::repeat_byte(0xab);

        let page = render(&info, Some("<h1>$TXHASH</h1><script>$DEBUGDATA</script>"), tx_hash)
            .unwrap();
        assert!(page.starts_with(&format!("<h1>{tx_hash}</h1>")));
        assert!(page.contains("\"gas\": 7"));

        let json = render(&info, None, tx_hash).unwrap();
        let back: TraceInfo = serde_json::from_str(&json).unwrap();
        assert_eq!(back, info);
    }

    #[test]
    fn test_standard_input_sources() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("input.json");
        fs::write(
            &path,
            r#"{"language":"Solidity","sources":{"A.sol":{"content":"contract A {}"},"B.sol":{"urls":[]}}}"#,
        )
        .unwrap();

        let sources = standard_input_sources(&path).unwrap();
        assert_eq!(sources.len(), 1);
        assert_eq!(sources["A.sol"], "contract A {}");
    }

    #[test]
    fn test_default_output() {
        let tx_hash = TxHash::repeat_byte(1);
        assert!(default_output(tx_hash, false).to_string_lossy().ends_with(".json"));
        assert!(default_output(tx_hash, true).to_string_lossy().ends_with(".html"));
    }
}
