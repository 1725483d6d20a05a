//! Core build logic.
//!
//! This module runs one page build end to end:
//! 1. Validate the options and construct the plugin
//! 2. Run the in-process host with the plugin and one HTML plugin instance
//! 3. Pick the rendered page out of the emitted assets
//! 4. Optionally write every asset to the output directory

use std::path::Path;
use std::sync::Arc;

use crate::host::{HtmlPluginConfig, LocalCompiler};
use crate::plugin::IconduitPlugin;
use crate::{BuildPlan, BuildResult, Diagnostic, DiagnosticLevel, PluginError, PluginOptions};

/// Execute a page build through [`LocalCompiler`].
pub async fn execute_build(plan: BuildPlan, options: PluginOptions) -> Result<BuildResult, PluginError> {
    // Options are rejected before anything touches the filesystem
    let plugin = IconduitPlugin::new(options)?;

    if !plan.context.is_dir() {
        return Err(PluginError::Io(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            format!("Build context not found: {}", plan.context.display()),
        )));
    }

    let compiler = LocalCompiler::new(plan.context.clone())
        .with_public_path(plan.public_path.clone())
        .with_hook_style(plan.hook_style)
        .with_html_plugin(HtmlPluginConfig {
            id: plan.html_plugin.clone(),
            filename: plan.html_filename.clone(),
            template: plan.template.clone(),
        })
        .with_plugin(Arc::new(plugin));

    let output = compiler.run().await.map_err(PluginError::from_host)?;

    let html = output
        .asset_text(&plan.html_filename)
        .map(str::to_string)
        .ok_or_else(|| PluginError::MissingOutput(plan.html_filename.clone()))?;

    let mut diagnostics = output.diagnostics;
    let assets = output.assets;

    if plan.write_to_disk {
        let out_dir = plan
            .out_dir
            .clone()
            .unwrap_or_else(|| plan.context.join("dist"));
        write_assets(&out_dir, &assets).await?;

        diagnostics.push(Diagnostic {
            level: DiagnosticLevel::Info,
            message: format!("Written {} assets to {}", assets.len(), out_dir.display()),
            context: None,
        });
    }

    Ok(BuildResult {
        html,
        assets,
        diagnostics,
    })
}

async fn write_assets(
    out_dir: &Path,
    assets: &std::collections::BTreeMap<String, Vec<u8>>,
) -> Result<(), PluginError> {
    for (name, bytes) in assets {
        let path = out_dir.join(name);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&path, bytes).await?;
    }
    Ok(())
}
