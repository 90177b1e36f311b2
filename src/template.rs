//! Jinja2-style rendering for the nginx site and cron templates.

use std::fs;
use std::path::Path;
use anyhow::{Context, Result};
use log::debug;
use serde_json::Value;
use tera::Tera;

/// Render template source against a JSON object context. Output is not
/// HTML-escaped; these are config files.
pub fn render_str(src: &str, context: &Value) -> Result<String> {
    let context = tera::Context::from_serialize(context).context("Template context must be a JSON object")?;
    Tera::one_off(src, &context, false).context("Failed to render template")
}

/// Render `template` into `output`, creating parent directories. The output
/// is always overwritten; callers decide whether rendering is needed.
pub fn render(template: &Path, output: &Path, context: &Value) -> Result<()> {
    let src = fs::read_to_string(template)
        .with_context(|| format!("Failed to read template {:?}", template))?;
    let rendered = render_str(&src, context)
        .with_context(|| format!("Failed to render template {:?}", template))?;

    if let Some(parent) = output.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory {:?}", parent))?;
    }
    fs::write(output, rendered).with_context(|| format!("Failed to write {:?}", output))?;

    debug!("Rendered {:?} -> {:?}", template, output);
    Ok(())
}
