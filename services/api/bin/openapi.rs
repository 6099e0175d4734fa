//! Writes the relay's OpenAPI document.
//!
//! Usage: `openapi [OUTPUT]`, where `OUTPUT` defaults to `openapi.json`.

use anyhow::Context;
use utoipa::OpenApi;
use voice_relay_api::router::ApiDoc;

const DEFAULT_OUTPUT: &str = "openapi.json";

fn main() -> anyhow::Result<()> {
    let output = std::env::args()
        .nth(1)
        .unwrap_or_else(|| DEFAULT_OUTPUT.to_string());

    let document = ApiDoc::openapi()
        .to_pretty_json()
        .context("Failed to render the OpenAPI document")?;
    std::fs::write(&output, document).with_context(|| format!("Failed to write {output}"))?;

    println!("Wrote {output}");
    Ok(())
}
