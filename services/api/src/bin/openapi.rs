//! services/api/src/bin/openapi.rs
//!
//! Writes the OpenAPI document of the discussion API. The output path is the
//! first argument and defaults to `openapi.json`.

use api_lib::web::rest::ApiDoc;
use utoipa::OpenApi;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let path = std::env::args().nth(1).unwrap_or_else(|| "openapi.json".to_string());
    let document = ApiDoc::openapi();
    std::fs::write(&path, document.to_pretty_json()?)?;
    println!("OpenAPI document with {} paths written to {}", document.paths.paths.len(), path);
    Ok(())
}
