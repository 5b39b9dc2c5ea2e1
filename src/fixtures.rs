//! Seeds the in-memory backends from a JSON fixture document.
//!
//! ```json
//! {
//!   "zones": [{"id": "/hostedzone/Z1", "name": "example.com."}],
//!   "identity-clients": [{"id": "client-1", "name": "api", "payload": {"ClientSecret": "s"}}]
//! }
//! ```
//!
//! Objects without an `id` get the backend's generated one.

use std::collections::BTreeMap;

use rekon_core::{Error, Result};
use rekon_resources::InMemoryRemotes;
use serde::Deserialize;
use serde_json::Value;
use tracing::info;

#[derive(Debug, Clone, Deserialize)]
struct FixtureObject {
    #[serde(default)]
    id: Option<String>,
    name: String,
    #[serde(default)]
    payload: Value,
}

/// Seed `remotes` from `text`, returning how many objects were added.
///
/// # Errors
///
/// Returns `Config` for invalid JSON or an unknown service name.
pub async fn seed(remotes: &InMemoryRemotes, text: &str) -> Result<usize> {
    let fixtures: BTreeMap<String, Vec<FixtureObject>> =
        serde_json::from_str(text).map_err(|e| Error::config(format!("invalid fixtures: {e}")))?;

    let mut seeded = 0_usize;
    for (service, objects) in fixtures {
        let backend = remotes
            .by_service(&service)
            .ok_or_else(|| Error::config(format!("unknown fixture service '{service}'")))?;
        for object in objects {
            match &object.id {
                Some(id) => backend.seed_with_id(id, &object.name, object.payload).await,
                None => {
                    backend.seed(&object.name, object.payload).await;
                }
            }
            seeded = seeded.saturating_add(1);
        }
        info!(service = %service, "Seeded fixtures");
    }
    Ok(seeded)
}
