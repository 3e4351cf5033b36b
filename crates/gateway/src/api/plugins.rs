//! `POST /runtime/plugins/sync` — load, reload, unload, or bootstrap a
//! workspace tool plugin. Applies the action under a per-installed-plugin
//! mutex (fixed key granularity: no two syncs for the same
//! `installedPluginId` run concurrently) and reports load status back to
//! persistence.

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, OnceLock};

use axum::extract::State;
use axum::http::HeaderMap;
use axum::response::{IntoResponse, Json, Response};
use parking_lot::Mutex as SyncMutex;
use serde::Deserialize;
use tokio::sync::Mutex as AsyncMutex;

use rb_domain::error::Error;
use rb_tools::{PluginManifest, PluginToolSpec};

use crate::api::auth::check_runtime_secret;
use crate::api::ApiError;
use crate::state::AppState;

fn locks() -> &'static SyncMutex<HashMap<String, Arc<AsyncMutex<()>>>> {
    static LOCKS: OnceLock<SyncMutex<HashMap<String, Arc<AsyncMutex<()>>>>> = OnceLock::new();
    LOCKS.get_or_init(|| SyncMutex::new(HashMap::new()))
}

fn lock_for(installed_plugin_id: &str) -> Arc<AsyncMutex<()>> {
    locks().lock().entry(installed_plugin_id.to_owned()).or_insert_with(|| Arc::new(AsyncMutex::new(()))).clone()
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncBody {
    action: SyncAction,
    installed_plugin_id: String,
    workspace_id: String,
    plugin_id: String,
    install_path: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "lowercase")]
enum SyncAction {
    Load,
    Reload,
    Unload,
    Bootstrap,
}

pub async fn sync(State(state): State<AppState>, headers: HeaderMap, Json(body): Json<SyncBody>) -> Response {
    if let Err(e) = check_runtime_secret(&headers, &state.core.config.channels.runtime_secret) {
        return ApiError(e).into_response();
    }

    let guard = lock_for(&body.installed_plugin_id);
    let _held = guard.lock().await;

    let result = match body.action {
        SyncAction::Unload => {
            state.core.node_host.unload(&body.installed_plugin_id);
            state.core.plugin_tools.remove_plugin(&body.workspace_id, &body.plugin_id);
            Ok(())
        }
        SyncAction::Load | SyncAction::Reload | SyncAction::Bootstrap => load_or_reload(&state, &body).await,
    };

    let succeeded = result.is_ok();
    let _ = state.core.rpc.report_runtime_plugin_load(&body.installed_plugin_id, succeeded).await;

    match result {
        Ok(()) => Json(serde_json::json!({ "ok": true })).into_response(),
        Err(e) => ApiError(e).into_response(),
    }
}

async fn load_or_reload(state: &AppState, body: &SyncBody) -> Result<(), Error> {
    let plugin_root = Path::new(&body.install_path);
    let manifest_path = plugin_root.join("openclaw.plugin.json");
    let raw = std::fs::read_to_string(&manifest_path)
        .map_err(|e| Error::Validation(format!("reading manifest at {}: {e}", manifest_path.display())))?;
    let manifest = PluginManifest::parse(&raw).map_err(|e| Error::Validation(format!("parsing manifest: {e}")))?;
    manifest.validate(plugin_root).map_err(|e| Error::Validation(e.to_string()))?;

    let entry_path = plugin_root.join(&manifest.runtime.tool.entry);
    state.core.node_host.load(body.installed_plugin_id.clone(), entry_path, manifest.runtime.tool.export_name.clone());

    let spec = PluginToolSpec {
        plugin_id: body.plugin_id.clone(),
        definition: rb_domain::tool::ToolDefinition {
            name: manifest.id.clone(),
            description: manifest.name.clone(),
            parameters: manifest.config_schema.clone(),
        },
    };
    let mut tools = state.core.plugin_tools.snapshot(&body.workspace_id);
    tools.retain(|t| t.plugin_id != body.plugin_id);
    tools.push(spec);
    state.core.plugin_tools.set(body.workspace_id.clone(), tools);

    Ok(())
}
