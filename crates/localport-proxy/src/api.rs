//! Admin JSON API.
//!
//! Four endpoints, served on both listeners for admin hosts: list services
//! with live health, rename, blacklist, and toggle keep. The dashboard's
//! JavaScript polls `/api/services` every few seconds.

use std::sync::Arc;

use axum::extract::State;
use axum::Json;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

use localport_core::naming::extract_group_from_exe;
use localport_storage::BlacklistType;

use crate::error::ApiError;
use crate::state::{ServiceEntry, SharedState};

/// One service as reported by `/api/services`.
#[derive(Debug, Serialize)]
pub struct ServiceHealth {
    pub id: String,
    pub name: String,
    pub port: u16,
    pub target_host: String,
    pub pid: u32,
    pub exe_path: String,
    pub args: Vec<String>,
    pub group: String,
    pub use_tls: bool,
    pub is_active: bool,
    pub last_seen: DateTime<Utc>,
    pub keep: bool,
    pub user_defined: bool,
    pub healthy: bool,
    pub status_code: u16,
    pub status_text: String,
    pub protocol: String,
}

/// GET /api/services - all services with a live 2 s health probe each.
pub async fn list_services(State(state): State<SharedState>) -> Json<Vec<ServiceHealth>> {
    let mut entries = state.table.list();
    entries.sort_by(|a, b| a.name.cmp(&b.name));

    let mut result = Vec::with_capacity(entries.len());
    for entry in entries {
        result.push(check_health(&state, &entry).await);
    }
    Json(result)
}

async fn check_health(state: &SharedState, entry: &Arc<ServiceEntry>) -> ServiceHealth {
    let mut health = ServiceHealth {
        id: entry.id.clone(),
        name: entry.name.clone(),
        port: entry.port,
        target_host: entry.target_host.clone(),
        pid: entry.pid,
        exe_path: entry.exe_path.clone(),
        args: entry.args.clone(),
        group: entry.group.clone(),
        use_tls: entry.use_tls,
        is_active: entry.is_active,
        last_seen: entry.last_seen,
        keep: entry.keep,
        user_defined: entry.user_defined,
        healthy: false,
        status_code: 0,
        status_text: "offline".to_string(),
        protocol: if entry.use_tls { "https" } else { "http" }.to_string(),
    };

    let url = format!("{}/", entry.base_url());
    if let Ok(response) = state.health_client.get(url).send().await {
        let status = response.status();
        health.status_code = status.as_u16();
        health.status_text = status
            .canonical_reason()
            .unwrap_or("unknown")
            .to_string();
        health.healthy = status.is_success() || status.is_redirection();
    }
    health
}

#[derive(Debug, Deserialize)]
pub struct RenameRequest {
    #[serde(rename = "oldName")]
    pub old_name: String,
    #[serde(rename = "newName")]
    pub new_name: String,
}

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub status: &'static str,
}

/// POST /api/rename - rebind a service to a new name.
pub async fn rename(
    State(state): State<SharedState>,
    Json(request): Json<RenameRequest>,
) -> Result<Json<StatusResponse>, ApiError> {
    let old_name = ensure_localhost_suffix(&request.old_name);
    let new_name = ensure_localhost_suffix(&request.new_name);

    let entry = state
        .table
        .get(&old_name)
        .ok_or_else(|| ApiError::NotFound(format!("service not found: {old_name}")))?;

    let record = state.store.update_name(&entry.id, &new_name)?;

    // Swap the allocator and the table under the allocator's lock so the old
    // name frees and the new one binds atomically with respect to discovery.
    {
        let mut names = state.names.lock();
        names.release(&old_name);
        names.mark_used(&new_name);

        let mut renamed = entry.updated(&record, &entry.cwd);
        renamed.group = extract_group_from_exe(&renamed.exe_path, &new_name);
        state.table.rename(&old_name, renamed);
    }

    info!(%old_name, %new_name, "service renamed");
    state.notify.service_renamed(&old_name, &new_name);
    Ok(Json(StatusResponse { status: "ok" }))
}

#[derive(Debug, Deserialize)]
pub struct BlacklistRequest {
    #[serde(rename = "type")]
    pub entry_type: String,
    pub value: String,
}

#[derive(Debug, Serialize)]
pub struct BlacklistResponse {
    pub status: &'static str,
    pub id: String,
    pub message: String,
}

/// POST /api/blacklist - add a blacklist entry.
pub async fn blacklist(
    State(state): State<SharedState>,
    Json(request): Json<BlacklistRequest>,
) -> Result<Json<BlacklistResponse>, ApiError> {
    let entry_type: BlacklistType = request
        .entry_type
        .parse()
        .map_err(|e: localport_storage::StorageError| ApiError::BadRequest(e.to_string()))?;

    let entry = state.blacklist.add(entry_type, &request.value)?;
    info!(id = %entry.id, kind = %entry.entry_type, value = %entry.value, "blacklist entry added");

    Ok(Json(BlacklistResponse {
        status: "ok",
        id: entry.id,
        message: format!("Blacklisted {}: {}", request.entry_type, request.value),
    }))
}

#[derive(Debug, Deserialize)]
pub struct KeepRequest {
    pub name: String,
    pub keep: bool,
}

/// POST /api/keep - pin or unpin a service.
pub async fn keep(
    State(state): State<SharedState>,
    Json(request): Json<KeepRequest>,
) -> Result<Json<StatusResponse>, ApiError> {
    let name = ensure_localhost_suffix(&request.name);

    let entry = state
        .table
        .get(&name)
        .ok_or_else(|| ApiError::NotFound(format!("service not found: {name}")))?;

    state.store.update_keep(&entry.id, request.keep)?;
    if let Some(record) = state.store.get(&entry.id) {
        state.table.insert(entry.updated(&record, &entry.cwd));
    }

    info!(%name, keep = request.keep, "keep flag updated");
    Ok(Json(StatusResponse { status: "ok" }))
}

/// Appends `.localhost` to bare names, like the CLI does.
pub fn ensure_localhost_suffix(name: &str) -> String {
    if name.ends_with(".localhost") {
        name.to_string()
    } else {
        format!("{name}.localhost")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn suffix_is_appended_once() {
        assert_eq!(ensure_localhost_suffix("api"), "api.localhost");
        assert_eq!(ensure_localhost_suffix("api.localhost"), "api.localhost");
    }
}
