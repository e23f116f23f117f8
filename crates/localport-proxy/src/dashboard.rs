//! Admin dashboard.
//!
//! One HTML page listing every known service, grouped, with rename and
//! blacklist actions and a keep checkbox kept in the browser's local
//! storage. The page polls `/api/services` every 3 seconds to refresh
//! status dots and badges.

use axum::extract::{Request, State};
use axum::http::header::CONTENT_TYPE;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

use crate::state::{ServiceEntry, SharedState};

/// Fallback handler for admin hosts: any path that is not an API route.
pub async fn serve(State(state): State<SharedState>, _request: Request) -> Response {
    render(&state, None)
}

/// Renders the dashboard, optionally with an error banner.
pub fn render(state: &SharedState, error: Option<&str>) -> Response {
    let html = render_html(state, error);
    (
        StatusCode::OK,
        [(CONTENT_TYPE, "text/html; charset=utf-8")],
        html,
    )
        .into_response()
}

fn render_html(state: &SharedState, error: Option<&str>) -> String {
    let mut entries = state.table.list();
    entries.sort_by(|a, b| a.group.cmp(&b.group).then_with(|| a.name.cmp(&b.name)));

    // Group preserving the sorted order.
    let mut groups: Vec<(String, Vec<&ServiceEntry>)> = Vec::new();
    for entry in &entries {
        let entry = entry.as_ref();
        match groups.last_mut() {
            Some((name, members)) if *name == entry.group => members.push(entry),
            _ => groups.push((entry.group.clone(), vec![entry])),
        }
    }

    let banner = match error {
        Some(message) => format!(
            r#"<div class="banner">{}</div>"#,
            html_escape(message)
        ),
        None => String::new(),
    };

    let table = if groups.is_empty() {
        r#"<div class="empty-state"><p>No services found. Start a local HTTP server to see it here.</p></div>"#
            .to_string()
    } else {
        let mut rows = String::new();
        for (group, members) in &groups {
            let grouped = members.len() > 1;
            if grouped {
                rows.push_str(&format!(
                    r#"<tr class="group-header" onclick="toggleGroup('{g}')"><td colspan="7"><span class="group-toggle" id="toggle-{g}">&#9660;</span>{g}<span class="group-count">({n} services)</span></td></tr>"#,
                    g = html_escape(group),
                    n = members.len(),
                ));
            }
            for entry in members {
                rows.push_str(&service_row(state, entry, group, grouped));
            }
        }
        format!(
            r#"<div class="table-wrapper"><table>
<thead><tr><th>Name</th><th>Status</th><th>Port</th><th>PID</th><th>Command</th><th>Keep</th><th>Actions</th></tr></thead>
<tbody>{rows}</tbody></table></div>"#
        )
    };

    TEMPLATE
        .replacen("<!--BANNER-->", &banner, 1)
        .replacen("<!--TABLE-->", &table, 1)
}

fn service_row(state: &SharedState, entry: &ServiceEntry, group: &str, grouped: bool) -> String {
    let name = html_escape(&entry.name);
    let row_classes = match (grouped, entry.is_active) {
        (true, true) => "group-member",
        (true, false) => "group-member inactive",
        (false, true) => "",
        (false, false) => "inactive",
    };

    let links = if state.options.tls_enabled {
        format!(
            r#"<div class="service-links"><a href="{https}" class="service-link" target="_blank" id="link-{name}">&#x1f512; {https}</a><a href="{http}" class="service-link-secondary" target="_blank">{http}</a></div>"#,
            https = state.service_url(&entry.name),
            http = state.http_service_url(&entry.name),
        )
    } else {
        format!(
            r#"<a href="{http}" class="service-link" target="_blank" id="link-{name}">{http}</a>"#,
            http = state.http_service_url(&entry.name),
        )
    };

    let origin = if entry.use_tls { "HTTPS" } else { "HTTP" };
    format!(
        r#"<tr data-name="{name}" data-group="{group}" id="row-{name}" class="{row_classes}">
<td><div class="name-cell"><span class="status-dot ok" title="Origin: {origin}"></span>{links}<button class="btn-icon" onclick="openRenameModal('{name}')" title="Rename">Edit</button></div></td>
<td><span class="status-badge ok" data-name="{name}">{origin}</span></td>
<td>{port}</td>
<td>{pid}</td>
<td><pre class="command">{exe}</pre></td>
<td><label class="keep-checkbox"><input type="checkbox" id="keep-{name}" onchange="toggleKeep('{name}')"><span>Keep</span></label></td>
<td><button class="btn btn-danger" onclick="openBlacklistModal('{name}', {pid}, '{exe}')">Blacklist</button></td>
</tr>"#,
        group = html_escape(group),
        port = entry.port,
        pid = entry.pid,
        exe = html_escape(&entry.exe_path),
    )
}

fn html_escape(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for c in input.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            other => out.push(other),
        }
    }
    out
}

const TEMPLATE: &str = r#"<!DOCTYPE html>
<html lang="en">
<head>
<meta charset="UTF-8">
<meta name="viewport" content="width=device-width, initial-scale=1.0">
<title>localport</title>
<style>
* { box-sizing: border-box; margin: 0; padding: 0; }
body { font-family: -apple-system, BlinkMacSystemFont, 'Segoe UI', Roboto, 'Helvetica Neue', Arial, sans-serif; background: #fff; color: #333; line-height: 1.5; padding: 40px 20px; }
.container { max-width: 1200px; margin: 0 auto; }
.banner { background: #fff3e0; border: 1px solid #ffb74d; color: #e65100; padding: 12px 16px; margin-bottom: 20px; font-size: 0.9em; }
.card { background: #fff; border: 1px solid #e0e0e0; box-shadow: 0 1px 3px rgba(0,0,0,0.05); overflow: hidden; }
.card-header { padding: 20px 24px; border-bottom: 1px solid #e0e0e0; background: #fafafa; }
.card-header h2 { font-size: 1.1em; font-weight: 600; color: #1a1a1a; }
.table-wrapper { overflow-x: auto; }
table { width: 100%; border-collapse: collapse; font-size: 0.85em; }
th { text-align: left; padding: 10px 12px; font-weight: 600; color: #555; font-size: 0.75em; text-transform: uppercase; letter-spacing: 0.5px; border-bottom: 1px solid #e0e0e0; background: #fafafa; }
td { padding: 10px 12px; border-bottom: 1px solid #f0f0f0; vertical-align: middle; }
tr:hover { background: #fafafa; }
tr.inactive { opacity: 0.5; }
tr.group-header { background: #f5f7fa; cursor: pointer; user-select: none; }
tr.group-header:hover { background: #edf0f5; }
tr.group-header td { padding: 8px 12px; font-weight: 600; color: #444; font-size: 0.85em; border-bottom: 1px solid #e0e0e0; }
.group-toggle { display: inline-block; width: 16px; transition: transform 0.2s; margin-right: 6px; }
.group-toggle.collapsed { transform: rotate(-90deg); }
tr.group-member td:first-child { padding-left: 32px; }
.group-count { font-weight: normal; color: #888; font-size: 0.9em; margin-left: 6px; }
.name-cell { display: flex; align-items: center; gap: 10px; }
.status-dot { width: 10px; height: 10px; border-radius: 50%; flex-shrink: 0; }
.status-dot.ok { background: #4caf50; }
.status-dot.warning { background: #ff9800; }
.status-dot.error { background: #f44336; }
.status-dot.offline { background: #9e9e9e; }
.service-link { color: #2196f3; text-decoration: none; font-weight: 500; }
.service-link:hover { text-decoration: underline; }
.service-link.inactive { color: #999; }
.service-links { display: flex; flex-direction: column; gap: 2px; }
.service-link-secondary { color: #999; text-decoration: none; font-size: 0.8em; }
.service-link-secondary:hover { text-decoration: underline; color: #666; }
.btn-icon { background: none; border: none; cursor: pointer; padding: 2px 4px; font-size: 0.85em; opacity: 0.5; transition: opacity 0.2s; }
.btn-icon:hover { opacity: 1; }
.status-badge { display: inline-block; padding: 4px 10px; font-size: 0.8em; font-weight: 500; border-radius: 3px; }
.status-badge.ok { background: #e8f5e9; color: #2e7d32; }
.status-badge.warning { background: #fff3e0; color: #ef6c00; }
.status-badge.error { background: #ffebee; color: #c62828; }
.status-badge.offline { background: #f5f5f5; color: #616161; }
.command { font-family: 'Monaco', 'Menlo', 'Courier New', monospace; font-size: 0.75em; color: #555; background: #f5f5f5; padding: 3px 6px; border-radius: 3px; max-width: 280px; overflow: hidden; text-overflow: ellipsis; white-space: nowrap; display: block; }
.keep-checkbox { display: flex; align-items: center; gap: 6px; cursor: pointer; font-size: 0.85em; color: #666; }
.btn { padding: 4px 10px; border: 1px solid #ddd; background: #fff; cursor: pointer; font-size: 0.75em; font-weight: 500; color: #555; white-space: nowrap; }
.btn:hover { background: #f5f5f5; border-color: #ccc; }
.btn-danger { background: #f44336; color: #fff; border-color: #f44336; }
.btn-danger:hover { background: #d32f2f; border-color: #d32f2f; }
.empty-state { text-align: center; padding: 60px 20px; color: #999; }
.modal { display: none; position: fixed; top: 0; left: 0; width: 100%; height: 100%; background: rgba(0,0,0,0.5); z-index: 1000; justify-content: center; align-items: center; }
.modal.active { display: flex; }
.modal-content { background: white; padding: 24px; width: 90%; max-width: 400px; border: 1px solid #e0e0e0; box-shadow: 0 4px 20px rgba(0,0,0,0.15); }
.modal-content h3 { margin-bottom: 20px; font-size: 1.1em; }
.form-group { margin-bottom: 16px; }
.form-group label { display: block; margin-bottom: 6px; font-size: 0.85em; font-weight: 500; color: #555; }
.form-group input, .form-group select { width: 100%; padding: 8px 12px; border: 1px solid #ddd; font-size: 0.9em; }
.modal-actions { display: flex; gap: 10px; justify-content: flex-end; margin-top: 20px; }
</style>
</head>
<body>
<div class="container">
<!--BANNER-->
<div class="card">
<div class="card-header"><h2>Discovered HTTP Servers</h2></div>
<!--TABLE-->
</div>
</div>

<div id="renameModal" class="modal">
<div class="modal-content">
<h3>Rename Service</h3>
<div class="form-group"><label>Current Name</label><input type="text" id="currentName" readonly></div>
<div class="form-group"><label>New Name</label><input type="text" id="newName" placeholder="myapp.localhost"></div>
<div class="modal-actions">
<button class="btn" onclick="closeModal('renameModal')">Cancel</button>
<button class="btn" onclick="confirmRename()" style="background:#2196f3;color:#fff;border-color:#2196f3;">Rename</button>
</div>
</div>
</div>

<div id="blacklistModal" class="modal">
<div class="modal-content">
<h3>Blacklist Service</h3>
<div class="form-group"><label>Blacklist Type</label><select id="blacklistType"></select></div>
<div class="form-group"><label>Value</label><input type="text" id="blacklistValue" readonly></div>
<div class="modal-actions">
<button class="btn" onclick="closeModal('blacklistModal')">Cancel</button>
<button class="btn btn-danger" onclick="confirmBlacklist()">Blacklist</button>
</div>
</div>
</div>

<script>
let currentService = {};
const keptServices = JSON.parse(localStorage.getItem('keptServices') || '[]');
const collapsedGroups = JSON.parse(localStorage.getItem('collapsedGroups') || '[]');

document.addEventListener('DOMContentLoaded', () => {
    keptServices.forEach(name => {
        const checkbox = document.getElementById('keep-' + name);
        if (checkbox) checkbox.checked = true;
    });
    collapsedGroups.forEach(group => setGroupCollapsed(group, true));
    fetchStatus();
});

function toggleGroup(groupName) {
    const toggle = document.getElementById('toggle-' + groupName);
    const isCollapsed = toggle && toggle.classList.contains('collapsed');
    setGroupCollapsed(groupName, !isCollapsed);
    const idx = collapsedGroups.indexOf(groupName);
    if (isCollapsed && idx > -1) collapsedGroups.splice(idx, 1);
    if (!isCollapsed && idx === -1) collapsedGroups.push(groupName);
    localStorage.setItem('collapsedGroups', JSON.stringify(collapsedGroups));
}

function setGroupCollapsed(groupName, collapsed) {
    document.querySelectorAll('tr.group-member[data-group="' + groupName + '"]').forEach(row => {
        row.style.display = collapsed ? 'none' : '';
    });
    const toggle = document.getElementById('toggle-' + groupName);
    if (toggle) toggle.classList.toggle('collapsed', collapsed);
}

function openRenameModal(name) {
    currentService.oldName = name;
    document.getElementById('currentName').value = name;
    document.getElementById('newName').value = '';
    document.getElementById('renameModal').classList.add('active');
}

function openBlacklistModal(name, pid, exePath) {
    currentService = { name, pid, exePath };
    document.getElementById('blacklistValue').value = pid;
    const typeSelect = document.getElementById('blacklistType');
    typeSelect.innerHTML = '';
    [
        { value: 'pid', text: 'By PID (' + pid + ')' },
        { value: 'path', text: 'By Path (' + exePath.substring(0, 50) + ')' },
        { value: 'pattern', text: 'By Pattern (regex)' }
    ].forEach(opt => {
        const option = document.createElement('option');
        option.value = opt.value;
        option.textContent = opt.text;
        typeSelect.appendChild(option);
    });
    typeSelect.onchange = function() {
        const val = typeSelect.value;
        if (val === 'pid') document.getElementById('blacklistValue').value = pid;
        if (val === 'path') document.getElementById('blacklistValue').value = exePath;
        if (val === 'pattern') document.getElementById('blacklistValue').value = '';
        document.getElementById('blacklistValue').readOnly = (val !== 'pattern');
    };
    document.getElementById('blacklistModal').classList.add('active');
}

function closeModal(modalId) {
    document.getElementById(modalId).classList.remove('active');
}

function toggleKeep(name) {
    const checkbox = document.getElementById('keep-' + name);
    const index = keptServices.indexOf(name);
    if (checkbox.checked && index === -1) keptServices.push(name);
    if (!checkbox.checked && index > -1) keptServices.splice(index, 1);
    localStorage.setItem('keptServices', JSON.stringify(keptServices));
}

async function confirmRename() {
    const newName = document.getElementById('newName').value;
    if (!newName) return;
    try {
        const response = await fetch('/api/rename', {
            method: 'POST',
            headers: { 'Content-Type': 'application/json' },
            body: JSON.stringify({ oldName: currentService.oldName, newName: newName })
        });
        if (response.ok) location.reload();
        else alert('Failed to rename: ' + await response.text());
    } catch (err) {
        alert('Error: ' + err.message);
    }
}

async function confirmBlacklist() {
    const type = document.getElementById('blacklistType').value;
    const value = document.getElementById('blacklistValue').value;
    try {
        const response = await fetch('/api/blacklist', {
            method: 'POST',
            headers: { 'Content-Type': 'application/json' },
            body: JSON.stringify({ type, value: String(value) })
        });
        if (response.ok) location.reload();
        else alert('Failed to blacklist: ' + await response.text());
    } catch (err) {
        alert('Error: ' + err.message);
    }
}

document.querySelectorAll('.modal').forEach(modal => {
    modal.addEventListener('click', (e) => {
        if (e.target === modal) closeModal(modal.id);
    });
});

async function fetchStatus() {
    try {
        const response = await fetch('/api/services');
        updateServiceStatuses(await response.json());
    } catch (err) {
        console.error('Failed to fetch service status:', err);
    }
}

setInterval(fetchStatus, 3000);

function updateServiceStatuses(services) {
    const byName = new Map(services.map(s => [s.name, s]));
    document.querySelectorAll('tr[data-name]').forEach(row => {
        const name = row.getAttribute('data-name');
        const service = byName.get(name);
        const isKept = keptServices.includes(name);

        if (!service) {
            if (isKept) {
                row.classList.add('inactive');
                const link = document.getElementById('link-' + name);
                if (link) link.classList.add('inactive');
                updateStatus(row, 'offline', 'INACTIVE');
            } else {
                row.style.display = 'none';
            }
            return;
        }

        const dot = row.querySelector('.status-dot');
        if (dot && service.protocol) dot.title = 'Origin: ' + service.protocol.toUpperCase();

        const code = service.status_code || 0;
        if (code >= 200 && code < 400) updateStatus(row, 'ok', code);
        else if (code >= 400 && code < 500) updateStatus(row, 'warning', code);
        else if (code >= 500) updateStatus(row, 'error', code);
        else updateStatus(row, 'offline', 'OFFLINE');
    });
}

function updateStatus(row, statusClass, text) {
    const dot = row.querySelector('.status-dot');
    const badge = row.querySelector('.status-badge');
    if (dot) dot.className = 'status-dot ' + statusClass;
    if (badge) {
        badge.className = 'status-badge ' + statusClass;
        badge.textContent = text;
    }
}
</script>
</body>
</html>
"#;
