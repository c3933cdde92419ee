pub mod data;
pub mod freshness;
pub mod storage;
pub mod sync;
mod tray;

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::Serialize;
use tauri::{AppHandle, Emitter, Manager, State};
use tokio::sync::Mutex;

use data::{DataArchive, ImportMode};
use freshness::CoffeeBean;
use storage::Storage;
use sync::orchestrator::SyncStatusSnapshot;
use sync::{
    BackupRecord, SyncConfig, SyncDirection, SyncEvents, SyncOrchestrator, SyncProgress, SyncProviderKind, SyncReport,
};

pub struct AppState {
    storage: Storage,
    // One orchestrator per provider, created on first use.
    orchestrators: Arc<Mutex<HashMap<SyncProviderKind, Arc<SyncOrchestrator>>>>,
    // Shared by all orchestrators and by import_archive: only one writer
    // may touch the local datasets at a time.
    local_write_guard: Arc<AtomicBool>,
}

impl AppState {
    fn new() -> Result<Self, String> {
        Ok(Self {
            storage: Storage::new()?,
            orchestrators: Arc::new(Mutex::new(HashMap::new())),
            local_write_guard: Arc::new(AtomicBool::new(false)),
        })
    }
}

#[derive(Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct ProviderProgressEvent {
    provider: SyncProviderKind,
    progress: SyncProgress,
}

#[derive(Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct ProviderStatusEvent {
    provider: SyncProviderKind,
    status: sync::ConnectionStatus,
}

fn sync_events(app: AppHandle) -> SyncEvents {
    let progress_app = app.clone();
    let status_app = app.clone();
    SyncEvents {
        on_progress: Box::new(move |provider, progress| {
            let _ = progress_app.emit("sync-progress", ProviderProgressEvent { provider, progress });
        }),
        on_status_changed: Box::new(move |provider, status| {
            let _ = status_app.emit("sync-status-changed", ProviderStatusEvent { provider, status });
        }),
        schedule_reload: Box::new(move |delay| {
            let app = app.clone();
            tauri::async_runtime::spawn(async move {
                tokio::time::sleep(delay).await;
                let _ = app.emit("sync-reload-required", ());
            });
        }),
    }
}

async fn orchestrator_for(app: &AppHandle, state: &AppState, provider: SyncProviderKind) -> Arc<SyncOrchestrator> {
    let mut map = state.orchestrators.lock().await;
    map.entry(provider)
        .or_insert_with(|| {
            Arc::new(SyncOrchestrator::new(
                provider,
                state.storage.clone(),
                sync_events(app.clone()),
                state.local_write_guard.clone(),
            ))
        })
        .clone()
}

#[tauri::command]
fn get_dataset(state: State<'_, AppState>, name: String) -> Result<Option<String>, String> {
    state.storage.get_dataset(&name)
}

#[tauri::command]
fn set_dataset(state: State<'_, AppState>, name: String, content: String) -> Result<(), String> {
    state.storage.set_dataset(&name, &content)
}

#[tauri::command]
fn remove_dataset(state: State<'_, AppState>, name: String) -> Result<(), String> {
    state.storage.remove_dataset(&name)
}

#[tauri::command]
fn list_datasets(state: State<'_, AppState>) -> Result<Vec<String>, String> {
    state.storage.list_datasets()
}

#[tauri::command]
async fn save_sync_config(
    app: AppHandle,
    state: State<'_, AppState>,
    config: SyncConfig,
) -> Result<(), String> {
    let provider = config.kind();
    state.storage.save_sync_config(&config)?;
    let orchestrator = orchestrator_for(&app, &state, provider).await;
    orchestrator.config_updated().await;
    Ok(())
}

#[tauri::command]
fn load_sync_config(state: State<'_, AppState>, provider: SyncProviderKind) -> Result<Option<SyncConfig>, String> {
    state.storage.load_sync_config(provider)
}

#[tauri::command]
async fn test_sync_connection(
    app: AppHandle,
    state: State<'_, AppState>,
    provider: SyncProviderKind,
) -> Result<bool, String> {
    let orchestrator = orchestrator_for(&app, &state, provider).await;
    orchestrator.test_connection().await.map_err(|e| e.to_string())
}

#[tauri::command]
async fn start_sync(
    app: AppHandle,
    state: State<'_, AppState>,
    provider: SyncProviderKind,
    direction: Option<SyncDirection>,
) -> Result<SyncReport, String> {
    let orchestrator = orchestrator_for(&app, &state, provider).await;
    Ok(orchestrator.sync(direction.unwrap_or(SyncDirection::Full)).await)
}

#[tauri::command]
async fn get_sync_status(
    app: AppHandle,
    state: State<'_, AppState>,
    provider: SyncProviderKind,
) -> Result<SyncStatusSnapshot, String> {
    let orchestrator = orchestrator_for(&app, &state, provider).await;
    Ok(orchestrator.status())
}

#[tauri::command]
async fn list_sync_backups(
    app: AppHandle,
    state: State<'_, AppState>,
    provider: SyncProviderKind,
) -> Result<Vec<BackupRecord>, String> {
    let orchestrator = orchestrator_for(&app, &state, provider).await;
    orchestrator.list_backups().await.map_err(|e| e.to_string())
}

#[tauri::command]
async fn restore_sync_backup(
    app: AppHandle,
    state: State<'_, AppState>,
    provider: SyncProviderKind,
    key: String,
) -> Result<SyncReport, String> {
    let orchestrator = orchestrator_for(&app, &state, provider).await;
    Ok(orchestrator.restore_backup(&key).await)
}

#[tauri::command]
async fn disconnect_sync(
    app: AppHandle,
    state: State<'_, AppState>,
    provider: SyncProviderKind,
) -> Result<(), String> {
    let orchestrator = orchestrator_for(&app, &state, provider).await;
    orchestrator.disconnect().await;
    Ok(())
}

#[tauri::command]
fn export_archive(state: State<'_, AppState>) -> Result<String, String> {
    let archive = data::build_archive(&state.storage).map_err(|e| e.to_string())?;
    archive.to_json().map_err(|e| e.to_string())
}

#[tauri::command]
fn import_archive(
    state: State<'_, AppState>,
    payload: String,
    mode: Option<ImportMode>,
) -> Result<u32, String> {
    let archive = DataArchive::from_json(&payload).map_err(|e| e.to_string())?;
    if state
        .local_write_guard
        .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
        .is_err()
    {
        return Err("another operation is writing local data, try again shortly".to_string());
    }
    let result = data::apply_archive(&state.storage, &archive, mode.unwrap_or(ImportMode::Replace));
    state.local_write_guard.store(false, Ordering::SeqCst);
    result.map_err(|e| e.to_string())
}

#[tauri::command]
fn update_tray_menu(app: AppHandle, beans: Vec<CoffeeBean>) -> Result<(), String> {
    #[cfg(desktop)]
    {
        tray::update_tray_with_beans(&app, beans).map_err(|e| e.to_string())?;
    }
    #[cfg(not(desktop))]
    let _ = (app, beans);
    Ok(())
}

#[tauri::command]
fn set_tray_visible(app: AppHandle, visible: bool) -> Result<(), String> {
    #[cfg(desktop)]
    {
        if let Some(tray) = app.tray_by_id(tray::TRAY_ID) {
            tray.set_visible(visible).map_err(|e| e.to_string())?;
        }
    }
    #[cfg(not(desktop))]
    let _ = (app, visible);
    Ok(())
}

#[cfg_attr(mobile, tauri::mobile_entry_point)]
pub fn run() {
    tauri::Builder::default()
        .plugin(tauri_plugin_opener::init())
        .setup(|app| {
            if cfg!(debug_assertions) {
                app.handle().plugin(
                    tauri_plugin_log::Builder::default()
                        .level(log::LevelFilter::Info)
                        .build(),
                )?;
            }
            app.manage(AppState::new()?);
            #[cfg(desktop)]
            tray::create_tray(app.handle())?;
            Ok(())
        })
        .invoke_handler(tauri::generate_handler![
            get_dataset,
            set_dataset,
            remove_dataset,
            list_datasets,
            // Sync
            save_sync_config,
            load_sync_config,
            test_sync_connection,
            start_sync,
            get_sync_status,
            list_sync_backups,
            restore_sync_backup,
            disconnect_sync,
            // Import and export
            export_archive,
            import_archive,
            // Tray
            update_tray_menu,
            set_tray_visible,
        ])
        .run(tauri::generate_context!())
        .expect("error while running tauri application");
}
