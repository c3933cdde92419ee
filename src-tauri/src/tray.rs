// System tray: inventory statistics and per-bean entries grouped by
// freshness. Menu item ids carry a `bean:` prefix so clicks can navigate
// the frontend to the right bean.

#![cfg(desktop)]

use tauri::{
    menu::{MenuBuilder, MenuItemBuilder, SubmenuBuilder},
    tray::{MouseButton, MouseButtonState, TrayIconBuilder, TrayIconEvent},
    AppHandle, Emitter, Manager,
};

use crate::freshness::{self, BeanFreshness, CoffeeBean, FreshnessState};

pub const TRAY_ID: &str = "main-tray";
const NAME_WIDTH: usize = 16;

pub fn create_tray(app: &AppHandle) -> tauri::Result<()> {
    let count_item = MenuItemBuilder::with_id("stat_count", "Beans in stock: -")
        .enabled(false)
        .build(app)?;
    let capacity_item = MenuItemBuilder::with_id("stat_capacity", "Total remaining: -")
        .enabled(false)
        .build(app)?;
    let loading = MenuItemBuilder::with_id("loading", "Loading…").enabled(false).build(app)?;
    let open_app = MenuItemBuilder::with_id("open_app", "Open Brew Guide").build(app)?;
    let quit = MenuItemBuilder::with_id("quit", "Quit").build(app)?;

    let menu = MenuBuilder::new(app)
        .item(&count_item)
        .item(&capacity_item)
        .separator()
        .item(&loading)
        .separator()
        .item(&open_app)
        .item(&quit)
        .build()?;

    let mut builder = TrayIconBuilder::with_id(TRAY_ID)
        .menu(&menu)
        .tooltip("Brew Guide")
        .on_menu_event(|app, event| match event.id().as_ref() {
            "open_app" => show_main_window(app),
            "quit" => app.exit(0),
            id if id.starts_with("bean:") => {
                let bean_id = id.trim_start_matches("bean:").to_string();
                show_main_window(app);
                if let Err(e) = app.emit("navigate-to-bean", bean_id) {
                    log::warn!("tray navigation event failed: {}", e);
                }
            }
            _ => {}
        })
        .on_tray_icon_event(|tray, event| {
            if let TrayIconEvent::Click {
                button: MouseButton::Left,
                button_state: MouseButtonState::Up,
                ..
            } = event
            {
                show_main_window(tray.app_handle());
            }
        });

    if let Some(icon) = app.default_window_icon() {
        builder = builder.icon(icon.clone());
    }

    builder.build(app)?;
    Ok(())
}

fn show_main_window(app: &AppHandle) {
    if let Some(window) = app.get_webview_window("main") {
        let _ = window.show();
        let _ = window.set_focus();
    }
}

/// Rebuilds the tray menu from the current bean inventory. Only beans with
/// remaining stock appear; within each group the bean closest to a state
/// change sorts first.
pub fn update_tray_with_beans(app: &AppHandle, beans: Vec<CoffeeBean>) -> tauri::Result<()> {
    let today = chrono::Local::now().date_naive();
    let active: Vec<BeanFreshness> = beans
        .iter()
        .filter(|b| b.remaining_grams() > 0.0)
        .map(|b| freshness::assess(b, today))
        .collect();

    let mut optimal: Vec<&BeanFreshness> = active.iter().filter(|b| b.state == FreshnessState::Optimal).collect();
    let mut resting: Vec<&BeanFreshness> = active.iter().filter(|b| b.state == FreshnessState::Resting).collect();
    let mut past_window: Vec<&BeanFreshness> = active
        .iter()
        .filter(|b| matches!(b.state, FreshnessState::Fading | FreshnessState::Expired))
        .collect();
    let frozen: Vec<&BeanFreshness> = active.iter().filter(|b| b.state == FreshnessState::Frozen).collect();

    optimal.sort_by_key(|b| b.days_left_in_window());
    resting.sort_by_key(|b| b.days_until_optimal());
    past_window.sort_by_key(|b| b.days_past_window());

    let total_remaining: f64 = active.iter().map(|b| b.bean.remaining_grams()).sum();

    let count_item = MenuItemBuilder::with_id("stat_count", format!("Beans in stock: {}", active.len()))
        .enabled(false)
        .build(app)?;
    let capacity_item = MenuItemBuilder::with_id(
        "stat_capacity",
        format!("Total remaining: {}", freshness::format_grams(total_remaining)),
    )
    .enabled(false)
    .build(app)?;

    let mut menu_builder = MenuBuilder::new(app).item(&count_item).item(&capacity_item).separator();

    if !optimal.is_empty() {
        let mut submenu = SubmenuBuilder::new(app, format!("Peak flavor ({})", optimal.len()));
        for info in &optimal {
            let label = format!(
                "{:>2} d · {}",
                info.days_left_in_window(),
                freshness::truncate_name(&info.bean.name, NAME_WIDTH)
            );
            let item = MenuItemBuilder::with_id(format!("bean:{}", info.bean.id), label).build(app)?;
            submenu = submenu.item(&item);
        }
        menu_builder = menu_builder.item(&submenu.build()?);
    }

    if !resting.is_empty() {
        let mut submenu = SubmenuBuilder::new(app, format!("Resting ({})", resting.len()));
        for info in &resting {
            let label = format!(
                "{:>2} d · {}",
                info.days_until_optimal(),
                freshness::truncate_name(&info.bean.name, NAME_WIDTH)
            );
            let item = MenuItemBuilder::with_id(format!("bean:{}", info.bean.id), label).build(app)?;
            submenu = submenu.item(&item);
        }
        menu_builder = menu_builder.item(&submenu.build()?);
    }

    if !past_window.is_empty() {
        let mut submenu = SubmenuBuilder::new(app, format!("Past window ({})", past_window.len()));
        for info in &past_window {
            let label = format!(
                "{:>2} d · {}",
                info.days_past_window(),
                freshness::truncate_name(&info.bean.name, NAME_WIDTH)
            );
            let item = MenuItemBuilder::with_id(format!("bean:{}", info.bean.id), label).build(app)?;
            submenu = submenu.item(&item);
        }
        menu_builder = menu_builder.item(&submenu.build()?);
    }

    if !frozen.is_empty() {
        let mut submenu = SubmenuBuilder::new(app, format!("Frozen ({})", frozen.len()));
        for info in &frozen {
            let label = freshness::truncate_name(&info.bean.name, NAME_WIDTH);
            let item = MenuItemBuilder::with_id(format!("bean:{}", info.bean.id), label).build(app)?;
            submenu = submenu.item(&item);
        }
        menu_builder = menu_builder.item(&submenu.build()?);
    }

    if active.is_empty() {
        let empty = MenuItemBuilder::with_id("empty", "No beans in stock")
            .enabled(false)
            .build(app)?;
        menu_builder = menu_builder.item(&empty);
    }

    let open_app = MenuItemBuilder::with_id("open_app", "Open Brew Guide").build(app)?;
    let quit = MenuItemBuilder::with_id("quit", "Quit").build(app)?;
    let menu = menu_builder.separator().item(&open_app).item(&quit).build()?;

    if let Some(tray) = app.tray_by_id(TRAY_ID) {
        tray.set_menu(Some(menu))?;
    }
    Ok(())
}
