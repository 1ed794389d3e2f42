use std::collections::BTreeMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};

use crate::{
    display::{
        icons::{IconId, IconSet},
        Screen,
    },
    state::{InterfaceState, SystemState},
    Error, Result,
};

/// Half the width of the critical-battery artwork; the alert is centred on screen.
const ALERT_HALF_SIZE: i32 = 64;

/// Screen slot owning at most one live overlay process.
///
/// Declaration order is the right-to-left order of the status row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum OverlayCategory {
    Battery,
    Wifi,
    Bluetooth,
    UnderVoltage,
    FrequencyCapped,
    Throttled,
    CriticalAlert,
}

impl OverlayCategory {
    pub const ALL: [OverlayCategory; 7] = [
        OverlayCategory::Battery,
        OverlayCategory::Wifi,
        OverlayCategory::Bluetooth,
        OverlayCategory::UnderVoltage,
        OverlayCategory::FrequencyCapped,
        OverlayCategory::Throttled,
        OverlayCategory::CriticalAlert,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            OverlayCategory::Battery => "battery",
            OverlayCategory::Wifi => "wifi",
            OverlayCategory::Bluetooth => "bt",
            OverlayCategory::UnderVoltage => "under-voltage",
            OverlayCategory::FrequencyCapped => "freq-capped",
            OverlayCategory::Throttled => "throttled",
            OverlayCategory::CriticalAlert => "critical",
        }
    }

    fn in_status_row(self) -> bool {
        self != OverlayCategory::CriticalAlert
    }
}

/// Top-left corner of an overlay in screen pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Placement {
    pub x: i32,
    pub y: i32,
}

pub type DesiredOverlays = BTreeMap<OverlayCategory, IconId>;

/// Icons that should be visible for `state`. Absent categories show nothing.
pub fn desired_overlays(state: &SystemState, critical_alert: bool) -> DesiredOverlays {
    let mut desired = DesiredOverlays::new();
    desired.insert(OverlayCategory::Battery, IconId::Battery(state.battery));
    match state.wifi {
        InterfaceState::Connected => {
            desired.insert(OverlayCategory::Wifi, IconId::WifiBars(state.wifi_level));
        }
        InterfaceState::Enabled => {
            desired.insert(OverlayCategory::Wifi, IconId::WifiOff);
        }
        InterfaceState::Disabled => {}
    }
    match state.bluetooth {
        InterfaceState::Connected => {
            desired.insert(OverlayCategory::Bluetooth, IconId::BluetoothConnected);
        }
        InterfaceState::Enabled => {
            desired.insert(OverlayCategory::Bluetooth, IconId::BluetoothIdle);
        }
        InterfaceState::Disabled => {}
    }
    if state.throttle.under_voltage() {
        desired.insert(OverlayCategory::UnderVoltage, IconId::UnderVoltage);
    }
    if state.throttle.frequency_capped() {
        desired.insert(OverlayCategory::FrequencyCapped, IconId::FrequencyCapped);
    }
    if state.throttle.throttled() {
        desired.insert(OverlayCategory::Throttled, IconId::Throttled);
    }
    if critical_alert {
        desired.insert(OverlayCategory::CriticalAlert, IconId::CriticalBattery);
    }
    desired
}

/// Positions for every desired overlay.
///
/// Status icons pack from the right edge: the n-th visible category (1-based) sits at
/// `width - icon_size * n`, so a hidden icon never leaves a gap.
pub fn layout(
    desired: &DesiredOverlays,
    screen: Screen,
    icon_size: u32,
) -> BTreeMap<OverlayCategory, Placement> {
    let width = to_coord(screen.width);
    let size = to_coord(icon_size);
    let mut slot = 0;
    let mut placements = BTreeMap::new();
    for category in desired.keys().copied() {
        let at = if category.in_status_row() {
            slot += 1;
            Placement {
                x: width.saturating_sub(size.saturating_mul(slot)),
                y: 0,
            }
        } else {
            Placement {
                x: to_coord(screen.width / 2) - ALERT_HALF_SIZE,
                y: to_coord(screen.height / 2) - ALERT_HALF_SIZE,
            }
        };
        placements.insert(category, at);
    }
    placements
}

fn to_coord(value: u32) -> i32 {
    i32::try_from(value).unwrap_or(i32::MAX)
}

/// Spawns and terminates long-lived image overlay processes.
pub trait OverlayRenderer {
    type Handle;

    fn spawn(&mut self, asset: &Path, at: Placement) -> Result<Self::Handle>;

    /// Consumes the handle; it is gone from the caller's books whether or not the kill succeeds.
    fn kill(&mut self, handle: Self::Handle) -> Result<()>;
}

struct LiveOverlay<H> {
    icon: IconId,
    at: Placement,
    handle: H,
}

/// What one [`OverlayManager::reconcile`] pass did.
#[derive(Debug, Default)]
pub struct ReconcileReport {
    pub spawned: Vec<OverlayCategory>,
    pub killed: Vec<OverlayCategory>,
    pub errors: Vec<(OverlayCategory, Error)>,
}

impl ReconcileReport {
    pub fn is_noop(&self) -> bool {
        self.spawned.is_empty() && self.killed.is_empty() && self.errors.is_empty()
    }
}

/// Sole owner of every live overlay process, at most one per [`OverlayCategory`].
pub struct OverlayManager<R: OverlayRenderer> {
    renderer: R,
    icons: IconSet,
    screen: Screen,
    live: BTreeMap<OverlayCategory, LiveOverlay<R::Handle>>,
}

impl<R: OverlayRenderer> OverlayManager<R> {
    pub fn new(renderer: R, icons: IconSet, screen: Screen) -> Self {
        Self {
            renderer,
            icons,
            screen,
            live: BTreeMap::new(),
        }
    }

    /// Brings the live set in line with `desired`.
    ///
    /// Stale or moved overlays are killed before anything new is spawned; entries whose icon
    /// and position are unchanged are left running. A failed spawn leaves the category empty
    /// so the next pass retries it.
    pub fn reconcile(&mut self, desired: &DesiredOverlays) -> ReconcileReport {
        let placements = layout(desired, self.screen, self.icons.size());
        let mut report = ReconcileReport::default();

        let stale: Vec<OverlayCategory> = self
            .live
            .iter()
            .filter(|(category, live)| {
                desired.get(*category) != Some(&live.icon)
                    || placements.get(*category) != Some(&live.at)
            })
            .map(|(category, _)| *category)
            .collect();
        for category in stale {
            if let Some(live) = self.live.remove(&category) {
                if let Err(err) = self.renderer.kill(live.handle) {
                    report.errors.push((category, err));
                }
                report.killed.push(category);
            }
        }

        for (category, icon) in desired {
            if self.live.contains_key(category) {
                continue;
            }
            let Some(at) = placements.get(category).copied() else {
                continue;
            };
            match self.renderer.spawn(&self.icons.asset(*icon), at) {
                Ok(handle) => {
                    self.live.insert(
                        *category,
                        LiveOverlay {
                            icon: *icon,
                            at,
                            handle,
                        },
                    );
                    report.spawned.push(*category);
                }
                Err(err) => report.errors.push((*category, err)),
            }
        }
        report
    }

    /// Kills every live overlay. Used on exit.
    pub fn clear_all(&mut self) -> Vec<(OverlayCategory, Error)> {
        let mut errors = Vec::new();
        for (category, live) in std::mem::take(&mut self.live) {
            if let Err(err) = self.renderer.kill(live.handle) {
                errors.push((category, err));
            }
        }
        errors
    }

    pub fn live_icon(&self, category: OverlayCategory) -> Option<IconId> {
        self.live.get(&category).map(|live| live.icon)
    }

    pub fn live_placement(&self, category: OverlayCategory) -> Option<Placement> {
        self.live.get(&category).map(|live| live.at)
    }

    pub fn live_categories(&self) -> Vec<OverlayCategory> {
        self.live.keys().copied().collect()
    }

    pub fn renderer(&self) -> &R {
        &self.renderer
    }
}

/// Draws overlays with the `pngview` dispmanx helper, one child process per icon.
#[derive(Debug, Clone)]
pub struct PngviewRenderer {
    program: PathBuf,
    layer: u32,
}

impl PngviewRenderer {
    pub fn new(program: impl Into<PathBuf>, layer: u32) -> Self {
        Self {
            program: program.into(),
            layer,
        }
    }

    fn args(&self, at: Placement) -> Vec<String> {
        vec![
            "-d".into(),
            "0".into(),
            "-b".into(),
            "0x0000".into(),
            "-n".into(),
            "-l".into(),
            self.layer.to_string(),
            "-y".into(),
            at.y.to_string(),
            "-x".into(),
            at.x.to_string(),
        ]
    }
}

impl OverlayRenderer for PngviewRenderer {
    type Handle = Child;

    fn spawn(&mut self, asset: &Path, at: Placement) -> Result<Child> {
        Command::new(&self.program)
            .args(self.args(at))
            .arg(asset)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|err| match err.kind() {
                ErrorKind::NotFound => {
                    Error::Command(format!("{}: not found", self.program.display()))
                }
                _ => Error::Io(err),
            })
    }

    fn kill(&mut self, mut handle: Child) -> Result<()> {
        let killed = handle.kill();
        // Reap even when the child already exited so no zombie is left behind.
        let reaped = handle.wait();
        killed?;
        reaped?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::display::fake::{RecordingRenderer, RenderEvent};
    use crate::state::{BatteryLevel, ChargeDirection, SignalLevel, ThrottleFlags};

    const SCREEN: Screen = Screen {
        width: 800,
        height: 480,
    };

    fn state() -> SystemState {
        SystemState {
            voltage: 3.7,
            direction: ChargeDirection::Discharging,
            battery: BatteryLevel::Discharging(8),
            critical: false,
            wifi: InterfaceState::Connected,
            wifi_level: SignalLevel::from_dbm(-55.0),
            bluetooth: InterfaceState::Enabled,
            throttle: ThrottleFlags::default(),
        }
    }

    fn manager() -> OverlayManager<RecordingRenderer> {
        OverlayManager::new(
            RecordingRenderer::default(),
            IconSet::new("/icons", 24, "white"),
            SCREEN,
        )
    }

    #[test]
    fn desired_set_skips_disabled_interfaces() {
        let mut s = state();
        s.wifi = InterfaceState::Disabled;
        s.bluetooth = InterfaceState::Disabled;
        let desired = desired_overlays(&s, false);
        assert_eq!(desired.keys().copied().collect::<Vec<_>>(), vec![OverlayCategory::Battery]);
    }

    #[test]
    fn desired_set_has_one_entry_per_throttle_bit() {
        let mut s = state();
        s.throttle = ThrottleFlags::from_bits(0x7);
        let desired = desired_overlays(&s, true);
        assert_eq!(desired.get(&OverlayCategory::UnderVoltage), Some(&IconId::UnderVoltage));
        assert_eq!(desired.get(&OverlayCategory::FrequencyCapped), Some(&IconId::FrequencyCapped));
        assert_eq!(desired.get(&OverlayCategory::Throttled), Some(&IconId::Throttled));
        assert_eq!(desired.get(&OverlayCategory::CriticalAlert), Some(&IconId::CriticalBattery));
    }

    #[test]
    fn layout_packs_visible_icons_from_the_right() {
        let mut s = state();
        let placements = layout(&desired_overlays(&s, false), SCREEN, 24);
        assert_eq!(placements[&OverlayCategory::Battery], Placement { x: 776, y: 0 });
        assert_eq!(placements[&OverlayCategory::Wifi], Placement { x: 752, y: 0 });
        assert_eq!(placements[&OverlayCategory::Bluetooth], Placement { x: 728, y: 0 });

        s.wifi = InterfaceState::Disabled;
        let placements = layout(&desired_overlays(&s, false), SCREEN, 24);
        assert_eq!(placements[&OverlayCategory::Bluetooth], Placement { x: 752, y: 0 });
    }

    #[test]
    fn critical_alert_is_centred() {
        let placements = layout(&desired_overlays(&state(), true), SCREEN, 24);
        assert_eq!(
            placements[&OverlayCategory::CriticalAlert],
            Placement { x: 336, y: 176 }
        );
    }

    #[test]
    fn identical_reconcile_is_a_noop() {
        let mut overlays = manager();
        let desired = desired_overlays(&state(), false);
        let first = overlays.reconcile(&desired);
        assert_eq!(first.spawned.len(), 3);
        let events = overlays.renderer().events.len();

        let second = overlays.reconcile(&desired);
        assert!(second.is_noop());
        assert_eq!(overlays.renderer().events.len(), events);
    }

    #[test]
    fn changed_icon_is_killed_before_respawn() {
        let mut overlays = manager();
        let mut s = state();
        overlays.reconcile(&desired_overlays(&s, false));
        s.battery = BatteryLevel::Discharging(7);
        let report = overlays.reconcile(&desired_overlays(&s, false));
        assert_eq!(report.killed, vec![OverlayCategory::Battery]);
        assert_eq!(report.spawned, vec![OverlayCategory::Battery]);
        let tail = &overlays.renderer().events[3..];
        assert!(matches!(tail[0], RenderEvent::Kill(_)));
        assert!(matches!(tail[1], RenderEvent::Spawn { .. }));
    }

    #[test]
    fn failed_kill_still_clears_the_entry() {
        let mut overlays = manager();
        let mut s = state();
        overlays.reconcile(&desired_overlays(&s, false));
        overlays.renderer.fail_kills = true;
        s.bluetooth = InterfaceState::Disabled;
        let report = overlays.reconcile(&desired_overlays(&s, false));
        assert_eq!(report.errors.len(), 1);
        assert_eq!(overlays.live_icon(OverlayCategory::Bluetooth), None);
    }

    #[test]
    fn failed_spawn_is_retried_next_pass() {
        let mut overlays = manager();
        overlays.renderer.fail_spawns = true;
        let desired = desired_overlays(&state(), false);
        let report = overlays.reconcile(&desired);
        assert_eq!(report.errors.len(), 3);
        assert!(overlays.live_categories().is_empty());

        overlays.renderer.fail_spawns = false;
        let report = overlays.reconcile(&desired);
        assert_eq!(report.spawned.len(), 3);
    }

    #[test]
    fn clear_all_kills_everything() {
        let mut overlays = manager();
        overlays.reconcile(&desired_overlays(&state(), true));
        assert!(overlays.clear_all().is_empty());
        assert!(overlays.live_categories().is_empty());
        assert!(overlays.renderer().live.is_empty());
    }

    #[test]
    fn pngview_args_match_helper_cli() {
        let renderer = PngviewRenderer::new("/usr/local/bin/pngview", 15000);
        let args = renderer.args(Placement { x: 776, y: 0 });
        assert_eq!(
            args.join(" "),
            "-d 0 -b 0x0000 -n -l 15000 -y 0 -x 776"
        );
    }

    #[test]
    fn pngview_missing_binary_is_reported() {
        let mut renderer = PngviewRenderer::new("/nonexistent/pngview", 15000);
        let err = renderer
            .spawn(Path::new("/icons/x.png"), Placement { x: 0, y: 0 })
            .unwrap_err();
        assert!(matches!(err, Error::Command(ref msg) if msg.contains("not found")));
    }
}
