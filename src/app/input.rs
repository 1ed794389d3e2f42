use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam::channel::Sender;

use crate::{app::Logger, command::CommandRunner, Error, Result};

use super::LoopSignal;

/// Time a button must stay down before it counts as held.
pub const HOLD_AFTER: Duration = Duration::from_secs(1);
/// Repeat period for a held volume/brightness button.
pub const REPEAT_EVERY: Duration = Duration::from_millis(200);
const POLL_EVERY: Duration = Duration::from_millis(20);
const BRIGHTNESS_STEP: i32 = 10;
const BRIGHTNESS_MAX: i32 = 255;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ButtonId {
    Up,
    Down,
    Misc,
    Power,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ButtonEvent {
    Pressed,
    Held,
    Repeat,
    Released { was_held: bool },
}

/// Press/hold/repeat/release edges for one polled button.
#[derive(Debug, Default, Clone)]
pub struct ButtonTracker {
    down_since: Option<Instant>,
    held: bool,
    last_repeat: Option<Instant>,
}

impl ButtonTracker {
    pub fn is_down(&self) -> bool {
        self.down_since.is_some()
    }

    pub fn update(&mut self, down: bool, now: Instant) -> Option<ButtonEvent> {
        match (self.down_since, down) {
            (None, true) => {
                self.down_since = Some(now);
                Some(ButtonEvent::Pressed)
            }
            (Some(_), false) => {
                let was_held = self.held;
                *self = Self::default();
                Some(ButtonEvent::Released { was_held })
            }
            (Some(since), true) if !self.held => {
                if now.duration_since(since) >= HOLD_AFTER {
                    self.held = true;
                    self.last_repeat = Some(now);
                    Some(ButtonEvent::Held)
                } else {
                    None
                }
            }
            (Some(_), true) => match self.last_repeat {
                Some(last) if now.duration_since(last) >= REPEAT_EVERY => {
                    self.last_repeat = Some(now);
                    Some(ButtonEvent::Repeat)
                }
                _ => None,
            },
            (None, false) => None,
        }
    }
}

/// Side effects the buttons trigger outside the monitor loop.
pub trait InputActions {
    fn adjust_volume(&mut self, up: bool) -> Result<()>;
    fn adjust_brightness(&mut self, delta: i32) -> Result<()>;
    fn restart_wifi(&mut self) -> Result<()>;
}

/// `amixer`, the backlight sysfs file and `ifconfig`.
pub struct SystemInputActions<R: CommandRunner> {
    runner: R,
    backlight: PathBuf,
    interface: String,
}

impl<R: CommandRunner> SystemInputActions<R> {
    pub fn new(runner: R, backlight: impl Into<PathBuf>, interface: impl Into<String>) -> Self {
        Self {
            runner,
            backlight: backlight.into(),
            interface: interface.into(),
        }
    }
}

impl<R: CommandRunner> InputActions for SystemInputActions<R> {
    fn adjust_volume(&mut self, up: bool) -> Result<()> {
        let step = if up { "2.5%+" } else { "2.5%-" };
        self.runner.run("amixer", &["-q", "-M", "set", "PCM", step])?;
        Ok(())
    }

    fn adjust_brightness(&mut self, delta: i32) -> Result<()> {
        let raw = fs::read_to_string(&self.backlight)?;
        let current: i32 = raw
            .trim()
            .parse()
            .map_err(|_| Error::Parse(format!("bad brightness value '{}'", raw.trim())))?;
        let next = (current + delta).clamp(0, BRIGHTNESS_MAX);
        fs::write(&self.backlight, next.to_string())?;
        Ok(())
    }

    fn restart_wifi(&mut self) -> Result<()> {
        self.runner.run("ifconfig", &[self.interface.as_str(), "down"])?;
        self.runner.run("ifconfig", &[self.interface.as_str(), "up"])?;
        Ok(())
    }
}

/// Button semantics. Owned by the button thread; power requests leave through `signals`.
pub struct ButtonActions<A: InputActions> {
    actions: A,
    signals: Sender<LoopSignal>,
    misc_used: bool,
}

impl<A: InputActions> ButtonActions<A> {
    pub fn new(actions: A, signals: Sender<LoopSignal>) -> Self {
        Self {
            actions,
            signals,
            misc_used: false,
        }
    }

    pub fn actions(&self) -> &A {
        &self.actions
    }

    /// Applies one event. `misc_down` is the misc button's state at the same poll.
    pub fn handle(&mut self, button: ButtonId, event: ButtonEvent, misc_down: bool) -> Result<()> {
        match (button, event) {
            (ButtonId::Up | ButtonId::Down, ButtonEvent::Pressed | ButtonEvent::Held | ButtonEvent::Repeat) => {
                let up = button == ButtonId::Up;
                if misc_down {
                    self.misc_used = true;
                    let delta = if up { BRIGHTNESS_STEP } else { -BRIGHTNESS_STEP };
                    self.actions.adjust_brightness(delta)
                } else {
                    self.actions.adjust_volume(up)
                }
            }
            (ButtonId::Misc, ButtonEvent::Released { .. }) => {
                let used = std::mem::take(&mut self.misc_used);
                if used {
                    Ok(())
                } else {
                    self.actions.restart_wifi()
                }
            }
            (ButtonId::Power, ButtonEvent::Held) => self.send(LoopSignal::PowerOff),
            (ButtonId::Power, ButtonEvent::Released { was_held: false }) => {
                self.send(LoopSignal::Reboot)
            }
            _ => Ok(()),
        }
    }

    fn send(&self, signal: LoopSignal) -> Result<()> {
        self.signals
            .send(signal)
            .map_err(|_| Error::Unavailable("monitor loop"))
    }
}

/// Raw level of one button line.
pub trait ButtonInput {
    fn is_down(&mut self) -> bool;
}

/// Pull-up input wired active low; stubbed on non-Linux platforms.
#[cfg(target_os = "linux")]
pub struct GpioButton {
    pin: rppal::gpio::InputPin,
}

#[cfg(target_os = "linux")]
impl GpioButton {
    pub fn new(pin: u8) -> Result<Self> {
        let gpio = rppal::gpio::Gpio::new().map_err(|e| Error::Io(std::io::Error::other(e)))?;
        let input = gpio
            .get(pin)
            .map_err(|e| Error::Io(std::io::Error::other(e)))?
            .into_input_pullup();
        Ok(Self { pin: input })
    }
}

#[cfg(target_os = "linux")]
impl ButtonInput for GpioButton {
    fn is_down(&mut self) -> bool {
        self.pin.is_low()
    }
}

#[cfg(not(target_os = "linux"))]
pub struct GpioButton;

#[cfg(not(target_os = "linux"))]
impl GpioButton {
    pub fn new(_pin: u8) -> Result<Self> {
        Err(Error::Unavailable("gpio"))
    }
}

#[cfg(not(target_os = "linux"))]
impl ButtonInput for GpioButton {
    fn is_down(&mut self) -> bool {
        false
    }
}

/// The four buttons with their edge trackers.
pub struct ButtonPanel<B: ButtonInput> {
    buttons: Vec<(ButtonId, B, ButtonTracker)>,
}

impl<B: ButtonInput> ButtonPanel<B> {
    pub fn new(up: B, down: B, misc: B, power: B) -> Self {
        let buttons = vec![
            (ButtonId::Misc, misc, ButtonTracker::default()),
            (ButtonId::Up, up, ButtonTracker::default()),
            (ButtonId::Down, down, ButtonTracker::default()),
            (ButtonId::Power, power, ButtonTracker::default()),
        ];
        Self { buttons }
    }

    /// Samples every line once. Misc is sampled first so volume/brightness see its level.
    pub fn poll(&mut self, now: Instant) -> Vec<(ButtonId, ButtonEvent)> {
        self.buttons
            .iter_mut()
            .filter_map(|(id, input, tracker)| {
                let down = input.is_down();
                tracker.update(down, now).map(|event| (*id, event))
            })
            .collect()
    }

    pub fn is_down(&self, button: ButtonId) -> bool {
        self.buttons
            .iter()
            .any(|(id, _, tracker)| *id == button && tracker.is_down())
    }
}

/// Polls the panel until the monitor loop goes away.
pub fn spawn_button_thread<B, A>(
    mut panel: ButtonPanel<B>,
    mut actions: ButtonActions<A>,
    logger: Arc<Logger>,
) -> Result<JoinHandle<()>>
where
    B: ButtonInput + Send + 'static,
    A: InputActions + Send + 'static,
{
    thread::Builder::new()
        .name("pistatus-buttons".into())
        .spawn(move || loop {
            let now = Instant::now();
            for (button, event) in panel.poll(now) {
                let misc_down = panel.is_down(ButtonId::Misc);
                logger.debug(format!("button {button:?}: {event:?}"));
                match actions.handle(button, event, misc_down) {
                    Ok(()) => {}
                    Err(Error::Unavailable(what)) => {
                        logger.debug(format!("button thread stopping: {what} gone"));
                        return;
                    }
                    Err(err) => logger.warn(format!("button {button:?}: {err}")),
                }
            }
            thread::sleep(POLL_EVERY);
        })
        .map_err(Error::Io)
}
