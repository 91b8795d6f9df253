//! System-wide hotkeys through `global-hotkey`
//!
//! Combos use the `<modifier>+key` notation stored in the config file, for
//! example `<ctrl>+<alt>+k` or `<f5>`. Presses of registered combos are
//! forwarded as their combo string.
//!
//! `global-hotkey` delivers presses through the event loop of the thread that
//! owns the manager. On Linux and Windows a listener thread owns it and pumps
//! its own messages. macOS only delivers to the main thread, so there the
//! manager lives inside [`run_event_loop`], which the binary runs on its main
//! thread while hotkeys are live.

use crossbeam::channel::{bounded, Receiver, RecvTimeoutError, Sender, TryRecvError};
use cueboard_core::domain::{normalize_combo, HotkeyListener, KeyEvents, Result, SoundboardError};
use global_hotkey::hotkey::{Code, HotKey, Modifiers};
use global_hotkey::{GlobalHotKeyEvent, GlobalHotKeyManager, HotKeyState};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{debug, error, info, warn};

const EVENT_POLL: Duration = Duration::from_millis(10);

/// How long `start` waits for the event loop to confirm registration
const READY_WAIT: Duration = Duration::from_secs(5);

/// Parse a combo string such as `<ctrl>+<shift>+p` into a [`HotKey`]
///
/// Exactly one non-modifier key is required.
pub fn parse_combo(combo: &str) -> std::result::Result<HotKey, String> {
    let normalized = normalize_combo(combo);
    if normalized.is_empty() {
        return Err("empty hotkey".to_string());
    }

    let mut modifiers = Modifiers::empty();
    let mut key = None;
    for token in normalized.split('+') {
        if token.is_empty() {
            return Err(format!("empty key in '{}'", combo));
        }
        let name = token
            .strip_prefix('<')
            .and_then(|t| t.strip_suffix('>'))
            .unwrap_or(token);

        if let Some(modifier) = parse_modifier(name) {
            modifiers |= modifier;
            continue;
        }
        let code = parse_key(name).ok_or_else(|| format!("unknown key '{}'", token))?;
        if key.replace(code).is_some() {
            return Err(format!("more than one key in '{}'", combo));
        }
    }

    let key = key.ok_or_else(|| format!("no key in '{}'", combo))?;
    let modifiers = (!modifiers.is_empty()).then_some(modifiers);
    Ok(HotKey::new(modifiers, key))
}

fn parse_modifier(name: &str) -> Option<Modifiers> {
    match name {
        "ctrl" | "ctrl_l" | "ctrl_r" | "control" => Some(Modifiers::CONTROL),
        "alt" | "alt_l" | "alt_r" | "alt_gr" => Some(Modifiers::ALT),
        "shift" | "shift_l" | "shift_r" => Some(Modifiers::SHIFT),
        "cmd" | "cmd_l" | "cmd_r" | "super" | "win" | "meta" => Some(Modifiers::SUPER),
        _ => None,
    }
}

fn parse_key(name: &str) -> Option<Code> {
    let mut chars = name.chars();
    if let (Some(c), None) = (chars.next(), chars.next()) {
        return parse_char(c);
    }

    if let Some(n) = name.strip_prefix('f').and_then(|n| n.parse::<u8>().ok()) {
        return function_key(n);
    }

    let code = match name {
        "space" => Code::Space,
        "enter" | "return" => Code::Enter,
        "esc" | "escape" => Code::Escape,
        "tab" => Code::Tab,
        "backspace" => Code::Backspace,
        "delete" | "del" => Code::Delete,
        "insert" => Code::Insert,
        "home" => Code::Home,
        "end" => Code::End,
        "page_up" | "pageup" => Code::PageUp,
        "page_down" | "pagedown" => Code::PageDown,
        "up" => Code::ArrowUp,
        "down" => Code::ArrowDown,
        "left" => Code::ArrowLeft,
        "right" => Code::ArrowRight,
        "pause" => Code::Pause,
        "print_screen" => Code::PrintScreen,
        "scroll_lock" => Code::ScrollLock,
        _ => return None,
    };
    Some(code)
}

fn parse_char(c: char) -> Option<Code> {
    let code = match c {
        'a' => Code::KeyA,
        'b' => Code::KeyB,
        'c' => Code::KeyC,
        'd' => Code::KeyD,
        'e' => Code::KeyE,
        'f' => Code::KeyF,
        'g' => Code::KeyG,
        'h' => Code::KeyH,
        'i' => Code::KeyI,
        'j' => Code::KeyJ,
        'k' => Code::KeyK,
        'l' => Code::KeyL,
        'm' => Code::KeyM,
        'n' => Code::KeyN,
        'o' => Code::KeyO,
        'p' => Code::KeyP,
        'q' => Code::KeyQ,
        'r' => Code::KeyR,
        's' => Code::KeyS,
        't' => Code::KeyT,
        'u' => Code::KeyU,
        'v' => Code::KeyV,
        'w' => Code::KeyW,
        'x' => Code::KeyX,
        'y' => Code::KeyY,
        'z' => Code::KeyZ,
        '0' => Code::Digit0,
        '1' => Code::Digit1,
        '2' => Code::Digit2,
        '3' => Code::Digit3,
        '4' => Code::Digit4,
        '5' => Code::Digit5,
        '6' => Code::Digit6,
        '7' => Code::Digit7,
        '8' => Code::Digit8,
        '9' => Code::Digit9,
        '-' => Code::Minus,
        '=' => Code::Equal,
        ',' => Code::Comma,
        '.' => Code::Period,
        '/' => Code::Slash,
        ';' => Code::Semicolon,
        '\'' => Code::Quote,
        '[' => Code::BracketLeft,
        ']' => Code::BracketRight,
        '\\' => Code::Backslash,
        '`' => Code::Backquote,
        _ => return None,
    };
    Some(code)
}

fn function_key(n: u8) -> Option<Code> {
    const KEYS: [Code; 24] = [
        Code::F1,
        Code::F2,
        Code::F3,
        Code::F4,
        Code::F5,
        Code::F6,
        Code::F7,
        Code::F8,
        Code::F9,
        Code::F10,
        Code::F11,
        Code::F12,
        Code::F13,
        Code::F14,
        Code::F15,
        Code::F16,
        Code::F17,
        Code::F18,
        Code::F19,
        Code::F20,
        Code::F21,
        Code::F22,
        Code::F23,
        Code::F24,
    ];
    KEYS.get(usize::from(n).checked_sub(1)?).copied()
}

struct StartRequest {
    hotkeys: Vec<(HotKey, String)>,
    events: KeyEvents,
    ready: Sender<std::result::Result<(), String>>,
    shutdown: Receiver<()>,
}

/// Hotkeys registered with one manager; unregistered on drop
struct Registration {
    manager: GlobalHotKeyManager,
    hotkeys: Vec<HotKey>,
    by_id: HashMap<u32, String>,
    events: KeyEvents,
}

impl Registration {
    fn open(hotkeys: Vec<(HotKey, String)>, events: KeyEvents) -> std::result::Result<Self, String> {
        let manager = GlobalHotKeyManager::new()
            .map_err(|e| format!("cannot start hotkey manager: {}", e))?;
        let mut registration = Self {
            manager,
            hotkeys: Vec::with_capacity(hotkeys.len()),
            by_id: HashMap::with_capacity(hotkeys.len()),
            events,
        };

        for (hotkey, combo) in hotkeys {
            registration
                .manager
                .register(hotkey)
                .map_err(|e| format!("{}: {}", combo, e))?;
            registration.hotkeys.push(hotkey);
            registration.by_id.insert(hotkey.id(), combo);
        }
        Ok(registration)
    }

    /// Forward pending presses, waiting up to `wait` for the first one
    ///
    /// Returns false once the dispatcher has gone away.
    fn forward(&self, wait: Duration) -> bool {
        let receiver = GlobalHotKeyEvent::receiver();
        let mut next = match receiver.recv_timeout(wait) {
            Ok(event) => Some(event),
            Err(RecvTimeoutError::Timeout) => None,
            Err(RecvTimeoutError::Disconnected) => return false,
        };

        while let Some(event) = next {
            if event.state == HotKeyState::Pressed {
                if let Some(combo) = self.by_id.get(&event.id) {
                    debug!(combo = %combo, "Hotkey pressed");
                    if self.events.send(combo.clone()).is_err() {
                        warn!("Hotkey dispatcher went away");
                        return false;
                    }
                }
            }
            next = receiver.try_recv().ok();
        }
        true
    }
}

impl Drop for Registration {
    fn drop(&mut self) {
        for hotkey in &self.hotkeys {
            if let Err(e) = self.manager.unregister(*hotkey) {
                warn!("Failed to unregister hotkey: {}", e);
            }
        }
    }
}

fn shutdown_requested(shutdown: &Receiver<()>) -> bool {
    !matches!(shutdown.try_recv(), Err(TryRecvError::Empty))
}

struct ListenerWorker {
    shutdown: Sender<()>,
    handle: Option<JoinHandle<()>>,
}

/// [`HotkeyListener`] backed by the OS global hotkey APIs
#[derive(Default)]
pub struct GlobalHotkeyListener {
    worker: Option<ListenerWorker>,
}

impl GlobalHotkeyListener {
    pub fn new() -> Self {
        Self::default()
    }
}

impl HotkeyListener for GlobalHotkeyListener {
    fn start(&mut self, combos: &[String], events: KeyEvents) -> Result<()> {
        self.stop();

        let mut hotkeys = Vec::with_capacity(combos.len());
        for combo in combos {
            let hotkey = parse_combo(combo).map_err(|reason| {
                SoundboardError::HotkeyRegistration(format!("{}: {}", combo, reason))
            })?;
            hotkeys.push((hotkey, combo.clone()));
        }

        let (ready_tx, ready_rx) = bounded(1);
        let (shutdown_tx, shutdown_rx) = bounded(1);
        let handle = launch(StartRequest {
            hotkeys,
            events,
            ready: ready_tx,
            shutdown: shutdown_rx,
        })
        .map_err(|e| SoundboardError::HotkeyRegistration(e.to_string()))?;
        let worker = ListenerWorker {
            shutdown: shutdown_tx,
            handle,
        };

        let failure = match ready_rx.recv_timeout(READY_WAIT) {
            Ok(Ok(())) => {
                info!("Registered {} global hotkeys", combos.len());
                self.worker = Some(worker);
                return Ok(());
            }
            Ok(Err(reason)) => reason,
            Err(RecvTimeoutError::Timeout) => {
                "no hotkey event loop is running on the main thread".to_string()
            }
            Err(RecvTimeoutError::Disconnected) => {
                "hotkey listener exited during registration".to_string()
            }
        };
        close(worker);
        Err(SoundboardError::HotkeyRegistration(failure))
    }

    fn stop(&mut self) {
        if let Some(worker) = self.worker.take() {
            close(worker);
            debug!("Hotkey listener stopped");
        }
    }
}

impl Drop for GlobalHotkeyListener {
    fn drop(&mut self) {
        self.stop();
    }
}

fn close(worker: ListenerWorker) {
    let _ = worker.shutdown.try_send(());
    if let Some(handle) = worker.handle {
        if handle.join().is_err() {
            error!("Hotkey listener thread panicked");
        }
    }
}

/// Hand a registration to a dedicated listener thread
#[cfg(not(target_os = "macos"))]
fn launch(request: StartRequest) -> std::io::Result<Option<JoinHandle<()>>> {
    std::thread::Builder::new()
        .name("hotkey-listener".to_string())
        .spawn(move || run_listener(request))
        .map(Some)
}

#[cfg(not(target_os = "macos"))]
fn run_listener(request: StartRequest) {
    let StartRequest {
        hotkeys,
        events,
        ready,
        shutdown,
    } = request;

    let registration = match Registration::open(hotkeys, events) {
        Ok(registration) => registration,
        Err(reason) => {
            let _ = ready.send(Err(reason));
            return;
        }
    };
    let _ = ready.send(Ok(()));

    while !shutdown_requested(&shutdown) {
        pump_messages();
        if !registration.forward(EVENT_POLL) {
            break;
        }
    }
}

/// Run the Win32 message pump for this thread's hidden hotkey window
#[cfg(windows)]
fn pump_messages() {
    use windows::Win32::Foundation::HWND;
    use windows::Win32::UI::WindowsAndMessaging::{
        DispatchMessageW, PeekMessageW, TranslateMessage, MSG, PM_REMOVE,
    };

    let mut msg = MSG::default();
    // SAFETY: `msg` is a valid out-pointer and only this thread's queue is read
    unsafe {
        while PeekMessageW(&mut msg, HWND::default(), 0, 0, PM_REMOVE).as_bool() {
            let _ = TranslateMessage(&msg);
            DispatchMessageW(&msg);
        }
    }
}

#[cfg(all(not(windows), not(target_os = "macos")))]
fn pump_messages() {}

/// Registrations waiting for the main thread
#[cfg(target_os = "macos")]
fn main_queue() -> &'static (Sender<StartRequest>, Receiver<StartRequest>) {
    static QUEUE: std::sync::OnceLock<(Sender<StartRequest>, Receiver<StartRequest>)> =
        std::sync::OnceLock::new();
    QUEUE.get_or_init(crossbeam::channel::unbounded)
}

#[cfg(target_os = "macos")]
fn launch(request: StartRequest) -> std::io::Result<Option<JoinHandle<()>>> {
    let _ = main_queue().0.send(request);
    Ok(None)
}

/// Keep hotkeys flowing until `stop` is raised
///
/// Must be called from the main thread. Registrations made while this runs
/// are hosted here, and the main run loop is spun between event checks.
#[cfg(target_os = "macos")]
pub fn run_event_loop(stop: &AtomicBool) {
    use core_foundation::runloop::{kCFRunLoopDefaultMode, CFRunLoop};

    let requests = &main_queue().1;
    let mut active: Vec<(Registration, Receiver<()>)> = Vec::new();

    while !stop.load(Ordering::SeqCst) {
        while let Ok(request) = requests.try_recv() {
            match Registration::open(request.hotkeys, request.events) {
                Ok(registration) => {
                    let _ = request.ready.send(Ok(()));
                    active.push((registration, request.shutdown));
                }
                Err(reason) => {
                    let _ = request.ready.send(Err(reason));
                }
            }
        }

        active.retain(|(registration, shutdown)| {
            !shutdown_requested(shutdown) && registration.forward(Duration::ZERO)
        });

        // SAFETY: kCFRunLoopDefaultMode is an immutable CFString constant
        let _ = CFRunLoop::run_in_mode(unsafe { kCFRunLoopDefaultMode }, EVENT_POLL, true);
    }
}

/// Keep hotkeys flowing until `stop` is raised
///
/// The listener thread owns the event loop here, so this only waits.
#[cfg(not(target_os = "macos"))]
pub fn run_event_loop(stop: &AtomicBool) {
    while !stop.load(Ordering::SeqCst) {
        std::thread::sleep(EVENT_POLL);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_function_key() {
        let hotkey = parse_combo("<f1>").unwrap();
        assert_eq!(hotkey, HotKey::new(None, Code::F1));

        let hotkey = parse_combo("<F12>").unwrap();
        assert_eq!(hotkey, HotKey::new(None, Code::F12));
    }

    #[test]
    fn test_parse_modifiers() {
        let hotkey = parse_combo("<ctrl>+<alt>+k").unwrap();
        assert_eq!(
            hotkey,
            HotKey::new(Some(Modifiers::CONTROL | Modifiers::ALT), Code::KeyK)
        );

        let hotkey = parse_combo(" <Shift> + <cmd> + 7 ").unwrap();
        assert_eq!(
            hotkey,
            HotKey::new(Some(Modifiers::SHIFT | Modifiers::SUPER), Code::Digit7)
        );
    }

    #[test]
    fn test_parse_named_keys() {
        assert_eq!(parse_combo("<space>").unwrap().key, Code::Space);
        assert_eq!(parse_combo("<ctrl>+<page_up>").unwrap().key, Code::PageUp);
        assert_eq!(parse_combo("<f24>").unwrap().key, Code::F24);
    }

    #[test]
    fn test_parse_rejects_bad_combos() {
        assert!(parse_combo("").is_err());
        assert!(parse_combo("<ctrl>").is_err());
        assert!(parse_combo("<ctrl>+").is_err());
        assert!(parse_combo("a+b").is_err());
        assert!(parse_combo("<f25>").is_err());
        assert!(parse_combo("<f0>").is_err());
        assert!(parse_combo("<hyper>+x").is_err());
    }

    #[test]
    fn test_default_keys_parse() {
        for combo in cueboard_core::domain::DEFAULT_KEYS {
            assert!(parse_combo(combo).is_ok(), "{} should parse", combo);
        }
    }

    #[test]
    fn test_start_rejects_unparseable_combo() {
        let (tx, _rx) = crossbeam::channel::unbounded();
        let mut listener = GlobalHotkeyListener::new();
        let result = listener.start(&["<ctrl>+".to_string()], tx);
        assert!(matches!(
            result,
            Err(SoundboardError::HotkeyRegistration(_))
        ));
        listener.stop();
    }

    #[test]
    fn test_shutdown_signal() {
        let (tx, rx) = bounded(1);
        assert!(!shutdown_requested(&rx));
        tx.send(()).unwrap();
        assert!(shutdown_requested(&rx));

        // A dropped listener handle counts as shutdown too
        let (tx, rx) = bounded::<()>(1);
        drop(tx);
        assert!(shutdown_requested(&rx));
    }

    #[test]
    fn test_event_loop_returns_once_stopped() {
        let stop = std::sync::Arc::new(AtomicBool::new(false));
        let flag = stop.clone();
        let raiser = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(30));
            flag.store(true, Ordering::SeqCst);
        });

        run_event_loop(&stop);
        raiser.join().unwrap();
        assert!(stop.load(Ordering::SeqCst));
    }
}
