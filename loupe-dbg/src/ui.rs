pub(crate) mod panels;

use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use colored::Colorize;
use crossbeam_channel::{bounded, Sender};
use crossterm::event::{self, Event, KeyCode, KeyEventKind, KeyModifiers};
use crossterm::execute;
use crossterm::terminal::{
    disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen,
};
use loupe_core::Engine;
use ratatui::backend::CrosstermBackend;
use ratatui::Terminal;

use crate::streams::Stream;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Streams go to stdout/stderr, pauses prompt on the terminal.
    Standard,
    /// Full-screen debugger.
    Interactive,
}

#[derive(Clone, Copy, PartialEq, Eq)]
pub(crate) enum Tone {
    Running,
    Paused,
    Stopped,
}

pub(crate) struct Status {
    pub text: String,
    pub tone: Tone,
}

/// Memory panel view state. `bytes_per_line` and `lines` are derived from
/// the panel geometry on every repaint; the key handlers use whatever the
/// last repaint measured.
pub(crate) struct MemoryPanel {
    pub offset: u64,
    pub bytes_per_line: usize,
    pub lines: usize,
    pub prompt: Option<String>,
}

impl MemoryPanel {
    fn new() -> Self {
        Self {
            offset: 0x7C00,
            bytes_per_line: 16,
            lines: 16,
            prompt: None,
        }
    }

    pub fn scroll_up(&mut self, lines: usize) {
        self.offset = self
            .offset
            .saturating_sub((self.bytes_per_line * lines) as u64);
    }

    pub fn scroll_down(&mut self, lines: usize, memory_size: u64) {
        let next = self.offset + (self.bytes_per_line * lines) as u64;
        if next < memory_size {
            self.offset = next;
        }
    }
}

pub(crate) struct UiInner {
    pub mode: Mode,
    pub colors: bool,
    pub engine: Engine,
    pub output: Stream,
    pub debug: Stream,
    pub status: Mutex<Status>,
    resume: Mutex<Option<Sender<u8>>>,
    guest_key: Mutex<Option<Sender<u8>>>,
    pub memory: Mutex<MemoryPanel>,
    quit: AtomicBool,
}

/// The UI controller. Cloneable handle shared between the main thread (event
/// loop, repaints) and the emulation worker (pause barrier, BIOS keyboard
/// wait).
#[derive(Clone)]
pub struct Ui {
    pub(crate) inner: Arc<UiInner>,
}

impl Ui {
    pub fn new(mode: Mode, colors: bool, engine: Engine, output: Stream, debug: Stream) -> Self {
        Self {
            inner: Arc::new(UiInner {
                mode,
                colors,
                engine,
                output,
                debug,
                status: Mutex::new(Status {
                    text: "Emulation not running".into(),
                    tone: Tone::Stopped,
                }),
                resume: Mutex::new(None),
                guest_key: Mutex::new(None),
                memory: Mutex::new(MemoryPanel::new()),
                quit: AtomicBool::new(false),
            }),
        }
    }

    pub fn mode(&self) -> Mode {
        self.inner.mode
    }

    /// Wires the engine lifecycle into the status line.
    pub fn attach(&self) {
        let ui = self.clone();
        self.inner.engine.on_start(move || {
            ui.set_status("Emulation running...", Tone::Running);
        });

        let ui = self.clone();
        self.inner.engine.on_stop(move || {
            ui.set_status("Emulation stopped", Tone::Stopped);
        });
    }

    pub(crate) fn set_status(&self, text: impl Into<String>, tone: Tone) {
        let mut status = self.inner.status.lock().unwrap();
        status.text = text.into();
        status.tone = tone;
    }

    /// Blocks the calling (emulation) thread until the operator resumes.
    /// Returns the key that released the barrier.
    pub fn wait_for_user_resume(&self) -> u8 {
        match self.inner.mode {
            Mode::Standard => {
                println!(
                    "{}",
                    "Emulation paused - Press [ENTER] to continue...".yellow()
                );
                let mut line = String::new();
                let _ = io::stdin().read_line(&mut line);
                b'\n'
            }
            Mode::Interactive => {
                let receiver = {
                    let (sender, receiver) = bounded(1);
                    *self.inner.resume.lock().unwrap() = Some(sender);
                    receiver
                };
                self.set_status(
                    "Emulation paused - Press [ENTER] or [SPACE] to continue...",
                    Tone::Paused,
                );

                // the barrier is one-shot: the key handler takes the sender
                let key = receiver.recv().unwrap_or(b'\n');

                if self.inner.engine.running() {
                    self.set_status("Emulation running...", Tone::Running);
                } else {
                    self.set_status("Emulation stopped", Tone::Stopped);
                }
                key
            }
        }
    }

    /// Blocks the calling (emulation) thread until the operator types a key
    /// for the guest (INT 16h AH=00h).
    pub fn read_guest_key(&self) -> u8 {
        match self.inner.mode {
            Mode::Standard => {
                let mut line = String::new();
                let _ = io::stdin().read_line(&mut line);
                line.bytes().next().unwrap_or(b'\r')
            }
            Mode::Interactive => {
                let receiver = {
                    let (sender, receiver) = bounded(1);
                    *self.inner.guest_key.lock().unwrap() = Some(sender);
                    receiver
                };
                self.set_status("Waiting for keyboard input...", Tone::Paused);

                let key = receiver.recv().unwrap_or(b'\r');

                self.set_status("Emulation running...", Tone::Running);
                key
            }
        }
    }

    /// Wakes any worker blocked on this UI; used at teardown so `q` never
    /// leaves the emulation thread parked on a dead barrier.
    pub fn release_waiters(&self) {
        self.inner.resume.lock().unwrap().take();
        self.inner.guest_key.lock().unwrap().take();
    }

    pub fn quit_requested(&self) -> bool {
        self.inner.quit.load(Ordering::SeqCst)
    }

    /// Key dispatch. Runs on the UI thread; also driven directly by tests.
    pub fn press_key(&self, key: u8) {
        if key == b'q' {
            self.inner.quit.store(true, Ordering::SeqCst);
            return;
        }

        let prompting = self.inner.memory.lock().unwrap().prompt.is_some();

        if matches!(key, b'\n' | b'\r' | b' ') && !prompting {
            if let Some(sender) = self.inner.resume.lock().unwrap().take() {
                let _ = sender.send(key);
                return;
            }
        }

        if let Some(sender) = self.inner.guest_key.lock().unwrap().take() {
            let _ = sender.send(key);
            return;
        }

        let memory_size = self.inner.engine.memory_size() as u64;
        let mut panel = self.inner.memory.lock().unwrap();
        match key {
            b'm' => {
                panel.prompt = match panel.prompt {
                    Some(_) => None,
                    None => Some(String::new()),
                };
            }
            b'\n' | b'\r' => {
                if let Some(prompt) = panel.prompt.take() {
                    if !prompt.is_empty() {
                        if let Ok(address) = u64::from_str_radix(&prompt, 16) {
                            panel.offset = address.min(memory_size.saturating_sub(1));
                        }
                    }
                }
            }
            127 => {
                if let Some(prompt) = panel.prompt.as_mut() {
                    prompt.pop();
                }
            }
            _ if panel.prompt.is_some() => {
                if key.is_ascii_graphic() {
                    if let Some(prompt) = panel.prompt.as_mut() {
                        prompt.push(key as char);
                    }
                }
            }
            b'a' => panel.scroll_up(1),
            b's' => panel.scroll_down(1, memory_size),
            b'd' => {
                let lines = panel.lines;
                panel.scroll_up(lines);
            }
            b'f' => {
                let lines = panel.lines;
                panel.scroll_down(lines, memory_size);
            }
            b'g' => panel.offset = 0,
            _ => {}
        }
    }

    /// Interactive main loop; owns the terminal until `q`, Ctrl+C or a
    /// repaint failure.
    pub fn run_interactive(&self) -> anyhow::Result<()> {
        enable_raw_mode()?;
        let mut stdout = io::stdout();
        execute!(stdout, EnterAlternateScreen)?;
        let backend = CrosstermBackend::new(stdout);
        let mut terminal = Terminal::new(backend)?;

        let result = self.interactive_loop(&mut terminal);

        disable_raw_mode()?;
        execute!(terminal.backend_mut(), LeaveAlternateScreen)?;

        result
    }

    fn interactive_loop(
        &self,
        terminal: &mut Terminal<CrosstermBackend<io::Stdout>>,
    ) -> anyhow::Result<()> {
        loop {
            terminal.draw(|frame| panels::render(frame, self))?;

            if event::poll(Duration::from_millis(50))? {
                if let Event::Key(key) = event::read()? {
                    if key.kind != KeyEventKind::Press {
                        continue;
                    }
                    match key.code {
                        KeyCode::Char('c') if key.modifiers.contains(KeyModifiers::CONTROL) => {
                            self.inner.quit.store(true, Ordering::SeqCst);
                        }
                        KeyCode::Char(c) => self.press_key(c as u8),
                        KeyCode::Enter => self.press_key(b'\n'),
                        KeyCode::Backspace => self.press_key(127),
                        _ => {}
                    }
                }
            }

            if self.quit_requested() {
                return Ok(());
            }
        }
    }

    /// Standard-mode wait: idles until the emulation finishes or SIGINT asks
    /// for a stop.
    pub fn run_standard(&self) -> anyhow::Result<()> {
        let interrupted = Arc::new(AtomicBool::new(false));
        {
            let interrupted = interrupted.clone();
            ctrlc::set_handler(move || {
                interrupted.store(true, Ordering::SeqCst);
            })?;
        }

        while self.inner.engine.running() {
            if interrupted.load(Ordering::SeqCst) {
                self.inner.engine.stop();
                break;
            }
            std::thread::yield_now();
            std::thread::sleep(Duration::from_millis(10));
        }

        Ok(())
    }
}
