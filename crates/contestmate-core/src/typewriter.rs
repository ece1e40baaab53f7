//! Incremental reveal of a reply, one visible character (or one whole markup
//! tag) per tick.

use std::future::Future;
use std::sync::{Arc, LazyLock, Mutex, MutexGuard};
use std::time::Duration;

use regex::Regex;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::debug;

pub const DEFAULT_INTERVAL: Duration = Duration::from_millis(30);

static TAG: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"<[^>]+>").expect("valid regex"));

pub type UpdateSink = Arc<dyn Fn(&str) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypewriterState {
    Idle,
    Running,
    Paused,
    Stopped,
    Complete,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Segment {
    text: String,
    is_tag: bool,
}

/// Splits `text` into reveal units: every complete `<...>` tag is one unit,
/// every other character is its own unit.
fn segment(text: &str) -> Vec<Segment> {
    let chars = |s: &str| {
        s.chars()
            .map(|c| Segment {
                text: c.to_string(),
                is_tag: false,
            })
            .collect::<Vec<_>>()
    };
    let mut out = Vec::new();
    let mut last = 0;
    for m in TAG.find_iter(text) {
        out.extend(chars(&text[last..m.start()]));
        out.push(Segment {
            text: m.as_str().to_owned(),
            is_tag: true,
        });
        last = m.end();
    }
    out.extend(chars(&text[last..]));
    out
}

struct Progress {
    state: TypewriterState,
    cursor: usize,
    text: String,
    /// Bumped whenever the pending tick must be abandoned.
    generation: u64,
    cancel: Option<CancellationToken>,
}

struct Inner {
    segments: Vec<Segment>,
    full_text: String,
    interval: Duration,
    sink: UpdateSink,
    progress: Mutex<Progress>,
    done: watch::Sender<bool>,
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, Progress> {
        self.progress
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Reveals a string to a sink at a fixed cadence.
///
/// The sink runs while the scheduler's state lock is held, so it must not
/// call back into the same scheduler. Ticks run on the tokio runtime; at most
/// one is pending at any time.
#[derive(Clone)]
pub struct Typewriter {
    inner: Arc<Inner>,
}

impl Typewriter {
    pub fn new(
        full_text: impl Into<String>,
        interval: Duration,
        on_update: impl Fn(&str) + Send + Sync + 'static,
    ) -> Self {
        let full_text = full_text.into();
        let (done, _) = watch::channel(false);
        Self {
            inner: Arc::new(Inner {
                segments: segment(&full_text),
                full_text,
                interval,
                sink: Arc::new(on_update),
                progress: Mutex::new(Progress {
                    state: TypewriterState::Idle,
                    cursor: 0,
                    text: String::new(),
                    generation: 0,
                    cancel: None,
                }),
                done,
            }),
        }
    }

    /// Begins or resumes revealing. Has no effect once stopped or complete.
    pub fn start(&self) {
        let mut progress = self.inner.lock();
        match progress.state {
            TypewriterState::Idle | TypewriterState::Paused => {}
            TypewriterState::Running | TypewriterState::Stopped | TypewriterState::Complete => {
                return
            }
        }

        if progress.cursor >= self.inner.segments.len() {
            progress.state = TypewriterState::Complete;
            (self.inner.sink)(&progress.text);
            self.inner.done.send_replace(true);
            return;
        }

        progress.state = TypewriterState::Running;
        progress.generation += 1;
        let token = CancellationToken::new();
        progress.cancel = Some(token.clone());
        let generation = progress.generation;
        drop(progress);

        tokio::spawn(run_ticks(Arc::clone(&self.inner), generation, token));
    }

    pub fn pause(&self) {
        let mut progress = self.inner.lock();
        if progress.state != TypewriterState::Running {
            return;
        }
        progress.state = TypewriterState::Paused;
        abandon_pending(&mut progress);
        debug!(cursor = progress.cursor, "typewriter paused");
    }

    /// Halts for good. No callback fires after this returns.
    pub fn stop(&self) {
        let mut progress = self.inner.lock();
        if progress.state == TypewriterState::Stopped {
            return;
        }
        progress.state = TypewriterState::Stopped;
        abandon_pending(&mut progress);
        drop(progress);
        self.inner.done.send_replace(true);
    }

    /// Stops and shows the whole text at once.
    pub fn complete(&self) {
        let mut progress = self.inner.lock();
        abandon_pending(&mut progress);
        progress.cursor = self.inner.segments.len();
        progress.text.clone_from(&self.inner.full_text);
        progress.state = TypewriterState::Complete;
        (self.inner.sink)(&progress.text);
        drop(progress);
        self.inner.done.send_replace(true);
    }

    pub fn is_complete(&self) -> bool {
        self.inner.lock().cursor >= self.inner.segments.len()
    }

    pub fn state(&self) -> TypewriterState {
        self.inner.lock().state
    }

    pub fn current_text(&self) -> String {
        self.inner.lock().text.clone()
    }

    /// Resolves once the scheduler is complete or stopped.
    pub fn finished(&self) -> impl Future<Output = ()> + Send + 'static {
        let mut done = self.inner.done.subscribe();
        async move {
            let _ = done.wait_for(|finished| *finished).await;
        }
    }
}

fn abandon_pending(progress: &mut Progress) {
    progress.generation += 1;
    if let Some(token) = progress.cancel.take() {
        token.cancel();
    }
}

async fn run_ticks(inner: Arc<Inner>, generation: u64, cancel: CancellationToken) {
    loop {
        let delay = {
            let mut progress = inner.lock();
            if progress.generation != generation || progress.state != TypewriterState::Running {
                return;
            }
            let Some(unit) = inner.segments.get(progress.cursor) else {
                return;
            };
            progress.text.push_str(&unit.text);
            progress.cursor += 1;
            (inner.sink)(&progress.text);

            if progress.cursor >= inner.segments.len() {
                progress.state = TypewriterState::Complete;
                progress.cancel = None;
                drop(progress);
                inner.done.send_replace(true);
                return;
            }

            if unit.is_tag {
                Duration::ZERO
            } else {
                inner.interval
            }
        };

        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = tokio::time::sleep(delay) => {}
        }
    }
}
