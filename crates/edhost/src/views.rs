use std::sync::Mutex;

use crate::locked;
use crate::settings::Settings;

/// Identity of a view, stable for the lifetime of the host process.
pub type ViewId = usize;

/// An open view: an identity plus its live per-view settings.
///
/// Clones share the same settings map, so a view obtained from a window
/// snapshot and one resolved later by id mutate the same state.
#[derive(Clone)]
pub struct View {
    id: ViewId,
    settings: Settings,
}

impl View {
    pub fn id(&self) -> ViewId {
        self.id
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }
}

/// A window and the views it currently shows.
#[derive(Clone)]
pub struct Window {
    id: usize,
    views: Vec<View>,
}

impl Window {
    pub fn id(&self) -> usize {
        self.id
    }

    pub fn views(&self) -> &[View] {
        &self.views
    }
}

/// Host access to open windows and views.
pub trait ViewHost: Send + Sync {
    /// Snapshot of the open windows, in host order.
    fn windows(&self) -> Vec<Window>;

    /// Resolves a view by identity; `None` once the view has closed.
    fn view_by_id(&self, id: ViewId) -> Option<View>;
}

/// In-memory registry of windows and views.
#[derive(Default)]
pub struct MemoryViews {
    inner: Mutex<ViewsInner>,
}

#[derive(Default)]
struct ViewsInner {
    windows: Vec<Window>,
    next_id: usize,
}

impl MemoryViews {
    pub fn new() -> Self {
        Self::default()
    }

    /// Opens a new empty window and returns its id.
    pub fn add_window(&self) -> usize {
        let mut inner = locked(&self.inner);
        let id = inner.next_id;
        inner.next_id += 1;
        inner.windows.push(Window {
            id,
            views: Vec::new(),
        });
        id
    }

    /// Opens a view in the window `window_id` and returns it.
    pub fn add_view(&self, window_id: usize) -> View {
        let mut inner = locked(&self.inner);
        let id = inner.next_id;
        inner.next_id += 1;
        let view = View {
            id,
            settings: Settings::new(),
        };
        if let Some(window) = inner.windows.iter_mut().find(|window| window.id == window_id) {
            window.views.push(view.clone());
        }
        view
    }

    /// Closes a view; later lookups by its id return `None`.
    pub fn close_view(&self, id: ViewId) {
        let mut inner = locked(&self.inner);
        for window in inner.windows.iter_mut() {
            window.views.retain(|view| view.id != id);
        }
    }
}

impl ViewHost for MemoryViews {
    fn windows(&self) -> Vec<Window> {
        locked(&self.inner).windows.clone()
    }

    fn view_by_id(&self, id: ViewId) -> Option<View> {
        locked(&self.inner)
            .windows
            .iter()
            .flat_map(|window| window.views.iter())
            .find(|view| view.id == id)
            .cloned()
    }
}
