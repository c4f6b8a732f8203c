use std::borrow::Cow;
use std::collections::HashMap;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError, RwLock};

use pyhook_proto::HandlerRegion;

use crate::runtime::{ExceptionInfo, Frame, FrameRef, ObjectKind, ObjectRef};

/// Break mode of an exception type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BreakMode(i32);

impl BreakMode {
    /// Never break.
    pub const NEVER: Self = Self(0);

    /// Break whenever the exception is raised.
    pub const ALWAYS: Self = Self(1);

    /// Break when the exception is raised and no handler catches it.
    pub const UNHANDLED: Self = Self(32);

    /// Creates a mode from its wire bits.
    pub const fn from_bits(bits: i32) -> Self {
        Self(bits)
    }

    /// Returns whether all the bits of `other` are set.
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0 && other.0 != 0
    }
}

impl Default for BreakMode {
    fn default() -> Self {
        Self::UNHANDLED
    }
}

#[derive(Default)]
struct ModeTable {
    default: BreakMode,
    modes: HashMap<String, BreakMode>,
}

/// Exception break modes, keyed by qualified exception type name.
///
/// The whole table is swapped on update, so a classification never sees a
/// partially updated table.
#[derive(Default)]
pub struct ExceptionModes {
    table: RwLock<Arc<ModeTable>>,
}

impl ExceptionModes {
    /// Replaces every mode.
    pub fn replace(&self, default: BreakMode, modes: impl IntoIterator<Item = (String, BreakMode)>) {
        let table = ModeTable {
            default,
            modes: modes
                .into_iter()
                .map(|(name, mode)| (normalize_name(&name).into_owned(), mode))
                .collect(),
        };

        *self.table.write().unwrap_or_else(PoisonError::into_inner) = Arc::new(table);
    }

    /// Restores the initial modes.
    pub fn reset(&self) {
        self.replace(BreakMode::default(), []);
    }

    /// Returns the mode of the given qualified exception type name.
    pub fn mode_of(&self, name: &str) -> BreakMode {
        let table = self
            .table
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();

        table
            .modes
            .get(normalize_name(name).as_ref())
            .copied()
            .unwrap_or(table.default)
    }
}

fn normalize_name(name: &str) -> Cow<'_, str> {
    match name.strip_prefix("exceptions.") {
        Some(rest) => Cow::Owned(format!("builtins.{rest}")),
        None => Cow::Borrowed(name),
    }
}

#[derive(Default)]
struct CacheState {
    files: HashMap<String, Arc<Vec<HandlerRegion>>>,
    replies: u64,
    cancels: u64,
}

/// Exception handler regions of source files, fetched from the controller.
#[derive(Default)]
pub struct HandlerCache {
    request: Mutex<()>,
    state: Mutex<CacheState>,
    cond: Condvar,
}

impl HandlerCache {
    /// Returns the cached handler regions of a file.
    pub fn get(&self, filename: &str) -> Option<Arc<Vec<HandlerRegion>>> {
        self.lock().files.get(filename).cloned()
    }

    /// Returns the handler regions of a file, requesting them on a cache miss.
    ///
    /// `request` sends the request to the controller and returns whether it
    /// was sent. The calling thread then waits for the next reply (or for
    /// [HandlerCache::cancel]). Requests are serialized.
    pub fn fetch<F>(&self, filename: &str, request: F) -> Option<Arc<Vec<HandlerRegion>>>
    where
        F: FnOnce(&str) -> bool,
    {
        if let Some(regions) = self.get(filename) {
            return Some(regions);
        }

        let _request = self.request.lock().unwrap_or_else(PoisonError::into_inner);

        let (replies, cancels) = {
            let state = self.lock();

            if let Some(regions) = state.files.get(filename) {
                return Some(regions.clone());
            }

            (state.replies, state.cancels)
        };

        if !request(filename) {
            return None;
        }

        let state = self
            .cond
            .wait_while(self.lock(), |s| s.replies == replies && s.cancels == cancels)
            .unwrap_or_else(PoisonError::into_inner);

        state.files.get(filename).cloned()
    }

    /// Stores the handler regions of a file, waking up the waiting requester.
    pub fn store(&self, filename: String, regions: Vec<HandlerRegion>) {
        let mut state = self.lock();
        state.files.insert(filename, Arc::new(regions));
        state.replies = state.replies.wrapping_add(1);
        self.cond.notify_all();
    }

    /// Wakes up the waiting requester without reply.
    pub fn cancel(&self) {
        let mut state = self.lock();
        state.cancels = state.cancels.wrapping_add(1);
        self.cond.notify_all();
    }

    /// Discards every cached entry.
    pub fn clear(&self) {
        self.lock().files.clear();
    }

    fn lock(&self) -> MutexGuard<'_, CacheState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Decides whether a raised exception breaks.
#[derive(Default)]
pub struct ExceptionFilter {
    /// Break modes per exception type.
    pub modes: ExceptionModes,
    /// Handler regions per source file.
    pub handlers: HandlerCache,
}

impl ExceptionFilter {
    /// Returns whether the given exception, reported for the given frame,
    /// should break.
    ///
    /// `request_handlers` is invoked on a handler cache miss (see
    /// [HandlerCache::fetch]).
    pub fn should_break<F>(&self, frame: &FrameRef, info: &ExceptionInfo, request_handlers: F) -> bool
    where
        F: FnMut(&str) -> bool,
    {
        let mode = self.modes.mode_of(&info.qualified_name);

        mode.contains(BreakMode::ALWAYS)
            || (mode.contains(BreakMode::UNHANDLED) && !self.is_handled(frame, info, request_handlers))
    }

    /// Returns whether some `except` clause of the frame stack catches the
    /// given exception.
    pub fn is_handled<F>(&self, frame: &FrameRef, info: &ExceptionInfo, mut request_handlers: F) -> bool
    where
        F: FnMut(&str) -> bool,
    {
        if info.traceback.is_empty() {
            return false;
        }

        if info.traceback.len() > 1 {
            // propagating from a callee, classified when first raised
            return true;
        }

        let mut cur_frame = Some(frame.clone());

        while let Some(frame) = cur_frame {
            let filename = &frame.code().filename;

            let Some(regions) = self.handlers.fetch(filename, &mut request_handlers) else {
                return false;
            };

            let line = frame.line();

            for region in regions.iter().filter(|r| r.contains(line)) {
                if region.is_catch_all() {
                    return true;
                }

                let caught = region.expressions.iter().any(|expr| {
                    resolve_dotted(&*frame, expr).is_some_and(|class| info.exc_type.is_subclass_of(&*class))
                });

                if caught {
                    return true;
                }
            }

            cur_frame = frame.back();
        }

        false
    }
}

/// Resolves a (possibly dotted) name within a frame.
///
/// The first part is looked up through locals, globals and builtins, the
/// remaining parts are only resolved through modules.
pub fn resolve_dotted(frame: &dyn Frame, name: &str) -> Option<ObjectRef> {
    let mut parts = name.trim().split('.');

    let mut object = frame.lookup(parts.next()?)?;

    for part in parts {
        if object.kind() != ObjectKind::Module {
            break;
        }
        object = object.get_attr(part).ok()?;
    }

    Some(object)
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;
    use std::sync::Arc;

    use pyhook_proto::HandlerRegion;

    use super::{BreakMode, ExceptionFilter, ExceptionModes, HandlerCache};
    use crate::marshal::tests::Fake;
    use crate::runtime::tests::FakeFrame;
    use crate::runtime::{ExceptionInfo, FrameRef, ObjectRef, TracebackEntry};

    fn region(start: i32, end: i32, exprs: &[&str]) -> HandlerRegion {
        HandlerRegion {
            line_start: start,
            line_end: end,
            expressions: exprs.iter().map(|e| e.to_string()).collect::<BTreeSet<_>>(),
        }
    }

    fn exception(exc_type: ObjectRef, depth: usize) -> ExceptionInfo {
        ExceptionInfo {
            exc_type,
            value: Fake::str("x"),
            qualified_name: "builtins.ValueError".into(),
            traceback: vec![
                TracebackEntry {
                    filename: "/src/main.py".into(),
                    line: 3,
                    name: "<module>".into(),
                };
                depth
            ],
        }
    }

    #[test]
    fn modes_default_to_unhandled() {
        let modes = ExceptionModes::default();
        assert_eq!(modes.mode_of("builtins.ValueError"), BreakMode::UNHANDLED);

        modes.replace(
            BreakMode::UNHANDLED,
            [("exceptions.ValueError".to_owned(), BreakMode::ALWAYS)],
        );
        assert_eq!(modes.mode_of("builtins.ValueError"), BreakMode::ALWAYS);
        assert_eq!(modes.mode_of("exceptions.ValueError"), BreakMode::ALWAYS);
        assert_eq!(modes.mode_of("builtins.KeyError"), BreakMode::UNHANDLED);

        modes.reset();
        assert_eq!(modes.mode_of("builtins.ValueError"), BreakMode::UNHANDLED);
    }

    #[test]
    fn mode_bits() {
        let both = BreakMode::from_bits(33);
        assert!(both.contains(BreakMode::ALWAYS));
        assert!(both.contains(BreakMode::UNHANDLED));
        assert!(!BreakMode::NEVER.contains(BreakMode::NEVER));
    }

    #[test]
    fn always_breaks_without_handler_lookup() {
        let filter = ExceptionFilter::default();
        filter
            .modes
            .replace(BreakMode::NEVER, [("builtins.ValueError".into(), BreakMode::ALWAYS)]);

        let frame: FrameRef = FakeFrame::new("<module>", "/src/main.py", 3, None);
        let info = exception(Arc::new(Fake::Class(None)), 5);

        assert!(filter.should_break(&frame, &info, |_| panic!("no request expected")));
    }

    #[test]
    fn propagating_exception_is_handled() {
        let filter = ExceptionFilter::default();
        let frame: FrameRef = FakeFrame::new("<module>", "/src/main.py", 3, None);
        let info = exception(Arc::new(Fake::Class(None)), 2);

        assert!(!filter.should_break(&frame, &info, |_| panic!("no request expected")));
        assert!(filter.should_break(&frame, &exception(Arc::new(Fake::Class(None)), 0), |_| false));
    }

    #[test]
    fn catch_all_region_handles() {
        let filter = ExceptionFilter::default();
        filter
            .handlers
            .store("/src/main.py".into(), vec![region(2, 5, &["*"])]);

        let frame: FrameRef = FakeFrame::new("<module>", "/src/main.py", 3, None);
        let info = exception(Arc::new(Fake::Class(None)), 1);

        assert!(filter.is_handled(&frame, &info, |_| panic!("cached")));
    }

    #[test]
    fn named_handler_matches_subclasses_in_caller() {
        let base: ObjectRef = Arc::new(Fake::Class(None));
        let derived: ObjectRef = Arc::new(Fake::Class(Some(base.clone())));

        let filter = ExceptionFilter::default();
        filter.handlers.store("/src/main.py".into(), vec![region(8, 12, &["Base"])]);
        filter.handlers.store("/src/util.py".into(), vec![]);

        let caller = FakeFrame::new("<module>", "/src/main.py", 9, None);
        caller.bind("Base", base.clone());
        let callee: FrameRef = FakeFrame::new("func", "/src/util.py", 2, Some(caller));

        assert!(filter.is_handled(&callee, &exception(derived, 1), |_| false));
        assert!(!filter.is_handled(&callee, &exception(Arc::new(Fake::Class(None)), 1), |_| false));
    }

    #[test]
    fn missing_handlers_are_requested() {
        let filter = Arc::new(ExceptionFilter::default());
        let frame: FrameRef = FakeFrame::new("<module>", "/src/main.py", 3, None);
        let info = exception(Arc::new(Fake::Class(None)), 1);

        let replier = filter.clone();
        let handled = filter.is_handled(&frame, &info, move |filename| {
            let replier = replier.clone();
            let filename = filename.to_owned();
            std::thread::spawn(move || {
                replier.handlers.store(filename, vec![region(1, 10, &["*"])]);
            });
            true
        });

        assert!(handled);
    }

    #[test]
    fn unsent_request_means_unhandled() {
        let cache = HandlerCache::default();
        assert!(cache.fetch("/src/main.py", |_| false).is_none());
    }

    #[test]
    fn cancel_wakes_requester() {
        let cache = Arc::new(HandlerCache::default());

        let canceller = cache.clone();
        let regions = cache.fetch("/src/main.py", move |_| {
            std::thread::spawn(move || canceller.cancel());
            true
        });

        assert!(regions.is_none());
    }
}
