use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, PoisonError};

use indexmap::IndexMap;

use crate::module::Module;
use crate::runtime::{Expression, Frame, ObjectRef};

/// Breakpoint requested by the controller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BreakpointRequest {
    /// Breakpoint identifier.
    pub id: i32,
    /// Line number.
    pub line: i32,
    /// Source file, as sent by the controller.
    pub filename: String,
    /// Condition source, empty if unconditional.
    pub condition: String,
    /// Break when the condition value changes instead of when it holds.
    pub break_when_changed: bool,
}

/// Condition attached to a bound breakpoint.
pub struct Condition {
    source: String,
    break_when_changed: bool,
    compiled: Mutex<Option<Arc<dyn Expression>>>,
    last_value: Mutex<Option<ObjectRef>>,
}

impl Condition {
    /// Creates a condition, `None` if the source is empty.
    pub fn new(source: &str, break_when_changed: bool) -> Option<Arc<Self>> {
        if source.is_empty() {
            return None;
        }

        Some(Arc::new(Self {
            source: source.to_owned(),
            break_when_changed,
            compiled: Mutex::new(None),
            last_value: Mutex::new(None),
        }))
    }

    /// Returns the source of this condition.
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Evaluates the condition within the given frame and returns whether the
    /// breakpoint fires.
    ///
    /// Any evaluation error fires the breakpoint. With change detection, the
    /// first evaluation always fires.
    pub fn should_break(&self, frame: &dyn Frame) -> bool {
        let compiled = {
            let mut compiled = self
                .compiled
                .lock()
                .unwrap_or_else(PoisonError::into_inner);

            match compiled.as_ref() {
                Some(expr) => expr.clone(),
                None => match frame.compile(&self.source) {
                    Ok(expr) => compiled.insert(expr).clone(),
                    Err(e) => {
                        tracing::debug!(condition = self.source, error = %e, "condition does not compile");
                        return true;
                    }
                },
            }
        };

        let value = match compiled.eval(frame) {
            Ok(value) => value,
            Err(e) => {
                tracing::debug!(condition = self.source, error = %e, "condition raised");
                return true;
            }
        };

        if self.break_when_changed {
            let mut last_value = self
                .last_value
                .lock()
                .unwrap_or_else(PoisonError::into_inner);

            let changed = match last_value.as_ref() {
                Some(last) => !last.equals(&*value).unwrap_or(false),
                None => true,
            };

            *last_value = Some(value);
            changed
        } else {
            value.is_truthy().unwrap_or(true)
        }
    }
}

type LineBreakpoints = IndexMap<(String, i32), Option<Arc<Condition>>>;

/// Breakpoints of a debugging session.
///
/// Bound breakpoints are indexed by line first, then by the code filename of
/// their module and their identifier. Breakpoints whose file is not loaded yet
/// are pending.
#[derive(Default)]
pub struct BreakpointTable {
    lines: BTreeMap<i32, LineBreakpoints>,
    pending: Vec<BreakpointRequest>,
}

impl BreakpointTable {
    /// Binds the given breakpoint to the first matching module, or records it
    /// as pending.
    ///
    /// Returns whether the breakpoint was bound.
    pub fn set(&mut self, modules: &[Module], request: BreakpointRequest) -> bool {
        if modules.iter().any(|m| self.try_bind(m, &request)) {
            return true;
        }

        self.pending.push(request);
        false
    }

    /// Binds the pending breakpoints of a newly loaded module.
    ///
    /// Returns the identifiers of the breakpoints bound.
    pub fn bind_pending(&mut self, module: &Module) -> Vec<i32> {
        let pending = std::mem::take(&mut self.pending);
        let mut bound = Vec::new();

        for request in pending {
            if self.try_bind(module, &request) {
                bound.push(request.id);
            } else {
                self.pending.push(request);
            }
        }

        bound
    }

    fn try_bind(&mut self, module: &Module, request: &BreakpointRequest) -> bool {
        if !module.matches(&request.filename) {
            return false;
        }

        self.lines.entry(request.line).or_default().insert(
            (module.code_filename.clone(), request.id),
            Condition::new(&request.condition, request.break_when_changed),
        );

        true
    }

    /// Replaces the condition of the breakpoint with the given identifier.
    pub fn set_condition(&mut self, id: i32, condition: &str, break_when_changed: bool) {
        for line in self.lines.values_mut() {
            if let Some((_, slot)) = line.iter_mut().find(|((_, bp_id), _)| *bp_id == id) {
                *slot = Condition::new(condition, break_when_changed);
            }
        }

        for request in self.pending.iter_mut().filter(|r| r.id == id) {
            request.condition = condition.to_owned();
            request.break_when_changed = break_when_changed;
        }
    }

    /// Removes the breakpoint with the given line and identifier.
    pub fn remove(&mut self, line: i32, id: i32) {
        if let Some(bps) = self.lines.get_mut(&line) {
            bps.retain(|(_, bp_id), _| *bp_id != id);

            if bps.is_empty() {
                self.lines.remove(&line);
            }
        }

        self.pending.retain(|r| !(r.line == line && r.id == id));
    }

    /// Returns the first breakpoint bound at the given line of the given code
    /// filename, with its condition.
    pub fn find(&self, line: i32, code_filename: &str) -> Option<(i32, Option<Arc<Condition>>)> {
        self.lines
            .get(&line)?
            .iter()
            .find(|((filename, _), _)| filename == code_filename)
            .map(|((_, id), condition)| (*id, condition.clone()))
    }

    /// Returns whether no breakpoint is bound.
    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    /// Returns whether the breakpoint with the given identifier is bound.
    pub fn is_bound(&self, id: i32) -> bool {
        self.lines
            .values()
            .any(|bps| bps.keys().any(|(_, bp_id)| *bp_id == id))
    }

    /// Returns whether the breakpoint with the given identifier is pending.
    pub fn is_pending(&self, id: i32) -> bool {
        self.pending.iter().any(|r| r.id == id)
    }

    /// Removes every breakpoint, bound or pending.
    pub fn clear(&mut self) {
        self.lines.clear();
        self.pending.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::{BreakpointRequest, BreakpointTable, Condition};
    use crate::module::ModuleRegistry;
    use crate::runtime::tests::FakeFrame;

    fn request(id: i32, line: i32, filename: &str, condition: &str) -> BreakpointRequest {
        BreakpointRequest {
            id,
            line,
            filename: filename.into(),
            condition: condition.into(),
            break_when_changed: false,
        }
    }

    #[test]
    fn bound_or_pending_never_both() {
        let registry = ModuleRegistry::default();
        let mut table = BreakpointTable::default();

        assert!(!table.set(&registry.all(), request(7, 10, "/src/main.py", "")));
        assert!(table.is_pending(7));
        assert!(!table.is_bound(7));

        let module = registry.register("/src/main.py");
        assert_eq!(table.bind_pending(&module), vec![7]);
        assert!(!table.is_pending(7));
        assert!(table.is_bound(7));

        assert!(table.set(&registry.all(), request(8, 11, "/SRC/MAIN.py", "")));
        assert!(table.is_bound(8));
        assert!(!table.is_pending(8));
    }

    #[test]
    fn find_filters_by_code_filename() {
        let registry = ModuleRegistry::default();
        let mut table = BreakpointTable::default();

        registry.register("/src/main.py");
        registry.register("/src/util.py");

        table.set(&registry.all(), request(1, 4, "/src/util.py", ""));

        assert!(table.find(4, "/src/main.py").is_none());
        assert!(table.find(5, "/src/util.py").is_none());
        assert!(matches!(table.find(4, "/src/util.py"), Some((1, None))));

        table.remove(4, 1);
        assert!(table.is_empty());
    }

    #[test]
    fn condition_replacement() {
        let registry = ModuleRegistry::default();
        let mut table = BreakpointTable::default();
        registry.register("/src/main.py");

        table.set(&registry.all(), request(1, 4, "/src/main.py", ""));
        table.set_condition(1, "x", true);

        let (_, condition) = table.find(4, "/src/main.py").unwrap();
        assert_eq!(condition.unwrap().source(), "x");

        table.set_condition(1, "", false);
        assert!(matches!(table.find(4, "/src/main.py"), Some((1, None))));
    }

    #[test]
    fn condition_truthiness_and_errors() {
        let frame = FakeFrame::with_vars(&[("x", 0)]);

        assert!(!Condition::new("x", false).unwrap().should_break(&*frame));
        assert!(Condition::new("missing", false).unwrap().should_break(&*frame));
        assert!(Condition::new("(", false).unwrap().should_break(&*frame));
        assert!(Condition::new("", false).is_none());
    }

    #[test]
    fn change_detection_fires_on_first_hit_then_on_change() {
        let frame = FakeFrame::with_vars(&[("x", 0)]);
        let condition = Condition::new("x", true).unwrap();

        assert!(condition.should_break(&*frame));
        assert!(!condition.should_break(&*frame));

        frame.set_var("x", 2);
        assert!(condition.should_break(&*frame));
        assert!(!condition.should_break(&*frame));
    }
}
