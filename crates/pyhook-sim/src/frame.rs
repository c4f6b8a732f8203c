use std::any::Any;
use std::sync::atomic::{AtomicI32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};

use indexmap::IndexMap;
use pyhook_debugger::hook::TraceHook;
use pyhook_debugger::runtime::{
    CodeInfo, EvalError, Expression, Frame, FrameRef, ObjectRef,
};

use crate::ast::{CodeBody, Expr};
use crate::builtins;
use crate::interp::{self, Raised};
use crate::parser::{parse_expression, parse_statements};
use crate::runtime::SimRuntime;
use crate::trace;
use crate::value::{Module, Namespace, Value, lock};

static NEXT_UID: AtomicU64 = AtomicU64::new(1);

/// Execution frame of module, function or class body code.
pub struct SimFrame {
    uid: u64,
    this: Weak<SimFrame>,
    code: CodeInfo,
    body: Arc<CodeBody>,
    module: Arc<Module>,
    locals: Option<Namespace>,
    line: AtomicI32,
    back: Option<Arc<SimFrame>>,
    jump_targets: Mutex<Option<Vec<i32>>>,
    jump: Mutex<Option<i32>>,
    handling: Mutex<Vec<Value>>,
    local_trace: Mutex<Option<Arc<dyn TraceHook>>>,
}

impl SimFrame {
    /// Creates a frame executing the given code.
    ///
    /// Without locals, the frame executes at module level.
    pub fn new(
        body: &Arc<CodeBody>,
        module: Arc<Module>,
        locals: Option<IndexMap<String, Value>>,
        back: Option<Arc<SimFrame>>,
    ) -> Arc<Self> {
        let code = CodeInfo {
            name: body.name.clone(),
            filename: module.filename.clone(),
            first_line: body.first_line,
            last_line: body.last_line,
            arg_count: i32::try_from(body.params.len()).unwrap_or(i32::MAX),
            var_names: body.var_names.clone(),
        };

        Arc::new_cyclic(|this| Self {
            uid: NEXT_UID.fetch_add(1, Ordering::Relaxed),
            this: this.clone(),
            code,
            body: body.clone(),
            module,
            locals: locals.map(Mutex::new),
            line: AtomicI32::new(body.first_line),
            back,
            jump_targets: Mutex::new(None),
            jump: Mutex::new(None),
            handling: Mutex::new(Vec::new()),
            local_trace: Mutex::new(None),
        })
    }

    /// Returns the unique identifier of this frame.
    pub fn uid(&self) -> u64 {
        self.uid
    }

    /// Returns the module whose globals this frame uses.
    pub fn module(&self) -> &Arc<Module> {
        &self.module
    }

    /// Returns the runtime executing this frame.
    pub fn runtime(&self) -> &Arc<SimRuntime> {
        &self.module.runtime
    }

    /// Returns the calling frame.
    pub fn caller(&self) -> Option<&Arc<SimFrame>> {
        self.back.as_ref()
    }

    pub(crate) fn this(&self) -> Option<Arc<SimFrame>> {
        self.this.upgrade()
    }

    pub(crate) fn set_current_line(&self, line: i32) {
        self.line.store(line, Ordering::SeqCst);
    }

    /// Looks a name up through locals, globals and builtins.
    pub fn load(&self, name: &str) -> Option<Value> {
        if let Some(locals) = &self.locals {
            if !self.is_global(name) {
                if let Some(value) = lock(locals).get(name) {
                    return Some(value.clone());
                }
            }
        }

        if let Some(value) = lock(&self.module.globals).get(name) {
            return Some(value.clone());
        }

        builtins::lookup(name)
    }

    /// Binds a name in the scope of this frame.
    pub fn store(&self, name: &str, value: Value) {
        match &self.locals {
            Some(locals) if !self.is_global(name) => {
                lock(locals).insert(name.to_owned(), value);
            }
            _ => {
                lock(&self.module.globals).insert(name.to_owned(), value);
            }
        }
    }

    fn is_global(&self, name: &str) -> bool {
        self.body.globals.iter().any(|n| n == name)
    }

    /// Takes the local variables of the frame.
    pub(crate) fn take_locals(&self) -> IndexMap<String, Value> {
        self.locals
            .as_ref()
            .map(|locals| std::mem::take(&mut *lock(locals)))
            .unwrap_or_default()
    }

    pub(crate) fn local_trace(&self) -> Option<Arc<dyn TraceHook>> {
        lock(&self.local_trace).clone()
    }

    pub(crate) fn set_local_trace(&self, hook: Option<Arc<dyn TraceHook>>) {
        *lock(&self.local_trace) = hook;
    }

    /// Allows jumping to the given lines until [SimFrame::close_jumps].
    pub(crate) fn open_jumps(&self, lines: Vec<i32>) {
        *lock(&self.jump_targets) = Some(lines);
        *lock(&self.jump) = None;
    }

    /// Returns the line jumped to since [SimFrame::open_jumps], if any.
    pub(crate) fn close_jumps(&self) -> Option<i32> {
        *lock(&self.jump_targets) = None;
        lock(&self.jump).take()
    }

    pub(crate) fn push_handling(&self, exception: Value) {
        lock(&self.handling).push(exception);
    }

    pub(crate) fn pop_handling(&self) {
        lock(&self.handling).pop();
    }

    pub(crate) fn handling(&self) -> Option<Value> {
        lock(&self.handling).last().cloned()
    }

    fn execute_statements(this: &Arc<SimFrame>, text: &str) -> Result<ObjectRef, EvalError> {
        let body = parse_statements(text).map_err(|e| EvalError::new(e.to_string()))?;
        let line = this.line();

        let result = trace::suspend(|| interp::exec_statements(this, &body));
        this.set_current_line(line);

        result
            .map(|_| Value::None.into_object())
            .map_err(Raised::into_eval_error)
    }
}

impl Frame for SimFrame {
    fn code(&self) -> &CodeInfo {
        &self.code
    }

    fn line(&self) -> i32 {
        self.line.load(Ordering::SeqCst)
    }

    fn set_line(&self, line: i32) -> Result<(), EvalError> {
        let targets = lock(&self.jump_targets);

        let Some(targets) = targets.as_ref() else {
            return Err(EvalError::new("can only jump from a 'line' trace event"));
        };

        if !targets.contains(&line) {
            return Err(EvalError::new(format!(
                "line {line} is not a statement of the current block"
            )));
        }

        self.set_current_line(line);
        *lock(&self.jump) = Some(line);

        Ok(())
    }

    fn back(&self) -> Option<FrameRef> {
        self.back.clone().map(|frame| frame as FrameRef)
    }

    fn is_module_level(&self) -> bool {
        self.locals.is_none()
    }

    fn variables(&self) -> Vec<(String, Option<ObjectRef>)> {
        match &self.locals {
            None => lock(&self.module.globals)
                .iter()
                .map(|(name, value)| (name.clone(), Some(value.clone().into_object())))
                .collect(),
            Some(locals) => {
                let locals = lock(locals);

                self.code
                    .var_names
                    .iter()
                    .map(|name| {
                        let value = locals.get(name).cloned().map(Value::into_object);
                        (name.clone(), value)
                    })
                    .collect()
            }
        }
    }

    fn execute(&self, text: &str) -> Result<ObjectRef, EvalError> {
        let this = self
            .this()
            .ok_or_else(|| EvalError::new("frame is gone"))?;

        match parse_expression(text) {
            Ok(expr) => trace::suspend(|| interp::eval(&this, &expr))
                .map(Value::into_object)
                .map_err(Raised::into_eval_error),
            Err(_) => Self::execute_statements(&this, text),
        }
    }

    fn compile(&self, text: &str) -> Result<Arc<dyn Expression>, EvalError> {
        let expr = parse_expression(text).map_err(|e| EvalError::new(e.to_string()))?;
        Ok(Arc::new(SimExpression { expr }))
    }

    fn lookup(&self, name: &str) -> Option<ObjectRef> {
        self.load(name).map(Value::into_object)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Expression compiled for later evaluation.
struct SimExpression {
    expr: Expr,
}

impl Expression for SimExpression {
    fn eval(&self, frame: &dyn Frame) -> Result<ObjectRef, EvalError> {
        let this = frame
            .as_any()
            .downcast_ref::<SimFrame>()
            .and_then(SimFrame::this)
            .ok_or_else(|| EvalError::new("expression evaluated within a foreign frame"))?;

        trace::suspend(|| interp::eval(&this, &self.expr))
            .map(Value::into_object)
            .map_err(Raised::into_eval_error)
    }
}
