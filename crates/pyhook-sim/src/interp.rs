use std::cmp::Ordering;
use std::sync::{Arc, Mutex};

use indexmap::IndexMap;
use pyhook_debugger::runtime::{EvalError, ExceptionInfo, Frame, TracebackEntry};

use crate::ast::{BinOp, CmpOp, CodeBody, Expr, Handler, Stmt, StmtKind, UnaryOp};
use crate::builtins::{self, ExcKind};
use crate::frame::SimFrame;
use crate::runtime::SimRuntime;
use crate::trace::{self, FrameGuard};
use crate::value::{
    BoundMethod, Class, Function, Generator, Instance, Value, address, as_float, as_int,
    format_float, is_same, lock, quote_bytes, quote_str, values_equal,
};

/// Text reported when the string form of an exception cannot be computed.
const STR_FAILED: &str = "An exception was thrown";

/// Result of executing user code.
pub type Exec<T> = Result<T, Raised>;

/// Control flow out of a block.
pub enum Ctrl {
    Normal,
    Return(Value),
    Break,
    Continue,
}

/// Exception propagating through frames.
pub struct Raised {
    value: Value,
    class: Arc<Class>,
    traceback: Vec<TracebackEntry>,
    reported_in: Option<u64>,
}

impl Raised {
    /// Starts raising an exception instance.
    pub fn new(instance: Arc<Instance>) -> Self {
        Self {
            class: instance.class.clone(),
            value: Value::Instance(instance),
            traceback: Vec::new(),
            reported_in: None,
        }
    }

    /// Returns the exception instance.
    pub fn value(&self) -> &Value {
        &self.value
    }

    /// Returns whether the exception is an instance of the given builtin class.
    pub fn is(&self, kind: ExcKind) -> bool {
        self.class.is_subclass_of(&builtins::class(kind))
    }

    /// Adds the given frame to the traceback, unless the exception was
    /// already recorded for it.
    ///
    /// Returns whether the frame was added.
    pub fn record(&mut self, frame: &SimFrame) -> bool {
        if self.reported_in == Some(frame.uid()) {
            return false;
        }

        let code = frame.code();

        self.traceback.insert(
            0,
            TracebackEntry {
                filename: code.filename.clone(),
                line: frame.line(),
                name: code.name.clone(),
            },
        );
        self.reported_in = Some(frame.uid());

        true
    }

    /// Returns the exception as seen by the debugger.
    pub fn info(&self) -> ExceptionInfo {
        ExceptionInfo {
            exc_type: Value::Class(self.class.clone()).into_object(),
            value: self.value.clone().into_object(),
            qualified_name: self.class.qualified_name(),
            traceback: self.traceback.clone(),
        }
    }

    /// Converts the exception into an evaluation error, holding its string
    /// form.
    pub fn into_eval_error(self) -> EvalError {
        EvalError::new(str(&self.value).unwrap_or_else(|_| STR_FAILED.to_owned()))
    }
}

/// Creates a raised `TypeError`.
pub fn type_error(message: impl Into<String>) -> Raised {
    builtins::error(ExcKind::TypeError, message)
}

/// Executes the code of a frame, reporting its call and return.
pub fn run_frame(frame: &Arc<SimFrame>, body: &Arc<CodeBody>) -> Exec<Value> {
    let _guard = FrameGuard::enter(frame)?;

    trace::call(frame);

    let result = exec_block(frame, &body.body).map(|ctrl| match ctrl {
        Ctrl::Return(value) => value,
        Ctrl::Normal | Ctrl::Break | Ctrl::Continue => Value::None,
    });

    trace::ret(frame);

    result
}

/// Executes a block of statements, reporting each line.
pub fn exec_block(frame: &Arc<SimFrame>, body: &[Stmt]) -> Exec<Ctrl> {
    let mut index = 0;

    while let Some(stmt) = body.get(index) {
        frame.set_current_line(stmt.line);

        let jump = trace::line(frame, Some(body))
            .and_then(|line| body.iter().position(|s| s.line == line));

        let stmt = match jump {
            Some(target) => {
                index = target;
                &body[target]
            }
            None => stmt,
        };

        match exec_stmt(frame, stmt) {
            Ok(Ctrl::Normal) => index += 1,
            Ok(ctrl) => return Ok(ctrl),
            Err(mut raised) => {
                trace::exception(frame, &mut raised);
                return Err(raised);
            }
        }
    }

    Ok(Ctrl::Normal)
}

/// Executes some statements on behalf of the debugger, without reporting
/// lines.
pub fn exec_statements(frame: &Arc<SimFrame>, body: &[Stmt]) -> Exec<()> {
    for stmt in body {
        match exec_stmt(frame, stmt)? {
            Ctrl::Normal => (),
            Ctrl::Return(_) | Ctrl::Break | Ctrl::Continue => break,
        }
    }

    Ok(())
}

fn exec_stmt(frame: &Arc<SimFrame>, stmt: &Stmt) -> Exec<Ctrl> {
    match &stmt.kind {
        StmtKind::Expr(expr) => {
            eval(frame, expr)?;
        }
        StmtKind::Assign { target, value } => {
            let value = eval(frame, value)?;
            assign(frame, target, value)?;
        }
        StmtKind::AugAssign { target, op, value } => {
            let current = eval(frame, target)?;
            let operand = eval(frame, value)?;
            assign(frame, target, binary(*op, &current, &operand)?)?;
        }
        StmtKind::If { branches, orelse } => {
            for (test, body) in branches {
                if truthy(&eval(frame, test)?) {
                    return exec_block(frame, body);
                }
            }
            return exec_block(frame, orelse);
        }
        StmtKind::While { test, body } => return exec_while(frame, stmt.line, test, body),
        StmtKind::For { target, iter, body } => {
            return exec_for(frame, stmt.line, target, iter, body);
        }
        StmtKind::Def(def) => {
            let function = Function {
                def: def.clone(),
                module: frame.module().clone(),
            };
            frame.store(&def.name, Value::Function(Arc::new(function)));
        }
        StmtKind::Class { base, body } => {
            let class = define_class(frame, base.as_ref(), body)?;
            frame.store(&body.name, Value::Class(class));
        }
        StmtKind::Return(value) => {
            let value = match value {
                Some(expr) => eval(frame, expr)?,
                None => Value::None,
            };
            return Ok(Ctrl::Return(value));
        }
        StmtKind::Try {
            body,
            handlers,
            finally,
        } => return exec_try(frame, body, handlers, finally),
        StmtKind::Raise(value) => return Err(raise(frame, value.as_ref())),
        StmtKind::Pass | StmtKind::Global(_) => (),
        StmtKind::Break => return Ok(Ctrl::Break),
        StmtKind::Continue => return Ok(Ctrl::Continue),
        StmtKind::Import(name) => {
            let module = frame.runtime().import(name)?;
            frame.store(name, Value::Module(module));
        }
    }

    Ok(Ctrl::Normal)
}

fn header_line(frame: &Arc<SimFrame>, line: i32) {
    frame.set_current_line(line);
    trace::line(frame, None);
}

fn exec_while(frame: &Arc<SimFrame>, line: i32, test: &Expr, body: &[Stmt]) -> Exec<Ctrl> {
    let mut first = true;

    loop {
        if !first {
            header_line(frame, line);
        }
        first = false;

        if !truthy(&eval(frame, test)?) {
            break;
        }

        match exec_block(frame, body)? {
            Ctrl::Break => break,
            Ctrl::Return(value) => return Ok(Ctrl::Return(value)),
            Ctrl::Normal | Ctrl::Continue => (),
        }
    }

    Ok(Ctrl::Normal)
}

fn exec_for(
    frame: &Arc<SimFrame>,
    line: i32,
    target: &Expr,
    iter: &Expr,
    body: &[Stmt],
) -> Exec<Ctrl> {
    let iterable = eval(frame, iter)?;
    let mut items = iterate(&iterable)?;
    let mut first = true;

    loop {
        if !first {
            header_line(frame, line);
        }
        first = false;

        let Some(item) = items.next() else {
            break;
        };

        assign(frame, target, item)?;

        match exec_block(frame, body)? {
            Ctrl::Break => break,
            Ctrl::Return(value) => return Ok(Ctrl::Return(value)),
            Ctrl::Normal | Ctrl::Continue => (),
        }
    }

    Ok(Ctrl::Normal)
}

fn exec_try(
    frame: &Arc<SimFrame>,
    body: &[Stmt],
    handlers: &[Handler],
    finally: &[Stmt],
) -> Exec<Ctrl> {
    let result = match exec_block(frame, body) {
        Err(raised) => handle(frame, raised, handlers),
        ok => ok,
    };

    if finally.is_empty() {
        return result;
    }

    match exec_block(frame, finally)? {
        Ctrl::Normal => result,
        ctrl => Ok(ctrl),
    }
}

fn handle(frame: &Arc<SimFrame>, raised: Raised, handlers: &[Handler]) -> Exec<Ctrl> {
    for handler in handlers {
        let caught = match &handler.class {
            None => true,
            Some(expr) => exception_matches(&raised, &eval(frame, expr)?)?,
        };

        if !caught {
            continue;
        }

        header_line(frame, handler.line);

        if let Some(name) = &handler.name {
            frame.store(name, raised.value.clone());
        }

        frame.push_handling(raised.value.clone());
        let result = exec_block(frame, &handler.body);
        frame.pop_handling();

        return result;
    }

    Err(raised)
}

fn exception_matches(raised: &Raised, class: &Value) -> Exec<bool> {
    match class {
        Value::Class(class) => Ok(raised.class.is_subclass_of(class)),
        Value::Tuple(classes) => {
            for class in classes.iter() {
                if exception_matches(raised, class)? {
                    return Ok(true);
                }
            }
            Ok(false)
        }
        _ => Err(type_error(
            "catching classes that do not inherit from BaseException is not allowed",
        )),
    }
}

fn raise(frame: &Arc<SimFrame>, value: Option<&Expr>) -> Raised {
    let Some(expr) = value else {
        return match frame.handling() {
            Some(Value::Instance(instance)) => Raised::new(instance),
            _ => builtins::error(ExcKind::RuntimeError, "No active exception to reraise"),
        };
    };

    let value = match eval(frame, expr) {
        Ok(value) => value,
        Err(raised) => return raised,
    };

    let base_exception = builtins::class(ExcKind::BaseException);

    match value {
        Value::Class(class) if class.is_subclass_of(&base_exception) => {
            match instantiate(&class, Vec::new()) {
                Ok(Value::Instance(instance)) => Raised::new(instance),
                Ok(_) => type_error("exceptions must derive from BaseException"),
                Err(raised) => raised,
            }
        }
        Value::Instance(instance) if instance.class.is_subclass_of(&base_exception) => {
            Raised::new(instance)
        }
        _ => type_error("exceptions must derive from BaseException"),
    }
}

fn define_class(frame: &Arc<SimFrame>, base: Option<&Expr>, body: &Arc<CodeBody>) -> Exec<Arc<Class>> {
    let base = match base {
        None => None,
        Some(expr) => match eval(frame, expr)? {
            Value::Class(class) => Some(class),
            other => {
                return Err(type_error(format!(
                    "bases must be types, not '{}'",
                    other.type_name()
                )));
            }
        },
    };

    let class_frame = SimFrame::new(
        body,
        frame.module().clone(),
        Some(IndexMap::new()),
        trace::current_frame(),
    );

    run_frame(&class_frame, body)?;

    Ok(Class::with_attrs(
        &body.name,
        &frame.module().name,
        base,
        class_frame.take_locals(),
    ))
}

fn assign(frame: &Arc<SimFrame>, target: &Expr, value: Value) -> Exec<()> {
    match target {
        Expr::Name(name) => frame.store(name, value),
        Expr::Attr(base, name) => set_attr(&eval(frame, base)?, name, value)?,
        Expr::Index(base, index) => {
            let base = eval(frame, base)?;
            let index = eval(frame, index)?;
            set_item(&base, index, value)?;
        }
        Expr::Tuple(targets) | Expr::List(targets) => {
            let items: Vec<Value> = iterate(&value)?.collect();

            if items.len() < targets.len() {
                return Err(builtins::error(
                    ExcKind::ValueError,
                    format!(
                        "not enough values to unpack (expected {}, got {})",
                        targets.len(),
                        items.len()
                    ),
                ));
            }

            if items.len() > targets.len() {
                return Err(builtins::error(
                    ExcKind::ValueError,
                    format!("too many values to unpack (expected {})", targets.len()),
                ));
            }

            for (target, item) in targets.iter().zip(items) {
                assign(frame, target, item)?;
            }
        }
        _ => return Err(builtins::error(ExcKind::SyntaxError, "cannot assign to expression")),
    }

    Ok(())
}

/// Evaluates an expression within the scope of a frame.
pub fn eval(frame: &Arc<SimFrame>, expr: &Expr) -> Exec<Value> {
    let value = match expr {
        Expr::None => Value::None,
        Expr::Bool(value) => Value::Bool(*value),
        Expr::Int(value) => Value::Int(*value),
        Expr::Float(value) => Value::Float(*value),
        Expr::Str(text) => Value::Str(text.clone()),
        Expr::Bytes(bytes) => Value::Bytes(bytes.clone()),
        Expr::Name(name) => frame.load(name).ok_or_else(|| {
            builtins::error(ExcKind::NameError, format!("name '{name}' is not defined"))
        })?,
        Expr::Attr(base, name) => get_attr(&eval(frame, base)?, name)?,
        Expr::Index(base, index) => {
            let base = eval(frame, base)?;
            let index = eval(frame, index)?;
            get_item(&base, &index)?
        }
        Expr::Call(callee, args) => {
            let callee = eval(frame, callee)?;
            let args = eval_all(frame, args)?;
            call(frame.runtime(), &callee, args)?
        }
        Expr::List(items) => Value::list(eval_all(frame, items)?),
        Expr::Tuple(items) => Value::Tuple(eval_all(frame, items)?.into()),
        Expr::Dict(items) => {
            let mut entries = Vec::with_capacity(items.len());

            for (key, value) in items {
                let key = eval(frame, key)?;
                let value = eval(frame, value)?;
                dict_insert(&mut entries, key, value)?;
            }

            Value::Dict(Arc::new(Mutex::new(entries)))
        }
        Expr::Unary(op, operand) => unary(*op, &eval(frame, operand)?)?,
        Expr::Binary(op, left, right) => {
            let left = eval(frame, left)?;
            let right = eval(frame, right)?;
            binary(*op, &left, &right)?
        }
        Expr::Compare(left, ops) => {
            let mut left = eval(frame, left)?;

            for (op, right) in ops {
                let right = eval(frame, right)?;

                if !compare(*op, &left, &right)? {
                    return Ok(Value::Bool(false));
                }

                left = right;
            }

            Value::Bool(true)
        }
        Expr::And(left, right) => {
            let left = eval(frame, left)?;
            if truthy(&left) {
                eval(frame, right)?
            } else {
                left
            }
        }
        Expr::Or(left, right) => {
            let left = eval(frame, left)?;
            if truthy(&left) {
                left
            } else {
                eval(frame, right)?
            }
        }
    };

    Ok(value)
}

fn eval_all(frame: &Arc<SimFrame>, exprs: &[Expr]) -> Exec<Vec<Value>> {
    exprs.iter().map(|expr| eval(frame, expr)).collect()
}

/// Calls a callable value.
pub fn call(runtime: &Arc<SimRuntime>, callee: &Value, mut args: Vec<Value>) -> Exec<Value> {
    match callee {
        Value::Function(function) => call_function(function, args),
        Value::BoundMethod(method) => {
            args.insert(0, method.receiver.clone());
            call_function(&method.function, args)
        }
        Value::Builtin(builtin) => {
            if let Some(receiver) = &builtin.receiver {
                args.insert(0, receiver.clone());
            }
            (builtin.func)(runtime, args)
        }
        Value::Class(class) => instantiate(class, args),
        other => Err(type_error(format!(
            "'{}' object is not callable",
            other.type_name()
        ))),
    }
}

/// Calls a user-defined function, within a new frame.
pub fn call_function(function: &Arc<Function>, args: Vec<Value>) -> Exec<Value> {
    let def = &function.def;

    if args.len() != def.params.len() {
        return Err(type_error(format!(
            "{}() takes {} positional argument{} but {} {} given",
            def.name,
            def.params.len(),
            if def.params.len() == 1 { "" } else { "s" },
            args.len(),
            if args.len() == 1 { "was" } else { "were" },
        )));
    }

    let locals = def.params.iter().cloned().zip(args).collect();

    let frame = SimFrame::new(
        def,
        function.module.clone(),
        Some(locals),
        trace::current_frame(),
    );

    run_frame(&frame, def)
}

fn instantiate(class: &Arc<Class>, args: Vec<Value>) -> Exec<Value> {
    let is_exception = class.is_subclass_of(&builtins::class(ExcKind::BaseException));

    let instance = if is_exception {
        builtins::exception(class.clone(), args.clone())
    } else {
        Arc::new(Instance {
            class: class.clone(),
            attrs: Mutex::new(IndexMap::new()),
        })
    };

    let value = Value::Instance(instance);

    match class.lookup("__init__") {
        Some(Value::Function(init)) => {
            let mut init_args = vec![value.clone()];
            init_args.extend(args);
            call_function(&init, init_args)?;
        }
        _ if !args.is_empty() && !is_exception => {
            return Err(type_error(format!("{}() takes no arguments", class.name)));
        }
        _ => (),
    }

    Ok(value)
}

/// Returns an attribute of a value.
pub fn get_attr(value: &Value, name: &str) -> Exec<Value> {
    let found = match value {
        Value::Instance(instance) => {
            let own = lock(&instance.attrs).get(name).cloned();

            if name == "__class__" {
                Some(Value::Class(instance.class.clone()))
            } else if own.is_some() {
                own
            } else {
                instance.class.lookup(name).map(|attr| match attr {
                    Value::Function(function) => Value::BoundMethod(Arc::new(BoundMethod {
                        receiver: value.clone(),
                        function,
                    })),
                    other => other,
                })
            }
        }
        Value::Class(class) if name == "__name__" => Some(Value::text(class.name.as_str())),
        Value::Class(class) => class.lookup(name),
        Value::Module(module) if name == "__name__" => Some(Value::text(module.name.as_str())),
        Value::Module(module) => lock(&module.globals).get(name).cloned(),
        other => builtins::method(other, name),
    };

    found.ok_or_else(|| {
        let message = match value {
            Value::Module(module) => {
                format!("module '{}' has no attribute '{name}'", module.name)
            }
            Value::Class(class) => {
                format!("type object '{}' has no attribute '{name}'", class.name)
            }
            other => format!("'{}' object has no attribute '{name}'", other.type_name()),
        };
        builtins::error(ExcKind::AttributeError, message)
    })
}

fn set_attr(target: &Value, name: &str, value: Value) -> Exec<()> {
    let attrs = match target {
        Value::Instance(instance) => &instance.attrs,
        Value::Class(class) => &class.attrs,
        Value::Module(module) => &module.globals,
        other => {
            return Err(builtins::error(
                ExcKind::AttributeError,
                format!("'{}' object has no attribute '{name}'", other.type_name()),
            ));
        }
    };

    lock(attrs).insert(name.to_owned(), value);
    Ok(())
}

fn seq_index(index: &Value, len: usize, kind: &str) -> Exec<usize> {
    let Some(index) = as_int(index) else {
        return Err(type_error(format!(
            "{kind} indices must be integers, not {}",
            index.type_name()
        )));
    };

    let len_i = i64::try_from(len).unwrap_or(i64::MAX);
    let index = if index < 0 { index + len_i } else { index };

    usize::try_from(index)
        .ok()
        .filter(|index| *index < len)
        .ok_or_else(|| builtins::error(ExcKind::IndexError, format!("{kind} index out of range")))
}

fn check_hashable(key: &Value) -> Exec<()> {
    match key {
        Value::List(_) | Value::Dict(_) => Err(type_error(format!(
            "unhashable type: '{}'",
            key.type_name()
        ))),
        _ => Ok(()),
    }
}

fn dict_insert(entries: &mut Vec<(Value, Value)>, key: Value, value: Value) -> Exec<()> {
    check_hashable(&key)?;

    match entries.iter_mut().find(|(k, _)| values_equal(k, &key)) {
        Some((_, slot)) => *slot = value,
        None => entries.push((key, value)),
    }

    Ok(())
}

/// Returns the item of a container at the given index or key.
pub fn get_item(value: &Value, index: &Value) -> Exec<Value> {
    match value {
        Value::List(list) => {
            let list = lock(list);
            let index = seq_index(index, list.len(), "list")?;
            Ok(list[index].clone())
        }
        Value::Tuple(items) => {
            let index = seq_index(index, items.len(), "tuple")?;
            Ok(items[index].clone())
        }
        Value::Str(text) => {
            let chars: Vec<char> = text.chars().collect();
            let index = seq_index(index, chars.len(), "string")?;
            Ok(Value::text(chars[index].to_string()))
        }
        Value::Bytes(bytes) => {
            let index = seq_index(index, bytes.len(), "bytes")?;
            Ok(Value::Int(i64::from(bytes[index])))
        }
        Value::Dict(dict) => {
            check_hashable(index)?;

            let found = lock(dict)
                .iter()
                .find(|(k, _)| values_equal(k, index))
                .map(|(_, v)| v.clone());

            found.ok_or_else(|| {
                Raised::new(builtins::exception(
                    builtins::class(ExcKind::KeyError),
                    vec![index.clone()],
                ))
            })
        }
        other => Err(type_error(format!(
            "'{}' object is not subscriptable",
            other.type_name()
        ))),
    }
}

fn set_item(target: &Value, index: Value, value: Value) -> Exec<()> {
    match target {
        Value::List(list) => {
            let mut list = lock(list);
            let index = seq_index(&index, list.len(), "list assignment")?;
            list[index] = value;
            Ok(())
        }
        Value::Dict(dict) => dict_insert(&mut lock(dict), index, value),
        other => Err(type_error(format!(
            "'{}' object does not support item assignment",
            other.type_name()
        ))),
    }
}

fn unary(op: UnaryOp, operand: &Value) -> Exec<Value> {
    let value = match (op, operand) {
        (UnaryOp::Not, operand) => Value::Bool(!truthy(operand)),
        (UnaryOp::Neg, Value::Float(value)) => Value::Float(-value),
        (UnaryOp::Pos, Value::Float(value)) => Value::Float(*value),
        (UnaryOp::Neg, operand) if as_int(operand).is_some() => {
            let value = as_int(operand).unwrap_or_default();
            Value::Int(value.checked_neg().ok_or_else(overflow)?)
        }
        (UnaryOp::Pos, operand) if as_int(operand).is_some() => {
            Value::Int(as_int(operand).unwrap_or_default())
        }
        (op, operand) => {
            let symbol = if op == UnaryOp::Neg { "-" } else { "+" };
            return Err(type_error(format!(
                "bad operand type for unary {symbol}: '{}'",
                operand.type_name()
            )));
        }
    };

    Ok(value)
}

fn overflow() -> Raised {
    builtins::error(ExcKind::OverflowError, "integer overflow")
}

fn zero_division(message: &str) -> Raised {
    builtins::error(ExcKind::ZeroDivisionError, message)
}

/// Applies a binary operator.
pub fn binary(op: BinOp, left: &Value, right: &Value) -> Exec<Value> {
    if let (Some(a), Some(b)) = (as_int(left), as_int(right)) {
        return int_op(op, a, b);
    }

    if let (Some(a), Some(b)) = (as_float(left), as_float(right)) {
        return float_op(op, a, b);
    }

    let count = |n: &Value| usize::try_from(as_int(n).unwrap_or_default().max(0)).unwrap_or(0);

    match (op, left, right) {
        (BinOp::Add, Value::Str(a), Value::Str(b)) => Ok(Value::text(format!("{a}{b}"))),
        (BinOp::Add, Value::Bytes(a), Value::Bytes(b)) => {
            Ok(Value::Bytes([&a[..], &b[..]].concat().into()))
        }
        (BinOp::Add, Value::List(a), Value::List(b)) => {
            let mut items = lock(a).clone();
            items.extend(lock(b).iter().cloned());
            Ok(Value::list(items))
        }
        (BinOp::Add, Value::Tuple(a), Value::Tuple(b)) => {
            Ok(Value::Tuple(a.iter().chain(b.iter()).cloned().collect()))
        }
        (BinOp::Mul, Value::Str(text), n) | (BinOp::Mul, n, Value::Str(text))
            if as_int(n).is_some() =>
        {
            Ok(Value::text(text.repeat(count(n))))
        }
        (BinOp::Mul, Value::List(list), n) | (BinOp::Mul, n, Value::List(list))
            if as_int(n).is_some() =>
        {
            let items = lock(list).clone();
            Ok(Value::list(repeat(&items, count(n))))
        }
        (BinOp::Mul, Value::Tuple(items), n) | (BinOp::Mul, n, Value::Tuple(items))
            if as_int(n).is_some() =>
        {
            Ok(Value::Tuple(repeat(items, count(n)).into()))
        }
        _ => Err(type_error(format!(
            "unsupported operand type(s) for {}: '{}' and '{}'",
            op.symbol(),
            left.type_name(),
            right.type_name()
        ))),
    }
}

fn repeat(items: &[Value], count: usize) -> Vec<Value> {
    items
        .iter()
        .cloned()
        .cycle()
        .take(items.len().saturating_mul(count))
        .collect()
}

#[allow(clippy::cast_precision_loss)]
fn int_op(op: BinOp, a: i64, b: i64) -> Exec<Value> {
    let value = match op {
        BinOp::Add => a.checked_add(b).ok_or_else(overflow)?,
        BinOp::Sub => a.checked_sub(b).ok_or_else(overflow)?,
        BinOp::Mul => a.checked_mul(b).ok_or_else(overflow)?,
        BinOp::Div => {
            if b == 0 {
                return Err(zero_division("division by zero"));
            }
            return Ok(Value::Float(a as f64 / b as f64));
        }
        BinOp::FloorDiv => {
            if b == 0 {
                return Err(zero_division("integer division or modulo by zero"));
            }
            let quotient = a.checked_div(b).ok_or_else(overflow)?;
            if a % b != 0 && ((a < 0) != (b < 0)) {
                quotient - 1
            } else {
                quotient
            }
        }
        BinOp::Mod => {
            if b == 0 {
                return Err(zero_division("integer modulo by zero"));
            }
            let remainder = a.checked_rem(b).ok_or_else(overflow)?;
            if remainder != 0 && ((remainder < 0) != (b < 0)) {
                remainder + b
            } else {
                remainder
            }
        }
        BinOp::Pow => {
            if b < 0 {
                return Ok(Value::Float((a as f64).powf(b as f64)));
            }
            u32::try_from(b)
                .ok()
                .and_then(|exp| a.checked_pow(exp))
                .ok_or_else(overflow)?
        }
    };

    Ok(Value::Int(value))
}

fn float_op(op: BinOp, a: f64, b: f64) -> Exec<Value> {
    let value = match op {
        BinOp::Add => a + b,
        BinOp::Sub => a - b,
        BinOp::Mul => a * b,
        BinOp::Div => {
            if b == 0.0 {
                return Err(zero_division("float division by zero"));
            }
            a / b
        }
        BinOp::FloorDiv => {
            if b == 0.0 {
                return Err(zero_division("float floor division by zero"));
            }
            (a / b).floor()
        }
        BinOp::Mod => {
            if b == 0.0 {
                return Err(zero_division("float modulo"));
            }
            let remainder = a % b;
            if remainder != 0.0 && ((remainder < 0.0) != (b < 0.0)) {
                remainder + b
            } else {
                remainder
            }
        }
        BinOp::Pow => a.powf(b),
    };

    Ok(Value::Float(value))
}

/// Applies a comparison operator.
pub fn compare(op: CmpOp, left: &Value, right: &Value) -> Exec<bool> {
    match op {
        CmpOp::Eq => Ok(values_equal(left, right)),
        CmpOp::Ne => Ok(!values_equal(left, right)),
        CmpOp::Is => Ok(is_same(left, right)),
        CmpOp::IsNot => Ok(!is_same(left, right)),
        CmpOp::In => contains(right, left),
        CmpOp::NotIn => contains(right, left).map(|found| !found),
        CmpOp::Lt | CmpOp::Le | CmpOp::Gt | CmpOp::Ge => {
            let ordering = order(left, right).ok_or_else(|| {
                type_error(format!(
                    "'{}' not supported between instances of '{}' and '{}'",
                    op.symbol(),
                    left.type_name(),
                    right.type_name()
                ))
            })?;

            Ok(match op {
                CmpOp::Lt => ordering.is_lt(),
                CmpOp::Le => ordering.is_le(),
                CmpOp::Gt => ordering.is_gt(),
                _ => ordering.is_ge(),
            })
        }
    }
}

fn order(left: &Value, right: &Value) -> Option<Ordering> {
    if let (Some(a), Some(b)) = (as_int(left), as_int(right)) {
        return Some(a.cmp(&b));
    }

    if let (Some(a), Some(b)) = (as_float(left), as_float(right)) {
        return a.partial_cmp(&b);
    }

    match (left, right) {
        (Value::Str(a), Value::Str(b)) => Some(a.cmp(b)),
        (Value::Bytes(a), Value::Bytes(b)) => Some(a.cmp(b)),
        (Value::Tuple(a), Value::Tuple(b)) => {
            for (x, y) in a.iter().zip(b.iter()) {
                if !values_equal(x, y) {
                    return order(x, y);
                }
            }
            Some(a.len().cmp(&b.len()))
        }
        _ => None,
    }
}

fn contains(container: &Value, item: &Value) -> Exec<bool> {
    match container {
        Value::List(list) => Ok(lock(list).iter().any(|v| values_equal(v, item))),
        Value::Tuple(items) => Ok(items.iter().any(|v| values_equal(v, item))),
        Value::Dict(dict) => Ok(lock(dict).iter().any(|(k, _)| values_equal(k, item))),
        Value::Str(text) => match item {
            Value::Str(part) => Ok(text.contains(&**part)),
            other => Err(type_error(format!(
                "'in <string>' requires string as left operand, not {}",
                other.type_name()
            ))),
        },
        other => Err(type_error(format!(
            "argument of type '{}' is not iterable",
            other.type_name()
        ))),
    }
}

/// Returns the truthiness of a value.
pub fn truthy(value: &Value) -> bool {
    match value {
        Value::None => false,
        Value::Bool(value) => *value,
        Value::Int(value) => *value != 0,
        Value::Float(value) => *value != 0.0,
        Value::Str(text) => !text.is_empty(),
        Value::Bytes(bytes) => !bytes.is_empty(),
        Value::List(list) => !lock(list).is_empty(),
        Value::Tuple(items) => !items.is_empty(),
        Value::Dict(dict) => !lock(dict).is_empty(),
        _ => true,
    }
}

/// Iterator over the elements of an iterable value.
pub enum ValueIter {
    Items(std::vec::IntoIter<Value>),
    Generator(Arc<Generator>),
}

impl Iterator for ValueIter {
    type Item = Value;

    fn next(&mut self) -> Option<Value> {
        match self {
            Self::Items(items) => items.next(),
            Self::Generator(generator) => lock(&generator.items).pop_front(),
        }
    }
}

/// Starts iterating over a value.
///
/// Containers are iterated over a snapshot of their elements, generators are
/// consumed.
pub fn iterate(value: &Value) -> Exec<ValueIter> {
    let items = match value {
        Value::List(list) => lock(list).clone(),
        Value::Tuple(items) => items.to_vec(),
        Value::Dict(dict) => lock(dict).iter().map(|(k, _)| k.clone()).collect(),
        Value::Str(text) => text.chars().map(|c| Value::text(c.to_string())).collect(),
        Value::Bytes(bytes) => bytes.iter().map(|b| Value::Int(i64::from(*b))).collect(),
        Value::Generator(generator) => return Ok(ValueIter::Generator(generator.clone())),
        other => {
            return Err(type_error(format!(
                "'{}' object is not iterable",
                other.type_name()
            )));
        }
    };

    Ok(ValueIter::Items(items.into_iter()))
}

fn join_reprs(items: &[Value]) -> Exec<String> {
    let parts = items.iter().map(repr).collect::<Exec<Vec<_>>>()?;
    Ok(parts.join(", "))
}

fn display_name(class: &Class) -> String {
    if class.module == "builtins" {
        class.name.clone()
    } else {
        class.qualified_name()
    }
}

fn exception_args(instance: &Instance) -> Vec<Value> {
    match lock(&instance.attrs).get("args") {
        Some(Value::Tuple(args)) => args.to_vec(),
        _ => Vec::new(),
    }
}

fn is_exception(class: &Class) -> bool {
    class.is_subclass_of(&builtins::class(ExcKind::BaseException))
}

fn call_text_method(value: &Value, method: &Arc<Function>, name: &str) -> Exec<String> {
    match call_function(method, vec![value.clone()])? {
        Value::Str(text) => Ok(text.to_string()),
        other => Err(type_error(format!(
            "{name} returned non-string (type {})",
            other.type_name()
        ))),
    }
}

/// Returns the `repr` of a value, running user-defined `__repr__` methods.
pub fn repr(value: &Value) -> Exec<String> {
    let text = match value {
        Value::None => "None".to_owned(),
        Value::Bool(true) => "True".to_owned(),
        Value::Bool(false) => "False".to_owned(),
        Value::Int(value) => value.to_string(),
        Value::Float(value) => format_float(*value),
        Value::Str(text) => quote_str(text),
        Value::Bytes(bytes) => quote_bytes(bytes),
        Value::List(list) => {
            let items = lock(list).clone();
            format!("[{}]", join_reprs(&items)?)
        }
        Value::Tuple(items) if items.len() == 1 => format!("({},)", join_reprs(items)?),
        Value::Tuple(items) => format!("({})", join_reprs(items)?),
        Value::Dict(dict) => {
            let entries = lock(dict).clone();

            let parts = entries
                .iter()
                .map(|(k, v)| Ok(format!("{}: {}", repr(k)?, repr(v)?)))
                .collect::<Exec<Vec<_>>>()?;

            format!("{{{}}}", parts.join(", "))
        }
        Value::Function(function) => {
            format!("<function {} at {}>", function.def.name, address(function))
        }
        Value::Builtin(builtin) => match &builtin.receiver {
            None => format!("<built-in function {}>", builtin.name),
            Some(receiver) => format!(
                "<built-in method {} of {} object at {}>",
                builtin.name,
                receiver.type_name(),
                address(builtin)
            ),
        },
        Value::Class(class) => format!("<class '{}'>", display_name(class)),
        Value::Instance(instance) => {
            if let Some(Value::Function(method)) = instance.class.lookup("__repr__") {
                return call_text_method(value, &method, "__repr__");
            }

            if is_exception(&instance.class) {
                let args = exception_args(instance);
                format!("{}({})", instance.class.name, join_reprs(&args)?)
            } else {
                format!(
                    "<{} object at {}>",
                    display_name(&instance.class),
                    address(instance)
                )
            }
        }
        Value::BoundMethod(method) => format!(
            "<bound method {}.{} of {}>",
            method.receiver.type_name(),
            method.function.def.name,
            repr(&method.receiver)?
        ),
        Value::Module(module) if module.filename.starts_with('<') => {
            format!("<module '{}' (built-in)>", module.name)
        }
        Value::Module(module) => format!("<module '{}' from '{}'>", module.name, module.filename),
        Value::Generator(generator) => format!("<generator object at {}>", address(generator)),
        Value::Thread(thread) => format!("<Thread({}) at {}>", thread.name, address(thread)),
    };

    Ok(text)
}

/// Returns the `str` of a value, running user-defined `__str__` methods.
pub fn str(value: &Value) -> Exec<String> {
    match value {
        Value::Str(text) => Ok(text.to_string()),
        Value::Instance(instance) => {
            if let Some(Value::Function(method)) = instance.class.lookup("__str__") {
                return call_text_method(value, &method, "__str__");
            }

            if !is_exception(&instance.class) {
                return repr(value);
            }

            let is_key_error = instance
                .class
                .is_subclass_of(&builtins::class(ExcKind::KeyError));

            match exception_args(instance).as_slice() {
                [] => Ok(String::new()),
                [arg] if is_key_error => repr(arg),
                [arg] => str(arg),
                args => Ok(format!("({})", join_reprs(args)?)),
            }
        }
        other => repr(other),
    }
}
