use std::collections::VecDeque;
use std::sync::{Arc, Mutex, OnceLock};

use indexmap::IndexMap;
use pyhook_debugger::OutputStream;

use crate::interp::{self, Exec, Raised};
use crate::runtime::SimRuntime;
use crate::value::{
    Builtin, Class, Generator, Instance, Module, Value, as_int, format_hex, lock, values_equal,
};

/// Native function, receiving its bound receiver (if any) first.
pub type BuiltinFn = fn(&Arc<SimRuntime>, Vec<Value>) -> Exec<Value>;

/// Builtin exception classes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExcKind {
    BaseException,
    Exception,
    SystemExit,
    KeyboardInterrupt,
    ValueError,
    TypeError,
    NameError,
    AttributeError,
    LookupError,
    KeyError,
    IndexError,
    ArithmeticError,
    ZeroDivisionError,
    OverflowError,
    RuntimeError,
    RecursionError,
    StopIteration,
    AssertionError,
    ImportError,
    SyntaxError,
}

/// Exception classes with their base, in declaration order.
const HIERARCHY: &[(ExcKind, &str, Option<ExcKind>)] = &[
    (ExcKind::BaseException, "BaseException", None),
    (ExcKind::Exception, "Exception", Some(ExcKind::BaseException)),
    (ExcKind::SystemExit, "SystemExit", Some(ExcKind::BaseException)),
    (ExcKind::KeyboardInterrupt, "KeyboardInterrupt", Some(ExcKind::BaseException)),
    (ExcKind::ValueError, "ValueError", Some(ExcKind::Exception)),
    (ExcKind::TypeError, "TypeError", Some(ExcKind::Exception)),
    (ExcKind::NameError, "NameError", Some(ExcKind::Exception)),
    (ExcKind::AttributeError, "AttributeError", Some(ExcKind::Exception)),
    (ExcKind::LookupError, "LookupError", Some(ExcKind::Exception)),
    (ExcKind::KeyError, "KeyError", Some(ExcKind::LookupError)),
    (ExcKind::IndexError, "IndexError", Some(ExcKind::LookupError)),
    (ExcKind::ArithmeticError, "ArithmeticError", Some(ExcKind::Exception)),
    (ExcKind::ZeroDivisionError, "ZeroDivisionError", Some(ExcKind::ArithmeticError)),
    (ExcKind::OverflowError, "OverflowError", Some(ExcKind::ArithmeticError)),
    (ExcKind::RuntimeError, "RuntimeError", Some(ExcKind::Exception)),
    (ExcKind::RecursionError, "RecursionError", Some(ExcKind::RuntimeError)),
    (ExcKind::StopIteration, "StopIteration", Some(ExcKind::Exception)),
    (ExcKind::AssertionError, "AssertionError", Some(ExcKind::Exception)),
    (ExcKind::ImportError, "ImportError", Some(ExcKind::Exception)),
    (ExcKind::SyntaxError, "SyntaxError", Some(ExcKind::Exception)),
];

const FUNCTIONS: &[(&str, BuiltinFn)] = &[
    ("print", print),
    ("len", len),
    ("range", range),
    ("str", str),
    ("repr", repr),
    ("int", int),
    ("hex", hex),
    ("isinstance", isinstance),
    ("spawn", spawn),
    ("join", join),
    ("iter", iter),
];

/// Python version reported by `sys.version`.
pub const VERSION: &str = "3.12.0 (pyhook-sim)";

struct Builtins {
    object: Arc<Class>,
    classes: Vec<Arc<Class>>,
    names: IndexMap<&'static str, Value>,
}

impl Builtins {
    fn new() -> Self {
        let object = Class::new("object", "builtins", None);

        let mut classes: Vec<Arc<Class>> = Vec::with_capacity(HIERARCHY.len());
        let mut names = IndexMap::new();

        names.insert("object", Value::Class(object.clone()));

        for (_, name, parent) in HIERARCHY {
            let base = parent.and_then(|p| classes.get(p as usize).cloned());
            let class = Class::new(name, "builtins", base);

            names.insert(*name, Value::Class(class.clone()));
            classes.push(class);
        }

        for (name, func) in FUNCTIONS {
            names.insert(
                *name,
                Value::Builtin(Arc::new(Builtin {
                    name: *name,
                    func: *func,
                    receiver: None,
                })),
            );
        }

        Self {
            object,
            classes,
            names,
        }
    }
}

static BUILTINS: OnceLock<Builtins> = OnceLock::new();

fn builtins() -> &'static Builtins {
    BUILTINS.get_or_init(Builtins::new)
}

/// Returns a builtin exception class.
pub fn class(kind: ExcKind) -> Arc<Class> {
    builtins().classes[kind as usize].clone()
}

/// Returns whether the given class is the root `object` class.
pub fn is_object_class(class: &Class) -> bool {
    std::ptr::eq(class, &*builtins().object)
}

/// Looks a builtin name up.
pub fn lookup(name: &str) -> Option<Value> {
    builtins().names.get(name).cloned()
}

/// Creates an exception instance with the given arguments.
pub fn exception(class: Arc<Class>, args: Vec<Value>) -> Arc<Instance> {
    let mut attrs = IndexMap::new();
    attrs.insert("args".to_owned(), Value::Tuple(args.into()));

    Arc::new(Instance {
        class,
        attrs: Mutex::new(attrs),
    })
}

/// Creates a raised builtin exception with the given message.
pub fn error(kind: ExcKind, message: impl Into<String>) -> Raised {
    let message: String = message.into();
    Raised::new(exception(class(kind), vec![Value::text(message)]))
}

/// Creates the `sys` module.
pub fn sys_module(runtime: &Arc<SimRuntime>, argv: &[String]) -> Arc<Module> {
    let mut globals = IndexMap::new();

    globals.insert(
        "argv".to_owned(),
        Value::list(argv.iter().map(|arg| Value::text(arg.as_str())).collect()),
    );
    globals.insert(
        "exit".to_owned(),
        Value::Builtin(Arc::new(Builtin {
            name: "exit",
            func: sys_exit,
            receiver: None,
        })),
    );
    globals.insert("version".to_owned(), Value::text(VERSION));

    Arc::new(Module {
        name: "sys".to_owned(),
        filename: "<built-in>".to_owned(),
        globals: Mutex::new(globals),
        runtime: runtime.clone(),
    })
}

/// Returns the builtin method of the given name, bound to a value.
pub fn method(receiver: &Value, name: &str) -> Option<Value> {
    let (name, func): (&'static str, BuiltinFn) = match (receiver, name) {
        (Value::List(_), "append") => ("append", list_append),
        (Value::List(_), "pop") => ("pop", list_pop),
        (Value::Dict(_), "get") => ("get", dict_get),
        (Value::Dict(_), "items") => ("items", dict_items),
        (Value::Dict(_), "keys") => ("keys", dict_keys),
        (Value::Dict(_), "values") => ("values", dict_values),
        (Value::Str(_), "join") => ("join", str_join),
        (Value::Str(_), "lower") => ("lower", str_lower),
        (Value::Str(_), "upper") => ("upper", str_upper),
        _ => return None,
    };

    Some(Value::Builtin(Arc::new(Builtin {
        name,
        func,
        receiver: Some(receiver.clone()),
    })))
}

fn take<const N: usize>(name: &str, args: Vec<Value>) -> Exec<[Value; N]> {
    args.try_into().map_err(|args: Vec<Value>| {
        interp::type_error(format!(
            "{name}() takes exactly {N} argument{} ({} given)",
            if N == 1 { "" } else { "s" },
            args.len()
        ))
    })
}

fn to_int(value: &Value) -> Exec<i64> {
    as_int(value).ok_or_else(|| {
        interp::type_error(format!(
            "'{}' object cannot be interpreted as an integer",
            value.type_name()
        ))
    })
}

fn len_of(len: usize) -> Value {
    Value::Int(i64::try_from(len).unwrap_or(i64::MAX))
}

fn print(runtime: &Arc<SimRuntime>, args: Vec<Value>) -> Exec<Value> {
    let parts = args.iter().map(interp::str).collect::<Exec<Vec<_>>>()?;

    let mut text = parts.join(" ");
    text.push('\n');

    runtime.write_output(OutputStream::Stdout, &text);
    Ok(Value::None)
}

fn len(_: &Arc<SimRuntime>, args: Vec<Value>) -> Exec<Value> {
    let [value] = take("len", args)?;

    match &value {
        Value::Str(text) => Ok(len_of(text.chars().count())),
        Value::Bytes(bytes) => Ok(len_of(bytes.len())),
        Value::List(list) => Ok(len_of(lock(list).len())),
        Value::Tuple(items) => Ok(len_of(items.len())),
        Value::Dict(dict) => Ok(len_of(lock(dict).len())),
        other => Err(interp::type_error(format!(
            "object of type '{}' has no len()",
            other.type_name()
        ))),
    }
}

fn range(_: &Arc<SimRuntime>, args: Vec<Value>) -> Exec<Value> {
    let bounds = args.iter().map(to_int).collect::<Exec<Vec<_>>>()?;

    let (start, stop, step) = match bounds.as_slice() {
        [stop] => (0, *stop, 1),
        [start, stop] => (*start, *stop, 1),
        [start, stop, step] => (*start, *stop, *step),
        _ => {
            return Err(interp::type_error(format!(
                "range expected at most 3 arguments, got {}",
                bounds.len()
            )));
        }
    };

    if step == 0 {
        return Err(error(ExcKind::ValueError, "range() arg 3 must not be zero"));
    }

    let mut items = Vec::new();
    let mut cur = start;

    while (step > 0 && cur < stop) || (step < 0 && cur > stop) {
        items.push(Value::Int(cur));

        let Some(next) = cur.checked_add(step) else {
            break;
        };
        cur = next;
    }

    Ok(Value::list(items))
}

fn str(_: &Arc<SimRuntime>, args: Vec<Value>) -> Exec<Value> {
    if args.is_empty() {
        return Ok(Value::text(""));
    }

    let [value] = take("str", args)?;
    interp::str(&value).map(Value::text)
}

fn repr(_: &Arc<SimRuntime>, args: Vec<Value>) -> Exec<Value> {
    let [value] = take("repr", args)?;
    interp::repr(&value).map(Value::text)
}

#[allow(clippy::cast_possible_truncation)]
fn int(_: &Arc<SimRuntime>, args: Vec<Value>) -> Exec<Value> {
    if args.is_empty() {
        return Ok(Value::Int(0));
    }

    let [value] = take("int", args)?;

    match &value {
        Value::Int(_) | Value::Bool(_) => Ok(Value::Int(as_int(&value).unwrap_or_default())),
        Value::Float(f) if f.is_nan() => Err(error(
            ExcKind::ValueError,
            "cannot convert float NaN to integer",
        )),
        Value::Float(f) if f.is_infinite() => Err(error(
            ExcKind::OverflowError,
            "cannot convert float infinity to integer",
        )),
        Value::Float(f) => Ok(Value::Int(f.trunc() as i64)),
        Value::Str(text) => text.trim().parse().map(Value::Int).map_err(|_| {
            error(
                ExcKind::ValueError,
                format!(
                    "invalid literal for int() with base 10: {}",
                    crate::value::quote_str(text)
                ),
            )
        }),
        other => Err(interp::type_error(format!(
            "int() argument must be a string or a number, not '{}'",
            other.type_name()
        ))),
    }
}

fn hex(_: &Arc<SimRuntime>, args: Vec<Value>) -> Exec<Value> {
    let [value] = take("hex", args)?;
    to_int(&value).map(|v| Value::text(format_hex(v)))
}

fn isinstance(_: &Arc<SimRuntime>, args: Vec<Value>) -> Exec<Value> {
    let [value, classinfo] = take("isinstance", args)?;
    is_instance(&value, &classinfo).map(Value::Bool)
}

fn is_instance(value: &Value, classinfo: &Value) -> Exec<bool> {
    match classinfo {
        Value::Class(class) if is_object_class(class) => Ok(true),
        Value::Class(class) => Ok(match value {
            Value::Instance(instance) => instance.class.is_subclass_of(class),
            _ => false,
        }),
        Value::Tuple(classes) => {
            for class in classes.iter() {
                if is_instance(value, class)? {
                    return Ok(true);
                }
            }
            Ok(false)
        }
        Value::Builtin(builtin) if builtin.receiver.is_none() && matches!(builtin.name, "int" | "str") => {
            let type_name = value.type_name();
            Ok(type_name == builtin.name || (builtin.name == "int" && type_name == "bool"))
        }
        _ => Err(interp::type_error(
            "isinstance() arg 2 must be a type or tuple of types",
        )),
    }
}

fn spawn(runtime: &Arc<SimRuntime>, mut args: Vec<Value>) -> Exec<Value> {
    if args.is_empty() {
        return Err(interp::type_error("spawn() missing required argument 'func'"));
    }

    let func = args.remove(0);
    runtime.spawn(func, args)
}

fn join(_: &Arc<SimRuntime>, args: Vec<Value>) -> Exec<Value> {
    let [handle] = take("join", args)?;

    let Value::Thread(thread) = handle else {
        return Err(interp::type_error("join() argument must be a thread"));
    };

    let handle = lock(&thread.handle).take();

    if let Some(handle) = handle {
        if handle.join().is_err() {
            return Err(error(
                ExcKind::RuntimeError,
                format!("thread {} aborted", thread.name),
            ));
        }
    }

    Ok(Value::None)
}

fn iter(_: &Arc<SimRuntime>, args: Vec<Value>) -> Exec<Value> {
    let [value] = take("iter", args)?;

    if let Value::Generator(_) = value {
        return Ok(value);
    }

    let items: VecDeque<Value> = interp::iterate(&value)?.collect();

    Ok(Value::Generator(Arc::new(Generator {
        items: Mutex::new(items),
    })))
}

fn sys_exit(_: &Arc<SimRuntime>, args: Vec<Value>) -> Exec<Value> {
    if args.len() > 1 {
        return Err(interp::type_error(format!(
            "exit expected at most 1 argument, got {}",
            args.len()
        )));
    }

    Err(Raised::new(exception(class(ExcKind::SystemExit), args)))
}

fn list_append(_: &Arc<SimRuntime>, args: Vec<Value>) -> Exec<Value> {
    let [list, item] = take("append", args)?;

    if let Value::List(list) = list {
        lock(&list).push(item);
    }

    Ok(Value::None)
}

fn list_pop(_: &Arc<SimRuntime>, args: Vec<Value>) -> Exec<Value> {
    let [list] = take("pop", args)?;

    let Value::List(list) = list else {
        return Ok(Value::None);
    };

    let item = lock(&list).pop();
    item.ok_or_else(|| error(ExcKind::IndexError, "pop from empty list"))
}

fn dict_get(_: &Arc<SimRuntime>, mut args: Vec<Value>) -> Exec<Value> {
    let default = if args.len() == 3 {
        args.pop().unwrap_or(Value::None)
    } else {
        Value::None
    };

    let [dict, key] = take("get", args)?;

    let Value::Dict(dict) = dict else {
        return Ok(default);
    };

    let found = lock(&dict)
        .iter()
        .find(|(k, _)| values_equal(k, &key))
        .map(|(_, v)| v.clone());

    Ok(found.unwrap_or(default))
}

fn dict_entries(name: &str, args: Vec<Value>) -> Exec<Vec<(Value, Value)>> {
    let [dict] = take(name, args)?;

    match dict {
        Value::Dict(dict) => Ok(lock(&dict).clone()),
        _ => Ok(Vec::new()),
    }
}

fn dict_items(_: &Arc<SimRuntime>, args: Vec<Value>) -> Exec<Value> {
    let entries = dict_entries("items", args)?;

    Ok(Value::list(
        entries
            .into_iter()
            .map(|(k, v)| Value::Tuple(vec![k, v].into()))
            .collect(),
    ))
}

fn dict_keys(_: &Arc<SimRuntime>, args: Vec<Value>) -> Exec<Value> {
    let entries = dict_entries("keys", args)?;
    Ok(Value::list(entries.into_iter().map(|(k, _)| k).collect()))
}

fn dict_values(_: &Arc<SimRuntime>, args: Vec<Value>) -> Exec<Value> {
    let entries = dict_entries("values", args)?;
    Ok(Value::list(entries.into_iter().map(|(_, v)| v).collect()))
}

fn str_join(_: &Arc<SimRuntime>, args: Vec<Value>) -> Exec<Value> {
    let [separator, items] = take("join", args)?;

    let Value::Str(separator) = separator else {
        return Ok(Value::None);
    };

    let mut parts = Vec::new();

    for (index, item) in interp::iterate(&items)?.enumerate() {
        match item {
            Value::Str(text) => parts.push(text),
            other => {
                return Err(interp::type_error(format!(
                    "sequence item {index}: expected str instance, {} found",
                    other.type_name()
                )));
            }
        }
    }

    let parts: Vec<&str> = parts.iter().map(|p| &**p).collect();
    Ok(Value::text(parts.join(&*separator)))
}

fn str_lower(_: &Arc<SimRuntime>, args: Vec<Value>) -> Exec<Value> {
    let [text] = take("lower", args)?;

    match text {
        Value::Str(text) => Ok(Value::text(text.to_lowercase())),
        other => Ok(other),
    }
}

fn str_upper(_: &Arc<SimRuntime>, args: Vec<Value>) -> Exec<Value> {
    let [text] = take("upper", args)?;

    match text {
        Value::Str(text) => Ok(Value::text(text.to_uppercase())),
        other => Ok(other),
    }
}
