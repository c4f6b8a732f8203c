use std::any::Any;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::JoinHandle;

use indexmap::IndexMap;
use pyhook_debugger::runtime::{ChildIter, EvalError, ItemIter, Object, ObjectKind, ObjectRef};

use crate::ast::CodeBody;
use crate::builtins::BuiltinFn;
use crate::interp::{self, Raised};
use crate::runtime::SimRuntime;

/// Variables of a scope, in definition order.
pub type Namespace = Mutex<IndexMap<String, Value>>;

/// Runtime value.
#[derive(Clone)]
pub enum Value {
    None,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(Arc<str>),
    Bytes(Arc<[u8]>),
    List(Arc<Mutex<Vec<Value>>>),
    Tuple(Arc<[Value]>),
    Dict(Arc<Mutex<Vec<(Value, Value)>>>),
    Function(Arc<Function>),
    Builtin(Arc<Builtin>),
    Class(Arc<Class>),
    Instance(Arc<Instance>),
    BoundMethod(Arc<BoundMethod>),
    Module(Arc<Module>),
    Generator(Arc<Generator>),
    Thread(Arc<ThreadHandle>),
}

/// User-defined function.
pub struct Function {
    pub def: Arc<CodeBody>,
    pub module: Arc<Module>,
}

/// Native function, possibly bound to a receiver.
pub struct Builtin {
    pub name: &'static str,
    pub func: BuiltinFn,
    pub receiver: Option<Value>,
}

/// Class, builtin or user-defined.
pub struct Class {
    pub name: String,
    pub module: String,
    pub base: Option<Arc<Class>>,
    pub attrs: Namespace,
}

/// Instance of a class.
pub struct Instance {
    pub class: Arc<Class>,
    pub attrs: Namespace,
}

/// Function bound to its receiver.
pub struct BoundMethod {
    pub receiver: Value,
    pub function: Arc<Function>,
}

/// Loaded module.
pub struct Module {
    pub name: String,
    pub filename: String,
    pub globals: Namespace,
    pub runtime: Arc<SimRuntime>,
}

/// Lazily consumed sequence of values.
pub struct Generator {
    pub items: Mutex<VecDeque<Value>>,
}

/// Handle of a thread started by the program.
pub struct ThreadHandle {
    pub name: String,
    pub handle: Mutex<Option<JoinHandle<()>>>,
}

impl Class {
    /// Creates a class without attributes.
    pub fn new(name: &str, module: &str, base: Option<Arc<Class>>) -> Arc<Self> {
        Self::with_attrs(name, module, base, IndexMap::new())
    }

    /// Creates a class with the given attributes.
    pub fn with_attrs(
        name: &str,
        module: &str,
        base: Option<Arc<Class>>,
        attrs: IndexMap<String, Value>,
    ) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_owned(),
            module: module.to_owned(),
            base,
            attrs: Mutex::new(attrs),
        })
    }

    /// Returns the module-qualified name of the class.
    pub fn qualified_name(&self) -> String {
        format!("{}.{}", self.module, self.name)
    }

    /// Looks an attribute up through the class and its bases.
    pub fn lookup(&self, name: &str) -> Option<Value> {
        if let Some(value) = lock(&self.attrs).get(name) {
            return Some(value.clone());
        }

        self.base.as_ref()?.lookup(name)
    }

    /// Returns whether this class is, or derives from, the given one.
    pub fn is_subclass_of(&self, class: &Class) -> bool {
        let mut cur = Some(self);

        while let Some(c) = cur {
            if std::ptr::eq(c, class) {
                return true;
            }
            cur = c.base.as_deref();
        }

        false
    }

    fn attr_names(&self, names: &mut Vec<String>) {
        names.extend(lock(&self.attrs).keys().cloned());

        if let Some(base) = &self.base {
            base.attr_names(names);
        }
    }
}

impl Value {
    /// Creates a string value.
    pub fn text(text: impl Into<Arc<str>>) -> Self {
        Self::Str(text.into())
    }

    /// Creates a list value.
    pub fn list(items: Vec<Value>) -> Self {
        Self::List(Arc::new(Mutex::new(items)))
    }

    /// Returns the short type name of the value.
    pub fn type_name(&self) -> String {
        match self {
            Self::None => "NoneType",
            Self::Bool(_) => "bool",
            Self::Int(_) => "int",
            Self::Float(_) => "float",
            Self::Str(_) => "str",
            Self::Bytes(_) => "bytes",
            Self::List(_) => "list",
            Self::Tuple(_) => "tuple",
            Self::Dict(_) => "dict",
            Self::Function(_) => "function",
            Self::Builtin(_) => "builtin_function_or_method",
            Self::Class(_) => "type",
            Self::Instance(instance) => return instance.class.name.clone(),
            Self::BoundMethod(_) => "method",
            Self::Module(_) => "module",
            Self::Generator(_) => "generator",
            Self::Thread(_) => "Thread",
        }
        .to_owned()
    }

    /// Returns the value as a shared runtime object.
    pub fn into_object(self) -> ObjectRef {
        Arc::new(self)
    }

    /// Returns the value behind a runtime object.
    pub fn from_object(object: &dyn Object) -> Option<&Value> {
        object.as_any().downcast_ref()
    }

    /// Returns the attribute names of the value, sorted.
    pub fn attr_names(&self) -> Vec<String> {
        let mut names = match self {
            Self::Instance(instance) => {
                let mut names: Vec<_> = lock(&instance.attrs).keys().cloned().collect();
                instance.class.attr_names(&mut names);
                names.push("__class__".to_owned());
                names
            }
            Self::Class(class) => {
                let mut names = vec!["__name__".to_owned()];
                class.attr_names(&mut names);
                names
            }
            Self::Module(module) => lock(&module.globals).keys().cloned().collect(),
            Self::List(_) => vec!["append".to_owned(), "pop".to_owned()],
            Self::Dict(_) => ["get", "items", "keys", "values"].map(str::to_owned).to_vec(),
            Self::Str(_) => ["join", "lower", "upper"].map(str::to_owned).to_vec(),
            _ => Vec::new(),
        };

        names.sort();
        names.dedup();
        names
    }
}

/// Returns whether two values compare equal, without running user code.
pub fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::None, Value::None) => true,
        (Value::Str(a), Value::Str(b)) => a == b,
        (Value::Bytes(a), Value::Bytes(b)) => a == b,
        (Value::Float(_), _) | (_, Value::Float(_)) => match (as_float(a), as_float(b)) {
            (Some(x), Some(y)) => x == y,
            _ => false,
        },
        (Value::Int(_) | Value::Bool(_), Value::Int(_) | Value::Bool(_)) => as_int(a) == as_int(b),
        (Value::List(x), Value::List(y)) => {
            if Arc::ptr_eq(x, y) {
                return true;
            }
            let (x, y) = (lock(x).clone(), lock(y).clone());
            seq_equal(&x, &y)
        }
        (Value::Tuple(x), Value::Tuple(y)) => seq_equal(x, y),
        (Value::Dict(x), Value::Dict(y)) => {
            if Arc::ptr_eq(x, y) {
                return true;
            }
            let (x, y) = (lock(x).clone(), lock(y).clone());
            x.len() == y.len()
                && x.iter().all(|(key, value)| {
                    y.iter()
                        .any(|(k, v)| values_equal(key, k) && values_equal(value, v))
                })
        }
        _ => is_same(a, b),
    }
}

fn seq_equal(a: &[Value], b: &[Value]) -> bool {
    a.len() == b.len() && a.iter().zip(b).all(|(x, y)| values_equal(x, y))
}

/// Returns whether two values are the same object.
pub fn is_same(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::None, Value::None) => true,
        (Value::Bool(x), Value::Bool(y)) => x == y,
        (Value::Int(x), Value::Int(y)) => x == y,
        (Value::Float(x), Value::Float(y)) => x.to_bits() == y.to_bits(),
        (Value::Str(x), Value::Str(y)) => Arc::ptr_eq(x, y) || x == y,
        (Value::Bytes(x), Value::Bytes(y)) => Arc::ptr_eq(x, y),
        (Value::List(x), Value::List(y)) => Arc::ptr_eq(x, y),
        (Value::Tuple(x), Value::Tuple(y)) => Arc::ptr_eq(x, y),
        (Value::Dict(x), Value::Dict(y)) => Arc::ptr_eq(x, y),
        (Value::Function(x), Value::Function(y)) => Arc::ptr_eq(x, y),
        (Value::Builtin(x), Value::Builtin(y)) => Arc::ptr_eq(x, y),
        (Value::Class(x), Value::Class(y)) => Arc::ptr_eq(x, y),
        (Value::Instance(x), Value::Instance(y)) => Arc::ptr_eq(x, y),
        (Value::BoundMethod(x), Value::BoundMethod(y)) => Arc::ptr_eq(x, y),
        (Value::Module(x), Value::Module(y)) => Arc::ptr_eq(x, y),
        (Value::Generator(x), Value::Generator(y)) => Arc::ptr_eq(x, y),
        (Value::Thread(x), Value::Thread(y)) => Arc::ptr_eq(x, y),
        _ => false,
    }
}

/// Returns the integer value of an `int` or `bool`.
pub fn as_int(value: &Value) -> Option<i64> {
    match value {
        Value::Int(value) => Some(*value),
        Value::Bool(value) => Some(i64::from(*value)),
        _ => None,
    }
}

/// Returns the numeric value of an `int`, `bool` or `float`.
#[allow(clippy::cast_precision_loss)]
pub fn as_float(value: &Value) -> Option<f64> {
    match value {
        Value::Float(value) => Some(*value),
        other => as_int(other).map(|v| v as f64),
    }
}

/// Formats a hexadecimal integer the way the `hex` builtin does.
pub fn format_hex(value: i64) -> String {
    if value < 0 {
        format!("-{:#x}", value.unsigned_abs())
    } else {
        format!("{value:#x}")
    }
}

/// Formats a float the way `repr` does.
pub fn format_float(value: f64) -> String {
    if value.is_nan() {
        "nan".to_owned()
    } else if value.is_infinite() {
        if value > 0.0 { "inf" } else { "-inf" }.to_owned()
    } else if value.fract() == 0.0 && value.abs() < 1e16 {
        format!("{value:.1}")
    } else {
        format!("{value}")
    }
}

/// Quotes a string the way `repr` does.
pub fn quote_str(text: &str) -> String {
    let quote = if text.contains('\'') && !text.contains('"') {
        '"'
    } else {
        '\''
    };

    let mut out = String::with_capacity(text.len() + 2);
    out.push(quote);

    for c in text.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if c == quote => {
                out.push('\\');
                out.push(c);
            }
            c if c.is_control() => out.push_str(&format!("\\x{:02x}", u32::from(c))),
            c => out.push(c),
        }
    }

    out.push(quote);
    out
}

/// Quotes a byte string the way `repr` does.
pub fn quote_bytes(bytes: &[u8]) -> String {
    let mut out = String::from("b'");

    for &b in bytes {
        match b {
            b'\\' => out.push_str("\\\\"),
            b'\'' => out.push_str("\\'"),
            b'\n' => out.push_str("\\n"),
            b'\r' => out.push_str("\\r"),
            b'\t' => out.push_str("\\t"),
            0x20..=0x7e => out.push(char::from(b)),
            b => out.push_str(&format!("\\x{b:02x}")),
        }
    }

    out.push('\'');
    out
}

/// Returns the address of a shared value, as displayed by `repr`.
pub fn address<T: ?Sized>(value: &Arc<T>) -> String {
    format!("{:#x}", Arc::as_ptr(value).cast::<()>() as usize)
}

impl Object for Value {
    fn repr(&self) -> Result<String, EvalError> {
        interp::repr(self).map_err(Raised::into_eval_error)
    }

    fn str(&self) -> Result<String, EvalError> {
        interp::str(self).map_err(Raised::into_eval_error)
    }

    fn hex(&self) -> Option<String> {
        match self {
            Self::Int(value) => Some(format_hex(*value)),
            Self::Bool(value) => Some(format_hex(i64::from(*value))),
            _ => None,
        }
    }

    fn type_name(&self) -> String {
        Value::type_name(self)
    }

    fn kind(&self) -> ObjectKind {
        match self {
            Self::None => ObjectKind::None,
            Self::Bool(_) => ObjectKind::Bool,
            Self::Int(_) => ObjectKind::Int,
            Self::Float(_) => ObjectKind::Float,
            Self::Str(_) => ObjectKind::Str,
            Self::Bytes(_) => ObjectKind::Bytes,
            Self::Module(_) => ObjectKind::Module,
            Self::Generator(_) => ObjectKind::Generator,
            Self::Instance(instance) if crate::builtins::is_object_class(&instance.class) => {
                ObjectKind::PlainObject
            }
            _ => ObjectKind::Other,
        }
    }

    fn items(&self) -> Option<Result<ItemIter<'_>, EvalError>> {
        let Self::Dict(dict) = self else {
            return None;
        };

        let items = lock(dict).clone();

        Some(Ok(Box::new(
            items
                .into_iter()
                .map(|(key, value)| Ok((key.into_object(), value.into_object()))),
        )))
    }

    fn iter(&self) -> Option<Result<ChildIter<'_>, EvalError>> {
        let items = match self {
            Self::List(list) => lock(list).clone(),
            Self::Tuple(items) => items.to_vec(),
            Self::Dict(dict) => lock(dict).iter().map(|(key, _)| key.clone()).collect(),
            _ => return None,
        };

        Some(Ok(Box::new(items.into_iter().map(|v| Ok(v.into_object())))))
    }

    fn index(&self, index: usize) -> Result<ObjectRef, EvalError> {
        let item = match self {
            Self::List(list) => lock(list).get(index).cloned(),
            Self::Tuple(items) => items.get(index).cloned(),
            _ => {
                return Err(EvalError::new(format!(
                    "'{}' object is not subscriptable",
                    self.type_name()
                )));
            }
        };

        item.map(Value::into_object)
            .ok_or_else(|| EvalError::new(format!("{} index out of range", self.type_name())))
    }

    fn dir(&self) -> Vec<String> {
        self.attr_names()
    }

    fn get_attr(&self, name: &str) -> Result<ObjectRef, EvalError> {
        interp::get_attr(self, name)
            .map(Value::into_object)
            .map_err(Raised::into_eval_error)
    }

    fn is_callable(&self) -> bool {
        matches!(
            self,
            Self::Function(_) | Self::Builtin(_) | Self::Class(_) | Self::BoundMethod(_)
        )
    }

    fn is_truthy(&self) -> Result<bool, EvalError> {
        Ok(interp::truthy(self))
    }

    fn equals(&self, other: &dyn Object) -> Result<bool, EvalError> {
        Ok(Value::from_object(other).is_some_and(|other| values_equal(self, other)))
    }

    fn is_same(&self, other: &dyn Object) -> bool {
        Value::from_object(other).is_some_and(|other| is_same(self, other))
    }

    fn is_subclass_of(&self, class: &dyn Object) -> bool {
        match (self, Value::from_object(class)) {
            (Self::Class(this), Some(Value::Class(class))) => this.is_subclass_of(class),
            _ => false,
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Locks a mutex, ignoring poisoning.
pub fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use pyhook_debugger::runtime::{Object, ObjectKind};

    use super::{Class, Value, format_float, format_hex, quote_bytes, quote_str, values_equal};

    #[test]
    fn numbers_compare_across_types() {
        assert!(values_equal(&Value::Int(1), &Value::Bool(true)));
        assert!(values_equal(&Value::Int(2), &Value::Float(2.0)));
        assert!(values_equal(&Value::Float(2.0), &Value::Int(2)));
        assert!(!values_equal(&Value::Int(2), &Value::text("2")));
    }

    #[test]
    fn containers_compare_by_content() {
        let a = Value::list(vec![Value::Int(1), Value::text("x")]);
        let b = Value::list(vec![Value::Int(1), Value::text("x")]);

        assert!(values_equal(&a, &b));
        assert!(!a.is_same(&b));
        assert!(a.is_same(&a.clone()));
    }

    #[test]
    fn hex_of_integral_values() {
        assert_eq!(Object::hex(&Value::Int(26)), Some("0x1a".to_owned()));
        assert_eq!(Object::hex(&Value::Bool(true)), Some("0x1".to_owned()));
        assert_eq!(Object::hex(&Value::Bool(false)), Some("0x0".to_owned()));
        assert_eq!(Object::hex(&Value::Float(1.0)), None);
        assert_eq!(Object::hex(&Value::text("1")), None);
    }

    #[test]
    fn reprs() {
        assert_eq!(format_hex(255), "0xff");
        assert_eq!(format_hex(-5), "-0x5");
        assert_eq!(format_float(3.0), "3.0");
        assert_eq!(format_float(2.5), "2.5");
        assert_eq!(quote_str("it's"), "\"it's\"");
        assert_eq!(quote_str("a\nb"), "'a\\nb'");
        assert_eq!(quote_bytes(b"a\x00'"), "b'a\\x00\\''");
    }

    #[test]
    fn subclass_chain() {
        let base = Class::new("Base", "__main__", None);
        let derived = Class::new("Derived", "__main__", Some(base.clone()));

        let derived = Value::Class(derived);
        let base = Value::Class(base);

        assert!(derived.is_subclass_of(&base));
        assert!(derived.is_subclass_of(&derived));
        assert!(!base.is_subclass_of(&derived));
    }

    #[test]
    fn kinds() {
        assert_eq!(Object::kind(&Value::Int(1)), ObjectKind::Int);
        assert_eq!(Object::kind(&Value::list(Vec::new())), ObjectKind::Other);
        assert_eq!(Object::hex(&Value::Int(3)).as_deref(), Some("0x3"));
    }
}
