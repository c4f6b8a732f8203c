use std::any::Any;
use std::sync::Arc;

/// Shared reference to a runtime value.
pub type ObjectRef = Arc<dyn Object>;

/// Iterator over the `(key, value)` pairs of a mapping.
pub type ItemIter<'a> = Box<dyn Iterator<Item = Result<(ObjectRef, ObjectRef), EvalError>> + 'a>;

/// Iterator over the elements of a sequence.
pub type ChildIter<'a> = Box<dyn Iterator<Item = Result<ObjectRef, EvalError>> + 'a>;

/// Error raised by user code evaluated on behalf of the debugger.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[error("{message}")]
pub struct EvalError {
    /// String form of the raised exception.
    pub message: String,
}

impl EvalError {
    /// Creates a new error with the given message.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Broad classification of a runtime value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectKind {
    /// Integer.
    Int,
    /// Floating-point number.
    Float,
    /// Boolean.
    Bool,
    /// Text string.
    Str,
    /// Byte string.
    Bytes,
    /// The `None` singleton.
    None,
    /// Instance of the bare `object` class.
    PlainObject,
    /// Module.
    Module,
    /// Generator.
    Generator,
    /// Anything else (containers, class instances, functions, classes).
    Other,
}

impl ObjectKind {
    /// Returns whether values of this kind are leaves, never expanded.
    pub fn is_leaf(self) -> bool {
        matches!(
            self,
            Self::Int
                | Self::Float
                | Self::Bool
                | Self::Str
                | Self::Bytes
                | Self::None
                | Self::PlainObject
        )
    }
}

/// Trait implementing the introspection of a runtime value.
///
/// Methods that may run user code return an [EvalError] instead of failing
/// the debugger.
pub trait Object: Send + Sync {
    /// Returns the `repr` of the value.
    fn repr(&self) -> Result<String, EvalError>;

    /// Returns the `str` of the value.
    fn str(&self) -> Result<String, EvalError> {
        self.repr()
    }

    /// Returns the hexadecimal representation of the value, if any.
    fn hex(&self) -> Option<String> {
        None
    }

    /// Returns the short type name of the value (e.g., `int`).
    fn type_name(&self) -> String;

    /// Returns the classification of the value.
    fn kind(&self) -> ObjectKind;

    /// Returns the `(key, value)` pairs of a mapping-like value.
    ///
    /// `None` means the value has no `items`.
    fn items(&self) -> Option<Result<ItemIter<'_>, EvalError>> {
        None
    }

    /// Returns the elements of an iterable value.
    ///
    /// `None` means the value is not iterable.
    fn iter(&self) -> Option<Result<ChildIter<'_>, EvalError>> {
        None
    }

    /// Returns the element at the given position.
    fn index(&self, _index: usize) -> Result<ObjectRef, EvalError> {
        Err(EvalError::new(format!(
            "'{}' object is not subscriptable",
            self.type_name()
        )))
    }

    /// Returns the attribute names of the value.
    fn dir(&self) -> Vec<String> {
        Vec::new()
    }

    /// Returns the attribute of the given name.
    fn get_attr(&self, name: &str) -> Result<ObjectRef, EvalError>;

    /// Returns whether the value is callable.
    fn is_callable(&self) -> bool {
        false
    }

    /// Returns the truthiness of the value.
    fn is_truthy(&self) -> Result<bool, EvalError>;

    /// Returns whether the value equals the given one.
    fn equals(&self, other: &dyn Object) -> Result<bool, EvalError>;

    /// Returns whether the value is the same object as the given one.
    fn is_same(&self, other: &dyn Object) -> bool;

    /// Returns whether the value, a class, derives from the given class.
    fn is_subclass_of(&self, _class: &dyn Object) -> bool {
        false
    }

    /// Returns the value as [Any], for downcasting by the runtime.
    fn as_any(&self) -> &dyn Any;
}
