use std::any::Any;
use std::sync::Arc;

use super::object::{EvalError, ObjectRef};

/// Shared reference to a frame.
pub type FrameRef = Arc<dyn Frame>;

/// Static information about the code executed by a frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodeInfo {
    /// Code name: function name, or `<module>` for module top-level code.
    pub name: String,
    /// Source filename, as known to the runtime.
    pub filename: String,
    /// First line of the code.
    pub first_line: i32,
    /// Last line of the code.
    pub last_line: i32,
    /// Number of positional arguments.
    pub arg_count: i32,
    /// Names of the local variables, arguments first.
    pub var_names: Vec<String>,
}

impl CodeInfo {
    /// Code name of module top-level code.
    pub const MODULE_NAME: &'static str = "<module>";

    /// Filename of code compiled from a string.
    pub const STRING_FILENAME: &'static str = "<string>";

    /// Returns whether this is the top-level code of a module loaded from a
    /// file.
    pub fn is_module_code(&self) -> bool {
        self.name == Self::MODULE_NAME && self.filename != Self::STRING_FILENAME
    }
}

/// Trait implementing the introspection of an execution frame.
///
/// Frames are shared between the thread executing them and the controller
/// thread, which inspects them while the former is blocked.
pub trait Frame: Send + Sync {
    /// Returns the code executed by this frame.
    fn code(&self) -> &CodeInfo;

    /// Returns the line being executed.
    fn line(&self) -> i32;

    /// Makes the frame continue execution at the given line.
    ///
    /// Fails if the runtime does not allow jumping to that line.
    fn set_line(&self, line: i32) -> Result<(), EvalError>;

    /// Returns the calling frame.
    fn back(&self) -> Option<FrameRef>;

    /// Returns whether the local scope of this frame is the global scope.
    fn is_module_level(&self) -> bool;

    /// Returns the variables displayed for this frame.
    ///
    /// For a module-level frame these are the globals, otherwise the local
    /// variable names of the code. A variable that is not bound yet has no
    /// value.
    fn variables(&self) -> Vec<(String, Option<ObjectRef>)>;

    /// Evaluates some code within this frame's scope.
    ///
    /// The text is evaluated as an expression if possible, and executed as
    /// statements otherwise (yielding the runtime's `None`).
    fn execute(&self, text: &str) -> Result<ObjectRef, EvalError>;

    /// Compiles an expression for later evaluation within any frame.
    fn compile(&self, text: &str) -> Result<Arc<dyn Expression>, EvalError>;

    /// Looks a name up through locals, globals and builtins.
    fn lookup(&self, name: &str) -> Option<ObjectRef>;

    /// Returns the frame as [Any], for downcasting by the runtime.
    fn as_any(&self) -> &dyn Any;
}

/// Compiled expression.
pub trait Expression: Send + Sync {
    /// Evaluates the expression within the scope of the given frame.
    fn eval(&self, frame: &dyn Frame) -> Result<ObjectRef, EvalError>;
}
