use std::collections::BTreeSet;
use std::io::{ErrorKind, Read};

use byteorder::{LittleEndian, ReadBytesExt};

use crate::error::{Error, Result};
use crate::tag::InboundTag;

/// Terminator of an expression list within a `sehi` handler region.
const HANDLER_EXPRESSIONS_END: &str = "-";

/// Catch-all handler expression.
pub const CATCH_ALL: &str = "*";

/// Command sent by the controller to the debuggee.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    /// The controller saw the process exit and lets it terminate.
    Exit,

    /// Step into the next call of the given thread.
    StepInto {
        /// Thread identifier.
        tid: i32,
    },

    /// Step out of the current frame of the given thread.
    StepOut {
        /// Thread identifier.
        tid: i32,
    },

    /// Step over the current line of the given thread.
    StepOver {
        /// Thread identifier.
        tid: i32,
    },

    /// Set a breakpoint.
    SetBreakpoint {
        /// Breakpoint identifier.
        id: i32,
        /// Line number.
        line: i32,
        /// Source file.
        filename: String,
        /// Condition source, empty if unconditional.
        condition: String,
        /// Break when the condition value changes instead of when it holds.
        break_when_changed: bool,
    },

    /// Replace the condition of an existing breakpoint.
    SetBreakpointCondition {
        /// Breakpoint identifier.
        id: i32,
        /// Condition source, empty if unconditional.
        condition: String,
        /// Break when the condition value changes instead of when it holds.
        break_when_changed: bool,
    },

    /// Remove a breakpoint.
    RemoveBreakpoint {
        /// Line number.
        line: i32,
        /// Breakpoint identifier.
        id: i32,
    },

    /// Break all threads on their next event.
    BreakAll,

    /// Resume all blocked threads.
    ResumeAll,

    /// Resume a single blocked thread.
    ResumeThread {
        /// Thread identifier.
        tid: i32,
    },

    /// Evaluate some code in a frame of a blocked thread.
    Execute {
        /// Code to evaluate.
        text: String,
        /// Thread identifier.
        tid: i32,
        /// Frame depth, 0 being the innermost frame.
        frame_id: i32,
        /// Identifier echoed back in the result.
        eval_id: i32,
    },

    /// Enumerate the children of the value of an expression.
    EnumChildren {
        /// Expression to evaluate.
        text: String,
        /// Thread identifier.
        tid: i32,
        /// Frame depth, 0 being the innermost frame.
        frame_id: i32,
        /// Identifier echoed back in the result.
        eval_id: i32,
        /// The expression denotes an enumerated child (`expr[N]`).
        child_is_enumerate: bool,
    },

    /// Set the current line of the current frame of a blocked thread.
    SetLineNumber {
        /// Thread identifier.
        tid: i32,
        /// Frame depth (unused, the current frame is always targeted).
        frame_id: i32,
        /// New line number.
        line: i32,
    },

    /// Detach the debugger from the process.
    Detach,

    /// Clear the stepping mode of a thread.
    ClearStepping {
        /// Thread identifier.
        tid: i32,
    },

    /// Replace the exception break modes.
    SetExceptionInfo {
        /// Mode of exceptions without a dedicated entry.
        default_mode: i32,
        /// Per exception type mode, keyed by qualified type name.
        modes: Vec<(String, i32)>,
    },

    /// Provide the exception handler regions of a source file.
    SetExceptionHandlerInfo {
        /// Source file.
        filename: String,
        /// Handler regions of the file.
        regions: Vec<HandlerRegion>,
    },
}

/// Line range of an `except` clause and the expressions it catches.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandlerRegion {
    /// First line covered by the handler (inclusive).
    pub line_start: i32,
    /// Last line covered by the handler (exclusive).
    pub line_end: i32,
    /// Expressions naming the caught exception types.
    ///
    /// Never empty, a catch-all region holds `"*"`.
    pub expressions: BTreeSet<String>,
}

impl HandlerRegion {
    /// Returns whether the region covers the given line.
    pub fn contains(&self, line: i32) -> bool {
        self.line_start <= line && line < self.line_end
    }

    /// Returns whether the region catches every exception.
    pub fn is_catch_all(&self) -> bool {
        self.expressions.contains(CATCH_ALL)
    }
}

impl Request {
    /// Reads the next request from the given reader.
    ///
    /// End of stream while reading the tag or a field is reported as
    /// [Error::Disconnected].
    pub fn read_from<R: Read>(reader: &mut R) -> Result<Self> {
        let mut raw_tag = [0u8; 4];
        reader.read_exact(&mut raw_tag).map_err(map_eof)?;

        let tag = InboundTag::from_bytes(&raw_tag).ok_or(Error::UnknownCommand(raw_tag))?;

        let request = match tag {
            InboundTag::Exit => Self::Exit,
            InboundTag::StepInto => Self::StepInto {
                tid: read_i32(reader)?,
            },
            InboundTag::StepOut => Self::StepOut {
                tid: read_i32(reader)?,
            },
            InboundTag::StepOver => Self::StepOver {
                tid: read_i32(reader)?,
            },
            InboundTag::SetBreakpoint => Self::SetBreakpoint {
                id: read_i32(reader)?,
                line: read_i32(reader)?,
                filename: read_string(reader)?,
                condition: read_string(reader)?,
                break_when_changed: read_i32(reader)? != 0,
            },
            InboundTag::SetBreakpointCondition => Self::SetBreakpointCondition {
                id: read_i32(reader)?,
                condition: read_string(reader)?,
                break_when_changed: read_i32(reader)? != 0,
            },
            InboundTag::RemoveBreakpoint => Self::RemoveBreakpoint {
                line: read_i32(reader)?,
                id: read_i32(reader)?,
            },
            InboundTag::BreakAll => Self::BreakAll,
            InboundTag::ResumeAll => Self::ResumeAll,
            InboundTag::ResumeThread => Self::ResumeThread {
                tid: read_i32(reader)?,
            },
            InboundTag::Execute => Self::Execute {
                text: read_string(reader)?,
                tid: read_i32(reader)?,
                frame_id: read_i32(reader)?,
                eval_id: read_i32(reader)?,
            },
            InboundTag::EnumChildren => Self::EnumChildren {
                text: read_string(reader)?,
                tid: read_i32(reader)?,
                frame_id: read_i32(reader)?,
                eval_id: read_i32(reader)?,
                child_is_enumerate: read_i32(reader)? != 0,
            },
            InboundTag::SetLineNumber => Self::SetLineNumber {
                tid: read_i32(reader)?,
                frame_id: read_i32(reader)?,
                line: read_i32(reader)?,
            },
            InboundTag::Detach => Self::Detach,
            InboundTag::ClearStepping => Self::ClearStepping {
                tid: read_i32(reader)?,
            },
            InboundTag::SetExceptionInfo => {
                let default_mode = read_i32(reader)?;
                let count = read_count(reader)?;

                let mut modes = Vec::with_capacity(count.min(1024));
                for _ in 0..count {
                    let mode = read_i32(reader)?;
                    let name = read_string(reader)?;
                    modes.push((name, mode));
                }

                Self::SetExceptionInfo {
                    default_mode,
                    modes,
                }
            }
            InboundTag::SetExceptionHandlerInfo => {
                let filename = read_string(reader)?;
                let count = read_count(reader)?;

                let mut regions = Vec::with_capacity(count.min(1024));
                for _ in 0..count {
                    let line_start = read_i32(reader)?;
                    let line_end = read_i32(reader)?;

                    let mut expressions = BTreeSet::new();
                    loop {
                        let expr = read_string(reader)?;
                        if expr == HANDLER_EXPRESSIONS_END {
                            break;
                        }
                        expressions.insert(expr);
                    }

                    if expressions.is_empty() {
                        expressions.insert(CATCH_ALL.to_owned());
                    }

                    regions.push(HandlerRegion {
                        line_start,
                        line_end,
                        expressions,
                    });
                }

                Self::SetExceptionHandlerInfo { filename, regions }
            }
        };

        Ok(request)
    }

    /// Returns the tag of this request.
    pub fn tag(&self) -> InboundTag {
        match self {
            Self::Exit => InboundTag::Exit,
            Self::StepInto { .. } => InboundTag::StepInto,
            Self::StepOut { .. } => InboundTag::StepOut,
            Self::StepOver { .. } => InboundTag::StepOver,
            Self::SetBreakpoint { .. } => InboundTag::SetBreakpoint,
            Self::SetBreakpointCondition { .. } => InboundTag::SetBreakpointCondition,
            Self::RemoveBreakpoint { .. } => InboundTag::RemoveBreakpoint,
            Self::BreakAll => InboundTag::BreakAll,
            Self::ResumeAll => InboundTag::ResumeAll,
            Self::ResumeThread { .. } => InboundTag::ResumeThread,
            Self::Execute { .. } => InboundTag::Execute,
            Self::EnumChildren { .. } => InboundTag::EnumChildren,
            Self::SetLineNumber { .. } => InboundTag::SetLineNumber,
            Self::Detach => InboundTag::Detach,
            Self::ClearStepping { .. } => InboundTag::ClearStepping,
            Self::SetExceptionInfo { .. } => InboundTag::SetExceptionInfo,
            Self::SetExceptionHandlerInfo { .. } => InboundTag::SetExceptionHandlerInfo,
        }
    }
}

impl Request {
    /// Encodes this request as a complete frame.
    ///
    /// This is the controller side of [Request::read_from].
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(32);
        buf.extend_from_slice(self.tag().as_bytes());

        match self {
            Self::Exit | Self::BreakAll | Self::ResumeAll | Self::Detach => {}
            Self::StepInto { tid }
            | Self::StepOut { tid }
            | Self::StepOver { tid }
            | Self::ResumeThread { tid }
            | Self::ClearStepping { tid } => put_i32(&mut buf, *tid),
            Self::SetBreakpoint {
                id,
                line,
                filename,
                condition,
                break_when_changed,
            } => {
                put_i32(&mut buf, *id);
                put_i32(&mut buf, *line);
                put_str(&mut buf, filename);
                put_str(&mut buf, condition);
                put_i32(&mut buf, i32::from(*break_when_changed));
            }
            Self::SetBreakpointCondition {
                id,
                condition,
                break_when_changed,
            } => {
                put_i32(&mut buf, *id);
                put_str(&mut buf, condition);
                put_i32(&mut buf, i32::from(*break_when_changed));
            }
            Self::RemoveBreakpoint { line, id } => {
                put_i32(&mut buf, *line);
                put_i32(&mut buf, *id);
            }
            Self::Execute {
                text,
                tid,
                frame_id,
                eval_id,
            } => {
                put_str(&mut buf, text);
                put_i32(&mut buf, *tid);
                put_i32(&mut buf, *frame_id);
                put_i32(&mut buf, *eval_id);
            }
            Self::EnumChildren {
                text,
                tid,
                frame_id,
                eval_id,
                child_is_enumerate,
            } => {
                put_str(&mut buf, text);
                put_i32(&mut buf, *tid);
                put_i32(&mut buf, *frame_id);
                put_i32(&mut buf, *eval_id);
                put_i32(&mut buf, i32::from(*child_is_enumerate));
            }
            Self::SetLineNumber {
                tid,
                frame_id,
                line,
            } => {
                put_i32(&mut buf, *tid);
                put_i32(&mut buf, *frame_id);
                put_i32(&mut buf, *line);
            }
            Self::SetExceptionInfo {
                default_mode,
                modes,
            } => {
                put_i32(&mut buf, *default_mode);
                put_i32(&mut buf, i32::try_from(modes.len()).unwrap_or(i32::MAX));
                for (name, mode) in modes {
                    put_i32(&mut buf, *mode);
                    put_str(&mut buf, name);
                }
            }
            Self::SetExceptionHandlerInfo { filename, regions } => {
                put_str(&mut buf, filename);
                put_i32(&mut buf, i32::try_from(regions.len()).unwrap_or(i32::MAX));
                for region in regions {
                    put_i32(&mut buf, region.line_start);
                    put_i32(&mut buf, region.line_end);
                    for expr in region.expressions.iter().filter(|e| *e != CATCH_ALL) {
                        put_str(&mut buf, expr);
                    }
                    put_str(&mut buf, HANDLER_EXPRESSIONS_END);
                }
            }
        }

        buf
    }
}

fn put_i32(buf: &mut Vec<u8>, value: i32) {
    buf.extend_from_slice(&value.to_le_bytes());
}

fn put_str(buf: &mut Vec<u8>, value: &str) {
    put_i32(buf, i32::try_from(value.len()).unwrap_or(i32::MAX));
    buf.extend_from_slice(value.as_bytes());
}

/// Reads a signed 32-bit little-endian integer.
pub fn read_i32<R: Read>(reader: &mut R) -> Result<i32> {
    reader.read_i32::<LittleEndian>().map_err(map_eof)
}

/// Reads a length-prefixed UTF-8 string (inbound encoding, no type tag).
pub fn read_string<R: Read>(reader: &mut R) -> Result<String> {
    let len = read_i32(reader)?;
    let len = usize::try_from(len).map_err(|_| Error::InvalidLength(len))?;

    let bytes = read_bytes(reader, len)?;

    Ok(String::from_utf8(bytes)?)
}

/// Reads exactly `len` bytes, growing the buffer as they arrive.
pub(crate) fn read_bytes<R: Read>(reader: &mut R, len: usize) -> Result<Vec<u8>> {
    let mut bytes = Vec::new();

    reader
        .by_ref()
        .take(len as u64)
        .read_to_end(&mut bytes)
        .map_err(map_eof)?;

    if bytes.len() < len {
        return Err(Error::Disconnected);
    }

    Ok(bytes)
}

pub(crate) fn read_count<R: Read>(reader: &mut R) -> Result<usize> {
    let count = read_i32(reader)?;
    usize::try_from(count).map_err(|_| Error::InvalidLength(count))
}

pub(crate) fn map_eof(e: std::io::Error) -> Error {
    if e.kind() == ErrorKind::UnexpectedEof {
        Error::Disconnected
    } else {
        Error::Io(e)
    }
}
