use std::io::{Read, Write};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

use crate::error::{Error, Result};
use crate::request::{map_eof, read_bytes, read_count, read_i32};
use crate::tag::OutboundTag;

const ASCII_PREFIX: u8 = b'A';
const UNICODE_PREFIX: u8 = b'U';
const NONE_PREFIX: u8 = b'N';

/// Marshalled value, as sent over the wire.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct WireObject {
    /// Safe `repr` of the value.
    pub repr: Option<String>,
    /// Hexadecimal representation, if the value has one.
    pub hex_repr: Option<String>,
    /// Type name of the value.
    pub type_name: Option<String>,
    /// Whether the value has children worth enumerating.
    pub expandable: bool,
}

/// Frame of a thread stack, innermost first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameInfo {
    /// First line of the frame's code.
    pub first_line: i32,
    /// Last line of the frame's code.
    pub last_line: i32,
    /// Line being executed.
    pub cur_line: i32,
    /// Code name (function name or `<module>`).
    pub name: String,
    /// Absolute source filename.
    pub filename: String,
    /// Number of positional arguments.
    pub arg_count: i32,
    /// Variables visible in the frame.
    pub variables: Vec<(String, WireObject)>,
}

/// Event sent by the debuggee to the controller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// A break-all request was honored by the given thread.
    AsyncBreakComplete {
        /// Thread identifier.
        tid: i32,
    },

    /// Result of a set-line-number request.
    SetLineResult {
        /// Whether the line was changed.
        success: bool,
        /// Thread identifier.
        tid: i32,
        /// Resulting line number.
        line: i32,
    },

    /// Stack of a thread about to block.
    ThreadFrames {
        /// Thread identifier.
        tid: i32,
        /// Frames, innermost first.
        frames: Vec<FrameInfo>,
    },

    /// The debugger detached.
    Detached,

    /// A thread was created.
    NewThread {
        /// Thread identifier.
        tid: i32,
    },

    /// A thread exited.
    ThreadExited {
        /// Thread identifier.
        tid: i32,
    },

    /// The process is exiting.
    ProcessExited {
        /// Exit code.
        code: i32,
    },

    /// An exception is being raised and the thread blocks.
    ExceptionRaised {
        /// Qualified exception type name.
        name: String,
        /// Thread identifier.
        tid: i32,
        /// Formatted traceback.
        text: String,
    },

    /// A module was loaded.
    ModuleLoaded {
        /// Module identifier.
        id: i32,
        /// Absolute source filename.
        filename: String,
    },

    /// A step finished and the thread blocks.
    StepDone {
        /// Thread identifier.
        tid: i32,
    },

    /// A breakpoint was bound.
    BreakpointBound {
        /// Breakpoint identifier.
        id: i32,
    },

    /// A breakpoint could not be bound yet.
    BreakpointFailed {
        /// Breakpoint identifier.
        id: i32,
    },

    /// A breakpoint was hit and the thread blocks.
    BreakpointHit {
        /// Breakpoint identifier.
        id: i32,
        /// Thread identifier.
        tid: i32,
    },

    /// The process is loaded and the thread blocks.
    ProcessLoaded {
        /// Thread identifier.
        tid: i32,
    },

    /// An evaluation failed.
    ExecutionError {
        /// Evaluation identifier.
        eval_id: i32,
        /// Error text.
        text: String,
    },

    /// An evaluation succeeded.
    ExecutionResult {
        /// Evaluation identifier.
        eval_id: i32,
        /// Resulting value.
        object: WireObject,
    },

    /// Children of an evaluated value.
    Children {
        /// Evaluation identifier.
        eval_id: i32,
        /// Children are indexed (`[key]` names).
        is_index: bool,
        /// Children come from an enumeration.
        is_enumerate: bool,
        /// Named children.
        children: Vec<(String, WireObject)>,
    },

    /// Output written by a thread.
    Output {
        /// Thread identifier.
        tid: i32,
        /// Text written.
        text: String,
    },

    /// The exception handlers of a file are needed.
    RequestHandlers {
        /// Source filename.
        filename: String,
    },
}

impl Event {
    /// Returns the tag of this event.
    pub fn tag(&self) -> OutboundTag {
        match self {
            Self::AsyncBreakComplete { .. } => OutboundTag::Asbr,
            Self::SetLineResult { .. } => OutboundTag::Setl,
            Self::ThreadFrames { .. } => OutboundTag::Thrf,
            Self::Detached => OutboundTag::Detc,
            Self::NewThread { .. } => OutboundTag::Newt,
            Self::ThreadExited { .. } => OutboundTag::Extt,
            Self::ProcessExited { .. } => OutboundTag::Exit,
            Self::ExceptionRaised { .. } => OutboundTag::Excp,
            Self::ModuleLoaded { .. } => OutboundTag::Modl,
            Self::StepDone { .. } => OutboundTag::Stpd,
            Self::BreakpointBound { .. } => OutboundTag::Brks,
            Self::BreakpointFailed { .. } => OutboundTag::Brkf,
            Self::BreakpointHit { .. } => OutboundTag::Brkh,
            Self::ProcessLoaded { .. } => OutboundTag::Load,
            Self::ExecutionError { .. } => OutboundTag::Exce,
            Self::ExecutionResult { .. } => OutboundTag::Excr,
            Self::Children { .. } => OutboundTag::Chld,
            Self::Output { .. } => OutboundTag::Outp,
            Self::RequestHandlers { .. } => OutboundTag::Reqh,
        }
    }

    /// Encodes this event as a complete frame.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(32);
        buf.extend_from_slice(self.tag().as_bytes());

        match self {
            Self::AsyncBreakComplete { tid }
            | Self::NewThread { tid }
            | Self::ThreadExited { tid }
            | Self::StepDone { tid }
            | Self::ProcessLoaded { tid } => put_i32(&mut buf, *tid),
            Self::ProcessExited { code } => put_i32(&mut buf, *code),
            Self::BreakpointBound { id } | Self::BreakpointFailed { id } => put_i32(&mut buf, *id),
            Self::Detached => {}
            Self::SetLineResult { success, tid, line } => {
                put_i32(&mut buf, i32::from(*success));
                put_i32(&mut buf, *tid);
                put_i32(&mut buf, *line);
            }
            Self::ThreadFrames { tid, frames } => {
                put_i32(&mut buf, *tid);
                put_len(&mut buf, frames.len());

                for frame in frames {
                    put_i32(&mut buf, frame.first_line);
                    put_i32(&mut buf, frame.last_line);
                    put_i32(&mut buf, frame.cur_line);
                    put_str(&mut buf, Some(&frame.name));
                    put_str(&mut buf, Some(&frame.filename));
                    put_i32(&mut buf, frame.arg_count);
                    put_len(&mut buf, frame.variables.len());

                    for (name, object) in &frame.variables {
                        put_str(&mut buf, Some(name));
                        put_object(&mut buf, object);
                    }
                }
            }
            Self::ExceptionRaised { name, tid, text } => {
                put_str(&mut buf, Some(name));
                put_i32(&mut buf, *tid);
                put_str(&mut buf, Some(text));
            }
            Self::ModuleLoaded { id, filename } => {
                put_i32(&mut buf, *id);
                put_str(&mut buf, Some(filename));
            }
            Self::BreakpointHit { id, tid } => {
                put_i32(&mut buf, *id);
                put_i32(&mut buf, *tid);
            }
            Self::ExecutionError { eval_id, text } => {
                put_i32(&mut buf, *eval_id);
                put_str(&mut buf, Some(text));
            }
            Self::ExecutionResult { eval_id, object } => {
                put_i32(&mut buf, *eval_id);
                put_object(&mut buf, object);
            }
            Self::Children {
                eval_id,
                is_index,
                is_enumerate,
                children,
            } => {
                put_i32(&mut buf, *eval_id);
                put_len(&mut buf, children.len());
                put_i32(&mut buf, i32::from(*is_index));
                put_i32(&mut buf, i32::from(*is_enumerate));

                for (name, object) in children {
                    put_str(&mut buf, Some(name));
                    put_object(&mut buf, object);
                }
            }
            Self::Output { tid, text } => {
                put_i32(&mut buf, *tid);
                put_str(&mut buf, Some(text));
            }
            Self::RequestHandlers { filename } => put_str(&mut buf, Some(filename)),
        }

        buf
    }
}

impl Event {
    /// Reads the next event from the given reader.
    ///
    /// This is the controller side of [Event::encode].
    pub fn read_from<R: Read>(reader: &mut R) -> Result<Self> {
        let mut raw_tag = [0u8; 4];
        reader.read_exact(&mut raw_tag).map_err(map_eof)?;

        let tag = OutboundTag::from_bytes(&raw_tag).ok_or(Error::UnknownCommand(raw_tag))?;

        let event = match tag {
            OutboundTag::Asbr => Self::AsyncBreakComplete {
                tid: read_i32(reader)?,
            },
            OutboundTag::Setl => Self::SetLineResult {
                success: read_i32(reader)? != 0,
                tid: read_i32(reader)?,
                line: read_i32(reader)?,
            },
            OutboundTag::Thrf => {
                let tid = read_i32(reader)?;
                let count = read_count(reader)?;

                let mut frames = Vec::with_capacity(count.min(256));
                for _ in 0..count {
                    let first_line = read_i32(reader)?;
                    let last_line = read_i32(reader)?;
                    let cur_line = read_i32(reader)?;
                    let name = read_required_string(reader)?;
                    let filename = read_required_string(reader)?;
                    let arg_count = read_i32(reader)?;
                    let variable_count = read_count(reader)?;
                    let variables = read_named_objects(reader, variable_count)?;

                    frames.push(FrameInfo {
                        first_line,
                        last_line,
                        cur_line,
                        name,
                        filename,
                        arg_count,
                        variables,
                    });
                }

                Self::ThreadFrames { tid, frames }
            }
            OutboundTag::Detc => Self::Detached,
            OutboundTag::Newt => Self::NewThread {
                tid: read_i32(reader)?,
            },
            OutboundTag::Extt => Self::ThreadExited {
                tid: read_i32(reader)?,
            },
            OutboundTag::Exit => Self::ProcessExited {
                code: read_i32(reader)?,
            },
            OutboundTag::Excp => Self::ExceptionRaised {
                name: read_required_string(reader)?,
                tid: read_i32(reader)?,
                text: read_required_string(reader)?,
            },
            OutboundTag::Modl => Self::ModuleLoaded {
                id: read_i32(reader)?,
                filename: read_required_string(reader)?,
            },
            OutboundTag::Stpd => Self::StepDone {
                tid: read_i32(reader)?,
            },
            OutboundTag::Brks => Self::BreakpointBound {
                id: read_i32(reader)?,
            },
            OutboundTag::Brkf => Self::BreakpointFailed {
                id: read_i32(reader)?,
            },
            OutboundTag::Brkh => Self::BreakpointHit {
                id: read_i32(reader)?,
                tid: read_i32(reader)?,
            },
            OutboundTag::Load => Self::ProcessLoaded {
                tid: read_i32(reader)?,
            },
            OutboundTag::Exce => Self::ExecutionError {
                eval_id: read_i32(reader)?,
                text: read_required_string(reader)?,
            },
            OutboundTag::Excr => Self::ExecutionResult {
                eval_id: read_i32(reader)?,
                object: read_object(reader)?,
            },
            OutboundTag::Chld => {
                let eval_id = read_i32(reader)?;
                let count = read_count(reader)?;
                let is_index = read_i32(reader)? != 0;
                let is_enumerate = read_i32(reader)? != 0;

                Self::Children {
                    eval_id,
                    is_index,
                    is_enumerate,
                    children: read_named_objects(reader, count)?,
                }
            }
            OutboundTag::Outp => Self::Output {
                tid: read_i32(reader)?,
                text: read_required_string(reader)?,
            },
            OutboundTag::Reqh => Self::RequestHandlers {
                filename: read_required_string(reader)?,
            },
        };

        Ok(event)
    }
}

/// Reads a tagged string (outbound encoding).
pub fn read_tagged_string<R: Read>(reader: &mut R) -> Result<Option<String>> {
    match reader.read_u8().map_err(map_eof)? {
        NONE_PREFIX => Ok(None),
        ASCII_PREFIX | UNICODE_PREFIX => {
            let len = read_count(reader)?;
            let bytes = read_bytes(reader, len)?;

            Ok(Some(String::from_utf8(bytes)?))
        }
        prefix => Err(Error::InvalidStringTag(prefix)),
    }
}

fn read_required_string<R: Read>(reader: &mut R) -> Result<String> {
    Ok(read_tagged_string(reader)?.unwrap_or_default())
}

fn read_object<R: Read>(reader: &mut R) -> Result<WireObject> {
    Ok(WireObject {
        repr: read_tagged_string(reader)?,
        hex_repr: read_tagged_string(reader)?,
        type_name: read_tagged_string(reader)?,
        expandable: reader.read_i32::<LittleEndian>().map_err(map_eof)? != 0,
    })
}

fn read_named_objects<R: Read>(reader: &mut R, count: usize) -> Result<Vec<(String, WireObject)>> {
    let mut objects = Vec::with_capacity(count.min(1024));
    for _ in 0..count {
        let name = read_required_string(reader)?;
        objects.push((name, read_object(reader)?));
    }
    Ok(objects)
}

/// Writes a tagged string (outbound encoding).
///
/// `None` is written as the `N` tag alone, ASCII content uses the `A` tag and
/// anything else the `U` tag.
pub fn write_tagged_string<W: Write>(writer: &mut W, value: Option<&str>) -> std::io::Result<()> {
    let Some(value) = value else {
        return writer.write_u8(NONE_PREFIX);
    };

    let prefix = if value.is_ascii() {
        ASCII_PREFIX
    } else {
        UNICODE_PREFIX
    };

    writer.write_u8(prefix)?;
    writer.write_i32::<LittleEndian>(clamp_len(value.len()))?;
    writer.write_all(value.as_bytes())
}

fn put_i32(buf: &mut Vec<u8>, value: i32) {
    buf.extend_from_slice(&value.to_le_bytes());
}

fn put_len(buf: &mut Vec<u8>, len: usize) {
    put_i32(buf, clamp_len(len));
}

fn put_str(buf: &mut Vec<u8>, value: Option<&str>) {
    // writes into a Vec never fail
    let _ = write_tagged_string(buf, value);
}

fn put_object(buf: &mut Vec<u8>, object: &WireObject) {
    put_str(buf, object.repr.as_deref());
    put_str(buf, object.hex_repr.as_deref());
    put_str(buf, object.type_name.as_deref());
    put_i32(buf, i32::from(object.expandable));
}

fn clamp_len(len: usize) -> i32 {
    i32::try_from(len).unwrap_or(i32::MAX)
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::{Event, FrameInfo, WireObject, write_tagged_string};

    #[test_log::test]
    fn tagged_strings() {
        let mut buf = Vec::new();
        write_tagged_string(&mut buf, None).unwrap();
        write_tagged_string(&mut buf, Some("ab")).unwrap();
        write_tagged_string(&mut buf, Some("é")).unwrap();

        assert_eq!(
            buf,
            [b'N', b'A', 2, 0, 0, 0, b'a', b'b', b'U', 2, 0, 0, 0, 0xc3, 0xa9]
        );
    }

    #[test_log::test]
    fn execution_result_layout() {
        let event = Event::ExecutionResult {
            eval_id: 42,
            object: WireObject {
                repr: Some("3".into()),
                hex_repr: Some("0x3".into()),
                type_name: Some("int".into()),
                expandable: false,
            },
        };

        let mut expected = b"EXCR".to_vec();
        expected.extend_from_slice(&42i32.to_le_bytes());
        expected.extend_from_slice(b"A\x01\x00\x00\x003");
        expected.extend_from_slice(b"A\x03\x00\x00\x000x3");
        expected.extend_from_slice(b"A\x03\x00\x00\x00int");
        expected.extend_from_slice(&0i32.to_le_bytes());

        assert_eq!(event.encode(), expected);
    }

    #[test_log::test]
    fn children_header_precedes_entries() {
        let event = Event::Children {
            eval_id: 1,
            is_index: true,
            is_enumerate: false,
            children: vec![("[0]".into(), WireObject::default())],
        };

        let buf = event.encode();

        assert_eq!(&buf[..4], b"CHLD");
        assert_eq!(&buf[4..8], &1i32.to_le_bytes());
        assert_eq!(&buf[8..12], &1i32.to_le_bytes());
        assert_eq!(&buf[12..16], &1i32.to_le_bytes());
        assert_eq!(&buf[16..20], &0i32.to_le_bytes());
        assert_eq!(&buf[20..28], b"A\x03\x00\x00\x00[0]");
        // none repr, none hex, none type, not expandable
        assert_eq!(&buf[28..], b"NNN\x00\x00\x00\x00");
    }

    #[test_log::test]
    fn detached_has_no_payload() {
        assert_eq!(Event::Detached.encode(), b"DETC");
    }

    #[test_log::test]
    fn decode_thread_frames() {
        let event = Event::ThreadFrames {
            tid: 3,
            frames: vec![FrameInfo {
                first_line: 1,
                last_line: 9,
                cur_line: 4,
                name: "compute".into(),
                filename: "/src/main.py".into(),
                arg_count: 2,
                variables: vec![(
                    "total".into(),
                    WireObject {
                        repr: Some("12".into()),
                        hex_repr: Some("0xc".into()),
                        type_name: Some("int".into()),
                        expandable: false,
                    },
                )],
            }],
        };

        let mut cursor = Cursor::new(event.encode());

        assert_eq!(Event::read_from(&mut cursor).unwrap(), event);
        assert_eq!(cursor.position() as usize, cursor.get_ref().len());
    }
}
