use std::io::{self, Write};
use std::sync::Arc;

use pyhook_proto::Event;

use crate::state::Shared;
use crate::thread::probe_stack;

/// Standard stream of the debuggee.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputStream {
    /// Standard output.
    Stdout,
    /// Standard error.
    Stderr,
}

/// Writer forwarding the debuggee output to the controller.
///
/// Every write is sent as `OUTP`, tagged with the writing thread, and also
/// written to the original stream.
pub struct DebuggerOutput {
    shared: Arc<Shared>,
    stream: OutputStream,
}

impl DebuggerOutput {
    pub(crate) fn new(shared: Arc<Shared>, stream: OutputStream) -> Self {
        Self { shared, stream }
    }
}

impl Write for DebuggerOutput {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if !self.shared.is_detached() {
            probe_stack(3);

            let tid = self.shared.threads.current().map_or(0, |t| t.id());

            self.shared.send(Event::Output {
                tid,
                text: String::from_utf8_lossy(buf).into_owned(),
            });
        }

        match self.stream {
            OutputStream::Stdout => io::stdout().write_all(buf)?,
            OutputStream::Stderr => io::stderr().write_all(buf)?,
        }

        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        match self.stream {
            OutputStream::Stdout => io::stdout().flush(),
            OutputStream::Stderr => io::stderr().flush(),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;
    use std::sync::Arc;

    use pyhook_proto::{Event, MemoryTransport};

    use super::{DebuggerOutput, OutputStream};
    use crate::runtime::tests::NullRuntime;
    use crate::state::{DebuggerConfig, Shared};
    use crate::thread::{Stepping, ThreadTracer};

    #[test]
    fn output_is_tagged_with_writing_thread() {
        let shared = Arc::new(Shared::new(Arc::new(NullRuntime), DebuggerConfig::default()));
        let transport = MemoryTransport::default();

        shared.channel.attach(transport.clone(), "test").unwrap();
        transport.take();

        let tracer = ThreadTracer::new(shared.clone(), Stepping::None, None);
        shared.threads.insert_with(tracer.clone(), |_| ());

        let mut output = DebuggerOutput::new(shared.clone(), OutputStream::Stderr);
        output.write_all(b"hello\n").unwrap();

        let bytes = transport.take();
        assert_eq!(
            Event::read_from(&mut bytes.as_slice()).unwrap(),
            Event::Output {
                tid: tracer.id(),
                text: "hello\n".into()
            }
        );

        shared.channel.close();
        output.write_all(b"ignored\n").unwrap();
        assert!(transport.take().is_empty());
    }
}
