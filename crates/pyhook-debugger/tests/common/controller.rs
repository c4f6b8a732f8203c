use std::io::Write;
use std::net::{Ipv4Addr, TcpListener, TcpStream};
use std::time::Duration;

use pyhook_proto::{Event, Request, read_tagged_string};

pub const DEBUG_ID: &str = "abc123";

const READ_TIMEOUT: Duration = Duration::from_secs(20);

/// Controller side of a debugging session.
pub struct Controller {
    stream: TcpStream,
    events: Vec<Event>,
}

pub fn listen() -> (TcpListener, u16) {
    let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).expect("bind");
    let port = listener.local_addr().expect("local_addr").port();
    (listener, port)
}

impl Controller {
    pub fn accept(listener: &TcpListener) -> Self {
        let (mut stream, _) = listener.accept().expect("accept");
        stream.set_read_timeout(Some(READ_TIMEOUT)).expect("timeout");

        let debug_id = read_tagged_string(&mut stream).expect("debug id");
        assert_eq!(debug_id.as_deref(), Some(DEBUG_ID));

        Self {
            stream,
            events: Vec::new(),
        }
    }

    pub fn send(&mut self, request: Request) {
        self.stream.write_all(&request.encode()).expect("send");
    }

    pub fn next_event(&mut self) -> Event {
        let event = Event::read_from(&mut self.stream).expect("event");
        tracing::debug!(?event, "received");
        self.events.push(event.clone());
        event
    }

    /// Reads events until one matches.
    pub fn wait_for<F>(&mut self, mut matches: F) -> Event
    where
        F: FnMut(&Event) -> bool,
    {
        loop {
            let event = self.next_event();
            if matches(&event) {
                return event;
            }
        }
    }

    /// Every event received so far.
    pub fn events(&self) -> &[Event] {
        &self.events
    }

    /// Output received so far, concatenated.
    pub fn output(&self) -> String {
        self.events
            .iter()
            .filter_map(|event| match event {
                Event::Output { text, .. } => Some(text.as_str()),
                _ => None,
            })
            .collect()
    }

    /// Stack sent by the given thread just before its last block.
    pub fn last_frames(&self, tid: i32) -> &[pyhook_proto::FrameInfo] {
        self.events
            .iter()
            .rev()
            .find_map(|event| match event {
                Event::ThreadFrames { tid: t, frames } if *t == tid => Some(frames.as_slice()),
                _ => None,
            })
            .expect("no frames received")
    }
}
