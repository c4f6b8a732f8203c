use std::io::Write;
use std::net::{Shutdown, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::error::{Error, Result};
use crate::event::{Event, write_tagged_string};

/// Outbound half of a connection to the controller.
pub trait Transport: Write + Send {
    /// Closes the transport, waking up any reader of the other half.
    fn close(&mut self) {}
}

impl Transport for TcpStream {
    fn close(&mut self) {
        let _ = self.shutdown(Shutdown::Both);
    }
}

/// In-memory transport recording every byte written.
#[derive(Debug, Clone, Default)]
pub struct MemoryTransport {
    buf: Arc<Mutex<Vec<u8>>>,
}

impl MemoryTransport {
    /// Returns and clears the bytes written so far.
    pub fn take(&self) -> Vec<u8> {
        std::mem::take(&mut *self.buf.lock().unwrap_or_else(PoisonError::into_inner))
    }
}

impl Write for MemoryTransport {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.buf
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

impl Transport for MemoryTransport {}

/// Send-serialized channel to the controller.
///
/// The inner mutex is the only path to the wire, so frames are never
/// interleaved. Once detached (explicitly or after a send failure), every
/// send is rejected with [Error::Detached].
pub struct Channel {
    transport: Mutex<Option<Box<dyn Transport>>>,
    detached: AtomicBool,
}

impl Default for Channel {
    fn default() -> Self {
        Self::disconnected()
    }
}

impl Channel {
    /// Creates a channel writing into the given transport.
    pub fn new(transport: impl Transport + 'static) -> Self {
        Self {
            transport: Mutex::new(Some(Box::new(transport))),
            detached: AtomicBool::new(false),
        }
    }

    /// Creates a detached channel without transport.
    pub fn disconnected() -> Self {
        Self {
            transport: Mutex::new(None),
            detached: AtomicBool::new(true),
        }
    }

    /// Replaces the transport of this channel and marks it attached.
    ///
    /// The session identifier is sent first, before any other sender can
    /// write to the new transport.
    pub fn attach(&self, transport: impl Transport + 'static, debug_id: &str) -> Result<()> {
        let mut handshake = Vec::with_capacity(debug_id.len() + 5);
        write_tagged_string(&mut handshake, Some(debug_id))?;

        let mut guard = self.lock();

        if let Some(mut old) = guard.replace(Box::new(transport)) {
            old.close();
        }

        self.write_frame(&mut guard, &handshake)?;
        self.detached.store(false, Ordering::SeqCst);

        Ok(())
    }

    /// Returns whether no frame can be sent anymore.
    pub fn is_detached(&self) -> bool {
        self.detached.load(Ordering::SeqCst)
    }

    /// Sends the given event.
    pub fn send(&self, event: &Event) -> Result<()> {
        let mut guard = self.lock();
        self.send_locked(&mut guard, event)
    }

    /// Sends the event produced by the given closure, if any.
    ///
    /// The closure runs while the send lock is held, which makes
    /// check-and-clear sequences atomic with respect to other senders.
    pub fn send_with<F>(&self, f: F) -> Result<()>
    where
        F: FnOnce() -> Option<Event>,
    {
        let mut guard = self.lock();

        match f() {
            Some(event) => self.send_locked(&mut guard, &event),
            None => Ok(()),
        }
    }

    /// Sends `DETC` and marks the channel detached.
    ///
    /// The transport is closed afterwards. Detaching an already detached
    /// channel does nothing.
    pub fn detach(&self) {
        let mut guard = self.lock();

        if self.is_detached() {
            return;
        }

        if let Err(e) = self.send_locked(&mut guard, &Event::Detached) {
            tracing::debug!(error = %e, "failed to notify detach");
        }

        self.detached.store(true, Ordering::SeqCst);

        if let Some(mut transport) = guard.take() {
            transport.close();
        }
    }

    /// Marks the channel detached and closes the transport, without notifying
    /// the peer.
    pub fn close(&self) {
        let mut guard = self.lock();

        self.detached.store(true, Ordering::SeqCst);

        if let Some(mut transport) = guard.take() {
            transport.close();
        }
    }

    fn send_locked(
        &self,
        guard: &mut MutexGuard<'_, Option<Box<dyn Transport>>>,
        event: &Event,
    ) -> Result<()> {
        if self.is_detached() {
            return Err(Error::Detached);
        }

        tracing::trace!(tag = ?event.tag(), "send");

        self.write_frame(guard, &event.encode())
    }

    fn write_frame(
        &self,
        guard: &mut MutexGuard<'_, Option<Box<dyn Transport>>>,
        frame: &[u8],
    ) -> Result<()> {
        let Some(transport) = guard.as_mut() else {
            return Err(Error::Detached);
        };

        let res = transport.write_all(frame).and_then(|_| transport.flush());

        if let Err(e) = res {
            tracing::warn!(error = %e, "send failed, detaching channel");

            self.detached.store(true, Ordering::SeqCst);

            if let Some(mut transport) = guard.take() {
                transport.close();
            }

            return Err(e.into());
        }

        Ok(())
    }

    fn lock(&self) -> MutexGuard<'_, Option<Box<dyn Transport>>> {
        self.transport
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}
