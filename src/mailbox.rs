// Copyright (c) 2018 Nuclear Furnace
//
// Permission is hereby granted, free of charge, to any person obtaining a copy
// of this software and associated documentation files (the "Software"), to deal
// in the Software without restriction, including without limitation the rights
// to use, copy, modify, merge, publish, distribute, sublicense, and/or sell
// copies of the Software, and to permit persons to whom the Software is
// furnished to do so, subject to the following conditions:
//
// The above copyright notice and this permission notice shall be included in all
// copies or substantial portions of the Software.
//
// THE SOFTWARE IS PROVIDED "AS IS", WITHOUT WARRANTY OF ANY KIND, EXPRESS OR
// IMPLIED, INCLUDING BUT NOT LIMITED TO THE WARRANTIES OF MERCHANTABILITY,
// FITNESS FOR A PARTICULAR PURPOSE AND NONINFRINGEMENT. IN NO EVENT SHALL THE
// AUTHORS OR COPYRIGHT HOLDERS BE LIABLE FOR ANY CLAIM, DAMAGES OR OTHER
// LIABILITY, WHETHER IN AN ACTION OF CONTRACT, TORT OR OTHERWISE, ARISING FROM,
// OUT OF OR IN CONNECTION WITH THE SOFTWARE OR THE USE OR OTHER DEALINGS IN THE
// SOFTWARE.

//! The generic bounded channel that both the mailbox downlink (router to endpoint) and the
//! router-queue uplink (endpoint to router) are built from.
//!
//! A channel is a connected pair of `SOCK_DGRAM` Unix sockets. Datagram sockets preserve message
//! boundaries (one `send` is one `recv`, never coalesced or split), which is what lets us
//! serialize one `T` per packet without a length-prefix framer. The send-buffer size doubles as
//! the channel's bound: once the kernel's socket buffer is full, a `try_send` fails with
//! `EWOULDBLOCK`/`ENOBUFS` rather than blocking, which is exactly the "mailbox full" signal the
//! supervision layer needs to detect a stuck worker instead of wedging the router against it.
//!
//! A `tokio::net::UnixDatagram` is bound to the reactor of whichever runtime was active when it
//! was built; that registration does not follow the fd across `fork()`, only the fd itself does.
//! So a pair destined to cross a `fork()` boundary is built as plain `std` sockets via
//! [`raw_pair`] *before* forking, and each side is only turned into the tokio-backed
//! [`ChannelWriter`]/[`Mailbox`] afterwards, via [`writer_from_std`]/[`mailbox_from_std`], called
//! from inside whichever runtime (parent's or the freshly forked child's own) will actually drive
//! it. [`channel_pair`] is the shortcut for the common case where a pair never crosses a fork at
//! all — both ends get bound into the caller's current runtime immediately.

use std::io;
use std::marker::PhantomData;
use std::os::unix::io::AsRawFd;
use std::os::unix::net::UnixDatagram as StdUnixDatagram;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::net::UnixDatagram;

/// Largest single envelope we'll put on the wire. Generous enough for any reasonable `CALL`
/// payload; a datagram larger than the socket's receive buffer is silently truncated by the
/// kernel, so this also bounds what callers may serialize into one message.
const MAX_DATAGRAM_SIZE: usize = 64 * 1024;

fn tune_send_buffer<S: AsRawFd>(sock: &S, bytes: i32) -> io::Result<()> {
    let fd = sock.as_raw_fd();
    let ret = unsafe {
        libc::setsockopt(
            fd,
            libc::SOL_SOCKET,
            libc::SO_SNDBUF,
            &bytes as *const i32 as *const libc::c_void,
            std::mem::size_of::<i32>() as libc::socklen_t,
        )
    };
    if ret != 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

/// Creates a connected pair of plain (non-tokio) datagram sockets, tuned to `capacity_bytes` and
/// set non-blocking. Carries no reactor registration, so it's safe to build before `fork()`: each
/// half is later bound into whichever runtime actually ends up driving it via
/// [`writer_from_std`]/[`mailbox_from_std`].
pub fn raw_pair(capacity_bytes: i32) -> io::Result<(StdUnixDatagram, StdUnixDatagram)> {
    let (a, b) = StdUnixDatagram::pair()?;
    a.set_nonblocking(true)?;
    b.set_nonblocking(true)?;
    tune_send_buffer(&a, capacity_bytes)?;
    tune_send_buffer(&b, capacity_bytes)?;
    Ok((a, b))
}

/// Binds a raw socket as the sending half of a channel of `T`, registering it with whichever
/// tokio runtime is active on the calling thread right now. Must be called from inside that
/// runtime (e.g. the first thing a forked child does once its own `LocalSet`/`Runtime` is up).
pub fn writer_from_std<T>(sock: StdUnixDatagram) -> io::Result<ChannelWriter<T>>
where
    T: Serialize,
{
    let sock = UnixDatagram::from_std(sock)?;
    Ok(ChannelWriter {
        sock: Arc::new(sock),
        _marker: PhantomData,
    })
}

/// Binds a raw socket as the receiving half of a channel of `T`. As [`writer_from_std`], must be
/// called from inside the runtime that will actually drive `recv` on the result.
pub fn mailbox_from_std<T>(sock: StdUnixDatagram) -> io::Result<Mailbox<T>>
where
    T: DeserializeOwned,
{
    let sock = UnixDatagram::from_std(sock)?;
    Ok(Mailbox {
        sock,
        _marker: PhantomData,
    })
}

/// Creates a connected pair of channel endpoints for messages of type `T`, bound immediately into
/// the caller's current runtime. Only appropriate when the pair never crosses a `fork()`
/// boundary — for the case where one half is handed to a freshly forked child, build the pair
/// with [`raw_pair`] instead and bind each half after the fork.
pub fn channel_pair<T>(capacity_bytes: i32) -> io::Result<(ChannelWriter<T>, Mailbox<T>)>
where
    T: Serialize + DeserializeOwned,
{
    let (a, b) = raw_pair(capacity_bytes)?;
    Ok((writer_from_std(a)?, mailbox_from_std(b)?))
}

/// The sending half of a channel. Cheaply cloneable; every clone writes into the same underlying
/// socket, so many endpoints in one process may share a writer onto the router's uplink.
pub struct ChannelWriter<T> {
    sock: Arc<UnixDatagram>,
    _marker: PhantomData<fn(T)>,
}

impl<T> Clone for ChannelWriter<T> {
    fn clone(&self) -> Self {
        ChannelWriter {
            sock: Arc::clone(&self.sock),
            _marker: PhantomData,
        }
    }
}

impl<T> ChannelWriter<T>
where
    T: Serialize,
{
    /// Offers `value` onto the channel without blocking. A full kernel send buffer on the peer
    /// surfaces as `CallError::TransportFull`, which callers map onto whichever recipient name
    /// they were attempting to reach.
    pub fn try_send(&self, value: &T) -> Result<(), SendError> {
        let bytes = serde_json::to_vec(value).map_err(SendError::Encode)?;
        match self.sock.try_send(&bytes) {
            Ok(_) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Err(SendError::Full),
            Err(e) => match e.raw_os_error() {
                Some(libc::ENOBUFS) => Err(SendError::Full),
                _ => Err(SendError::Io(e)),
            },
        }
    }

    /// Waits until the channel is writable, then offers `value`. Used by callers who've decided
    /// to tolerate backpressure rather than treat a full mailbox as an error.
    pub async fn send(&self, value: &T) -> Result<(), SendError> {
        let bytes = serde_json::to_vec(value).map_err(SendError::Encode)?;
        loop {
            self.sock.writable().await.map_err(SendError::Io)?;
            match self.sock.try_send(&bytes) {
                Ok(_) => return Ok(()),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => continue,
                Err(e) => return Err(SendError::Io(e)),
            }
        }
    }
}

#[derive(Debug)]
pub enum SendError {
    /// The peer's receive buffer is saturated; the caller's definition of "full".
    Full,
    Encode(serde_json::Error),
    Io(io::Error),
}

/// The receiving half of a channel, read from a single-threaded async event loop.
pub struct Mailbox<T> {
    sock: UnixDatagram,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Mailbox<T>
where
    T: DeserializeOwned,
{
    /// Awaits the next message on this channel.
    pub async fn recv(&self) -> io::Result<T> {
        let mut buf = vec![0u8; MAX_DATAGRAM_SIZE];
        loop {
            self.sock.readable().await?;
            match self.sock.try_recv(&mut buf) {
                Ok(n) => {
                    return serde_json::from_slice(&buf[..n])
                        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e));
                },
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => continue,
                Err(e) => return Err(e),
            }
        }
    }
}
