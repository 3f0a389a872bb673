//! # embassy-net Network Shim
//!
//! [`TcpNetwork`] adapts a fixed set of `embassy-net` TCP sockets to the
//! non-blocking [`NetworkBsp`] contract. The socket futures are polled exactly
//! once with a no-op waker: a ready future is a finished operation, a pending
//! one means "would block" and the dispatcher finds out about progress through
//! [`NetworkBsp::select`] on its next step.

use core::future::Future;
use core::pin::pin;
use core::task::{Context, Poll};

use embassy_net::tcp::{Error as TcpError, State, TcpSocket};
use embassy_net::{IpAddress, IpEndpoint, Ipv4Address};
use embedded_io_async::{Error as _, ErrorKind};
use futures::task::noop_waker_ref;

use crate::bsp::{Interest, NetError, NetworkBsp, Readiness, SocketHandle, Watch};

fn poll_once<F: Future>(fut: F) -> Poll<F::Output> {
    let mut fut = pin!(fut);
    let mut cx = Context::from_waker(noop_waker_ref());
    fut.as_mut().poll(&mut cx)
}

fn connecting(socket: &TcpSocket<'_>) -> bool {
    matches!(socket.state(), State::SynSent | State::SynReceived)
}

/// The peer finished sending; reads report end of stream.
fn peer_closed(socket: &TcpSocket<'_>) -> bool {
    !socket.may_recv() && !connecting(socket)
}

fn net_error(err: TcpError) -> NetError {
    match err.kind() {
        ErrorKind::ConnectionReset | ErrorKind::ConnectionAborted | ErrorKind::BrokenPipe => {
            NetError::ConnectionReset
        }
        _ => NetError::Failed,
    }
}

struct Slot<'a> {
    socket: TcpSocket<'a>,
    in_use: bool,
}

/// `N` pre-built sockets handed out by [`NetworkBsp::create_socket`].
pub struct TcpNetwork<'a, const N: usize> {
    slots: [Slot<'a>; N],
}

impl<'a, const N: usize> TcpNetwork<'a, N> {
    pub fn new(sockets: [TcpSocket<'a>; N]) -> Self {
        Self {
            slots: sockets.map(|socket| Slot { socket, in_use: false }),
        }
    }

    fn socket(&mut self, handle: SocketHandle) -> Result<&mut TcpSocket<'a>, NetError> {
        match self.slots.get_mut(handle.0 as usize) {
            Some(slot) if slot.in_use => Ok(&mut slot.socket),
            _ => Err(NetError::NoSocket),
        }
    }
}

impl<const N: usize> NetworkBsp for TcpNetwork<'_, N> {
    fn create_socket(&mut self) -> Result<SocketHandle, NetError> {
        let index = self
            .slots
            .iter()
            .position(|slot| !slot.in_use)
            .ok_or(NetError::NoSocket)?;
        let slot = &mut self.slots[index];
        if slot.socket.state() != State::Closed {
            // Still lingering from a previous connection.
            slot.socket.abort();
        }
        slot.in_use = true;
        Ok(SocketHandle(index as u8))
    }

    fn connect(&mut self, handle: SocketHandle, host: &str, port: u16) -> Result<(), NetError> {
        let addr: Ipv4Address = host.parse().map_err(|_| NetError::InvalidAddress)?;
        let endpoint = IpEndpoint::new(IpAddress::Ipv4(addr), port);
        let socket = self.socket(handle)?;
        match poll_once(socket.connect(endpoint)) {
            Poll::Ready(Ok(())) => Ok(()),
            Poll::Ready(Err(_)) => {
                debug!("tcp connect failed");
                Err(NetError::Failed)
            }
            Poll::Pending => Err(NetError::InProgress),
        }
    }

    fn connection_check(&mut self, handle: SocketHandle) -> Result<(), NetError> {
        match self.socket(handle)?.state() {
            State::Established => Ok(()),
            State::SynSent | State::SynReceived => Err(NetError::InProgress),
            _ => Err(NetError::ConnectionReset),
        }
    }

    fn write(&mut self, handle: SocketHandle, buf: &[u8]) -> Result<usize, NetError> {
        let socket = self.socket(handle)?;
        if !socket.can_send() {
            return Err(NetError::Busy);
        }
        match poll_once(socket.write(buf)) {
            Poll::Ready(Ok(n)) => Ok(n),
            Poll::Ready(Err(err)) => Err(net_error(err)),
            Poll::Pending => Err(NetError::Busy),
        }
    }

    fn read(&mut self, handle: SocketHandle, buf: &mut [u8]) -> Result<usize, NetError> {
        let socket = self.socket(handle)?;
        if !socket.can_recv() {
            return if peer_closed(socket) { Ok(0) } else { Err(NetError::Busy) };
        }
        match poll_once(socket.read(buf)) {
            Poll::Ready(Ok(n)) => Ok(n),
            Poll::Ready(Err(err)) => Err(net_error(err)),
            Poll::Pending => Err(NetError::Busy),
        }
    }

    fn close(&mut self, handle: SocketHandle) {
        if let Some(slot) = self.slots.get_mut(handle.0 as usize) {
            slot.socket.close();
            slot.in_use = false;
        }
    }

    fn select(&mut self, watches: &mut [Watch]) -> Result<usize, NetError> {
        let mut ready = 0;
        for watch in watches.iter_mut() {
            let Ok(socket) = self.socket(watch.socket) else {
                continue;
            };
            let hit = match watch.interest {
                Interest::Read => socket.can_recv() || peer_closed(socket),
                Interest::Write => socket.can_send(),
                Interest::Connect => !connecting(socket),
            };
            if hit {
                watch.readiness = Readiness::Ready;
                ready += 1;
            }
        }
        Ok(ready)
    }
}
