//! Kernel hotplug events
//!
//! Listens on the `NETLINK_KOBJECT_UEVENT` socket for device uevents,
//! parses the `action@devpath` datagram format and forwards the events
//! the reconciler cares about (partition add/remove, input devices)
//! into an mpsc channel. The channel closing is the signal that the
//! monitor is gone, either through cancellation or a socket failure.

use std::os::unix::io::{AsRawFd, OwnedFd};

use nix::errno::Errno;
use nix::sys::socket::{
    bind, recv, socket, AddressFamily, MsgFlags, NetlinkAddr, SockFlag, SockProtocol, SockType,
};
use tokio::io::unix::AsyncFd;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::config::HOTPLUG_CHANNEL_CAPACITY;
use crate::error::{AppError, Result};

/// Netlink multicast group the kernel broadcasts uevents on
const KERNEL_EVENT_GROUP: u32 = 1;

/// Larger than the kernel's per-event buffer, one datagram per event
const UEVENT_BUFFER_SIZE: usize = 8192;

/// Kernel uevent action
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UeventAction {
    Add,
    Remove,
    Change,
    Move,
    Online,
    Offline,
    Bind,
    Unbind,
    Other,
}

impl UeventAction {
    fn parse(s: &str) -> Self {
        match s {
            "add" => Self::Add,
            "remove" => Self::Remove,
            "change" => Self::Change,
            "move" => Self::Move,
            "online" => Self::Online,
            "offline" => Self::Offline,
            "bind" => Self::Bind,
            "unbind" => Self::Unbind,
            _ => Self::Other,
        }
    }

    /// Get action name as string
    pub fn name_str(&self) -> &'static str {
        match self {
            Self::Add => "add",
            Self::Remove => "remove",
            Self::Change => "change",
            Self::Move => "move",
            Self::Online => "online",
            Self::Offline => "offline",
            Self::Bind => "bind",
            Self::Unbind => "unbind",
            Self::Other => "other",
        }
    }
}

/// One parsed kernel uevent
#[derive(Debug, Clone)]
pub struct Uevent {
    pub action: UeventAction,
    pub devpath: String,
    pub subsystem: Option<String>,
    pub devtype: Option<String>,
    pub devname: Option<String>,
}

impl Uevent {
    /// Parse one netlink datagram.
    ///
    /// Kernel uevents are an `action@devpath` header followed by
    /// NUL-separated `KEY=VALUE` properties. Returns `None` for
    /// datagrams without that header (udev daemon traffic carries its
    /// own magic instead).
    pub fn parse(payload: &[u8]) -> Option<Self> {
        let mut segments = payload.split(|b| *b == 0);

        let header = match std::str::from_utf8(segments.next()?) {
            Ok(h) => h,
            Err(_) => return None,
        };
        let (action, devpath) = header.split_once('@')?;

        let mut event = Self {
            action: UeventAction::parse(action),
            devpath: devpath.to_string(),
            subsystem: None,
            devtype: None,
            devname: None,
        };

        for segment in segments {
            let segment = match std::str::from_utf8(segment) {
                Ok(s) => s,
                Err(_) => continue,
            };
            match segment.split_once('=') {
                Some(("SUBSYSTEM", value)) => event.subsystem = Some(value.to_string()),
                Some(("DEVTYPE", value)) => event.devtype = Some(value.to_string()),
                Some(("DEVNAME", value)) => event.devname = Some(value.to_string()),
                _ => {}
            }
        }

        Some(event)
    }

    /// Whether this event can change what the daemon exposes: partition
    /// block events and anything on the input subsystem.
    pub fn matches_watch(&self) -> bool {
        match self.subsystem.as_deref() {
            Some("block") => self.devtype.as_deref() == Some("partition"),
            Some("input") => true,
            _ => false,
        }
    }
}

/// Nonblocking netlink socket joined to the kernel uevent group
pub struct UeventSocket {
    fd: AsyncFd<OwnedFd>,
}

impl UeventSocket {
    /// Open and bind the uevent socket.
    ///
    /// Opened before the first device enumeration so nothing that
    /// happens between the initial scan and the monitored phase is
    /// missed.
    pub fn open() -> Result<Self> {
        let sock = socket(
            AddressFamily::Netlink,
            SockType::Raw,
            SockFlag::SOCK_NONBLOCK | SockFlag::SOCK_CLOEXEC,
            SockProtocol::NetlinkKObjectUEvent,
        )
        .map_err(|e| AppError::Hotplug(format!("Failed to open uevent socket: {}", e)))?;

        bind(sock.as_raw_fd(), &NetlinkAddr::new(0, KERNEL_EVENT_GROUP))
            .map_err(|e| AppError::Hotplug(format!("Failed to bind uevent socket: {}", e)))?;

        let fd = AsyncFd::new(sock)
            .map_err(|e| AppError::Hotplug(format!("Failed to register uevent socket: {}", e)))?;

        Ok(Self { fd })
    }

    /// Receive one raw uevent datagram
    pub async fn recv_event(&self) -> Result<Vec<u8>> {
        loop {
            let mut guard = self
                .fd
                .readable()
                .await
                .map_err(|e| AppError::Hotplug(format!("uevent socket wait failed: {}", e)))?;

            let result = guard.try_io(|inner| {
                let mut buf = vec![0u8; UEVENT_BUFFER_SIZE];
                let len = recv(inner.get_ref().as_raw_fd(), &mut buf, MsgFlags::empty())
                    .map_err(std::io::Error::from)?;
                buf.truncate(len);
                Ok(buf)
            });

            match result {
                Ok(Ok(payload)) => return Ok(payload),
                Ok(Err(e)) => {
                    // Queue overflow drops events but the queued ones
                    // still wake the reconciler, which rescans anyway
                    if e.raw_os_error() == Some(Errno::ENOBUFS as i32) {
                        warn!("uevent socket overflowed, kernel dropped events");
                        continue;
                    }
                    if e.kind() == std::io::ErrorKind::Interrupted {
                        continue;
                    }
                    return Err(AppError::Hotplug(format!("uevent recv failed: {}", e)));
                }
                // Readiness was stale, wait again
                Err(_would_block) => continue,
            }
        }
    }
}

/// Forwards watched uevents from the kernel socket into a channel
pub struct HotplugMonitor;

impl HotplugMonitor {
    /// Open the uevent socket and start the forwarding task
    pub fn spawn(cancel: CancellationToken) -> Result<mpsc::Receiver<Uevent>> {
        let socket = UeventSocket::open()?;
        Ok(Self::spawn_with_socket(socket, cancel))
    }

    fn spawn_with_socket(socket: UeventSocket, cancel: CancellationToken) -> mpsc::Receiver<Uevent> {
        let (tx, rx) = mpsc::channel(HOTPLUG_CHANNEL_CAPACITY);

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        debug!("Hotplug monitor cancelled");
                        break;
                    }
                    result = socket.recv_event() => {
                        let payload = match result {
                            Ok(payload) => payload,
                            Err(e) => {
                                warn!("Hotplug monitor stopped: {}", e);
                                break;
                            }
                        };

                        let event = match Uevent::parse(&payload) {
                            Some(event) => event,
                            None => continue,
                        };

                        if !event.matches_watch() {
                            continue;
                        }

                        debug!(
                            "uevent: {} {} ({})",
                            event.action.name_str(),
                            event.devpath,
                            event.subsystem.as_deref().unwrap_or("?")
                        );
                        if tx.send(event).await.is_err() {
                            break;
                        }
                    }
                }
            }
        });

        rx
    }
}
