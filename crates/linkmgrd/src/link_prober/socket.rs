//! Raw packet socket for heartbeat TX/RX.
//!
//! The production implementation owns an `AF_PACKET` socket bound to the
//! port's interface with a classic BPF program attached, so the kernel
//! only delivers ICMP echoes carrying the expected identifier and
//! heartbeat cookie. Reception runs as a spawned task that posts raw
//! frames onto the port's event channel; everything else about the socket
//! is touched only from the port's event loop.

use std::io;
use std::os::unix::io::{AsRawFd, RawFd};

use tokio::io::unix::AsyncFd;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::config::MuxPortConfig;
use crate::error::{LinkMgrError, LinkMgrResult};
use crate::link_prober::payload::{
    HARDWARE_COOKIE, ICMP_OFFSET, IPV4_OFFSET, MUX_MAX_ICMP_BUFFER_SIZE, PAYLOAD_OFFSET,
    SOFTWARE_COOKIE,
};
use crate::port_event::{PortEvent, PortSender};

/// Transport used by the prober; the production impl is
/// [`RawProbeSocket`], tests substitute an in-memory recorder.
pub trait ProbeSocket: Send {
    /// Open the socket, attach the receive filter and start reception.
    fn open(&mut self, config: &MuxPortConfig) -> LinkMgrResult<()>;

    /// Transmit one frame.
    fn send(&mut self, frame: &[u8]) -> LinkMgrResult<usize>;
}

// Classic BPF opcodes (linux/bpf_common.h).
const BPF_LD_H_ABS: u16 = 0x28;
const BPF_LD_W_ABS: u16 = 0x20;
const BPF_LD_B_ABS: u16 = 0x30;
const BPF_JMP_JEQ_K: u16 = 0x15;
const BPF_RET_K: u16 = 0x06;

const ETHERTYPE_IPV4: u32 = 0x0800;
const IP_PROTO_ICMP: u32 = 1;

fn bpf_stmt(code: u16, k: u32) -> libc::sock_filter {
    libc::sock_filter {
        code,
        jt: 0,
        jf: 0,
        k,
    }
}

fn bpf_jump(code: u16, k: u32, jt: u8, jf: u8) -> libc::sock_filter {
    libc::sock_filter { code, jt, jf, k }
}

/// Accept only IPv4/ICMP frames whose echo identifier and payload cookie
/// match this port's heartbeats.
fn heartbeat_filter(server_id: u16) -> Vec<libc::sock_filter> {
    vec![
        // EtherType == IPv4
        bpf_stmt(BPF_LD_H_ABS, 12),
        bpf_jump(BPF_JMP_JEQ_K, ETHERTYPE_IPV4, 0, 8),
        // IP protocol == ICMP
        bpf_stmt(BPF_LD_B_ABS, (IPV4_OFFSET + 9) as u32),
        bpf_jump(BPF_JMP_JEQ_K, IP_PROTO_ICMP, 0, 6),
        // Echo identifier == server id
        bpf_stmt(BPF_LD_H_ABS, (ICMP_OFFSET + 4) as u32),
        bpf_jump(BPF_JMP_JEQ_K, server_id as u32, 0, 4),
        // Payload cookie is one of ours
        bpf_stmt(BPF_LD_W_ABS, PAYLOAD_OFFSET as u32),
        bpf_jump(BPF_JMP_JEQ_K, SOFTWARE_COOKIE, 1, 0),
        bpf_jump(BPF_JMP_JEQ_K, HARDWARE_COOKIE, 0, 1),
        bpf_stmt(BPF_RET_K, MUX_MAX_ICMP_BUFFER_SIZE as u32),
        bpf_stmt(BPF_RET_K, 0),
    ]
}

struct OwnedFd(RawFd);

impl AsRawFd for OwnedFd {
    fn as_raw_fd(&self) -> RawFd {
        self.0
    }
}

impl Drop for OwnedFd {
    fn drop(&mut self) {
        unsafe {
            libc::close(self.0);
        }
    }
}

/// Production heartbeat transport over `AF_PACKET`.
pub struct RawProbeSocket {
    sender: PortSender,
    fd: Option<RawFd>,
    rx_task: Option<JoinHandle<()>>,
}

impl RawProbeSocket {
    pub fn new(sender: PortSender) -> Self {
        Self {
            sender,
            fd: None,
            rx_task: None,
        }
    }

    fn open_raw(&self, config: &MuxPortConfig) -> io::Result<RawFd> {
        let fd = unsafe {
            libc::socket(
                libc::AF_PACKET,
                libc::SOCK_RAW | libc::SOCK_NONBLOCK,
                (libc::ETH_P_ALL as u16).to_be() as i32,
            )
        };
        if fd < 0 {
            return Err(io::Error::last_os_error());
        }
        let socket = OwnedFd(fd);

        // Bind to the port's interface.
        let ifname = config.port_name.as_bytes();
        let mut ifreq_name = [0u8; libc::IFNAMSIZ];
        let len = ifname.len().min(libc::IFNAMSIZ - 1);
        ifreq_name[..len].copy_from_slice(&ifname[..len]);
        let ifindex = unsafe {
            libc::if_nametoindex(ifreq_name.as_ptr() as *const libc::c_char)
        };
        if ifindex == 0 {
            return Err(io::Error::last_os_error());
        }
        let mut addr: libc::sockaddr_ll = unsafe { std::mem::zeroed() };
        addr.sll_family = libc::AF_PACKET as u16;
        addr.sll_protocol = (libc::ETH_P_ALL as u16).to_be();
        addr.sll_ifindex = ifindex as i32;
        let rc = unsafe {
            libc::bind(
                fd,
                &addr as *const libc::sockaddr_ll as *const libc::sockaddr,
                std::mem::size_of::<libc::sockaddr_ll>() as libc::socklen_t,
            )
        };
        if rc < 0 {
            return Err(io::Error::last_os_error());
        }

        // Attach the heartbeat filter.
        let filter = heartbeat_filter(config.server_id);
        let prog = libc::sock_fprog {
            len: filter.len() as u16,
            filter: filter.as_ptr() as *mut libc::sock_filter,
        };
        let rc = unsafe {
            libc::setsockopt(
                fd,
                libc::SOL_SOCKET,
                libc::SO_ATTACH_FILTER,
                &prog as *const libc::sock_fprog as *const libc::c_void,
                std::mem::size_of::<libc::sock_fprog>() as libc::socklen_t,
            )
        };
        if rc < 0 {
            return Err(io::Error::last_os_error());
        }

        // Success: hand ownership of the fd to the caller.
        std::mem::forget(socket);
        Ok(fd)
    }
}

impl ProbeSocket for RawProbeSocket {
    fn open(&mut self, config: &MuxPortConfig) -> LinkMgrResult<()> {
        let fd = self
            .open_raw(config)
            .map_err(|e| LinkMgrError::socket(&config.port_name, e))?;

        let sender = self.sender.clone();
        let port_name = config.port_name.clone();
        let async_fd = AsyncFd::new(OwnedFd(fd))
            .map_err(|e| LinkMgrError::socket(&config.port_name, e))?;
        self.fd = Some(fd);
        self.rx_task = Some(tokio::spawn(async move {
            let mut buffer = [0u8; MUX_MAX_ICMP_BUFFER_SIZE];
            loop {
                let mut guard = match async_fd.readable().await {
                    Ok(guard) => guard,
                    Err(e) => {
                        warn!("{}: probe socket closed: {}", port_name, e);
                        return;
                    }
                };
                loop {
                    let n = unsafe {
                        libc::recv(
                            async_fd.get_ref().as_raw_fd(),
                            buffer.as_mut_ptr() as *mut libc::c_void,
                            buffer.len(),
                            0,
                        )
                    };
                    if n < 0 {
                        let err = io::Error::last_os_error();
                        if err.kind() == io::ErrorKind::WouldBlock {
                            guard.clear_ready();
                            break;
                        }
                        // Keep state; recovery on the next interval.
                        debug!("{}: probe socket recv error: {}", port_name, err);
                        guard.clear_ready();
                        break;
                    }
                    if sender
                        .send(PortEvent::RxFrame(buffer[..n as usize].to_vec()))
                        .is_err()
                    {
                        return;
                    }
                }
            }
        }));
        Ok(())
    }

    fn send(&mut self, frame: &[u8]) -> LinkMgrResult<usize> {
        let fd = self
            .fd
            .ok_or_else(|| LinkMgrError::internal("probe socket not open"))?;
        let n = unsafe { libc::send(fd, frame.as_ptr() as *const libc::c_void, frame.len(), 0) };
        if n < 0 {
            return Err(LinkMgrError::Socket {
                port: String::new(),
                source: io::Error::last_os_error(),
            });
        }
        Ok(n as usize)
    }
}

impl Drop for RawProbeSocket {
    fn drop(&mut self) {
        match self.rx_task.take() {
            // The RX task's AsyncFd owns the descriptor and closes it.
            Some(task) => task.abort(),
            None => {
                if let Some(fd) = self.fd.take() {
                    unsafe {
                        libc::close(fd);
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_filter_shape() {
        let filter = heartbeat_filter(7);
        assert_eq!(filter.len(), 11);
        // Final two instructions: accept with snap length, then drop.
        assert_eq!(filter[9].code, BPF_RET_K);
        assert_eq!(filter[9].k, MUX_MAX_ICMP_BUFFER_SIZE as u32);
        assert_eq!(filter[10].code, BPF_RET_K);
        assert_eq!(filter[10].k, 0);
        // The identifier test loads the echo id halfword.
        assert_eq!(filter[4].k, (ICMP_OFFSET + 4) as u32);
        assert_eq!(filter[5].k, 7);
    }

    #[test]
    fn test_filter_offsets_track_layout() {
        let filter = heartbeat_filter(0);
        assert_eq!(filter[2].k, (IPV4_OFFSET + 9) as u32);
        assert_eq!(filter[6].k, PAYLOAD_OFFSET as u32);
        assert_eq!(filter[7].k, SOFTWARE_COOKIE);
        assert_eq!(filter[8].k, HARDWARE_COOKIE);
    }
}
