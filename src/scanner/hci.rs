//! Raw HCI socket backend.
//!
//! This backend uses raw Linux HCI sockets to run a passive LE scan without
//! requiring the BlueZ daemon. It requires CAP_NET_RAW and CAP_NET_ADMIN
//! capabilities or root privileges.

use super::{
    Advertisement, AdvertisementCallback, Radio, ScanError, ScanFuture, ServiceData,
    short_uuid_tag,
};
use libc::{AF_BLUETOOTH, SOCK_CLOEXEC, SOCK_RAW, c_int, c_void, sockaddr, socklen_t};
use std::io;
use std::mem;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd};
use std::time::Duration;
use tokio::io::unix::AsyncFd;

// HCI protocol constants
const BTPROTO_HCI: c_int = 1;
const HCI_FILTER: c_int = 2;

// HCI packet types
const HCI_EVENT_PKT: u8 = 0x04;

// HCI events
const EVT_LE_META_EVENT: u8 = 0x3E;

// LE Meta event sub-events
const EVT_LE_ADVERTISING_REPORT: u8 = 0x02;

// HCI commands
const OGF_LE_CTL: u16 = 0x08;
const OCF_LE_SET_SCAN_PARAMETERS: u16 = 0x000B;
const OCF_LE_SET_SCAN_ENABLE: u16 = 0x000C;

// Scan types
const LE_SCAN_PASSIVE: u8 = 0x00;

// Own address type
const LE_PUBLIC_ADDRESS: u8 = 0x00;

// Filter policy
const FILTER_POLICY_ACCEPT_ALL: u8 = 0x00;

// AD types
const AD_TYPE_SERVICE_DATA_16: u8 = 0x16;

/// Max HCI event size
const HCI_MAX_EVENT_SIZE: usize = 258;

/// HCI socket address structure
#[repr(C)]
struct SockaddrHci {
    hci_family: u16,
    hci_dev: u16,
    hci_channel: u16,
}

/// HCI filter structure for raw sockets
#[repr(C)]
struct HciFilter {
    type_mask: u32,
    event_mask: [u32; 2],
    opcode: u16,
}

impl HciFilter {
    fn new() -> Self {
        Self {
            type_mask: 0,
            event_mask: [0, 0],
            opcode: 0,
        }
    }

    fn set_ptype(&mut self, ptype: u8) {
        self.type_mask |= 1 << (ptype as u32);
    }

    fn set_event(&mut self, event: u8) {
        let bit = event as usize;
        self.event_mask[bit / 32] |= 1 << (bit % 32);
    }
}

/// Create an HCI command packet
fn hci_command_packet(ogf: u16, ocf: u16, params: &[u8]) -> Vec<u8> {
    let opcode = (ogf << 10) | ocf;
    let mut packet = Vec::with_capacity(4 + params.len());
    packet.push(0x01); // HCI command packet type
    packet.push((opcode & 0xFF) as u8);
    packet.push((opcode >> 8) as u8);
    packet.push(params.len() as u8);
    packet.extend_from_slice(params);
    packet
}

fn os_error(context: &str) -> ScanError {
    ScanError::Bluetooth(format!("{context}: {}", io::Error::last_os_error()))
}

/// Open a non-blocking raw HCI socket bound to device `dev_id`.
fn open_bound_socket(dev_id: u16) -> Result<OwnedFd, ScanError> {
    // SOCK_NONBLOCK is required for AsyncFd to work properly
    let fd = unsafe {
        libc::socket(
            AF_BLUETOOTH,
            SOCK_RAW | SOCK_CLOEXEC | libc::SOCK_NONBLOCK,
            BTPROTO_HCI,
        )
    };

    if fd < 0 {
        return Err(os_error("Failed to create HCI socket"));
    }

    let fd = unsafe { OwnedFd::from_raw_fd(fd) };

    let addr = SockaddrHci {
        hci_family: AF_BLUETOOTH as u16,
        hci_dev: dev_id,
        hci_channel: 0, // HCI_CHANNEL_RAW
    };

    let ret = unsafe {
        libc::bind(
            fd.as_raw_fd(),
            &addr as *const SockaddrHci as *const sockaddr,
            mem::size_of::<SockaddrHci>() as socklen_t,
        )
    };

    if ret < 0 {
        return Err(os_error(&format!("Failed to bind HCI socket to hci{dev_id}")));
    }

    Ok(fd)
}

/// Only deliver LE meta events to the socket
fn set_hci_filter(fd: &OwnedFd) -> Result<(), ScanError> {
    let mut filter = HciFilter::new();
    filter.set_ptype(HCI_EVENT_PKT);
    filter.set_event(EVT_LE_META_EVENT);

    let ret = unsafe {
        libc::setsockopt(
            fd.as_raw_fd(),
            0, // SOL_HCI
            HCI_FILTER,
            &filter as *const HciFilter as *const c_void,
            mem::size_of::<HciFilter>() as socklen_t,
        )
    };

    if ret < 0 {
        return Err(os_error("Failed to set HCI filter"));
    }

    Ok(())
}

fn send_hci_command(fd: &OwnedFd, packet: &[u8]) -> Result<(), ScanError> {
    let ret = unsafe {
        libc::write(
            fd.as_raw_fd(),
            packet.as_ptr() as *const c_void,
            packet.len(),
        )
    };

    if ret < 0 {
        return Err(os_error("Failed to send HCI command"));
    }

    Ok(())
}

/// LE Set Scan Parameters: passive scan, 10ms interval and window.
fn scan_parameters_packet() -> Vec<u8> {
    let interval: u16 = 0x0010; // 10ms in 0.625ms units
    let window: u16 = 0x0010;

    let mut params = Vec::with_capacity(7);
    params.push(LE_SCAN_PASSIVE);
    params.extend_from_slice(&interval.to_le_bytes());
    params.extend_from_slice(&window.to_le_bytes());
    params.push(LE_PUBLIC_ADDRESS);
    params.push(FILTER_POLICY_ACCEPT_ALL);

    hci_command_packet(OGF_LE_CTL, OCF_LE_SET_SCAN_PARAMETERS, &params)
}

/// LE Set Scan Enable, without duplicate filtering.
fn scan_enable_packet(enable: bool) -> Vec<u8> {
    hci_command_packet(OGF_LE_CTL, OCF_LE_SET_SCAN_ENABLE, &[u8::from(enable), 0x00])
}

/// Parse an LE advertising report into an [`Advertisement`].
///
/// Only the first report of an event is used. All AD structures of type
/// "Service Data - 16-bit UUID" are collected in the order they appear.
fn parse_advertising_report(data: &[u8]) -> Option<Advertisement> {
    // Skip HCI header (packet type, event code, param len, subevent)
    let report = data.get(4..)?;

    // num_reports(1) + event_type(1) + addr_type(1) + address(6) + data_len(1)
    if report.len() < 10 || report[0] == 0 {
        return None;
    }

    // HCI uses little-endian address
    let mut addr = [0u8; 6];
    addr.copy_from_slice(&report[3..9]);
    addr.reverse();

    let data_len = report[9] as usize;
    let ad_data = report.get(10..10 + data_len)?;

    let mut service_data = Vec::new();
    let mut offset = 0;
    while offset + 2 <= ad_data.len() {
        let len = ad_data[offset] as usize;
        if len == 0 || offset + 1 + len > ad_data.len() {
            break;
        }

        let ad_type = ad_data[offset + 1];
        if ad_type == AD_TYPE_SERVICE_DATA_16 && len >= 3 {
            let uuid = u16::from_le_bytes([ad_data[offset + 2], ad_data[offset + 3]]);
            service_data.push(ServiceData {
                uuid: short_uuid_tag(uuid),
                data: ad_data[offset + 4..offset + 1 + len].to_vec(),
            });
        }

        offset += 1 + len;
    }

    Some(Advertisement {
        address: crate::mac_address::MacAddress(addr).to_string(),
        service_data,
    })
}

/// Radio driving an HCI device directly through raw sockets.
#[derive(Debug, Default, Clone, Copy)]
pub struct HciRadio;

async fn run_scan(
    dev_id: u16,
    window: Duration,
    on_advertisement: AdvertisementCallback,
) -> Result<(), ScanError> {
    let fd = open_bound_socket(dev_id)?;
    set_hci_filter(&fd)?;

    // Commands go through a separate socket bound to the same device
    let cmd_fd = open_bound_socket(dev_id)?;
    send_hci_command(&cmd_fd, &scan_parameters_packet())?;
    send_hci_command(&cmd_fd, &scan_enable_packet(true))?;

    let async_fd = AsyncFd::new(fd)
        .map_err(|e| ScanError::Bluetooth(format!("Failed to create async fd: {e}")))?;

    let result = read_events(&async_fd, window, &on_advertisement).await;

    // Best effort: the next window enables scanning again anyway
    let _ = send_hci_command(&cmd_fd, &scan_enable_packet(false));

    result
}

async fn read_events(
    async_fd: &AsyncFd<OwnedFd>,
    window: Duration,
    on_advertisement: &AdvertisementCallback,
) -> Result<(), ScanError> {
    let mut buf = [0u8; HCI_MAX_EVENT_SIZE];

    let deadline = tokio::time::sleep(window);
    tokio::pin!(deadline);

    loop {
        let mut guard = tokio::select! {
            _ = &mut deadline => return Ok(()),
            guard = async_fd.readable() => guard
                .map_err(|e| ScanError::Bluetooth(format!("HCI socket error: {e}")))?,
        };

        // Drain all available packets before waiting again
        loop {
            let n = match guard.try_io(|inner| {
                let ret = unsafe {
                    libc::read(
                        inner.as_raw_fd(),
                        buf.as_mut_ptr() as *mut c_void,
                        buf.len(),
                    )
                };
                if ret < 0 {
                    Err(io::Error::last_os_error())
                } else {
                    Ok(ret as usize)
                }
            }) {
                Ok(Ok(0)) => return Err(ScanError::Bluetooth("HCI socket closed".into())),
                Ok(Ok(n)) => n,
                Ok(Err(e)) => return Err(ScanError::Bluetooth(format!("HCI read failed: {e}"))),
                Err(_would_block) => break,
            };

            if n >= 4
                && buf[0] == HCI_EVENT_PKT
                && buf[1] == EVT_LE_META_EVENT
                && buf[3] == EVT_LE_ADVERTISING_REPORT
                && let Some(advertisement) = parse_advertising_report(&buf[..n])
            {
                on_advertisement(advertisement);
            }
        }
    }
}

impl Radio for HciRadio {
    fn probe(&self, adapter: u16) -> ScanFuture<'_> {
        Box::pin(async move { open_bound_socket(adapter).map(drop) })
    }

    fn scan(
        &self,
        adapter: u16,
        window: Duration,
        on_advertisement: AdvertisementCallback,
    ) -> ScanFuture<'_> {
        Box::pin(run_scan(adapter, window, on_advertisement))
    }
}
