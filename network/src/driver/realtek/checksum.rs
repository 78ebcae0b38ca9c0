//! Checksum offload emulation.
//!
//! The guest driver asks the NIC to fill in IP/UDP/TCP checksums through
//! descriptor flags. Frames that go to the VPN client never reach the NIC,
//! so the checksums are completed here before delivery.
//!
//! # Transport checksums
//! Linux-style drivers pre-seed the UDP/TCP checksum field with the folded
//! pseudo-header sum. The NIC then sums the transport header and payload
//! *including* that field and stores the complement. We do exactly that; no
//! pseudo-header is built.
//!
//! Only IPv4 frames are touched. Anything that fails to parse is left as is.

use smoltcp::wire::Ipv4Packet;

use super::desc::Descriptor;
use crate::types::ETH_HLEN;

const UDP_CSUM_OFFSET: usize = 6;
const UDP_HEADER_LEN: usize = 8;
const TCP_CSUM_OFFSET: usize = 16;

/// Apply every checksum requested by `desc` to `frame`.
///
/// Order: UDP, TCP, then the IP header.
pub fn apply_offloads(frame: &mut [u8], desc: &Descriptor) {
    if desc.wants_udp_checksum() {
        fill_transport(frame, UDP_CSUM_OFFSET, UDP_HEADER_LEN);
    }
    if desc.wants_tcp_checksum() {
        fill_transport(frame, TCP_CSUM_OFFSET, TCP_CSUM_OFFSET + 2);
    }
    if desc.wants_ip_checksum() {
        fill_ipv4_header(frame);
    }
}

/// IPv4 header length and total length, if `frame` carries a sane IPv4 packet.
fn ipv4_lengths(frame: &[u8]) -> Option<(usize, usize)> {
    let ip = Ipv4Packet::new_checked(frame.get(ETH_HLEN..)?).ok()?;
    if ip.version() != 4 {
        return None;
    }
    Some((ip.header_len() as usize, ip.total_len() as usize))
}

/// Recompute the IPv4 header checksum.
pub fn fill_ipv4_header(frame: &mut [u8]) {
    if ipv4_lengths(frame).is_none() {
        return;
    }
    if let Ok(mut ip) = Ipv4Packet::new_checked(&mut frame[ETH_HLEN..]) {
        ip.fill_checksum();
    }
}

/// Complete a UDP/TCP checksum whose field sits at `field` within the
/// transport header. `min_len` is the shortest segment that holds the field.
fn fill_transport(frame: &mut [u8], field: usize, min_len: usize) {
    let Some((ihl, total)) = ipv4_lengths(frame) else {
        return;
    };
    let Some(seg_len) = total.checked_sub(ihl) else {
        return;
    };
    if seg_len < min_len {
        return;
    }
    let start = ETH_HLEN + ihl;
    let segment = &mut frame[start..start + seg_len];
    let csum = !fold(sum_be_words(segment));
    segment[field..field + 2].copy_from_slice(&csum.to_be_bytes());
}

/// One's-complement sum of big-endian 16-bit words, odd byte padded.
fn sum_be_words(data: &[u8]) -> u32 {
    let mut sum = 0u32;
    let mut chunks = data.chunks_exact(2);
    for w in &mut chunks {
        sum += u16::from_be_bytes([w[0], w[1]]) as u32;
        sum = (sum & 0xFFFF) + (sum >> 16);
    }
    if let [last] = chunks.remainder() {
        sum += (*last as u32) << 8;
    }
    sum
}

fn fold(mut sum: u32) -> u16 {
    while sum >> 16 != 0 {
        sum = (sum & 0xFFFF) + (sum >> 16);
    }
    sum as u16
}
