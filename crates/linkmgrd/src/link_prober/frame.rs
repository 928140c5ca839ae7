//! Heartbeat frame builder and parser.
//!
//! One TX buffer per port, laid out as Ethernet/IPv4/ICMP/payload/TLVs and
//! reused for every heartbeat. Static headers are rebuilt only when a MAC or
//! IP changes; per-heartbeat sequence updates patch the checksums
//! incrementally instead of recomputing them.

use byteorder::{ByteOrder, NetworkEndian};

use crate::config::MuxPortConfig;
use crate::error::{LinkMgrError, LinkMgrResult};
use crate::link_prober::payload::{
    internet_checksum, patch_checksum, IcmpPayload, TlvCommand, TlvIter, TlvWriter,
    HARDWARE_COOKIE, ICMP_HDR_LEN, ICMP_OFFSET, ICMP_PAYLOAD_LEN, IPV4_HDR_LEN, IPV4_OFFSET,
    MUX_MAX_ICMP_BUFFER_SIZE, PAYLOAD_OFFSET, SOFTWARE_COOKIE, TLV_OFFSET,
};

const ETHERTYPE_IPV4: u16 = 0x0800;
const IP_PROTO_ICMP: u8 = 1;
const ICMP_ECHO_REQUEST: u8 = 8;
const ICMP_ECHO_REPLY: u8 = 0;

/// DSCP CS6 with ECN clear.
const IP_TOS: u8 = 0xb8;
const IP_TTL: u8 = 64;

/// Builds and maintains the heartbeat TX frame for one port.
pub struct HeartbeatFrame {
    buffer: Box<[u8; MUX_MAX_ICMP_BUFFER_SIZE]>,
    packet_size: usize,
    /// Monotonic heartbeat counter; the ICMP echo sequence is its low 16
    /// bits. Starts at 0xffff so the first advance wraps the echo
    /// sequence to zero.
    seq: u64,
    ip_id: u16,
}

impl HeartbeatFrame {
    pub fn new() -> Self {
        Self {
            buffer: Box::new([0u8; MUX_MAX_ICMP_BUFFER_SIZE]),
            packet_size: 0,
            seq: 0xffff,
            ip_id: 0,
        }
    }

    /// Current heartbeat sequence (payload field value).
    pub fn seq(&self) -> u64 {
        self.seq
    }

    /// The echo sequence carried in the ICMP header.
    pub fn icmp_seq(&self) -> u16 {
        (self.seq & 0xffff) as u16
    }

    /// The wire frame ready for transmission.
    pub fn frame(&self) -> &[u8] {
        &self.buffer[..self.packet_size]
    }

    /// (Re)build every static header from the port configuration, keeping
    /// the current sequence and TLV tail. Called on initialization and
    /// whenever a MAC or IP address changes.
    pub fn rebuild(&mut self, config: &MuxPortConfig) -> LinkMgrResult<()> {
        if self.packet_size == 0 {
            // First build: sentinel-only tail.
            self.packet_size = TLV_OFFSET;
            let mut writer = TlvWriter::new(self.buffer.as_mut_slice(), TLV_OFFSET);
            writer.append_sentinel()?;
            self.packet_size = writer.cursor();
        }

        let buf = self.buffer.as_mut_slice();

        // Ethernet
        buf[0..6].copy_from_slice(config.server_mac.as_bytes());
        buf[6..12].copy_from_slice(config.src_mac().as_bytes());
        NetworkEndian::write_u16(&mut buf[12..14], ETHERTYPE_IPV4);

        // IPv4
        let ip = &mut buf[IPV4_OFFSET..IPV4_OFFSET + IPV4_HDR_LEN];
        ip[0] = 0x45; // version 4, IHL 5
        ip[1] = IP_TOS;
        let total_len = (self.packet_size - IPV4_OFFSET) as u16;
        NetworkEndian::write_u16(&mut ip[2..4], total_len);
        NetworkEndian::write_u16(&mut ip[4..6], self.ip_id);
        NetworkEndian::write_u16(&mut ip[6..8], 0); // no fragmentation
        ip[8] = IP_TTL;
        ip[9] = IP_PROTO_ICMP;
        NetworkEndian::write_u16(&mut ip[10..12], 0);
        ip[12..16].copy_from_slice(&config.loopback_ipv4.octets());
        ip[16..20].copy_from_slice(&config.probe_target_ipv4().octets());

        // ICMP echo request
        let icmp = &mut buf[ICMP_OFFSET..ICMP_OFFSET + ICMP_HDR_LEN];
        icmp[0] = ICMP_ECHO_REQUEST;
        icmp[1] = 0;
        NetworkEndian::write_u16(&mut icmp[2..4], 0);
        NetworkEndian::write_u16(&mut icmp[4..6], config.server_id);
        let echo_seq = (self.seq & 0xffff) as u16;
        NetworkEndian::write_u16(&mut icmp[6..8], echo_seq);

        // Payload
        IcmpPayload::new(self.seq).encode(&mut buf[PAYLOAD_OFFSET..PAYLOAD_OFFSET + ICMP_PAYLOAD_LEN]);

        self.compute_checksums();
        Ok(())
    }

    /// Replace the TLV tail with a single COMMAND TLV plus the sentinel.
    pub fn set_command_tail(&mut self, command: TlvCommand) -> LinkMgrResult<()> {
        let mut writer = TlvWriter::new(self.buffer.as_mut_slice(), TLV_OFFSET);
        writer.append_command(command)?;
        writer.append_sentinel()?;
        self.packet_size = writer.cursor();
        self.finish_tail();
        Ok(())
    }

    /// Restore the sentinel-only TLV tail.
    pub fn set_sentinel_tail(&mut self) -> LinkMgrResult<()> {
        let mut writer = TlvWriter::new(self.buffer.as_mut_slice(), TLV_OFFSET);
        writer.append_sentinel()?;
        self.packet_size = writer.cursor();
        self.finish_tail();
        Ok(())
    }

    /// Append a DUMMY padding TLV before the sentinel (test traffic).
    pub fn set_dummy_tail(&mut self, padding: usize) -> LinkMgrResult<()> {
        let mut writer = TlvWriter::new(self.buffer.as_mut_slice(), TLV_OFFSET);
        writer.append_dummy(padding, self.seq as u32)?;
        writer.append_sentinel()?;
        self.packet_size = writer.cursor();
        self.finish_tail();
        Ok(())
    }

    fn finish_tail(&mut self) {
        let total_len = (self.packet_size - IPV4_OFFSET) as u16;
        NetworkEndian::write_u16(
            &mut self.buffer[IPV4_OFFSET + 2..IPV4_OFFSET + 4],
            total_len,
        );
        self.compute_checksums();
    }

    /// Advance to the next heartbeat: bump the sequence and the IPv4
    /// identification, patching both checksums incrementally.
    pub fn advance(&mut self) {
        let old_seq = self.seq;
        let old_id = self.ip_id;
        self.seq = self.seq.wrapping_add(1);
        self.ip_id = self.ip_id.wrapping_add(1);

        let buf = self.buffer.as_mut_slice();

        // IPv4 identification
        let mut ip_checksum = NetworkEndian::read_u16(&buf[IPV4_OFFSET + 10..IPV4_OFFSET + 12]);
        ip_checksum = patch_checksum(ip_checksum, old_id, self.ip_id);
        NetworkEndian::write_u16(&mut buf[IPV4_OFFSET + 4..IPV4_OFFSET + 6], self.ip_id);
        NetworkEndian::write_u16(&mut buf[IPV4_OFFSET + 10..IPV4_OFFSET + 12], ip_checksum);

        // ICMP echo sequence plus the four payload sequence words
        let mut icmp_checksum = NetworkEndian::read_u16(&buf[ICMP_OFFSET + 2..ICMP_OFFSET + 4]);
        icmp_checksum = patch_checksum(
            icmp_checksum,
            (old_seq & 0xffff) as u16,
            (self.seq & 0xffff) as u16,
        );
        NetworkEndian::write_u16(
            &mut buf[ICMP_OFFSET + 6..ICMP_OFFSET + 8],
            (self.seq & 0xffff) as u16,
        );
        let seq_offset = PAYLOAD_OFFSET + 16;
        for word in 0..4 {
            let shift = 48 - 16 * word;
            let old_word = ((old_seq >> shift) & 0xffff) as u16;
            let new_word = ((self.seq >> shift) & 0xffff) as u16;
            icmp_checksum = patch_checksum(icmp_checksum, old_word, new_word);
        }
        NetworkEndian::write_u64(&mut buf[seq_offset..seq_offset + 8], self.seq);
        NetworkEndian::write_u16(&mut buf[ICMP_OFFSET + 2..ICMP_OFFSET + 4], icmp_checksum);
    }

    fn compute_checksums(&mut self) {
        let buf = self.buffer.as_mut_slice();

        NetworkEndian::write_u16(&mut buf[IPV4_OFFSET + 10..IPV4_OFFSET + 12], 0);
        let ip_checksum = internet_checksum(&buf[IPV4_OFFSET..IPV4_OFFSET + IPV4_HDR_LEN]);
        NetworkEndian::write_u16(&mut buf[IPV4_OFFSET + 10..IPV4_OFFSET + 12], ip_checksum);

        NetworkEndian::write_u16(&mut buf[ICMP_OFFSET + 2..ICMP_OFFSET + 4], 0);
        let icmp_checksum = internet_checksum(&buf[ICMP_OFFSET..self.packet_size]);
        NetworkEndian::write_u16(&mut buf[ICMP_OFFSET + 2..ICMP_OFFSET + 4], icmp_checksum);
    }
}

impl Default for HeartbeatFrame {
    fn default() -> Self {
        Self::new()
    }
}

/// A received heartbeat after header validation.
#[derive(Debug, Clone)]
pub struct ParsedHeartbeat<'a> {
    pub payload: IcmpPayload,
    pub icmp_id: u16,
    pub icmp_seq: u16,
    /// The TLV region of the packet.
    pub tlvs: &'a [u8],
}

impl<'a> ParsedHeartbeat<'a> {
    /// Iterate the TLV tail.
    pub fn tlv_iter(&self) -> TlvIter<'a> {
        TlvIter::new(self.tlvs)
    }
}

/// Validate and decode a received frame as a heartbeat.
///
/// Returns a parse error for anything that is not a well-formed echo
/// request/reply carrying a known cookie; the caller drops such packets
/// without touching any counters.
pub fn parse_heartbeat(frame: &[u8]) -> LinkMgrResult<ParsedHeartbeat<'_>> {
    if frame.len() < TLV_OFFSET {
        return Err(LinkMgrError::parse(format!(
            "frame too short for a heartbeat: {} bytes",
            frame.len()
        )));
    }
    if NetworkEndian::read_u16(&frame[12..14]) != ETHERTYPE_IPV4 {
        return Err(LinkMgrError::parse("not an IPv4 frame"));
    }
    let ip = &frame[IPV4_OFFSET..];
    if ip[0] >> 4 != 4 || ip[0] & 0x0f != 5 {
        return Err(LinkMgrError::parse("unexpected IPv4 header"));
    }
    if ip[9] != IP_PROTO_ICMP {
        return Err(LinkMgrError::parse("not an ICMP packet"));
    }
    let icmp = &frame[ICMP_OFFSET..];
    if icmp[0] != ICMP_ECHO_REPLY && icmp[0] != ICMP_ECHO_REQUEST {
        return Err(LinkMgrError::parse("not an ICMP echo"));
    }

    let payload = IcmpPayload::decode(&frame[PAYLOAD_OFFSET..])?;
    if payload.cookie != SOFTWARE_COOKIE && payload.cookie != HARDWARE_COOKIE {
        return Err(LinkMgrError::parse(format!(
            "unknown heartbeat cookie {:#010x}",
            payload.cookie
        )));
    }

    let total_len = NetworkEndian::read_u16(&ip[2..4]) as usize;
    let packet_end = (IPV4_OFFSET + total_len).clamp(TLV_OFFSET, frame.len());

    Ok(ParsedHeartbeat {
        payload,
        icmp_id: NetworkEndian::read_u16(&icmp[4..6]),
        icmp_seq: NetworkEndian::read_u16(&icmp[6..8]),
        tlvs: &frame[TLV_OFFSET..packet_end],
    })
}
