//! Receive packet-type decode.
//!
//! The write-back descriptor carries an 8-bit packet-type index; this table
//! expands it into the parsed-header facts the checksum decode needs. The
//! table is regular: after the L2 block, each outer IP version owns a
//! 66-entry region covering the plain, IP-in-IP, GRE/NAT, GRE/NAT+MAC and
//! GRE/NAT+MAC/VLAN encapsulations, each with both inner IP versions and
//! the recognized L4 protocols. Indices 154 and up are reserved.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OuterIp {
    None,
    Ip,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OuterIpVer {
    None,
    Ipv4,
    Ipv6,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PtypeFrag {
    NotFrag,
    Frag,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TunnelKind {
    None,
    IpIp,
    Grenat,
    GrenatMac,
    GrenatMacVlan,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TunnelEndProt {
    None,
    Ipv4,
    Ipv6,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InnerProt {
    None,
    Udp,
    Tcp,
    Sctp,
    Icmp,
    Timesync,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayloadLayer {
    None,
    Pay2,
    Pay3,
    Pay4,
}

#[derive(Debug, Clone, Copy)]
pub struct RxPtypeInfo {
    pub known: bool,
    pub outer_ip: OuterIp,
    pub outer_ip_ver: OuterIpVer,
    pub outer_frag: PtypeFrag,
    pub tunnel: TunnelKind,
    pub tunnel_end_prot: TunnelEndProt,
    pub tunnel_end_frag: PtypeFrag,
    pub inner_prot: InnerProt,
    pub payload_layer: PayloadLayer,
}

impl RxPtypeInfo {
    /// A non-tunneled IP frame whose L4 protocol the hardware checksums.
    pub fn nontunnel_l4_valid(&self) -> bool {
        self.outer_ip == OuterIp::Ip
            && self.tunnel == TunnelKind::None
            && matches!(
                self.inner_prot,
                InnerProt::Udp | InnerProt::Tcp | InnerProt::Sctp
            )
    }

    /// A GRE/NAT MAC (with or without VLAN) tunnel whose inner L4 the
    /// hardware checksums.
    pub fn tunnel_inner_l4_valid(&self) -> bool {
        self.outer_ip == OuterIp::Ip
            && matches!(
                self.tunnel,
                TunnelKind::GrenatMac | TunnelKind::GrenatMacVlan
            )
            && self.tunnel_end_frag == PtypeFrag::NotFrag
            && self.tunnel_end_prot != TunnelEndProt::None
            && matches!(
                self.inner_prot,
                InnerProt::Udp | InnerProt::Tcp | InnerProt::Sctp
            )
    }
}

const UNKNOWN: RxPtypeInfo = RxPtypeInfo {
    known: false,
    outer_ip: OuterIp::None,
    outer_ip_ver: OuterIpVer::None,
    outer_frag: PtypeFrag::NotFrag,
    tunnel: TunnelKind::None,
    tunnel_end_prot: TunnelEndProt::None,
    tunnel_end_frag: PtypeFrag::NotFrag,
    inner_prot: InnerProt::None,
    payload_layer: PayloadLayer::None,
};

const fn l2(inner_prot: InnerProt, payload_layer: PayloadLayer) -> RxPtypeInfo {
    RxPtypeInfo {
        known: true,
        inner_prot,
        payload_layer,
        ..UNKNOWN
    }
}

const fn ip(
    outer_ip_ver: OuterIpVer,
    outer_frag: PtypeFrag,
    tunnel: TunnelKind,
    tunnel_end_prot: TunnelEndProt,
    tunnel_end_frag: PtypeFrag,
    inner_prot: InnerProt,
    payload_layer: PayloadLayer,
) -> RxPtypeInfo {
    RxPtypeInfo {
        known: true,
        outer_ip: OuterIp::Ip,
        outer_ip_ver,
        outer_frag,
        tunnel,
        tunnel_end_prot,
        tunnel_end_frag,
        inner_prot,
        payload_layer,
    }
}

/// The `pos`th entry of a seven-entry L4 block: end-fragment, no-L4, UDP,
/// reserved, TCP, SCTP, ICMP.
const fn l4_block(
    ver: OuterIpVer,
    tunnel: TunnelKind,
    end: TunnelEndProt,
    pos: usize,
) -> RxPtypeInfo {
    match pos {
        0 => ip(
            ver,
            PtypeFrag::NotFrag,
            tunnel,
            end,
            PtypeFrag::Frag,
            InnerProt::None,
            PayloadLayer::Pay3,
        ),
        1 => ip(
            ver,
            PtypeFrag::NotFrag,
            tunnel,
            end,
            PtypeFrag::NotFrag,
            InnerProt::None,
            PayloadLayer::Pay3,
        ),
        2 => ip(
            ver,
            PtypeFrag::NotFrag,
            tunnel,
            end,
            PtypeFrag::NotFrag,
            InnerProt::Udp,
            PayloadLayer::Pay4,
        ),
        4 => ip(
            ver,
            PtypeFrag::NotFrag,
            tunnel,
            end,
            PtypeFrag::NotFrag,
            InnerProt::Tcp,
            PayloadLayer::Pay4,
        ),
        5 => ip(
            ver,
            PtypeFrag::NotFrag,
            tunnel,
            end,
            PtypeFrag::NotFrag,
            InnerProt::Sctp,
            PayloadLayer::Pay4,
        ),
        6 => ip(
            ver,
            PtypeFrag::NotFrag,
            tunnel,
            end,
            PtypeFrag::NotFrag,
            InnerProt::Icmp,
            PayloadLayer::Pay4,
        ),
        _ => UNKNOWN,
    }
}

const fn build_table() -> [RxPtypeInfo; 256] {
    let mut t = [UNKNOWN; 256];

    // L2-only packet types.
    t[1] = l2(InnerProt::None, PayloadLayer::Pay2);
    t[2] = l2(InnerProt::Timesync, PayloadLayer::Pay2);
    t[3] = l2(InnerProt::None, PayloadLayer::Pay2);
    t[6] = l2(InnerProt::None, PayloadLayer::Pay2);
    t[7] = l2(InnerProt::None, PayloadLayer::Pay2);
    t[10] = l2(InnerProt::None, PayloadLayer::Pay2);
    t[11] = l2(InnerProt::None, PayloadLayer::None);
    t[12] = l2(InnerProt::None, PayloadLayer::Pay3);
    let mut i = 13;
    while i <= 21 {
        t[i] = l2(InnerProt::None, PayloadLayer::Pay4);
        i += 1;
    }

    // Each outer IP version owns a 66-entry region.
    let mut v = 0;
    while v < 2 {
        let (base, ver) = if v == 0 {
            (22usize, OuterIpVer::Ipv4)
        } else {
            (88usize, OuterIpVer::Ipv6)
        };

        // Outer fragment, then the non-tunneled L4 block.
        t[base] = ip(
            ver,
            PtypeFrag::Frag,
            TunnelKind::None,
            TunnelEndProt::None,
            PtypeFrag::NotFrag,
            InnerProt::None,
            PayloadLayer::Pay3,
        );
        let mut pos = 1;
        while pos < 7 {
            t[base + pos] = l4_block(ver, TunnelKind::None, TunnelEndProt::None, pos);
            pos += 1;
        }

        // The four tunnel encapsulations. IP-in-IP has no header-only
        // entry; the GRE/NAT variants do.
        let mut k = 0;
        let mut off = 7;
        while k < 4 {
            let tunnel = match k {
                0 => TunnelKind::IpIp,
                1 => TunnelKind::Grenat,
                2 => TunnelKind::GrenatMac,
                _ => TunnelKind::GrenatMacVlan,
            };

            if k > 0 {
                t[base + off] = ip(
                    ver,
                    PtypeFrag::NotFrag,
                    tunnel,
                    TunnelEndProt::None,
                    PtypeFrag::NotFrag,
                    InnerProt::None,
                    PayloadLayer::Pay3,
                );
                off += 1;
            }

            let mut e = 0;
            while e < 2 {
                let end = if e == 0 {
                    TunnelEndProt::Ipv4
                } else {
                    TunnelEndProt::Ipv6
                };

                let mut pos = 0;
                while pos < 7 {
                    t[base + off] = l4_block(ver, tunnel, end, pos);
                    off += 1;
                    pos += 1;
                }
                e += 1;
            }
            k += 1;
        }

        v += 1;
    }

    t
}

static PTYPE_TABLE: [RxPtypeInfo; 256] = build_table();

pub fn decode_ptype(ptype: u8) -> RxPtypeInfo {
    PTYPE_TABLE[ptype as usize]
}
