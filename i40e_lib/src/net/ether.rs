pub const ETHER_CRC_LEN: usize = 4; // Ethernet CRC length
pub const ETHER_MIN_LEN: usize = 64; // Minimum frame length, CRC included
pub const ETHER_MAX_LEN: usize = 1518; // Maximum frame length, CRC included

pub const ETHER_ADDR_LEN: usize = 6;
pub const ETHER_TYPE_LEN: usize = 2;
pub const ETHER_HDR_LEN: usize = ETHER_ADDR_LEN * 2 + ETHER_TYPE_LEN;
pub const ETHER_VLAN_ENCAP_LEN: usize = 4;

pub const ETHER_TYPE_IP: u16 = 0x0800;
pub const ETHER_TYPE_VLAN: u16 = 0x8100;
pub const ETHER_TYPE_IPV6: u16 = 0x86DD;

pub const VXLAN_HDR_LEN: usize = 8;

pub const ETHER_BROADCAST_ADDR: [u8; ETHER_ADDR_LEN] = [0xff; ETHER_ADDR_LEN];

#[derive(Debug, Clone)]
#[repr(C, packed)]
pub struct EtherHeader {
    pub dst: [u8; ETHER_ADDR_LEN],
    pub src: [u8; ETHER_ADDR_LEN],
    pub ether_type: u16,
}

#[derive(Debug, Clone)]
#[repr(C, packed)]
pub struct EtherVlanHeader {
    pub dst: [u8; ETHER_ADDR_LEN],
    pub src: [u8; ETHER_ADDR_LEN],
    pub encap_proto: u16,
    pub vlan_tag: u16,
    pub ether_proto: u16,
}
