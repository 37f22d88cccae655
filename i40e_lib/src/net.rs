pub mod ether;
pub mod ip;
pub mod ipv6;
pub mod net_device;
pub mod packet;
pub mod tcp;
pub mod udp;
