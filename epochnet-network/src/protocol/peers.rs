use std::{
    fmt,
    net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr},
};

use epochnet_codec::{
    decode::{self, Decode, Decoder},
    encode::{Encode, Encoder},
};

/// IP address as exchanged on the wire: one word for v4, four for v6
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum IpAddress {
    V4(u32),
    V6([u32; 4]),
}

impl From<IpAddr> for IpAddress {
    fn from(value: IpAddr) -> Self {
        match value {
            IpAddr::V4(x) => IpAddress::V4(u32::from(x)),
            IpAddr::V6(x) => {
                let word = u128::from(x);
                IpAddress::V6([
                    (word >> 96) as u32,
                    (word >> 64) as u32,
                    (word >> 32) as u32,
                    word as u32,
                ])
            }
        }
    }
}

impl From<IpAddress> for IpAddr {
    fn from(value: IpAddress) -> Self {
        match value {
            IpAddress::V4(x) => IpAddr::V4(Ipv4Addr::from(x)),
            IpAddress::V6([a, b, c, d]) => {
                let word = ((a as u128) << 96)
                    | ((b as u128) << 64)
                    | ((c as u128) << 32)
                    | (d as u128);
                IpAddr::V6(Ipv6Addr::from(word))
            }
        }
    }
}

const IPV4_FIELDS: &[&str] = &["ip"];
const IPV6_FIELDS: &[&str] = &["ip0", "ip1", "ip2", "ip3"];

impl Encode for IpAddress {
    fn encode(&self, e: &mut Encoder) {
        match self {
            IpAddress::V4(ip) => {
                e.tag(0).table(1).u32(*ip);
            }
            IpAddress::V6(words) => {
                e.tag(1).table(4);

                for word in words {
                    e.u32(*word);
                }
            }
        }
    }
}

impl Decode for IpAddress {
    const MIN_LEN: usize = 1 + 2 + 4;

    fn decode(d: &mut Decoder<'_>) -> Result<Self, decode::Error> {
        match d.tag()? {
            0 => {
                let mut t = d.table("Ipv4", IPV4_FIELDS)?;
                let ip = t.required(d)?;
                t.finish(d)?;

                Ok(IpAddress::V4(ip))
            }
            1 => {
                let mut t = d.table("Ipv6", IPV6_FIELDS)?;
                let words = [
                    t.required(d)?,
                    t.required(d)?,
                    t.required(d)?,
                    t.required(d)?,
                ];
                t.finish(d)?;

                Ok(IpAddress::V6(words))
            }
            x => Err(decode::Error::unknown_variant("IpAddress", x)),
        }
    }
}

/// Network address of a peer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Address {
    pub ip: IpAddress,
    pub port: u16,
}

impl Address {
    /// Whether the address is worth gossiping or dialing: a concrete IP and a
    /// non-zero port.
    pub fn is_valid(&self) -> bool {
        if self.port == 0 {
            return false;
        }

        match IpAddr::from(self.ip) {
            IpAddr::V4(x) => !x.is_unspecified() && !x.is_broadcast(),
            IpAddr::V6(x) => !x.is_unspecified(),
        }
    }

    pub fn to_socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.ip.into(), self.port)
    }
}

impl From<SocketAddr> for Address {
    fn from(value: SocketAddr) -> Self {
        Self {
            ip: value.ip().into(),
            port: value.port(),
        }
    }
}

impl From<Address> for SocketAddr {
    fn from(value: Address) -> Self {
        value.to_socket_addr()
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.to_socket_addr(), f)
    }
}

const ADDRESS_FIELDS: &[&str] = &["ip", "port"];

impl Encode for Address {
    fn encode(&self, e: &mut Encoder) {
        e.table(2).encode(&self.ip).u16(self.port);
    }
}

impl Decode for Address {
    const MIN_LEN: usize = 2 + IpAddress::MIN_LEN + 2;

    fn decode(d: &mut Decoder<'_>) -> Result<Self, decode::Error> {
        let mut t = d.table("Address", ADDRESS_FIELDS)?;
        let ip = t.required(d)?;
        let port = t.required(d)?;
        t.finish(d)?;

        Ok(Self { ip, port })
    }
}
