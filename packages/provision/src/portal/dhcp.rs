//! Address leases for clients joining the configuration access point.

use core::{fmt, net::Ipv4Addr};

use edge_dhcp::{
    server::{Server, ServerOptions},
    Options, Packet,
};

pub const DHCP_SERVER_PORT: u16 = 67;
pub const DHCP_CLIENT_PORT: u16 = 68;

/// Largest datagram a client is expected to send; 576 is the BOOTP minimum.
pub const DHCP_PACKET_MAX: usize = 1024;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DhcpError {
    Decode,
    Encode,
}

impl fmt::Display for DhcpError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Decode => f.write_str("malformed dhcp request"),
            Self::Encode => f.write_str("dhcp reply does not fit"),
        }
    }
}

/// Reply bytes written by [`LeaseServer::answer`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DhcpAnswer {
    pub len: usize,
    /// The client cannot receive unicast yet.
    pub broadcast: bool,
}

/// Hands out addresses from the access point's own /24, with the access point as
/// gateway. `now` yields seconds and drives lease expiry.
pub struct LeaseServer<F, const LEASES: usize> {
    address: Ipv4Addr,
    server: Server<F, LEASES>,
}

impl<F, const LEASES: usize> LeaseServer<F, LEASES>
where
    F: FnMut() -> u64,
{
    pub fn new(address: Ipv4Addr, now: F) -> Self {
        Self {
            address,
            server: Server::new(now, address),
        }
    }

    pub fn address(&self) -> Ipv4Addr {
        self.address
    }

    /// Answers one request. `Ok(None)` means the request needs no reply, for
    /// example a release or a request addressed to another server.
    pub fn answer(&mut self, request: &[u8], reply: &mut [u8]) -> Result<Option<DhcpAnswer>, DhcpError> {
        let request = Packet::decode(request).map_err(|_| DhcpError::Decode)?;
        let mut gateway = [self.address];
        let options = ServerOptions::new(self.address, Some(&mut gateway));
        let mut option_buf = Options::buf();

        let Some(response) = self.server.handle_request(&mut option_buf, &options, &request) else {
            return Ok(None);
        };
        let len = response.encode(reply).map_err(|_| DhcpError::Encode)?.len();
        Ok(Some(DhcpAnswer {
            len,
            broadcast: request.broadcast,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const AP: Ipv4Addr = Ipv4Addr::new(192, 168, 4, 1);
    const CLIENT_MAC: [u8; 6] = [0x02, 0x11, 0x22, 0x33, 0x44, 0x55];
    const XID: [u8; 4] = [0xDE, 0xAD, 0xBE, 0xEF];

    fn discover() -> std::vec::Vec<u8> {
        let mut packet = std::vec![0u8; 236];
        packet[0] = 1; // BOOTREQUEST
        packet[1] = 1; // ethernet
        packet[2] = 6;
        packet[4..8].copy_from_slice(&XID);
        packet[10] = 0x80; // broadcast flag
        packet[28..34].copy_from_slice(&CLIENT_MAC);
        packet.extend_from_slice(&[0x63, 0x82, 0x53, 0x63]);
        packet.extend_from_slice(&[53, 1, 1]); // DHCPDISCOVER
        packet.push(255);
        packet
    }

    fn option(reply: &[u8], code: u8) -> Option<&[u8]> {
        let mut at = 240;
        while at < reply.len() {
            match reply[at] {
                0 => at += 1,
                255 => return None,
                found => {
                    let len = reply[at + 1] as usize;
                    if found == code {
                        return Some(&reply[at + 2..at + 2 + len]);
                    }
                    at += 2 + len;
                }
            }
        }
        None
    }

    #[test]
    fn discover_is_offered_an_address_on_the_portal_subnet() {
        let mut server = LeaseServer::<_, 4>::new(AP, || 100);
        let mut reply = [0u8; DHCP_PACKET_MAX];

        let answer = server.answer(&discover(), &mut reply).unwrap().unwrap();
        let reply = &reply[..answer.len];

        assert!(answer.broadcast);
        assert_eq!(reply[0], 2); // BOOTREPLY
        assert_eq!(&reply[4..8], &XID);
        assert_eq!(&reply[28..34], &CLIENT_MAC);
        let offered = Ipv4Addr::new(reply[16], reply[17], reply[18], reply[19]);
        assert_eq!(offered.octets()[..3], [192, 168, 4]);
        assert_ne!(offered, AP);
        assert_eq!(option(reply, 53), Some(&[2u8][..])); // DHCPOFFER
        assert_eq!(option(reply, 54), Some(&AP.octets()[..]));
    }

    #[test]
    fn repeated_discover_keeps_the_same_offer() {
        let mut server = LeaseServer::<_, 4>::new(AP, || 100);
        let mut first = [0u8; DHCP_PACKET_MAX];
        let mut second = [0u8; DHCP_PACKET_MAX];

        server.answer(&discover(), &mut first).unwrap().unwrap();
        server.answer(&discover(), &mut second).unwrap().unwrap();

        assert_eq!(first[16..20], second[16..20]);
    }

    #[test]
    fn garbage_is_a_decode_error() {
        let mut server = LeaseServer::<_, 4>::new(AP, || 0);
        let mut reply = [0u8; DHCP_PACKET_MAX];
        assert_eq!(server.answer(b"hello", &mut reply), Err(DhcpError::Decode));
        assert_eq!(server.address(), AP);
    }
}
