//! Address handout for clients of the onboarding access point.
//!
//! Just enough DHCPv4 for phones and laptops to get an address, with the
//! portal itself as router and DNS server. Leases live in RAM and are lost
//! with the portal.

use heapless::Vec as BoundedVec;

pub const DHCP_SERVER_PORT: u16 = 67;
pub const DHCP_CLIENT_PORT: u16 = 68;
pub const POOL_SIZE: usize = 8;
/// Replies are padded to the minimum BOOTP length some clients insist on.
pub const REPLY_MIN_LEN: usize = 300;

const LEASE_SECS: u32 = 3_600;
const FIXED_LEN: usize = 236;
const MAGIC_COOKIE: [u8; 4] = [99, 130, 83, 99];
const OPTIONS_START: usize = FIXED_LEN + 4;

const OPT_PAD: u8 = 0;
const OPT_SUBNET_MASK: u8 = 1;
const OPT_ROUTER: u8 = 3;
const OPT_DNS: u8 = 6;
const OPT_REQUESTED_IP: u8 = 50;
const OPT_LEASE_TIME: u8 = 51;
const OPT_MESSAGE_TYPE: u8 = 53;
const OPT_SERVER_ID: u8 = 54;
const OPT_END: u8 = 255;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum MessageType {
    Discover,
    Offer,
    Request,
    Ack,
    Nak,
    Release,
}

impl MessageType {
    const fn from_code(code: u8) -> Option<Self> {
        match code {
            1 => Some(Self::Discover),
            2 => Some(Self::Offer),
            3 => Some(Self::Request),
            5 => Some(Self::Ack),
            6 => Some(Self::Nak),
            7 => Some(Self::Release),
            _ => None,
        }
    }

    const fn code(self) -> u8 {
        match self {
            Self::Discover => 1,
            Self::Offer => 2,
            Self::Request => 3,
            Self::Ack => 5,
            Self::Nak => 6,
            Self::Release => 7,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct Lease {
    mac: [u8; 6],
    ip: [u8; 4],
}

pub struct DhcpServer {
    server: [u8; 4],
    leases: BoundedVec<Lease, POOL_SIZE>,
}

impl DhcpServer {
    /// Serves a /24 around `server`, handing out the addresses right after
    /// it.
    pub fn new(server: [u8; 4]) -> Self {
        Self {
            server,
            leases: BoundedVec::new(),
        }
    }

    /// Builds the reply to `request` in `out` and returns its length.
    /// `None` when nothing should be sent.
    pub fn handle(&mut self, request: &[u8], out: &mut [u8]) -> Option<usize> {
        if request.len() < OPTIONS_START || request[0] != 1 || request[1] != 1 || request[2] != 6 {
            return None;
        }
        if request[FIXED_LEN..OPTIONS_START] != MAGIC_COOKIE {
            return None;
        }
        let mut mac = [0u8; 6];
        mac.copy_from_slice(&request[28..34]);

        let options = &request[OPTIONS_START..];
        let kind = option(options, OPT_MESSAGE_TYPE)
            .and_then(|value| value.first().copied())
            .and_then(MessageType::from_code)?;

        let (reply, ip) = match kind {
            MessageType::Discover => (MessageType::Offer, self.lease_for(mac)?),
            MessageType::Request => {
                let requested = option(options, OPT_REQUESTED_IP)
                    .and_then(|value| <[u8; 4]>::try_from(value).ok())
                    .or_else(|| {
                        let ciaddr = [request[12], request[13], request[14], request[15]];
                        (ciaddr != [0; 4]).then_some(ciaddr)
                    });
                if let Some(server_id) = option(options, OPT_SERVER_ID) {
                    if server_id != self.server {
                        // Client picked another server's offer.
                        self.release(mac);
                        return None;
                    }
                }
                match (self.lease_for(mac), requested) {
                    (Some(ip), Some(requested)) if ip == requested => (MessageType::Ack, ip),
                    (Some(ip), None) => (MessageType::Ack, ip),
                    _ => (MessageType::Nak, [0; 4]),
                }
            }
            MessageType::Release => {
                self.release(mac);
                return None;
            }
            MessageType::Offer | MessageType::Ack | MessageType::Nak => return None,
        };

        self.write_reply(request, reply, ip, out)
    }

    fn lease_for(&mut self, mac: [u8; 6]) -> Option<[u8; 4]> {
        if let Some(lease) = self.leases.iter().find(|lease| lease.mac == mac) {
            return Some(lease.ip);
        }
        let ip = (1..=POOL_SIZE as u8)
            .map(|offset| {
                let [a, b, c, d] = self.server;
                [a, b, c, d.wrapping_add(offset)]
            })
            .find(|ip| !self.leases.iter().any(|lease| lease.ip == *ip))?;
        self.leases.push(Lease { mac, ip }).ok()?;
        log::info!(
            "dhcp: lease {}.{}.{}.{} to {:02x?}",
            ip[0],
            ip[1],
            ip[2],
            ip[3],
            mac
        );
        Some(ip)
    }

    fn release(&mut self, mac: [u8; 6]) {
        self.leases.retain(|lease| lease.mac != mac);
    }

    fn write_reply(
        &self,
        request: &[u8],
        kind: MessageType,
        ip: [u8; 4],
        out: &mut [u8],
    ) -> Option<usize> {
        let out = out.get_mut(..REPLY_MIN_LEN)?;
        out.fill(0);
        out[0] = 2;
        out[1] = 1;
        out[2] = 6;
        // xid, flags and chaddr are echoed.
        out[4..8].copy_from_slice(&request[4..8]);
        out[10..12].copy_from_slice(&request[10..12]);
        out[16..20].copy_from_slice(&ip);
        out[20..24].copy_from_slice(&self.server);
        out[28..44].copy_from_slice(&request[28..44]);
        out[FIXED_LEN..OPTIONS_START].copy_from_slice(&MAGIC_COOKIE);

        let mut at = OPTIONS_START;
        let mut put = |code: u8, value: &[u8]| {
            out[at] = code;
            out[at + 1] = value.len() as u8;
            out[at + 2..at + 2 + value.len()].copy_from_slice(value);
            at += 2 + value.len();
        };
        put(OPT_MESSAGE_TYPE, &[kind.code()]);
        put(OPT_SERVER_ID, &self.server);
        if kind != MessageType::Nak {
            put(OPT_LEASE_TIME, &LEASE_SECS.to_be_bytes());
            put(OPT_SUBNET_MASK, &[255, 255, 255, 0]);
            put(OPT_ROUTER, &self.server);
            put(OPT_DNS, &self.server);
        }
        out[at] = OPT_END;
        Some(REPLY_MIN_LEN)
    }
}

fn option(mut options: &[u8], wanted: u8) -> Option<&[u8]> {
    loop {
        let (&code, rest) = options.split_first()?;
        match code {
            OPT_END => return None,
            OPT_PAD => options = rest,
            _ => {
                let (&len, rest) = rest.split_first()?;
                let value = rest.get(..len as usize)?;
                if code == wanted {
                    return Some(value);
                }
                options = &rest[len as usize..];
            }
        }
    }
}
