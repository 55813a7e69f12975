use super::response::{DnsHeader, DnsResponse};
use super::{CLASS_IN, HEADER_LEN};
use ferrous_tunnel_domain::RecordType;
use std::net::{Ipv4Addr, Ipv6Addr};

const MAX_NAME_LEN: usize = 255;
const MAX_POINTER_JUMPS: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseStatus {
    Good,
    Bad,
    /// The buffer ended before the message did. Parsing is not resumable:
    /// callers must buffer the whole message and parse again from scratch.
    IncompleteInput,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Start,
    Question,
    Answer,
    Authority,
    Additional,
}

/// Section-by-section walker over one complete DNS response message.
pub struct ResponseParser<'a> {
    msg: &'a [u8],
    pos: usize,
    state: State,
}

impl<'a> ResponseParser<'a> {
    /// Parses `msg` into `response`, returning the status and the number of
    /// bytes consumed. `response` may be partially filled when the status is
    /// not `Good`.
    pub fn parse(response: &mut DnsResponse, msg: &'a [u8]) -> (ParseStatus, usize) {
        let mut parser = ResponseParser {
            msg,
            pos: 0,
            state: State::Start,
        };
        let status = match parser.run(response) {
            Ok(()) => ParseStatus::Good,
            Err(status) => status,
        };
        (status, parser.pos)
    }

    /// Parses a whole message, discarding partial results on failure.
    pub fn parse_message(msg: &[u8]) -> Result<DnsResponse, ParseStatus> {
        let mut response = DnsResponse::default();
        match ResponseParser::parse(&mut response, msg) {
            (ParseStatus::Good, _) => Ok(response),
            (status, _) => Err(status),
        }
    }

    fn run(&mut self, response: &mut DnsResponse) -> Result<(), ParseStatus> {
        loop {
            self.state = match self.state {
                State::Start => {
                    self.header(response)?;
                    State::Question
                }
                State::Question => {
                    for _ in 0..response.header.qdcount {
                        self.skip_name()?;
                        self.take(4)?;
                    }
                    State::Answer
                }
                State::Answer => {
                    for _ in 0..response.header.ancount {
                        self.answer(response)?;
                    }
                    State::Authority
                }
                State::Authority => {
                    for _ in 0..response.header.nscount {
                        self.skip_record()?;
                    }
                    State::Additional
                }
                State::Additional => {
                    for _ in 0..response.header.arcount {
                        self.skip_record()?;
                    }
                    return Ok(());
                }
            };
        }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], ParseStatus> {
        let msg: &'a [u8] = self.msg;
        if msg.len() - self.pos < n {
            return Err(ParseStatus::IncompleteInput);
        }
        let slice = &msg[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    fn header(&mut self, response: &mut DnsResponse) -> Result<(), ParseStatus> {
        let raw: &[u8; HEADER_LEN] = self
            .take(HEADER_LEN)?
            .try_into()
            .map_err(|_| ParseStatus::Bad)?;
        let header = DnsHeader::decode(raw);
        if !header.qr {
            return Err(ParseStatus::Bad);
        }
        response.header = header;
        Ok(())
    }

    fn skip_name(&mut self) -> Result<(), ParseStatus> {
        loop {
            let len = self.take(1)?[0] as usize;
            match len & 0xc0 {
                0x00 if len == 0 => return Ok(()),
                0x00 => {
                    self.take(len)?;
                }
                0xc0 => {
                    self.take(1)?;
                    return Ok(());
                }
                _ => return Err(ParseStatus::Bad),
            }
        }
    }

    /// NAME, TYPE, CLASS, TTL, RDLENGTH, RDATA, contents ignored.
    fn skip_record(&mut self) -> Result<(), ParseStatus> {
        self.skip_name()?;
        let fixed = self.take(10)?;
        let rdlength = u16::from_be_bytes([fixed[8], fixed[9]]) as usize;
        self.take(rdlength)?;
        Ok(())
    }

    fn answer(&mut self, response: &mut DnsResponse) -> Result<(), ParseStatus> {
        self.skip_name()?;
        let fixed = self.take(10)?;
        let rtype = u16::from_be_bytes([fixed[0], fixed[1]]);
        let class = u16::from_be_bytes([fixed[2], fixed[3]]);
        let rdlength = u16::from_be_bytes([fixed[8], fixed[9]]) as usize;

        let rtype = match RecordType::from_code(rtype) {
            Some(
                t @ (RecordType::A | RecordType::AAAA | RecordType::CNAME | RecordType::DNAME),
            ) => t,
            _ => return Err(ParseStatus::Bad),
        };
        if class != CLASS_IN {
            return Err(ParseStatus::Bad);
        }

        let rdata_start = self.pos;
        let rdata = self.take(rdlength)?;

        match rtype {
            RecordType::A => {
                let octets: [u8; 4] = rdata.try_into().map_err(|_| ParseStatus::Bad)?;
                response.a.push(Ipv4Addr::from(octets));
            }
            RecordType::AAAA => {
                let octets: [u8; 16] = rdata.try_into().map_err(|_| ParseStatus::Bad)?;
                response.aaaa.push(Ipv6Addr::from(octets));
            }
            RecordType::CNAME => {
                let name = self.read_name(rdata_start, rdata_start + rdlength)?;
                response.cname.push(name);
            }
            // the synthesized CNAME that accompanies a DNAME carries the answer
            _ => {}
        }
        Ok(())
    }

    /// Decodes a possibly compressed name starting at absolute `offset`.
    /// Inline labels must end before `limit` until the first pointer jump.
    fn read_name(&self, mut offset: usize, mut limit: usize) -> Result<String, ParseStatus> {
        let mut name = String::new();
        let mut jumps = 0;

        loop {
            if offset >= limit {
                return Err(ParseStatus::Bad);
            }
            let len = self.msg[offset] as usize;
            match len & 0xc0 {
                0x00 if len == 0 => return Ok(name),
                0x00 => {
                    let end = offset + 1 + len;
                    if end > limit {
                        return Err(ParseStatus::Bad);
                    }
                    if !name.is_empty() {
                        name.push('.');
                    }
                    name.push_str(&String::from_utf8_lossy(&self.msg[offset + 1..end]));
                    if name.len() > MAX_NAME_LEN {
                        return Err(ParseStatus::Bad);
                    }
                    offset = end;
                }
                0xc0 => {
                    if offset + 1 >= limit {
                        return Err(ParseStatus::Bad);
                    }
                    let target = ((len & 0x3f) << 8) | self.msg[offset + 1] as usize;
                    jumps += 1;
                    // pointers only go backwards, which also rules out loops
                    if jumps > MAX_POINTER_JUMPS || target >= offset {
                        return Err(ParseStatus::Bad);
                    }
                    offset = target;
                    limit = self.msg.len();
                }
                _ => return Err(ParseStatus::Bad),
            }
        }
    }
}
