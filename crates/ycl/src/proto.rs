//! Protocol records spoken between `ycl` clients and EDS services.
//!
//! Every request is answered with a [`StatusResp`] unless noted otherwise.
//! A connector request is answered with a passed descriptor (or errno), a
//! resolver request with a completion descriptor.

use eds_core::netstring_record;

use crate::error::{Result, YclError};

netstring_record! {
    /// Outcome of a request: exactly one of the two messages is set.
    pub struct StatusResp<'a> {
        pub okmsg: Data,
        pub errmsg: Data,
    }
}

netstring_record! {
    /// Host discovery over an address range.
    pub struct SweeperReq<'a> {
        pub addrs: Data,
        pub arp: Data,
    }
}

netstring_record! {
    /// Capture on `iface` into the descriptor passed ahead of the request.
    pub struct PcapReq<'a> {
        pub iface: Data,
        pub filter: Data,
    }
}

netstring_record! {
    pub struct EthframeReq<'a> {
        pub custom_frames: DataArray,
        pub categories: Data,
        pub pps: Long,
        pub iface: Data,
        pub eth_src: Data,
        pub eth_dst: Data,
        pub ip_src: Data,
        pub ip_dsts: DataArray,
        pub port_dsts: DataArray,
    }
}

netstring_record! {
    /// Open a TCP connection on the caller's behalf.
    pub struct ConnectorReq<'a> {
        pub reuse_addr: Long,
        pub proto: Data,
        pub bindaddr: Data,
        pub bindport: Data,
        pub dstaddr: Data,
        pub dstport: Data,
        pub nretries: Long,
    }
}

netstring_record! {
    /// Resolve `hosts` and write results to the descriptor passed ahead of
    /// the request.
    pub struct ResolverReq<'a> {
        pub hosts: Data,
        pub compress: Long,
    }
}

netstring_record! {
    /// Job queue control.
    pub struct KnegReq<'a> {
        pub action: Data,
        pub id: Data,
        pub kind: Data,
        pub name: Data,
        pub timeout: Long,
        pub params: DataArray,
    }
}

netstring_record! {
    pub struct PortList<'a> {
        pub name: Data,
        pub ports: LongArray,
    }
}

impl<'a> StatusResp<'a> {
    pub fn ok(msg: &'a str) -> Self {
        Self { okmsg: msg.as_bytes(), errmsg: b"" }
    }

    pub fn err(msg: &'a str) -> Self {
        Self { okmsg: b"", errmsg: msg.as_bytes() }
    }

    /// The ok message, or the error message as `YclError::Remote`. An empty
    /// field counts as unset; an error wins over an ok message.
    pub fn into_result(self) -> Result<String> {
        match (self.okmsg.is_empty(), self.errmsg.is_empty()) {
            (_, false) => Err(YclError::Remote(String::from_utf8_lossy(self.errmsg).into_owned())),
            (false, true) => Ok(String::from_utf8_lossy(self.okmsg).into_owned()),
            (true, true) => Err(YclError::NoStatus),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use eds_core::{Buffer, Message, Record};

    #[test]
    fn test_status_resp() {
        assert_eq!(StatusResp::ok("done").into_result().unwrap(), "done");
        let err = StatusResp::err("addrs not set").into_result().unwrap_err();
        assert_eq!(err.to_string(), "addrs not set");
        assert!(matches!(StatusResp::default().into_result(), Err(YclError::NoStatus)));
    }

    #[test]
    fn test_sweeper_wire_bytes() {
        let mut out = Buffer::new();
        SweeperReq { addrs: b"10.0.0.1", arp: b"yes" }.serialize(&mut out).unwrap();
        assert_eq!(out.as_slice(), b"8:10.0.0.1,3:yes,");
    }

    #[test]
    fn test_kneg_through_message() {
        let req = KnegReq {
            action: b"queue",
            id: b"",
            kind: b"nmap",
            name: b"scan-1",
            timeout: 300,
            params: vec![b"-sT".as_slice(), b"10.0.0.0/24".as_slice()],
        };
        let mut msg = Message::new();
        msg.create(&req).unwrap();
        let back: KnegReq<'_> = msg.parse().unwrap();
        assert_eq!(back, req);
    }

    #[test]
    fn test_connector_arity_mismatch() {
        let mut msg = Message::new();
        msg.create(&SweeperReq { addrs: b"a", arp: b"" }).unwrap();
        assert!(msg.parse::<ConnectorReq<'_>>().is_err());
    }
}
