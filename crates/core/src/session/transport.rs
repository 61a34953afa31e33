/// Client transport request parsed from the RTSP `Transport` header
/// (RFC 2326 §12.39).
///
/// ## Wire format examples
///
/// ```text
/// UDP unicast:
///   Transport: RTP/AVP;unicast;client_port=8000-8001
///
/// TCP interleaved (RFC 2326 §10.12):
///   Transport: RTP/AVP/TCP;unicast;interleaved=0-1
/// ```
///
/// Missing second values default to the first plus one: `client_port=8000`
/// means RTCP on 8001, `interleaved=4` means RTCP on channel 5. A TCP
/// request without any `interleaved=` parameter gets channels 0-1.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportHeader {
    Udp {
        client_rtp_port: u16,
        client_rtcp_port: u16,
    },
    Interleaved {
        rtp_channel: u8,
        rtcp_channel: u8,
    },
}

impl TransportHeader {
    /// Parse the `Transport` header value.
    ///
    /// ## Examples
    ///
    /// ```
    /// use ipcam::session::transport::TransportHeader;
    ///
    /// let udp = TransportHeader::parse("RTP/AVP;unicast;client_port=8000-8001").unwrap();
    /// assert_eq!(udp, TransportHeader::Udp { client_rtp_port: 8000, client_rtcp_port: 8001 });
    ///
    /// let tcp = TransportHeader::parse("RTP/AVP/TCP;unicast;interleaved=2-3").unwrap();
    /// assert_eq!(tcp, TransportHeader::Interleaved { rtp_channel: 2, rtcp_channel: 3 });
    ///
    /// assert!(TransportHeader::parse("RTP/AVP;unicast").is_none());
    /// ```
    pub fn parse(header: &str) -> Option<Self> {
        let params: Vec<&str> = header.split(';').map(str::trim).collect();

        let interleaved = params.iter().find_map(|p| p.strip_prefix("interleaved="));
        let is_tcp = params.iter().any(|p| p.eq_ignore_ascii_case("RTP/AVP/TCP"));

        if is_tcp || interleaved.is_some() {
            let (rtp_channel, rtcp_channel) = match interleaved {
                Some(value) => parse_pair::<u8>(value)?,
                None => (0, 1),
            };
            return Some(Self::Interleaved {
                rtp_channel,
                rtcp_channel,
            });
        }

        let ports = params.iter().find_map(|p| p.strip_prefix("client_port="))?;
        let (client_rtp_port, client_rtcp_port) = parse_pair::<u16>(ports)?;
        Some(Self::Udp {
            client_rtp_port,
            client_rtcp_port,
        })
    }
}

/// `a-b` or `a` (then `b = a + 1`), each checked against `T`'s range.
fn parse_pair<T: TryFrom<u32>>(value: &str) -> Option<(T, T)> {
    let (first, second) = match value.split_once('-') {
        Some((first, second)) => (first.trim().parse::<u32>().ok()?, second.trim().parse().ok()?),
        None => {
            let first = value.trim().parse::<u32>().ok()?;
            (first, first.checked_add(1)?)
        }
    };
    Some((T::try_from(first).ok()?, T::try_from(second).ok()?))
}
