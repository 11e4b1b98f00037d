//! 무선 드라이버 경계
//!
//! 실제 트랜시버 드라이버는 외부 구성 요소다. 프로토콜 로직은 `RadioLink`로
//! 응답을 보내고 `RxEvent`로 수신 프레임을 받는다.
//!
//! 바이너리에서는 UDP 소켓이 무선 링크를 대신한다. 데이터그램 하나가 무선 패킷 하나이며,
//! 송신 방향(프레임)에는 수신 신호 정보를 담은 6바이트 envelope가 앞에 붙는다.
//!
//! ```text
//! +-----------+-----------+--------------+
//! | rssi i16  | snr f32   | frame ...    |
//! +-----------+-----------+--------------+
//! ```

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use bytes::{BufMut, Bytes, BytesMut};
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tracing::warn;

use crate::{Error, Result};

/// envelope 헤더 길이
pub const ENVELOPE_LEN: usize = 6;

/// 수신 이벤트 (드라이버 콜백 인자)
#[derive(Debug, Clone, PartialEq)]
pub struct RxEvent {
    pub payload: Bytes,

    /// 수신 신호 세기 (dBm)
    pub rssi: i16,

    /// 신호 대 잡음비 (dB)
    pub snr: f32,
}

impl RxEvent {
    pub fn new(payload: impl Into<Bytes>, rssi: i16, snr: f32) -> Self {
        Self {
            payload: payload.into(),
            rssi,
            snr,
        }
    }

    /// envelope 인코딩
    pub fn to_envelope(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(ENVELOPE_LEN + self.payload.len());
        buf.put_i16_le(self.rssi);
        buf.put_f32_le(self.snr);
        buf.put_slice(&self.payload);
        buf.freeze()
    }

    /// envelope 디코딩
    pub fn from_envelope(datagram: Bytes) -> Option<Self> {
        if datagram.len() < ENVELOPE_LEN {
            return None;
        }
        let rssi = i16::from_le_bytes([datagram[0], datagram[1]]);
        let snr = f32::from_le_bytes([datagram[2], datagram[3], datagram[4], datagram[5]]);
        Some(Self {
            payload: datagram.slice(ENVELOPE_LEN..),
            rssi,
            snr,
        })
    }
}

/// 무선 송신 기능 (블로킹 send)
pub trait RadioLink {
    fn send(&mut self, frame: &[u8]) -> Result<()>;
}

/// 보낸 프레임을 메모리에 기록하는 링크 (시뮬레이션/테스트용)
#[derive(Debug, Default, Clone)]
pub struct MemoryRadio {
    pub sent: Vec<Vec<u8>>,

    /// true면 send가 실패
    pub fail_sends: bool,
}

impl MemoryRadio {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn last(&self) -> Option<&[u8]> {
        self.sent.last().map(|f| f.as_slice())
    }
}

impl RadioLink for MemoryRadio {
    fn send(&mut self, frame: &[u8]) -> Result<()> {
        if self.fail_sends {
            return Err(Error::Io(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                "radio offline",
            )));
        }
        self.sent.push(frame.to_vec());
        Ok(())
    }
}

/// UDP 기반 무선 링크 대용
///
/// 수신은 tokio 소켓으로, 응답은 같은 소켓을 복제한 std 소켓으로 바로 보낸다.
#[derive(Debug, Clone)]
pub struct UdpRadio {
    socket: Arc<UdpSocket>,
    reply: Arc<std::net::UdpSocket>,
    peer: Option<SocketAddr>,
}

/// 수신 에러 후 다음 수신까지 대기
pub const RECV_ERROR_BACKOFF: Duration = Duration::from_millis(100);

/// 커널 송신 버퍼가 찼을 때 재시도 횟수
const SEND_RETRIES: u32 = 50;

impl UdpRadio {
    pub async fn bind(addr: SocketAddr) -> Result<Self> {
        let std_socket = std::net::UdpSocket::bind(addr)?;
        let reply = std_socket.try_clone()?;
        std_socket.set_nonblocking(true)?;
        let socket = UdpSocket::from_std(std_socket)?;
        Ok(Self {
            socket: Arc::new(socket),
            reply: Arc::new(reply),
            peer: None,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    /// 응답을 보낼 상대 주소
    pub fn set_peer(&mut self, peer: SocketAddr) {
        self.peer = Some(peer);
    }

    pub fn peer(&self) -> Option<SocketAddr> {
        self.peer
    }

    pub fn socket(&self) -> Arc<UdpSocket> {
        self.socket.clone()
    }
}

impl RadioLink for UdpRadio {
    fn send(&mut self, frame: &[u8]) -> Result<()> {
        let peer = self.peer.ok_or_else(|| {
            Error::Io(std::io::Error::new(
                std::io::ErrorKind::NotConnected,
                "no peer address",
            ))
        })?;

        // 복제 소켓은 non-blocking 플래그를 공유하므로 WouldBlock이면 잠시 기다렸다 재시도
        let mut attempts = 0;
        loop {
            match self.reply.send_to(frame, peer) {
                Ok(_) => return Ok(()),
                Err(e)
                    if e.kind() == std::io::ErrorKind::WouldBlock && attempts < SEND_RETRIES =>
                {
                    attempts += 1;
                    std::thread::sleep(Duration::from_millis(1));
                }
                Err(e) => return Err(e.into()),
            }
        }
    }
}

/// 데이터그램을 `RxEvent`로 풀어 채널로 넘긴다
///
/// envelope보다 짧은 데이터그램은 버린다. 채널이 닫히면 종료.
pub async fn forward_datagrams(socket: Arc<UdpSocket>, tx: mpsc::Sender<(RxEvent, SocketAddr)>) {
    let mut buf = vec![0u8; 2048];
    loop {
        match socket.recv_from(&mut buf).await {
            Ok((len, addr)) => match RxEvent::from_envelope(Bytes::copy_from_slice(&buf[..len])) {
                Some(event) => {
                    if tx.send((event, addr)).await.is_err() {
                        break;
                    }
                }
                None => warn!("envelope 없는 데이터그램 무시: {} bytes from {}", len, addr),
            },
            Err(e) => {
                warn!("수신 에러: {}", e);
                tokio::time::sleep(RECV_ERROR_BACKOFF).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_envelope() {
        let event = RxEvent::new(vec![0u8, 1, 1, 0xAB, 1, 2, 3, 4], -97, 6.25);
        let decoded = RxEvent::from_envelope(event.to_envelope()).unwrap();
        assert_eq!(decoded, event);

        assert!(RxEvent::from_envelope(Bytes::from_static(&[1, 2, 3])).is_none());
    }

    #[test]
    fn test_memory_radio() {
        let mut radio = MemoryRadio::new();
        radio.send(&[2, 0xAA]).unwrap();
        assert_eq!(radio.last(), Some(&[2u8, 0xAA][..]));

        radio.fail_sends = true;
        assert!(radio.send(&[3, 0xAA]).is_err());
        assert_eq!(radio.sent.len(), 1);
    }

    #[tokio::test]
    async fn test_udp_radio_requires_peer() {
        let mut radio = UdpRadio::bind("127.0.0.1:0".parse().unwrap()).await.unwrap();
        assert!(radio.send(&[1, 0xAA]).is_err());

        let listener = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        radio.set_peer(listener.local_addr().unwrap());
        radio.send(&[1, 0xAA]).unwrap();

        let mut buf = [0u8; 8];
        let (len, from) = listener.recv_from(&mut buf).await.unwrap();
        assert_eq!(&buf[..len], &[1, 0xAA]);
        assert_eq!(from, radio.local_addr().unwrap());
    }

    #[tokio::test]
    async fn test_udp_radio_sends_back_to_back_replies() {
        let listener = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let mut radio = UdpRadio::bind("127.0.0.1:0".parse().unwrap()).await.unwrap();
        radio.set_peer(listener.local_addr().unwrap());

        // 수신 없이 연속 송신
        for seq in 1..=20u8 {
            radio.send(&[seq, 0xAA]).unwrap();
        }

        let mut buf = [0u8; 8];
        for seq in 1..=20u8 {
            let (len, _) = listener.recv_from(&mut buf).await.unwrap();
            assert_eq!(&buf[..len], &[seq, 0xAA]);
        }
    }

    #[tokio::test]
    async fn test_forward_datagrams() {
        let radio = UdpRadio::bind("127.0.0.1:0".parse().unwrap()).await.unwrap();
        let target = radio.local_addr().unwrap();
        let (tx, mut rx) = mpsc::channel(8);
        let task = tokio::spawn(forward_datagrams(radio.socket(), tx));

        let peer = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        peer.send_to(&[1, 2, 3], target).await.unwrap();
        let event = RxEvent::new(vec![0u8, 1, 1, 9, 9, 9, 9], -101, 3.5);
        peer.send_to(&event.to_envelope(), target).await.unwrap();

        // 짧은 데이터그램은 건너뛰고 다음 것이 전달됨
        let (forwarded, from) = rx.recv().await.unwrap();
        assert_eq!(forwarded, event);
        assert_eq!(from, peer.local_addr().unwrap());

        // 채널이 닫힌 뒤 다음 데이터그램에서 종료
        drop(rx);
        peer.send_to(&event.to_envelope(), target).await.unwrap();
        tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .unwrap()
            .unwrap();
    }
}
