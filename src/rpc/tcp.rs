//! Rpc over a plain tcp connection.
//!
//! Request:  `[u32 len][u8 method][payload]`
//! Response: `[u32 len][u8 status][payload]`
//!
//! `len` counts the method or status byte and the payload. Calls block on the
//! process-wide runtime, one call in flight at a time.
use super::{
    codec::{from_bytes, Decode, Encode, MAX_MESSAGE_SIZE},
    Condition, Dependency, DependencyRpc, Input, RpcError, WriteAddresses,
};
use crate::utils::tokio_rt::runtime;

use std::{io, time::Duration};

use bytes::BufMut;
use iota::iota;
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::TcpStream,
    time::timeout,
};

iota! {
    pub const GET_ADDRESS_BASE: u8 = iota;
        , REPORT_BASIC_BLOCK_TOTAL
        , REPORT_BASIC_BLOCK_COVERED
        , PULL_NEW_INPUTS
        , PUSH_DEPENDENCY
        , PULL_CONDITIONS
        , PUSH_WRITE_ADDRESSES
        , SESSION_ALIVE
}

iota! {
    pub const STATUS_VALUE: u8 = iota;
        , STATUS_NONE
        , STATUS_ERROR  // payload is the message.
}

pub struct TcpRpc {
    addr: String,
    timeout: Duration,
    conn: Option<TcpStream>,
}

impl TcpRpc {
    /// Client for `addr`, not connected yet.
    pub fn new(addr: &str, timeout: Duration) -> Self {
        Self {
            addr: addr.to_string(),
            timeout,
            conn: None,
        }
    }

    pub fn connect(addr: &str, timeout: Duration) -> Result<Self, RpcError> {
        let mut rpc = Self::new(addr, timeout);
        rpc.reconnect()?;
        Ok(rpc)
    }

    pub fn is_connected(&self) -> bool {
        self.conn.is_some()
    }

    fn call<T: Encode, R: Decode>(&mut self, method: u8, req: &T) -> Result<Option<R>, RpcError> {
        let len = 1 + req.encoded_len();
        if len > MAX_MESSAGE_SIZE {
            return Err(RpcError::Peer(format!("request too big: {}", len)));
        }
        let mut frame = Vec::with_capacity(4 + len);
        frame.put_u32_le(len as u32);
        frame.put_u8(method);
        req.encode(&mut frame);

        let du = self.timeout;
        let conn = self.conn.as_mut().ok_or(RpcError::NotConnected)?;
        let ret = runtime().block_on(async { timeout(du, exchange(conn, &frame)).await });
        let (status, payload) = match ret {
            Ok(Ok(resp)) => resp,
            Ok(Err(e)) => {
                self.conn = None;
                return Err(e);
            }
            Err(_) => {
                self.conn = None;
                return Err(RpcError::Timeout);
            }
        };

        match status {
            STATUS_VALUE => Ok(Some(from_bytes(&payload)?)),
            STATUS_NONE => Ok(None),
            _ => Err(RpcError::Peer(String::from_utf8_lossy(&payload).into_owned())),
        }
    }
}

async fn exchange(conn: &mut TcpStream, frame: &[u8]) -> Result<(u8, Vec<u8>), RpcError> {
    conn.write_all(frame).await?;
    let len = conn.read_u32_le().await? as usize;
    if len == 0 || len > MAX_MESSAGE_SIZE {
        return Err(RpcError::Peer(format!("bad response length: {}", len)));
    }
    let status = conn.read_u8().await?;
    // grows with what actually arrives, not with what the peer announced.
    let want = len - 1;
    let mut payload = Vec::new();
    (&mut *conn).take(want as u64).read_to_end(&mut payload).await?;
    if payload.len() != want {
        return Err(RpcError::Io(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            format!("response truncated: {} of {} bytes", payload.len(), want),
        )));
    }
    Ok((status, payload))
}

impl DependencyRpc for TcpRpc {
    fn address_base(&mut self) -> Result<u32, RpcError> {
        self.call(GET_ADDRESS_BASE, &())?
            .ok_or_else(|| RpcError::Peer("no address base".into()))
    }

    fn report_basic_block_total(&mut self, count: u32) -> Result<(), RpcError> {
        self.call::<_, ()>(REPORT_BASIC_BLOCK_TOTAL, &count).map(drop)
    }

    fn report_basic_block_covered(&mut self, count: u32) -> Result<(), RpcError> {
        self.call::<_, ()>(REPORT_BASIC_BLOCK_COVERED, &count)
            .map(drop)
    }

    fn pull_new_inputs(&mut self) -> Result<Option<Vec<Input>>, RpcError> {
        self.call(PULL_NEW_INPUTS, &())
    }

    fn push_dependency(&mut self, dep: &Dependency) -> Result<(), RpcError> {
        self.call::<_, ()>(PUSH_DEPENDENCY, dep).map(drop)
    }

    fn pull_conditions(&mut self) -> Result<Option<Vec<Condition>>, RpcError> {
        self.call(PULL_CONDITIONS, &())
    }

    fn push_write_addresses(&mut self, wa: &WriteAddresses) -> Result<(), RpcError> {
        self.call::<_, ()>(PUSH_WRITE_ADDRESSES, wa).map(drop)
    }

    fn session_alive(&mut self) -> Result<bool, RpcError> {
        Ok(self.call(SESSION_ALIVE, &())?.unwrap_or(false))
    }

    fn reconnect(&mut self) -> Result<(), RpcError> {
        self.conn = None;
        let du = self.timeout;
        let addr = self.addr.clone();
        let conn = runtime()
            .block_on(async { timeout(du, TcpStream::connect(addr)).await })
            .map_err(|_| RpcError::Timeout)??;
        conn.set_nodelay(true)?;
        self.conn = Some(conn);
        log::info!("connected to {}", self.addr);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rpc::codec::to_bytes;
    use std::{
        io::{Read, Write},
        net::TcpListener,
        thread::{self, JoinHandle},
    };

    /// Answer `calls` requests of one client, returning the methods seen.
    fn peer(listener: TcpListener, calls: usize) -> JoinHandle<Vec<u8>> {
        thread::spawn(move || {
            let (mut s, _) = listener.accept().unwrap();
            let mut methods = Vec::new();
            for _ in 0..calls {
                let mut len = [0u8; 4];
                s.read_exact(&mut len).unwrap();
                let mut body = vec![0; u32::from_le_bytes(len) as usize];
                s.read_exact(&mut body).unwrap();
                let method = body[0];
                methods.push(method);
                let (status, payload) = match method {
                    GET_ADDRESS_BASE => (STATUS_VALUE, to_bytes(&0xffff_ffffu32)),
                    PULL_NEW_INPUTS => (STATUS_NONE, Vec::new()),
                    PULL_CONDITIONS => {
                        let c = Condition {
                            condition_address: 0x8100_0040,
                            successor: 2,
                            ..Default::default()
                        };
                        (STATUS_VALUE, to_bytes(&vec![c]))
                    }
                    PUSH_DEPENDENCY => {
                        let dep: Dependency = from_bytes(&body[1..]).unwrap();
                        assert_eq!(dep.input.sig, "sig");
                        (STATUS_VALUE, Vec::new())
                    }
                    SESSION_ALIVE => (STATUS_VALUE, to_bytes(&true)),
                    _ => (STATUS_ERROR, b"unsupported".to_vec()),
                };
                let mut frame = Vec::new();
                frame.put_u32_le(1 + payload.len() as u32);
                frame.put_u8(status);
                frame.extend_from_slice(&payload);
                s.write_all(&frame).unwrap();
            }
            methods
        })
    }

    #[test]
    fn calls_over_tcp() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let handle = peer(listener, 6);

        let mut rpc = TcpRpc::connect(&addr, Duration::from_secs(5)).unwrap();
        assert_eq!(rpc.address_base().unwrap(), 0xffff_ffff);
        assert!(rpc.pull_new_inputs().unwrap().is_none());
        let conds = rpc.pull_conditions().unwrap().unwrap();
        assert_eq!(conds[0].successor, 2);
        let mut dep = Dependency::default();
        dep.input.sig = "sig".into();
        rpc.push_dependency(&dep).unwrap();
        assert!(rpc.session_alive().unwrap());
        assert!(matches!(
            rpc.report_basic_block_total(10),
            Err(RpcError::Peer(_))
        ));

        let methods = handle.join().unwrap();
        assert_eq!(
            methods,
            vec![
                GET_ADDRESS_BASE,
                PULL_NEW_INPUTS,
                PULL_CONDITIONS,
                PUSH_DEPENDENCY,
                SESSION_ALIVE,
                REPORT_BASIC_BLOCK_TOTAL
            ]
        );
    }

    #[test]
    fn announced_length_is_not_trusted() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let handle = thread::spawn(move || {
            let (mut s, _) = listener.accept().unwrap();
            let mut req = [0u8; 5];
            s.read_exact(&mut req).unwrap();
            let mut frame = Vec::new();
            frame.put_u32_le(0x7000_0000);
            frame.put_u8(STATUS_VALUE);
            frame.extend_from_slice(&[1, 2, 3]);
            s.write_all(&frame).unwrap();
        });

        let mut rpc = TcpRpc::connect(&addr, Duration::from_secs(5)).unwrap();
        let ret = rpc.pull_new_inputs();
        handle.join().unwrap();
        assert!(matches!(ret, Err(RpcError::Io(ref e)) if e.kind() == io::ErrorKind::UnexpectedEof));
        assert!(!rpc.is_connected());
    }

    #[test]
    fn closed_peer_drops_connection() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let handle = peer(listener, 0);

        let mut rpc = TcpRpc::connect(&addr, Duration::from_secs(5)).unwrap();
        handle.join().unwrap();
        assert!(rpc.session_alive().is_err());
        assert!(!rpc.is_connected());
        assert!(matches!(rpc.pull_new_inputs(), Err(RpcError::NotConnected)));
    }
}
