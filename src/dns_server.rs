/* src/dns_server.rs */

use crate::resolver::DnsResolver;
use fancy_log::{LogLevel, log};
use hickory_proto::op::{Message, MessageType, OpCode, ResponseCode};
use hickory_proto::rr::{RData, Record, RecordType};
use hickory_proto::serialize::binary::{BinDecodable, BinEncodable};
use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{self, AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream, UdpSocket};

/// Serves DNS over UDP and TCP on `bind_addr` until either listener fails.
pub async fn run_server(
    bind_addr: &str,
    resolver: Arc<DnsResolver>,
) -> Result<(), Box<dyn std::error::Error>> {
    let udp_socket = Arc::new(UdpSocket::bind(bind_addr).await?);
    let tcp_listener = TcpListener::bind(bind_addr).await?;

    log(
        LogLevel::Info,
        &format!("DNS server listening for UDP and TCP on {}", bind_addr),
    );

    tokio::select! {
        result = serve_udp(udp_socket, resolver.clone()) => result?,
        result = serve_tcp(tcp_listener, resolver) => result?,
    }
    Ok(())
}

async fn serve_udp(socket: Arc<UdpSocket>, resolver: Arc<DnsResolver>) -> io::Result<()> {
    // Sized for EDNS payloads
    let mut buf = [0u8; 4096];
    loop {
        let (len, addr) = match socket.recv_from(&mut buf).await {
            Ok(received) => received,
            Err(e) => {
                log(LogLevel::Warn, &format!("UDP receive failed: {}", e));
                continue;
            }
        };
        let data = buf[..len].to_vec();
        let socket = socket.clone();
        let resolver = resolver.clone();

        tokio::spawn(async move {
            if let Some(response) = handle_request(data, addr, resolver).await {
                if let Err(e) = socket.send_to(&response, addr).await {
                    log(
                        LogLevel::Error,
                        &format!("Failed to send UDP response to {}: {}", addr, e),
                    );
                }
            }
        });
    }
}

async fn serve_tcp(listener: TcpListener, resolver: Arc<DnsResolver>) -> io::Result<()> {
    loop {
        let (stream, addr) = listener.accept().await?;
        let resolver = resolver.clone();
        tokio::spawn(async move {
            if let Err(e) = handle_tcp_connection(stream, addr, resolver).await {
                log(
                    LogLevel::Warn,
                    &format!("TCP connection error from {}: {}", addr, e),
                );
            }
        });
    }
}

/// Answers length-prefixed messages on one connection until the client
/// closes it.
async fn handle_tcp_connection(
    mut stream: TcpStream,
    addr: SocketAddr,
    resolver: Arc<DnsResolver>,
) -> io::Result<()> {
    loop {
        let mut len_buf = [0u8; 2];
        match stream.read_exact(&mut len_buf).await {
            Ok(_) => {}
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(()),
            Err(e) => return Err(e),
        }
        let mut request = vec![0u8; u16::from_be_bytes(len_buf) as usize];
        stream.read_exact(&mut request).await?;

        let Some(response) = handle_request(request, addr, resolver.clone()).await else {
            return Ok(());
        };
        let Ok(len) = u16::try_from(response.len()) else {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "response larger than 64KiB",
            ));
        };
        stream.write_all(&len.to_be_bytes()).await?;
        stream.write_all(&response).await?;
    }
}

/// The core request handler, protocol-agnostic.
async fn handle_request(
    data: Vec<u8>,
    addr: SocketAddr,
    resolver: Arc<DnsResolver>,
) -> Option<Vec<u8>> {
    let request = match Message::from_bytes(&data) {
        Ok(req) => req,
        Err(e) => {
            log(
                LogLevel::Warn,
                &format!("Failed to parse request from {}: {}", addr, e),
            );
            return None;
        }
    };

    if request.message_type() != MessageType::Query || request.op_code() != OpCode::Query {
        return None;
    }

    let mut response = Message::new();
    response.set_id(request.id());
    response.set_message_type(MessageType::Response);
    response.set_op_code(OpCode::Query);
    response.set_authoritative(true);
    response.set_recursion_desired(request.recursion_desired());

    let query = match request.queries().first() {
        Some(q) => q,
        None => {
            response.set_response_code(ResponseCode::FormErr);
            return response.to_bytes().ok();
        }
    };
    response.add_query(query.clone());

    let edns = request.extensions().is_some();
    let answer = resolver.resolve(query, addr.ip(), edns).await;

    log(
        LogLevel::Debug,
        &format!(
            "{} inquiry {} {} -> {} {}",
            addr.ip(),
            query.name(),
            query.query_type(),
            answer.code,
            format_records(&answer.answers)
        ),
    );

    response.set_response_code(answer.code);
    for record in answer.answers {
        response.add_answer(record);
    }
    for record in answer.authority {
        response.add_name_server(record);
    }

    response.to_bytes().ok()
}

/// Helper function to format DNS records into a concise string for logging.
fn format_records(records: &[Record]) -> String {
    let mut grouped = BTreeMap::<RecordType, Vec<String>>::new();

    for record in records {
        let value = match record.data() {
            RData::A(addr) => addr.to_string(),
            RData::AAAA(addr) => addr.to_string(),
            RData::CNAME(name) => name.to_string().trim_end_matches('.').to_string(),
            RData::MX(mx) => format!("{} {}", mx.preference(), mx.exchange()),
            RData::NS(name) => name.to_string(),
            RData::PTR(name) => name.to_string(),
            RData::SRV(srv) => format!("{}:{}", srv.target(), srv.port()),
            RData::TXT(txt) => txt.to_string(),
            other => other.to_string(),
        };
        grouped.entry(record.record_type()).or_default().push(value);
    }

    if grouped.is_empty() {
        return "[]".to_string();
    }

    grouped
        .iter()
        .map(|(rtype, vals)| format!("{} [{}]", rtype, vals.join(", ")))
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geoip::NoGeo;
    use crate::health::HealthTestRunner;
    use crate::zone::{ZoneOptions, ZoneStore, parse_zone};
    use hickory_proto::op::Query;
    use hickory_proto::rr::Name;

    fn resolver() -> Arc<DnsResolver> {
        let store = Arc::new(ZoneStore::new());
        let json = br#"{"data": {"www": {"a": ["192.0.2.1"]}}}"#;
        let zone = parse_zone("example.com", json, &ZoneOptions::default()).unwrap();
        store.insert(Arc::new(zone));
        Arc::new(DnsResolver::new(
            store,
            Arc::new(HealthTestRunner::new()),
            Arc::new(NoGeo),
        ))
    }

    fn request(name: &str, rtype: RecordType) -> Vec<u8> {
        let mut message = Message::new();
        message.set_id(4242);
        message.set_message_type(MessageType::Query);
        message.set_op_code(OpCode::Query);
        message.add_query(Query::query(Name::from_ascii(name).unwrap(), rtype));
        message.to_bytes().unwrap()
    }

    fn client() -> SocketAddr {
        "198.51.100.7:5353".parse().unwrap()
    }

    #[tokio::test]
    async fn answers_are_authoritative_and_echo_the_question() {
        let bytes = handle_request(request("www.example.com.", RecordType::A), client(), resolver())
            .await
            .unwrap();
        let response = Message::from_bytes(&bytes).unwrap();
        assert_eq!(response.id(), 4242);
        assert_eq!(response.message_type(), MessageType::Response);
        assert!(response.authoritative());
        assert_eq!(response.queries().len(), 1);
        assert_eq!(response.response_code(), ResponseCode::NoError);
        assert_eq!(response.answers().len(), 1);
    }

    #[tokio::test]
    async fn negative_answers_carry_the_soa() {
        let bytes = handle_request(request("nope.example.com.", RecordType::A), client(), resolver())
            .await
            .unwrap();
        let response = Message::from_bytes(&bytes).unwrap();
        assert_eq!(response.response_code(), ResponseCode::NXDomain);
        assert_eq!(response.name_servers().len(), 1);
    }

    #[tokio::test]
    async fn responses_and_garbage_are_dropped() {
        assert!(handle_request(vec![1, 2, 3], client(), resolver()).await.is_none());

        let mut message = Message::new();
        message.set_message_type(MessageType::Response);
        let bytes = message.to_bytes().unwrap();
        assert!(handle_request(bytes, client(), resolver()).await.is_none());
    }
}
