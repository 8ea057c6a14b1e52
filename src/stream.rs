//! The transport underneath a WebSocket connection: a plain or
//! TLS-wrapped `tokio::net::TcpStream`, plus the handful of helpers (DNS +
//! connect with a timeout, TLS accept/connect) that both the client and
//! the server need. TLS itself is delegated entirely to `tokio-rustls`
//! (per spec §1 scope — this module only toggles it on or off per
//! connection); the enum-of-two-variants approach and its manual
//! `AsyncRead`/`AsyncWrite` forwarding follows the teacher crate's
//! `SocketFlowStream`.

use crate::error::{Error, Result};
use pki_types::{CertificateDer, PrivateKeyDer};
use std::fs::File;
use std::io;
use std::io::BufReader;
use std::net::SocketAddr;
use std::path::Path;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::{TcpStream, ToSocketAddrs};
use tokio::time::{timeout, Duration};
use tokio_rustls::{client::TlsStream as ClientTlsStream, server::TlsStream as ServerTlsStream};

pub enum Socket {
    Plain(TcpStream),
    TlsClient(Box<ClientTlsStream<TcpStream>>),
    TlsServer(Box<ServerTlsStream<TcpStream>>),
}

impl Socket {
    pub fn peer_addr(&self) -> io::Result<SocketAddr> {
        match self {
            Socket::Plain(s) => s.peer_addr(),
            Socket::TlsClient(s) => s.get_ref().0.peer_addr(),
            Socket::TlsServer(s) => s.get_ref().0.peer_addr(),
        }
    }

    pub fn set_nodelay(&self, nodelay: bool) -> io::Result<()> {
        match self {
            Socket::Plain(s) => s.set_nodelay(nodelay),
            Socket::TlsClient(s) => s.get_ref().0.set_nodelay(nodelay),
            Socket::TlsServer(s) => s.get_ref().0.set_nodelay(nodelay),
        }
    }
}

impl AsyncRead for Socket {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Socket::Plain(s) => Pin::new(s).poll_read(cx, buf),
            Socket::TlsClient(s) => Pin::new(s.as_mut()).poll_read(cx, buf),
            Socket::TlsServer(s) => Pin::new(s.as_mut()).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for Socket {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match self.get_mut() {
            Socket::Plain(s) => Pin::new(s).poll_write(cx, buf),
            Socket::TlsClient(s) => Pin::new(s.as_mut()).poll_write(cx, buf),
            Socket::TlsServer(s) => Pin::new(s.as_mut()).poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Socket::Plain(s) => Pin::new(s).poll_flush(cx),
            Socket::TlsClient(s) => Pin::new(s.as_mut()).poll_flush(cx),
            Socket::TlsServer(s) => Pin::new(s.as_mut()).poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Socket::Plain(s) => Pin::new(s).poll_shutdown(cx),
            Socket::TlsClient(s) => Pin::new(s.as_mut()).poll_shutdown(cx),
            Socket::TlsServer(s) => Pin::new(s.as_mut()).poll_shutdown(cx),
        }
    }
}

/// Resolves and connects a plain TCP socket within `connect_timeout`.
pub async fn connect_tcp(addr: impl ToSocketAddrs, connect_timeout: Duration) -> Result<TcpStream> {
    let stream = timeout(connect_timeout, TcpStream::connect(addr))
        .await
        .map_err(|_| Error::Timeout)??;
    stream.set_nodelay(true)?;
    Ok(stream)
}

/// Wraps `tcp` in a TLS client session for `server_name`, using the
/// platform `webpki-roots` trust anchors.
pub async fn connect_tls(tcp: TcpStream, server_name: &str) -> Result<Socket> {
    let mut root_store = rustls::RootCertStore::empty();
    root_store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
    let config = rustls::ClientConfig::builder()
        .with_root_certificates(root_store)
        .with_no_client_auth();
    let connector = tokio_rustls::TlsConnector::from(Arc::new(config));
    let dns_name = pki_types::ServerName::try_from(server_name.to_string())
        .map_err(|e| Error::TlsError(e.to_string()))?;
    let tls_stream = connector
        .connect(dns_name, tcp)
        .await
        .map_err(|e| Error::TlsError(e.to_string()))?;
    Ok(Socket::TlsClient(Box::new(tls_stream)))
}

/// Loads a certificate chain and private key from PEM files and builds a
/// `rustls::ServerConfig` for [`accept_tls`], mirroring the teacher
/// crate's TLS example binaries (`load_certs`/`load_key` over
/// `rustls_pemfile::{certs, private_key}`).
pub fn load_tls_config(cert_path: &Path, key_path: &Path) -> Result<Arc<rustls::ServerConfig>> {
    let certs: Vec<CertificateDer<'static>> = rustls_pemfile::certs(&mut BufReader::new(
        File::open(cert_path).map_err(Error::from)?,
    ))
    .collect::<io::Result<_>>()
    .map_err(Error::from)?;

    let key: PrivateKeyDer<'static> =
        rustls_pemfile::private_key(&mut BufReader::new(File::open(key_path).map_err(Error::from)?))
            .map_err(Error::from)?
            .ok_or_else(|| Error::TlsError("no private key found in key file".to_string()))?;

    let config = rustls::ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .map_err(|e| Error::TlsError(e.to_string()))?;

    Ok(Arc::new(config))
}

/// Accepts a TLS server session on `tcp` using a pre-built server config.
/// Use [`load_tls_config`] to build one from PEM files, or construct a
/// `rustls::ServerConfig` directly for other key material sources.
pub async fn accept_tls(tcp: TcpStream, config: Arc<rustls::ServerConfig>) -> Result<Socket> {
    let acceptor = tokio_rustls::TlsAcceptor::from(config);
    let tls_stream = acceptor
        .accept(tcp)
        .await
        .map_err(|e| Error::TlsError(e.to_string()))?;
    Ok(Socket::TlsServer(Box::new(tls_stream)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn connect_tcp_times_out_against_an_unroutable_address() {
        // TEST-NET-3, RFC 5737: reserved for documentation, never routes.
        let addr = "203.0.113.1:81".parse::<SocketAddr>().unwrap();
        let result = connect_tcp(addr, Duration::from_millis(50)).await;
        assert!(result.is_err());
    }

    #[test]
    fn load_tls_config_reports_missing_cert_file() {
        let err = load_tls_config(Path::new("/nonexistent/cert.pem"), Path::new("/nonexistent/key.pem"))
            .unwrap_err();
        assert!(matches!(err, Error::IOError { .. }));
    }
}
