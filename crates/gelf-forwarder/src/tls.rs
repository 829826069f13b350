// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Optional TLS for listeners, with client certificate verification when a client CA is set.

use crate::errors::TlsError;
use rustls::crypto::ring;
use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use rustls::server::WebPkiClientVerifier;
use rustls::{RootCertStore, ServerConfig};
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_rustls::TlsAcceptor;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TlsOptions {
    pub enabled: bool,
    pub cert_path: Option<PathBuf>,
    pub key_path: Option<PathBuf>,
    /// When set, clients must present a certificate signed by one of these CAs.
    pub client_ca_path: Option<PathBuf>,
}

/// Builds the acceptor wrapping accepted sockets, or `None` when TLS is disabled.
pub fn acceptor(options: &TlsOptions) -> Result<Option<TlsAcceptor>, TlsError> {
    if !options.enabled {
        return Ok(None);
    }
    let cert_path = options
        .cert_path
        .as_deref()
        .ok_or(TlsError::Missing("certificate"))?;
    let key_path = options
        .key_path
        .as_deref()
        .ok_or(TlsError::Missing("private key"))?;

    let certs = load_certificates(cert_path)?;
    let key = load_private_key(key_path)?;
    let provider = Arc::new(ring::default_provider());

    let builder =
        ServerConfig::builder_with_provider(provider.clone()).with_safe_default_protocol_versions()?;
    let config = match options.client_ca_path.as_deref() {
        Some(ca_path) => {
            let mut roots = RootCertStore::empty();
            for cert in load_certificates(ca_path)? {
                roots
                    .add(cert)
                    .map_err(|e| TlsError::ClientCa(e.to_string()))?;
            }
            let verifier = WebPkiClientVerifier::builder_with_provider(Arc::new(roots), provider)
                .build()
                .map_err(|e| TlsError::ClientCa(e.to_string()))?;
            builder
                .with_client_cert_verifier(verifier)
                .with_single_cert(certs, key)?
        }
        None => builder.with_no_client_auth().with_single_cert(certs, key)?,
    };

    Ok(Some(TlsAcceptor::from(Arc::new(config))))
}

fn open(path: &Path) -> Result<BufReader<File>, TlsError> {
    File::open(path)
        .map(BufReader::new)
        .map_err(|source| TlsError::Read {
            path: path.to_path_buf(),
            source,
        })
}

fn load_certificates(path: &Path) -> Result<Vec<CertificateDer<'static>>, TlsError> {
    let certs = rustls_pemfile::certs(&mut open(path)?)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|source| TlsError::Read {
            path: path.to_path_buf(),
            source,
        })?;
    if certs.is_empty() {
        return Err(TlsError::NoCertificates(path.to_path_buf()));
    }
    Ok(certs)
}

fn load_private_key(path: &Path) -> Result<PrivateKeyDer<'static>, TlsError> {
    rustls_pemfile::private_key(&mut open(path)?)
        .map_err(|source| TlsError::Read {
            path: path.to_path_buf(),
            source,
        })?
        .ok_or_else(|| TlsError::NoPrivateKey(path.to_path_buf()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rustls::pki_types::ServerName;
    use rustls::ClientConfig;
    use std::fs;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpStream};
    use tokio_rustls::TlsConnector;

    struct Material {
        _dir: tempfile::TempDir,
        cert_path: PathBuf,
        key_path: PathBuf,
        cert_der: CertificateDer<'static>,
    }

    fn self_signed() -> Material {
        let certified = rcgen::generate_simple_self_signed(vec!["localhost".to_string()]).unwrap();
        let dir = tempfile::tempdir().unwrap();
        let cert_path = dir.path().join("cert.pem");
        let key_path = dir.path().join("key.pem");
        fs::write(&cert_path, certified.cert.pem()).unwrap();
        fs::write(&key_path, certified.key_pair.serialize_pem()).unwrap();
        Material {
            _dir: dir,
            cert_path,
            key_path,
            cert_der: certified.cert.der().clone(),
        }
    }

    fn enabled(material: &Material) -> TlsOptions {
        TlsOptions {
            enabled: true,
            cert_path: Some(material.cert_path.clone()),
            key_path: Some(material.key_path.clone()),
            client_ca_path: None,
        }
    }

    #[test]
    fn test_disabled_returns_none() {
        assert!(acceptor(&TlsOptions::default()).unwrap().is_none());
    }

    #[test]
    fn test_enabled_without_key() {
        let options = TlsOptions {
            enabled: true,
            cert_path: Some(PathBuf::from("/tmp/cert.pem")),
            ..Default::default()
        };
        assert!(matches!(
            acceptor(&options),
            Err(TlsError::Missing("private key"))
        ));
    }

    #[test]
    fn test_unreadable_certificate() {
        let options = TlsOptions {
            enabled: true,
            cert_path: Some(PathBuf::from("/nonexistent/cert.pem")),
            key_path: Some(PathBuf::from("/nonexistent/key.pem")),
            client_ca_path: None,
        };
        assert!(matches!(acceptor(&options), Err(TlsError::Read { .. })));
    }

    #[test]
    fn test_certificate_file_without_certificates() {
        let material = self_signed();
        let mut options = enabled(&material);
        options.cert_path = Some(material.key_path.clone());
        assert!(matches!(
            acceptor(&options),
            Err(TlsError::NoCertificates(_))
        ));
    }

    #[test]
    fn test_key_file_without_key() {
        let material = self_signed();
        let mut options = enabled(&material);
        options.key_path = Some(material.cert_path.clone());
        assert!(matches!(acceptor(&options), Err(TlsError::NoPrivateKey(_))));
    }

    #[test]
    fn test_with_client_ca() {
        let material = self_signed();
        let mut options = enabled(&material);
        options.client_ca_path = Some(material.cert_path.clone());
        assert!(acceptor(&options).unwrap().is_some());
    }

    #[tokio::test]
    async fn test_handshake() {
        let material = self_signed();
        let acceptor = acceptor(&enabled(&material)).unwrap().unwrap();

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            let mut stream = acceptor.accept(socket).await.unwrap();
            let mut buf = [0u8; 4];
            stream.read_exact(&mut buf).await.unwrap();
            buf
        });

        let mut roots = RootCertStore::empty();
        roots.add(material.cert_der.clone()).unwrap();
        let config = ClientConfig::builder_with_provider(Arc::new(ring::default_provider()))
            .with_safe_default_protocol_versions()
            .unwrap()
            .with_root_certificates(roots)
            .with_no_client_auth();
        let connector = TlsConnector::from(Arc::new(config));
        let socket = TcpStream::connect(addr).await.unwrap();
        let mut stream = connector
            .connect(ServerName::try_from("localhost").unwrap(), socket)
            .await
            .unwrap();
        stream.write_all(b"ping").await.unwrap();
        stream.flush().await.unwrap();

        assert_eq!(&server.await.unwrap(), b"ping");
    }
}
