//! Graph service connection settings.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use rustls::crypto::ring;
use rustls::pki_types::CertificateDer;
use rustls::{ClientConfig, RootCertStore};

use crate::transport::TransportError;

/// ALPN id for HTTP/2, which gRPC requires.
const ALPN_H2: &[u8] = b"h2";

/// Where the access graph service lives and how to authenticate to it.
#[derive(Debug, Clone)]
pub struct GraphConfig {
    /// Service address, e.g. `https://graph.example.com:443`.
    pub endpoint: String,
    /// Client certificate chain (PEM).
    pub cert: PathBuf,
    /// Client private key (PEM).
    pub key: PathBuf,
    /// Custom CA bundle (PEM). The bundled Mozilla roots are used when unset.
    pub ca: Option<PathBuf>,
    /// Name to verify the server certificate against, if it differs from the endpoint host.
    pub server_name: Option<String>,
}

impl GraphConfig {
    /// Build the mutual TLS client configuration. Only TLS 1.3 is offered.
    ///
    /// All PEM material is read and parsed up front so that a broken file
    /// fails the connection attempt before anything is dialed.
    pub async fn tls_config(&self) -> Result<ClientConfig, TransportError> {
        let cert = read_file("client certificate", &self.cert).await?;
        let chain = parse_certs("client certificate", &self.cert, &cert)?;

        let key = read_file("client key", &self.key).await?;
        let key = match rustls_pemfile::private_key(&mut key.as_slice()) {
            Ok(Some(key)) => key,
            Ok(None) => return Err(invalid("client key", &self.key, "no private key found")),
            Err(e) => return Err(invalid("client key", &self.key, e)),
        };

        let roots = match &self.ca {
            Some(path) => {
                let ca = read_file("CA bundle", path).await?;
                let mut roots = RootCertStore::empty();
                for cert in parse_certs("CA bundle", path, &ca)? {
                    roots.add(cert).map_err(|e| invalid("CA bundle", path, e))?;
                }
                roots
            }
            None => RootCertStore {
                roots: webpki_roots::TLS_SERVER_ROOTS.to_vec(),
            },
        };

        tracing::debug!(certs = chain.len(), roots = roots.len(), "Loaded client identity");

        let mut tls = ClientConfig::builder_with_provider(Arc::new(ring::default_provider()))
            .with_protocol_versions(&[&rustls::version::TLS13])?
            .with_root_certificates(roots)
            .with_client_auth_cert(chain, key)?;
        tls.alpn_protocols = vec![ALPN_H2.to_vec()];

        Ok(tls)
    }
}

async fn read_file(what: &'static str, path: &Path) -> Result<Vec<u8>, TransportError> {
    tokio::fs::read(path)
        .await
        .map_err(|source| TransportError::ReadFile {
            what,
            path: path.to_path_buf(),
            source,
        })
}

/// Parse every certificate in a PEM buffer; zero is an error.
fn parse_certs(
    what: &'static str,
    path: &Path,
    pem: &[u8],
) -> Result<Vec<CertificateDer<'static>>, TransportError> {
    let certs = rustls_pemfile::certs(&mut &pem[..])
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| invalid(what, path, e))?;
    if certs.is_empty() {
        return Err(invalid(what, path, "no certificates found"));
    }
    Ok(certs)
}

fn invalid(what: &'static str, path: &Path, reason: impl ToString) -> TransportError {
    TransportError::InvalidPem {
        what,
        path: path.to_path_buf(),
        reason: reason.to_string(),
    }
}
