use std::path::{Path, PathBuf};
use tonic::transport::{Certificate, ClientTlsConfig, Identity, ServerTlsConfig};

/// The process's certificate, its key, and the roots it trusts.
#[derive(Clone, Debug)]
pub struct TlsMaterial {
    cert: Vec<u8>,
    key: Vec<u8>,
    roots: Vec<u8>,
}

#[derive(Debug, thiserror::Error)]
pub enum TlsError {
    #[error("--tls-cert, --tls-key and --tls-trust-dir must be set together; missing {0}")]
    Incomplete(&'static str),

    #[error("failed to read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("no .pem or .crt trust roots found in {}", .0.display())]
    NoTrustRoots(PathBuf),
}

// === impl TlsMaterial ===

impl TlsMaterial {
    /// Loads TLS material. Returns `None` when no paths are configured, in
    /// which case servers and clients run without TLS.
    pub fn load(
        cert: Option<&Path>,
        key: Option<&Path>,
        trust_dir: Option<&Path>,
    ) -> Result<Option<Self>, TlsError> {
        let (cert, key, trust_dir) = match (cert, key, trust_dir) {
            (None, None, None) => return Ok(None),
            (Some(c), Some(k), Some(t)) => (c, k, t),
            (None, _, _) => return Err(TlsError::Incomplete("--tls-cert")),
            (_, None, _) => return Err(TlsError::Incomplete("--tls-key")),
            (_, _, None) => return Err(TlsError::Incomplete("--tls-trust-dir")),
        };

        Ok(Some(Self {
            cert: read(cert)?,
            key: read(key)?,
            roots: read_roots(trust_dir)?,
        }))
    }

    pub fn server_config(&self) -> ServerTlsConfig {
        ServerTlsConfig::new()
            .identity(self.identity())
            .client_ca_root(Certificate::from_pem(&self.roots))
    }

    pub fn client_config(&self, server_name: &str) -> ClientTlsConfig {
        ClientTlsConfig::new()
            .identity(self.identity())
            .ca_certificate(Certificate::from_pem(&self.roots))
            .domain_name(server_name)
    }

    /// Builds the HTTP client used to fetch the catalog, presenting this
    /// process's identity.
    pub fn http_client(&self) -> reqwest::Result<reqwest::Client> {
        let mut pem = self.cert.clone();
        if !pem.ends_with(b"\n") {
            pem.push(b'\n');
        }
        pem.extend_from_slice(&self.key);

        let mut client = reqwest::Client::builder()
            .use_rustls_tls()
            .tls_built_in_root_certs(false)
            .identity(reqwest::Identity::from_pem(&pem)?);
        for root in reqwest::Certificate::from_pem_bundle(&self.roots)? {
            client = client.add_root_certificate(root);
        }
        client.build()
    }

    fn identity(&self) -> Identity {
        Identity::from_pem(&self.cert, &self.key)
    }
}

fn read(path: &Path) -> Result<Vec<u8>, TlsError> {
    std::fs::read(path).map_err(|source| TlsError::Read {
        path: path.to_path_buf(),
        source,
    })
}

/// Concatenates every `.pem` and `.crt` file in `dir` into one bundle, in
/// file name order.
fn read_roots(dir: &Path) -> Result<Vec<u8>, TlsError> {
    let entries = std::fs::read_dir(dir).map_err(|source| TlsError::Read {
        path: dir.to_path_buf(),
        source,
    })?;

    let mut paths = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|source| TlsError::Read {
            path: dir.to_path_buf(),
            source,
        })?;
        let path = entry.path();
        let is_root = matches!(
            path.extension().and_then(|e| e.to_str()),
            Some("pem" | "crt")
        );
        if is_root && path.is_file() {
            paths.push(path);
        }
    }
    if paths.is_empty() {
        return Err(TlsError::NoTrustRoots(dir.to_path_buf()));
    }
    paths.sort();

    let mut bundle = Vec::new();
    for path in paths {
        let mut pem = read(&path)?;
        if !pem.ends_with(b"\n") {
            pem.push(b'\n');
        }
        bundle.extend(pem);
    }
    Ok(bundle)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disabled_without_paths() {
        assert!(TlsMaterial::load(None, None, None).unwrap().is_none());
    }

    #[test]
    fn partial_configuration_fails() {
        let dir = tempfile::tempdir().unwrap();
        let cert = dir.path().join("tls.crt");
        std::fs::write(&cert, "cert").unwrap();

        let err = TlsMaterial::load(Some(cert.as_path()), None, Some(dir.path())).unwrap_err();
        assert!(matches!(err, TlsError::Incomplete("--tls-key")), "{err}");

        let err = TlsMaterial::load(None, Some(cert.as_path()), None).unwrap_err();
        assert!(matches!(err, TlsError::Incomplete("--tls-cert")), "{err}");
    }

    #[test]
    fn bundles_trust_roots_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let certs = dir.path().join("certs");
        let roots = dir.path().join("roots");
        std::fs::create_dir_all(&certs).unwrap();
        std::fs::create_dir_all(&roots).unwrap();
        std::fs::write(certs.join("tls.crt"), "cert").unwrap();
        std::fs::write(certs.join("tls.key"), "key").unwrap();
        std::fs::write(roots.join("b.pem"), "second\n").unwrap();
        std::fs::write(roots.join("a.crt"), "first").unwrap();
        std::fs::write(roots.join("README.txt"), "ignored").unwrap();

        let tls = TlsMaterial::load(
            Some(certs.join("tls.crt").as_path()),
            Some(certs.join("tls.key").as_path()),
            Some(roots.as_path()),
        )
        .unwrap()
        .expect("TLS must be enabled");
        assert_eq!(tls.cert, b"cert");
        assert_eq!(tls.key, b"key");
        assert_eq!(tls.roots, b"first\nsecond\n");
    }

    #[test]
    fn empty_trust_dir_fails() {
        let dir = tempfile::tempdir().unwrap();
        let cert = dir.path().join("tls.crt");
        std::fs::write(&cert, "cert").unwrap();
        let roots = dir.path().join("roots");
        std::fs::create_dir_all(&roots).unwrap();

        let err = TlsMaterial::load(
            Some(cert.as_path()),
            Some(cert.as_path()),
            Some(roots.as_path()),
        )
        .unwrap_err();
        assert!(matches!(err, TlsError::NoTrustRoots(_)), "{err}");

        let missing = dir.path().join("missing.key");
        let err = TlsMaterial::load(
            Some(cert.as_path()),
            Some(missing.as_path()),
            Some(roots.as_path()),
        )
        .unwrap_err();
        assert!(matches!(err, TlsError::Read { .. }), "{err}");
    }
}
