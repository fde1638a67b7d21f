// bom_exporter - Prometheus metrics exporter for the Bureau of Meteorology
//
// Copyright 2022 Nick Pillitteri
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program.  If not, see <http://www.gnu.org/licenses/>.
//

use async_trait::async_trait;
use std::error;
use std::fmt;
use std::io::{self, Read};
use std::net::{TcpStream, ToSocketAddrs};
use std::path::{Path, PathBuf};
use std::time::Duration;
use suppaftp::types::FileType;
use suppaftp::{FtpError, FtpStream};
use tokio::task::JoinError;

#[derive(Debug)]
pub enum ClientError {
    Io(io::Error),
    Ftp(FtpError),
    Join(JoinError),
    InvalidIdentifier(String),
    NotFound(String),
}

impl fmt::Display for ClientError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io(e) => write!(f, "{}", e),
            Self::Ftp(e) => write!(f, "ftp: {}", e),
            Self::Join(e) => write!(f, "retrieval task failed: {}", e),
            Self::InvalidIdentifier(id) => write!(f, "invalid identifier {}", id),
            Self::NotFound(id) => write!(f, "product {} not found", id),
        }
    }
}

impl error::Error for ClientError {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            Self::Ftp(e) => Some(e),
            Self::Join(e) => Some(e),
            _ => None,
        }
    }
}

/// Source of the raw bytes of a single product.
#[async_trait]
pub trait Retriever: fmt::Debug + Send + Sync {
    /// Identifier of the product, used as a label and log key.
    fn identifier(&self) -> &str;

    /// Fetch the complete product document.
    async fn retrieve(&self) -> Result<Vec<u8>, ClientError>;
}

/// Product identifiers are of the form `IDS10034`. Anything that could escape the
/// directory it is looked up in is refused.
fn validate_identifier(id: &str) -> Result<(), ClientError> {
    let valid = !id.is_empty()
        && !id.starts_with('.')
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-' || c == '.');

    if valid {
        Ok(())
    } else {
        Err(ClientError::InvalidIdentifier(id.to_owned()))
    }
}

/// Retriever that reads a product from the local filesystem.
#[derive(Debug, Clone)]
pub struct FileRetriever {
    id: String,
    path: PathBuf,
    checked: bool,
}

impl FileRetriever {
    /// Read the product from exactly the path given, which is also its identifier.
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        let path = path.as_ref().to_path_buf();
        FileRetriever {
            id: path.to_string_lossy().into_owned(),
            path,
            checked: false,
        }
    }

    /// Read the product `<directory>/<id>.xml`.
    pub fn in_directory<P: AsRef<Path>>(directory: P, id: &str) -> Self {
        FileRetriever {
            id: id.to_owned(),
            path: directory.as_ref().join(format!("{}.xml", id)),
            checked: true,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl Retriever for FileRetriever {
    fn identifier(&self) -> &str {
        &self.id
    }

    async fn retrieve(&self) -> Result<Vec<u8>, ClientError> {
        if self.checked {
            validate_identifier(&self.id)?;
        }

        tracing::debug!(message = "reading product from file", path = %self.path.display());
        tokio::fs::read(&self.path).await.map_err(|e| {
            if e.kind() == io::ErrorKind::NotFound {
                ClientError::NotFound(self.id.clone())
            } else {
                ClientError::Io(e)
            }
        })
    }
}

/// Retriever that downloads a product from the BoM anonymous FTP server.
#[derive(Debug, Clone)]
pub struct FtpRetriever {
    id: String,
    address: String,
    path: String,
    timeout: Duration,
}

impl FtpRetriever {
    pub const DEFAULT_ADDRESS: &'static str = "ftp.bom.gov.au:21";
    pub const DEFAULT_DIRECTORY: &'static str = "anon/gen/fwo";
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

    const ANONYMOUS_USER: &'static str = "anonymous";
    const ANONYMOUS_PASSWORD: &'static str = "";

    pub fn new(id: &str) -> Self {
        Self::with_location(id, Self::DEFAULT_ADDRESS, Self::DEFAULT_DIRECTORY)
    }

    pub fn with_location(id: &str, address: &str, directory: &str) -> Self {
        FtpRetriever {
            id: id.to_owned(),
            address: address.to_owned(),
            path: format!("{}/{}.xml", directory.trim_end_matches('/'), id),
            timeout: Self::DEFAULT_TIMEOUT,
        }
    }

    /// Timeout for connecting and for each read or write on the control and data connections.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    fn download(&self) -> Result<Vec<u8>, ClientError> {
        let addr = self
            .address
            .to_socket_addrs()
            .map_err(ClientError::Io)?
            .next()
            .ok_or_else(|| {
                ClientError::Io(io::Error::new(
                    io::ErrorKind::NotFound,
                    format!("no addresses for {}", self.address),
                ))
            })?;

        tracing::debug!(message = "connecting to ftp server", address = %addr, path = %self.path);
        let control = TcpStream::connect_timeout(&addr, self.timeout).map_err(ClientError::Io)?;
        self.bound(&control)?;

        let mut ftp = FtpStream::connect_with_stream(control).map_err(ClientError::Ftp)?;
        let res = self.fetch(&mut ftp);

        if let Err(e) = ftp.quit() {
            tracing::debug!(message = "failed to close ftp session", address = %self.address, error = %e);
        }

        res
    }

    /// Every blocking read or write on `stream` gives up after the configured timeout.
    fn bound(&self, stream: &TcpStream) -> Result<(), ClientError> {
        stream.set_read_timeout(Some(self.timeout)).map_err(ClientError::Io)?;
        stream.set_write_timeout(Some(self.timeout)).map_err(ClientError::Io)
    }

    fn fetch(&self, ftp: &mut FtpStream) -> Result<Vec<u8>, ClientError> {
        ftp.login(Self::ANONYMOUS_USER, Self::ANONYMOUS_PASSWORD)
            .map_err(ClientError::Ftp)?;
        ftp.transfer_type(FileType::Binary).map_err(ClientError::Ftp)?;

        // The product must exist before it is downloaded. SIZE is answered on the
        // control connection, which is already bounded by the timeout.
        match ftp.size(&self.path) {
            Ok(size) => tracing::debug!(message = "found product", path = %self.path, num_bytes = size),
            Err(FtpError::UnexpectedResponse(_)) => return Err(ClientError::NotFound(self.id.clone())),
            Err(e) => return Err(ClientError::Ftp(e)),
        }

        let mut stream = ftp.retr_as_stream(&self.path).map_err(ClientError::Ftp)?;
        self.bound(stream.get_ref())?;

        let mut buf = Vec::new();
        let res = stream.read_to_end(&mut buf).map_err(ClientError::Io);
        ftp.finalize_retr_stream(stream).map_err(ClientError::Ftp)?;
        res?;

        Ok(buf)
    }
}

#[async_trait]
impl Retriever for FtpRetriever {
    fn identifier(&self) -> &str {
        &self.id
    }

    async fn retrieve(&self) -> Result<Vec<u8>, ClientError> {
        validate_identifier(&self.id)?;

        let this = self.clone();
        tokio::task::spawn_blocking(move || this.download())
            .await
            .map_err(ClientError::Join)?
    }
}

#[cfg(test)]
mod test {
    use super::{validate_identifier, ClientError, FileRetriever, FtpRetriever, Retriever};
    use std::io::Write;
    use std::net::TcpListener;
    use std::path::Path;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_validate_identifier() {
        assert!(validate_identifier("IDS10034").is_ok());
        assert!(validate_identifier("IDS60920.xml").is_ok());
        assert!(validate_identifier("ID_test-1").is_ok());
        assert!(validate_identifier("").is_err());
        assert!(validate_identifier("../etc/passwd").is_err());
        assert!(validate_identifier(".hidden").is_err());
        assert!(validate_identifier("a/b").is_err());
        assert!(validate_identifier("a b").is_err());
    }

    #[tokio::test]
    async fn test_file_retriever_reads_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"<product/>").unwrap();

        let retriever = FileRetriever::new(file.path());
        assert_eq!(file.path().to_string_lossy(), retriever.identifier());
        assert_eq!(b"<product/>".to_vec(), retriever.retrieve().await.unwrap());
    }

    #[tokio::test]
    async fn test_file_retriever_in_directory() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("IDS10034.xml"), b"<product/>").unwrap();

        let retriever = FileRetriever::in_directory(dir.path(), "IDS10034");
        assert_eq!("IDS10034", retriever.identifier());
        assert_eq!(dir.path().join("IDS10034.xml"), retriever.path());
        assert_eq!(b"<product/>".to_vec(), retriever.retrieve().await.unwrap());
    }

    #[tokio::test]
    async fn test_file_retriever_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let retriever = FileRetriever::in_directory(dir.path(), "IDS99999");

        let res = retriever.retrieve().await;
        assert!(matches!(res, Err(ClientError::NotFound(id)) if id == "IDS99999"));
    }

    #[tokio::test]
    async fn test_file_retriever_rejects_traversal() {
        let retriever = FileRetriever::in_directory(Path::new("/tmp"), "../../etc/passwd");
        let res = retriever.retrieve().await;
        assert!(matches!(res, Err(ClientError::InvalidIdentifier(_))));
    }

    #[test]
    fn test_ftp_retriever_location() {
        let retriever = FtpRetriever::new("IDS10034");
        assert_eq!("IDS10034", retriever.identifier());
        assert_eq!(FtpRetriever::DEFAULT_ADDRESS, retriever.address());
        assert_eq!("anon/gen/fwo/IDS10034.xml", retriever.path());

        let custom = FtpRetriever::with_location("IDT60920", "localhost:2121", "pub/products/")
            .with_timeout(Duration::from_millis(100));
        assert_eq!("localhost:2121", custom.address());
        assert_eq!("pub/products/IDT60920.xml", custom.path());
    }

    #[tokio::test]
    async fn test_ftp_retriever_rejects_invalid_identifier() {
        let retriever = FtpRetriever::with_location("../secret", "localhost:1", "anon");
        let res = retriever.retrieve().await;
        assert!(matches!(res, Err(ClientError::InvalidIdentifier(_))));
    }

    #[tokio::test]
    async fn test_ftp_retriever_gives_up_on_silent_server() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let address = listener.local_addr().unwrap().to_string();
        thread::spawn(move || {
            // Accept the connection but never send a greeting
            let (_conn, _) = listener.accept().unwrap();
            thread::sleep(Duration::from_secs(30));
        });

        let retriever = FtpRetriever::with_location("IDS10034", &address, "anon/gen/fwo")
            .with_timeout(Duration::from_millis(200));
        let res = tokio::time::timeout(Duration::from_secs(10), retriever.retrieve())
            .await
            .expect("retrieval did not give up on a silent server");

        assert!(matches!(res, Err(ClientError::Ftp(_)) | Err(ClientError::Io(_))));
    }
}
