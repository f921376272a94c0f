use thiserror::Error;

#[derive(Debug, Error)]
pub enum SshError {
    #[error("ssh connect failed: {0}")]
    Connect(#[source] russh::Error),

    #[error("ssh credential error: {0}")]
    Key(String),

    #[error("ssh authentication was rejected")]
    AuthFailed,

    #[error("ssh channel error: {0}")]
    Channel(#[source] russh::Error),

    #[error("sftp error: {0}")]
    Sftp(String),

    #[error("no action mapping for '{0}' over the ssh fallback path")]
    Unsupported(String),
}
